use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Protocol timing. The defaults follow RFC 6762 §5 and §8.
pub struct Timing {
	/// Number of probe queries sent before a name is claimed
	pub probe_count: u32,
	pub probe_interval: Duration,

	/// Number of unsolicited announcements after probing
	pub announce_count: u32,
	pub announce_interval: Duration,

	/// Registration fails with a timeout if probing (including renames) takes longer than this
	pub probe_timeout: Duration,

	/// How often expired records are swept from the cache
	pub sweep_interval: Duration,

	/// Interval between the first and second browse query; it doubles after every query
	pub initial_query_interval: Duration,
	/// Upper bound for the browse query interval
	pub max_query_interval: Duration,

	/// Points of a PTR record's lifetime, in percent, at which browsers query to refresh it
	pub refresh_percentages: [u32; 3],

	/// First retry interval for targeted SRV/TXT/address queries; it doubles per attempt
	pub resolve_retry_interval: Duration,
	/// Number of targeted queries a browser sends for an unresolved instance
	pub resolve_attempts: u32,

	/// How many times a conflicting instance name is renamed before registration gives up
	pub max_renames: u32,
}
impl Default for Timing {
	fn default() -> Self {
		Self {
			probe_count: 3,
			probe_interval: Duration::from_millis(250),
			announce_count: 2,
			announce_interval: Duration::from_secs(1),
			probe_timeout: Duration::from_secs(10),
			sweep_interval: Duration::from_secs(1),
			initial_query_interval: Duration::from_secs(1),
			max_query_interval: Duration::from_secs(60 * 60),
			refresh_percentages: [50, 85, 95],
			resolve_retry_interval: Duration::from_millis(500),
			resolve_attempts: 4,
			max_renames: 15,
		}
	}
}
