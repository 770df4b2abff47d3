use super::Name;
use std::{
	cmp::Ordering,
	collections::BTreeSet,
	hash::{Hash, Hasher},
	net::{Ipv4Addr, Ipv6Addr},
	time::Duration,
};
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// DNS resource record types understood by this crate.
pub enum RecordType {
	A,
	Ptr,
	Hinfo,
	Txt,
	Aaaa,
	Srv,
	Nsec,
	/// The `ANY` (`*`) query type
	Any,
	/// Any other type; only meaningful in questions
	Other(u16),
}
impl RecordType {
	pub const fn code(self) -> u16 {
		match self {
			RecordType::A => 1,
			RecordType::Ptr => 12,
			RecordType::Hinfo => 13,
			RecordType::Txt => 16,
			RecordType::Aaaa => 28,
			RecordType::Srv => 33,
			RecordType::Nsec => 47,
			RecordType::Any => 255,
			RecordType::Other(code) => code,
		}
	}

	/// Whether a question of this type is answered by a record of type `rtype`.
	#[inline]
	pub fn matches(self, rtype: RecordType) -> bool {
		self == RecordType::Any || self == rtype
	}
}
impl From<u16> for RecordType {
	fn from(code: u16) -> Self {
		match code {
			1 => RecordType::A,
			12 => RecordType::Ptr,
			13 => RecordType::Hinfo,
			16 => RecordType::Txt,
			28 => RecordType::Aaaa,
			33 => RecordType::Srv,
			47 => RecordType::Nsec,
			255 => RecordType::Any,
			code => RecordType::Other(code),
		}
	}
}
impl From<RecordType> for u16 {
	#[inline(always)]
	fn from(rtype: RecordType) -> Self {
		rtype.code()
	}
}
impl PartialOrd for RecordType {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for RecordType {
	fn cmp(&self, other: &Self) -> Ordering {
		self.code().cmp(&other.code())
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// DNS classes. mDNS only uses `IN`; the top bit of the wire class is carried separately.
pub enum DnsClass {
	In,
	Any,
	Other(u16),
}
impl DnsClass {
	pub const fn code(self) -> u16 {
		match self {
			DnsClass::In => 1,
			DnsClass::Any => 255,
			DnsClass::Other(code) => code,
		}
	}
}
impl From<u16> for DnsClass {
	fn from(code: u16) -> Self {
		match code {
			1 => DnsClass::In,
			255 => DnsClass::Any,
			code => DnsClass::Other(code),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Srv {
	pub priority: u16,
	pub weight: u16,
	pub port: u16,
	pub target: Name,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
/// The character-strings of a TXT record.
///
/// DNS-SD stores one `key=value` pair (or a bare `key`) per string.
pub struct Txt(pub Vec<Vec<u8>>);
impl Txt {
	/// Builds a TXT record from key/value pairs. A `None` value produces a bare boolean key.
	pub fn from_pairs<'a, I>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (&'a str, Option<&'a [u8]>)>,
	{
		Txt(pairs
			.into_iter()
			.map(|(key, value)| {
				let mut entry = key.as_bytes().to_vec();
				if let Some(value) = value {
					entry.push(b'=');
					entry.extend_from_slice(value);
				}
				entry
			})
			.collect())
	}

	#[inline]
	pub fn strings(&self) -> &[Vec<u8>] {
		&self.0
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hinfo {
	pub cpu: String,
	pub os: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// A negative response: `name` owns records of exactly `types`.
pub struct Nsec {
	pub next_domain: Name,
	pub types: BTreeSet<RecordType>,
}
impl Nsec {
	/// Whether this NSEC asserts that no record of `rtype` exists.
	pub fn denies(&self, rtype: RecordType) -> bool {
		!self.types.contains(&rtype)
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
/// Type-specific record payload.
pub enum RData {
	A(Ipv4Addr),
	Aaaa(Ipv6Addr),
	Ptr(Name),
	Srv(Srv),
	Txt(Txt),
	Hinfo(Hinfo),
	Nsec(Nsec),
}
impl RData {
	pub fn record_type(&self) -> RecordType {
		match self {
			RData::A(_) => RecordType::A,
			RData::Aaaa(_) => RecordType::Aaaa,
			RData::Ptr(_) => RecordType::Ptr,
			RData::Srv(_) => RecordType::Srv,
			RData::Txt(_) => RecordType::Txt,
			RData::Hinfo(_) => RecordType::Hinfo,
			RData::Nsec(_) => RecordType::Nsec,
		}
	}
}

#[derive(Clone, Debug)]
/// A DNS resource record together with the instant it was received or created.
///
/// Equality and hashing only consider the record's identity: name, type, class and data.
/// Two records that differ only in TTL are the same record with a different lease.
pub struct DnsRecord {
	name: Name,
	class: DnsClass,
	cache_flush: bool,
	ttl: u32,
	created: Instant,
	data: RData,
}
impl DnsRecord {
	/// Creates an `IN` class record created now.
	pub fn new(name: Name, ttl: u32, data: RData) -> Self {
		Self {
			name,
			class: DnsClass::In,
			cache_flush: false,
			ttl,
			created: Instant::now(),
			data,
		}
	}

	/// Sets the mDNS cache-flush bit, marking this record as part of a unique rrset.
	pub fn with_cache_flush(mut self, cache_flush: bool) -> Self {
		self.cache_flush = cache_flush;
		self
	}

	pub fn with_class(mut self, class: DnsClass) -> Self {
		self.class = class;
		self
	}

	pub fn with_ttl(mut self, ttl: u32) -> Self {
		self.ttl = ttl;
		self
	}

	pub fn with_created(mut self, created: Instant) -> Self {
		self.created = created;
		self
	}

	#[inline(always)]
	pub fn name(&self) -> &Name {
		&self.name
	}

	#[inline(always)]
	pub fn record_type(&self) -> RecordType {
		self.data.record_type()
	}

	#[inline(always)]
	pub fn class(&self) -> DnsClass {
		self.class
	}

	#[inline(always)]
	pub fn cache_flush(&self) -> bool {
		self.cache_flush
	}

	#[inline(always)]
	/// TTL in seconds. Zero marks a goodbye.
	pub fn ttl(&self) -> u32 {
		self.ttl
	}

	#[inline(always)]
	pub fn created(&self) -> Instant {
		self.created
	}

	#[inline(always)]
	pub fn data(&self) -> &RData {
		&self.data
	}

	/// The instant at which `percent` of this record's TTL has elapsed.
	pub fn lifetime_point(&self, percent: u32) -> Instant {
		self.created + Duration::from_millis(self.ttl as u64 * percent as u64 * 10)
	}

	#[inline]
	pub fn expires_at(&self) -> Instant {
		self.lifetime_point(100)
	}

	#[inline]
	pub fn is_expired(&self, now: Instant) -> bool {
		now >= self.expires_at()
	}

	/// Whether half of the TTL has elapsed, i.e. the record is due for a refresh query.
	#[inline]
	pub fn is_stale(&self, now: Instant) -> bool {
		now >= self.lifetime_point(50)
	}

	/// Remaining TTL in whole seconds, as it should be advertised at `now`.
	pub fn remaining_ttl(&self, now: Instant) -> u32 {
		self.expires_at().saturating_duration_since(now).as_secs() as u32
	}

	/// Known-answer suppression: `known` is the same record and the querier still holds it
	/// for more than half of our TTL.
	pub fn suppressed_by(&self, known: &DnsRecord) -> bool {
		self == known && known.ttl > self.ttl / 2
	}

	/// Takes over the lease (TTL and creation time) of `other`.
	pub(crate) fn refresh_from(&mut self, other: &DnsRecord) {
		self.ttl = other.ttl;
		self.created = other.created;
		self.cache_flush = other.cache_flush;
	}

	/// Shortens the lease so the record expires one second after `now`.
	pub(crate) fn expire_soon(&mut self, now: Instant) {
		self.ttl = 1;
		self.created = now;
	}
}
impl PartialEq for DnsRecord {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name && self.class == other.class && self.data == other.data
	}
}
impl Eq for DnsRecord {}
impl Hash for DnsRecord {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.name.hash(state);
		self.class.hash(state);
		self.data.hash(state);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ptr(ttl: u32) -> DnsRecord {
		DnsRecord::new(
			Name::parse("_ipp._tcp.local.").unwrap(),
			ttl,
			RData::Ptr(Name::parse("printer._ipp._tcp.local.").unwrap()),
		)
	}

	#[test]
	fn identity_ignores_lease() {
		let a = ptr(120);
		let b = ptr(4500).with_cache_flush(true);
		assert_eq!(a, b);

		let other = DnsRecord::new(a.name().clone(), 120, RData::Ptr(Name::parse("scanner._ipp._tcp.local.").unwrap()));
		assert_ne!(a, other);
	}

	#[test]
	fn lifetime_points() {
		let record = ptr(10);
		let created = record.created();
		assert_eq!(record.lifetime_point(50), created + Duration::from_secs(5));
		assert_eq!(record.lifetime_point(85), created + Duration::from_millis(8500));
		assert!(!record.is_stale(created + Duration::from_millis(4999)));
		assert!(record.is_stale(created + Duration::from_secs(5)));
		assert!(!record.is_expired(created + Duration::from_millis(9999)));
		assert!(record.is_expired(created + Duration::from_secs(10)));
		assert_eq!(record.remaining_ttl(created + Duration::from_millis(2500)), 7);
		assert_eq!(record.remaining_ttl(created + Duration::from_secs(11)), 0);
	}

	#[test]
	fn known_answer_suppression_needs_half_ttl() {
		let ours = ptr(120);
		assert!(ours.suppressed_by(&ptr(61)));
		assert!(!ours.suppressed_by(&ptr(60)));
	}

	#[test]
	fn type_codes_round_trip() {
		for code in [1u16, 12, 13, 16, 28, 33, 47, 255, 41] {
			assert_eq!(RecordType::from(code).code(), code);
		}
		assert_eq!(RecordType::from(41), RecordType::Other(41));
		assert!(RecordType::Any.matches(RecordType::Srv));
		assert!(!RecordType::Txt.matches(RecordType::Srv));
	}
}
