//! Query timing for browsers: continuous queries, TTL refreshes and resolve retries

use crate::dns::DnsRecord;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
/// Continuous querying (RFC 6762 §5.2): the first query goes out immediately, then the
/// interval doubles up to a maximum.
pub(super) struct QuerySchedule {
	next: Instant,
	interval: Duration,
	max: Duration,
}
impl QuerySchedule {
	pub(super) fn new(now: Instant, initial: Duration, max: Duration) -> Self {
		Self {
			next: now,
			interval: initial.min(max),
			max,
		}
	}

	#[inline(always)]
	pub(super) fn next(&self) -> Instant {
		self.next
	}

	#[inline]
	pub(super) fn is_due(&self, now: Instant) -> bool {
		now >= self.next
	}

	/// A query was sent at `now`.
	pub(super) fn advance(&mut self, now: Instant) {
		self.next = now + self.interval;
		self.interval = (self.interval * 2).min(self.max);
	}
}

#[derive(Debug, Clone, Default)]
/// The points of a record's lifetime at which it should be re-queried.
pub(super) struct RefreshSchedule {
	points: Vec<Instant>,
}
impl RefreshSchedule {
	pub(super) fn new(record: &DnsRecord, percentages: &[u32]) -> Self {
		let mut points = percentages
			.iter()
			.filter(|percent| **percent < 100)
			.map(|percent| record.lifetime_point(*percent))
			.collect::<Vec<_>>();
		points.sort();
		Self { points }
	}

	#[inline]
	pub(super) fn next(&self) -> Option<Instant> {
		self.points.first().copied()
	}

	/// Consumes every point at or before `now`. Returns whether any was due.
	pub(super) fn fire(&mut self, now: Instant) -> bool {
		let due = self.points.iter().take_while(|point| **point <= now).count();
		self.points.drain(..due);
		due > 0
	}
}

/// Retries never wait longer than this between attempts (RFC 6762 §5.2).
const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
/// A limited number of retries with a doubling interval.
pub(super) struct Backoff {
	next: Instant,
	interval: Duration,
	remaining: u32,
}
impl Backoff {
	pub(super) fn new(now: Instant, first: Duration, attempts: u32) -> Self {
		Self {
			next: now + first,
			interval: first,
			remaining: attempts,
		}
	}

	#[inline]
	pub(super) fn next(&self) -> Option<Instant> {
		(self.remaining > 0).then_some(self.next)
	}

	/// Whether an attempt is due at `now`; if so it is counted and the next one scheduled.
	pub(super) fn fire(&mut self, now: Instant) -> bool {
		if self.remaining == 0 || now < self.next {
			return false;
		}
		self.remaining -= 1;
		self.interval = self.interval.saturating_mul(2).min(MAX_RETRY_INTERVAL);
		self.next = now + self.interval;
		true
	}

	#[inline]
	pub(super) fn stop(&mut self) {
		self.remaining = 0;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dns::{Name, RData};

	#[test]
	fn query_interval_doubles_up_to_max() {
		let start = Instant::now();
		let mut schedule = QuerySchedule::new(start, Duration::from_secs(1), Duration::from_secs(5));
		assert!(schedule.is_due(start));

		let mut now = start;
		let mut gaps = Vec::new();
		for _ in 0..5 {
			schedule.advance(now);
			gaps.push(schedule.next() - now);
			now = schedule.next();
		}
		assert_eq!(gaps, [1, 2, 4, 5, 5].map(Duration::from_secs));
	}

	#[test]
	fn refresh_points() {
		let start = Instant::now();
		let record = DnsRecord::new(Name::parse("_ipp._tcp.local.").unwrap(), 10, RData::Ptr(Name::parse("a._ipp._tcp.local.").unwrap()))
			.with_created(start);
		let mut schedule = RefreshSchedule::new(&record, &[50, 85, 95]);

		assert_eq!(schedule.next(), Some(start + Duration::from_secs(5)));
		assert!(!schedule.fire(start + Duration::from_secs(4)));
		assert!(schedule.fire(start + Duration::from_secs(5)));
		assert_eq!(schedule.next(), Some(start + Duration::from_millis(8500)));

		// Missed points collapse into one refresh
		assert!(schedule.fire(start + Duration::from_secs(10)));
		assert_eq!(schedule.next(), None);
	}

	#[test]
	fn backoff_is_limited() {
		let start = Instant::now();
		let mut backoff = Backoff::new(start, Duration::from_millis(500), 2);
		assert!(!backoff.fire(start));
		assert!(backoff.fire(start + Duration::from_millis(500)));
		assert_eq!(backoff.next(), Some(start + Duration::from_millis(1500)));
		assert!(backoff.fire(start + Duration::from_millis(1500)));
		assert_eq!(backoff.next(), None);
	}
}
