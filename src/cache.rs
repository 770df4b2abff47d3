//! TTL-driven record cache

use crate::dns::{DnsRecord, Name, RData, RecordType};
use std::{
	collections::{BTreeMap, HashMap},
	time::Duration,
};
use tokio::time::Instant;

/// Records of a cache-flush rrset older than this are flushed when a new member arrives.
const FLUSH_GRACE: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
/// What adding a record did to the cache.
pub enum CacheChange {
	/// The record was not cached before.
	Added(DnsRecord),

	/// An equal record was cached; its lease was renewed.
	Refreshed { old: DnsRecord, new: DnsRecord },

	/// A goodbye (TTL 0) removed the cached record.
	Removed(DnsRecord),
}
impl CacheChange {
	/// The record as it is (or was, for removals) in the cache.
	pub fn record(&self) -> &DnsRecord {
		match self {
			CacheChange::Added(record) | CacheChange::Removed(record) => record,
			CacheChange::Refreshed { new, .. } => new,
		}
	}
}

#[derive(Debug, Default)]
/// Records learned from the network, keyed by owner name and type.
///
/// Records with equal identity are coalesced: adding one again only renews its lease. Within
/// a key, records keep their insertion order.
pub struct DnsCache {
	entries: HashMap<Name, BTreeMap<RecordType, Vec<DnsRecord>>>,
}
impl DnsCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or refreshes `record`. A TTL of zero removes the equal cached record instead.
	///
	/// Returns `None` when nothing changed (a goodbye for a record we never cached).
	pub fn add(&mut self, record: DnsRecord) -> Option<CacheChange> {
		if record.ttl() == 0 {
			return self.remove(&record).map(CacheChange::Removed);
		}

		let records = self.entries.entry(record.name().clone()).or_default().entry(record.record_type()).or_default();

		match records.iter_mut().find(|cached| **cached == record) {
			Some(cached) => {
				let old = cached.clone();
				cached.refresh_from(&record);
				Some(CacheChange::Refreshed { old, new: cached.clone() })
			}
			None => {
				records.push(record.clone());
				Some(CacheChange::Added(record))
			}
		}
	}

	/// The cached records for `name` and `rtype`. [`RecordType::Any`] is not expanded here;
	/// use [`DnsCache::records_named`] for that.
	pub fn get(&self, name: &Name, rtype: RecordType) -> &[DnsRecord] {
		self.entries
			.get(name)
			.and_then(|types| types.get(&rtype))
			.map(Vec::as_slice)
			.unwrap_or_default()
	}

	/// Every cached record owned by `name`, of any type.
	pub fn records_named<'a>(&'a self, name: &Name) -> impl Iterator<Item = &'a DnsRecord> + 'a {
		self.entries.get(name).into_iter().flat_map(|types| types.values().flatten())
	}

	/// Removes the cached record equal to `record`, returning it.
	pub fn remove(&mut self, record: &DnsRecord) -> Option<DnsRecord> {
		let types = self.entries.get_mut(record.name())?;
		let records = types.get_mut(&record.record_type())?;
		let index = records.iter().position(|cached| cached == record)?;
		let removed = records.remove(index);

		if records.is_empty() {
			types.remove(&record.record_type());
			if types.is_empty() {
				self.entries.remove(record.name());
			}
		}

		Some(removed)
	}

	/// Removes and returns every record whose lease ended at or before `now`.
	pub fn expire_sweep(&mut self, now: Instant) -> Vec<DnsRecord> {
		let mut expired = Vec::new();

		self.entries.retain(|_, types| {
			types.retain(|_, records| {
				records.retain(|record| {
					if record.is_expired(now) {
						expired.push(record.clone());
						false
					} else {
						true
					}
				});
				!records.is_empty()
			});
			!types.is_empty()
		});

		expired
	}

	/// Handles the arrival of a cache-flush record for `name`/`rtype` (RFC 6762 §10.2).
	///
	/// Members of the rrset received more than a second before `now` are set to expire one
	/// second from `now`; members that arrived in the same packet are untouched.
	pub fn flush_rrset(&mut self, name: &Name, rtype: RecordType, now: Instant) -> usize {
		let records = match self.entries.get_mut(name).and_then(|types| types.get_mut(&rtype)) {
			Some(records) => records,
			None => return 0,
		};

		let mut flushed = 0;
		for record in records.iter_mut() {
			if now.saturating_duration_since(record.created()) > FLUSH_GRACE && record.expires_at() > now + FLUSH_GRACE {
				record.expire_soon(now);
				flushed += 1;
			}
		}
		flushed
	}

	/// Records worth listing as known answers in a query: those with more than half of
	/// their TTL left, carrying their remaining TTL.
	pub fn known_answers(&self, name: &Name, rtype: RecordType, now: Instant) -> Vec<DnsRecord> {
		self.get(name, rtype)
			.iter()
			.filter(|record| !record.is_stale(now))
			.map(|record| record.clone().with_ttl(record.remaining_ttl(now)).with_created(now))
			.collect()
	}

	/// Instance names whose cached SRV record points at `host`.
	pub fn instances_on_host(&self, host: &Name) -> Vec<Name> {
		self.entries
			.iter()
			.filter(|(_, types)| {
				types
					.get(&RecordType::Srv)
					.into_iter()
					.flatten()
					.any(|record| matches!(record.data(), RData::Srv(srv) if srv.target == *host))
			})
			.map(|(name, _)| name.clone())
			.collect()
	}

	/// Total number of cached records.
	pub fn len(&self) -> usize {
		self.entries.values().flat_map(BTreeMap::values).map(Vec::len).sum()
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dns::{Srv, Txt};
	use std::net::Ipv4Addr;

	fn name(name: &str) -> Name {
		Name::parse(name).unwrap()
	}

	fn a(addr: [u8; 4], ttl: u32, created: Instant) -> DnsRecord {
		DnsRecord::new(name("printer.local."), ttl, RData::A(Ipv4Addr::from(addr)))
			.with_cache_flush(true)
			.with_created(created)
	}

	#[test]
	fn adding_twice_is_idempotent() {
		let now = Instant::now();
		let mut cache = DnsCache::new();

		assert!(matches!(cache.add(a([10, 0, 0, 1], 120, now)), Some(CacheChange::Added(_))));
		let later = now + Duration::from_secs(30);
		match cache.add(a([10, 0, 0, 1], 120, later)) {
			Some(CacheChange::Refreshed { old, new }) => {
				assert_eq!(old.created(), now);
				assert_eq!(new.created(), later);
			}
			other => panic!("expected a refresh, got {other:?}"),
		}

		assert_eq!(cache.len(), 1);
		assert_eq!(cache.get(&name("printer.local."), RecordType::A).len(), 1);
		assert_eq!(cache.get(&name("PRINTER.local."), RecordType::A)[0].created(), later);
	}

	#[test]
	fn keeps_insertion_order() {
		let now = Instant::now();
		let mut cache = DnsCache::new();
		cache.add(a([10, 0, 0, 1], 120, now));
		cache.add(a([10, 0, 0, 2], 120, now));
		cache.add(a([10, 0, 0, 1], 120, now));

		let records = cache.get(&name("printer.local."), RecordType::A);
		assert_eq!(records[0].data(), &RData::A(Ipv4Addr::new(10, 0, 0, 1)));
		assert_eq!(records[1].data(), &RData::A(Ipv4Addr::new(10, 0, 0, 2)));
	}

	#[test]
	fn goodbye_removes() {
		let now = Instant::now();
		let mut cache = DnsCache::new();
		cache.add(a([10, 0, 0, 1], 120, now));

		assert!(matches!(cache.add(a([10, 0, 0, 1], 0, now)), Some(CacheChange::Removed(_))));
		assert!(cache.is_empty());
		assert_eq!(cache.add(a([10, 0, 0, 1], 0, now)), None);
	}

	#[test]
	fn sweep_expires_after_ttl() {
		let now = Instant::now();
		let mut cache = DnsCache::new();
		cache.add(a([10, 0, 0, 1], 1, now));
		cache.add(a([10, 0, 0, 2], 120, now));

		assert!(cache.expire_sweep(now + Duration::from_millis(900)).is_empty());
		let expired = cache.expire_sweep(now + Duration::from_millis(1100));
		assert_eq!(expired.len(), 1);
		assert_eq!(expired[0].data(), &RData::A(Ipv4Addr::new(10, 0, 0, 1)));
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn flush_only_touches_old_members() {
		let start = Instant::now();
		let mut cache = DnsCache::new();
		cache.add(a([10, 0, 0, 1], 120, start));

		let now = start + Duration::from_secs(5);
		cache.add(a([10, 0, 0, 2], 120, now));
		assert_eq!(cache.flush_rrset(&name("printer.local."), RecordType::A, now), 1);

		let expired = cache.expire_sweep(now + Duration::from_secs(1));
		assert_eq!(expired.len(), 1);
		assert_eq!(expired[0].data(), &RData::A(Ipv4Addr::new(10, 0, 0, 1)));
		assert_eq!(cache.get(&name("printer.local."), RecordType::A).len(), 1);
	}

	#[test]
	fn known_answers_need_half_ttl_left() {
		let start = Instant::now();
		let mut cache = DnsCache::new();
		let ptr_name = name("_ipp._tcp.local.");
		cache.add(DnsRecord::new(ptr_name.clone(), 100, RData::Ptr(name("a._ipp._tcp.local."))).with_created(start));
		cache.add(
			DnsRecord::new(ptr_name.clone(), 100, RData::Ptr(name("b._ipp._tcp.local.")))
				.with_created(start + Duration::from_secs(40)),
		);

		let known = cache.known_answers(&ptr_name, RecordType::Ptr, start + Duration::from_secs(60));
		assert_eq!(known.len(), 1);
		assert_eq!(known[0].data(), &RData::Ptr(name("b._ipp._tcp.local.")));
		assert_eq!(known[0].ttl(), 80);
	}

	#[test]
	fn finds_instances_by_host() {
		let mut cache = DnsCache::new();
		let instance = name("printer._ipp._tcp.local.");
		cache.add(DnsRecord::new(
			instance.clone(),
			120,
			RData::Srv(Srv {
				priority: 0,
				weight: 0,
				port: 631,
				target: name("printer.local."),
			}),
		));
		cache.add(DnsRecord::new(instance.clone(), 120, RData::Txt(Txt::default())));

		assert_eq!(cache.instances_on_host(&name("printer.local.")), vec![instance.clone()]);
		assert!(cache.instances_on_host(&name("scanner.local.")).is_empty());
		assert_eq!(cache.records_named(&instance).count(), 2);
	}
}
