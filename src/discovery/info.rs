use crate::{
	cache::DnsCache,
	dns::{Name, RData, RecordType},
};
use std::{collections::BTreeSet, net::IpAddr};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// The TXT strings of a service, with DNS-SD `key=value` lookup (RFC 6763 §6).
pub struct TxtProperties(Vec<Vec<u8>>);
impl TxtProperties {
	#[inline(always)]
	/// The raw TXT strings, in the order they were received
	pub fn strings(&self) -> &[Vec<u8>] {
		&self.0
	}

	/// Looks up `key`, ignoring ASCII case. Only the first occurrence of a key counts.
	///
	/// Returns `Some(None)` for a bare boolean key and `Some(Some(value))` for `key=value`.
	pub fn get(&self, key: &str) -> Option<Option<&[u8]>> {
		self.iter().find(|(k, _)| k.eq_ignore_ascii_case(key.as_bytes())).map(|(_, value)| value)
	}

	/// Like [`get`](TxtProperties::get), as UTF-8. Bare keys and non-UTF-8 values read as `None`.
	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).flatten().and_then(|value| std::str::from_utf8(value).ok())
	}

	/// Iterates over `(key, value)` pairs, skipping strings with an empty key.
	pub fn iter(&self) -> impl Iterator<Item = (&[u8], Option<&[u8]>)> {
		self.0.iter().filter_map(|entry| {
			let (key, value) = match entry.iter().position(|b| *b == b'=') {
				Some(eq) => (&entry[..eq], Some(&entry[eq + 1..])),
				None => (entry.as_slice(), None),
			};
			(!key.is_empty()).then_some((key, value))
		})
	}
}
impl From<Vec<Vec<u8>>> for TxtProperties {
	fn from(strings: Vec<Vec<u8>>) -> Self {
		Self(strings)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A resolved service instance.
pub struct ServiceInfo {
	pub service_type: Name,
	pub fullname: Name,
	/// The host the SRV record points at
	pub server: Name,
	/// Every cached A and AAAA address of `server`. May be empty if the addresses have not
	/// arrived yet.
	pub addresses: BTreeSet<IpAddr>,
	pub port: u16,
	pub priority: u16,
	pub weight: u16,
	pub txt: TxtProperties,
}
impl ServiceInfo {
	/// Assembles a service from the cache. `None` until both SRV and TXT are cached.
	pub(crate) fn from_cache(cache: &DnsCache, service_type: &Name, fullname: &Name) -> Option<Self> {
		let srv = cache.get(fullname, RecordType::Srv).iter().find_map(|record| match record.data() {
			RData::Srv(srv) => Some(srv),
			_ => None,
		})?;

		let txt = cache.get(fullname, RecordType::Txt).iter().find_map(|record| match record.data() {
			RData::Txt(txt) => Some(txt),
			_ => None,
		})?;

		let addresses = cache
			.get(&srv.target, RecordType::A)
			.iter()
			.chain(cache.get(&srv.target, RecordType::Aaaa))
			.filter_map(|record| match record.data() {
				RData::A(addr) => Some(IpAddr::V4(*addr)),
				RData::Aaaa(addr) => Some(IpAddr::V6(*addr)),
				_ => None,
			})
			.collect();

		Some(ServiceInfo {
			service_type: service_type.clone(),
			fullname: fullname.clone(),
			server: srv.target.clone(),
			addresses,
			port: srv.port,
			priority: srv.priority,
			weight: srv.weight,
			txt: TxtProperties(txt.strings().to_vec()),
		})
	}

	#[inline]
	/// The instance label, e.g. `printer` for `printer._ipp._tcp.local.`
	pub fn instance_name(&self) -> &str {
		self.fullname.first_label().unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::dns::{DnsRecord, Srv, Txt};
	use std::net::{Ipv4Addr, Ipv6Addr};

	#[test]
	fn txt_lookup() {
		let txt = TxtProperties::from(vec![b"Path=/".to_vec(), b"color".to_vec(), b"path=/ignored".to_vec(), b"=x".to_vec()]);
		assert_eq!(txt.get("path"), Some(Some(&b"/"[..])));
		assert_eq!(txt.get_str("PATH"), Some("/"));
		assert_eq!(txt.get("color"), Some(None));
		assert_eq!(txt.get("missing"), None);
		assert_eq!(txt.iter().count(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn assembles_from_cache() {
		let service_type = Name::parse("_ipp._tcp.local.").unwrap();
		let fullname = Name::parse("printer._ipp._tcp.local.").unwrap();
		let host = Name::parse("printer.local.").unwrap();

		let mut cache = DnsCache::new();
		cache.add(DnsRecord::new(
			fullname.clone(),
			120,
			RData::Srv(Srv {
				priority: 0,
				weight: 0,
				port: 631,
				target: host.clone(),
			}),
		));
		assert!(ServiceInfo::from_cache(&cache, &service_type, &fullname).is_none());

		cache.add(DnsRecord::new(fullname.clone(), 4500, RData::Txt(Txt(vec![b"path=/".to_vec()]))));
		let info = ServiceInfo::from_cache(&cache, &service_type, &fullname).unwrap();
		assert!(info.addresses.is_empty());
		assert_eq!(info.instance_name(), "printer");

		cache.add(DnsRecord::new(host.clone(), 120, RData::A(Ipv4Addr::new(10, 0, 0, 1))));
		cache.add(DnsRecord::new(host, 120, RData::Aaaa(Ipv6Addr::LOCALHOST)));
		let info = ServiceInfo::from_cache(&cache, &service_type, &fullname).unwrap();
		assert_eq!(info.addresses.len(), 2);
		assert_eq!(info.port, 631);
		assert_eq!(info.txt.get_str("path"), Some("/"));
	}
}
