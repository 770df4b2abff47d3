use super::errors::ServiceBuilderError;
use crate::{
	dns::{DnsRecord, Hinfo, Name, Nsec, RData, RecordType, Srv, Txt},
	errors::BadDnsNameError,
	util::IntoDnsName,
};
use std::{
	borrow::Cow,
	collections::BTreeSet,
	net::IpAddr,
};

const TXT_MAX_LEN: usize = 255;

/// Default TTL of records bound to the host: SRV, A and AAAA (RFC 6762 §10).
pub const DEFAULT_HOST_TTL: u32 = 120;

/// Default TTL of every other record: PTR and TXT.
pub const DEFAULT_OTHER_TTL: u32 = 4500;

/// Values that can be stored as one TXT entry, static or built at runtime.
pub trait IntoServiceTxt: Sized {
	fn into_service_txt(self) -> Cow<'static, [u8]>;

	/// Like [`into_service_txt`](IntoServiceTxt::into_service_txt), cut to 255 bytes.
	fn into_service_txt_truncated(self) -> Cow<'static, [u8]> {
		match self.into_service_txt() {
			Cow::Borrowed(txt) => Cow::Borrowed(&txt[..TXT_MAX_LEN.min(txt.len())]),
			Cow::Owned(mut txt) => {
				txt.truncate(TXT_MAX_LEN);
				Cow::Owned(txt)
			}
		}
	}
}
impl IntoServiceTxt for Vec<u8> {
	#[inline(always)]
	fn into_service_txt(self) -> Cow<'static, [u8]> {
		Cow::Owned(self)
	}
}
impl IntoServiceTxt for &'static [u8] {
	#[inline(always)]
	fn into_service_txt(self) -> Cow<'static, [u8]> {
		Cow::Borrowed(self)
	}
}
impl IntoServiceTxt for String {
	#[inline(always)]
	fn into_service_txt(self) -> Cow<'static, [u8]> {
		Cow::Owned(self.into_bytes())
	}
}
impl IntoServiceTxt for &'static str {
	#[inline(always)]
	fn into_service_txt(self) -> Cow<'static, [u8]> {
		Cow::Borrowed(self.as_bytes())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A service instance to register on the network.
///
/// This can be created using the [`ServiceBuilder`].
pub struct Service {
	service_type: Name,
	instance_name: String,
	hostname: Name,
	addresses: BTreeSet<IpAddr>,
	port: u16,
	txt: Vec<Cow<'static, [u8]>>,
	subtypes: BTreeSet<String>,
	priority: u16,
	weight: u16,
	host_ttl: u32,
	other_ttl: u32,
	hinfo: Option<Hinfo>,
}
impl Service {
	#[inline(always)]
	/// The service type, e.g. `_ipp._tcp.local.`
	pub fn service_type(&self) -> &Name {
		&self.service_type
	}

	#[inline(always)]
	/// The requested instance label, e.g. `printer`
	pub fn instance_name(&self) -> &str {
		&self.instance_name
	}

	/// The requested full instance name, e.g. `printer._ipp._tcp.local.`
	pub fn fullname(&self) -> Name {
		// Validated by the builder
		self.service_type.prepend_label(&self.instance_name).unwrap_or_else(|_| self.service_type.clone())
	}

	#[inline(always)]
	/// The host the SRV record points at
	pub fn hostname(&self) -> &Name {
		&self.hostname
	}

	#[inline(always)]
	pub fn addresses(&self) -> &BTreeSet<IpAddr> {
		&self.addresses
	}

	#[inline(always)]
	pub fn port(&self) -> u16 {
		self.port
	}

	#[inline(always)]
	pub fn txt(&self) -> &[Cow<'static, [u8]>] {
		&self.txt
	}

	#[inline(always)]
	/// Subtype labels, e.g. `_printer`
	pub fn subtypes(&self) -> &BTreeSet<String> {
		&self.subtypes
	}

	#[inline(always)]
	pub fn host_ttl(&self) -> u32 {
		self.host_ttl
	}

	#[inline(always)]
	pub fn other_ttl(&self) -> u32 {
		self.other_ttl
	}

	/// The full instance name after the `n`th rename: `printer (2)._ipp._tcp.local.` and so on.
	pub(crate) fn renamed(&self, n: u32) -> Result<Name, BadDnsNameError> {
		self.service_type.prepend_label(&format!("{} ({n})", self.instance_name))
	}

	/// The host name after the `n`th rename: `printer-2.local.` and so on.
	pub(crate) fn renamed_host(&self, n: u32) -> Result<Name, BadDnsNameError> {
		let label = self.hostname.first_label().ok_or(BadDnsNameError)?;
		self.hostname.parent().ok_or(BadDnsNameError)?.prepend_label(&format!("{label}-{n}"))
	}

	#[inline(always)]
	pub(crate) fn set_hostname(&mut self, hostname: Name) {
		self.hostname = hostname;
	}

	/// All records this service publishes when registered under `fullname`.
	pub(crate) fn records(&self, fullname: &Name) -> ServiceRecords {
		let srv = DnsRecord::new(
			fullname.clone(),
			self.host_ttl,
			RData::Srv(Srv {
				priority: self.priority,
				weight: self.weight,
				port: self.port,
				target: self.hostname.clone(),
			}),
		)
		.with_cache_flush(true);

		let txt = DnsRecord::new(
			fullname.clone(),
			self.other_ttl,
			RData::Txt(Txt(self.txt.iter().map(|entry| entry.to_vec()).collect())),
		)
		.with_cache_flush(true);

		let mut host_types = BTreeSet::new();
		let mut host = self
			.addresses
			.iter()
			.map(|addr| {
				let data = match addr {
					IpAddr::V4(addr) => RData::A(*addr),
					IpAddr::V6(addr) => RData::Aaaa(*addr),
				};
				host_types.insert(data.record_type());
				DnsRecord::new(self.hostname.clone(), self.host_ttl, data).with_cache_flush(true)
			})
			.collect::<Vec<_>>();
		if let Some(hinfo) = &self.hinfo {
			host_types.insert(RecordType::Hinfo);
			host.push(DnsRecord::new(self.hostname.clone(), self.host_ttl, RData::Hinfo(hinfo.clone())).with_cache_flush(true));
		}

		ServiceRecords {
			ptr: DnsRecord::new(self.service_type.clone(), self.other_ttl, RData::Ptr(fullname.clone())),

			subtype_ptrs: self
				.subtypes
				.iter()
				.filter_map(|subtype| {
					let name = self.service_type.prepend_label("_sub").and_then(|sub| sub.prepend_label(subtype)).ok()?;
					Some(DnsRecord::new(name, self.other_ttl, RData::Ptr(fullname.clone())))
				})
				.collect(),

			enumeration: DnsRecord::new(Name::services_meta_query(), self.other_ttl, RData::Ptr(self.service_type.clone())),

			instance_nsec: DnsRecord::new(
				fullname.clone(),
				self.other_ttl,
				RData::Nsec(Nsec {
					next_domain: fullname.clone(),
					types: [RecordType::Srv, RecordType::Txt].into_iter().collect(),
				}),
			)
			.with_cache_flush(true),

			host_nsec: DnsRecord::new(
				self.hostname.clone(),
				self.host_ttl,
				RData::Nsec(Nsec {
					next_domain: self.hostname.clone(),
					types: host_types,
				}),
			)
			.with_cache_flush(true),

			srv,
			txt,
			host,
		}
	}
}

#[derive(Debug, Clone)]
/// The records of one registered service instance.
pub(crate) struct ServiceRecords {
	/// `<type> PTR <instance>`
	pub(crate) ptr: DnsRecord,
	/// `<subtype>._sub.<type> PTR <instance>`
	pub(crate) subtype_ptrs: Vec<DnsRecord>,
	/// `_services._dns-sd._udp.local. PTR <type>`
	pub(crate) enumeration: DnsRecord,
	pub(crate) srv: DnsRecord,
	pub(crate) txt: DnsRecord,
	/// A, AAAA and HINFO records of the host
	pub(crate) host: Vec<DnsRecord>,
	pub(crate) instance_nsec: DnsRecord,
	pub(crate) host_nsec: DnsRecord,
}
impl ServiceRecords {
	/// Records that answer queries, excluding the NSEC records.
	pub(crate) fn answers(&self) -> impl Iterator<Item = &DnsRecord> {
		std::iter::once(&self.ptr)
			.chain(self.subtype_ptrs.iter())
			.chain(std::iter::once(&self.enumeration))
			.chain([&self.srv, &self.txt])
			.chain(self.host.iter())
	}

	#[inline]
	pub(crate) fn nsecs(&self) -> [&DnsRecord; 2] {
		[&self.instance_nsec, &self.host_nsec]
	}

	/// The records a prober proposes in the authority section: SRV and TXT for the instance
	/// name, and the host's records for the host name.
	pub(crate) fn probe_authorities(&self) -> impl Iterator<Item = &DnsRecord> {
		[&self.srv, &self.txt].into_iter().chain(self.host.iter())
	}

	/// Whether a record claiming our host name carries an address we don't publish.
	pub(crate) fn foreign_address(&self, record: &DnsRecord) -> bool {
		matches!(record.data(), RData::A(_) | RData::Aaaa(_)) && record.name() == self.host_nsec.name() && !self.host.contains(record)
	}

	/// Additional records to send along with `answer` (RFC 6763 §12).
	pub(crate) fn additionals_for(&self, answer: &DnsRecord) -> Vec<&DnsRecord> {
		match answer.data() {
			RData::Ptr(_) if *answer == self.enumeration => Vec::new(),
			RData::Ptr(_) => {
				let mut additionals = vec![&self.srv, &self.txt];
				additionals.extend(self.host.iter());
				additionals.extend(self.nsecs());
				additionals
			}
			RData::Srv(_) => {
				let mut additionals = self.host.iter().collect::<Vec<_>>();
				additionals.push(&self.host_nsec);
				additionals
			}
			RData::A(_) | RData::Aaaa(_) => {
				let mut additionals = self.host.iter().filter(|record| *record != answer).collect::<Vec<_>>();
				additionals.push(&self.host_nsec);
				additionals
			}
			RData::Txt(_) | RData::Hinfo(_) | RData::Nsec(_) => Vec::new(),
		}
	}

	/// Shortest TTL among the published records; re-announcements are scheduled from it.
	pub(crate) fn min_ttl(&self) -> u32 {
		self.answers().map(DnsRecord::ttl).min().unwrap_or(DEFAULT_HOST_TTL)
	}
}

/// A builder for [`Service`]s.
pub struct ServiceBuilder(Service);
impl ServiceBuilder {
	/// Creates a builder for an instance called `instance_name` of `service_type` on `port`.
	///
	/// The instance name is a single label and may contain spaces, dots and any UTF-8.
	pub fn new(service_type: impl IntoDnsName, instance_name: impl Into<String>, port: u16) -> Result<Self, BadDnsNameError> {
		let service_type = service_type.into_fqdn()?;
		let instance_name = instance_name.into();
		service_type.prepend_label(&instance_name)?;

		let hostname = Name::from_labels([default_host_label(&instance_name), "local".to_string()])?;

		Ok(Self(Service {
			service_type,
			instance_name,
			hostname,
			addresses: BTreeSet::new(),
			port,
			txt: Vec::new(),
			subtypes: BTreeSet::new(),
			priority: 0,
			weight: 0,
			host_ttl: DEFAULT_HOST_TTL,
			other_ttl: DEFAULT_OTHER_TTL,
			hinfo: None,
		}))
	}

	/// The host name the SRV record points at. Defaults to the instance name made
	/// hostname-safe, in `local.`
	pub fn hostname(mut self, hostname: impl IntoDnsName) -> Result<Self, BadDnsNameError> {
		self.0.hostname = hostname.into_fqdn()?;
		Ok(self)
	}

	#[inline(always)]
	/// Adds an IP address that the service is available on.
	pub fn add_ip_address(mut self, ip_address: IpAddr) -> Self {
		self.0.addresses.insert(ip_address);
		self
	}

	#[inline(always)]
	/// Adds a raw TXT entry, usually `key=value`.
	pub fn add_txt(mut self, entry: impl IntoServiceTxt) -> Self {
		self.0.txt.push(entry.into_service_txt());
		self
	}

	#[inline(always)]
	/// Adds a raw TXT entry, truncated to 255 bytes.
	pub fn add_txt_truncated(mut self, entry: impl IntoServiceTxt) -> Self {
		self.0.txt.push(entry.into_service_txt_truncated());
		self
	}

	/// Adds a `key=value` TXT entry, or a bare boolean `key` if `value` is `None`.
	pub fn add_txt_property(mut self, key: &str, value: Option<&[u8]>) -> Self {
		let mut entry = key.as_bytes().to_vec();
		if let Some(value) = value {
			entry.push(b'=');
			entry.extend_from_slice(value);
		}
		self.0.txt.push(Cow::Owned(entry));
		self
	}

	/// Also publishes the instance under `<subtype>._sub.<service type>` (RFC 6763 §7.1).
	/// `subtype` is a single label such as `_printer`.
	pub fn add_subtype(mut self, subtype: impl Into<String>) -> Result<Self, BadDnsNameError> {
		let subtype = subtype.into();
		self.0.service_type.prepend_label("_sub")?.prepend_label(&subtype)?;
		self.0.subtypes.insert(subtype);
		Ok(self)
	}

	pub fn priority(mut self, priority: u16) -> Self {
		self.0.priority = priority;
		self
	}

	pub fn weight(mut self, weight: u16) -> Self {
		self.0.weight = weight;
		self
	}

	/// TTL of the SRV and address records.
	pub fn host_ttl(mut self, ttl: u32) -> Self {
		self.0.host_ttl = ttl;
		self
	}

	/// TTL of the PTR and TXT records.
	pub fn other_ttl(mut self, ttl: u32) -> Self {
		self.0.other_ttl = ttl;
		self
	}

	/// Publishes a HINFO record for the host.
	pub fn hinfo(mut self, cpu: impl Into<String>, os: impl Into<String>) -> Self {
		self.0.hinfo = Some(Hinfo { cpu: cpu.into(), os: os.into() });
		self
	}

	/// Builds the [`Service`].
	pub fn build(self) -> Result<Service, ServiceBuilderError> {
		if self.0.addresses.is_empty() {
			return Err(ServiceBuilderError::MissingAdvertisementAddr);
		}

		if !self.0.txt.iter().all(|txt| txt.len() <= TXT_MAX_LEN) {
			return Err(ServiceBuilderError::RecordTooLong);
		}

		Ok(self.0)
	}
}

/// Turns an instance name into a host label: letters, digits and dashes only.
fn default_host_label(instance_name: &str) -> String {
	let mut label = String::with_capacity(instance_name.len());
	for c in instance_name.chars() {
		if c.is_ascii_alphanumeric() {
			label.push(c.to_ascii_lowercase());
		} else if !label.ends_with('-') {
			label.push('-');
		}
	}

	let label = label.trim_matches('-');
	if label.is_empty() {
		"host".to_string()
	} else {
		label.chars().take(crate::dns::MAX_LABEL_LEN).collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::Ipv4Addr;

	fn printer() -> Service {
		ServiceBuilder::new("_ipp._tcp.local.", "Office Printer", 631)
			.unwrap()
			.add_ip_address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
			.add_txt("path=/")
			.add_txt_property("color", None)
			.add_subtype("_printer")
			.unwrap()
			.build()
			.unwrap()
	}

	#[test]
	fn builder_defaults() {
		let service = printer();
		assert_eq!(service.fullname().to_string(), "Office Printer._ipp._tcp.local.");
		assert_eq!(service.hostname().to_string(), "office-printer.local.");
		assert_eq!(service.host_ttl(), 120);
		assert_eq!(service.other_ttl(), 4500);
		assert_eq!(service.renamed(2).unwrap().to_string(), "Office Printer (2)._ipp._tcp.local.");
		assert_eq!(service.renamed_host(2).unwrap().to_string(), "office-printer-2.local.");
	}

	#[test]
	fn builder_validation() {
		let builder = || ServiceBuilder::new("_ipp._tcp.local.", "printer", 631).unwrap();
		assert!(matches!(builder().build(), Err(ServiceBuilderError::MissingAdvertisementAddr)));
		assert!(matches!(
			builder()
				.add_ip_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
				.add_txt(vec![b'x'; 256])
				.build(),
			Err(ServiceBuilderError::RecordTooLong)
		));
		assert!(builder()
			.add_ip_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
			.add_txt_truncated(vec![b'x'; 256])
			.build()
			.is_ok());
		assert!(ServiceBuilder::new("_ipp._tcp.local.", "x".repeat(64), 631).is_err());
	}

	#[test]
	fn published_records() {
		let service = printer();
		let records = service.records(&service.fullname());

		assert_eq!(records.ptr.name().to_string(), "_ipp._tcp.local.");
		assert_eq!(records.subtype_ptrs[0].name().to_string(), "_printer._sub._ipp._tcp.local.");
		assert_eq!(records.enumeration.name().to_string(), "_services._dns-sd._udp.local.");
		assert!(records.srv.cache_flush() && records.txt.cache_flush());
		assert!(!records.ptr.cache_flush());
		assert_eq!(records.min_ttl(), 120);
		assert_eq!(records.txt.data(), &RData::Txt(Txt(vec![b"path=/".to_vec(), b"color".to_vec()])));

		let additionals = records.additionals_for(&records.ptr);
		assert!(additionals.contains(&&records.srv));
		assert!(additionals.contains(&&records.host[0]));
		assert!(records.additionals_for(&records.enumeration).is_empty());

		assert_eq!(records.probe_authorities().count(), 3);
		let other = DnsRecord::new(service.hostname().clone(), 120, RData::A(Ipv4Addr::new(192, 168, 1, 21)));
		assert!(records.foreign_address(&other));
		assert!(!records.foreign_address(&records.host[0]));
	}

	#[test]
	fn host_labels() {
		assert_eq!(default_host_label("My Printer (2)"), "my-printer-2");
		assert_eq!(default_host_label("***"), "host");
	}
}
