//! Interface selection for the multicast sockets

use std::{
	collections::BTreeSet,
	net::{IpAddr, Ipv4Addr, Ipv6Addr},
	num::NonZeroU32,
};

/// Re-exported for enumerating the system's interfaces when building a [`TargetInterface`].
pub use if_addrs;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// An IPv6 interface, identified by its (non-zero) index.
///
/// IPv6 multicast groups are joined per interface index rather than per address.
pub struct Ipv6Interface(pub NonZeroU32);
impl Ipv6Interface {
	/// Looks up an interface by name, e.g. `eth0`.
	pub fn from_name(name: &str) -> Result<Self, std::io::Error> {
		crate::util::iface_v6_name_to_index(name).map(Self)
	}

	/// Finds the interface that owns `addr`.
	pub fn from_addr(addr: &Ipv6Addr) -> Result<Self, std::io::Error> {
		let iface = if_addrs::get_if_addrs()?
			.into_iter()
			.find(|iface| iface.ip() == IpAddr::V6(*addr))
			.ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "No interface has this address"))?;
		Self::from_name(&iface.name)
	}

	/// The interface's name and IPv6 addresses.
	pub fn describe(&self) -> Result<(String, Vec<Ipv6Addr>), std::io::Error> {
		let mut name = None;
		let mut addrs = Vec::new();
		for iface in if_addrs::get_if_addrs()? {
			let addr = match iface.ip() {
				IpAddr::V6(addr) => addr,
				IpAddr::V4(_) => continue,
			};
			if Self::from_name(&iface.name).ok() == Some(*self) {
				addrs.push(addr);
				name.get_or_insert(iface.name);
			}
		}

		match name {
			Some(name) => Ok((name, addrs)),
			None => Err(std::io::Error::new(std::io::ErrorKind::NotFound, "Interface not found")),
		}
	}

	#[inline(always)]
	pub fn from_raw(raw: NonZeroU32) -> Self {
		Self(raw)
	}

	#[inline(always)]
	/// The raw, non-zero interface index.
	pub fn as_u32(&self) -> u32 {
		self.0.get()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The IP families an engine binds sockets for.
pub enum IpVersion {
	V4,
	V6,
	/// Both families; an engine only fails to open if neither can be bound.
	Both,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The interfaces on which to join the mDNS multicast group.
pub enum TargetInterface<Addr> {
	/// Let the OS pick one interface.
	Default,

	/// Join on every non-loopback interface, falling back to `Default` if none accept the join.
	All,

	/// Join on the given interface only.
	Specific(Addr),

	/// Join on each of the given interfaces; multicast sends are repeated on every one.
	Multi(BTreeSet<Addr>),
}
impl<Addr> TargetInterface<Addr> {
	/// Whether the caller named the interfaces; joining none of them is then an error
	/// instead of a fallback to the default interface.
	pub(crate) fn is_explicit(&self) -> bool {
		matches!(self, TargetInterface::Specific(_) | TargetInterface::Multi(_))
	}
}

/// A `TargetInterface` for IPv4, addressed by interface address.
pub type TargetInterfaceV4 = TargetInterface<Ipv4Addr>;
impl TargetInterfaceV4 {
	/// The interface addresses to join on. Empty means the OS default.
	pub(crate) fn addrs(&self) -> BTreeSet<Ipv4Addr> {
		match self {
			TargetInterface::Default => BTreeSet::new(),
			TargetInterface::Specific(iface) => BTreeSet::from([*iface]),
			TargetInterface::Multi(ifaces) => ifaces.clone(),
			TargetInterface::All => if_addrs::get_if_addrs()
				.map(|ifaces| {
					ifaces
						.into_iter()
						.filter(|iface| !iface.is_loopback())
						.filter_map(|iface| match iface.ip() {
							IpAddr::V4(addr) => Some(addr),
							IpAddr::V6(_) => None,
						})
						.collect()
				})
				.unwrap_or_default(),
		}
	}
}

/// A `TargetInterface` for IPv6, addressed by interface index.
pub type TargetInterfaceV6 = TargetInterface<Ipv6Interface>;
impl TargetInterfaceV6 {
	/// The interface indexes to join on. Empty means the OS default.
	pub(crate) fn indexes(&self) -> BTreeSet<u32> {
		match self {
			TargetInterface::Default => BTreeSet::new(),
			TargetInterface::Specific(iface) => BTreeSet::from([iface.as_u32()]),
			TargetInterface::Multi(ifaces) => ifaces.iter().map(Ipv6Interface::as_u32).collect(),
			TargetInterface::All => if_addrs::get_if_addrs()
				.map(|ifaces| {
					ifaces
						.into_iter()
						.filter(|iface| !iface.is_loopback() && iface.ip().is_ipv6())
						.filter_map(|iface| Ipv6Interface::from_name(&iface.name).ok())
						.map(|iface| iface.as_u32())
						.collect()
				})
				.unwrap_or_default(),
		}
	}
}
