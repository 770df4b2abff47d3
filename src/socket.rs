use crate::{
	net::{TargetInterfaceV4, TargetInterfaceV6},
	transport::Transport,
	MDNS_PORT, MDNS_V4_IP, MDNS_V6_IP,
};
use async_trait::async_trait;
use socket2::SockRef;
use std::{
	collections::BTreeSet,
	io,
	net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
};
use tokio::{net::UdpSocket as AsyncUdpSocket, sync::Mutex};

/// Multicast TTL / hop limit (RFC 6762 §11).
const MULTICAST_TTL: u32 = 255;

#[derive(Debug)]
enum Joined {
	/// Interface addresses; empty means the OS default interface
	V4(BTreeSet<Ipv4Addr>),
	/// Interface indexes; empty means the OS default interface
	V6(BTreeSet<u32>),
}

#[derive(Debug)]
/// A UDP socket bound to port 5353 and joined to the mDNS group of one IP family.
///
/// When joined on several interfaces, multicast sends are repeated once per interface.
pub(crate) struct MulticastSocket {
	socket: AsyncUdpSocket,
	joined: Joined,
	/// Serializes "select outgoing interface, then send" pairs
	send_lock: Mutex<()>,
}
impl MulticastSocket {
	pub(crate) fn new_v4(loopback: bool, interface: &TargetInterfaceV4) -> Result<Self, io::Error> {
		let socket = socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
		socket.set_reuse_address(true)?;
		#[cfg(unix)]
		socket.set_reuse_port(true)?;
		socket.set_multicast_loop_v4(loopback)?;
		socket.set_multicast_ttl_v4(MULTICAST_TTL)?;

		let wanted = interface.addrs();

		let joined = wanted
			.into_iter()
			.filter(|iface| socket.join_multicast_v4(&MDNS_V4_IP, iface).is_ok())
			.collect::<BTreeSet<_>>();

		if joined.is_empty() {
			if interface.is_explicit() {
				return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "Could not join the mDNS group on the requested interfaces"));
			}
			// Fall back to the default interface
			socket.join_multicast_v4(&MDNS_V4_IP, &Ipv4Addr::UNSPECIFIED)?;
		} else if joined.len() == 1 {
			socket.set_multicast_if_v4(joined.iter().next().unwrap_or(&Ipv4Addr::UNSPECIFIED))?;
		}

		socket.bind(&SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), MDNS_PORT).into())?;
		socket.set_nonblocking(true)?;

		Ok(Self {
			socket: AsyncUdpSocket::from_std(socket.into())?,
			joined: Joined::V4(joined),
			send_lock: Mutex::new(()),
		})
	}

	pub(crate) fn new_v6(loopback: bool, interface: &TargetInterfaceV6) -> Result<Self, io::Error> {
		let socket = socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::DGRAM, Some(socket2::Protocol::UDP))?;
		socket.set_reuse_address(true)?;
		#[cfg(unix)]
		socket.set_reuse_port(true)?;
		socket.set_only_v6(true)?;
		socket.set_multicast_loop_v6(loopback)?;
		socket.set_multicast_hops_v6(MULTICAST_TTL)?;

		let wanted = interface.indexes();

		let joined = wanted
			.into_iter()
			.filter(|index| socket.join_multicast_v6(&MDNS_V6_IP, *index).is_ok())
			.collect::<BTreeSet<_>>();

		if joined.is_empty() {
			if interface.is_explicit() {
				return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "Could not join the mDNS group on the requested interfaces"));
			}
			// Fall back to the default interface
			socket.join_multicast_v6(&MDNS_V6_IP, 0)?;
		} else if joined.len() == 1 {
			socket.set_multicast_if_v6(joined.iter().copied().next().unwrap_or(0))?;
		}

		socket.bind(&SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), MDNS_PORT).into())?;
		socket.set_nonblocking(true)?;

		Ok(Self {
			socket: AsyncUdpSocket::from_std(socket.into())?,
			joined: Joined::V6(joined),
			send_lock: Mutex::new(()),
		})
	}

	fn group(&self) -> SocketAddr {
		match self.joined {
			Joined::V4(_) => SocketAddr::new(IpAddr::V4(MDNS_V4_IP), MDNS_PORT),
			Joined::V6(_) => SocketAddr::new(IpAddr::V6(MDNS_V6_IP), MDNS_PORT),
		}
	}
}

#[async_trait]
impl Transport for MulticastSocket {
	fn describe(&self) -> String {
		let family = match self.joined {
			Joined::V4(_) => "IPv4",
			Joined::V6(_) => "IPv6",
		};
		match self.socket.local_addr() {
			Ok(addr) => format!("{family} {addr}"),
			Err(_) => family.to_string(),
		}
	}

	fn supports(&self, addr: &SocketAddr) -> bool {
		matches!((&self.joined, addr), (Joined::V4(_), SocketAddr::V4(_)) | (Joined::V6(_), SocketAddr::V6(_)))
	}

	async fn send_multicast(&self, packet: &[u8]) -> io::Result<()> {
		let group = self.group();
		let _guard = self.send_lock.lock().await;

		match &self.joined {
			Joined::V4(ifaces) if ifaces.len() > 1 => {
				for iface in ifaces {
					SockRef::from(&self.socket).set_multicast_if_v4(iface)?;
					self.socket.send_to(packet, group).await?;
				}
			}

			Joined::V6(ifaces) if ifaces.len() > 1 => {
				for iface in ifaces.iter().copied() {
					SockRef::from(&self.socket).set_multicast_if_v6(iface)?;
					self.socket.send_to(packet, group).await?;
				}
			}

			_ => {
				self.socket.send_to(packet, group).await?;
			}
		}

		Ok(())
	}

	async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> io::Result<()> {
		if !self.supports(&addr) {
			return Err(io::Error::new(io::ErrorKind::InvalidInput, "Address family does not match the socket"));
		}
		self.socket.send_to(packet, addr).await.map(|_| ())
	}

	async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
		self.socket.recv_from(buf).await
	}

	async fn leave_group(&self) -> io::Result<()> {
		let socket = SockRef::from(&self.socket);
		match &self.joined {
			Joined::V4(ifaces) if ifaces.is_empty() => socket.leave_multicast_v4(&MDNS_V4_IP, &Ipv4Addr::UNSPECIFIED),
			Joined::V4(ifaces) => ifaces.iter().try_for_each(|iface| socket.leave_multicast_v4(&MDNS_V4_IP, iface)),
			Joined::V6(ifaces) if ifaces.is_empty() => socket.leave_multicast_v6(&MDNS_V6_IP, 0),
			Joined::V6(ifaces) => ifaces.iter().try_for_each(|iface| socket.leave_multicast_v6(&MDNS_V6_IP, *iface)),
		}
	}
}
