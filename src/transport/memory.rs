use super::Transport;
use crate::MDNS_PORT;
use async_trait::async_trait;
use std::{
	io,
	net::{IpAddr, Ipv4Addr, SocketAddr},
	sync::{
		atomic::{AtomicBool, AtomicU32, Ordering},
		Arc,
	},
};
use tokio::sync::{broadcast, Mutex};

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Clone, Debug)]
struct Datagram {
	src: SocketAddr,
	/// `None` for multicast
	dst: Option<SocketAddr>,
	payload: Arc<[u8]>,
}

#[derive(Clone, Debug)]
/// An in-memory LAN segment.
///
/// Every endpoint receives every multicast datagram, including its own, like a socket with
/// multicast loopback enabled. Combined with Tokio's paused clock this makes timing
/// behaviour fully deterministic in tests.
pub struct MemoryNetwork {
	tx: broadcast::Sender<Datagram>,
	next_host: Arc<AtomicU32>,
}
impl MemoryNetwork {
	pub fn new() -> Self {
		let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
		Self {
			tx,
			next_host: Arc::new(AtomicU32::new(1)),
		}
	}

	/// Attaches a new endpoint with the next free address in `10.0.0.0/8`.
	pub fn endpoint(&self) -> MemoryTransport {
		let host = self.next_host.fetch_add(1, Ordering::Relaxed);
		let ip = Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 0, 0, 0)) | (host & 0x00FF_FFFF));
		self.endpoint_at(SocketAddr::new(IpAddr::V4(ip), MDNS_PORT))
	}

	/// Attaches a new endpoint with the given address.
	pub fn endpoint_at(&self, addr: SocketAddr) -> MemoryTransport {
		MemoryTransport {
			addr,
			tx: self.tx.clone(),
			rx: Mutex::new(self.tx.subscribe()),
			joined: AtomicBool::new(true),
		}
	}
}
impl Default for MemoryNetwork {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Debug)]
/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
	addr: SocketAddr,
	tx: broadcast::Sender<Datagram>,
	rx: Mutex<broadcast::Receiver<Datagram>>,
	joined: AtomicBool,
}
impl MemoryTransport {
	#[inline(always)]
	/// The address other endpoints see as the source of this endpoint's datagrams.
	pub fn local_addr(&self) -> SocketAddr {
		self.addr
	}

	fn send(&self, packet: &[u8], dst: Option<SocketAddr>) -> io::Result<()> {
		// No receivers is not an error on a LAN either.
		self.tx
			.send(Datagram {
				src: self.addr,
				dst,
				payload: Arc::from(packet),
			})
			.ok();
		Ok(())
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	fn describe(&self) -> String {
		format!("memory {}", self.addr)
	}

	fn supports(&self, addr: &SocketAddr) -> bool {
		addr.is_ipv4() == self.addr.is_ipv4()
	}

	async fn send_multicast(&self, packet: &[u8]) -> io::Result<()> {
		self.send(packet, None)
	}

	async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> io::Result<()> {
		self.send(packet, Some(addr))
	}

	async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
		let mut rx = self.rx.lock().await;
		loop {
			let datagram = match rx.recv().await {
				Ok(datagram) => datagram,
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => return Err(io::ErrorKind::NotConnected.into()),
			};

			let for_us = match datagram.dst {
				Some(dst) => dst == self.addr,
				None => self.joined.load(Ordering::Acquire),
			};
			if !for_us {
				continue;
			}

			let len = datagram.payload.len().min(buf.len());
			buf[..len].copy_from_slice(&datagram.payload[..len]);
			return Ok((len, datagram.src));
		}
	}

	async fn leave_group(&self) -> io::Result<()> {
		self.joined.store(false, Ordering::Release);
		Ok(())
	}
}
