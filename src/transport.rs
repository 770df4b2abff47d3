//! The seam between the engine and the network
//!
//! The engine only ever talks to a [`Transport`]. [`MulticastSocket`](crate::socket) is the
//! real thing; [`MemoryNetwork`] is a virtual LAN for simulations and tests.

use async_trait::async_trait;
use std::{fmt, io, net::SocketAddr};

mod memory;
pub use memory::{MemoryNetwork, MemoryTransport};

#[async_trait]
/// A datagram transport joined to the mDNS multicast group.
///
/// Implementations must allow `recv_from` to be pending while `send_multicast` or `send_to`
/// are called from other tasks.
pub trait Transport: Send + Sync + fmt::Debug {
	/// A short description used in logs and errors, e.g. `"IPv4 0.0.0.0:5353"`.
	fn describe(&self) -> String;

	/// Whether this transport can deliver a datagram to `addr` (matching IP family).
	fn supports(&self, addr: &SocketAddr) -> bool;

	/// Sends `packet` to the mDNS multicast group.
	async fn send_multicast(&self, packet: &[u8]) -> io::Result<()>;

	/// Sends `packet` directly to `addr`.
	async fn send_to(&self, packet: &[u8], addr: SocketAddr) -> io::Result<()>;

	/// Receives one datagram into `buf`, returning its length and source.
	async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

	/// Leaves the multicast group. Called once when the engine closes.
	async fn leave_group(&self) -> io::Result<()> {
		Ok(())
	}
}
