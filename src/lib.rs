//! Multicast DNS (RFC 6762) and DNS-SD (RFC 6763) for Tokio.
//!
//! A [`Zeroconf`] engine owns the multicast sockets and a TTL-driven record cache. On top of
//! it, the `broadcast` feature registers services (probing, announcing, answering queries,
//! goodbyes) and the `discovery` feature browses and resolves them.
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use floodlight::{broadcast::ServiceBuilder, discovery::BrowseEvent, net::IpVersion, ZeroconfBuilder};
//! use std::net::{IpAddr, Ipv4Addr};
//!
//! let zeroconf = ZeroconfBuilder::new().open(IpVersion::Both)?;
//!
//! let service = ServiceBuilder::new("_ipp._tcp.local.", "printer", 631)?
//! 	.add_ip_address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
//! 	.add_txt("path=/")
//! 	.build()?;
//! zeroconf.register(service).await?;
//!
//! let browser = zeroconf.browse("_ipp._tcp.local.", |event: BrowseEvent| println!("{event:?}"))?;
//! # drop(browser);
//! zeroconf.close().await;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

use std::net::{Ipv4Addr, Ipv6Addr};

#[macro_use]
extern crate thiserror;

#[macro_use]
mod logging;
pub use logging::{LevelFilter, Logger};

mod cache;
pub use cache::{CacheChange, DnsCache};

pub mod dns;

mod engine;
pub use engine::{ListenerId, RecordUpdate, RecordUpdateListener, Timing, Zeroconf, ZeroconfBuilder, ZeroconfHandle};

mod socket;
pub mod transport;

mod util;
pub use util::IntoDnsName;

pub mod errors;
pub mod net;

#[cfg(feature = "broadcast")]
#[cfg_attr(docsrs, doc(cfg(feature = "broadcast")))]
pub mod broadcast;

#[cfg(feature = "discovery")]
#[cfg_attr(docsrs, doc(cfg(feature = "discovery")))]
pub mod discovery;

pub const MDNS_PORT: u16 = 5353;
pub const MDNS_V4_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_V6_IP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);
