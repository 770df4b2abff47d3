//! Service registration: probing, announcing and answering queries for local services

use crate::{dns::Name, engine::Zeroconf, errors::RegisterError, util::IntoDnsName};
use tokio::time::timeout;

mod announcer;
pub mod errors;
pub(crate) mod registry;

mod service;
pub use service::{IntoServiceTxt, Service, ServiceBuilder, DEFAULT_HOST_TTL, DEFAULT_OTHER_TTL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Where a registered service is in its lifecycle.
pub enum AnnouncerState {
	Init,
	/// Checking that the instance name is unique
	Probing,
	/// Sending the initial unsolicited announcements
	Announcing,
	/// Announced; answering queries and re-announcing periodically
	Registered,
	/// Sending TTL 0 records
	Goodbye,
	Closed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The outcome of a successful [`Zeroconf::register`].
pub struct Registration {
	requested: Name,
	registered: Name,
}
impl Registration {
	#[inline(always)]
	/// The instance name the service asked for
	pub fn requested(&self) -> &Name {
		&self.requested
	}

	#[inline(always)]
	/// The instance name the service was registered under, possibly renamed after conflicts
	pub fn registered(&self) -> &Name {
		&self.registered
	}

	#[inline]
	pub fn renamed(&self) -> bool {
		self.requested != self.registered
	}
}

impl Zeroconf {
	/// Registers `service` on the network.
	///
	/// Resolves once probing has claimed an instance name; the remaining announcements and
	/// periodic refreshes continue in the background until [`unregister`](Zeroconf::unregister)
	/// or [`close`](Zeroconf::close).
	pub async fn register(&self, service: Service) -> Result<Registration, RegisterError> {
		if self.is_closing() {
			return Err(RegisterError::Closed);
		}

		let requested = service.fullname();
		let registry = &self.inner.registry;
		let (id, wake) = registry.insert(service);

		debug!(self.logger(), "Registering {requested}");

		let probed = match timeout(self.timing().probe_timeout, announcer::probe(self, id, &wake)).await {
			Ok(probed) => probed,
			Err(_) => Err(RegisterError::Timeout),
		};

		let registered = match probed {
			Ok(registered) => announcer::announce_first(self, id).await.map(|_| registered),
			Err(err) => Err(err),
		};

		let registered = match registered {
			Ok(registered) => registered,
			Err(err) => {
				registry.discard(id);
				warn!(self.logger(), "Failed to register {requested}: {err}");
				return Err(err);
			}
		};

		self.spawn(announcer::announce_loop(self.clone(), id, wake));

		info!(self.logger(), "Registered {registered}");

		Ok(Registration { requested, registered })
	}

	/// Withdraws a registered service, sending goodbyes if it was already announced.
	///
	/// Returns `false` if no service is registered under `fullname`. Unregistering a service
	/// that is still probing makes its pending [`register`](Zeroconf::register) fail with
	/// [`RegisterError::Closed`].
	pub async fn unregister(&self, fullname: impl IntoDnsName) -> Result<bool, RegisterError> {
		let fullname = fullname.into_fqdn()?;

		match self.inner.registry.withdraw(&fullname) {
			None => Ok(false),
			Some(goodbye) => {
				if let Some(goodbye) = goodbye {
					self.send(&goodbye, None).await?;
				}
				debug!(self.logger(), "Unregistered {fullname}");
				Ok(true)
			}
		}
	}

	/// The state of the service most recently registered as `fullname`.
	pub fn service_state(&self, fullname: &Name) -> Option<AnnouncerState> {
		self.inner.registry.state_of(fullname)
	}
}
