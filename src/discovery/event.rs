use super::ServiceInfo;
use crate::dns::Name;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A change to the set of services a [`Browser`](super::Browser) sees.
pub enum BrowseEvent {
	/// A new instance was found and its SRV and TXT records are known
	Added(ServiceInfo),

	/// An instance's SRV, TXT or address records changed
	Updated(ServiceInfo),

	/// An instance said goodbye or its PTR record expired
	Removed { service_type: Name, fullname: Name },
}
impl BrowseEvent {
	/// The full instance name the event is about.
	pub fn fullname(&self) -> &Name {
		match self {
			BrowseEvent::Added(info) | BrowseEvent::Updated(info) => &info.fullname,
			BrowseEvent::Removed { fullname, .. } => fullname,
		}
	}
}

/// Receives the events of a [`Browser`](super::Browser).
///
/// Events are delivered from the browser's task, one at a time, so listeners must not block.
/// Any `Fn(BrowseEvent)` closure is a listener.
pub trait ServiceListener: Send + Sync {
	fn add_service(&self, info: ServiceInfo);

	fn update_service(&self, info: ServiceInfo);

	fn remove_service(&self, service_type: Name, fullname: Name);

	#[doc(hidden)]
	fn dispatch(&self, event: BrowseEvent) {
		match event {
			BrowseEvent::Added(info) => self.add_service(info),
			BrowseEvent::Updated(info) => self.update_service(info),
			BrowseEvent::Removed { service_type, fullname } => self.remove_service(service_type, fullname),
		}
	}
}
impl<F> ServiceListener for F
where
	F: Fn(BrowseEvent) + Send + Sync,
{
	#[inline(always)]
	fn add_service(&self, info: ServiceInfo) {
		self(BrowseEvent::Added(info))
	}

	#[inline(always)]
	fn update_service(&self, info: ServiceInfo) {
		self(BrowseEvent::Updated(info))
	}

	#[inline(always)]
	fn remove_service(&self, service_type: Name, fullname: Name) {
		self(BrowseEvent::Removed { service_type, fullname })
	}
}
