use super::{schedule::Backoff, ServiceInfo};
use crate::{
	dns::{Message, Name, Question, RData, RecordType},
	engine::{wait_for_shutdown, ListenerId, RecordUpdate, Zeroconf},
	errors::ResolveError,
	util::{self, IntoDnsName},
};
use std::{sync::Arc, time::Duration};
use tokio::{sync::Notify, time::Instant};

/// Removes the resolver's cache listener however the resolve ends.
struct ListenerGuard<'a> {
	zc: &'a Zeroconf,
	id: ListenerId,
}
impl Drop for ListenerGuard<'_> {
	fn drop(&mut self) {
		self.zc.remove_listener(self.id);
	}
}

enum Lookup {
	Resolved(ServiceInfo),
	NonExistent,
	Pending(Option<Name>),
}

impl Zeroconf {
	/// Resolves one service instance to its host, port, TXT properties and every known
	/// address.
	///
	/// Answers from the cache right away if it can; otherwise queries the network, retrying
	/// with backoff, until `timeout` elapses. A timeout too large to represent never elapses.
	pub async fn resolve(
		&self,
		service_type: impl IntoDnsName,
		fullname: impl IntoDnsName,
		timeout: Duration,
	) -> Result<ServiceInfo, ResolveError> {
		let service_type = service_type.into_fqdn()?;
		let fullname = fullname.into_fqdn()?;
		let deadline = Instant::now().checked_add(timeout);

		let mut shutdown = self.shutdown_signal();
		if self.is_closing() {
			return Err(ResolveError::Cancelled);
		}

		// Listen before looking at the cache so no answer can slip in between
		let wake = Arc::new(Notify::new());
		let _guard = ListenerGuard {
			zc: self,
			id: self.add_listener({
				let wake = wake.clone();
				move |_: &RecordUpdate| wake.notify_one()
			}),
		};

		let timing = self.timing();
		let mut retry = Backoff::new(Instant::now(), timing.resolve_retry_interval, u32::MAX);
		let mut next_query = Some(Instant::now());

		loop {
			let server = match self.lookup(&service_type, &fullname) {
				Lookup::Resolved(info) => return Ok(info),
				Lookup::NonExistent => return Err(ResolveError::NonExistent),
				Lookup::Pending(server) => server,
			};

			if let Some(at) = next_query.filter(|at| *at <= Instant::now()) {
				trace!(self.logger(), "Querying for {fullname}");
				if let Err(err) = self.send(&resolve_query(&fullname, server), None).await {
					debug!(self.logger(), "Resolve query for {fullname} not sent: {err}");
				}
				retry.fire(at.max(Instant::now()));
				next_query = retry.next();
			}

			let wake_at = next_query.into_iter().chain(deadline).min();
			tokio::select! {
				biased;
				_ = wait_for_shutdown(&mut shutdown) => return Err(ResolveError::Cancelled),
				_ = wake.notified() => {}
				_ = sleep_until(wake_at) => {
					if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
						// One last look: the answer may have arrived with the deadline
						return match self.lookup(&service_type, &fullname) {
							Lookup::Resolved(info) => Ok(info),
							Lookup::NonExistent => Err(ResolveError::NonExistent),
							Lookup::Pending(_) => Err(ResolveError::Timeout),
						};
					}
				}
			}
		}
	}

	fn lookup(&self, service_type: &Name, fullname: &Name) -> Lookup {
		let cache = util::read(&self.inner.cache);

		let denied = cache
			.get(fullname, RecordType::Nsec)
			.iter()
			.any(|record| matches!(record.data(), RData::Nsec(nsec) if nsec.denies(RecordType::Srv)));
		if denied && cache.get(fullname, RecordType::Srv).is_empty() {
			return Lookup::NonExistent;
		}

		match ServiceInfo::from_cache(&cache, service_type, fullname) {
			Some(info) if !info.addresses.is_empty() => Lookup::Resolved(info),
			Some(info) => Lookup::Pending(Some(info.server)),
			None => Lookup::Pending(cache.get(fullname, RecordType::Srv).iter().find_map(|record| match record.data() {
				RData::Srv(srv) => Some(srv.target.clone()),
				_ => None,
			})),
		}
	}
}

async fn sleep_until(at: Option<Instant>) {
	match at {
		Some(at) => tokio::time::sleep_until(at).await,
		None => std::future::pending().await,
	}
}

fn resolve_query(fullname: &Name, server: Option<Name>) -> Message {
	let mut query = Message::query();
	query.add_question(Question::new(fullname.clone(), RecordType::Srv));
	query.add_question(Question::new(fullname.clone(), RecordType::Txt));
	if let Some(server) = server {
		query.add_question(Question::new(server.clone(), RecordType::A));
		query.add_question(Question::new(server, RecordType::Aaaa));
	}
	query
}
