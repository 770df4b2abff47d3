use super::{
	schedule::{Backoff, QuerySchedule, RefreshSchedule},
	BrowseEvent, ServiceInfo, ServiceListener,
};
use crate::{
	dns::{DnsRecord, Message, Name, Question, RData, RecordType},
	engine::{wait_for_shutdown, RecordUpdate, Zeroconf},
	errors::BrowseError,
	util::{self, IntoDnsName},
};
use std::{collections::HashMap, sync::Arc};
use tokio::{
	sync::{mpsc, watch},
	time::Instant,
};

/// A running browse for one service type.
///
/// Browsing stops when [`cancel`](Browser::cancel) is called, when the browser is dropped, or
/// when the engine closes.
#[derive(Debug)]
pub struct Browser {
	service_type: Name,
	cancel_tx: watch::Sender<bool>,
}
impl Browser {
	#[inline(always)]
	pub fn service_type(&self) -> &Name {
		&self.service_type
	}

	/// Stops browsing. Calling this more than once is harmless.
	pub fn cancel(&self) {
		self.cancel_tx.send_replace(true);
	}

	#[inline]
	pub fn is_cancelled(&self) -> bool {
		*self.cancel_tx.borrow()
	}
}
impl Drop for Browser {
	fn drop(&mut self) {
		self.cancel();
	}
}

impl Zeroconf {
	/// Starts browsing for instances of `service_type`, e.g. `_ipp._tcp.local.`
	///
	/// Instances already in the cache are reported right away.
	pub fn browse<L>(&self, service_type: impl IntoDnsName, listener: L) -> Result<Browser, BrowseError>
	where
		L: ServiceListener + 'static,
	{
		let service_type = service_type.into_fqdn()?;
		if self.is_closing() {
			return Err(BrowseError::Closed);
		}

		let (cancel_tx, cancel_rx) = watch::channel(false);
		let (update_tx, update_rx) = mpsc::unbounded_channel();
		let listener_id = self.add_listener(move |update: &RecordUpdate| {
			update_tx.send(update.clone()).ok();
		});

		debug!(self.logger(), "Browsing for {service_type}");

		let task = BrowserTask {
			zc: self.clone(),
			service_type: service_type.clone(),
			listener: Arc::new(listener),
			instances: HashMap::new(),
			queries: QuerySchedule::new(Instant::now(), self.timing().initial_query_interval, self.timing().max_query_interval),
		};

		let zc = self.clone();
		self.spawn(async move {
			task.run(update_rx, cancel_rx).await;
			zc.remove_listener(listener_id);
		});

		Ok(Browser { service_type, cancel_tx })
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InstanceState {
	/// SRV or TXT not yet known
	Discovered,
	Stable,
	/// A refresh query went out for the PTR record and no answer has arrived yet
	PendingRefresh,
}

struct Instance {
	state: InstanceState,
	refresh: RefreshSchedule,
	resolve: Backoff,
	/// What the listener was last told about this instance
	reported: Option<ServiceInfo>,
}

struct BrowserTask {
	zc: Zeroconf,
	service_type: Name,
	listener: Arc<dyn ServiceListener>,
	instances: HashMap<Name, Instance>,
	queries: QuerySchedule,
}
impl BrowserTask {
	async fn run(mut self, mut updates: mpsc::UnboundedReceiver<RecordUpdate>, mut cancel: watch::Receiver<bool>) {
		let mut shutdown = self.zc.shutdown_signal();

		let cached = self.zc.cache_records(&self.service_type, RecordType::Ptr);
		for ptr in cached {
			self.on_update(&RecordUpdate::Added(ptr));
		}

		loop {
			let deadline = self.next_deadline();

			tokio::select! {
				biased;
				_ = wait_for_shutdown(&mut shutdown) => break,
				_ = wait_for_shutdown(&mut cancel) => break,
				update = updates.recv() => match update {
					Some(update) => self.on_update(&update),
					None => break,
				},
				_ = tokio::time::sleep_until(deadline) => self.on_timer(Instant::now()).await,
			}
		}

		trace!(self.zc.logger(), "Stopped browsing for {}", self.service_type);
	}

	fn next_deadline(&self) -> Instant {
		self.instances
			.values()
			.flat_map(|instance| [instance.refresh.next(), instance.resolve.next()])
			.flatten()
			.fold(self.queries.next(), Instant::min)
	}

	fn on_update(&mut self, update: &RecordUpdate) {
		let record = update.record();

		if *record.name() == self.service_type {
			if let RData::Ptr(fullname) = record.data() {
				match update {
					RecordUpdate::Removed(_) => self.remove_instance(fullname),
					RecordUpdate::Added(_) | RecordUpdate::Refreshed { .. } => self.track_instance(fullname, record),
				}
			}
			return;
		}

		let affected = match record.record_type() {
			RecordType::Srv | RecordType::Txt => vec![record.name().clone()],
			RecordType::A | RecordType::Aaaa => {
				let mut affected = util::read(&self.zc.inner.cache).instances_on_host(record.name());
				// The SRV may already be gone while the listener still knows the old host
				affected.extend(
					self.instances
						.iter()
						.filter(|(_, instance)| instance.reported.as_ref().map_or(false, |info| info.server == *record.name()))
						.map(|(fullname, _)| fullname.clone()),
				);
				affected
			}
			_ => return,
		};

		for fullname in affected {
			self.evaluate(&fullname);
		}
	}

	fn track_instance(&mut self, fullname: &Name, ptr: &DnsRecord) {
		let timing = self.zc.timing();
		let refresh = RefreshSchedule::new(ptr, &timing.refresh_percentages);

		match self.instances.get_mut(fullname) {
			Some(instance) => {
				instance.refresh = refresh;
				if instance.state == InstanceState::PendingRefresh {
					instance.state = InstanceState::Stable;
				}
			}
			None => {
				trace!(self.zc.logger(), "Found instance {fullname}");
				self.instances.insert(
					fullname.clone(),
					Instance {
						state: InstanceState::Discovered,
						refresh,
						resolve: Backoff::new(Instant::now(), timing.resolve_retry_interval, timing.resolve_attempts),
						reported: None,
					},
				);
			}
		}

		self.evaluate(fullname);
	}

	fn remove_instance(&mut self, fullname: &Name) {
		if self.instances.remove(fullname).is_some() {
			debug!(self.zc.logger(), "{fullname} is gone");
			self.listener.dispatch(BrowseEvent::Removed {
				service_type: self.service_type.clone(),
				fullname: fullname.clone(),
			});
		}
	}

	/// Compares the cached view of `fullname` with what was last reported, and reports the
	/// difference.
	fn evaluate(&mut self, fullname: &Name) {
		let instance = match self.instances.get_mut(fullname) {
			Some(instance) => instance,
			None => return,
		};

		let info = match ServiceInfo::from_cache(&util::read(&self.zc.inner.cache), &self.service_type, fullname) {
			Some(info) => info,
			None => return,
		};

		if instance.state == InstanceState::Discovered {
			instance.state = InstanceState::Stable;
		}
		if !info.addresses.is_empty() {
			instance.resolve.stop();
		}

		let event = match &instance.reported {
			None => BrowseEvent::Added(info.clone()),
			Some(reported) if *reported != info => BrowseEvent::Updated(info.clone()),
			Some(_) => return,
		};
		instance.reported = Some(info);

		self.listener.dispatch(event);
	}

	async fn on_timer(&mut self, now: Instant) {
		let mut query = Message::query();

		let mut refresh = self.queries.is_due(now);
		if refresh {
			self.queries.advance(now);
		}

		let mut targeted = Vec::new();
		for (fullname, instance) in self.instances.iter_mut() {
			if instance.refresh.fire(now) {
				instance.state = InstanceState::PendingRefresh;
				refresh = true;
			}
			if instance.resolve.fire(now) {
				targeted.push((fullname.clone(), instance.reported.as_ref().map(|info| info.server.clone())));
			}
		}

		if refresh {
			query.add_question(Question::new(self.service_type.clone(), RecordType::Ptr));
			let known = util::read(&self.zc.inner.cache).known_answers(&self.service_type, RecordType::Ptr, now);
			for record in known {
				query.add_answer(record);
			}
		}

		for (fullname, server) in targeted {
			trace!(self.zc.logger(), "Resolving {fullname}");
			query.add_question(Question::new(fullname.clone(), RecordType::Srv));
			query.add_question(Question::new(fullname, RecordType::Txt));
			if let Some(server) = server {
				query.add_question(Question::new(server.clone(), RecordType::A));
				query.add_question(Question::new(server, RecordType::Aaaa));
			}
		}

		if query.questions.is_empty() {
			return;
		}

		if let Err(err) = self.zc.send(&query, None).await {
			debug!(self.zc.logger(), "Browse query for {} not sent: {err}", self.service_type);
		}
	}
}
