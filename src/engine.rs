//! The mDNS engine: transports, receive loops, the record cache and update dispatch
//!
//! A [`Zeroconf`] is a cheap, cloneable handle. All of its tasks run on the Tokio runtime it
//! was opened on. Call [`Zeroconf::close`] when done; the tasks keep the engine alive
//! until then.

use crate::{
	cache::DnsCache,
	dns::{DnsRecord, Message, Name, RecordType, MAX_MESSAGE_LEN},
	errors::{EngineError, SendError},
	logging::Logger,
	transport::Transport,
	util, MDNS_PORT,
};
use std::{
	collections::HashSet,
	net::SocketAddr,
	sync::{
		atomic::{AtomicBool, AtomicU64, Ordering},
		Arc, Mutex, RwLock,
	},
	time::Duration,
};
use tokio::{sync::watch, task::JoinHandle, time::Instant};

mod builder;
pub use builder::ZeroconfBuilder;

mod handle;
pub use handle::ZeroconfHandle;

mod timing;
pub use timing::Timing;

#[cfg(feature = "broadcast")]
use crate::broadcast::registry::Registry;

/// A transport is abandoned after this many consecutive receive errors.
const MAX_CONSECUTIVE_FAILURES: u32 = 16;

const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// A change to the record cache, as seen by [`RecordUpdateListener`]s.
///
/// Expiry and goodbyes both surface as `Removed`.
pub type RecordUpdate = crate::cache::CacheChange;

/// Receives every change to an engine's record cache.
///
/// Listeners are called from the receive and sweep tasks, after the cache lock has been
/// released. They must return quickly; hand work off to a channel if it might block.
pub trait RecordUpdateListener: Send + Sync {
	fn on_update(&self, update: &RecordUpdate);
}
impl<F> RecordUpdateListener for F
where
	F: Fn(&RecordUpdate) + Send + Sync,
{
	#[inline(always)]
	fn on_update(&self, update: &RecordUpdate) {
		self(update)
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Identifies a listener added with [`Zeroconf::add_listener`].
pub struct ListenerId(u64);

pub(crate) type ErrorCallback = Arc<dyn Fn(&EngineError) + Send + Sync + 'static>;

pub(crate) struct Inner {
	pub(crate) logger: Logger,
	pub(crate) timing: Timing,
	pub(crate) cache: RwLock<DnsCache>,
	transports: Vec<Arc<dyn Transport>>,
	listeners: RwLock<Vec<(ListenerId, Arc<dyn RecordUpdateListener>)>>,
	next_listener: AtomicU64,
	#[cfg(feature = "broadcast")]
	pub(crate) registry: Registry,
	on_error: Option<ErrorCallback>,
	runtime: tokio::runtime::Handle,
	shutdown_tx: watch::Sender<bool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	closing: AtomicBool,
	closed: tokio::sync::Mutex<bool>,
}

#[derive(Clone)]
/// A running mDNS engine.
///
/// Created with [`ZeroconfBuilder`]. Service registration lives in the `broadcast` feature,
/// browsing and resolving in the `discovery` feature.
pub struct Zeroconf {
	pub(crate) inner: Arc<Inner>,
}
impl std::fmt::Debug for Zeroconf {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Zeroconf")
			.field("transports", &self.inner.transports)
			.field("closing", &self.inner.closing.load(Ordering::Relaxed))
			.finish_non_exhaustive()
	}
}
impl Zeroconf {
	pub(crate) fn start(
		logger: Logger,
		timing: Timing,
		transports: Vec<Arc<dyn Transport>>,
		on_error: Option<ErrorCallback>,
		runtime: tokio::runtime::Handle,
	) -> Self {
		let (shutdown_tx, _) = watch::channel(false);

		let zc = Zeroconf {
			inner: Arc::new(Inner {
				logger,
				timing,
				cache: RwLock::new(DnsCache::new()),
				transports,
				listeners: RwLock::new(Vec::new()),
				next_listener: AtomicU64::new(0),
				#[cfg(feature = "broadcast")]
				registry: Registry::default(),
				on_error,
				runtime,
				shutdown_tx,
				tasks: Mutex::new(Vec::new()),
				closing: AtomicBool::new(false),
				closed: tokio::sync::Mutex::new(false),
			}),
		};

		for transport in zc.inner.transports.iter().cloned() {
			debug!(zc.inner.logger, "Listening on {}", transport.describe());
			zc.spawn(zc.clone().recv_loop(transport));
		}
		zc.spawn(zc.clone().sweep_loop());

		zc
	}

	#[inline(always)]
	pub fn logger(&self) -> &Logger {
		&self.inner.logger
	}

	#[inline(always)]
	pub fn timing(&self) -> &Timing {
		&self.inner.timing
	}

	#[inline]
	/// Whether [`close`](Zeroconf::close) has been called.
	pub fn is_closing(&self) -> bool {
		self.inner.closing.load(Ordering::Acquire)
	}

	/// Spawns a task on the engine's runtime. [`close`](Zeroconf::close) waits for it.
	pub(crate) fn spawn<F>(&self, future: F)
	where
		F: std::future::Future<Output = ()> + Send + 'static,
	{
		let handle = self.inner.runtime.spawn(future);
		let mut tasks = util::lock(&self.inner.tasks);
		tasks.retain(|task| !task.is_finished());
		tasks.push(handle);
	}

	/// A receiver that observes `true` once the engine starts closing.
	pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
		self.inner.shutdown_tx.subscribe()
	}

	/// Registers a listener for every cache change.
	pub fn add_listener(&self, listener: impl RecordUpdateListener + 'static) -> ListenerId {
		self.add_listener_arc(Arc::new(listener))
	}

	pub(crate) fn add_listener_arc(&self, listener: Arc<dyn RecordUpdateListener>) -> ListenerId {
		let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
		util::write(&self.inner.listeners).push((id, listener));
		id
	}

	/// Removes a listener. Returns `false` if it was not registered.
	pub fn remove_listener(&self, id: ListenerId) -> bool {
		let mut listeners = util::write(&self.inner.listeners);
		let before = listeners.len();
		listeners.retain(|(listener_id, _)| *listener_id != id);
		listeners.len() != before
	}

	/// A snapshot of the cached records for `name` and `rtype`. [`RecordType::Any`] returns
	/// every record owned by `name`.
	pub fn cache_records(&self, name: &Name, rtype: RecordType) -> Vec<DnsRecord> {
		let cache = util::read(&self.inner.cache);
		if rtype == RecordType::Any {
			cache.records_named(name).cloned().collect()
		} else {
			cache.get(name, rtype).to_vec()
		}
	}

	/// Encodes `message` and sends it to the multicast group, or to `dst` if given.
	///
	/// Transport failures are reported to the error callback rather than returned; a message
	/// is considered sent once it has been handed to every transport.
	pub async fn send(&self, message: &Message, dst: Option<SocketAddr>) -> Result<(), SendError> {
		if self.is_closing() {
			return Err(SendError::Closed);
		}
		self.send_unchecked(message, dst).await
	}

	pub(crate) async fn send_unchecked(&self, message: &Message, dst: Option<SocketAddr>) -> Result<(), SendError> {
		let packet = message.encode()?;

		for transport in self.inner.transports.iter() {
			let result = match dst {
				None => transport.send_multicast(&packet).await,
				Some(addr) if transport.supports(&addr) => transport.send_to(&packet, addr).await,
				Some(_) => continue,
			};

			if let Err(err) = result {
				self.report(EngineError::Transport {
					transport: transport.describe(),
					source: err,
				});
			}
		}

		trace!(
			self.inner.logger,
			"Sent {} byte {} to {}",
			packet.len(),
			if message.is_query() { "query" } else { "response" },
			match dst {
				Some(addr) => addr.to_string(),
				None => "multicast".to_string(),
			}
		);

		Ok(())
	}

	/// Shuts the engine down: goodbyes are sent for every registered service, all tasks are
	/// stopped and awaited, and the transports leave the multicast group.
	///
	/// Calling this more than once is harmless; later calls wait for the first to finish.
	pub async fn close(&self) {
		let mut closed = self.inner.closed.lock().await;
		if *closed {
			return;
		}

		self.inner.closing.store(true, Ordering::Release);
		debug!(self.inner.logger, "Closing");

		#[cfg(feature = "broadcast")]
		{
			for goodbye in self.inner.registry.goodbyes() {
				if let Err(err) = self.send_unchecked(&goodbye, None).await {
					warn!(self.inner.logger, "Failed to send goodbye: {err}");
				}
			}
		}

		self.inner.shutdown_tx.send_replace(true);

		let tasks = std::mem::take(&mut *util::lock(&self.inner.tasks));
		for task in tasks {
			if let Err(err) = task.await {
				if err.is_panic() {
					error!(self.inner.logger, "Engine task panicked: {err}");
				}
			}
		}

		for transport in self.inner.transports.iter() {
			if let Err(err) = transport.leave_group().await {
				warn!(self.inner.logger, "{} failed to leave the multicast group: {err}", transport.describe());
			}
		}

		util::write(&self.inner.listeners).clear();
		*closed = true;
		debug!(self.inner.logger, "Closed");
	}

	pub(crate) fn report(&self, err: EngineError) {
		warn!(self.inner.logger, "{err}");
		if let Some(on_error) = &self.inner.on_error {
			on_error(&err);
		}
	}

	fn notify(&self, updates: &[RecordUpdate]) {
		if updates.is_empty() {
			return;
		}

		let listeners = util::read(&self.inner.listeners).iter().map(|(_, listener)| listener.clone()).collect::<Vec<_>>();
		for update in updates {
			for listener in listeners.iter() {
				listener.on_update(update);
			}
		}
	}
}
impl Zeroconf {
	async fn recv_loop(self, transport: Arc<dyn Transport>) {
		let mut shutdown = self.shutdown_signal();
		let mut buf = vec![0u8; MAX_MESSAGE_LEN];
		let mut failures = 0;

		loop {
			let recv = tokio::select! {
				biased;
				_ = wait_for_shutdown(&mut shutdown) => break,
				recv = transport.recv_from(&mut buf) => recv,
			};

			match recv {
				Ok((0, _)) => continue,

				Ok((len, from)) => {
					failures = 0;
					self.handle_packet(&buf[..len], from).await;
				}

				Err(err) => {
					failures += 1;
					self.report(EngineError::Transport {
						transport: transport.describe(),
						source: err,
					});

					if failures >= MAX_CONSECUTIVE_FAILURES {
						self.report(EngineError::TransportLost(transport.describe()));
						break;
					}

					let backoff = (Duration::from_millis(10) * 2u32.pow(failures.min(10))).min(MAX_BACKOFF);
					tokio::select! {
						biased;
						_ = wait_for_shutdown(&mut shutdown) => break,
						_ = tokio::time::sleep(backoff) => {}
					}
				}
			}
		}

		trace!(self.inner.logger, "Receive loop for {} stopped", transport.describe());
	}

	async fn handle_packet(&self, packet: &[u8], from: SocketAddr) {
		let message = match Message::decode(packet) {
			Ok(message) => message,
			Err(err) => {
				debug!(self.inner.logger, "Dropping malformed packet from {from}: {err}");
				self.report(EngineError::IncomingDecode { from, source: err });
				return;
			}
		};

		if message.is_response() {
			// Responses from anything but port 5353 are not genuine mDNS (RFC 6762 §11).
			if from.port() != MDNS_PORT {
				trace!(self.inner.logger, "Ignoring response from non-mDNS port {from}");
				return;
			}
			self.handle_response(message);
		} else {
			self.handle_query(message, from).await;
		}
	}

	fn handle_response(&self, response: Message) {
		#[cfg(feature = "broadcast")]
		self.inner.registry.observe_response(&response, &self.inner.logger);

		let now = Instant::now();
		let mut updates = Vec::new();
		{
			let mut cache = util::write(&self.inner.cache);
			let mut flush = HashSet::new();

			for record in response.answers.into_iter().chain(response.additionals).chain(response.authorities) {
				if record.cache_flush() && record.ttl() > 0 {
					flush.insert((record.name().clone(), record.record_type()));
				}
				if let Some(update) = cache.add(record) {
					updates.push(update);
				}
			}

			for (name, rtype) in flush {
				cache.flush_rrset(&name, rtype, now);
			}
		}

		self.notify(&updates);
	}

	#[cfg_attr(not(feature = "broadcast"), allow(unused_variables))]
	async fn handle_query(&self, query: Message, from: SocketAddr) {
		#[cfg(feature = "broadcast")]
		{
			self.inner.registry.observe_query(&query, &self.inner.logger);

			for (response, dst) in self.inner.registry.answer(&query, from, Instant::now()) {
				if let Err(err) = self.send_unchecked(&response, dst).await {
					warn!(self.inner.logger, "Failed to answer query from {from}: {err}");
				}
			}
		}
	}

	async fn sweep_loop(self) {
		let mut shutdown = self.shutdown_signal();
		let mut interval = tokio::time::interval(self.inner.timing.sweep_interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				biased;
				_ = wait_for_shutdown(&mut shutdown) => break,
				_ = interval.tick() => {}
			}

			let expired = util::write(&self.inner.cache).expire_sweep(Instant::now());
			if !expired.is_empty() {
				trace!(self.inner.logger, "{} cached records expired", expired.len());
				self.notify(&expired.into_iter().map(RecordUpdate::Removed).collect::<Vec<_>>());
			}
		}
	}
}

/// Resolves once `shutdown` reads `true` (or its sender is gone).
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
	while !*shutdown.borrow_and_update() {
		if shutdown.changed().await.is_err() {
			return;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		dns::RData,
		transport::{MemoryNetwork, MemoryTransport},
	};
	use std::net::Ipv4Addr;

	fn engine(network: &MemoryNetwork) -> Zeroconf {
		ZeroconfBuilder::new()
			.logger(Logger::new("engine-test"))
			.open_with_transports([Arc::new(network.endpoint()) as Arc<dyn Transport>])
			.unwrap()
	}

	fn announcement(ttl: u32) -> Message {
		let mut message = Message::response();
		message.add_answer(
			DnsRecord::new(Name::parse("printer.local.").unwrap(), ttl, RData::A(Ipv4Addr::new(10, 9, 8, 7))).with_cache_flush(true),
		);
		message
	}

	async fn send_raw(endpoint: &MemoryTransport, message: &Message) {
		endpoint.send_multicast(&message.encode().unwrap()).await.unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn responses_populate_the_cache_and_expire() {
		let network = MemoryNetwork::new();
		let zc = engine(&network);
		let raw = network.endpoint();

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		zc.add_listener(move |update: &RecordUpdate| {
			tx.send(update.clone()).ok();
		});

		send_raw(&raw, &announcement(2)).await;
		assert!(matches!(rx.recv().await, Some(RecordUpdate::Added(_))));
		assert_eq!(zc.cache_records(&Name::parse("printer.local.").unwrap(), RecordType::A).len(), 1);

		let sent = Instant::now();
		assert!(matches!(rx.recv().await, Some(RecordUpdate::Removed(_))));
		let elapsed = sent.elapsed();
		assert!(elapsed >= Duration::from_secs(2) && elapsed <= Duration::from_millis(3100), "{elapsed:?}");
		assert!(zc.cache_records(&Name::parse("printer.local.").unwrap(), RecordType::Any).is_empty());

		zc.close().await;
	}

	#[tokio::test(start_paused = true)]
	async fn goodbye_removes_immediately() {
		let network = MemoryNetwork::new();
		let zc = engine(&network);
		let raw = network.endpoint();

		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let id = zc.add_listener(move |update: &RecordUpdate| {
			tx.send(update.clone()).ok();
		});

		send_raw(&raw, &announcement(120)).await;
		assert!(matches!(rx.recv().await, Some(RecordUpdate::Added(_))));
		send_raw(&raw, &announcement(0)).await;
		assert!(matches!(rx.recv().await, Some(RecordUpdate::Removed(_))));

		assert!(zc.remove_listener(id));
		assert!(!zc.remove_listener(id));
		zc.close().await;
	}

	#[tokio::test(start_paused = true)]
	async fn garbage_is_reported_and_ignored() {
		let network = MemoryNetwork::new();
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let zc = ZeroconfBuilder::new()
			.on_error(move |err: &EngineError| {
				tx.send(err.to_string()).ok();
			})
			.open_with_transports([Arc::new(network.endpoint()) as Arc<dyn Transport>])
			.unwrap();
		let raw = network.endpoint();

		raw.send_multicast(&[0xde, 0xad, 0xbe, 0xef, 0, 1, 0, 0, 0, 0, 0, 0, 0xC0, 12]).await.unwrap();
		assert!(rx.recv().await.unwrap().contains("undecodable"));

		send_raw(&raw, &announcement(120)).await;
		tokio::time::sleep(Duration::from_millis(10)).await;
		assert_eq!(zc.cache_records(&Name::parse("printer.local.").unwrap(), RecordType::A).len(), 1);

		zc.close().await;
	}

	#[derive(Debug)]
	struct UnpluggedTransport;

	#[async_trait::async_trait]
	impl Transport for UnpluggedTransport {
		fn describe(&self) -> String {
			"unplugged".to_string()
		}

		fn supports(&self, _: &SocketAddr) -> bool {
			true
		}

		async fn send_multicast(&self, _: &[u8]) -> std::io::Result<()> {
			Err(std::io::ErrorKind::NotConnected.into())
		}

		async fn send_to(&self, _: &[u8], _: SocketAddr) -> std::io::Result<()> {
			Err(std::io::ErrorKind::NotConnected.into())
		}

		async fn recv_from(&self, _: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
			Err(std::io::ErrorKind::NotConnected.into())
		}
	}

	#[tokio::test(start_paused = true)]
	async fn failing_transport_is_abandoned_alone() {
		let network = MemoryNetwork::new();
		let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
		let zc = ZeroconfBuilder::new()
			.on_error(move |err: &EngineError| {
				let lost = match err {
					EngineError::TransportLost(transport) => Some(transport.clone()),
					_ => None,
				};
				tx.send(lost).ok();
			})
			.open_with_transports([
				Arc::new(UnpluggedTransport) as Arc<dyn Transport>,
				Arc::new(network.endpoint()) as Arc<dyn Transport>,
			])
			.unwrap();
		let raw = network.endpoint();

		let mut failures = 0;
		let lost = loop {
			match rx.recv().await.unwrap() {
				Some(lost) => break lost,
				None => failures += 1,
			}
		};
		assert_eq!(lost, "unplugged");
		assert_eq!(failures, MAX_CONSECUTIVE_FAILURES);

		// The receive loop of the working transport is unaffected
		send_raw(&raw, &announcement(120)).await;
		tokio::time::sleep(Duration::from_secs(5)).await;
		assert_eq!(zc.cache_records(&Name::parse("printer.local.").unwrap(), RecordType::A).len(), 1);
		assert!(rx.try_recv().is_err());

		zc.close().await;
	}

	#[tokio::test(start_paused = true)]
	async fn close_is_idempotent_and_refuses_sends() {
		let network = MemoryNetwork::new();
		let zc = engine(&network);

		tokio::join!(zc.close(), zc.close());
		zc.close().await;

		assert!(zc.is_closing());
		assert!(matches!(zc.send(&Message::query(), None).await, Err(SendError::Closed)));
	}
}
