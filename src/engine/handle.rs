use super::Zeroconf;
use crate::errors::{SetupError, ShutdownError};
use std::future::Future;

#[cfg(feature = "broadcast")]
use crate::{
	broadcast::{Registration, Service},
	errors::RegisterError,
};

#[cfg(feature = "discovery")]
use crate::{
	discovery::{Browser, ServiceInfo, ServiceListener},
	errors::{BrowseError, ResolveError},
};

#[cfg(any(feature = "broadcast", feature = "discovery"))]
use crate::util::IntoDnsName;

pub(super) struct HandleInner {
	zeroconf: Zeroconf,
	runtime: tokio::runtime::Handle,
	thread: std::thread::JoinHandle<()>,
	shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

pub(super) struct HandleDrop(Option<HandleInner>);
impl HandleDrop {
	fn shutdown(&mut self) -> Result<(), ShutdownError> {
		let HandleInner { thread, shutdown_tx, .. } = match self.0.take() {
			Some(inner) => inner,
			None => return Ok(()),
		};

		if !thread.is_finished() {
			shutdown_tx.send(()).ok();
		}

		thread.join().map_err(ShutdownError::ThreadJoinError)
	}
}
impl Drop for HandleDrop {
	fn drop(&mut self) {
		if let Err(ShutdownError::ThreadJoinError(panic)) = self.shutdown() {
			if !std::thread::panicking() {
				std::panic::resume_unwind(panic);
			}
		}
	}
}

/// An engine running on its own thread, with a blocking API.
///
/// Dropping the handle closes the engine (sending goodbyes for registered services) and
/// joins the thread. The blocking methods must not be called from within an async context.
pub struct ZeroconfHandle(HandleDrop);
impl ZeroconfHandle {
	pub(super) fn spawn<F>(open: F) -> Result<Self, SetupError>
	where
		F: FnOnce() -> Result<Zeroconf, SetupError> + Send + 'static,
	{
		let (ready_tx, ready_rx) = std::sync::mpsc::channel();
		let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

		let thread = std::thread::Builder::new().name("floodlight mDNS engine".to_string()).spawn(move || {
			let runtime = match tokio::runtime::Builder::new_current_thread()
				.thread_name("floodlight mDNS engine (Tokio)")
				.enable_all()
				.build()
			{
				Ok(runtime) => runtime,
				Err(err) => {
					ready_tx.send(Err(SetupError::IoError(err))).ok();
					return;
				}
			};

			runtime.block_on(async move {
				let zeroconf = match open() {
					Ok(zeroconf) => zeroconf,
					Err(err) => {
						ready_tx.send(Err(err)).ok();
						return;
					}
				};

				ready_tx.send(Ok((zeroconf.clone(), tokio::runtime::Handle::current()))).ok();

				// A dropped sender also means shut down
				shutdown_rx.await.ok();
				zeroconf.close().await;
			})
		})?;

		let (zeroconf, runtime) = match ready_rx.recv() {
			Ok(ready) => ready?,
			Err(_) => {
				return Err(SetupError::IoError(std::io::Error::new(
					std::io::ErrorKind::Other,
					"The engine thread exited during setup",
				)))
			}
		};

		Ok(Self(HandleDrop(Some(HandleInner {
			zeroconf,
			runtime,
			thread,
			shutdown_tx,
		}))))
	}

	#[inline(always)]
	fn inner(&self) -> &HandleInner {
		match &self.0 .0 {
			Some(inner) => inner,
			None => unreachable!(),
		}
	}

	/// Runs `future` on the engine thread and blocks until it completes.
	///
	/// Returns `None` if the engine's runtime went away before the future finished.
	fn block_on<F>(&self, future: F) -> Option<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let inner = self.inner();
		match inner.runtime.block_on(inner.runtime.spawn(future)) {
			Ok(output) => Some(output),
			Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
			Err(_) => None,
		}
	}

	#[inline(always)]
	/// The engine itself, for use from async code.
	pub fn zeroconf(&self) -> &Zeroconf {
		&self.inner().zeroconf
	}

	/// Closes the engine and joins its thread.
	pub fn shutdown(mut self) -> Result<(), ShutdownError> {
		self.0.shutdown()
	}

	#[cfg(feature = "broadcast")]
	#[cfg_attr(docsrs, doc(cfg(feature = "broadcast")))]
	/// Blocking [`Zeroconf::register`].
	pub fn register(&self, service: Service) -> Result<Registration, RegisterError> {
		let zeroconf = self.zeroconf().clone();
		self.block_on(async move { zeroconf.register(service).await }).unwrap_or(Err(RegisterError::Closed))
	}

	#[cfg(feature = "broadcast")]
	#[cfg_attr(docsrs, doc(cfg(feature = "broadcast")))]
	/// Blocking [`Zeroconf::unregister`].
	pub fn unregister(&self, fullname: impl IntoDnsName) -> Result<bool, RegisterError> {
		let fullname = fullname.into_fqdn()?;
		let zeroconf = self.zeroconf().clone();
		self.block_on(async move { zeroconf.unregister(fullname).await }).unwrap_or(Err(RegisterError::Closed))
	}

	#[cfg(feature = "discovery")]
	#[cfg_attr(docsrs, doc(cfg(feature = "discovery")))]
	/// Starts browsing; see [`Zeroconf::browse`].
	pub fn browse<L>(&self, service_type: impl IntoDnsName, listener: L) -> Result<Browser, BrowseError>
	where
		L: ServiceListener + 'static,
	{
		self.zeroconf().browse(service_type, listener)
	}

	#[cfg(feature = "discovery")]
	#[cfg_attr(docsrs, doc(cfg(feature = "discovery")))]
	/// Blocking [`Zeroconf::resolve`].
	pub fn request(
		&self,
		service_type: impl IntoDnsName,
		fullname: impl IntoDnsName,
		timeout: std::time::Duration,
	) -> Result<ServiceInfo, ResolveError> {
		let service_type = service_type.into_fqdn()?;
		let fullname = fullname.into_fqdn()?;
		let zeroconf = self.zeroconf().clone();
		self.block_on(async move { zeroconf.resolve(service_type, fullname, timeout).await })
			.unwrap_or(Err(ResolveError::Cancelled))
	}
}
