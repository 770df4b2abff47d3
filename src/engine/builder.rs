use super::{ErrorCallback, Timing, Zeroconf, ZeroconfHandle};
use crate::{
	errors::{EngineError, MultiIpIoError, SetupError},
	logging::Logger,
	net::{IpVersion, TargetInterfaceV4, TargetInterfaceV6},
	socket::MulticastSocket,
	transport::Transport,
};
use std::sync::Arc;

/// Configures and opens a [`Zeroconf`] engine.
pub struct ZeroconfBuilder {
	loopback: bool,
	interface_v4: TargetInterfaceV4,
	interface_v6: TargetInterfaceV6,
	logger: Logger,
	timing: Timing,
	on_error: Option<ErrorCallback>,
}
impl ZeroconfBuilder {
	pub fn new() -> Self {
		Self {
			loopback: false,
			interface_v4: TargetInterfaceV4::All,
			interface_v6: TargetInterfaceV6::All,
			logger: Logger::default(),
			timing: Timing::default(),
			on_error: None,
		}
	}

	/// Receive our own multicast packets. Needed to browse services registered by the same
	/// host through a different engine.
	pub fn loopback(mut self) -> Self {
		self.loopback = true;
		self
	}

	pub fn interface_v4(mut self, interface: TargetInterfaceV4) -> Self {
		self.interface_v4 = interface;
		self
	}

	pub fn interface_v6(mut self, interface: TargetInterfaceV6) -> Self {
		self.interface_v6 = interface;
		self
	}

	/// The logger handed to every component of the engine.
	pub fn logger(mut self, logger: Logger) -> Self {
		self.logger = logger;
		self
	}

	pub fn timing(mut self, timing: Timing) -> Self {
		self.timing = timing;
		self
	}

	/// Called for every non-fatal engine error: undecodable packets and transport failures.
	pub fn on_error<F>(mut self, on_error: F) -> Self
	where
		F: Fn(&EngineError) + Send + Sync + 'static,
	{
		self.on_error = Some(Arc::new(on_error));
		self
	}

	/// Binds multicast sockets for `ip_version` and starts the engine on the current Tokio
	/// runtime.
	///
	/// With [`IpVersion::Both`], failing to bind one family is logged and tolerated.
	pub fn open(self, ip_version: IpVersion) -> Result<Zeroconf, SetupError> {
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| SetupError::NoRuntime)?;

		let v4 = match ip_version {
			IpVersion::V4 | IpVersion::Both => Some(MulticastSocket::new_v4(self.loopback, &self.interface_v4)),
			IpVersion::V6 => None,
		};
		let v6 = match ip_version {
			IpVersion::V6 | IpVersion::Both => Some(MulticastSocket::new_v6(self.loopback, &self.interface_v6)),
			IpVersion::V4 => None,
		};

		let transports: Vec<Arc<dyn Transport>> = match (v4, v6) {
			(Some(Ok(v4)), Some(Ok(v6))) => vec![Arc::new(v4), Arc::new(v6)],
			(Some(Ok(v4)), None) => vec![Arc::new(v4)],
			(None, Some(Ok(v6))) => vec![Arc::new(v6)],

			(Some(Ok(v4)), Some(Err(err))) => {
				warn!(self.logger, "IPv6 multicast unavailable, continuing with IPv4 only: {err}");
				vec![Arc::new(v4)]
			}
			(Some(Err(err)), Some(Ok(v6))) => {
				warn!(self.logger, "IPv4 multicast unavailable, continuing with IPv6 only: {err}");
				vec![Arc::new(v6)]
			}

			(Some(Err(v4)), Some(Err(v6))) => return Err(SetupError::SetupIncomplete(MultiIpIoError::Both { v4, v6 })),
			(Some(Err(v4)), None) => return Err(SetupError::SetupIncomplete(MultiIpIoError::V4(v4))),
			(None, Some(Err(v6))) => return Err(SetupError::SetupIncomplete(MultiIpIoError::V6(v6))),
			(None, None) => return Err(SetupError::NoTransports),
		};

		Ok(Zeroconf::start(self.logger, self.timing, transports, self.on_error, runtime))
	}

	/// Starts the engine over caller-supplied transports, such as
	/// [`MemoryTransport`](crate::transport::MemoryTransport)s, on the current Tokio runtime.
	pub fn open_with_transports<I>(self, transports: I) -> Result<Zeroconf, SetupError>
	where
		I: IntoIterator<Item = Arc<dyn Transport>>,
	{
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| SetupError::NoRuntime)?;

		let transports = transports.into_iter().collect::<Vec<_>>();
		if transports.is_empty() {
			return Err(SetupError::NoTransports);
		}

		Ok(Zeroconf::start(self.logger, self.timing, transports, self.on_error, runtime))
	}

	/// Like [`open`](ZeroconfBuilder::open), but runs the engine on a dedicated background
	/// thread and returns a blocking handle to it.
	pub fn spawn(self, ip_version: IpVersion) -> Result<ZeroconfHandle, SetupError> {
		ZeroconfHandle::spawn(move || self.open(ip_version))
	}

	/// Like [`open_with_transports`](ZeroconfBuilder::open_with_transports), on a dedicated
	/// background thread.
	pub fn spawn_with_transports<I>(self, transports: I) -> Result<ZeroconfHandle, SetupError>
	where
		I: IntoIterator<Item = Arc<dyn Transport>> + Send + 'static,
	{
		ZeroconfHandle::spawn(move || self.open_with_transports(transports))
	}
}
impl Default for ZeroconfBuilder {
	fn default() -> Self {
		Self::new()
	}
}
