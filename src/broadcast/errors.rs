use crate::{
	dns::Name,
	errors::{BadDnsNameError, SendError},
};

#[derive(Debug, Error)]
/// An error occurred while building a [`Service`](super::Service)
pub enum ServiceBuilderError {
	#[error("A service requires at least one advertisement address")]
	/// A service requires at least one advertisement address
	MissingAdvertisementAddr,

	#[error("TXT record too long (max 255 bytes per entry)")]
	/// A TXT entry is longer than 255 bytes
	RecordTooLong,
}

#[derive(Debug, Error)]
/// A service could not be registered
pub enum RegisterError {
	#[error("Probing did not finish in time")]
	/// Probing (including renames) took longer than the probe timeout
	Timeout,

	#[error("{name} is taken; gave up after {attempts} renames")]
	/// Every candidate name was already in use
	Conflict { name: Name, attempts: u32 },

	#[error("The engine was closed or the registration was withdrawn")]
	/// The engine closed, or the service was unregistered while probing
	Closed,

	#[error("{0}")]
	/// A name derived from the service (e.g. a renamed instance) is not a valid DNS name
	BadName(#[from] BadDnsNameError),

	#[error("{0}")]
	/// A probe or announcement could not be sent
	Send(#[from] SendError),
}
