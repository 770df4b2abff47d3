use crate::errors::BadDnsNameError;

#[derive(Debug, Error)]
/// A browser could not be started
pub enum BrowseError {
	#[error("{0}")]
	/// The service type is not a valid DNS name
	BadName(#[from] BadDnsNameError),

	#[error("The engine has been closed")]
	/// The engine is closing or closed
	Closed,
}

#[derive(Debug, Error)]
/// A service instance could not be resolved
pub enum ResolveError {
	#[error("No answer before the deadline")]
	/// Nobody answered in time. This is not a negative answer; the service may still exist
	Timeout,

	#[error("The service does not exist")]
	/// A responder asserted (with an NSEC record) that the instance has no SRV record
	NonExistent,

	#[error("The engine was closed while resolving")]
	/// The engine closed before the service was resolved
	Cancelled,

	#[error("{0}")]
	/// The service type or instance name is not a valid DNS name
	BadName(#[from] BadDnsNameError),
}
