//! Per-engine logging handle
//!
//! Every component receives a [`Logger`] when it is constructed instead of reaching for a
//! module-level logger. The handle decides the `log` target and the maximum level, so two
//! engines in the same process can be told apart (or silenced) independently.

use std::sync::Arc;

pub use log::LevelFilter;

#[derive(Clone, Debug)]
/// A cheap, cloneable logging handle that forwards to the [`log`] facade.
pub struct Logger {
	target: Arc<str>,
	max_level: LevelFilter,
}
impl Logger {
	/// Creates a logger that emits records under the given `log` target.
	pub fn new(target: impl Into<Arc<str>>) -> Self {
		Self {
			target: target.into(),
			max_level: LevelFilter::Trace,
		}
	}

	/// A logger that never emits anything.
	pub fn disabled() -> Self {
		Self::new("floodlight").max_level(LevelFilter::Off)
	}

	/// Caps the level of the records this logger emits.
	pub fn max_level(mut self, max_level: LevelFilter) -> Self {
		self.max_level = max_level;
		self
	}

	#[inline(always)]
	/// The `log` target records are emitted under.
	pub fn target(&self) -> &str {
		&self.target
	}

	#[inline]
	#[doc(hidden)]
	pub fn enabled(&self, level: log::Level) -> bool {
		level <= self.max_level
	}
}
impl Default for Logger {
	fn default() -> Self {
		Self::new("floodlight")
	}
}

macro_rules! log_with {
	($logger:expr, $level:expr, $($arg:tt)+) => {{
		let logger: &$crate::logging::Logger = &$logger;
		if logger.enabled($level) {
			::log::log!(target: logger.target(), $level, $($arg)+);
		}
	}};
}

macro_rules! trace {
	($logger:expr, $($arg:tt)+) => { log_with!($logger, ::log::Level::Trace, $($arg)+) };
}

macro_rules! debug {
	($logger:expr, $($arg:tt)+) => { log_with!($logger, ::log::Level::Debug, $($arg)+) };
}

macro_rules! info {
	($logger:expr, $($arg:tt)+) => { log_with!($logger, ::log::Level::Info, $($arg)+) };
}

macro_rules! warn {
	($logger:expr, $($arg:tt)+) => { log_with!($logger, ::log::Level::Warn, $($arg)+) };
}

macro_rules! error {
	($logger:expr, $($arg:tt)+) => { log_with!($logger, ::log::Level::Error, $($arg)+) };
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn max_level_filters_records() {
		let logger = Logger::new("test").max_level(LevelFilter::Info);
		assert!(logger.enabled(log::Level::Warn));
		assert!(logger.enabled(log::Level::Info));
		assert!(!logger.enabled(log::Level::Debug));
		assert!(!Logger::disabled().enabled(log::Level::Error));
	}
}
