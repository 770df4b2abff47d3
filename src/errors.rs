//! Error types shared across the crate

#[cfg(feature = "broadcast")]
pub use crate::broadcast::errors::*;

#[cfg(feature = "discovery")]
pub use crate::discovery::errors::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A domain name or label could not be parsed or is too long.
pub struct BadDnsNameError;
impl std::fmt::Display for BadDnsNameError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str("Bad DNS name")
	}
}
impl std::error::Error for BadDnsNameError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// An incoming packet could not be decoded.
///
/// The engine treats every variant as recoverable: the packet is logged and dropped.
pub enum DecodeError {
	#[error("Packet truncated: needed {needed} bytes at offset {offset}")]
	/// The packet ended before a field could be read
	Truncated { offset: usize, needed: usize },

	#[error("Section counts overrun the packet ({count} entries in {remaining} bytes)")]
	/// The header announces more entries than the packet can possibly hold
	CountOverrun { count: usize, remaining: usize },

	#[error("Malformed compression pointer at offset {0}")]
	/// A compression pointer points forwards, into its own name, or loops
	MalformedPointer(usize),

	#[error("Invalid label length byte 0x{byte:02x} at offset {offset}")]
	/// A label length byte uses the reserved `01`/`10` prefixes
	InvalidLabel { offset: usize, byte: u8 },

	#[error("Domain name exceeds 255 bytes")]
	/// A (possibly decompressed) name is longer than the DNS limit
	NameTooLong,

	#[error("Label is not valid UTF-8")]
	/// A label or character-string is not UTF-8
	InvalidUtf8,

	#[error("Record data of type {rtype} declares {expected} bytes but {actual} were decoded")]
	/// The RDLENGTH field does not match the decoded record data
	RDataLength { rtype: u16, expected: usize, actual: usize },

	#[error("Unsupported record type {0}")]
	/// The record type has no typed representation
	UnknownRecordType(u16),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// An outgoing message could not be encoded.
pub enum EncodeError {
	#[error("Encoded message is {0} bytes, which exceeds the mDNS maximum")]
	/// The message is larger than an mDNS packet may be
	TooLarge(usize),

	#[error("Too many entries in a message section")]
	/// A section holds more than 65535 entries
	TooManyRecords,

	#[error("Character-string is longer than 255 bytes")]
	/// A TXT or HINFO string is longer than 255 bytes
	StringTooLong,
}

#[derive(Debug, Error)]
/// I/O errors for the IPv4 socket, the IPv6 socket, or both
pub enum MultiIpIoError {
	#[error("IPv4 error: {0}")]
	/// The IPv4 socket failed
	V4(std::io::Error),

	#[error("IPv6 error: {0}")]
	/// The IPv6 socket failed
	V6(std::io::Error),

	#[error("IPv4 error: {v4}, IPv6 error: {v6}")]
	/// Both sockets failed
	Both { v4: std::io::Error, v6: std::io::Error },
}

#[derive(Debug, Error)]
/// An error occurred while opening a [`Zeroconf`](crate::Zeroconf) engine
pub enum SetupError {
	#[error("No multicast socket could be bound: {0}")]
	/// Not a single multicast socket could be bound
	SetupIncomplete(MultiIpIoError),

	#[error("The engine must be opened from within a Tokio runtime")]
	/// `open` was called outside of a Tokio runtime
	NoRuntime,

	#[error("No transports were supplied")]
	/// `open_with_transports` was given an empty list
	NoTransports,

	#[error("I/O error: {0}")]
	/// An I/O error occurred
	IoError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
/// A message could not be handed to the engine for sending
pub enum SendError {
	#[error("{0}")]
	/// The message could not be encoded
	Encode(#[from] EncodeError),

	#[error("The engine has been closed")]
	/// The engine is closing or closed
	Closed,
}

#[derive(Debug, Error)]
/// Errors reported to the engine's error callback.
///
/// None of these stop the engine.
pub enum EngineError {
	#[error("Dropped undecodable packet from {from}: {source}")]
	/// An incoming packet could not be decoded and was dropped
	IncomingDecode {
		from: std::net::SocketAddr,
		#[source]
		source: DecodeError,
	},

	#[error("Transport {transport} failed: {source}")]
	/// A transport failed to send or receive
	Transport {
		transport: String,
		#[source]
		source: std::io::Error,
	},

	#[error("Transport {0} failed repeatedly and has been abandoned")]
	/// A transport failed too many times in a row and its receive loop stopped
	TransportLost(String),
}

#[derive(Debug, Error)]
/// An error occurred while shutting down a background engine
pub enum ShutdownError {
	#[error("Failed to join the engine thread")]
	/// The background thread panicked
	ThreadJoinError(Box<dyn std::any::Any + Send + 'static>),
}
