//! DNS data model and wire format
//!
//! Names, typed records and messages, plus an encoder and decoder for the DNS wire format
//! with the two mDNS extensions: the unicast-response bit on questions and the cache-flush
//! bit on records.

mod name;
pub use name::{Name, MAX_LABEL_LEN, MAX_NAME_LEN};

mod record;
pub use record::{DnsClass, DnsRecord, Hinfo, Nsec, RData, RecordType, Srv, Txt};

mod message;
pub use message::{Flags, Message, Question, HEADER_LEN, MAX_MESSAGE_LEN};

pub(crate) mod decode;
pub(crate) mod encode;

pub(crate) use encode::canonical_rdata;
