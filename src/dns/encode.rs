use super::{DnsRecord, Name, Question, RData};
use crate::errors::EncodeError;
use std::collections::HashMap;

/// Pointers can only address the first 16 KiB of a message.
const MAX_POINTER_OFFSET: usize = 0x3FFF;

const POINTER_MASK: u16 = 0xC000;

/// Top bit of the class field: cache-flush on records, unicast-response on questions.
pub(crate) const CLASS_TOP_BIT: u16 = 0x8000;

/// Writes DNS wire format, remembering where each name suffix was written so later
/// occurrences can be replaced by a compression pointer (RFC 1035 §4.1.4).
pub(crate) struct Encoder {
	buf: Vec<u8>,
	names: HashMap<String, u16>,
	compress: bool,
}
impl Encoder {
	pub(crate) fn new() -> Self {
		Self {
			buf: Vec::with_capacity(512),
			names: HashMap::new(),
			compress: true,
		}
	}

	/// An encoder that writes every name in full; used for canonical rdata comparisons.
	pub(crate) fn uncompressed() -> Self {
		Self {
			buf: Vec::new(),
			names: HashMap::new(),
			compress: false,
		}
	}

	pub(crate) fn finish(self) -> Vec<u8> {
		self.buf
	}

	pub(crate) fn write_u8(&mut self, value: u8) {
		self.buf.push(value);
	}

	pub(crate) fn write_u16(&mut self, value: u16) {
		self.buf.extend_from_slice(&value.to_be_bytes());
	}

	pub(crate) fn write_u32(&mut self, value: u32) {
		self.buf.extend_from_slice(&value.to_be_bytes());
	}

	pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
		self.buf.extend_from_slice(bytes);
	}

	fn write_character_string(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
		let len = u8::try_from(bytes.len()).map_err(|_| EncodeError::StringTooLong)?;
		self.write_u8(len);
		self.write_bytes(bytes);
		Ok(())
	}

	pub(crate) fn write_name(&mut self, name: &Name) {
		for (i, label) in name.labels().enumerate() {
			if self.compress {
				let key = name.suffix_key(i);
				if let Some(offset) = self.names.get(&key).copied() {
					self.write_u16(POINTER_MASK | offset);
					return;
				}
				if self.buf.len() <= MAX_POINTER_OFFSET {
					self.names.insert(key, self.buf.len() as u16);
				}
			}

			// Labels are validated to at most 63 bytes when the name is built.
			self.write_u8(label.len() as u8);
			self.write_bytes(label.as_bytes());
		}
		self.write_u8(0);
	}

	pub(crate) fn write_question(&mut self, question: &Question) {
		self.write_name(&question.name);
		self.write_u16(question.qtype.code());
		let mut class = question.qclass.code();
		if question.unicast_response {
			class |= CLASS_TOP_BIT;
		}
		self.write_u16(class);
	}

	pub(crate) fn write_record(&mut self, record: &DnsRecord) -> Result<(), EncodeError> {
		self.write_name(record.name());
		self.write_u16(record.record_type().code());
		let mut class = record.class().code();
		if record.cache_flush() {
			class |= CLASS_TOP_BIT;
		}
		self.write_u16(class);
		self.write_u32(record.ttl());

		let length_at = self.buf.len();
		self.write_u16(0);
		self.write_rdata(record.data())?;

		let length = self.buf.len() - length_at - 2;
		let length = u16::try_from(length).map_err(|_| EncodeError::TooLarge(length))?;
		self.buf[length_at..length_at + 2].copy_from_slice(&length.to_be_bytes());
		Ok(())
	}

	pub(crate) fn write_rdata(&mut self, data: &RData) -> Result<(), EncodeError> {
		match data {
			RData::A(addr) => self.write_bytes(&addr.octets()),
			RData::Aaaa(addr) => self.write_bytes(&addr.octets()),
			RData::Ptr(name) => self.write_name(name),
			RData::Srv(srv) => {
				self.write_u16(srv.priority);
				self.write_u16(srv.weight);
				self.write_u16(srv.port);
				self.write_name(&srv.target);
			}
			RData::Txt(txt) => {
				if txt.strings().is_empty() {
					// A TXT record must hold at least one (possibly empty) string.
					self.write_u8(0);
				}
				for string in txt.strings() {
					self.write_character_string(string)?;
				}
			}
			RData::Hinfo(hinfo) => {
				self.write_character_string(hinfo.cpu.as_bytes())?;
				self.write_character_string(hinfo.os.as_bytes())?;
			}
			RData::Nsec(nsec) => {
				self.write_name(&nsec.next_domain);

				// Type bitmap: one block per 256-type window that has any bit set (RFC 4034 §4.1.2).
				let mut window: Option<(u8, [u8; 32], usize)> = None;
				for code in nsec.types.iter().map(|rtype| rtype.code()) {
					let (block, bit) = ((code >> 8) as u8, (code & 0xFF) as usize);
					if let Some((current, bitmap, len)) = window {
						if current != block {
							self.write_bitmap_window(current, &bitmap[..len]);
							window = None;
						}
					}
					let (_, bitmap, len) = window.get_or_insert((block, [0u8; 32], 0));
					bitmap[bit / 8] |= 0x80 >> (bit % 8);
					*len = (*len).max(bit / 8 + 1);
				}
				if let Some((block, bitmap, len)) = window {
					self.write_bitmap_window(block, &bitmap[..len]);
				}
			}
		}
		Ok(())
	}

	fn write_bitmap_window(&mut self, block: u8, bitmap: &[u8]) {
		self.write_u8(block);
		self.write_u8(bitmap.len() as u8);
		self.write_bytes(bitmap);
	}
}

/// Uncompressed rdata bytes, as compared by the probe tie-break (RFC 6762 §8.2).
pub(crate) fn canonical_rdata(data: &RData) -> Vec<u8> {
	let mut encoder = Encoder::uncompressed();
	// Only character-strings can fail, and records we compare were encoded before.
	if encoder.write_rdata(data).is_err() {
		return Vec::new();
	}
	encoder.finish()
}
