use super::{
	encode::CLASS_TOP_BIT,
	name::{MAX_LABEL_LEN, MAX_NAME_LEN},
	DnsClass, DnsRecord, Hinfo, Name, Nsec, Question, RData, RecordType, Srv, Txt,
};
use crate::errors::DecodeError;
use std::{
	collections::BTreeSet,
	net::{Ipv4Addr, Ipv6Addr},
};
use tokio::time::Instant;

/// A bounds-checked reader over a received packet.
///
/// Every read returns [`DecodeError::Truncated`] instead of panicking when the packet is
/// shorter than its contents claim.
pub(crate) struct Decoder<'a> {
	data: &'a [u8],
	offset: usize,
	received: Instant,
}
impl<'a> Decoder<'a> {
	pub(crate) fn new(data: &'a [u8]) -> Self {
		Self {
			data,
			offset: 0,
			received: Instant::now(),
		}
	}

	#[inline]
	pub(crate) fn remaining(&self) -> usize {
		self.data.len() - self.offset
	}

	fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
		let end = self.offset.checked_add(len).filter(|end| *end <= self.data.len()).ok_or(DecodeError::Truncated {
			offset: self.offset,
			needed: len,
		})?;
		let slice = &self.data[self.offset..end];
		self.offset = end;
		Ok(slice)
	}

	pub(crate) fn read_u8(&mut self) -> Result<u8, DecodeError> {
		Ok(self.read_slice(1)?[0])
	}

	pub(crate) fn read_u16(&mut self) -> Result<u16, DecodeError> {
		let bytes = self.read_slice(2)?;
		Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
	}

	pub(crate) fn read_u32(&mut self) -> Result<u32, DecodeError> {
		let bytes = self.read_slice(4)?;
		Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
	}

	fn read_character_string(&mut self) -> Result<&'a [u8], DecodeError> {
		let len = self.read_u8()? as usize;
		self.read_slice(len)
	}

	/// Reads a possibly compressed name (RFC 1035 §3.1, §4.1.4).
	///
	/// A compression pointer must point strictly before the start of the run of labels it
	/// was read from. Targets therefore decrease with every jump, so a crafted packet can
	/// never make this loop forever.
	pub(crate) fn read_name(&mut self) -> Result<Name, DecodeError> {
		let mut name = Name::root();
		let mut wire_len = 1;
		let mut cursor = self.offset;
		let mut segment_start = self.offset;
		let mut resume_at = None;

		loop {
			let len = *self.data.get(cursor).ok_or(DecodeError::Truncated { offset: cursor, needed: 1 })?;
			match len & 0xC0 {
				0x00 if len == 0 => {
					cursor += 1;
					break;
				}

				0x00 => {
					let len = len as usize;
					debug_assert!(len <= MAX_LABEL_LEN);

					let start = cursor + 1;
					let label = self
						.data
						.get(start..start + len)
						.ok_or(DecodeError::Truncated { offset: start, needed: len })?;

					wire_len += len + 1;
					if wire_len > MAX_NAME_LEN {
						return Err(DecodeError::NameTooLong);
					}

					let label = std::str::from_utf8(label).map_err(|_| DecodeError::InvalidUtf8)?;
					name.push_label(label.to_string());
					cursor = start + len;
				}

				0xC0 => {
					let low = *self.data.get(cursor + 1).ok_or(DecodeError::Truncated { offset: cursor + 1, needed: 1 })?;
					let target = (((len & 0x3F) as usize) << 8) | low as usize;
					if target >= segment_start {
						return Err(DecodeError::MalformedPointer(cursor));
					}
					if resume_at.is_none() {
						resume_at = Some(cursor + 2);
					}
					cursor = target;
					segment_start = target;
				}

				_ => return Err(DecodeError::InvalidLabel { offset: cursor, byte: len }),
			}
		}

		self.offset = resume_at.unwrap_or(cursor);
		Ok(name)
	}

	pub(crate) fn read_question(&mut self) -> Result<Question, DecodeError> {
		let name = self.read_name()?;
		let qtype = RecordType::from(self.read_u16()?);
		let class = self.read_u16()?;
		Ok(Question {
			name,
			qtype,
			qclass: DnsClass::from(class & !CLASS_TOP_BIT),
			unicast_response: class & CLASS_TOP_BIT != 0,
		})
	}

	/// Reads one resource record. Returns `Ok(None)` for records of unsupported types, which
	/// are skipped using their RDLENGTH.
	pub(crate) fn read_record(&mut self) -> Result<Option<DnsRecord>, DecodeError> {
		let name = self.read_name()?;
		let rtype = self.read_u16()?;
		let class = self.read_u16()?;
		let ttl = self.read_u32()?;
		let rdlength = self.read_u16()? as usize;

		let start = self.offset;
		if rdlength > self.remaining() {
			return Err(DecodeError::Truncated {
				offset: start,
				needed: rdlength,
			});
		}
		let end = start + rdlength;

		let data = match self.read_rdata(RecordType::from(rtype), end) {
			Ok(data) => data,
			Err(DecodeError::UnknownRecordType(_)) => {
				self.offset = end;
				return Ok(None);
			}
			Err(err) => return Err(err),
		};

		if self.offset != end {
			return Err(DecodeError::RDataLength {
				rtype,
				expected: rdlength,
				actual: self.offset - start,
			});
		}

		Ok(Some(
			DnsRecord::new(name, ttl, data)
				.with_class(DnsClass::from(class & !CLASS_TOP_BIT))
				.with_cache_flush(class & CLASS_TOP_BIT != 0)
				.with_created(self.received),
		))
	}

	fn read_rdata(&mut self, rtype: RecordType, end: usize) -> Result<RData, DecodeError> {
		Ok(match rtype {
			RecordType::A => {
				let octets = self.read_slice(4)?;
				RData::A(Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]))
			}

			RecordType::Aaaa => {
				let mut octets = [0u8; 16];
				octets.copy_from_slice(self.read_slice(16)?);
				RData::Aaaa(Ipv6Addr::from(octets))
			}

			RecordType::Ptr => RData::Ptr(self.read_name()?),

			RecordType::Srv => RData::Srv(Srv {
				priority: self.read_u16()?,
				weight: self.read_u16()?,
				port: self.read_u16()?,
				target: self.read_name()?,
			}),

			RecordType::Txt => {
				let mut strings = Vec::new();
				while self.offset < end {
					let string = self.read_character_string()?;
					if !string.is_empty() {
						strings.push(string.to_vec());
					}
				}
				RData::Txt(Txt(strings))
			}

			RecordType::Hinfo => {
				let cpu = self.read_character_string()?;
				let os = self.read_character_string()?;
				RData::Hinfo(Hinfo {
					cpu: String::from_utf8(cpu.to_vec()).map_err(|_| DecodeError::InvalidUtf8)?,
					os: String::from_utf8(os.to_vec()).map_err(|_| DecodeError::InvalidUtf8)?,
				})
			}

			RecordType::Nsec => {
				let next_domain = self.read_name()?;
				let mut types = BTreeSet::new();
				while self.offset < end {
					let block = self.read_u8()? as u16;
					let len = self.read_u8()? as usize;
					let bitmap = self.read_slice(len)?;
					for (i, byte) in bitmap.iter().enumerate() {
						for bit in 0..8 {
							if byte & (0x80 >> bit) != 0 {
								types.insert(RecordType::from((block << 8) | (i * 8 + bit) as u16));
							}
						}
					}
				}
				RData::Nsec(Nsec { next_domain, types })
			}

			RecordType::Any | RecordType::Other(_) => return Err(DecodeError::UnknownRecordType(rtype.code())),
		})
	}
}
