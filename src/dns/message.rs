use super::{decode::Decoder, encode::Encoder, DnsClass, DnsRecord, Name, RecordType};
use crate::errors::{DecodeError, EncodeError};

/// Largest packet we will send or accept (RFC 6762 §17, 9000 bytes minus IP/UDP headers).
pub const MAX_MESSAGE_LEN: usize = 8966;

/// Length of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

// The "flags" field (RFC 1035 §4.1.1):
//
//   0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
// |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// The header flags of a DNS message.
pub struct Flags {
	pub response: bool,
	pub opcode: u8,
	pub authoritative: bool,
	pub truncated: bool,
	pub recursion_desired: bool,
	pub recursion_available: bool,
	pub rcode: u8,
}
impl Flags {
	pub fn to_bits(self) -> u16 {
		let mut bits = ((self.opcode as u16 & 0x0F) << 11) | (self.rcode as u16 & 0x0F);
		if self.response {
			bits |= FLAG_QR;
		}
		if self.authoritative {
			bits |= FLAG_AA;
		}
		if self.truncated {
			bits |= FLAG_TC;
		}
		if self.recursion_desired {
			bits |= FLAG_RD;
		}
		if self.recursion_available {
			bits |= FLAG_RA;
		}
		bits
	}

	pub fn from_bits(bits: u16) -> Self {
		Self {
			response: bits & FLAG_QR != 0,
			opcode: ((bits >> 11) & 0x0F) as u8,
			authoritative: bits & FLAG_AA != 0,
			truncated: bits & FLAG_TC != 0,
			recursion_desired: bits & FLAG_RD != 0,
			recursion_available: bits & FLAG_RA != 0,
			rcode: (bits & 0x0F) as u8,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// An entry of the question section.
pub struct Question {
	pub name: Name,
	pub qtype: RecordType,
	pub qclass: DnsClass,
	/// The mDNS "QU" bit: the querier would like a unicast reply.
	pub unicast_response: bool,
}
impl Question {
	pub fn new(name: Name, qtype: RecordType) -> Self {
		Self {
			name,
			qtype,
			qclass: DnsClass::In,
			unicast_response: false,
		}
	}

	pub fn with_unicast_response(mut self, unicast_response: bool) -> Self {
		self.unicast_response = unicast_response;
		self
	}

	/// Whether `record` answers this question.
	pub fn is_answered_by(&self, record: &DnsRecord) -> bool {
		self.qtype.matches(record.record_type()) && (self.qclass == DnsClass::Any || self.qclass == record.class()) && self.name == *record.name()
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A DNS message: header, question section and the three record sections.
///
/// Section counts are derived from the section lengths when encoding.
pub struct Message {
	pub id: u16,
	pub flags: Flags,
	pub questions: Vec<Question>,
	pub answers: Vec<DnsRecord>,
	pub authorities: Vec<DnsRecord>,
	pub additionals: Vec<DnsRecord>,
}
impl Message {
	/// An empty mDNS query (id 0).
	pub fn query() -> Self {
		Self::default()
	}

	/// An empty authoritative mDNS response (id 0).
	pub fn response() -> Self {
		Self {
			flags: Flags {
				response: true,
				authoritative: true,
				..Flags::default()
			},
			..Self::default()
		}
	}

	#[inline]
	pub fn is_query(&self) -> bool {
		!self.flags.response
	}

	#[inline]
	pub fn is_response(&self) -> bool {
		self.flags.response
	}

	pub fn add_question(&mut self, question: Question) -> &mut Self {
		self.questions.push(question);
		self
	}

	pub fn add_answer(&mut self, record: DnsRecord) -> &mut Self {
		self.answers.push(record);
		self
	}

	pub fn add_authority(&mut self, record: DnsRecord) -> &mut Self {
		self.authorities.push(record);
		self
	}

	/// Adds `record` to the additional section unless it is already present in the answer or
	/// additional sections.
	pub fn add_additional(&mut self, record: DnsRecord) -> &mut Self {
		if !self.answers.contains(&record) && !self.additionals.contains(&record) {
			self.additionals.push(record);
		}
		self
	}

	/// All records of the answer, authority and additional sections.
	pub fn records(&self) -> impl Iterator<Item = &DnsRecord> {
		self.answers.iter().chain(self.authorities.iter()).chain(self.additionals.iter())
	}

	#[inline]
	pub fn is_empty(&self) -> bool {
		self.questions.is_empty() && self.answers.is_empty() && self.authorities.is_empty() && self.additionals.is_empty()
	}

	/// Encodes this message in DNS wire format, compressing names.
	pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
		let count = |len: usize| u16::try_from(len).map_err(|_| EncodeError::TooManyRecords);

		let mut encoder = Encoder::new();
		encoder.write_u16(self.id);
		encoder.write_u16(self.flags.to_bits());
		encoder.write_u16(count(self.questions.len())?);
		encoder.write_u16(count(self.answers.len())?);
		encoder.write_u16(count(self.authorities.len())?);
		encoder.write_u16(count(self.additionals.len())?);

		for question in &self.questions {
			encoder.write_question(question);
		}
		for record in self.records() {
			encoder.write_record(record)?;
		}

		let packet = encoder.finish();
		if packet.len() > MAX_MESSAGE_LEN {
			return Err(EncodeError::TooLarge(packet.len()));
		}
		Ok(packet)
	}

	/// Decodes a message from DNS wire format.
	///
	/// Records of unsupported types are skipped; everything else that is malformed fails the
	/// whole message.
	pub fn decode(packet: &[u8]) -> Result<Self, DecodeError> {
		let mut decoder = Decoder::new(packet);

		let id = decoder.read_u16()?;
		let flags = Flags::from_bits(decoder.read_u16()?);
		let qdcount = decoder.read_u16()? as usize;
		let ancount = decoder.read_u16()? as usize;
		let nscount = decoder.read_u16()? as usize;
		let arcount = decoder.read_u16()? as usize;

		// A question needs at least 5 bytes and a record at least 11.
		let minimum = qdcount * 5 + (ancount + nscount + arcount) * 11;
		if minimum > decoder.remaining() {
			return Err(DecodeError::CountOverrun {
				count: qdcount + ancount + nscount + arcount,
				remaining: decoder.remaining(),
			});
		}

		let mut message = Message {
			id,
			flags,
			questions: Vec::with_capacity(qdcount),
			answers: Vec::with_capacity(ancount),
			authorities: Vec::with_capacity(nscount),
			additionals: Vec::with_capacity(arcount),
		};

		for _ in 0..qdcount {
			message.questions.push(decoder.read_question()?);
		}
		for (count, section) in [
			(ancount, &mut message.answers),
			(nscount, &mut message.authorities),
			(arcount, &mut message.additionals),
		] {
			for _ in 0..count {
				if let Some(record) = decoder.read_record()? {
					section.push(record);
				}
			}
		}

		Ok(message)
	}
}
