use crate::errors::BadDnsNameError;
use std::{
	cmp::Ordering,
	fmt,
	hash::{Hash, Hasher},
	str::FromStr,
};

/// Maximum length of a single label.
pub const MAX_LABEL_LEN: usize = 63;

/// Maximum length of a name in wire format, including length bytes and the root label.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Clone, Default)]
/// A fully qualified domain name, stored as its labels (the root label is implied).
///
/// Comparison, ordering and hashing are ASCII case-insensitive, as DNS requires. Labels may
/// contain any characters including dots, which is what DNS-SD instance names such as
/// `My Printer (2)` need; the textual form escapes dots and backslashes inside labels.
pub struct Name {
	labels: Vec<String>,
}
impl Name {
	/// The root name, `.`.
	pub fn root() -> Self {
		Self::default()
	}

	/// `_services._dns-sd._udp.local.`, the DNS-SD service type enumeration name (RFC 6763 §9).
	pub fn services_meta_query() -> Self {
		Self {
			labels: ["_services", "_dns-sd", "_udp", "local"].into_iter().map(String::from).collect(),
		}
	}

	/// Parses a presentation-format name such as `_ipp._tcp.local.`.
	///
	/// The trailing dot is optional. `\.` and `\\` escape a dot or backslash inside a label.
	pub fn parse(name: &str) -> Result<Self, BadDnsNameError> {
		if name.is_empty() || name == "." {
			return Ok(Self::root());
		}

		let mut labels = Vec::new();
		let mut label = String::new();
		let mut chars = name.chars();
		while let Some(c) = chars.next() {
			match c {
				'\\' => label.push(chars.next().ok_or(BadDnsNameError)?),
				'.' => {
					if label.is_empty() {
						return Err(BadDnsNameError);
					}
					labels.push(std::mem::take(&mut label));
				}
				c => label.push(c),
			}
		}
		if !label.is_empty() {
			labels.push(label);
		}

		Self::from_labels(labels)
	}

	/// Builds a name from its labels, most specific first.
	pub fn from_labels<I, S>(labels: I) -> Result<Self, BadDnsNameError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let name = Self {
			labels: labels.into_iter().map(Into::into).collect(),
		};
		name.validate()?;
		Ok(name)
	}

	fn validate(&self) -> Result<(), BadDnsNameError> {
		if self.labels.iter().any(|label| label.is_empty() || label.len() > MAX_LABEL_LEN) {
			return Err(BadDnsNameError);
		}
		if self.wire_len() > MAX_NAME_LEN {
			return Err(BadDnsNameError);
		}
		Ok(())
	}

	/// Returns a new name with `label` prepended, e.g. an instance label in front of a service type.
	pub fn prepend_label(&self, label: &str) -> Result<Self, BadDnsNameError> {
		let mut labels = Vec::with_capacity(self.labels.len() + 1);
		labels.push(label.to_string());
		labels.extend(self.labels.iter().cloned());
		Self::from_labels(labels)
	}

	#[inline]
	/// The labels of this name, most specific first.
	pub fn labels(&self) -> impl ExactSizeIterator<Item = &str> + DoubleEndedIterator {
		self.labels.iter().map(String::as_str)
	}

	#[inline]
	/// The first (most specific) label, if this is not the root.
	pub fn first_label(&self) -> Option<&str> {
		self.labels.first().map(String::as_str)
	}

	#[inline]
	pub fn label_count(&self) -> usize {
		self.labels.len()
	}

	#[inline]
	pub fn is_root(&self) -> bool {
		self.labels.is_empty()
	}

	/// The name with its first label removed, or `None` for the root.
	pub fn parent(&self) -> Option<Self> {
		if self.labels.is_empty() {
			None
		} else {
			Some(Self {
				labels: self.labels[1..].to_vec(),
			})
		}
	}

	/// Whether `suffix` is this name or one of its ancestors.
	pub fn ends_with(&self, suffix: &Name) -> bool {
		if suffix.labels.len() > self.labels.len() {
			return false;
		}
		self.labels
			.iter()
			.rev()
			.zip(suffix.labels.iter().rev())
			.all(|(a, b)| a.eq_ignore_ascii_case(b))
	}

	/// Length of this name in uncompressed wire format.
	pub fn wire_len(&self) -> usize {
		self.labels.iter().map(|label| label.len() + 1).sum::<usize>() + 1
	}

	/// Case-folded key for the suffix starting at label `from`, used by the compressor.
	pub(crate) fn suffix_key(&self, from: usize) -> String {
		let mut key = String::new();
		for label in &self.labels[from..] {
			key.push_str(&label.to_ascii_lowercase());
			key.push('\0');
		}
		key
	}

	pub(crate) fn push_label(&mut self, label: String) {
		self.labels.push(label);
	}
}
impl fmt::Display for Name {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.labels.is_empty() {
			return f.write_str(".");
		}
		for label in &self.labels {
			for c in label.chars() {
				if c == '.' || c == '\\' {
					f.write_str("\\")?;
				}
				write!(f, "{c}")?;
			}
			f.write_str(".")?;
		}
		Ok(())
	}
}
impl fmt::Debug for Name {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Name({self})")
	}
}
impl FromStr for Name {
	type Err = BadDnsNameError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}
impl PartialEq for Name {
	fn eq(&self, other: &Self) -> bool {
		self.labels.len() == other.labels.len()
			&& self
				.labels
				.iter()
				.zip(other.labels.iter())
				.all(|(a, b)| a.eq_ignore_ascii_case(b))
	}
}
impl Eq for Name {}
impl Hash for Name {
	fn hash<H: Hasher>(&self, state: &mut H) {
		state.write_usize(self.labels.len());
		for label in &self.labels {
			for byte in label.bytes() {
				state.write_u8(byte.to_ascii_lowercase());
			}
			state.write_u8(0);
		}
	}
}
impl PartialOrd for Name {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for Name {
	fn cmp(&self, other: &Self) -> Ordering {
		let lower = |label: &String| label.bytes().map(|b| b.to_ascii_lowercase()).collect::<Vec<u8>>();
		self.labels.iter().map(lower).cmp(other.labels.iter().map(lower))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parse_and_display() {
		let name = Name::parse("printer._ipp._tcp.local").unwrap();
		assert_eq!(name.label_count(), 4);
		assert_eq!(name.to_string(), "printer._ipp._tcp.local.");
		assert_eq!(Name::parse("printer._ipp._tcp.local.").unwrap(), name);
		assert!(Name::parse(".").unwrap().is_root());
		assert_eq!(Name::root().to_string(), ".");
	}

	#[test]
	fn case_insensitive_identity() {
		use std::collections::hash_map::DefaultHasher;

		let a = Name::parse("Printer._IPP._tcp.local.").unwrap();
		let b = Name::parse("printer._ipp._tcp.LOCAL.").unwrap();
		assert_eq!(a, b);
		assert_eq!(a.cmp(&b), Ordering::Equal);

		let hash = |name: &Name| {
			let mut hasher = DefaultHasher::new();
			name.hash(&mut hasher);
			hasher.finish()
		};
		assert_eq!(hash(&a), hash(&b));
	}

	#[test]
	fn escaped_dots_stay_inside_labels() {
		let service = Name::parse("_http._tcp.local.").unwrap();
		let instance = service.prepend_label("Kitchen v1.2").unwrap();
		assert_eq!(instance.first_label(), Some("Kitchen v1.2"));
		assert_eq!(instance.to_string(), "Kitchen v1\\.2._http._tcp.local.");
		assert_eq!(Name::parse(&instance.to_string()).unwrap(), instance);
		assert_eq!(instance.parent().unwrap(), service);
		assert!(instance.ends_with(&service));
		assert!(!service.ends_with(&instance));
	}

	#[test]
	fn rejects_bad_names() {
		assert!(Name::parse("a..b").is_err());
		assert!(Name::parse(&"x".repeat(64)).is_err());
		let long = std::iter::repeat("abcdefghij").take(30).collect::<Vec<_>>().join(".");
		assert!(Name::parse(&long).is_err());
		assert!(Name::parse("trailing\\").is_err());
	}
}
