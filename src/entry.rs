//! Helper methods for extracting data from search results.
use ldap3::SearchEntry;

/// An extension trait for [`SearchEntry`] that provides convenience methods for
/// extracting data. Attribute names are matched case-insensitively, as
/// directory servers don't necessarily return them in the case they were
/// requested in.
pub trait SearchEntryExt {
	/// Get all values of an attribute. Empty if the attribute is missing.
	fn attr_values(&self, attr: &str) -> &[String];

	/// Get the first value of an attribute. Will return `None` if attribute
	/// value is not valid UTF-8.
	fn attr_first(&self, attr: &str) -> Option<&str> {
		self.attr_values(attr).first().map(String::as_str)
	}

	/// Whether the entry is of the given object class.
	fn has_object_class(&self, class: &str) -> bool {
		self.attr_values("objectClass").iter().any(|value| value.eq_ignore_ascii_case(class))
	}
}

impl SearchEntryExt for SearchEntry {
	fn attr_values(&self, attr: &str) -> &[String] {
		if let Some(values) = self.attrs.get(attr) {
			return values;
		}
		self.attrs
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attr))
			.map(|(_, values)| values.as_slice())
			.unwrap_or_default()
	}
}

/// Get the value of the first RDN of a distinguished name, e.g. `Admins` for
/// `CN=Admins,OU=Groups,DC=contoso,DC=local`.
///
/// The value is unescaped as described in RFC 4514, so
/// `CN=Smith\, John,OU=People` yields `Smith, John`. Of a multi-valued RDN
/// only the first value is returned. Returns `None` for empty values and for
/// hex escapes that do not decode to UTF-8.
#[must_use]
pub fn first_rdn_value(dn: &str) -> Option<String> {
	let (_, rest) = dn.split_once('=')?;
	let mut input = rest.trim_start().bytes().peekable();
	let mut value = Vec::with_capacity(rest.len());
	// Unescaped trailing spaces are not part of the value
	let mut significant = 0;

	while let Some(byte) = input.next() {
		match byte {
			b',' | b'+' => break,
			b'\\' => {
				let Some(escaped) = input.next() else { break };
				let decoded = match input.peek() {
					Some(low) if escaped.is_ascii_hexdigit() && low.is_ascii_hexdigit() => {
						let pair = [escaped, *low];
						input.next();
						u8::from_str_radix(std::str::from_utf8(&pair).ok()?, 16).ok()?
					}
					_ => escaped,
				};
				value.push(decoded);
				significant = value.len();
			}
			byte => {
				value.push(byte);
				if byte != b' ' {
					significant = value.len();
				}
			}
		}
	}
	value.truncate(significant);
	String::from_utf8(value).ok().filter(|value| !value.is_empty())
}

/// The attribute type of the first RDN of a distinguished name, e.g. `CN`.
#[must_use]
pub fn first_rdn_attribute(dn: &str) -> Option<&str> {
	dn.split_once('=').map(|(attribute, _)| attribute.trim())
}
