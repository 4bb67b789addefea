//! Mappings between claim types and directory attributes.
use serde::{Deserialize, Serialize};

/// Placeholder in a leading token that is replaced with the domain name of the
/// directory the entity was found in.
pub const DOMAIN_NAME_TOKEN: &str = "{domain}";
/// Placeholder in a leading token that is replaced with the fully qualified
/// domain name of the directory the entity was found in.
pub const DOMAIN_FQDN_TOKEN: &str = "{fqdn}";

/// Well known claim types.
pub mod claim_types {
	/// User principal name, the default identity claim type.
	pub const UPN: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn";
	/// Email address.
	pub const EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
	/// Role, the default group claim type.
	pub const ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
}

/// Well known entity metadata keys.
pub mod metadata {
	/// Human readable name
	pub const DISPLAY_NAME: &str = "DisplayName";
	/// Email address
	pub const EMAIL: &str = "Email";
	/// SIP address
	pub const SIP_ADDRESS: &str = "SIPAddress";
	/// Job title
	pub const JOB_TITLE: &str = "JobTitle";
	/// Department
	pub const DEPARTMENT: &str = "Department";
	/// Mobile phone number
	pub const MOBILE_PHONE: &str = "MobilePhone";
	/// Account name
	pub const ACCOUNT_NAME: &str = "AccountName";
}

/// The kind of directory object a claim type maps to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryObjectType {
	/// A person
	#[default]
	User,
	/// A security or distribution group
	Group,
}

/// One mapping between a claim type and a directory class/attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimTypeConfig {
	/// The claim type. Empty for metadata-only rows and additional search
	/// attributes.
	pub claim_type: String,
	/// Object type the row applies to
	pub directory_object_type: DirectoryObjectType,
	/// LDAP class of the object, e.g. `user`
	pub directory_object_class: String,
	/// LDAP attribute holding the value, e.g. `userPrincipalName`
	pub directory_object_attribute: String,
	/// Whether a substring search may be performed on the attribute
	pub directory_object_attribute_supports_wildcard: bool,
	/// Marks the row as an extra attribute searched for the identifier of its
	/// object type
	pub is_additional_search_attribute: bool,
	/// Metadata slot on the resulting entity filled from the attribute
	pub entity_metadata_key: Option<String>,
	/// Prefix added to the claim value, may contain [`DOMAIN_NAME_TOKEN`] or
	/// [`DOMAIN_FQDN_TOKEN`]
	pub claim_value_leading_token: Option<String>,
	/// Inputs starting with this keyword are resolved without querying the
	/// directory
	pub leading_keyword_to_bypass_directory: Option<String>,
	/// Filter fragment ANDed into queries for this row
	pub directory_object_additional_filter: Option<String>,
	/// Attribute used for the display text instead of the claim value
	pub directory_object_attribute_for_display_text: Option<String>,
}

/// Returns the content of an optional string if it's not empty.
pub(crate) fn non_empty(value: Option<&String>) -> Option<&str> {
	value.map(String::as_str).filter(|value| !value.is_empty())
}

impl ClaimTypeConfig {
	/// Create a row mapping `claim_type` to `attribute` of objects with class
	/// `class`.
	#[must_use]
	pub fn new(
		claim_type: &str,
		object_type: DirectoryObjectType,
		class: &str,
		attribute: &str,
	) -> Self {
		Self {
			claim_type: claim_type.to_owned(),
			directory_object_type: object_type,
			directory_object_class: class.to_owned(),
			directory_object_attribute: attribute.to_owned(),
			directory_object_attribute_supports_wildcard: true,
			..Self::default()
		}
	}

	/// Create a row that only fills an entity metadata slot.
	#[must_use]
	pub fn metadata(
		key: &str,
		object_type: DirectoryObjectType,
		class: &str,
		attribute: &str,
	) -> Self {
		Self { entity_metadata_key: Some(key.to_owned()), ..Self::new("", object_type, class, attribute) }
	}

	/// Create an additional search attribute for the identifier of
	/// `object_type`. A metadata key may be set on the result as well.
	#[must_use]
	pub fn additional(object_type: DirectoryObjectType, class: &str, attribute: &str) -> Self {
		Self { is_additional_search_attribute: true, ..Self::new("", object_type, class, attribute) }
	}

	/// Whether the row carries a claim type.
	#[must_use]
	pub fn has_claim_type(&self) -> bool {
		!self.claim_type.is_empty()
	}

	/// Whether the row identifies an entity, i.e. is a regular row with a
	/// claim type.
	#[must_use]
	pub fn is_identifier(&self) -> bool {
		self.has_claim_type() && !self.is_additional_search_attribute
	}

	/// The configured metadata key, if any.
	#[must_use]
	pub fn metadata_key(&self) -> Option<&str> {
		non_empty(self.entity_metadata_key.as_ref())
	}

	/// The configured leading token, if any.
	#[must_use]
	pub fn leading_token(&self) -> Option<&str> {
		non_empty(self.claim_value_leading_token.as_ref())
	}

	/// The configured bypass keyword, if any.
	#[must_use]
	pub fn bypass_keyword(&self) -> Option<&str> {
		non_empty(self.leading_keyword_to_bypass_directory.as_ref())
	}

	/// The configured additional filter, if any.
	#[must_use]
	pub fn additional_filter(&self) -> Option<&str> {
		non_empty(self.directory_object_additional_filter.as_ref())
	}

	/// The configured display text attribute, if any.
	#[must_use]
	pub fn display_text_attribute(&self) -> Option<&str> {
		non_empty(self.directory_object_attribute_for_display_text.as_ref())
	}

	/// Whether the leading token contains a domain placeholder.
	#[must_use]
	pub fn leading_token_has_domain(&self) -> bool {
		self.leading_token().is_some_and(has_domain_token)
	}

	/// Whether the row uses the same directory class, attribute and object
	/// type as `other`.
	#[must_use]
	pub fn same_directory_object(&self, other: &Self) -> bool {
		self.directory_object_type == other.directory_object_type
			&& self.directory_object_attribute.eq_ignore_ascii_case(&other.directory_object_attribute)
			&& self.directory_object_class.eq_ignore_ascii_case(&other.directory_object_class)
	}
}

/// Whether `value` contains one of the domain placeholders.
#[must_use]
pub fn has_domain_token(value: &str) -> bool {
	value.contains(DOMAIN_NAME_TOKEN) || value.contains(DOMAIN_FQDN_TOKEN)
}

/// Replace the domain placeholders in `value`.
#[must_use]
pub fn replace_domain_tokens(value: &str, domain_name: &str, domain_fqdn: &str) -> String {
	value.replace(DOMAIN_NAME_TOKEN, domain_name).replace(DOMAIN_FQDN_TOKEN, domain_fqdn)
}

/// The claim type rows a new configuration starts with, using
/// `identity_claim_type` for the user identifier.
#[must_use]
pub fn default_claim_types(identity_claim_type: &str) -> Vec<ClaimTypeConfig> {
	use DirectoryObjectType::{Group, User};

	let mut rows = vec![
		// User identifier and its supplementary search attributes
		ClaimTypeConfig {
			directory_object_attribute_for_display_text: Some("displayName".to_owned()),
			..ClaimTypeConfig::new(identity_claim_type, User, "user", "userPrincipalName")
		},
		ClaimTypeConfig::new(claim_types::EMAIL, User, "user", "mail"),
		ClaimTypeConfig {
			entity_metadata_key: Some(metadata::DISPLAY_NAME.to_owned()),
			..ClaimTypeConfig::additional(User, "user", "displayName")
		},
		ClaimTypeConfig::additional(User, "user", "cn"),
		ClaimTypeConfig::additional(User, "user", "sn"),
		ClaimTypeConfig::additional(User, "user", "givenName"),
		ClaimTypeConfig::metadata(metadata::ACCOUNT_NAME, User, "user", "sAMAccountName"),
		ClaimTypeConfig::metadata(metadata::SIP_ADDRESS, User, "user", "msRTCSIP-PrimaryUserAddress"),
		ClaimTypeConfig::metadata(metadata::JOB_TITLE, User, "user", "title"),
		ClaimTypeConfig::metadata(metadata::DEPARTMENT, User, "user", "department"),
		ClaimTypeConfig::metadata(metadata::MOBILE_PHONE, User, "user", "mobile"),
		// Group identifier
		ClaimTypeConfig {
			claim_value_leading_token: Some(format!("{DOMAIN_NAME_TOKEN}\\")),
			..ClaimTypeConfig::new(claim_types::ROLE, Group, "group", "sAMAccountName")
		},
		ClaimTypeConfig::metadata(metadata::DISPLAY_NAME, Group, "group", "displayName"),
		ClaimTypeConfig::metadata(metadata::EMAIL, Group, "group", "mail"),
	];
	// The identity row already carries the email claim type
	if identity_claim_type.eq_ignore_ascii_case(claim_types::EMAIL) {
		rows.retain(|row| row.directory_object_attribute != "mail" || row.directory_object_type == Group);
	}
	rows
}
