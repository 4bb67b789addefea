//! Error codes
use std::{fmt, time::Duration};

/// Errors that can occur when using this library
#[derive(thiserror::Error, Debug)]
pub enum Error {
	/// A claim type configuration change would break one of the collection
	/// invariants.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// No claim type configuration matches the incoming claim type.
	#[error("No claim type configuration matches claim type {0}")]
	NoMatchingConfiguration(String),
	/// A configuration with the given ID does not exist in the store.
	#[error("Configuration {0} not found")]
	ConfigurationNotFound(String),
	/// The configuration was changed by someone else since it was loaded.
	#[error("Configuration version {expected} is stale, the store holds version {actual}")]
	StaleConfiguration {
		/// The version the caller based its edit on
		expected: u64,
		/// The version currently persisted
		actual: u64,
	},
	/// A directory operation did not complete before its deadline.
	#[error("Directory operation timed out after {0:?}")]
	Timeout(Duration),
	/// A required attribute in a search result was missing.
	#[error("Missing data")]
	Missing,
	/// The contents of an attribute or setting did not conform to the expected
	/// syntax.
	#[error("Malformed data: {0}")]
	Invalid(String),
	/// An underlying protocol error or similar occurred, or the LDAP library
	/// was used incorrectly.
	#[error(transparent)]
	Ldap(#[from] ldap3::LdapError),
	/// Reading a certificate or key file failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// The rule of the claim type configuration that a change violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigRule {
	/// Directory attribute and class must be set.
	MissingDirectoryObject,
	/// Additional search attributes cannot carry a claim type.
	AdditionalAttributeWithClaimType,
	/// A regular row needs a claim type or a metadata key.
	MissingClaimTypeAndMetadata,
	/// A metadata key may be used once per object type.
	DuplicateMetadataKey,
	/// Claim types are unique.
	DuplicateClaimType,
	/// Bypass keywords are unique.
	DuplicateBypassKeyword,
	/// An attribute/class/object type combination may be used once.
	DuplicateDirectoryObject,
	/// There can only be one group identifier.
	DuplicateGroupIdentifier,
	/// An additional search attribute requires an identifier of its object
	/// type.
	MissingBaseIdentifier,
	/// The identity claim type must map to a user and cannot be renamed.
	IdentityClaimType,
	/// The identity claim type row cannot be removed.
	IdentityRowRemoval,
	/// The row to update does not exist.
	UnknownClaimType,
}

impl fmt::Display for ConfigRule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let description = match self {
			Self::MissingDirectoryObject => "directory object attribute and class are required",
			Self::AdditionalAttributeWithClaimType => {
				"an additional search attribute cannot have a claim type"
			}
			Self::MissingClaimTypeAndMetadata => {
				"a claim type or an entity metadata key is required"
			}
			Self::DuplicateMetadataKey => {
				"entity metadata key is already used for this directory object type"
			}
			Self::DuplicateClaimType => "claim type already exists",
			Self::DuplicateBypassKeyword => "keyword to bypass the directory is already used",
			Self::DuplicateDirectoryObject => {
				"directory object attribute and class already exist for this object type"
			}
			Self::DuplicateGroupIdentifier => "a group identifier already exists",
			Self::MissingBaseIdentifier => {
				"an additional search attribute requires an identifier of the same object type"
			}
			Self::IdentityClaimType => {
				"the identity claim type must map to a user and cannot be changed"
			}
			Self::IdentityRowRemoval => "the identity claim type cannot be removed",
			Self::UnknownClaimType => "no configuration exists for claim type",
		};
		f.write_str(description)
	}
}

/// A rejected claim type configuration change, naming the offending field and
/// value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid claim type configuration: {rule} ({field} = {value:?})")]
pub struct ConfigError {
	/// The violated rule
	pub rule: ConfigRule,
	/// Name of the offending field
	pub field: &'static str,
	/// Value of the offending field
	pub value: String,
}

impl ConfigError {
	/// Create a new [`ConfigError`]
	pub(crate) fn new(rule: ConfigRule, field: &'static str, value: impl Into<String>) -> Self {
		Self { rule, field, value: value.into() }
	}
}
