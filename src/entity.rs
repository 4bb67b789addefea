//! Entities resolved from directory entries and the claims they carry.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
	claim_type::{ClaimTypeConfig, DirectoryObjectType},
	directory::DomainInfo,
};

/// An identity claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Claim {
	/// The claim type
	pub claim_type: String,
	/// The claim value
	pub value: String,
}

impl Claim {
	/// Create a new [`Claim`]
	#[must_use]
	pub fn new(claim_type: &str, value: &str) -> Self {
		Self { claim_type: claim_type.to_owned(), value: value.to_owned() }
	}
}

/// A user or group found for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntity {
	/// The mapping whose claim type the entity carries
	pub config: ClaimTypeConfig,
	/// The directory attribute value the claim value was built from
	pub raw_value: String,
	/// The claim identifying the entity, leading token included
	pub claim: Claim,
	/// Human readable label
	pub display_text: String,
	/// Values of the configured entity metadata slots
	pub metadata: BTreeMap<String, String>,
	/// Domain of the directory the entity was found in
	pub domain: Option<DomainInfo>,
	/// The connection the entity was found through. Unset for entities that
	/// were not looked up in a directory.
	pub connection_id: Option<String>,
}

impl ResolvedEntity {
	/// An entity built from the input alone, without directory data.
	#[must_use]
	pub fn from_input(config: &ClaimTypeConfig, value: &str) -> Self {
		Self {
			config: config.clone(),
			raw_value: value.to_owned(),
			claim: Claim::new(&config.claim_type, value),
			display_text: value.to_owned(),
			metadata: BTreeMap::new(),
			domain: None,
			connection_id: None,
		}
	}

	/// The kind of object the entity is.
	#[must_use]
	pub fn object_type(&self) -> DirectoryObjectType {
		self.config.directory_object_type
	}

	/// Whether `other` describes the same entity, e.g. because it was found in
	/// a second directory. Claim type and value are compared ignoring case;
	/// the domains must also match when the leading token names the domain.
	#[must_use]
	pub fn is_same_entity(&self, other: &Self) -> bool {
		if !self.claim.claim_type.eq_ignore_ascii_case(&other.claim.claim_type)
			|| !self.claim.value.eq_ignore_ascii_case(&other.claim.value)
		{
			return false;
		}
		if !self.config.leading_token_has_domain() {
			return true;
		}
		match (&self.domain, &other.domain) {
			(Some(a), Some(b)) => {
				a.domain_name.eq_ignore_ascii_case(&b.domain_name)
					&& a.domain_fqdn.eq_ignore_ascii_case(&b.domain_fqdn)
			}
			(None, None) => true,
			_ => false,
		}
	}
}

/// Collapse entities describing the same entity, keeping the first one
/// found.
#[must_use]
pub fn deduplicate(entities: Vec<ResolvedEntity>) -> Vec<ResolvedEntity> {
	let mut unique: Vec<ResolvedEntity> = Vec::with_capacity(entities.len());
	for entity in entities {
		if !unique.iter().any(|existing| existing.is_same_entity(&entity)) {
			unique.push(entity);
		}
	}
	unique
}
