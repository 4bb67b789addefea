//! The invariant-enforcing set of claim type mappings.
//!
//! Every mutation is checked against a scratch copy of the complete
//! collection before it is committed, so a rejected change leaves the
//! collection exactly as it was. The rules, in the order they are checked:
//!
//! 1. directory object attribute and class are set
//! 2. additional search attributes have no claim type
//! 3. other rows have a claim type or an entity metadata key
//! 4. an entity metadata key is used once per object type
//! 5. claim types are unique
//! 6. bypass keywords are unique
//! 7. an attribute/class/object type combination is used once
//! 8. there is at most one group identifier
//! 9. additional search attributes require an identifier of their object type
//! 10. the identity claim type maps to a user, and is never renamed or removed
use serde::{Deserialize, Serialize};

use crate::{
	claim_type::{non_empty, ClaimTypeConfig, DirectoryObjectType},
	error::{ConfigError, ConfigRule},
};

/// Claim type mappings of a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimTypeConfigCollection {
	/// The claim type the identity provider trust uses to identify users
	identity_claim_type: Option<String>,
	/// The mappings
	items: Vec<ClaimTypeConfig>,
}

impl ClaimTypeConfigCollection {
	/// Create an empty collection. `identity_claim_type` is the claim type the
	/// trusted identity provider uses to identify users, if known.
	#[must_use]
	pub fn new(identity_claim_type: Option<&str>) -> Self {
		Self {
			identity_claim_type: identity_claim_type
				.filter(|claim_type| !claim_type.is_empty())
				.map(str::to_owned),
			items: Vec::new(),
		}
	}

	/// Create a collection from existing rows, rejecting it if any rule is
	/// broken.
	pub fn from_items(
		identity_claim_type: Option<&str>,
		items: Vec<ClaimTypeConfig>,
	) -> Result<Self, ConfigError> {
		let mut collection = Self::new(identity_claim_type);
		collection.validate_rows(&items)?;
		collection.items = items;
		Ok(collection)
	}

	/// Create a collection holding the default rows for `identity_claim_type`.
	pub fn with_defaults(identity_claim_type: &str) -> Result<Self, ConfigError> {
		Self::from_items(
			Some(identity_claim_type),
			crate::claim_type::default_claim_types(identity_claim_type),
		)
	}

	/// The identity claim type, if one is set.
	#[must_use]
	pub fn identity_claim_type(&self) -> Option<&str> {
		non_empty(self.identity_claim_type.as_ref())
	}

	/// Whether `claim_type` is the identity claim type.
	#[must_use]
	pub fn is_identity_claim_type(&self, claim_type: &str) -> bool {
		self.identity_claim_type().is_some_and(|identity| identity.eq_ignore_ascii_case(claim_type))
	}

	/// Add a row.
	pub fn add(&mut self, item: ClaimTypeConfig) -> Result<(), ConfigError> {
		self.check(&item)?;
		self.items.push(item);
		Ok(())
	}

	/// Replace the row with claim type `old_claim_type` by `new_item`.
	pub fn update(
		&mut self,
		old_claim_type: &str,
		new_item: ClaimTypeConfig,
	) -> Result<(), ConfigError> {
		let position = self.position(old_claim_type).ok_or_else(|| {
			ConfigError::new(ConfigRule::UnknownClaimType, "claim_type", old_claim_type)
		})?;
		if self.is_identity_claim_type(old_claim_type)
			&& !new_item.claim_type.eq_ignore_ascii_case(old_claim_type)
		{
			return Err(ConfigError::new(
				ConfigRule::IdentityClaimType,
				"claim_type",
				new_item.claim_type,
			));
		}

		let mut rows = self.items.clone();
		rows[position] = new_item;
		self.validate_rows(&rows)?;
		self.items = rows;
		Ok(())
	}

	/// Remove the row with claim type `claim_type`. Returns whether a row was
	/// removed.
	pub fn remove(&mut self, claim_type: &str) -> Result<bool, ConfigError> {
		match self.position(claim_type) {
			Some(position) => self.remove_at(&[position]).map(|()| true),
			None => Ok(false),
		}
	}

	/// Remove the row equal to `item`. Returns whether a row was removed.
	pub fn remove_item(&mut self, item: &ClaimTypeConfig) -> Result<bool, ConfigError> {
		match self.items.iter().position(|existing| existing == item) {
			Some(position) => self.remove_at(&[position]).map(|()| true),
			None => Ok(false),
		}
	}

	/// Remove every row equal to one of `items`. Returns the number of
	/// removed rows.
	pub fn remove_all(&mut self, items: &[ClaimTypeConfig]) -> Result<usize, ConfigError> {
		let positions: Vec<usize> = self
			.items
			.iter()
			.enumerate()
			.filter(|(_, existing)| items.contains(existing))
			.map(|(position, _)| position)
			.collect();
		self.remove_at(&positions)?;
		Ok(positions.len())
	}

	/// Check the complete configuration, including that the identity claim
	/// type has a row. Used to preview an edit before it is persisted.
	pub fn validate_whole_configuration(&self) -> Result<(), ConfigError> {
		self.validate_rows(&self.items)?;
		if let Some(identity) = self.identity_claim_type() {
			if self.by_claim_type(identity).is_none() {
				return Err(ConfigError::new(ConfigRule::IdentityClaimType, "claim_type", identity));
			}
		}
		Ok(())
	}

	/// The identifier row of `object_type`. For users this is the identity
	/// claim type row when an identity claim type is set.
	#[must_use]
	pub fn identifier_config(&self, object_type: DirectoryObjectType) -> Option<&ClaimTypeConfig> {
		if object_type == DirectoryObjectType::User {
			if let Some(identity) = self.identity_claim_type() {
				return self.by_claim_type(identity);
			}
		}
		self.items
			.iter()
			.find(|item| item.directory_object_type == object_type && item.is_identifier())
	}

	/// The row identifying users.
	#[must_use]
	pub fn user_identifier_config(&self) -> Option<&ClaimTypeConfig> {
		self.identifier_config(DirectoryObjectType::User)
	}

	/// The row identifying groups.
	#[must_use]
	pub fn group_identifier_config(&self) -> Option<&ClaimTypeConfig> {
		self.identifier_config(DirectoryObjectType::Group)
	}

	/// The row with the given claim type.
	#[must_use]
	pub fn by_claim_type(&self, claim_type: &str) -> Option<&ClaimTypeConfig> {
		self.position(claim_type).map(|position| &self.items[position])
	}

	/// Additional search attributes of `object_type`.
	pub fn additional_configs_for(
		&self,
		object_type: DirectoryObjectType,
	) -> impl Iterator<Item = &ClaimTypeConfig> + '_ {
		self.items.iter().filter(move |item| {
			item.directory_object_type == object_type && item.is_additional_search_attribute
		})
	}

	/// Rows of `object_type` that fill an entity metadata slot.
	pub fn metadata_configs_for(
		&self,
		object_type: DirectoryObjectType,
	) -> impl Iterator<Item = &ClaimTypeConfig> + '_ {
		self.items.iter().filter(move |item| {
			item.directory_object_type == object_type && item.metadata_key().is_some()
		})
	}

	/// Iterate over all rows.
	pub fn iter(&self) -> std::slice::Iter<'_, ClaimTypeConfig> {
		self.items.iter()
	}

	/// Number of rows.
	#[must_use]
	pub fn len(&self) -> usize {
		self.items.len()
	}

	/// Whether there are no rows.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.items.is_empty()
	}

	/// Position of the row with the given claim type.
	fn position(&self, claim_type: &str) -> Option<usize> {
		if claim_type.is_empty() {
			return None;
		}
		self.items.iter().position(|item| item.claim_type.eq_ignore_ascii_case(claim_type))
	}

	/// Remove the rows at `positions` after checking the remaining rows.
	fn remove_at(&mut self, positions: &[usize]) -> Result<(), ConfigError> {
		if let Some(identity) = positions
			.iter()
			.map(|&position| &self.items[position])
			.find(|item| self.is_identity_claim_type(&item.claim_type))
		{
			return Err(ConfigError::new(
				ConfigRule::IdentityRowRemoval,
				"claim_type",
				identity.claim_type.clone(),
			));
		}

		let rows: Vec<ClaimTypeConfig> = self
			.items
			.iter()
			.enumerate()
			.filter(|(position, _)| !positions.contains(position))
			.map(|(_, item)| item.clone())
			.collect();
		self.validate_rows(&rows)?;
		self.items = rows;
		Ok(())
	}

	/// Check `rows` as a complete collection. Regular rows are added before
	/// additional search attributes so the outcome does not depend on order.
	fn validate_rows(&self, rows: &[ClaimTypeConfig]) -> Result<(), ConfigError> {
		let mut scratch = Self {
			identity_claim_type: self.identity_claim_type.clone(),
			items: Vec::with_capacity(rows.len()),
		};
		let regular = rows.iter().filter(|item| !item.is_additional_search_attribute);
		let additional = rows.iter().filter(|item| item.is_additional_search_attribute);
		for item in regular.chain(additional) {
			scratch.add(item.clone())?;
		}
		Ok(())
	}

	/// Check whether `item` can be added to the current rows.
	fn check(&self, item: &ClaimTypeConfig) -> Result<(), ConfigError> {
		if item.directory_object_attribute.trim().is_empty() {
			return Err(ConfigError::new(
				ConfigRule::MissingDirectoryObject,
				"directory_object_attribute",
				item.directory_object_attribute.clone(),
			));
		}
		if item.directory_object_class.trim().is_empty() {
			return Err(ConfigError::new(
				ConfigRule::MissingDirectoryObject,
				"directory_object_class",
				item.directory_object_class.clone(),
			));
		}

		if item.is_additional_search_attribute && item.has_claim_type() {
			return Err(ConfigError::new(
				ConfigRule::AdditionalAttributeWithClaimType,
				"claim_type",
				item.claim_type.clone(),
			));
		}
		if !item.is_additional_search_attribute
			&& !item.has_claim_type()
			&& item.metadata_key().is_none()
		{
			return Err(ConfigError::new(
				ConfigRule::MissingClaimTypeAndMetadata,
				"entity_metadata_key",
				"",
			));
		}

		if let Some(key) = item.metadata_key() {
			if self.items.iter().any(|existing| {
				existing.directory_object_type == item.directory_object_type
					&& existing.metadata_key().is_some_and(|other| other.eq_ignore_ascii_case(key))
			}) {
				return Err(ConfigError::new(
					ConfigRule::DuplicateMetadataKey,
					"entity_metadata_key",
					key,
				));
			}
		}

		if item.has_claim_type() && self.position(&item.claim_type).is_some() {
			return Err(ConfigError::new(
				ConfigRule::DuplicateClaimType,
				"claim_type",
				item.claim_type.clone(),
			));
		}

		if let Some(keyword) = item.bypass_keyword() {
			if self.items.iter().any(|existing| {
				existing.bypass_keyword().is_some_and(|other| other.eq_ignore_ascii_case(keyword))
			}) {
				return Err(ConfigError::new(
					ConfigRule::DuplicateBypassKeyword,
					"leading_keyword_to_bypass_directory",
					keyword,
				));
			}
		}

		if self.items.iter().any(|existing| existing.same_directory_object(item)) {
			return Err(ConfigError::new(
				ConfigRule::DuplicateDirectoryObject,
				"directory_object_attribute",
				item.directory_object_attribute.clone(),
			));
		}

		if item.directory_object_type == DirectoryObjectType::Group
			&& item.is_identifier()
			&& self.items.iter().any(|existing| {
				existing.directory_object_type == DirectoryObjectType::Group
					&& existing.is_identifier()
			}) {
			return Err(ConfigError::new(
				ConfigRule::DuplicateGroupIdentifier,
				"claim_type",
				item.claim_type.clone(),
			));
		}

		if item.is_additional_search_attribute
			&& !self.items.iter().any(|existing| {
				existing.directory_object_type == item.directory_object_type
					&& existing.has_claim_type()
			}) {
			return Err(ConfigError::new(
				ConfigRule::MissingBaseIdentifier,
				"directory_object_type",
				format!("{:?}", item.directory_object_type),
			));
		}

		if self.is_identity_claim_type(&item.claim_type)
			&& item.directory_object_type != DirectoryObjectType::User
		{
			return Err(ConfigError::new(
				ConfigRule::IdentityClaimType,
				"directory_object_type",
				format!("{:?}", item.directory_object_type),
			));
		}

		Ok(())
	}
}

impl<'a> IntoIterator for &'a ClaimTypeConfigCollection {
	type Item = &'a ClaimTypeConfig;
	type IntoIter = std::slice::Iter<'a, ClaimTypeConfig>;

	fn into_iter(self) -> Self::IntoIter {
		self.iter()
	}
}
