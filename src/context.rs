//! Per-request view of the settings.
use std::sync::Arc;

use url::Url;

use crate::{
	claim_type::{has_domain_token, ClaimTypeConfig, DirectoryObjectType, DOMAIN_FQDN_TOKEN, DOMAIN_NAME_TOKEN},
	config::{DirectoryConnection, ProviderSettings},
	entity::Claim,
	error::Error,
};

/// The kind of operation the host requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
	/// Type-ahead lookup
	Search,
	/// Resolve one known identifier to exactly one entity
	Validate,
	/// Add the group memberships of a validated user
	Augment,
}

/// The kinds of entities a request is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTypes {
	/// Include users
	pub users: bool,
	/// Include groups
	pub groups: bool,
}

impl EntityTypes {
	/// Users and groups
	pub const ALL: Self = Self { users: true, groups: true };
	/// Users only
	pub const USERS: Self = Self { users: true, groups: false };
	/// Groups only
	pub const GROUPS: Self = Self { users: false, groups: true };

	/// Whether entities of `object_type` are included.
	#[must_use]
	pub fn contains(self, object_type: DirectoryObjectType) -> bool {
		match object_type {
			DirectoryObjectType::User => self.users,
			DirectoryObjectType::Group => self.groups,
		}
	}
}

impl Default for EntityTypes {
	fn default() -> Self {
		Self::ALL
	}
}

/// A type-ahead search as delivered by the host.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
	/// What the user typed
	pub input: String,
	/// The kinds of entities to return
	pub entity_types: EntityTypes,
	/// Restrict the search to the claim type of this hierarchy node
	pub hierarchy_node: Option<String>,
	/// Maximum number of entities to return, the settings decide if unset
	pub max_results: Option<usize>,
	/// The site the request was made from
	pub context: Option<Url>,
}

/// Everything the engines need to serve one request. Built once per request
/// and not changed afterwards.
#[derive(Debug, Clone)]
pub struct OperationContext {
	/// The kind of operation
	kind: OperationKind,
	/// The input as received
	raw_input: String,
	/// The input to query the directories with
	input: String,
	/// Whether attribute values must equal the input
	exact_match: bool,
	/// Rows relevant to the request
	configs: Vec<ClaimTypeConfig>,
	/// Request-owned copies of the connections
	connections: Vec<DirectoryConnection>,
	/// The settings the context was built from
	settings: Arc<ProviderSettings>,
	/// The claim being validated or augmented
	incoming_claim: Option<Claim>,
	/// The site the request was made from
	context: Option<Url>,
	/// The kinds of entities the request is interested in
	entity_types: EntityTypes,
	/// Maximum number of entities to return
	max_results: usize,
}

impl OperationContext {
	/// Shared part of the constructors.
	fn new(settings: Arc<ProviderSettings>, kind: OperationKind, raw_input: &str) -> Self {
		// Owned copies, so a request can adjust its connections without
		// affecting requests running at the same time.
		let connections = settings.connections.clone();
		Self {
			kind,
			raw_input: raw_input.to_owned(),
			input: raw_input.trim().to_owned(),
			exact_match: kind != OperationKind::Search || settings.filter_exact_match_only,
			configs: Vec::new(),
			connections,
			incoming_claim: None,
			context: None,
			entity_types: EntityTypes::ALL,
			max_results: settings.max_search_results,
			settings,
		}
	}

	/// Context of a type-ahead search.
	#[must_use]
	pub fn for_search(settings: Arc<ProviderSettings>, request: &SearchRequest) -> Self {
		let mut context = Self::new(settings, OperationKind::Search, &request.input);
		context.configs = context
			.settings
			.claim_types
			.iter()
			.filter(|config| request.entity_types.contains(config.directory_object_type))
			.filter(|config| match &request.hierarchy_node {
				Some(node) => config.claim_type.eq_ignore_ascii_case(node),
				None => config.has_claim_type() || config.is_additional_search_attribute,
			})
			.cloned()
			.collect();
		context.entity_types = request.entity_types;
		context.context.clone_from(&request.context);
		if let Some(max_results) = request.max_results {
			context.max_results = max_results;
		}
		context
	}

	/// Context of the validation of `claim`. Fails if no row maps the claim
	/// type.
	pub fn for_validate(
		settings: Arc<ProviderSettings>,
		claim: &Claim,
		context: Option<Url>,
	) -> Result<Self, Error> {
		let config = settings
			.claim_types
			.iter()
			.find(|config| {
				config.is_identifier() && config.claim_type.eq_ignore_ascii_case(&claim.claim_type)
			})
			.cloned()
			.ok_or_else(|| Error::NoMatchingConfiguration(claim.claim_type.clone()))?;

		let mut operation = Self::new(settings, OperationKind::Validate, &claim.value);
		if let Some(token) = config.leading_token() {
			operation.input = strip_leading_token(token, operation.input.as_str());
		}
		operation.entity_types = match config.directory_object_type {
			DirectoryObjectType::User => EntityTypes::USERS,
			DirectoryObjectType::Group => EntityTypes::GROUPS,
		};
		operation.configs = vec![config];
		operation.incoming_claim = Some(claim.clone());
		operation.context = context;
		operation.max_results = 1;
		Ok(operation)
	}

	/// Context of the augmentation of the user identified by `claim`. Its only
	/// row is the user row mapping the claim type. Claims of a type no user
	/// row maps get a context without rows.
	#[must_use]
	pub fn for_augment(settings: Arc<ProviderSettings>, claim: &Claim, context: Option<Url>) -> Self {
		let config = settings
			.claim_types
			.iter()
			.find(|config| {
				config.is_identifier()
					&& config.directory_object_type == DirectoryObjectType::User
					&& config.claim_type.eq_ignore_ascii_case(&claim.claim_type)
			})
			.cloned();

		let mut operation = Self::new(settings, OperationKind::Augment, &claim.value);
		if let Some(token) = config.as_ref().and_then(ClaimTypeConfig::leading_token) {
			operation.input = strip_leading_token(token, operation.input.as_str());
		}
		operation.configs = config.into_iter().collect();
		operation.entity_types = EntityTypes::USERS;
		operation.incoming_claim = Some(claim.clone());
		operation.context = context;
		operation
	}

	/// The kind of operation.
	#[must_use]
	pub fn kind(&self) -> OperationKind {
		self.kind
	}

	/// The input as received from the host.
	#[must_use]
	pub fn raw_input(&self) -> &str {
		&self.raw_input
	}

	/// The normalized input used to query the directories.
	#[must_use]
	pub fn input(&self) -> &str {
		&self.input
	}

	/// Whether attribute values must equal the input.
	#[must_use]
	pub fn exact_match(&self) -> bool {
		self.exact_match
	}

	/// Rows relevant to the request.
	#[must_use]
	pub fn configs(&self) -> &[ClaimTypeConfig] {
		&self.configs
	}

	/// The request's copies of the directory connections.
	#[must_use]
	pub fn connections(&self) -> &[DirectoryConnection] {
		&self.connections
	}

	/// The settings the context was built from.
	#[must_use]
	pub fn settings(&self) -> &ProviderSettings {
		&self.settings
	}

	/// The claim being validated or augmented.
	#[must_use]
	pub fn incoming_claim(&self) -> Option<&Claim> {
		self.incoming_claim.as_ref()
	}

	/// The site the request was made from.
	#[must_use]
	pub fn context(&self) -> Option<&Url> {
		self.context.as_ref()
	}

	/// The kinds of entities the request is interested in.
	#[must_use]
	pub fn entity_types(&self) -> EntityTypes {
		self.entity_types
	}

	/// Maximum number of entities to return.
	#[must_use]
	pub fn max_results(&self) -> usize {
		self.max_results
	}
}

/// Strip a case-insensitive prefix.
pub(crate) fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
	value
		.get(..prefix.len())
		.filter(|head| head.eq_ignore_ascii_case(prefix))
		.map(|_| &value[prefix.len()..])
}

/// Remove the leading token from a claim value to get the value stored in the
/// directory. Domain placeholders in the token match any domain, e.g. token
/// `{domain}\` turns `contoso\group1` into `group1`.
#[must_use]
pub fn strip_leading_token(token: &str, value: &str) -> String {
	if !has_domain_token(token) {
		return strip_prefix_ignore_case(value, token).unwrap_or(value).to_owned();
	}

	let placeholders = [DOMAIN_NAME_TOKEN, DOMAIN_FQDN_TOKEN];
	let start = placeholders.iter().filter_map(|placeholder| token.find(placeholder)).min();
	let end = placeholders
		.iter()
		.filter_map(|placeholder| token.rfind(placeholder).map(|index| index + placeholder.len()))
		.max();
	let (Some(start), Some(end)) = (start, end) else {
		return value.to_owned();
	};

	let mut account = strip_prefix_ignore_case(value, &token[..start]).unwrap_or(value);
	let separator = &token[end..];
	if !separator.is_empty() {
		if let Some(index) = account.find(separator) {
			account = &account[index + separator.len()..];
		}
	}
	// Down-level logon names carry the domain in front of a backslash
	match account.rsplit_once('\\') {
		Some((_, name)) if !name.is_empty() => name.to_owned(),
		_ => account.to_owned(),
	}
}
