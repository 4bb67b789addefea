//! Search and validation of entities across all directory connections.
use std::{collections::BTreeMap, sync::Arc};

use ldap3::SearchEntry;
use tracing::{debug, error};

use crate::{
	claim_type::{has_domain_token, metadata, replace_domain_tokens, ClaimTypeConfig},
	context::{strip_prefix_ignore_case, OperationContext, OperationKind},
	directory::{fan_out, Directory, DirectoryQuery, DomainInfo},
	entity::{deduplicate, Claim, ResolvedEntity},
	entry::SearchEntryExt,
	error::Error,
	filter::{config_filter, connection_filter, restrictions, MatchMode, ObjectFilters},
};

/// Resolves the input of a search or validation to entities.
#[derive(Debug, Clone)]
pub struct EntityQueryEngine {
	/// The directory layer
	directory: Arc<dyn Directory>,
}

impl EntityQueryEngine {
	/// Create an engine querying through `directory`.
	#[must_use]
	pub fn new(directory: Arc<dyn Directory>) -> Self {
		Self { directory }
	}

	/// Entities matching the input of a search, at most
	/// [`OperationContext::max_results`] of them.
	pub async fn search(&self, context: &OperationContext) -> Vec<ResolvedEntity> {
		let mut entities = self.resolve(context).await;
		entities.truncate(context.max_results());
		entities
	}

	/// The single entity identified by the claim being validated. Returns
	/// `None` if no entity, or more than one, matches.
	pub async fn validate(&self, context: &OperationContext) -> Option<ResolvedEntity> {
		let incoming = context.incoming_claim()?;
		let value = incoming.value.trim();
		let mut entities: Vec<ResolvedEntity> = self
			.resolve(context)
			.await
			.into_iter()
			.filter(|entity| {
				entity.connection_id.is_none() || entity.claim.value.eq_ignore_ascii_case(value)
			})
			.collect();

		if entities.len() > 1 {
			error!(
				claim_type = %incoming.claim_type,
				value = %incoming.value,
				matches = entities.len(),
				"Validation found more than one entity, check the configuration and directory data"
			);
			return None;
		}
		entities.pop()
	}

	/// Deduplicated entities for the input of `context`.
	async fn resolve(&self, context: &OperationContext) -> Vec<ResolvedEntity> {
		if context.configs().is_empty() {
			return Vec::new();
		}

		if context.settings().always_resolve_user_input {
			let value = match context.kind() {
				OperationKind::Validate => context.raw_input(),
				_ => context.input(),
			};
			debug!(input = value, "Resolving input without directory lookup");
			return context
				.configs()
				.iter()
				.filter(|config| config.is_identifier())
				.map(|config| ResolvedEntity::from_input(config, value))
				.collect();
		}

		let bypassed = bypass_directory(context);
		if !bypassed.is_empty() {
			debug!(input = context.raw_input(), "Bypassing directory lookup");
			return bypassed;
		}

		deduplicate(self.query_directories(context).await)
	}

	/// Query every connection and turn the results into entities.
	async fn query_directories(&self, context: &OperationContext) -> Vec<ResolvedEntity> {
		let needs_domain = needs_domain(context);
		let outcomes =
			fan_out(context.connections().iter().cloned(), context.settings().timeout, |connection| {
				let directory = Arc::clone(&self.directory);
				let queries = build_queries(context, connection.additional_filter.as_deref());
				async move {
					let mut answers = Vec::with_capacity(queries.len());
					for (rows, query) in queries {
						answers.push((rows, directory.execute_query(&connection, &query).await?));
					}
					let domain = if needs_domain {
						Some(connection.domain_info(directory.as_ref()).await?.clone())
					} else {
						None
					};
					Ok::<_, Error>((answers, domain))
				}
			})
			.await;

		let mut entities = Vec::new();
		for (connection_id, (answers, domain)) in outcomes {
			for (rows, entries) in answers {
				debug!(connection = %connection_id, entries = entries.len(), "Directory answered");
				let configs: Vec<&ClaimTypeConfig> =
					rows.iter().filter_map(|&index| context.configs().get(index)).collect();
				for entry in &entries {
					entities.extend(entities_from_entry(
						context,
						&configs,
						entry,
						&connection_id,
						domain.as_ref(),
					));
				}
			}
		}
		entities
	}
}

/// Entities for rows whose bypass keyword starts the input. Searches check
/// every row, validations only the row of the claim type.
fn bypass_directory(context: &OperationContext) -> Vec<ResolvedEntity> {
	let input = context.raw_input().trim();
	context
		.configs()
		.iter()
		.filter(|config| config.is_identifier())
		.filter_map(|config| {
			let remainder = strip_prefix_ignore_case(input, config.bypass_keyword()?)?;
			(!remainder.is_empty()).then(|| ResolvedEntity::from_input(config, remainder))
		})
		.collect()
}

/// Whether building entities requires the domain of the connection.
fn needs_domain(context: &OperationContext) -> bool {
	let settings = context.settings();
	settings.entity_display_text_prefix.as_deref().is_some_and(has_domain_token)
		|| settings.claim_types.iter().any(|config| {
			config.is_identifier()
				&& context.entity_types().contains(config.directory_object_type)
				&& config.leading_token_has_domain()
		})
}

/// How values of `config` are matched against the input.
fn match_mode(context: &OperationContext, config: &ClaimTypeConfig) -> MatchMode {
	if context.exact_match() || !config.directory_object_attribute_supports_wildcard {
		MatchMode::Exact
	} else if context.settings().add_wildcard_as_prefix_of_input {
		MatchMode::Contains
	} else {
		MatchMode::StartsWith
	}
}

/// The queries to run on a connection with the given connection filter.
///
/// Rows sharing the same restrictions share a query, so every entry a query
/// returns satisfies the restrictions of all rows it covers. Each query comes
/// with the indices of its rows in [`OperationContext::configs`].
fn build_queries(
	context: &OperationContext,
	additional_filter: Option<&str>,
) -> Vec<(Vec<usize>, DirectoryQuery)> {
	let settings = context.settings();
	let object_filters = ObjectFilters {
		enabled_users_only: settings.filter_enabled_users_only,
		security_groups_only: settings.filter_security_groups_only,
	};

	let mut groups: Vec<(Vec<String>, Vec<usize>)> = Vec::new();
	for (index, config) in context.configs().iter().enumerate() {
		let key = restrictions(config, object_filters);
		match groups.iter_mut().find(|(existing, _)| *existing == key) {
			Some((_, rows)) => rows.push(index),
			None => groups.push((key, vec![index])),
		}
	}

	groups
		.into_iter()
		.map(|(_, rows)| {
			let filters: Vec<String> = rows
				.iter()
				.filter_map(|&index| context.configs().get(index))
				.map(|config| {
					config_filter(config, context.input(), match_mode(context, config), object_filters)
				})
				.collect();
			let mut query = DirectoryQuery::subtree(
				connection_filter(&filters, additional_filter),
				attributes_to_load(context),
			);
			if context.kind() == OperationKind::Search {
				query.size_limit = i32::try_from(context.max_results()).ok();
			}
			(rows, query)
		})
		.collect()
}

/// Every attribute needed to match entries and build entities.
fn attributes_to_load(context: &OperationContext) -> Vec<String> {
	let claim_types = &context.settings().claim_types;
	let mut attributes: Vec<String> = vec!["objectClass".to_owned()];
	let mut add = |attribute: &str| {
		if !attributes.iter().any(|existing| existing.eq_ignore_ascii_case(attribute)) {
			attributes.push(attribute.to_owned());
		}
	};

	for config in context.configs() {
		let object_type = config.directory_object_type;
		add(&config.directory_object_attribute);
		if let Some(identifier) = claim_types.identifier_config(object_type) {
			add(&identifier.directory_object_attribute);
			if let Some(display) = identifier.display_text_attribute() {
				add(display);
			}
		}
		if let Some(display) = config.display_text_attribute() {
			add(display);
		}
		for row in claim_types.metadata_configs_for(object_type) {
			add(&row.directory_object_attribute);
		}
	}
	attributes
}

/// Entities for the rows among `configs` that `entry` matches. The entry must
/// come from the query of these rows, which already checked their
/// restrictions.
fn entities_from_entry(
	context: &OperationContext,
	configs: &[&ClaimTypeConfig],
	entry: &SearchEntry,
	connection_id: &str,
	domain: Option<&DomainInfo>,
) -> Vec<ResolvedEntity> {
	let claim_types = &context.settings().claim_types;
	let mut entities = Vec::new();

	for &config in configs {
		if !entry.has_object_class(&config.directory_object_class) {
			continue;
		}
		let mode = match_mode(context, config);
		let Some(matched) = entry
			.attr_values(&config.directory_object_attribute)
			.iter()
			.find(|value| mode.matches(value, context.input()))
		else {
			continue;
		};

		// A match on an additional attribute yields the identifier of the entry
		let (identifier, raw_value) = if config.is_additional_search_attribute {
			let Some(identifier) = claim_types.identifier_config(config.directory_object_type) else {
				continue;
			};
			let Some(value) = entry.attr_first(&identifier.directory_object_attribute) else {
				continue;
			};
			(identifier, value)
		} else if config.has_claim_type() {
			(config, matched.as_str())
		} else {
			continue;
		};

		entities.push(build_entity(context, identifier, raw_value, entry, connection_id, domain));
	}
	entities
}

/// Compose the entity for `raw_value` of `config` found in `entry`.
fn build_entity(
	context: &OperationContext,
	config: &ClaimTypeConfig,
	raw_value: &str,
	entry: &SearchEntry,
	connection_id: &str,
	domain: Option<&DomainInfo>,
) -> ResolvedEntity {
	let resolve_tokens = |value: &str| match domain {
		Some(domain) => replace_domain_tokens(value, &domain.domain_name, &domain.domain_fqdn),
		None => value.to_owned(),
	};

	let claim_value = match config.leading_token() {
		Some(token) => format!("{}{raw_value}", resolve_tokens(token)),
		None => raw_value.to_owned(),
	};

	let entity_metadata: BTreeMap<String, String> = context
		.settings()
		.claim_types
		.metadata_configs_for(config.directory_object_type)
		.filter_map(|row| {
			let value = entry.attr_first(&row.directory_object_attribute)?;
			Some((row.metadata_key()?.to_owned(), value.to_owned()))
		})
		.collect();

	let label = config
		.display_text_attribute()
		.and_then(|attribute| entry.attr_first(attribute))
		.or_else(|| entity_metadata.get(metadata::DISPLAY_NAME).map(String::as_str))
		.unwrap_or(&claim_value)
		.to_owned();
	let display_text = match context.settings().entity_display_text_prefix.as_deref() {
		Some(prefix) => format!("{}{label}", resolve_tokens(prefix)),
		None => label,
	};

	ResolvedEntity {
		config: config.clone(),
		raw_value: raw_value.to_owned(),
		claim: Claim::new(&config.claim_type, &claim_value),
		display_text,
		metadata: entity_metadata,
		domain: domain.cloned(),
		connection_id: Some(connection_id.to_owned()),
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used)]

	use std::{collections::HashMap, sync::Arc};

	use ldap3::SearchEntry;

	use super::{attributes_to_load, build_queries, bypass_directory, entities_from_entry};
	use crate::{
		claim_type::{claim_types, metadata, ClaimTypeConfig, DirectoryObjectType},
		config::{default_upn_settings, ProviderSettings},
		context::{OperationContext, SearchRequest},
		directory::DomainInfo,
		entity::Claim,
	};

	fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
		SearchEntry {
			dn: dn.to_owned(),
			attrs: attrs
				.iter()
				.map(|(name, values)| {
					((*name).to_owned(), values.iter().map(|value| (*value).to_owned()).collect())
				})
				.collect(),
			bin_attrs: HashMap::new(),
		}
	}

	fn search(settings: ProviderSettings, input: &str) -> OperationContext {
		OperationContext::for_search(
			Arc::new(settings),
			&SearchRequest { input: input.to_owned(), ..SearchRequest::default() },
		)
	}

	#[test]
	fn search_query_escapes_input() {
		let context = search(default_upn_settings().unwrap(), "a(b");
		let queries = build_queries(&context, Some("(department=IT)"));
		assert_eq!(queries.len(), 1);
		let (rows, query) = &queries[0];
		assert_eq!(rows.len(), context.configs().len());
		assert!(query.filter.starts_with("(&(|"));
		assert!(query.filter.contains("(userPrincipalName=a\\28b*)"));
		assert!(query.filter.ends_with("(department=IT))"));
		assert_eq!(query.size_limit, Some(30));
	}

	#[test]
	fn validate_query_is_exact() {
		let settings = Arc::new(default_upn_settings().unwrap());
		let claim = Claim::new(claim_types::UPN, "alice*");
		let context = OperationContext::for_validate(settings, &claim, None).unwrap();
		let queries = build_queries(&context, None);
		let (rows, query) = &queries[0];
		assert_eq!(rows, &vec![0]);
		assert_eq!(query.filter, "(&(objectClass=user)(userPrincipalName=alice\\2a))");
		assert_eq!(query.size_limit, None);
	}

	#[test]
	fn rows_with_other_restrictions_get_their_own_query() {
		let mut settings = default_upn_settings().unwrap();
		let mut email = settings.claim_types.by_claim_type(claim_types::EMAIL).unwrap().clone();
		email.directory_object_additional_filter = Some("department=IT".to_owned());
		settings.claim_types.update(claim_types::EMAIL, email).unwrap();
		settings.filter_security_groups_only = true;

		let context = search(settings, "bo");
		let queries = build_queries(&context, None);
		let row_of = |index: usize| &context.configs()[index];

		let email_query = queries
			.iter()
			.find(|(rows, _)| rows.iter().any(|&index| row_of(index).claim_type == claim_types::EMAIL))
			.unwrap();
		assert_eq!(email_query.0.len(), 1);
		assert!(email_query.1.filter.contains("(department=IT)"));

		let group_query = queries
			.iter()
			.find(|(rows, _)| rows.iter().any(|&index| row_of(index).claim_type == claim_types::ROLE))
			.unwrap();
		assert!(group_query
			.0
			.iter()
			.all(|&index| row_of(index).directory_object_type == DirectoryObjectType::Group));
		assert!(!group_query.1.filter.contains("(department=IT)"));

		let other_query = queries
			.iter()
			.find(|(rows, _)| rows.iter().any(|&index| row_of(index).claim_type == claim_types::UPN))
			.unwrap();
		assert!(!other_query.1.filter.contains("(department=IT)"));
		assert_eq!(queries.len(), 3);
	}

	#[test]
	fn attributes_include_identifier_and_metadata() {
		let context = search(default_upn_settings().unwrap(), "al");
		let attributes = attributes_to_load(&context);
		for attribute in ["objectClass", "userPrincipalName", "displayName", "mail", "title", "sAMAccountName"] {
			assert!(attributes.iter().any(|a| a == attribute), "{attribute} missing");
		}
		assert_eq!(attributes.iter().filter(|a| *a == "displayName").count(), 1);
	}

	#[test]
	fn additional_attribute_match_yields_identifier() {
		let context = search(default_upn_settings().unwrap(), "ali");
		let alice = entry(
			"cn=alice,dc=contoso,dc=local",
			&[
				("objectClass", &["top", "user"]),
				("userPrincipalName", &["alice@contoso.local"]),
				("displayName", &["Alice Smith"]),
				("title", &["Engineer"]),
			],
		);
		let configs: Vec<&ClaimTypeConfig> = context.configs().iter().collect();
		let entities = entities_from_entry(&context, &configs, &alice, "dc1", None);
		// userPrincipalName and displayName both match
		assert_eq!(entities.len(), 2);
		for entity in &entities {
			assert_eq!(entity.claim, Claim::new(claim_types::UPN, "alice@contoso.local"));
			assert_eq!(entity.display_text, "Alice Smith");
			assert_eq!(entity.metadata.get(metadata::JOB_TITLE).unwrap(), "Engineer");
			assert_eq!(entity.connection_id.as_deref(), Some("dc1"));
		}

		let bob = entry(
			"cn=bob,dc=contoso,dc=local",
			&[("objectClass", &["user"]), ("userPrincipalName", &["bob@contoso.local"])],
		);
		assert!(entities_from_entry(&context, &configs, &bob, "dc1", None).is_empty());
	}

	#[test]
	fn group_claim_value_gets_domain() {
		let context = search(default_upn_settings().unwrap(), "adm");
		let admins = entry(
			"cn=Admins,dc=contoso,dc=local",
			&[("objectClass", &["group"]), ("sAMAccountName", &["Admins"])],
		);
		let domain = DomainInfo::from_distinguished_name("DC=contoso,DC=local");
		let configs: Vec<&ClaimTypeConfig> = context.configs().iter().collect();
		let entities = entities_from_entry(&context, &configs, &admins, "dc1", Some(&domain));
		assert_eq!(entities.len(), 1);
		assert_eq!(entities[0].claim.value, "contoso\\Admins");
		assert_eq!(entities[0].raw_value, "Admins");
		assert_eq!(entities[0].domain.as_ref(), Some(&domain));
	}

	#[test]
	fn bypass_keyword() {
		let mut settings = default_upn_settings().unwrap();
		let mut email = settings.claim_types.by_claim_type(claim_types::EMAIL).unwrap().clone();
		email.leading_keyword_to_bypass_directory = Some("email:".to_owned());
		settings.claim_types.update(claim_types::EMAIL, email).unwrap();

		let entities = bypass_directory(&search(settings.clone(), "email:bob@fabrikam.com"));
		assert_eq!(entities.len(), 1);
		assert_eq!(entities[0].claim, Claim::new(claim_types::EMAIL, "bob@fabrikam.com"));

		let entities = bypass_directory(&search(settings.clone(), "EMAIL:bob@fabrikam.com"));
		assert_eq!(entities.len(), 1);
		assert_eq!(entities[0].claim, Claim::new(claim_types::EMAIL, "bob@fabrikam.com"));

		assert!(bypass_directory(&search(settings.clone(), "email:")).is_empty());
		assert!(bypass_directory(&search(settings, "bob")).is_empty());
	}
}
