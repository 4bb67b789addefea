//! Group membership of validated users.
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
	claim_type::{has_domain_token, replace_domain_tokens, ClaimTypeConfig},
	config::{DirectoryConnection, MembershipStrategy},
	context::OperationContext,
	directory::{fan_out, Directory, DirectoryQuery},
	entity::Claim,
	entry::{first_rdn_attribute, first_rdn_value, SearchEntryExt},
	error::Error,
	filter::{and, attribute_match, connection_filter, MatchMode},
};

/// The host platform's own way of listing the groups of a domain user.
#[async_trait]
pub trait DomainMembership: Send + Sync + std::fmt::Debug {
	/// Values of the group identifier attribute of every group `user` is a
	/// member of in the domain behind `connection`.
	async fn groups_of(
		&self,
		connection: &DirectoryConnection,
		user: &str,
	) -> Result<Vec<String>, Error>;
}

/// Resolves the groups a user is a member of.
#[derive(Debug, Clone)]
pub struct AugmentationEngine {
	/// The directory layer
	directory: Arc<dyn Directory>,
	/// The host's membership helper, if available
	membership: Option<Arc<dyn DomainMembership>>,
}

impl AugmentationEngine {
	/// Create an engine querying through `directory`.
	#[must_use]
	pub fn new(directory: Arc<dyn Directory>) -> Self {
		Self { directory, membership: None }
	}

	/// Use `membership` for connections resolving membership through the
	/// host.
	#[must_use]
	pub fn with_domain_membership(mut self, membership: Arc<dyn DomainMembership>) -> Self {
		self.membership = Some(membership);
		self
	}

	/// Group claims of the user identified by the claim of `context`.
	pub async fn augment(&self, context: &OperationContext) -> Vec<Claim> {
		let settings = context.settings();
		if !settings.enable_augmentation {
			debug!("Augmentation is disabled");
			return Vec::new();
		}
		let Some(user_config) = context.configs().first().cloned() else {
			debug!(
				claim_type = ?context.incoming_claim().map(|claim| &claim.claim_type),
				"No user row maps the claim type, nothing to augment"
			);
			return Vec::new();
		};
		let Some(group_config) = settings.claim_types.group_identifier_config().cloned() else {
			warn!("Cannot augment without a group identifier");
			return Vec::new();
		};
		let user = context.input().to_owned();

		let connections = context.connections().iter().filter(|connection| {
			if !connection.enable_augmentation {
				debug!(connection = %connection.id, "Augmentation disabled for connection");
			}
			connection.enable_augmentation
		});
		let outcomes = fan_out(connections.cloned(), settings.timeout, |connection| {
			let directory = Arc::clone(&self.directory);
			let membership = self.membership.clone();
			let (user_config, group_config, user) = (user_config.clone(), group_config.clone(), user.clone());
			async move {
				let groups = match (connection.membership_strategy, membership) {
					(MembershipStrategy::NativeDomainHelper, Some(membership)) => {
						membership.groups_of(&connection, &user).await?
					}
					(strategy, _) => {
						if strategy == MembershipStrategy::NativeDomainHelper {
							debug!(
								connection = %connection.id,
								"No domain membership helper, following membership attributes"
							);
						}
						groups_from_attributes(directory.as_ref(), &connection, &user_config, &group_config, &user)
							.await?
					}
				};

				let token = match group_config.leading_token() {
					Some(token) if has_domain_token(token) => {
						let domain = connection.domain_info(directory.as_ref()).await?;
						replace_domain_tokens(token, &domain.domain_name, &domain.domain_fqdn)
					}
					Some(token) => token.to_owned(),
					None => String::new(),
				};
				Ok::<_, Error>(
					groups
						.into_iter()
						.map(|group| Claim::new(&group_config.claim_type, &format!("{token}{group}")))
						.collect::<Vec<_>>(),
				)
			}
		})
		.await;

		let mut claims: Vec<Claim> = Vec::new();
		for (connection_id, groups) in outcomes {
			debug!(connection = %connection_id, groups = groups.len(), "Resolved group membership");
			for claim in groups {
				if !claims.iter().any(|existing| existing.value.eq_ignore_ascii_case(&claim.value)) {
					claims.push(claim);
				}
			}
		}
		claims
	}
}

/// Groups of `user` found through the membership attributes of its entry.
/// Group DNs whose RDN is the group identifier attribute are used as is,
/// others are looked up once each.
async fn groups_from_attributes(
	directory: &dyn Directory,
	connection: &DirectoryConnection,
	user_config: &ClaimTypeConfig,
	group_config: &ClaimTypeConfig,
	user: &str,
) -> Result<Vec<String>, Error> {
	let user_filter = and(&[
		format!("(objectClass={})", user_config.directory_object_class),
		attribute_match(&user_config.directory_object_attribute, user, MatchMode::Exact),
	]);
	let query = DirectoryQuery::subtree(
		connection_filter(&[user_filter], connection.additional_filter.as_deref()),
		connection.membership_attributes.clone(),
	);
	let entries = directory.execute_query(connection, &query).await?;
	let entry = match entries.as_slice() {
		[] => return Ok(Vec::new()),
		[entry] => entry,
		_ => {
			warn!(connection = %connection.id, user, "User matches more than one entry");
			return Ok(Vec::new());
		}
	};

	let group_attribute = &group_config.directory_object_attribute;
	let mut groups = Vec::new();
	for dn in connection.membership_attributes.iter().flat_map(|attribute| entry.attr_values(attribute)) {
		if first_rdn_attribute(dn).is_some_and(|attribute| attribute.eq_ignore_ascii_case(group_attribute)) {
			groups.extend(first_rdn_value(dn));
			continue;
		}

		let lookup = DirectoryQuery::entry(dn, vec![group_attribute.clone()]);
		match directory.execute_query(connection, &lookup).await {
			Ok(entries) => {
				groups.extend(
					entries.first().and_then(|group| group.attr_first(group_attribute)).map(str::to_owned),
				);
			}
			Err(err) => warn!(connection = %connection.id, dn = %dn, "Could not resolve group: {err}"),
		}
	}
	Ok(groups)
}
