//! Entry points of the host framework.
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::{
	augment::{AugmentationEngine, DomainMembership},
	cache::ConfigurationCache,
	context::{OperationContext, SearchRequest},
	directory::Directory,
	entity::{Claim, ResolvedEntity},
	error::Error,
	query::EntityQueryEngine,
};

/// Answers search, validation and augmentation requests with the live
/// settings of a [`ConfigurationCache`].
///
/// Every request works on the snapshot of the settings current when it
/// started. Directory failures never fail a request, they only reduce its
/// results.
#[derive(Debug, Clone)]
pub struct ClaimsProvider {
	/// The live settings
	configuration: Arc<ConfigurationCache>,
	/// Search and validation
	query: EntityQueryEngine,
	/// Group membership
	augmentation: AugmentationEngine,
}

impl ClaimsProvider {
	/// Create a provider answering from `configuration` through `directory`.
	#[must_use]
	pub fn new(configuration: Arc<ConfigurationCache>, directory: Arc<dyn Directory>) -> Self {
		Self {
			configuration,
			query: EntityQueryEngine::new(Arc::clone(&directory)),
			augmentation: AugmentationEngine::new(directory),
		}
	}

	/// Use the host's `membership` helper for connections configured to.
	#[must_use]
	pub fn with_domain_membership(mut self, membership: Arc<dyn DomainMembership>) -> Self {
		self.augmentation = self.augmentation.with_domain_membership(membership);
		self
	}

	/// The live settings.
	#[must_use]
	pub fn configuration(&self) -> &ConfigurationCache {
		&self.configuration
	}

	/// Entities matching a type-ahead search.
	pub async fn search(&self, request: &SearchRequest) -> Result<Vec<ResolvedEntity>, Error> {
		let settings = self.configuration.current().await?;
		let context = OperationContext::for_search(settings, request);
		Ok(self.query.search(&context).await)
	}

	/// The entity identified by `claim`, if exactly one exists. Claims of a
	/// type no row maps resolve to nothing.
	pub async fn validate(
		&self,
		claim: &Claim,
		context: Option<Url>,
	) -> Result<Option<ResolvedEntity>, Error> {
		let settings = self.configuration.current().await?;
		let context = match OperationContext::for_validate(settings, claim, context) {
			Ok(context) => context,
			Err(Error::NoMatchingConfiguration(claim_type)) => {
				debug!(claim_type = %claim_type, "No configuration maps the claim type");
				return Ok(None);
			}
			Err(err) => return Err(err),
		};
		Ok(self.query.validate(&context).await)
	}

	/// Group claims of the user identified by `claim`.
	pub async fn augment(&self, claim: &Claim, context: Option<Url>) -> Result<Vec<Claim>, Error> {
		let settings = self.configuration.current().await?;
		let context = OperationContext::for_augment(settings, claim, context);
		Ok(self.augmentation.augment(&context).await)
	}
}
