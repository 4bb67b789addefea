//! Resolve users and groups in one or more LDAP directories and turn them
//! into identity claims.
//!
//! The library answers three kinds of requests on behalf of an identity
//! federation host:
//! * **search**: type-ahead lookup of users and groups matching some input
//! * **validate**: resolve one known claim to exactly one entity
//! * **augment**: list the group claims of a validated user
//!
//! Which directory attributes back which claim types is described by a
//! [`ClaimTypeConfigCollection`], which refuses any edit that would leave it
//! inconsistent. Every request queries all configured
//! [`DirectoryConnection`]s in parallel, each bounded by a timeout, and
//! merges the results. A directory that fails or does not answer in time is
//! skipped and logged, it never fails the request.
//!
//! For a general primer on LDAP, the [introduction] in the `ldap3` crate which
//! is used here for interfacing with LDAP is an excellent resource.
//!
//! [introduction]: https://github.com/inejge/ldap3/blob/master/LDAP-primer.md
//!
//! # Getting started
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use ldap_claims::{
//!     claim_type::claim_types, default_upn_settings, Claim, ClaimsProvider,
//!     ConfigurationCache, DirectoryConnection, InMemoryStore, LdapDirectory, SearchRequest,
//! };
//! use url::Url;
//!
//! let mut connection =
//!     DirectoryConnection::new("contoso", Url::parse("ldap://dc.contoso.local")?);
//! connection.search_user = "cn=reader,dc=contoso,dc=local".to_owned();
//! connection.search_password = "verysecret".to_owned();
//!
//! let mut settings = default_upn_settings()?;
//! settings.connections.push(connection);
//!
//! let store = Arc::new(InMemoryStore::new());
//! store.insert("ldap", settings).await;
//! let cache = Arc::new(ConfigurationCache::init(store, "ldap").await?);
//! let provider = ClaimsProvider::new(cache, Arc::new(LdapDirectory));
//!
//! let request = SearchRequest { input: "ali".to_owned(), ..Default::default() };
//! for entity in provider.search(&request).await? {
//!     println!("{}: {}", entity.display_text, entity.claim.value);
//! }
//!
//! let claim = Claim::new(claim_types::UPN, "alice@contoso.local");
//! if provider.validate(&claim, None).await?.is_some() {
//!     println!("Groups: {:?}", provider.augment(&claim, None).await?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Limitations
//! * Every query opens and binds a new connection; connections are not
//!   pooled.
//! * [secrecy](https://docs.rs/secrecy) is not used for storing the search user
//!   password, it probably should be
//! * Nested group membership is not followed.

pub mod augment;
pub mod cache;
pub mod claim_type;
pub mod collection;
pub mod config;
pub mod context;
pub mod directory;
pub mod entity;
pub mod entry;
pub mod error;
pub mod filter;
pub mod provider;
pub mod query;

pub use ldap3::{self, SearchEntry};

pub use crate::{
	augment::{AugmentationEngine, DomainMembership},
	cache::{ConfigurationCache, ConfigurationStore, InMemoryStore},
	claim_type::{default_claim_types, ClaimTypeConfig, DirectoryObjectType},
	collection::ClaimTypeConfigCollection,
	config::{
		default_settings, default_upn_settings, ConnectionConfig, DirectoryConnection,
		MembershipStrategy, ProviderSettings, TLSConfig,
	},
	context::{EntityTypes, OperationContext, OperationKind, SearchRequest},
	directory::{Directory, DirectoryQuery, DomainInfo, LdapDirectory},
	entity::{Claim, ResolvedEntity},
	entry::SearchEntryExt,
	error::{ConfigError, ConfigRule, Error},
	provider::ClaimsProvider,
	query::EntityQueryEngine,
};
