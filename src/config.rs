//! Settings of the claims provider and its directory connections.
use std::{collections::HashSet, path::PathBuf, sync::Arc, time::Duration};

use ldap3::LdapConnSettings;
use rustls::{Certificate, ClientConfig, PrivateKey, RootCertStore};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use url::Url;

use crate::{
	claim_type::claim_types,
	collection::ClaimTypeConfigCollection,
	directory::DomainInfo,
	error::{ConfigError, Error},
};

/// Tunable configuration of the claims provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderSettings {
	/// Mappings between claim types and directory attributes
	pub claim_types: ClaimTypeConfigCollection,
	/// Directories to query
	#[serde(default)]
	pub connections: Vec<DirectoryConnection>,
	/// Return the input as is for every claim type without querying any
	/// directory
	#[serde(default)]
	pub always_resolve_user_input: bool,
	/// Only return users whose account is enabled
	#[serde(default)]
	pub filter_enabled_users_only: bool,
	/// Only return security groups
	#[serde(default)]
	pub filter_security_groups_only: bool,
	/// Never use wildcards when searching
	#[serde(default)]
	pub filter_exact_match_only: bool,
	/// Whether group membership is added to users
	#[serde(default = "default_true")]
	pub enable_augmentation: bool,
	/// Search for `*input*` rather than `input*`
	#[serde(default)]
	pub add_wildcard_as_prefix_of_input: bool,
	/// Prefix of the display text of every entity, may contain domain
	/// placeholders
	#[serde(default)]
	pub entity_display_text_prefix: Option<String>,
	/// Time each directory gets to answer a request
	#[serde(default = "default_timeout")]
	pub timeout: Duration,
	/// Maximum number of entities returned by a search when the request does
	/// not cap it
	#[serde(default = "default_max_search_results")]
	pub max_search_results: usize,
}

/// Helper for serde defaults
const fn default_true() -> bool {
	true
}

/// Default per-directory deadline
const fn default_timeout() -> Duration {
	Duration::from_secs(10)
}

/// Default search result cap
const fn default_max_search_results() -> usize {
	30
}

/// Settings of a new provider using `identity_claim_type` to identify users,
/// without any directory connection.
pub fn default_settings(identity_claim_type: &str) -> Result<ProviderSettings, ConfigError> {
	Ok(ProviderSettings {
		claim_types: ClaimTypeConfigCollection::with_defaults(identity_claim_type)?,
		connections: Vec::new(),
		always_resolve_user_input: false,
		filter_enabled_users_only: false,
		filter_security_groups_only: false,
		filter_exact_match_only: false,
		enable_augmentation: true,
		add_wildcard_as_prefix_of_input: false,
		entity_display_text_prefix: None,
		timeout: default_timeout(),
		max_search_results: default_max_search_results(),
	})
}

/// Settings of a new provider identifying users by their UPN.
pub fn default_upn_settings() -> Result<ProviderSettings, ConfigError> {
	default_settings(claim_types::UPN)
}

impl ProviderSettings {
	/// Check the claim type configuration and the connection list.
	pub fn validate(&self) -> Result<(), Error> {
		self.claim_types.validate_whole_configuration()?;
		let mut ids = HashSet::new();
		for connection in &self.connections {
			if !ids.insert(connection.id.as_str()) {
				return Err(Error::Invalid(format!("Duplicate connection id {}", connection.id)));
			}
		}
		Ok(())
	}
}

/// How the group membership of a user is resolved on a connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStrategy {
	/// Follow the membership attributes of the user entry
	#[default]
	DirectoryAttributes,
	/// Ask the domain membership helper of the host
	NativeDomainHelper,
}

/// One directory endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectoryConnection {
	/// Unique name of the connection
	pub id: String,
	/// The URL to connect to the server with. Supports ldap, ldaps, and ldapi
	/// schemes
	pub url: Url,
	/// The search base, e.g. `dc=contoso,dc=local`. Empty to use the naming
	/// context of the server
	#[serde(default)]
	pub base_dn: String,
	/// The username for the LDAP search user
	#[serde(default)]
	pub search_user: String,
	/// The password for the LDAP search user
	#[serde(default)]
	pub search_password: String,
	/// Authenticate with the identity of the host process instead of the
	/// search user
	#[serde(default)]
	pub use_ambient_identity: bool,
	/// Connection settings.
	#[serde(default)]
	pub connection: ConnectionConfig,
	/// If set, enables the [simple paged search control] and sets the page size
	/// to the given value
	///
	/// [simple paged search control]: https://www.rfc-editor.org/rfc/rfc2696.html
	#[serde(default)]
	pub page_size: Option<i32>,
	/// Whether this directory contributes groups when augmenting users
	#[serde(default = "default_true")]
	pub enable_augmentation: bool,
	/// How group membership is resolved
	#[serde(default)]
	pub membership_strategy: MembershipStrategy,
	/// Multi-valued attributes of a user holding the DNs of its groups
	#[serde(default = "default_membership_attributes")]
	pub membership_attributes: Vec<String>,
	/// Filter fragment ANDed into every query on this connection
	#[serde(default)]
	pub additional_filter: Option<String>,
	/// Domain information, resolved on first use
	#[serde(skip)]
	pub(crate) domain: Arc<OnceCell<DomainInfo>>,
}

/// Attributes followed for group membership by default
fn default_membership_attributes() -> Vec<String> {
	vec!["memberOf".to_owned(), "uniqueMemberOf".to_owned()]
}

impl DirectoryConnection {
	/// Create a connection to `url` with default settings.
	#[must_use]
	pub fn new(id: &str, url: Url) -> Self {
		Self {
			id: id.to_owned(),
			url,
			base_dn: String::new(),
			search_user: String::new(),
			search_password: String::new(),
			use_ambient_identity: false,
			connection: ConnectionConfig::default(),
			page_size: None,
			enable_augmentation: true,
			membership_strategy: MembershipStrategy::default(),
			membership_attributes: default_membership_attributes(),
			additional_filter: None,
			domain: Arc::default(),
		}
	}

	/// Forget the resolved domain information, e.g. after the connection
	/// settings changed.
	pub(crate) fn reset_domain(&mut self) {
		self.domain = Arc::default();
	}
}

/// Configuration for how to connect to the LDAP server
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfig {
	/// Timeout to establish a connection in seconds.
	pub timeout: u64,

	/// LDAP operation timeout. For search per reply.
	pub operation_timeout: Duration,

	/// TLS config
	#[serde(default)]
	pub tls: TLSConfig,
}

impl Default for ConnectionConfig {
	fn default() -> Self {
		Self { timeout: 5, operation_timeout: Duration::from_secs(5), tls: TLSConfig::default() }
	}
}

/// TLS Configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TLSConfig {
	/// Use StartTLS extended operation for establishing a secure connection,
	/// rather than TLS on a dedicated port.
	pub starttls: bool,

	/// Disable verification of TLS certificates
	pub no_tls_verify: bool,

	/// TLS root certificates path
	pub root_certificates_path: Option<PathBuf>,

	/// Path of the TLS client key to use for the connection
	pub client_key_path: Option<PathBuf>,

	/// Path of the TLS client certificate to use for the connection
	pub client_certificate_path: Option<PathBuf>,
}

impl ConnectionConfig {
	/// Create a [`LdapConnSettings`] based on this [`ConnectionConfig`]
	pub(crate) async fn to_settings(&self) -> Result<LdapConnSettings, Error> {
		let mut settings = LdapConnSettings::new();

		settings = settings.set_conn_timeout(Duration::from_secs(self.timeout));
		settings = settings.set_starttls(self.tls.starttls);
		settings = settings.set_no_tls_verify(self.tls.no_tls_verify);

		if let Some(path) = &self.tls.root_certificates_path {
			let mut roots = RootCertStore::empty();
			let pem = tokio::fs::read(path).await?;
			let (added, _) = roots.add_parsable_certificates(&rustls_pemfile::certs(&mut pem.as_slice())?);
			if added == 0 {
				return Err(Error::Invalid("Could not read root certificate".to_owned()));
			}
			let builder = ClientConfig::builder().with_safe_defaults().with_root_certificates(roots);

			let config = match (&self.tls.client_key_path, &self.tls.client_certificate_path) {
				(Some(key_path), Some(cert_path)) => {
					let certs = rustls_pemfile::certs(&mut tokio::fs::read(cert_path).await?.as_slice())?
						.into_iter()
						.map(Certificate)
						.collect();
					let key = rustls_pemfile::pkcs8_private_keys(
						&mut tokio::fs::read(key_path).await?.as_slice(),
					)?
					.into_iter()
					.next()
					.ok_or_else(|| Error::Invalid("Could not read client key".to_owned()))?;
					builder
						.with_client_auth_cert(certs, PrivateKey(key))
						.map_err(|_| Error::Invalid("Could not read client certificates".to_owned()))?
				}
				(None, None) => builder.with_no_client_auth(),
				_ => Err(Error::Invalid(
					"Both a client certificate and key file in PKCS8 format must be specified"
						.to_owned(),
				))?,
			};
			settings = settings.set_config(Arc::new(config));
		}
		Ok(settings)
	}
}
