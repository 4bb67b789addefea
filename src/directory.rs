//! Access to the directory servers behind the connections.
use std::{future::Future, time::Duration};

use async_trait::async_trait;
use ldap3::{
	adapters::{Adapter, EntriesOnly, PagedResults},
	LdapConnAsync, Scope, SearchEntry, SearchOptions,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::{config::DirectoryConnection, entry::SearchEntryExt, error::Error};

/// LDAP result code returned when a search hit its size limit.
const SIZE_LIMIT_EXCEEDED: u32 = 4;

/// Domain a directory connection belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainInfo {
	/// Short domain name, e.g. `contoso`
	pub domain_name: String,
	/// Fully qualified domain name, e.g. `contoso.local`
	pub domain_fqdn: String,
	/// Distinguished name of the domain root, e.g. `DC=contoso,DC=local`
	pub distinguished_name: String,
}

impl DomainInfo {
	/// Derive domain information from the DN of a naming context.
	#[must_use]
	pub fn from_distinguished_name(distinguished_name: &str) -> Self {
		let components: Vec<&str> = distinguished_name
			.split(',')
			.filter_map(|rdn| {
				let (attribute, value) = rdn.trim().split_once('=')?;
				attribute.trim().eq_ignore_ascii_case("dc").then(|| value.trim())
			})
			.collect();
		Self {
			domain_name: components.first().map(|name| (*name).to_owned()).unwrap_or_default(),
			domain_fqdn: components.join("."),
			distinguished_name: distinguished_name.to_owned(),
		}
	}
}

/// A query against one directory.
#[derive(Debug, Clone)]
pub struct DirectoryQuery {
	/// Search base, the base DN of the connection if unset
	pub base: Option<String>,
	/// Search scope
	pub scope: Scope,
	/// LDAP filter
	pub filter: String,
	/// Attributes to load
	pub attributes: Vec<String>,
	/// Maximum number of entries to return
	pub size_limit: Option<i32>,
}

impl DirectoryQuery {
	/// A subtree search below the base DN of the connection.
	#[must_use]
	pub fn subtree(filter: String, attributes: Vec<String>) -> Self {
		Self { base: None, scope: Scope::Subtree, filter, attributes, size_limit: None }
	}

	/// A lookup of the entry named `dn`.
	#[must_use]
	pub fn entry(dn: &str, attributes: Vec<String>) -> Self {
		Self {
			base: Some(dn.to_owned()),
			scope: Scope::Base,
			filter: "(objectClass=*)".to_owned(),
			attributes,
			size_limit: None,
		}
	}
}

/// Access to directory servers.
#[async_trait]
pub trait Directory: Send + Sync + std::fmt::Debug {
	/// Run `query` against the directory behind `connection`.
	async fn execute_query(
		&self,
		connection: &DirectoryConnection,
		query: &DirectoryQuery,
	) -> Result<Vec<SearchEntry>, Error>;

	/// Authenticate against the directory behind `connection` and read the
	/// domain it serves.
	async fn bind(&self, connection: &DirectoryConnection) -> Result<DomainInfo, Error>;
}

impl DirectoryConnection {
	/// Domain information of this connection. Bound once and cached for the
	/// lifetime of the connection, shared by all copies of it.
	pub async fn domain_info(&self, directory: &dyn Directory) -> Result<&DomainInfo, Error> {
		self.domain.get_or_try_init(|| directory.bind(self)).await
	}
}

/// Run `work` for every connection in parallel, giving each `timeout` to
/// complete. Connections that fail or time out are logged and left out of the
/// result, which lists the remaining outcomes in connection order.
///
/// Dropping the returned future aborts all outstanding work.
pub(crate) async fn fan_out<T, F, Fut>(
	connections: impl IntoIterator<Item = DirectoryConnection>,
	timeout: Duration,
	mut work: F,
) -> Vec<(String, T)>
where
	T: Send + 'static,
	F: FnMut(DirectoryConnection) -> Fut,
	Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
	let mut tasks = JoinSet::new();
	for (index, connection) in connections.into_iter().enumerate() {
		let id = connection.id.clone();
		let task = work(connection);
		tasks.spawn(async move { (index, id, tokio::time::timeout(timeout, task).await) });
	}

	let mut outcomes = Vec::new();
	while let Some(joined) = tasks.join_next().await {
		match joined {
			Ok((index, id, Ok(Ok(value)))) => outcomes.push((index, id, value)),
			Ok((_, id, Ok(Err(err)))) => warn!(connection = %id, "Skipping directory: {err}"),
			Ok((_, id, Err(_))) => {
				warn!(connection = %id, "Skipping directory: {}", Error::Timeout(timeout));
			}
			Err(err) => warn!("Directory task failed: {err}"),
		}
	}
	outcomes.sort_by_key(|(index, _, _)| *index);
	outcomes.into_iter().map(|(_, id, value)| (id, value)).collect()
}

/// [`Directory`] talking to LDAP servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapDirectory;

impl LdapDirectory {
	/// Create a connection to an ldap server based on the settings and url
	/// specified in the configuration, and authenticate.
	async fn connect(connection: &DirectoryConnection) -> Result<ldap3::Ldap, Error> {
		let settings = connection.connection.to_settings().await?;
		let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &connection.url).await?;
		let id = connection.id.clone();
		tokio::spawn(async move {
			if let Err(err) = conn.drive().await {
				warn!(connection = %id, "Ldap connection error {err}");
			}
		});

		if connection.use_ambient_identity {
			ldap.sasl_external_bind().await?.success()?;
		} else if !connection.search_user.is_empty() {
			ldap.simple_bind(&connection.search_user, &connection.search_password).await?.success()?;
		}
		Ok(ldap)
	}

	/// Read the default naming context from the root DSE.
	async fn naming_context(ldap: &mut ldap3::Ldap) -> Result<String, Error> {
		let (entries, _) = ldap
			.search("", Scope::Base, "(objectClass=*)", vec!["defaultNamingContext", "namingContexts"])
			.await?
			.success()?;
		let entry = entries.into_iter().next().map(SearchEntry::construct).ok_or(Error::Missing)?;
		entry
			.attr_first("defaultNamingContext")
			.or_else(|| entry.attr_first("namingContexts"))
			.map(str::to_owned)
			.ok_or(Error::Missing)
	}
}

#[async_trait]
impl Directory for LdapDirectory {
	async fn execute_query(
		&self,
		connection: &DirectoryConnection,
		query: &DirectoryQuery,
	) -> Result<Vec<SearchEntry>, Error> {
		let mut ldap = Self::connect(connection).await?;

		let base = match &query.base {
			Some(base) => base.clone(),
			None if connection.base_dn.is_empty() => Self::naming_context(&mut ldap).await?,
			None => connection.base_dn.clone(),
		};

		// Prepare search parameters
		let mut adapters: Vec<Box<dyn Adapter<_, _>>> = vec![Box::new(EntriesOnly::new())];
		if let Some(page_size) = connection.page_size {
			adapters.push(Box::new(PagedResults::new(page_size)));
		}
		if let Some(size_limit) = query.size_limit {
			ldap.with_search_options(SearchOptions::new().sizelimit(size_limit));
		}

		debug!(connection = %connection.id, base = %base, filter = %query.filter, "Querying directory");
		let mut search = ldap
			.streaming_search_with(adapters, &base, query.scope, &query.filter, query.attributes.clone())
			.await?;

		let mut entries = Vec::new();
		while let Some(entry) = search.next().await?.map(SearchEntry::construct) {
			entries.push(entry);
		}
		let result = search.finish().await;
		if result.rc != SIZE_LIMIT_EXCEEDED {
			result.success()?;
		}
		ldap.unbind().await?;

		Ok(entries)
	}

	async fn bind(&self, connection: &DirectoryConnection) -> Result<DomainInfo, Error> {
		let mut ldap = Self::connect(connection).await?;
		let naming_context = if connection.base_dn.is_empty() {
			Self::naming_context(&mut ldap).await?
		} else {
			connection.base_dn.clone()
		};
		ldap.unbind().await?;
		Ok(DomainInfo::from_distinguished_name(&naming_context))
	}
}
