#![allow(dead_code, clippy::unwrap_used, clippy::missing_docs_in_private_items)]
use std::{
	collections::{HashMap, HashSet},
	error::Error,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use async_trait::async_trait;
use ldap3::{LdapConnAsync, Scope, SearchEntry};
use ldap_claims::{
	default_upn_settings, ClaimsProvider, ConfigurationCache, Directory, DirectoryConnection,
	DirectoryQuery, DomainInfo, InMemoryStore, ProviderSettings, SearchEntryExt,
};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};
use url::Url;

/// Install a test subscriber, once per test binary.
pub fn init_tracing() {
	let tracing_filter = EnvFilter::default().add_directive(LevelFilter::DEBUG.into());
	let _ = tracing_subscriber::fmt().with_env_filter(tracing_filter).with_test_writer().try_init();
}

/// Build a search entry from attribute names and values.
pub fn entry(dn: &str, attrs: &[(&str, &[&str])]) -> SearchEntry {
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

/// An Active Directory user.
pub fn ad_user(upn: &str, display_name: &str, groups: &[&str]) -> SearchEntry {
	let (name, _) = upn.split_once('@').unwrap_or((upn, ""));
	entry(
		&format!("CN={display_name},OU=Users,DC=contoso,DC=local"),
		&[
			("objectClass", &["top", "person", "user"]),
			("userPrincipalName", &[upn]),
			("displayName", &[display_name]),
			("sAMAccountName", &[name]),
			("mail", &[upn]),
			("memberOf", groups),
		],
	)
}

/// An Active Directory group.
pub fn ad_group(dn: &str, name: &str) -> SearchEntry {
	entry(
		dn,
		&[
			("objectClass", &["top", "group"]),
			("cn", &[name]),
			("sAMAccountName", &[name]),
			("displayName", &[name]),
		],
	)
}

/// Settings with the default claim types and one connection per ID.
pub fn settings(connections: &[&str]) -> ProviderSettings {
	let mut settings = default_upn_settings().unwrap();
	settings.connections = connections
		.iter()
		.map(|id| DirectoryConnection::new(id, Url::parse(&format!("ldap://{id}.local")).unwrap()))
		.collect();
	settings.timeout = Duration::from_millis(300);
	settings
}

/// A provider answering from `settings` through `directory`.
pub async fn provider(settings: ProviderSettings, directory: Arc<MockDirectory>) -> ClaimsProvider {
	let store = Arc::new(InMemoryStore::new());
	store.insert("ldap", settings).await;
	let cache = ConfigurationCache::init(store, "ldap").await.unwrap();
	ClaimsProvider::new(Arc::new(cache), directory)
}

/// In-memory directory serving canned entries per connection ID. Queries are
/// recorded, connections can be made to fail or answer late.
#[derive(Debug, Default)]
pub struct MockDirectory {
	/// Entries per connection
	entries: HashMap<String, Vec<SearchEntry>>,
	/// Naming context per connection
	domains: HashMap<String, String>,
	/// Connections that cannot be reached
	failing: HashSet<String>,
	/// Connections that answer late
	delays: HashMap<String, Duration>,
	/// Every query received, with its connection
	queries: Mutex<Vec<(String, DirectoryQuery)>>,
	/// Number of binds
	binds: AtomicUsize,
}

impl MockDirectory {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_entry(mut self, connection: &str, entry: SearchEntry) -> Self {
		self.entries.entry(connection.to_owned()).or_default().push(entry);
		self
	}

	pub fn with_domain(mut self, connection: &str, naming_context: &str) -> Self {
		self.domains.insert(connection.to_owned(), naming_context.to_owned());
		self
	}

	pub fn failing(mut self, connection: &str) -> Self {
		self.failing.insert(connection.to_owned());
		self
	}

	pub fn delayed(mut self, connection: &str, delay: Duration) -> Self {
		self.delays.insert(connection.to_owned(), delay);
		self
	}

	pub fn queries(&self) -> Vec<(String, DirectoryQuery)> {
		self.queries.lock().unwrap().clone()
	}

	pub fn binds(&self) -> usize {
		self.binds.load(Ordering::SeqCst)
	}

	/// Wait for the configured delay and fail for unreachable connections.
	async fn reach(&self, connection: &DirectoryConnection) -> Result<(), ldap_claims::Error> {
		if let Some(delay) = self.delays.get(&connection.id) {
			tokio::time::sleep(*delay).await;
		}
		if self.failing.contains(&connection.id) {
			return Err(ldap_claims::Error::Invalid(format!("{} is unreachable", connection.id)));
		}
		Ok(())
	}
}

#[async_trait]
impl Directory for MockDirectory {
	async fn execute_query(
		&self,
		connection: &DirectoryConnection,
		query: &DirectoryQuery,
	) -> Result<Vec<SearchEntry>, ldap_claims::Error> {
		self.queries.lock().unwrap().push((connection.id.clone(), query.clone()));
		self.reach(connection).await?;

		let entries = self.entries.get(&connection.id).map(Vec::as_slice).unwrap_or_default();
		if let (Scope::Base, Some(base)) = (query.scope, &query.base) {
			return Ok(entries.iter().filter(|entry| entry.dn.eq_ignore_ascii_case(base)).cloned().collect());
		}
		let filter = match parse_filter(&query.filter) {
			Some((filter, "")) => filter,
			_ => return Err(ldap_claims::Error::Invalid(format!("Bad filter {}", query.filter))),
		};
		Ok(entries.iter().filter(|entry| filter.matches(entry)).cloned().collect())
	}

	async fn bind(&self, connection: &DirectoryConnection) -> Result<DomainInfo, ldap_claims::Error> {
		self.binds.fetch_add(1, Ordering::SeqCst);
		self.reach(connection).await?;
		let naming_context = self
			.domains
			.get(&connection.id)
			.cloned()
			.unwrap_or_else(|| format!("DC={},DC=local", connection.id));
		Ok(DomainInfo::from_distinguished_name(&naming_context))
	}
}

/// Just enough of the LDAP filter syntax to evaluate the filters the crate
/// builds. Extensible matches never match.
#[derive(Debug)]
enum Filter {
	And(Vec<Filter>),
	Or(Vec<Filter>),
	Not(Box<Filter>),
	Assertion { attribute: String, pattern: String },
	Extensible,
}

fn parse_filter(input: &str) -> Option<(Filter, &str)> {
	let rest = input.strip_prefix('(')?;
	match rest.chars().next()? {
		operator @ ('&' | '|') => {
			let mut rest = &rest[1..];
			let mut filters = Vec::new();
			while !rest.starts_with(')') {
				let (filter, remainder) = parse_filter(rest)?;
				filters.push(filter);
				rest = remainder;
			}
			let filter = if operator == '&' { Filter::And(filters) } else { Filter::Or(filters) };
			Some((filter, &rest[1..]))
		}
		'!' => {
			let (filter, rest) = parse_filter(&rest[1..])?;
			Some((Filter::Not(Box::new(filter)), rest.strip_prefix(')')?))
		}
		_ => {
			let end = rest.find(')')?;
			let (attribute, pattern) = rest[..end].split_once('=')?;
			let filter = if attribute.contains(':') {
				Filter::Extensible
			} else {
				Filter::Assertion { attribute: attribute.to_owned(), pattern: pattern.to_owned() }
			};
			Some((filter, &rest[end + 1..]))
		}
	}
}

impl Filter {
	fn matches(&self, entry: &SearchEntry) -> bool {
		match self {
			Self::And(filters) => filters.iter().all(|filter| filter.matches(entry)),
			Self::Or(filters) => filters.iter().any(|filter| filter.matches(entry)),
			Self::Not(filter) => !filter.matches(entry),
			Self::Extensible => false,
			Self::Assertion { attribute, pattern } => {
				entry.attr_values(attribute).iter().any(|value| wildcard_match(pattern, value))
			}
		}
	}
}

/// Case-insensitive match of `value` against an assertion value with `*`
/// wildcards and `\xx` escapes.
fn wildcard_match(pattern: &str, value: &str) -> bool {
	let parts: Vec<String> = pattern.split('*').map(|part| unescape(part).to_lowercase()).collect();
	let value = value.to_lowercase();
	let [first, middle @ .., last] = parts.as_slice() else {
		return value == parts[0];
	};
	let Some(mut rest) = value.strip_prefix(first.as_str()) else {
		return false;
	};
	for part in middle {
		match rest.find(part.as_str()) {
			Some(index) => rest = &rest[index + part.len()..],
			None => return false,
		}
	}
	rest.ends_with(last.as_str())
}

fn unescape(value: &str) -> String {
	let mut bytes = Vec::new();
	let mut input = value.bytes();
	while let Some(byte) = input.next() {
		if byte != b'\\' {
			bytes.push(byte);
			continue;
		}
		let hex: Vec<u8> = input.by_ref().take(2).collect();
		if let Some(decoded) =
			std::str::from_utf8(&hex).ok().and_then(|hex| u8::from_str_radix(hex, 16).ok())
		{
			bytes.push(decoded);
		}
	}
	String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn ldap_connect() -> Result<ldap3::Ldap, Box<dyn Error>> {
	let (conn, mut ldap) = LdapConnAsync::new("ldap://localhost:1389").await?;
	let _handle = tokio::spawn(async move {
		if let Err(err) = conn.drive().await {
			panic!("Ldap connection error {err}");
		}
	});
	ldap.simple_bind("cn=admin,dc=example,dc=org", "adminpassword").await?;
	Ok(ldap)
}

pub async fn ldap_add_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("ou={ou},dc=example,dc=org"),
		vec![("objectClass", ["organizationalUnit"].into())],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_organizational_unit(
	ldap: &mut ldap3::Ldap,
	ou: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("ou={ou},dc=example,dc=org")).await?.success()?;
	Ok(())
}

pub async fn ldap_add_person(
	ldap: &mut ldap3::Ldap,
	cn: &str,
	mail: &str,
	display_name: &str,
) -> Result<(), Box<dyn Error>> {
	ldap.add(
		&format!("cn={cn},ou=people,dc=example,dc=org"),
		vec![
			("objectClass", ["inetOrgPerson"].into()),
			("sn", [cn].into()),
			("mail", [mail].into()),
			("displayName", [display_name].into()),
		],
	)
	.await?
	.success()?;
	Ok(())
}

pub async fn ldap_delete_person(ldap: &mut ldap3::Ldap, cn: &str) -> Result<(), Box<dyn Error>> {
	ldap.delete(&format!("cn={cn},ou=people,dc=example,dc=org")).await?.success()?;
	Ok(())
}
