//! Versioned storage and process-wide caching of the provider settings.
use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{config::ProviderSettings, error::Error};

/// Persistent storage of provider settings. Every save produces a new,
/// higher version.
#[async_trait]
pub trait ConfigurationStore: Send + Sync + std::fmt::Debug {
	/// Load the settings stored as `id` and their version.
	async fn load(&self, id: &str) -> Result<(ProviderSettings, u64), Error>;

	/// The version of the settings stored as `id`.
	async fn version(&self, id: &str) -> Result<u64, Error>;

	/// Store `settings` as `id`, if the stored version is still
	/// `expected_version`. Returns the new version.
	async fn save(
		&self,
		id: &str,
		settings: &ProviderSettings,
		expected_version: u64,
	) -> Result<u64, Error>;
}

/// [`ConfigurationStore`] keeping the settings in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
	/// Settings and version per ID
	entries: RwLock<HashMap<String, (ProviderSettings, u64)>>,
}

impl InMemoryStore {
	/// Create an empty store.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Store `settings` as `id` regardless of the current version. Returns the
	/// new version.
	pub async fn insert(&self, id: &str, settings: ProviderSettings) -> u64 {
		let mut entries = self.entries.write().await;
		let version = entries.get(id).map_or(1, |(_, version)| version + 1);
		entries.insert(id.to_owned(), (settings, version));
		version
	}
}

#[async_trait]
impl ConfigurationStore for InMemoryStore {
	async fn load(&self, id: &str) -> Result<(ProviderSettings, u64), Error> {
		self.entries
			.read()
			.await
			.get(id)
			.cloned()
			.ok_or_else(|| Error::ConfigurationNotFound(id.to_owned()))
	}

	async fn version(&self, id: &str) -> Result<u64, Error> {
		self.entries
			.read()
			.await
			.get(id)
			.map(|(_, version)| *version)
			.ok_or_else(|| Error::ConfigurationNotFound(id.to_owned()))
	}

	async fn save(
		&self,
		id: &str,
		settings: &ProviderSettings,
		expected_version: u64,
	) -> Result<u64, Error> {
		let mut entries = self.entries.write().await;
		let (stored, version) =
			entries.get_mut(id).ok_or_else(|| Error::ConfigurationNotFound(id.to_owned()))?;
		if *version != expected_version {
			return Err(Error::StaleConfiguration { expected: expected_version, actual: *version });
		}
		*stored = settings.clone();
		*version += 1;
		Ok(*version)
	}
}

/// The settings currently in use
#[derive(Debug, Clone)]
struct CachedSettings {
	/// The settings
	settings: Arc<ProviderSettings>,
	/// The stored version they were loaded from
	version: u64,
	/// When they were loaded
	refreshed_at: OffsetDateTime,
}

/// The live settings of one provider, shared by all requests.
///
/// Requests take an [`Arc`] snapshot of the settings and keep using it even
/// if a newer version is committed or loaded in the meantime. Writers replace
/// the snapshot as a whole, so readers never see a partial update.
#[derive(Debug)]
pub struct ConfigurationCache {
	/// ID of the settings in the store
	id: String,
	/// Where the settings are persisted
	store: Arc<dyn ConfigurationStore>,
	/// The loaded settings, unset after teardown
	state: RwLock<Option<CachedSettings>>,
}

impl ConfigurationCache {
	/// Load the settings stored as `id`.
	pub async fn init(store: Arc<dyn ConfigurationStore>, id: &str) -> Result<Self, Error> {
		let (settings, version) = store.load(id).await?;
		settings.validate()?;
		info!(configuration = id, version, "Loaded configuration");
		Ok(Self {
			id: id.to_owned(),
			store,
			state: RwLock::new(Some(CachedSettings {
				settings: Arc::new(settings),
				version,
				refreshed_at: OffsetDateTime::now_utc(),
			})),
		})
	}

	/// A snapshot of the current settings.
	pub async fn current(&self) -> Result<Arc<ProviderSettings>, Error> {
		self.state
			.read()
			.await
			.as_ref()
			.map(|cached| Arc::clone(&cached.settings))
			.ok_or_else(|| Error::ConfigurationNotFound(self.id.clone()))
	}

	/// The version of the current settings.
	pub async fn version(&self) -> Option<u64> {
		self.state.read().await.as_ref().map(|cached| cached.version)
	}

	/// When the current settings were loaded.
	pub async fn refreshed_at(&self) -> Option<OffsetDateTime> {
		self.state.read().await.as_ref().map(|cached| cached.refreshed_at)
	}

	/// Reload the settings if the stored version changed. Returns whether new
	/// settings were loaded.
	pub async fn refresh(&self) -> Result<bool, Error> {
		let stored_version = self.store.version(&self.id).await?;
		if self.version().await == Some(stored_version) {
			debug!(configuration = %self.id, version = stored_version, "Configuration is up to date");
			return Ok(false);
		}

		let (settings, version) = self.store.load(&self.id).await?;
		settings.validate()?;
		*self.state.write().await = Some(CachedSettings {
			settings: Arc::new(settings),
			version,
			refreshed_at: OffsetDateTime::now_utc(),
		});
		info!(configuration = %self.id, version, "Reloaded configuration");
		Ok(true)
	}

	/// Apply `edit` to a copy of the current settings, check the result and
	/// persist it. The live settings are only replaced once the store accepted
	/// the new version; a store holding a newer version than this cache is
	/// reported as [`Error::StaleConfiguration`]. Returns the new version.
	pub async fn commit<F>(&self, edit: F) -> Result<u64, Error>
	where
		F: FnOnce(&mut ProviderSettings) -> Result<(), Error> + Send,
	{
		let mut state = self.state.write().await;
		let cached = state.as_ref().ok_or_else(|| Error::ConfigurationNotFound(self.id.clone()))?;

		let mut settings = ProviderSettings::clone(&cached.settings);
		edit(&mut settings)?;
		settings.validate()?;
		for connection in &mut settings.connections {
			connection.reset_domain();
		}

		let version = self.store.save(&self.id, &settings, cached.version).await?;
		*state = Some(CachedSettings {
			settings: Arc::new(settings),
			version,
			refreshed_at: OffsetDateTime::now_utc(),
		});
		info!(configuration = %self.id, version, "Committed configuration");
		Ok(version)
	}

	/// Drop the cached settings. Requests still holding a snapshot keep it.
	pub async fn teardown(&self) {
		*self.state.write().await = None;
		debug!(configuration = %self.id, "Dropped configuration");
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::unwrap_used, clippy::expect_used)]

	use std::sync::Arc;

	use super::{ConfigurationCache, InMemoryStore};
	use crate::{
		claim_type::{ClaimTypeConfig, DirectoryObjectType},
		config::default_upn_settings,
		error::{ConfigRule, Error},
	};

	async fn store() -> Arc<InMemoryStore> {
		let store = Arc::new(InMemoryStore::new());
		store.insert("ldap", default_upn_settings().unwrap()).await;
		store
	}

	#[tokio::test]
	async fn init_and_commit() {
		let store = store().await;
		let cache = ConfigurationCache::init(store.clone(), "ldap").await.unwrap();
		assert_eq!(cache.version().await, Some(1));
		let before = cache.current().await.unwrap();

		let version = cache
			.commit(|settings| {
				settings.filter_enabled_users_only = true;
				Ok(())
			})
			.await
			.unwrap();
		assert_eq!(version, 2);
		assert!(cache.current().await.unwrap().filter_enabled_users_only);
		// Earlier snapshots are unaffected
		assert!(!before.filter_enabled_users_only);
		assert!(!cache.refresh().await.unwrap());
	}

	#[tokio::test]
	async fn invalid_edit_is_not_committed() {
		let store = store().await;
		let cache = ConfigurationCache::init(store.clone(), "ldap").await.unwrap();

		let err = cache
			.commit(|settings| {
				settings.claim_types.add(ClaimTypeConfig::new(
					"upn2",
					DirectoryObjectType::User,
					"user",
					"userPrincipalName",
				))?;
				Ok(())
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Config(err) if err.rule == ConfigRule::DuplicateDirectoryObject));
		assert_eq!(cache.version().await, Some(1));
		assert!(cache.current().await.unwrap().claim_types.by_claim_type("upn2").is_none());
	}

	#[tokio::test]
	async fn stale_commit_is_rejected() {
		let store = store().await;
		let first = ConfigurationCache::init(store.clone(), "ldap").await.unwrap();
		let second = ConfigurationCache::init(store.clone(), "ldap").await.unwrap();

		first
			.commit(|settings| {
				settings.enable_augmentation = false;
				Ok(())
			})
			.await
			.unwrap();

		let err = second
			.commit(|settings| {
				settings.filter_exact_match_only = true;
				Ok(())
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::StaleConfiguration { expected: 1, actual: 2 }));

		assert!(second.refresh().await.unwrap());
		assert!(!second.current().await.unwrap().enable_augmentation);
		assert_eq!(
			second
				.commit(|settings| {
					settings.filter_exact_match_only = true;
					Ok(())
				})
				.await
				.unwrap(),
			3
		);
	}

	#[tokio::test]
	async fn teardown_and_missing_configuration() {
		let store = store().await;
		let cache = ConfigurationCache::init(store.clone(), "ldap").await.unwrap();
		let snapshot = cache.current().await.unwrap();
		cache.teardown().await;
		assert!(matches!(cache.current().await, Err(Error::ConfigurationNotFound(_))));
		assert!(!snapshot.claim_types.is_empty());

		assert!(matches!(
			ConfigurationCache::init(store, "missing").await,
			Err(Error::ConfigurationNotFound(id)) if id == "missing"
		));
	}
}
