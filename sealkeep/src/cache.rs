//! Data key cache.
//!
//! Keeps recently used data encryption keys so that repeated encryptions
//! and decryptions for a scope do not round-trip to the key provider.
//! Entries expire after a fixed TTL and are checked lazily on access.
//! Every insert also drops whatever has expired, and an optional sweeper
//! (see [`crate::maintenance`]) clears idle caches on a timer.
//!
//! Two kinds of entries are kept per (provider, scope):
//! - the *current* key, used to encrypt new data
//! - *resolved* keys, indexed by key reference, used to decrypt
//!
//! A current key is also indexed by its reference, so data written through
//! the cache decrypts without another provider call.

use crate::error::{Error, ProviderError};
use crate::key_provider::{DataKey, KeyProvider};
use crate::registry::ProviderRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    provider_id: String,
    scope: String,
    /// `None` addresses the current key of the scope.
    key_ref: Option<Vec<u8>>,
}

impl CacheKey {
    fn current(provider_id: &str, scope: &str) -> Self {
        Self { provider_id: provider_id.to_string(), scope: scope.to_string(), key_ref: None }
    }

    fn resolved(provider_id: &str, scope: &str, key_ref: &[u8]) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            scope: scope.to_string(),
            key_ref: Some(key_ref.to_vec()),
        }
    }
}

struct CacheEntry {
    key: DataKey,
    created_at: Instant,
}

/// Thread-safe, TTL-bounded cache of data encryption keys.
pub struct DataKeyCache {
    registry: Arc<ProviderRegistry>,
    ttl: Duration,
    provider_timeout: Option<Duration>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl DataKeyCache {
    /// Creates a cache over `registry` whose entries live for `ttl`.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, ttl: Duration) -> Self {
        Self {
            registry,
            ttl,
            provider_timeout: None,
            entries: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Bounds every provider round-trip made by the cache.
    #[must_use]
    pub fn with_provider_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.provider_timeout = timeout;
        self
    }

    /// Returns the registry this cache resolves providers from.
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the key to encrypt new data for `scope` with `provider_id`.
    ///
    /// Served from the cache while the entry is younger than the TTL;
    /// otherwise the provider is asked for a key and the result cached.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownProvider` if the provider is not registered and
    /// `Error::KeyProvider` if the provider call fails or times out.
    pub async fn get_or_create(&self, provider_id: &str, scope: &str) -> Result<DataKey, Error> {
        let cache_key = CacheKey::current(provider_id, scope);
        self.get_or_fetch(cache_key, |provider| async move {
            let key = provider.data_key(scope).await?;
            Ok(key)
        })
        .await
    }

    /// Returns the key referenced by an envelope written for `scope`.
    ///
    /// # Errors
    ///
    /// Same as [`DataKeyCache::get_or_create`].
    pub async fn get_or_resolve(
        &self,
        provider_id: &str,
        scope: &str,
        key_ref: &[u8],
    ) -> Result<DataKey, Error> {
        let cache_key = CacheKey::resolved(provider_id, scope, key_ref);
        self.get_or_fetch(cache_key, |provider| async move {
            let raw = provider.resolve_key(scope, key_ref).await?;
            Ok(DataKey::new(key_ref.to_vec(), raw))
        })
        .await
    }

    async fn get_or_fetch<F, Fut>(&self, cache_key: CacheKey, fetch: F) -> Result<DataKey, Error>
    where
        F: FnOnce(Arc<KeyProvider>) -> Fut,
        Fut: Future<Output = Result<DataKey, ProviderError>>,
    {
        if let Some(key) = self.lookup(&cache_key) {
            debug!(
                provider_id = %cache_key.provider_id,
                scope = %cache_key.scope,
                "data key cache hit"
            );
            return Ok(key);
        }

        let provider = self.registry.get(&cache_key.provider_id)?;

        // One caller per key talks to the provider; the rest wait and re-check.
        let gate = InFlightGate::acquire(self, &cache_key);
        let _guard = gate.mutex.lock().await;
        match self.lookup(&cache_key) {
            Some(key) => Ok(key),
            None => self.fetch_and_insert(&cache_key, provider, fetch).await,
        }
    }

    async fn fetch_and_insert<F, Fut>(
        &self,
        cache_key: &CacheKey,
        provider: Arc<KeyProvider>,
        fetch: F,
    ) -> Result<DataKey, Error>
    where
        F: FnOnce(Arc<KeyProvider>) -> Fut,
        Fut: Future<Output = Result<DataKey, ProviderError>>,
    {
        debug!(
            provider_id = %cache_key.provider_id,
            scope = %cache_key.scope,
            "data key cache miss, calling provider"
        );

        let fetched = match self.provider_timeout {
            Some(limit) => tokio::time::timeout(limit, fetch(provider))
                .await
                .unwrap_or(Err(ProviderError::Timeout(limit))),
            None => fetch(provider).await,
        };

        match fetched {
            Ok(key) => {
                self.insert(cache_key, &key);
                Ok(key)
            }
            Err(source) => Err(Error::KeyProvider {
                provider_id: cache_key.provider_id.clone(),
                scope: cache_key.scope.clone(),
                source,
            }),
        }
    }

    fn lookup(&self, cache_key: &CacheKey) -> Option<DataKey> {
        let mut entries = self.entries.lock();
        let entry = entries.get(cache_key)?;
        if entry.created_at.elapsed() < self.ttl {
            return Some(entry.key.clone());
        }
        entries.remove(cache_key);
        None
    }

    fn insert(&self, cache_key: &CacheKey, key: &DataKey) {
        let created_at = Instant::now();
        let ttl = self.ttl;
        let mut entries = self.entries.lock();

        // Inserts only follow a provider call, so this bounds the map to the
        // keys of one TTL window even without a sweeper.
        entries.retain(|_, entry| created_at.duration_since(entry.created_at) < ttl);

        if cache_key.key_ref.is_none() {
            let by_ref =
                CacheKey::resolved(&cache_key.provider_id, &cache_key.scope, key.key_ref());
            entries.insert(by_ref, CacheEntry { key: key.clone(), created_at });
        }
        entries.insert(cache_key.clone(), CacheEntry { key: key.clone(), created_at });
    }


    /// Drops every cached key of `provider_id` for `scope`.
    ///
    /// Used when a provider reports that a key is no longer valid.
    pub fn invalidate(&self, provider_id: &str, scope: &str) {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !(k.provider_id == provider_id && k.scope == scope));
        debug!(provider_id, scope, removed = before - entries.len(), "invalidated data keys");
    }

    /// Drops every cached key of `provider_id`.
    pub fn invalidate_provider(&self, provider_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| k.provider_id != provider_id);
        before - entries.len()
    }

    /// Removes expired entries, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
        before - entries.len()
    }

    /// Number of cached entries, including not yet purged expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Per-key single-flight gate, removed from the map when the last holder
/// lets go (including when the caller's future is dropped).
struct InFlightGate<'a> {
    cache: &'a DataKeyCache,
    cache_key: &'a CacheKey,
    mutex: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> InFlightGate<'a> {
    fn acquire(cache: &'a DataKeyCache, cache_key: &'a CacheKey) -> Self {
        let mutex = Arc::clone(cache.in_flight.lock().entry(cache_key.clone()).or_default());
        Self { cache, cache_key, mutex }
    }
}

impl Drop for InFlightGate<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.cache.in_flight.lock();
        // Only the map and this holder: nobody is waiting.
        if Arc::strong_count(&self.mutex) <= 2
            && in_flight.get(self.cache_key).is_some_and(|g| Arc::ptr_eq(g, &self.mutex))
        {
            in_flight.remove(self.cache_key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::key_provider::KeyService;
    use secrecy::{ExposeSecret, SecretVec};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingService {
        generated: AtomicUsize,
        decrypted: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl KeyService for CountingService {
        async fn generate_data_key(&self, _scope: &str) -> Result<DataKey, ProviderError> {
            let n = self.generated.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            #[allow(clippy::cast_possible_truncation)]
            let id = n as u8;
            Ok(DataKey::new(vec![id], SecretVec::new(vec![id; 32])))
        }

        async fn decrypt_data_key(
            &self,
            _scope: &str,
            key_ref: &[u8],
        ) -> Result<SecretVec<u8>, ProviderError> {
            self.decrypted.fetch_add(1, Ordering::SeqCst);
            Ok(SecretVec::new(vec![key_ref[0]; 32]))
        }
    }

    fn cache_with(service: Arc<CountingService>, ttl: Duration) -> DataKeyCache {
        let registry = ProviderRegistry::new().with_external("kms", service);
        DataKeyCache::new(Arc::new(registry), ttl)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        let k1 = cache.get_or_create("kms", "org:1").await.unwrap();
        let k2 = cache.get_or_create("kms", "org:1").await.unwrap();

        assert_eq!(service.generated.load(Ordering::SeqCst), 1);
        assert_eq!(k1.key_ref(), k2.key_ref());
    }

    #[tokio::test(start_paused = true)]
    async fn test_created_key_resolves_without_provider_call() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        let key = cache.get_or_create("kms", "org:1").await.unwrap();
        let resolved = cache.get_or_resolve("kms", "org:1", key.key_ref()).await.unwrap();

        assert_eq!(resolved.expose_key(), key.expose_key());
        assert_eq!(service.decrypted.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_refetched_once() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        cache.get_or_create("kms", "org:1").await.unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;

        let key = cache.get_or_create("kms", "org:1").await.unwrap();
        cache.get_or_create("kms", "org:1").await.unwrap();

        assert_eq!(service.generated.load(Ordering::SeqCst), 2);
        assert_eq!(key.key_ref(), &[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scopes_are_isolated() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        let k1 = cache.get_or_create("kms", "org:1").await.unwrap();
        let k2 = cache.get_or_create("kms", "org:2").await.unwrap();

        assert_ne!(k1.expose_key(), k2.expose_key());
        assert_eq!(service.generated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        cache.get_or_create("kms", "org:1").await.unwrap();
        cache.get_or_create("kms", "org:2").await.unwrap();
        cache.invalidate("kms", "org:1");

        cache.get_or_create("kms", "org:1").await.unwrap();
        cache.get_or_create("kms", "org:2").await.unwrap();
        assert_eq!(service.generated.load(Ordering::SeqCst), 3);

        assert_eq!(cache.invalidate_provider("kms"), 4);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        cache.get_or_create("kms", "org:1").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.get_or_create("kms", "org:2").await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_provider_call() {
        let service = Arc::new(CountingService {
            delay: Some(Duration::from_millis(50)),
            ..CountingService::default()
        });
        let cache = Arc::new(cache_with(Arc::clone(&service), Duration::from_secs(60)));

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_or_create("kms", "org:1").await })
            })
            .collect();

        for task in tasks {
            let key = task.await.unwrap().unwrap();
            assert_eq!(key.key_ref(), &[0]);
        }
        assert_eq!(service.generated.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_poison_cache() {
        let service = Arc::new(CountingService {
            delay: Some(Duration::from_secs(30)),
            ..CountingService::default()
        });
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60))
            .with_provider_timeout(Some(Duration::from_secs(1)));

        let err = cache.get_or_create("kms", "org:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_len_bounded_across_ttl_periods() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        for _ in 0..50 {
            cache.get_or_create("kms", "org:1").await.unwrap();
            // Current key plus its by-reference index
            assert_eq!(cache.len(), 2);
            tokio::time::advance(Duration::from_secs(61)).await;
        }
        assert_eq!(service.generated.load(Ordering::SeqCst), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_drops_expired_entries_of_quiet_scopes() {
        let service = Arc::new(CountingService::default());
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        for scope in ["org:1", "org:2", "org:3"] {
            cache.get_or_create("kms", scope).await.unwrap();
        }
        assert_eq!(cache.len(), 6);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.get_or_create("kms", "org:4").await.unwrap();

        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_fetch_leaves_nothing_behind() {
        let service = Arc::new(CountingService {
            delay: Some(Duration::from_secs(5)),
            ..CountingService::default()
        });
        let cache = cache_with(Arc::clone(&service), Duration::from_secs(60));

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), cache.get_or_create("kms", "org:1")).await;
        assert!(abandoned.is_err());
        assert!(cache.is_empty());
        assert!(cache.in_flight.lock().is_empty());

        cache.get_or_create("kms", "org:1").await.unwrap();
        assert_eq!(service.generated.load(Ordering::SeqCst), 2);
        assert!(cache.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let cache = cache_with(Arc::new(CountingService::default()), Duration::from_secs(60));
        let err = cache.get_or_create("missing", "org:1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownProvider);
    }

    #[tokio::test]
    async fn test_local_provider_through_cache() {
        let registry = ProviderRegistry::new().with_local("local", SecretVec::new(b"k".to_vec()));
        let cache = DataKeyCache::new(Arc::new(registry), Duration::from_secs(60));

        let key = cache.get_or_create("local", "org:1").await.unwrap();
        assert!(key.key_ref().is_empty());

        let resolved = cache.get_or_resolve("local", "org:1", &[]).await.unwrap();
        assert_eq!(resolved.expose_key(), key.expose_key());

        let direct = crate::kdf::derive_scope_key(&SecretVec::new(b"k".to_vec()), "org:1").unwrap();
        assert_eq!(direct.expose_secret().as_slice(), key.expose_key());
    }
}
