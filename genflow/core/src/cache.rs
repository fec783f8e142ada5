//! Request Deduplication & Session Cache
//!
//! Idempotent, user-scoped reads (recent analysis, credits, current
//! organization) are requested by several surfaces at once on startup. This
//! module collapses them:
//!
//! 1. **In-flight table**: concurrent callers for the same (endpoint, user)
//!    await one shared future instead of issuing one request each.
//! 2. **Session cache**: a successful answer, including the well-defined
//!    "no data" 404, is written to the injected session store and reused until
//!    it is invalidated.
//!
//! Anonymous callers and endpoints outside the allowlist go straight to the
//! network. Mutations never pass through here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;
use crate::storage::KeyValueStore;
use crate::transport::{strip_query, HttpTransport};

/// Prefix of every cache key in the session store
pub const CACHE_PREFIX: &str = "genflow.cache:";

// ============================================================================
// Cache Types
// ============================================================================

/// Result of a cached read
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "payload", rename_all = "kebab-case")]
pub enum CachedRead {
    /// The endpoint returned data
    Found(Value),
    /// The endpoint answered 404: there is nothing for this user yet
    NotFound,
}

impl CachedRead {
    /// The payload, if any
    #[must_use]
    pub fn into_option(self) -> Option<Value> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

/// Dedup and cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Endpoint path
    pub endpoint: String,
    /// Authenticated user id
    pub user_id: String,
}

impl CacheKey {
    /// Key under which the entry lives in the session store
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{CACHE_PREFIX}{}:{}", self.user_id, self.endpoint)
    }
}

/// A stored response
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Endpoint path
    pub endpoint: String,
    /// User the response belongs to
    pub user_id: String,
    /// Stored response
    pub payload: CachedRead,
    /// When the response was stored, ms since the epoch
    pub timestamp: i64,
}

type SharedRead = Shared<BoxFuture<'static, Result<CachedRead, ClientError>>>;
type InFlight = DashMap<CacheKey, (u64, SharedRead)>;

/// Removes an in-flight entry however its future ends
struct InFlightGuard {
    in_flight: Arc<InFlight>,
    key: CacheKey,
    generation: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(&self.key, |_, (generation, _)| *generation == self.generation);
    }
}

// ============================================================================
// Request Cache
// ============================================================================

/// Deduplicating, session-scoped read cache
pub struct RequestCache {
    http: HttpTransport,
    store: Arc<dyn KeyValueStore>,
    allowlist: Vec<String>,
    in_flight: Arc<InFlight>,
    next_generation: AtomicU64,
}

impl RequestCache {
    /// Create a cache over a session store
    pub fn new(http: HttpTransport, store: Arc<dyn KeyValueStore>, allowlist: Vec<String>) -> Self {
        Self {
            http,
            store,
            allowlist,
            in_flight: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Whether `endpoint` is eligible for dedup and caching
    #[must_use]
    pub fn is_cacheable(&self, endpoint: &str) -> bool {
        let path = strip_query(endpoint);
        self.allowlist.iter().any(|allowed| allowed == path)
    }

    /// Read an endpoint, deduplicated and cached when eligible
    ///
    /// # Errors
    ///
    /// Any [`ClientError`] from the underlying request. Errors are never
    /// cached.
    pub async fn get(&self, endpoint: &str) -> Result<CachedRead, ClientError> {
        let Some(key) = self.key_for(endpoint) else {
            return fetch(self.http.clone(), endpoint.to_string()).await;
        };

        if let Some(entry) = self.load(&key) {
            tracing::debug!(endpoint, "Cache hit");
            return Ok(entry.payload);
        }

        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(endpoint, "Joining in-flight request");
                existing.get().1.clone()
            }
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let shared = self.start_fetch(key.clone(), generation);
                slot.insert((generation, shared.clone()));
                shared
            }
        };
        shared.await
    }

    /// Read an endpoint and decode the payload
    ///
    /// # Errors
    ///
    /// [`ClientError::Decode`] if the payload does not match `T`, otherwise
    /// as [`RequestCache::get`].
    pub async fn get_as<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> Result<Option<T>, ClientError> {
        match self.get(endpoint).await? {
            CachedRead::Found(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ClientError::Decode(e.to_string())),
            CachedRead::NotFound => Ok(None),
        }
    }

    /// Drop the current user's entry for `endpoint` after a known mutation
    pub fn invalidate(&self, endpoint: &str) {
        if let Some(key) = self.key_for(endpoint) {
            self.store.remove(&key.storage_key());
            tracing::debug!(endpoint, "Cache entry invalidated");
        }
    }

    /// Drop every entry of the current user
    pub fn invalidate_user(&self) -> usize {
        let identity = self.http.identity().current();
        let Some(user_id) = identity.cache_scope() else {
            return 0;
        };
        self.store.remove_prefix(&format!("{CACHE_PREFIX}{user_id}:"))
    }

    /// Drop every entry of every user
    pub fn clear(&self) -> usize {
        self.store.remove_prefix(CACHE_PREFIX)
    }

    /// Number of requests currently in flight
    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    fn key_for(&self, endpoint: &str) -> Option<CacheKey> {
        if !self.is_cacheable(endpoint) {
            return None;
        }
        let identity = self.http.identity().current();
        identity.cache_scope().map(|user_id| CacheKey {
            endpoint: endpoint.to_string(),
            user_id: user_id.to_string(),
        })
    }

    fn load(&self, key: &CacheKey) -> Option<CacheEntry> {
        let raw = self.store.get(&key.storage_key())?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(endpoint = %key.endpoint, error = %e, "Discarding corrupt cache entry");
                self.store.remove(&key.storage_key());
                None
            }
        }
    }

    fn start_fetch(&self, key: CacheKey, generation: u64) -> SharedRead {
        let guard = InFlightGuard {
            in_flight: self.in_flight.clone(),
            key: key.clone(),
            generation,
        };
        let http = self.http.clone();
        let store = self.store.clone();

        async move {
            let _guard = guard;
            let result = fetch(http, key.endpoint.clone()).await;
            if let Ok(payload) = &result {
                let entry = CacheEntry {
                    endpoint: key.endpoint.clone(),
                    user_id: key.user_id.clone(),
                    payload: payload.clone(),
                    timestamp: Utc::now().timestamp_millis(),
                };
                match serde_json::to_string(&entry) {
                    Ok(raw) => store.set(&key.storage_key(), raw),
                    Err(e) => tracing::warn!(endpoint = %key.endpoint, error = %e, "Could not store cache entry"),
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("allowlist", &self.allowlist)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

async fn fetch(http: HttpTransport, endpoint: String) -> Result<CachedRead, ClientError> {
    let found = http
        .get_optional_json::<Value>(&endpoint, http.request_timeout())
        .await?;
    Ok(found.map_or(CachedRead::NotFound, CachedRead::Found))
}
