//! Revocation store: records revoked token ids (and consumed action tokens)
//! until the original token would have expired anyway.
//!
//! Entries expire in the store itself. Callers pass the remaining lifetime of
//! the token as the TTL and never delete entries.
//!
//! Unreachable stores fail closed: [`RetryingStore`] bounds every call with a
//! timeout, retries with exponential backoff, and then reports
//! [`AuthError::StoreUnavailable`]. It never answers "not revoked" on failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ExistenceCheck, SetExpiry, SetOptions};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use super::AuthError;

/// Key prefix for entries written to Redis.
const REDIS_KEY_PREFIX: &str = "bookly:revoked:";

/// Longest pause between two store attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Shared key-value store of revoked ids.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Record `key` as revoked for `ttl`. Re-adding overwrites the TTL.
    async fn add(&self, key: &str, ttl: Duration) -> Result<(), AuthError>;

    /// Whether `key` is currently recorded as revoked.
    async fn contains(&self, key: &str) -> Result<bool, AuthError>;

    /// Record `key` for `ttl` only if no live entry exists. Returns `true`
    /// when this call created the entry. Must be atomic across concurrent
    /// callers. TTLs under one second are raised to one second.
    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AuthError>;
}

/// Shared handle used by request handlers.
pub type SharedRevocationStore = Arc<dyn RevocationStore>;

/// Redis-backed store. TTLs are enforced by Redis (`SET .. EX`).
#[derive(Clone)]
pub struct RedisRevocationStore {
    conn: ConnectionManager,
}

impl RedisRevocationStore {
    /// Connect to the Redis instance at `url`.
    pub async fn connect(url: &str) -> Result<Self, AuthError> {
        let client = redis::Client::open(url)
            .map_err(|e| AuthError::StoreUnavailable(format!("redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AuthError::StoreUnavailable(format!("redis connect: {e}")))?;
        info!("connected to revocation store");
        Ok(Self { conn })
    }

    fn key(key: &str) -> String {
        format!("{REDIS_KEY_PREFIX}{key}")
    }
}

/// Whole seconds for a TTL, rounding sub-second remainders up.
fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0)
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn add(&self, key: &str, ttl: Duration) -> Result<(), AuthError> {
        let secs = ttl_secs(ttl);
        if secs == 0 {
            // Already expired on its own.
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(Self::key(key), 1u8, secs)
            .await
            .map_err(|e| AuthError::StoreUnavailable(format!("redis set: {e}")))
    }

    async fn contains(&self, key: &str) -> Result<bool, AuthError> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(Self::key(key))
            .await
            .map_err(|e| AuthError::StoreUnavailable(format!("redis exists: {e}")))
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AuthError> {
        let options = SetOptions::default()
            .conditional_set(ExistenceCheck::NX)
            .with_expiration(SetExpiry::EX(ttl_secs(ttl).max(1)));
        let mut conn = self.conn.clone();
        let reply = conn
            .set_options::<_, _, Option<String>>(Self::key(key), 1u8, options)
            .await
            .map_err(|e| AuthError::StoreUnavailable(format!("redis set nx: {e}")))?;
        Ok(reply.is_some())
    }
}

/// In-process store for tests and single-node development.
///
/// Expired entries are evicted lazily on lookup.
#[derive(Debug, Default)]
pub struct MemoryRevocationStore {
    entries: DashMap<String, Instant>,
}

impl MemoryRevocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn add(&self, key: &str, ttl: Duration) -> Result<(), AuthError> {
        if ttl.is_zero() {
            return Ok(());
        }
        self.entries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn contains(&self, key: &str) -> Result<bool, AuthError> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|expires_at| *expires_at > now);
        match live {
            Some(true) => Ok(true),
            Some(false) => {
                self.entries.remove_if(key, |_, expires_at| *expires_at <= now);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AuthError> {
        let now = Instant::now();
        let expires_at = now + ttl.max(Duration::from_secs(1));
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) if *entry.get() > now => Ok(false),
            Entry::Occupied(mut entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
        }
    }
}

/// Timeout and retry settings for store calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Deadline for a single attempt.
    pub timeout: Duration,
    /// Backoff before the second attempt; doubles after each failure.
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_millis(500),
            base_backoff: Duration::from_millis(50),
        }
    }
}

/// Pause before the attempt after `attempt`: doubles each time, capped at
/// [`MAX_BACKOFF`].
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt)).min(MAX_BACKOFF)
}

/// Wraps a store with per-call timeouts and bounded retries.
///
/// A retried `claim` whose first attempt landed but timed out reports the key
/// as already taken, which rejects the caller rather than admitting it twice.
pub struct RetryingStore {
    inner: SharedRevocationStore,
    policy: RetryPolicy,
}

impl RetryingStore {
    pub fn new(inner: SharedRevocationStore, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<T, AuthError>> + Send,
        T: Send,
    {
        let attempts = self.policy.attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            match timeout(self.policy.timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(AuthError::StoreUnavailable(msg))) => last_error = msg,
                Ok(Err(other)) => return Err(other),
                Err(_) => last_error = format!("timed out after {:?}", self.policy.timeout),
            }
            debug!(op, attempt = attempt + 1, error = %last_error, "revocation store call failed");

            if attempt + 1 < attempts {
                sleep(backoff(self.policy.base_backoff, attempt)).await;
            }
        }

        warn!(op, attempts, error = %last_error, "revocation store unavailable");
        Err(AuthError::StoreUnavailable(format!(
            "{op} failed after {attempts} attempts: {last_error}"
        )))
    }
}

#[async_trait]
impl RevocationStore for RetryingStore {
    async fn add(&self, key: &str, ttl: Duration) -> Result<(), AuthError> {
        self.run("add", || self.inner.add(key, ttl)).await
    }

    async fn contains(&self, key: &str) -> Result<bool, AuthError> {
        self.run("contains", || self.inner.contains(key)).await
    }

    async fn claim(&self, key: &str, ttl: Duration) -> Result<bool, AuthError> {
        self.run("claim", || self.inner.claim(key, ttl)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_store_add_and_contains() {
        let store = MemoryRevocationStore::new();
        assert!(!store.contains("jti-1").await.unwrap());
        store.add("jti-1", Duration::from_secs(60)).await.unwrap();
        assert!(store.contains("jti-1").await.unwrap());
        assert!(!store.contains("jti-2").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_entries_expire() {
        let store = MemoryRevocationStore::new();
        store.add("jti-1", Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.contains("jti-1").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_readd_overwrites_ttl() {
        let store = MemoryRevocationStore::new();
        store.add("jti-1", Duration::from_secs(5)).await.unwrap();
        store.add("jti-1", Duration::from_secs(60)).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.contains("jti-1").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn memory_store_ignores_zero_ttl() {
        let store = MemoryRevocationStore::new();
        store.add("gone", Duration::ZERO).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_claim_is_first_come_only() {
        let store = MemoryRevocationStore::new();
        assert!(store.claim("action:sig", Duration::from_secs(30)).await.unwrap());
        assert!(!store.claim("action:sig", Duration::from_secs(30)).await.unwrap());
        assert!(store.contains("action:sig").await.unwrap());
        assert!(store.claim("action:other", Duration::from_secs(30)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_claim_reopens_after_expiry() {
        let store = MemoryRevocationStore::new();
        assert!(store.claim("action:sig", Duration::from_secs(10)).await.unwrap());
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(store.claim("action:sig", Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn memory_store_claim_holds_at_least_a_second() {
        let store = MemoryRevocationStore::new();
        assert!(store.claim("action:sig", Duration::ZERO).await.unwrap());
        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(!store.claim("action:sig", Duration::ZERO).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_admit_exactly_one() {
        let store = Arc::new(MemoryRevocationStore::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.claim("action:race", Duration::from_secs(60)).await.unwrap()
                })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(50);
        assert_eq!(backoff(base, 0), Duration::from_millis(50));
        assert_eq!(backoff(base, 1), Duration::from_millis(100));
        assert_eq!(backoff(base, 40), MAX_BACKOFF);
        assert_eq!(backoff(Duration::MAX, u32::MAX), MAX_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_store_survives_large_attempt_counts() {
        let policy = RetryPolicy {
            attempts: 40,
            timeout: Duration::from_millis(10),
            base_backoff: Duration::from_millis(1),
        };
        let inner = Arc::new(FlakyStore {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let store = RetryingStore::new(inner.clone(), policy);
        assert!(matches!(
            store.claim("action:sig", Duration::from_secs(5)).await,
            Err(AuthError::StoreUnavailable(_))
        ));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn ttl_rounds_up_partial_seconds() {
        assert_eq!(ttl_secs(Duration::ZERO), 0);
        assert_eq!(ttl_secs(Duration::from_millis(1)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(2500)), 3);
        assert_eq!(ttl_secs(Duration::from_secs(7)), 7);
    }

    /// Fails the first `failures` calls, then answers `true`.
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RevocationStore for FlakyStore {
        async fn add(&self, _key: &str, _ttl: Duration) -> Result<(), AuthError> {
            Ok(())
        }

        async fn contains(&self, _key: &str) -> Result<bool, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AuthError::StoreUnavailable("connection refused".into()))
            } else {
                Ok(true)
            }
        }

        async fn claim(&self, _key: &str, _ttl: Duration) -> Result<bool, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(AuthError::StoreUnavailable("connection refused".into()))
            } else {
                Ok(true)
            }
        }
    }

    /// Never answers.
    struct HangingStore;

    #[async_trait]
    impl RevocationStore for HangingStore {
        async fn add(&self, _key: &str, _ttl: Duration) -> Result<(), AuthError> {
            std::future::pending().await
        }

        async fn contains(&self, _key: &str) -> Result<bool, AuthError> {
            std::future::pending().await
        }

        async fn claim(&self, _key: &str, _ttl: Duration) -> Result<bool, AuthError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_store_recovers_from_transient_failures() {
        let inner = Arc::new(FlakyStore {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let store = RetryingStore::new(inner.clone(), RetryPolicy::default());
        assert!(store.contains("jti").await.unwrap());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_store_fails_closed_after_budget() {
        let inner = Arc::new(FlakyStore {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let store = RetryingStore::new(inner.clone(), RetryPolicy::default());
        let err = store.contains("jti").await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retrying_store_times_out_hanging_calls() {
        let store = RetryingStore::new(Arc::new(HangingStore), RetryPolicy::default());
        assert!(matches!(
            store.contains("jti").await,
            Err(AuthError::StoreUnavailable(_))
        ));
        assert!(matches!(
            store.add("jti", Duration::from_secs(5)).await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }
}
