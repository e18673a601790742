//! Credential lifecycle manager.
//!
//! Hands out access tokens that stay valid for at least the grace window,
//! refreshing them through the identity provider when needed. Refreshes of
//! the same credential are serialized so concurrent callers never race on
//! refresh-token rotation.

use crate::credential::{CredentialStore, RefreshedToken};
use crate::error::{CredentialError, RefreshError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conduit_core::CredentialId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const PERSIST_ATTEMPTS: u32 = 2;

/// Anything that can produce a currently valid access token.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Returns an access token valid for at least the grace window.
    async fn access_token(&self, id: CredentialId) -> Result<String, CredentialError>;
}

/// Performs the OAuth refresh-token exchange.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError>;
}

/// Timing policy for the manager.
#[derive(Debug, Clone, Copy)]
pub struct RefreshPolicy {
    /// Tokens expiring within this window are refreshed.
    pub grace: Duration,
    /// Upper bound on every store or provider call.
    pub call_timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(300),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Keeps third-party access tokens valid across executions.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    policy: RefreshPolicy,
    locks: LockMap,
}

type LockMap = Mutex<HashMap<CredentialId, Arc<tokio::sync::Mutex<()>>>>;

impl CredentialManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            store,
            refresher,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a valid access token for the credential.
    ///
    /// A token with more than the grace window left is returned without any
    /// network call. Otherwise the token is refreshed and persisted under a
    /// per-credential lock.
    ///
    /// # Errors
    ///
    /// `Revoked` when the provider refuses the refresh token, `Transient` or
    /// `Timeout` when it could not be reached, `NotFound`/`Storage` for store
    /// failures.
    pub async fn get_valid_access_token(
        &self,
        id: CredentialId,
    ) -> Result<String, CredentialError> {
        let credential = self.load(id).await?;
        if !self.is_expiring(&credential) {
            return Ok(credential.access_token);
        }

        let lease = self.lease(id);
        let _guard = lease.lock.lock().await;

        // Another caller may have refreshed while we waited.
        let mut credential = self.load(id).await?;
        if !self.is_expiring(&credential) {
            debug!(credential_id = %id, "credential refreshed by concurrent caller");
            return Ok(credential.access_token);
        }

        let refresh_token = credential
            .refresh_token
            .clone()
            .ok_or(CredentialError::MissingRefreshToken { id })?;

        let refreshed = tokio::time::timeout(
            self.policy.call_timeout,
            self.refresher.refresh(&refresh_token),
        )
        .await
        .map_err(|_| CredentialError::Timeout { id })?
        .map_err(|e| match e {
            RefreshError::Rejected { reason } => CredentialError::Revoked { id, reason },
            RefreshError::Transport { reason } => CredentialError::Transient { id, reason },
        })?;

        let previous_expiry = credential.expires_at;
        let rotated = refreshed.refresh_token.is_some();
        credential.apply_refresh(refreshed, Utc::now());

        match self.persist(&credential, previous_expiry).await {
            Ok(true) => {
                info!(
                    credential_id = %id,
                    expires_at = %credential.expires_at,
                    rotated,
                    "refreshed access token"
                );
            }
            Ok(false) if rotated => {
                error!(
                    credential_id = %id,
                    rotated,
                    "credential changed during refresh, rotated refresh token discarded"
                );
            }
            Ok(false) => {
                warn!(credential_id = %id, "credential changed during refresh, stored record left as is");
            }
            Err(reason) if rotated => {
                error!(
                    credential_id = %id,
                    rotated,
                    error = %reason,
                    "rotated refresh token could not be persisted"
                );
            }
            Err(reason) => {
                warn!(credential_id = %id, error = %reason, "failed to persist refreshed token");
            }
        }

        Ok(credential.access_token)
    }

    /// Conditionally saves a refreshed credential, retrying once when the
    /// store fails or times out. A lost race is not retried.
    async fn persist(
        &self,
        credential: &crate::Credential,
        previous_expiry: DateTime<Utc>,
    ) -> Result<bool, String> {
        let mut last_error = String::new();
        for attempt in 1..=PERSIST_ATTEMPTS {
            match tokio::time::timeout(
                self.policy.call_timeout,
                self.store.save_refreshed(credential, previous_expiry),
            )
            .await
            {
                Ok(Ok(saved)) => return Ok(saved),
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "timed out".to_string(),
            }
            debug!(
                credential_id = %credential.id,
                attempt,
                error = %last_error,
                "persisting refreshed token failed"
            );
        }
        Err(last_error)
    }

    async fn load(&self, id: CredentialId) -> Result<crate::Credential, CredentialError> {
        tokio::time::timeout(self.policy.call_timeout, self.store.load(id))
            .await
            .map_err(|_| CredentialError::Timeout { id })?
            .map_err(|e| CredentialError::from_store(id, e))
    }

    fn is_expiring(&self, credential: &crate::Credential) -> bool {
        let grace = chrono::Duration::from_std(self.policy.grace)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        credential.needs_refresh(Utc::now(), grace)
    }

    fn lease(&self, id: CredentialId) -> LockLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        LockLease {
            locks: &self.locks,
            id,
            lock: Arc::clone(locks.entry(id).or_default()),
        }
    }
}

/// Shared handle on a credential's refresh lock.
///
/// The last lease to drop removes the map entry, so the map only holds
/// credentials with a refresh in flight.
struct LockLease<'a> {
    locks: &'a LockMap,
    id: CredentialId,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map plus ours; clones are only taken under
        // the map lock, so no other lease can appear meanwhile.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.id);
        }
    }
}

#[async_trait]
impl AccessTokenSource for CredentialManager {
    async fn access_token(&self, id: CredentialId) -> Result<String, CredentialError> {
        self.get_valid_access_token(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Credential;
    use conduit_core::{StoreError, UserId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<CredentialId, Credential>>,
        failing_saves: AtomicUsize,
    }

    impl MemoryStore {
        fn with(credential: Credential) -> Arc<Self> {
            let store = Self::default();
            store
                .records
                .lock()
                .unwrap()
                .insert(credential.id, credential);
            Arc::new(store)
        }

        fn get(&self, id: CredentialId) -> Credential {
            self.records.lock().unwrap().get(&id).cloned().unwrap()
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryStore {
        async fn load(&self, id: CredentialId) -> Result<Credential, StoreError> {
            self.records
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| StoreError::not_found("credential", id))
        }

        async fn save_refreshed(
            &self,
            credential: &Credential,
            previous_expiry: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            if self
                .failing_saves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::backend("connection reset"));
            }
            let mut records = self.records.lock().unwrap();
            let stored = records
                .get_mut(&credential.id)
                .ok_or_else(|| StoreError::not_found("credential", credential.id))?;
            if stored.expires_at != previous_expiry {
                return Ok(false);
            }
            *stored = credential.clone();
            Ok(true)
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        delay: Duration,
        rotate: bool,
    }

    impl CountingRefresher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                rotate: false,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(RefreshedToken {
                access_token: format!("access-{n}"),
                refresh_token: self.rotate.then(|| format!("refresh-{n}")),
                expires_in: Duration::from_secs(3600),
            })
        }
    }

    struct RejectingRefresher;

    #[async_trait]
    impl TokenRefresher for RejectingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
            Err(RefreshError::Rejected {
                reason: "invalid_grant".to_string(),
            })
        }
    }

    struct UnreachableRefresher;

    #[async_trait]
    impl TokenRefresher for UnreachableRefresher {
        async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
            Err(RefreshError::Transport {
                reason: "connection refused".to_string(),
            })
        }
    }

    fn credential(expires_in: chrono::Duration) -> Credential {
        Credential {
            id: CredentialId::new(),
            user_id: UserId::new(),
            service: "gmail".to_string(),
            access_token: "stored-access".to_string(),
            refresh_token: Some("stored-refresh".to_string()),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn valid_token_is_returned_without_refresh() {
        let cred = credential(chrono::Duration::hours(1));
        let id = cred.id;
        let refresher = CountingRefresher::new();
        let manager = CredentialManager::new(
            MemoryStore::with(cred),
            refresher.clone(),
            RefreshPolicy::default(),
        );

        let token = manager.get_valid_access_token(id).await.expect("token");
        assert_eq!(token, "stored-access");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn token_inside_grace_window_is_refreshed_once() {
        let cred = credential(chrono::Duration::minutes(2));
        let id = cred.id;
        let store = MemoryStore::with(cred);
        let refresher = CountingRefresher::new();
        let manager =
            CredentialManager::new(store.clone(), refresher.clone(), RefreshPolicy::default());

        let token = manager.get_valid_access_token(id).await.expect("token");
        assert_eq!(token, "access-1");
        assert_eq!(refresher.calls(), 1);

        let stored = store.get(id);
        assert_eq!(stored.access_token, "access-1");
        assert_eq!(stored.refresh_token.as_deref(), Some("stored-refresh"));
        assert!(stored.expires_at > Utc::now() + chrono::Duration::minutes(50));

        // The persisted token is now fresh.
        let again = manager.get_valid_access_token(id).await.expect("token");
        assert_eq!(again, "access-1");
        assert_eq!(refresher.calls(), 1);
    }

    #[tokio::test]
    async fn rotated_refresh_token_is_persisted() {
        let cred = credential(-chrono::Duration::minutes(1));
        let id = cred.id;
        let store = MemoryStore::with(cred);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            rotate: true,
        });
        let manager = CredentialManager::new(store.clone(), refresher, RefreshPolicy::default());

        manager.get_valid_access_token(id).await.expect("token");
        assert_eq!(store.get(id).refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn rotated_refresh_token_survives_one_failed_save() {
        let cred = credential(-chrono::Duration::minutes(1));
        let id = cred.id;
        let store = MemoryStore::with(cred);
        store.failing_saves.store(1, Ordering::SeqCst);
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            rotate: true,
        });
        let manager = CredentialManager::new(store.clone(), refresher, RefreshPolicy::default());

        let token = manager.get_valid_access_token(id).await.expect("token");
        assert_eq!(token, "access-1");
        assert_eq!(store.get(id).refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn refresh_still_returns_token_when_store_keeps_failing() {
        let cred = credential(-chrono::Duration::minutes(1));
        let id = cred.id;
        let store = MemoryStore::with(cred);
        store.failing_saves.store(usize::MAX, Ordering::SeqCst);
        let manager =
            CredentialManager::new(store.clone(), CountingRefresher::new(), RefreshPolicy::default());

        let token = manager.get_valid_access_token(id).await.expect("token");
        assert_eq!(token, "access-1");
        assert_eq!(store.get(id).access_token, "stored-access");
    }

    #[tokio::test]
    async fn lock_entries_are_released_after_refresh() {
        let first = credential(-chrono::Duration::minutes(1));
        let second = credential(-chrono::Duration::minutes(1));
        let (a, b) = (first.id, second.id);
        let store = MemoryStore::with(first);
        store.records.lock().unwrap().insert(b, second);
        let manager = CredentialManager::new(store, CountingRefresher::new(), RefreshPolicy::default());

        manager.get_valid_access_token(a).await.expect("token");
        manager.get_valid_access_token(b).await.expect("token");

        assert!(manager.locks.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let cred = credential(-chrono::Duration::minutes(10));
        let id = cred.id;
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
            rotate: true,
        });
        let manager = Arc::new(CredentialManager::new(
            MemoryStore::with(cred),
            refresher.clone(),
            RefreshPolicy::default(),
        ));

        let first = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_valid_access_token(id).await }
        });
        let second = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_valid_access_token(id).await }
        });

        let a = first.await.expect("join").expect("token");
        let b = second.await.expect("join").expect("token");

        assert_eq!(refresher.calls(), 1);
        assert_eq!(a, "access-1");
        assert_eq!(b, "access-1");
        assert!(manager.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_refresh_reports_revoked() {
        let cred = credential(chrono::Duration::minutes(1));
        let id = cred.id;
        let store = MemoryStore::with(cred);
        let manager =
            CredentialManager::new(store.clone(), Arc::new(RejectingRefresher), RefreshPolicy::default());

        let err = manager.get_valid_access_token(id).await.unwrap_err();
        assert!(matches!(err, CredentialError::Revoked { .. }));
        assert!(err.requires_reauthorization());
        assert_eq!(store.get(id).access_token, "stored-access");
    }

    #[tokio::test]
    async fn transport_failure_is_transient() {
        let cred = credential(chrono::Duration::minutes(1));
        let id = cred.id;
        let manager = CredentialManager::new(
            MemoryStore::with(cred),
            Arc::new(UnreachableRefresher),
            RefreshPolicy::default(),
        );

        let err = manager.get_valid_access_token(id).await.unwrap_err();
        assert!(matches!(err, CredentialError::Transient { .. }));
        assert!(!err.requires_reauthorization());
    }

    #[tokio::test]
    async fn slow_refresh_times_out() {
        let cred = credential(chrono::Duration::minutes(1));
        let id = cred.id;
        let refresher = Arc::new(CountingRefresher {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(200),
            rotate: false,
        });
        let manager = CredentialManager::new(
            MemoryStore::with(cred),
            refresher,
            RefreshPolicy {
                grace: Duration::from_secs(300),
                call_timeout: Duration::from_millis(20),
            },
        );

        let err = manager.get_valid_access_token(id).await.unwrap_err();
        assert_eq!(err, CredentialError::Timeout { id });
    }

    #[tokio::test]
    async fn missing_refresh_token_requires_reauthorization() {
        let mut cred = credential(chrono::Duration::minutes(1));
        cred.refresh_token = None;
        let id = cred.id;
        let manager = CredentialManager::new(
            MemoryStore::with(cred),
            CountingRefresher::new(),
            RefreshPolicy::default(),
        );

        let err = manager.get_valid_access_token(id).await.unwrap_err();
        assert_eq!(err, CredentialError::MissingRefreshToken { id });
    }

    #[tokio::test]
    async fn unknown_credential_is_not_found() {
        let manager = CredentialManager::new(
            Arc::new(MemoryStore::default()),
            CountingRefresher::new(),
            RefreshPolicy::default(),
        );
        let id = CredentialId::new();

        let err = manager.access_token(id).await.unwrap_err();
        assert_eq!(err, CredentialError::NotFound { id });
    }
}
