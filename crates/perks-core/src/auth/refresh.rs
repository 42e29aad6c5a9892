//! Token refresh coordinator.
//!
//! Wraps authenticated outbound calls: on an authorization failure it
//! performs a single-flight refresh and retries the original call exactly
//! once. Concurrent callers hitting 401 at the same time share one refresh
//! request; issuing two would invalidate the refresh token server-side.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{AuthError, Error, Result};
use crate::models::{SessionId, SessionTokens};
use crate::transport::{RewardsApi, TransportError};

use super::token_store::TokenStore;

/// Serializes token refreshes for the current session.
pub struct RefreshCoordinator {
    transport: Arc<dyn RewardsApi>,
    tokens: Arc<dyn TokenStore>,
    /// Bumped after every successful refresh. A caller that observed an
    /// older generation knows someone else already refreshed for it.
    generation: Mutex<u64>,
    /// Bumped on session switch; an in-flight refresh whose epoch no longer
    /// matches is abandoned instead of resumed under the new session.
    epoch: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(transport: Arc<dyn RewardsApi>, tokens: Arc<dyn TokenStore>) -> Self {
        Self {
            transport,
            tokens,
            generation: Mutex::new(0),
            epoch: AtomicU64::new(0),
        }
    }

    /// Abandon any in-flight refresh belonging to the previous session.
    pub fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Run an authenticated call with refresh-and-retry-once semantics.
    ///
    /// Guest sessions have no stored tokens and must not reach this path;
    /// they get `NotAuthenticated` instead of a refresh attempt.
    pub async fn execute<T, F, Fut>(&self, session: &SessionId, op: F) -> Result<T>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let tokens = self
            .tokens
            .load(session)?
            .ok_or(AuthError::NotAuthenticated)?;
        let observed_epoch = self.epoch.load(Ordering::SeqCst);
        let observed_generation = { *self.generation.lock().await };

        match op(tokens.access_token.clone()).await {
            Ok(value) => Ok(value),
            Err(TransportError::Unauthorized) => {
                let fresh = self
                    .refresh_once(session, &tokens, observed_generation, observed_epoch)
                    .await?;
                op(fresh.access_token).await.map_err(Error::from)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Force a refresh of the current tokens (explicit caller request).
    pub async fn force_refresh(&self, session: &SessionId) -> Result<SessionTokens> {
        let observed_epoch = self.epoch.load(Ordering::SeqCst);
        let mut generation = self.generation.lock().await;
        // Loaded under the generation lock: a refresh that finished while we
        // waited must not be replayed with its predecessor's refresh token.
        let tokens = self
            .tokens
            .load(session)?
            .ok_or(AuthError::NotAuthenticated)?;
        self.refresh_locked(session, &tokens, &mut generation, observed_epoch)
            .await
    }

    async fn refresh_once(
        &self,
        session: &SessionId,
        stale: &SessionTokens,
        observed_generation: u64,
        observed_epoch: u64,
    ) -> Result<SessionTokens> {
        let mut generation = self.generation.lock().await;
        if *generation != observed_generation {
            // Another caller already refreshed while we waited; reuse its
            // result instead of replaying the refresh token.
            tracing::debug!("Reusing tokens from a concurrent refresh");
            return self
                .tokens
                .load(session)?
                .ok_or_else(|| AuthError::NotAuthenticated.into());
        }
        self.refresh_locked(session, stale, &mut generation, observed_epoch)
            .await
    }

    async fn refresh_locked(
        &self,
        session: &SessionId,
        stale: &SessionTokens,
        generation: &mut u64,
        observed_epoch: u64,
    ) -> Result<SessionTokens> {
        if self.epoch.load(Ordering::SeqCst) != observed_epoch {
            return Err(AuthError::Cancelled.into());
        }

        let refreshed = self
            .transport
            .refresh(&stale.refresh_token)
            .await
            .map_err(|error| {
                tracing::warn!("Token refresh failed: {error}");
                AuthError::RefreshFailed(error.to_string())
            })?;

        if self.epoch.load(Ordering::SeqCst) != observed_epoch {
            // The session changed while the refresh was in flight; the
            // result belongs to nobody now.
            return Err(AuthError::Cancelled.into());
        }

        self.tokens.save(session, &refreshed)?;
        *generation = generation.wrapping_add(1);
        tracing::debug!("Refreshed session tokens for {session}");
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token_store::MemoryTokenStore;
    use crate::transport::{AccountDto, TokenGrant, TransportResult};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Transport whose refresh always succeeds with a fixed new token pair.
    struct CountingTransport {
        refresh_calls: AtomicUsize,
        refresh_tokens_seen: std::sync::Mutex<Vec<String>>,
        refresh_ok: bool,
    }

    impl CountingTransport {
        fn new(refresh_ok: bool) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_tokens_seen: std::sync::Mutex::new(Vec::new()),
                refresh_ok,
            }
        }
    }

    #[async_trait]
    impl RewardsApi for CountingTransport {
        async fn login(&self, _: &str, _: &str) -> TransportResult<TokenGrant> {
            Err(TransportError::NetworkUnavailable)
        }
        async fn register(&self, _: &str, _: &str, _: &str) -> TransportResult<TokenGrant> {
            Err(TransportError::NetworkUnavailable)
        }
        async fn refresh(&self, refresh_token: &str) -> TransportResult<SessionTokens> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.refresh_tokens_seen
                .lock()
                .unwrap()
                .push(refresh_token.to_string());
            // Let concurrent callers pile up behind the generation lock.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            if self.refresh_ok {
                Ok(SessionTokens::new("new-access", "new-refresh"))
            } else {
                Err(TransportError::Unauthorized)
            }
        }
        async fn logout(&self, _: &str) -> TransportResult<()> {
            Ok(())
        }
        async fn fetch_account(&self, _: &str) -> TransportResult<AccountDto> {
            Err(TransportError::NetworkUnavailable)
        }
        async fn update_account(&self, _: &str, _: &AccountDto) -> TransportResult<AccountDto> {
            Err(TransportError::NetworkUnavailable)
        }
        async fn fetch_image(&self, _: &str) -> TransportResult<Vec<u8>> {
            Err(TransportError::NetworkUnavailable)
        }
    }

    fn setup(refresh_ok: bool) -> (Arc<CountingTransport>, Arc<MemoryTokenStore>, RefreshCoordinator)
    {
        let transport = Arc::new(CountingTransport::new(refresh_ok));
        let tokens = Arc::new(MemoryTokenStore::new());
        let coordinator = RefreshCoordinator::new(transport.clone(), tokens.clone());
        (transport, tokens, coordinator)
    }

    fn op(
        access_token: String,
    ) -> impl Future<Output = std::result::Result<String, TransportError>> {
        async move {
            if access_token == "new-access" {
                Ok(access_token)
            } else {
                Err(TransportError::Unauthorized)
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_and_retry_once_succeeds() {
        let (transport, tokens, coordinator) = setup(true);
        let session = SessionId::new("s1");
        tokens
            .save(&session, &SessionTokens::new("stale", "refresh"))
            .unwrap();

        let value = coordinator.execute(&session, op).await.unwrap();
        assert_eq!(value, "new-access");
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
        // New tokens were persisted.
        let stored = tokens.load(&session).unwrap().unwrap();
        assert_eq!(stored.access_token, "new-access");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_unauthorized_calls_share_one_refresh() {
        let (transport, tokens, coordinator) = setup(true);
        let session = SessionId::new("s1");
        tokens
            .save(&session, &SessionTokens::new("stale", "refresh"))
            .unwrap();

        let (a, b) = tokio::join!(
            coordinator.execute(&session, op),
            coordinator.execute(&session, op)
        );
        assert_eq!(a.unwrap(), "new-access");
        assert_eq!(b.unwrap(), "new-access");
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_failure_surfaces_once() {
        let (transport, tokens, coordinator) = setup(false);
        let session = SessionId::new("s1");
        tokens
            .save(&session, &SessionTokens::new("stale", "refresh"))
            .unwrap();

        let result = coordinator.execute(&session, op).await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::RefreshFailed(_)))
        ));
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_tokens_never_trigger_refresh() {
        let (transport, _tokens, coordinator) = setup(true);
        let result = coordinator.execute(&SessionId::guest(), op).await;
        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::NotAuthenticated))
        ));
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn invalidate_abandons_in_flight_refresh() {
        let (transport, tokens, coordinator) = setup(true);
        let session = SessionId::new("s1");
        tokens
            .save(&session, &SessionTokens::new("stale", "refresh"))
            .unwrap();

        let coordinator = Arc::new(coordinator);
        let racing = {
            let coordinator = coordinator.clone();
            let session = session.clone();
            tokio::spawn(async move { coordinator.execute(&session, op).await })
        };
        // Give the first call time to enter the refresh, then supersede it.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        coordinator.invalidate();

        let result = racing.await.unwrap();
        assert!(matches!(result, Err(Error::Auth(AuthError::Cancelled))));
        // The superseded refresh result was discarded, not persisted.
        let stored = tokens.load(&session).unwrap().unwrap();
        assert_eq!(stored.access_token, "stale");
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_force_refreshes_never_replay_a_spent_token() {
        let (transport, tokens, coordinator) = setup(true);
        let session = SessionId::new("s1");
        tokens
            .save(&session, &SessionTokens::new("stale", "refresh"))
            .unwrap();

        // The second caller waits on the generation lock; once inside it
        // must send the token pair the first refresh persisted, not the one
        // that was current when it was called.
        let (a, b) = tokio::join!(
            coordinator.force_refresh(&session),
            coordinator.force_refresh(&session)
        );
        a.unwrap();
        b.unwrap();

        let seen = transport.refresh_tokens_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], "refresh");
        assert_eq!(seen[1], "new-refresh");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn force_refresh_replaces_tokens() {
        let (_transport, tokens, coordinator) = setup(true);
        let session = SessionId::new("s1");
        tokens
            .save(&session, &SessionTokens::new("stale", "refresh"))
            .unwrap();

        let fresh = coordinator.force_refresh(&session).await.unwrap();
        assert_eq!(fresh.access_token, "new-access");
        assert_eq!(
            tokens.load(&session).unwrap().unwrap().access_token,
            "new-access"
        );
    }
}
