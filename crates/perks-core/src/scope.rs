//! Root coordinator: owns the current session and everything scoped to it.
//!
//! `Scope` is the single entry point for the engine. It serializes all
//! session mutations behind one mutex, so activation (shut down the old
//! session's jobs, abandon its refresh, swap the data store, persist
//! registry and tokens, install the new actor) is atomic from the outside:
//! observers see the previous session or the new one, never a torn state.
//! The guest session is the terminal fallback; unrecoverable auth failures
//! degrade to it instead of crashing.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::auth::{RefreshCoordinator, TokenStore};
use crate::db::{DataStore, SessionRegistry, StagedWrite};
use crate::error::{AuthError, Error, Result};
use crate::media::{optimize_image, ImagePicker, OptimizeOptions, SelectionTicket};
use crate::models::{Account, Attachment, Entity, SessionId, SessionInfo, SessionTokens};
use crate::session::{SessionActor, StorageLocation, StoreSwitcher};
use crate::transport::{AccountDto, RewardsApi};
use crate::util::{normalize_text_option, unix_timestamp_ms};

/// Published view of the current session, updated only at commit points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub is_authenticated: bool,
    pub info: SessionInfo,
}

/// Where replacement image content comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Url(String),
    Bytes(Vec<u8>),
}

struct ScopeInner {
    session: SessionActor,
    registry: SessionRegistry,
    switcher: StoreSwitcher,
}

/// The engine's root object.
pub struct Scope {
    inner: Mutex<ScopeInner>,
    transport: Arc<dyn RewardsApi>,
    tokens: Arc<dyn TokenStore>,
    refresh: RefreshCoordinator,
    picker: ImagePicker,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl Scope {
    /// Open the engine with persistent per-account stores under `data_dir`.
    ///
    /// Starts in the guest session; call
    /// [`Scope::restore_last_active_session`] to resume a previous login.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        transport: Arc<dyn RewardsApi>,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        let registry = SessionRegistry::open(data_dir.join("registry.db")).await?;
        Self::build(registry, StorageLocation::OnDisk(data_dir), transport, tokens).await
    }

    /// Open a fully in-memory engine (tests, ephemeral runs).
    pub async fn open_in_memory(
        transport: Arc<dyn RewardsApi>,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let registry = SessionRegistry::open_in_memory().await?;
        Self::build(registry, StorageLocation::InMemory, transport, tokens).await
    }

    async fn build(
        registry: SessionRegistry,
        location: StorageLocation,
        transport: Arc<dyn RewardsApi>,
        tokens: Arc<dyn TokenStore>,
    ) -> Result<Self> {
        let mut switcher = StoreSwitcher::new(location);
        switcher.switch_to(SessionId::GUEST, true).await?;

        let session = SessionActor::guest();
        let (snapshot, _) = watch::channel(SessionSnapshot {
            is_authenticated: false,
            info: session.info().clone(),
        });
        let refresh = RefreshCoordinator::new(transport.clone(), tokens.clone());

        Ok(Self {
            inner: Mutex::new(ScopeInner {
                session,
                registry,
                switcher,
            }),
            transport,
            tokens,
            refresh,
            picker: ImagePicker::new(),
            snapshot,
        })
    }

    /// Whether the current session is authenticated (not guest).
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.snapshot.borrow().is_authenticated
    }

    /// Identity of the current session.
    #[must_use]
    pub fn current_session_info(&self) -> SessionInfo {
        self.snapshot.borrow().info.clone()
    }

    /// Subscribe to session changes. A value is published only after an
    /// activation fully commits.
    #[must_use]
    pub fn watch_session(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// The image selection state machine.
    #[must_use]
    pub fn picker(&self) -> &ImagePicker {
        &self.picker
    }

    /// Authenticate against the remote API and activate the new session.
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionInfo> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "Email and password cannot be empty".to_string(),
            ));
        }

        // Network first, without holding the scope lock.
        let grant = self.transport.login(email, password).await?;

        let mut inner = self.inner.lock().await;
        let info = SessionInfo::new(
            SessionId::generate(),
            grant.account.external_id.clone(),
            grant.account.name.clone(),
            grant.account.email.clone(),
        );
        self.activate(&mut inner, info.clone(), grant.tokens, Some(&grant.account))
            .await?;
        Ok(info)
    }

    /// Create a remote account and activate its first session.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<SessionInfo> {
        let name = name.trim();
        let email = email.trim();
        if name.is_empty() || email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "Name, email and password cannot be empty".to_string(),
            ));
        }

        let grant = self.transport.register(name, email, password).await?;

        let mut inner = self.inner.lock().await;
        let info = SessionInfo::new(
            SessionId::generate(),
            grant.account.external_id.clone(),
            grant.account.name.clone(),
            grant.account.email.clone(),
        );
        self.activate(&mut inner, info.clone(), grant.tokens, Some(&grant.account))
            .await?;
        Ok(info)
    }

    /// End the current session and return to guest.
    ///
    /// Idempotent: logging out of the guest session is a no-op. The stored
    /// session record survives (it can be switched back into later); only
    /// its credentials are dropped.
    pub async fn log_out(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_guest() {
            return Ok(());
        }

        let session_id = inner.session.info().session_id.clone();
        if let Some(tokens) = inner.session.tokens() {
            // Best effort; local logout proceeds even when the server is
            // unreachable.
            if let Err(error) = self.transport.logout(&tokens.access_token).await {
                tracing::warn!("Remote logout failed: {error}");
            }
        }
        self.tokens.clear(&session_id)?;
        inner.switcher.flush().await?;
        self.fall_back_to_guest(&mut inner).await
    }

    /// Activate a previously stored session.
    ///
    /// `NotFound` for unknown ids; `NotAuthenticated` when the stored
    /// session has no credentials left. The guest id always works.
    pub async fn switch_session(&self, id: &SessionId) -> Result<SessionInfo> {
        let mut inner = self.inner.lock().await;
        if id.is_guest() {
            self.fall_back_to_guest(&mut inner).await?;
            return Ok(inner.session.info().clone());
        }
        if inner.session.info().session_id == *id {
            return Ok(inner.session.info().clone());
        }

        let mut info = inner
            .registry
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let tokens = self.tokens.load(id)?.ok_or(AuthError::NotAuthenticated)?;

        info.last_login_at = unix_timestamp_ms();
        self.activate(&mut inner, info.clone(), tokens, None).await?;
        Ok(info)
    }

    /// Resume the session marked active on the previous run.
    ///
    /// A session only resumes when both its registry record and its stored
    /// credentials are present; anything less falls back to guest instead
    /// of failing startup.
    pub async fn restore_last_active_session(&self) -> Result<SessionInfo> {
        let mut inner = self.inner.lock().await;

        let Some(id) = inner.registry.get_active().await? else {
            self.fall_back_to_guest(&mut inner).await?;
            return Ok(inner.session.info().clone());
        };

        let info = inner.registry.get(&id).await?;
        let tokens = self.tokens.load(&id).ok().flatten();
        let (Some(info), Some(tokens)) = (info, tokens) else {
            tracing::warn!("Stored active session {id} is unusable; starting as guest");
            inner.registry.clear_active().await?;
            self.fall_back_to_guest(&mut inner).await?;
            return Ok(inner.session.info().clone());
        };

        if let Err(error) = self.activate(&mut inner, info.clone(), tokens, None).await {
            tracing::warn!("Failed to restore session {id}: {error}");
            self.fall_back_to_guest(&mut inner).await?;
            return Ok(inner.session.info().clone());
        }
        Ok(info)
    }

    /// Persist new identity fields for a stored session.
    ///
    /// A no-op for the guest identity. When the target is the current
    /// session the live actor (and the published snapshot) update too.
    pub async fn update_session_info(&self, info: SessionInfo) -> Result<()> {
        if info.is_guest() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.registry.update_info(&info).await?;
        if inner.session.info().session_id == info.session_id {
            inner.session.update_info(info);
            self.publish(&inner.session);
        }
        Ok(())
    }

    /// All stored session records, most recently used first.
    pub async fn get_stored_sessions(&self) -> Result<Vec<SessionInfo>> {
        let inner = self.inner.lock().await;
        inner.registry.list().await
    }

    /// Forget a stored session and its credentials.
    ///
    /// Removing the current session also falls back to guest.
    pub async fn remove_stored_session(&self, id: &SessionId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.registry.remove(id).await?;
        self.tokens.clear(id)?;
        if inner.session.info().session_id == *id {
            self.fall_back_to_guest(&mut inner).await?;
        }
        Ok(())
    }

    /// The current session's access token, straight from the secure store
    /// (so a concurrent refresh is always reflected). `None` for guest.
    pub async fn get_current_access_token(&self) -> Result<Option<String>> {
        let inner = self.inner.lock().await;
        if inner.session.is_guest() {
            return Ok(None);
        }
        let id = &inner.session.info().session_id;
        Ok(self.tokens.load(id)?.map(|tokens| tokens.access_token))
    }

    /// Force a token refresh for the current session.
    ///
    /// A rejected refresh means the session is gone server-side: the engine
    /// falls back to guest and the caller sees a single auth error.
    pub async fn refresh_current_tokens(&self) -> Result<SessionTokens> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_guest() {
            return Err(AuthError::NotAuthenticated.into());
        }
        let id = inner.session.info().session_id.clone();

        match self.refresh.force_refresh(&id).await {
            Ok(tokens) => {
                inner.session.set_tokens(tokens.clone());
                Ok(tokens)
            }
            Err(error) => self.handle_auth_failure(&mut inner, &id, error).await,
        }
    }

    /// Pull the remote account profile into the current session's store.
    ///
    /// Runs with refresh-and-retry-once semantics; a failed refresh degrades
    /// the engine to guest.
    pub async fn sync_account_profile(&self) -> Result<Account> {
        let mut inner = self.inner.lock().await;
        if inner.session.is_guest() {
            return Err(AuthError::NotAuthenticated.into());
        }
        let id = inner.session.info().session_id.clone();

        let fetched = self
            .refresh
            .execute(&id, |access| {
                let transport = Arc::clone(&self.transport);
                async move { transport.fetch_account(&access).await }
            })
            .await;

        match fetched {
            Ok(dto) => {
                // The call may have rotated tokens; keep the actor current.
                if let Some(tokens) = self.tokens.load(&id)? {
                    inner.session.set_tokens(tokens);
                }
                let store = inner.switcher.store()?;
                seed_account(store, &dto).await?;
                store
                    .fetch_account()
                    .await?
                    .ok_or_else(|| Error::NotFound("account".to_string()))
            }
            Err(error) => self.handle_auth_failure(&mut inner, &id, error).await,
        }
    }

    /// Replace the account's profile image.
    ///
    /// The new content is fetched (or taken as-is), optimized, verified and
    /// only then committed together with the entity update; any failure
    /// along the way leaves the stored attachment untouched. Starting
    /// another replacement supersedes this one: a superseded load never
    /// commits, even when its fetch eventually succeeds.
    pub async fn update_account_image(&self, source: ImageSource) -> Result<()> {
        let ticket = self.picker.begin().await;
        match self.replace_image(ticket, source).await {
            Ok(bytes) => {
                self.picker.complete(ticket, Ok(bytes)).await;
                Ok(())
            }
            Err(error) => {
                self.picker.complete(ticket, Err(error.to_string())).await;
                Err(error)
            }
        }
    }

    async fn replace_image(
        &self,
        ticket: SelectionTicket,
        source: ImageSource,
    ) -> Result<Vec<u8>> {
        let bytes = match source {
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::Url(url) => self.transport.fetch_image(&url).await?,
        };
        let native = optimize_image(&bytes, OptimizeOptions::default())?;

        let mut inner = self.inner.lock().await;
        // Re-checked under the scope lock: a newer selection may have
        // committed while this load was in flight, and its result must win.
        if !self.picker.is_current(ticket).await {
            tracing::debug!("Discarding superseded image replacement");
            return Err(AuthError::Cancelled.into());
        }
        let store = inner.switcher.store()?;
        let mut account = store
            .fetch_account()
            .await?
            .ok_or_else(|| Error::NotFound("account".to_string()))?;
        let mut entity = store
            .fetch_entity(&account.id)
            .await?
            .ok_or_else(|| Error::NotFound(account.id.to_string()))?;

        let mut image = Attachment::from_raw(bytes.clone())?;
        image.set_native_data(native)?;
        // Native copy just derived from these raw bytes; purge them.
        image.clean_raw_data();

        let previous = account.image.id;
        account.image = image;
        entity.touch();

        store.stage(StagedWrite::RemoveAccountImage {
            account_id: account.id,
            attachment_id: previous,
        });
        store.stage(StagedWrite::UpdateEntity(entity));
        store.stage(StagedWrite::UpsertAccount(account));
        store.save().await?;
        Ok(bytes)
    }

    /// Commit a new authenticated session.
    ///
    /// Order matters: the previous session's background work stops and its
    /// in-flight refresh is abandoned before the store swap; a failed swap
    /// aborts the whole activation and keeps the previous store.
    async fn activate(
        &self,
        inner: &mut ScopeInner,
        info: SessionInfo,
        tokens: SessionTokens,
        account: Option<&AccountDto>,
    ) -> Result<()> {
        inner.session.shutdown().await;
        self.refresh.invalidate();

        inner.switcher.switch_to(&info.account_id, false).await?;

        self.tokens.save(&info.session_id, &tokens)?;
        inner.registry.upsert(&info).await?;
        inner.registry.set_active(&info.session_id).await?;

        if let Some(dto) = account {
            seed_account(inner.switcher.store()?, dto).await?;
        }

        inner.session = SessionActor::authenticated(info, tokens);
        // Background work is schedulable from the first moment.
        inner.session.scheduler();
        self.publish(&inner.session);
        tracing::info!(
            "Activated session {}",
            inner.session.info().session_id
        );
        Ok(())
    }

    /// Return to the guest session. Infallible in intent: guest is the
    /// terminal state every failure path converges on.
    async fn fall_back_to_guest(&self, inner: &mut ScopeInner) -> Result<()> {
        inner.session.shutdown().await;
        self.refresh.invalidate();
        inner.switcher.switch_to(SessionId::GUEST, true).await?;
        inner.registry.clear_active().await?;
        inner.session = SessionActor::guest();
        self.publish(&inner.session);
        Ok(())
    }

    /// Translate a failed authenticated call: a rejected refresh ends the
    /// session (guest fallback), everything else passes through.
    async fn handle_auth_failure<T>(
        &self,
        inner: &mut ScopeInner,
        id: &SessionId,
        error: Error,
    ) -> Result<T> {
        if matches!(error, Error::Auth(AuthError::RefreshFailed(_))) {
            tracing::warn!("Session {id} can no longer be refreshed; ending it");
            self.tokens.clear(id)?;
            self.fall_back_to_guest(inner).await?;
        }
        Err(error)
    }

    fn publish(&self, session: &SessionActor) {
        self.snapshot.send_replace(SessionSnapshot {
            is_authenticated: session.is_authenticated(),
            info: session.info().clone(),
        });
    }
}

/// Mirror the remote account view into the open store.
///
/// Creates the entity, its sync companion and the account row on first
/// sight; later calls update the mutable fields in place.
async fn seed_account(store: &mut DataStore, dto: &AccountDto) -> Result<()> {
    match store.fetch_account().await? {
        Some(mut account) => {
            let mut entity = store
                .fetch_entity(&account.id)
                .await?
                .ok_or_else(|| Error::NotFound(account.id.to_string()))?;
            account.name = dto.name.clone();
            account.email = dto.email.clone();
            account.phone = normalize_text_option(dto.phone.clone());
            account.points = dto.points;
            entity.touch();
            store.stage(StagedWrite::UpdateEntity(entity));
            store.stage(StagedWrite::UpsertAccount(account));
        }
        None => {
            let mut account = Account::new(dto.name.clone(), dto.email.clone(), dto.phone.clone())?;
            account.points = dto.points;
            if let Some(url) = &dto.image_url {
                account.image = Attachment::from_url(url.clone())?;
            }
            let entity = Entity::new_synced(account.id, dto.external_id.clone())?;
            store.stage(StagedWrite::CreateEntity(entity));
            store.stage(StagedWrite::UpsertAccount(account));
        }
    }
    store.save().await
}
