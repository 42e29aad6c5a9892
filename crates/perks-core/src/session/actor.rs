//! The live in-memory representation of "the current session".

use crate::jobs::JobScheduler;
use crate::models::{SessionInfo, SessionTokens};

/// Runtime-only session state: identity, optional credentials, and a lazily
/// created job scheduler.
///
/// Exactly one actor is current at any time; `Scope` serializes all access
/// behind its mutex, so operations against the same session are totally
/// ordered. An authenticated actor always carries tokens by construction.
#[derive(Debug)]
pub struct SessionActor {
    info: SessionInfo,
    tokens: Option<SessionTokens>,
    is_guest: bool,
    scheduler: Option<JobScheduler>,
}

impl SessionActor {
    /// The always-available guest session.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            info: SessionInfo::guest(),
            tokens: None,
            is_guest: true,
            scheduler: None,
        }
    }

    /// An authenticated session. Tokens are mandatory here: there is no way
    /// to build an "authenticated" actor without credentials.
    #[must_use]
    pub fn authenticated(info: SessionInfo, tokens: SessionTokens) -> Self {
        Self {
            info,
            tokens: Some(tokens),
            is_guest: false,
            scheduler: None,
        }
    }

    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    #[must_use]
    pub fn is_guest(&self) -> bool {
        self.is_guest
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        !self.is_guest
    }

    #[must_use]
    pub fn tokens(&self) -> Option<&SessionTokens> {
        self.tokens.as_ref()
    }

    /// Replace the credentials after a refresh.
    pub fn set_tokens(&mut self, tokens: SessionTokens) {
        if !self.is_guest {
            self.tokens = Some(tokens);
        }
    }

    /// Update display/identity fields in place. The guest identity is fixed.
    pub fn update_info(&mut self, info: SessionInfo) {
        if !self.is_guest && info.session_id == self.info.session_id {
            self.info = info;
        }
    }

    /// The session's job scheduler, created lazily on first use.
    pub fn scheduler(&mut self) -> &JobScheduler {
        self.scheduler.get_or_insert_with(JobScheduler::new)
    }

    #[must_use]
    pub fn has_scheduler(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Stop background work before this actor is replaced.
    pub async fn shutdown(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionId;

    #[test]
    fn guest_actor_has_no_tokens() {
        let actor = SessionActor::guest();
        assert!(actor.is_guest());
        assert!(!actor.is_authenticated());
        assert!(actor.tokens().is_none());
        assert!(!actor.has_scheduler());
    }

    #[test]
    fn authenticated_actor_always_has_tokens() {
        let info = SessionInfo::new(SessionId::generate(), "acct-1", "Dana", "dana@nsp.com");
        let actor = SessionActor::authenticated(info, SessionTokens::new("a", "r"));
        assert!(actor.is_authenticated());
        assert!(actor.tokens().is_some());
    }

    #[test]
    fn guest_identity_is_fixed() {
        let mut actor = SessionActor::guest();
        actor.set_tokens(SessionTokens::new("a", "r"));
        assert!(actor.tokens().is_none());

        let other = SessionInfo::new(SessionId::generate(), "acct-1", "Dana", "dana@nsp.com");
        actor.update_info(other);
        assert!(actor.info().is_guest());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn scheduler_is_created_lazily_and_stopped_on_shutdown() {
        let info = SessionInfo::new(SessionId::generate(), "acct-1", "Dana", "dana@nsp.com");
        let mut actor = SessionActor::authenticated(info, SessionTokens::new("a", "r"));
        assert!(!actor.has_scheduler());

        actor.scheduler().run(async {});
        assert!(actor.has_scheduler());

        actor.shutdown().await;
        assert!(!actor.has_scheduler());
    }
}
