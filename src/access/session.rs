use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::capability::Identity;
use super::gate::AccessGate;
use crate::jwt::JwtConfig;

/// Failure talking to the session backend. Distinct from "no session": a
/// resolver must never report a transport problem as logged-out.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session backend unavailable: {0}")]
    Backend(String),
}

/// Maps ambient token state to an identity. `Ok(None)` is the valid
/// unauthenticated terminal state.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_token(&self, bearer: Option<&str>) -> Result<Option<Identity>, SessionError>;
}

/// Session resolver over the portal's bearer tokens. The claims carry the
/// identity id and email, so resolution needs no store round-trip; expired or
/// malformed tokens resolve to unauthenticated.
pub struct JwtSessionResolver {
    jwt: Arc<JwtConfig>,
}

impl JwtSessionResolver {
    pub fn new(jwt: Arc<JwtConfig>) -> Self {
        Self { jwt }
    }
}

#[async_trait]
impl SessionResolver for JwtSessionResolver {
    async fn resolve_token(&self, bearer: Option<&str>) -> Result<Option<Identity>, SessionError> {
        let Some(token) = bearer else {
            return Ok(None);
        };

        match self.jwt.decode(token) {
            Ok(claims) => Ok(Some(Identity { id: claims.sub, email: claims.email })),
            Err(err) => {
                tracing::debug!(error = %err, "bearer token did not resolve to a session");
                Ok(None)
            }
        }
    }
}

/// A session transition observed for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Uuid),
    SignedOut(Uuid),
    TokenRefreshed(Uuid),
}

impl SessionEvent {
    pub fn identity_id(&self) -> Uuid {
        match self {
            SessionEvent::SignedIn(id) | SessionEvent::SignedOut(id) | SessionEvent::TokenRefreshed(id) => *id,
        }
    }
}

/// Publishes session transitions, exactly once per observed transition.
/// Re-announcing a sign-in for an identity that is already signed in emits
/// nothing; a refresh for an identity with no session is promoted to a
/// sign-in.
pub struct SessionNotifier {
    tx: broadcast::Sender<SessionEvent>,
    active: Mutex<HashSet<Uuid>>,
}

impl Default for SessionNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx, active: Mutex::new(HashSet::new()) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn signed_in(&self, identity_id: Uuid) {
        let fresh = self.active.lock().unwrap().insert(identity_id);
        if fresh {
            let _ = self.tx.send(SessionEvent::SignedIn(identity_id));
        }
    }

    pub fn signed_out(&self, identity_id: Uuid) {
        let was_active = self.active.lock().unwrap().remove(&identity_id);
        if was_active {
            let _ = self.tx.send(SessionEvent::SignedOut(identity_id));
        }
    }

    pub fn token_refreshed(&self, identity_id: Uuid) {
        let active = self.active.lock().unwrap().contains(&identity_id);
        if active {
            let _ = self.tx.send(SessionEvent::TokenRefreshed(identity_id));
        } else {
            self.signed_in(identity_id);
        }
    }
}

/// Every session transition drops the affected identity's capability cache.
pub fn spawn_invalidation_listener(
    gate: Arc<AccessGate>,
    mut rx: broadcast::Receiver<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => gate.invalidate(event.identity_id()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "session event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notifier_emits_once_per_transition() {
        let notifier = SessionNotifier::new();
        let mut rx = notifier.subscribe();
        let id = Uuid::new_v4();

        notifier.signed_in(id);
        notifier.signed_in(id); // spurious, must not fire
        notifier.token_refreshed(id);
        notifier.signed_out(id);
        notifier.signed_out(id); // spurious

        assert_eq!(rx.try_recv(), Ok(SessionEvent::SignedIn(id)));
        assert_eq!(rx.try_recv(), Ok(SessionEvent::TokenRefreshed(id)));
        assert_eq!(rx.try_recv(), Ok(SessionEvent::SignedOut(id)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn refresh_without_session_counts_as_sign_in() {
        let notifier = SessionNotifier::new();
        let mut rx = notifier.subscribe();
        let id = Uuid::new_v4();

        notifier.token_refreshed(id);
        assert_eq!(rx.try_recv(), Ok(SessionEvent::SignedIn(id)));
    }

    #[tokio::test]
    async fn independent_identities_do_not_mask_each_other() {
        let notifier = SessionNotifier::new();
        let mut rx = notifier.subscribe();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        notifier.signed_in(a);
        notifier.signed_in(b);
        notifier.signed_out(a);

        assert_eq!(rx.try_recv(), Ok(SessionEvent::SignedIn(a)));
        assert_eq!(rx.try_recv(), Ok(SessionEvent::SignedIn(b)));
        assert_eq!(rx.try_recv(), Ok(SessionEvent::SignedOut(a)));
    }
}
