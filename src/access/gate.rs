use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use uuid::Uuid;

use super::capability::{CapabilitySet, Identity};
use super::role::{GrantOutcome, RevokeOutcome, Role};
use super::store::{RoleStore, StoreError};

const DEFAULT_RESOLVE_TIMEOUT_SECS: u64 = 10;

/// Tunables for the gate: how long a resolution may block, and where the two
/// role groups get redirected when they land on the wrong side of the portal.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    pub resolve_timeout: Duration,
    pub admin_home: String,
    pub user_home: String,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: Duration::from_secs(DEFAULT_RESOLVE_TIMEOUT_SECS),
            admin_home: "/admin".to_string(),
            user_home: "/dashboard".to_string(),
        }
    }
}

impl AccessConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = std::env::var("ACCESS_RESOLVE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
        {
            config.resolve_timeout = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var("ACCESS_ADMIN_HOME") {
            config.admin_home = path;
        }
        if let Ok(path) = std::env::var("ACCESS_USER_HOME") {
            config.user_home = path;
        }

        config
    }
}

/// Out-of-band problem signal attached to a resolution. The capabilities are
/// always usable either way; this tells the caller whether something went
/// wrong underneath and whether retrying can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessFault {
    /// Transient failure reaching the role store. Offer a retry.
    StoreUnavailable,
    /// The store's access policy rejected the read. Treated as zero roles,
    /// never as elevated trust, and not worth retrying.
    PermissionDenied,
}

impl AccessFault {
    pub fn code(&self) -> &'static str {
        match self {
            AccessFault::StoreUnavailable => "store_unavailable",
            AccessFault::PermissionDenied => "permission_denied",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessFault::StoreUnavailable)
    }
}

/// What `resolve` hands back: a capability set that is always present, plus
/// the optional fault channel. A store failure never surfaces as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub capabilities: CapabilitySet,
    pub fault: Option<AccessFault>,
}

impl Resolution {
    fn clean(capabilities: CapabilitySet) -> Self {
        Self { capabilities, fault: None }
    }

    fn degraded(capabilities: CapabilitySet, fault: AccessFault) -> Self {
        Self { capabilities, fault: Some(fault) }
    }
}

enum Slot {
    /// A fetch is in flight; waiters share its result through the channel.
    Resolving { gen: u64, rx: watch::Receiver<Option<Resolution>> },
    Ready(Resolution),
}

struct GateInner {
    slots: HashMap<Uuid, Slot>,
    next_gen: u64,
}

/// The one component the rest of the code consults for "can this identity do
/// X". Holds the per-identity capability cache.
///
/// Concurrent resolves for the same identity collapse onto a single in-flight
/// store fetch; resolves for different identities proceed independently. A
/// fetch that exceeds the configured timeout (or whose driving future is
/// dropped) is torn back down so the next resolve starts fresh.
pub struct AccessGate {
    store: Arc<dyn RoleStore>,
    config: AccessConfig,
    inner: Mutex<GateInner>,
}

enum Claim {
    Hit(Resolution),
    Wait { rx: watch::Receiver<Option<Resolution>>, gen: u64 },
    Fetch { tx: watch::Sender<Option<Resolution>>, gen: u64 },
}

impl AccessGate {
    pub fn new(store: Arc<dyn RoleStore>, config: AccessConfig) -> Self {
        Self {
            store,
            config,
            inner: Mutex::new(GateInner { slots: HashMap::new(), next_gen: 0 }),
        }
    }

    pub fn config(&self) -> &AccessConfig {
        &self.config
    }

    /// Resolve the capability set for the given identity. `None` resolves
    /// immediately to the unauthenticated empty set without touching the
    /// store.
    pub async fn resolve(&self, identity: Option<&Identity>) -> Resolution {
        match identity {
            Some(identity) => self.resolve_id(identity.id).await,
            None => Resolution::clean(CapabilitySet::unauthenticated()),
        }
    }

    pub async fn resolve_id(&self, identity_id: Uuid) -> Resolution {
        let claim = {
            let mut inner = self.inner.lock().unwrap();
            match inner.slots.get(&identity_id) {
                Some(Slot::Ready(resolution)) => Claim::Hit(resolution.clone()),
                Some(Slot::Resolving { gen, rx }) => Claim::Wait { rx: rx.clone(), gen: *gen },
                None => {
                    inner.next_gen += 1;
                    let gen = inner.next_gen;
                    let (tx, rx) = watch::channel(None);
                    inner.slots.insert(identity_id, Slot::Resolving { gen, rx });
                    Claim::Fetch { tx, gen }
                }
            }
        };

        match claim {
            Claim::Hit(resolution) => resolution,
            Claim::Wait { rx, gen } => self.await_in_flight(identity_id, rx, gen).await,
            Claim::Fetch { tx, gen } => self.fetch(identity_id, tx, gen).await,
        }
    }

    /// Forces the next `resolve` for this identity to re-fetch. Called on
    /// sign-in, sign-out, token refresh, after every successful role mutation,
    /// and on an explicit refresh request.
    pub fn invalidate(&self, identity_id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if inner.slots.remove(&identity_id).is_some() {
            tracing::debug!(identity_id = %identity_id, "capability cache invalidated");
        }
    }

    /// Grant through the gate so the subject's cache entry is dropped in the
    /// same breath as the store write.
    pub async fn grant_role(&self, identity_id: Uuid, role: Role) -> Result<GrantOutcome, StoreError> {
        let outcome = self.store.grant_role(identity_id, role).await?;
        self.invalidate(identity_id);
        Ok(outcome)
    }

    pub async fn revoke_role(&self, identity_id: Uuid, role: Role) -> Result<RevokeOutcome, StoreError> {
        let outcome = self.store.revoke_role(identity_id, role).await?;
        self.invalidate(identity_id);
        Ok(outcome)
    }

    async fn await_in_flight(
        &self,
        identity_id: Uuid,
        mut rx: watch::Receiver<Option<Resolution>>,
        gen: u64,
    ) -> Resolution {
        let waited = tokio::time::timeout(self.config.resolve_timeout, async {
            loop {
                if let Some(resolution) = rx.borrow_and_update().clone() {
                    return Some(resolution);
                }
                if rx.changed().await.is_err() {
                    // The fetching future was dropped before publishing.
                    return None;
                }
            }
        })
        .await;

        match waited {
            Ok(Some(resolution)) => resolution,
            Ok(None) | Err(_) => {
                tracing::warn!(identity_id = %identity_id, "in-flight role fetch stalled; resetting");
                self.expire(identity_id, gen);
                Resolution::degraded(CapabilitySet::empty_for(identity_id), AccessFault::StoreUnavailable)
            }
        }
    }

    async fn fetch(
        &self,
        identity_id: Uuid,
        tx: watch::Sender<Option<Resolution>>,
        gen: u64,
    ) -> Resolution {
        let fetched =
            tokio::time::timeout(self.config.resolve_timeout, self.store.get_roles(identity_id)).await;

        let (resolution, cacheable) = match fetched {
            Ok(Ok(roles)) => {
                (Resolution::clean(CapabilitySet::resolved(identity_id, roles)), true)
            }
            Ok(Err(StoreError::PermissionDenied(reason))) => {
                tracing::warn!(identity_id = %identity_id, %reason, "role read rejected by store policy; resolving to zero roles");
                (
                    Resolution::degraded(CapabilitySet::empty_for(identity_id), AccessFault::PermissionDenied),
                    true,
                )
            }
            Ok(Err(StoreError::Unavailable(reason))) => {
                tracing::warn!(identity_id = %identity_id, %reason, "role store unavailable");
                (
                    Resolution::degraded(CapabilitySet::empty_for(identity_id), AccessFault::StoreUnavailable),
                    false,
                )
            }
            Err(_) => {
                tracing::warn!(identity_id = %identity_id, "role fetch timed out");
                (
                    Resolution::degraded(CapabilitySet::empty_for(identity_id), AccessFault::StoreUnavailable),
                    false,
                )
            }
        };

        {
            let mut inner = self.inner.lock().unwrap();
            let still_current = matches!(
                inner.slots.get(&identity_id),
                Some(Slot::Resolving { gen: current, .. }) if *current == gen
            );
            if still_current {
                if cacheable {
                    inner.slots.insert(identity_id, Slot::Ready(resolution.clone()));
                } else {
                    inner.slots.remove(&identity_id);
                }
            }
            // If the slot changed hands (invalidation raced the fetch), leave
            // it alone; waiters still get this fetch's result below.
        }

        let _ = tx.send(Some(resolution.clone()));
        resolution
    }

    fn expire(&self, identity_id: Uuid, gen: u64) {
        let mut inner = self.inner.lock().unwrap();
        let stuck = matches!(
            inner.slots.get(&identity_id),
            Some(Slot::Resolving { gen: current, .. }) if *current == gen
        );
        if stuck {
            inner.slots.remove(&identity_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::access::role::RoleAssignment;
    use crate::access::store::InMemoryRoleStore;

    struct CountingStore {
        delegate: InMemoryRoleStore,
        reads: AtomicUsize,
    }

    impl CountingStore {
        fn new() -> Self {
            Self { delegate: InMemoryRoleStore::new(), reads: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl RoleStore for CountingStore {
        async fn get_roles(&self, identity_id: Uuid) -> Result<BTreeSet<Role>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.delegate.get_roles(identity_id).await
        }

        async fn grant_role(&self, identity_id: Uuid, role: Role) -> Result<GrantOutcome, StoreError> {
            self.delegate.grant_role(identity_id, role).await
        }

        async fn revoke_role(&self, identity_id: Uuid, role: Role) -> Result<RevokeOutcome, StoreError> {
            self.delegate.revoke_role(identity_id, role).await
        }

        async fn list_assignments(&self, identity_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
            self.delegate.list_assignments(identity_id).await
        }

        async fn any_holder_of(&self, role: Role) -> Result<bool, StoreError> {
            self.delegate.any_holder_of(role).await
        }
    }

    #[tokio::test]
    async fn unauthenticated_resolves_without_store_call() {
        let store = Arc::new(CountingStore::new());
        let gate = AccessGate::new(store.clone(), AccessConfig::default());

        let resolution = gate.resolve(None).await;
        assert!(!resolution.capabilities.is_authenticated());
        assert!(resolution.fault.is_none());
        assert_eq!(store.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn identity_without_assignments_resolves_to_empty_not_error() {
        let store = Arc::new(CountingStore::new());
        let gate = AccessGate::new(store, AccessConfig::default());
        let id = Uuid::new_v4();

        let resolution = gate.resolve_id(id).await;
        assert!(resolution.capabilities.roles().is_empty());
        assert!(!resolution.capabilities.is_admin());
        assert!(!resolution.capabilities.is_business_owner());
        assert!(resolution.fault.is_none());
    }

    #[tokio::test]
    async fn second_resolve_is_served_from_cache() {
        let store = Arc::new(CountingStore::new());
        let gate = AccessGate::new(store.clone(), AccessConfig::default());
        let id = Uuid::new_v4();

        gate.resolve_id(id).await;
        gate.resolve_id(id).await;
        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidation_makes_a_later_grant_visible() {
        let store = Arc::new(CountingStore::new());
        let gate = AccessGate::new(store.clone(), AccessConfig::default());
        let id = Uuid::new_v4();

        assert!(!gate.resolve_id(id).await.capabilities.is_admin());

        store.delegate.grant_role(id, Role::OfficeStaff).await.unwrap();
        // Still cached: the grant bypassed the gate on purpose here.
        assert!(!gate.resolve_id(id).await.capabilities.is_admin());

        gate.invalidate(id);
        assert!(gate.resolve_id(id).await.capabilities.is_admin());
    }

    #[tokio::test]
    async fn gate_level_mutations_invalidate_the_subject() {
        let store = Arc::new(CountingStore::new());
        let gate = AccessGate::new(store, AccessConfig::default());
        let id = Uuid::new_v4();

        assert!(!gate.resolve_id(id).await.capabilities.is_admin());
        gate.grant_role(id, Role::OfficeStaff).await.unwrap();
        assert!(gate.resolve_id(id).await.capabilities.is_admin());

        gate.revoke_role(id, Role::OfficeStaff).await.unwrap();
        assert!(!gate.resolve_id(id).await.capabilities.is_admin());
    }

    struct DeniedStore;

    #[async_trait]
    impl RoleStore for DeniedStore {
        async fn get_roles(&self, _identity_id: Uuid) -> Result<BTreeSet<Role>, StoreError> {
            Err(StoreError::PermissionDenied("row-level policy".to_string()))
        }

        async fn grant_role(&self, _identity_id: Uuid, _role: Role) -> Result<GrantOutcome, StoreError> {
            Err(StoreError::PermissionDenied("row-level policy".to_string()))
        }

        async fn revoke_role(&self, _identity_id: Uuid, _role: Role) -> Result<RevokeOutcome, StoreError> {
            Err(StoreError::PermissionDenied("row-level policy".to_string()))
        }

        async fn list_assignments(&self, _identity_id: Uuid) -> Result<Vec<RoleAssignment>, StoreError> {
            Err(StoreError::PermissionDenied("row-level policy".to_string()))
        }

        async fn any_holder_of(&self, _role: Role) -> Result<bool, StoreError> {
            Err(StoreError::PermissionDenied("row-level policy".to_string()))
        }
    }

    #[tokio::test]
    async fn policy_rejection_resolves_to_zero_roles_and_is_cached() {
        let gate = AccessGate::new(Arc::new(DeniedStore), AccessConfig::default());
        let id = Uuid::new_v4();

        let resolution = gate.resolve_id(id).await;
        assert!(resolution.capabilities.roles().is_empty());
        assert!(!resolution.capabilities.is_admin());
        assert_eq!(resolution.fault, Some(AccessFault::PermissionDenied));
        assert!(!resolution.fault.unwrap().is_retryable());

        // Cached as resolved-to-empty: no retry loop against the policy.
        let again = gate.resolve_id(id).await;
        assert_eq!(again, resolution);
    }
}
