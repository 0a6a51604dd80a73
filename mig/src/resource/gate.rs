use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use mig_config::shared::ResourceConfig;
use tokio::sync::{Mutex, Notify};
use tracing::debug;

/// Kinds of bounded remote resources an action can reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Remote compute slots moving bulk data.
    DataTransfer,
    /// DDL-shaped catalog operations.
    Metadata,
    /// Verification queries.
    Verification,
}

impl ResourceKind {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            ResourceKind::DataTransfer => "data_transfer",
            ResourceKind::Metadata => "metadata",
            ResourceKind::Verification => "verification",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_static_str())
    }
}

/// Resource amounts an action declares before running.
pub type ResourceDemand = HashMap<ResourceKind, u64>;

/// Capacity handed out by [`ResourceGate::try_allocate`].
///
/// A grant can only be returned once: [`ResourceGate::release`] consumes it, so a
/// double release is impossible by construction.
#[derive(Debug)]
pub struct ResourceGrant {
    resources: ResourceDemand,
}

impl ResourceGrant {
    /// Returns whether the grant carries no capacity.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// Inner state of [`ResourceGate`].
#[derive(Debug)]
struct Inner {
    available: HashMap<ResourceKind, u64>,
}

/// Shared admission gate bounding concurrent use of remote resources.
///
/// Every action must reserve its declared demand before executing and release it
/// once finished. Grants are all-or-nothing: either every requested kind is
/// available in full and all of it is deducted atomically, or nothing is deducted
/// and the caller retries on a later poll.
///
/// The gate is constructed once at startup and passed explicitly to every
/// component that admits actions; it is the only mutable structure shared by all
/// workers.
#[derive(Debug, Clone)]
pub struct ResourceGate {
    inner: Arc<Mutex<Inner>>,
    released: Arc<Notify>,
}

impl ResourceGate {
    /// Creates a gate seeded with the configured capacities.
    pub fn new(config: &ResourceConfig) -> Self {
        let available = HashMap::from([
            (ResourceKind::DataTransfer, config.data_transfer_workers),
            (ResourceKind::Metadata, config.metadata_workers),
            (ResourceKind::Verification, config.verification_workers),
        ]);

        Self {
            inner: Arc::new(Mutex::new(Inner { available })),
            released: Arc::new(Notify::new()),
        }
    }

    /// Attempts to reserve the full demand atomically.
    ///
    /// Returns `None` without side effects when any requested kind lacks
    /// capacity; partial grants are never made. An empty demand always succeeds
    /// with an empty grant.
    pub async fn try_allocate(
        &self,
        requester: &str,
        demand: &ResourceDemand,
    ) -> Option<ResourceGrant> {
        let mut inner = self.inner.lock().await;

        for (kind, amount) in demand {
            let available = inner.available.get(kind).copied().unwrap_or(0);
            if available < *amount {
                debug!(
                    requester,
                    resource = %kind,
                    requested = amount,
                    available,
                    "resource allocation refused"
                );
                return None;
            }
        }

        for (kind, amount) in demand {
            if let Some(available) = inner.available.get_mut(kind) {
                *available -= *amount;
            }
        }

        debug!(requester, ?demand, "resource allocation granted");

        Some(ResourceGrant {
            resources: demand.clone(),
        })
    }

    /// Returns previously granted capacity and wakes admission waiters.
    ///
    /// Consumes the grant; releasing an empty grant is a no-op.
    pub async fn release(&self, requester: &str, grant: ResourceGrant) {
        if grant.is_empty() {
            return;
        }

        {
            let mut inner = self.inner.lock().await;
            for (kind, amount) in &grant.resources {
                *inner.available.entry(*kind).or_insert(0) += *amount;
            }
        }

        debug!(requester, resources = ?grant.resources, "resources released");

        self.released.notify_waiters();
    }

    /// Remaining capacity for one resource kind.
    pub async fn available(&self, kind: ResourceKind) -> u64 {
        let inner = self.inner.lock().await;
        inner.available.get(&kind).copied().unwrap_or(0)
    }

    /// Waits until some capacity is released.
    ///
    /// Used by admission loops so a refused reservation parks on a wakeup
    /// instead of busy-polling. Spurious wakeups are fine; callers re-check with
    /// [`ResourceGate::try_allocate`].
    pub async fn released(&self) {
        self.released.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_gate() -> ResourceGate {
        ResourceGate::new(&ResourceConfig {
            data_transfer_workers: 2,
            metadata_workers: 1,
            verification_workers: 1,
        })
    }

    #[tokio::test]
    async fn grants_are_all_or_nothing() {
        let gate = test_gate();
        let demand = ResourceDemand::from([
            (ResourceKind::DataTransfer, 1),
            (ResourceKind::Metadata, 2),
        ]);

        // Metadata capacity is 1, so the whole request must be refused.
        assert!(gate.try_allocate("a1", &demand).await.is_none());

        // Nothing was deducted by the refused attempt.
        assert_eq!(gate.available(ResourceKind::DataTransfer).await, 2);
        assert_eq!(gate.available(ResourceKind::Metadata).await, 1);
    }

    #[tokio::test]
    async fn release_restores_capacity() {
        let gate = test_gate();
        let demand = ResourceDemand::from([(ResourceKind::DataTransfer, 2)]);

        let grant = gate.try_allocate("a1", &demand).await.unwrap();
        assert_eq!(gate.available(ResourceKind::DataTransfer).await, 0);
        assert!(gate.try_allocate("a2", &demand).await.is_none());

        gate.release("a1", grant).await;
        assert_eq!(gate.available(ResourceKind::DataTransfer).await, 2);
        assert!(gate.try_allocate("a2", &demand).await.is_some());
    }

    #[tokio::test]
    async fn empty_demand_always_succeeds() {
        let gate = test_gate();

        let grant = gate.try_allocate("a1", &ResourceDemand::new()).await;
        assert!(grant.is_some_and(|g| g.is_empty()));
    }

    #[tokio::test]
    async fn release_wakes_waiters() {
        let gate = test_gate();
        let demand = ResourceDemand::from([(ResourceKind::Metadata, 1)]);

        let grant = gate.try_allocate("a1", &demand).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            let demand = demand.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(grant) = gate.try_allocate("a2", &demand).await {
                        return grant;
                    }
                    // Bounded wait so a release that raced the registration
                    // cannot hang the test.
                    let _ = tokio::time::timeout(
                        std::time::Duration::from_millis(20),
                        gate.released(),
                    )
                    .await;
                }
            })
        };

        gate.release("a1", grant).await;
        let grant = waiter.await.unwrap();
        assert!(!grant.is_empty());
    }
}
