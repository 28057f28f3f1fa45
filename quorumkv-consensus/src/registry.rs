//! Concurrent per-decree registries mapping a `DecreeId` to the live actor
//! handle serving it.
//!
//! Both registries are get-or-create: the first message addressed to a
//! decree spawns its actor, later messages reuse the handle already in the
//! map. Removal (on `closedLifetime` eviction) is idempotent — a `DashMap`
//! entry that is already gone is simply not there to remove.

use std::sync::Arc;

use dashmap::DashMap;

use quorumkv_core::Atlas;
use quorumkv_network::Cluster;
use quorumkv_storage::{Archive, DecreeId, Log};

use crate::acceptor::{spawn_acceptor_with_cluster, AcceptorHandle};
use crate::config::{AcceptorConfig, ProposerConfig};
use crate::coordinator::DecreeProposer;
use crate::proposer::{spawn_proposer, ProposerHandle};

/// Live `AcceptorHandle`s, one per decree this node has ever touched.
#[derive(Clone)]
pub struct AcceptorRegistry {
    handles: Arc<DashMap<DecreeId, AcceptorHandle>>,
    log: Arc<dyn Log>,
    archive: Arc<dyn Archive>,
    config: AcceptorConfig,
    cluster: Arc<dyn Cluster>,
}

impl AcceptorRegistry {
    pub fn new(log: Arc<dyn Log>, archive: Arc<dyn Archive>, config: AcceptorConfig, cluster: Arc<dyn Cluster>) -> Self {
        Self { handles: Arc::new(DashMap::new()), log, archive, config, cluster }
    }

    /// Returns the acceptor for `decree`, spawning one if this is the first
    /// request to ever reach it. `self_proposer` is the capability an
    /// acceptor uses to run its own ballot after `deliberating_timeout`
    /// elapses with no proposer in sight; the acceptor also uses the
    /// registry's cluster to notify accumulated proposers once `Closed`.
    pub fn get_or_create(&self, decree: DecreeId, self_proposer: Arc<dyn DecreeProposer>) -> AcceptorHandle {
        let handle = self
            .handles
            .entry(decree.clone())
            .or_insert_with(|| {
                let handle = spawn_acceptor_with_cluster(
                    decree.clone(),
                    self.log.clone(),
                    self.archive.clone(),
                    self.config.clone(),
                    self_proposer,
                    Some(self.cluster.clone()),
                );
                self.schedule_eviction(decree, handle.closed_notify());
                handle
            })
            .clone();
        handle
    }

    /// Waits for this acceptor to close, then removes it from the registry
    /// after `closed_lifetime`. Registered before the actor has processed any
    /// input, so the `Notify` permit can never be missed by a Closed
    /// transition that lands before this task starts waiting.
    fn schedule_eviction(&self, decree: DecreeId, closed: Arc<tokio::sync::Notify>) {
        let handles = self.handles.clone();
        let lifetime = self.config.closed_lifetime;
        tokio::spawn(async move {
            closed.notified().await;
            tokio::time::sleep(lifetime).await;
            handles.remove(&decree);
        });
    }

    pub fn get(&self, decree: &DecreeId) -> Option<AcceptorHandle> {
        self.handles.get(decree).map(|h| h.clone())
    }

    /// Idempotent: a no-op if `decree` was already removed or never existed.
    pub fn remove(&self, decree: &DecreeId) {
        self.handles.remove(decree);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::NeverProposer;
    use bytes::Bytes;
    use quorumkv_network::ClusterHub;
    use quorumkv_storage::{InMemoryArchive, InMemoryLog};
    use std::time::Duration;

    fn decree() -> DecreeId {
        DecreeId::new(Bytes::from_static(b"k"), 1)
    }

    #[tokio::test]
    async fn closed_acceptor_is_evicted_after_closed_lifetime() {
        let hub = ClusterHub::new();
        let cluster: Arc<dyn Cluster> = Arc::new(hub.join(quorumkv_core::NodeId(1)));
        let config = AcceptorConfig { closed_lifetime: Duration::from_millis(20), ..AcceptorConfig::default() };
        let registry = AcceptorRegistry::new(Arc::new(InMemoryLog::new()), Arc::new(InMemoryArchive::new()), config, cluster);

        let handle = registry.get_or_create(decree(), Arc::new(NeverProposer));
        handle.choose(Bytes::from_static(b"A")).await.unwrap();
        assert_eq!(registry.len(), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_empty());
    }
}

/// Live `ProposerHandle`s, one per decree this node is currently driving.
#[derive(Clone)]
pub struct ProposerRegistry {
    handles: Arc<DashMap<DecreeId, ProposerHandle>>,
    cluster: Arc<dyn Cluster>,
    atlas_for: Arc<dyn Fn(&DecreeId) -> Arc<dyn Atlas> + Send + Sync>,
    config: ProposerConfig,
}

impl ProposerRegistry {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        atlas_for: Arc<dyn Fn(&DecreeId) -> Arc<dyn Atlas> + Send + Sync>,
        config: ProposerConfig,
    ) -> Self {
        Self { handles: Arc::new(DashMap::new()), cluster, atlas_for, config }
    }

    /// Returns the proposer driving `decree`, spawning one (in `Opening`)
    /// if none exists yet.
    pub fn get_or_create(&self, decree: DecreeId) -> ProposerHandle {
        self.handles
            .entry(decree.clone())
            .or_insert_with(|| {
                let atlas = (self.atlas_for)(&decree);
                let handle = spawn_proposer(decree.clone(), self.cluster.clone(), atlas, self.config.clone());
                self.schedule_eviction(decree, handle.closed_notify());
                handle
            })
            .clone()
    }

    /// Mirrors `AcceptorRegistry::schedule_eviction`: removes a proposer from
    /// the registry `closed_lifetime` after it closes.
    fn schedule_eviction(&self, decree: DecreeId, closed: Arc<tokio::sync::Notify>) {
        let handles = self.handles.clone();
        let lifetime = self.config.closed_lifetime;
        tokio::spawn(async move {
            closed.notified().await;
            tokio::time::sleep(lifetime).await;
            handles.remove(&decree);
        });
    }

    pub fn get(&self, decree: &DecreeId) -> Option<ProposerHandle> {
        self.handles.get(decree).map(|h| h.clone())
    }

    pub fn remove(&self, decree: &DecreeId) {
        self.handles.remove(decree);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
