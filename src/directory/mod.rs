pub mod placement;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::actor::props::Props;
use crate::actor::SpawnError;
use crate::address::{Address, NodeId};
use crate::config::DirectoryConfig;
use crate::directory::placement::{PlacementMetrics, PlacementStrategy};
use crate::system::{ActorSystem, SystemCmd, SystemMsg};
use crate::validate::validate_name;

/// Identity of a virtual actor: kind, id and an optional partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VirtualKey {
    pub kind: String,
    pub id: String,
    pub partition: Option<String>,
}

impl VirtualKey {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> VirtualKey {
        VirtualKey {
            kind: kind.into(),
            id: id.into(),
            partition: None,
        }
    }

    pub fn partitioned(
        kind: impl Into<String>,
        id: impl Into<String>,
        partition: impl Into<String>,
    ) -> VirtualKey {
        VirtualKey {
            kind: kind.into(),
            id: id.into(),
            partition: Some(partition.into()),
        }
    }

    fn path(&self) -> String {
        match &self.partition {
            Some(p) => format!("/virtual/{}/{}#{}", self.kind, self.id, p),
            None => format!("/virtual/{}/{}", self.kind, self.id),
        }
    }
}

impl std::fmt::Display for VirtualKey {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.partition {
            Some(p) => write!(f, "{}/{}#{}", self.kind, self.id, p),
            None => write!(f, "{}/{}", self.kind, self.id),
        }
    }
}

/// One directory slot: where a virtual actor lives and how warm it is.
pub struct DirectoryEntry {
    pub address: Address,
    pub node: NodeId,
    last_accessed_ms: AtomicU64,
    activation_count: AtomicU64,
    is_active: AtomicBool,
}

impl DirectoryEntry {
    pub fn activation_count(&self) -> u64 {
        self.activation_count.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, Error)]
pub enum DirectoryError {
    #[error("no behavior factory registered for kind {0}")]
    UnknownKind(String),
    #[error("invalid virtual id: {0}")]
    InvalidId(String),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

#[derive(Clone, Debug, Default)]
pub struct DirectoryStats {
    pub hit_count: u64,
    pub miss_count: u64,
    pub cache_size: usize,
    pub actors_per_node: HashMap<String, usize>,
}

/// Address-to-cell map for virtual actors.
///
/// First access to an unknown id runs the registered factory for its
/// kind, places the cell and caches the entry. The cache is bounded:
/// at capacity the least recently used active entry is deactivated.
/// The idle reaper deactivates entries past `max_idle`; re-access
/// transparently re-activates at the same address.
#[derive(Clone)]
pub(crate) struct VirtualDirectory {
    inner: Arc<DirectoryInner>,
}

struct DirectoryInner {
    entries: DashMap<VirtualKey, Arc<DirectoryEntry>>,
    factories: DashMap<String, Props>,
    placement: Box<dyn PlacementStrategy>,
    nodes: RwLock<Vec<NodeId>>,
    capacity: usize,
    max_idle_ms: u64,
    epoch: Instant,
    hits: AtomicU64,
    misses: AtomicU64,
    // serializes activation/eviction decisions; never held across turns
    activation: Mutex<()>,
}

impl VirtualDirectory {
    pub(crate) fn new(cfg: &DirectoryConfig, local: NodeId) -> VirtualDirectory {
        VirtualDirectory {
            inner: Arc::new(DirectoryInner {
                entries: DashMap::new(),
                factories: DashMap::new(),
                placement: cfg.placement.build(),
                nodes: RwLock::new(vec![local]),
                capacity: cfg.cache_size,
                max_idle_ms: cfg.max_idle.as_millis() as u64,
                epoch: Instant::now(),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                activation: Mutex::new(()),
            }),
        }
    }

    pub(crate) fn register_kind(&self, kind: &str, props: Props) -> Result<(), DirectoryError> {
        validate_name(kind).map_err(|e| DirectoryError::InvalidId(e.name))?;
        self.inner.factories.insert(kind.to_string(), props);
        Ok(())
    }

    pub(crate) fn has_kind(&self, kind: &str) -> bool {
        self.inner.factories.contains_key(kind)
    }

    pub(crate) fn factory(&self, kind: &str) -> Option<Props> {
        self.inner.factories.get(kind).map(|p| p.value().clone())
    }

    /// The node set placement selects from. Single-node by default;
    /// settable for operational tooling and placement testing. An empty
    /// set is ignored; placement always needs a candidate.
    pub(crate) fn set_nodes(&self, nodes: Vec<NodeId>) {
        if nodes.is_empty() {
            return;
        }
        *self.inner.nodes.write().unwrap() = nodes;
    }

    /// Resolves a virtual id to a live address, activating on first
    /// access and re-activating after eviction.
    pub(crate) fn get_or_activate(
        &self,
        sys: &ActorSystem,
        key: &VirtualKey,
    ) -> Result<Address, DirectoryError> {
        if let Some(entry) = self.inner.entries.get(key) {
            if entry.is_active() {
                self.touch(&entry);
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.address.clone());
            }
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        self.activate(sys, key)
    }

    fn activate(&self, sys: &ActorSystem, key: &VirtualKey) -> Result<Address, DirectoryError> {
        let _guard = self.inner.activation.lock().unwrap();

        // lost race: someone else activated while we waited
        if let Some(entry) = self.inner.entries.get(key) {
            if entry.is_active() {
                self.touch(&entry);
                return Ok(entry.address.clone());
            }
        }

        validate_name(&key.id).map_err(|e| DirectoryError::InvalidId(e.name))?;
        let props = self
            .inner
            .factories
            .get(&key.kind)
            .map(|p| p.value().clone())
            .ok_or_else(|| DirectoryError::UnknownKind(key.kind.clone()))?;

        if self.active_count() >= self.inner.capacity {
            self.evict_lru(sys);
        }

        let nodes = self.inner.nodes.read().unwrap().clone();
        let metrics = self.metrics(&nodes);
        let node = self.inner.placement.select(key, &nodes, &metrics);

        let mut address = Address::new(node.clone(), &key.kind, &key.id, &key.path());
        if let Some(p) = &key.partition {
            address = address.with_partition(p);
        }

        let cell = sys.spawn_virtual(props, address.clone())?;
        debug!(
            "activated {key} on {node} via {}",
            self.inner.placement.name()
        );

        // a fresh entry each activation: placement may have moved the
        // actor; only the activation count carries over
        let prior_activations = self
            .inner
            .entries
            .get(key)
            .map(|e| e.activation_count())
            .unwrap_or(0);

        let entry = Arc::new(DirectoryEntry {
            address: cell.address().clone(),
            node,
            last_accessed_ms: AtomicU64::new(0),
            activation_count: AtomicU64::new(prior_activations + 1),
            is_active: AtomicBool::new(true),
        });
        self.touch(&entry);
        self.inner.entries.insert(key.clone(), entry);

        Ok(address)
    }

    /// Stops the backing cell and marks the entry cold. The cell's own
    /// stop path drains its mailbox to dead letters.
    pub(crate) fn deactivate(&self, sys: &ActorSystem, key: &VirtualKey) -> bool {
        let Some(entry) = self.inner.entries.get(key).map(|e| e.value().clone()) else {
            return false;
        };
        if !entry.is_active() {
            return false;
        }

        entry.is_active.store(false, Ordering::Release);
        if let Some(cell) = sys.provider().lookup(entry.address.path()) {
            cell.cell.sys_send(SystemMsg::Command(SystemCmd::Stop));
        }
        trace!("deactivated {key}");
        true
    }

    /// Marks the entry cold when its cell stopped through any path the
    /// directory did not initiate (supervision stop, shutdown).
    pub(crate) fn note_stopped(&self, address: &Address) {
        if !address.path().starts_with("/virtual/") {
            return;
        }
        for entry in self.inner.entries.iter() {
            if &entry.value().address == address {
                entry.value().is_active.store(false, Ordering::Release);
                return;
            }
        }
    }

    fn evict_lru(&self, sys: &ActorSystem) {
        let victim = self
            .inner
            .entries
            .iter()
            .filter(|e| e.value().is_active())
            .min_by_key(|e| e.value().last_accessed_ms.load(Ordering::Relaxed))
            .map(|e| e.key().clone());

        if let Some(key) = victim {
            trace!("cache full; evicting {key}");
            self.deactivate(sys, &key);
        }
    }

    /// Deactivates entries idle past the configured limit, then applies
    /// the strategy's migration hints. A migrated entry is simply
    /// deactivated; the next access re-places it.
    pub(crate) fn reap(&self, sys: &ActorSystem) {
        let now_ms = self.now_ms();
        let nodes = self.inner.nodes.read().unwrap().clone();
        let metrics = self.metrics(&nodes);

        let mut cold = Vec::new();
        for entry in self.inner.entries.iter() {
            let e = entry.value();
            if !e.is_active() {
                continue;
            }
            let idle = now_ms.saturating_sub(e.last_accessed_ms.load(Ordering::Relaxed));
            if idle > self.inner.max_idle_ms || self.inner.placement.should_migrate(e, &metrics) {
                cold.push(entry.key().clone());
            }
        }

        for key in cold {
            self.deactivate(sys, &key);
        }
    }

    pub(crate) fn stats(&self) -> DirectoryStats {
        let mut actors_per_node = HashMap::new();
        for entry in self.inner.entries.iter() {
            let e = entry.value();
            if e.is_active() {
                *actors_per_node
                    .entry(e.node.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        DirectoryStats {
            hit_count: self.inner.hits.load(Ordering::Relaxed),
            miss_count: self.inner.misses.load(Ordering::Relaxed),
            cache_size: self.active_count(),
            actors_per_node,
        }
    }

    pub(crate) fn actors_on_node(&self, node: &NodeId) -> Vec<Address> {
        self.inner
            .entries
            .iter()
            .filter(|e| e.value().is_active() && &e.value().node == node)
            .map(|e| e.value().address.clone())
            .collect()
    }

    pub(crate) fn actors_of_kind(&self, kind: &str) -> Vec<Address> {
        self.inner
            .entries
            .iter()
            .filter(|e| e.value().is_active() && e.key().kind == kind)
            .map(|e| e.value().address.clone())
            .collect()
    }

    fn active_count(&self) -> usize {
        self.inner
            .entries
            .iter()
            .filter(|e| e.value().is_active())
            .count()
    }

    fn metrics(&self, nodes: &[NodeId]) -> PlacementMetrics {
        let mut actors_per_node = HashMap::new();
        for entry in self.inner.entries.iter() {
            let e = entry.value();
            if e.is_active() {
                *actors_per_node.entry(e.node.clone()).or_insert(0) += 1;
            }
        }
        PlacementMetrics {
            actors_per_node,
            nodes: nodes.to_vec(),
        }
    }

    fn touch(&self, entry: &DirectoryEntry) {
        entry
            .last_accessed_ms
            .store(self.now_ms(), Ordering::Relaxed);
    }

    fn now_ms(&self) -> u64 {
        self.inner.epoch.elapsed().as_millis() as u64
    }
}
