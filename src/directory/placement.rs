use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use crate::address::NodeId;
use crate::directory::{DirectoryEntry, VirtualKey};

/// Which placement strategy the directory runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlacementKind {
    RoundRobin,
    ConsistentHash,
    LoadAware,
}

impl PlacementKind {
    pub(crate) fn build(self) -> Box<dyn PlacementStrategy> {
        match self {
            PlacementKind::RoundRobin => Box::new(RoundRobin),
            PlacementKind::ConsistentHash => Box::new(ConsistentHash::default()),
            PlacementKind::LoadAware => Box::new(LoadAware::default()),
        }
    }
}

/// Node-level facts handed to placement decisions.
#[derive(Clone, Debug, Default)]
pub struct PlacementMetrics {
    pub actors_per_node: HashMap<NodeId, usize>,
    /// The current node set; an entry placed outside it is unhealthy.
    pub nodes: Vec<NodeId>,
}

impl PlacementMetrics {
    fn node_known(&self, node: &NodeId) -> bool {
        self.nodes.iter().any(|n| n == node)
    }

    fn load(&self, node: &NodeId) -> usize {
        self.actors_per_node.get(node).copied().unwrap_or(0)
    }
}

/// Picks a node for a virtual actor at activation and decides when an
/// existing placement should move.
pub trait PlacementStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn select(&self, key: &VirtualKey, nodes: &[NodeId], metrics: &PlacementMetrics) -> NodeId;

    fn should_migrate(&self, entry: &DirectoryEntry, metrics: &PlacementMetrics) -> bool;
}

fn hash_of(value: &impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Deterministic cycle through the node set, seeded by the virtual id
/// hash. Migrates only when the placed node left the set.
pub struct RoundRobin;

impl PlacementStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, key: &VirtualKey, nodes: &[NodeId], _metrics: &PlacementMetrics) -> NodeId {
        let idx = (hash_of(key) % nodes.len() as u64) as usize;
        nodes[idx].clone()
    }

    fn should_migrate(&self, entry: &DirectoryEntry, metrics: &PlacementMetrics) -> bool {
        !metrics.node_known(&entry.node)
    }
}

/// Stable placement on a hash ring: the same id maps to the same node
/// while the node set is unchanged. Conservative about migration; load
/// spikes never move an actor, only ring membership changes do.
pub struct ConsistentHash {
    replicas: u32,
}

impl Default for ConsistentHash {
    fn default() -> Self {
        ConsistentHash { replicas: 32 }
    }
}

impl ConsistentHash {
    fn ring(&self, nodes: &[NodeId]) -> BTreeMap<u64, NodeId> {
        let mut ring = BTreeMap::new();
        for node in nodes {
            for replica in 0..self.replicas {
                ring.insert(hash_of(&(node.as_str(), replica)), node.clone());
            }
        }
        ring
    }
}

impl PlacementStrategy for ConsistentHash {
    fn name(&self) -> &'static str {
        "consistent-hash"
    }

    fn select(&self, key: &VirtualKey, nodes: &[NodeId], _metrics: &PlacementMetrics) -> NodeId {
        let ring = self.ring(nodes);
        let point = hash_of(key);
        ring.range(point..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, node)| node.clone())
            .expect("node set is non-empty")
    }

    fn should_migrate(&self, entry: &DirectoryEntry, metrics: &PlacementMetrics) -> bool {
        !metrics.node_known(&entry.node)
    }
}

/// Activates on the least-loaded node; migrates when the placed node
/// exceeds the per-node actor threshold.
pub struct LoadAware {
    pub max_actors_per_node: usize,
}

impl Default for LoadAware {
    fn default() -> Self {
        LoadAware {
            max_actors_per_node: 10_000,
        }
    }
}

impl PlacementStrategy for LoadAware {
    fn name(&self) -> &'static str {
        "load-aware"
    }

    fn select(&self, _key: &VirtualKey, nodes: &[NodeId], metrics: &PlacementMetrics) -> NodeId {
        nodes
            .iter()
            .min_by_key(|node| metrics.load(node))
            .cloned()
            .expect("node set is non-empty")
    }

    fn should_migrate(&self, entry: &DirectoryEntry, metrics: &PlacementMetrics) -> bool {
        !metrics.node_known(&entry.node) || metrics.load(&entry.node) > self.max_actors_per_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|n| NodeId::new(n).unwrap()).collect()
    }

    fn key(id: &str) -> VirtualKey {
        VirtualKey::new("user", id)
    }

    #[test]
    fn round_robin_is_deterministic_per_key() {
        let strategy = RoundRobin;
        let set = nodes(&["n1", "n2", "n3"]);
        let metrics = PlacementMetrics::default();

        let first = strategy.select(&key("u1"), &set, &metrics);
        for _ in 0..10 {
            assert_eq!(strategy.select(&key("u1"), &set, &metrics), first);
        }
    }

    #[test]
    fn consistent_hash_is_stable_while_node_set_unchanged() {
        let strategy = ConsistentHash::default();
        let set = nodes(&["n1", "n2", "n3"]);
        let metrics = PlacementMetrics::default();

        for id in ["u1", "u2", "u3", "u4"] {
            let first = strategy.select(&key(id), &set, &metrics);
            assert_eq!(strategy.select(&key(id), &set, &metrics), first);
        }
    }

    #[test]
    fn load_aware_picks_least_loaded() {
        let strategy = LoadAware::default();
        let set = nodes(&["n1", "n2"]);
        let mut metrics = PlacementMetrics {
            nodes: set.clone(),
            ..Default::default()
        };
        metrics.actors_per_node.insert(set[0].clone(), 50);
        metrics.actors_per_node.insert(set[1].clone(), 3);

        assert_eq!(strategy.select(&key("u1"), &set, &metrics), set[1]);
    }
}
