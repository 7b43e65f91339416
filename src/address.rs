use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::validate::{validate_name, InvalidName};

/// Identifies the node an actor is placed on.
///
/// The runtime itself is single-node; placement strategies speak in
/// `NodeId`s so a transport layer can be put behind the directory later.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(name: &str) -> Result<NodeId, InvalidName> {
        validate_name(name)?;
        Ok(NodeId(Arc::from(name)))
    }

    pub fn local() -> NodeId {
        NodeId(Arc::from("local"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// The location of an actor: node, kind, id and an optional partition.
///
/// Two addresses are equal iff all fields match. Addresses are stable
/// across restarts of the same logical actor; a fresh spawn under the
/// same id after termination yields an equal address.
///
/// Printable form: `actor://<node>/<kind>/<id>` plus `#<partition>`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub node: NodeId,
    pub kind: Arc<str>,
    pub id: Arc<str>,
    pub partition: Option<Arc<str>>,
    /// Routing key inside the local hierarchy, e.g. `/user/counter-1`.
    pub path: Arc<str>,
}

impl Address {
    pub fn new(node: NodeId, kind: &str, id: &str, path: &str) -> Address {
        Address {
            node,
            kind: Arc::from(kind),
            id: Arc::from(id),
            partition: None,
            path: Arc::from(path),
        }
    }

    pub fn with_partition(mut self, partition: &str) -> Address {
        self.partition = Some(Arc::from(partition));
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uri(&self) -> String {
        match &self.partition {
            Some(p) => format!("actor://{}/{}/{}#{}", self.node, self.kind, self.id, p),
            None => format!("actor://{}/{}/{}", self.node, self.kind, self.id),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Address[{} @ {}]", self.uri(), self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_over_all_fields() {
        let a = Address::new(NodeId::local(), "counter", "c1", "/user/c1");
        let b = Address::new(NodeId::local(), "counter", "c1", "/user/c1");
        assert_eq!(a, b);

        let c = Address::new(NodeId::local(), "counter", "c2", "/user/c2");
        assert_ne!(a, c);

        let d = a.clone().with_partition("p0");
        assert_ne!(a, d);
    }

    #[test]
    fn printable_form() {
        let a = Address::new(NodeId::local(), "user", "u1", "/virtual/user/u1");
        assert_eq!(a.uri(), "actor://local/user/u1");
        let p = a.with_partition("eu-1");
        assert_eq!(p.uri(), "actor://local/user/u1#eu-1");
    }
}
