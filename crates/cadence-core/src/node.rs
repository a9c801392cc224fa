//! Nodes and node pools.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A named execution host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub hostname: String,
}

impl Node {
    pub fn new(name: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.into(),
        }
    }
}

/// An ordered set of nodes a job may run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePool {
    name: String,
    nodes: Vec<Node>,
}

impl NodePool {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// The node at `cursor`, advancing the cursor.
    pub fn next_round_robin(&self, cursor: &mut usize) -> Node {
        let node = self.nodes[*cursor % self.nodes.len()].clone();
        *cursor = (*cursor + 1) % self.nodes.len();
        node
    }
}

/// Every node and pool known to the scheduler.
///
/// A bare node name is usable wherever a pool is expected, as a pool of one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCatalog {
    nodes: BTreeMap<String, String>,
    pools: BTreeMap<String, Vec<String>>,
}

impl NodeCatalog {
    pub fn new(nodes: BTreeMap<String, String>, pools: BTreeMap<String, Vec<String>>) -> Self {
        Self { nodes, pools }
    }

    pub fn with_node(mut self, name: impl Into<String>, hostname: impl Into<String>) -> Self {
        self.nodes.insert(name.into(), hostname.into());
        self
    }

    pub fn with_pool<I, S>(mut self, name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pools
            .insert(name.into(), members.into_iter().map(Into::into).collect());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pool(name).is_some()
    }

    /// Resolve a node or pool name. Pools whose members are all unknown resolve to `None`.
    pub fn pool(&self, name: &str) -> Option<NodePool> {
        let nodes: Vec<Node> = match self.pools.get(name) {
            Some(members) => members
                .iter()
                .filter_map(|m| self.nodes.get(m).map(|host| Node::new(m.clone(), host.clone())))
                .collect(),
            None => {
                let host = self.nodes.get(name)?;
                vec![Node::new(name, host.clone())]
            }
        };
        (!nodes.is_empty()).then(|| NodePool {
            name: name.to_string(),
            nodes,
        })
    }

    /// Pool members that name no node, as `(pool, member)` pairs.
    pub fn dangling_members(&self) -> Vec<(&str, &str)> {
        self.pools
            .iter()
            .flat_map(|(pool, members)| {
                members
                    .iter()
                    .filter(|m| !self.nodes.contains_key(*m))
                    .map(move |m| (pool.as_str(), m.as_str()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn catalog() -> NodeCatalog {
        NodeCatalog::default()
            .with_node("a", "a.example")
            .with_node("b", "b.example")
            .with_pool("both", ["a", "b"])
    }

    #[test]
    fn test_round_robin() {
        let pool = catalog().pool("both").unwrap();
        let mut cursor = 0;
        let names: Vec<String> = (0..5)
            .map(|_| pool.next_round_robin(&mut cursor).name)
            .collect();
        assert_eq!(names, vec!["a", "b", "a", "b", "a"]);
    }

    #[test]
    fn test_node_is_pool_of_one() {
        let pool = catalog().pool("b").unwrap();
        assert_eq!(pool.nodes(), &[Node::new("b", "b.example")]);
        assert!(catalog().pool("missing").is_none());
    }

    #[test]
    fn test_dangling_members() {
        let catalog = catalog().with_pool("broken", ["a", "ghost"]);
        assert_eq!(catalog.dangling_members(), vec![("broken", "ghost")]);
    }
}
