// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered node registry.

use crate::error::{PilosaError, Result};
use crate::uri::Uri;

/// One server node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    uri: Uri,
}

impl Node {
    /// Node at `uri`.
    pub fn new(uri: Uri) -> Self {
        Self { uri }
    }

    /// The node's address.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Absolute URL for `path` on this node.
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.uri)
    }
}

impl From<Uri> for Node {
    fn from(uri: Uri) -> Self {
        Self::new(uri)
    }
}

/// Non-empty, ordered, immutable list of nodes.
///
/// The first node is the primary; the others are tried in order when it is
/// unreachable. Duplicates are kept as given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    nodes: Vec<Node>,
}

impl Cluster {
    /// Cluster of the given nodes. Fails when `nodes` is empty.
    pub fn new(nodes: Vec<Node>) -> Result<Self> {
        if nodes.is_empty() {
            return Err(PilosaError::InvalidUri {
                address: String::new(),
            });
        }
        Ok(Self { nodes })
    }

    /// Cluster of a single node.
    pub fn single(uri: Uri) -> Self {
        Self {
            nodes: vec![Node::new(uri)],
        }
    }

    /// Parse every address; fails on the first malformed one or when none
    /// is given.
    pub fn from_addresses<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let nodes = addresses
            .into_iter()
            .map(|a| Uri::parse(a.as_ref()).map(Node::new))
            .collect::<Result<Vec<_>>>()?;
        Self::new(nodes)
    }

    /// Nodes in failover order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::single(Uri::default())
    }
}
