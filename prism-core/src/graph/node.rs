//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Every cell, selector and subscription owns exactly one node.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the dependency graph.
///
/// Ids are never reused, so a handle to a reclaimed cell can never alias
/// a cell created later for the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A cell. Cells are the roots of the graph: they have dependents but
    /// never dependencies.
    Source,

    /// A selector. Selectors have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// A subscription. These are leaves: they read, but nothing reads them.
    Effect,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,

    /// Nodes this node read during its last evaluation.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read this node during their last evaluation. Kept in
    /// insertion order so notification order is deterministic.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Create a new cell node.
    pub fn source() -> Self {
        Self::new(NodeKind::Source)
    }

    /// Create a new selector node.
    pub fn derived() -> Self {
        Self::new(NodeKind::Derived)
    }

    /// Create a new subscription node.
    pub fn effect() -> Self {
        Self::new(NodeKind::Effect)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    /// Drop every outgoing edge, returning the previous dependency set.
    pub fn take_dependencies(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.dependencies)
    }
}
