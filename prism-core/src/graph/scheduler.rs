//! Update Scheduler
//!
//! The scheduler owns the dependency graph and decides which computations
//! must run after a batch of writes, and in what order.
//!
//! # Algorithm
//!
//! 1. Walk the dependents of every changed cell breadth-first. A node
//!    reached through several changed cells is visited once.
//! 2. Sort the visited nodes topologically (dependencies before
//!    dependents) with Kahn's algorithm.
//!
//! Edges are rebuilt wholesale after each evaluation, so a computation that
//! stops reading a cell stops being invalidated by it.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexSet;

use super::node::{Node, NodeId};

/// The update scheduler manages the dependency graph and coordinates updates.
#[derive(Debug, Default)]
pub struct UpdateScheduler {
    nodes: HashMap<NodeId, Node>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and every edge touching it.
    ///
    /// Returns the removed node's former dependencies that no longer have
    /// any dependent.
    pub fn remove_node(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let mut released = Vec::new();
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                    if dep.dependents().is_empty() {
                        released.push(*dep_id);
                    }
                }
            }

            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
        released
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// Add a dependency edge: `dependent` depends on `dependency`.
    fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if !self.nodes.contains_key(&dependency) || !self.nodes.contains_key(&dependent) {
            return;
        }
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Record that `computation` read `cell`.
    pub fn track(&mut self, computation: NodeId, cell: NodeId) {
        self.add_edge(cell, computation);
    }

    /// Replace the dependency set of `computation` with `reads`.
    ///
    /// Returns the former dependencies that lost their last dependent.
    pub fn replace_dependencies<I>(&mut self, computation: NodeId, reads: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let Some(node) = self.nodes.get_mut(&computation) else {
            return Vec::new();
        };
        let previous = node.take_dependencies();

        let reads: IndexSet<NodeId> = reads.into_iter().collect();
        for &dep in &reads {
            self.track(computation, dep);
        }

        let mut released = Vec::new();
        for dep in previous.difference(&reads) {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.remove_dependent(computation);
                if dep_node.dependents().is_empty() {
                    released.push(*dep);
                }
            }
        }
        released
    }

    /// Add `reads` to the dependency set of `computation`, keeping every
    /// existing edge.
    pub fn extend_dependencies<I>(&mut self, computation: NodeId, reads: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        for dep in reads {
            self.track(computation, dep);
        }
    }

    /// Number of nodes currently depending on `node_id`.
    pub fn dependent_count(&self, node_id: NodeId) -> usize {
        self.nodes
            .get(&node_id)
            .map(|node| node.dependents().len())
            .unwrap_or(0)
    }

    /// Every computation transitively depending on `cells`, each exactly
    /// once, in topological order.
    pub fn invalidate<I>(&self, cells: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        self.topological_sort(self.affected(cells))
    }

    /// Every computation transitively depending on `cells`, in discovery
    /// order.
    pub fn affected<I>(&self, cells: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut visited = IndexSet::new();
        let mut queue = VecDeque::new();

        for cell in cells {
            if let Some(node) = self.nodes.get(&cell) {
                queue.extend(node.dependents().iter().copied());
            }
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                queue.extend(node.dependents().iter().copied());
            }
        }

        visited.into_iter().collect()
    }

    /// Every node `node_id` transitively depends on.
    pub fn upstream(&self, node_id: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(&node_id)
            .map(|node| node.dependencies().iter().copied().collect())
            .unwrap_or_default();

        while let Some(id) = stack.pop() {
            if seen.insert(id) {
                if let Some(node) = self.nodes.get(&id) {
                    stack.extend(node.dependencies().iter().copied());
                }
            }
        }
        seen
    }

    /// Perform a topological sort of the given nodes.
    ///
    /// Nodes caught in a cycle cannot be ordered; they are appended in
    /// discovery order.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        if *degree == 0 {
                            continue;
                        }
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        if result.len() < in_degree.len() {
            let placed: HashSet<_> = result.iter().copied().collect();
            result.extend(
                nodes
                    .into_iter()
                    .filter(|id| in_degree.contains_key(id) && !placed.contains(id)),
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeKind;

    fn chain() -> (UpdateScheduler, NodeId, NodeId, NodeId) {
        let mut scheduler = UpdateScheduler::new();
        let source_id = scheduler.add_node(Node::source());
        let derived_id = scheduler.add_node(Node::derived());
        let effect_id = scheduler.add_node(Node::effect());
        scheduler.track(derived_id, source_id);
        scheduler.track(effect_id, derived_id);
        (scheduler, source_id, derived_id, effect_id)
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut scheduler = UpdateScheduler::new();

        let id1 = scheduler.add_node(Node::source());
        let id2 = scheduler.add_node(Node::derived());
        assert!(scheduler.contains(id1));

        scheduler.remove_node(id1);
        assert!(!scheduler.contains(id1));
        assert!(scheduler.get_node(id1).is_none());
        assert_eq!(
            scheduler.get_node(id2).map(Node::kind),
            Some(NodeKind::Derived)
        );
    }

    #[test]
    fn removing_last_dependent_releases_source() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.add_node(Node::source());
        let a = scheduler.add_node(Node::effect());
        let b = scheduler.add_node(Node::effect());
        scheduler.track(a, cell);
        scheduler.track(b, cell);

        assert!(scheduler.remove_node(a).is_empty());
        assert_eq!(scheduler.remove_node(b), vec![cell]);
        assert_eq!(scheduler.dependent_count(cell), 0);
    }

    #[test]
    fn edges_to_unknown_nodes_are_ignored() {
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.add_node(Node::source());
        scheduler.track(NodeId::new(), cell);
        assert_eq!(scheduler.dependent_count(cell), 0);
    }

    #[test]
    fn invalidate_propagates_in_topological_order() {
        let (scheduler, source_id, derived_id, effect_id) = chain();

        let order = scheduler.invalidate([source_id]);
        assert_eq!(order, vec![derived_id, effect_id]);
    }

    #[test]
    fn shared_dependent_is_listed_once() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::source());
        let effect = scheduler.add_node(Node::effect());
        scheduler.track(effect, a);
        scheduler.track(effect, b);

        assert_eq!(scheduler.invalidate([a, b]), vec![effect]);
    }

    #[test]
    fn diamond_orders_producers_first() {
        // cell -> left, cell -> right, left + right -> sink, cell -> sink
        let mut scheduler = UpdateScheduler::new();
        let cell = scheduler.add_node(Node::source());
        let left = scheduler.add_node(Node::derived());
        let right = scheduler.add_node(Node::derived());
        let sink = scheduler.add_node(Node::effect());
        scheduler.track(sink, cell);
        scheduler.track(sink, left);
        scheduler.track(sink, right);
        scheduler.track(left, cell);
        scheduler.track(right, left);

        let order = scheduler.invalidate([cell]);
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert_eq!(order.len(), 3);
        assert!(pos(left) < pos(right));
        assert!(pos(right) < pos(sink));
    }

    #[test]
    fn replace_dependencies_drops_stale_edges() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::source());
        let effect = scheduler.add_node(Node::effect());

        assert!(scheduler.replace_dependencies(effect, [a]).is_empty());
        let released = scheduler.replace_dependencies(effect, [b]);
        assert_eq!(released, vec![a]);

        assert!(scheduler.invalidate([a]).is_empty());
        assert_eq!(scheduler.invalidate([b]), vec![effect]);
        assert!(scheduler.get_node(effect).unwrap().dependencies().contains(&b));
    }

    #[test]
    fn extend_dependencies_keeps_existing_edges() {
        let mut scheduler = UpdateScheduler::new();
        let a = scheduler.add_node(Node::source());
        let b = scheduler.add_node(Node::source());
        let effect = scheduler.add_node(Node::effect());

        scheduler.replace_dependencies(effect, [a]);
        scheduler.extend_dependencies(effect, [b]);
        assert_eq!(scheduler.dependent_count(a), 1);
        assert_eq!(scheduler.invalidate([b]), vec![effect]);
    }

    #[test]
    fn upstream_walks_through_selectors() {
        let (scheduler, source_id, derived_id, effect_id) = chain();
        let unrelated = NodeId::new();

        let upstream = scheduler.upstream(effect_id);
        assert!(upstream.contains(&source_id));
        assert!(upstream.contains(&derived_id));
        assert!(!upstream.contains(&unrelated));
        assert!(scheduler.upstream(source_id).is_empty());
    }
}
