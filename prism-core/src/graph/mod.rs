//! Dependency Graph
//!
//! This module implements the graph that relates cells to the computations
//! (selectors and subscriptions) that read them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes represent cells (sources) or computations (selectors, subscriptions)
//! - Edges represent reads: if A read B during its last evaluation, there is
//!   an edge from B to A
//!
//! When a batch of cells changes, the graph yields every affected
//! computation once, producers before consumers.
//!
//! Both forward (dependencies) and reverse (dependents) edges are kept so
//! stale edges can be dropped in time proportional to the old read set.

mod node;
mod scheduler;

pub use node::{Node, NodeId, NodeKind};
pub use scheduler::UpdateScheduler;
