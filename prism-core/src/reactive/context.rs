//! Reactive Context
//!
//! A [`ReadContext`] is handed to every selector and subscription while it
//! evaluates. Reads made through it are recorded; when the evaluation ends
//! the recorded set replaces the computation's previous dependency edges.
//!
//! # Implementation
//!
//! The context is an explicit value rather than ambient thread-local state.
//! Nested evaluations (a subscription reading a dirty selector) simply
//! create a second context for the inner computation, so each one only
//! ever sees its own reads.

use std::cell::RefCell;
use std::fmt;

use indexmap::IndexSet;

use crate::error::Result;
use crate::graph::NodeId;
use crate::store::{Family, Param, Store};

/// Anything that can be read from a [`Store`]: cells and selectors.
pub trait Readable {
    /// The type produced by a read.
    type Value;

    /// Graph node backing this readable.
    fn node_id(&self) -> NodeId;

    /// Read the current value, recording a dependency on `ctx` if given.
    fn read_in(&self, store: &Store, ctx: Option<&ReadContext<'_>>) -> Result<Self::Value>;
}

/// Records the reads of one evaluation.
pub struct ReadContext<'a> {
    store: &'a Store,
    observer: NodeId,
    reads: RefCell<IndexSet<NodeId>>,
}

impl<'a> ReadContext<'a> {
    pub(crate) fn new(store: &'a Store, observer: NodeId) -> Self {
        Self {
            store,
            observer,
            reads: RefCell::new(IndexSet::new()),
        }
    }

    /// Read a cell or selector and depend on it.
    pub fn get<R: Readable>(&self, readable: &R) -> Result<R::Value> {
        readable.read_in(self.store, Some(self))
    }

    /// Read a family member, creating it if needed, and depend on it.
    pub fn member<T>(&self, family: &Family<T>, param: impl Into<Param>) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let atom = self.store.member(family, param)?;
        self.get(&atom)
    }

    /// Read a scalar cell by key and depend on it.
    pub fn get_key<T>(&self, key: &str) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let atom = self.store.atom_handle::<T>(key)?;
        self.get(&atom)
    }

    /// The store being read.
    pub fn store(&self) -> &'a Store {
        self.store
    }

    /// The computation this context belongs to.
    pub fn observer(&self) -> NodeId {
        self.observer
    }

    /// Record a dependency on the given node.
    pub(crate) fn track(&self, node: NodeId) {
        if node != self.observer {
            self.reads.borrow_mut().insert(node);
        }
    }

    /// Nodes read so far, in first-read order.
    pub fn dependencies(&self) -> Vec<NodeId> {
        self.reads.borrow().iter().copied().collect()
    }

    pub(crate) fn into_reads(self) -> IndexSet<NodeId> {
        self.reads.into_inner()
    }
}

impl fmt::Debug for ReadContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadContext")
            .field("observer", &self.observer)
            .field("reads", &self.reads.borrow().len())
            .finish()
    }
}
