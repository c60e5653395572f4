//! The State Store
//!
//! The store is the one container owning every cell, family, selector and
//! subscription of a session. Application code never touches storage
//! directly; it holds typed handles ([`Atom`], [`Family`],
//! [`Selector`](crate::Selector)) or string keys and goes through the
//! store to read and write.
//!
//! # How It Works
//!
//! 1. Declaring a cell, family or selector registers its key and adds a
//!    node to the dependency graph.
//!
//! 2. Selectors and subscriptions read through a
//!    [`ReadContext`](crate::ReadContext); when an evaluation ends, its reads
//!    replace the computation's dependency edges.
//!
//! 3. A write replaces the cell's value, marks every selector depending on
//!    the cell dirty and queues the cell. When the enclosing batch closes
//!    (a lone write is its own batch), the graph yields every affected
//!    subscription once, in topological order, and each re-runs.
//!
//! # Thread Safety
//!
//! `Store` is a cheap `Arc` handle and is `Send + Sync`. Structural state
//! lives behind one `parking_lot` mutex; each cell's value has its own
//! lock; selectors and subscriptions live in a `DashMap`. No user code
//! (policies, selectors, callbacks) runs while the structural lock is held.

mod cell;
mod family;
mod flush;
mod lifecycle;

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

pub use cell::{Atom, Value};
pub use family::{Family, FamilyId, Param};
pub use lifecycle::{Liveness, Reclaimed, Root};

pub(crate) use cell::{downcast, CellSlot, Policy};
pub(crate) use family::FamilyEntry;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::graph::{Node, NodeId, UpdateScheduler};
use crate::reactive::{
    Compute, ReadContext, Readable, Selector, SelectorSlot, SelectorState, SubscriptionSlot,
};
use crate::snapshot::Codec;

/// What a key was declared as.
#[derive(Debug, Clone, Copy)]
enum Declared {
    Cell(NodeId),
    Family,
    Selector,
}

/// A registered computation.
#[derive(Clone)]
pub(crate) enum Computation {
    Selector(Arc<SelectorSlot>),
    Subscription(Arc<SubscriptionSlot>),
}

/// Structural state guarded by the store lock.
#[derive(Default)]
pub(crate) struct State {
    graph: UpdateScheduler,
    /// Declared keys in declaration order.
    keys: IndexMap<Arc<str>, Declared>,
    cells: HashMap<NodeId, Arc<CellSlot>>,
    families: HashMap<FamilyId, FamilyEntry>,
    /// Cells written since the last flush, with the sequence number of
    /// their latest write.
    pending: IndexMap<NodeId, u64>,
    /// Sequence number of the latest write.
    write_seq: u64,
    batch_depth: usize,
    flushing: bool,
    torn_down: bool,
}

impl State {
    fn claim_key(&self, key: &str) -> Result<Arc<str>> {
        if self.keys.contains_key(key) {
            return Err(StoreError::DuplicateKey(key.to_string()));
        }
        Ok(Arc::from(key))
    }
}

pub(crate) struct Inner {
    config: StoreConfig,
    state: Mutex<State>,
    computations: DashMap<NodeId, Computation>,
    epoch: AtomicU64,
}

/// The reactive state container.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use prism_core::Store;
///
/// let store = Store::new();
/// let loading = store.atom("loading", false).unwrap();
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// let _sub = store
///     .watch(&loading, move |value| sink.lock().unwrap().push(value))
///     .unwrap();
///
/// store.set(&loading, true).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![true]);
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store.
    pub fn with_config(config: StoreConfig) -> Self {
        debug!(?config, "store initialized");
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                computations: DashMap::new(),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Current session epoch, bumped by [`reset_session`](Self::reset_session).
    pub fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.inner.state.lock();
        if state.torn_down {
            return Err(StoreError::TornDown);
        }
        Ok(state)
    }

    // ------------------------------------------------------------------
    // Declaration
    // ------------------------------------------------------------------

    /// Declare a scalar cell with a constant default.
    pub fn atom<T>(&self, key: &str, default: T) -> Result<Atom<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let default: Value = Arc::new(default);
        let policy: Policy = Arc::new(move |_: &Param| Ok::<Value, String>(Arc::clone(&default)));
        self.declare_cell(key, CellDeclaration::<T>::new(policy))
    }

    /// Declare a scalar cell whose default is computed on first read.
    pub fn atom_with<T, E, F>(&self, key: &str, default: F) -> Result<Atom<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: fmt::Display,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        let policy: Policy = Arc::new(move |_: &Param| {
            default()
                .map(|value| Arc::new(value) as Value)
                .map_err(|error| error.to_string())
        });
        self.declare_cell(key, CellDeclaration::<T>::new(policy))
    }

    pub(crate) fn declare_cell<T>(&self, key: &str, declaration: CellDeclaration<T>) -> Result<Atom<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut state = self.lock_live()?;
        let key = state.claim_key(key)?;
        let id = state.graph.add_node(Node::source());

        let mut slot = CellSlot::new::<T>(id, Arc::clone(&key), None, Param::root(), declaration.policy);
        if let Some(codec) = declaration.codec {
            slot = slot.with_codec(codec);
        }
        state.cells.insert(id, Arc::new(slot));
        state.keys.insert(Arc::clone(&key), Declared::Cell(id));
        debug!(key = %key, "declared cell");

        Ok(Atom::new(id, key))
    }

    /// Declare a selector: a cached value derived from other readables.
    pub fn selector<T, F>(&self, key: &str, compute: F) -> Result<Selector<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&ReadContext<'_>) -> Result<T> + Send + Sync + 'static,
    {
        let (id, key) = {
            let mut state = self.lock_live()?;
            let key = state.claim_key(key)?;
            let id = state.graph.add_node(Node::derived());
            state.keys.insert(Arc::clone(&key), Declared::Selector);
            (id, key)
        };

        let compute: Compute =
            Box::new(move |ctx: &ReadContext<'_>| compute(ctx).map(|value| Arc::new(value) as Value));
        self.inner.computations.insert(
            id,
            Computation::Selector(Arc::new(SelectorSlot::new(id, Arc::clone(&key), compute))),
        );
        debug!(key = %key, "declared selector");

        Ok(Selector::new(id, key))
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Read a cell or selector without tracking.
    pub fn get<R: Readable>(&self, readable: &R) -> Result<R::Value> {
        readable.read_in(self, None)
    }

    /// Replace a cell's value and notify its dependents.
    pub fn set<T>(&self, atom: &Atom<T>, value: T) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = atom.node_id();
        let slot = self.cell_slot(id, atom.key())?;
        slot.write(Arc::new(value));
        trace!(key = %atom.key(), "write");
        self.schedule([id]);
        Ok(())
    }

    /// Replace a cell's value with `f(current)`.
    pub fn update<T, F>(&self, atom: &Atom<T>, f: F) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(&T) -> T,
    {
        let current = self.get(atom)?;
        self.set(atom, f(&current))
    }

    /// Restore a cell's default value and notify its dependents.
    pub fn reset<T>(&self, atom: &Atom<T>) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.reset_node(atom.node_id(), atom.key())
    }

    fn reset_node(&self, id: NodeId, key: &str) -> Result<()> {
        let slot = self.cell_slot(id, key)?;
        slot.clear();
        trace!(key = %key, "reset");
        self.schedule([id]);
        Ok(())
    }

    /// Whether the cell holds an explicitly written value.
    pub fn is_written<T>(&self, atom: &Atom<T>) -> Result<bool>
    where
        T: Clone + Send + Sync + 'static,
    {
        Ok(self.cell_slot(atom.node_id(), atom.key())?.is_written())
    }

    /// Look up a scalar cell by key.
    pub fn atom_handle<T>(&self, key: &str) -> Result<Atom<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let slot = self.scalar_slot(key)?;
        slot.check_type::<T>()?;
        Ok(Atom::new(slot.id, Arc::clone(&slot.key)))
    }

    /// Read a scalar cell by key.
    pub fn read_key<T>(&self, key: &str) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let atom = self.atom_handle::<T>(key)?;
        self.get(&atom)
    }

    /// Write a scalar cell by key. Unknown keys are rejected and nothing
    /// changes.
    pub fn write_key<T>(&self, key: &str, value: T) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        let atom = self.atom_handle::<T>(key)?;
        self.set(&atom, value)
    }

    /// Reset a scalar cell by key.
    pub fn reset_key(&self, key: &str) -> Result<()> {
        let id = self.scalar_slot(key)?.id;
        self.reset_node(id, key)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Whether a key is declared (as a cell, family or selector).
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.state.lock().keys.contains_key(key)
    }

    /// Number of live cells, scalar and family members.
    pub fn cell_count(&self) -> usize {
        self.inner.state.lock().cells.len()
    }

    /// Number of computations currently depending on `readable`.
    pub fn subscriber_count<R: Readable>(&self, readable: &R) -> usize {
        self.inner
            .state
            .lock()
            .graph
            .dependent_count(readable.node_id())
    }

    /// Cache state of a selector, `None` if it is not declared here.
    pub fn selector_state<T>(&self, selector: &Selector<T>) -> Option<SelectorState>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.selector_slot(selector.node_id(), selector.key())
            .ok()
            .map(|slot| slot.state())
    }

    /// The scalar cell declared under `key`.
    pub(crate) fn scalar_slot(&self, key: &str) -> Result<Arc<CellSlot>> {
        let state = self.lock_live()?;
        let slot = match state.keys.get(key) {
            Some(Declared::Cell(id)) => state.cells.get(id).cloned(),
            _ => None,
        };
        slot.ok_or_else(|| StoreError::UnknownKey(key.to_string()))
    }

    /// Every scalar cell, in declaration order.
    pub(crate) fn scalar_slots(&self) -> Result<Vec<Arc<CellSlot>>> {
        let state = self.lock_live()?;
        Ok(state
            .keys
            .values()
            .filter_map(|declared| match declared {
                Declared::Cell(id) => state.cells.get(id).cloned(),
                Declared::Family | Declared::Selector => None,
            })
            .collect())
    }

    pub(crate) fn cell_slot(&self, id: NodeId, key: &str) -> Result<Arc<CellSlot>> {
        let state = self.lock_live()?;
        state
            .cells
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::StaleHandle(key.to_string()))
    }

    pub(crate) fn selector_slot(&self, id: NodeId, key: &str) -> Result<Arc<SelectorSlot>> {
        let found = self
            .inner
            .computations
            .get(&id)
            .and_then(|entry| match entry.value() {
                Computation::Selector(slot) => Some(Arc::clone(slot)),
                Computation::Subscription(_) => None,
            });
        match found {
            Some(slot) => Ok(slot),
            None if self.is_torn_down() => Err(StoreError::TornDown),
            None => Err(StoreError::UnknownKey(key.to_string())),
        }
    }
}

/// Everything needed to declare a scalar cell.
pub(crate) struct CellDeclaration<T> {
    policy: Policy,
    codec: Option<Codec>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CellDeclaration<T> {
    fn new(policy: Policy) -> Self {
        Self {
            policy,
            codec: None,
            _marker: PhantomData,
        }
    }

    pub(crate) fn persisted(policy: Policy, codec: Codec) -> Self {
        Self {
            policy,
            codec: Some(codec),
            _marker: PhantomData,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Store")
            .field("keys", &state.keys.len())
            .field("cells", &state.cells.len())
            .field("computations", &self.inner.computations.len())
            .field("epoch", &self.epoch())
            .field("torn_down", &state.torn_down)
            .finish()
    }
}
