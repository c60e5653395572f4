//! Selector Implementation
//!
//! A Selector is a cached derived value computed from cells and other
//! selectors.
//!
//! # How Selectors Work
//!
//! 1. On first read, the selector runs its computation through a fresh
//!    [`ReadContext`] and caches the result.
//!
//! 2. Later reads return the cached value while it is clean.
//!
//! 3. When any input is written, the store marks the selector dirty at
//!    once, even inside an open batch. Nothing is recomputed yet.
//!
//! 4. The next read recomputes and replaces the selector's dependency edges
//!    with whatever the new evaluation read. A failed evaluation caches
//!    nothing and keeps the old edges.
//!
//! Recomputation is lazy, so a selector nobody reads never runs, and a
//! subscription reading a dirty selector always pulls a value computed from
//! the fully-applied batch.

use std::any::type_name;
use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use super::context::{ReadContext, Readable};
use crate::error::{Result, StoreError};
use crate::graph::NodeId;
use crate::store::{downcast, Store, Value};

/// Cache state for a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    /// The cached value is up-to-date.
    Clean,

    /// An input changed since the last evaluation.
    Dirty,
}

pub(crate) type Compute = Box<dyn Fn(&ReadContext<'_>) -> Result<Value> + Send + Sync>;

struct Cache {
    value: Option<Value>,
    state: SelectorState,
    /// Bumped on every invalidation so an evaluation that raced with a
    /// write does not store its result as clean.
    version: u64,
}

/// Storage behind a [`Selector`] handle.
pub(crate) struct SelectorSlot {
    pub(crate) id: NodeId,
    pub(crate) key: Arc<str>,
    compute: Compute,
    cache: Mutex<Cache>,
    evaluating: ReentrantMutex<Cell<bool>>,
}

impl SelectorSlot {
    pub(crate) fn new(id: NodeId, key: Arc<str>, compute: Compute) -> Self {
        Self {
            id,
            key,
            compute,
            cache: Mutex::new(Cache {
                value: None,
                state: SelectorState::Dirty,
                version: 0,
            }),
            evaluating: ReentrantMutex::new(Cell::new(false)),
        }
    }

    pub(crate) fn mark_dirty(&self) {
        let mut cache = self.cache.lock();
        cache.state = SelectorState::Dirty;
        cache.version += 1;
    }

    pub(crate) fn state(&self) -> SelectorState {
        self.cache.lock().state
    }

    fn cached(&self) -> Option<Value> {
        let cache = self.cache.lock();
        match cache.state {
            SelectorState::Clean => cache.value.clone(),
            SelectorState::Dirty => None,
        }
    }

    /// Return the cached value, recomputing it if dirty.
    pub(crate) fn get(&self, store: &Store) -> Result<Value> {
        if let Some(value) = self.cached() {
            return Ok(value);
        }

        // Same-thread re-entry means the computation read itself.
        let guard = self.evaluating.lock();
        if guard.get() {
            return Err(StoreError::Cycle(self.key.to_string()));
        }
        if let Some(value) = self.cached() {
            return Ok(value);
        }

        let version = self.cache.lock().version;
        guard.set(true);
        let ctx = ReadContext::new(store, self.id);
        let result = (self.compute)(&ctx);
        guard.set(false);
        let reads = ctx.into_reads();

        let value = match result {
            Ok(value) => {
                store.commit_reads(self.id, reads);
                value
            }
            Err(error) => {
                store.keep_reads(self.id, reads);
                return Err(error);
            }
        };
        let mut cache = self.cache.lock();
        cache.value = Some(Arc::clone(&value));
        if cache.version == version {
            cache.state = SelectorState::Clean;
        }
        Ok(value)
    }
}

/// Typed handle to a declared selector.
///
/// # Example
///
/// ```rust
/// use prism_core::Store;
///
/// let store = Store::new();
/// let width = store.atom("width", 4).unwrap();
/// let height = store.atom("height", 3).unwrap();
/// let width1 = width.clone();
/// let area = store
///     .selector("area", move |ctx| Ok(ctx.get(&width1)? * ctx.get(&height)?))
///     .unwrap();
///
/// assert_eq!(store.get(&area).unwrap(), 12);
/// store.set(&width, 5).unwrap();
/// assert_eq!(store.get(&area).unwrap(), 15);
/// ```
pub struct Selector<T> {
    id: NodeId,
    key: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Selector<T> {
    pub(crate) fn new(id: NodeId, key: Arc<str>) -> Self {
        Self {
            id,
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self::new(self.id, Arc::clone(&self.key))
    }
}

impl<T> PartialEq for Selector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Selector<T> {}

impl<T> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T> Readable for Selector<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }

    fn read_in(&self, store: &Store, ctx: Option<&ReadContext<'_>>) -> Result<T> {
        let slot = store.selector_slot(self.id, &self.key)?;
        if let Some(ctx) = ctx {
            ctx.track(self.id);
        }
        let value = slot.get(store)?;
        downcast(&value, &self.key)
    }
}
