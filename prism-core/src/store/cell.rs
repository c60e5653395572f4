//! State cells.
//!
//! A cell is one addressable value slot. Scalar cells are declared once
//! with a key and a default; family members are created on demand and
//! share their family's default policy.
//!
//! # Default values
//!
//! A cell that was never written reads as its default. The default is
//! produced by the policy on first read and memoized in the slot, apart
//! from the written value, so:
//!
//! - the policy runs at most once per cell lifetime, even across resets;
//! - a failing policy caches nothing and the next read tries again;
//! - `reset` just forgets the written value.

use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::family::{FamilyId, Param};
use super::Store;
use crate::error::{Result, StoreError};
use crate::graph::NodeId;
use crate::reactive::{ReadContext, Readable};
use crate::snapshot::Codec;

/// A stored value. Writers replace it; nobody mutates it in place.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Erased default-value policy. Receives the member parameter (the root
/// parameter for scalar cells).
pub(crate) type Policy = Arc<dyn Fn(&Param) -> Result<Value, String> + Send + Sync>;

/// Clone a typed value out of an erased one.
pub(crate) fn downcast<T: Clone + 'static>(value: &Value, key: &str) -> Result<T> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| StoreError::TypeMismatch {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
}

#[derive(Default)]
struct SlotValue {
    default: Option<Value>,
    written: Option<Value>,
}

/// Storage behind an [`Atom`] handle.
pub(crate) struct CellSlot {
    pub(crate) id: NodeId,
    pub(crate) key: Arc<str>,
    pub(crate) family: Option<FamilyId>,
    pub(crate) param: Param,
    pub(crate) codec: Option<Codec>,
    policy: Policy,
    type_id: TypeId,
    type_name: &'static str,
    value: Mutex<SlotValue>,
    roots: AtomicUsize,
    release_requested: AtomicBool,
}

impl CellSlot {
    pub(crate) fn new<T: 'static>(
        id: NodeId,
        key: Arc<str>,
        family: Option<FamilyId>,
        param: Param,
        policy: Policy,
    ) -> Self {
        Self {
            id,
            key,
            family,
            param,
            codec: None,
            policy,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Mutex::new(SlotValue::default()),
            roots: AtomicUsize::new(0),
            release_requested: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Fail unless this slot stores values of type `T`.
    pub(crate) fn check_type<T: 'static>(&self) -> Result<()> {
        if self.type_id == TypeId::of::<T>() {
            Ok(())
        } else {
            Err(StoreError::TypeMismatch {
                key: self.key.to_string(),
                expected: type_name::<T>(),
            })
        }
    }

    /// The current value: the last write, else the memoized default.
    pub(crate) fn current(&self) -> Result<Value> {
        let mut value = self.value.lock();
        if let Some(written) = &value.written {
            return Ok(Arc::clone(written));
        }
        if let Some(default) = &value.default {
            return Ok(Arc::clone(default));
        }

        // The slot lock is held across the policy call so concurrent first
        // reads evaluate it once.
        let default = (self.policy)(&self.param).map_err(|reason| StoreError::DefaultPolicy {
            key: self.key.to_string(),
            reason,
        })?;
        value.default = Some(Arc::clone(&default));
        Ok(default)
    }

    pub(crate) fn write(&self, value: Value) {
        self.value.lock().written = Some(value);
    }

    /// Write `value` if `live` holds while the slot is locked.
    pub(crate) fn write_if(&self, value: Value, live: impl FnOnce() -> bool) -> bool {
        let mut slot = self.value.lock();
        if !live() {
            return false;
        }
        slot.written = Some(value);
        true
    }

    /// Forget the written value so reads fall back to the default.
    pub(crate) fn clear(&self) {
        self.value.lock().written = None;
    }

    pub(crate) fn written(&self) -> Option<Value> {
        self.value.lock().written.clone()
    }

    pub(crate) fn is_written(&self) -> bool {
        self.value.lock().written.is_some()
    }

    pub(crate) fn roots(&self) -> usize {
        self.roots.load(Ordering::SeqCst)
    }

    pub(crate) fn add_root(&self) {
        self.roots.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the remaining root count.
    pub(crate) fn remove_root(&self) -> usize {
        let previous = self
            .roots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    pub(crate) fn request_release(&self) {
        self.release_requested.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_requested(&self) -> bool {
        self.release_requested.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CellSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellSlot")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("written", &self.is_written())
            .field("roots", &self.roots())
            .finish()
    }
}

/// Typed handle to a cell.
///
/// Handles are plain identifiers: cloning one is cheap and two handles are
/// equal exactly when they address the same cell.
///
/// # Example
///
/// ```rust
/// use prism_core::Store;
///
/// let store = Store::new();
/// let loading = store.atom("loading", false).unwrap();
///
/// assert!(!store.get(&loading).unwrap());
/// store.set(&loading, true).unwrap();
/// assert!(store.get(&loading).unwrap());
/// store.reset(&loading).unwrap();
/// assert!(!store.get(&loading).unwrap());
/// ```
pub struct Atom<T> {
    id: NodeId,
    key: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Atom<T> {
    pub(crate) fn new(id: NodeId, key: Arc<str>) -> Self {
        Self {
            id,
            key,
            _marker: PhantomData,
        }
    }

    /// The cell's key. Family members are keyed `family(param)`.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self::new(self.id, Arc::clone(&self.key))
    }
}

impl<T> PartialEq for Atom<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Atom<T> {}

impl<T> std::hash::Hash for Atom<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl<T> Readable for Atom<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Value = T;

    fn node_id(&self) -> NodeId {
        self.id
    }

    fn read_in(&self, store: &Store, ctx: Option<&ReadContext<'_>>) -> Result<T> {
        let slot = store.cell_slot(self.id, &self.key)?;
        if let Some(ctx) = ctx {
            ctx.track(self.id);
        }
        let value = slot.current()?;
        downcast(&value, &self.key)
    }
}
