//! State cell families.
//!
//! A family is a keyed collection of cells created on first access. Every
//! member shares the family's default policy, which receives the member's
//! [`Param`] so defaults can depend on it.
//!
//! Members are looked up and created under the store lock, so concurrent
//! first accesses to the same parameter converge on one cell.

use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::cell::{Atom, CellSlot, Policy, Value};
use super::{Declared, State, Store};
use crate::error::{Result, StoreError};
use crate::graph::{Node, NodeId};

/// Unique identifier for a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FamilyId(u64);

impl FamilyId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Parameter selecting a family member: a short path of string segments.
///
/// Built from strings, integers, [`Scope`](crate::Scope) or tuples of those:
///
/// ```rust
/// use prism_core::{Param, Scope};
///
/// assert_eq!(Param::from("sample-1").to_string(), "sample-1");
/// assert_eq!(Param::from((Scope::Modal, "sample-1")).to_string(), "modal/sample-1");
/// assert_eq!(Param::from(42_u64).to_string(), "42");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Param(SmallVec<[Arc<str>; 2]>);

impl Param {
    /// The empty parameter used by scalar cells.
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|segment| &**segment)
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(|segment| &**segment)
    }

    /// Everything after the first segment.
    pub fn tail(&self) -> Param {
        Self(self.0.iter().skip(1).cloned().collect())
    }

    /// Append the segments of `other`.
    pub fn join(mut self, other: impl Into<Param>) -> Self {
        self.0.extend(other.into().0);
        self
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(segment)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Param({self})")
    }
}

impl From<&str> for Param {
    fn from(segment: &str) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Arc::from(segment));
        Self(segments)
    }
}

impl From<String> for Param {
    fn from(segment: String) -> Self {
        let mut segments = SmallVec::new();
        segments.push(Arc::from(segment));
        Self(segments)
    }
}

impl From<&String> for Param {
    fn from(segment: &String) -> Self {
        Self::from(segment.as_str())
    }
}

impl From<u64> for Param {
    fn from(index: u64) -> Self {
        Self::from(index.to_string())
    }
}

impl From<&Param> for Param {
    fn from(param: &Param) -> Self {
        param.clone()
    }
}

impl<A, B> From<(A, B)> for Param
where
    A: Into<Param>,
    B: Into<Param>,
{
    fn from((a, b): (A, B)) -> Self {
        a.into().join(b)
    }
}

/// Typed handle to a declared family.
pub struct Family<T> {
    id: FamilyId,
    key: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Family<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> FamilyId {
        self.id
    }
}

impl<T> Clone for Family<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            key: Arc::clone(&self.key),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Family<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Family")
            .field("key", &self.key)
            .field("type", &type_name::<T>())
            .finish()
    }
}

/// Store-side record of a family.
pub(crate) struct FamilyEntry {
    pub(crate) key: Arc<str>,
    policy: Policy,
    pub(crate) members: IndexMap<Param, NodeId>,
}

impl State {
    /// Remove a family member's cell, its graph node and its index entry.
    pub(crate) fn remove_member(&mut self, id: NodeId) -> bool {
        let Some(slot) = self.cells.get(&id) else {
            return false;
        };
        let Some(family) = slot.family else {
            return false;
        };
        if let Some(entry) = self.families.get_mut(&family) {
            if entry.members.get(&slot.param) == Some(&id) {
                entry.members.shift_remove(&slot.param);
            }
        }
        trace!(key = %slot.key, "reclaimed family member");
        self.cells.remove(&id);
        self.graph.remove_node(id);
        true
    }

    /// Whether a member has no subscribers and no roots.
    pub(crate) fn is_idle_member(&self, id: NodeId) -> bool {
        match self.cells.get(&id) {
            Some(slot) => {
                slot.family.is_some() && slot.roots() == 0 && self.graph.dependent_count(id) == 0
            }
            None => false,
        }
    }
}

impl Store {
    /// Declare a family whose members default to `policy(param)`.
    ///
    /// ```rust
    /// use prism_core::Store;
    ///
    /// let store = Store::new();
    /// let frame_rate = store.family("frameRate", |_| 30.0_f64).unwrap();
    ///
    /// let clip = store.member(&frame_rate, "clip-7").unwrap();
    /// store.set(&clip, 24.0).unwrap();
    /// assert_eq!(store.get(&clip).unwrap(), 24.0);
    /// assert_eq!(store.get(&store.member(&frame_rate, "clip-8").unwrap()).unwrap(), 30.0);
    /// ```
    pub fn family<T, F>(&self, key: &str, policy: F) -> Result<Family<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Param) -> T + Send + Sync + 'static,
    {
        let policy: Policy =
            Arc::new(move |param: &Param| Ok::<Value, String>(Arc::new(policy(param))));
        self.declare_family(key, policy)
    }

    /// Declare a family with a fallible default policy.
    pub fn try_family<T, E, F>(&self, key: &str, policy: F) -> Result<Family<T>>
    where
        T: Clone + Send + Sync + 'static,
        E: fmt::Display,
        F: Fn(&Param) -> Result<T, E> + Send + Sync + 'static,
    {
        let policy: Policy = Arc::new(move |param: &Param| {
            policy(param)
                .map(|value| Arc::new(value) as Value)
                .map_err(|error| error.to_string())
        });
        self.declare_family(key, policy)
    }

    pub(crate) fn declare_family<T>(&self, key: &str, policy: Policy) -> Result<Family<T>> {
        let mut state = self.lock_live()?;
        let key = state.claim_key(key)?;
        let id = FamilyId::new();
        state.families.insert(
            id,
            FamilyEntry {
                key: Arc::clone(&key),
                policy,
                members: IndexMap::new(),
            },
        );
        state.keys.insert(Arc::clone(&key), Declared::Family);
        debug!(key = %key, "declared family");

        Ok(Family {
            id,
            key,
            _marker: PhantomData,
        })
    }

    /// The member of `family` for `param`, created on first access.
    ///
    /// Two calls with the same parameter return the same cell until the
    /// member is reclaimed.
    pub fn member<T>(&self, family: &Family<T>, param: impl Into<Param>) -> Result<Atom<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let param = param.into();
        let mut guard = self.lock_live()?;
        let State {
            families,
            cells,
            graph,
            ..
        } = &mut *guard;

        let entry = families
            .get_mut(&family.id)
            .ok_or_else(|| StoreError::UnknownKey(family.key.to_string()))?;

        if let Some(id) = entry.members.get(&param) {
            if let Some(slot) = cells.get(id) {
                return Ok(Atom::new(*id, Arc::clone(&slot.key)));
            }
        }

        let id = graph.add_node(Node::source());
        let key: Arc<str> = format!("{}({})", entry.key, param).into();
        let slot = CellSlot::new::<T>(
            id,
            Arc::clone(&key),
            Some(family.id),
            param.clone(),
            Arc::clone(&entry.policy),
        );
        cells.insert(id, Arc::new(slot));
        entry.members.insert(param, id);
        trace!(key = %key, "created family member");

        Ok(Atom::new(id, key))
    }

    /// Parameters of the family's live members, in creation order.
    pub fn members<T>(&self, family: &Family<T>) -> Result<Vec<Param>> {
        let state = self.lock_live()?;
        let entry = state
            .families
            .get(&family.id)
            .ok_or_else(|| StoreError::UnknownKey(family.key.to_string()))?;
        Ok(entry.members.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn param_paths() {
        let param = Param::from(("modal", "sample-1"));
        assert_eq!(param.len(), 2);
        assert_eq!(param.first(), Some("modal"));
        assert_eq!(param.tail(), Param::from("sample-1"));
        assert_eq!(param.segments().collect::<Vec<_>>(), ["modal", "sample-1"]);
        assert!(Param::root().is_root());
        assert_eq!(Param::root().to_string(), "");
    }

    #[test]
    fn members_are_referentially_stable() {
        let store = Store::new();
        let labels = store.family("labels", |_| Vec::<String>::new()).unwrap();

        let a = store.member(&labels, "s1").unwrap();
        let b = store.member(&labels, "s1").unwrap();
        let c = store.member(&labels, "s2").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.key(), "labels(s1)");
        assert_eq!(
            store.members(&labels).unwrap(),
            vec![Param::from("s1"), Param::from("s2")]
        );
    }

    #[test]
    fn policy_sees_the_parameter_and_runs_once_per_member() {
        let store = Store::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let names = store
            .family("names", move |param: &Param| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                format!("sample {param}")
            })
            .unwrap();

        for _ in 0..3 {
            let member = store.member(&names, "7").unwrap();
            assert_eq!(store.get(&member).unwrap(), "sample 7");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn creating_a_member_does_not_run_the_policy() {
        let store = Store::new();
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let lazy = store
            .family("lazy", move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                0
            })
            .unwrap();

        store.member(&lazy, "x").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_policy_surfaces_on_read() {
        let store = Store::new();
        let stats = store
            .try_family("stats", |param: &Param| {
                if param.first() == Some("broken") {
                    Err("no statistics")
                } else {
                    Ok(1_u32)
                }
            })
            .unwrap();

        let broken = store.member(&stats, "broken").unwrap();
        assert!(matches!(
            store.get(&broken),
            Err(StoreError::DefaultPolicy { .. })
        ));
        let fine = store.member(&stats, "fine").unwrap();
        assert_eq!(store.get(&fine).unwrap(), 1);
    }

    #[test]
    fn concurrent_creation_converges() {
        let store = Store::new();
        let family = store.family("shared", |_| 0_u64).unwrap();

        let ids: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| store.member(&family, "same").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(store.members(&family).unwrap().len(), 1);
    }
}
