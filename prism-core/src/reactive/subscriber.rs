//! Subscriber handles.
//!
//! A [`Subscription`] is the guard returned by
//! [`Store::subscribe`](crate::Store::subscribe). Dropping it removes the
//! subscription and its dependency edges from the store.

use std::fmt;
use std::sync::Weak;

use crate::graph::NodeId;
use crate::store::{Inner, Store};

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(NodeId);

impl SubscriberId {
    pub(crate) fn new(node: NodeId) -> Self {
        Self(node)
    }

    /// The graph node backing this subscription.
    pub fn node_id(&self) -> NodeId {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

/// Guard for a live subscription.
///
/// The guard holds the store weakly: it never keeps a store alive.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    store: Weak<Inner>,
}

impl Subscription {
    pub(crate) fn new(id: SubscriberId, store: Weak<Inner>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Unsubscribe now. Same as dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            Store::from_inner(inner).unsubscribe(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &(self.store.strong_count() > 0))
            .finish()
    }
}
