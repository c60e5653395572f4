//! Subscription Implementation
//!
//! A subscription pairs a tracked computation with a change callback.
//!
//! # How Subscriptions Work
//!
//! 1. On registration the computation runs once to establish its
//!    dependencies. The callback is not invoked for this run.
//!
//! 2. When a batch invalidates any dependency, the computation re-runs
//!    (once per batch, however many of its inputs changed) and its result
//!    is handed to the callback.
//!
//! 3. Every successful run replaces the dependency edges, so inputs the
//!    computation no longer reads stop triggering it. A failed run only adds
//!    edges.
//!
//! 4. A subscription registered inside a batch is not re-run for writes
//!    made before it registered; its first run already saw them.
//!
//! # Differences from Selector
//!
//! - Selectors return a cached value; subscriptions deliver to a callback.
//! - Selectors are lazy; subscriptions are eager and run at flush time.
//! - Nothing can read a subscription, so it is always a leaf of the graph.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::context::ReadContext;
use crate::error::Result;
use crate::graph::NodeId;
use crate::store::Store;

/// The erased body of a subscription. The flag says whether the callback
/// should receive the result.
pub(crate) type Run = Box<dyn Fn(&ReadContext<'_>, bool) -> Result<()> + Send + Sync>;

pub(crate) struct SubscriptionSlot {
    pub(crate) id: NodeId,
    /// Store write sequence number at registration.
    since: u64,
    run: Run,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl SubscriptionSlot {
    pub(crate) fn new(id: NodeId, since: u64, run: Run) -> Self {
        Self {
            id,
            since,
            run,
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        }
    }

    /// Evaluate the computation and record its reads.
    pub(crate) fn execute(&self, store: &Store, notify: bool) -> Result<()> {
        if self.is_disposed() {
            return Ok(());
        }

        let ctx = ReadContext::new(store, self.id);
        let result = (self.run)(&ctx, notify);
        match &result {
            Ok(()) => store.commit_reads(self.id, ctx.into_reads()),
            Err(_) => store.keep_reads(self.id, ctx.into_reads()),
        }

        self.run_count.fetch_add(1, Ordering::SeqCst);
        result
    }

    pub(crate) fn since(&self) -> u64 {
        self.since
    }

    /// After disposal the subscription never runs again.
    pub(crate) fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn run_count(&self) -> usize {
        self.run_count.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for SubscriptionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSlot")
            .field("id", &self.id)
            .field("since", &self.since)
            .field("run_count", &self.run_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
