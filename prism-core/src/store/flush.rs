//! Notification engine.
//!
//! Every write marks the selectors depending on its cell dirty right away,
//! so a read made before the flush (inside a batch or a callback) never
//! mixes old and new values. The cell is then queued in `State::pending`
//! under a fresh sequence number. When no batch is open the queue is
//! flushed:
//!
//! 1. Drain the queue and ask the graph for every computation depending on
//!    the drained cells, deduplicated and in topological order.
//! 2. Keep the subscriptions that depend on a write newer than their own
//!    registration. A subscription registered after a write already saw it.
//! 3. Re-run those subscriptions in order. Dirty selectors they read
//!    recompute on demand, so each subscription sees the complete batch.
//! 4. Writes made by subscriptions land in the queue again; repeat until it
//!    is empty or the pass limit is hit.

use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::MutexGuard;
use tracing::{debug, warn};

use super::{Computation, State, Store};
use crate::error::Result;
use crate::graph::{Node, NodeId, NodeKind};
use crate::reactive::{ReadContext, Readable, Run, SubscriberId, Subscription, SubscriptionSlot};

/// Clears the store's flushing flag if a flush unwinds.
struct FlushGuard<'a> {
    store: &'a Store,
    armed: bool,
}

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.store.inner.state.lock().flushing = false;
        }
    }
}

impl Store {
    /// Subscribe to a tracked computation.
    ///
    /// `compute` runs immediately to establish dependencies; `on_change`
    /// is not called for that run. Afterwards, every batch that touches a
    /// dependency re-runs `compute` once and passes the result to
    /// `on_change`.
    pub fn subscribe<T, C, F>(&self, compute: C, on_change: F) -> Result<Subscription>
    where
        T: 'static,
        C: Fn(&ReadContext<'_>) -> Result<T> + Send + Sync + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let (id, since) = {
            let mut state = self.lock_live()?;
            (state.graph.add_node(Node::effect()), state.write_seq)
        };

        let run: Run = Box::new(move |ctx: &ReadContext<'_>, notify: bool| {
            let value = compute(ctx)?;
            if notify {
                on_change(value);
            }
            Ok(())
        });
        let slot = Arc::new(SubscriptionSlot::new(id, since, run));
        self.inner
            .computations
            .insert(id, Computation::Subscription(Arc::clone(&slot)));

        let subscriber = SubscriberId::new(id);
        if let Err(error) = slot.execute(self, false) {
            self.unsubscribe(subscriber);
            return Err(error);
        }
        debug!(subscription = %subscriber, "subscribed");

        Ok(Subscription::new(subscriber, Arc::downgrade(&self.inner)))
    }

    /// Subscribe to a single cell or selector.
    pub fn watch<R, F>(&self, readable: &R, on_change: F) -> Result<Subscription>
    where
        R: Readable + Clone + Send + Sync + 'static,
        R::Value: 'static,
        F: Fn(R::Value) + Send + Sync + 'static,
    {
        let readable = readable.clone();
        self.subscribe(move |ctx| ctx.get(&readable), on_change)
    }

    /// Remove a subscription and its edges.
    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        if let Some((_, Computation::Subscription(slot))) =
            self.inner.computations.remove(&id.node_id())
        {
            slot.dispose();
        }

        let mut state = self.inner.state.lock();
        if state.torn_down {
            return;
        }
        let released = state.graph.remove_node(id.node_id());
        let reclaimed = state.release(&released, self.inner.config.collect_on_release);
        debug!(subscription = %id, reclaimed, "unsubscribed");
    }

    /// Install the reads of a successful evaluation as its dependency edges.
    pub(crate) fn commit_reads(&self, id: NodeId, reads: IndexSet<NodeId>) {
        let mut state = self.inner.state.lock();
        if state.torn_down || !state.graph.contains(id) {
            return;
        }
        let released = state.graph.replace_dependencies(id, reads);
        state.release(&released, self.inner.config.collect_on_release);
    }

    /// Add the reads of a failed evaluation to its dependency edges. The
    /// edges of the last successful evaluation stay, so a transient error
    /// releases nothing.
    pub(crate) fn keep_reads(&self, id: NodeId, reads: IndexSet<NodeId>) {
        let mut state = self.inner.state.lock();
        if state.torn_down || !state.graph.contains(id) {
            return;
        }
        state.graph.extend_dependencies(id, reads);
    }

    /// Queue changed cells and flush unless a batch is open.
    pub(crate) fn schedule<I>(&self, cells: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let state = self.inner.state.lock();
        self.schedule_locked(state, cells);
    }

    /// Queue changed cells while already holding the store lock. The lock
    /// is released before any flush.
    fn schedule_locked<I>(&self, mut state: MutexGuard<'_, State>, cells: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        if state.torn_down {
            return;
        }
        let cells: Vec<NodeId> = cells.into_iter().collect();
        for &cell in &cells {
            state.write_seq += 1;
            let seq = state.write_seq;
            state.pending.insert(cell, seq);
        }
        self.invalidate_selectors(&state, &cells);

        if state.batch_depth > 0 || state.flushing {
            return;
        }
        state.flushing = true;
        drop(state);
        self.flush();
    }

    /// Mark every selector depending on `cells` dirty.
    fn invalidate_selectors(&self, state: &State, cells: &[NodeId]) {
        for id in state.graph.affected(cells.iter().copied()) {
            if state.graph.get_node(id).map(Node::kind) != Some(NodeKind::Derived) {
                continue;
            }
            if let Some(entry) = self.inner.computations.get(&id) {
                if let Computation::Selector(selector) = entry.value() {
                    selector.mark_dirty();
                }
            }
        }
    }

    fn subscription_slot(&self, id: NodeId) -> Option<Arc<SubscriptionSlot>> {
        let entry = self.inner.computations.get(&id)?;
        match entry.value() {
            Computation::Subscription(slot) => Some(Arc::clone(slot)),
            Computation::Selector(_) => None,
        }
    }

    pub(crate) fn enter_batch(&self) {
        self.inner.state.lock().batch_depth += 1;
    }

    pub(crate) fn exit_batch(&self, flush: bool) {
        let mut state = self.inner.state.lock();
        state.batch_depth = state.batch_depth.saturating_sub(1);
        if !flush
            || state.batch_depth > 0
            || state.flushing
            || state.torn_down
            || state.pending.is_empty()
        {
            return;
        }
        state.flushing = true;
        drop(state);
        self.flush();
    }

    /// Run notification passes until the queue is empty. The caller has
    /// set `flushing`.
    fn flush(&self) {
        let mut guard = FlushGuard {
            store: self,
            armed: true,
        };
        let max_passes = self.inner.config.max_flush_passes.max(1);
        let mut passes = 0;

        loop {
            let (invalidated, due) = {
                let mut state = self.inner.state.lock();
                if state.pending.is_empty() || state.torn_down {
                    state.pending.clear();
                    state.flushing = false;
                    guard.armed = false;
                    return;
                }
                if passes == max_passes {
                    warn!(
                        passes,
                        dropped = state.pending.len(),
                        "flush pass limit reached, dropping queued notifications"
                    );
                    state.pending.clear();
                    state.flushing = false;
                    guard.armed = false;
                    return;
                }
                passes += 1;
                let changed: Vec<(NodeId, u64)> = state.pending.drain(..).collect();
                let order = state.graph.invalidate(changed.iter().map(|&(id, _)| id));
                let due: Vec<Arc<SubscriptionSlot>> = order
                    .iter()
                    .filter_map(|&id| self.subscription_slot(id))
                    .filter(|slot| state.is_due(slot, &changed))
                    .collect();
                (order.len(), due)
            };

            let mut ran = 0;
            for subscription in due {
                if let Err(error) = subscription.execute(self, true) {
                    warn!(
                        subscription = %subscription.id,
                        %error,
                        "subscription failed during flush"
                    );
                }
                ran += 1;
            }
            debug!(pass = passes, invalidated, ran, "flushed");
        }
    }
}

impl State {
    /// Whether a write in `changed` that reaches `slot` happened after the
    /// slot was registered.
    fn is_due(&self, slot: &SubscriptionSlot, changed: &[(NodeId, u64)]) -> bool {
        let since = slot.since();
        if changed.iter().all(|&(_, seq)| seq > since) {
            return true;
        }
        let upstream = self.graph.upstream(slot.id);
        changed
            .iter()
            .any(|(cell, seq)| *seq > since && upstream.contains(cell))
    }

    /// Reclaim released family members that are idle.
    ///
    /// With `collect_on_release` every idle member goes; otherwise only
    /// members whose reclamation was deferred by `drop_member`.
    pub(crate) fn release(&mut self, released: &[NodeId], collect_on_release: bool) -> usize {
        let mut reclaimed = 0;
        for &id in released {
            let requested = self
                .cells
                .get(&id)
                .map(|slot| slot.release_requested())
                .unwrap_or(false);
            if (collect_on_release || requested) && self.is_idle_member(id) && self.remove_member(id)
            {
                reclaimed += 1;
            }
        }
        reclaimed
    }
}
