//! Lifecycle: member reclamation, roots, session resets and teardown.
//!
//! A family member stays alive while something references it: a
//! subscription or selector that read it (a graph dependent) or a [`Root`]
//! held by application code. Unreferenced members are reclaimed when their
//! last reference goes away (with `collect_on_release`), by
//! [`Store::collect_garbage`], by [`Store::reset_session`], or explicitly
//! through [`Store::drop_member`].
//!
//! Reclaimed members never come back: a later `member` call creates a new
//! cell with a new identity, and handles to the old one fail with
//! `StaleHandle`. [`Liveness`] tokens build on this to discard writes from
//! fetches that complete after their target went away.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, trace};

use super::{Atom, Family, Inner, Param, State, Store};
use crate::config::Reclaim;
use crate::error::{Result, StoreError};
use crate::graph::NodeId;
use crate::reactive::Readable;

/// Outcome of [`Store::drop_member`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reclaimed {
    /// The member was removed.
    Dropped,
    /// The member is in use; it is removed once its last subscriber or
    /// root goes away.
    Deferred,
    /// No member exists for the parameter.
    Absent,
}

/// External reference keeping a family member alive.
///
/// Dropping the root releases the reference.
#[must_use = "dropping a Root releases the member immediately"]
pub struct Root {
    id: NodeId,
    key: Arc<str>,
    store: Weak<Inner>,
}

impl Root {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Root {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            Store::from_inner(inner).release_root(self.id);
        }
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Root").field("key", &self.key).finish()
    }
}

/// Identity of a cell at a point in time: the cell plus the session epoch.
///
/// Captured before starting asynchronous work that will write the cell;
/// [`Store::set_if_live`] drops the write if the cell was reclaimed or the
/// session was reset in the meantime.
pub struct Liveness<T> {
    atom: Atom<T>,
    epoch: u64,
}

impl<T> Liveness<T> {
    pub fn atom(&self) -> &Atom<T> {
        &self.atom
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl<T> Clone for Liveness<T> {
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            epoch: self.epoch,
        }
    }
}

impl<T> fmt::Debug for Liveness<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Liveness")
            .field("key", &self.atom.key())
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl State {
    /// Every family member with no subscribers and no roots.
    fn idle_members(&self) -> Vec<NodeId> {
        self.cells
            .keys()
            .copied()
            .filter(|id| self.is_idle_member(*id))
            .collect()
    }
}

impl Store {
    /// Reclaim a family member using the configured [`Reclaim`] mode.
    pub fn drop_member<T>(&self, family: &Family<T>, param: impl Into<Param>) -> Result<Reclaimed> {
        self.drop_member_with(family, param, self.inner.config.reclaim)
    }

    /// Reclaim a family member.
    ///
    /// An unreferenced member is removed at once. A member still in use is
    /// flagged for removal on release under [`Reclaim::Lenient`], and
    /// refused with [`StoreError::CellInUse`] under [`Reclaim::Strict`].
    pub fn drop_member_with<T>(
        &self,
        family: &Family<T>,
        param: impl Into<Param>,
        mode: Reclaim,
    ) -> Result<Reclaimed> {
        let param = param.into();
        let mut state = self.lock_live()?;
        let entry = state
            .families
            .get(&family.id())
            .ok_or_else(|| StoreError::UnknownKey(family.key().to_string()))?;
        let Some(&id) = entry.members.get(&param) else {
            return Ok(Reclaimed::Absent);
        };

        if state.is_idle_member(id) {
            state.remove_member(id);
            debug!(family = %family.key(), %param, "dropped member");
            return Ok(Reclaimed::Dropped);
        }

        let Some(slot) = state.cells.get(&id) else {
            return Ok(Reclaimed::Absent);
        };
        match mode {
            Reclaim::Lenient => {
                slot.request_release();
                debug!(family = %family.key(), %param, "member in use, reclamation deferred");
                Ok(Reclaimed::Deferred)
            }
            Reclaim::Strict => Err(StoreError::CellInUse {
                key: slot.key.to_string(),
                subscribers: state.graph.dependent_count(id),
                roots: slot.roots(),
            }),
        }
    }

    /// Keep a cell alive until the returned [`Root`] is dropped.
    pub fn retain<T>(&self, atom: &Atom<T>) -> Result<Root>
    where
        T: Clone + Send + Sync + 'static,
    {
        let slot = self.cell_slot(atom.node_id(), atom.key())?;
        slot.add_root();
        trace!(key = %atom.key(), roots = slot.roots(), "retained");
        Ok(Root {
            id: slot.id,
            key: Arc::clone(&slot.key),
            store: Arc::downgrade(&self.inner),
        })
    }

    fn release_root(&self, id: NodeId) {
        let mut state = self.inner.state.lock();
        if state.torn_down {
            return;
        }
        let Some(slot) = state.cells.get(&id) else {
            return;
        };
        if slot.remove_root() == 0 {
            state.release(&[id], self.inner.config.collect_on_release);
        }
    }

    /// Reclaim every family member with no subscribers and no roots.
    /// Returns the number reclaimed.
    pub fn collect_garbage(&self) -> usize {
        let Ok(mut state) = self.lock_live() else {
            return 0;
        };
        let idle = state.idle_members();
        let reclaimed = idle
            .into_iter()
            .filter(|id| state.remove_member(*id))
            .count();
        debug!(reclaimed, "collected garbage");
        reclaimed
    }

    /// Start a new session.
    ///
    /// Reclaims every unreferenced family member, resets the remaining
    /// cells to their defaults, bumps the epoch (invalidating every
    /// [`Liveness`] token) and notifies dependents in one batch. Returns
    /// the new epoch.
    pub fn reset_session(&self) -> Result<u64> {
        let (cells, epoch) = {
            let mut state = self.lock_live()?;
            let idle = state.idle_members();
            let reclaimed = idle
                .into_iter()
                .filter(|id| state.remove_member(*id))
                .count();
            let epoch = self.inner.epoch.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            let cells: Vec<_> = state.cells.values().cloned().collect();
            debug!(epoch, reclaimed, remaining = cells.len(), "session reset");
            (cells, epoch)
        };

        self.batch(|| {
            for slot in &cells {
                slot.clear();
            }
            self.schedule(cells.iter().map(|slot| slot.id));
        });
        Ok(epoch)
    }

    /// Drop every declaration, value and subscription. Every later
    /// operation fails with [`StoreError::TornDown`].
    pub fn teardown(&self) {
        let old = {
            let mut state = self.inner.state.lock();
            if state.torn_down {
                return;
            }
            std::mem::replace(
                &mut *state,
                State {
                    torn_down: true,
                    ..State::default()
                },
            )
        };

        let ids: Vec<NodeId> = self
            .inner
            .computations
            .iter()
            .map(|entry| *entry.key())
            .collect();
        let mut computations = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, computation)) = self.inner.computations.remove(&id) {
                if let super::Computation::Subscription(slot) = &computation {
                    slot.dispose();
                }
                computations.push(computation);
            }
        }

        debug!(
            keys = old.keys.len(),
            cells = old.cells.len(),
            computations = computations.len(),
            "store torn down"
        );
        // User closures may own store handles or subscription guards; they
        // are dropped here, after every lock is released.
        drop(computations);
        drop(old);
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.state.lock().torn_down
    }

    /// Capture the identity of `atom` in the current session.
    pub fn liveness<T>(&self, atom: &Atom<T>) -> Result<Liveness<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.cell_slot(atom.node_id(), atom.key())?;
        Ok(Liveness {
            atom: atom.clone(),
            epoch: self.epoch(),
        })
    }

    /// Whether the token's cell still exists in the token's session.
    pub fn is_live<T>(&self, token: &Liveness<T>) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let state = self.inner.state.lock();
        !state.torn_down
            && token.epoch == self.epoch()
            && state.cells.contains_key(&token.atom.node_id())
    }

    /// Write `value` if the token is still live. Returns whether the write
    /// happened; a stale token is not an error.
    ///
    /// The epoch is checked again under the cell's own lock, which
    /// `reset_session` takes after bumping the epoch, so a write racing a
    /// reset is either refused or cleared by it.
    pub fn set_if_live<T>(&self, token: &Liveness<T>, value: T) -> Result<bool>
    where
        T: Clone + Send + Sync + 'static,
    {
        let id = token.atom.node_id();
        let slot = {
            let state = self.inner.state.lock();
            if state.torn_down || token.epoch != self.epoch() {
                None
            } else {
                state.cells.get(&id).cloned()
            }
        };
        let written = slot.is_some_and(|slot| {
            slot.write_if(Arc::new(value), || self.epoch() == token.epoch)
        });
        if !written {
            trace!(key = %token.atom.key(), epoch = token.epoch, "discarded stale write");
            return Ok(false);
        }

        trace!(key = %token.atom.key(), "write");
        self.schedule([id]);
        Ok(true)
    }
}
