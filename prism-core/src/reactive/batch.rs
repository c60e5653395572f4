//! Write batching.
//!
//! Writes made while a [`Batch`] is open apply to their cells immediately
//! but their notifications are held back. When the outermost batch closes,
//! the union of everything invalidated is flushed in one pass, so a
//! subscription depending on several written cells runs once.

use std::fmt;

use crate::store::Store;

/// Guard for an open batch. Closing (or dropping) the outermost guard
/// flushes pending notifications.
#[must_use = "dropping a Batch closes it immediately"]
pub struct Batch {
    store: Store,
}

impl Batch {
    pub(crate) fn open(store: &Store) -> Self {
        store.enter_batch();
        Self {
            store: store.clone(),
        }
    }

    /// Close the batch. Same as dropping the guard.
    pub fn commit(self) {}
}

impl Drop for Batch {
    fn drop(&mut self) {
        // An unwinding batch keeps its writes but leaves the notifications
        // queued for the next flush.
        let flush = !std::thread::panicking();
        self.store.exit_batch(flush);
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch").finish_non_exhaustive()
    }
}

impl Store {
    /// Open a batch. Notifications are deferred until the returned guard
    /// (and every enclosing batch) is closed.
    pub fn begin_batch(&self) -> Batch {
        Batch::open(self)
    }

    /// Run `f` inside a batch.
    ///
    /// ```rust
    /// use prism_core::Store;
    ///
    /// let store = Store::new();
    /// let a = store.atom("a", 0).unwrap();
    /// let b = store.atom("b", 0).unwrap();
    ///
    /// store.batch(|| {
    ///     store.set(&a, 1)?;
    ///     store.set(&b, 2)
    /// })
    /// .unwrap();
    /// ```
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let batch = self.begin_batch();
        let result = f();
        batch.commit();
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    use crate::store::Store;

    #[test]
    fn nested_batches_flush_once_at_the_outermost_close() {
        let store = Store::new();
        let a = store.atom("a", 0).unwrap();
        let b = store.atom("b", 0).unwrap();
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let (a2, b2) = (a.clone(), b.clone());
        let _sub = store
            .subscribe(
                move |ctx| Ok(ctx.get(&a2)? + ctx.get(&b2)?),
                move |_| {
                    runs_clone.fetch_add(1, Ordering::SeqCst);
                },
            )
            .unwrap();

        let outer = store.begin_batch();
        store.set(&a, 1).unwrap();
        store.batch(|| store.set(&b, 2)).unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        outer.commit();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reads_inside_a_batch_see_its_writes() {
        let store = Store::new();
        let a = store.atom("a", 0).unwrap();
        store
            .batch(|| {
                store.set(&a, 3)?;
                assert_eq!(store.get(&a)?, 3);
                Ok::<_, crate::StoreError>(())
            })
            .unwrap();
    }
}
