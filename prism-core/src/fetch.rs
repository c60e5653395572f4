//! Asynchronous producers.
//!
//! A fetch started for one sample may complete after the user moved on:
//! the member it targets was reclaimed or the session was reset.
//! [`PendingFetch`] captures a [`Liveness`] token when the fetch starts and
//! only writes the result if the token is still live.
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> prism_core::Result<()> {
//! use prism_core::Store;
//!
//! let store = Store::new();
//! let stats = store.family("labelStats", |_| 0_u32)?;
//! let member = store.member(&stats, "sample-1")?;
//! let _root = store.retain(&member)?;
//!
//! let written = store.begin_fetch(&member)?.resolve(async { 12 }).await?;
//! assert!(written);
//! assert_eq!(store.get(&member)?, 12);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;

use tokio::task::JoinHandle;
use tracing::trace;

use crate::error::Result;
use crate::store::{Atom, Liveness, Store};

/// A write waiting on an asynchronous result.
pub struct PendingFetch<T> {
    store: Store,
    token: Liveness<T>,
}

impl<T> PendingFetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn atom(&self) -> &Atom<T> {
        self.token.atom()
    }

    /// Whether a result delivered now would be written.
    pub fn is_live(&self) -> bool {
        self.store.is_live(&self.token)
    }

    /// Deliver the result. Returns `Ok(false)` if it was discarded.
    pub fn complete(self, value: T) -> Result<bool> {
        let written = self.store.set_if_live(&self.token, value)?;
        trace!(key = %self.token.atom().key(), written, "fetch completed");
        Ok(written)
    }

    /// Await `future` and deliver its output.
    pub async fn resolve<F>(self, future: F) -> Result<bool>
    where
        F: Future<Output = T>,
    {
        let value = future.await;
        self.complete(value)
    }

    /// Run [`resolve`](Self::resolve) on the current tokio runtime.
    ///
    /// Must be called from within a runtime.
    pub fn spawn<F>(self, future: F) -> JoinHandle<Result<bool>>
    where
        F: Future<Output = T> + Send + 'static,
    {
        tokio::spawn(self.resolve(future))
    }
}

impl<T> fmt::Debug for PendingFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFetch")
            .field("token", &self.token)
            .finish()
    }
}

impl Store {
    /// Start a fetch whose result will be written to `atom`.
    pub fn begin_fetch<T>(&self, atom: &Atom<T>) -> Result<PendingFetch<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        Ok(PendingFetch {
            store: self.clone(),
            token: self.liveness(atom)?,
        })
    }
}
