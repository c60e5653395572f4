//! Prism Core
//!
//! A fine-grained reactive state container for data-exploration UIs.
//! It implements:
//!
//! - State cells with lazily evaluated, memoized defaults
//! - Cell families keyed by an application-chosen parameter
//! - Cached selectors and eager subscriptions with dependency tracking
//! - Batched, deduplicated, topologically ordered notification
//! - Dual-view (main/modal) bindings
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! - `store`: the container, cells, families and lifecycle
//! - `reactive`: read contexts, selectors, subscriptions and batches
//! - `graph`: the dependency graph and invalidation ordering
//! - `scope`: main/modal bindings
//! - `snapshot`: persistence of written cells
//! - `fetch`: guarded writes from asynchronous producers
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use prism_core::{ReadContext, Scope, Store};
//!
//! let store = Store::new();
//! let labels = store.dual("activeLabels", Vec::<String>::new()).unwrap();
//! let main = labels.atom(&store, Scope::Main).unwrap();
//!
//! let count = {
//!     let main = main.clone();
//!     store
//!         .selector("activeLabelCount", move |ctx: &ReadContext<'_>| Ok(ctx.get(&main)?.len()))
//!         .unwrap()
//! };
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! let _sub = store
//!     .watch(&count, move |n| sink.lock().unwrap().push(n))
//!     .unwrap();
//!
//! store.set(&main, vec!["car".into(), "person".into()]).unwrap();
//! assert_eq!(*seen.lock().unwrap(), vec![2]);
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod reactive;
pub mod scope;
pub mod snapshot;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use config::{Reclaim, StoreConfig};
pub use error::{Result, StoreError};
pub use fetch::PendingFetch;
pub use reactive::{
    Batch, ReadContext, Readable, Selector, SelectorState, SubscriberId, Subscription,
};
pub use scope::{Dual, Scope, ScopedFamily};
pub use snapshot::Snapshot;
pub use store::{Atom, Family, FamilyId, Liveness, Param, Reclaimed, Root, Store, Value};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Python module definition.
///
/// This function is called by Python when importing the module.
#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<python::PyStore>()?;
    m.add("__version__", env!("CARGO_PKG_VERSION"))?;
    Ok(())
}
