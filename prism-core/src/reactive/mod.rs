//! Reactive Primitives
//!
//! This module implements tracked evaluation on top of the store: selectors,
//! subscriptions and batches.
//!
//! # Concepts
//!
//! ## Read contexts
//!
//! Every computation receives a [`ReadContext`]. Reading a cell or selector
//! through it registers a dependency; reading through the store directly
//! does not.
//!
//! ## Selectors
//!
//! A [`Selector`] is a derived value that caches its result and recomputes
//! lazily after one of its inputs changed.
//!
//! ## Subscriptions
//!
//! A subscription is a computation plus a callback. It runs eagerly when
//! a batch invalidates it, at most once per batch.
//!
//! ## Batches
//!
//! A [`Batch`] coalesces the writes of one logical event into one
//! notification pass.

mod batch;
mod context;
mod selector;
mod subscriber;
mod subscription;

pub use batch::Batch;
pub use context::{ReadContext, Readable};
pub use selector::{Selector, SelectorState};
pub use subscriber::{SubscriberId, Subscription};

pub(crate) use selector::{Compute, SelectorSlot};
pub(crate) use subscription::{Run, SubscriptionSlot};
