//! Error types for the state container.
//!
//! Every fallible operation on a [`Store`](crate::Store) returns
//! [`Result<T>`]. Errors are always local to the call that raised them: a
//! failed write never leaves a half-applied value or a queued notification
//! behind.

use thiserror::Error;

/// Errors raised by the state container.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The key was never declared.
    #[error("unknown key `{0}`")]
    UnknownKey(String),

    /// A cell, family or selector with this key already exists.
    #[error("key `{0}` is already declared")]
    DuplicateKey(String),

    /// The default-value policy failed while lazily initializing a cell.
    /// The cell stays uninitialized.
    #[error("default policy for `{key}` failed: {reason}")]
    DefaultPolicy { key: String, reason: String },

    /// Strict reclamation refused because the cell is still referenced.
    #[error("cell `{key}` is still in use ({subscribers} subscribers, {roots} roots)")]
    CellInUse {
        key: String,
        subscribers: usize,
        roots: usize,
    },

    /// The stored value is not of the requested type.
    #[error("cell `{key}` does not hold a value of type `{expected}`")]
    TypeMismatch { key: String, expected: &'static str },

    /// The handle refers to a family member that has been reclaimed.
    #[error("handle for `{0}` refers to a reclaimed cell")]
    StaleHandle(String),

    /// A selector read itself while being evaluated.
    #[error("dependency cycle while evaluating `{0}`")]
    Cycle(String),

    /// The store was torn down.
    #[error("store has been torn down")]
    TornDown,

    /// A snapshot entry could not be encoded or decoded.
    #[error("snapshot entry `{key}`: {reason}")]
    Codec { key: String, reason: String },

    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot msgpack encode: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("snapshot msgpack decode: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),
}

/// Result alias used throughout the crate.
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
