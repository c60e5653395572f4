//! Snapshots of persisted cells.
//!
//! Cells declared with [`Store::persisted_atom`] carry a codec and take
//! part in [`Store::snapshot`] / [`Store::restore`]. Only explicitly
//! written values are captured; a cell still at its default is left out
//! and keeps its default on restore.
//!
//! A [`Snapshot`] is an ordered map from key to JSON value and encodes to
//! JSON or MessagePack.

use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{Atom, CellDeclaration, Param, Policy, Store, Value};

/// Type-erased conversion between a cell value and JSON.
#[derive(Clone, Copy)]
pub(crate) struct Codec {
    encode: fn(&Value) -> Result<serde_json::Value, String>,
    decode: fn(serde_json::Value) -> Result<Value, String>,
}

fn encode_as<T: Serialize + 'static>(value: &Value) -> Result<serde_json::Value, String> {
    let typed = value
        .downcast_ref::<T>()
        .ok_or_else(|| format!("value is not a {}", std::any::type_name::<T>()))?;
    serde_json::to_value(typed).map_err(|error| error.to_string())
}

fn decode_as<T>(json: serde_json::Value) -> Result<Value, String>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    serde_json::from_value::<T>(json)
        .map(|value| Arc::new(value) as Value)
        .map_err(|error| error.to_string())
}

impl Codec {
    pub(crate) fn of<T>() -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            encode: encode_as::<T>,
            decode: decode_as::<T>,
        }
    }

    pub(crate) fn encode(&self, value: &Value) -> Result<serde_json::Value, String> {
        (self.encode)(value)
    }

    pub(crate) fn decode(&self, json: serde_json::Value) -> Result<Value, String> {
        (self.decode)(json)
    }
}

/// Written values of persisted cells, keyed in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    entries: IndexMap<String, serde_json::Value>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

impl Store {
    /// Declare a scalar cell that takes part in snapshots.
    pub fn persisted_atom<T>(&self, key: &str, default: T) -> Result<Atom<T>>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let default: Value = Arc::new(default);
        let policy: Policy = Arc::new(move |_: &Param| Ok::<Value, String>(Arc::clone(&default)));
        self.declare_cell(key, CellDeclaration::<T>::persisted(policy, Codec::of::<T>()))
    }

    /// Capture the written values of every persisted cell.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for slot in self.scalar_slots()? {
            let Some(codec) = slot.codec else {
                continue;
            };
            let Some(value) = slot.written() else {
                continue;
            };
            let json = codec.encode(&value).map_err(|reason| StoreError::Codec {
                key: slot.key.to_string(),
                reason,
            })?;
            snapshot.insert(slot.key.to_string(), json);
        }
        debug!(entries = snapshot.len(), "snapshot taken");
        Ok(snapshot)
    }

    /// Write every entry of `snapshot` back, notifying in one batch.
    ///
    /// All entries are decoded before anything is written: an unknown key,
    /// a cell that is not persisted or a value that does not decode fails
    /// the whole restore and leaves the store unchanged. Returns the number
    /// of cells written.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<usize> {
        let mut decoded = Vec::with_capacity(snapshot.len());
        for (key, json) in snapshot.iter() {
            let slot = self.scalar_slot(key)?;
            let codec = slot.codec.ok_or_else(|| StoreError::Codec {
                key: key.to_string(),
                reason: "cell is not persisted".to_string(),
            })?;
            let value = codec.decode(json.clone()).map_err(|reason| StoreError::Codec {
                key: key.to_string(),
                reason,
            })?;
            decoded.push((slot, value));
        }

        self.batch(|| {
            for (slot, value) in &decoded {
                slot.write(Arc::clone(value));
            }
            self.schedule(decoded.iter().map(|(slot, _)| slot.id));
        });
        debug!(entries = decoded.len(), "snapshot restored");
        Ok(decoded.len())
    }
}
