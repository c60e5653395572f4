//! Python bindings.
//!
//! Exposes a `Store` class over arbitrary Python objects. Values are held
//! as GIL-independent references; subscription callbacks reacquire the GIL
//! when they fire.

use std::sync::Arc;

use parking_lot::Mutex;
use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyTypeError, PyValueError};
use pyo3::prelude::*;
use tracing::warn;

use crate::error::StoreError;
use crate::reactive::Subscription;
use crate::store::Store;

impl From<StoreError> for PyErr {
    fn from(error: StoreError) -> Self {
        let message = error.to_string();
        match error {
            StoreError::UnknownKey(_) | StoreError::StaleHandle(_) => PyKeyError::new_err(message),
            StoreError::TypeMismatch { .. } => PyTypeError::new_err(message),
            StoreError::DuplicateKey(_) | StoreError::CellInUse { .. } => {
                PyValueError::new_err(message)
            }
            _ => PyRuntimeError::new_err(message),
        }
    }
}

/// A Python object stored in a cell.
#[derive(Clone)]
struct PyValue(Arc<Py<PyAny>>);

impl PyValue {
    fn new(object: PyObject) -> Self {
        Self(Arc::new(object))
    }

    fn get(&self, py: Python<'_>) -> PyObject {
        self.0.clone_ref(py)
    }
}

/// Python-exposed store.
#[pyclass(name = "Store")]
pub struct PyStore {
    store: Store,
    subscriptions: Mutex<Vec<Subscription>>,
}

#[pymethods]
impl PyStore {
    #[new]
    fn new() -> Self {
        Self {
            store: Store::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Declare a cell holding `default` until written.
    fn declare(&self, key: &str, default: PyObject) -> PyResult<()> {
        self.store.atom(key, PyValue::new(default))?;
        Ok(())
    }

    fn get(&self, py: Python<'_>, key: &str) -> PyResult<PyObject> {
        let value = self.store.read_key::<PyValue>(key)?;
        Ok(value.get(py))
    }

    fn set(&self, key: &str, value: PyObject) -> PyResult<()> {
        self.store.write_key(key, PyValue::new(value))?;
        Ok(())
    }

    fn reset(&self, key: &str) -> PyResult<()> {
        self.store.reset_key(key)?;
        Ok(())
    }

    /// Call `callback(value)` after every write to `key`. Returns an id for
    /// `unsubscribe`.
    fn subscribe(&self, key: &str, callback: PyObject) -> PyResult<u64> {
        let atom = self.store.atom_handle::<PyValue>(key)?;
        let callback = PyValue::new(callback);
        let subscription = self.store.watch(&atom, move |value: PyValue| {
            Python::with_gil(|py| {
                if let Err(error) = callback.0.call1(py, (value.get(py),)) {
                    warn!(%error, "python subscriber raised");
                }
            });
        })?;

        let id = subscription.id().node_id().raw();
        self.subscriptions.lock().push(subscription);
        Ok(id)
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id().node_id().raw() != id);
        before != subscriptions.len()
    }

    fn reset_session(&self) -> PyResult<u64> {
        Ok(self.store.reset_session()?)
    }

    fn teardown(&self) {
        self.subscriptions.lock().clear();
        self.store.teardown();
    }

    fn __contains__(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    fn __repr__(&self) -> String {
        format!(
            "Store(cells={}, epoch={})",
            self.store.cell_count(),
            self.store.epoch()
        )
    }
}
