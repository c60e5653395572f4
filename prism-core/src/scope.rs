//! Dual-view binding.
//!
//! An explorer shows the same kind of state in two places at once: the
//! main grid and a modal detail view. Each concern is declared once and
//! addressed per [`Scope`]; the two scopes are separate cells, so writing
//! one never touches or notifies the other.
//!
//! ```rust
//! use prism_core::{Scope, Store};
//!
//! let store = Store::new();
//! let active_labels = store.dual("activeLabels", Vec::<String>::new()).unwrap();
//!
//! let main = active_labels.main(&store).unwrap();
//! store.set(&main, vec!["car".to_string()]).unwrap();
//!
//! let modal = active_labels.atom(&store, Scope::Modal).unwrap();
//! assert!(store.get(&modal).unwrap().is_empty());
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{Atom, Family, Param, Store};

/// Which view a piece of state belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Main,
    Modal,
}

impl Scope {
    pub const ALL: [Scope; 2] = [Scope::Main, Scope::Modal];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Main => "main",
            Scope::Modal => "modal",
        }
    }

    /// The other scope.
    pub fn other(&self) -> Scope {
        match self {
            Scope::Main => Scope::Modal,
            Scope::Modal => Scope::Main,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Scope> for Param {
    fn from(scope: Scope) -> Self {
        Param::from(scope.as_str())
    }
}

/// A value held once per scope, with one default for both.
pub struct Dual<T> {
    family: Family<T>,
}

impl<T> Dual<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn atom(&self, store: &Store, scope: Scope) -> Result<Atom<T>> {
        store.member(&self.family, scope)
    }

    pub fn main(&self, store: &Store) -> Result<Atom<T>> {
        self.atom(store, Scope::Main)
    }

    pub fn modal(&self, store: &Store) -> Result<Atom<T>> {
        self.atom(store, Scope::Modal)
    }

    /// The family backing both scopes.
    pub fn family(&self) -> &Family<T> {
        &self.family
    }
}

impl<T> Clone for Dual<T> {
    fn clone(&self) -> Self {
        Self {
            family: self.family.clone(),
        }
    }
}

impl<T> fmt::Debug for Dual<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dual").field("key", &self.family.key()).finish()
    }
}

/// A family addressed by `(scope, param)`, such as the per-sample hidden
/// object map of each view.
pub struct ScopedFamily<T> {
    family: Family<T>,
}

impl<T> ScopedFamily<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn member(&self, store: &Store, scope: Scope, param: impl Into<Param>) -> Result<Atom<T>> {
        store.member(&self.family, (scope, param.into()))
    }

    /// Parameters of the live members in `scope`, in creation order.
    pub fn members(&self, store: &Store, scope: Scope) -> Result<Vec<Param>> {
        Ok(store
            .members(&self.family)?
            .into_iter()
            .filter(|param| param.first() == Some(scope.as_str()))
            .map(|param| param.tail())
            .collect())
    }

    pub fn family(&self) -> &Family<T> {
        &self.family
    }
}

impl<T> Clone for ScopedFamily<T> {
    fn clone(&self) -> Self {
        Self {
            family: self.family.clone(),
        }
    }
}

impl<T> fmt::Debug for ScopedFamily<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedFamily")
            .field("key", &self.family.key())
            .finish()
    }
}

impl Store {
    /// Declare a value held once per [`Scope`].
    pub fn dual<T>(&self, key: &str, default: T) -> Result<Dual<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let family = self.family(key, move |_: &Param| default.clone())?;
        Ok(Dual { family })
    }

    /// Declare a family addressed by `(scope, param)`. The policy sees the
    /// parameter without the scope, so both views share defaults.
    pub fn scoped_family<T, F>(&self, key: &str, policy: F) -> Result<ScopedFamily<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&Param) -> T + Send + Sync + 'static,
    {
        let family = self.family(key, move |param: &Param| policy(&param.tail()))?;
        Ok(ScopedFamily { family })
    }
}
