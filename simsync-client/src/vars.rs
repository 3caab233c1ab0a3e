//! The shared variable collection.
//!
//! Keyed uniquely both by engine name and by Definition. Structural changes
//! (add/remove) take the write lock; the worker thread only ever mutates
//! fields of existing entries through [`SimVarCollection::with_var`], never
//! the collection's shape.

use parking_lot::RwLock;
use simsync_core::SimVar;
use simsync_types::{Definition, EngineError, VarSource};
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Inner {
    by_def: HashMap<Definition, SimVar>,
    by_name: HashMap<String, Definition>,
}

/// Thread-shared collection of declared variables.
#[derive(Debug, Default)]
pub struct SimVarCollection {
    inner: RwLock<Inner>,
}

impl SimVarCollection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable. Both the name and the Definition must be unused.
    pub fn insert(&self, var: SimVar) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&var.name) {
            return Err(EngineError::DuplicateName(var.name.clone()));
        }
        inner.by_name.insert(var.name.clone(), var.def());
        inner.by_def.insert(var.def(), var);
        Ok(())
    }

    /// Remove a variable by engine name, returning it if present.
    pub fn remove(&self, name: &str) -> Option<SimVar> {
        let mut inner = self.inner.write();
        let def = inner.by_name.remove(name)?;
        inner.by_def.remove(&def)
    }

    /// The Definition bound to an engine name.
    pub fn def_of(&self, name: &str) -> Option<Definition> {
        self.inner.read().by_name.get(name).copied()
    }

    /// Run a closure against one variable under the write lock.
    ///
    /// Returns `None` if the Definition is unknown. The lock is held for
    /// the closure's duration, which also serializes a concurrent
    /// register/deregister of the same variable.
    pub fn with_var<R>(&self, def: Definition, f: impl FnOnce(&mut SimVar) -> R) -> Option<R> {
        let mut inner = self.inner.write();
        inner.by_def.get_mut(&def).map(f)
    }

    /// Clone one variable's current state.
    pub fn snapshot(&self, def: Definition) -> Option<SimVar> {
        self.inner.read().by_def.get(&def).cloned()
    }

    /// All Definitions, unordered.
    pub fn defs(&self) -> Vec<Definition> {
        self.inner.read().by_def.keys().copied().collect()
    }

    /// Definitions of local script variables, unordered.
    pub fn local_defs(&self) -> Vec<Definition> {
        self.inner
            .read()
            .by_def
            .values()
            .filter(|v| v.source == VarSource::Local)
            .map(|v| v.def())
            .collect()
    }

    /// Number of declared variables.
    pub fn len(&self) -> usize {
        self.inner.read().by_def.len()
    }

    /// Whether no variables are declared.
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_def.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simsync_types::VarDeclaration;

    fn var(def: u32, name: &str) -> SimVar {
        let decl = VarDeclaration::new(name, "SIM NAME", "knots");
        SimVar::from_declaration(Definition::new(def), &decl)
    }

    #[test]
    fn insert_and_find_by_both_keys() {
        let vars = SimVarCollection::new();
        vars.insert(var(1, "Speed")).unwrap();

        assert_eq!(vars.def_of("Speed"), Some(Definition::new(1)));
        assert_eq!(
            vars.with_var(Definition::new(1), |v| v.name.clone()),
            Some("Speed".to_string())
        );
    }

    #[test]
    fn duplicate_name_rejected() {
        let vars = SimVarCollection::new();
        vars.insert(var(1, "Speed")).unwrap();

        let err = vars.insert(var(2, "Speed")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateName(_)));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn remove_clears_both_indexes() {
        let vars = SimVarCollection::new();
        vars.insert(var(1, "Speed")).unwrap();

        let removed = vars.remove("Speed").unwrap();
        assert_eq!(removed.def(), Definition::new(1));
        assert!(vars.is_empty());
        assert!(vars.with_var(Definition::new(1), |_| ()).is_none());
    }

    #[test]
    fn local_defs_filters_by_source() {
        let vars = SimVarCollection::new();
        vars.insert(var(1, "Speed")).unwrap();
        let decl = VarDeclaration::new("Brake", "PARK_BRAKE", "number")
            .with_source(VarSource::Local);
        vars.insert(SimVar::from_declaration(Definition::new(2), &decl))
            .unwrap();

        assert_eq!(vars.local_defs(), vec![Definition::new(2)]);
    }
}
