// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Name -> descriptor resolution.
//!
//! Loading an archive, or wiring a schema from configuration, needs to turn a
//! variable *name* back into its descriptor. The engine never consults global
//! state for this: callers pass a [`VariableResolver`]. [`VariableRegistry`] is
//! the stock implementation, filled once at startup and read-only afterwards.

use crate::error::{Error, Result};
use crate::variable::{Composite, Variable, VariableDescriptor, VariableValue};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolve a variable name to its descriptor.
pub trait VariableResolver {
    /// Returns `None` if the name is unknown.
    fn resolve(&self, name: &str) -> Option<Arc<VariableDescriptor>>;
}

impl<F> VariableResolver for F
where
    F: Fn(&str) -> Option<Arc<VariableDescriptor>>,
{
    fn resolve(&self, name: &str) -> Option<Arc<VariableDescriptor>> {
        self(name)
    }
}

impl VariableResolver for HashMap<String, Arc<VariableDescriptor>> {
    fn resolve(&self, name: &str) -> Option<Arc<VariableDescriptor>> {
        self.get(name).cloned()
    }
}

/// Concurrent name and key table for every variable of an application.
///
/// Rejects duplicate names and key collisions, so every key it hands out is
/// unique for the lifetime of the registry.
///
/// # Example
///
/// ```
/// use fieldstore::{VariableRegistry, VariableResolver};
///
/// let registry = VariableRegistry::new();
/// let pressure = registry.register::<f64>("PRESSURE").unwrap();
/// let resolved = registry.resolve("PRESSURE").unwrap();
/// assert_eq!(resolved.key(), pressure.key());
/// ```
#[derive(Debug, Default)]
pub struct VariableRegistry {
    by_name: DashMap<String, Arc<VariableDescriptor>>,
    by_key: DashMap<u64, String>,
}

impl VariableRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a variable zeroed with `T::default()`.
    pub fn register<T: VariableValue + Default>(&self, name: &str) -> Result<Variable<T>> {
        let variable = Variable::<T>::new(name);
        self.insert(variable.descriptor())?;
        Ok(variable)
    }

    /// Create and register a variable with an explicit zero value.
    pub fn register_with_zero<T: VariableValue>(&self, name: &str, zero: T) -> Result<Variable<T>> {
        let variable = Variable::with_zero(name, zero);
        self.insert(variable.descriptor())?;
        Ok(variable)
    }

    /// Create and register component `index` of `parent`.
    pub fn register_component<P: Composite>(
        &self,
        parent: &Variable<P>,
        name: &str,
        index: u32,
    ) -> Result<Variable<P::Component>> {
        let component = parent.component(name, index)?;
        self.insert(component.descriptor())?;
        Ok(component)
    }

    /// Register an already-built descriptor.
    pub fn insert(&self, descriptor: &Arc<VariableDescriptor>) -> Result<()> {
        if !descriptor.is_registered() {
            return Err(Error::UnregisteredVariable(descriptor.name().to_string()));
        }
        let name = descriptor.name();
        match self.by_key.entry(descriptor.key()) {
            Entry::Occupied(existing) => {
                let err = if existing.get() == name {
                    Error::DuplicateVariable(name.to_string())
                } else {
                    Error::KeyCollision {
                        name: name.to_string(),
                        existing: existing.get().clone(),
                    }
                };
                log::warn!("[registry] rejected {}: {}", name, err);
                return Err(err);
            }
            Entry::Vacant(slot) => {
                slot.insert(name.to_string());
            }
        }
        match self.by_name.entry(name.to_string()) {
            Entry::Occupied(_) => {
                self.by_key.remove(&descriptor.key());
                log::warn!("[registry] rejected duplicate name {}", name);
                Err(Error::DuplicateVariable(name.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(descriptor.clone());
                log::debug!(
                    "[registry] registered {} (key {:#018x}, {} bytes)",
                    name,
                    descriptor.key(),
                    descriptor.size()
                );
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<VariableDescriptor>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Typed lookup; fails if the registered type differs from `T`.
    pub fn get_typed<T: VariableValue>(&self, name: &str) -> Result<Variable<T>> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| Error::UnregisteredVariable(name.to_string()))?;
        Variable::from_descriptor(descriptor)
    }

    pub fn get_by_key(&self, key: u64) -> Option<Arc<VariableDescriptor>> {
        let name = self.by_key.get(&key)?.value().clone();
        self.get(&name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl VariableResolver for VariableRegistry {
    fn resolve(&self, name: &str) -> Option<Arc<VariableDescriptor>> {
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let registry = VariableRegistry::new();
        let pressure = registry.register::<f64>("PRESSURE").expect("register");
        let velocity = registry.register::<[f64; 3]>("VELOCITY").expect("register");
        let vx = registry
            .register_component(&velocity, "VELOCITY_X", 0)
            .expect("component");

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("VELOCITY_X"));
        assert_eq!(registry.resolve("PRESSURE").expect("resolve").key(), pressure.key());
        assert_eq!(registry.get_by_key(vx.key()).expect("by key").name(), "VELOCITY_X");
        assert!(registry.resolve("TEMPERATURE").is_none());
        assert_eq!(registry.names(), vec!["PRESSURE", "VELOCITY", "VELOCITY_X"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = VariableRegistry::new();
        registry.register::<f64>("PRESSURE").expect("first");
        assert!(matches!(
            registry.register::<f64>("PRESSURE"),
            Err(Error::DuplicateVariable(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unregistered_rejected() {
        let registry = VariableRegistry::new();
        let v = Variable::<f64>::unregistered("DENSITY");
        assert!(matches!(
            registry.insert(v.descriptor()),
            Err(Error::UnregisteredVariable(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_typed_lookup() {
        let registry = VariableRegistry::new();
        registry.register::<i32>("FLAG").expect("register");
        assert!(registry.get_typed::<i32>("FLAG").is_ok());
        assert!(matches!(
            registry.get_typed::<f64>("FLAG"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(registry.get_typed::<f64>("MISSING").is_err());
    }

    #[test]
    fn test_closure_and_map_resolvers() {
        let pressure = Variable::<f64>::new("PRESSURE");
        let descriptor = pressure.descriptor().clone();
        let closure = move |name: &str| (name == "PRESSURE").then(|| descriptor.clone());
        assert!(closure.resolve("PRESSURE").is_some());
        assert!(closure.resolve("OTHER").is_none());

        let mut map = HashMap::new();
        map.insert("PRESSURE".to_string(), pressure.descriptor().clone());
        assert!(map.resolve("PRESSURE").is_some());
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = VariableRegistry::new();
        crossbeam::scope(|scope| {
            for t in 0..4 {
                let registry = &registry;
                scope.spawn(move |_| {
                    for i in 0..25 {
                        registry
                            .register::<f64>(&format!("VAR_{}_{}", t, i))
                            .expect("register");
                    }
                });
            }
        })
        .expect("threads");
        assert_eq!(registry.len(), 100);
    }
}
