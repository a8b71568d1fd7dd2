// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sparse, non-buffered attributes.
//!
//! A [`SparseAttributeBag`] keeps a short list of heap-allocated values keyed
//! by variable. There is no schema and no time history; lookups are linear,
//! which is the right trade-off for the handful of occasional attributes an
//! entity carries.

use crate::archive::{Deserializer, Serializer};
use crate::error::{Error, Result};
use crate::variable::{Variable, VariableDescriptor, VariableValue};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// One owned value, typed by its (storage) descriptor.
struct Entry {
    descriptor: Arc<VariableDescriptor>,
    value: NonNull<u8>,
}

impl Entry {
    fn new<T: VariableValue>(descriptor: Arc<VariableDescriptor>, value: T) -> Self {
        Self {
            descriptor,
            value: NonNull::from(Box::leak(Box::new(value))).cast(),
        }
    }

    fn key(&self) -> u64 {
        self.descriptor.key()
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        // SAFETY: `value` is a heap value of the descriptor's type, owned here.
        unsafe { self.descriptor.delete(self.value.as_ptr()) };
    }
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor.clone(),
            // SAFETY: `value` is live and typed by `descriptor`.
            value: unsafe { self.descriptor.clone_value(self.value.as_ptr()) },
        }
    }
}

// SAFETY: entries exclusively own their value and every variable value type
// is `Send + Sync`.
unsafe impl Send for Entry {}
unsafe impl Sync for Entry {}

/// Unordered bag of per-entity attributes.
///
/// A variable (or, for a component, its parent) appears at most once.
///
/// # Example
///
/// ```
/// use fieldstore::{SparseAttributeBag, Variable};
///
/// let normal = Variable::<[f64; 3]>::new("NORMAL");
/// let normal_z = normal.component("NORMAL_Z", 2).unwrap();
///
/// let mut bag = SparseAttributeBag::new();
/// assert_eq!(*bag.get(&normal_z).unwrap(), 0.0);
///
/// bag.set(&normal_z, 1.0).unwrap();
/// assert_eq!(*bag.get(&normal).unwrap(), [0.0, 0.0, 1.0]);
/// ```
#[derive(Clone, Default)]
pub struct SparseAttributeBag {
    entries: Vec<Entry>,
}

impl SparseAttributeBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, source_key: u64) -> Option<usize> {
        self.entries.iter().position(|entry| entry.key() == source_key)
    }

    /// Entry holding `descriptor`'s storage, checked against its type.
    fn find(&self, descriptor: &Arc<VariableDescriptor>) -> Result<Option<usize>> {
        let storage = descriptor.storage();
        let Some(position) = self.position(storage.key()) else {
            return Ok(None);
        };
        let stored = &self.entries[position].descriptor;
        if stored.value_type_id() != storage.value_type_id() {
            return Err(Error::TypeMismatch {
                variable: descriptor.name().to_string(),
                expected: stored.type_name(),
                found: storage.type_name(),
            });
        }
        Ok(Some(position))
    }

    /// Stored value, or the variable's zero when absent.
    pub fn get<'a, T: VariableValue>(&'a self, variable: &'a Variable<T>) -> Result<&'a T> {
        match self.find(variable.descriptor())? {
            Some(position) => {
                let entry = &self.entries[position];
                // SAFETY: `find` matched the storage type; the component offset
                // stays inside the parent value.
                Ok(unsafe {
                    &*entry
                        .value
                        .as_ptr()
                        .add(variable.component_byte_offset())
                        .cast::<T>()
                })
            }
            None => Ok(variable.zero()),
        }
    }

    /// Mutable access, inserting the zero value first when absent.
    ///
    /// For a component, the whole parent value is inserted.
    pub fn get_mut<T: VariableValue>(&mut self, variable: &Variable<T>) -> Result<&mut T> {
        let position = match self.find(variable.descriptor())? {
            Some(position) => position,
            None => {
                let storage = variable.storage().clone();
                let value = storage.clone_zero();
                self.entries.push(Entry {
                    descriptor: storage,
                    value,
                });
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[position];
        // SAFETY: as in `get`; `&mut self` makes the borrow exclusive.
        Ok(unsafe {
            &mut *entry
                .value
                .as_ptr()
                .add(variable.component_byte_offset())
                .cast::<T>()
        })
    }

    pub fn set<T: VariableValue>(&mut self, variable: &Variable<T>, value: T) -> Result<()> {
        if !variable.is_component() && self.find(variable.descriptor())?.is_none() {
            self.entries.push(Entry::new(variable.descriptor().clone(), value));
            return Ok(());
        }
        *self.get_mut(variable)? = value;
        Ok(())
    }

    /// True iff the variable (or its parent) has a stored value.
    pub fn has(&self, descriptor: &VariableDescriptor) -> bool {
        self.position(descriptor.source_key()).is_some()
    }

    /// Release the stored value. Returns whether one was present.
    pub fn erase(&mut self, descriptor: &VariableDescriptor) -> bool {
        match self.position(descriptor.source_key()) {
            Some(position) => {
                self.entries.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Copy every entry of `other` into `self`.
    ///
    /// Entries present in both keep this bag's value unless `overwrite` is
    /// set, in which case the old value is released and replaced by a clone.
    pub fn merge(&mut self, other: &SparseAttributeBag, overwrite: bool) {
        for entry in &other.entries {
            match self.position(entry.key()) {
                Some(position) if overwrite => self.entries[position] = entry.clone(),
                Some(_) => {}
                None => self.entries.push(entry.clone()),
            }
        }
    }

    /// Descriptors of the stored values, in insertion order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Arc<VariableDescriptor>> + '_ {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    /// Write the entry count, then `(name, value)` pairs.
    pub fn save(&self, s: &mut Serializer) {
        s.write_len(self.entries.len());
        for entry in &self.entries {
            s.write_str(entry.descriptor.name());
            // SAFETY: live value typed by its descriptor.
            unsafe { entry.descriptor.save_value(entry.value.as_ptr(), s) };
        }
    }

    pub fn load(d: &mut Deserializer<'_>) -> Result<Self> {
        let count = d.read_len()?;
        let mut bag = Self::new();
        for _ in 0..count {
            let descriptor = d.read_variable()?;
            if descriptor.is_component() || bag.has(&descriptor) {
                return Err(d
                    .invalid(format!("unexpected bag entry {}", descriptor.name()))
                    .into());
            }
            let value = descriptor.load_value(d)?;
            bag.entries.push(Entry { descriptor, value });
        }
        Ok(bag)
    }
}

impl PartialEq for SparseAttributeBag {
    /// Same keys with equal values, regardless of order.
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().all(|mine| {
                other.position(mine.key()).is_some_and(|position| {
                    let theirs = &other.entries[position];
                    mine.descriptor.value_type_id() == theirs.descriptor.value_type_id()
                        // SAFETY: both values are live and of the same type.
                        && unsafe {
                            mine.descriptor
                                .equals(mine.value.as_ptr(), theirs.value.as_ptr())
                        }
                })
            })
    }
}

impl fmt::Display for SparseAttributeBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for entry in &self.entries {
            // SAFETY: live value typed by its descriptor.
            let value = unsafe { entry.descriptor.display_value(entry.value.as_ptr()) };
            map.entry(&format_args!("{}", entry.descriptor.name()), &value);
        }
        map.finish()
    }
}

impl fmt::Debug for SparseAttributeBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SparseAttributeBag {}", self)
    }
}
