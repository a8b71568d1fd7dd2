// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Variable schemas: the offset table shared by every record of a mesh.
//!
//! A [`SchemaBuilder`] collects variables during model setup and assigns each
//! one a block offset inside a step. [`SchemaBuilder::build`] freezes it into an
//! immutable `Arc<Schema>`; records only ever see the frozen form, so a schema
//! cannot change once records exist.
//!
//! # Example
//!
//! ```
//! use fieldstore::{SchemaBuilder, Variable};
//!
//! let pressure = Variable::<f64>::new("PRESSURE");
//! let velocity = Variable::<[f64; 3]>::new("VELOCITY");
//!
//! let schema = SchemaBuilder::new()
//!     .with_variable(&pressure)
//!     .unwrap()
//!     .with_variable(&velocity)
//!     .unwrap()
//!     .build();
//!
//! assert_eq!(schema.data_size(), 4);
//! assert_eq!(schema.offset_of(&velocity).unwrap(), 1);
//! ```

use crate::archive::{Deserializer, Serializer, Shared, SharedRead};
use crate::config::{StoreConfig, BLOCK_SIZE, MAX_DOFS};
use crate::error::{Error, Result};
use crate::index::VariableIndex;
use crate::variable::VariableDescriptor;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Degree-of-freedom slot: a solvable variable plus its optional reaction.
#[derive(Debug, Clone)]
pub struct Dof {
    variable: Arc<VariableDescriptor>,
    reaction: Option<Arc<VariableDescriptor>>,
}

impl Dof {
    pub fn variable(&self) -> &Arc<VariableDescriptor> {
        &self.variable
    }

    pub fn reaction(&self) -> Option<&Arc<VariableDescriptor>> {
        self.reaction.as_ref()
    }
}

impl PartialEq for Dof {
    fn eq(&self, other: &Self) -> bool {
        self.variable.key() == other.variable.key()
            && self.reaction.as_ref().map(|r| r.key()) == other.reaction.as_ref().map(|r| r.key())
    }
}

/// Where a variable lives inside one step of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    /// Block offset of the storage variable.
    pub block: usize,
    /// Byte offset of the accessed value (component offset included).
    pub byte: usize,
}

/// Frozen, shareable variable layout.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    variables: Vec<Arc<VariableDescriptor>>,
    offsets: Vec<usize>,
    data_size: usize,
    index: VariableIndex,
    dofs: Vec<Dof>,
}

impl Schema {
    /// Number of stored variables (components excluded).
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Footprint of one step, in blocks.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Footprint of one step, in bytes.
    pub fn data_size_bytes(&self) -> usize {
        self.data_size * BLOCK_SIZE
    }

    /// Stored variables in insertion order.
    pub fn variables(&self) -> impl ExactSizeIterator<Item = &Arc<VariableDescriptor>> + '_ {
        self.variables.iter()
    }

    /// Stored variables paired with their block offsets.
    pub fn layout(&self) -> impl ExactSizeIterator<Item = (&Arc<VariableDescriptor>, usize)> + '_ {
        self.variables.iter().zip(self.offsets.iter().copied())
    }

    /// True iff `descriptor` (or its parent, for a component) is stored.
    pub fn has(&self, descriptor: &VariableDescriptor) -> bool {
        self.index.contains(descriptor.source_key())
    }

    /// Block offset stored for `key`.
    pub fn index(&self, key: u64) -> Option<usize> {
        self.index.find(key).map(|slot| slot.position)
    }

    /// Block offset of the storage variable behind `descriptor`.
    pub fn offset_of(&self, descriptor: &VariableDescriptor) -> Result<usize> {
        self.index(descriptor.source_key())
            .ok_or_else(|| Error::VariableNotInSchema(descriptor.name().to_string()))
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Arc<VariableDescriptor>> {
        self.variables.iter().find(|v| v.name() == name)
    }

    /// Current index table size (always a power of two, or 0 when empty).
    pub fn index_table_size(&self) -> usize {
        self.index.table_size()
    }

    pub fn hash_function_index(&self) -> u32 {
        self.index.hash_function_index()
    }

    // ========================================================================
    // Degrees of freedom
    // ========================================================================

    pub fn dofs_len(&self) -> usize {
        self.dofs.len()
    }

    pub fn dofs(&self) -> &[Dof] {
        &self.dofs
    }

    /// Dof slot holding exactly `variable` (matched by full key).
    pub fn dof_index(&self, variable: &VariableDescriptor) -> Option<usize> {
        self.dofs
            .iter()
            .position(|dof| dof.variable.key() == variable.key())
    }

    pub fn has_dof(&self, variable: &VariableDescriptor) -> bool {
        self.dof_index(variable).is_some()
    }

    pub fn dof_variable(&self, index: usize) -> Option<&Arc<VariableDescriptor>> {
        self.dofs.get(index).map(Dof::variable)
    }

    pub fn dof_reaction(&self, index: usize) -> Option<&Arc<VariableDescriptor>> {
        self.dofs.get(index).and_then(Dof::reaction)
    }

    /// Start a new builder seeded with this schema. Offsets of the existing
    /// variables are kept.
    pub fn to_builder(&self) -> SchemaBuilder {
        SchemaBuilder {
            schema: self.clone(),
        }
    }

    /// Resolve an accessor descriptor to its location inside a step.
    ///
    /// Checks that the storage variable behind `descriptor` holds the same
    /// value type as the entry stored under its key.
    pub(crate) fn locate(&self, descriptor: &Arc<VariableDescriptor>) -> Result<Location> {
        let storage = descriptor.storage();
        let slot = self
            .index
            .find(storage.key())
            .ok_or_else(|| Error::VariableNotInSchema(descriptor.name().to_string()))?;
        let stored = &self.variables[slot.ordinal];
        if stored.value_type_id() != storage.value_type_id() {
            return Err(Error::TypeMismatch {
                variable: descriptor.name().to_string(),
                expected: stored.type_name(),
                found: storage.type_name(),
            });
        }
        Ok(Location {
            block: slot.position,
            byte: slot.position * BLOCK_SIZE + descriptor.component_byte_offset(),
        })
    }

    // ========================================================================
    // Archive
    // ========================================================================

    /// Write variable names, then dofs as `(name, has_reaction, [reaction])`.
    pub fn save(&self, s: &mut Serializer) {
        s.write_len(self.variables.len());
        for variable in &self.variables {
            s.write_str(variable.name());
        }
        s.write_len(self.dofs.len());
        for dof in &self.dofs {
            s.write_str(dof.variable.name());
            s.write_bool(dof.reaction.is_some());
            if let Some(reaction) = &dof.reaction {
                s.write_str(reaction.name());
            }
        }
    }

    /// Rebuild a schema saved by [`Schema::save`].
    pub fn load(d: &mut Deserializer<'_>) -> Result<Self> {
        let mut builder = SchemaBuilder::new();
        let count = d.read_len()?;
        for _ in 0..count {
            let variable = d.read_variable()?;
            builder.add(&variable)?;
        }
        let dofs = d.read_len()?;
        for _ in 0..dofs {
            let variable = d.read_variable()?;
            let reaction = if d.read_bool()? {
                Some(d.read_variable()?)
            } else {
                None
            };
            builder.add_dof(&variable, reaction.as_ref())?;
        }
        Ok(builder.schema)
    }

    /// Save once per archive; later calls write a back-reference.
    pub fn save_shared(self: &Arc<Self>, s: &mut Serializer) {
        if let Shared::New(_) = s.share(self) {
            self.save(s);
        }
    }

    /// Counterpart of [`Schema::save_shared`]: schemas shared at save time are
    /// shared again after loading.
    pub fn load_shared(d: &mut Deserializer<'_>) -> Result<Arc<Self>> {
        match d.shared::<Schema>()? {
            SharedRead::Existing(schema) => Ok(schema),
            SharedRead::New(_) => {
                let schema = Arc::new(Self::load(d)?);
                d.register_shared(&schema);
                Ok(schema)
            }
        }
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.data_size == other.data_size
            && self.variables.len() == other.variables.len()
            && self
                .variables
                .iter()
                .zip(&other.variables)
                .all(|(a, b)| a.key() == b.key() && a.value_type_id() == b.value_type_id())
            && self.offsets == other.offsets
            && self.dofs == other.dofs
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Schema: {} variables, data size {} blocks",
            self.variables.len(),
            self.data_size
        )?;
        for (variable, offset) in self.layout() {
            writeln!(f, "  {:>4}  {} ({})", offset, variable.name(), variable.type_name())?;
        }
        for (i, dof) in self.dofs.iter().enumerate() {
            match &dof.reaction {
                Some(reaction) => {
                    writeln!(f, "  dof {}: {} -> {}", i, dof.variable.name(), reaction.name())?
                }
                None => writeln!(f, "  dof {}: {}", i, dof.variable.name())?,
            }
        }
        Ok(())
    }
}

/// Mutable schema under construction.
///
/// Derefs to the [`Schema`] built so far for read access.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder honoring `config.initial_index_size`.
    pub fn with_config(config: &StoreConfig) -> Self {
        let size = config.initial_index_size.max(1).next_power_of_two();
        Self {
            schema: Schema {
                index: VariableIndex::with_initial_size(size),
                ..Schema::default()
            },
        }
    }

    /// Add a variable and return its block offset.
    ///
    /// A component adds its parent. Adding a variable already present returns
    /// its existing offset.
    pub fn add(&mut self, descriptor: &Arc<VariableDescriptor>) -> Result<usize> {
        if !descriptor.is_registered() {
            log::warn!("[schema] refusing unregistered variable {}", descriptor.name());
            return Err(Error::UnregisteredVariable(descriptor.name().to_string()));
        }
        let storage = descriptor.storage();
        if let Some(offset) = self.schema.index(storage.key()) {
            return Ok(offset);
        }

        let schema = &mut self.schema;
        let offset = schema.data_size;
        let ordinal = schema.variables.len();
        schema.variables.push(storage.clone());
        schema.offsets.push(offset);
        schema.data_size += storage.blocks();
        schema.index.insert(storage.key(), offset, ordinal);
        log::debug!(
            "[schema] added {} at block {} (data size {})",
            storage.name(),
            offset,
            schema.data_size
        );
        Ok(offset)
    }

    /// Chaining form of [`SchemaBuilder::add`].
    pub fn with_variable(mut self, descriptor: &Arc<VariableDescriptor>) -> Result<Self> {
        self.add(descriptor)?;
        Ok(self)
    }

    /// Register `variable` as a dof, optionally paired with `reaction`.
    ///
    /// An existing slot for the same variable is reused, and its reaction is
    /// replaced when a new one is given. Components of one parent occupy
    /// separate slots.
    pub fn add_dof(
        &mut self,
        variable: &Arc<VariableDescriptor>,
        reaction: Option<&Arc<VariableDescriptor>>,
    ) -> Result<usize> {
        for descriptor in std::iter::once(variable).chain(reaction) {
            if !self.schema.has(descriptor) {
                return Err(Error::VariableNotInSchema(descriptor.name().to_string()));
            }
        }

        if let Some(index) = self.schema.dof_index(variable) {
            if let Some(reaction) = reaction {
                self.schema.dofs[index].reaction = Some(reaction.clone());
            }
            return Ok(index);
        }

        if self.schema.dofs.len() >= MAX_DOFS {
            log::warn!("[schema] dof table full, rejecting {}", variable.name());
            return Err(Error::DofCapacityExceeded {
                variable: variable.name().to_string(),
                max: MAX_DOFS,
            });
        }
        self.schema.dofs.push(Dof {
            variable: variable.clone(),
            reaction: reaction.cloned(),
        });
        log::debug!(
            "[schema] dof {} -> {}",
            self.schema.dofs.len() - 1,
            variable.name()
        );
        Ok(self.schema.dofs.len() - 1)
    }

    /// Freeze into a shareable schema.
    pub fn build(self) -> Arc<Schema> {
        log::debug!(
            "[schema] built: {} variables, {} dofs, data size {} blocks, index {}@{}",
            self.schema.len(),
            self.schema.dofs_len(),
            self.schema.data_size,
            self.schema.index_table_size(),
            self.schema.hash_function_index()
        );
        Arc::new(self.schema)
    }
}

impl Deref for SchemaBuilder {
    type Target = Schema;

    fn deref(&self) -> &Schema {
        &self.schema
    }
}
