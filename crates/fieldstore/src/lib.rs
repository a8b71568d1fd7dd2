// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # fieldstore - Per-entity variable storage for finite-element kernels
//!
//! Every mesh entity (node, element, condition) carries a record of named,
//! typed field values ("variables": pressure, velocity, temperature, ...).
//! Some are buffered over the last few time steps, others are occasional
//! attributes. This crate is that storage layer.
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldstore::{EntityRecord, Result, SchemaBuilder, VariableRegistry};
//!
//! fn main() -> Result<()> {
//!     // Register variables once at startup
//!     let registry = VariableRegistry::new();
//!     let pressure = registry.register::<f64>("PRESSURE")?;
//!     let velocity = registry.register::<[f64; 3]>("VELOCITY")?;
//!     let velocity_x = registry.register_component(&velocity, "VELOCITY_X", 0)?;
//!
//!     // Build one schema per mesh, share it between all nodes
//!     let schema = SchemaBuilder::new()
//!         .with_variable(&pressure)?
//!         .with_variable(&velocity)?
//!         .build();
//!
//!     // One record per node, two buffered steps
//!     let mut node = EntityRecord::with_depth(schema, 2)?;
//!     node.set(&pressure, 1.5)?;
//!     node.set(&velocity_x, 3.0)?;
//!
//!     // Advance one time step
//!     node.push_front()?;
//!     assert_eq!(*node.get(&pressure)?, 0.0);
//!     assert_eq!(*node.get_at(&velocity, 1)?, [3.0, 0.0, 0.0]);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |  Variable<T>            typed handle (name, key, zero, vtable)       |
//! +---------------------------------------------------------------------+
//! |  SchemaBuilder -> Arc<Schema>   key -> block offset, dof table      |
//! +---------------------------------------------------------------------+
//! |  EntityRecord           data_size * depth blocks, rotating step 0   |
//! |  SparseAttributeBag     (variable, boxed value) list, no schema     |
//! +---------------------------------------------------------------------+
//! |  Serializer / Deserializer      names on the wire, values via vtable |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Variable`] | Typed variable handle, derefs to its [`VariableDescriptor`] |
//! | [`VariableRegistry`] | Name -> descriptor table, used to resolve archives |
//! | [`SchemaBuilder`] / [`Schema`] | Variable layout shared by many records |
//! | [`EntityRecord`] | Multi-step buffered values of one entity |
//! | [`SparseAttributeBag`] | Occasional, non-buffered attributes |
//!
//! ## Threading
//!
//! Schemas are immutable once built and shared through `Arc`. Distinct
//! records can be read and written from different threads without any
//! synchronization; a single record needs `&mut` to change, so concurrent
//! mutation of one record does not compile.

// Clippy: No blanket suppressions. Fix issues properly or use inline #[allow] with justification.

/// Little-endian archive (save/load of schemas, records and bags).
pub mod archive;
/// Sparse attribute bag.
pub mod bag;
/// Global configuration (block layout, schema limits, store defaults).
pub mod config;
/// Error types.
pub mod error;
mod index;
/// Built-in backend for the `log` facade.
#[cfg(feature = "logging")]
pub mod logging;
/// Per-entity multi-step records.
pub mod record;
/// Name -> descriptor resolution.
pub mod registry;
/// Schemas and schema builders.
pub mod schema;
/// Variable descriptors and typed handles.
pub mod variable;

pub use archive::{ArchiveError, Deserializer, Persist, Serializer};
pub use bag::SparseAttributeBag;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use record::EntityRecord;
pub use registry::{VariableRegistry, VariableResolver};
pub use schema::{Dof, Schema, SchemaBuilder};
pub use variable::{Composite, Variable, VariableDescriptor, VariableValue};

/// fieldstore version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
