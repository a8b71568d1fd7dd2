// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every storage layer.
//!
//! All failures are caller precondition violations (wrong schema bound, wrong
//! variable used, malformed archive). Nothing here is transient, so nothing is
//! retried: errors are surfaced to the caller as-is.

use crate::archive::ArchiveError;

/// fieldstore error type.
///
/// # Example
///
/// ```
/// use fieldstore::{Error, SchemaBuilder, Variable};
///
/// let unregistered = Variable::<f64>::unregistered("PRESSURE");
/// let mut builder = SchemaBuilder::new();
/// match builder.add(&unregistered) {
///     Err(Error::UnregisteredVariable(name)) => assert_eq!(name, "PRESSURE"),
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Variable / Registry Errors
    // ========================================================================
    /// Variable carries key 0 (declared but never registered).
    UnregisteredVariable(String),
    /// A variable with this name is already registered.
    DuplicateVariable(String),
    /// Two distinct names produced the same key.
    KeyCollision { name: String, existing: String },
    /// Component index outside the composite value.
    ComponentOutOfRange {
        variable: String,
        index: u32,
        count: usize,
    },
    /// Components of component variables are not addressable.
    NestedComponent(String),

    // ========================================================================
    // Schema Errors
    // ========================================================================
    /// Variable (or its source) was never added to the schema.
    VariableNotInSchema(String),
    /// More than [`crate::config::MAX_DOFS`] dofs requested.
    DofCapacityExceeded { variable: String, max: usize },

    // ========================================================================
    // Record Errors
    // ========================================================================
    /// Record has no bound schema.
    NoSchema,
    /// Step index not below the buffer depth.
    StepOutOfRange { step: usize, depth: usize },
    /// Buffer depth must be at least 1.
    InvalidBufferDepth(usize),
    /// Accessor type differs from the type stored under the same key.
    TypeMismatch {
        variable: String,
        expected: &'static str,
        found: &'static str,
    },

    // ========================================================================
    // Archive / Config Errors
    // ========================================================================
    /// Save/load failure.
    Archive(ArchiveError),
    /// Invalid configuration value.
    InvalidConfig(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // Variable / Registry
            Error::UnregisteredVariable(name) => {
                write!(f, "Variable {} is not registered (key 0)", name)
            }
            Error::DuplicateVariable(name) => write!(f, "Variable {} already registered", name),
            Error::KeyCollision { name, existing } => {
                write!(f, "Variable {} collides with {} (same key)", name, existing)
            }
            Error::ComponentOutOfRange {
                variable,
                index,
                count,
            } => write!(
                f,
                "Component {} of {} out of range (composite has {} components)",
                index, variable, count
            ),
            Error::NestedComponent(name) => {
                write!(f, "Cannot derive component {} from a component variable", name)
            }
            // Schema
            Error::VariableNotInSchema(name) => write!(f, "Variable {} not in schema", name),
            Error::DofCapacityExceeded { variable, max } => write!(
                f,
                "Cannot add dof {}: each schema stores at most {} dofs",
                variable, max
            ),
            // Record
            Error::NoSchema => write!(f, "Record has no bound schema"),
            Error::StepOutOfRange { step, depth } => {
                write!(f, "Step {} out of range (buffer depth {})", step, depth)
            }
            Error::InvalidBufferDepth(depth) => {
                write!(f, "Invalid buffer depth: {} (must be >= 1)", depth)
            }
            Error::TypeMismatch {
                variable,
                expected,
                found,
            } => write!(
                f,
                "Type mismatch for {}: stored {}, accessed as {}",
                variable, expected, found
            ),
            // Archive / Config
            Error::Archive(e) => write!(f, "Archive error: {}", e),
            Error::InvalidConfig(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Archive(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArchiveError> for Error {
    fn from(e: ArchiveError) -> Self {
        Error::Archive(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
