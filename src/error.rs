//! Error handling for lazyslot
//!
//! This module defines the crate-wide error type and a Result alias.
//!
//! Errors fall into three groups:
//!
//! - **Contract violations** (level mismatch, double-connecting a slot the
//!   wrapper owns, executing a pure-composition operator). These are
//!   programming errors and are returned to the offending call site as-is.
//! - **Computation failures** raised by an operator while producing a region.
//! - **Callback failures** raised by a batch result or progress subscriber.
//!
//! Inside a [`RoiRequestBatch`](crate::batch::RoiRequestBatch) the last two are
//! folded into [`EngineError::Batch`]; use [`root_cause`] to get back to the
//! original error.

use crate::graph::id::{OperatorId, SlotId};
use crate::roi::Roi;
use thiserror::Error;

/// Boxed foreign error carried as a source.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for lazyslot operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Connecting two slots whose nesting levels differ
    #[error("Level mismatch: cannot connect '{downstream}' (level {downstream_level}) to '{upstream}' (level {upstream_level})")]
    LevelMismatch {
        downstream: String,
        downstream_level: usize,
        upstream: String,
        upstream_level: usize,
    },

    /// A slot the wrapper must wire itself was already connected
    #[error("Slot '{slot}' of operator '{operator}' is already connected")]
    AlreadyConnected { operator: String, slot: String },

    /// `set_value` on a slot that has an upstream connection
    #[error("Cannot set a value on connected slot '{0}'")]
    ConnectedSlot(String),

    /// An internal connection was disconnected by someone other than its owner
    #[error("Slot '{0}' is an internal connection and may not be disconnected")]
    InternalDisconnect(String),

    /// Generic contract violation (wrong level for an operation, etc.)
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Slot id no longer resolves
    #[error("Unknown slot {0:?}")]
    UnknownSlot(SlotId),

    /// Operator id no longer resolves
    #[error("Unknown operator {0:?}")]
    UnknownOperator(OperatorId),

    /// Operator has no slot with that name
    #[error("Operator '{operator}' has no slot named '{slot}'")]
    NoSuchSlotName { operator: String, slot: String },

    /// Data was requested from a slot that cannot provide it yet
    #[error("Slot '{0}' is not ready")]
    SlotNotReady(String),

    /// Region lies outside the slot's shape
    #[error("Invalid roi {roi:?} for shape {shape:?}")]
    InvalidRoi { roi: Roi, shape: Vec<usize> },

    /// Array data requested from a slot holding a scalar value
    #[error("Slot '{0}' does not hold array data")]
    NotAnArray(String),

    /// An operator failed while computing or configuring
    #[error("Operator '{operator}' failed")]
    Operator {
        operator: String,
        #[source]
        source: BoxError,
    },

    /// A subscriber callback failed
    #[error("Callback failed")]
    Callback {
        #[source]
        source: BoxError,
    },

    /// Unified failure of a RoiRequestBatch
    #[error("RoiRequestBatch failed after {completed} completed requests")]
    Batch {
        completed: usize,
        #[source]
        source: Box<EngineError>,
    },

    /// Worker pool could not accept work
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML decoding errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Wrap a foreign error raised inside an operator
    pub fn operator(operator: impl Into<String>, source: impl Into<BoxError>) -> Self {
        EngineError::Operator {
            operator: operator.into(),
            source: source.into(),
        }
    }

    /// Wrap an error returned by a subscriber callback
    pub fn callback(source: impl Into<BoxError>) -> Self {
        EngineError::Callback {
            source: source.into(),
        }
    }

    /// True for errors that indicate a wiring or usage bug rather than a
    /// runtime failure.
    pub fn is_contract_violation(&self) -> bool {
        match self {
            EngineError::LevelMismatch { .. }
            | EngineError::AlreadyConnected { .. }
            | EngineError::ConnectedSlot(_)
            | EngineError::InternalDisconnect(_)
            | EngineError::ContractViolation(_) => true,
            EngineError::WithContext { source, .. } => source.is_contract_violation(),
            _ => false,
        }
    }
}

/// Result type alias for lazyslot operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

/// Walk the `source()` chain to its last element.
pub fn root_cause<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> &'a (dyn std::error::Error + 'static) {
    let mut current = err;
    while let Some(next) = current.source() {
        current = next;
    }
    current
}

/// Check whether the root cause of `err` is of type `E`.
pub fn is_root_cause<E>(err: &(dyn std::error::Error + 'static)) -> bool
where
    E: std::error::Error + 'static,
{
    root_cause(err).is::<E>()
}
