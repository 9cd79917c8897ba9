//! # lazyslot: lazy slot-based dataflow engine
//!
//! Operators expose named, typed slots. Connecting an output slot to an
//! input slot builds a graph through which metadata flows eagerly and data
//! flows lazily: nothing is computed until somebody asks a slot for a region
//! of interest.
//!
//! ## Architecture
//!
//! - **Graph**: shared registry of slots and operators, setup-depth
//!   coordination and the worker pool ([`graph`])
//! - **Slots**: connection, metadata/value propagation, dirty notification
//!   and nested multi-slots ([`slot`])
//! - **Operators**: the [`Operator`] trait and the lane-replicating
//!   [`OperatorWrapper`] ([`operator`])
//! - **Requests**: deferred work on the worker pool ([`request`])
//! - **Batches**: bounded-concurrency execution over many rois ([`batch`])
//!
//! ## Example
//!
//! ```ignore
//! use lazyslot::{operators::OpArrayPiper, roi, Graph, RoiRequestBatch};
//!
//! let graph = Graph::new();
//! let piper = graph.instantiate(OpArrayPiper::new())?;
//! piper.input("Input")?.set_value(data)?;
//!
//! let output = piper.output("Output")?;
//! let rois = roi::tile(&[100, 100], &[10, 10]);
//! let batch = RoiRequestBatch::new(output, rois, 100 * 100).batch_size(10);
//! batch.progress_signal().subscribe(|p| {
//!     tracing::info!("{}%", p);
//!     Ok(())
//! });
//! batch.execute()?;
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod graph;
pub mod operator;
pub mod operators;
pub mod request;
pub mod roi;
pub mod signal;
pub mod slot;

// Re-export commonly used types
pub use batch::{RoiRequestBatch, RoiResult};
pub use config::EngineConfig;
pub use error::{is_root_cause, root_cause, BoxError, EngineError, Result, ResultExt};
pub use graph::id::{ObserverId, OperatorId, SlotId};
pub use graph::{Graph, SetupGuard};
pub use operator::{Operator, OperatorHandle, OperatorWrapper, WrapperConfig};
pub use request::{Request, WorkerPool};
pub use roi::Roi;
pub use signal::OrderedSignal;
pub use slot::{MetaDict, Slot, SlotDescriptor, SlotDirection, Value};
