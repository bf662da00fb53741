//! Intermediate representation shared by the kiln compiler crates.
//!
//! # Module Organization
//!
//! - [`graph`] - Canonical operator graph (nodes, attributes, tensors)
//! - [`buffer`] - Buffer variants tracked during compilation
//! - [`context`] - Compilation context with checkpoint/rollback
//! - [`fragment`] - Code fragments and execution blocks
//! - [`memory`] - Memory hierarchy and placement constraints
//! - [`tiling`] - Tile rectangles and per-operator schedules
//! - [`pass`] - Code transformation pass interface

pub mod buffer;
pub mod context;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod memory;
pub mod pass;
pub mod tiling;


pub use buffer::{Buffer, BufferKind, Dims, FieldValue, QuantInfo, Scope, StructField};
pub use context::{Checkpoint, NetworkContext};
pub use error::{Error, Result};
pub use fragment::{CodeFragment, ExecutionBlock, FragmentSeq, OperatorRepresentation, TemplateId, Value, builtin};
pub use graph::{Attribute, ConstantTensor, Graph, Node, TensorInfo};
pub use memory::{MemoryConstraint, MemoryHierarchy, MemoryLevel, NodeMemoryConstraint, TensorMemoryConstraint};
pub use pass::{BufferFilter, CodeTransformationPass, MemoryLevelFilter, PassError, TransientFilter};
pub use tiling::{HyperRectangle, OperatorTiling, TilingSchedule};

// Re-export external types for convenience
pub use kiln_dtype::{AddrSpace, DType, ScalarDType};
