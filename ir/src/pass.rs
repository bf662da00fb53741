//! Post-binding code transformations.
//!
//! A pass rewrites one operator's [`ExecutionBlock`]. Passes that only care
//! about a subset of buffers take a [`BufferFilter`] instead of encoding the
//! selection in the pass itself.

use crate::buffer::{Buffer, BufferKind};
use crate::context::NetworkContext;
use crate::fragment::ExecutionBlock;

/// Error produced by a pass implemented in a downstream crate.
pub type PassError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub trait CodeTransformationPass: Send + Sync {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Transform the block generated for `operator`.
    fn apply(
        &self,
        ctx: &mut NetworkContext,
        block: ExecutionBlock,
        operator: &str,
    ) -> Result<ExecutionBlock, PassError>;
}

/// Predicate selecting the buffers a pass operates on.
pub trait BufferFilter: Send + Sync {
    fn accepts(&self, buffer: &Buffer) -> bool;
}

/// Accepts buffers placed in one memory level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLevelFilter {
    pub level: String,
}

impl MemoryLevelFilter {
    pub fn new(level: impl Into<String>) -> Self {
        Self { level: level.into() }
    }
}

impl BufferFilter for MemoryLevelFilter {
    fn accepts(&self, buffer: &Buffer) -> bool {
        buffer.level.as_deref() == Some(self.level.as_str())
    }
}

/// Accepts transient buffers regardless of placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransientFilter;

impl BufferFilter for TransientFilter {
    fn accepts(&self, buffer: &Buffer) -> bool {
        matches!(buffer.kind, BufferKind::Transient { .. })
    }
}

/// Both filters must accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct And<A, B>(pub A, pub B);

impl<A: BufferFilter, B: BufferFilter> BufferFilter for And<A, B> {
    fn accepts(&self, buffer: &Buffer) -> bool {
        self.0.accepts(buffer) && self.1.accepts(buffer)
    }
}
