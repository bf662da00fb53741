use snafu::Snafu;

use crate::buffer::Scope;
use crate::context::Checkpoint;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A buffer with this name is already tracked by the context.
    #[snafu(display("buffer {name:?} already exists in {scope} scope"))]
    DuplicateBuffer { name: String, scope: Scope },

    /// Lookup of a name the context does not know.
    #[snafu(display("unknown buffer {name:?}"))]
    UnknownBuffer { name: String },

    /// Operation requires a different buffer variant.
    #[snafu(display("buffer {name:?} is a {actual} buffer, expected {expected}"))]
    UnexpectedBufferKind { name: String, expected: &'static str, actual: &'static str },

    /// Two distinct buffers map to one target identifier.
    #[snafu(display("buffers {first:?} and {second:?} both mangle to {ident:?}"))]
    MangleCollision { first: String, second: String, ident: String },

    /// Rollback target no longer matches the journal.
    #[snafu(display("stale checkpoint {checkpoint:?} (journal length {journal_len})"))]
    StaleCheckpoint { checkpoint: Checkpoint, journal_len: usize },

    /// Checkpoints are rejected once the context has been frozen.
    #[snafu(display("context {name:?} is frozen"))]
    ContextFrozen { name: String },

    #[snafu(display("invalid graph {graph:?}: {reason}"))]
    InvalidGraph { graph: String, reason: String },

    /// Node consumes a tensor that no earlier node, input or constant provides.
    #[snafu(display("node {node:?} reads {tensor:?} before it is produced"))]
    NotTopological { node: String, tensor: String },

    #[snafu(display("rank mismatch in {what}: expected {expected}, got {actual}"))]
    RankMismatch { what: String, expected: usize, actual: usize },

    #[snafu(display("unknown memory level {level:?}"))]
    UnknownMemoryLevel { level: String },

    #[snafu(display("invalid memory constraint for {tensor:?} at {level:?}: {reason}"))]
    InvalidMemoryConstraint { tensor: String, level: String, reason: String },

    #[snafu(display("invalid tiling schedule: {reason}"))]
    InvalidSchedule { reason: String },
}
