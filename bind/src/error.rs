use kiln_ir::PassError;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: kiln_ir::Error },

    /// Backtracking exhausted every choice of the first layer.
    #[snafu(display(
        "graph is unresolvable: deepest layer {deepest} ({node:?}) exhausted candidates {candidates:?}"
    ))]
    Unresolvable { deepest: usize, node: String, candidates: Vec<String> },

    #[snafu(display("resolution aborted after {steps} steps (limit {limit})"))]
    StepLimit { steps: usize, limit: usize },

    #[snafu(display("no engine maps {op:?} (node {node:?})"))]
    UnsupportedOp { node: String, op: String },

    #[snafu(display("node {node:?} is pinned to unknown engine {engine:?}"))]
    UnknownEngine { node: String, engine: String },

    /// Node input is neither tracked by the context nor a graph constant.
    #[snafu(display("node {node:?} reads untracked tensor {tensor:?}"))]
    MissingInput { node: String, tensor: String },

    #[snafu(display("tensor {tensor:?} of node {node:?} has no shape"))]
    MissingShape { node: String, tensor: String },

    #[snafu(display("node {node:?} is not resolved"))]
    NotResolved { node: String },

    #[snafu(display("operator representation of {node:?} lacks integer {var:?}"))]
    MissingRepresentation { node: String, var: String },

    #[snafu(display("pass {pass:?} failed on {node:?}: {source}"))]
    Pass { pass: String, node: String, source: PassError },
}
