use std::collections::BTreeMap;

use kiln_ir::Value;
use snafu::Snafu;

use crate::deploy::Stage;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(context(false), display("{source}"))]
    Ir { source: kiln_ir::Error },

    #[snafu(context(false), display("{source}"))]
    Bind { source: kiln_bind::Error },

    #[snafu(display("no source registered for template {template:?}"))]
    UnknownTemplate { template: String },

    #[snafu(display("template {template:?} has an unterminated placeholder at byte {position}"))]
    MalformedTemplate { template: String, position: usize },

    /// A placeholder has no value in the fragment or, for deferred values, in any enclosing fragment.
    #[snafu(display("template {template:?} references {variable:?}, which is missing from {vars:?}"))]
    MissingVariable { template: String, variable: String, vars: BTreeMap<String, Value> },

    #[snafu(display("template {template:?} received unmangled buffer {name:?}"))]
    UnmangledBuffer { template: String, name: String },

    #[snafu(display("global {name:?} has no datatype"))]
    UntypedGlobal { name: String },

    #[snafu(display("cannot {action} a deployment in stage {stage}"))]
    OutOfOrder { action: &'static str, stage: Stage },

    #[snafu(display("tiling given for {operator:?}, which is not a node of the graph"))]
    UnknownOperator { operator: String },
}
