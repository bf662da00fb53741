//! Admissibility rules.
//!
//! A parser decides in two phases whether a node is admissible for a family of
//! kernels. [`NodeParser::parse_node`] looks only at the node itself (arity,
//! attributes, static shapes) and builds the operator representation.
//! [`NodeParser::parse_node_ctxt`] then registers the node's tensors in the
//! compilation context. Every context mutation happens inside a speculation
//! owned by the caller, so a rejection leaves no trace.

use kiln_ir::{Buffer, Graph, NetworkContext, Node, OperatorRepresentation, Scope, Value};
use snafu::OptionExt;

use crate::error::*;

pub trait NodeParser: Send + Sync {
    /// Name reported in diagnostics.
    fn name(&self) -> &str;

    /// Representation keys of the node's inputs, in node order.
    fn inputs(&self) -> &[&'static str];

    /// Representation keys of the node's outputs, in node order.
    fn outputs(&self) -> &[&'static str];

    /// Static admissibility check.
    ///
    /// Returns the operator representation on acceptance. The default accepts any
    /// node whose arity matches [`inputs`](Self::inputs) and [`outputs`](Self::outputs).
    fn parse_node(&self, node: &Node, graph: &Graph) -> Option<OperatorRepresentation> {
        let _ = graph;
        (node.inputs.len() == self.inputs().len() && node.outputs.len() == self.outputs().len())
            .then(OperatorRepresentation::new)
    }

    /// Context-dependent admissibility check; hoists the node's tensors.
    fn parse_node_ctxt(
        &self,
        ctx: &mut NetworkContext,
        graph: &Graph,
        node: &Node,
        repr: &mut OperatorRepresentation,
        channels_first: bool,
    ) -> Result<bool> {
        let _ = channels_first;
        hoist_io(ctx, graph, node, self.inputs(), self.outputs(), repr)?;
        Ok(true)
    }
}

/// Register a node's tensors in the context.
///
/// Graph constants seen for the first time are promoted to global constant
/// buffers. Outputs get a local buffer unless one exists already (graph outputs
/// are pre-registered as globals). The node is recorded as a user of each input.
/// Buffer names and element counts are written into `repr`.
pub fn hoist_io(
    ctx: &mut NetworkContext,
    graph: &Graph,
    node: &Node,
    inputs: &[&'static str],
    outputs: &[&'static str],
    repr: &mut OperatorRepresentation,
) -> Result<()> {
    for (key, tensor) in inputs.iter().zip(&node.inputs) {
        if !ctx.contains(tensor) {
            let constant =
                graph.constant_tensor(tensor).context(MissingInputSnafu { node: &node.name, tensor })?;
            let buffer = Buffer::constant(tensor.clone(), constant.shape.iter().copied(), constant.values.clone());
            ctx.add(buffer, Scope::Global)?;
            tracing::trace!(node = %node.name, constant = %tensor, "promoted graph constant");
        }
        ctx.add_user(tensor, &node.name)?;

        let size = ctx.lookup(tensor)?.num_elements();
        repr.insert((*key).to_string(), Value::buffer(tensor.clone()));
        repr.insert(format!("{key}_size"), size.into());
    }

    for (key, tensor) in outputs.iter().zip(&node.outputs) {
        if !ctx.contains(tensor) {
            let shape = graph.shape_of(tensor).context(MissingShapeSnafu { node: &node.name, tensor })?;
            ctx.add(Buffer::variable(tensor.clone(), shape.iter().copied()), Scope::Local)?;
        }

        let size = ctx.lookup(tensor)?.num_elements();
        repr.insert((*key).to_string(), Value::buffer(tensor.clone()));
        repr.insert(format!("{key}_size"), size.into());
    }
    Ok(())
}
