//! Datatype inference rules.

use itertools::Itertools;
use kiln_dtype::{AddrSpace, DType, ScalarDType};
use kiln_ir::{NetworkContext, Node, OperatorRepresentation, QuantInfo, Value};

use crate::error::*;

/// How output types are derived once the inputs are accepted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputRule {
    /// Outputs get the declared types.
    #[default]
    Fixed,
    /// Declared output types, with the signedness of the first input.
    SignPropagating,
    /// Every output gets the least upper bound of the input types.
    Promote,
}

/// Required input types and inferred output types of one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTypeChecker {
    inputs: Vec<ScalarDType>,
    outputs: Vec<ScalarDType>,
    rule: OutputRule,
}

impl NodeTypeChecker {
    pub fn new(inputs: impl IntoIterator<Item = ScalarDType>, outputs: impl IntoIterator<Item = ScalarDType>) -> Self {
        Self { inputs: inputs.into_iter().collect(), outputs: outputs.into_iter().collect(), rule: OutputRule::Fixed }
    }

    pub fn with_rule(mut self, rule: OutputRule) -> Self {
        self.rule = rule;
        self
    }

    pub fn inputs(&self) -> &[ScalarDType] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ScalarDType] {
        &self.outputs
    }

    pub fn rule(&self) -> OutputRule {
        self.rule
    }

    /// Check the node's inputs against the required types and write the inferred output types.
    ///
    /// Constants are accepted when every value is representable in the required type.
    /// Other global buffers may be upcast along the partial order; local buffers must
    /// match exactly. Changes are kept only when the check succeeds.
    pub fn type_check(&self, ctx: &mut NetworkContext, node: &Node, repr: &OperatorRepresentation) -> Result<bool> {
        if node.inputs.len() != self.inputs.len() || node.outputs.len() != self.outputs.len() {
            return Ok(false);
        }

        ctx.speculate(|ctx| {
            for (tensor, &required) in node.inputs.iter().zip(&self.inputs) {
                if !check_input(ctx, tensor, required)? {
                    tracing::trace!(node = %node.name, tensor = %tensor, %required, "input rejected");
                    return Ok(false);
                }
            }

            let Some(outputs) = self.infer_outputs(ctx, node)? else {
                return Ok(false);
            };
            let n_levels = repr.get("n_levels").and_then(Value::as_int).and_then(|n| u64::try_from(n).ok());
            for (tensor, dtype) in node.outputs.iter().zip(outputs) {
                let addrspace = if ctx.is_global(tensor) { AddrSpace::Global } else { AddrSpace::Local };
                let quant = dtype.is_int().then(|| QuantInfo {
                    n_levels: n_levels.unwrap_or_else(|| 1u64.checked_shl(dtype.bits() as u32).unwrap_or(u64::MAX)),
                    signed: dtype.is_signed(),
                });
                ctx.update(tensor, |buffer| {
                    buffer.dtype = Some(DType::from(dtype).ptr(addrspace));
                    buffer.quant = quant;
                })?;
            }
            Ok(true)
        })
    }

    fn infer_outputs(&self, ctx: &NetworkContext, node: &Node) -> Result<Option<Vec<ScalarDType>>> {
        Ok(match self.rule {
            OutputRule::Fixed => Some(self.outputs.clone()),
            OutputRule::SignPropagating => {
                let Some(first) = node.inputs.first() else { return Ok(Some(self.outputs.clone())) };
                let buffer = ctx.lookup(first)?;
                let signed = match (&buffer.quant, &buffer.dtype) {
                    (Some(quant), _) => quant.signed,
                    (None, Some(dtype)) => dtype.is_signed(),
                    (None, None) => return Ok(None),
                };
                Some(self.outputs.iter().map(|dtype| dtype.with_signedness(signed)).collect())
            }
            OutputRule::Promote => {
                let inputs = self.inputs.iter().copied().map(DType::from).collect_vec();
                DType::least_upper_dtype(&inputs).map(|lub| vec![lub.base(); self.outputs.len()])
            }
        })
    }
}

fn check_input(ctx: &mut NetworkContext, tensor: &str, required: ScalarDType) -> Result<bool> {
    let buffer = ctx.lookup(tensor)?;
    let global = ctx.is_global(tensor);
    let addrspace = if global { AddrSpace::Global } else { AddrSpace::Local };

    let accepted = match (buffer.values(), buffer.dtype.as_ref().map(DType::base)) {
        (Some(values), _) => required.can_represent(values),
        (None, Some(current)) if current == required => return Ok(true),
        (None, Some(current)) => global && required.can_upcast_from(current),
        // Produced by a node that has not been typed.
        (None, None) => false,
    };
    if accepted {
        ctx.update(tensor, |buffer| buffer.dtype = Some(DType::from(required).ptr(addrspace)))?;
    }
    Ok(accepted)
}
