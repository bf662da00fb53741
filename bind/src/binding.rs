use std::sync::Arc;

use kiln_ir::{CodeTransformationPass, ExecutionBlock, NetworkContext, Node, OperatorRepresentation, Value};
use snafu::ResultExt;

use crate::checker::NodeTypeChecker;
use crate::error::*;
use crate::template::KernelTemplate;

/// One (type checker, kernel template, pass pipeline) triple. Immutable once built.
#[derive(Clone)]
pub struct NodeBinding {
    checker: NodeTypeChecker,
    template: Arc<dyn KernelTemplate>,
    passes: Vec<Arc<dyn CodeTransformationPass>>,
}

impl std::fmt::Debug for NodeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBinding")
            .field("checker", &self.checker)
            .field("template", &self.template.id())
            .field("passes", &self.passes.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl NodeBinding {
    pub fn new(checker: NodeTypeChecker, template: impl KernelTemplate + 'static) -> Self {
        Self { checker, template: Arc::new(template), passes: Vec::new() }
    }

    pub fn with_pass(mut self, pass: impl CodeTransformationPass + 'static) -> Self {
        self.passes.push(Arc::new(pass));
        self
    }

    /// Template identifier; doubles as the binding's diagnostic name.
    pub fn name(&self) -> &str {
        self.template.id().as_str()
    }

    pub fn checker(&self) -> &NodeTypeChecker {
        &self.checker
    }

    pub fn template(&self) -> &dyn KernelTemplate {
        self.template.as_ref()
    }

    /// Type-check the node; on success the representation learns every buffer's type.
    pub fn type_check(&self, ctx: &mut NetworkContext, node: &Node, repr: &mut OperatorRepresentation) -> Result<bool> {
        if !self.checker.type_check(ctx, node, repr)? {
            return Ok(false);
        }
        annotate_types(ctx, repr);
        Ok(true)
    }

    /// Materialize the kernel fragment and hoist its scratch buffers.
    pub fn bind(
        &self,
        ctx: &mut NetworkContext,
        node: &Node,
        repr: &mut OperatorRepresentation,
    ) -> Result<ExecutionBlock> {
        for transient in self.template.transients() {
            let size = transient.bytes(&node.name, repr)?;
            let name = format!("{}_{}", node.name, transient.key);
            let name = ctx.hoist_transient(&name, size, transient.level.as_deref())?;
            ctx.add_user(&name, &node.name)?;
            repr.insert(transient.key.clone(), Value::buffer(name));
        }
        Ok(ExecutionBlock::new(self.template.instantiate(repr)))
    }

    /// Run the pass pipeline over a bound block.
    pub fn code_transform(
        &self,
        ctx: &mut NetworkContext,
        mut block: ExecutionBlock,
        operator: &str,
    ) -> Result<ExecutionBlock> {
        for pass in &self.passes {
            tracing::debug!(operator, pass = pass.name(), "applying pass");
            block = pass.apply(ctx, block, operator).context(PassSnafu { pass: pass.name(), node: operator })?;
        }
        Ok(block)
    }
}

/// Record `{key}_type` for every buffer-valued entry with an assigned type.
fn annotate_types(ctx: &NetworkContext, repr: &mut OperatorRepresentation) {
    let types: Vec<_> = repr
        .iter()
        .filter_map(|(key, value)| {
            let dtype = ctx.get(value.as_buffer()?)?.dtype.as_ref()?;
            Some((format!("{key}_type"), Value::text(dtype.base().c_style())))
        })
        .collect();
    repr.extend(types);
}
