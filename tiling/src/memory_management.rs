//! Allocation and release of operator-scoped buffers.

use kiln_ir::{
    AddrSpace, BufferFilter, CodeFragment, CodeTransformationPass, ExecutionBlock, NetworkContext, PassError,
    TemplateId, Value,
};
use snafu::OptionExt;

use crate::error::*;

/// `name`, `type`, `size`, `level`.
pub const MEMORY_ALLOC: TemplateId = TemplateId::new("memory_alloc");
/// `name`, `level`.
pub const MEMORY_FREE: TemplateId = TemplateId::new("memory_free");

/// Brackets an operator's code with allocations of the buffers it owns.
///
/// Only local, non-aliasing buffers accepted by the filter are managed, and
/// only if the operator uses them: either it is registered as a user or its
/// code references the buffer.
#[derive(Debug, Clone)]
pub struct MemoryManagementPass<F> {
    filter: F,
}

impl<F: BufferFilter> MemoryManagementPass<F> {
    pub fn new(filter: F) -> Self {
        Self { filter }
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn templates() -> Vec<(TemplateId, &'static str)> {
        vec![
            (MEMORY_ALLOC, "${type} ${name} = (${type})kiln_alloc_${level}(${size});"),
            (MEMORY_FREE, "kiln_free_${level}(${name});"),
        ]
    }

    pub fn generate(&self, ctx: &NetworkContext, mut block: ExecutionBlock, operator: &str) -> Result<ExecutionBlock> {
        let referenced = block.fragments.referenced_buffers();
        let managed: Vec<_> = ctx
            .local_buffers()
            .filter(|buffer| !buffer.is_reference() && self.filter.accepts(buffer))
            .filter(|buffer| buffer.users.iter().any(|user| user == operator) || referenced.contains(&buffer.name))
            .collect();

        let mut allocs = Vec::with_capacity(managed.len());
        for buffer in &managed {
            let size = buffer.size_bytes().context(UntypedBufferSnafu { name: buffer.name.clone() })?;
            let level = buffer.level.as_deref().unwrap_or("default");
            let pointer = buffer.dtype.clone().map_or_else(|| "void*".into(), |d| d.ptr(AddrSpace::Local).c_style());
            allocs.push(
                CodeFragment::new(MEMORY_ALLOC)
                    .set("name", Value::buffer(&buffer.name))
                    .set("type", Value::text(pointer))
                    .set("size", size)
                    .set("level", Value::text(level)),
            );
            let free = CodeFragment::new(MEMORY_FREE).set("name", Value::buffer(&buffer.name));
            block.add_right(free.set("level", Value::text(level)));
        }
        block.fragments.extend_front(allocs);

        tracing::trace!(operator, managed = managed.len(), "managed operator buffers");
        Ok(block)
    }
}

impl<F: BufferFilter> CodeTransformationPass for MemoryManagementPass<F> {
    fn name(&self) -> &str {
        "memory_management"
    }

    fn apply(
        &self,
        ctx: &mut NetworkContext,
        block: ExecutionBlock,
        operator: &str,
    ) -> Result<ExecutionBlock, PassError> {
        Ok(self.generate(ctx, block, operator)?)
    }
}
