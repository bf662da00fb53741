//! Wait-handles for asynchronous transfers.
//!
//! A [`Future`] is identified by its name only. The waiting strategy of an
//! engine decides which transfers share a name: every tensor gets its own,
//! every direction gets one, or everything waits on a single barrier. Generators
//! therefore ask the strategy for a future per (tensor, direction, copy) and
//! deduplicate by name.

use kiln_ir::{CodeFragment, NetworkContext, TemplateId, Value};
use strum::{AsRefStr, Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumIter)]
pub enum Direction {
    /// External to local memory.
    #[strum(serialize = "ExternalToLocal")]
    In,
    /// Local to external memory.
    #[strum(serialize = "LocalToExternal")]
    Out,
}

impl Direction {
    fn short(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display)]
pub enum WaitingStrategy {
    #[default]
    PerTensor,
    PerDirection,
    Barrier,
}

impl WaitingStrategy {
    /// Future guarding transfer `copy` of `tensor` in `direction`.
    ///
    /// `copy` distinguishes staging slices that are in flight at the same time.
    pub fn future(self, tensor: &str, direction: Direction, copy: Option<usize>) -> Future {
        let base = match self {
            Self::PerTensor => format!("{tensor}_future"),
            Self::PerDirection => format!("{}_future", direction.short()),
            Self::Barrier => return Future::new("barrier_future"),
        };
        match copy {
            Some(copy) => Future::new(format!("{base}_{copy}")),
            None => Future::new(base),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Future {
    name: String,
}

impl Future {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn fragment(&self, template: &TemplateId, ctx: &NetworkContext) -> CodeFragment {
        CodeFragment::new(template.clone()).set("name", Value::Ident(ctx.mangle(&self.name)))
    }
}

/// Lifecycle templates of an engine's futures. Each takes the variable `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureTemplates {
    pub init: TemplateId,
    pub alloc: TemplateId,
    pub wait: TemplateId,
    pub deinit: TemplateId,
}

impl FutureTemplates {
    pub fn init(&self, future: &Future, ctx: &NetworkContext) -> CodeFragment {
        future.fragment(&self.init, ctx)
    }

    pub fn alloc(&self, future: &Future, ctx: &NetworkContext) -> CodeFragment {
        future.fragment(&self.alloc, ctx)
    }

    pub fn wait(&self, future: &Future, ctx: &NetworkContext) -> CodeFragment {
        future.fragment(&self.wait, ctx)
    }

    pub fn deinit(&self, future: &Future, ctx: &NetworkContext) -> CodeFragment {
        future.fragment(&self.deinit, ctx)
    }
}
