//! Graph to target code.
//!
//! ```text
//! Deployer::new ── resolve ── bind ── generate ──▶ DeployedNetwork
//!                    │          │         │
//!                    │          │         └ freeze context, mangle, render
//!                    │          └ kernel fragments, tiling, pass pipelines
//!                    └ backtracking search over bindings
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use kiln_bind::{Platform, ResolveReport, Resolver, network_context};
use kiln_ir::{
    Buffer, BufferKind, CodeFragment, ExecutionBlock, FieldValue, FragmentSeq, Graph, NetworkContext, OperatorTiling,
    Value,
};
use snafu::{OptionExt, ensure};
use strum::Display;

use crate::config::DeployConfig;
use crate::error::*;
use crate::render::Renderer;
use crate::templates::{TemplateRegistry, declaration};

/// A binding platform together with the sources of every template it emits.
#[derive(Debug, Clone)]
pub struct DeploymentPlatform {
    pub platform: Platform,
    pub templates: TemplateRegistry,
}

impl DeploymentPlatform {
    pub fn new(platform: Platform, templates: TemplateRegistry) -> Self {
        Self { platform, templates }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    Created,
    Resolved,
    Bound,
    Generated,
}

#[derive(Debug, Clone)]
pub struct DeployedOperator {
    pub name: String,
    /// Template of the elected binding.
    pub binding: String,
    /// Mangled fragments, as rendered.
    pub fragments: FragmentSeq,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct DeployedNetwork {
    pub name: String,
    /// Declarations of statically allocated buffers.
    pub globals: Vec<String>,
    /// Operators in execution order.
    pub operators: Vec<DeployedOperator>,
    pub report: ResolveReport,
}

impl DeployedNetwork {
    pub fn operator(&self, name: &str) -> Option<&DeployedOperator> {
        self.operators.iter().find(|op| op.name == name)
    }

    /// Declarations followed by the operators' code.
    pub fn code(&self) -> String {
        let body = self.operators.iter().map(|op| format!("/* {} */\n{}", op.name, op.code)).join("\n\n");
        format!("{}\n\n{body}\n", self.globals.join("\n"))
    }
}

pub struct Deployer<'g> {
    graph: &'g Graph,
    platform: DeploymentPlatform,
    config: DeployConfig,
    tiling: BTreeMap<String, Arc<OperatorTiling>>,
    ctx: NetworkContext,
    resolver: Option<Resolver<'g>>,
    blocks: Vec<ExecutionBlock>,
    stage: Stage,
}

impl<'g> Deployer<'g> {
    pub fn new(graph: &'g Graph, platform: DeploymentPlatform, config: DeployConfig) -> Result<Self> {
        let mut ctx = network_context(graph)?;
        if let Some(unit) = &config.unit_name {
            ctx = ctx.with_mangle_prefix(unit.clone());
        }
        Ok(Self {
            graph,
            platform,
            config,
            tiling: BTreeMap::new(),
            ctx,
            resolver: None,
            blocks: Vec::new(),
            stage: Stage::Created,
        })
    }

    /// Tile the named operators; operators without an entry run untiled.
    pub fn with_tiling(mut self, tiling: impl IntoIterator<Item = (String, OperatorTiling)>) -> Self {
        self.tiling.extend(tiling.into_iter().map(|(operator, tiling)| (operator, Arc::new(tiling))));
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn context(&self) -> &NetworkContext {
        &self.ctx
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    pub fn resolver(&self) -> Option<&Resolver<'g>> {
        self.resolver.as_ref()
    }

    /// Elect one binding per operator.
    #[tracing::instrument(skip_all, fields(graph = %self.graph.name))]
    pub fn resolve(&mut self) -> Result<ResolveReport> {
        ensure!(self.stage == Stage::Created, OutOfOrderSnafu { action: "resolve", stage: self.stage });
        let mut resolver = Resolver::new(self.graph, &self.platform.platform, self.config.resolver.clone())?;
        let report = resolver.run(&mut self.ctx)?;
        self.resolver = Some(resolver);
        self.stage = Stage::Resolved;
        Ok(report)
    }

    /// Materialize the elected kernels and run their pass pipelines.
    #[tracing::instrument(skip_all, fields(graph = %self.graph.name))]
    pub fn bind(&mut self) -> Result<()> {
        let Some(resolver) = self.resolver.as_mut().filter(|_| self.stage == Stage::Resolved) else {
            return OutOfOrderSnafu { action: "bind", stage: self.stage }.fail();
        };
        if let Some(operator) = self.tiling.keys().find(|op| !self.graph.nodes.iter().any(|n| n.name == **op)) {
            return UnknownOperatorSnafu { operator }.fail();
        }

        let blocks = resolver.bind(&mut self.ctx)?;
        let mut transformed = Vec::with_capacity(blocks.len());
        for (idx, (node, mut block)) in self.graph.nodes.iter().zip(blocks).enumerate() {
            block.tiling = self.tiling.get(&node.name).cloned();
            let binding = resolver.binding(idx).context(kiln_bind::error::NotResolvedSnafu { node: &node.name })?;
            let block = binding.code_transform(&mut self.ctx, block, &node.name)?;
            tracing::debug!(
                operator = %node.name,
                binding = binding.name(),
                tiled = self.tiling.contains_key(&node.name),
                fragments = block.fragments.len(),
                "operator transformed"
            );
            transformed.push(block);
        }
        self.blocks = transformed;
        self.stage = Stage::Bound;
        Ok(())
    }

    /// Freeze the context and render every operator and global declaration.
    #[tracing::instrument(skip_all, fields(graph = %self.graph.name))]
    pub fn generate(&mut self) -> Result<DeployedNetwork> {
        let Some(resolver) = self.resolver.as_ref().filter(|_| self.stage == Stage::Bound) else {
            return OutOfOrderSnafu { action: "generate", stage: self.stage }.fail();
        };
        self.ctx.freeze();
        self.ctx.check_mangling()?;
        let renderer = Renderer::new(&self.platform.templates);

        let mut globals = Vec::new();
        for buffer in self.ctx.global_buffers().chain(self.ctx.local_buffers()) {
            if let Some(fragment) = declare(&self.ctx, buffer)? {
                globals.push(renderer.render_fragment(&fragment)?);
            }
        }

        let mut operators = Vec::with_capacity(self.blocks.len());
        for (idx, (node, block)) in self.graph.nodes.iter().zip(&mut self.blocks).enumerate() {
            block.mangle(&self.ctx);
            let code = renderer.render(&block.fragments)?;
            let binding = resolver.binding(idx).map(|b| b.name().to_string()).unwrap_or_default();
            tracing::trace!(operator = %node.name, lines = code.lines().count(), "rendered operator");
            operators.push(DeployedOperator {
                name: node.name.clone(),
                binding,
                fragments: block.fragments.clone(),
                code,
            });
        }

        let report = resolver.report();
        tracing::debug!(globals = globals.len(), operators = operators.len(), "network generated");
        self.stage = Stage::Generated;
        Ok(DeployedNetwork { name: self.graph.name.clone(), globals, operators, report })
    }

    /// Resolve, bind and generate in one go.
    pub fn resolve_and_generate(mut self) -> Result<DeployedNetwork> {
        self.resolve()?;
        self.bind()?;
        self.generate()
    }
}

/// Storage declaration of a buffer that outlives every operator.
///
/// Graph inputs and outputs are owned by the caller, intermediate tensors and
/// arenas are static, constants are initialized tables. References are
/// declared by the code that walks them, operator scratch by its allocation.
pub(crate) fn declare(ctx: &NetworkContext, buffer: &Buffer) -> Result<Option<CodeFragment>> {
    let global = ctx.is_global(&buffer.name);
    let name = Value::Ident(ctx.mangle(&buffer.name));
    let element = || -> Result<Value> {
        let dtype = buffer.dtype.as_ref().context(UntypedGlobalSnafu { name: &buffer.name })?;
        Ok(Value::text(dtype.base().c_style()))
    };

    let fragment = match &buffer.kind {
        BufferKind::Variable if global => CodeFragment::new(declaration::EXTERN)
            .set("type", element()?)
            .set("name", name)
            .set("size", buffer.num_elements()),
        BufferKind::Variable => CodeFragment::new(declaration::STATIC)
            .set("type", element()?)
            .set("name", name)
            .set("size", buffer.num_elements()),
        BufferKind::Constant { values } => CodeFragment::new(declaration::CONSTANT)
            .set("type", element()?)
            .set("name", name)
            .set("size", values.len())
            .set("values", Value::Ints(values.clone())),
        BufferKind::Transient { size } if global => CodeFragment::new(declaration::ARENA)
            .set("name", name)
            .set("size", *size)
            .set("level", Value::text(buffer.level.as_deref().unwrap_or("default"))),
        BufferKind::Struct { fields } => {
            let types = fields.iter().map(|f| format!("{} {};", f.dtype.c_style(), f.name)).join(" ");
            let values = fields
                .iter()
                .map(|f| match &f.value {
                    FieldValue::Int(v) => v.to_string(),
                    FieldValue::Buffer(referenced) => format!("(void*){}", ctx.mangle(referenced)),
                })
                .join(", ");
            CodeFragment::new(declaration::STRUCT)
                .set("name", name)
                .set("fields", Value::text(types))
                .set("values", Value::text(values))
        }
        BufferKind::Transient { .. } | BufferKind::Reference { .. } => return Ok(None),
    };
    Ok(Some(fragment))
}
