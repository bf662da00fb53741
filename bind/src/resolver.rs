//! Graph-level backtracking search over layer choices.
//!
//! Layers are visited in topological order. Each step either elects a choice
//! for the current layer and moves forward, or, when the layer has no viable
//! choice left, rewinds the context to the checkpoint taken before the previous
//! layer's choice, rejects that choice, and moves back. The failing layer's
//! discard sets are cleared on the way back, since its viable choices depend on
//! the upstream decision that is about to change.

use kiln_dtype::AddrSpace;
use kiln_ir::{Buffer, Checkpoint, ExecutionBlock, Graph, NetworkContext, Scope};
use snafu::{OptionExt, ensure};

use crate::binding::NodeBinding;
use crate::config::ResolverConfig;
use crate::error::*;
use crate::layer::Layer;
use crate::platform::Platform;

/// Outcome of one [`Resolver::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Layer `layer` type-checked; the search moved to the next layer.
    Advanced { layer: usize },
    /// Layer `from` ran out of choices; the search moved back to `from - 1`.
    Backtracked { from: usize },
    /// Every layer is type-checked.
    Resolved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub steps: usize,
    pub backtracks: usize,
    /// Deepest layer index attempted.
    pub deepest: usize,
}

pub struct Resolver<'g> {
    graph: &'g Graph,
    layers: Vec<Layer>,
    /// `checkpoints[i]` is the context state before layer `i`'s current choice.
    checkpoints: Vec<Checkpoint>,
    index: usize,
    report: ResolveReport,
    config: ResolverConfig,
}

impl<'g> Resolver<'g> {
    pub fn new(graph: &'g Graph, platform: &Platform, config: ResolverConfig) -> Result<Self> {
        graph.validate()?;
        let layers = graph.nodes.iter().map(|node| platform.layer_for(node)).collect::<Result<Vec<_>>>()?;
        Ok(Self::from_layers(graph, layers, config))
    }

    pub fn from_layers(graph: &'g Graph, layers: Vec<Layer>, config: ResolverConfig) -> Self {
        Self { graph, layers, checkpoints: Vec::new(), index: 0, report: ResolveReport::default(), config }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Index of the layer the next step works on.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn report(&self) -> ResolveReport {
        self.report
    }

    pub fn is_resolved(&self) -> bool {
        self.index == self.layers.len()
    }

    /// The elected binding of layer `idx`, once it is type-checked.
    pub fn binding(&self, idx: usize) -> Option<&NodeBinding> {
        self.layers.get(idx)?.selected_mapper()?.selected_binding()
    }

    pub fn step(&mut self, ctx: &mut NetworkContext) -> Result<Step> {
        if self.is_resolved() {
            return Ok(Step::Resolved);
        }
        if let Some(limit) = self.config.max_steps {
            ensure!(self.report.steps < limit, StepLimitSnafu { steps: self.report.steps, limit });
        }
        self.report.steps += 1;

        let idx = self.index;
        self.report.deepest = self.report.deepest.max(idx);
        self.checkpoints.truncate(idx);
        self.checkpoints.push(ctx.checkpoint()?);

        if self.layers[idx].try_resolve(ctx, self.graph, self.config.channels_first)? {
            tracing::debug!(
                layer = idx,
                node = %self.layers[idx].node().name,
                mapper = self.layers[idx].selected_mapper().map(|m| m.name()),
                binding = self.binding(idx).map(NodeBinding::name),
                "layer type-checked"
            );
            self.index += 1;
            return Ok(Step::Advanced { layer: idx });
        }

        if idx == 0 {
            let deepest = self.report.deepest;
            let layer = &self.layers[deepest];
            return UnresolvableSnafu {
                deepest,
                node: layer.node().name.clone(),
                candidates: layer.candidate_names(),
            }
            .fail();
        }

        let checkpoint = self.checkpoints[idx - 1];
        ctx.rollback(checkpoint)?;
        self.checkpoints.truncate(idx - 1);
        self.layers[idx].reset();
        let alternative = self.layers[idx - 1].has_alternative();
        self.layers[idx - 1].discard_current();
        self.index -= 1;
        self.report.backtracks += 1;
        tracing::debug!(from = idx, node = %self.layers[idx].node().name, alternative, "backtracking");
        Ok(Step::Backtracked { from: idx })
    }

    /// Step until every layer is type-checked.
    #[tracing::instrument(skip_all, fields(graph = %self.graph.name))]
    pub fn run(&mut self, ctx: &mut NetworkContext) -> Result<ResolveReport> {
        while self.step(ctx)? != Step::Resolved {}
        tracing::debug!(steps = self.report.steps, backtracks = self.report.backtracks, "graph resolved");
        Ok(self.report)
    }

    /// Materialize every layer's elected binding, in layer order.
    pub fn bind(&mut self, ctx: &mut NetworkContext) -> Result<Vec<ExecutionBlock>> {
        if let Some(pending) = self.layers.get(self.index) {
            return NotResolvedSnafu { node: &pending.node().name }.fail();
        }
        self.layers.iter_mut().map(|layer| layer.bind(ctx)).collect()
    }
}

/// Context holding the graph's inputs and outputs as global buffers.
pub fn network_context(graph: &Graph) -> Result<NetworkContext> {
    let mut ctx = NetworkContext::new(graph.name.clone());
    for input in &graph.inputs {
        let dtype = input.dtype.clone().ptr(AddrSpace::Global);
        let mut buffer = Buffer::variable(input.name.clone(), input.shape.iter().copied()).with_dtype(dtype);
        buffer.quant = input.quant;
        ctx.add(buffer, Scope::Global)?;
    }
    for output in &graph.outputs {
        if ctx.contains(output) {
            continue;
        }
        let shape = graph.shape_of(output).context(MissingShapeSnafu { node: &graph.name, tensor: output })?;
        ctx.add(Buffer::variable(output.clone(), shape.iter().copied()), Scope::Global)?;
    }
    Ok(ctx)
}
