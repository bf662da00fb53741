//! Reference target: integer kernels on one compute cluster.
//!
//! Every operator type has several bindings differing only in datatypes, so a
//! narrow choice upstream may have to be revised when a consumer accepts only
//! a wider type. Bound kernels are tiled with the cluster DMA when the caller
//! supplies a tiling, and their scratch buffers are allocated in the cluster's
//! local memory.

pub mod kernels;
pub mod parsers;

use kiln_bind::{Engine, LayerSpec, NodeBinding, NodeMapper, NodeParser, Platform};
use kiln_ir::{CodeTransformationPass, ExecutionBlock, MemoryLevelFilter, NetworkContext, OperatorTiling, PassError};
use kiln_tiling::{
    AnyRankAdapter, AsyncTransferEngine, ClusterDma, DoubleBufferingPass, MemoryManagementPass, SingleBufferingPass,
    TilingConfig,
};

use crate::config::DeployConfig;
use crate::deploy::DeploymentPlatform;
use crate::templates::TemplateRegistry;

use self::kernels::Kernel;
use self::parsers::{ADD, MatMulParser, RELU, RequantShiftParser};

pub const ENGINE: &str = "cluster";

/// Tiles a block with one or two staging slices per tensor, as its memory constraint asks.
#[derive(Debug, Clone)]
pub struct TilingPass<E> {
    single: SingleBufferingPass<E>,
    double: DoubleBufferingPass<E>,
    local_level: String,
}

impl<E: AsyncTransferEngine + Clone> TilingPass<E> {
    pub fn new(engine: E, config: TilingConfig) -> Self {
        Self {
            local_level: config.local_level.clone(),
            single: SingleBufferingPass::new(engine.clone(), config.clone()),
            double: DoubleBufferingPass::new(engine, config),
        }
    }

    /// Staging slices requested for the tiled tensors.
    pub fn copies(&self, tiling: &OperatorTiling) -> usize {
        tiling
            .constraint
            .tensors
            .values()
            .filter_map(|tensor| tensor.at(&self.local_level))
            .map(|constraint| constraint.multi_buffer)
            .max()
            .unwrap_or(1)
    }
}

impl<E: AsyncTransferEngine + Clone> CodeTransformationPass for TilingPass<E> {
    fn name(&self) -> &str {
        "tiling"
    }

    fn apply(
        &self,
        ctx: &mut NetworkContext,
        block: ExecutionBlock,
        operator: &str,
    ) -> Result<ExecutionBlock, PassError> {
        let Some(tiling) = &block.tiling else {
            return Ok(block);
        };
        match self.copies(tiling) {
            1 => self.single.apply(ctx, block, operator),
            _ => self.double.apply(ctx, block, operator),
        }
    }
}

struct Bindings<'a> {
    templates: &'a mut TemplateRegistry,
    engine: AnyRankAdapter<ClusterDma>,
    tiling: TilingConfig,
}

impl Bindings<'_> {
    fn binding(&mut self, kernel: Kernel) -> NodeBinding {
        self.templates.register(kernel.id.clone(), kernel.source);
        NodeBinding::new(kernel.checker.clone(), kernel.template())
            .with_pass(TilingPass::new(self.engine.clone(), self.tiling.clone()))
            .with_pass(MemoryManagementPass::new(MemoryLevelFilter::new(self.tiling.local_level.clone())))
    }

    fn layer(&mut self, parser: impl NodeParser + 'static, kernels: Vec<Kernel>) -> LayerSpec {
        let bindings: Vec<_> = kernels.into_iter().map(|kernel| self.binding(kernel)).collect();
        LayerSpec::new([NodeMapper::new(parser, bindings)])
    }
}

/// Platform and template sources of the generic target.
pub fn platform(config: &DeployConfig) -> DeploymentPlatform {
    let tiling = TilingConfig::builder().tile_index(config.tile_index_var.clone()).build();
    let engine = AnyRankAdapter::new(ClusterDma);
    let scratch_level = tiling.local_level.clone();

    let mut templates = TemplateRegistry::with_builtins();
    templates.extend(engine.templates());
    templates.extend(MemoryManagementPass::<MemoryLevelFilter>::templates());

    let mut bindings = Bindings { templates: &mut templates, engine, tiling };
    let cluster = Engine::new(ENGINE)
        .map("Add", bindings.layer(ADD, kernels::add()))
        .map("Relu", bindings.layer(RELU, kernels::relu()))
        .map("MatMul", bindings.layer(MatMulParser, kernels::matmul(&scratch_level)))
        .map("RequantShift", bindings.layer(RequantShiftParser, kernels::requant_shift()));

    DeploymentPlatform::new(Platform::new("generic", [cluster]), templates)
}
