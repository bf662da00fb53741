//! Single-buffered tile loops.
//!
//! Every tensor gets one staging slice. Each iteration moves the inbound tiles
//! in, waits for them, runs the kernel, then moves the outbound tiles out and
//! waits again before the slice is reused:
//!
//! ```text
//! for idx in 0..N:
//!     alloc(F_in) ; transfer(ext_ref -> slice) ; wait(F_in)
//!     if idx + 1 < N: advance(ext_ref)
//!     kernel(slice)
//!     alloc(F_out) ; transfer(slice -> ext_ref) ; wait(F_out)
//!     if idx + 1 < N: advance(ext_ref)
//! ```

use std::collections::BTreeMap;

use itertools::Itertools;
use kiln_ir::{CodeFragment, CodeTransformationPass, ExecutionBlock, FragmentSeq, NetworkContext, PassError};

use crate::config::TilingConfig;
use crate::engine::AsyncTransferEngine;
use crate::error::*;
use crate::generator::{Batch, TensorPlan, TilingPlan, for_tiles, if_tile_lt};

#[derive(Debug, Clone)]
pub struct SingleBufferingPass<E> {
    engine: E,
    config: TilingConfig,
}

impl<E: AsyncTransferEngine> SingleBufferingPass<E> {
    pub fn new(engine: E, config: TilingConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    /// Transfers of one direction followed by their waits.
    fn transfers<'p>(
        &self,
        ctx: &NetworkContext,
        body: &mut FragmentSeq,
        tensors: impl Iterator<Item = &'p TensorPlan>,
    ) -> Result<()> {
        let strategy = self.engine.waiting_strategy();
        let mut batch = Batch::default();
        for tensor in tensors {
            let future = tensor.future(strategy, None);
            let request = tensor.request_shifted(&tensor.slices[0], future.clone(), 0);
            batch.issue(body, &future, self.engine.transfer(ctx, &request)?);
        }
        body.extend_back(batch.waits(self.engine.future_templates(), ctx));
        Ok(())
    }

    fn advances<'p>(&self, plan: &TilingPlan, tensors: impl Iterator<Item = &'p TensorPlan>) -> Option<CodeFragment> {
        let advances: FragmentSeq = tensors.map(|tensor| tensor.advance(1)).collect();
        (!advances.is_empty()).then(|| if_tile_lt(&self.config.tile_index, 1, plan.num_tiles, advances))
    }

    pub fn generate(
        &self,
        ctx: &mut NetworkContext,
        mut block: ExecutionBlock,
        operator: &str,
    ) -> Result<ExecutionBlock> {
        let Some(tiling) = block.tiling.clone() else {
            return Ok(block);
        };
        let plan = TilingPlan::new(ctx, &self.engine, &self.config, operator, &tiling, 1)?;
        let strategy = self.engine.waiting_strategy();
        let templates = self.engine.future_templates();
        let futures = plan.tensors.iter().map(|tensor| tensor.future(strategy, None)).unique().collect_vec();

        let mut setup: FragmentSeq = futures.iter().map(|future| templates.init(future, ctx)).collect();
        for tensor in &plan.tensors {
            setup.extend_back(tensor.declarations(ctx)?);
        }
        setup.extend_back(plan.param_declarations());

        let mut body = FragmentSeq::new();
        body.extend_back(plan.param_assignments());
        self.transfers(ctx, &mut body, plan.inputs())?;
        body.extend_back(self.advances(&plan, plan.inputs()));

        let staged: BTreeMap<&str, &str> =
            plan.tensors.iter().map(|tensor| (tensor.tensor.as_str(), tensor.slices[0].as_str())).collect();
        body.extend_back(plan.compute(std::mem::take(&mut block.fragments), &staged));

        self.transfers(ctx, &mut body, plan.outputs())?;
        body.extend_back(self.advances(&plan, plan.outputs()));

        let mut fragments = setup;
        fragments.push_back(for_tiles(&self.config.tile_index, plan.num_tiles, body));
        fragments.extend_back(futures.iter().map(|future| templates.deinit(future, ctx)));
        block.fragments = fragments;

        tracing::debug!(operator, tiles = plan.num_tiles, futures = futures.len(), "emitted single-buffered tile loop");
        Ok(block)
    }
}

impl<E: AsyncTransferEngine> CodeTransformationPass for SingleBufferingPass<E> {
    fn name(&self) -> &str {
        "single_buffering"
    }

    #[tracing::instrument(skip_all, fields(operator = %operator, engine = self.engine.name()))]
    fn apply(
        &self,
        ctx: &mut NetworkContext,
        block: ExecutionBlock,
        operator: &str,
    ) -> Result<ExecutionBlock, PassError> {
        Ok(self.generate(ctx, block, operator)?)
    }
}
