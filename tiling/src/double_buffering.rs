//! Double-buffered tile loops.
//!
//! Every tensor gets two staging slices `B0` and `B1`. While the kernel works on
//! tile `idx` in one slice, the inbound transfer of tile `idx + 1` fills the
//! other one. Outbound tiles alternate the same way; each parity has its own
//! future so that the write-back of tile `idx` only has to wait for tile
//! `idx - 2`, the previous user of the same slice.
//!
//! ```text
//! setup:   init futures ; alloc(F_in) ; transfer(ext_ref -> B0) ; advance(ext_ref, d[1])
//! for idx in 0..N:
//!     cur, next = (B0, B1) if idx even else (B1, B0)
//!     wait(F_in)
//!     if idx + 1 < N:
//!         alloc(F_in) ; transfer(ext_ref -> next)
//!         if idx + 2 < N: advance(ext_ref, d[idx + 2])
//!     if idx >= 2: wait(F_out[idx % 2])
//!     kernel(cur)
//!     alloc(F_out[idx % 2]) ; transfer(B[idx % 2] -> out_ref)
//!     if idx + 1 < N: advance(out_ref, d[idx + 1])
//! teardown: wait(F_out[0]) ; wait(F_out[1]) if N > 1 ; deinit futures
//! ```
//!
//! When the waiting strategy maps both parities to one future (a barrier), a
//! single wait at the top of each iteration drains the lookahead and the
//! previous write-back together. The write-back then reuses the allocation of
//! the lookahead and allocates on its own only on the last tile.

use std::collections::BTreeMap;

use itertools::Itertools;
use kiln_ir::{CodeTransformationPass, ExecutionBlock, FragmentSeq, NetworkContext, PassError};

use crate::config::TilingConfig;
use crate::engine::AsyncTransferEngine;
use crate::error::*;
use crate::generator::{
    Batch, TensorPlan, TilingPlan, for_tiles, if_tile_ge, if_tile_lt, ref_assign, ref_decl, switch_parity,
};

/// Loop-carried references of one tensor.
#[derive(Debug)]
struct Staging<'p> {
    plan: &'p TensorPlan,
    /// Slice the kernel works on in the current iteration.
    cur: String,
    /// Slice the next inbound tile lands in; inbound tensors only.
    next: Option<String>,
}

impl<'p> Staging<'p> {
    fn hoist(ctx: &mut NetworkContext, operator: &str, plan: &'p TensorPlan, inbound: bool) -> Result<Self> {
        let tensor = &plan.tensor;
        let mut alias = |suffix: &str, slice: &str| {
            ctx.hoist_reference(&format!("{operator}_{tensor}_{suffix}"), slice, 0, &plan.slice_shape, None)
        };
        let cur = alias("cur", &plan.slices[0])?;
        let next = if inbound { Some(alias("next", &plan.slices[1])?) } else { None };
        Ok(Self { plan, cur, next })
    }

    /// References for the iteration with the given parity.
    fn select(&self, parity: usize) -> FragmentSeq {
        let slices = &self.plan.slices;
        let mut seq: FragmentSeq = [ref_assign(&self.cur, &slices[parity])].into_iter().collect();
        if let Some(next) = &self.next {
            seq.push_back(ref_assign(next, &slices[1 - parity]));
        }
        seq
    }
}

#[derive(Debug, Clone)]
pub struct DoubleBufferingPass<E> {
    engine: E,
    config: TilingConfig,
}

impl<E: AsyncTransferEngine> DoubleBufferingPass<E> {
    pub fn new(engine: E, config: TilingConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
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
        let plan = TilingPlan::new(ctx, &self.engine, &self.config, operator, &tiling, 2)?;
        let num_tiles = plan.num_tiles;
        let idx = self.config.tile_index.as_str();
        let strategy = self.engine.waiting_strategy();
        let templates = self.engine.future_templates();

        let inputs =
            plan.inputs().map(|tensor| Staging::hoist(ctx, operator, tensor, true)).collect::<Result<Vec<_>>>()?;
        let outputs =
            plan.outputs().map(|tensor| Staging::hoist(ctx, operator, tensor, false)).collect::<Result<Vec<_>>>()?;

        let futures = inputs
            .iter()
            .map(|s| s.plan.future(strategy, None))
            .chain(outputs.iter().flat_map(|s| [s.plan.future(strategy, Some(0)), s.plan.future(strategy, Some(1))]))
            .unique()
            .collect_vec();

        // Setup: futures, references, parameters, then the first inbound tile into B0.
        let mut setup: FragmentSeq = futures.iter().map(|future| templates.init(future, ctx)).collect();
        for staging in inputs.iter().chain(&outputs) {
            setup.extend_back(staging.plan.declarations(ctx)?);
            setup.push_back(ref_decl(&staging.cur, &staging.plan.slices[0], 0));
            if let Some(next) = &staging.next {
                setup.push_back(ref_decl(next, &staging.plan.slices[1], 0));
            }
        }
        setup.extend_back(plan.param_declarations());

        let mut prefetch = Batch::default();
        for staging in &inputs {
            let future = staging.plan.future(strategy, None);
            let request = staging.plan.request_at(&staging.plan.slices[0], future.clone(), 0);
            prefetch.issue(&mut setup, &future, self.engine.transfer(ctx, &request)?);
        }
        if num_tiles > 1 {
            setup.extend_back(inputs.iter().map(|staging| staging.plan.advance_at(1)));
        }

        // Engines with a single barrier future cannot keep one write-back per parity in flight.
        let shared = outputs.iter().any(|s| s.plan.future(strategy, Some(0)) == s.plan.future(strategy, Some(1)));

        let mut body = FragmentSeq::new();

        // Slice selection for this iteration.
        let parity = |p: usize| -> FragmentSeq { inputs.iter().chain(&outputs).flat_map(|s| s.select(p)).collect() };
        body.push_back(switch_parity(idx, parity(0), parity(1)));

        // Tile `idx` has landed; start moving tile `idx + 1` into the other slice.
        let mut inbound = Batch::default();
        let mut lookahead = FragmentSeq::new();
        for staging in &inputs {
            let future = staging.plan.future(strategy, None);
            let next = staging.next.as_deref().unwrap_or(&staging.cur);
            let request = staging.plan.request_shifted(next, future.clone(), 1);
            inbound.issue(&mut lookahead, &future, self.engine.transfer(ctx, &request)?);
        }

        // Write-back per parity; built first so the waits below mirror it.
        let mut even = Batch::default();
        let mut odd = Batch::default();
        let mut write_back = [FragmentSeq::new(), FragmentSeq::new()];
        let mut write_allocs = [FragmentSeq::new(), FragmentSeq::new()];
        for staging in &outputs {
            for (p, batch) in [&mut even, &mut odd].into_iter().enumerate() {
                let future = staging.plan.future(strategy, Some(p));
                let request = staging.plan.request_shifted(&staging.plan.slices[p], future.clone(), 0);
                let code = self.engine.transfer(ctx, &request)?;
                if shared {
                    batch.issue_split(&mut write_allocs[p], &mut write_back[p], &future, code);
                } else {
                    batch.issue(&mut write_back[p], &future, code);
                }
            }
        }

        if shared {
            // Everything issued by the previous iteration is drained at once.
            let mut drain: FragmentSeq = futures.iter().map(|future| templates.wait(future, ctx)).collect();
            drain.extend_back(inbound.cleanup());
            let (previous_even, previous_odd) = (odd.cleanup(), even.cleanup());
            if !previous_even.is_empty() || !previous_odd.is_empty() {
                let previous =
                    switch_parity(idx, previous_even.into_iter().collect(), previous_odd.into_iter().collect());
                drain.push_back(if_tile_ge(idx, 1, [previous].into_iter().collect()));
            }
            if inputs.is_empty() {
                body.push_back(if_tile_ge(idx, 1, drain));
            } else {
                body.extend_back(drain);
            }
        } else if !inputs.is_empty() {
            body.extend_back(inbound.waits(templates, ctx));
        }

        if !inputs.is_empty() {
            let advances: FragmentSeq = inputs.iter().map(|staging| staging.plan.advance(2)).collect();
            lookahead.push_back(if_tile_lt(idx, 2, num_tiles, advances));
            body.push_back(if_tile_lt(idx, 1, num_tiles, lookahead));
        }

        // Slice `idx % 2` is free once the write-back of tile `idx - 2` completed.
        if !shared && !outputs.is_empty() {
            let waits = switch_parity(
                idx,
                even.waits(templates, ctx).into_iter().collect(),
                odd.waits(templates, ctx).into_iter().collect(),
            );
            body.push_back(if_tile_ge(idx, 2, [waits].into_iter().collect()));
        }

        body.extend_back(plan.param_assignments());
        let staged: BTreeMap<&str, &str> = inputs
            .iter()
            .chain(&outputs)
            .map(|staging| (staging.plan.tensor.as_str(), staging.cur.as_str()))
            .collect();
        body.extend_back(plan.compute(std::mem::take(&mut block.fragments), &staged));

        if !outputs.is_empty() {
            if shared {
                let [allocs, _] = write_allocs;
                if inputs.is_empty() {
                    body.extend_back(allocs);
                } else {
                    // The lookahead transfer already holds the future on every tile but the last.
                    body.push_back(if_tile_ge(idx, num_tiles - 1, allocs));
                }
            }
            let [even_seq, odd_seq] = write_back;
            body.push_back(switch_parity(idx, even_seq, odd_seq));
            let advances: FragmentSeq = outputs.iter().map(|staging| staging.plan.advance(1)).collect();
            body.push_back(if_tile_lt(idx, 1, num_tiles, advances));
        }

        // Teardown: the last write-back of each parity is still in flight.
        let mut fragments = setup;
        fragments.push_back(for_tiles(idx, num_tiles, body));
        if shared {
            fragments.extend_back(futures.iter().map(|future| templates.wait(future, ctx)));
            let last = if (num_tiles - 1) % 2 == 0 { &even } else { &odd };
            fragments.extend_back(last.cleanup());
        } else {
            fragments.extend_back(even.waits(templates, ctx));
            if num_tiles > 1 {
                fragments.extend_back(odd.waits(templates, ctx));
            }
        }
        fragments.extend_back(futures.iter().map(|future| templates.deinit(future, ctx)));
        block.fragments = fragments;

        tracing::debug!(
            operator,
            tiles = num_tiles,
            inputs = inputs.len(),
            outputs = outputs.len(),
            futures = futures.len(),
            "emitted double-buffered tile loop"
        );
        Ok(block)
    }
}

impl<E: AsyncTransferEngine> CodeTransformationPass for DoubleBufferingPass<E> {
    fn name(&self) -> &str {
        "double_buffering"
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
