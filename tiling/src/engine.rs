//! Asynchronous transfer engines.

use std::fmt::Debug;

use kiln_ir::{CodeFragment, NetworkContext, TemplateId, Value};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::error::*;
use crate::future::{Direction, Future, FutureTemplates, WaitingStrategy};

pub type Params = SmallVec<[Value; 4]>;

/// One transfer, outermost dimension first.
///
/// Extents and strides are in bytes; the innermost extent is the contiguous run
/// length. Values may be per-tile lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub external: Value,
    pub local: Value,
    pub shape: Params,
    pub external_strides: Params,
    pub local_strides: Params,
    pub direction: Direction,
    pub future: Future,
}

impl TransferRequest {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// Code for one transfer: future allocation, the transfer itself, and cleanup
/// to run after the future has been waited on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferCode {
    pub alloc: Vec<CodeFragment>,
    pub transfer: Vec<CodeFragment>,
    pub deinit: Vec<CodeFragment>,
}

pub trait AsyncTransferEngine: Debug + Send + Sync {
    fn name(&self) -> &str;

    fn supported_ranks(&self) -> &[usize];

    fn waiting_strategy(&self) -> WaitingStrategy;

    fn future_templates(&self) -> &FutureTemplates;

    /// Transfer template for rank `rank`.
    ///
    /// Variables: `ext`, `loc`, `future`, `direction`, `size_{k}` for every
    /// dimension and `ext_stride_{k}`/`loc_stride_{k}` for every outer dimension.
    fn transfer_template(&self, rank: usize) -> Option<TemplateId>;

    /// Width of the engine's transfer-size register, if limited.
    fn size_bits(&self) -> Option<u32> {
        None
    }

    /// Whether the innermost dimension must be contiguous on both sides.
    fn requires_contiguous(&self) -> bool {
        true
    }

    /// Template sources, for registration with a renderer.
    fn templates(&self) -> Vec<(TemplateId, &'static str)>;

    /// Hardware preconditions of one concrete transfer.
    fn check_transfer(&self, shape: &[usize], external_strides: &[usize], local_strides: &[usize]) -> Result<()> {
        check_transfer(self, shape, external_strides, local_strides)
    }

    fn transfer(&self, ctx: &NetworkContext, request: &TransferRequest) -> Result<TransferCode> {
        let rank = request.rank();
        let template = self.transfer_template(rank).context(UnsupportedRankSnafu { engine: self.name(), rank })?;
        Ok(TransferCode {
            alloc: vec![self.future_templates().alloc(&request.future, ctx)],
            transfer: vec![transfer_fragment(template, ctx, request)],
            deinit: Vec::new(),
        })
    }
}

/// Rank agreement, supported rank, contiguity and size budget.
pub fn check_transfer<E: AsyncTransferEngine + ?Sized>(
    engine: &E,
    shape: &[usize],
    external_strides: &[usize],
    local_strides: &[usize],
) -> Result<()> {
    let rank = shape.len();
    ensure!(
        external_strides.len() == rank && local_strides.len() == rank,
        TransferRankMismatchSnafu {
            engine: engine.name(),
            shape: rank,
            external: external_strides.len(),
            local: local_strides.len(),
        }
    );
    ensure!(engine.supported_ranks().contains(&rank), UnsupportedRankSnafu { engine: engine.name(), rank });

    if engine.requires_contiguous()
        && let (Some(&external), Some(&local)) = (external_strides.last(), local_strides.last())
    {
        ensure!(external == 1 && local == 1, NonContiguousSnafu { engine: engine.name(), external, local });
    }

    if let Some(bits) = engine.size_bits() {
        let bytes: usize = shape.iter().product();
        ensure!(bytes < 1usize << bits, TransferTooLargeSnafu { engine: engine.name(), bytes, bits });
    }
    Ok(())
}

/// Fill a rank-specific transfer template.
pub fn transfer_fragment(template: TemplateId, ctx: &NetworkContext, request: &TransferRequest) -> CodeFragment {
    let mut fragment = CodeFragment::new(template)
        .set("ext", request.external.clone())
        .set("loc", request.local.clone())
        .set("future", Value::Ident(ctx.mangle(request.future.name())))
        .set("direction", Value::text(request.direction.as_ref()));
    let outer = request.rank().saturating_sub(1);
    for (k, size) in request.shape.iter().enumerate() {
        fragment = fragment.set(format!("size_{k}"), size.clone());
        if k < outer
            && let (Some(external), Some(local)) = (request.external_strides.get(k), request.local_strides.get(k))
        {
            fragment = fragment
                .set(format!("ext_stride_{k}"), external.clone())
                .set(format!("loc_stride_{k}"), local.clone());
        }
    }
    fragment
}
