//! Concrete transfer engines.
//!
//! Template sources use `${var}` placeholders. Transfer templates receive the
//! variables documented on [`AsyncTransferEngine::transfer_template`]; future
//! templates receive `name`.

use kiln_ir::{CodeFragment, NetworkContext, TemplateId, Value};
use snafu::OptionExt;

use crate::engine::{AsyncTransferEngine, TransferCode, TransferRequest, transfer_fragment};
use crate::error::*;
use crate::future::{FutureTemplates, WaitingStrategy};

// =========================================================================
// Cluster DMA
// =========================================================================

static CLUSTER_FUTURES: FutureTemplates = FutureTemplates {
    init: TemplateId::new("cluster_future_init"),
    alloc: TemplateId::new("cluster_future_alloc"),
    wait: TemplateId::new("cluster_future_wait"),
    deinit: TemplateId::new("cluster_future_deinit"),
};

pub const CLUSTER_DMA_1D: TemplateId = TemplateId::new("cluster_dma_1d");
pub const CLUSTER_DMA_2D: TemplateId = TemplateId::new("cluster_dma_2d");

/// Cluster-local DMA: 1-D and 2-D transfers, one transfer id per direction.
///
/// The transfer size register is 17 bits wide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClusterDma;

impl AsyncTransferEngine for ClusterDma {
    fn name(&self) -> &str {
        "cluster_dma"
    }

    fn supported_ranks(&self) -> &[usize] {
        &[1, 2]
    }

    fn waiting_strategy(&self) -> WaitingStrategy {
        WaitingStrategy::PerDirection
    }

    fn future_templates(&self) -> &FutureTemplates {
        &CLUSTER_FUTURES
    }

    fn transfer_template(&self, rank: usize) -> Option<TemplateId> {
        match rank {
            1 => Some(CLUSTER_DMA_1D),
            2 => Some(CLUSTER_DMA_2D),
            _ => None,
        }
    }

    fn size_bits(&self) -> Option<u32> {
        Some(17)
    }

    fn templates(&self) -> Vec<(TemplateId, &'static str)> {
        vec![
            (CLUSTER_FUTURES.init.clone(), "uint32_t ${name} = 0;"),
            (CLUSTER_FUTURES.alloc.clone(), "${name} = cl_dma_counter_get();"),
            (CLUSTER_FUTURES.wait.clone(), "cl_dma_wait(${name});"),
            (CLUSTER_FUTURES.deinit.clone(), "cl_dma_counter_free(${name});"),
            (
                CLUSTER_DMA_1D,
                "cl_dma_transfer_1d(${future}, (uint32_t)${ext}, (uint32_t)${loc}, ${size_0}, CL_DMA_${direction});",
            ),
            (
                CLUSTER_DMA_2D,
                "cl_dma_transfer_2d(${future}, (uint32_t)${ext}, (uint32_t)${loc}, ${size_1}, ${size_0}, \
                 ${ext_stride_0}, ${loc_stride_0}, CL_DMA_${direction});",
            ),
        ]
    }
}

// =========================================================================
// Host DMA
// =========================================================================

static HOST_FUTURES: FutureTemplates = FutureTemplates {
    init: TemplateId::new("host_future_init"),
    alloc: TemplateId::new("host_future_alloc"),
    wait: TemplateId::new("host_future_wait"),
    deinit: TemplateId::new("host_future_deinit"),
};

pub const HOST_DMA_2D: TemplateId = TemplateId::new("host_dma_2d");
/// Releases the command descriptor of a completed transfer.
pub const HOST_DMA_RELEASE: TemplateId = TemplateId::new("host_dma_release");

/// Host-side DMA driving 2-D transfers through command descriptors.
///
/// Every tensor waits on its own command; the descriptor is released once the
/// wait has returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostDma;

impl AsyncTransferEngine for HostDma {
    fn name(&self) -> &str {
        "host_dma"
    }

    fn supported_ranks(&self) -> &[usize] {
        &[2]
    }

    fn waiting_strategy(&self) -> WaitingStrategy {
        WaitingStrategy::PerTensor
    }

    fn future_templates(&self) -> &FutureTemplates {
        &HOST_FUTURES
    }

    fn transfer_template(&self, rank: usize) -> Option<TemplateId> {
        (rank == 2).then_some(HOST_DMA_2D)
    }

    fn templates(&self) -> Vec<(TemplateId, &'static str)> {
        vec![
            (HOST_FUTURES.init.clone(), "host_dma_cmd_t ${name};"),
            (HOST_FUTURES.alloc.clone(), "host_dma_cmd_init(&${name});"),
            (HOST_FUTURES.wait.clone(), "host_dma_wait(&${name});"),
            (HOST_FUTURES.deinit.clone(), "/* ${name} */"),
            (
                HOST_DMA_2D,
                "host_dma_start_2d(&${future}, (void*)${ext}, (void*)${loc}, ${size_0} * ${size_1}, \
                 ${ext_stride_0}, ${size_1}, HOST_DMA_${direction});",
            ),
            (HOST_DMA_RELEASE, "host_dma_cmd_release(&${future});"),
        ]
    }

    fn transfer(&self, ctx: &NetworkContext, request: &TransferRequest) -> Result<TransferCode> {
        let rank = request.rank();
        let template = self.transfer_template(rank).context(UnsupportedRankSnafu { engine: self.name(), rank })?;
        let future = Value::Ident(ctx.mangle(request.future.name()));
        Ok(TransferCode {
            alloc: vec![HOST_FUTURES.alloc(&request.future, ctx)],
            transfer: vec![transfer_fragment(template, ctx, request)],
            deinit: vec![CodeFragment::new(HOST_DMA_RELEASE).set("future", future)],
        })
    }
}

// =========================================================================
// Barrier DMA
// =========================================================================

static BARRIER_FUTURES: FutureTemplates = FutureTemplates {
    init: TemplateId::new("barrier_future_init"),
    alloc: TemplateId::new("barrier_future_alloc"),
    wait: TemplateId::new("barrier_future_wait"),
    deinit: TemplateId::new("barrier_future_deinit"),
};

pub const BARRIER_DMA_1D: TemplateId = TemplateId::new("barrier_dma_1d");
pub const BARRIER_DMA_2D: TemplateId = TemplateId::new("barrier_dma_2d");
pub const BARRIER_DMA_3D: TemplateId = TemplateId::new("barrier_dma_3d");

/// DMA without per-transfer completion tracking: every wait is a full barrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierDma;

impl AsyncTransferEngine for BarrierDma {
    fn name(&self) -> &str {
        "barrier_dma"
    }

    fn supported_ranks(&self) -> &[usize] {
        &[1, 2, 3]
    }

    fn waiting_strategy(&self) -> WaitingStrategy {
        WaitingStrategy::Barrier
    }

    fn future_templates(&self) -> &FutureTemplates {
        &BARRIER_FUTURES
    }

    fn transfer_template(&self, rank: usize) -> Option<TemplateId> {
        match rank {
            1 => Some(BARRIER_DMA_1D),
            2 => Some(BARRIER_DMA_2D),
            3 => Some(BARRIER_DMA_3D),
            _ => None,
        }
    }

    fn templates(&self) -> Vec<(TemplateId, &'static str)> {
        vec![
            (BARRIER_FUTURES.init.clone(), "/* ${name}: barrier */"),
            (BARRIER_FUTURES.alloc.clone(), "/* ${name}: issue */"),
            (BARRIER_FUTURES.wait.clone(), "dma_barrier();"),
            (BARRIER_FUTURES.deinit.clone(), "/* ${name}: done */"),
            (BARRIER_DMA_1D, "dma_memcpy_async((void*)${loc}, (void*)${ext}, ${size_0}, DMA_${direction});"),
            (
                BARRIER_DMA_2D,
                "dma_memcpy_2d_async((void*)${loc}, (void*)${ext}, ${size_0}, ${size_1}, ${loc_stride_0}, \
                 ${ext_stride_0}, DMA_${direction});",
            ),
            (
                BARRIER_DMA_3D,
                "dma_memcpy_3d_async((void*)${loc}, (void*)${ext}, ${size_0}, ${size_1}, ${size_2}, \
                 ${loc_stride_0}, ${ext_stride_0}, ${loc_stride_1}, ${ext_stride_1}, DMA_${direction});",
            ),
        ]
    }
}
