//! Lifts a fixed-rank engine to transfers of any rank.
//!
//! Transfers of a supported rank pass through. Lower ranks are padded with
//! unit dimensions up to the nearest supported rank. Higher ranks keep the
//! engine's largest rank for the innermost dimensions and walk the remaining
//! outer dimensions in nested loops, offsetting both pointers per iteration.

use kiln_ir::{CodeFragment, FragmentSeq, NetworkContext, TemplateId, Value, builtin};
use smallvec::SmallVec;
use snafu::{OptionExt, ensure};

use crate::engine::{AsyncTransferEngine, Params, TransferCode, TransferRequest};
use crate::error::*;
use crate::future::{FutureTemplates, WaitingStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lowering {
    Direct,
    /// Prepend unit dimensions up to this rank.
    Pad(usize),
    /// Loop over this many outer dimensions.
    Loop(usize),
}

#[derive(Debug, Clone)]
pub struct AnyRankAdapter<E> {
    engine: E,
}

impl<E: AsyncTransferEngine> AnyRankAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn inner(&self) -> &E {
        &self.engine
    }

    fn lowering(&self, rank: usize) -> Result<Lowering> {
        let ranks = self.engine.supported_ranks();
        if ranks.contains(&rank) {
            return Ok(Lowering::Direct);
        }
        if let Some(&target) = ranks.iter().filter(|&&r| r > rank).min() {
            return Ok(Lowering::Pad(target));
        }
        let max = ranks.iter().copied().max().context(UnsupportedRankSnafu { engine: self.engine.name(), rank })?;
        Ok(Lowering::Loop(rank - max))
    }
}

fn pad<T: Clone>(values: &[T], rank: usize, fill: T) -> SmallVec<[T; 4]> {
    std::iter::repeat_n(fill, rank - values.len()).chain(values.iter().cloned()).collect()
}

fn base_name(ctx: &NetworkContext, value: &Value, fallback: &str) -> String {
    match value {
        Value::Buffer(name) => ctx.mangle(name),
        Value::Ident(name) => name.clone(),
        _ => fallback.to_string(),
    }
}

fn indexed(name: &str, referenced: Value, var: &str, stride: &Value) -> CodeFragment {
    CodeFragment::new(builtin::REF_INDEXED)
        .set("type", Value::text("void*"))
        .set("name", Value::Ident(name.to_string()))
        .set("referenced", referenced)
        .set("var", Value::text(var))
        .set("stride", stride.clone())
}

impl<E: AsyncTransferEngine> AsyncTransferEngine for AnyRankAdapter<E> {
    fn name(&self) -> &str {
        self.engine.name()
    }

    /// Ranks the wrapped engine handles natively; every other rank is lowered.
    fn supported_ranks(&self) -> &[usize] {
        self.engine.supported_ranks()
    }

    fn waiting_strategy(&self) -> WaitingStrategy {
        self.engine.waiting_strategy()
    }

    fn future_templates(&self) -> &FutureTemplates {
        self.engine.future_templates()
    }

    fn transfer_template(&self, rank: usize) -> Option<TemplateId> {
        self.engine.transfer_template(rank)
    }

    fn size_bits(&self) -> Option<u32> {
        self.engine.size_bits()
    }

    fn requires_contiguous(&self) -> bool {
        self.engine.requires_contiguous()
    }

    fn templates(&self) -> Vec<(TemplateId, &'static str)> {
        self.engine.templates()
    }

    fn check_transfer(&self, shape: &[usize], external_strides: &[usize], local_strides: &[usize]) -> Result<()> {
        match self.lowering(shape.len())? {
            Lowering::Direct => self.engine.check_transfer(shape, external_strides, local_strides),
            Lowering::Pad(rank) => self.engine.check_transfer(
                &pad(shape, rank, 1),
                &pad(external_strides, rank, 0),
                &pad(local_strides, rank, 0),
            ),
            Lowering::Loop(outer) => {
                let split = |values: &[usize]| values.get(outer..).unwrap_or_default().to_vec();
                self.engine.check_transfer(&split(shape), &split(external_strides), &split(local_strides))
            }
        }
    }

    fn transfer(&self, ctx: &NetworkContext, request: &TransferRequest) -> Result<TransferCode> {
        let rank = request.rank();
        ensure!(
            request.external_strides.len() == rank && request.local_strides.len() == rank,
            TransferRankMismatchSnafu {
                engine: self.name(),
                shape: rank,
                external: request.external_strides.len(),
                local: request.local_strides.len(),
            }
        );

        let outer = match self.lowering(request.rank())? {
            Lowering::Direct => return self.engine.transfer(ctx, request),
            Lowering::Pad(rank) => {
                let padded = TransferRequest {
                    shape: pad(&request.shape, rank, Value::Int(1)),
                    external_strides: pad(&request.external_strides, rank, Value::Int(0)),
                    local_strides: pad(&request.local_strides, rank, Value::Int(0)),
                    ..request.clone()
                };
                return self.engine.transfer(ctx, &padded);
            }
            Lowering::Loop(outer) => outer,
        };

        let ext_base = base_name(ctx, &request.external, "ext");
        let loc_base = base_name(ctx, &request.local, "loc");
        let inner = |values: &Params| -> Params { values.iter().skip(outer).cloned().collect() };
        let inner_request = TransferRequest {
            external: Value::Ident(format!("{ext_base}_d{}", outer - 1)),
            local: Value::Ident(format!("{loc_base}_d{}", outer - 1)),
            shape: inner(&request.shape),
            external_strides: inner(&request.external_strides),
            local_strides: inner(&request.local_strides),
            ..request.clone()
        };
        let mut code = self.engine.transfer(ctx, &inner_request)?;

        let mut body: FragmentSeq = code.transfer.drain(..).collect();
        for k in (0..outer).rev() {
            let var = format!("{loc_base}_i{k}");
            let (ext_parent, loc_parent) = match k {
                0 => (request.external.clone(), request.local.clone()),
                _ => (Value::Ident(format!("{ext_base}_d{}", k - 1)), Value::Ident(format!("{loc_base}_d{}", k - 1))),
            };
            body.extend_front([
                indexed(&format!("{ext_base}_d{k}"), ext_parent, &var, &request.external_strides[k]),
                indexed(&format!("{loc_base}_d{k}"), loc_parent, &var, &request.local_strides[k]),
            ]);
            let for_dim = CodeFragment::new(builtin::FOR_DIM)
                .set("var", Value::text(var))
                .set("bound", request.shape[k].clone())
                .set("body", body);
            body = [for_dim].into_iter().collect();
        }
        code.transfer = body.into_iter().collect();
        Ok(code)
    }
}
