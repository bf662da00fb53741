//! Planning and emission shared by the tiling passes.
//!
//! A [`TilingPlan`] turns an operator's schedule and memory constraint into
//! per-tensor transfer descriptors, hoists everything the tile loop needs
//! (lookup tables, staging slices, external references) and offers the
//! building blocks both buffering schemes assemble into a loop.

use std::collections::BTreeMap;

use itertools::Itertools;
use kiln_dtype::{DType, ScalarDType};
use kiln_ir::error::UnexpectedBufferKindSnafu;
use kiln_ir::{
    BufferKind, CodeFragment, Dims, FragmentSeq, HyperRectangle, NetworkContext, NodeMemoryConstraint, OperatorTiling,
    Value, builtin,
};
use snafu::{OptionExt, ensure};

use crate::config::TilingConfig;
use crate::engine::{AsyncTransferEngine, Params, TransferCode, TransferRequest};
use crate::error::*;
use crate::future::{Direction, Future, FutureTemplates, WaitingStrategy};
use crate::legalize::{LegalizedTile, legalize};

/// Variable name under which structural fragments expose the tile counter.
pub const TILE_INDEX: &str = "idx";

const POINTER: &str = "void*";

// =========================================================================
// Per-tile parameters
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParamKind {
    Scalar(i64),
    /// Hoisted global constant indexed by the tile counter.
    Table(String),
}

/// A value that may change from tile to tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileParam {
    values: Vec<i64>,
    kind: ParamKind,
}

impl TileParam {
    /// One value per tile; a table is hoisted unless all values agree.
    pub fn hoist(ctx: &mut NetworkContext, name: &str, values: Vec<i64>) -> Result<Self> {
        match values.iter().all_equal_value() {
            Ok(&value) => Ok(Self { kind: ParamKind::Scalar(value), values }),
            Err(None) => Ok(Self { kind: ParamKind::Scalar(0), values }),
            Err(Some(_)) => Self::table(ctx, name, values),
        }
    }

    /// Offset deltas from tile `t - 1` to tile `t`; entry 0 is zero.
    ///
    /// A constant stride collapses into a scalar even though entry 0 differs.
    pub fn hoist_deltas(ctx: &mut NetworkContext, name: &str, offsets: &[usize]) -> Result<Self> {
        let deltas = std::iter::once(0)
            .chain(offsets.iter().tuple_windows().map(|(&prev, &next)| next as i64 - prev as i64))
            .collect_vec();
        match deltas.iter().skip(1).all_equal_value() {
            Ok(&value) => Ok(Self { kind: ParamKind::Scalar(value), values: deltas }),
            Err(None) => Ok(Self { kind: ParamKind::Scalar(0), values: deltas }),
            Err(Some(_)) => Self::table(ctx, name, deltas),
        }
    }

    fn table(ctx: &mut NetworkContext, name: &str, values: Vec<i64>) -> Result<Self> {
        let signed = values.iter().any(|&v| v < 0);
        let dtype = ScalarDType::smallest_int_for(&values, signed).unwrap_or(ScalarDType::Int64);
        let name = ctx.hoist_constant(name, values.clone(), DType::Scalar(dtype))?;
        tracing::trace!(table = %name, entries = values.len(), %dtype, "hoisted per-tile table");
        Ok(Self { kind: ParamKind::Table(name), values })
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, ParamKind::Scalar(_))
    }

    /// Name of the hoisted table, if any.
    pub fn table_name(&self) -> Option<&str> {
        match &self.kind {
            ParamKind::Table(name) => Some(name),
            ParamKind::Scalar(_) => None,
        }
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Value for tile `idx + shift` inside the tile loop.
    pub fn value(&self, shift: i64) -> Value {
        match &self.kind {
            ParamKind::Scalar(value) => Value::Int(*value),
            ParamKind::Table(table) => {
                Value::Lookup { table: table.clone(), index: Box::new(Value::deferred(TILE_INDEX)), shift }
            }
        }
    }

    /// Literal value for tile `tile`, for code outside the tile loop.
    pub fn at(&self, tile: usize) -> Value {
        Value::Int(self.values.get(tile).copied().unwrap_or_default())
    }
}

// =========================================================================
// Structural fragments
// =========================================================================

pub fn for_tiles(idx: &str, num_tiles: usize, body: FragmentSeq) -> CodeFragment {
    CodeFragment::new(builtin::FOR_TILES)
        .set(TILE_INDEX, Value::text(idx))
        .set("num_tiles", num_tiles)
        .set("body", body)
}

/// `body` runs while tile `idx + shift` exists.
pub fn if_tile_lt(idx: &str, shift: i64, bound: usize, body: FragmentSeq) -> CodeFragment {
    CodeFragment::new(builtin::IF_TILE_LT)
        .set(TILE_INDEX, Value::text(idx))
        .set("shift", shift)
        .set("bound", bound)
        .set("body", body)
}

pub fn if_tile_ge(idx: &str, bound: usize, body: FragmentSeq) -> CodeFragment {
    CodeFragment::new(builtin::IF_TILE_GE).set(TILE_INDEX, Value::text(idx)).set("bound", bound).set("body", body)
}

pub fn switch_parity(idx: &str, even: FragmentSeq, odd: FragmentSeq) -> CodeFragment {
    CodeFragment::new(builtin::SWITCH_PARITY).set(TILE_INDEX, Value::text(idx)).set("even", even).set("odd", odd)
}

pub fn ref_decl(name: &str, referenced: &str, offset: usize) -> CodeFragment {
    CodeFragment::new(builtin::REF_DECL)
        .set("type", Value::text(POINTER))
        .set("name", Value::buffer(name))
        .set("referenced", Value::buffer(referenced))
        .set("offset", offset)
}

pub fn ref_assign(name: &str, target: &str) -> CodeFragment {
    CodeFragment::new(builtin::REF_ASSIGN).set("name", Value::buffer(name)).set("target", Value::buffer(target))
}

pub fn ref_advance(name: &str, delta: Value) -> CodeFragment {
    CodeFragment::new(builtin::REF_ADVANCE)
        .set("type", Value::text(POINTER))
        .set("name", Value::buffer(name))
        .set("delta", delta)
}

// =========================================================================
// Transfers
// =========================================================================

/// Transfers issued together and waited on together.
///
/// Futures shared by several transfers are allocated and waited once.
#[derive(Debug, Default)]
pub struct Batch {
    futures: Vec<Future>,
    deinit: BTreeMap<Future, Vec<CodeFragment>>,
}

impl Batch {
    /// Append the transfer to `seq`, allocating its future on first use.
    pub fn issue(&mut self, seq: &mut FragmentSeq, future: &Future, code: TransferCode) {
        let TransferCode { alloc, transfer, deinit } = code;
        seq.extend_back(self.record(future, alloc, deinit));
        seq.extend_back(transfer);
    }

    /// Like [`Batch::issue`], but the allocation goes to `allocs` for the caller to place.
    pub fn issue_split(
        &mut self,
        allocs: &mut FragmentSeq,
        seq: &mut FragmentSeq,
        future: &Future,
        code: TransferCode,
    ) {
        let TransferCode { alloc, transfer, deinit } = code;
        allocs.extend_back(self.record(future, alloc, deinit));
        seq.extend_back(transfer);
    }

    /// Allocation fragments for `future` unless the batch already holds it.
    fn record(&mut self, future: &Future, alloc: Vec<CodeFragment>, deinit: Vec<CodeFragment>) -> Vec<CodeFragment> {
        self.deinit.entry(future.clone()).or_default().extend(deinit);
        if self.futures.contains(future) {
            return Vec::new();
        }
        self.futures.push(future.clone());
        alloc
    }

    /// One wait per distinct future, each followed by its transfers' cleanup.
    pub fn waits(&self, templates: &FutureTemplates, ctx: &NetworkContext) -> Vec<CodeFragment> {
        self.futures
            .iter()
            .flat_map(|future| {
                std::iter::once(templates.wait(future, ctx))
                    .chain(self.deinit.get(future).into_iter().flatten().cloned())
            })
            .collect()
    }

    /// Cleanup of every transfer, for futures the caller waits on itself.
    pub fn cleanup(&self) -> Vec<CodeFragment> {
        self.futures.iter().flat_map(|future| self.deinit.get(future).into_iter().flatten().cloned()).collect()
    }
}

// =========================================================================
// Plans
// =========================================================================

/// Everything the loop needs to move one tensor.
#[derive(Debug, Clone)]
pub struct TensorPlan {
    pub tensor: String,
    pub direction: Direction,
    pub tiles: Vec<LegalizedTile>,
    /// Reference walking the external tensor tile by tile.
    pub external_ref: String,
    /// Staging slices in the local arena.
    pub slices: Vec<String>,
    /// Shape of one staging slice.
    pub slice_shape: Dims,
    pub deltas: TileParam,
    pub shape: Vec<TileParam>,
    pub ext_strides: Dims,
    pub loc_strides: Vec<TileParam>,
}

impl TensorPlan {
    pub fn num_tiles(&self) -> usize {
        self.tiles.len()
    }

    pub fn future(&self, strategy: WaitingStrategy, copy: Option<usize>) -> Future {
        strategy.future(&self.tensor, self.direction, copy)
    }

    fn request(&self, local: &str, future: Future, shape: Params, local_strides: Params) -> TransferRequest {
        TransferRequest {
            external: Value::buffer(&self.external_ref),
            local: Value::buffer(local),
            shape,
            external_strides: self.ext_strides.iter().map(|&s| Value::from(s)).collect(),
            local_strides,
            direction: self.direction,
            future,
        }
    }

    /// Transfer of tile `idx + shift` between the external reference and `local`.
    pub fn request_shifted(&self, local: &str, future: Future, shift: i64) -> TransferRequest {
        let shape = self.shape.iter().map(|p| p.value(shift)).collect();
        let loc_strides = self.loc_strides.iter().map(|p| p.value(shift)).collect();
        self.request(local, future, shape, loc_strides)
    }

    /// Transfer of tile `tile` with literal parameters.
    pub fn request_at(&self, local: &str, future: Future, tile: usize) -> TransferRequest {
        let shape = self.shape.iter().map(|p| p.at(tile)).collect();
        let loc_strides = self.loc_strides.iter().map(|p| p.at(tile)).collect();
        self.request(local, future, shape, loc_strides)
    }

    /// Move the external reference to tile `idx + shift`.
    pub fn advance(&self, shift: i64) -> CodeFragment {
        ref_advance(&self.external_ref, self.deltas.value(shift))
    }

    /// Move the external reference to tile `tile` from its predecessor.
    pub fn advance_at(&self, tile: usize) -> CodeFragment {
        ref_advance(&self.external_ref, self.deltas.at(tile))
    }

    /// Declarations of the external reference and the staging slices.
    pub fn declarations(&self, ctx: &NetworkContext) -> Result<Vec<CodeFragment>> {
        let mut fragments = Vec::with_capacity(self.slices.len() + 1);
        for slice in &self.slices {
            let (arena, offset) = referenced(ctx, slice)?;
            fragments.push(ref_decl(slice, arena, offset));
        }
        let (tensor, offset) = referenced(ctx, &self.external_ref)?;
        fragments.push(ref_decl(&self.external_ref, tensor, offset));
        Ok(fragments)
    }
}

/// Target and offset of a hoisted reference.
pub fn referenced<'a>(ctx: &'a NetworkContext, name: &str) -> Result<(&'a str, usize)> {
    match &ctx.lookup(name)?.kind {
        BufferKind::Reference { referenced, offset } => Ok((referenced.as_str(), *offset)),
        other => Err(UnexpectedBufferKindSnafu { name, expected: "reference", actual: other.name() }.build().into()),
    }
}

/// A kernel parameter replaced per tile.
#[derive(Debug, Clone)]
pub struct Replacement {
    pub var: String,
    pub param: TileParam,
    /// Loop-carried variable holding the current value, for non-uniform parameters.
    pub ident: Option<String>,
}

/// Hoisted state of one tiled operator.
#[derive(Debug, Clone)]
pub struct TilingPlan {
    pub operator: String,
    pub num_tiles: usize,
    pub tensors: Vec<TensorPlan>,
    pub replacements: Vec<Replacement>,
}

impl TilingPlan {
    /// Legalize, check and hoist everything for `copies` staging slices per tensor.
    pub fn new<E: AsyncTransferEngine + ?Sized>(
        ctx: &mut NetworkContext,
        engine: &E,
        config: &TilingConfig,
        operator: &str,
        tiling: &OperatorTiling,
        copies: usize,
    ) -> Result<Self> {
        let num_tiles = tiling.schedule.num_tiles();
        ensure!(num_tiles > 0, EmptyScheduleSnafu { operator });

        let planner = Planner { engine, config, operator, constraint: &tiling.constraint, copies };
        let batches = [(Direction::In, tiling.schedule.inputs()), (Direction::Out, tiling.schedule.outputs())];
        let mut tensors = Vec::new();
        for (direction, batch) in batches {
            for (tensor, rects) in batch {
                ensure!(
                    rects.len() == num_tiles,
                    TileCountSnafu { operator, tensor: tensor.clone(), expected: num_tiles, actual: rects.len() }
                );
                tensors.push(planner.tensor(ctx, &tensor, direction, &rects)?);
            }
        }

        let mut replacements = Vec::with_capacity(tiling.replacements.len());
        for (var, values) in &tiling.replacements {
            ensure!(
                values.len() == num_tiles,
                TileCountSnafu { operator, tensor: var.clone(), expected: num_tiles, actual: values.len() }
            );
            let param = TileParam::hoist(ctx, &format!("{operator}_{var}_table"), values.clone())?;
            let ident = (!param.is_scalar()).then(|| ctx.mangle(&format!("{operator}_{var}")));
            replacements.push(Replacement { var: var.clone(), param, ident });
        }

        tracing::debug!(
            operator,
            num_tiles,
            tensors = tensors.len(),
            replacements = replacements.len(),
            "planned tiling"
        );
        Ok(Self { operator: operator.to_string(), num_tiles, tensors, replacements })
    }

    pub fn inputs(&self) -> impl Iterator<Item = &TensorPlan> {
        self.tensors.iter().filter(|t| t.direction == Direction::In)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &TensorPlan> {
        self.tensors.iter().filter(|t| t.direction == Direction::Out)
    }

    /// Declarations of loop-carried kernel parameters, initialized for tile 0.
    pub fn param_declarations(&self) -> Vec<CodeFragment> {
        self.replacements
            .iter()
            .filter_map(|r| {
                let ident = r.ident.as_ref()?;
                Some(
                    CodeFragment::new(builtin::PARAM_DECL)
                        .set("type", Value::text("int32_t"))
                        .set("name", Value::Ident(ident.clone()))
                        .set("value", r.param.at(0)),
                )
            })
            .collect()
    }

    /// Per-iteration updates of loop-carried kernel parameters.
    pub fn param_assignments(&self) -> Vec<CodeFragment> {
        self.replacements
            .iter()
            .filter_map(|r| {
                let ident = r.ident.as_ref()?;
                Some(
                    CodeFragment::new(builtin::PARAM_ASSIGN)
                        .set("name", Value::Ident(ident.clone()))
                        .set("value", r.param.value(0)),
                )
            })
            .collect()
    }

    /// Rewrite the kernel: tensors to their staging buffers, parameters to their per-tile values.
    pub fn compute(&self, mut kernel: FragmentSeq, staged: &BTreeMap<&str, &str>) -> FragmentSeq {
        kernel.map_buffers(|name| Value::buffer(*staged.get(name).unwrap_or(&name)));
        for fragment in kernel.iter_mut() {
            for replacement in &self.replacements {
                if !fragment.vars.contains_key(&replacement.var) {
                    continue;
                }
                let value = match &replacement.ident {
                    Some(ident) => Value::Ident(ident.clone()),
                    None => replacement.param.value(0),
                };
                fragment.vars.insert(replacement.var.clone(), value);
            }
        }
        kernel
    }
}

struct Planner<'a, E: ?Sized> {
    engine: &'a E,
    config: &'a TilingConfig,
    operator: &'a str,
    constraint: &'a NodeMemoryConstraint,
    copies: usize,
}

impl<E: AsyncTransferEngine + ?Sized> Planner<'_, E> {
    fn tensor(
        &self,
        ctx: &mut NetworkContext,
        tensor: &str,
        direction: Direction,
        rects: &[HyperRectangle],
    ) -> Result<TensorPlan> {
        let operator = self.operator;
        let buffer = ctx.lookup(tensor)?;
        let dtype = buffer.dtype.clone().context(UntypedBufferSnafu { name: tensor })?;
        let ext_shape = buffer.shape.clone();

        let local = self.constraint.get(tensor, &self.config.local_level)?;
        ensure!(
            local.multi_buffer == self.copies,
            MultiBufferSnafu { tensor, required: self.copies, actual: local.multi_buffer }
        );

        let tiles = legalize(tensor, rects, &ext_shape, dtype.element_bits(), self.config.keeps_geometry()?)?;
        for tile in &tiles {
            self.engine.check_transfer(&tile.shape, &tile.ext_strides, &tile.loc_strides)?;
            local.check_tile(tensor, tile.bytes())?;
        }
        let Some(first) = tiles.first() else {
            return EmptyScheduleSnafu { operator }.fail();
        };
        let ext_strides = first.ext_strides.clone();
        let first_offset = first.offset;

        let offsets = tiles.iter().map(|t| t.offset).collect_vec();
        let deltas = TileParam::hoist_deltas(ctx, &format!("{operator}_{tensor}_delta"), &offsets)?;
        let per_dim = |ctx: &mut NetworkContext, what: &str, pick: fn(&LegalizedTile) -> &Dims| {
            (0..ext_strides.len())
                .map(|k| {
                    let values = tiles.iter().map(|t| pick(t).get(k).copied().unwrap_or(1) as i64).collect();
                    TileParam::hoist(ctx, &format!("{operator}_{tensor}_{what}_{k}"), values)
                })
                .collect::<Result<Vec<_>>>()
        };
        let shape = per_dim(ctx, "size", |t| &t.shape)?;
        let loc_strides = per_dim(ctx, "loc_stride", |t| &t.loc_strides)?;

        let arena = ctx.hoist_arena(&self.config.local_level, local.address.end)?;

        let local_dtype = dtype.clone().ptr(kiln_dtype::AddrSpace::Local);
        let slices = (0..self.copies)
            .map(|k| {
                ctx.hoist_reference(
                    &format!("{operator}_{tensor}_slice{k}"),
                    &arena,
                    local.slice_offset(k),
                    &local.shape,
                    Some(local_dtype.clone()),
                )
            })
            .collect::<kiln_ir::Result<Vec<_>>>()?;
        let external_ref =
            ctx.hoist_reference(&format!("{operator}_{tensor}_ref"), tensor, first_offset, &ext_shape, None)?;

        tracing::trace!(
            operator,
            tensor,
            %direction,
            tiles = tiles.len(),
            uniform = deltas.is_scalar(),
            "planned tensor"
        );
        Ok(TensorPlan {
            tensor: tensor.to_string(),
            direction,
            tiles,
            external_ref,
            slices,
            slice_shape: local.shape.clone(),
            deltas,
            shape,
            ext_strides,
            loc_strides,
        })
    }
}
