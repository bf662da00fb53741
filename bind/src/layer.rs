use std::collections::BTreeSet;

use kiln_ir::{ExecutionBlock, Graph, NetworkContext, Node};
use strum::Display;

use crate::error::*;
use crate::mapper::NodeMapper;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LayerState {
    Untried,
    /// A mapper accepted the node statically; its bindings are being type-checked.
    Parsed,
    TypeChecked,
    Bound,
}

/// Candidate mappers for one graph operator.
#[derive(Debug, Clone)]
pub struct Layer {
    node: Node,
    mappers: Vec<NodeMapper>,
    discarded: BTreeSet<usize>,
    selected: Option<usize>,
    state: LayerState,
}

impl Layer {
    pub fn new(node: Node, mappers: Vec<NodeMapper>) -> Self {
        Self { node, mappers, discarded: BTreeSet::new(), selected: None, state: LayerState::Untried }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn state(&self) -> LayerState {
        self.state
    }

    pub fn mappers(&self) -> &[NodeMapper] {
        &self.mappers
    }

    pub fn discarded(&self) -> &BTreeSet<usize> {
        &self.discarded
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_mapper(&self) -> Option<&NodeMapper> {
        self.selected.map(|idx| &self.mappers[idx])
    }

    /// True if nothing was discarded at either level.
    pub fn discards_empty(&self) -> bool {
        self.discarded.is_empty() && self.mappers.iter().all(|m| m.discarded().is_empty())
    }

    /// `mapper/binding` for every candidate, for diagnostics.
    pub fn candidate_names(&self) -> Vec<String> {
        self.mappers
            .iter()
            .flat_map(|mapper| {
                mapper.bindings().iter().map(move |binding| format!("{}/{}", mapper.name(), binding.name()))
            })
            .collect()
    }

    /// Elect the first non-discarded mapper that parses and type-checks.
    ///
    /// Mappers that fail are discarded. On failure the context is unchanged.
    pub fn try_resolve(&mut self, ctx: &mut NetworkContext, graph: &Graph, channels_first: bool) -> Result<bool> {
        self.selected = None;
        for idx in 0..self.mappers.len() {
            if self.discarded.contains(&idx) {
                continue;
            }
            let mapper = &mut self.mappers[idx];
            let Some(repr) = mapper.parse(&self.node, graph) else {
                tracing::trace!(node = %self.node.name, mapper = mapper.name(), "parse rejected");
                self.discarded.insert(idx);
                continue;
            };

            self.state = LayerState::Parsed;
            if mapper.type_check(ctx, graph, &self.node, repr, channels_first)? {
                self.selected = Some(idx);
                self.state = LayerState::TypeChecked;
                return Ok(true);
            }
            tracing::trace!(node = %self.node.name, mapper = mapper.name(), "no binding type-checks");
            self.discarded.insert(idx);
        }
        self.state = LayerState::Untried;
        Ok(false)
    }

    /// Whether another choice exists without changing upstream layers.
    pub fn has_alternative(&self) -> bool {
        self.selected_mapper().is_some_and(NodeMapper::has_alternative)
            || (0..self.mappers.len()).any(|idx| !self.discarded.contains(&idx) && Some(idx) != self.selected)
    }

    /// Reject the current choice: its binding if the mapper has untried bindings left, else the mapper.
    pub fn discard_current(&mut self) {
        if let Some(idx) = self.selected.take() {
            let mapper = &mut self.mappers[idx];
            let exhausted = !mapper.has_alternative();
            mapper.discard_selected();
            if exhausted {
                self.discarded.insert(idx);
            }
        }
        self.state = LayerState::Untried;
    }

    /// Forget every rejection at both levels.
    pub fn reset(&mut self) {
        self.discarded.clear();
        self.mappers.iter_mut().for_each(NodeMapper::reset);
        self.selected = None;
        self.state = LayerState::Untried;
    }

    pub fn bind(&mut self, ctx: &mut NetworkContext) -> Result<ExecutionBlock> {
        let Some(idx) = self.selected else {
            return NotResolvedSnafu { node: &self.node.name }.fail();
        };
        let block = self.mappers[idx].bind(ctx, &self.node)?;
        self.state = LayerState::Bound;
        Ok(block)
    }
}
