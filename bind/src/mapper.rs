use std::collections::BTreeSet;
use std::sync::Arc;

use kiln_ir::{ExecutionBlock, Graph, NetworkContext, Node, OperatorRepresentation};

use crate::binding::NodeBinding;
use crate::error::*;
use crate::parser::NodeParser;

/// The bindings admissible under one parser, plus the indices already rejected.
#[derive(Clone)]
pub struct NodeMapper {
    parser: Arc<dyn NodeParser>,
    bindings: Vec<Arc<NodeBinding>>,
    discarded: BTreeSet<usize>,
    selected: Option<usize>,
    repr: Option<OperatorRepresentation>,
}

impl std::fmt::Debug for NodeMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMapper")
            .field("parser", &self.parser.name())
            .field("bindings", &self.bindings.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("discarded", &self.discarded)
            .field("selected", &self.selected)
            .finish()
    }
}

impl NodeMapper {
    pub fn new(parser: impl NodeParser + 'static, bindings: impl IntoIterator<Item = NodeBinding>) -> Self {
        Self::from_parts(Arc::new(parser), bindings.into_iter().map(Arc::new).collect())
    }

    pub fn from_parts(parser: Arc<dyn NodeParser>, bindings: Vec<Arc<NodeBinding>>) -> Self {
        Self { parser, bindings, discarded: BTreeSet::new(), selected: None, repr: None }
    }

    pub fn name(&self) -> &str {
        self.parser.name()
    }

    pub fn bindings(&self) -> &[Arc<NodeBinding>] {
        &self.bindings
    }

    pub fn discarded(&self) -> &BTreeSet<usize> {
        &self.discarded
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn selected_binding(&self) -> Option<&NodeBinding> {
        self.selected.map(|idx| self.bindings[idx].as_ref())
    }

    pub fn representation(&self) -> Option<&OperatorRepresentation> {
        self.repr.as_ref()
    }

    /// Whether a binding other than the selected one is still untried.
    pub fn has_alternative(&self) -> bool {
        (0..self.bindings.len()).any(|idx| !self.discarded.contains(&idx) && Some(idx) != self.selected)
    }

    /// Static parse of the node.
    pub fn parse(&self, node: &Node, graph: &Graph) -> Option<OperatorRepresentation> {
        self.parser.parse_node(node, graph)
    }

    /// Hoist the node's tensors and elect the first binding that type-checks.
    ///
    /// Bindings that fail are discarded. On failure the context is unchanged.
    pub fn type_check(
        &mut self,
        ctx: &mut NetworkContext,
        graph: &Graph,
        node: &Node,
        mut repr: OperatorRepresentation,
        channels_first: bool,
    ) -> Result<bool> {
        self.selected = None;
        self.repr = None;

        ctx.speculate(|ctx| {
            if !self.parser.parse_node_ctxt(ctx, graph, node, &mut repr, channels_first)? {
                return Ok(false);
            }
            for (idx, binding) in self.bindings.iter().enumerate() {
                if self.discarded.contains(&idx) {
                    continue;
                }
                let mut candidate = repr.clone();
                if binding.type_check(ctx, node, &mut candidate)? {
                    tracing::trace!(
                        node = %node.name,
                        mapper = self.parser.name(),
                        binding = binding.name(),
                        "binding elected"
                    );
                    self.selected = Some(idx);
                    self.repr = Some(candidate);
                    return Ok(true);
                }
                self.discarded.insert(idx);
            }
            Ok(false)
        })
    }

    /// Reject the elected binding so the next attempt tries another one.
    pub fn discard_selected(&mut self) {
        if let Some(idx) = self.selected.take() {
            self.discarded.insert(idx);
        }
        self.repr = None;
    }

    /// Forget every rejection and the current election.
    pub fn reset(&mut self) {
        self.discarded.clear();
        self.selected = None;
        self.repr = None;
    }

    pub fn bind(&mut self, ctx: &mut NetworkContext, node: &Node) -> Result<ExecutionBlock> {
        let (Some(idx), Some(repr)) = (self.selected, self.repr.as_mut()) else {
            return NotResolvedSnafu { node: &node.name }.fail();
        };
        self.bindings[idx].bind(ctx, node, repr)
    }
}
