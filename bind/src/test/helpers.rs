use kiln_dtype::{DType, ScalarDType};
use kiln_ir::{Graph, Node, OperatorRepresentation, TemplateId, TensorInfo};

use crate::{Layer, NodeBinding, NodeMapper, NodeParser, NodeTemplate, NodeTypeChecker};

/// Parser accepting any node of the right arity.
#[derive(Debug, Clone, Copy)]
pub struct ArityParser {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub outputs: &'static [&'static str],
}

impl NodeParser for ArityParser {
    fn name(&self) -> &str {
        self.name
    }

    fn inputs(&self) -> &[&'static str] {
        self.inputs
    }

    fn outputs(&self) -> &[&'static str] {
        self.outputs
    }
}

pub const UNARY: ArityParser = ArityParser { name: "unary", inputs: &["data_in"], outputs: &["data_out"] };
pub const BINARY: ArityParser =
    ArityParser { name: "binary", inputs: &["data_in_0", "data_in_1"], outputs: &["data_out"] };

/// Parser rejecting every node.
#[derive(Debug, Clone, Copy)]
pub struct RejectParser;

impl NodeParser for RejectParser {
    fn name(&self) -> &str {
        "reject"
    }

    fn inputs(&self) -> &[&'static str] {
        &[]
    }

    fn outputs(&self) -> &[&'static str] {
        &[]
    }

    fn parse_node(&self, _: &Node, _: &Graph) -> Option<OperatorRepresentation> {
        None
    }
}

pub fn kernel_name(input: ScalarDType, output: ScalarDType) -> String {
    format!("k_{}_{}", input.to_string().to_lowercase(), output.to_string().to_lowercase())
}

pub fn unary_binding(input: ScalarDType, output: ScalarDType) -> NodeBinding {
    let template = NodeTemplate::new(TemplateId::owned(kernel_name(input, output)));
    NodeBinding::new(NodeTypeChecker::new([input], [output]), template)
}

/// `x -> op0 -> t0 -> op1 -> t1 ...`, with `x: Int8[8]` and the last tensor as graph output.
pub fn chain(len: usize) -> Graph {
    let mut graph = Graph::new("chain").input(TensorInfo::new("x", [8], DType::Int8));
    let mut prev = "x".to_string();
    for i in 0..len {
        let out = format!("t{i}");
        let node = Node::new(format!("op{i}"), "Op").inputs([prev.clone()]).outputs([out.clone()]);
        graph = graph.node(node).tensor(&out, [8]);
        prev = out;
    }
    graph.output(prev)
}

/// One single-mapper layer per node, with the given bindings.
pub fn unary_layers(graph: &Graph, bindings: Vec<Vec<NodeBinding>>) -> Vec<Layer> {
    graph
        .nodes
        .iter()
        .zip(bindings)
        .map(|(node, b)| Layer::new(node.clone(), vec![NodeMapper::new(UNARY, b)]))
        .collect()
}

/// Layers with several mappers each: `bindings[layer][mapper]`.
pub fn mapper_layers(graph: &Graph, bindings: Vec<Vec<Vec<NodeBinding>>>) -> Vec<Layer> {
    graph
        .nodes
        .iter()
        .zip(bindings)
        .map(|(node, mappers)| {
            Layer::new(node.clone(), mappers.into_iter().map(|b| NodeMapper::new(UNARY, b)).collect())
        })
        .collect()
}
