//! Admissibility rules of the generic operators.

use kiln_bind::NodeParser;
use kiln_ir::{Graph, Node, OperatorRepresentation, Value};

fn elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Operators reading and writing tensors of one common shape.
#[derive(Debug, Clone, Copy)]
pub struct ElementwiseParser {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
}

pub const ADD: ElementwiseParser = ElementwiseParser { name: "add", inputs: &["data_in_0", "data_in_1"] };
pub const RELU: ElementwiseParser = ElementwiseParser { name: "relu", inputs: &["data_in"] };

impl NodeParser for ElementwiseParser {
    fn name(&self) -> &str {
        self.name
    }

    fn inputs(&self) -> &[&'static str] {
        self.inputs
    }

    fn outputs(&self) -> &[&'static str] {
        &["data_out"]
    }

    fn parse_node(&self, node: &Node, graph: &Graph) -> Option<OperatorRepresentation> {
        if node.inputs.len() != self.inputs.len() || node.outputs.len() != 1 {
            return None;
        }
        let shape = graph.shape_of(&node.outputs[0])?;
        for input in &node.inputs {
            if graph.shape_of(input)? != shape {
                return None;
            }
        }
        Some(OperatorRepresentation::from([("size".to_string(), Value::from(elements(shape)))]))
    }
}

/// `data_out[M, N] = A[M, K] @ B[K, N]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatMulParser;

impl NodeParser for MatMulParser {
    fn name(&self) -> &str {
        "matmul"
    }

    fn inputs(&self) -> &[&'static str] {
        &["A", "B"]
    }

    fn outputs(&self) -> &[&'static str] {
        &["data_out"]
    }

    fn parse_node(&self, node: &Node, graph: &Graph) -> Option<OperatorRepresentation> {
        let ([a, b], [out]) = (node.inputs.as_slice(), node.outputs.as_slice()) else {
            return None;
        };
        let (&[m, k], &[k_b, n], &[m_out, n_out]) = (graph.shape_of(a)?, graph.shape_of(b)?, graph.shape_of(out)?)
        else {
            return None;
        };
        if k != k_b || m != m_out || n != n_out {
            return None;
        }
        Some(OperatorRepresentation::from([
            ("M".to_string(), Value::from(m)),
            ("N".to_string(), Value::from(n)),
            ("K".to_string(), Value::from(k)),
        ]))
    }
}

/// Integer requantization: `clamp((data_in * mul + add + div / 2) >> log2(div))`.
///
/// `mul` and `add` are single-element tensors. Attributes: `div` (a power of
/// two greater than one), `n_levels` (default 256) and `signed` (default 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct RequantShiftParser;

impl NodeParser for RequantShiftParser {
    fn name(&self) -> &str {
        "requant_shift"
    }

    fn inputs(&self) -> &[&'static str] {
        &["data_in", "mul", "add"]
    }

    fn outputs(&self) -> &[&'static str] {
        &["data_out"]
    }

    fn parse_node(&self, node: &Node, graph: &Graph) -> Option<OperatorRepresentation> {
        let ([data_in, mul, add], [out]) = (node.inputs.as_slice(), node.outputs.as_slice()) else {
            return None;
        };
        let size = elements(graph.shape_of(data_in)?);
        if elements(graph.shape_of(out)?) != size
            || elements(graph.shape_of(mul)?) != 1
            || elements(graph.shape_of(add)?) != 1
        {
            return None;
        }

        let div = node.int_attr("div")?;
        if div < 2 || div.count_ones() != 1 {
            return None;
        }
        let n_levels = node.int_attr("n_levels").unwrap_or(256);
        if n_levels < 2 {
            return None;
        }
        let signed = node.int_attr("signed").unwrap_or(1) != 0;
        let (min, max) = if signed { (-(n_levels / 2), n_levels / 2 - 1) } else { (0, n_levels - 1) };

        Some(OperatorRepresentation::from([
            ("size".to_string(), Value::from(size)),
            ("log2d".to_string(), Value::Int(i64::from(div.trailing_zeros()))),
            ("round".to_string(), Value::Int(div / 2)),
            ("n_levels".to_string(), Value::Int(n_levels)),
            ("min".to_string(), Value::Int(min)),
            ("max".to_string(), Value::Int(max)),
        ]))
    }
}
