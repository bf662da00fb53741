//! Canonical operator graph handed over by the topology optimizer.

use std::collections::{BTreeMap, HashSet};

use kiln_dtype::DType;
use snafu::ensure;

use crate::buffer::{Dims, QuantInfo};
use crate::error::*;

/// Static operator attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(Vec<i64>),
    Float(f64),
    Str(String),
}

impl Attribute {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attrs: BTreeMap<String, Attribute>,
}

impl Node {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self { name: name.into(), op: op.into(), inputs: Vec::new(), outputs: Vec::new(), attrs: BTreeMap::new() }
    }

    pub fn inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn outputs<I, S>(mut self, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn attr(mut self, key: impl Into<String>, value: Attribute) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn get_attr(&self, key: &str) -> Option<&Attribute> {
        self.attrs.get(key)
    }

    pub fn int_attr(&self, key: &str) -> Option<i64> {
        self.get_attr(key).and_then(Attribute::as_int)
    }

    pub fn str_attr(&self, key: &str) -> Option<&str> {
        self.get_attr(key).and_then(Attribute::as_str)
    }
}

/// Network input with its externally fixed type.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Dims,
    pub dtype: DType,
    pub quant: Option<QuantInfo>,
}

impl TensorInfo {
    pub fn new(name: impl Into<String>, shape: impl IntoIterator<Item = usize>, dtype: DType) -> Self {
        Self { name: name.into(), shape: shape.into_iter().collect(), dtype, quant: None }
    }

    pub fn with_quant(mut self, quant: QuantInfo) -> Self {
        self.quant = Some(quant);
        self
    }
}

/// Graph initializer. Untyped until an operator consumes it.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantTensor {
    pub name: String,
    pub shape: Dims,
    pub values: Vec<i64>,
}

impl ConstantTensor {
    pub fn new(name: impl Into<String>, shape: impl IntoIterator<Item = usize>, values: Vec<i64>) -> Self {
        Self { name: name.into(), shape: shape.into_iter().collect(), values }
    }
}

/// Topologically ordered operator graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Graph {
    pub name: String,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<String>,
    pub constants: Vec<ConstantTensor>,
    pub nodes: Vec<Node>,
    /// Shapes of node-produced tensors.
    pub shapes: BTreeMap<String, Dims>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn input(mut self, input: TensorInfo) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }

    pub fn constant(mut self, constant: ConstantTensor) -> Self {
        self.constants.push(constant);
        self
    }

    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn tensor(mut self, name: impl Into<String>, shape: impl IntoIterator<Item = usize>) -> Self {
        self.shapes.insert(name.into(), shape.into_iter().collect());
        self
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|o| o == name)
    }

    pub fn constant_tensor(&self, name: &str) -> Option<&ConstantTensor> {
        self.constants.iter().find(|c| c.name == name)
    }

    pub fn shape_of(&self, name: &str) -> Option<&[usize]> {
        if let Some(shape) = self.shapes.get(name) {
            return Some(shape);
        }
        self.inputs
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.shape.as_slice())
            .or_else(|| self.constant_tensor(name).map(|c| c.shape.as_slice()))
    }

    /// Check name uniqueness, shape availability and topological order.
    pub fn validate(&self) -> Result<()> {
        let mut node_names = HashSet::new();
        for node in &self.nodes {
            ensure!(
                node_names.insert(node.name.as_str()),
                InvalidGraphSnafu { graph: self.name.clone(), reason: format!("duplicate node name {:?}", node.name) }
            );
        }

        let mut available: HashSet<&str> = self.inputs.iter().map(|i| i.name.as_str()).collect();
        for constant in &self.constants {
            ensure!(
                available.insert(constant.name.as_str()),
                InvalidGraphSnafu {
                    graph: self.name.clone(),
                    reason: format!("tensor {:?} defined twice", constant.name)
                }
            );
        }

        for node in &self.nodes {
            for input in &node.inputs {
                ensure!(
                    available.contains(input.as_str()),
                    NotTopologicalSnafu { node: node.name.clone(), tensor: input.clone() }
                );
            }
            for output in &node.outputs {
                ensure!(
                    available.insert(output.as_str()),
                    InvalidGraphSnafu { graph: self.name.clone(), reason: format!("tensor {output:?} produced twice") }
                );
                ensure!(
                    self.shapes.contains_key(output),
                    InvalidGraphSnafu { graph: self.name.clone(), reason: format!("tensor {output:?} has no shape") }
                );
            }
        }

        for output in &self.outputs {
            ensure!(
                available.contains(output.as_str()),
                InvalidGraphSnafu { graph: self.name.clone(), reason: format!("output {output:?} is never produced") }
            );
        }
        Ok(())
    }
}
