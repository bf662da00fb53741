//! Target description: compute engines and the operators each one implements.

use std::collections::BTreeMap;

use kiln_ir::Node;
use snafu::OptionExt;

use crate::error::*;
use crate::layer::Layer;
use crate::mapper::NodeMapper;

/// Candidate mappers for one operator type, in priority order.
#[derive(Debug, Clone, Default)]
pub struct LayerSpec {
    mappers: Vec<NodeMapper>,
}

impl LayerSpec {
    pub fn new(mappers: impl IntoIterator<Item = NodeMapper>) -> Self {
        Self { mappers: mappers.into_iter().collect() }
    }

    /// Fresh layer for `node`; discard sets start empty.
    pub fn instantiate(&self, node: &Node) -> Layer {
        let mut mappers = self.mappers.clone();
        mappers.iter_mut().for_each(NodeMapper::reset);
        Layer::new(node.clone(), mappers)
    }
}

#[derive(Debug, Clone)]
pub struct Engine {
    pub name: String,
    mapping: BTreeMap<String, LayerSpec>,
}

impl Engine {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), mapping: BTreeMap::new() }
    }

    pub fn map(mut self, op: impl Into<String>, spec: LayerSpec) -> Self {
        self.mapping.insert(op.into(), spec);
        self
    }

    pub fn maps(&self, op: &str) -> bool {
        self.mapping.contains_key(op)
    }

    pub fn spec(&self, op: &str) -> Option<&LayerSpec> {
        self.mapping.get(op)
    }
}

#[derive(Debug, Clone)]
pub struct Platform {
    pub name: String,
    engines: Vec<Engine>,
}

impl Platform {
    pub fn new(name: impl Into<String>, engines: impl IntoIterator<Item = Engine>) -> Self {
        Self { name: name.into(), engines: engines.into_iter().collect() }
    }

    pub fn engines(&self) -> &[Engine] {
        &self.engines
    }

    /// Engine responsible for `node`.
    ///
    /// A string attribute `engine` pins the node; otherwise the first engine mapping
    /// the operator type wins.
    pub fn engine_for(&self, node: &Node) -> Result<&Engine> {
        if let Some(pinned) = node.str_attr("engine") {
            let engine = self
                .engines
                .iter()
                .find(|e| e.name == pinned)
                .context(UnknownEngineSnafu { node: &node.name, engine: pinned })?;
            snafu::ensure!(engine.maps(&node.op), UnsupportedOpSnafu { node: &node.name, op: &node.op });
            return Ok(engine);
        }
        self.engines.iter().find(|e| e.maps(&node.op)).context(UnsupportedOpSnafu { node: &node.name, op: &node.op })
    }

    pub fn layer_for(&self, node: &Node) -> Result<Layer> {
        let engine = self.engine_for(node)?;
        let spec = engine.spec(&node.op).context(UnsupportedOpSnafu { node: &node.name, op: &node.op })?;
        tracing::trace!(node = %node.name, engine = %engine.name, "engine selected");
        Ok(spec.instantiate(node))
    }
}
