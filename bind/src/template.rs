//! Kernel templates.

use std::fmt::Debug;

use kiln_ir::{CodeFragment, OperatorRepresentation, TemplateId, Value};

use crate::error::*;

/// Size of an operator-scoped scratch buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransientSize {
    Bytes(usize),
    /// `repr[var] * bytes`.
    PerElement { var: String, bytes: usize },
}

/// Scratch buffer a kernel needs for the duration of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientSpec {
    /// Representation key the hoisted buffer's name is stored under.
    pub key: String,
    pub size: TransientSize,
    pub level: Option<String>,
}

impl TransientSpec {
    pub fn new(key: impl Into<String>, size: TransientSize) -> Self {
        Self { key: key.into(), size, level: None }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn bytes(&self, node: &str, repr: &OperatorRepresentation) -> Result<usize> {
        match &self.size {
            TransientSize::Bytes(bytes) => Ok(*bytes),
            TransientSize::PerElement { var, bytes } => repr
                .get(var)
                .and_then(Value::as_int)
                .and_then(|n| usize::try_from(n).ok())
                .map(|n| n * bytes)
                .ok_or_else(|| MissingRepresentationSnafu { node, var }.build()),
        }
    }
}

/// The kernel fragment a binding instantiates.
pub trait KernelTemplate: Debug + Send + Sync {
    fn id(&self) -> &TemplateId;

    fn transients(&self) -> &[TransientSpec] {
        &[]
    }

    fn instantiate(&self, repr: &OperatorRepresentation) -> CodeFragment {
        CodeFragment::with_vars(self.id().clone(), repr.clone())
    }
}

/// Template whose variables are exactly the operator representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeTemplate {
    id: TemplateId,
    transients: Vec<TransientSpec>,
}

impl NodeTemplate {
    pub fn new(id: TemplateId) -> Self {
        Self { id, transients: Vec::new() }
    }

    pub fn with_transient(mut self, transient: TransientSpec) -> Self {
        self.transients.push(transient);
        self
    }
}

impl KernelTemplate for NodeTemplate {
    fn id(&self) -> &TemplateId {
        &self.id
    }

    fn transients(&self) -> &[TransientSpec] {
        &self.transients
    }
}
