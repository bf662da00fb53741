//! Buffers tracked by the compilation context.

use kiln_dtype::DType;
use smallvec::SmallVec;

/// Per-dimension sizes, offsets or strides.
pub type Dims = SmallVec<[usize; 4]>;

/// Visibility of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display)]
pub enum Scope {
    /// Operator-scoped: intermediate tensors and per-operator scratch.
    Local,
    /// Whole-graph-scoped: network I/O, constants, arenas, lookup tables.
    Global,
}

/// Quantization metadata attached to integer tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuantInfo {
    /// Number of distinct quantization levels (e.g. 256 for 8 bit).
    pub n_levels: u64,
    pub signed: bool,
}

/// One typed field of a [`BufferKind::Struct`].
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub dtype: DType,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    /// Address of another buffer.
    Buffer(String),
}

/// Buffer variants.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferKind {
    /// Mutable intermediate or I/O tensor.
    Variable,
    /// Immutable weight or parameter; always live.
    Constant { values: Vec<i64> },
    /// Scratch space without a persistent value.
    Transient { size: usize },
    /// Named aggregate of typed fields.
    Struct { fields: Vec<StructField> },
    /// Aliasing view onto another buffer at a byte offset. Never owns storage.
    Reference { referenced: String, offset: usize },
}

impl BufferKind {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Variable => "variable",
            Self::Constant { .. } => "constant",
            Self::Transient { .. } => "transient",
            Self::Struct { .. } => "struct",
            Self::Reference { .. } => "reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    pub name: String,
    pub shape: Dims,
    /// Pointer type assigned by type inference.
    pub dtype: Option<DType>,
    /// Names of the operators reading this buffer.
    pub users: Vec<String>,
    pub live: bool,
    /// Memory level the buffer is placed in, if decided.
    pub level: Option<String>,
    pub quant: Option<QuantInfo>,
    pub kind: BufferKind,
}

impl Buffer {
    fn with_kind(name: impl Into<String>, shape: impl IntoIterator<Item = usize>, kind: BufferKind) -> Self {
        let live = matches!(kind, BufferKind::Constant { .. });
        Self {
            name: name.into(),
            shape: shape.into_iter().collect(),
            dtype: None,
            users: Vec::new(),
            live,
            level: None,
            quant: None,
            kind,
        }
    }

    pub fn variable(name: impl Into<String>, shape: impl IntoIterator<Item = usize>) -> Self {
        Self::with_kind(name, shape, BufferKind::Variable)
    }

    pub fn constant(name: impl Into<String>, shape: impl IntoIterator<Item = usize>, values: Vec<i64>) -> Self {
        Self::with_kind(name, shape, BufferKind::Constant { values })
    }

    pub fn transient(name: impl Into<String>, size: usize) -> Self {
        Self::with_kind(name, [size], BufferKind::Transient { size }).with_dtype(DType::Void)
    }

    pub fn structure(name: impl Into<String>, fields: Vec<StructField>) -> Self {
        Self::with_kind(name, [1], BufferKind::Struct { fields })
    }

    pub fn reference(
        name: impl Into<String>,
        referenced: impl Into<String>,
        offset: usize,
        shape: impl IntoIterator<Item = usize>,
    ) -> Self {
        Self::with_kind(name, shape, BufferKind::Reference { referenced: referenced.into(), offset })
    }

    /// Set the assigned type.
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        self.dtype = Some(dtype);
        self
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = Some(level.into());
        self
    }

    pub fn with_quant(mut self, quant: QuantInfo) -> Self {
        self.quant = Some(quant);
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, BufferKind::Constant { .. })
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, BufferKind::Reference { .. })
    }

    pub fn values(&self) -> Option<&[i64]> {
        match &self.kind {
            BufferKind::Constant { values } => Some(values),
            _ => None,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Storage size in bytes, when the element type is known.
    pub fn size_bytes(&self) -> Option<usize> {
        match &self.kind {
            BufferKind::Transient { size } => Some(*size),
            _ => self.dtype.as_ref().map(|dtype| (self.num_elements() * dtype.element_bits()).div_ceil(8)),
        }
    }

    /// Record an operator as reader of this buffer. Repeated users are kept once.
    pub fn add_user(&mut self, user: &str) {
        if !self.users.iter().any(|u| u == user) {
            self.users.push(user.to_string());
        }
    }
}
