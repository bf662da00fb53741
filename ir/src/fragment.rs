//! Code fragments: template identifiers paired with substitution variables.
//!
//! Fragments are rendered by an external template engine. Everything a
//! template references must be present in the fragment's variables or, for
//! [`Value::Deferred`], in the variables of an enclosing fragment.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use crate::context::NetworkContext;
use crate::tiling::OperatorTiling;

/// Name of a code template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TemplateId(Cow<'static, str>);

impl TemplateId {
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn owned(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Substitution value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Ints(Vec<i64>),
    /// Verbatim text (type names, comments, loop variables).
    Text(String),
    /// Logical buffer name; mangled before rendering.
    Buffer(String),
    /// Target identifier that is already mangled.
    Ident(String),
    /// Resolved at render time from the variables of an enclosing fragment.
    Deferred(String),
    /// `table[index + shift]` where `table` is a logical buffer name.
    Lookup { table: String, index: Box<Value>, shift: i64 },
    /// Nested fragments (loop bodies, branches).
    Block(FragmentSeq),
}

impl Value {
    pub fn buffer(name: impl Into<String>) -> Self {
        Self::Buffer(name.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn deferred(name: impl Into<String>) -> Self {
        Self::Deferred(name.into())
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&str> {
        match self {
            Self::Buffer(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_block(&self) -> Option<&FragmentSeq> {
        match self {
            Self::Block(seq) => Some(seq),
            _ => None,
        }
    }

    fn visit_buffers<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Self::Buffer(name) => f(name),
            Self::Lookup { table, index, .. } => {
                f(table);
                index.visit_buffers(f);
            }
            Self::Block(seq) => seq.iter().for_each(|fragment| fragment.visit_buffers(f)),
            _ => {}
        }
    }

    fn map_buffers(&mut self, f: &mut impl FnMut(&str) -> Value) {
        match self {
            Self::Buffer(name) => *self = f(name),
            Self::Lookup { table, index, .. } => {
                if let Self::Buffer(renamed) | Self::Ident(renamed) = f(table) {
                    *table = renamed;
                }
                index.map_buffers(f);
            }
            Self::Block(seq) => seq.iter_mut().for_each(|fragment| fragment.map_buffers(f)),
            _ => {}
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<FragmentSeq> for Value {
    fn from(seq: FragmentSeq) -> Self {
        Self::Block(seq)
    }
}

/// Operator representation: the parser's variables for the kernel template.
pub type OperatorRepresentation = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct CodeFragment {
    pub template: TemplateId,
    pub vars: BTreeMap<String, Value>,
}

impl CodeFragment {
    pub fn new(template: TemplateId) -> Self {
        Self { template, vars: BTreeMap::new() }
    }

    pub fn with_vars(template: TemplateId, vars: BTreeMap<String, Value>) -> Self {
        Self { template, vars }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    fn visit_buffers<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        self.vars.values().for_each(|value| value.visit_buffers(f));
    }

    fn map_buffers(&mut self, f: &mut impl FnMut(&str) -> Value) {
        self.vars.values_mut().for_each(|value| value.map_buffers(f));
    }
}

/// Ordered, double-ended fragment sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentSeq(VecDeque<CodeFragment>);

impl FragmentSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&mut self, fragment: CodeFragment) {
        self.0.push_back(fragment);
    }

    pub fn push_front(&mut self, fragment: CodeFragment) {
        self.0.push_front(fragment);
    }

    /// Append fragments after the existing ones, keeping their order.
    pub fn extend_back(&mut self, fragments: impl IntoIterator<Item = CodeFragment>) {
        self.0.extend(fragments);
    }

    /// Prepend fragments before the existing ones, keeping their order.
    pub fn extend_front(&mut self, fragments: impl IntoIterator<Item = CodeFragment>) {
        let fragments: Vec<_> = fragments.into_iter().collect();
        for fragment in fragments.into_iter().rev() {
            self.0.push_front(fragment);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CodeFragment> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CodeFragment> {
        self.0.iter_mut()
    }

    /// Logical buffer names referenced anywhere in the sequence, nested blocks included.
    pub fn referenced_buffers(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        let mut collect = |name: &str| {
            names.insert(name.to_string());
        };
        self.iter().for_each(|fragment| fragment.visit_buffers(&mut collect));
        names
    }

    /// Rewrite every buffer reference through `f`.
    pub fn map_buffers(&mut self, mut f: impl FnMut(&str) -> Value) {
        self.iter_mut().for_each(|fragment| fragment.map_buffers(&mut f));
    }
}

impl FromIterator<CodeFragment> for FragmentSeq {
    fn from_iter<I: IntoIterator<Item = CodeFragment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FragmentSeq {
    type Item = CodeFragment;
    type IntoIter = std::collections::vec_deque::IntoIter<CodeFragment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Fragments generated for one operator plus the tiling decisions that apply to it.
#[derive(Debug, Clone, Default)]
pub struct ExecutionBlock {
    pub fragments: FragmentSeq,
    pub tiling: Option<Arc<OperatorTiling>>,
}

impl ExecutionBlock {
    pub fn new(kernel: CodeFragment) -> Self {
        Self { fragments: FragmentSeq::from_iter([kernel]), tiling: None }
    }

    /// Insert code before everything generated so far.
    pub fn add_left(&mut self, fragment: CodeFragment) {
        self.fragments.push_front(fragment);
    }

    /// Insert code after everything generated so far.
    pub fn add_right(&mut self, fragment: CodeFragment) {
        self.fragments.push_back(fragment);
    }

    /// Replace logical buffer names with mangled identifiers.
    pub fn mangle(&mut self, ctx: &NetworkContext) {
        self.fragments.map_buffers(|name| Value::Ident(ctx.mangle(name)));
    }
}

/// Structural templates shared by emitters, renderers and interpreters.
pub mod builtin {
    use super::TemplateId;

    /// `text`: free-form comment.
    pub const COMMENT: TemplateId = TemplateId::new("comment");
    /// `idx` (loop variable), `num_tiles`, `body`.
    pub const FOR_TILES: TemplateId = TemplateId::new("for_tiles");
    /// `idx`, `shift`, `bound`, `body`: runs `body` if `idx + shift < bound`.
    pub const IF_TILE_LT: TemplateId = TemplateId::new("if_tile_lt");
    /// `idx`, `bound`, `body`: runs `body` if `idx >= bound`.
    pub const IF_TILE_GE: TemplateId = TemplateId::new("if_tile_ge");
    /// `idx`, `even`, `odd`: selects a branch by `idx % 2`.
    pub const SWITCH_PARITY: TemplateId = TemplateId::new("switch_parity");
    /// `var`, `bound`, `body`: plain counted loop.
    pub const FOR_DIM: TemplateId = TemplateId::new("for_dim");
    /// `type`, `name`, `referenced`, `offset`: declares a pointer into another buffer.
    pub const REF_DECL: TemplateId = TemplateId::new("ref_decl");
    /// `type`, `name`, `referenced`, `var`, `stride`: declares `referenced + var * stride`.
    pub const REF_INDEXED: TemplateId = TemplateId::new("ref_indexed");
    /// `name`, `target`: re-points a reference.
    pub const REF_ASSIGN: TemplateId = TemplateId::new("ref_assign");
    /// `type`, `name`, `delta`: advances a reference by `delta` bytes.
    pub const REF_ADVANCE: TemplateId = TemplateId::new("ref_advance");
    /// `name`, `value`: assigns a per-tile kernel parameter.
    pub const PARAM_ASSIGN: TemplateId = TemplateId::new("param_assign");
    /// `type`, `name`, `value`: declares a per-tile kernel parameter.
    pub const PARAM_DECL: TemplateId = TemplateId::new("param_decl");
}
