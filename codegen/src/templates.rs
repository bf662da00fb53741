//! Template sources.
//!
//! A source is target text with `${name}` placeholders. Every placeholder must
//! be satisfied by the fragment being rendered; see [`crate::render`].

use std::borrow::Cow;
use std::collections::BTreeMap;

use kiln_ir::{TemplateId, builtin};
use snafu::OptionExt;

use crate::error::*;

/// Declarations of the network's statically allocated buffers.
pub mod declaration {
    use kiln_ir::TemplateId;

    /// `type`, `name`, `size`: tensor owned by the caller.
    pub const EXTERN: TemplateId = TemplateId::new("decl_extern");
    /// `type`, `name`, `size`: intermediate tensor.
    pub const STATIC: TemplateId = TemplateId::new("decl_static");
    /// `type`, `name`, `size`, `values`: read-only table or weight.
    pub const CONSTANT: TemplateId = TemplateId::new("decl_constant");
    /// `name`, `size`, `level`: scratch arena.
    pub const ARENA: TemplateId = TemplateId::new("decl_arena");
    /// `name`, `fields`, `values`: aggregate of typed fields.
    pub const STRUCT: TemplateId = TemplateId::new("decl_struct");
}

/// Piece of a parsed template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'s> {
    Text(&'s str),
    Var(&'s str),
}

/// Split `source` into literal text and placeholders.
///
/// A `$` not followed by `{` is literal text. Fails with the byte position of an
/// unterminated `${`.
pub fn parse(source: &str) -> Result<Vec<Segment<'_>>, usize> {
    let mut segments = Vec::new();
    let mut rest = source;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(source.len() - rest.len() + start)?;
        segments.push(Segment::Var(&after[..end]));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

/// Template id to source text.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    sources: BTreeMap<TemplateId, Cow<'static, str>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the structural and declaration templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.extend(BUILTINS.iter().cloned());
        registry
    }

    /// Register `source` under `id`, replacing an earlier registration.
    pub fn register(&mut self, id: TemplateId, source: impl Into<Cow<'static, str>>) -> &mut Self {
        if let Some(previous) = self.sources.insert(id.clone(), source.into()) {
            tracing::trace!(template = %id, previous = %previous, "template source replaced");
        }
        self
    }

    pub fn with(mut self, id: TemplateId, source: impl Into<Cow<'static, str>>) -> Self {
        self.register(id, source);
        self
    }

    pub fn contains(&self, id: &TemplateId) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &TemplateId> {
        self.sources.keys()
    }

    pub fn source(&self, id: &TemplateId) -> Result<&str> {
        self.sources.get(id).map(AsRef::as_ref).context(UnknownTemplateSnafu { template: id.as_str() })
    }

    /// Parsed source of `id`.
    pub fn segments(&self, id: &TemplateId) -> Result<Vec<Segment<'_>>> {
        parse(self.source(id)?).map_err(|position| MalformedTemplateSnafu { template: id.as_str(), position }.build())
    }
}

impl<S: Into<Cow<'static, str>>> Extend<(TemplateId, S)> for TemplateRegistry {
    fn extend<I: IntoIterator<Item = (TemplateId, S)>>(&mut self, iter: I) {
        for (id, source) in iter {
            self.register(id, source);
        }
    }
}

const BUILTINS: &[(TemplateId, &str)] = &[
    (builtin::COMMENT, "/* ${text} */"),
    (builtin::FOR_TILES, "for (int ${idx} = 0; ${idx} < ${num_tiles}; ${idx}++) {\n${body}\n}"),
    (builtin::IF_TILE_LT, "if (${idx} + ${shift} < ${bound}) {\n${body}\n}"),
    (builtin::IF_TILE_GE, "if (${idx} >= ${bound}) {\n${body}\n}"),
    (builtin::SWITCH_PARITY, "if (${idx} % 2 == 0) {\n${even}\n} else {\n${odd}\n}"),
    (builtin::FOR_DIM, "for (int ${var} = 0; ${var} < ${bound}; ${var}++) {\n${body}\n}"),
    (builtin::REF_DECL, "${type} ${name} = (${type})((char*)${referenced} + ${offset});"),
    (builtin::REF_INDEXED, "${type} ${name} = (${type})((char*)${referenced} + ${var} * ${stride});"),
    (builtin::REF_ASSIGN, "${name} = ${target};"),
    (builtin::REF_ADVANCE, "${name} = (${type})((char*)${name} + ${delta});"),
    (builtin::PARAM_ASSIGN, "${name} = ${value};"),
    (builtin::PARAM_DECL, "${type} ${name} = ${value};"),
    (declaration::EXTERN, "extern ${type} ${name}[${size}];"),
    (declaration::STATIC, "static ${type} ${name}[${size}];"),
    (declaration::CONSTANT, "static const ${type} ${name}[${size}] = ${values};"),
    (declaration::ARENA, "static uint8_t ${name}[${size}]; /* ${level} */"),
    (declaration::STRUCT, "static struct { ${fields} } ${name} = { ${values} };"),
];
