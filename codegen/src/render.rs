//! Fragment sequences to target text.
//!
//! Rendering walks the sequence with a stack of enclosing fragments. A
//! [`Value::Deferred`] placeholder is not looked up in its own fragment but in
//! the fragments it is nested in, innermost first; this is how loop bodies
//! learn the name of the loop counter their enclosing loop declares.

use itertools::Itertools;
use kiln_ir::{CodeFragment, FragmentSeq, Value};
use snafu::OptionExt;

use crate::error::*;
use crate::templates::{Segment, TemplateRegistry};

const INDENT: &str = "    ";

pub struct Renderer<'r> {
    registry: &'r TemplateRegistry,
}

impl<'r> Renderer<'r> {
    pub fn new(registry: &'r TemplateRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r TemplateRegistry {
        self.registry
    }

    /// Render a top-level sequence, one fragment after the other.
    pub fn render(&self, seq: &FragmentSeq) -> Result<String> {
        let mut scopes = Vec::new();
        Ok(self.lines(seq, &mut scopes)?.join("\n"))
    }

    /// Render a single fragment with no enclosing scope.
    pub fn render_fragment(&self, fragment: &CodeFragment) -> Result<String> {
        self.fragment(fragment, &mut Vec::new())
    }

    fn lines<'a>(&self, seq: &'a FragmentSeq, scopes: &mut Vec<&'a CodeFragment>) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for fragment in seq.iter() {
            let text = self.fragment(fragment, scopes)?;
            lines.extend(text.lines().filter(|line| !line.trim().is_empty()).map(str::to_string));
        }
        Ok(lines)
    }

    fn fragment<'a>(&self, fragment: &'a CodeFragment, scopes: &mut Vec<&'a CodeFragment>) -> Result<String> {
        let segments = self.registry.segments(&fragment.template)?;
        scopes.push(fragment);
        let depth = scopes.len() - 1;
        let mut out = String::new();
        let mut result = Ok(());
        for segment in segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Var(name) => {
                    let value = fragment.get(name).context(MissingVariableSnafu {
                        template: fragment.template.as_str(),
                        variable: name,
                        vars: fragment.vars.clone(),
                    });
                    match value.and_then(|value| self.value(fragment, value, depth, scopes)) {
                        Ok(text) => out.push_str(&text),
                        Err(e) => {
                            result = Err(e);
                            break;
                        }
                    }
                }
            }
        }
        scopes.pop();
        result.map(|()| out)
    }

    /// Text of `value`, found in the scope at `depth` while rendering `fragment`.
    fn value<'a>(
        &self,
        fragment: &'a CodeFragment,
        value: &'a Value,
        depth: usize,
        scopes: &mut Vec<&'a CodeFragment>,
    ) -> Result<String> {
        match value {
            Value::Int(v) => Ok(v.to_string()),
            Value::Ints(values) => Ok(format!("{{{}}}", values.iter().join(", "))),
            Value::Text(text) | Value::Ident(text) => Ok(text.clone()),
            Value::Buffer(name) => UnmangledBufferSnafu { template: fragment.template.as_str(), name }.fail(),
            Value::Deferred(name) => {
                let (outer, resolved) = scopes[..depth]
                    .iter()
                    .copied()
                    .enumerate()
                    .rev()
                    .find_map(|(at, scope)| scope.get(name).map(|value| (at, value)))
                    .context(MissingVariableSnafu {
                        template: fragment.template.as_str(),
                        variable: name,
                        vars: fragment.vars.clone(),
                    })?;
                self.value(fragment, resolved, outer, scopes)
            }
            Value::Lookup { table, index, shift } => {
                let index = self.value(fragment, index, depth, scopes)?;
                Ok(match shift {
                    0 => format!("{table}[{index}]"),
                    s if *s < 0 => format!("{table}[{index} - {}]", s.unsigned_abs()),
                    s => format!("{table}[{index} + {s}]"),
                })
            }
            Value::Block(seq) => {
                let lines = self.lines(seq, scopes)?;
                Ok(lines.iter().map(|line| format!("{INDENT}{line}")).join("\n"))
            }
        }
    }
}
