//! Compilation context: the single source of truth for buffers.
//!
//! Speculative search mutates the context in place and undoes its changes
//! through a journal. A [`Checkpoint`] records the journal position together
//! with the sequence number of the last entry, so rolling back to a position
//! that has since been undone and rewritten is detected instead of silently
//! restoring the wrong state.

use std::collections::BTreeMap;

use kiln_dtype::{AddrSpace, DType};
use snafu::ensure;

use crate::buffer::{Buffer, BufferKind, Scope, StructField};
use crate::error::*;

/// Journal position to roll back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    len: usize,
    seq: u64,
}

#[derive(Debug, Clone)]
enum Change {
    Added { scope: Scope, name: String },
    Replaced { scope: Scope, previous: Buffer },
    Removed { scope: Scope, previous: Buffer },
}

#[derive(Debug, Clone)]
struct JournalEntry {
    seq: u64,
    change: Change,
}

#[derive(Debug, Clone)]
pub struct NetworkContext {
    name: String,
    mangle_prefix: Option<String>,
    local: BTreeMap<String, Buffer>,
    global: BTreeMap<String, Buffer>,
    journal: Vec<JournalEntry>,
    next_seq: u64,
    frozen: bool,
}

impl NetworkContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mangle_prefix: None,
            local: BTreeMap::new(),
            global: BTreeMap::new(),
            journal: Vec::new(),
            next_seq: 1,
            frozen: false,
        }
    }

    /// Prefix every mangled identifier with the compilation unit's name.
    pub fn with_mangle_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.mangle_prefix = Some(prefix.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // =========================================================================
    // Journal
    // =========================================================================

    pub fn checkpoint(&self) -> Result<Checkpoint> {
        ensure!(!self.frozen, ContextFrozenSnafu { name: self.name.clone() });
        Ok(Checkpoint { len: self.journal.len(), seq: self.journal.last().map_or(0, |e| e.seq) })
    }

    /// Undo every change recorded after `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> Result<()> {
        ensure!(!self.frozen, ContextFrozenSnafu { name: self.name.clone() });
        let valid = checkpoint.len <= self.journal.len()
            && match checkpoint.len {
                0 => checkpoint.seq == 0,
                len => self.journal[len - 1].seq == checkpoint.seq,
            };
        ensure!(valid, StaleCheckpointSnafu { checkpoint, journal_len: self.journal.len() });

        let undone = self.journal.len() - checkpoint.len;
        while self.journal.len() > checkpoint.len {
            let Some(entry) = self.journal.pop() else { break };
            match entry.change {
                Change::Added { scope, name } => {
                    self.scope_mut(scope).remove(&name);
                }
                Change::Replaced { scope, previous } | Change::Removed { scope, previous } => {
                    self.scope_mut(scope).insert(previous.name.clone(), previous);
                }
            }
        }
        tracing::trace!(context = %self.name, undone, "rolled back context");
        Ok(())
    }

    /// Run `f` speculatively: its changes are kept only if it returns `Ok(true)`.
    pub fn speculate<F, E>(&mut self, f: F) -> Result<bool, E>
    where
        F: FnOnce(&mut Self) -> Result<bool, E>,
        E: From<Error>,
    {
        let checkpoint = self.checkpoint()?;
        match f(self) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.rollback(checkpoint)?;
                Ok(false)
            }
            Err(err) => {
                self.rollback(checkpoint)?;
                Err(err)
            }
        }
    }

    /// Number of changes that can still be undone.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Drop the journal; the context is read-mostly from here on.
    pub fn freeze(&mut self) {
        self.journal.clear();
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn record(&mut self, change: Change) {
        if self.frozen {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.journal.push(JournalEntry { seq, change });
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut BTreeMap<String, Buffer> {
        match scope {
            Scope::Local => &mut self.local,
            Scope::Global => &mut self.global,
        }
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Track a new buffer. Names are unique across both scopes.
    pub fn add(&mut self, buffer: Buffer, scope: Scope) -> Result<()> {
        if let Some(existing) = self.scope_of(&buffer.name) {
            return DuplicateBufferSnafu { name: buffer.name, scope: existing }.fail();
        }
        let name = buffer.name.clone();
        self.scope_mut(scope).insert(name.clone(), buffer);
        self.record(Change::Added { scope, name });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Buffer> {
        self.local.get(name).or_else(|| self.global.get(name))
    }

    pub fn lookup(&self, name: &str) -> Result<&Buffer> {
        self.get(name).ok_or_else(|| UnknownBufferSnafu { name }.build())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn scope_of(&self, name: &str) -> Option<Scope> {
        if self.local.contains_key(name) {
            Some(Scope::Local)
        } else if self.global.contains_key(name) {
            Some(Scope::Global)
        } else {
            None
        }
    }

    pub fn is_global(&self, name: &str) -> bool {
        self.global.contains_key(name)
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.local.contains_key(name)
    }

    /// Mutate a buffer in place; the previous value is journaled.
    pub fn update<F>(&mut self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Buffer),
    {
        let scope = self.scope_of(name).ok_or_else(|| UnknownBufferSnafu { name }.build())?;
        let buffer = self.scope_mut(scope).get_mut(name).ok_or_else(|| UnknownBufferSnafu { name }.build())?;
        let previous = buffer.clone();
        f(buffer);
        if *buffer != previous {
            self.record(Change::Replaced { scope, previous });
        }
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Buffer> {
        let scope = self.scope_of(name).ok_or_else(|| UnknownBufferSnafu { name }.build())?;
        let previous = self.scope_mut(scope).remove(name).ok_or_else(|| UnknownBufferSnafu { name }.build())?;
        self.record(Change::Removed { scope, previous: previous.clone() });
        Ok(previous)
    }

    pub fn add_user(&mut self, name: &str, user: &str) -> Result<()> {
        self.update(name, |buffer| buffer.add_user(user))
    }

    pub fn global_buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.global.values()
    }

    pub fn local_buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.local.values()
    }

    /// Resolve reference chains down to the owning buffer and the accumulated byte offset.
    pub fn resolve_reference(&self, name: &str) -> Result<(&Buffer, usize)> {
        let mut buffer = self.lookup(name)?;
        let mut offset = 0;
        while let BufferKind::Reference { referenced, offset: delta } = &buffer.kind {
            offset += delta;
            buffer = self.lookup(referenced)?;
        }
        Ok((buffer, offset))
    }

    // =========================================================================
    // Naming
    // =========================================================================

    /// Map a logical name to a target identifier.
    ///
    /// Structural separators become underscores; identifiers never start with a digit.
    pub fn mangle(&self, name: &str) -> String {
        let mut mangled: String =
            name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
        if mangled.starts_with(|c: char| c.is_ascii_digit()) {
            mangled.insert(0, '_');
        }
        match &self.mangle_prefix {
            Some(prefix) => format!("{prefix}_{mangled}"),
            None => mangled,
        }
    }

    /// Fails if two tracked buffers mangle to the same identifier.
    pub fn check_mangling(&self) -> Result<()> {
        let mut seen: BTreeMap<String, &str> = BTreeMap::new();
        for buffer in self.global_buffers().chain(self.local_buffers()) {
            let ident = self.mangle(&buffer.name);
            if let Some(first) = seen.insert(ident.clone(), &buffer.name) {
                return MangleCollisionSnafu { first, second: &buffer.name, ident }.fail();
            }
        }
        Ok(())
    }

    /// First free name of the form `base`, `base_1`, `base_2`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..).map(|i| format!("{base}_{i}")).find(|candidate| !self.contains(candidate)).unwrap_or_default()
    }

    // =========================================================================
    // Hoisting
    // =========================================================================

    /// Hoist a global constant, e.g. a per-tile lookup table.
    pub fn hoist_constant(&mut self, name: &str, values: Vec<i64>, dtype: DType) -> Result<String> {
        let name = self.unique_name(name);
        let buffer = Buffer::constant(name.clone(), [values.len()], values).with_dtype(dtype.ptr(AddrSpace::Global));
        self.add(buffer, Scope::Global)?;
        Ok(name)
    }

    /// Hoist operator-scoped scratch space.
    pub fn hoist_transient(&mut self, name: &str, size: usize, level: Option<&str>) -> Result<String> {
        let name = self.unique_name(name);
        let mut buffer = Buffer::transient(name.clone(), size);
        buffer.level = level.map(str::to_string);
        self.add(buffer, Scope::Local)?;
        Ok(name)
    }

    /// Hoist an aliasing view. The view inherits the referenced buffer's type unless one is given.
    pub fn hoist_reference(
        &mut self,
        name: &str,
        referenced: &str,
        offset: usize,
        shape: &[usize],
        dtype: Option<DType>,
    ) -> Result<String> {
        let target = self.lookup(referenced)?;
        let dtype = dtype.or_else(|| target.dtype.clone());
        let level = target.level.clone();
        let name = self.unique_name(name);
        let mut buffer = Buffer::reference(name.clone(), referenced, offset, shape.iter().copied());
        buffer.dtype = dtype;
        buffer.level = level;
        self.add(buffer, Scope::Local)?;
        Ok(name)
    }

    pub fn hoist_struct(&mut self, name: &str, fields: Vec<StructField>) -> Result<String> {
        for field in &fields {
            if let crate::buffer::FieldValue::Buffer(target) = &field.value {
                self.lookup(target)?;
            }
        }
        let name = self.unique_name(name);
        self.add(Buffer::structure(name.clone(), fields), Scope::Local)?;
        Ok(name)
    }

    /// The memory arena backing one memory level; created on first use and grown to the largest request.
    pub fn hoist_arena(&mut self, level: &str, size: usize) -> Result<String> {
        let name = format!("MEMORYARENA_{level}");
        match self.get(&name) {
            Some(buffer) if matches!(buffer.kind, BufferKind::Transient { .. }) => {
                self.update(&name, |arena| {
                    if let BufferKind::Transient { size: current } = &mut arena.kind
                        && *current < size
                    {
                        *current = size;
                        arena.shape = [size].into_iter().collect();
                    }
                })?;
                Ok(name)
            }
            Some(buffer) => {
                UnexpectedBufferKindSnafu { name, expected: "transient", actual: buffer.kind_name() }.fail()
            }
            None => {
                let mut arena = Buffer::transient(name.clone(), size).with_level(level);
                arena.live = true;
                self.add(arena, Scope::Global)?;
                Ok(name)
            }
        }
    }
}
