//! Script engine whose scripts are Rust entry points.
//!
//! A source file selects its entry with a first non-empty line of the form
//!
//! ```text
//! #!native <name>
//! ```
//!
//! The rest of the file is ignored. Hosts register entries by name before
//! any file is compiled.

use crate::engine::{Artifact, ScriptEngine};
use crate::error::BoxError;
use crate::script::ScriptContext;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

const DIRECTIVE: &str = "#!native";

/// A registered entry point.
pub type NativeEntry = Arc<dyn Fn(&mut ScriptContext<'_>) -> Result<(), BoxError> + Send + Sync>;

/// Reasons a native source fails to compile.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NativeCompileError {
    #[error("'{0}' has no '#!native <name>' directive")]
    MissingDirective(String),

    #[error("'{label}' names unknown native entry '{name}'")]
    UnknownEntry { label: String, name: String },
}

/// Engine mapping `#!native` directives to registered entries.
#[derive(Clone, Default)]
pub struct NativeEngine {
    entries: HashMap<String, NativeEntry>,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`NativeEngine::register`].
    pub fn with_entry<F>(mut self, name: impl Into<String>, entry: F) -> Self
    where
        F: Fn(&mut ScriptContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register(name, entry);
        self
    }

    /// Register (or replace) the entry selected by `#!native <name>`.
    pub fn register<F>(&mut self, name: impl Into<String>, entry: F)
    where
        F: Fn(&mut ScriptContext<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(entry));
    }

    /// Registered entry names, sorted.
    pub fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// The entry name a source selects, if it carries a directive.
    pub fn directive(source: &str) -> Option<&str> {
        let first = source.lines().map(str::trim).find(|line| !line.is_empty())?;
        let name = first.strip_prefix(DIRECTIVE)?.trim();
        (!name.is_empty()).then_some(name)
    }
}

struct NativeArtifact {
    entry: NativeEntry,
}

impl Artifact for NativeArtifact {
    fn evaluate(&self, ctx: &mut ScriptContext<'_>) -> Result<(), BoxError> {
        (self.entry)(ctx)
    }
}

impl ScriptEngine for NativeEngine {
    fn compile(&self, source: &str, label: &str) -> Result<Box<dyn Artifact>, BoxError> {
        let name = Self::directive(source)
            .ok_or_else(|| NativeCompileError::MissingDirective(label.to_string()))?;
        let entry = self.entries.get(name).cloned().ok_or_else(|| {
            NativeCompileError::UnknownEntry {
                label: label.to_string(),
                name: name.to_string(),
            }
        })?;
        Ok(Box::new(NativeArtifact { entry }))
    }

    fn name(&self) -> &str {
        "native"
    }
}
