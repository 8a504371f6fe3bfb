//! Named registry of host-supplied dependencies.
//!
//! The registry maps labels to dependency nodes. Entries are never removed,
//! only replaced; replacing an entry with [`NamedRegistry::set`] reevaluates
//! everything that depended on the previous one.
//!
//! Each entry is retained in the graph while it is registered, so a replaced
//! dependency is freed as soon as its last consumer lets go of it.

use crate::error::{ModuleError, ModuleResult};
use crate::graph::{ModuleGraph, NodeId};
use crate::resolver::Resolver;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info};

/// Label → dependency table with an optional fallback resolver.
pub struct NamedRegistry {
    /// Registered dependencies by label.
    entries: RefCell<HashMap<String, NodeId>>,

    /// Consulted on a local miss.
    parent: Option<Rc<dyn Resolver>>,
}

impl NamedRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            parent: None,
        }
    }

    /// Create a registry that falls back to `parent` on a miss.
    pub fn with_parent(parent: Rc<dyn Resolver>) -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            parent: Some(parent),
        }
    }

    /// Labels are non-empty and use only `a-z`, `0-9`, `-` and `_`.
    pub fn is_valid_label(label: &str) -> bool {
        !label.is_empty()
            && label
                .chars()
                .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-' | '_'))
    }

    fn check_label(label: &str) -> ModuleResult<()> {
        if Self::is_valid_label(label) {
            Ok(())
        } else {
            Err(ModuleError::illegal(format!(
                "Invalid registry label '{}'",
                label
            )))
        }
    }

    /// Register a new entry. Fails if the label is invalid or taken.
    pub fn add(
        &self,
        graph: &mut ModuleGraph,
        label: &str,
        dependency: NodeId,
    ) -> ModuleResult<()> {
        Self::check_label(label)?;
        if self.has(label) {
            return Err(ModuleError::illegal(format!(
                "Registry label '{}' is already registered",
                label
            )));
        }
        graph.retain(dependency)?;
        self.entries
            .borrow_mut()
            .insert(label.to_string(), dependency);
        info!("Registered '{}' as {}", label, dependency);
        Ok(())
    }

    /// Register or replace an entry.
    ///
    /// When a previous dependency is replaced, every consumer that depended
    /// on it is reevaluated in a single cascade. All consumers are attempted;
    /// their failures are returned together.
    pub fn set(
        &self,
        graph: &mut ModuleGraph,
        label: &str,
        dependency: NodeId,
    ) -> ModuleResult<()> {
        let Some(previous) = self.replace(graph, label, dependency)? else {
            return Ok(());
        };
        info!(
            "Replaced '{}' ({} -> {}), reevaluating dependents",
            label, previous, dependency
        );
        let reevaluated = graph.reevaluate_dependents(previous);
        let released = graph.release(previous);
        reevaluated.and(released)
    }

    /// Register or replace an entry without reevaluating anything.
    ///
    /// Consumers of the previous dependency keep it until they close.
    pub fn set_silently(
        &self,
        graph: &mut ModuleGraph,
        label: &str,
        dependency: NodeId,
    ) -> ModuleResult<()> {
        match self.replace(graph, label, dependency)? {
            Some(previous) => graph.release(previous),
            None => Ok(()),
        }
    }

    /// Swap in `dependency`, returning the entry it displaced.
    fn replace(
        &self,
        graph: &mut ModuleGraph,
        label: &str,
        dependency: NodeId,
    ) -> ModuleResult<Option<NodeId>> {
        Self::check_label(label)?;
        if self.lookup(label) == Some(dependency) {
            return Ok(None);
        }
        graph.retain(dependency)?;
        Ok(self
            .entries
            .borrow_mut()
            .insert(label.to_string(), dependency))
    }

    /// Whether `label` is registered locally. Never consults the parent.
    pub fn has(&self, label: &str) -> bool {
        self.entries.borrow().contains_key(label)
    }

    /// The local entry for `label`.
    pub fn lookup(&self, label: &str) -> Option<NodeId> {
        self.entries.borrow().get(label).copied()
    }

    /// Registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.entries.borrow().keys().cloned().collect();
        labels.sort();
        labels
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Default for NamedRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for NamedRegistry {
    fn resolve(
        &self,
        graph: &mut ModuleGraph,
        scope: &Path,
        identifier: &str,
    ) -> ModuleResult<Option<NodeId>> {
        if let Some(found) = self.lookup(identifier) {
            debug!("Registry resolved '{}' to {}", identifier, found);
            return Ok(Some(found));
        }
        match &self.parent {
            Some(parent) => parent.resolve(graph, scope, identifier),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "registry"
    }
}
