//! Root holder of loaded modules.
//!
//! The manager is itself a consumer node: every root-loaded module is a
//! lifecycle the manager holds. Entries are keyed by the resolved dependency
//! so two identifiers that resolve to the same module collide.

use crate::error::{ModuleError, ModuleResult};
use crate::graph::{ModuleGraph, NodeId, NodeKind};
use crate::lifecycle::Lifecycle;
use crate::resolver::Resolver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{info, warn};

/// A root-loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    reference: NodeId,
    lifecycle: Lifecycle,
    identifier: String,
}

impl Entry {
    /// The loaded dependency.
    pub fn reference(&self) -> NodeId {
        self.reference
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The normalized identifier the module was loaded by.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

pub(crate) struct ManagerState {
    resolver: Rc<dyn Resolver>,
    scope: PathBuf,
    entries: HashMap<NodeId, Entry>,
}

/// Handle to a manager node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyManager {
    node: NodeId,
}

impl DependencyManager {
    /// Add a manager resolving identifiers through `resolver` against `scope`.
    pub fn new(
        graph: &mut ModuleGraph,
        resolver: Rc<dyn Resolver>,
        scope: impl Into<PathBuf>,
    ) -> Self {
        let scope = scope.into();
        let node = graph.insert(
            format!("manager:{}", scope.display()),
            NodeKind::Manager(ManagerState {
                resolver,
                scope,
                entries: HashMap::new(),
            }),
        );
        Self { node }
    }

    /// The manager's consumer node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Resolve and hold a module.
    ///
    /// The identifier is trimmed and lower-cased first. Fails with
    /// [`ModuleError::NotFound`] when nothing resolves and with
    /// [`ModuleError::AlreadyLoaded`] (carrying the earlier entry) when the
    /// resolved module is already held.
    pub fn load(&self, graph: &mut ModuleGraph, identifier: &str) -> ModuleResult<Entry> {
        let identifier = identifier.trim().to_lowercase();
        if identifier.is_empty() {
            return Err(ModuleError::illegal("Cannot load an empty identifier"));
        }
        graph.manager_load(self.node, &identifier)
    }

    /// Release a held module.
    pub fn unload(&self, graph: &mut ModuleGraph, entry: &Entry) -> ModuleResult<()> {
        let removed = graph
            .manager_mut(self.node)?
            .entries
            .remove(&entry.reference)
            .ok_or_else(|| ModuleError::NotLoaded(entry.identifier.clone()))?;

        info!("Unloading module '{}'", removed.identifier);
        graph.close(removed.lifecycle).map_err(|e| {
            ModuleError::execution(format!("unloading module '{}'", removed.identifier), e)
        })
    }

    /// Release every held module.
    ///
    /// Every entry is attempted; failures are returned together at the end.
    pub fn unload_all(&self, graph: &mut ModuleGraph) -> ModuleResult<()> {
        let mut errors = Vec::new();
        for entry in self.loaded_modules(graph) {
            if let Err(e) = self.unload(graph, &entry) {
                warn!("Failed to unload '{}': {}", entry.identifier, e);
                errors.push(e);
            }
        }
        ModuleError::collect(errors)
    }

    /// Held entries in node order.
    pub fn loaded_modules(&self, graph: &ModuleGraph) -> Vec<Entry> {
        let mut entries: Vec<Entry> = graph
            .manager(self.node)
            .map(|state| state.entries.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by_key(|entry| entry.reference);
        entries
    }

    /// The entry holding `reference`, if loaded.
    pub fn entry(&self, graph: &ModuleGraph, reference: NodeId) -> Option<Entry> {
        graph
            .manager(self.node)
            .ok()?
            .entries
            .get(&reference)
            .cloned()
    }

    pub fn is_loaded(&self, graph: &ModuleGraph, reference: NodeId) -> bool {
        self.entry(graph, reference).is_some()
    }
}

impl ModuleGraph {
    fn manager(&self, id: NodeId) -> ModuleResult<&ManagerState> {
        match &self.node(id)?.kind {
            NodeKind::Manager(state) => Ok(state),
            _ => Err(ModuleError::illegal(format!("Node {} is not a manager", id))),
        }
    }

    fn manager_mut(&mut self, id: NodeId) -> ModuleResult<&mut ManagerState> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Manager(state) => Ok(state),
            _ => Err(ModuleError::illegal(format!("Node {} is not a manager", id))),
        }
    }

    fn manager_load(&mut self, id: NodeId, identifier: &str) -> ModuleResult<Entry> {
        let (resolver, scope) = {
            let state = self.manager(id)?;
            (Rc::clone(&state.resolver), state.scope.clone())
        };

        let reference = resolver
            .resolve(self, &scope, identifier)?
            .ok_or_else(|| ModuleError::NotFound(identifier.to_string()))?;

        if let Some(prior) = self.manager(id)?.entries.get(&reference) {
            return Err(ModuleError::AlreadyLoaded(Box::new(prior.clone())));
        }

        let lifecycle = self.depend(reference, id)?;
        let entry = Entry {
            reference,
            lifecycle,
            identifier: identifier.to_string(),
        };
        self.manager_mut(id)?.entries.insert(reference, entry.clone());

        info!("Loaded module '{}' as {}", identifier, reference);
        Ok(entry)
    }

    /// Close every held lifecycle, then load each entry again by identifier.
    pub(crate) fn reevaluate_manager(&mut self, id: NodeId) -> ModuleResult<()> {
        let mut entries: Vec<Entry> = self
            .manager_mut(id)?
            .entries
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by_key(|entry| entry.reference);

        let mut errors = Vec::new();
        for entry in &entries {
            if self.is_closed(entry.lifecycle) {
                continue;
            }
            if let Err(e) = self.close(entry.lifecycle) {
                errors.push(ModuleError::execution(
                    format!("closing module '{}' for reload", entry.identifier),
                    e,
                ));
            }
        }

        for entry in entries {
            match self.manager_load(id, &entry.identifier) {
                Ok(_) => {}
                Err(ModuleError::NotFound(identifier)) => errors.push(ModuleError::execution(
                    format!("reloading module '{}'", identifier),
                    "module is no longer resolvable",
                )),
                Err(e) => errors.push(e),
            }
        }
        ModuleError::collect(errors)
    }
}
