//! Runtime host
//!
//! Owns one [`ModuleGraph`] together with the two host registries and wires
//! the resolver chain for a root directory:
//!
//! ```text
//! manager ──> packages ──> add-on registry ──> system registry
//!         └─> files ─────> packages (for scripts)
//! ```

use crate::config::Config;
use anyhow::{Context, Result};
use modlink::{
    Chain, CompileService, DependencyManager, Entry, Export, FileSystemResolver, ModuleGraph,
    NamedRegistry, NodeId, NodeRole, PackageResolver, Resolver, ScriptEngine,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Resolvers and manager for the currently loaded root.
struct Wiring {
    root: PathBuf,
    files: Rc<FileSystemResolver>,
    packages: Rc<PackageResolver>,
    resolver: Rc<dyn Resolver>,
    manager: DependencyManager,
}

/// A module graph plus the host registries and the wiring for one root.
pub struct Runtime {
    config: Config,
    compiler: CompileService,
    graph: ModuleGraph,
    system: Rc<NamedRegistry>,
    addons: Rc<NamedRegistry>,
    wiring: Option<Wiring>,
}

impl Runtime {
    /// Create a runtime compiling scripts with `engine`.
    pub fn new<E: ScriptEngine + 'static>(config: Config, engine: E) -> Self {
        let system = Rc::new(NamedRegistry::new());
        let parent: Rc<dyn Resolver> = system.clone();
        let addons = Rc::new(NamedRegistry::with_parent(parent));

        Self {
            graph: ModuleGraph::with_options(config.runtime.graph_options()),
            compiler: CompileService::new(engine),
            config,
            system,
            addons,
            wiring: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ModuleGraph {
        &mut self.graph
    }

    /// Registry of host capabilities, consulted last.
    pub fn system(&self) -> &Rc<NamedRegistry> {
        &self.system
    }

    /// Registry of add-on modules, falling back to the system registry.
    pub fn addons(&self) -> &Rc<NamedRegistry> {
        &self.addons
    }

    /// The root currently wired, if any.
    pub fn root(&self) -> Option<&Path> {
        self.wiring.as_ref().map(|wiring| wiring.root.as_path())
    }

    pub fn is_loaded(&self) -> bool {
        self.wiring.is_some()
    }

    /// Wire the resolvers and manager for `root` without loading anything.
    ///
    /// The root's module-storage directory is created when missing. A root
    /// that is already wired is unloaded first.
    pub fn open(&mut self, root: impl AsRef<Path>) -> Result<()> {
        if self.wiring.is_some() {
            self.unload();
        }

        let root = root.as_ref();
        let module_dir = &self.config.runtime.module_dir;
        let storage = root.join(module_dir);
        if !storage.exists() {
            fs::create_dir_all(&storage).with_context(|| {
                format!("Failed to create module directory: {}", storage.display())
            })?;
            info!("Created module directory at: {}", storage.display());
        } else if !storage.is_dir() {
            anyhow::bail!(
                "{} within the root directory is not a directory: {}",
                module_dir,
                storage.display()
            );
        }

        let files = FileSystemResolver::new(
            root,
            self.config.resolution.clone(),
            self.compiler.clone(),
        );
        let addons: Rc<dyn Resolver> = self.addons.clone();
        let packages = Rc::new(
            PackageResolver::new(root, Rc::clone(&files))
                .with_module_dir(module_dir.clone())
                .with_downstream(addons),
        );
        let for_scripts: Rc<dyn Resolver> = packages.clone();
        files.set_downstream(&for_scripts);

        let from_files: Rc<dyn Resolver> = files.clone();
        let resolver: Rc<dyn Resolver> = Rc::new(Chain::new(for_scripts, Some(from_files)));
        let manager = DependencyManager::new(&mut self.graph, Rc::clone(&resolver), root);

        info!("Opened module root {}", root.display());
        self.wiring = Some(Wiring {
            root: root.to_path_buf(),
            files,
            packages,
            resolver,
            manager,
        });
        Ok(())
    }

    /// Wire `root` and load the configured loader module through the manager.
    pub fn load(&mut self, root: impl AsRef<Path>) -> Result<Entry> {
        self.open(root)?;

        let loader = self.config.runtime.loader.clone();
        let manager = self.manager()?;
        let entry = manager
            .load(&mut self.graph, &loader)
            .with_context(|| format!("Failed to load loader module '{}'", loader))?;
        info!("Loader '{}' running as {}", loader, entry.reference());
        Ok(entry)
    }

    /// Unload every held module and drop the wiring.
    ///
    /// Nodes the root's resolvers created are freed along with it. Unload
    /// failures are logged; the runtime is unwired either way.
    pub fn unload(&mut self) {
        let Some(wiring) = self.wiring.take() else {
            return;
        };

        if let Err(e) = wiring.manager.unload_all(&mut self.graph) {
            warn!(
                "Unloading {} left {} failure(s): {}",
                wiring.root.display(),
                e.failure_count(),
                e
            );
        }
        if let Err(e) = wiring.files.clear(&mut self.graph) {
            warn!("Releasing cached modules failed: {}", e);
        }
        if let Err(e) = self.graph.remove(wiring.manager.node()) {
            warn!("Manager for {} stayed in the graph: {}", wiring.root.display(), e);
        }
        info!("Unloaded module root {}", wiring.root.display());
    }

    /// The manager for the wired root.
    pub fn manager(&self) -> Result<DependencyManager> {
        self.wiring
            .as_ref()
            .map(|wiring| wiring.manager)
            .context("No module root is loaded")
    }

    /// Modules held by the manager.
    pub fn loaded_modules(&self) -> Vec<Entry> {
        match &self.wiring {
            Some(wiring) => wiring.manager.loaded_modules(&self.graph),
            None => Vec::new(),
        }
    }

    /// Names available in the root's module-storage directory.
    pub fn loadable_modules(&self) -> Result<BTreeSet<String>> {
        let wiring = self.wiring.as_ref().context("No module root is loaded")?;
        wiring
            .packages
            .loadable_modules()
            .with_context(|| format!("Failed to list {}", wiring.packages.storage_path().display()))
    }

    /// Resolve `identifier` from the root without holding it.
    pub fn resolve(&mut self, identifier: &str) -> Result<Option<NodeId>> {
        let wiring = self.wiring.as_ref().context("No module root is loaded")?;
        let resolver = Rc::clone(&wiring.resolver);
        let root = wiring.root.clone();
        resolver
            .resolve(&mut self.graph, &root, identifier)
            .with_context(|| format!("Failed to resolve '{}'", identifier))
    }

    /// Forget cached resolution for `path` so the next request reads it again.
    pub fn invalidate(&mut self, path: &Path) -> Result<bool> {
        let Some(wiring) = self.wiring.as_ref() else {
            return Ok(false);
        };
        wiring
            .files
            .invalidate(&mut self.graph, path)
            .with_context(|| format!("Failed to invalidate {}", path.display()))
    }

    /// Register a host capability under `label`.
    pub fn add_system(&mut self, label: &str, export: Export) -> Result<NodeId> {
        let node = self.graph.add_static(format!("system:{}", label), export);
        let added = self.system.add(&mut self.graph, label, node);
        self.discard_unregistered(label, node);
        added.with_context(|| format!("Failed to register system module '{}'", label))?;
        Ok(node)
    }

    /// Replace a host capability, reloading everything that used the old one.
    pub fn set_system(&mut self, label: &str, export: Export) -> Result<NodeId> {
        let node = self.graph.add_static(format!("system:{}", label), export);
        let replaced = self.system.set(&mut self.graph, label, node);
        self.discard_unregistered(label, node);
        replaced.with_context(|| format!("Failed to replace system module '{}'", label))?;
        Ok(node)
    }

    /// Drop a capability node the system registry refused.
    fn discard_unregistered(&mut self, label: &str, node: NodeId) {
        if self.system.lookup(label) != Some(node) && self.graph.remove(node).is_ok() {
            debug!("Discarded unregistered system module '{}'", label);
        }
    }

    /// Register or replace an add-on module, reloading its previous users.
    pub fn set_addon(&mut self, label: &str, dependency: NodeId) -> Result<()> {
        if !matches!(self.graph.role(dependency), Some(role) if role.is_dependency()) {
            anyhow::bail!("Node {} cannot back add-on '{}'", dependency, label);
        }
        self.addons
            .set(&mut self.graph, label, dependency)
            .with_context(|| format!("Failed to set add-on module '{}'", label))
    }

    /// One-line description of a node: role, label, and JSON for data modules.
    pub fn describe(&self, node: NodeId) -> String {
        let label = self.graph.label(node).unwrap_or("<unknown>");
        let role = self.graph.role(node).map_or("unknown", |role| role.as_str());
        let json = match self.graph.role(node) {
            Some(NodeRole::Static) => self
                .graph
                .static_export(node)
                .ok()
                .and_then(|export| export.as_json().map(|value| value.to_string())),
            _ => None,
        };

        match json {
            Some(json) => format!("{} {} {}", role, label, json),
            None => format!("{} {}", role, label),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modlink::NativeEngine;
    use tempfile::TempDir;

    fn runtime() -> Runtime {
        Runtime::new(Config::default(), NativeEngine::new())
    }

    #[test]
    fn test_open_creates_module_dir() {
        let temp = TempDir::new().unwrap();
        let mut runtime = runtime();

        runtime.open(temp.path()).unwrap();

        assert!(temp.path().join("node_modules").is_dir());
        assert_eq!(runtime.root(), Some(temp.path()));
        assert!(runtime.loadable_modules().unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_module_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("node_modules"), "not a directory").unwrap();
        let mut runtime = runtime();

        assert!(runtime.open(temp.path()).is_err());
        assert!(!runtime.is_loaded());
    }

    #[test]
    fn test_unwired_runtime() {
        let mut runtime = runtime();

        assert!(runtime.manager().is_err());
        assert!(runtime.loadable_modules().is_err());
        assert!(runtime.resolve("anything").is_err());
        assert!(runtime.loaded_modules().is_empty());
        runtime.unload();
    }

    #[test]
    fn test_describe_data_module() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("settings.json"), r#"{"debug":true}"#).unwrap();
        let mut runtime = runtime();
        runtime.open(temp.path()).unwrap();

        let node = runtime.resolve("./settings").unwrap().unwrap();
        let description = runtime.describe(node);

        assert!(description.starts_with("static "));
        assert!(description.ends_with(r#"{"debug":true}"#));
    }

    #[test]
    fn test_add_system_twice_fails() {
        let mut runtime = runtime();
        runtime.add_system("host", Export::empty()).unwrap();

        assert!(runtime.add_system("host", Export::empty()).is_err());
        assert!(runtime.system().has("host"));
    }

    #[test]
    fn test_set_addon_requires_dependency_node() {
        let mut runtime = runtime();
        let observer = runtime.graph_mut().add_observer("watcher");

        assert!(runtime.set_addon("watcher", observer).is_err());
        assert!(!runtime.addons().has("watcher"));
    }
}
