//! Filesystem-backed resolution of relative identifiers.
//!
//! Relative identifiers (`./x`, `../x`, `/x`) are joined onto the request
//! scope's directory and normalized. The target then resolves as:
//!
//! 1. a directory: bootstrapped into a package module (descriptor `main`,
//!    then `index.<script>`, then `index.<data>`)
//! 2. a script file: compiled into a script dependency
//! 3. a data file: parsed into a static JSON export
//! 4. anything else: probed with the script extension, then the data extension
//!
//! Every outcome, including a miss, is cached per normalized path so the
//! same file always maps to the same node. Cached nodes are retained in the
//! graph until their entry is invalidated or the cache is cleared.

use crate::engine::CompileService;
use crate::error::{ModuleError, ModuleResult};
use crate::export::Export;
use crate::graph::{ModuleGraph, NodeId};
use crate::resolver::{is_relative_identifier, normalize_path, Chain, Resolver};
use crate::script::ScriptDependency;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use tracing::debug;

/// File naming conventions used during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Extension of script files, without the dot.
    pub script_extension: String,

    /// Extension of structured data files, without the dot.
    pub data_extension: String,

    /// File name of a package descriptor inside a directory.
    pub package_descriptor: String,

    /// Stem of a directory's conventional entry file.
    pub index_name: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            script_extension: "js".to_string(),
            data_extension: "json".to_string(),
            package_descriptor: "package.json".to_string(),
            index_name: "index".to_string(),
        }
    }
}

/// Resolves relative identifiers against the filesystem.
pub struct FileSystemResolver {
    root: PathBuf,
    options: ResolverOptions,
    compiler: CompileService,
    cache: RefCell<HashMap<PathBuf, Option<NodeId>>>,
    downstream: RefCell<Option<Weak<dyn Resolver>>>,
    this: Weak<FileSystemResolver>,
}

impl FileSystemResolver {
    pub fn new(
        root: impl Into<PathBuf>,
        options: ResolverOptions,
        compiler: CompileService,
    ) -> Rc<Self> {
        let root = normalize_path(&root.into());
        Rc::new_cyclic(|this| Self {
            root,
            options,
            compiler,
            cache: RefCell::new(HashMap::new()),
            downstream: RefCell::new(None),
            this: this.clone(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Resolver that scripts fall back to for identifiers this resolver
    /// declines. Held weakly; applies to scripts compiled afterwards.
    pub fn set_downstream(&self, downstream: &Rc<dyn Resolver>) {
        *self.downstream.borrow_mut() = Some(Rc::downgrade(downstream));
    }

    /// Forget the cached outcome for `path`, so the next request probes the
    /// filesystem again. Returns whether an entry was dropped.
    pub fn invalidate(&self, graph: &mut ModuleGraph, path: &Path) -> ModuleResult<bool> {
        let removed = self.cache.borrow_mut().remove(&normalize_path(path));
        match removed {
            Some(Some(node)) => {
                debug!("Invalidated {} ({})", path.display(), node);
                graph.release(node)?;
                Ok(true)
            }
            Some(None) => Ok(true),
            None => Ok(false),
        }
    }

    /// Drop every cached outcome and release the nodes it kept alive.
    pub fn clear(&self, graph: &mut ModuleGraph) -> ModuleResult<()> {
        let cached: Vec<NodeId> = self
            .cache
            .borrow_mut()
            .drain()
            .filter_map(|(_, node)| node)
            .collect();
        let errors = cached
            .into_iter()
            .filter_map(|node| graph.release(node).err())
            .collect();
        ModuleError::collect(errors)
    }

    /// Resolve an already-normalized target path.
    pub(crate) fn resolve_path(
        &self,
        graph: &mut ModuleGraph,
        target: &Path,
    ) -> ModuleResult<Option<NodeId>> {
        let cached = self.cache.borrow().get(target).copied();
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let resolved = if target.is_dir() {
            self.bootstrap_directory(graph, target)?
        } else if self.has_extension(target, &self.options.script_extension) {
            self.load_script(graph, target)?
        } else if self.has_extension(target, &self.options.data_extension) {
            self.load_data(graph, target)?
        } else {
            let script = with_extension(target, &self.options.script_extension);
            match self.resolve_path(graph, &script)? {
                Some(found) => Some(found),
                None => {
                    let data = with_extension(target, &self.options.data_extension);
                    self.resolve_path(graph, &data)?
                }
            }
        };

        if let Some(node) = resolved {
            graph.retain(node)?;
        }
        let previous = self
            .cache
            .borrow_mut()
            .insert(target.to_path_buf(), resolved);
        if let Some(Some(previous)) = previous {
            graph.release(previous)?;
        }
        Ok(resolved)
    }

    fn has_extension(&self, path: &Path, extension: &str) -> bool {
        path.extension().is_some_and(|ext| ext == extension)
    }

    fn label_for(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => path.display().to_string(),
        }
    }

    fn script_resolver(&self) -> ModuleResult<Rc<dyn Resolver>> {
        let this: Rc<dyn Resolver> = self
            .this
            .upgrade()
            .ok_or_else(|| ModuleError::illegal("Filesystem resolver is no longer alive"))?;
        let downstream = self.downstream.borrow().as_ref().and_then(Weak::upgrade);
        Ok(Rc::new(Chain::new(this, downstream)))
    }

    fn load_script(&self, graph: &mut ModuleGraph, path: &Path) -> ModuleResult<Option<NodeId>> {
        if !path.is_file() {
            return Ok(None);
        }
        let source = fs::read_to_string(path)?;
        let label = self.label_for(path);
        let artifact = self
            .compiler
            .compile(&source, &label)
            .map_err(|e| ModuleError::compilation(path, e))?;

        let default_logger = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| label.clone());
        let script = ScriptDependency::new(
            artifact,
            path,
            Some(self.script_resolver()?),
            default_logger,
        );
        let node = graph.add_script(label, script);
        debug!("Compiled script {} from {:?}", node, path);
        Ok(Some(node))
    }

    fn load_data(&self, graph: &mut ModuleGraph, path: &Path) -> ModuleResult<Option<NodeId>> {
        if !path.is_file() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        let value: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| ModuleError::compilation(path, e))?;
        let node = graph.add_static(self.label_for(path), Export::json(value));
        debug!("Loaded data {} from {:?}", node, path);
        Ok(Some(node))
    }

    /// Turn a directory into a package module, or `None` if it has no entry point.
    fn bootstrap_directory(
        &self,
        graph: &mut ModuleGraph,
        directory: &Path,
    ) -> ModuleResult<Option<NodeId>> {
        let descriptor_path = directory.join(&self.options.package_descriptor);
        if let Some(descriptor) = self.resolve_path(graph, &descriptor_path)? {
            if let Some(main) = self.read_main(graph, descriptor)? {
                let main_path = normalize_path(&directory.join(&main));
                let target = if main_path == directory {
                    None
                } else {
                    self.resolve_path(graph, &main_path)?
                };
                let target = target.ok_or_else(|| {
                    ModuleError::NotFound(format!(
                        "'{}' does not exist in the scope of {}",
                        main,
                        descriptor_path.display()
                    ))
                })?;
                return self.bind_directory(graph, directory, target).map(Some);
            }
        }

        for extension in [&self.options.script_extension, &self.options.data_extension] {
            let index = directory.join(format!("{}.{}", self.options.index_name, extension));
            if let Some(target) = self.resolve_path(graph, &index)? {
                return self.bind_directory(graph, directory, target).map(Some);
            }
        }

        debug!("Directory {:?} is not a module", directory);
        Ok(None)
    }

    fn bind_directory(
        &self,
        graph: &mut ModuleGraph,
        directory: &Path,
        target: NodeId,
    ) -> ModuleResult<NodeId> {
        let package = graph.add_package(self.label_for(directory));
        graph.bind_package(package, target)?;
        debug!("Bootstrapped {:?} as package {} -> {}", directory, package, target);
        Ok(package)
    }

    fn read_main(&self, graph: &ModuleGraph, descriptor: NodeId) -> ModuleResult<Option<String>> {
        let export = graph.static_export(descriptor)?;
        Ok(export
            .as_json()
            .and_then(|value| value.get("main"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string))
    }

    fn scope_directory(scope: &Path) -> ModuleResult<PathBuf> {
        if !scope.exists() {
            return Err(ModuleError::illegal(format!(
                "Request scope '{}' does not exist",
                scope.display()
            )));
        }
        if scope.is_dir() {
            return Ok(scope.to_path_buf());
        }
        scope
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                ModuleError::illegal(format!("Scope '{}' has no parent", scope.display()))
            })
    }
}

fn with_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

impl Resolver for FileSystemResolver {
    fn resolve(
        &self,
        graph: &mut ModuleGraph,
        scope: &Path,
        identifier: &str,
    ) -> ModuleResult<Option<NodeId>> {
        let directory = Self::scope_directory(scope)?;
        if !is_relative_identifier(identifier) {
            return Ok(None);
        }
        let target = normalize_path(&directory.join(identifier));
        debug!("Resolving '{}' from {:?} to {:?}", identifier, scope, target);
        self.resolve_path(graph, &target)
    }

    fn name(&self) -> &str {
        "filesystem"
    }
}
