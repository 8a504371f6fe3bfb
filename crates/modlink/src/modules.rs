//! Bare-identifier resolution through module-storage directories.
//!
//! A bare identifier such as `lodash` is looked up in `<dir>/node_modules`
//! for the request scope's directory and each ancestor up to the root.
//! Anything not found there goes to the downstream resolver.

use crate::error::ModuleResult;
use crate::fs::FileSystemResolver;
use crate::graph::{ModuleGraph, NodeId};
use crate::resolver::{is_bare_identifier, normalize_path, Resolver};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Default name of the module-storage directory.
pub const DEFAULT_MODULE_DIR: &str = "node_modules";

/// Resolves bare identifiers by walking up to the root.
pub struct PackageResolver {
    root: PathBuf,
    module_dir: String,
    files: Rc<FileSystemResolver>,
    downstream: Option<Rc<dyn Resolver>>,
}

impl PackageResolver {
    pub fn new(root: impl Into<PathBuf>, files: Rc<FileSystemResolver>) -> Self {
        Self {
            root: normalize_path(&root.into()),
            module_dir: DEFAULT_MODULE_DIR.to_string(),
            files,
            downstream: None,
        }
    }

    /// Use a different module-storage directory name.
    pub fn with_module_dir(mut self, module_dir: impl Into<String>) -> Self {
        self.module_dir = module_dir.into();
        self
    }

    /// Consult `downstream` when no module-storage directory has the module.
    pub fn with_downstream(mut self, downstream: Rc<dyn Resolver>) -> Self {
        self.downstream = Some(downstream);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn module_dir(&self) -> &str {
        &self.module_dir
    }

    /// The root's module-storage directory.
    pub fn storage_path(&self) -> PathBuf {
        self.root.join(&self.module_dir)
    }

    /// Names of the modules directly inside the root's module-storage
    /// directory. Script and data extensions are stripped; names that are
    /// not bare identifiers are skipped. Nothing is resolved or loaded.
    pub fn loadable_modules(&self) -> ModuleResult<BTreeSet<String>> {
        let storage = self.storage_path();
        let mut modules = BTreeSet::new();
        if !storage.is_dir() {
            return Ok(modules);
        }

        let options = self.files.options();
        for entry in fs::read_dir(&storage)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            let stem = [&options.script_extension, &options.data_extension]
                .iter()
                .find_map(|ext| name.strip_suffix(&format!(".{}", ext)))
                .unwrap_or(&name);
            if is_bare_identifier(stem) {
                modules.insert(stem.to_string());
            }
        }
        Ok(modules)
    }

    fn is_storage_dir(&self, dir: &Path) -> bool {
        dir.file_name().is_some_and(|name| name == self.module_dir.as_str())
    }

    fn search(
        &self,
        graph: &mut ModuleGraph,
        start: &Path,
        identifier: &str,
    ) -> ModuleResult<Option<NodeId>> {
        let relative = format!("./{}", identifier);
        let mut current = Some(start.to_path_buf());

        while let Some(dir) = current {
            // Packages are never resolved from inside a storage directory.
            if self.is_storage_dir(&dir) {
                current = dir.parent().map(Path::to_path_buf);
                continue;
            }

            let storage = dir.join(&self.module_dir);
            if storage.is_dir() {
                if let Some(found) = self.files.resolve(graph, &storage, &relative)? {
                    debug!("Resolved '{}' in {:?}", identifier, storage);
                    return Ok(Some(found));
                }
            }

            if dir == self.root {
                break;
            }
            current = dir.parent().map(Path::to_path_buf);
        }
        Ok(None)
    }
}

impl Resolver for PackageResolver {
    fn resolve(
        &self,
        graph: &mut ModuleGraph,
        scope: &Path,
        identifier: &str,
    ) -> ModuleResult<Option<NodeId>> {
        if is_bare_identifier(identifier) {
            let scope = normalize_path(scope);
            let start = if scope.is_dir() {
                scope
            } else {
                scope.parent().map(Path::to_path_buf).unwrap_or(scope)
            };
            if let Some(found) = self.search(graph, &start, identifier)? {
                return Ok(Some(found));
            }
        }

        match &self.downstream {
            Some(downstream) => downstream.resolve(graph, scope, identifier),
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "packages"
    }
}
