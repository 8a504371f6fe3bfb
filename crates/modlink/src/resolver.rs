//! Identifier resolution.
//!
//! A [`Resolver`] maps `(scope, identifier)` to a dependency node. A miss is
//! `Ok(None)` so fallback chains get a chance; only malformed input, I/O and
//! compile failures are errors.

use crate::error::ModuleResult;
use crate::graph::{ModuleGraph, NodeId};
use std::path::{Component, Path, PathBuf};
use std::rc::Rc;
use tracing::debug;

/// Resolves identifiers to dependencies within a scope.
pub trait Resolver {
    fn resolve(
        &self,
        graph: &mut ModuleGraph,
        scope: &Path,
        identifier: &str,
    ) -> ModuleResult<Option<NodeId>>;

    /// Name used in diagnostics.
    fn name(&self) -> &str {
        "resolver"
    }
}

/// Two-stage fallback: ask `primary`, then `fallback` on a miss.
pub struct Chain {
    primary: Rc<dyn Resolver>,
    fallback: Option<Rc<dyn Resolver>>,
}

impl Chain {
    pub fn new(primary: Rc<dyn Resolver>, fallback: Option<Rc<dyn Resolver>>) -> Self {
        Self { primary, fallback }
    }
}

impl Resolver for Chain {
    fn resolve(
        &self,
        graph: &mut ModuleGraph,
        scope: &Path,
        identifier: &str,
    ) -> ModuleResult<Option<NodeId>> {
        if let Some(found) = self.primary.resolve(graph, scope, identifier)? {
            return Ok(Some(found));
        }
        match &self.fallback {
            Some(fallback) => {
                debug!(
                    "'{}' missed in {}, trying {}",
                    identifier,
                    self.primary.name(),
                    fallback.name()
                );
                fallback.resolve(graph, scope, identifier)
            }
            None => Ok(None),
        }
    }

    fn name(&self) -> &str {
        "chain"
    }
}

/// Whether `identifier` is path syntax (`./`, `../` or `/` prefixed).
pub fn is_relative_identifier(identifier: &str) -> bool {
    identifier.starts_with("./") || identifier.starts_with("../") || identifier.starts_with('/')
}

/// Whether `identifier` is a bare module name: no separators, spaces or dots.
pub fn is_bare_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && !identifier
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ' ' | '.'))
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// `..` above the root is dropped.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Export;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MapResolver {
        entries: HashMap<String, NodeId>,
        calls: RefCell<usize>,
    }

    impl Resolver for MapResolver {
        fn resolve(
            &self,
            _graph: &mut ModuleGraph,
            _scope: &Path,
            identifier: &str,
        ) -> ModuleResult<Option<NodeId>> {
            *self.calls.borrow_mut() += 1;
            Ok(self.entries.get(identifier).copied())
        }
    }

    fn map(graph: &mut ModuleGraph, labels: &[&str]) -> Rc<MapResolver> {
        let entries = labels
            .iter()
            .map(|label| (label.to_string(), graph.add_static(*label, Export::empty())))
            .collect();
        Rc::new(MapResolver {
            entries,
            calls: RefCell::new(0),
        })
    }

    #[test]
    fn test_chain_prefers_primary() {
        let mut graph = ModuleGraph::new();
        let primary = map(&mut graph, &["a"]);
        let fallback = map(&mut graph, &["a", "b"]);
        let chain = Chain::new(primary.clone(), Some(fallback.clone()));

        let a = chain.resolve(&mut graph, Path::new("/"), "a").unwrap();
        assert_eq!(a, primary.entries.get("a").copied());
        assert_eq!(*fallback.calls.borrow(), 0);

        let b = chain.resolve(&mut graph, Path::new("/"), "b").unwrap();
        assert_eq!(b, fallback.entries.get("b").copied());

        assert_eq!(chain.resolve(&mut graph, Path::new("/"), "c").unwrap(), None);
    }

    #[test]
    fn test_chain_without_fallback() {
        let mut graph = ModuleGraph::new();
        let chain = Chain::new(map(&mut graph, &[]), None);
        assert_eq!(chain.resolve(&mut graph, Path::new("/"), "x").unwrap(), None);
        assert_eq!(chain.name(), "chain");
    }

    #[test]
    fn test_identifier_grammars() {
        assert!(is_relative_identifier("./a"));
        assert!(is_relative_identifier("../a"));
        assert!(is_relative_identifier("/abs/a"));
        assert!(!is_relative_identifier("a"));
        assert!(!is_relative_identifier(".hidden"));

        assert!(is_bare_identifier("lodash"));
        assert!(is_bare_identifier("my-module_2"));
        assert!(!is_bare_identifier(""));
        assert!(!is_bare_identifier("a/b"));
        assert!(!is_bare_identifier("a.js"));
        assert!(!is_bare_identifier("a b"));
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/root/a/./b/../c.js")),
            PathBuf::from("/root/a/c.js")
        );
        assert_eq!(normalize_path(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_path(Path::new("a/../../b")), PathBuf::from("../b"));
        assert_eq!(normalize_path(Path::new("../../b")), PathBuf::from("../../b"));
    }
}
