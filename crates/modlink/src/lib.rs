//! # modlink
//!
//! Embeddable module runtime: resolves string identifiers to loadable units,
//! links them into a live dependency graph with reference-counted
//! lifecycles, evaluates script-backed units against that graph and
//! propagates hot-reload invalidation when an upstream unit is replaced.
//!
//! This crate provides:
//! - The [`ModuleGraph`] arena with lifecycle and reevaluation operations
//! - Dependency kinds: static/data, script, package module, manager, observer
//! - Resolvers: named registry, filesystem, module-storage packages, chains
//! - The script engine boundary and a native (Rust entry point) engine
//!
//! ## Resolution
//!
//! Relative identifiers (`./a`, `../b`, `/c`) go to the filesystem resolver.
//! Bare identifiers (`lodash`) walk up through `node_modules` directories and
//! finally fall back to a named registry of host-supplied modules.
//!
//! ## Hot reload
//!
//! Replacing a registry entry with [`NamedRegistry::set`] reevaluates every
//! consumer of the old entry. Scripts forward the request to their own
//! consumers, package modules drop their upstream lifecycle, and managers
//! reload their root modules by identifier.

pub mod engine;
pub mod error;
pub mod export;
pub mod fs;
pub mod graph;
pub mod lifecycle;
pub mod manager;
pub mod modules;
pub mod native;
pub mod package;
pub mod registry;
pub mod resolver;
pub mod script;

pub use engine::{Artifact, CompileService, FnArtifact, ScriptEngine};
pub use error::{BoxError, ModuleError, ModuleResult};
pub use export::Export;
pub use fs::{FileSystemResolver, ResolverOptions};
pub use graph::{GraphOptions, ModuleGraph, NodeId, NodeRole, ObserverHook, Visited};
pub use lifecycle::{CloseHook, Lifecycle};
pub use manager::{DependencyManager, Entry};
pub use modules::{PackageResolver, DEFAULT_MODULE_DIR};
pub use native::{NativeCompileError, NativeEngine, NativeEntry};
pub use package::PackageModule;
pub use registry::NamedRegistry;
pub use resolver::{is_bare_identifier, is_relative_identifier, normalize_path, Chain, Resolver};
pub use script::{Generated, HookResult, LogLevel, ScriptContext, ScriptDependency, ScriptLogger};
