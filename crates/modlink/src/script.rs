//! Script-backed dependencies.
//!
//! A script is evaluated lazily, the first time a consumer depends on it.
//! Evaluation binds the compiled [`Artifact`] to a [`ScriptContext`] which
//! exposes two facilities:
//!
//! - `require(identifier)`: resolves through the script's resolver relative
//!   to its scope, depends on the result with the script as consumer, and
//!   returns the export
//! - the module state: `exports`, plus the optional `generator`, `disable`,
//!   `onError` hooks and a `loggerName` override
//!
//! The evaluation lives as long as the script has consumers. When the last
//! consumer detaches the `disable` hook runs, every lifecycle acquired via
//! `require` is closed and the module state is dropped; the next consumer
//! triggers a fresh evaluation.

use crate::engine::{Artifact, FnArtifact};
use crate::error::{BoxError, ModuleError, ModuleResult};
use crate::export::Export;
use crate::graph::{ModuleGraph, NodeId, NodeKind};
use crate::lifecycle::{CloseHook, Lifecycle, LifecycleState};
use crate::resolver::Resolver;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};

/// Result type of module hooks.
pub type HookResult<T = ()> = Result<T, BoxError>;

type GeneratorFn = Box<dyn FnMut() -> HookResult<Generated>>;
type DisableFn = Box<dyn FnMut() -> HookResult>;
type ErrorHandlerFn = Box<dyn FnMut(&ModuleError) -> HookResult>;

/// Per-consumer export produced by a module generator.
pub struct Generated {
    pub exports: Export,
    pub close: Option<CloseHook>,
}

impl Generated {
    pub fn new(exports: Export) -> Self {
        Self {
            exports,
            close: None,
        }
    }

    /// Run `close` when the consumer's lifecycle is closed.
    pub fn on_close<F>(mut self, close: F) -> Self
    where
        F: FnOnce() -> HookResult + 'static,
    {
        self.close = Some(Box::new(close));
        self
    }
}

/// Mutable module state populated by a script during evaluation.
#[derive(Default)]
pub(crate) struct ModuleState {
    exports: Export,
    generator: Option<GeneratorFn>,
    disable: Option<DisableFn>,
    on_error: Option<ErrorHandlerFn>,
    logger_name: Option<String>,
}

/// A dependency backed by a compiled script.
pub struct ScriptDependency {
    artifact: Rc<dyn Artifact>,
    scope: PathBuf,
    resolver: Option<Rc<dyn Resolver>>,
    default_logger: String,
    module: Option<Rc<RefCell<ModuleState>>>,
    requires: Vec<Lifecycle>,
    evaluating: bool,
    tearing_down: bool,
}

impl ScriptDependency {
    pub fn new(
        artifact: Rc<dyn Artifact>,
        scope: impl Into<PathBuf>,
        resolver: Option<Rc<dyn Resolver>>,
        default_logger: impl Into<String>,
    ) -> Self {
        Self {
            artifact,
            scope: scope.into(),
            resolver,
            default_logger: default_logger.into(),
            module: None,
            requires: Vec::new(),
            evaluating: false,
            tearing_down: false,
        }
    }

    /// Build a script whose body is a Rust closure.
    pub fn from_fn<F>(
        body: F,
        scope: impl Into<PathBuf>,
        resolver: Option<Rc<dyn Resolver>>,
        default_logger: impl Into<String>,
    ) -> Self
    where
        F: Fn(&mut ScriptContext<'_>) -> Result<(), BoxError> + 'static,
    {
        Self::new(
            Rc::new(FnArtifact::new(body)),
            scope,
            resolver,
            default_logger,
        )
    }

    /// Mid-evaluation or mid-teardown; such a script is never reset or freed.
    pub(crate) fn is_busy(&self) -> bool {
        self.evaluating || self.tearing_down
    }

    pub(crate) fn logger_name(&self) -> String {
        self.module
            .as_ref()
            .and_then(|m| m.borrow().logger_name.clone())
            .unwrap_or_else(|| self.default_logger.clone())
    }
}

/// Execution environment handed to an [`Artifact`] during evaluation.
pub struct ScriptContext<'g> {
    graph: &'g mut ModuleGraph,
    node: NodeId,
    scope: PathBuf,
    resolver: Option<Rc<dyn Resolver>>,
    module: Rc<RefCell<ModuleState>>,
}

impl ScriptContext<'_> {
    /// The script being evaluated.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn scope(&self) -> &Path {
        &self.scope
    }

    /// Resolve `identifier` against this script's scope, depend on it and
    /// return its export.
    ///
    /// Failures of any kind surface as [`ModuleError::Resolution`] naming
    /// the identifier.
    pub fn require(&mut self, identifier: &str) -> ModuleResult<Export> {
        let resolver = self.resolver.clone().ok_or_else(|| {
            ModuleError::resolution(
                identifier,
                Some(ModuleError::illegal("script has no resolver")),
            )
        })?;

        let dependency = resolver
            .resolve(self.graph, &self.scope, identifier)
            .map_err(|e| ModuleError::resolution(identifier, Some(e)))?
            .ok_or_else(|| ModuleError::resolution(identifier, None))?;

        let lifecycle = self
            .graph
            .depend(dependency, self.node)
            .map_err(|e| ModuleError::resolution(identifier, Some(e)))?;

        let script = self.graph.script_mut(self.node)?;
        if !script.requires.contains(&lifecycle) {
            script.requires.push(lifecycle);
        }

        debug!("Script {} required '{}'", self.node, identifier);
        self.graph.exports(lifecycle)
    }

    /// The current `module.exports` value.
    pub fn exports(&self) -> Export {
        self.module.borrow().exports.clone()
    }

    pub fn set_exports(&mut self, exports: Export) {
        self.module.borrow_mut().exports = exports;
    }

    /// Produce a fresh export (and optional close callback) per consumer
    /// instead of sharing `exports`.
    pub fn set_generator<F>(&mut self, generator: F)
    where
        F: FnMut() -> HookResult<Generated> + 'static,
    {
        self.module.borrow_mut().generator = Some(Box::new(generator));
    }

    /// Run when the last consumer detaches.
    pub fn set_disable<F>(&mut self, disable: F)
    where
        F: FnMut() -> HookResult + 'static,
    {
        self.module.borrow_mut().disable = Some(Box::new(disable));
    }

    /// Receive failures reported against this module.
    pub fn set_on_error<F>(&mut self, on_error: F)
    where
        F: FnMut(&ModuleError) -> HookResult + 'static,
    {
        self.module.borrow_mut().on_error = Some(Box::new(on_error));
    }

    pub fn set_logger_name(&mut self, name: impl Into<String>) {
        self.module.borrow_mut().logger_name = Some(name.into());
    }

    /// Logger bound to the module's current logger name.
    pub fn logger(&self) -> ScriptLogger {
        let name = self
            .module
            .borrow()
            .logger_name
            .clone()
            .unwrap_or_else(|| self.graph.logger_name(self.node));
        ScriptLogger::new(name)
    }
}

/// Log level for script logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger a script writes through, tagged with its logger name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLogger {
    name: String,
}

impl ScriptLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(logger = %self.name, "{}", message),
            LogLevel::Debug => tracing::debug!(logger = %self.name, "{}", message),
            LogLevel::Info => tracing::info!(logger = %self.name, "{}", message),
            LogLevel::Warn => tracing::warn!(logger = %self.name, "{}", message),
            LogLevel::Error => tracing::error!(logger = %self.name, "{}", message),
        }
    }
}

impl ModuleGraph {
    /// Add a script-backed dependency.
    pub fn add_script(&mut self, label: impl Into<String>, script: ScriptDependency) -> NodeId {
        self.insert(label.into(), NodeKind::Script(Box::new(script)))
    }

    /// Whether the script currently holds an evaluated module state.
    pub fn is_evaluated(&self, id: NodeId) -> bool {
        matches!(
            self.node(id).map(|n| &n.kind),
            Ok(NodeKind::Script(script)) if script.module.is_some()
        )
    }

    pub(crate) fn script(&self, id: NodeId) -> ModuleResult<&ScriptDependency> {
        match &self.node(id)?.kind {
            NodeKind::Script(script) => Ok(script),
            _ => Err(ModuleError::illegal(format!("Node {} is not a script", id))),
        }
    }

    pub(crate) fn script_mut(&mut self, id: NodeId) -> ModuleResult<&mut ScriptDependency> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Script(script) => Ok(script),
            _ => Err(ModuleError::illegal(format!("Node {} is not a script", id))),
        }
    }

    /// Evaluate the script if it has no live module state yet.
    fn ensure_evaluated(&mut self, id: NodeId) -> ModuleResult<Rc<RefCell<ModuleState>>> {
        let script = self.script(id)?;
        if let Some(module) = &script.module {
            return Ok(Rc::clone(module));
        }

        let artifact = Rc::clone(&script.artifact);
        let scope = script.scope.clone();
        let resolver = script.resolver.clone();
        let module = Rc::new(RefCell::new(ModuleState::default()));

        // Installed before evaluation so require cycles observe the partial module.
        {
            let script = self.script_mut(id)?;
            script.module = Some(Rc::clone(&module));
            script.evaluating = true;
        }
        debug!("Evaluating script '{}'", self.node(id)?.label);

        let mut ctx = ScriptContext {
            graph: &mut *self,
            node: id,
            scope,
            resolver,
            module: Rc::clone(&module),
        };
        let evaluated = artifact.evaluate(&mut ctx);
        self.script_mut(id)?.evaluating = false;

        if let Err(e) = evaluated {
            self.abandon_evaluation(id);
            return Err(ModuleError::execution("executing script", e));
        }
        Ok(module)
    }

    /// Undo a failed evaluation: release partial requires and forget the state.
    fn abandon_evaluation(&mut self, id: NodeId) {
        let requires = match self.script_mut(id) {
            Ok(script) => {
                script.module = None;
                std::mem::take(&mut script.requires)
            }
            Err(_) => return,
        };
        for lifecycle in requires {
            if let Err(e) = self.close(lifecycle) {
                warn!("Failed to release dependency of failed script {}: {}", id, e);
            }
        }
    }

    /// Lifecycle state for a new consumer: generator output or the shared exports.
    pub(crate) fn script_lifecycle_state(&mut self, id: NodeId) -> ModuleResult<LifecycleState> {
        let module = self.ensure_evaluated(id)?;
        let generated = {
            let mut state = module.borrow_mut();
            state.generator.as_mut().map(|generator| generator())
        };

        match generated {
            None => {
                let exports = module.borrow().exports.clone();
                Ok(LifecycleState::new(exports))
            }
            Some(Ok(generated)) => Ok(LifecycleState::with_close(
                generated.exports,
                generated.close,
            )),
            Some(Err(e)) => {
                let err = ModuleError::execution("running the module generator", e);
                if self.node(id)?.dependents.is_empty() {
                    if let Err(teardown) = self.disable_script(id) {
                        warn!("Failed to tear down script {}: {}", id, teardown);
                    }
                }
                Err(err)
            }
        }
    }

    /// Release one consumer of a script.
    pub(crate) fn release_script(
        &mut self,
        lifecycle: Lifecycle,
        on_close: Option<CloseHook>,
    ) -> ModuleResult<()> {
        let id = lifecycle.parent;
        let mut errors = Vec::new();

        if let Some(close) = on_close {
            if let Err(e) = close() {
                let err = ModuleError::execution("closing the script lifecycle", e);
                if let Err(unreported) = self.report(id, err) {
                    errors.push(unreported);
                }
            }
        }

        self.unlink(lifecycle);

        if self.node(id)?.dependents.is_empty() {
            if let Err(e) = self.disable_script(id) {
                errors.push(e);
            }
        }
        ModuleError::collect(errors)
    }

    /// Last consumer gone: run `disable`, close every required lifecycle,
    /// drop the module state.
    fn disable_script(&mut self, id: NodeId) -> ModuleResult<()> {
        let script = self.script_mut(id)?;
        // A cycle member may lose its last consumer while it is still running.
        if script.is_busy() {
            return Ok(());
        }
        let Some(module) = script.module.clone() else {
            return Ok(());
        };
        script.tearing_down = true;
        debug!("Disabling script {}", id);

        let mut errors = Vec::new();

        let disabled = module.borrow_mut().disable.as_mut().map(|disable| disable());
        if let Some(Err(e)) = disabled {
            let err = ModuleError::execution("disabling the module", e);
            if let Err(unreported) = self.report(id, err) {
                errors.push(unreported);
            }
        }

        let requires = std::mem::take(&mut self.script_mut(id)?.requires);
        for lifecycle in requires {
            if self.is_closed(lifecycle) {
                continue;
            }
            if let Err(e) = self.close(lifecycle) {
                let err = ModuleError::execution("closing a required dependency lifecycle", e);
                if let Err(unreported) = self.report(id, err) {
                    errors.push(unreported);
                }
            }
        }

        let script = self.script_mut(id)?;
        script.module = None;
        script.tearing_down = false;
        ModuleError::collect(errors)
    }

    /// Hand `error` to the script's `onError` hook.
    ///
    /// `None` when `id` is not an evaluated script or defines no handler.
    pub(crate) fn report_to_script(
        &mut self,
        id: NodeId,
        error: &ModuleError,
    ) -> Option<HookResult> {
        let module = match &self.node(id).ok()?.kind {
            NodeKind::Script(script) => script.module.clone()?,
            _ => return None,
        };
        let mut state = module.borrow_mut();
        let handled = state.on_error.as_mut().map(|handler| handler(error));
        handled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NamedRegistry;
    use std::cell::Cell;

    fn registry_with(graph: &mut ModuleGraph, label: &str, export: Export) -> Rc<NamedRegistry> {
        let registry = Rc::new(NamedRegistry::new());
        let dep = graph.add_static(label, export);
        registry.add(graph, label, dep).unwrap();
        registry
    }

    #[test]
    fn test_require_injection_returns_dependency_exports() {
        let mut graph = ModuleGraph::new();
        let registry = registry_with(&mut graph, "test", Export::new(String::from("3")));

        let script = graph.add_script(
            "require",
            ScriptDependency::from_fn(
                |ctx| {
                    let value = ctx.require("test")?;
                    ctx.set_exports(value);
                    Ok(())
                },
                "/",
                Some(registry),
                "require",
            ),
        );
        let consumer = graph.add_observer("consumer");

        let lifecycle = graph.depend(script, consumer).unwrap();
        let exports = graph.exports(lifecycle).unwrap();

        assert_eq!(exports.downcast_ref::<String>(), Some(&String::from("3")));
        assert_eq!(graph.dependencies(script).len(), 1);
    }

    #[test]
    fn test_evaluation_is_lazy_and_memoized() {
        let mut graph = ModuleGraph::new();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let script = graph.add_script(
            "lazy",
            ScriptDependency::from_fn(
                move |_ctx| {
                    counter.set(counter.get() + 1);
                    Ok(())
                },
                "/",
                None,
                "lazy",
            ),
        );
        let a = graph.add_observer("a");
        let b = graph.add_observer("b");

        assert!(!graph.is_evaluated(script));
        graph.depend(script, a).unwrap();
        graph.depend(script, b).unwrap();

        assert!(graph.is_evaluated(script));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_module_exports_shared_between_consumers() {
        let mut graph = ModuleGraph::new();
        let script = graph.add_script(
            "exports",
            ScriptDependency::from_fn(
                |ctx| {
                    ctx.set_exports(Export::new(String::from("value")));
                    Ok(())
                },
                "/",
                None,
                "exports",
            ),
        );
        let a = graph.add_observer("a");
        let b = graph.add_observer("b");

        let la = graph.depend(script, a).unwrap();
        let lb = graph.depend(script, b).unwrap();

        assert!(graph
            .exports(la)
            .unwrap()
            .ptr_eq(&graph.exports(lb).unwrap()));
    }

    #[test]
    fn test_generator_overrides_exports_and_closes() {
        let mut graph = ModuleGraph::new();
        let closed = Rc::new(Cell::new(0));
        let closes = Rc::clone(&closed);
        let script = graph.add_script(
            "generator",
            ScriptDependency::from_fn(
                move |ctx| {
                    ctx.set_exports(Export::new(String::from("ignore me")));
                    let closes = Rc::clone(&closes);
                    ctx.set_generator(move || {
                        let closes = Rc::clone(&closes);
                        Ok(Generated::new(Export::new(String::from("value")))
                            .on_close(move || {
                                closes.set(closes.get() + 1);
                                Ok(())
                            }))
                    });
                    Ok(())
                },
                "/",
                None,
                "generator",
            ),
        );
        let a = graph.add_observer("a");
        let b = graph.add_observer("b");

        let la = graph.depend(script, a).unwrap();
        let lb = graph.depend(script, b).unwrap();
        let ea = graph.exports(la).unwrap();

        assert_eq!(ea.downcast_ref::<String>(), Some(&String::from("value")));
        assert!(!ea.ptr_eq(&graph.exports(lb).unwrap()));
        assert_eq!(closed.get(), 0);

        graph.close(la).unwrap();
        assert_eq!(closed.get(), 1);
        graph.close(lb).unwrap();
        assert_eq!(closed.get(), 2);
    }

    #[test]
    fn test_disable_runs_when_last_consumer_leaves() {
        let mut graph = ModuleGraph::new();
        let registry = registry_with(&mut graph, "test", Export::empty());
        let disabled = Rc::new(Cell::new(0));
        let hits = Rc::clone(&disabled);
        let script = graph.add_script(
            "disable",
            ScriptDependency::from_fn(
                move |ctx| {
                    ctx.require("test")?;
                    let hits = Rc::clone(&hits);
                    ctx.set_disable(move || {
                        hits.set(hits.get() + 1);
                        Ok(())
                    });
                    Ok(())
                },
                "/",
                Some(registry.clone()),
                "disable",
            ),
        );
        let test_dep = registry.lookup("test").unwrap();
        let c1 = graph.add_observer("c1");
        let c2 = graph.add_observer("c2");

        let l1 = graph.depend(script, c1).unwrap();
        let l2 = graph.depend(script, c2).unwrap();
        assert_eq!(graph.dependents(test_dep), vec![script]);

        graph.close(l1).unwrap();
        assert_eq!(disabled.get(), 0);

        graph.close(l2).unwrap();
        assert_eq!(disabled.get(), 1);
        assert!(graph.dependents(test_dep).is_empty());
        assert!(!graph.is_evaluated(script));
    }

    #[test]
    fn test_failing_teardown_hooks_are_reported_once_each() {
        let mut graph = ModuleGraph::new();
        let reported = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = Rc::clone(&reported);
        let script = graph.add_script(
            "exceptional",
            ScriptDependency::from_fn(
                move |ctx| {
                    ctx.set_generator(|| {
                        Ok(Generated::new(Export::empty()).on_close(|| Err("close failed".into())))
                    });
                    ctx.set_disable(|| Err("disable failed".into()));
                    let sink = Rc::clone(&sink);
                    ctx.set_on_error(move |err| {
                        sink.borrow_mut().push(err.to_string());
                        Ok(())
                    });
                    Ok(())
                },
                "/",
                None,
                "exceptional",
            ),
        );
        let consumer = graph.add_observer("consumer");
        let lifecycle = graph.depend(script, consumer).unwrap();

        graph.close(lifecycle).unwrap();

        let reported = reported.borrow();
        assert_eq!(reported.len(), 2);
        assert!(reported[0].contains("closing the script lifecycle"));
        assert!(reported[1].contains("disabling the module"));
    }

    #[test]
    fn test_failing_error_handler_is_logged_by_default() {
        let mut graph = ModuleGraph::new();
        let script = graph.add_script(
            "on-error",
            ScriptDependency::from_fn(
                |ctx| {
                    ctx.set_generator(|| {
                        Ok(Generated::new(Export::empty()).on_close(|| Err("close failed".into())))
                    });
                    ctx.set_on_error(|_| Err("handler failed".into()));
                    Ok(())
                },
                "/",
                None,
                "logger1",
            ),
        );
        let consumer = graph.add_observer("consumer");
        let lifecycle = graph.depend(script, consumer).unwrap();

        assert!(graph.close(lifecycle).is_ok());
        assert!(graph.is_closed(lifecycle));
    }

    #[test]
    fn test_failing_error_handler_propagates_in_strict_mode() {
        let mut graph = ModuleGraph::with_options(crate::GraphOptions {
            strict_reports: true,
            ..Default::default()
        });
        let script = graph.add_script(
            "on-error",
            ScriptDependency::from_fn(
                |ctx| {
                    ctx.set_generator(|| {
                        Ok(Generated::new(Export::empty()).on_close(|| Err("close failed".into())))
                    });
                    ctx.set_on_error(|_| Err("handler failed".into()));
                    Ok(())
                },
                "/",
                None,
                "strict",
            ),
        );
        let consumer = graph.add_observer("consumer");
        let lifecycle = graph.depend(script, consumer).unwrap();

        let err = graph.close(lifecycle).unwrap_err();

        assert!(err.to_string().contains("handling a reported module error"));
        // teardown still completed
        assert!(graph.dependents(script).is_empty());
        assert!(!graph.is_evaluated(script));
    }

    #[test]
    fn test_logger_name_override_is_read_late() {
        let mut graph = ModuleGraph::new();
        let script = graph.add_script(
            "named",
            ScriptDependency::from_fn(
                |ctx| {
                    assert_eq!(ctx.logger().name(), "default.js");
                    ctx.set_logger_name("custom");
                    assert_eq!(ctx.logger().name(), "custom");
                    Ok(())
                },
                "/",
                None,
                "default.js",
            ),
        );
        assert_eq!(graph.logger_name(script), "default.js");

        let consumer = graph.add_observer("consumer");
        graph.depend(script, consumer).unwrap();

        assert_eq!(graph.logger_name(script), "custom");
    }

    #[test]
    fn test_missing_require_is_catchable_resolution_error() {
        let mut graph = ModuleGraph::new();
        let registry = Rc::new(NamedRegistry::new());
        let seen = Rc::new(RefCell::new(None));
        let slot = Rc::clone(&seen);
        let script = graph.add_script(
            "missing",
            ScriptDependency::from_fn(
                move |ctx| {
                    match ctx.require("absent") {
                        Err(ModuleError::Resolution { identifier, source }) => {
                            *slot.borrow_mut() = Some((identifier, source.is_none()));
                        }
                        other => panic!("unexpected: {:?}", other),
                    }
                    Ok(())
                },
                "/",
                Some(registry),
                "missing",
            ),
        );
        let consumer = graph.add_observer("consumer");

        graph.depend(script, consumer).unwrap();

        assert_eq!(*seen.borrow(), Some((String::from("absent"), true)));
    }

    #[test]
    fn test_failed_evaluation_releases_partial_requires() {
        let mut graph = ModuleGraph::new();
        let registry = registry_with(&mut graph, "test", Export::empty());
        let test_dep = registry.lookup("test").unwrap();
        let script = graph.add_script(
            "broken",
            ScriptDependency::from_fn(
                |ctx| {
                    ctx.require("test")?;
                    Err("script blew up".into())
                },
                "/",
                Some(registry),
                "broken",
            ),
        );
        let consumer = graph.add_observer("consumer");

        let err = graph.depend(script, consumer).unwrap_err();

        assert!(matches!(
            err,
            ModuleError::Execution { ref phase, .. } if phase == "executing script"
        ));
        assert!(graph.dependents(test_dep).is_empty());
        assert!(graph.dependents(script).is_empty());
        assert!(!graph.is_evaluated(script));
    }

    #[test]
    fn test_redepend_after_disable_reevaluates() {
        let mut graph = ModuleGraph::new();
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let script = graph.add_script(
            "again",
            ScriptDependency::from_fn(
                move |_ctx| {
                    counter.set(counter.get() + 1);
                    Ok(())
                },
                "/",
                None,
                "again",
            ),
        );
        let consumer = graph.add_observer("consumer");

        let first = graph.depend(script, consumer).unwrap();
        graph.close(first).unwrap();
        graph.depend(script, consumer).unwrap();

        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_cycle_member_survives_failing_partner() {
        let mut graph = ModuleGraph::new();
        let registry = Rc::new(NamedRegistry::new());
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let a = graph.add_script(
            "a",
            ScriptDependency::from_fn(
                move |ctx| {
                    counter.set(counter.get() + 1);
                    assert_eq!(ctx.scope(), Path::new("/lib"));
                    // b requires a back, then fails
                    assert!(ctx.require("b").is_err());
                    ctx.set_exports(Export::new(counter.get()));
                    Ok(())
                },
                "/lib",
                Some(registry.clone()),
                "a",
            ),
        );
        let b = graph.add_script(
            "b",
            ScriptDependency::from_fn(
                |ctx| {
                    ctx.require("a")?;
                    Err("b fails".into())
                },
                "/lib",
                Some(registry.clone()),
                "b",
            ),
        );
        registry.add(&mut graph, "a", a).unwrap();
        registry.add(&mut graph, "b", b).unwrap();
        let c1 = graph.add_observer("c1");
        let c2 = graph.add_observer("c2");

        let first = graph.depend(a, c1).unwrap();
        let second = graph.depend(a, c2).unwrap();

        assert_eq!(runs.get(), 1);
        assert!(graph.is_evaluated(a));
        assert!(!graph.is_evaluated(b));
        assert!(graph
            .exports(first)
            .unwrap()
            .ptr_eq(&graph.exports(second).unwrap()));
        assert_eq!(graph.dependents(a), vec![c1, c2]);
        assert!(graph.dependents(b).is_empty());
        assert!(graph.dependencies(a).is_empty());
    }
}
