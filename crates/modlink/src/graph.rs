//! The module graph arena.
//!
//! Every dependency and every consumer is a node owned by a [`ModuleGraph`]
//! and addressed by a [`NodeId`]. Edges are [`Lifecycle`] handles: a
//! dependency keeps one lifecycle per consumer, and a consumer remembers the
//! lifecycles it holds.
//!
//! ```text
//!   consumer ──depend()──▶ dependency
//!      ▲                       │
//!      └──── reevaluate() ◀────┘   (cascade along dependents)
//! ```
//!
//! Node kinds:
//!
//! - **Static**: host capability or parsed data with a fixed export
//! - **Script**: lazily evaluated script artifact (see [`crate::script`])
//! - **Package**: logical module proxying one bound target (see [`crate::package`])
//! - **Manager**: root holder of loaded modules (see [`crate::manager`])
//! - **Observer**: host-supplied consumer that records reevaluation requests

use crate::error::{BoxError, ModuleError, ModuleResult};
use crate::export::Export;
use crate::lifecycle::{Lifecycle, LifecycleId, LifecycleState};
use crate::manager::ManagerState;
use crate::package::PackageModule;
use crate::script::ScriptDependency;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, error};

/// Handle to a node in a [`ModuleGraph`].
///
/// Slots are reused once a node is freed; the generation tells a stale
/// handle apart from the node now living in its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.generation == 0 {
            write!(f, "#{}", self.index)
        } else {
            write!(f, "#{}v{}", self.index, self.generation)
        }
    }
}

/// Consumers already visited by a reevaluation cascade.
pub type Visited = HashSet<NodeId>;

/// Hook run when an observer is asked to reevaluate.
pub type ObserverHook = Box<dyn FnMut() -> Result<(), BoxError>>;

/// What a node is, for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Static,
    Script,
    Package,
    Manager,
    Observer,
}

impl NodeRole {
    /// Whether consumers can `depend()` on nodes of this role.
    pub fn is_dependency(&self) -> bool {
        matches!(self, NodeRole::Static | NodeRole::Script | NodeRole::Package)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Static => "static",
            NodeRole::Script => "script",
            NodeRole::Package => "package",
            NodeRole::Manager => "manager",
            NodeRole::Observer => "observer",
        }
    }
}

/// Graph-wide behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptions {
    /// Return failures of `onError` handlers to the caller instead of logging them.
    pub strict_reports: bool,

    /// Deepest dependent chain a reevaluation cascade may walk.
    pub max_cascade_depth: usize,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            strict_reports: false,
            max_cascade_depth: 512,
        }
    }
}

pub(crate) struct Node {
    pub(crate) label: String,
    /// Consumer -> the lifecycle it holds on this node.
    pub(crate) dependents: HashMap<NodeId, Lifecycle>,
    /// Lifecycles this node holds as a consumer.
    pub(crate) held: Vec<Lifecycle>,
    pub(crate) kind: NodeKind,
    /// Owner references taken with [`ModuleGraph::retain`].
    pins: usize,
    /// Set by the first `retain`; only owned nodes are collected.
    owned: bool,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

pub(crate) enum NodeKind {
    Static(Export),
    Script(Box<ScriptDependency>),
    Package(PackageModule),
    Manager(ManagerState),
    Observer(Observer),
}

impl NodeKind {
    fn role(&self) -> NodeRole {
        match self {
            NodeKind::Static(_) => NodeRole::Static,
            NodeKind::Script(_) => NodeRole::Script,
            NodeKind::Package(_) => NodeRole::Package,
            NodeKind::Manager(_) => NodeRole::Manager,
            NodeKind::Observer(_) => NodeRole::Observer,
        }
    }
}

pub(crate) struct Observer {
    reevaluations: usize,
    hook: Option<ObserverHook>,
}

/// Arena owning every dependency, consumer and open lifecycle.
///
/// The graph is single-threaded: hosts that load modules from several
/// threads serialize access themselves.
///
/// Nodes that an owner (a registry, a resolver cache, a bound package) has
/// retained are freed once the last owner releases them and no lifecycle
/// touches them any more. Nodes nobody ever retained live until
/// [`ModuleGraph::remove`].
pub struct ModuleGraph {
    slots: Vec<Slot>,
    free: Vec<usize>,
    lifecycles: HashMap<LifecycleId, LifecycleState>,
    next_lifecycle: u64,
    options: GraphOptions,
}

impl ModuleGraph {
    /// Create an empty graph with default options.
    pub fn new() -> Self {
        Self::with_options(GraphOptions::default())
    }

    pub fn with_options(options: GraphOptions) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            lifecycles: HashMap::new(),
            next_lifecycle: 0,
            options,
        }
    }

    pub fn options(&self) -> &GraphOptions {
        &self.options
    }

    /// Add a dependency with a fixed export (host capability or parsed data).
    pub fn add_static(&mut self, label: impl Into<String>, export: Export) -> NodeId {
        self.insert(label.into(), NodeKind::Static(export))
    }

    /// Add a consumer that only records reevaluation requests.
    pub fn add_observer(&mut self, label: impl Into<String>) -> NodeId {
        self.insert(
            label.into(),
            NodeKind::Observer(Observer {
                reevaluations: 0,
                hook: None,
            }),
        )
    }

    /// Add a consumer that runs `hook` on every reevaluation request.
    pub fn add_observer_with<F>(&mut self, label: impl Into<String>, hook: F) -> NodeId
    where
        F: FnMut() -> Result<(), BoxError> + 'static,
    {
        self.insert(
            label.into(),
            NodeKind::Observer(Observer {
                reevaluations: 0,
                hook: Some(Box::new(hook)),
            }),
        )
    }

    pub(crate) fn insert(&mut self, label: String, kind: NodeKind) -> NodeId {
        let node = Node {
            label,
            dependents: HashMap::new(),
            held: Vec::new(),
            kind,
            pins: 0,
            owned: false,
        };
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        if let Some(node) = self.live(id) {
            debug!("Added {} node {} '{}'", node.kind.role().as_str(), id, node.label);
        }
        id
    }

    fn live(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    pub(crate) fn node(&self, id: NodeId) -> ModuleResult<&Node> {
        self.live(id)
            .ok_or_else(|| ModuleError::illegal(format!("Unknown node {}", id)))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> ModuleResult<&mut Node> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or_else(|| ModuleError::illegal(format!("Unknown node {}", id)))
    }

    /// Whether `id` still names a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.live(id).is_some()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.live(id).map(|n| n.label.as_str())
    }

    pub fn role(&self, id: NodeId) -> Option<NodeRole> {
        self.live(id).map(|n| n.kind.role())
    }

    fn role_of(&self, id: NodeId) -> ModuleResult<NodeRole> {
        Ok(self.node(id)?.kind.role())
    }

    /// Number of lifecycles currently open across the whole graph.
    pub fn open_lifecycles(&self) -> usize {
        self.lifecycles.len()
    }

    // ------------------------------------------------------------------
    // Dependency side
    // ------------------------------------------------------------------

    /// Start (or look up) the relationship between `dependency` and `consumer`.
    ///
    /// Calling this twice for the same pair returns the same lifecycle.
    /// Script dependencies are evaluated on first use.
    pub fn depend(&mut self, dependency: NodeId, consumer: NodeId) -> ModuleResult<Lifecycle> {
        self.node(consumer)?;
        if let Some(existing) = self.node(dependency)?.dependents.get(&consumer) {
            return Ok(*existing);
        }

        let state = match self.role_of(dependency)? {
            NodeRole::Static => match &self.node(dependency)?.kind {
                NodeKind::Static(export) => LifecycleState::new(export.clone()),
                _ => unreachable!("role and kind disagree"),
            },
            NodeRole::Script => self.script_lifecycle_state(dependency)?,
            NodeRole::Package => self.package_lifecycle_state(dependency)?,
            role => {
                return Err(ModuleError::illegal(format!(
                    "'{}' is a {} and cannot be depended on",
                    self.node(dependency)?.label,
                    role.as_str()
                )))
            }
        };

        // Evaluation may have linked the same pair re-entrantly (require cycles).
        if let Some(existing) = self.node(dependency)?.dependents.get(&consumer) {
            return Ok(*existing);
        }

        let lifecycle = Lifecycle {
            id: LifecycleId(self.next_lifecycle),
            parent: dependency,
            consumer,
        };
        self.next_lifecycle += 1;
        self.lifecycles.insert(lifecycle.id, state);
        self.node_mut(dependency)?.dependents.insert(consumer, lifecycle);
        self.node_mut(consumer)?.held.push(lifecycle);

        debug!(
            "Linked '{}' -> '{}'",
            self.node(consumer)?.label,
            self.node(dependency)?.label
        );
        Ok(lifecycle)
    }

    /// Snapshot of the consumers currently depending on `id`, in id order.
    pub fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        let mut dependents: Vec<NodeId> = self
            .live(id)
            .map(|n| n.dependents.keys().copied().collect())
            .unwrap_or_default();
        dependents.sort();
        dependents
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// The export bound to an open lifecycle.
    pub fn exports(&self, lifecycle: Lifecycle) -> ModuleResult<Export> {
        self.lifecycles
            .get(&lifecycle.id)
            .map(|state| state.export.clone())
            .ok_or_else(|| ModuleError::illegal("Dependency lifecycle was already closed"))
    }

    /// The fixed export of a static node.
    pub fn static_export(&self, id: NodeId) -> ModuleResult<Export> {
        match &self.node(id)?.kind {
            NodeKind::Static(export) => Ok(export.clone()),
            _ => Err(ModuleError::illegal(format!("Node {} has no static export", id))),
        }
    }

    pub fn is_closed(&self, lifecycle: Lifecycle) -> bool {
        !self.lifecycles.contains_key(&lifecycle.id)
    }

    /// Close a lifecycle, releasing the consumer's slot on its dependency.
    ///
    /// A second close fails with `IllegalUsage`. Release work (generator
    /// close, disable hooks, upstream teardown) always runs to completion;
    /// failures that could not be reported come back as errors.
    pub fn close(&mut self, lifecycle: Lifecycle) -> ModuleResult<()> {
        let state = self
            .lifecycles
            .remove(&lifecycle.id)
            .ok_or_else(|| ModuleError::illegal("Dependency lifecycle was already closed"))?;

        if let Ok(consumer) = self.node_mut(lifecycle.consumer) {
            consumer.held.retain(|held| held.id != lifecycle.id);
        }

        debug!(
            "Closing lifecycle {:?} on '{}'",
            lifecycle.id,
            self.node(lifecycle.parent)?.label
        );

        let released = match self.role_of(lifecycle.parent)? {
            NodeRole::Script => self.release_script(lifecycle, state.on_close),
            NodeRole::Package => self.release_package(lifecycle),
            _ => {
                self.unlink(lifecycle);
                Ok(())
            }
        };
        self.collect(lifecycle.parent);
        self.collect(lifecycle.consumer);
        released
    }

    /// Remove the consumer's slot on the lifecycle's dependency.
    pub(crate) fn unlink(&mut self, lifecycle: Lifecycle) {
        if let Ok(parent) = self.node_mut(lifecycle.parent) {
            if parent
                .dependents
                .get(&lifecycle.consumer)
                .is_some_and(|current| current.id == lifecycle.id)
            {
                parent.dependents.remove(&lifecycle.consumer);
            }
        }
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Take an owner reference on `id`.
    ///
    /// A retained node is freed once every owner has released it and no
    /// lifecycle runs through it.
    pub fn retain(&mut self, id: NodeId) -> ModuleResult<()> {
        let node = self.node_mut(id)?;
        node.pins += 1;
        node.owned = true;
        Ok(())
    }

    /// Drop an owner reference taken with [`ModuleGraph::retain`].
    pub fn release(&mut self, id: NodeId) -> ModuleResult<()> {
        let node = self.node_mut(id)?;
        if node.pins == 0 {
            return Err(ModuleError::illegal(format!(
                "Node '{}' was released more often than retained",
                node.label
            )));
        }
        node.pins -= 1;
        self.collect(id);
        Ok(())
    }

    /// Free a node that nothing uses, retained or not.
    pub fn remove(&mut self, id: NodeId) -> ModuleResult<()> {
        if !self.is_unused(id)? {
            return Err(ModuleError::illegal(format!(
                "Node '{}' is still in use",
                self.node(id)?.label
            )));
        }
        self.free_node(id);
        Ok(())
    }

    fn is_unused(&self, id: NodeId) -> ModuleResult<bool> {
        let node = self.node(id)?;
        let busy = matches!(&node.kind, NodeKind::Script(script) if script.is_busy());
        Ok(node.pins == 0 && node.dependents.is_empty() && node.held.is_empty() && !busy)
    }

    /// Free `id` if it is owned and nothing references it any more.
    pub(crate) fn collect(&mut self, id: NodeId) {
        let owned = self.live(id).is_some_and(|node| node.owned);
        if owned && self.is_unused(id).unwrap_or(false) {
            self.free_node(id);
        }
    }

    fn free_node(&mut self, id: NodeId) {
        let Some(slot) = self
            .slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
        else {
            return;
        };
        let Some(node) = slot.node.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        debug!("Freed {} node {} '{}'", node.kind.role().as_str(), id, node.label);

        if let NodeKind::Package(PackageModule::Bound { target, .. }) = node.kind {
            if let Err(e) = self.release(target) {
                error!(package = %node.label, error = %e, "Could not release package target");
            }
        }
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Dependencies `id` currently holds open lifecycles on, in id order.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut dependencies: Vec<NodeId> = self
            .live(id)
            .map(|n| n.held.iter().map(|l| l.parent).collect())
            .unwrap_or_default();
        dependencies.sort();
        dependencies.dedup();
        dependencies
    }

    /// Ask a consumer to reevaluate its dependencies and cascade to its own
    /// dependents. Nodes already in `visited` are skipped.
    pub fn reevaluate(&mut self, id: NodeId, visited: &mut Visited) -> ModuleResult<()> {
        self.reevaluate_at(id, visited, 0)
    }

    /// Start a fresh cascade over every current dependent of `id`.
    ///
    /// Each dependent is attempted even when an earlier one fails; failures
    /// are returned together.
    pub fn reevaluate_dependents(&mut self, id: NodeId) -> ModuleResult<()> {
        let mut visited = Visited::new();
        let mut errors = Vec::new();
        for dependent in self.dependents(id) {
            // An earlier dependent's reload may have freed this one.
            if !self.contains(dependent) {
                continue;
            }
            if let Err(e) = self.reevaluate_at(dependent, &mut visited, 0) {
                errors.push(e);
            }
        }
        ModuleError::collect(errors)
    }

    pub(crate) fn reevaluate_at(
        &mut self,
        id: NodeId,
        visited: &mut Visited,
        depth: usize,
    ) -> ModuleResult<()> {
        if depth > self.options.max_cascade_depth {
            return Err(ModuleError::CascadeTooDeep(self.options.max_cascade_depth));
        }
        let role = self.role_of(id)?;
        if !visited.insert(id) {
            return Ok(());
        }
        debug!("Reevaluating {} '{}'", role.as_str(), self.node(id)?.label);

        match role {
            NodeRole::Static => Ok(()),
            NodeRole::Script => self.forward_reevaluate(id, visited, depth),
            NodeRole::Package => {
                let detached = self.detach_package(id);
                let forwarded = self.forward_reevaluate(id, visited, depth);
                ModuleError::collect(detached.err().into_iter().chain(forwarded.err()).collect())
            }
            NodeRole::Manager => self.reevaluate_manager(id),
            NodeRole::Observer => self.reevaluate_observer(id),
        }
    }

    /// Forward a cascade to a snapshot of `id`'s dependents.
    pub(crate) fn forward_reevaluate(
        &mut self,
        id: NodeId,
        visited: &mut Visited,
        depth: usize,
    ) -> ModuleResult<()> {
        let mut errors = Vec::new();
        for dependent in self.dependents(id) {
            if !self.contains(dependent) {
                continue;
            }
            if let Err(e) = self.reevaluate_at(dependent, visited, depth + 1) {
                errors.push(e);
            }
        }
        ModuleError::collect(errors)
    }

    fn reevaluate_observer(&mut self, id: NodeId) -> ModuleResult<()> {
        let node = self.node_mut(id)?;
        let label = node.label.clone();
        if let NodeKind::Observer(observer) = &mut node.kind {
            observer.reevaluations += 1;
            if let Some(hook) = observer.hook.as_mut() {
                hook().map_err(|e| {
                    ModuleError::execution(format!("reevaluating observer '{}'", label), e)
                })?;
            }
        }
        Ok(())
    }

    /// How many reevaluation requests an observer has received.
    pub fn reevaluation_count(&self, id: NodeId) -> Option<usize> {
        match &self.live(id)?.kind {
            NodeKind::Observer(observer) => Some(observer.reevaluations),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Report a failure caused by `id`.
    ///
    /// Scripts hand the error to their `onError` hook first. When the hook
    /// itself fails, both failures are logged, or the hook's failure is
    /// returned if the graph runs with `strict_reports`. Everything else is
    /// logged under the node's logger name.
    pub fn report(&mut self, id: NodeId, error: ModuleError) -> ModuleResult<()> {
        if let Some(handled) = self.report_to_script(id, &error) {
            match handled {
                Ok(()) => return Ok(()),
                Err(secondary) => {
                    let secondary =
                        ModuleError::execution("handling a reported module error", secondary);
                    if self.options.strict_reports {
                        return Err(secondary);
                    }
                    self.log_reported(id, &secondary);
                }
            }
        }
        self.log_reported(id, &error);
        Ok(())
    }

    fn log_reported(&self, id: NodeId, error: &ModuleError) {
        error!(
            logger = %self.logger_name(id),
            error = %error,
            "An unhandled module error occurred"
        );
    }

    /// Name under which `id` logs: a script's override or default, else the node label.
    pub fn logger_name(&self, id: NodeId) -> String {
        match self.live(id) {
            Some(Node {
                kind: NodeKind::Script(script),
                ..
            }) => script.logger_name(),
            Some(node) => node.label.clone(),
            None => id.to_string(),
        }
    }
}

impl Default for ModuleGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_depend_twice_returns_same_lifecycle() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::new(3u32));
        let consumer = graph.add_observer("consumer");

        let first = graph.depend(dep, consumer).unwrap();
        let second = graph.depend(dep, consumer).unwrap();

        assert_eq!(first, second);
        assert_eq!(graph.open_lifecycles(), 1);
    }

    #[test]
    fn test_depend_distinct_consumers() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::new(3u32));
        let a = graph.add_observer("a");
        let b = graph.add_observer("b");

        let la = graph.depend(dep, a).unwrap();
        let lb = graph.depend(dep, b).unwrap();

        assert_ne!(la, lb);
        assert_eq!(graph.dependents(dep), vec![a, b]);
        assert!(graph
            .exports(la)
            .unwrap()
            .ptr_eq(&graph.exports(lb).unwrap()));
    }

    #[test]
    fn test_lifecycle_closes_exactly_once() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::new(String::from("3")));
        let consumer = graph.add_observer("consumer");
        let lifecycle = graph.depend(dep, consumer).unwrap();

        assert_eq!(
            graph.exports(lifecycle).unwrap().downcast_ref::<String>(),
            Some(&String::from("3"))
        );
        assert_eq!(lifecycle.parent(), dep);

        graph.close(lifecycle).unwrap();

        assert!(graph.is_closed(lifecycle));
        assert!(matches!(
            graph.close(lifecycle),
            Err(ModuleError::IllegalUsage(_))
        ));
        assert!(matches!(
            graph.exports(lifecycle),
            Err(ModuleError::IllegalUsage(_))
        ));
        assert_eq!(lifecycle.parent(), dep);
    }

    #[test]
    fn test_close_removes_dependent() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        let consumer = graph.add_observer("consumer");
        let lifecycle = graph.depend(dep, consumer).unwrap();

        assert_eq!(graph.dependents(dep), vec![consumer]);
        assert_eq!(graph.dependencies(consumer), vec![dep]);

        graph.close(lifecycle).unwrap();

        assert!(graph.dependents(dep).is_empty());
        assert!(graph.dependencies(consumer).is_empty());
    }

    #[test]
    fn test_redepend_after_close_creates_new_lifecycle() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        let consumer = graph.add_observer("consumer");

        let first = graph.depend(dep, consumer).unwrap();
        graph.close(first).unwrap();
        let second = graph.depend(dep, consumer).unwrap();

        assert_ne!(first, second);
        assert!(!graph.is_closed(second));
    }

    #[test]
    fn test_consumer_only_nodes_cannot_be_depended_on() {
        let mut graph = ModuleGraph::new();
        let observer = graph.add_observer("observer");
        let other = graph.add_observer("other");

        assert!(matches!(
            graph.depend(observer, other),
            Err(ModuleError::IllegalUsage(_))
        ));
    }

    #[test]
    fn test_unknown_node_is_illegal() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        assert!(matches!(
            graph.depend(
                dep,
                NodeId {
                    index: 42,
                    generation: 0
                }
            ),
            Err(ModuleError::IllegalUsage(_))
        ));
    }

    #[test]
    fn test_reevaluate_dependents_reaches_observers_once() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        let a = graph.add_observer("a");
        let b = graph.add_observer("b");
        graph.depend(dep, a).unwrap();
        graph.depend(dep, b).unwrap();

        graph.reevaluate_dependents(dep).unwrap();

        assert_eq!(graph.reevaluation_count(a), Some(1));
        assert_eq!(graph.reevaluation_count(b), Some(1));
    }

    #[test]
    fn test_reevaluate_skips_visited() {
        let mut graph = ModuleGraph::new();
        let observer = graph.add_observer("observer");
        let mut visited = Visited::new();

        graph.reevaluate(observer, &mut visited).unwrap();
        graph.reevaluate(observer, &mut visited).unwrap();

        assert_eq!(graph.reevaluation_count(observer), Some(1));
    }

    #[test]
    fn test_failing_observer_does_not_stop_cascade() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        let failing = graph.add_observer_with("failing", || Err("boom".into()));
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let healthy = graph.add_observer_with("healthy", move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        graph.depend(dep, failing).unwrap();
        graph.depend(dep, healthy).unwrap();

        let err = graph.reevaluate_dependents(dep).unwrap_err();

        assert!(matches!(err, ModuleError::Execution { .. }));
        assert!(err.to_string().contains("failing"));
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_report_on_static_logs() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        assert!(graph
            .report(dep, ModuleError::NotFound("x".to_string()))
            .is_ok());
        assert_eq!(graph.logger_name(dep), "dep");
    }

    /// A static source with `length` packages stacked on it and an observer
    /// on the topmost one.
    fn package_chain(graph: &mut ModuleGraph, length: usize) -> (NodeId, NodeId) {
        let source = graph.add_static("source", Export::empty());
        let mut top = source;
        for level in 0..length {
            let package = graph.add_package(format!("p{level}"));
            graph.bind_package(package, top).unwrap();
            top = package;
        }
        let observer = graph.add_observer("observer");
        graph.depend(top, observer).unwrap();
        (source, observer)
    }

    #[test]
    fn test_cascade_deeper_than_bound_fails() {
        let mut graph = ModuleGraph::with_options(GraphOptions {
            max_cascade_depth: 4,
            ..GraphOptions::default()
        });
        let (source, observer) = package_chain(&mut graph, 5);

        let err = graph.reevaluate_dependents(source).unwrap_err();

        assert!(matches!(err, ModuleError::CascadeTooDeep(4)));
        assert_eq!(graph.reevaluation_count(observer), Some(0));
    }

    #[test]
    fn test_cascade_at_bound_succeeds() {
        let mut graph = ModuleGraph::with_options(GraphOptions {
            max_cascade_depth: 4,
            ..GraphOptions::default()
        });
        let (source, observer) = package_chain(&mut graph, 4);

        graph.reevaluate_dependents(source).unwrap();

        assert_eq!(graph.reevaluation_count(observer), Some(1));
    }

    #[test]
    fn test_released_node_freed_after_last_lifecycle() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        let consumer = graph.add_observer("consumer");
        graph.retain(dep).unwrap();
        let lifecycle = graph.depend(dep, consumer).unwrap();

        graph.release(dep).unwrap();
        assert!(graph.contains(dep));

        graph.close(lifecycle).unwrap();
        assert!(!graph.contains(dep));
        assert_eq!(graph.len(), 1);

        let next = graph.add_static("next", Export::empty());
        assert_ne!(next, dep);
        assert_eq!(graph.label(next), Some("next"));
        assert_eq!(graph.label(dep), None);
        assert!(graph.dependents(dep).is_empty());
        assert!(matches!(
            graph.depend(dep, consumer),
            Err(ModuleError::IllegalUsage(_))
        ));
    }

    #[test]
    fn test_release_without_retain_is_illegal() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());

        assert!(matches!(
            graph.release(dep),
            Err(ModuleError::IllegalUsage(_))
        ));
        assert!(graph.contains(dep));
    }

    #[test]
    fn test_remove_refuses_nodes_in_use() {
        let mut graph = ModuleGraph::new();
        let dep = graph.add_static("dep", Export::empty());
        let consumer = graph.add_observer("consumer");
        let lifecycle = graph.depend(dep, consumer).unwrap();

        assert!(matches!(
            graph.remove(dep),
            Err(ModuleError::IllegalUsage(_))
        ));

        // never retained, so closing alone keeps it
        graph.close(lifecycle).unwrap();
        assert!(graph.contains(dep));

        graph.remove(dep).unwrap();
        graph.remove(consumer).unwrap();
        assert!(graph.is_empty());
    }
}
