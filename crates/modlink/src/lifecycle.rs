//! Lifecycle handles: one edge from a dependency to one of its consumers.

use crate::error::BoxError;
use crate::export::Export;
use crate::graph::NodeId;

/// Stable identity of a lifecycle inside a graph. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct LifecycleId(pub(crate) u64);

/// A capability binding one dependency to one consumer.
///
/// The handle is plain data: its state (export value, close hook) lives in
/// the [`ModuleGraph`](crate::ModuleGraph) and is discarded by
/// [`ModuleGraph::close`](crate::ModuleGraph::close). Exactly one close
/// succeeds; later closes and export reads fail with
/// [`ModuleError::IllegalUsage`](crate::ModuleError::IllegalUsage).
/// The parent dependency stays readable forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Lifecycle {
    pub(crate) id: LifecycleId,
    pub(crate) parent: NodeId,
    pub(crate) consumer: NodeId,
}

impl Lifecycle {
    /// The dependency this lifecycle was obtained from.
    pub fn parent(&self) -> NodeId {
        self.parent
    }
}

/// Callback run once when a lifecycle is closed.
pub type CloseHook = Box<dyn FnOnce() -> Result<(), BoxError>>;

/// Live state of an open lifecycle.
pub(crate) struct LifecycleState {
    pub(crate) export: Export,
    pub(crate) on_close: Option<CloseHook>,
}

impl LifecycleState {
    pub(crate) fn new(export: Export) -> Self {
        Self {
            export,
            on_close: None,
        }
    }

    pub(crate) fn with_close(export: Export, on_close: Option<CloseHook>) -> Self {
        Self { export, on_close }
    }
}
