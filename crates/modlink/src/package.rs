//! Logical package modules.
//!
//! A package module stands in for a directory: it is created unbound, bound
//! exactly once to the dependency the directory bootstraps to, and from then
//! on behaves like that dependency to everything upstream. It holds a single
//! upstream lifecycle on its target while it has consumers of its own.

use crate::error::{ModuleError, ModuleResult};
use crate::graph::{ModuleGraph, NodeId, NodeKind, NodeRole};
use crate::lifecycle::{Lifecycle, LifecycleState};
use tracing::debug;

/// Binding state of a package module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageModule {
    Unbound,
    Bound {
        target: NodeId,
        upstream: Option<Lifecycle>,
    },
}

impl ModuleGraph {
    /// Add an unbound package module.
    pub fn add_package(&mut self, label: impl Into<String>) -> NodeId {
        self.insert(label.into(), NodeKind::Package(PackageModule::Unbound))
    }

    /// Bind `package` to its internal target. Binding twice is illegal.
    ///
    /// The package keeps its target alive until the package itself is freed.
    pub fn bind_package(&mut self, package: NodeId, target: NodeId) -> ModuleResult<()> {
        if !self.role(target).is_some_and(|role| role.is_dependency()) {
            return Err(ModuleError::illegal(format!(
                "Package target {} is not a dependency",
                target
            )));
        }
        let node = self.node_mut(package)?;
        match &mut node.kind {
            NodeKind::Package(state @ PackageModule::Unbound) => {
                *state = PackageModule::Bound {
                    target,
                    upstream: None,
                };
                debug!("Bound package '{}' to {}", node.label, target);
                self.retain(target)
            }
            NodeKind::Package(PackageModule::Bound { .. }) => Err(ModuleError::illegal(format!(
                "Package '{}' is already bound",
                node.label
            ))),
            _ => Err(ModuleError::illegal(format!(
                "Node {} is not a package",
                package
            ))),
        }
    }

    /// The dependency a package is bound to, if any.
    pub fn package_target(&self, package: NodeId) -> Option<NodeId> {
        match self.nodes_kind(package)? {
            NodeKind::Package(PackageModule::Bound { target, .. }) => Some(*target),
            _ => None,
        }
    }

    fn nodes_kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).ok().map(|node| &node.kind)
    }

    fn package_mut(&mut self, id: NodeId) -> ModuleResult<&mut PackageModule> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Package(package) => Ok(package),
            _ => Err(ModuleError::illegal(format!("Node {} is not a package", id))),
        }
    }

    /// Export for a new consumer, acquiring the upstream lifecycle on first use.
    pub(crate) fn package_lifecycle_state(&mut self, id: NodeId) -> ModuleResult<LifecycleState> {
        let state = *self.package_mut(id)?;
        let (target, upstream) = match state {
            PackageModule::Bound { target, upstream } => (target, upstream),
            PackageModule::Unbound => {
                return Err(ModuleError::illegal(format!(
                    "Package '{}' was depended on before being bound",
                    self.node(id)?.label
                )))
            }
        };

        let upstream = match upstream {
            Some(lifecycle) => lifecycle,
            None => {
                let lifecycle = self.depend(target, id)?;
                if let PackageModule::Bound { upstream, .. } = self.package_mut(id)? {
                    *upstream = Some(lifecycle);
                }
                lifecycle
            }
        };
        Ok(LifecycleState::new(self.exports(upstream)?))
    }

    /// Release one consumer; the last one out releases the upstream lifecycle.
    pub(crate) fn release_package(&mut self, lifecycle: Lifecycle) -> ModuleResult<()> {
        let id = lifecycle.parent;
        self.unlink(lifecycle);
        if self.node(id)?.dependents.is_empty() {
            self.detach_package(id)
        } else {
            Ok(())
        }
    }

    /// Close the upstream lifecycle if one is held.
    ///
    /// Failures are reported to the target when it is a script and returned
    /// otherwise.
    pub(crate) fn detach_package(&mut self, id: NodeId) -> ModuleResult<()> {
        let (target, upstream) = match self.package_mut(id)? {
            PackageModule::Bound { target, upstream } => (*target, upstream.take()),
            PackageModule::Unbound => return Ok(()),
        };
        let Some(upstream) = upstream else {
            return Ok(());
        };
        if self.is_closed(upstream) {
            return Ok(());
        }

        debug!("Detaching package '{}' from {}", self.node(id)?.label, target);
        match self.close(upstream) {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = ModuleError::execution("closing the package upstream lifecycle", e);
                if self.role(target) == Some(NodeRole::Script) {
                    self.report(target, err)
                } else {
                    Err(err)
                }
            }
        }
    }
}
