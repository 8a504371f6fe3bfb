//! Boundary to the script compiler/executor.
//!
//! The graph never interprets script source itself. An engine turns source
//! text into an [`Artifact`]; the artifact is later evaluated against a
//! [`ScriptContext`] that injects `require` and the mutable module state.

use crate::error::BoxError;
use crate::script::ScriptContext;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// A compiler for script source.
pub trait ScriptEngine: Send + Sync {
    /// Compile `source`; `label` names the source in diagnostics.
    fn compile(&self, source: &str, label: &str) -> Result<Box<dyn Artifact>, BoxError>;

    /// Human-readable engine name (for logging).
    fn name(&self) -> &str {
        "engine"
    }
}

/// A compiled script, ready to be bound to an environment and evaluated.
pub trait Artifact {
    fn evaluate(&self, ctx: &mut ScriptContext<'_>) -> Result<(), BoxError>;
}

/// Artifact backed by a Rust closure.
pub struct FnArtifact<F>(F);

impl<F> FnArtifact<F>
where
    F: Fn(&mut ScriptContext<'_>) -> Result<(), BoxError>,
{
    pub fn new(body: F) -> Self {
        Self(body)
    }
}

impl<F> Artifact for FnArtifact<F>
where
    F: Fn(&mut ScriptContext<'_>) -> Result<(), BoxError>,
{
    fn evaluate(&self, ctx: &mut ScriptContext<'_>) -> Result<(), BoxError> {
        (self.0)(ctx)
    }
}

/// Shared, serialized access to a script engine.
///
/// Compilation mutates engine state, so every compile goes through one lock.
/// Clones share both the engine and the lock.
#[derive(Clone)]
pub struct CompileService {
    engine: Arc<dyn ScriptEngine>,
    lock: Arc<Mutex<()>>,
}

impl CompileService {
    pub fn new<E: ScriptEngine + 'static>(engine: E) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    pub fn from_arc(engine: Arc<dyn ScriptEngine>) -> Self {
        Self {
            engine,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Compile `source` while holding the engine lock.
    pub fn compile(&self, source: &str, label: &str) -> Result<Rc<dyn Artifact>, BoxError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("Compiling '{}' with {}", label, self.engine.name());
        self.engine.compile(source, label).map(Rc::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEngine {
        compiled: AtomicUsize,
    }

    impl ScriptEngine for CountingEngine {
        fn compile(&self, source: &str, _label: &str) -> Result<Box<dyn Artifact>, BoxError> {
            if source.is_empty() {
                return Err("empty source".into());
            }
            self.compiled.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FnArtifact::new(|_ctx| Ok(()))))
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_compile_service_is_shared_across_threads() {
        let engine = Arc::new(CountingEngine {
            compiled: AtomicUsize::new(0),
        });
        let service = CompileService::from_arc(engine.clone());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || {
                    service.compile("x", &format!("script-{i}")).is_ok()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(engine.compiled.load(Ordering::SeqCst), 4);
        assert_eq!(service.engine_name(), "counting");
    }

    #[test]
    fn test_compile_failure_is_returned() {
        let service = CompileService::new(CountingEngine {
            compiled: AtomicUsize::new(0),
        });
        assert!(service.compile("", "empty").is_err());
    }
}
