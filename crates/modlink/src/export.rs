//! Opaque export values handed out through lifecycles.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// A type-erased, cheaply clonable export value.
///
/// Clones share the same underlying object, so identity survives any number
/// of hand-offs between dependencies and consumers.
#[derive(Clone)]
pub struct Export(Rc<dyn Any>);

impl Export {
    /// Wrap a value.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// The placeholder export of a module that never assigned one.
    pub fn empty() -> Self {
        Self(Rc::new(()))
    }

    /// Wrap parsed structured data.
    pub fn json(value: serde_json::Value) -> Self {
        Self::new(value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is::<()>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Shared handle to the concrete value.
    pub fn downcast<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.0).downcast::<T>().ok()
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        self.downcast_ref::<serde_json::Value>()
    }

    /// Identity comparison: true when both handles point at the same object.
    pub fn ptr_eq(&self, other: &Export) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.0) as *const (),
            Rc::as_ptr(&other.0) as *const (),
        )
    }
}

impl Default for Export {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(value) = self.as_json() {
            write!(f, "Export({})", value)
        } else if let Some(text) = self.downcast_ref::<String>() {
            write!(f, "Export({:?})", text)
        } else if self.is_empty() {
            write!(f, "Export(<empty>)")
        } else {
            write!(f, "Export(<opaque>)")
        }
    }
}
