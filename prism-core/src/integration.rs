//! Render Integration Contract
//!
//! The core never talks to a UI framework directly. A framework adapter
//! implements [`RenderIntegration`] and registers itself on the context; from
//! then on the notification layer calls `update` for every ready
//! component-flavored subscription container whose observers changed.
//!
//! Component render targets are opaque to the core: they are carried around
//! as [`ComponentHandle`]s and only the integration knows what is inside.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::CoreError;

/// An opaque handle to one framework-side render target.
///
/// The core stores and compares these but never looks inside; the registered
/// [`RenderIntegration`] downcasts the handle back to its concrete type.
#[derive(Clone)]
pub struct ComponentHandle(Arc<dyn Any + Send + Sync>);

impl ComponentHandle {
    /// Wrap a framework-specific render target.
    pub fn new<T: Any + Send + Sync>(target: T) -> Self {
        Self(Arc::new(target))
    }

    /// Downcast the handle back to its concrete target type.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_ref().downcast_ref()
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentHandle").finish()
    }
}

/// Adapter contract between the reactive core and a render framework.
///
/// `bind` is called once when a component-flavored container is constructed
/// and reports whether the render target is already mounted (ready). `update`
/// is called by the deferred notification pass for every ready
/// component-flavored container, with the changed data restricted to the
/// sub-keys that actually changed.
pub trait RenderIntegration: Send + Sync {
    /// A short identifier for diagnostics.
    fn key(&self) -> &str;

    /// Wire a render target into the integration.
    ///
    /// Returns `true` if the target is immediately ready to receive updates.
    fn bind(&self, component: &ComponentHandle) -> Result<bool, CoreError>;

    /// Deliver changed values to a mounted render target.
    fn update(
        &self,
        component: &ComponentHandle,
        changed: &IndexMap<String, Value>,
    ) -> Result<(), CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_handle_downcasts_to_concrete_type() {
        let handle = ComponentHandle::new(String::from("my-component"));

        assert_eq!(
            handle.downcast_ref::<String>().map(String::as_str),
            Some("my-component")
        );
        assert!(handle.downcast_ref::<u32>().is_none());
    }

    #[test]
    fn component_handle_clone_shares_target() {
        let handle1 = ComponentHandle::new(42u32);
        let handle2 = handle1.clone();

        assert_eq!(handle2.downcast_ref::<u32>(), Some(&42));
    }
}
