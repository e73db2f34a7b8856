//! Opaque module export values.
//!
//! A module's export can be anything its factory produces: a JSON-like record,
//! a callable, or a host object. [`ModuleExport`] stores it behind an `Arc` so
//! the same instance can be handed to every consumer, and two exports can be
//! compared by identity with [`ModuleExport::ptr_eq`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

#[derive(Clone)]
pub struct ModuleExport(Arc<dyn Any + Send + Sync>);

impl ModuleExport {
    /// Wrap an arbitrary value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// The default export of a scope that never set one: an empty object.
    pub fn empty() -> Self {
        Self::json(Value::Object(Map::new()))
    }

    /// Wrap a JSON value.
    pub fn json(value: Value) -> Self {
        Self::new(value)
    }

    /// Wrap a callable taking and returning JSON values.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Value + Send + Sync + 'static,
    {
        let f: Arc<ExportFn> = Arc::new(f);
        Self::new(f)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// The JSON payload, if this export was built from one.
    pub fn as_json(&self) -> Option<&Value> {
        self.downcast_ref::<Value>()
    }

    /// Invoke the export as a function, if it was built with [`ModuleExport::function`].
    pub fn call(&self, args: &[Value]) -> Option<Value> {
        self.downcast_ref::<Arc<ExportFn>>().map(|f| f(args))
    }

    /// True if this is still the untouched empty-object default.
    pub fn is_empty_object(&self) -> bool {
        matches!(self.as_json(), Some(Value::Object(map)) if map.is_empty())
    }

    /// Identity comparison: true when both handles point at the same value.
    pub fn ptr_eq(&self, other: &ModuleExport) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Signature of callables stored by [`ModuleExport::function`].
pub type ExportFn = dyn Fn(&[Value]) -> Value + Send + Sync;

impl Default for ModuleExport {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Value> for ModuleExport {
    fn from(value: Value) -> Self {
        Self::json(value)
    }
}

impl fmt::Debug for ModuleExport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_json() {
            Some(value) => f.debug_tuple("ModuleExport").field(value).finish(),
            None if self.downcast_ref::<Arc<ExportFn>>().is_some() => {
                f.write_str("ModuleExport(<function>)")
            }
            None => f
                .debug_struct("ModuleExport")
                .field("type_id", &(*self.0).type_id())
                .finish(),
        }
    }
}
