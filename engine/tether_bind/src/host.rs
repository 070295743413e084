//! Collaborator interfaces the engine consumes.
//!
//! The engine never parses source text and never knows what an object is.
//! A [`FunctionProvider`] turns source into [`CompiledFunction`]s, and a
//! [`Reflection`] layer reads properties and says how to observe them.

use std::rc::Rc;

use tether_ir::{NotifyIndex, ObjectId, PropertyIndex, SourceLocation, Value};

use crate::capture::CallContext;
use crate::context::ContextId;
use crate::guard::GuardId;
use crate::Engine;

/// Error raised by a compiled function.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Exception {
    pub message: String,
    /// Where it was thrown. Falls back to the function's own location.
    pub location: Option<SourceLocation>,
}

impl Exception {
    pub fn new(message: impl Into<String>) -> Self {
        Exception {
            message: message.into(),
            location: None,
        }
    }

    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

/// Opaque callable produced by a [`FunctionProvider`].
///
/// Every property read must go through `cx` so it is captured.
pub trait CompiledFunction {
    fn call(&self, cx: &mut CallContext<'_>, this: &Value, args: &[Value])
        -> Result<Value, Exception>;

    /// Source location, used for error reports and diagnostics.
    fn location(&self) -> SourceLocation {
        SourceLocation::unknown()
    }
}

/// Compiles source text against a scope.
pub trait FunctionProvider {
    fn compile(
        &self,
        source: &str,
        location: &SourceLocation,
        scope: ContextId,
    ) -> Result<Rc<dyn CompiledFunction>, Exception>;
}

/// Registration token handed to [`Reflection::observe`].
///
/// The host keeps it and passes it to [`Engine::fire_observed`] the next
/// time the property changes. Tokens are one-shot: a fired or stale token is
/// ignored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObserveSink {
    pub(crate) guard: GuardId,
    pub object: ObjectId,
    pub property: PropertyIndex,
}

/// Host object model.
pub trait Reflection {
    /// Current value of `object.property`.
    fn read(&self, object: ObjectId, property: PropertyIndex) -> Value;

    /// Change notification for `object.property`, or `None` when the
    /// property cannot be observed.
    fn notify_index(&self, object: ObjectId, property: PropertyIndex) -> Option<NotifyIndex>;

    /// Whether the property is observed through [`observe`](Self::observe)
    /// instead of a notify index.
    fn is_bindable_property(&self, _object: ObjectId, _property: PropertyIndex) -> bool {
        false
    }

    /// Register a one-shot observation for a bindable property.
    fn observe(&self, _object: ObjectId, _property: PropertyIndex, _sink: ObserveSink) {}

    /// Property with the given name, for scope lookups through a context
    /// object.
    fn property_by_name(&self, _object: ObjectId, _name: &str) -> Option<PropertyIndex> {
        None
    }

    /// Human readable `Class::property` used in diagnostics.
    fn describe_property(&self, object: ObjectId, property: PropertyIndex) -> String {
        format!("{object:?}::{}", property.0)
    }

    /// Value used as "this" for an expression whose scope object is `object`.
    fn resolve_this(&self, object: ObjectId) -> Value {
        Value::Object(object)
    }

    /// Write `object.property`. The host is responsible for announcing the
    /// change through `engine`. Returns `false` if the write was refused.
    fn write(
        &self,
        _engine: &Engine,
        _object: ObjectId,
        _property: PropertyIndex,
        _value: Value,
    ) -> bool {
        false
    }
}
