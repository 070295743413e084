//! The engine: shared state plus the host-facing change entry points.
//!
//! `Engine` is a cheap `Rc` handle. All state sits behind `RefCell`s in
//! [`EngineState`], and no borrow is ever held across a call into host or
//! user code (compiled functions, invalidation handlers, destruction
//! observers, warning callbacks). Anything those callbacks can touch is
//! addressed by generational handles and re-validated afterwards.
//!
//! Operations are split by concern across modules, each adding an
//! `impl Engine` block:
//! - `expression`: creation, evaluation, invalidation
//! - `context`: scope tree, names, objects
//! - `binding`: property bindings
//! - `creation`: construction batches

mod builder;
mod creation;

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use tether_diagnostic::{BindingError, DeferredErrorLog, WarningSink};
use tether_ir::{Arena, Handle, NotifyIndex, ObjectId, StringInterner, Value};

use crate::config::EngineConfig;
use crate::context::{ContextId, ContextNode};
use crate::error::{EngineError, EngineResult};
use crate::expression::{ExprId, ExpressionSlot};
use crate::guard::{DependencySource, GuardPool, PoolStats};
use crate::host::{FunctionProvider, ObserveSink, Reflection};

pub use builder::EngineBuilder;
pub use creation::CreationBatch;

/// Handle to a free-standing notifier.
pub type NotifierId = Handle<NotifierSlot>;

/// A change source that is not a host property.
#[derive(Debug)]
pub struct NotifierSlot {
    label: Rc<str>,
}

impl NotifierSlot {
    pub fn label(&self) -> &str {
        &self.label
    }
}

pub(crate) struct EngineState {
    pub(crate) config: EngineConfig,
    pub(crate) reflection: Rc<dyn Reflection>,
    pub(crate) provider: Option<Rc<dyn FunctionProvider>>,
    pub(crate) warnings: WarningSink,
    pub(crate) interner: StringInterner,
    pub(crate) global: Value,
    pub(crate) contexts: RefCell<Arena<ContextNode>>,
    pub(crate) expressions: RefCell<Arena<ExpressionSlot>>,
    pub(crate) guards: RefCell<GuardPool>,
    pub(crate) notifiers: RefCell<Arena<NotifierSlot>>,
    pub(crate) errors: RefCell<DeferredErrorLog<ExprId>>,
    /// Owning context of every installed object.
    pub(crate) object_contexts: RefCell<FxHashMap<ObjectId, ContextId>>,
    /// Objects installed into a context flagged by `begin_root_creation`,
    /// until the outermost construction batch ends.
    pub(crate) roots_in_creation: RefCell<FxHashSet<ObjectId>>,
}

/// Reactive binding engine.
///
/// Cloning is cheap and yields another handle to the same engine.
#[derive(Clone)]
pub struct Engine {
    state: Rc<EngineState>,
}

impl Engine {
    /// Start building an engine over a host object model.
    pub fn builder(reflection: Rc<dyn Reflection>) -> EngineBuilder {
        EngineBuilder::new(reflection)
    }

    #[inline]
    pub(crate) fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    pub fn reflection(&self) -> &dyn Reflection {
        &*self.state.reflection
    }

    pub fn interner(&self) -> &StringInterner {
        &self.state.interner
    }

    /// "This" value for expressions without a usable scope object.
    pub fn global_object(&self) -> &Value {
        &self.state.global
    }

    pub fn warnings(&self) -> &WarningSink {
        &self.state.warnings
    }

    /// Whether two handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Engine) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    pub fn guard_stats(&self) -> PoolStats {
        self.state.guards.borrow().stats()
    }

    /// Report an error through the warning channel, bypassing batching.
    pub(crate) fn report(&self, error: &BindingError) {
        self.state.warnings.report(error);
    }

    /// Defer `error` (owned by `expr`) to the open construction batch, or
    /// report it now if there is none.
    pub(crate) fn report_or_defer(&self, expr: ExprId, error: &BindingError) {
        let deferred = self.state.errors.borrow_mut().add_error(expr);
        if !deferred {
            self.report(error);
        }
    }

    // Notifiers

    pub fn create_notifier(&self, label: &str) -> NotifierId {
        self.state.notifiers.borrow_mut().insert(NotifierSlot {
            label: Rc::from(label),
        })
    }

    pub fn notifier_label(&self, id: NotifierId) -> Option<Rc<str>> {
        self.state
            .notifiers
            .borrow()
            .get(id)
            .map(|n| Rc::clone(&n.label))
    }

    /// Destroy a notifier. Guards connected to it detach and never fire.
    pub fn destroy_notifier(&self, id: NotifierId) -> EngineResult<()> {
        if self.state.notifiers.borrow_mut().remove(id).is_none() {
            return Err(EngineError::StaleNotifier(id));
        }
        let detached = self
            .state
            .guards
            .borrow_mut()
            .detach_source(&DependencySource::Notifier(id));
        tracing::debug!(notifier = ?id, detached, "notifier destroyed");
        Ok(())
    }

    /// Announce a change of a free-standing notifier. Returns the number of
    /// expressions invalidated.
    pub fn emit(&self, id: NotifierId) -> EngineResult<usize> {
        if !self.state.notifiers.borrow().contains(id) {
            return Err(EngineError::StaleNotifier(id));
        }
        Ok(self.deliver(DependencySource::Notifier(id)))
    }

    // Host change entry points

    /// Announce that the notification `notify` of `object` fired. Returns the
    /// number of expressions invalidated.
    pub fn notify_property(&self, object: ObjectId, notify: NotifyIndex) -> usize {
        self.deliver(DependencySource::Property { object, notify })
    }

    /// Callback target for a bindable-property observation registered
    /// through [`Reflection::observe`]. Returns whether an expression was
    /// invalidated.
    pub fn fire_observed(&self, sink: ObserveSink) -> bool {
        let source = DependencySource::Bindable {
            object: sink.object,
            property: sink.property,
        };
        let owner = self.state.guards.borrow_mut().take_observed(sink.guard, &source);
        match owner {
            Some(expr) => {
                self.invalidate_expression(expr);
                true
            }
            None => false,
        }
    }

    /// The host destroyed `object`.
    ///
    /// Guards on its properties detach, expressions using it as scope object
    /// are destroyed, and it leaves its owning context.
    pub fn object_destroyed(&self, object: ObjectId) {
        let detached = self.state.guards.borrow_mut().detach_object(object);

        let doomed: Vec<ExprId> = self
            .state
            .expressions
            .borrow()
            .iter()
            .filter(|(_, slot)| slot.scope_object == Some(object))
            .map(|(id, _)| id)
            .collect();
        for expr in &doomed {
            self.destroy_expression(*expr);
        }

        let owner = self.state.object_contexts.borrow_mut().remove(&object);
        self.state.roots_in_creation.borrow_mut().remove(&object);
        {
            let mut contexts = self.state.contexts.borrow_mut();
            if let Some(node) = owner.and_then(|ctx| contexts.get_mut(ctx)) {
                node.objects.retain(|o| *o != object);
            }
            let using: Vec<ContextId> = contexts
                .iter()
                .filter(|(_, node)| node.context_object == Some(object))
                .map(|(id, _)| id)
                .collect();
            for ctx in using {
                if let Some(node) = contexts.get_mut(ctx) {
                    node.context_object = None;
                }
            }
        }
        tracing::debug!(?object, detached, expressions = doomed.len(), "object destroyed");
    }

    /// Fire every armed guard connected to `source`.
    ///
    /// All targets are flagged first; each is then re-checked just before it
    /// fires, because invalidating one expression may re-capture, recycle or
    /// destroy the others.
    fn deliver(&self, source: DependencySource) -> usize {
        let targets = self.state.guards.borrow_mut().begin_notify(&source);
        let mut fired = 0;
        for guard in targets {
            let owner = self.state.guards.borrow_mut().take_fire(guard, &source);
            if let Some(expr) = owner {
                self.invalidate_expression(expr);
                fired += 1;
            }
        }
        tracing::trace!(?source, fired, "notification delivered");
        fired
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("contexts", &self.state.contexts.borrow().len())
            .field("expressions", &self.state.expressions.borrow().len())
            .field("guards", &self.guard_stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
