//! Bound expressions: capturing evaluation of one compiled function.
//!
//! # Evaluation
//!
//! 1. Resolve the slot, its context and its function. Any failure here
//!    degrades to `Undefined` without running anything.
//! 2. Move the active guards into a [`CaptureSession`] and call the
//!    function with a [`CallContext`] carrying it. No engine borrow is held
//!    during the call.
//! 3. Dropping the call context closes the session and hands the guards
//!    back to the slot.
//! 4. Re-resolve the slot by handle. If the function destroyed the
//!    expression, stop and return `Undefined`.
//! 5. Record the outcome: success clears the pending error, an exception
//!    becomes a [`BindingError`] deferred to the open construction batch or
//!    reported at once.

use std::rc::Rc;

use tether_diagnostic::BindingError;
use tether_ir::{Handle, ObjectId, SourceLocation, Value, ValueKind};

use crate::capture::{CallContext, CaptureSession};
use crate::context::{ContextFlags, ContextId};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::guard::{DependencySource, GuardId};
use crate::host::CompiledFunction;
use crate::stack::ensure_sufficient_stack;

/// Handle to a bound expression.
pub type ExprId = Handle<ExpressionSlot>;

/// Invalidation entry point of an expression.
pub type InvalidationHandler = Box<dyn FnMut(&Engine, ExprId)>;

pub(crate) enum FunctionSlot {
    /// Not compiled yet.
    Source {
        text: Rc<str>,
        location: SourceLocation,
    },
    Compiled(Rc<dyn CompiledFunction>),
    /// Compilation failed and was reported; stays failed until the source
    /// is replaced.
    Failed { location: SourceLocation },
}

impl FunctionSlot {
    fn location(&self) -> SourceLocation {
        match self {
            FunctionSlot::Source { location, .. } | FunctionSlot::Failed { location } => {
                location.clone()
            }
            FunctionSlot::Compiled(function) => function.location(),
        }
    }
}

/// Per-expression state.
pub struct ExpressionSlot {
    pub(crate) context: Option<ContextId>,
    pub(crate) scope_object: Option<ObjectId>,
    pub(crate) function: FunctionSlot,
    /// Most-recently-captured first.
    pub(crate) active_guards: Vec<GuardId>,
    pub(crate) notify_on_value_changed: bool,
    pub(crate) error: Option<BindingError>,
    pub(crate) evaluating: bool,
    /// The invalidation handler is running.
    pub(crate) updating: bool,
    pub(crate) dirty: bool,
    pub(crate) unresolved_names: bool,
    pub(crate) on_invalidated: Option<InvalidationHandler>,
}

impl ExpressionSlot {
    fn new(context: ContextId, scope_object: Option<ObjectId>, function: FunctionSlot) -> Self {
        ExpressionSlot {
            context: Some(context),
            scope_object,
            function,
            active_guards: Vec::new(),
            notify_on_value_changed: true,
            error: None,
            evaluating: false,
            updating: false,
            dirty: true,
            unresolved_names: false,
            on_invalidated: None,
        }
    }
}

impl std::fmt::Debug for ExpressionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionSlot")
            .field("context", &self.context)
            .field("scope_object", &self.scope_object)
            .field("guards", &self.active_guards.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

/// Result of [`Engine::evaluate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Evaluation {
    pub value: Value,
    pub is_undefined: bool,
}

impl Evaluation {
    pub fn undefined() -> Self {
        Evaluation {
            value: Value::Undefined,
            is_undefined: true,
        }
    }

    fn of(value: Value) -> Self {
        Evaluation {
            is_undefined: value.is_undefined(),
            value,
        }
    }
}

/// Everything needed to run the function, gathered under one borrow.
struct Prepared {
    function: Rc<dyn CompiledFunction>,
    context: ContextId,
    scope_object: Option<ObjectId>,
    previous: Option<Vec<GuardId>>,
}

enum Preparation {
    Ready(Prepared),
    Compile {
        text: Rc<str>,
        location: SourceLocation,
        context: ContextId,
    },
    Undefined,
}

impl Engine {
    /// Create an expression from a compiled function.
    pub fn create_expression(
        &self,
        context: ContextId,
        scope_object: Option<ObjectId>,
        function: Rc<dyn CompiledFunction>,
    ) -> EngineResult<ExprId> {
        self.insert_expression(context, scope_object, FunctionSlot::Compiled(function))
    }

    /// Create an expression from source text, compiled by the function
    /// provider on first evaluation.
    pub fn create_expression_from_source(
        &self,
        context: ContextId,
        scope_object: Option<ObjectId>,
        source: &str,
        location: SourceLocation,
    ) -> EngineResult<ExprId> {
        if self.state().provider.is_none() {
            return Err(EngineError::NoFunctionProvider {
                source_text: source.to_owned(),
            });
        }
        self.insert_expression(
            context,
            scope_object,
            FunctionSlot::Source {
                text: Rc::from(source),
                location,
            },
        )
    }

    fn insert_expression(
        &self,
        context: ContextId,
        scope_object: Option<ObjectId>,
        function: FunctionSlot,
    ) -> EngineResult<ExprId> {
        self.check_context(context)?;
        let id = self
            .state()
            .expressions
            .borrow_mut()
            .insert(ExpressionSlot::new(context, scope_object, function));
        if let Some(node) = self.state().contexts.borrow_mut().get_mut(context) {
            node.expressions.push(id);
        }
        tracing::trace!(expression = ?id, ?context, "expression created");
        Ok(id)
    }

    /// Destroy an expression: leave its context, release its guards, drop
    /// any deferred error. Safe to call from inside its own evaluation.
    pub fn destroy_expression(&self, id: ExprId) -> bool {
        let Some(slot) = self.state().expressions.borrow_mut().remove(id) else {
            return false;
        };
        {
            let mut pool = self.state().guards.borrow_mut();
            for guard in slot.active_guards {
                pool.recycle(guard);
            }
        }
        if let Some(ctx) = slot.context {
            if let Some(node) = self.state().contexts.borrow_mut().get_mut(ctx) {
                node.expressions.retain(|e| *e != id);
            }
            if slot.unresolved_names {
                self.sync_unresolved_flag(ctx);
            }
        }
        self.state().errors.borrow_mut().remove_error(id);
        tracing::trace!(expression = ?id, "expression destroyed");
        // The handler (and whatever it captured) drops here, outside any borrow.
        drop(slot.on_invalidated);
        true
    }

    pub fn is_expression_alive(&self, id: ExprId) -> bool {
        self.state().expressions.borrow().contains(id)
    }

    pub fn expression_context(&self, id: ExprId) -> Option<ContextId> {
        self.state()
            .expressions
            .borrow()
            .get(id)
            .and_then(|slot| slot.context)
    }

    pub fn scope_object(&self, id: ExprId) -> Option<ObjectId> {
        self.state()
            .expressions
            .borrow()
            .get(id)
            .and_then(|slot| slot.scope_object)
    }

    /// Move the expression to another context, or detach it with `None`.
    ///
    /// A detached expression cannot evaluate, so its guards are recycled.
    pub fn set_context(&self, id: ExprId, context: Option<ContextId>) -> EngineResult<()> {
        if let Some(ctx) = context {
            self.check_context(ctx)?;
        }
        let (previous, stale) = {
            let mut expressions = self.state().expressions.borrow_mut();
            let slot = expressions
                .get_mut(id)
                .ok_or(EngineError::StaleExpression(id))?;
            let stale = if context.is_none() {
                std::mem::take(&mut slot.active_guards)
            } else {
                Vec::new()
            };
            (std::mem::replace(&mut slot.context, context), stale)
        };
        self.recycle_guards(stale);
        if previous == context {
            return Ok(());
        }
        {
            let mut contexts = self.state().contexts.borrow_mut();
            if let Some(node) = previous.and_then(|ctx| contexts.get_mut(ctx)) {
                node.expressions.retain(|e| *e != id);
            }
            if let Some(node) = context.and_then(|ctx| contexts.get_mut(ctx)) {
                node.expressions.push(id);
            }
        }
        if let Some(ctx) = previous {
            self.sync_unresolved_flag(ctx);
        }
        Ok(())
    }

    pub fn set_scope_object(&self, id: ExprId, object: Option<ObjectId>) -> EngineResult<()> {
        let mut expressions = self.state().expressions.borrow_mut();
        let slot = expressions
            .get_mut(id)
            .ok_or(EngineError::StaleExpression(id))?;
        slot.scope_object = object;
        Ok(())
    }

    /// Toggle dependency capture. Turning it off drops every guard.
    pub fn set_notify_on_value_changed(&self, id: ExprId, notify: bool) -> EngineResult<()> {
        let stale = {
            let mut expressions = self.state().expressions.borrow_mut();
            let slot = expressions
                .get_mut(id)
                .ok_or(EngineError::StaleExpression(id))?;
            slot.notify_on_value_changed = notify;
            if notify {
                return Ok(());
            }
            std::mem::take(&mut slot.active_guards)
        };
        self.recycle_guards(stale);
        Ok(())
    }

    pub fn notify_on_value_changed(&self, id: ExprId) -> bool {
        self.state()
            .expressions
            .borrow()
            .get(id)
            .is_some_and(|slot| slot.notify_on_value_changed)
    }

    /// Replace the expression's source. Guards are dropped and the new
    /// source is compiled on the next evaluation.
    pub fn set_expression_source(
        &self,
        id: ExprId,
        source: &str,
        location: SourceLocation,
    ) -> EngineResult<()> {
        if self.state().provider.is_none() {
            return Err(EngineError::NoFunctionProvider {
                source_text: source.to_owned(),
            });
        }
        let stale = {
            let mut expressions = self.state().expressions.borrow_mut();
            let slot = expressions
                .get_mut(id)
                .ok_or(EngineError::StaleExpression(id))?;
            slot.function = FunctionSlot::Source {
                text: Rc::from(source),
                location,
            };
            slot.dirty = true;
            std::mem::take(&mut slot.active_guards)
        };
        self.recycle_guards(stale);
        Ok(())
    }

    /// Install the invalidation entry point.
    pub fn on_invalidated(
        &self,
        id: ExprId,
        handler: impl FnMut(&Engine, ExprId) + 'static,
    ) -> EngineResult<()> {
        let mut expressions = self.state().expressions.borrow_mut();
        let slot = expressions
            .get_mut(id)
            .ok_or(EngineError::StaleExpression(id))?;
        slot.on_invalidated = Some(Box::new(handler));
        Ok(())
    }

    /// Whether the expression was invalidated (or never evaluated) since
    /// its last evaluation.
    pub fn is_dirty(&self, id: ExprId) -> bool {
        self.state()
            .expressions
            .borrow()
            .get(id)
            .is_some_and(|slot| slot.dirty)
    }

    /// Run the invalidation entry point as if a dependency had changed.
    pub fn refresh(&self, id: ExprId) {
        self.invalidate_expression(id);
    }

    /// Error left by the last evaluation, if it failed.
    pub fn expression_error(&self, id: ExprId) -> Option<BindingError> {
        self.state()
            .expressions
            .borrow()
            .get(id)
            .and_then(|slot| slot.error.clone())
    }

    /// Drop the pending error and unlink it from the deferred log.
    pub fn clear_error(&self, id: ExprId) {
        if let Some(slot) = self.state().expressions.borrow_mut().get_mut(id) {
            slot.error = None;
        }
        self.state().errors.borrow_mut().remove_error(id);
    }

    /// Whether the last evaluation looked up a name it could not resolve.
    pub fn has_unresolved_names(&self, id: ExprId) -> bool {
        self.state()
            .expressions
            .borrow()
            .get(id)
            .is_some_and(|slot| slot.unresolved_names)
    }

    /// Sources the expression currently depends on, most recently captured
    /// first. Guards whose source was destroyed are left out.
    pub fn dependencies(&self, id: ExprId) -> Vec<DependencySource> {
        let expressions = self.state().expressions.borrow();
        let Some(slot) = expressions.get(id) else {
            return Vec::new();
        };
        let pool = self.state().guards.borrow();
        slot.active_guards
            .iter()
            .filter_map(|guard| pool.get(*guard).and_then(|g| g.source()))
            .collect()
    }

    /// Evaluate with no arguments.
    pub fn evaluate(&self, id: ExprId) -> Evaluation {
        self.evaluate_with_args(id, &[])
    }

    /// Evaluate with positional arguments.
    #[tracing::instrument(level = "trace", skip(self, args))]
    pub fn evaluate_with_args(&self, id: ExprId, args: &[Value]) -> Evaluation {
        let prepared = match self.prepare(id) {
            Preparation::Ready(prepared) => prepared,
            Preparation::Compile {
                text,
                location,
                context,
            } => match self.compile(id, &text, &location, context) {
                Some(prepared) => prepared,
                None => return Evaluation::undefined(),
            },
            Preparation::Undefined => return Evaluation::undefined(),
        };
        self.run(id, prepared, args)
    }

    /// Evaluate and coerce the result to `kind`.
    ///
    /// Returns `None` when the result was undefined or cannot be
    /// represented as `kind`.
    pub fn evaluate_typed(&self, id: ExprId, args: &[Value], kind: ValueKind) -> Option<Value> {
        let evaluation = self.evaluate_with_args(id, args);
        if evaluation.is_undefined {
            return None;
        }
        let coerced = evaluation.value.coerce(kind);
        if coerced.is_none() {
            tracing::debug!(
                expression = ?id,
                ?kind,
                value = %evaluation.value,
                "result not coercible"
            );
        }
        coerced
    }

    fn prepare(&self, id: ExprId) -> Preparation {
        let mut expressions = self.state().expressions.borrow_mut();
        let Some(slot) = expressions.get_mut(id) else {
            return Preparation::Undefined;
        };
        let Some(context) = slot.context.filter(|ctx| self.is_context_valid(*ctx)) else {
            tracing::warn!(
                expression = ?id,
                "attempted to evaluate an expression in an invalid context"
            );
            return Preparation::Undefined;
        };
        if slot.evaluating {
            let error = BindingError::new("Binding loop detected")
                .at(&slot.function.location())
                .with_object(slot.scope_object);
            drop(expressions);
            self.report(&error);
            return Preparation::Undefined;
        }
        let function = match &slot.function {
            FunctionSlot::Compiled(function) => Rc::clone(function),
            FunctionSlot::Source { text, location } => {
                return Preparation::Compile {
                    text: Rc::clone(text),
                    location: location.clone(),
                    context,
                }
            }
            FunctionSlot::Failed { .. } => return Preparation::Undefined,
        };
        Preparation::Ready(self.begin_run(slot, function, context))
    }

    fn compile(
        &self,
        id: ExprId,
        text: &str,
        location: &SourceLocation,
        context: ContextId,
    ) -> Option<Prepared> {
        let provider = self.state().provider.clone()?;
        let compiled = provider.compile(text, location, context);

        let mut expressions = self.state().expressions.borrow_mut();
        let slot = expressions.get_mut(id)?;
        match compiled {
            Ok(function) => {
                slot.function = FunctionSlot::Compiled(Rc::clone(&function));
                if slot.evaluating {
                    return None;
                }
                Some(self.begin_run(slot, function, context))
            }
            Err(exception) => {
                slot.function = FunctionSlot::Failed {
                    location: location.clone(),
                };
                let error = BindingError::new(format!(
                    "Exception occurred during function compilation: {}",
                    exception.message
                ))
                .at(exception.location.as_ref().unwrap_or(location))
                .with_object(slot.scope_object);
                drop(expressions);
                self.report(&error);
                None
            }
        }
    }

    fn begin_run(
        &self,
        slot: &mut ExpressionSlot,
        function: Rc<dyn CompiledFunction>,
        context: ContextId,
    ) -> Prepared {
        slot.evaluating = true;
        slot.dirty = false;
        slot.unresolved_names = false;
        let previous = slot
            .notify_on_value_changed
            .then(|| std::mem::take(&mut slot.active_guards));
        Prepared {
            function,
            context,
            scope_object: slot.scope_object,
            previous,
        }
    }

    fn run(&self, id: ExprId, prepared: Prepared, args: &[Value]) -> Evaluation {
        let Prepared {
            function,
            context,
            scope_object,
            previous,
        } = prepared;

        let this = scope_object
            .map(|object| self.reflection().resolve_this(object))
            .filter(|value| !value.is_nullish())
            .unwrap_or_else(|| self.global_object().clone());

        let location = function.location();
        let session =
            previous.map(|guards| CaptureSession::new(self, id, location.clone(), guards));
        let mut cx = CallContext::new(self, id, Some(context), scope_object, session);
        let result = ensure_sufficient_stack(|| function.call(&mut cx, &this, args));
        drop(cx);

        let mut expressions = self.state().expressions.borrow_mut();
        let Some(slot) = expressions.get_mut(id) else {
            tracing::debug!(expression = ?id, "expression destroyed during its own evaluation");
            return Evaluation::undefined();
        };
        slot.evaluating = false;
        let resolved = !slot.unresolved_names;

        let evaluation = match result {
            Ok(value) => {
                slot.error = None;
                drop(expressions);
                self.state().errors.borrow_mut().remove_error(id);
                Evaluation::of(value)
            }
            Err(exception) => {
                let error = BindingError::from_exception(
                    &exception.message,
                    exception.location.as_ref().unwrap_or(&location),
                )
                .with_object(scope_object);
                slot.error = Some(error.clone());
                drop(expressions);
                self.report_or_defer(id, &error);
                Evaluation::undefined()
            }
        };
        if resolved {
            self.sync_unresolved_flag(context);
        }
        evaluation
    }

    /// Invalidation entry point, reached from a fired guard or `refresh`.
    ///
    /// The handler is taken out of the slot while it runs and put back only
    /// if the expression survived and nobody installed a new one. A second
    /// invalidation arriving while the handler runs is a binding loop.
    pub(crate) fn invalidate_expression(&self, id: ExprId) {
        let handler = {
            let mut expressions = self.state().expressions.borrow_mut();
            let Some(slot) = expressions.get_mut(id) else {
                return;
            };
            slot.dirty = true;
            if slot.updating {
                let error = BindingError::new("Binding loop detected")
                    .at(&slot.function.location())
                    .with_object(slot.scope_object);
                drop(expressions);
                self.report(&error);
                return;
            }
            let Some(handler) = slot.on_invalidated.take() else {
                return;
            };
            slot.updating = true;
            handler
        };

        let mut handler = handler;
        handler(self, id);

        let mut expressions = self.state().expressions.borrow_mut();
        if let Some(slot) = expressions.get_mut(id) {
            slot.updating = false;
            if slot.on_invalidated.is_none() {
                slot.on_invalidated = Some(handler);
                return;
            }
        }
        drop(expressions);
        drop(handler);
    }

    /// Drop guards after the owning expression is detached from its context.
    pub(crate) fn detach_expression(&self, id: ExprId) {
        let stale = {
            let mut expressions = self.state().expressions.borrow_mut();
            let Some(slot) = expressions.get_mut(id) else {
                return;
            };
            slot.context = None;
            std::mem::take(&mut slot.active_guards)
        };
        self.recycle_guards(stale);
    }

    /// Flag the expression, and the context it runs in, as depending on a
    /// name lookup that failed.
    pub(crate) fn mark_unresolved(&self, id: ExprId, context: Option<ContextId>) {
        if let Some(slot) = self.state().expressions.borrow_mut().get_mut(id) {
            slot.unresolved_names = true;
        }
        if let Some(ctx) = context {
            self.set_context_flag(ctx, ContextFlags::UNRESOLVED_NAMES, true);
        }
    }

    fn recycle_guards(&self, guards: Vec<GuardId>) {
        let mut pool = self.state().guards.borrow_mut();
        for guard in guards {
            pool.recycle(guard);
        }
    }
}
