//! Capture session and the call context handed to compiled functions.
//!
//! A [`CaptureSession`] lives for exactly one evaluation. It starts with the
//! expression's previous guards as its working list, front first, and
//! reconciles every read against it:
//!
//! 1. Guards at the front that do not match the source just read are
//!    cancelled and recycled, up to the first match.
//! 2. A matching guard is popped and re-attached without allocating.
//! 3. With no match, a guard is taken from the pool.
//!
//! Attached guards are collected in read order and handed back to the
//! expression most-recent-first when the session ends. Whatever is still in
//! the working list then was read last time but not this time, and is
//! recycled.
//!
//! There is no ambient "current session". The session travels inside the
//! [`CallContext`] passed to the compiled function, so nested evaluations
//! simply get their own.

use rustc_hash::FxHashSet;
use tether_ir::{ObjectId, PropertyIndex, SourceLocation, Value};
use url::Url;

use crate::context::ContextId;
use crate::engine::{Engine, NotifierId};
use crate::expression::ExprId;
use crate::guard::{DependencySource, GuardId};
use crate::host::ObserveSink;

/// Recorder for one evaluation of one expression.
pub struct CaptureSession<'e> {
    engine: &'e Engine,
    expression: ExprId,
    /// Used to identify the expression in diagnostics.
    location: SourceLocation,
    /// Previous guards; the last element is the front of the list.
    pending: Vec<GuardId>,
    /// Guards attached during this session, in read order.
    captured: Vec<GuardId>,
    seen: FxHashSet<DependencySource>,
    non_notifiable: Vec<(ObjectId, PropertyIndex)>,
}

impl<'e> CaptureSession<'e> {
    /// Open a session over the expression's previous guards, given
    /// most-recent-first.
    pub(crate) fn new(
        engine: &'e Engine,
        expression: ExprId,
        location: SourceLocation,
        previous: Vec<GuardId>,
    ) -> Self {
        CaptureSession {
            engine,
            expression,
            location,
            pending: previous,
            captured: Vec::new(),
            seen: FxHashSet::default(),
            non_notifiable: Vec::new(),
        }
    }

    /// Record a dependency on `source`.
    pub fn capture(&mut self, source: DependencySource) {
        if !self.seen.insert(source) {
            return;
        }
        let (guard, needs_observe) = {
            let mut pool = self.engine.state().guards.borrow_mut();
            let mut matched = None;
            while let Some(head) = self.pending.pop() {
                if pool.is_connected(head, &source) {
                    matched = Some(head);
                    break;
                }
                pool.recycle(head);
            }
            match matched {
                Some(guard) => (guard, pool.reattach(guard)),
                None => {
                    let guard = pool.acquire(self.expression, source);
                    (guard, matches!(source, DependencySource::Bindable { .. }))
                }
            }
        };
        self.captured.push(guard);

        if let (true, DependencySource::Bindable { object, property }) = (needs_observe, source) {
            self.engine.state().guards.borrow_mut().mark_observing(guard);
            self.engine.reflection().observe(
                object,
                property,
                ObserveSink {
                    guard,
                    object,
                    property,
                },
            );
        }
    }

    /// Record a read of a property that cannot be observed.
    pub fn capture_non_notifiable(&mut self, object: ObjectId, property: PropertyIndex) {
        if !self.non_notifiable.contains(&(object, property)) {
            self.non_notifiable.push((object, property));
        }
    }

    /// Number of guards attached so far.
    pub fn captured_len(&self) -> usize {
        self.captured.len()
    }

    fn report_non_notifiable(&self) {
        if self.non_notifiable.is_empty() || !self.engine.config().report_non_notifiable {
            return;
        }
        let reflection = self.engine.reflection();
        let warnings = self.engine.warnings();
        warnings.line(&format!(
            "Expression {} depends on non-NOTIFYable properties:",
            self.location
        ));
        for &(object, property) in &self.non_notifiable {
            warnings.line(&format!("    {}", reflection.describe_property(object, property)));
        }
    }
}

impl Drop for CaptureSession<'_> {
    fn drop(&mut self) {
        self.report_non_notifiable();

        let state = self.engine.state();
        let mut pool = state.guards.borrow_mut();
        for guard in self.pending.drain(..) {
            pool.recycle(guard);
        }

        let mut captured = std::mem::take(&mut self.captured);
        let mut expressions = state.expressions.borrow_mut();
        match expressions.get_mut(self.expression) {
            Some(slot) if slot.notify_on_value_changed => {
                captured.reverse();
                let stale = std::mem::replace(&mut slot.active_guards, captured);
                for guard in stale {
                    pool.recycle(guard);
                }
            }
            // Destroyed mid-evaluation, or capture switched off meanwhile.
            _ => {
                for guard in captured {
                    pool.recycle(guard);
                }
            }
        }
    }
}

/// What a compiled function sees of the engine while it runs.
///
/// Every read of host state must go through this context, so the read is
/// captured as a dependency of the running expression.
pub struct CallContext<'e> {
    engine: &'e Engine,
    expression: ExprId,
    context: Option<ContextId>,
    scope_object: Option<ObjectId>,
    session: Option<CaptureSession<'e>>,
}

impl<'e> CallContext<'e> {
    pub(crate) fn new(
        engine: &'e Engine,
        expression: ExprId,
        context: Option<ContextId>,
        scope_object: Option<ObjectId>,
        session: Option<CaptureSession<'e>>,
    ) -> Self {
        CallContext {
            engine,
            expression,
            context,
            scope_object,
            session,
        }
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    pub fn expression(&self) -> ExprId {
        self.expression
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    pub fn scope_object(&self) -> Option<ObjectId> {
        self.scope_object
    }

    /// Whether reads are being recorded.
    pub fn is_capturing(&self) -> bool {
        self.session.is_some()
    }

    /// Read `object.property` and record the dependency.
    pub fn read(&mut self, object: ObjectId, property: PropertyIndex) -> Value {
        self.capture_property(object, property);
        self.engine.reflection().read(object, property)
    }

    /// Record a dependency on a free-standing notifier. Destroyed notifiers
    /// are ignored.
    pub fn read_notifier(&mut self, notifier: NotifierId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if self.engine.state().notifiers.borrow().contains(notifier) {
            session.capture(DependencySource::Notifier(notifier));
        }
    }

    /// Resolve `name` against the scope and record what was read.
    ///
    /// Order: the scope object's properties, then for each context from the
    /// innermost outwards its named entries and its context object's
    /// properties. A miss marks the expression and its context as
    /// depending on unresolved names and yields `Undefined`.
    pub fn lookup(&mut self, name: &str) -> Value {
        let reflection = self.engine.reflection();
        if let Some(object) = self.scope_object {
            if let Some(property) = reflection.property_by_name(object, name) {
                return self.read(object, property);
            }
        }

        // A name never interned cannot be a named entry anywhere.
        let key = self.engine.interner().get(name);
        let mut current = self.context;
        while let Some(ctx) = current {
            let Some(step) = self.engine.lookup_step(ctx, key) else {
                break;
            };
            if let Some((value, notifier)) = step.entry {
                self.read_notifier(notifier);
                return value;
            }
            if let Some(object) = step.context_object {
                if let Some(property) = reflection.property_by_name(object, name) {
                    return self.read(object, property);
                }
            }
            current = step.parent;
        }

        self.engine.mark_unresolved(self.expression, self.context);
        Value::Undefined
    }

    /// Resolve a url relative to the running expression's context.
    pub fn resolved_url(&self, relative: &str) -> Option<Url> {
        match self.context {
            Some(ctx) => self.engine.resolved_url(ctx, relative),
            None => Url::parse(relative).ok(),
        }
    }

    fn capture_property(&mut self, object: ObjectId, property: PropertyIndex) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let reflection = self.engine.reflection();
        if reflection.is_bindable_property(object, property) {
            session.capture(DependencySource::Bindable { object, property });
        } else if let Some(notify) = reflection.notify_index(object, property) {
            session.capture(DependencySource::Property { object, notify });
        } else {
            session.capture_non_notifiable(object, property);
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
