//! Property bindings: an expression whose value is written to a host
//! property every time it is invalidated.

use std::rc::Rc;

use tether_ir::{ObjectId, PropertyIndex};

use crate::context::ContextId;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::expression::ExprId;
use crate::host::CompiledFunction;

impl Engine {
    /// Bind `target.property` to `function`.
    ///
    /// The binding is evaluated and written immediately, then again on every
    /// invalidation. `target` is the expression's scope object, so the
    /// binding dies with it. Failed evaluations leave the property untouched.
    pub fn bind_property(
        &self,
        context: ContextId,
        target: ObjectId,
        property: PropertyIndex,
        function: Rc<dyn CompiledFunction>,
    ) -> EngineResult<ExprId> {
        let id = self.create_expression(context, Some(target), function)?;
        self.on_invalidated(id, move |engine, id| {
            engine.update_binding(id, target, property);
        })?;
        self.refresh(id);
        Ok(id)
    }

    /// Remove a binding without touching the property's current value.
    pub fn unbind(&self, id: ExprId) -> bool {
        self.destroy_expression(id)
    }

    fn update_binding(&self, id: ExprId, target: ObjectId, property: PropertyIndex) {
        let evaluation = self.evaluate(id);
        if !self.is_expression_alive(id) || self.expression_error(id).is_some() {
            return;
        }
        let written = self
            .reflection()
            .write(self, target, property, evaluation.value);
        if !written {
            tracing::debug!(binding = ?id, ?target, ?property, "binding write refused");
        }
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests;
