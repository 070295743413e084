//! Construction batches.
//!
//! While a batch is open, evaluation errors are linked into the deferred
//! error log instead of being reported. Closing the outermost batch reports
//! them, most recent first, and unlinks each one.

use super::Engine;
use crate::error::{EngineError, EngineResult};

/// RAII guard for one construction batch level.
///
/// Dropping it (including during unwinding) closes the level.
#[must_use = "dropping the batch closes it immediately"]
pub struct CreationBatch {
    engine: Engine,
    depth: usize,
}

impl CreationBatch {
    /// Nesting depth of this batch (1 for the outermost).
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Close the batch. Same as dropping it.
    pub fn finish(self) {}
}

impl Drop for CreationBatch {
    fn drop(&mut self) {
        self.engine.end_creation();
    }
}

impl Engine {
    /// Open a construction batch.
    ///
    /// Fails once `max_creation_depth` batches are already open.
    pub fn begin_creation(&self) -> EngineResult<CreationBatch> {
        let mut errors = self.state().errors.borrow_mut();
        let limit = self.config().max_creation_depth;
        if errors.depth() >= limit {
            tracing::warn!(limit, "maximum object creation depth exceeded");
            return Err(EngineError::CreationRecursion { limit });
        }
        let depth = errors.begin_batch();
        tracing::debug!(depth, "construction batch opened");
        Ok(CreationBatch {
            engine: self.clone(),
            depth,
        })
    }

    /// Whether a construction batch is open.
    pub fn in_creation(&self) -> bool {
        self.state().errors.borrow().in_batch()
    }

    /// Number of errors waiting for the current batch to end.
    pub fn deferred_error_count(&self) -> usize {
        self.state().errors.borrow().len()
    }

    fn end_creation(&self) {
        let outermost = self.state().errors.borrow_mut().end_batch();
        if !outermost {
            return;
        }
        self.state().roots_in_creation.borrow_mut().clear();
        let mut reported = 0usize;
        loop {
            let Some(expr) = self.state().errors.borrow_mut().pop_head() else {
                break;
            };
            let error = self
                .state()
                .expressions
                .borrow()
                .get(expr)
                .and_then(|slot| slot.error.clone());
            if let Some(error) = error {
                self.report(&error);
                reported += 1;
            }
        }
        tracing::debug!(reported, "construction batch completed");
    }
}
