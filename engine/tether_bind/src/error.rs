//! Engine API errors.
//!
//! Evaluation itself never fails with these; they report misuse of the
//! engine API (stale handles, dead contexts, runaway construction).

use thiserror::Error;

use crate::context::ContextId;
use crate::engine::NotifierId;
use crate::expression::ExprId;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("context {0:?} does not exist")]
    StaleContext(ContextId),

    #[error("context {0:?} has been invalidated")]
    InvalidatedContext(ContextId),

    #[error("expression {0:?} does not exist")]
    StaleExpression(ExprId),

    #[error("notifier {0:?} does not exist")]
    StaleNotifier(NotifierId),

    #[error("object creation nested deeper than {limit} levels")]
    CreationRecursion { limit: usize },

    #[error("no function provider configured to compile `{source_text}`")]
    NoFunctionProvider { source_text: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
