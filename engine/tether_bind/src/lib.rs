//! Reactive binding evaluation engine.
//!
//! Evaluates compiled expressions against a tree of scopes, records every
//! host value an evaluation reads, and invalidates the expression exactly
//! once when any of those values changes.
//!
//! # Architecture
//!
//! - **guard**: pooled dependency edges and the source → guard table
//! - **capture**: the per-evaluation session that reconciles guards, and the
//!   [`CallContext`] compiled functions read through
//! - **expression**: bound expressions, evaluation and invalidation
//! - **context**: the scope tree, named entries, installed objects
//! - **engine**: shared state, host change entry points, construction
//!   batches
//! - **binding**: expressions that write their value to a host property
//! - **host**: the reflection and compiler interfaces the host implements
//!
//! Everything is single-threaded. Entities are addressed by generational
//! handles, so a callback that destroys something can never leave a
//! dangling reference behind.

mod binding;
mod capture;
mod config;
mod context;
mod engine;
mod error;
mod expression;
mod guard;
mod host;
mod stack;
pub mod testing;

pub use capture::{CallContext, CaptureSession};
pub use config::{EngineConfig, DEFAULT_MAX_CREATION_DEPTH};
pub use context::{
    ContextFlags, ContextId, ContextNode, ContextOwnership, DestructionHandler, InstallOutcome,
};
pub use engine::{CreationBatch, Engine, EngineBuilder, NotifierId, NotifierSlot};
pub use error::{EngineError, EngineResult};
pub use expression::{Evaluation, ExprId, ExpressionSlot, InvalidationHandler};
pub use guard::{DependencySource, Guard, GuardId, GuardPool, GuardState, PoolStats};
pub use host::{CompiledFunction, Exception, FunctionProvider, ObserveSink, Reflection};
pub use stack::ensure_sufficient_stack;

pub use tether_diagnostic::{BindingError, BufferWarningSink, WarningSink};
pub use tether_ir::{NotifyIndex, ObjectId, PropertyIndex, SourceLocation, Value, ValueKind};

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing from `RUST_LOG`.
///
/// Does nothing unless `RUST_LOG` is set. Safe to call more than once; only
/// the first call installs a subscriber.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
