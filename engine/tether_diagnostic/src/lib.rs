//! Error reporting for the binding engine.
//!
//! - [`BindingError`]: one structured error (url, line, column, description,
//!   offending object) produced when a compiled function throws.
//! - [`DeferredErrorLog`]: collects per-expression errors while a
//!   construction batch is open so they can be surfaced together.
//! - [`WarningSink`]: the external warning channel errors and diagnostic
//!   lines end up in.
//!
//! Errors here are never fatal. Evaluation keeps going and returns the
//! undefined sentinel; the sink decides what the user sees.

mod deferred;
mod error;
mod sink;

pub use deferred::DeferredErrorLog;
pub use error::BindingError;
pub use sink::{BufferWarningSink, WarningSink};
