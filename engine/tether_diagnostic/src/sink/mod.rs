//! Warning channel.
//!
//! Receives structured errors that no construction batch absorbed, and the
//! plain diagnostic lines the capture session produces for dependencies it
//! cannot observe.
//!
//! Enum dispatch over the handful of destinations the engine needs:
//! - `Log`: `tracing::warn!` (default)
//! - `Buffer`: captured for assertions
//! - `Custom`: host-provided callbacks
//! - `Silent`: dropped

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::BindingError;

/// Sink that captures everything it receives.
#[derive(Debug, Default)]
pub struct BufferWarningSink {
    errors: RefCell<Vec<BindingError>>,
    lines: RefCell<Vec<String>>,
}

impl BufferWarningSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, error: &BindingError) {
        self.errors.borrow_mut().push(error.clone());
    }

    pub fn line(&self, text: &str) {
        self.lines.borrow_mut().push(text.to_owned());
    }

    /// Errors reported so far, oldest first.
    pub fn errors(&self) -> Vec<BindingError> {
        self.errors.borrow().clone()
    }

    /// Diagnostic lines emitted so far, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn clear(&self) {
        self.errors.borrow_mut().clear();
        self.lines.borrow_mut().clear();
    }
}

type ReportFn = dyn Fn(&BindingError);
type LineFn = dyn Fn(&str);

/// Destination for engine warnings.
#[derive(Clone, Default)]
pub enum WarningSink {
    /// Emit through `tracing` at warn level.
    #[default]
    Log,
    /// Capture into a shared buffer.
    Buffer(Rc<BufferWarningSink>),
    /// Forward to host callbacks.
    Custom {
        report: Rc<ReportFn>,
        line: Rc<LineFn>,
    },
    /// Discard.
    Silent,
}

impl WarningSink {
    /// Create a buffer sink and return it together with the shared buffer.
    pub fn buffer() -> (Self, Rc<BufferWarningSink>) {
        let buffer = Rc::new(BufferWarningSink::new());
        (WarningSink::Buffer(Rc::clone(&buffer)), buffer)
    }

    pub fn custom(report: impl Fn(&BindingError) + 'static, line: impl Fn(&str) + 'static) -> Self {
        WarningSink::Custom {
            report: Rc::new(report),
            line: Rc::new(line),
        }
    }

    /// Report one structured error.
    pub fn report(&self, error: &BindingError) {
        match self {
            Self::Log => tracing::warn!(target: "tether::warning", "{error}"),
            Self::Buffer(buffer) => buffer.report(error),
            Self::Custom { report, .. } => report(error),
            Self::Silent => {}
        }
    }

    /// Emit one diagnostic line.
    pub fn line(&self, text: &str) {
        match self {
            Self::Log => tracing::warn!(target: "tether::warning", "{text}"),
            Self::Buffer(buffer) => buffer.line(text),
            Self::Custom { line, .. } => line(text),
            Self::Silent => {}
        }
    }
}

impl fmt::Debug for WarningSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Log => f.write_str("Log"),
            Self::Buffer(_) => f.write_str("Buffer"),
            Self::Custom { .. } => f.write_str("Custom"),
            Self::Silent => f.write_str("Silent"),
        }
    }
}

#[cfg(test)]
mod tests;
