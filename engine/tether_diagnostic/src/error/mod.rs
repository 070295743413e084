//! Structured evaluation error.

use std::fmt;
use std::rc::Rc;

use tether_ir::{ObjectId, SourceLocation};

/// Prefix some script runtimes put in front of uncaught exception messages.
const UNCAUGHT_PREFIX: &str = "Uncaught ";

/// One error raised while evaluating a bound expression.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingError {
    /// Source url; `None` prints as `<Unknown File>`.
    pub url: Option<Rc<str>>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub description: String,
    /// Scope object of the expression that failed, if any.
    pub object: Option<ObjectId>,
}

impl BindingError {
    /// Create an error with a description and no location.
    pub fn new(description: impl Into<String>) -> Self {
        BindingError {
            description: description.into(),
            ..Self::default()
        }
    }

    /// Build an error from an exception message, stripping the
    /// `Uncaught ` prefix runtimes sometimes add.
    pub fn from_exception(message: &str, location: &SourceLocation) -> Self {
        let description = message.strip_prefix(UNCAUGHT_PREFIX).unwrap_or(message);
        BindingError::new(description).at(location)
    }

    /// Attach a source location.
    #[must_use]
    pub fn at(mut self, location: &SourceLocation) -> Self {
        self.url.clone_from(&location.url);
        self.line = location.line;
        self.column = location.column;
        self
    }

    #[must_use]
    pub fn with_object(mut self, object: Option<ObjectId>) -> Self {
        self.object = object;
        self
    }

    pub fn location(&self) -> SourceLocation {
        SourceLocation {
            url: self.url.clone(),
            line: self.line,
            column: self.column,
        }
    }
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location(), self.description)
    }
}

impl std::error::Error for BindingError {}
