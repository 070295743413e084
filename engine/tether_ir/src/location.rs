//! Source location of a compiled function.

use std::fmt;
use std::rc::Rc;

/// Where a compiled function came from.
///
/// `line` and `column` are 1-based; `None` means unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub url: Option<Rc<str>>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SourceLocation {
    pub fn new(url: &str, line: u32, column: u32) -> Self {
        SourceLocation {
            url: Some(Rc::from(url)),
            line: Some(line),
            column: Some(column),
        }
    }

    /// Location with no url, line or column.
    pub fn unknown() -> Self {
        Self::default()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.url.as_deref() {
            Some(url) if !url.is_empty() => f.write_str(url)?,
            _ => f.write_str("<Unknown File>")?,
        }
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}
