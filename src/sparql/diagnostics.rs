//! Diagnostics sink
//!
//! Ordered error and warning messages owned by one store. Messages are
//! appended by the parser and the query handlers and kept until the caller
//! clears them.

use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error raised by `origin`
    pub fn error(&mut self, message: impl AsRef<str>, origin: &str) {
        let entry = format!("{} via {}", message.as_ref(), origin);
        warn!(diagnostic = %entry, "query error");
        self.errors.push(entry);
    }

    /// Record a warning raised by `origin`
    pub fn warning(&mut self, message: impl AsRef<str>, origin: &str) {
        let entry = format!("{} via {}", message.as_ref(), origin);
        warn!(diagnostic = %entry, "query warning");
        self.warnings.push(entry);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn clear(&mut self) {
        self.errors.clear();
        self.warnings.clear();
    }
}
