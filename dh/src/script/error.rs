//! Script error types and trace formatting

use std::fmt;
use thiserror::Error;

/// Category of a script failure, rendered as the label on the last trace line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Name,
    Type,
    Attribute,
    Key,
    Index,
    Value,
    DivisionByZero,
    Overflow,
    Import,
    Assertion,
    Recursion,
    ModuleUnloaded,
    Capability,
    Raised,
}

impl ErrorKind {
    /// Label printed in front of the message
    pub fn label(&self) -> &'static str {
        match self {
            Self::Syntax => "SyntaxError",
            Self::Name => "NameError",
            Self::Type => "TypeError",
            Self::Attribute => "AttributeError",
            Self::Key => "KeyError",
            Self::Index => "IndexError",
            Self::Value => "ValueError",
            Self::DivisionByZero => "DivisionByZero",
            Self::Overflow => "OverflowError",
            Self::Import => "ImportError",
            Self::Assertion => "AssertionError",
            Self::Recursion => "RecursionError",
            Self::ModuleUnloaded => "ModuleUnloaded",
            Self::Capability => "CapabilityError",
            Self::Raised => "Error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One line of a trace: where execution was when the error passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
    pub function: Option<String>,
    pub source_line: Option<String>,
}

/// Error raised while parsing or executing template source
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ScriptError {
    pub kind: ErrorKind,
    pub message: String,
    trace: Vec<TraceEntry>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Syntax error at a position in a source file
    pub fn syntax(file: &str, line: u32, column: u32, source_line: Option<&str>, message: impl Into<String>) -> Self {
        let mut err = Self::new(ErrorKind::Syntax, message);
        err.trace.push(TraceEntry {
            file: file.to_string(),
            line,
            column: Some(column),
            function: None,
            source_line: source_line.map(str::to_string),
        });
        err
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn name_error(name: &str) -> Self {
        Self::new(ErrorKind::Name, format!("name '{}' is not defined", name))
    }

    pub fn attribute_error(type_name: &str, attr: &str) -> Self {
        Self::new(
            ErrorKind::Attribute,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    /// Record a frame the error propagated through (innermost first)
    pub fn with_frame(mut self, entry: TraceEntry) -> Self {
        self.trace.push(entry);
        self
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    /// Render the error the way it appears on error pages
    pub fn format_trace(&self) -> String {
        let mut out = String::new();
        if self.kind != ErrorKind::Syntax {
            out.push_str("Traceback (most recent call last):\n");
        }
        for entry in self.trace.iter().rev() {
            out.push_str(&format!("  File \"{}\", line {}", entry.file, entry.line));
            if let Some(column) = entry.column {
                out.push_str(&format!(", column {}", column));
            }
            if let Some(function) = &entry.function {
                out.push_str(&format!(", in {}", function));
            }
            out.push('\n');
            if let Some(source_line) = &entry.source_line {
                out.push_str(&format!("    {}\n", source_line.trim()));
            }
        }
        out.push_str(&format!("{}: {}\n", self.kind, self.message));
        out
    }
}
