//! Engine error types

use std::path::PathBuf;

use thiserror::Error;

use crate::script::ScriptError;

/// Errors surfaced by the engine to its embedder
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Template root does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("No template roots configured")]
    NoRoots,

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module '{module}' has no function '{function}'")]
    FunctionNotFound { module: String, function: String },

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),
}

/// Why a request path could not produce a pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A path segment has no loaded or loadable module
    #[error("File \"{0}\" does not exist.")]
    TemplateNotFound(String),

    /// An entry point failed while the pipeline was being built
    #[error(transparent)]
    Render(#[from] ScriptError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_not_found_message() {
        let err = PipelineError::TemplateNotFound("missing".to_string());
        assert_eq!(err.to_string(), "File \"missing\" does not exist.");
    }

    #[test]
    fn test_function_not_found_message() {
        let err = EngineError::FunctionNotFound {
            module: "page".to_string(),
            function: "sidebar".to_string(),
        };
        assert_eq!(err.to_string(), "Module 'page' has no function 'sidebar'");
    }
}
