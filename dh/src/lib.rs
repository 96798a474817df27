//! dynhtml - dynamic HTML template engine
//!
//! Templates are small script modules loaded from one or more directories.
//! A request path is split into segments and each segment's module becomes
//! one stage of a lazy pipeline: `/page/body` calls `page.main` with `pipe`
//! bound to the output of `body.main`. Output streams chunk by chunk, and a
//! changed template replaces its module in place so importers pick up the
//! new code without being reloaded themselves.
//!
//! # Modules
//!
//! - [`script`] - the template language: parser, bytecode compiler, interpreter
//! - [`engine`] - registry, loader, pipeline builder and request dispatcher
//! - [`capabilities`] - the allow-listed names templates can reach
//! - [`watcher`] - reload events from the template directories
//! - [`server`] - HTTP/1.0 listener
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod capabilities;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod script;
pub mod server;
pub mod watcher;

// Re-export commonly used types
pub use capabilities::{Capabilities, FnObserver, NativeModule, Observer};
pub use config::Config;
pub use engine::{Engine, EngineBuilder, Module, RequestContext, Response};
pub use error::{EngineError, PipelineError, Result};
pub use script::{CallArgs, ScriptError, Sequence, Value};
