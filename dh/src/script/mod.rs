//! The template scripting language
//!
//! Source text is tokenized, parsed into a syntax tree, compiled to bytecode
//! and executed by a small stack machine. Generator functions compile to
//! suspendable frames that surface as lazy `Sequence`s.

pub mod ast;
pub mod code;
pub mod compiler;
pub mod error;
pub mod lexer;
pub mod methods;
pub mod ops;
pub mod parser;
pub mod sequence;
pub mod value;
pub mod vm;

pub use code::Code;
pub use compiler::compile;
pub use error::{ErrorKind, ScriptError, TraceEntry};
pub use sequence::{Flatten, Producer, Sequence};
pub use value::{Builtins, CallArgs, Env, NativeFunction, ScriptObject, Value};
pub use vm::{ModuleResolver, Vm};
