//! Compiled bytecode

use std::fmt;
use std::rc::Rc;

use super::ast::{BinaryOp, CompareOp, UnaryOp};

/// Source text kept alongside compiled code so traces can quote lines
#[derive(Debug)]
pub struct Source {
    pub name: String,
    lines: Vec<String>,
}

impl Source {
    pub fn new(name: impl Into<String>, text: &str) -> Self {
        Self {
            name: name.into(),
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    /// 1-based line lookup
    pub fn line(&self, line: u32) -> Option<&str> {
        let index = (line as usize).checked_sub(1)?;
        self.lines.get(index).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
}

/// Stack layout of a call: callee, positionals, [spread], keyword values, [keyword spread]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallShape {
    pub positional: usize,
    pub spread: bool,
    pub keywords: Vec<Rc<str>>,
    pub keyword_spread: bool,
}

impl CallShape {
    pub fn stack_len(&self) -> usize {
        self.positional + self.spread as usize + self.keywords.len() + self.keyword_spread as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Required,
    Optional,
    Rest,
    Keywords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: Rc<str>,
    pub kind: ParamKind,
}

/// Everything `def` knows at compile time; defaults are evaluated at runtime
#[derive(Debug)]
pub struct FunctionProto {
    pub name: Rc<str>,
    pub params: Vec<ParamSpec>,
    pub code: Rc<Code>,
    pub is_generator: bool,
}

impl FunctionProto {
    pub fn default_count(&self) -> usize {
        self.params.iter().filter(|p| p.kind == ParamKind::Optional).count()
    }
}

#[derive(Debug, Clone)]
pub enum Op {
    Const(Constant),
    Load(Rc<str>),
    Store(Rc<str>),
    LoadAttr(Rc<str>),
    StoreAttr(Rc<str>),
    /// object, index -> value
    LoadIndex,
    /// object, index, value ->
    StoreIndex,
    /// object, start, end -> value
    Slice,
    BuildList(usize),
    BuildDict(usize),
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CompareOp),
    Jump(usize),
    PopJumpIfFalse(usize),
    JumpIfFalseOrPop(usize),
    JumpIfTrueOrPop(usize),
    Call(Rc<CallShape>),
    /// Pops the evaluated defaults
    MakeFunction(Rc<FunctionProto>),
    /// Pushes the module's reference cell
    Import(Rc<str>),
    /// Pushes the current value of `name` inside `module`
    ImportFrom { module: Rc<str>, name: Rc<str> },
    GetIter,
    /// Pushes the next item, or pops the iterator and jumps when exhausted
    ForIter(usize),
    /// Pushes the items of a sequence of exactly `n` elements, first item on top
    Unpack(usize),
    Yield,
    Return,
    Pop,
    Raise,
    Assert { has_message: bool },
    Dup,
    Dup2,
}

/// A compiled function or module body
pub struct Code {
    pub name: Rc<str>,
    pub ops: Vec<Op>,
    /// Source line of each op
    pub lines: Vec<u32>,
    pub source: Rc<Source>,
}

impl Code {
    pub fn line_at(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(0)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Code")
            .field("name", &self.name)
            .field("file", &self.source.name)
            .field("ops", &self.ops.len())
            .finish()
    }
}
