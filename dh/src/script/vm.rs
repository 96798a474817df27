//! Bytecode interpreter
//!
//! Calls run to completion on the Rust stack. Generator functions are the
//! exception: calling one builds a `Frame` and parks it inside a
//! `Sequence`; every pull resumes the frame until its next `yield`.

use std::rc::Rc;

use tracing::debug;

use super::code::{CallShape, Code, Constant, Op, ParamKind};
use super::error::{ErrorKind, ScriptError, TraceEntry};
use super::methods;
use super::ops;
use super::sequence::{Producer, Sequence};
use super::value::{CallArgs, Env, Function, Value};

/// Nested calls plus generator resumptions
pub const MAX_DEPTH: usize = 200;

/// Finds modules named by `import`
pub trait ModuleResolver {
    fn resolve_module(&self, name: &str) -> Result<Value, ScriptError>;
}

/// Resolver that knows no modules
pub struct NoModules;

impl ModuleResolver for NoModules {
    fn resolve_module(&self, name: &str) -> Result<Value, ScriptError> {
        Err(ScriptError::new(
            ErrorKind::Import,
            format!("No module named '{}'", name),
        ))
    }
}

struct Frame {
    code: Rc<Code>,
    env: Rc<Env>,
    pc: usize,
    stack: Vec<Value>,
}

impl Frame {
    fn new(code: Rc<Code>, env: Rc<Env>) -> Self {
        Self {
            code,
            env,
            pc: 0,
            stack: Vec::new(),
        }
    }

    /// Compiled code never pops an empty stack; debug builds catch a compiler bug here
    fn pop(&mut self) -> Value {
        let value = self.stack.pop();
        debug_assert!(value.is_some(), "operand stack underflow in {}", self.code.name);
        value.unwrap_or_default()
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        debug_assert!(n <= self.stack.len(), "operand stack underflow in {}", self.code.name);
        let at = self.stack.len().saturating_sub(n);
        self.stack.split_off(at)
    }

    fn trace_entry(&self) -> TraceEntry {
        let line = self.code.line_at(self.pc.saturating_sub(1));
        TraceEntry {
            file: self.code.source.name.clone(),
            line,
            column: None,
            function: Some(self.code.name.to_string()),
            source_line: self.code.source.line(line).map(str::to_string),
        }
    }
}

enum Exit {
    Return(Value),
    Yield(Value),
}

/// Suspended generator frame
struct Generator {
    frame: Option<Frame>,
}

impl Producer for Generator {
    fn next(&mut self, vm: &mut Vm<'_>) -> Result<Option<Value>, ScriptError> {
        let Some(frame) = self.frame.as_mut() else {
            return Ok(None);
        };
        match vm.run(frame)? {
            Exit::Yield(value) => Ok(Some(value)),
            Exit::Return(_) => {
                self.frame = None;
                Ok(None)
            }
        }
    }
}

pub struct Vm<'r> {
    resolver: &'r dyn ModuleResolver,
    depth: usize,
}

impl<'r> Vm<'r> {
    pub fn new(resolver: &'r dyn ModuleResolver) -> Self {
        Self { resolver, depth: 0 }
    }

    pub fn resolver(&self) -> &'r dyn ModuleResolver {
        self.resolver
    }

    /// Run module-level code with `env` as its namespace
    pub fn execute(&mut self, code: Rc<Code>, env: Rc<Env>) -> Result<(), ScriptError> {
        debug!(file = %code.source.name, "Vm::execute: called");
        let mut frame = Frame::new(code, env);
        self.run(&mut frame).map(|_| ())
    }

    pub fn call(&mut self, callee: &Value, args: CallArgs) -> Result<Value, ScriptError> {
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Native(native) => native.invoke(self, args),
            Value::Object(object) => object.call(self, args),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: CallArgs) -> Result<Value, ScriptError> {
        let env = bind_args(function, args)?;
        let mut frame = Frame::new(function.proto.code.clone(), env);
        if function.proto.is_generator {
            let generator = Generator { frame: Some(frame) };
            return Ok(Value::Seq(Sequence::new(&function.proto.name, Box::new(generator))));
        }
        match self.run(&mut frame)? {
            Exit::Return(value) | Exit::Yield(value) => Ok(value),
        }
    }

    /// Sequence over the items of an iterable value
    pub fn iterate(&mut self, value: &Value) -> Result<Sequence, ScriptError> {
        match value {
            Value::Seq(seq) => Ok(seq.clone()),
            Value::List(items) => Ok(Sequence::from_values("list", items.borrow().clone())),
            Value::Dict(entries) => {
                let keys = entries.borrow().keys().map(|k| Value::str(k)).collect();
                Ok(Sequence::from_values("dict", keys))
            }
            Value::Str(s) => {
                let chars = s.chars().map(|c| Value::from(c.to_string())).collect();
                Ok(Sequence::from_values("str", chars))
            }
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    /// All items of an iterable value; drains sequences
    pub fn collect(&mut self, value: &Value) -> Result<Vec<Value>, ScriptError> {
        match value {
            Value::List(items) => Ok(items.borrow().clone()),
            other => {
                let seq = self.iterate(other)?;
                seq.collect(self)
            }
        }
    }

    fn run(&mut self, frame: &mut Frame) -> Result<Exit, ScriptError> {
        if self.depth >= MAX_DEPTH {
            return Err(ScriptError::new(
                ErrorKind::Recursion,
                "maximum recursion depth exceeded",
            ));
        }
        self.depth += 1;
        let result = self.run_ops(frame);
        self.depth -= 1;
        result.map_err(|err| err.with_frame(frame.trace_entry()))
    }

    fn run_ops(&mut self, frame: &mut Frame) -> Result<Exit, ScriptError> {
        let code = frame.code.clone();
        loop {
            let Some(op) = code.ops.get(frame.pc) else {
                return Ok(Exit::Return(Value::None));
            };
            frame.pc += 1;
            match op {
                Op::Const(constant) => frame.push(constant_value(constant)),
                Op::Load(name) => {
                    let value = frame.env.lookup(name).ok_or_else(|| ScriptError::name_error(name))?;
                    frame.push(value);
                }
                Op::Store(name) => {
                    let value = frame.pop();
                    frame.env.set(name, value);
                }
                Op::LoadAttr(name) => {
                    let object = frame.pop();
                    frame.push(get_attr(&object, name)?);
                }
                Op::StoreAttr(name) => {
                    let value = frame.pop();
                    let object = frame.pop();
                    set_attr(&object, name, value)?;
                }
                Op::LoadIndex => {
                    let index = frame.pop();
                    let object = frame.pop();
                    frame.push(ops::get_index(&object, &index)?);
                }
                Op::StoreIndex => {
                    let value = frame.pop();
                    let index = frame.pop();
                    let object = frame.pop();
                    ops::set_index(&object, &index, value)?;
                }
                Op::Slice => {
                    let end = frame.pop();
                    let start = frame.pop();
                    let object = frame.pop();
                    frame.push(ops::slice(&object, &start, &end)?);
                }
                Op::BuildList(n) => {
                    let items = frame.pop_n(*n);
                    frame.push(Value::list(items));
                }
                Op::BuildDict(n) => {
                    let dict = build_dict(frame.pop_n(*n * 2))?;
                    frame.push(dict);
                }
                Op::Unary(op) => {
                    let operand = frame.pop();
                    frame.push(ops::unary(*op, &operand)?);
                }
                Op::Binary(op) => {
                    let right = frame.pop();
                    let left = frame.pop();
                    frame.push(ops::binary(*op, &left, &right)?);
                }
                Op::Compare(op) => {
                    let right = frame.pop();
                    let left = frame.pop();
                    frame.push(ops::compare(*op, &left, &right)?);
                }
                Op::Jump(target) => frame.pc = *target,
                Op::PopJumpIfFalse(target) => {
                    if !frame.pop().truthy() {
                        frame.pc = *target;
                    }
                }
                Op::JumpIfFalseOrPop(target) => {
                    if frame.stack.last().map(Value::truthy).unwrap_or(false) {
                        frame.pop();
                    } else {
                        frame.pc = *target;
                    }
                }
                Op::JumpIfTrueOrPop(target) => {
                    if frame.stack.last().map(Value::truthy).unwrap_or(false) {
                        frame.pc = *target;
                    } else {
                        frame.pop();
                    }
                }
                Op::Call(shape) => {
                    let values = frame.pop_n(shape.stack_len());
                    let callee = frame.pop();
                    let args = self.build_args(values, shape)?;
                    let result = self.call(&callee, args)?;
                    frame.push(result);
                }
                Op::MakeFunction(proto) => {
                    let defaults = frame.pop_n(proto.default_count());
                    let function = Function {
                        proto: proto.clone(),
                        defaults,
                        env: frame.env.clone(),
                    };
                    frame.push(Value::Function(Rc::new(function)));
                }
                Op::Import(module) => {
                    let value = self.resolver.resolve_module(module)?;
                    frame.push(value);
                }
                Op::ImportFrom { module, name } => {
                    let source = self.resolver.resolve_module(module)?;
                    let value = get_attr(&source, name).map_err(|err| {
                        if err.kind == ErrorKind::Attribute {
                            ScriptError::new(
                                ErrorKind::Import,
                                format!("cannot import name '{}' from '{}'", name, module),
                            )
                        } else {
                            err
                        }
                    })?;
                    frame.push(value);
                }
                Op::GetIter => {
                    let value = frame.pop();
                    let seq = self.iterate(&value)?;
                    frame.push(Value::Seq(seq));
                }
                Op::ForIter(target) => {
                    let Some(Value::Seq(seq)) = frame.stack.last().cloned() else {
                        return Err(ScriptError::type_error("for loop over a non-iterator"));
                    };
                    match seq.next(self)? {
                        Some(value) => frame.push(value),
                        None => {
                            frame.pop();
                            frame.pc = *target;
                        }
                    }
                }
                Op::Unpack(n) => {
                    let value = frame.pop();
                    let items = self.collect(&value)?;
                    if items.len() != *n {
                        return Err(ScriptError::value_error(format!(
                            "expected {} values to unpack, got {}",
                            n,
                            items.len()
                        )));
                    }
                    for item in items.into_iter().rev() {
                        frame.push(item);
                    }
                }
                Op::Yield => return Ok(Exit::Yield(frame.pop())),
                Op::Return => return Ok(Exit::Return(frame.pop())),
                Op::Pop => {
                    frame.pop();
                }
                Op::Raise => {
                    let value = frame.pop();
                    return Err(ScriptError::new(ErrorKind::Raised, value.to_string()));
                }
                Op::Assert { has_message } => {
                    let message = if *has_message { frame.pop().to_string() } else { String::new() };
                    if !frame.pop().truthy() {
                        return Err(ScriptError::new(ErrorKind::Assertion, message));
                    }
                }
                Op::Dup => {
                    let top = frame.stack.last().cloned().unwrap_or_default();
                    frame.push(top);
                }
                Op::Dup2 => {
                    let top = frame.pop_n(2);
                    frame.stack.extend(top.iter().cloned());
                    frame.stack.extend(top);
                }
            }
        }
    }

    fn build_args(&mut self, values: Vec<Value>, shape: &CallShape) -> Result<CallArgs, ScriptError> {
        let mut values = values.into_iter();
        let mut args = CallArgs::default();
        args.positional.extend(values.by_ref().take(shape.positional));
        if shape.spread {
            let spread = values.next().unwrap_or_default();
            let items = self.collect(&spread)?;
            args.positional.extend(items);
        }
        for name in &shape.keywords {
            args.keywords.insert(name.to_string(), values.next().unwrap_or_default());
        }
        if shape.keyword_spread {
            match values.next().unwrap_or_default() {
                Value::Dict(entries) => {
                    for (key, value) in entries.borrow().iter() {
                        args.keywords.insert(key.clone(), value.clone());
                    }
                }
                other => {
                    return Err(ScriptError::type_error(format!(
                        "argument after ** must be a dict, not {}",
                        other.type_name()
                    )));
                }
            }
        }
        Ok(args)
    }
}

fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::None => Value::None,
        Constant::Bool(b) => Value::Bool(*b),
        Constant::Int(i) => Value::Int(*i),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::Str(s.clone()),
    }
}

fn build_dict(values: Vec<Value>) -> Result<Value, ScriptError> {
    let mut entries = indexmap::IndexMap::with_capacity(values.len() / 2);
    let mut values = values.into_iter();
    while let (Some(key), Some(value)) = (values.next(), values.next()) {
        let Value::Str(key) = key else {
            return Err(ScriptError::type_error(format!(
                "dict keys must be strings, not {}",
                key.type_name()
            )));
        };
        entries.insert(key.to_string(), value);
    }
    Ok(Value::dict(entries))
}

/// Attribute lookup: host objects first, then built-in methods
pub fn get_attr(value: &Value, name: &str) -> Result<Value, ScriptError> {
    match value {
        Value::Object(object) => object.get_attr(name),
        other => methods::method(other, name),
    }
}

pub fn set_attr(value: &Value, name: &str, new_value: Value) -> Result<(), ScriptError> {
    match value {
        Value::Object(object) => object.set_attr(name, new_value),
        other => Err(ScriptError::new(
            ErrorKind::Attribute,
            format!("cannot set attribute '{}' on '{}' object", name, other.type_name()),
        )),
    }
}

fn bind_args(function: &Function, mut args: CallArgs) -> Result<Rc<Env>, ScriptError> {
    let proto = &function.proto;
    let env = Env::child(&function.env);
    let given = args.positional.len();
    let mut positional = std::mem::take(&mut args.positional).into_iter();
    let mut defaults = function.defaults.iter();
    let mut named = 0;
    let mut accepts_rest = false;

    for param in &proto.params {
        match param.kind {
            ParamKind::Required | ParamKind::Optional => {
                named += 1;
                let default = match param.kind {
                    ParamKind::Optional => defaults.next().cloned(),
                    _ => None,
                };
                let value = match positional.next() {
                    Some(value) => {
                        if args.keywords.contains_key(&*param.name) {
                            return Err(ScriptError::type_error(format!(
                                "{}() got multiple values for argument '{}'",
                                proto.name, param.name
                            )));
                        }
                        value
                    }
                    None => match args.keywords.shift_remove(&*param.name) {
                        Some(value) => value,
                        None => default.ok_or_else(|| {
                            ScriptError::type_error(format!(
                                "{}() missing required argument '{}'",
                                proto.name, param.name
                            ))
                        })?,
                    },
                };
                env.set(&param.name, value);
            }
            ParamKind::Rest => {
                accepts_rest = true;
                env.set(&param.name, Value::list(positional.by_ref().collect()));
            }
            ParamKind::Keywords => {
                env.set(&param.name, Value::dict(std::mem::take(&mut args.keywords)));
            }
        }
    }

    if !accepts_rest && given > named {
        return Err(ScriptError::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            proto.name, named, given
        )));
    }
    // remaining keywords without a ** collector are ignored
    Ok(env)
}
