//! Runtime values

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::code::FunctionProto;
use super::error::{ErrorKind, ScriptError};
use super::sequence::Sequence;
use super::vm::{MAX_DEPTH, Vm};

pub type List = Rc<RefCell<Vec<Value>>>;
pub type Dict = Rc<RefCell<IndexMap<String, Value>>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(List),
    Dict(Dict),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    Object(Rc<dyn ScriptObject>),
    Seq(Sequence),
}

impl Value {
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(entries: IndexMap<String, Value>) -> Self {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn native<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Vm<'_>, CallArgs) -> Result<Value, ScriptError> + 'static,
    {
        Value::Native(Rc::new(NativeFunction::new(name, func)))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin",
            Value::Object(object) => object.type_name(),
            Value::Seq(_) => "sequence",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.borrow().is_empty(),
            Value::Dict(entries) => !entries.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(*b as i64 as f64),
            _ => None,
        }
    }

    /// Quoted form, used inside containers and by `repr()`
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => quote(s),
            other => other.to_string(),
        }
    }

    /// Structural equality; identity for functions, objects and sequences
    pub fn equals(&self, other: &Value) -> bool {
        self.equals_at(other, 0)
    }

    // Containers nested past MAX_DEPTH compare unequal, which also ends cycles
    fn equals_at(&self, other: &Value, depth: usize) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
                self.as_float() == other.as_float()
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b)
                    || depth < MAX_DEPTH && {
                        let (a, b) = (a.borrow(), b.borrow());
                        a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals_at(y, depth + 1))
                    }
            }
            (Value::Dict(a), Value::Dict(b)) => {
                Rc::ptr_eq(a, b)
                    || depth < MAX_DEPTH && {
                        let (a, b) = (a.borrow(), b.borrow());
                        a.len() == b.len()
                            && a.iter()
                                .all(|(k, v)| b.get(k).map(|w| v.equals_at(w, depth + 1)).unwrap_or(false))
                    }
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Seq(a), Value::Seq(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Writes a container, printing one already open on the way down (or nested too deep) as `[...]` / `{...}`
    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, open: &mut Vec<*const ()>) -> fmt::Result {
        let (id, list) = match self {
            Value::List(items) => (Rc::as_ptr(items) as *const (), true),
            Value::Dict(entries) => (Rc::as_ptr(entries) as *const (), false),
            Value::Str(s) => return f.write_str(&quote(s)),
            other => return write!(f, "{}", other),
        };
        if open.contains(&id) || open.len() >= MAX_DEPTH {
            return f.write_str(if list { "[...]" } else { "{...}" });
        }
        open.push(id);
        match self {
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt_nested(f, open)?;
                }
                f.write_str("]")?;
            }
            Value::Dict(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", quote(key))?;
                    value.fmt_nested(f, open)?;
                }
                f.write_str("}")?;
            }
            _ => {}
        }
        open.pop();
        Ok(())
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

pub fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Display form: strings unquoted, everything else as written in source
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", format_float(*x)),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(_) | Value::Dict(_) => self.fmt_nested(f, &mut Vec::new()),
            Value::Function(function) => write!(f, "<function {}>", function.proto.name),
            Value::Native(native) => write!(f, "<builtin {}>", native.name),
            Value::Object(object) => write!(f, "{}", object.repr()),
            Value::Seq(seq) => write!(f, "<sequence {}>", seq.name()),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::list(items)
    }
}

impl From<Sequence> for Value {
    fn from(seq: Sequence) -> Self {
        Value::Seq(seq)
    }
}

/// Arguments of a call after spreading
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    pub positional: Vec<Value>,
    pub keywords: IndexMap<String, Value>,
}

impl CallArgs {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: IndexMap::new(),
        }
    }

    pub fn with_keyword(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keywords.insert(name.to_string(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keywords.is_empty()
    }

    /// Positional argument `index`, or keyword `name`
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keywords.get(name))
    }

    pub fn require(&self, function: &str, index: usize, name: &str) -> Result<&Value, ScriptError> {
        self.get(index, name).ok_or_else(|| {
            ScriptError::type_error(format!("{}() missing required argument '{}'", function, name))
        })
    }

    pub fn require_str(&self, function: &str, index: usize, name: &str) -> Result<&str, ScriptError> {
        let value = self.require(function, index, name)?;
        value.as_str().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() argument '{}' must be str, not {}",
                function,
                name,
                value.type_name()
            ))
        })
    }

    pub fn require_int(&self, function: &str, index: usize, name: &str) -> Result<i64, ScriptError> {
        let value = self.require(function, index, name)?;
        value.as_int().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() argument '{}' must be int, not {}",
                function,
                name,
                value.type_name()
            ))
        })
    }
}

/// A function defined in template source
pub struct Function {
    pub proto: Rc<FunctionProto>,
    pub defaults: Vec<Value>,
    pub env: Rc<Env>,
}

pub type NativeFn = dyn Fn(&mut Vm<'_>, CallArgs) -> Result<Value, ScriptError>;

/// A function implemented in Rust
pub struct NativeFunction {
    pub name: String,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Vm<'_>, CallArgs) -> Result<Value, ScriptError> + 'static,
    {
        Self {
            name: name.to_string(),
            func: Box::new(func),
        }
    }

    pub fn invoke(&self, vm: &mut Vm<'_>, args: CallArgs) -> Result<Value, ScriptError> {
        (self.func)(vm, args)
    }
}

/// Host objects reachable from template code
pub trait ScriptObject {
    fn type_name(&self) -> &str;

    fn get_attr(&self, name: &str) -> Result<Value, ScriptError>;

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::new(
            ErrorKind::Attribute,
            format!("cannot set attribute '{}' on '{}' object", name, self.type_name()),
        ))
    }

    fn call(&self, _vm: &mut Vm<'_>, _args: CallArgs) -> Result<Value, ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not callable",
            self.type_name()
        )))
    }

    fn repr(&self) -> String {
        format!("<{}>", self.type_name())
    }
}

/// Names visible after every namespace in the chain has been searched
pub trait Builtins {
    fn lookup(&self, name: &str) -> Option<Value>;
}

/// Builtins table with nothing in it
pub struct NoBuiltins;

impl Builtins for NoBuiltins {
    fn lookup(&self, _name: &str) -> Option<Value> {
        None
    }
}

/// A scope: function locals, or a module namespace at the root of a chain
pub struct Env {
    vars: RefCell<IndexMap<String, Value>>,
    parent: Option<Rc<Env>>,
    builtins: Rc<dyn Builtins>,
}

impl Env {
    pub fn root(builtins: Rc<dyn Builtins>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(IndexMap::new()),
            parent: None,
            builtins,
        })
    }

    pub fn child(parent: &Rc<Env>) -> Rc<Env> {
        Rc::new(Env {
            vars: RefCell::new(IndexMap::new()),
            parent: Some(parent.clone()),
            builtins: parent.builtins.clone(),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        match &self.parent {
            Some(parent) => parent.lookup(name),
            None => self.builtins.lookup(name),
        }
    }

    pub fn get_local(&self, name: &str) -> Option<Value> {
        self.vars.borrow().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.vars.borrow_mut().shift_remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.vars.borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Env")
            .field("names", &self.names())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
