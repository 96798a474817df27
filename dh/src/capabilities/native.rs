//! Native modules importable through the allow-list

use std::rc::Rc;

use indexmap::IndexMap;

use super::builtins::{format_time, now};
use super::escape::{escape_html, escape_xml, unescape_html};
use crate::script::{CallArgs, ErrorKind, ScriptError, ScriptObject, Value, Vm};

/// A module implemented in Rust
pub struct NativeModule {
    name: String,
    members: IndexMap<String, Value>,
}

impl NativeModule {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            members: IndexMap::new(),
        }
    }

    pub fn value(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.members.insert(name.to_string(), value.into());
        self
    }

    pub fn function<F>(self, name: &str, func: F) -> Self
    where
        F: Fn(&mut Vm<'_>, CallArgs) -> Result<Value, ScriptError> + 'static,
    {
        let value = Value::native(&format!("{}.{}", self.name, name), func);
        self.value(name, value)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn into_value(self) -> Value {
        Value::Object(Rc::new(self))
    }
}

impl ScriptObject for NativeModule {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_attr(&self, name: &str) -> Result<Value, ScriptError> {
        self.members.get(name).cloned().ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Attribute,
                format!("module '{}' has no attribute '{}'", self.name, name),
            )
        })
    }

    fn repr(&self) -> String {
        format!("<module '{}' (native)>", self.name)
    }
}

fn number(args: &CallArgs, function: &str) -> Result<f64, ScriptError> {
    let value = args.require(function, 0, "x")?;
    value.as_float().ok_or_else(|| {
        ScriptError::type_error(format!("{}() argument must be a number, not {}", function, value.type_name()))
    })
}

pub fn math() -> NativeModule {
    NativeModule::new("math")
        .value("pi", std::f64::consts::PI)
        .function("ceil", |_, args| Ok(Value::Int(number(&args, "ceil")?.ceil() as i64)))
        .function("floor", |_, args| Ok(Value::Int(number(&args, "floor")?.floor() as i64)))
        .function("sqrt", |_, args| {
            let x = number(&args, "sqrt")?;
            if x < 0.0 {
                return Err(ScriptError::value_error("math domain error"));
            }
            Ok(Value::Float(x.sqrt()))
        })
}

pub fn json() -> NativeModule {
    NativeModule::new("json")
        .function("dumps", |vm, args| {
            let value = args.require("dumps", 0, "obj")?;
            let json = to_json(vm, value)?;
            let pretty = args.get(1, "indent").map(Value::truthy).unwrap_or(false);
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            text.map(Value::from)
                .map_err(|e| ScriptError::value_error(e.to_string()))
        })
        .function("loads", |_, args| {
            let text = args.require_str("loads", 0, "s")?;
            let json: serde_json::Value =
                serde_json::from_str(text).map_err(|e| ScriptError::value_error(e.to_string()))?;
            Ok(from_json(&json))
        })
}

pub fn time() -> NativeModule {
    NativeModule::new("time")
        .function("now", |_, _| Ok(Value::Float(now())))
        .function("format", |_, args| format_time(&args).map(Value::from))
}

pub fn html() -> NativeModule {
    NativeModule::new("html")
        .function("escape", |_, args| {
            let text = args.require("escape", 0, "s")?.to_string();
            let quote = args.get(1, "quote").map(Value::truthy).unwrap_or(true);
            Ok(Value::from(if quote { escape_html(&text) } else { escape_xml(&text) }))
        })
        .function("unescape", |_, args| {
            let text = args.require_str("unescape", 0, "s")?;
            Ok(Value::from(unescape_html(text)))
        })
}

/// The native modules every engine offers (still subject to the allow-list)
pub fn standard() -> Vec<NativeModule> {
    vec![math(), json(), time(), html()]
}

pub fn to_json(vm: &mut Vm<'_>, value: &Value) -> Result<serde_json::Value, ScriptError> {
    Ok(match value {
        Value::None => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| ScriptError::value_error("cannot encode non-finite float"))?,
        Value::Str(s) => serde_json::Value::String(s.to_string()),
        Value::Dict(entries) => {
            let entries: Vec<(String, Value)> =
                entries.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            let mut map = serde_json::Map::new();
            for (key, value) in entries {
                map.insert(key, to_json(vm, &value)?);
            }
            serde_json::Value::Object(map)
        }
        Value::List(_) | Value::Seq(_) => {
            let items = vm.collect(value)?;
            let mut array = Vec::with_capacity(items.len());
            for item in &items {
                array.push(to_json(vm, item)?);
            }
            serde_json::Value::Array(array)
        }
        other => {
            return Err(ScriptError::type_error(format!(
                "object of type '{}' is not JSON serializable",
                other.type_name()
            )));
        }
    })
}

pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::dict(map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect())
        }
    }
}

/// Convert configuration values into template values
pub fn from_yaml(yaml: &serde_yaml::Value) -> Value {
    match yaml {
        serde_yaml::Value::Null => Value::None,
        serde_yaml::Value::Bool(b) => Value::Bool(*b),
        serde_yaml::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_yaml::Value::String(s) => Value::from(s.as_str()),
        serde_yaml::Value::Sequence(items) => Value::list(items.iter().map(from_yaml).collect()),
        serde_yaml::Value::Mapping(map) => Value::dict(
            map.iter()
                .map(|(k, v)| {
                    let key = match k {
                        serde_yaml::Value::String(s) => s.clone(),
                        other => serde_yaml::to_string(other)
                            .map(|s| s.trim().to_string())
                            .unwrap_or_default(),
                    };
                    (key, from_yaml(v))
                })
                .collect(),
        ),
        serde_yaml::Value::Tagged(tagged) => from_yaml(&tagged.value),
    }
}
