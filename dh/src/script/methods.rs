//! Methods on strings, lists and dicts

use std::rc::Rc;

use super::error::{ErrorKind, ScriptError};
use super::value::{CallArgs, Dict, List, Value};
use super::vm::Vm;

type StrMethod = fn(&str, &mut Vm<'_>, CallArgs) -> Result<Value, ScriptError>;
type ListMethod = fn(&List, &mut Vm<'_>, CallArgs) -> Result<Value, ScriptError>;
type DictMethod = fn(&Dict, &mut Vm<'_>, CallArgs) -> Result<Value, ScriptError>;

/// Look up a method and bind it to `value`
pub fn method(value: &Value, name: &str) -> Result<Value, ScriptError> {
    let found = match value {
        Value::Str(s) => str_method(s.clone(), name),
        Value::List(items) => list_method(items.clone(), name),
        Value::Dict(entries) => dict_method(entries.clone(), name),
        _ => None,
    };
    found.ok_or_else(|| ScriptError::attribute_error(value.type_name(), name))
}

fn str_method(receiver: Rc<str>, name: &str) -> Option<Value> {
    let f: StrMethod = match name {
        "upper" => |s, _, _| Ok(Value::from(s.to_uppercase())),
        "lower" => |s, _, _| Ok(Value::from(s.to_lowercase())),
        "strip" => |s, _, args| Ok(trim(s, &args, true, true)),
        "lstrip" => |s, _, args| Ok(trim(s, &args, true, false)),
        "rstrip" => |s, _, args| Ok(trim(s, &args, false, true)),
        "split" => |s, _, args| {
            let parts: Vec<Value> = match args.get(0, "sep") {
                None | Some(Value::None) => s.split_whitespace().map(Value::from).collect(),
                Some(Value::Str(sep)) if sep.is_empty() => {
                    return Err(ScriptError::value_error("empty separator"));
                }
                Some(Value::Str(sep)) => s.split(&**sep).map(Value::from).collect(),
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "must be str or none, not {}",
                        other.type_name()
                    )));
                }
            };
            Ok(Value::list(parts))
        },
        "join" => |s, vm, args| {
            let items = vm.collect(args.require("join", 0, "iterable")?)?;
            let mut parts = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let part = item.as_str().ok_or_else(|| {
                    ScriptError::type_error(format!(
                        "sequence item {}: expected str instance, {} found",
                        index,
                        item.type_name()
                    ))
                })?;
                parts.push(part.to_string());
            }
            Ok(Value::from(parts.join(s)))
        },
        "replace" => |s, _, args| {
            let old = args.require_str("replace", 0, "old")?;
            let new = args.require_str("replace", 1, "new")?;
            Ok(Value::from(s.replace(old, new)))
        },
        "startswith" => |s, _, args| Ok(Value::Bool(s.starts_with(args.require_str("startswith", 0, "prefix")?))),
        "endswith" => |s, _, args| Ok(Value::Bool(s.ends_with(args.require_str("endswith", 0, "suffix")?))),
        "format" => |s, _, args| Ok(Value::from(format_template(s, &args)?)),
        "find" => |s, _, args| {
            let needle = args.require_str("find", 0, "sub")?;
            let index = s
                .find(needle)
                .map(|byte| s[..byte].chars().count() as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        },
        "count" => |s, _, args| {
            let needle = args.require_str("count", 0, "sub")?;
            let count = if needle.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(count as i64))
        },
        _ => return None,
    };
    Some(Value::native(name, move |vm, args| f(&receiver, vm, args)))
}

fn trim(s: &str, args: &CallArgs, start: bool, end: bool) -> Value {
    let chars: Option<Vec<char>> = args.get(0, "chars").and_then(Value::as_str).map(|c| c.chars().collect());
    let matches = |c: char| match &chars {
        Some(set) => set.contains(&c),
        None => c.is_whitespace(),
    };
    let mut out = s;
    if start {
        out = out.trim_start_matches(matches);
    }
    if end {
        out = out.trim_end_matches(matches);
    }
    Value::from(out)
}

fn list_method(receiver: List, name: &str) -> Option<Value> {
    let f: ListMethod = match name {
        "append" => |items, _, args| {
            let value = args.require("append", 0, "item")?.clone();
            items.borrow_mut().push(value);
            Ok(Value::None)
        },
        "extend" => |items, vm, args| {
            let more = vm.collect(args.require("extend", 0, "iterable")?)?;
            items.borrow_mut().extend(more);
            Ok(Value::None)
        },
        "pop" => |items, _, args| {
            let mut items = items.borrow_mut();
            if items.is_empty() {
                return Err(ScriptError::new(ErrorKind::Index, "pop from empty list"));
            }
            let len = items.len() as i64;
            let index = match args.get(0, "index") {
                Some(value) => value
                    .as_int()
                    .ok_or_else(|| ScriptError::type_error("list indices must be integers"))?,
                None => -1,
            };
            let index = if index < 0 { index + len } else { index };
            if !(0..len).contains(&index) {
                return Err(ScriptError::new(ErrorKind::Index, "pop index out of range"));
            }
            Ok(items.remove(index as usize))
        },
        "index" => |items, _, args| {
            let needle = args.require("index", 0, "item")?;
            items
                .borrow()
                .iter()
                .position(|v| v.equals(needle))
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| ScriptError::value_error(format!("{} is not in list", needle.repr())))
        },
        _ => return None,
    };
    Some(Value::native(name, move |vm, args| f(&receiver, vm, args)))
}

fn dict_method(receiver: Dict, name: &str) -> Option<Value> {
    let f: DictMethod = match name {
        "get" => |entries, _, args| {
            let key = args.require("get", 0, "key")?;
            let found = key.as_str().and_then(|k| entries.borrow().get(k).cloned());
            Ok(found.unwrap_or_else(|| args.get(1, "default").cloned().unwrap_or_default()))
        },
        "keys" => |entries, _, _| Ok(Value::list(entries.borrow().keys().map(Value::str).collect())),
        "values" => |entries, _, _| Ok(Value::list(entries.borrow().values().cloned().collect())),
        "items" => |entries, _, _| {
            let items = entries
                .borrow()
                .iter()
                .map(|(k, v)| Value::list(vec![Value::str(k), v.clone()]))
                .collect();
            Ok(Value::list(items))
        },
        "update" => |entries, _, args| {
            let mut updates: Vec<(String, Value)> = match args.positional.first() {
                Some(Value::Dict(other)) => other.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                Some(other) => {
                    return Err(ScriptError::type_error(format!(
                        "update() argument must be a dict, not {}",
                        other.type_name()
                    )));
                }
                None => Vec::new(),
            };
            updates.extend(args.keywords.into_iter());
            entries.borrow_mut().extend(updates);
            Ok(Value::None)
        },
        "pop" => |entries, _, args| {
            let key = args.require("pop", 0, "key")?;
            let removed = key.as_str().and_then(|k| entries.borrow_mut().shift_remove(k));
            match (removed, args.get(1, "default")) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(ScriptError::new(ErrorKind::Key, key.repr())),
            }
        },
        _ => return None,
    };
    Some(Value::native(name, move |vm, args| f(&receiver, vm, args)))
}

/// `'{} and {name:.2f}'.format(...)`
pub fn format_template(template: &str, args: &CallArgs) -> Result<String, ScriptError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut next_auto = 0;
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut field = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => field.push(c),
                        None => return Err(ScriptError::value_error("unmatched '{' in format string")),
                    }
                }
                let (key, spec) = field.split_once(':').unwrap_or((field.as_str(), ""));
                let value = if key.is_empty() {
                    let value = args.positional.get(next_auto);
                    next_auto += 1;
                    value
                } else if let Ok(index) = key.parse::<usize>() {
                    args.positional.get(index)
                } else {
                    args.keywords.get(key)
                };
                let value = value.ok_or_else(|| {
                    ScriptError::new(ErrorKind::Key, format!("format field '{}' has no value", key))
                })?;
                out.push_str(&format_value(value, spec)?);
            }
            '}' => return Err(ScriptError::value_error("single '}' encountered in format string")),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Format one value with a small spec language: `.Nf`, `d`, `s` or empty
pub fn format_value(value: &Value, spec: &str) -> Result<String, ScriptError> {
    if spec.is_empty() || spec == "s" {
        return Ok(value.to_string());
    }
    if spec == "d" {
        return value
            .as_int()
            .map(|i| i.to_string())
            .ok_or_else(|| ScriptError::value_error(format!("cannot format {} with 'd'", value.type_name())));
    }
    if let Some(precision) = spec.strip_prefix('.').and_then(|p| p.strip_suffix('f')) {
        let precision: usize = precision
            .parse()
            .map_err(|_| ScriptError::value_error(format!("invalid format spec '{}'", spec)))?;
        let number = value
            .as_float()
            .ok_or_else(|| ScriptError::value_error(format!("cannot format {} with 'f'", value.type_name())))?;
        return Ok(format!("{:.*}", precision, number));
    }
    Err(ScriptError::value_error(format!("unsupported format spec '{}'", spec)))
}
