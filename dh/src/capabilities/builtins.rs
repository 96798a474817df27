//! Built-in functions available to every template

use std::cmp::Ordering;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::escape;
use crate::script::methods::format_template;
use crate::script::ops::compare_values;
use crate::script::{CallArgs, ScriptError, Sequence, Value, Vm};

pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Seconds since the epoch
pub fn now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

/// `formatTime(timestamp=none, format=...)`, in UTC
pub fn format_time(args: &CallArgs) -> Result<String, ScriptError> {
    let timestamp = match args.get(0, "timestamp") {
        None | Some(Value::None) => now(),
        Some(value) => value
            .as_float()
            .ok_or_else(|| ScriptError::type_error("timestamp must be a number"))?,
    };
    let format = match args.get(1, "format") {
        None | Some(Value::None) => DEFAULT_TIME_FORMAT,
        Some(value) => value
            .as_str()
            .ok_or_else(|| ScriptError::type_error("format must be a string"))?,
    };
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(ScriptError::value_error(format!("invalid time format '{}'", format)));
    }
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9) as u32;
    let datetime: DateTime<Utc> = DateTime::from_timestamp(secs as i64, nanos)
        .ok_or_else(|| ScriptError::value_error("timestamp out of range"))?;
    Ok(datetime.format_with_items(items.into_iter()).to_string())
}

fn add<F>(table: &mut IndexMap<String, Value>, name: &str, func: F)
where
    F: Fn(&mut Vm<'_>, CallArgs) -> Result<Value, ScriptError> + 'static,
{
    table.insert(name.to_string(), Value::native(name, func));
}

fn text_of(args: &CallArgs, function: &str, name: &str) -> Result<String, ScriptError> {
    Ok(match args.require(function, 0, name)? {
        Value::Str(s) => s.to_string(),
        other => other.to_string(),
    })
}

fn number(args: &CallArgs, function: &str) -> Result<Value, ScriptError> {
    let value = args.require(function, 0, "x")?;
    match value {
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Ok(value.clone()),
        other => Err(ScriptError::type_error(format!(
            "{}() argument must be a number, not {}",
            function,
            other.type_name()
        ))),
    }
}

fn to_int(value: &Value) -> Result<i64, ScriptError> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(*b as i64),
        Value::Float(f) if f.is_finite() && f.abs() < 9.2e18 => Ok(f.trunc() as i64),
        Value::Float(_) => Err(ScriptError::value_error("cannot convert float to int")),
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| ScriptError::value_error(format!("invalid literal for int(): {}", value.repr()))),
        other => Err(ScriptError::type_error(format!(
            "int() argument must be a string or a number, not {}",
            other.type_name()
        ))),
    }
}

fn to_float(value: &Value) -> Result<f64, ScriptError> {
    match value {
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| ScriptError::value_error(format!("could not convert string to float: {}", value.repr()))),
        other => other.as_float().ok_or_else(|| {
            ScriptError::type_error(format!(
                "float() argument must be a string or a number, not {}",
                other.type_name()
            ))
        }),
    }
}

fn extreme(vm: &mut Vm<'_>, args: &CallArgs, function: &str, wanted: Ordering) -> Result<Value, ScriptError> {
    let items = match args.positional.as_slice() {
        [single] => vm.collect(single)?,
        many => many.to_vec(),
    };
    let mut items = items.into_iter();
    let mut best = items
        .next()
        .ok_or_else(|| ScriptError::value_error(format!("{}() arg is an empty sequence", function)))?;
    for item in items {
        if compare_values(&item, &best)? == wanted {
            best = item;
        }
    }
    Ok(best)
}

fn rounded(x: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (x * scale).round_ties_even() / scale
}

/// Lazy integer range
fn range(args: &CallArgs) -> Result<Sequence, ScriptError> {
    let ints: Vec<i64> = args
        .positional
        .iter()
        .map(|v| v.as_int().ok_or_else(|| ScriptError::type_error("range() arguments must be integers")))
        .collect::<Result<_, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] => (*start, *stop, *step),
        _ => return Err(ScriptError::type_error("range() takes 1 to 3 integer arguments")),
    };
    if step == 0 {
        return Err(ScriptError::value_error("range() step must not be zero"));
    }
    let mut current = start;
    Ok(Sequence::from_fn("range", move |_| {
        let more = if step > 0 { current < stop } else { current > stop };
        if !more {
            return Ok(None);
        }
        let value = current;
        current = current.checked_add(step).unwrap_or(stop);
        Ok(Some(Value::Int(value)))
    }))
}

/// `decorate(before, iterable, after)`: the items wrapped in `before` and
/// `after`, or nothing at all when the iterable turns out empty
fn decorate(vm: &mut Vm<'_>, args: &CallArgs) -> Result<Sequence, ScriptError> {
    let before = args.require("decorate", 0, "before")?.clone();
    let seq = vm.iterate(args.require("decorate", 1, "iterable")?)?;
    let after = args.require("decorate", 2, "after")?.clone();
    let mut held: Option<Value> = None;
    let mut started = false;
    let mut finished = false;
    Ok(Sequence::from_fn("decorate", move |vm| {
        if let Some(item) = held.take() {
            return Ok(Some(item));
        }
        if finished {
            return Ok(None);
        }
        match seq.next(vm)? {
            Some(item) if !started => {
                started = true;
                held = Some(item);
                Ok(Some(before.clone()))
            }
            Some(item) => Ok(Some(item)),
            None => {
                finished = true;
                Ok(started.then(|| after.clone()))
            }
        }
    }))
}

fn sorted(vm: &mut Vm<'_>, args: &CallArgs) -> Result<Value, ScriptError> {
    let items = vm.collect(args.require("sorted", 0, "iterable")?)?;
    let keys = match args.keywords.get("key") {
        Some(key) if !key.is_none() => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                keys.push(vm.call(key, CallArgs::new(vec![item.clone()]))?);
            }
            keys
        }
        _ => items.clone(),
    };
    let mut order: Vec<usize> = (0..items.len()).collect();
    let mut failure = None;
    order.sort_by(|&a, &b| match compare_values(&keys[a], &keys[b]) {
        Ok(ordering) => ordering,
        Err(err) => {
            failure.get_or_insert(err);
            Ordering::Equal
        }
    });
    if let Some(err) = failure {
        return Err(err);
    }
    if args.keywords.get("reverse").map(Value::truthy).unwrap_or(false) {
        order.reverse();
    }
    Ok(Value::list(order.into_iter().map(|i| items[i].clone()).collect()))
}

fn dict(vm: &mut Vm<'_>, args: CallArgs) -> Result<Value, ScriptError> {
    let mut entries = IndexMap::new();
    match args.positional.first() {
        None => {}
        Some(Value::Dict(source)) => {
            entries.extend(source.borrow().iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Some(pairs) => {
            for pair in vm.collect(pairs)? {
                let items = vm.collect(&pair)?;
                match items.as_slice() {
                    [Value::Str(key), value] => {
                        entries.insert(key.to_string(), value.clone());
                    }
                    _ => {
                        return Err(ScriptError::value_error(
                            "dict() needs pairs of a string key and a value",
                        ));
                    }
                }
            }
        }
    }
    entries.extend(args.keywords);
    Ok(Value::dict(entries))
}

fn path_parts(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", base)) => ("/", base),
        Some((dir, base)) => (dir, base),
        None => ("", path),
    }
}

/// Register every built-in function in `table`
pub fn install(table: &mut IndexMap<String, Value>) {
    add(table, "str", |_, args| {
        Ok(match args.get(0, "object") {
            None => Value::from(""),
            Some(Value::Str(s)) => Value::Str(s.clone()),
            Some(other) => Value::from(other.to_string()),
        })
    });
    add(table, "int", |_, args| match args.get(0, "x") {
        None => Ok(Value::Int(0)),
        Some(value) => to_int(value).map(Value::Int),
    });
    add(table, "float", |_, args| match args.get(0, "x") {
        None => Ok(Value::Float(0.0)),
        Some(value) => to_float(value).map(Value::Float),
    });
    add(table, "bool", |_, args| {
        Ok(Value::Bool(args.get(0, "x").map(Value::truthy).unwrap_or(false)))
    });
    add(table, "len", |_, args| {
        let value = args.require("len", 0, "obj")?;
        let len = match value {
            Value::Str(s) => s.chars().count(),
            Value::List(items) => items.borrow().len(),
            Value::Dict(entries) => entries.borrow().len(),
            other => {
                return Err(ScriptError::type_error(format!(
                    "object of type '{}' has no len()",
                    other.type_name()
                )));
            }
        };
        Ok(Value::Int(len as i64))
    });
    add(table, "min", |vm, args| extreme(vm, &args, "min", Ordering::Less));
    add(table, "max", |vm, args| extreme(vm, &args, "max", Ordering::Greater));
    add(table, "abs", |_, args| match number(&args, "abs")? {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| ScriptError::new(crate::script::ErrorKind::Overflow, "integer overflow")),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        Value::Bool(b) => Ok(Value::Int(b as i64)),
        _ => Ok(Value::None),
    });
    add(table, "round", |_, args| {
        let x = number(&args, "round")?;
        match args.get(1, "ndigits") {
            None | Some(Value::None) => match x {
                Value::Int(i) => Ok(Value::Int(i)),
                other => to_int(&Value::Float(other.as_float().unwrap_or(0.0).round_ties_even())).map(Value::Int),
            },
            Some(digits) => {
                let digits = digits
                    .as_int()
                    .ok_or_else(|| ScriptError::type_error("ndigits must be an integer"))?;
                Ok(Value::Float(rounded(x.as_float().unwrap_or(0.0), digits as i32)))
            }
        }
    });
    add(table, "ceil", |_, args| {
        let x = number(&args, "ceil")?.as_float().unwrap_or(0.0);
        to_int(&Value::Float(x.ceil())).map(Value::Int)
    });
    add(table, "floor", |_, args| {
        let x = number(&args, "floor")?.as_float().unwrap_or(0.0);
        to_int(&Value::Float(x.floor())).map(Value::Int)
    });
    add(table, "range", |_, args| range(&args).map(Value::Seq));
    add(table, "enumerate", |vm, args| {
        let seq = vm.iterate(args.require("enumerate", 0, "iterable")?)?;
        let mut index = match args.get(1, "start") {
            Some(start) => start
                .as_int()
                .ok_or_else(|| ScriptError::type_error("enumerate() start must be an integer"))?,
            None => 0,
        };
        Ok(Value::Seq(Sequence::from_fn("enumerate", move |vm| {
            let Some(item) = seq.next(vm)? else {
                return Ok(None);
            };
            let pair = Value::list(vec![Value::Int(index), item]);
            index += 1;
            Ok(Some(pair))
        })))
    });
    add(table, "zip", |vm, args| {
        let mut sequences = Vec::with_capacity(args.positional.len());
        for value in &args.positional {
            sequences.push(vm.iterate(value)?);
        }
        Ok(Value::Seq(Sequence::from_fn("zip", move |vm| {
            if sequences.is_empty() {
                return Ok(None);
            }
            let mut row = Vec::with_capacity(sequences.len());
            for seq in &sequences {
                match seq.next(vm)? {
                    Some(item) => row.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(Value::list(row)))
        })))
    });
    add(table, "sorted", |vm, args| sorted(vm, &args));
    add(table, "reversed", |vm, args| {
        let mut items = vm.collect(args.require("reversed", 0, "sequence")?)?;
        items.reverse();
        Ok(Value::list(items))
    });
    add(table, "list", |vm, args| match args.get(0, "iterable") {
        None => Ok(Value::list(Vec::new())),
        Some(value) => vm.collect(value).map(Value::list),
    });
    add(table, "set", |vm, args| {
        let mut unique: Vec<Value> = Vec::new();
        if let Some(value) = args.get(0, "iterable") {
            for item in vm.collect(value)? {
                if !unique.iter().any(|seen| seen.equals(&item)) {
                    unique.push(item);
                }
            }
        }
        Ok(Value::list(unique))
    });
    add(table, "dict", dict);
    add(table, "map", |vm, args| {
        let function = args.require("map", 0, "function")?.clone();
        let seq = vm.iterate(args.require("map", 1, "iterable")?)?;
        Ok(Value::Seq(Sequence::from_fn("map", move |vm| match seq.next(vm)? {
            Some(item) => vm.call(&function, CallArgs::new(vec![item])).map(Some),
            None => Ok(None),
        })))
    });
    add(table, "filter", |vm, args| {
        let function = args.require("filter", 0, "function")?.clone();
        let seq = vm.iterate(args.require("filter", 1, "iterable")?)?;
        Ok(Value::Seq(Sequence::from_fn("filter", move |vm| {
            while let Some(item) = seq.next(vm)? {
                let keep = if function.is_none() {
                    item.truthy()
                } else {
                    vm.call(&function, CallArgs::new(vec![item.clone()]))?.truthy()
                };
                if keep {
                    return Ok(Some(item));
                }
            }
            Ok(None)
        })))
    });
    add(table, "decorate", |vm, args| decorate(vm, &args).map(Value::Seq));
    add(table, "join", |vm, args| {
        let seq = vm.iterate(args.require("join", 0, "iterable")?)?;
        let separator = match args.get(1, "sep") {
            Some(sep) => sep.to_string(),
            None => String::new(),
        };
        let mut parts = Vec::new();
        for chunk in seq.flatten().collect(vm)? {
            match chunk {
                Value::None => {}
                Value::Str(s) => parts.push(s.to_string()),
                other => parts.push(other.to_string()),
            }
        }
        Ok(Value::from(parts.join(&separator)))
    });
    add(table, "format", |_, mut args| {
        if args.positional.is_empty() {
            return Err(ScriptError::type_error("format() missing required argument 'template'"));
        }
        let template = args.positional.remove(0);
        let template = template
            .as_str()
            .ok_or_else(|| ScriptError::type_error("format() template must be a string"))?;
        format_template(template, &args).map(Value::from)
    });
    add(table, "repr", |_, args| Ok(Value::from(args.require("repr", 0, "obj")?.repr())));
    add(table, "typeOf", |_, args| {
        Ok(Value::from(args.require("typeOf", 0, "obj")?.type_name()))
    });
    add(table, "escapeHtml", |_, args| {
        Ok(Value::from(escape::escape_html(&text_of(&args, "escapeHtml", "s")?)))
    });
    add(table, "escapeXml", |_, args| {
        Ok(Value::from(escape::escape_xml(&text_of(&args, "escapeXml", "s")?)))
    });
    add(table, "urlencode", |vm, args| {
        let Value::Dict(entries) = args.require("urlencode", 0, "query")? else {
            return Err(ScriptError::type_error("urlencode() argument must be a dict"));
        };
        let entries: Vec<(String, Value)> = entries.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let mut pairs = Vec::with_capacity(entries.len());
        for (key, value) in &entries {
            let values = match value {
                Value::List(_) | Value::Seq(_) => vm.collect(value)?.iter().map(|v| v.to_string()).collect(),
                other => vec![other.to_string()],
            };
            pairs.push((key.as_str(), values));
        }
        Ok(Value::from(escape::urlencode(pairs)))
    });
    add(table, "parse_qs", |_, args| {
        let query = args.require_str("parse_qs", 0, "qs")?;
        Ok(arguments_value(&escape::parse_qs(query)))
    });
    add(table, "quote", |_, args| Ok(Value::from(escape::quote(&text_of(&args, "quote", "s")?))));
    add(table, "unquote", |_, args| {
        Ok(Value::from(escape::unquote(args.require_str("unquote", 0, "s")?)))
    });
    add(table, "dirname", |_, args| {
        Ok(Value::from(path_parts(args.require_str("dirname", 0, "path")?).0))
    });
    add(table, "basename", |_, args| {
        Ok(Value::from(path_parts(args.require_str("basename", 0, "path")?).1))
    });
    add(table, "time", |_, _| Ok(Value::Float(now())));
    add(table, "formatTime", |_, args| format_time(&args).map(Value::from));
    add(table, "importTemplate", |vm, args| {
        let name = args.require_str("importTemplate", 0, "name")?;
        vm.resolver().resolve_module(name)
    });
}

/// Query arguments as a template dict of lists
pub fn arguments_value(arguments: &IndexMap<String, Vec<String>>) -> Value {
    Value::dict(
        arguments
            .iter()
            .map(|(k, values)| (k.clone(), Value::list(values.iter().map(|v| Value::from(v.as_str())).collect())))
            .collect(),
    )
}
