//! Operators: arithmetic, comparison, indexing and slicing

use std::cmp::Ordering;
use std::rc::Rc;

use super::ast::{BinaryOp, CompareOp, UnaryOp};
use super::error::{ErrorKind, ScriptError};
use super::value::Value;
use super::vm::MAX_DEPTH;

fn is_number(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_))
}

fn is_integral(value: &Value) -> bool {
    matches!(value, Value::Int(_) | Value::Bool(_))
}

fn overflow() -> ScriptError {
    ScriptError::new(ErrorKind::Overflow, "integer overflow")
}

fn zero_division(message: &str) -> ScriptError {
    ScriptError::new(ErrorKind::DivisionByZero, message)
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ScriptError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Negate => match operand {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or_else(overflow),
            Value::Bool(b) => Ok(Value::Int(-(*b as i64))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(ScriptError::type_error(format!(
                "bad operand type for unary -: '{}'",
                other.type_name()
            ))),
        },
    }
}

/// Largest string (in bytes) or list (in items) that `*` will build
pub const MAX_REPEAT_LEN: usize = 1 << 24;

fn repeated_len(len: usize, times: i64) -> Result<usize, ScriptError> {
    let total = len.checked_mul(times.max(0) as usize);
    match total {
        Some(total) if total <= MAX_REPEAT_LEN => Ok(total),
        _ => Err(ScriptError::new(ErrorKind::Overflow, "repeated sequence is too large")),
    }
}

fn repeat<T: Clone>(items: &[T], times: i64) -> Result<Vec<T>, ScriptError> {
    let mut out = Vec::with_capacity(repeated_len(items.len(), times)?);
    for _ in 0..times.max(0) {
        out.extend_from_slice(items);
    }
    Ok(out)
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::from(joined))
        }
        (BinaryOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        (BinaryOp::Mul, Value::Str(s), Value::Int(n)) | (BinaryOp::Mul, Value::Int(n), Value::Str(s)) => {
            repeated_len(s.len(), *n)?;
            Ok(Value::Str(Rc::from(s.repeat((*n).max(0) as usize))))
        }
        (BinaryOp::Mul, Value::List(l), Value::Int(n)) | (BinaryOp::Mul, Value::Int(n), Value::List(l)) => {
            Ok(Value::list(repeat(&l.borrow(), *n)?))
        }
        _ if is_number(left) && is_number(right) => numeric(op, left, right),
        _ => Err(ScriptError::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn numeric(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    if is_integral(left) && is_integral(right) && op != BinaryOp::Div {
        let (a, b) = (left.as_int().unwrap_or(0), right.as_int().unwrap_or(0));
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::FloorDiv => {
                if b == 0 {
                    return Err(zero_division("integer division by zero"));
                }
                a.checked_div(b)
                    .map(|q| if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
            }
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(zero_division("integer modulo by zero"));
                }
                a.checked_rem(b)
                    .map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
            }
            BinaryOp::Div => None,
        };
        return result.map(Value::Int).ok_or_else(overflow);
    }

    let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(zero_division("division by zero"));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo"));
            }
            let r = a % b;
            if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r }
        }
    };
    Ok(Value::Float(result))
}

/// Ordering used by `<`, `sorted`, `min` and `max`
pub fn compare_values(left: &Value, right: &Value) -> Result<Ordering, ScriptError> {
    compare_at(left, right, 0)
}

fn compare_at(left: &Value, right: &Value, depth: usize) -> Result<Ordering, ScriptError> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (Value::List(a), Value::List(b)) => {
            if depth >= MAX_DEPTH {
                return Err(ScriptError::new(
                    ErrorKind::Recursion,
                    "maximum recursion depth exceeded in comparison",
                ));
            }
            let (a, b) = (a.borrow(), b.borrow());
            for (x, y) in a.iter().zip(b.iter()) {
                let ordering = compare_at(x, y, depth + 1)?;
                if ordering != Ordering::Equal {
                    return Ok(ordering);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        _ if is_number(left) && is_number(right) => {
            let (a, b) = (left.as_float().unwrap_or(0.0), right.as_float().unwrap_or(0.0));
            Ok(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
        }
        _ => Err(ScriptError::type_error(format!(
            "ordering not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, ScriptError> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(ScriptError::type_error(format!(
                "'in <str>' requires str as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.equals(item))),
        Value::Dict(entries) => Ok(item.as_str().map(|k| entries.borrow().contains_key(k)).unwrap_or(false)),
        other => Err(ScriptError::type_error(format!(
            "argument of type '{}' is not a container",
            other.type_name()
        ))),
    }
}

pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    let result = match op {
        CompareOp::Eq => left.equals(right),
        CompareOp::NotEq => !left.equals(right),
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Lt => compare_values(left, right).map_err(|e| symbol_error(e, op))? == Ordering::Less,
        CompareOp::LtEq => compare_values(left, right).map_err(|e| symbol_error(e, op))? != Ordering::Greater,
        CompareOp::Gt => compare_values(left, right).map_err(|e| symbol_error(e, op))? == Ordering::Greater,
        CompareOp::GtEq => compare_values(left, right).map_err(|e| symbol_error(e, op))? != Ordering::Less,
    };
    Ok(Value::Bool(result))
}

fn symbol_error(err: ScriptError, op: CompareOp) -> ScriptError {
    ScriptError::new(
        err.kind,
        err.message.replacen("ordering", &format!("'{}'", op.symbol()), 1),
    )
}

/// Resolve a possibly negative index against `len`
fn normalize(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { index + len } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn index_of(index: &Value, container: &str) -> Result<i64, ScriptError> {
    match index {
        Value::Int(i) => Ok(*i),
        other => Err(ScriptError::type_error(format!(
            "{} indices must be integers, not {}",
            container,
            other.type_name()
        ))),
    }
}

pub fn get_index(object: &Value, index: &Value) -> Result<Value, ScriptError> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let i = index_of(index, "list")?;
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| ScriptError::new(ErrorKind::Index, "list index out of range"))
        }
        Value::Str(s) => {
            let i = index_of(index, "string")?;
            let chars: Vec<char> = s.chars().collect();
            normalize(i, chars.len())
                .map(|i| Value::from(chars[i].to_string()))
                .ok_or_else(|| ScriptError::new(ErrorKind::Index, "string index out of range"))
        }
        Value::Dict(entries) => {
            let found = index.as_str().and_then(|k| entries.borrow().get(k).cloned());
            found.ok_or_else(|| ScriptError::new(ErrorKind::Key, index.repr()))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_index(object: &Value, index: &Value, value: Value) -> Result<(), ScriptError> {
    match object {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let i = index_of(index, "list")?;
            let slot = normalize(i, items.len())
                .ok_or_else(|| ScriptError::new(ErrorKind::Index, "list assignment index out of range"))?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(entries) => {
            let key = index
                .as_str()
                .ok_or_else(|| ScriptError::type_error("dict keys must be strings"))?;
            entries.borrow_mut().insert(key.to_string(), value);
            Ok(())
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

fn slice_bound(bound: &Value, len: usize, default: usize) -> Result<usize, ScriptError> {
    match bound {
        Value::None => Ok(default),
        Value::Int(i) => {
            let len = len as i64;
            let i = if *i < 0 { (*i + len).max(0) } else { (*i).min(len) };
            Ok(i as usize)
        }
        other => Err(ScriptError::type_error(format!(
            "slice indices must be integers or none, not {}",
            other.type_name()
        ))),
    }
}

pub fn slice(object: &Value, start: &Value, end: &Value) -> Result<Value, ScriptError> {
    match object {
        Value::List(items) => {
            let items = items.borrow();
            let from = slice_bound(start, items.len(), 0)?;
            let to = slice_bound(end, items.len(), items.len())?;
            let part = if from < to { items[from..to].to_vec() } else { Vec::new() };
            Ok(Value::list(part))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let from = slice_bound(start, chars.len(), 0)?;
            let to = slice_bound(end, chars.len(), chars.len())?;
            let part: String = if from < to { chars[from..to].iter().collect() } else { String::new() };
            Ok(Value::from(part))
        }
        other => Err(ScriptError::type_error(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Int(i)
    }

    #[test]
    fn test_floor_division_and_modulo_follow_divisor_sign() {
        assert_eq!(binary(BinaryOp::FloorDiv, &int(-7), &int(2)).unwrap().as_int(), Some(-4));
        assert_eq!(binary(BinaryOp::Mod, &int(-7), &int(2)).unwrap().as_int(), Some(1));
        assert_eq!(binary(BinaryOp::Mod, &int(7), &int(-2)).unwrap().as_int(), Some(-1));
    }

    #[test]
    fn test_true_division_is_float() {
        let value = binary(BinaryOp::Div, &int(7), &int(2)).unwrap();
        assert_eq!(value.as_float(), Some(3.5));
        assert!(matches!(value, Value::Float(_)));
    }

    #[test]
    fn test_division_by_zero() {
        let err = binary(BinaryOp::Div, &int(1), &int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DivisionByZero);
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn test_overflow() {
        let err = binary(BinaryOp::Add, &int(i64::MAX), &int(1)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
    }

    #[test]
    fn test_string_operations() {
        let joined = binary(BinaryOp::Add, &Value::from("a"), &Value::from("b")).unwrap();
        assert_eq!(joined.to_string(), "ab");
        let repeated = binary(BinaryOp::Mul, &Value::from("ab"), &int(3)).unwrap();
        assert_eq!(repeated.to_string(), "ababab");
        assert_eq!(binary(BinaryOp::Mul, &int(-2), &Value::from("ab")).unwrap().to_string(), "");
        let err = binary(BinaryOp::Add, &Value::from("a"), &int(1)).unwrap_err();
        assert!(err.message.contains("'str' and 'int'"));
    }

    #[test]
    fn test_repetition_is_bounded() {
        let err = binary(BinaryOp::Mul, &Value::from("x"), &int(i64::MAX)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
        let list = Value::list(vec![int(1), int(2)]);
        let err = binary(BinaryOp::Mul, &int((MAX_REPEAT_LEN / 2 + 1) as i64), &list).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overflow);
        let ok = binary(BinaryOp::Mul, &list, &int(3)).unwrap();
        assert_eq!(ok.to_string(), "[1, 2, 1, 2, 1, 2]");
    }

    #[test]
    fn test_deep_list_comparison_fails_cleanly() {
        let nest = || {
            let mut value = int(0);
            for _ in 0..(MAX_DEPTH * 5) {
                value = Value::list(vec![value]);
            }
            value
        };
        let err = compare_values(&nest(), &nest()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Recursion);
    }

    #[test]
    fn test_compare_message_names_operator() {
        let err = compare(CompareOp::Lt, &Value::from("a"), &int(1)).unwrap_err();
        assert!(err.message.starts_with("'<' not supported"));
    }

    #[test]
    fn test_negative_index_and_slices() {
        let list = Value::list(vec![int(1), int(2), int(3)]);
        assert_eq!(get_index(&list, &int(-1)).unwrap().as_int(), Some(3));
        assert!(get_index(&list, &int(3)).is_err());
        let tail = slice(&list, &int(1), &Value::None).unwrap();
        assert_eq!(tail.to_string(), "[2, 3]");
        let text = slice(&Value::from("hello"), &Value::None, &int(-2)).unwrap();
        assert_eq!(text.to_string(), "hel");
    }

    #[test]
    fn test_dict_missing_key() {
        let dict = Value::dict(Default::default());
        let err = get_index(&dict, &Value::from("k")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Key);
        assert_eq!(err.message, "'k'");
    }

    #[test]
    fn test_contains() {
        assert!(contains(&Value::from("snake"), &Value::from("na")).unwrap());
        assert!(contains(&Value::list(vec![int(1)]), &Value::Float(1.0)).unwrap());
        assert!(contains(&int(1), &int(1)).is_err());
    }
}
