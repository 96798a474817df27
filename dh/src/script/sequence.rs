//! Lazy sequences and the flatten combinator
//!
//! A `Sequence` is a shared handle to a producer that computes values as
//! they are pulled. Generator functions, pipeline stages, observable groups
//! and iteration over lists all surface to template code as sequences.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::error::ScriptError;
use super::value::Value;
use super::vm::Vm;

/// Something that yields values on demand
pub trait Producer {
    fn next(&mut self, vm: &mut Vm<'_>) -> Result<Option<Value>, ScriptError>;
}

struct FnProducer<F>(F);

impl<F> Producer for FnProducer<F>
where
    F: FnMut(&mut Vm<'_>) -> Result<Option<Value>, ScriptError>,
{
    fn next(&mut self, vm: &mut Vm<'_>) -> Result<Option<Value>, ScriptError> {
        (self.0)(vm)
    }
}

struct ValuesProducer(VecDeque<Value>);

impl Producer for ValuesProducer {
    fn next(&mut self, _vm: &mut Vm<'_>) -> Result<Option<Value>, ScriptError> {
        Ok(self.0.pop_front())
    }
}

struct State {
    name: Rc<str>,
    /// Taken out while the producer runs
    producer: Option<Box<dyn Producer>>,
    done: bool,
}

#[derive(Clone)]
pub struct Sequence(Rc<RefCell<State>>);

impl Sequence {
    pub fn new(name: &str, producer: Box<dyn Producer>) -> Self {
        Self(Rc::new(RefCell::new(State {
            name: name.into(),
            producer: Some(producer),
            done: false,
        })))
    }

    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: FnMut(&mut Vm<'_>) -> Result<Option<Value>, ScriptError> + 'static,
    {
        Self::new(name, Box::new(FnProducer(f)))
    }

    pub fn from_values(name: &str, values: Vec<Value>) -> Self {
        Self::new(name, Box::new(ValuesProducer(values.into())))
    }

    /// An already exhausted sequence
    pub fn empty() -> Self {
        Self(Rc::new(RefCell::new(State {
            name: "empty".into(),
            producer: None,
            done: true,
        })))
    }

    pub fn name(&self) -> Rc<str> {
        self.0.borrow().name.clone()
    }

    pub fn is_done(&self) -> bool {
        self.0.borrow().done
    }

    pub fn ptr_eq(&self, other: &Sequence) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Pull the next value. An error ends the sequence.
    pub fn next(&self, vm: &mut Vm<'_>) -> Result<Option<Value>, ScriptError> {
        let producer = {
            let mut state = self.0.borrow_mut();
            if state.done {
                return Ok(None);
            }
            state.producer.take()
        };
        let Some(mut producer) = producer else {
            return Err(ScriptError::value_error(format!(
                "sequence '{}' is already executing",
                self.name()
            )));
        };

        let result = producer.next(vm);
        let mut state = self.0.borrow_mut();
        match result {
            Ok(Some(_)) => state.producer = Some(producer),
            _ => state.done = true,
        }
        result
    }

    /// Drain the remaining values
    pub fn collect(&self, vm: &mut Vm<'_>) -> Result<Vec<Value>, ScriptError> {
        let mut values = Vec::new();
        while let Some(value) = self.next(vm)? {
            values.push(value);
        }
        Ok(values)
    }

    /// Recursively flatten nested sequences
    pub fn flatten(&self) -> Sequence {
        let name = format!("flatten({})", self.name());
        Sequence::new(&name, Box::new(Flatten::new(self.clone())))
    }

    /// Chain several sequences end to end (no recursive flattening)
    pub fn chain(name: &str, parts: Vec<Sequence>) -> Sequence {
        let mut parts: VecDeque<Sequence> = parts.into();
        Sequence::from_fn(name, move |vm| {
            while let Some(front) = parts.front() {
                if let Some(value) = front.next(vm)? {
                    return Ok(Some(value));
                }
                parts.pop_front();
            }
            Ok(None)
        })
    }
}

/// Depth-first flattening over a stack of open sequences
pub struct Flatten {
    stack: Vec<Sequence>,
}

impl Flatten {
    pub fn new(root: Sequence) -> Self {
        Self { stack: vec![root] }
    }
}

impl Producer for Flatten {
    fn next(&mut self, vm: &mut Vm<'_>) -> Result<Option<Value>, ScriptError> {
        while let Some(top) = self.stack.last() {
            match top.next(vm)? {
                Some(Value::Seq(inner)) => self.stack.push(inner),
                Some(value) => return Ok(Some(value)),
                None => {
                    self.stack.pop();
                }
            }
        }
        Ok(None)
    }
}
