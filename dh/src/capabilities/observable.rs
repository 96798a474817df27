//! Observable groups: `call`, `all`, `any`, `do` and `once`
//!
//! Templates reach collaborators outside the engine through
//! `observable.<group>.<message>(...)`. The engine does not interpret the
//! messages; it only routes them to registered observers.

use std::collections::VecDeque;
use std::rc::Rc;

use tracing::debug;

use crate::script::{CallArgs, ErrorKind, ScriptError, ScriptObject, Sequence, Value, Vm};

/// A collaborator that answers messages sent by templates
pub trait Observer {
    fn name(&self) -> &str {
        "observer"
    }

    fn responds_to(&self, message: &str) -> bool;

    fn receive(&self, vm: &mut Vm<'_>, message: &str, args: &CallArgs) -> Result<Value, ScriptError>;
}

type Handler = dyn Fn(&mut Vm<'_>, &CallArgs) -> Result<Value, ScriptError>;

/// Observer answering a fixed set of messages with closures
pub struct FnObserver {
    name: String,
    handlers: Vec<(String, Box<Handler>)>,
}

impl FnObserver {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            handlers: Vec::new(),
        }
    }

    pub fn on<F>(mut self, message: &str, handler: F) -> Self
    where
        F: Fn(&mut Vm<'_>, &CallArgs) -> Result<Value, ScriptError> + 'static,
    {
        self.handlers.push((message.to_string(), Box::new(handler)));
        self
    }
}

impl Observer for FnObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn responds_to(&self, message: &str) -> bool {
        self.handlers.iter().any(|(m, _)| m == message)
    }

    fn receive(&self, vm: &mut Vm<'_>, message: &str, args: &CallArgs) -> Result<Value, ScriptError> {
        match self.handlers.iter().find(|(m, _)| m == message) {
            Some((_, handler)) => handler(vm, args),
            None => Err(no_responder(message)),
        }
    }
}

fn no_responder(message: &str) -> ScriptError {
    ScriptError::new(
        ErrorKind::Capability,
        format!("no observer responds to '{}'", message),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Call,
    All,
    Any,
    Do,
    Once,
}

impl Group {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "call" => Some(Self::Call),
            "all" => Some(Self::All),
            "any" => Some(Self::Any),
            "do" => Some(Self::Do),
            "once" => Some(Self::Once),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::All => "all",
            Self::Any => "any",
            Self::Do => "do",
            Self::Once => "once",
        }
    }
}

/// The `observable` value in every template namespace
pub struct Observable {
    observers: Rc<[Rc<dyn Observer>]>,
}

impl Observable {
    pub fn new(observers: Vec<Rc<dyn Observer>>) -> Self {
        Self {
            observers: observers.into(),
        }
    }

    fn responders(observers: &[Rc<dyn Observer>], message: &str) -> Vec<Rc<dyn Observer>> {
        observers
            .iter()
            .filter(|o| o.responds_to(message))
            .cloned()
            .collect()
    }

    /// Send `message` through `group`
    pub fn dispatch(
        observers: &Rc<[Rc<dyn Observer>]>,
        group: Group,
        vm: &mut Vm<'_>,
        message: &str,
        args: CallArgs,
    ) -> Result<Value, ScriptError> {
        debug!(group = group.name(), %message, "Observable::dispatch: called");
        match group {
            Group::Call => {
                let observer = observers
                    .iter()
                    .find(|o| o.responds_to(message))
                    .ok_or_else(|| no_responder(message))?;
                observer.receive(vm, message, &args)
            }
            Group::Any => {
                let observer = observers
                    .iter()
                    .find(|o| o.responds_to(message))
                    .cloned()
                    .ok_or_else(|| no_responder(message))?;
                let message = message.to_string();
                let mut inner: Option<Sequence> = None;
                let name = format!("any.{}", message);
                Ok(Value::Seq(Sequence::from_fn(&name, move |vm| {
                    if inner.is_none() {
                        let value = observer.receive(vm, &message, &args)?;
                        inner = Some(as_sequence(value));
                    }
                    match &inner {
                        Some(seq) => seq.next(vm),
                        None => Ok(None),
                    }
                })))
            }
            Group::All => {
                let mut pending: VecDeque<Rc<dyn Observer>> = Self::responders(observers, message).into();
                let message = message.to_string();
                let mut current: Option<Sequence> = None;
                let name = format!("all.{}", message);
                Ok(Value::Seq(Sequence::from_fn(&name, move |vm| {
                    loop {
                        if let Some(seq) = &current {
                            if let Some(value) = seq.next(vm)? {
                                return Ok(Some(value));
                            }
                            current = None;
                        }
                        let Some(observer) = pending.pop_front() else {
                            return Ok(None);
                        };
                        current = Some(as_sequence(observer.receive(vm, &message, &args)?));
                    }
                })))
            }
            Group::Do => {
                for observer in Self::responders(observers, message) {
                    let produced = observer.receive(vm, message, &args)?;
                    drain(vm, produced)?;
                }
                Ok(Value::None)
            }
            Group::Once => {
                let mut seen: Vec<Rc<dyn Observer>> = Vec::new();
                for observer in Self::responders(observers, message) {
                    if seen.iter().any(|s| Rc::ptr_eq(s, &observer)) {
                        continue;
                    }
                    let produced = observer.receive(vm, message, &args)?;
                    drain(vm, produced)?;
                    seen.push(observer);
                }
                Ok(Value::None)
            }
        }
    }
}

/// Results of eager groups are discarded, but lazy ones still have to run
fn drain(vm: &mut Vm<'_>, value: Value) -> Result<(), ScriptError> {
    if let Value::Seq(seq) = value {
        seq.collect(vm)?;
    }
    Ok(())
}

fn as_sequence(value: Value) -> Sequence {
    match value {
        Value::Seq(seq) => seq,
        Value::None => Sequence::empty(),
        other => Sequence::from_values("value", vec![other]),
    }
}

impl ScriptObject for Observable {
    fn type_name(&self) -> &str {
        "observable"
    }

    fn get_attr(&self, name: &str) -> Result<Value, ScriptError> {
        let group = Group::from_name(name).ok_or_else(|| ScriptError::attribute_error("observable", name))?;
        Ok(Value::Object(Rc::new(GroupHandle {
            group,
            observers: self.observers.clone(),
        })))
    }
}

/// `observable.<group>`; attributes are message senders
struct GroupHandle {
    group: Group,
    observers: Rc<[Rc<dyn Observer>]>,
}

impl ScriptObject for GroupHandle {
    fn type_name(&self) -> &str {
        "observable group"
    }

    fn get_attr(&self, name: &str) -> Result<Value, ScriptError> {
        let group = self.group;
        let observers = self.observers.clone();
        let message = name.to_string();
        Ok(Value::native(name, move |vm, args| {
            Observable::dispatch(&observers, group, vm, &message, args)
        }))
    }

    fn repr(&self) -> String {
        format!("<observable.{}>", self.group.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::vm::NoModules;
    use std::cell::RefCell;

    fn observers(list: Vec<Rc<dyn Observer>>) -> Rc<[Rc<dyn Observer>]> {
        list.into()
    }

    fn texts(values: Vec<Value>) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_call_returns_first_responder() {
        let first: Rc<dyn Observer> = Rc::new(FnObserver::new("a").on("title", |_, _| Ok("first".into())));
        let second: Rc<dyn Observer> = Rc::new(FnObserver::new("b").on("title", |_, _| Ok("second".into())));
        let list = observers(vec![first, second]);
        let resolver = NoModules;
        let mut vm = Vm::new(&resolver);
        let value = Observable::dispatch(&list, Group::Call, &mut vm, "title", CallArgs::default()).unwrap();
        assert_eq!(value.to_string(), "first");
    }

    #[test]
    fn test_call_without_responder_fails() {
        let list = observers(vec![]);
        let resolver = NoModules;
        let mut vm = Vm::new(&resolver);
        let err = Observable::dispatch(&list, Group::Call, &mut vm, "missing", CallArgs::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Capability);
    }

    #[test]
    fn test_all_is_lazy_and_concatenates() {
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let a: Rc<dyn Observer> = Rc::new(FnObserver::new("a").on("items", move |_, _| {
            *counter.borrow_mut() += 1;
            Ok(Value::Seq(Sequence::from_values("a", vec!["1".into(), "2".into()])))
        }));
        let b: Rc<dyn Observer> = Rc::new(FnObserver::new("b").on("items", |_, _| Ok("3".into())));
        let list = observers(vec![a, b]);
        let resolver = NoModules;
        let mut vm = Vm::new(&resolver);
        let value = Observable::dispatch(&list, Group::All, &mut vm, "items", CallArgs::default()).unwrap();
        assert_eq!(*calls.borrow(), 0);
        let Value::Seq(seq) = value else {
            panic!("expected sequence");
        };
        assert_eq!(texts(seq.collect(&mut vm).unwrap()), vec!["1", "2", "3"]);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_once_calls_each_observer_once() {
        let calls = Rc::new(RefCell::new(0));
        let counter = calls.clone();
        let shared: Rc<dyn Observer> = Rc::new(FnObserver::new("shared").on("flush", move |_, _| {
            *counter.borrow_mut() += 1;
            Ok(Value::None)
        }));
        let list = observers(vec![shared.clone(), shared]);
        let resolver = NoModules;
        let mut vm = Vm::new(&resolver);
        Observable::dispatch(&list, Group::Do, &mut vm, "flush", CallArgs::default()).unwrap();
        assert_eq!(*calls.borrow(), 2);
        let value = Observable::dispatch(&list, Group::Once, &mut vm, "flush", CallArgs::default()).unwrap();
        assert!(value.is_none());
        assert_eq!(*calls.borrow(), 3);
    }

    #[test]
    fn test_do_and_once_drain_lazy_results() {
        let pulled = Rc::new(RefCell::new(0));
        let counter = pulled.clone();
        let lazy: Rc<dyn Observer> = Rc::new(FnObserver::new("lazy").on("flush", move |_, _| {
            let counter = counter.clone();
            let mut left = 2;
            Ok(Value::Seq(Sequence::from_fn("flush", move |_| {
                if left == 0 {
                    return Ok(None);
                }
                left -= 1;
                *counter.borrow_mut() += 1;
                Ok(Some(Value::None))
            })))
        }));
        let list = observers(vec![lazy]);
        let resolver = NoModules;
        let mut vm = Vm::new(&resolver);
        let value = Observable::dispatch(&list, Group::Do, &mut vm, "flush", CallArgs::default()).unwrap();
        assert!(value.is_none());
        assert_eq!(*pulled.borrow(), 2);
        Observable::dispatch(&list, Group::Once, &mut vm, "flush", CallArgs::default()).unwrap();
        assert_eq!(*pulled.borrow(), 4);
    }

    #[test]
    fn test_unknown_group() {
        let observable = Observable::new(vec![]);
        let err = observable.get_attr("sometimes").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Attribute);
    }
}
