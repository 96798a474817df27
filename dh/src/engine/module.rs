//! Template modules and their reference cells

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::script::{Env, ErrorKind, ScriptError, ScriptObject, Value};

/// A loaded template: a namespace plus the file it came from
pub struct Module {
    name: String,
    path: Option<PathBuf>,
    namespace: Rc<Env>,
    /// Formatted trace when loading failed and `main` renders it instead
    load_error: Option<String>,
}

impl Module {
    pub fn new(name: &str, path: Option<PathBuf>, namespace: Rc<Env>, load_error: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            path,
            namespace,
            load_error,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn namespace(&self) -> &Rc<Env> {
        &self.namespace
    }

    /// Top-level binding `name`
    pub fn get(&self, name: &str) -> Option<Value> {
        self.namespace.get_local(name)
    }

    /// The entry point, if the module defines one
    pub fn main(&self) -> Option<Value> {
        self.get("main")
    }

    pub fn is_degraded(&self) -> bool {
        self.load_error.is_some()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    pub fn names(&self) -> Vec<String> {
        self.namespace.names()
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Stable indirection cell for one module name
///
/// Importers hold the cell, never the module. Reloading swaps the cell's
/// contents, so every importer sees the new module on its next access.
pub struct ModuleSlot {
    name: String,
    module: RefCell<Option<Rc<Module>>>,
}

impl ModuleSlot {
    pub fn new(name: &str, module: Option<Rc<Module>>) -> Self {
        Self {
            name: name.to_string(),
            module: RefCell::new(module),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self) -> Option<Rc<Module>> {
        self.module.borrow().clone()
    }

    pub fn set(&self, module: Rc<Module>) {
        *self.module.borrow_mut() = Some(module);
    }

    pub fn clear(&self) {
        *self.module.borrow_mut() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.module.borrow().is_none()
    }

    fn current(&self) -> Result<Rc<Module>, ScriptError> {
        self.get().ok_or_else(|| {
            ScriptError::new(
                ErrorKind::ModuleUnloaded,
                format!("module '{}' is not loaded", self.name),
            )
        })
    }
}

impl ScriptObject for ModuleSlot {
    fn type_name(&self) -> &str {
        "module"
    }

    fn get_attr(&self, name: &str) -> Result<Value, ScriptError> {
        self.current()?.get(name).ok_or_else(|| {
            ScriptError::new(
                ErrorKind::Attribute,
                format!("module '{}' has no attribute '{}'", self.name, name),
            )
        })
    }

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::new(
            ErrorKind::Attribute,
            format!("cannot set attribute '{}' on module '{}'", name, self.name),
        ))
    }

    fn repr(&self) -> String {
        match self.get() {
            Some(_) => format!("<module '{}'>", self.name),
            None => format!("<module '{}' (unloaded)>", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::value::NoBuiltins;

    fn module(name: &str, greeting: &str) -> Rc<Module> {
        let env = Env::root(Rc::new(NoBuiltins));
        env.set("greeting", Value::from(greeting));
        Rc::new(Module::new(name, None, env, None))
    }

    #[test]
    fn test_slot_follows_replacement() {
        let slot = ModuleSlot::new("simple", Some(module("simple", "hello")));
        assert_eq!(slot.get_attr("greeting").unwrap().to_string(), "hello");
        slot.set(module("simple", "bonjour"));
        assert_eq!(slot.get_attr("greeting").unwrap().to_string(), "bonjour");
    }

    #[test]
    fn test_empty_slot_fails_on_access() {
        let slot = ModuleSlot::new("gone", None);
        let err = slot.get_attr("main").unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModuleUnloaded);
        assert!(err.message.contains("'gone'"));
        assert_eq!(slot.repr(), "<module 'gone' (unloaded)>");
    }

    #[test]
    fn test_slot_is_read_only() {
        let slot = ModuleSlot::new("simple", Some(module("simple", "hello")));
        assert!(slot.set_attr("greeting", Value::None).is_err());
        assert!(slot.get_attr("missing").is_err());
    }

    #[test]
    fn test_module_without_main() {
        let m = module("lib", "x");
        assert!(m.main().is_none());
        assert!(!m.is_degraded());
    }
}
