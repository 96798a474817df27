//! Capability bridge
//!
//! Builds the allow-listed table of names every template namespace falls
//! back to: built-in functions, the `observable` groups, configured globals,
//! and the native modules that `import` may reach when allow-listed.

pub mod builtins;
pub mod escape;
pub mod native;
pub mod observable;

use std::rc::Rc;

use indexmap::IndexMap;
use tracing::debug;

use crate::script::{Builtins, Value};

pub use native::NativeModule;
pub use observable::{FnObserver, Observable, Observer};

/// Allow-list of names and modules visible to templates
pub struct Capabilities {
    table: IndexMap<String, Value>,
    native_modules: IndexMap<String, Value>,
    allowed_imports: Vec<String>,
}

impl Capabilities {
    pub fn new(
        globals: IndexMap<String, Value>,
        observers: Vec<Rc<dyn Observer>>,
        native_modules: Vec<NativeModule>,
        allowed_imports: Vec<String>,
    ) -> Self {
        debug!(
            globals = globals.len(),
            observers = observers.len(),
            native_modules = native_modules.len(),
            "Capabilities::new: called"
        );
        let mut table = IndexMap::new();
        builtins::install(&mut table);
        table.insert(
            "observable".to_string(),
            Value::Object(Rc::new(Observable::new(observers))),
        );
        table.extend(globals);

        let native_modules = native_modules
            .into_iter()
            .map(|module| (module.name().to_string(), module.into_value()))
            .collect();

        Self {
            table,
            native_modules,
            allowed_imports,
        }
    }

    pub fn is_allowed_import(&self, name: &str) -> bool {
        self.allowed_imports.iter().any(|allowed| allowed == name)
    }

    /// Native module `name`, if it is allow-listed and exists
    pub fn native_module(&self, name: &str) -> Option<Value> {
        if !self.is_allowed_import(name) {
            return None;
        }
        self.native_modules.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }
}

impl Builtins for Capabilities {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.table.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(allowed: &[&str]) -> Capabilities {
        let mut globals = IndexMap::new();
        globals.insert("siteName".to_string(), Value::from("Example"));
        globals.insert("len".to_string(), Value::from("shadowed"));
        Capabilities::new(
            globals,
            Vec::new(),
            native::standard(),
            allowed.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_table_contains_builtins_and_globals() {
        let caps = capabilities(&[]);
        assert!(caps.lookup("escapeHtml").is_some());
        assert!(caps.lookup("observable").is_some());
        assert_eq!(caps.lookup("siteName").unwrap().to_string(), "Example");
        assert_eq!(caps.lookup("len").unwrap().to_string(), "shadowed");
        assert!(caps.lookup("open").is_none());
        assert!(caps.lookup("eval").is_none());
    }

    #[test]
    fn test_native_modules_require_allow_list() {
        let caps = capabilities(&["math"]);
        assert!(caps.native_module("math").is_some());
        assert!(caps.native_module("json").is_none());
        assert!(caps.native_module("os").is_none());
    }
}
