//! Module registry
//!
//! Holds at most one live module per name plus the reference cell for each
//! name that has ever been imported. All borrows are short: nothing here
//! runs template code.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use super::module::{Module, ModuleSlot};

#[derive(Default)]
pub struct Registry {
    modules: RefCell<HashMap<String, Rc<Module>>>,
    cells: RefCell<HashMap<String, Rc<ModuleSlot>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Rc<Module>> {
        self.modules.borrow().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.borrow().contains_key(name)
    }

    /// Register or replace the module under its name
    pub fn put(&self, module: Rc<Module>) -> Option<Rc<Module>> {
        debug!(name = %module.name(), "Registry::put: called");
        self.modules.borrow_mut().insert(module.name().to_string(), module)
    }

    /// Point every importer of `name` at `module`; returns whether anyone imported it
    pub fn patch_references(&self, name: &str, module: &Rc<Module>) -> bool {
        debug!(%name, "Registry::patch_references: called");
        match self.cells.borrow().get(name) {
            Some(cell) => {
                cell.set(module.clone());
                true
            }
            None => false,
        }
    }

    /// The reference cell for `name`, created on first use
    pub fn cell(&self, name: &str) -> Rc<ModuleSlot> {
        if let Some(cell) = self.cells.borrow().get(name) {
            return cell.clone();
        }
        let cell = Rc::new(ModuleSlot::new(name, self.get(name)));
        self.cells.borrow_mut().insert(name.to_string(), cell.clone());
        cell
    }

    /// Drop the module; importers see an empty cell from now on
    pub fn remove(&self, name: &str) -> Option<Rc<Module>> {
        debug!(%name, "Registry::remove: called");
        if let Some(cell) = self.cells.borrow().get(name) {
            cell.clear();
        }
        self.modules.borrow_mut().remove(name)
    }

    /// Loaded module names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.borrow().is_empty()
    }
}
