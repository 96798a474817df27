//! Template engine
//!
//! `Engine` owns the registry and the capability table, resolves imports
//! for running templates, and turns requests into lazy `Response`s.
//! Everything is single-threaded: loads, reloads and pipeline pulls all
//! happen on the caller's thread, so a reload always completes before the
//! next chunk is produced.

pub mod dispatcher;
pub mod loader;
pub mod module;
pub mod registry;
pub mod request;
pub mod resolver;

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::capabilities::{Capabilities, NativeModule, Observer, native};
use crate::error::{EngineError, Result};
use crate::script::{CallArgs, ErrorKind, ModuleResolver, ScriptError, Value, Vm};

pub use dispatcher::Response;
pub use loader::Loader;
pub use module::{Module, ModuleSlot};
pub use registry::Registry;
pub use request::RequestContext;

/// Called with the routed path for every rendering failure
pub type ErrorHook = Box<dyn Fn(&str, &ScriptError)>;

pub struct Engine {
    loader: Loader,
    registry: Registry,
    capabilities: Rc<Capabilities>,
    /// Modules whose top-level code is running right now
    loading: RefCell<HashSet<String>>,
    prefix: Option<String>,
    index_page: Option<String>,
    not_found_page: Option<String>,
    error_hook: Option<ErrorHook>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn roots(&self) -> &[PathBuf] {
        self.loader.roots()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn index_page(&self) -> Option<&str> {
        self.index_page.as_deref()
    }

    pub fn not_found_page(&self) -> Option<&str> {
        self.not_found_page.as_deref()
    }

    pub fn capabilities(&self) -> &Rc<Capabilities> {
        &self.capabilities
    }

    /// Loaded module `name`, without loading anything
    pub fn get_module(&self, name: &str) -> Option<Rc<Module>> {
        self.registry.get(name)
    }

    pub fn module_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Loaded module `name`, loading it from disk on first use
    pub fn module(&self, name: &str) -> Option<Rc<Module>> {
        if let Some(module) = self.registry.get(name) {
            return Some(module);
        }
        if self.loading.borrow().contains(name) {
            return None;
        }
        let path = self.loader.find_source(name)?;
        Some(self.load_named(name, &path))
    }

    /// Load the template at `path` (absolute, or relative to a root)
    pub fn load_module_from_path(&self, path: &Path) -> Option<Rc<Module>> {
        debug!(path = %path.display(), "Engine::load_module_from_path: called");
        let relative = self.loader.relative_to_root(path).unwrap_or_else(|| path.to_path_buf());
        let Some(name) = Loader::module_name(&relative) else {
            warn!(path = %path.display(), "Not a template file");
            return None;
        };
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.loader.find_source(&name)?
        };
        Some(self.load_named(&name, &path))
    }

    /// Load module `name` from the first root that has it
    pub fn load(&self, name: &str) -> Result<Rc<Module>> {
        debug!(%name, "Engine::load: called");
        let path = self
            .loader
            .find_source(name)
            .ok_or_else(|| EngineError::ModuleNotFound(name.to_string()))?;
        Ok(self.load_named(name, &path))
    }

    fn load_named(&self, name: &str, path: &Path) -> Rc<Module> {
        debug!(%name, path = %path.display(), "Engine::load_named: called");
        self.loading.borrow_mut().insert(name.to_string());
        let module = Rc::new(loader::load_module(name, path, &self.capabilities, self));
        self.loading.borrow_mut().remove(name);
        self.registry.patch_references(name, &module);
        self.registry.put(module.clone());
        module
    }

    /// Call `function` in module `module`; lazy results are drained into a list
    pub fn call(&self, module: &str, function: &str, args: CallArgs) -> Result<Value> {
        debug!(%module, %function, "Engine::call: called");
        let target = self
            .module(module)
            .ok_or_else(|| EngineError::ModuleNotFound(module.to_string()))?;
        let callee = target.get(function).ok_or_else(|| EngineError::FunctionNotFound {
            module: module.to_string(),
            function: function.to_string(),
        })?;
        let mut vm = Vm::new(self);
        match vm.call(&callee, args)? {
            Value::Seq(seq) => Ok(Value::list(seq.collect(&mut vm)?)),
            other => Ok(other),
        }
    }

    /// Apply one change notification for a file (absolute, or relative to a root)
    ///
    /// A file that no longer exists removes its module.
    pub fn reload(&self, path: &Path) -> Option<Rc<Module>> {
        debug!(path = %path.display(), "Engine::reload: called");
        let relative = self.loader.relative_to_root(path).unwrap_or_else(|| path.to_path_buf());
        let Some(name) = Loader::module_name(&relative) else {
            warn!(path = %path.display(), "Changed file does not map to a module under any root");
            return None;
        };
        match self.loader.find_source(&name) {
            Some(path) => {
                info!(%name, "Reloading module");
                Some(self.load_named(&name, &path))
            }
            None => {
                if self.registry.remove(&name).is_some() {
                    info!(%name, "Removed module");
                }
                None
            }
        }
    }

    /// Reload everything on disk and drop modules whose files are gone
    pub fn rescan(&self) -> Vec<String> {
        debug!("Engine::rescan: called");
        let found = self.loader.scan();
        for (name, path) in &found {
            self.load_named(name, path);
        }
        let removed: Vec<String> = self
            .registry
            .names()
            .into_iter()
            .filter(|name| !found.iter().any(|(existing, _)| existing == name))
            .collect();
        for name in &removed {
            self.registry.remove(name);
        }
        info!(loaded = found.len(), removed = removed.len(), "Rescanned template roots");
        removed
    }

    fn load_all(&self) {
        let found = self.loader.scan();
        for (name, path) in &found {
            // an earlier module may have imported it already
            if !self.registry.contains(name) {
                self.load_named(name, path);
            }
        }
        info!(modules = self.registry.len(), "Loaded template roots");
    }

    /// Lazy response for one request
    pub fn handle_request(&self, context: RequestContext) -> Response<'_> {
        debug!(path = %context.path, "Engine::handle_request: called");
        Response::new(self, context)
    }

    pub fn handle_uri(&self, uri: &str) -> Response<'_> {
        self.handle_request(RequestContext::from_uri(uri))
    }

    /// Whole response for `uri` as one string
    pub fn render(&self, uri: &str) -> String {
        self.handle_uri(uri).collect()
    }

    pub(crate) fn report_render_error(&self, path: &str, err: &ScriptError) {
        dispatcher::log_render_error(path, err);
        if let Some(hook) = &self.error_hook {
            hook(path, err);
        }
    }
}

impl ModuleResolver for Engine {
    fn resolve_module(&self, name: &str) -> std::result::Result<Value, ScriptError> {
        debug!(%name, "Engine::resolve_module: called");
        if let Some(module) = self.capabilities.native_module(name) {
            return Ok(module);
        }
        let known = self.registry.contains(name) || self.loading.borrow().contains(name);
        if !known {
            let path = self.loader.find_source(name).ok_or_else(|| {
                ScriptError::new(ErrorKind::Import, format!("No module named '{}'", name))
            })?;
            self.load_named(name, &path);
        }
        Ok(Value::Object(self.registry.cell(name)))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("roots", &self.loader.roots())
            .field("modules", &self.registry.names())
            .field("prefix", &self.prefix)
            .field("index_page", &self.index_page)
            .field("not_found_page", &self.not_found_page)
            .finish()
    }
}

/// Collects engine settings; `build` validates roots and loads every template
pub struct EngineBuilder {
    roots: Vec<PathBuf>,
    prefix: Option<String>,
    index_page: Option<String>,
    not_found_page: Option<String>,
    allowed_imports: Vec<String>,
    globals: IndexMap<String, Value>,
    observers: Vec<Rc<dyn Observer>>,
    native_modules: Vec<NativeModule>,
    error_hook: Option<ErrorHook>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            roots: Vec::new(),
            prefix: None,
            index_page: None,
            not_found_page: None,
            allowed_imports: Vec::new(),
            globals: IndexMap::new(),
            observers: Vec::new(),
            native_modules: native::standard(),
            error_hook: None,
        }
    }

    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    pub fn roots<P: Into<PathBuf>>(mut self, roots: impl IntoIterator<Item = P>) -> Self {
        self.roots.extend(roots.into_iter().map(Into::into));
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn index_page(mut self, page: &str) -> Self {
        self.index_page = Some(page.to_string());
        self
    }

    pub fn not_found_page(mut self, page: &str) -> Self {
        self.not_found_page = Some(page.to_string());
        self
    }

    pub fn allow_import(mut self, name: &str) -> Self {
        self.allowed_imports.push(name.to_string());
        self
    }

    pub fn allowed_imports<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.allowed_imports.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn global(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.globals.insert(name.to_string(), value.into());
        self
    }

    pub fn globals(mut self, globals: IndexMap<String, Value>) -> Self {
        self.globals.extend(globals);
        self
    }

    pub fn observer(mut self, observer: Rc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn native_module(mut self, module: NativeModule) -> Self {
        self.native_modules.push(module);
        self
    }

    pub fn error_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &ScriptError) + 'static,
    {
        self.error_hook = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Result<Engine> {
        debug!(roots = ?self.roots, "EngineBuilder::build: called");
        if self.roots.is_empty() {
            return Err(EngineError::NoRoots);
        }
        if let Some(missing) = self.roots.iter().find(|root| !root.is_dir()) {
            return Err(EngineError::RootNotFound(missing.clone()));
        }
        let capabilities = Rc::new(Capabilities::new(
            self.globals,
            self.observers,
            self.native_modules,
            self.allowed_imports,
        ));
        let engine = Engine {
            loader: Loader::new(self.roots),
            registry: Registry::new(),
            capabilities,
            loading: RefCell::new(HashSet::new()),
            prefix: self.prefix.filter(|p| !p.is_empty()),
            index_page: self.index_page.filter(|p| !p.is_empty()),
            not_found_page: self.not_found_page.filter(|p| !p.is_empty()),
            error_hook: self.error_hook,
        };
        engine.load_all();
        Ok(engine)
    }
}
