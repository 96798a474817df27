//! Module Loader
//!
//! Finds template sources under the configured roots and turns one source
//! file into a `Module`. Loading never fails: a file that cannot be read,
//! parsed or executed becomes a degraded module whose `main` renders the
//! escaped trace.

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::module::Module;
use crate::capabilities::Capabilities;
use crate::capabilities::escape::escape_html;
use crate::script::{Env, ErrorKind, ModuleResolver, ScriptError, Sequence, Value, Vm, compile};

/// Template file extension, without the dot
pub const EXTENSION: &str = "sf";

/// Locates template sources; the first root that has a module wins
#[derive(Debug, Clone)]
pub struct Loader {
    roots: Vec<PathBuf>,
    /// Resolved forms of `roots`, matched against watcher paths
    canonical: Vec<PathBuf>,
}

impl Loader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        debug!(?roots, "Loader::new: called");
        let canonical = roots
            .iter()
            .map(|root| fs::canonicalize(root).unwrap_or_else(|_| root.clone()))
            .collect();
        Self { roots, canonical }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Module name for a path relative to a root: `util/strings.sf` is `util.strings`
    pub fn module_name(relative: &Path) -> Option<String> {
        let text = relative.to_str()?;
        let stem = text.strip_suffix(&format!(".{}", EXTENSION))?;
        let name = stem.replace(['/', '\\'], ".");
        is_valid_name(&name).then_some(name)
    }

    /// Source file for `name`: `<root>/<name>.sf`, then `<root>/<a>/<b>.sf` for `a.b`
    pub fn find_source(&self, name: &str) -> Option<PathBuf> {
        debug!(%name, "Loader::find_source: called");
        if !is_valid_name(name) {
            debug!(%name, "Loader::find_source: invalid module name");
            return None;
        }
        let literal = format!("{}.{}", name, EXTENSION);
        let nested = format!("{}.{}", name.replace('.', "/"), EXTENSION);
        for root in &self.roots {
            for candidate in [&literal, &nested] {
                let path = root.join(candidate);
                if path.is_file() {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Every module on disk as (name, path), first root winning, sorted by name
    pub fn scan(&self) -> Vec<(String, PathBuf)> {
        debug!("Loader::scan: called");
        let mut found: Vec<(String, PathBuf)> = Vec::new();
        for root in &self.roots {
            let entries = WalkDir::new(root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file());
            for entry in entries {
                let Ok(relative) = entry.path().strip_prefix(root) else {
                    continue;
                };
                let Some(name) = Self::module_name(relative) else {
                    continue;
                };
                if found.iter().any(|(existing, _)| *existing == name) {
                    debug!(%name, path = %entry.path().display(), "Loader::scan: shadowed by earlier root");
                    continue;
                }
                found.push((name, entry.path().to_path_buf()));
            }
        }
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// Path of `path` relative to whichever root contains it
    ///
    /// Roots and paths are compared as given first, then resolved, so a
    /// relative or symlinked root still matches absolute event paths.
    pub fn relative_to_root(&self, path: &Path) -> Option<PathBuf> {
        if let Some(relative) = self.roots.iter().find_map(|root| path.strip_prefix(root).ok()) {
            return Some(relative.to_path_buf());
        }
        let resolved = resolve(path)?;
        self.canonical
            .iter()
            .find_map(|root| resolved.strip_prefix(root).ok())
            .map(Path::to_path_buf)
    }
}

/// Canonical form of `path`; a removed file resolves through its parent directory
fn resolve(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Some(resolved);
    }
    let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty())?;
    let name = path.file_name()?;
    fs::canonicalize(parent).ok().map(|parent| parent.join(name))
}

/// Names are dotted identifiers-ish: no empty parts and no path separators
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|part| !part.is_empty() && !part.contains(['/', '\\', '\0']))
}

/// Read, compile and execute one template into a fresh namespace
pub fn load_module(
    name: &str,
    path: &Path,
    capabilities: &Rc<Capabilities>,
    resolver: &dyn ModuleResolver,
) -> Module {
    debug!(%name, path = %path.display(), "load_module: called");
    let namespace = Env::root(capabilities.clone());
    match execute(name, path, &namespace, resolver) {
        Ok(()) => {
            info!(%name, path = %path.display(), "Loaded module");
            Module::new(name, Some(path.to_path_buf()), namespace, None)
        }
        Err(err) => {
            let trace = err.format_trace();
            warn!(%name, path = %path.display(), error = %err, "Module failed to load; serving its trace");
            namespace.set("main", error_entry(&trace));
            Module::new(name, Some(path.to_path_buf()), namespace, Some(trace))
        }
    }
}

fn execute(name: &str, path: &Path, namespace: &Rc<Env>, resolver: &dyn ModuleResolver) -> Result<(), ScriptError> {
    let source = fs::read_to_string(path).map_err(|err| {
        ScriptError::new(
            ErrorKind::Import,
            format!("cannot read template '{}' from {}: {}", name, path.display(), err),
        )
    })?;
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}.{}", name, EXTENSION));
    let code = compile(&file, &source)?;
    let mut vm = Vm::new(resolver);
    vm.execute(code, namespace.clone())
}

/// Entry point that renders a load failure
fn error_entry(trace: &str) -> Value {
    let escaped = escape_html(trace);
    Value::native("main", move |_, _| {
        Ok(Value::Seq(Sequence::from_values(
            "main",
            vec![Value::from("<pre>"), Value::from(escaped.as_str()), Value::from("</pre>")],
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::native;
    use crate::script::vm::NoModules;
    use crate::script::CallArgs;
    use indexmap::IndexMap;
    use tempfile::TempDir;

    fn capabilities() -> Rc<Capabilities> {
        Rc::new(Capabilities::new(IndexMap::new(), Vec::new(), native::standard(), Vec::new()))
    }

    fn write(dir: &Path, relative: &str, text: &str) -> PathBuf {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    fn render(module: &Module) -> String {
        let resolver = NoModules;
        let mut vm = Vm::new(&resolver);
        let main = module.main().unwrap();
        let value = vm.call(&main, CallArgs::new(vec![])).unwrap();
        vm.collect(&value).unwrap().iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_module_name() {
        assert_eq!(Loader::module_name(Path::new("page.sf")).as_deref(), Some("page"));
        assert_eq!(Loader::module_name(Path::new("rss.xml.sf")).as_deref(), Some("rss.xml"));
        assert_eq!(Loader::module_name(Path::new("util/strings.sf")).as_deref(), Some("util.strings"));
        assert_eq!(Loader::module_name(Path::new("notes.txt")), None);
        assert_eq!(Loader::module_name(Path::new(".sf")), None);
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("page"));
        assert!(is_valid_name("util.strings"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a..b"));
    }

    #[test]
    fn test_find_source_first_root_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let winner = write(first.path(), "page.sf", "");
        write(second.path(), "page.sf", "");
        let nested = write(second.path(), "util/strings.sf", "");
        let loader = Loader::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(loader.find_source("page"), Some(winner));
        assert_eq!(loader.find_source("util.strings"), Some(nested));
        assert_eq!(loader.find_source("missing"), None);
        assert_eq!(loader.find_source(".."), None);
    }

    #[test]
    fn test_relative_to_root_resolves_roots() {
        let dir = TempDir::new().unwrap();
        let page = write(dir.path(), "templates/util/page.sf", "");
        let root = dir.path().join("templates").join("..").join("templates");
        let loader = Loader::new(vec![root.clone()]);
        let canonical = fs::canonicalize(&page).unwrap();
        assert_eq!(loader.relative_to_root(&canonical), Some(PathBuf::from("util/page.sf")));
        assert_eq!(loader.relative_to_root(&root.join("util/page.sf")), Some(PathBuf::from("util/page.sf")));

        fs::remove_file(&page).unwrap();
        assert_eq!(loader.relative_to_root(&canonical), Some(PathBuf::from("util/page.sf")));
        assert_eq!(loader.relative_to_root(Path::new("/elsewhere/page.sf")), None);
    }

    #[test]
    fn test_scan_names_nested_files() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        write(first.path(), "b.sf", "");
        write(first.path(), "ignored.txt", "");
        write(second.path(), "a.sf", "");
        write(second.path(), "b.sf", "");
        write(second.path(), "util/strings.sf", "");
        let loader = Loader::new(vec![first.path().to_path_buf(), second.path().to_path_buf()]);
        let found = loader.scan();
        let names: Vec<&str> = found.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "util.strings"]);
        let b = &found[1].1;
        assert!(b.starts_with(first.path()));
    }

    #[test]
    fn test_load_binds_top_level_names() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "page.sf",
            "title = 'Home'\ndef main(**kwargs) {\n    yield title\n}\n",
        );
        let resolver = NoModules;
        let module = load_module("page", &path, &capabilities(), &resolver);
        assert!(!module.is_degraded());
        assert_eq!(module.get("title").unwrap().to_string(), "Home");
        assert_eq!(render(&module), "Home");
    }

    #[test]
    fn test_load_failure_degrades_to_trace() {
        let dir = TempDir::new().unwrap();
        let path = write(
            dir.path(),
            "broken.sf",
            "before = 1\nx = 1 / 0\nafter = 2\n",
        );
        let resolver = NoModules;
        let module = load_module("broken", &path, &capabilities(), &resolver);
        assert!(module.is_degraded());
        assert!(module.get("before").is_some());
        assert!(module.get("after").is_none());
        let body = render(&module);
        assert!(body.starts_with("<pre>"));
        assert!(body.ends_with("</pre>"));
        assert!(body.contains("DivisionByZero"));
        assert!(body.contains("broken.sf"));
    }

    #[test]
    fn test_syntax_error_is_escaped() {
        let dir = TempDir::new().unwrap();
        let path = write(dir.path(), "bad.sf", "x = <\n");
        let resolver = NoModules;
        let module = load_module("bad", &path, &capabilities(), &resolver);
        let body = render(&module);
        assert!(body.contains("SyntaxError"));
        assert!(body.contains("&lt;"));
    }

    #[test]
    fn test_unreadable_file_degrades() {
        let dir = TempDir::new().unwrap();
        let resolver = NoModules;
        let module = load_module("ghost", &dir.path().join("ghost.sf"), &capabilities(), &resolver);
        assert!(module.is_degraded());
        assert!(module.load_error().unwrap().contains("cannot read template"));
    }
}
