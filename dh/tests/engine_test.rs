//! End-to-end tests for loading, routing, pipelining and reloading

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use dynhtml::{CallArgs, Engine, EngineError, FnObserver, RequestContext, Sequence, Value};
use tempfile::TempDir;

const HTML_200: &str = "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\n";
const HTML_404: &str = "HTTP/1.0 404 Not Found\r\nContent-Type: text/html; charset=utf-8\r\n\r\n";

fn write(dir: &Path, relative: &str, text: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, text).unwrap();
    path
}

fn engine(dir: &TempDir) -> Engine {
    Engine::builder().root(dir.path()).build().unwrap()
}

fn split(response: &str) -> (&str, &str) {
    response.split_once("\r\n\r\n").unwrap()
}

fn body(response: &str) -> &str {
    split(response).1
}

#[test]
fn test_simple_flat_file() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "afile.sf", "def main(*args, **kwargs) {\n  yield \"John is a nut\"\n}\n");
    let engine = engine(&dir);
    let result = engine.render("http://host.nl/afile?query=something#fragments");
    assert_eq!(
        result,
        "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\nJohn is a nut"
    );
}

#[test]
fn test_file_not_found() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let result = engine.render("/missing/path");
    assert_eq!(result, format!("{}File \"missing\" does not exist.", HTML_404));
}

#[test]
fn test_tail_not_found_even_when_head_ignores_pipe() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.sf", "def main(**kwargs) {\n  yield 'nopipe'\n}\n");
    let engine = engine(&dir);
    let result = engine.render("/a/path");
    assert!(result.starts_with(HTML_404), "{}", result);
    assert!(result.contains("File \"path\" does not exist."), "{}", result);
}

#[test]
fn test_root_without_index_page() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/")), "File \"\" does not exist.");
}

#[test]
fn test_not_found_segment_is_escaped() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    let result = engine.render("/%3Cscript%3E");
    assert!(!result.contains("<script>"));
    let result = engine.render("/<b>");
    assert!(result.contains("&lt;b&gt;"), "{}", result);
}

#[test]
fn test_import_other_template() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "simple.sf", "def main(**kwargs) {\n  yield 'is'\n  yield 'snake'\n}\n");
    write(
        dir.path(),
        "other.sf",
        "import simple\n\ndef main(**kwargs) {\n  yield 'me'\n  yield simple.main()\n}\n",
    );
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/other")), "meissnake");
}

#[test]
fn test_pipelining() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "one.sf",
        "def main(pipe, **kwargs) {\n  yield 'one'\n  yield pipe\n  yield 'four'\n}\n",
    );
    write(
        dir.path(),
        "two.sf",
        "def main(pipe, **kwargs) {\n  yield 'two'\n  yield pipe\n  yield 'three'\n}\n",
    );
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/one/two")), "onetwothreefour");
}

#[test]
fn test_three_stage_nesting() {
    let dir = TempDir::new().unwrap();
    let wrap = "def main(pipe, **kwargs) {\n  yield NAME + '['\n  yield pipe\n  yield ']'\n}\n";
    for name in ["a", "b", "c"] {
        write(dir.path(), &format!("{}.sf", name), &wrap.replace("NAME", &format!("'{}'", name)));
    }
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/a/b/c")), "a[b[c[]]]");
}

#[test]
fn test_long_pipeline_path() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.sf", "def main(pipe, **kwargs) {\n  yield 'a'\n  yield pipe\n}\n");
    let engine = engine(&dir);
    let path = "/a".repeat(4000);
    assert_eq!(body(&engine.render(&path)), "a".repeat(4000));

    let missing = format!("{}/nope/a", path);
    assert!(body(&engine.render(&missing)).contains("File \"nope\" does not exist."));
}

#[test]
fn test_unconsumed_pipe_never_runs() {
    let dir = TempDir::new().unwrap();
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let recorder = {
        let log = log.clone();
        FnObserver::new("recorder").on("record", move |_, args| {
            log.borrow_mut().push(args.positional[0].to_string());
            Ok(Value::None)
        })
    };
    write(dir.path(), "outer.sf", "def main(pipe, **kwargs) {\n  yield 'outer'\n}\n");
    write(
        dir.path(),
        "inner.sf",
        "def main(**kwargs) {\n  observable.do.record('inner ran')\n  yield 'inner'\n}\n",
    );
    let engine = Engine::builder()
        .root(dir.path())
        .observer(Rc::new(recorder))
        .build()
        .unwrap();

    assert_eq!(body(&engine.render("/outer/inner")), "outer");
    assert!(log.borrow().is_empty());

    assert_eq!(body(&engine.render("/inner")), "inner");
    assert_eq!(*log.borrow(), vec!["inner ran".to_string()]);
}

#[test]
fn test_runtime_error_keeps_partial_output() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "broken.sf",
        "def main(**kwargs) {\n  yield 'before'\n  yield 1 / 0\n  yield 'after'\n}\n",
    );
    let engine = engine(&dir);
    let response: Vec<String> = engine.handle_uri("/broken").collect();
    assert_eq!(response[0], HTML_200);
    assert_eq!(response[1], "before");
    assert_eq!(response[2], "<pre>");
    assert!(response[3].contains("DivisionByZero: division by zero"));
    assert!(response[3].contains("File &quot;broken.sf&quot;, line 3, in main"));
    assert_eq!(response[4], "</pre>");
    assert_eq!(response.len(), 5);
}

#[test]
fn test_error_trace_is_escaped() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "raise.sf", "def main(**kwargs) {\n  yield 'x'\n  raise '<b>bad</b>'\n}\n");
    let engine = engine(&dir);
    let result = engine.render("/raise");
    assert!(result.contains("&lt;b&gt;bad&lt;/b&gt;"), "{}", result);
    assert!(!result.contains("<b>"));
}

#[test]
fn test_failure_before_streaming_is_500() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "eager.sf", "def main(**kwargs) {\n  return 1 / 0\n}\n");
    let engine = engine(&dir);
    let result = engine.render("/eager");
    let (headers, body) = split(&result);
    assert_eq!(headers, "HTTP/1.0 500 Internal Server Error\r\nContent-Type: text/html; charset=utf-8");
    assert!(body.starts_with("<pre>"));
    assert!(body.ends_with("</pre>"));
}

#[test]
fn test_error_hook_receives_failures() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "broken.sf", "def main(**kwargs) {\n  yield undefined_name\n}\n");
    let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let hook_seen = seen.clone();
    let engine = Engine::builder()
        .root(dir.path())
        .error_hook(move |path, err| hook_seen.borrow_mut().push(format!("{} {}", path, err)))
        .build()
        .unwrap();
    engine.render("/broken");
    assert_eq!(
        *seen.borrow(),
        vec!["/broken NameError: name 'undefined_name' is not defined".to_string()]
    );
}

#[test]
fn test_load_error_degrades_module() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "bad.sf",
        "def main(**kwargs) {\n  yield 'never'\n}\nx = 1 / 0\n",
    );
    let engine = engine(&dir);
    let module = engine.get_module("bad").unwrap();
    assert!(module.is_degraded());
    let result = engine.render("/bad");
    assert!(result.starts_with(HTML_200));
    let body = body(&result);
    assert!(body.starts_with("<pre>"));
    assert!(body.contains("DivisionByZero"));
    assert!(!body.contains("never"));
}

#[test]
fn test_syntax_error_degrades_module() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "typo.sf", "def main(**kwargs {\n  yield 'x'\n}\n");
    let engine = engine(&dir);
    let result = engine.render("/typo");
    assert!(result.contains("SyntaxError"), "{}", result);
    assert!(result.contains("typo.sf"));
}

#[test]
fn test_module_without_main_is_not_found() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "page.sf", "title = 'no entry point'\n");
    write(dir.path(), "_missing.sf", "def main(**kw) {\n  yield 'not-found'\n}\n");
    let engine = Engine::builder()
        .root(dir.path())
        .not_found_page("/_missing")
        .build()
        .unwrap();
    assert_eq!(body(&engine.render("/page")), "not-found");
    assert_eq!(body(&engine.render("/page/does-not-exist")), "not-found");
}

#[test]
fn test_custom_not_found_page_receives_original_path() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "not_found_template.sf", "def main(path, **kwargs) {\n  yield path\n}\n");
    let engine = Engine::builder()
        .root(dir.path())
        .not_found_page("/not_found_template")
        .build()
        .unwrap();
    let result = engine.render("http://host.nl/a/path?query=something");
    let (headers, body) = split(&result);
    assert_eq!(headers, "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8");
    assert_eq!(body, "/a/path");
}

#[test]
fn test_custom_not_found_page_that_does_not_exist() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::builder()
        .root(dir.path())
        .not_found_page("/not_found_template")
        .build()
        .unwrap();
    let result = engine.render("/a/path");
    let (headers, body) = split(&result);
    assert_eq!(headers, "HTTP/1.0 404 Not Found\r\nContent-Type: text/html; charset=utf-8");
    assert_eq!(body, "File \"not_found_template\" does not exist.");
}

#[test]
fn test_prefix_is_stripped() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "afile.sf", "def main(**kwargs) {\n  yield 'John is a nut'\n}\n");
    let engine = Engine::builder().root(dir.path()).prefix("/prefix").build().unwrap();
    assert_eq!(
        engine.render("/prefix/afile"),
        "HTTP/1.0 200 OK\r\nContent-Type: text/html; charset=utf-8\r\n\r\nJohn is a nut"
    );
}

#[test]
fn test_index_page() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "home.sf", "def main(**kwargs) {\n  yield 'welcome'\n}\n");
    let engine = Engine::builder().root(dir.path()).index_page("/home").build().unwrap();
    assert_eq!(body(&engine.render("/")), "welcome");
    assert_eq!(body(&engine.render("/home")), "welcome");
}

#[test]
fn test_xml_content_type() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "rss.xml.sf", "def main(**kwargs) {\n  yield '<rss/>'\n}\n");
    let engine = engine(&dir);
    assert_eq!(
        engine.render("/rss.xml"),
        "HTTP/1.0 200 OK\r\nContent-Type: text/xml; charset=utf-8\r\n\r\n<rss/>"
    );
}

#[test]
fn test_request_fields_reach_every_stage() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "echo.sf",
        "def main(arguments, headers, path, method, session, pipe, **kwargs) {\n  yield ','.join(arguments['a'])\n  yield ' ' + headers['Host'] + ' ' + path + ' ' + method + ' ' + session\n  yield pipe\n}\n",
    );
    write(dir.path(), "tail.sf", "def main(method, **kwargs) {\n  yield ' ' + method\n}\n");
    let engine = engine(&dir);
    let context = RequestContext::from_uri("/echo/tail?a=1&a=2")
        .with_header("Host", "example.org")
        .with_method("POST")
        .with_extra("session", "s1");
    let result: String = engine.handle_request(context).collect();
    assert_eq!(body(&result), "1,2 example.org /echo/tail POST s1 POST");
}

#[test]
fn test_non_string_chunks_are_rendered() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "mixed.sf",
        "def main(**kwargs) {\n  yield 1\n  yield none\n  yield 2.5\n  yield true\n}\n",
    );
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/mixed")), "12.5true");
}

#[test]
fn test_reload_patches_importers() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "simple.sf", "def word() {\n  return 'old'\n}\n");
    write(dir.path(), "other.sf", "import simple\ndef main(**kw) {\n  yield simple.word()\n}\n");
    write(
        dir.path(),
        "captured.sf",
        "from simple import word\ndef main(**kw) {\n  yield word()\n}\n",
    );
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/other")), "old");
    assert_eq!(body(&engine.render("/captured")), "old");

    write(dir.path(), "simple.sf", "def word() {\n  return 'new'\n}\n");
    let reloaded = engine.reload(Path::new("simple.sf")).unwrap();
    assert_eq!(reloaded.name(), "simple");

    // importers see the new module without being reloaded themselves
    assert_eq!(body(&engine.render("/other")), "new");
    // names copied at import time keep the old function
    assert_eq!(body(&engine.render("/captured")), "old");
}

#[test]
fn test_reload_accepts_absolute_paths() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "page.sf", "def main(**kw) {\n  yield 'v1'\n}\n");
    let engine = engine(&dir);
    write(dir.path(), "page.sf", "def main(**kw) {\n  yield 'v2'\n}\n");
    engine.reload(&path);
    assert_eq!(body(&engine.render("/page")), "v2");
}

#[test]
fn test_reload_under_non_canonical_root() {
    let dir = TempDir::new().unwrap();
    let path = write(dir.path(), "templates/page.sf", "def main(**kw) {\n  yield 'v1'\n}\n");
    let root = dir.path().join("templates").join("..").join("templates");
    let engine = Engine::builder().root(&root).build().unwrap();
    assert_eq!(body(&engine.render("/page")), "v1");

    let event_path = fs::canonicalize(&path).unwrap();
    write(dir.path(), "templates/page.sf", "def main(**kw) {\n  yield 'v2'\n}\n");
    assert!(engine.reload(&event_path).is_some());
    assert_eq!(body(&engine.render("/page")), "v2");

    fs::remove_file(&path).unwrap();
    assert!(engine.reload(&event_path).is_none());
    assert!(engine.get_module("page").is_none());
}

#[test]
fn test_reload_of_new_file_makes_it_routable() {
    let dir = TempDir::new().unwrap();
    let engine = engine(&dir);
    assert!(engine.render("/file1").starts_with(HTML_404));
    write(dir.path(), "file1.sf", "def main(**kw) {\n  yield 'one'\n}\n");
    engine.reload(Path::new("file1.sf"));
    assert_eq!(body(&engine.render("/file1")), "one");
}

#[test]
fn test_rescan_removes_deleted_modules() {
    let dir = TempDir::new().unwrap();
    let dependency = write(dir.path(), "dep.sf", "def text() {\n  return 'dep'\n}\n");
    write(dir.path(), "page.sf", "import dep\ndef main(**kw) {\n  yield dep.text()\n}\n");
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/page")), "dep");

    fs::remove_file(&dependency).unwrap();
    let removed = engine.rescan();
    assert_eq!(removed, vec!["dep".to_string()]);
    assert!(engine.get_module("dep").is_none());

    let result = engine.render("/page");
    assert!(result.starts_with(HTML_200));
    assert!(result.contains("ModuleUnloaded: module 'dep' is not loaded"), "{}", result);

    // the file coming back fills the same reference cell
    write(dir.path(), "dep.sf", "def text() {\n  return 'back'\n}\n");
    engine.reload(Path::new("dep.sf"));
    assert_eq!(body(&engine.render("/page")), "back");
}

#[test]
fn test_cyclic_imports() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "a.sf",
        "import b\ndef name() {\n  return 'a'\n}\ndef main(**kw) {\n  yield b.name()\n  yield name()\n  yield b.call_a()\n}\n",
    );
    write(
        dir.path(),
        "b.sf",
        "import a\ndef name() {\n  return 'b'\n}\ndef call_a() {\n  return a.name()\n}\n",
    );
    let engine = engine(&dir);
    assert!(!engine.get_module("a").unwrap().is_degraded());
    assert!(!engine.get_module("b").unwrap().is_degraded());
    assert_eq!(body(&engine.render("/a")), "baa");
}

#[test]
fn test_on_demand_load_of_nested_module() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "util/strings.sf", "def shout(s) {\n  return s.upper()\n}\n");
    write(
        dir.path(),
        "page.sf",
        "import util.strings\ndef main(**kw) {\n  yield strings.shout('hi')\n}\n",
    );
    let engine = engine(&dir);
    assert_eq!(body(&engine.render("/page")), "HI");
    assert!(engine.module_names().contains(&"util.strings".to_string()));
}

#[test]
fn test_first_root_wins() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(first.path(), "page.sf", "def main(**kw) {\n  yield 'first'\n}\n");
    write(second.path(), "page.sf", "def main(**kw) {\n  yield 'second'\n}\n");
    write(second.path(), "only.sf", "def main(**kw) {\n  yield 'only second'\n}\n");
    let engine = Engine::builder()
        .roots([first.path(), second.path()])
        .build()
        .unwrap();
    assert_eq!(body(&engine.render("/page")), "first");
    assert_eq!(body(&engine.render("/only")), "only second");
}

#[test]
fn test_allowed_imports() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "calc.sf",
        "import math\ndef main(**kw) {\n  yield str(math.floor(2.7))\n}\n",
    );
    let allowed = Engine::builder().root(dir.path()).allow_import("math").build().unwrap();
    assert_eq!(body(&allowed.render("/calc")), "2");

    let denied = engine(&dir);
    assert!(denied.get_module("calc").unwrap().is_degraded());
    assert!(denied.render("/calc").contains("No module named 'math'"));
}

#[test]
fn test_globals_are_visible() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "page.sf", "def main(**kw) {\n  yield siteName\n}\n");
    let engine = Engine::builder()
        .root(dir.path())
        .global("siteName", "Example")
        .build()
        .unwrap();
    assert_eq!(body(&engine.render("/page")), "Example");
}

#[test]
fn test_observable_groups() {
    let dir = TempDir::new().unwrap();
    let store = FnObserver::new("store")
        .on("title", |_, _| Ok(Value::from("Title")))
        .on("items", |_, _| {
            Ok(Value::Seq(Sequence::from_values("items", vec![Value::from("a"), Value::from("b")])))
        });
    let extra = FnObserver::new("extra").on("items", |_, _| Ok(Value::from("c")));
    write(
        dir.path(),
        "page.sf",
        "def main(**kw) {\n  yield observable.call.title()\n  yield ':'\n  yield observable.all.items()\n  yield ':'\n  yield observable.any.items()\n}\n",
    );
    let engine = Engine::builder()
        .root(dir.path())
        .observer(Rc::new(store))
        .observer(Rc::new(extra))
        .build()
        .unwrap();
    assert_eq!(body(&engine.render("/page")), "Title:abc:ab");
}

#[test]
fn test_engine_call() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "lib.sf",
        "def add(a, b) {\n  return a + b\n}\ndef count(n) {\n  i = 0\n  while i < n {\n    yield i\n    i += 1\n  }\n}\n",
    );
    let engine = engine(&dir);
    let sum = engine
        .call("lib", "add", CallArgs::new(vec![Value::Int(2), Value::Int(3)]))
        .unwrap();
    assert_eq!(sum.as_int(), Some(5));
    let counted = engine.call("lib", "count", CallArgs::new(vec![Value::Int(3)])).unwrap();
    assert_eq!(counted.to_string(), "[0, 1, 2]");

    assert!(matches!(
        engine.call("lib", "missing", CallArgs::new(vec![])),
        Err(EngineError::FunctionNotFound { .. })
    ));
    assert!(matches!(
        engine.call("nope", "add", CallArgs::new(vec![])),
        Err(EngineError::ModuleNotFound(_))
    ));
}

#[test]
fn test_builder_validates_roots() {
    assert!(matches!(Engine::builder().build(), Err(EngineError::NoRoots)));
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent");
    assert!(matches!(
        Engine::builder().root(&missing).build(),
        Err(EngineError::RootNotFound(path)) if path == missing
    ));
}

#[test]
fn test_engines_are_independent() {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write(first.path(), "page.sf", "def main(**kw) {\n  yield 'first'\n}\n");
    write(second.path(), "page.sf", "def main(**kw) {\n  yield 'second'\n}\n");
    let a = engine(&first);
    let b = engine(&second);
    assert_eq!(body(&a.render("/page")), "first");
    assert_eq!(body(&b.render("/page")), "second");
}
