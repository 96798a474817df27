//! Request Dispatcher
//!
//! A `Response` is the lazy chunk stream for one request. The first pull
//! routes the path and builds the pipeline; routing failures become a
//! complete 404 and nothing else. After the status line has gone out,
//! failures are appended inline as an escaped trace.

use std::collections::VecDeque;

use tracing::{debug, error, info};

use super::Engine;
use super::request::RequestContext;
use super::resolver::build_pipeline;
use crate::capabilities::escape::{escape_html, escape_xml};
use crate::error::PipelineError;
use crate::script::{ScriptError, Sequence, Value, Vm};

/// Content type for a routed path, by suffix
pub fn content_type(path: &str) -> &'static str {
    const TYPES: &[(&str, &str)] = &[
        (".xml", "text/xml"),
        (".json", "application/json"),
        (".txt", "text/plain"),
        (".css", "text/css"),
        (".js", "application/javascript"),
    ];
    TYPES
        .iter()
        .find(|(suffix, _)| path.ends_with(suffix))
        .map(|(_, content_type)| *content_type)
        .unwrap_or("text/html")
}

/// Strip the prefix and substitute the index page for `/`
pub fn route(prefix: Option<&str>, index_page: Option<&str>, path: &str) -> String {
    let path = match prefix {
        Some(prefix) if !prefix.is_empty() => path.strip_prefix(prefix).unwrap_or(path),
        _ => path,
    };
    match index_page {
        Some(index) if path == "/" && !index.is_empty() => index.to_string(),
        _ => path.to_string(),
    }
}

fn status_line(code: u16, reason: &str, content_type: &str) -> String {
    format!(
        "HTTP/1.0 {} {}\r\nContent-Type: {}; charset=utf-8\r\n\r\n",
        code, reason, content_type
    )
}

fn error_chunks(err: &ScriptError) -> [String; 3] {
    [
        "<pre>".to_string(),
        escape_html(&err.format_trace()),
        "</pre>".to_string(),
    ]
}

enum State {
    Start(Box<RequestContext>),
    Streaming(Sequence),
    Done,
}

/// Chunks of one HTTP response, produced on demand
pub struct Response<'e> {
    engine: &'e Engine,
    vm: Vm<'e>,
    state: State,
    pending: VecDeque<String>,
    path: String,
}

impl<'e> Response<'e> {
    pub(crate) fn new(engine: &'e Engine, context: RequestContext) -> Self {
        Self {
            engine,
            vm: Vm::new(engine),
            state: State::Start(Box::new(context)),
            pending: VecDeque::new(),
            path: String::new(),
        }
    }

    /// Routed path; empty until the first chunk has been pulled
    pub fn path(&self) -> &str {
        &self.path
    }

    fn start(&mut self, context: RequestContext) {
        let engine = self.engine;
        self.path = route(engine.prefix(), engine.index_page(), &context.path);
        info!(path = %self.path, "Handling request");

        let keywords = context.keywords();
        let target = self.path.strip_prefix('/').unwrap_or(&self.path).to_string();
        match build_pipeline(engine, &mut self.vm, &target, &keywords) {
            Ok(value) => self.begin_stream(content_type(&self.path), value),
            Err(PipelineError::TemplateNotFound(segment)) => self.not_found(&context, segment),
            Err(PipelineError::Render(err)) => self.internal_error(err),
        }
    }

    fn not_found(&mut self, context: &RequestContext, segment: String) {
        debug!(%segment, "Response::not_found: called");
        let engine = self.engine;
        let Some(page) = engine.not_found_page() else {
            self.reject(segment);
            return;
        };
        let mut keywords = context.keywords();
        keywords.insert("path".to_string(), Value::from(context.path.as_str()));
        let target = page.strip_prefix('/').unwrap_or(page);
        match build_pipeline(engine, &mut self.vm, target, &keywords) {
            Ok(value) => self.begin_stream(content_type(page), value),
            Err(PipelineError::TemplateNotFound(segment)) => self.reject(segment),
            Err(PipelineError::Render(err)) => self.internal_error(err),
        }
    }

    fn reject(&mut self, segment: String) {
        info!(path = %self.path, %segment, "Template not found");
        let message = PipelineError::TemplateNotFound(escape_xml(&segment)).to_string();
        self.pending
            .push_back(status_line(404, "Not Found", "text/html") + &message);
        self.state = State::Done;
    }

    fn internal_error(&mut self, err: ScriptError) {
        self.engine.report_render_error(&self.path, &err);
        self.pending
            .push_back(status_line(500, "Internal Server Error", "text/html"));
        self.pending.extend(error_chunks(&err));
        self.state = State::Done;
    }

    fn begin_stream(&mut self, content_type: &str, value: Value) {
        self.pending.push_back(status_line(200, "OK", content_type));
        let body = Sequence::from_values("response", vec![value]).flatten();
        self.state = State::Streaming(body);
    }

    /// Next rendered chunk from the pipeline, or the inline error page
    fn pull(&mut self, body: &Sequence) -> Option<String> {
        loop {
            match body.next(&mut self.vm) {
                Ok(Some(Value::None)) => continue,
                Ok(Some(Value::Str(s))) => return Some(s.to_string()),
                Ok(Some(other)) => return Some(other.to_string()),
                Ok(None) => {
                    debug!(path = %self.path, "Response::pull: pipeline exhausted");
                    self.state = State::Done;
                    return None;
                }
                Err(err) => {
                    self.engine.report_render_error(&self.path, &err);
                    self.pending.extend(error_chunks(&err));
                    self.state = State::Done;
                    return self.pending.pop_front();
                }
            }
        }
    }
}

impl Iterator for Response<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if let Some(chunk) = self.pending.pop_front() {
            return Some(chunk);
        }
        match std::mem::replace(&mut self.state, State::Done) {
            State::Start(context) => {
                self.start(*context);
                self.pending.pop_front()
            }
            State::Streaming(body) => {
                self.state = State::Streaming(body.clone());
                self.pull(&body)
            }
            State::Done => None,
        }
    }
}

impl std::fmt::Debug for Response<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Start(_) => "start",
            State::Streaming(_) => "streaming",
            State::Done => "done",
        };
        f.debug_struct("Response")
            .field("path", &self.path)
            .field("state", &state)
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Log a rendering failure with its trace
pub(crate) fn log_render_error(path: &str, err: &ScriptError) {
    error!(%path, error = %err, trace = %err.format_trace(), "Rendering failed");
}
