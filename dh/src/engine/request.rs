//! Request Context
//!
//! Everything one request carries into the pipeline. Built from a request
//! URI (absolute or origin-form) or from already split fields.

use indexmap::IndexMap;
use tracing::debug;
use url::Url;

use crate::capabilities::builtins::arguments_value;
use crate::capabilities::escape::parse_qs;
use crate::script::Value;

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub scheme: String,
    pub netloc: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
    /// Query arguments; repeated names keep every value in order
    pub arguments: IndexMap<String, Vec<String>>,
    pub headers: IndexMap<String, String>,
    pub method: Option<String>,
    pub body: Option<String>,
    pub client: Option<String>,
    /// Caller-supplied keywords forwarded to every stage
    pub extras: IndexMap<String, Value>,
}

impl RequestContext {
    /// Context for a path with nothing else set
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Self::default()
        }
    }

    /// Split `uri` into its parts and parse the query string
    pub fn from_uri(uri: &str) -> Self {
        debug!(%uri, "RequestContext::from_uri: called");
        let mut context = match Url::parse(uri) {
            Ok(url) if url.has_host() => Self {
                scheme: url.scheme().to_string(),
                netloc: netloc(&url),
                path: url.path().to_string(),
                query: url.query().unwrap_or_default().to_string(),
                fragment: url.fragment().unwrap_or_default().to_string(),
                ..Self::default()
            },
            _ => split_relative(uri),
        };
        context.arguments = parse_qs(&context.query);
        context
    }

    pub fn with_arguments(mut self, arguments: IndexMap<String, Vec<String>>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    pub fn with_client(mut self, client: &str) -> Self {
        self.client = Some(client.to_string());
        self
    }

    pub fn with_extra(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extras.insert(name.to_string(), value.into());
        self
    }

    /// Keyword arguments every pipeline stage receives (except `pipe`)
    pub fn keywords(&self) -> IndexMap<String, Value> {
        let mut keywords = IndexMap::new();
        let headers = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
            .collect();
        keywords.insert("headers".to_string(), Value::dict(headers));
        keywords.insert("arguments".to_string(), arguments_value(&self.arguments));
        keywords.insert("path".to_string(), Value::from(self.path.as_str()));
        keywords.insert("scheme".to_string(), Value::from(self.scheme.as_str()));
        keywords.insert("netloc".to_string(), Value::from(self.netloc.as_str()));
        keywords.insert("query".to_string(), Value::from(self.query.as_str()));
        keywords.insert("fragment".to_string(), Value::from(self.fragment.as_str()));
        for (name, value) in [("method", &self.method), ("body", &self.body), ("client", &self.client)] {
            if let Some(value) = value {
                keywords.insert(name.to_string(), Value::from(value.as_str()));
            }
        }
        for (name, value) in &self.extras {
            keywords.insert(name.clone(), value.clone());
        }
        keywords
    }
}

fn netloc(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Origin-form targets (`/path?query#fragment`) have no scheme or host
fn split_relative(uri: &str) -> RequestContext {
    let (rest, fragment) = uri.split_once('#').unwrap_or((uri, ""));
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    RequestContext {
        path: path.to_string(),
        query: query.to_string(),
        fragment: fragment.to_string(),
        ..RequestContext::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_relative_uri() {
        let context = RequestContext::from_uri("/page/sub?a=1&a=2&b=x#top");
        assert_eq!(context.path, "/page/sub");
        assert_eq!(context.query, "a=1&a=2&b=x");
        assert_eq!(context.fragment, "top");
        assert_eq!(context.arguments["a"], vec!["1", "2"]);
        assert_eq!(context.arguments["b"], vec!["x"]);
        assert!(context.scheme.is_empty());
    }

    #[test]
    fn test_from_absolute_uri() {
        let context = RequestContext::from_uri("http://host.nl:8080/afile?query=something#fragments");
        assert_eq!(context.scheme, "http");
        assert_eq!(context.netloc, "host.nl:8080");
        assert_eq!(context.path, "/afile");
        assert_eq!(context.arguments["query"], vec!["something"]);
        assert_eq!(context.fragment, "fragments");
    }

    #[test]
    fn test_keywords_include_optional_fields_only_when_set() {
        let context = RequestContext::new("/a").with_header("Host", "example.org");
        let keywords = context.keywords();
        assert!(keywords.contains_key("headers"));
        assert!(keywords.contains_key("arguments"));
        assert!(!keywords.contains_key("method"));
        assert!(!keywords.contains_key("pipe"));

        let keywords = context.with_method("POST").with_extra("session", "s1").keywords();
        assert_eq!(keywords["method"].to_string(), "POST");
        assert_eq!(keywords["session"].to_string(), "s1");
    }
}
