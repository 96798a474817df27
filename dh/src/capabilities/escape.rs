//! HTML/XML escaping and URL encoding helpers

use indexmap::IndexMap;
use url::form_urlencoded;

/// Escape `& < > "` for HTML text and attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape `& < >` for XML character data
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

const ENTITIES: [(&str, char); 6] = [
    ("&amp;", '&'),
    ("&lt;", '<'),
    ("&gt;", '>'),
    ("&quot;", '"'),
    ("&#x27;", '\''),
    ("&#39;", '\''),
];

/// Reverse of `escape_html` (plus the apostrophe entities)
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find('&') {
        out.push_str(&rest[..at]);
        rest = &rest[at..];
        match ENTITIES.iter().find(|(entity, _)| rest.starts_with(entity)) {
            Some((entity, c)) => {
                out.push(*c);
                rest = &rest[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Form-encode pairs; every value of a multi-valued key is emitted
pub fn urlencode<'a>(pairs: impl IntoIterator<Item = (&'a str, Vec<String>)>) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in pairs {
        for value in values {
            serializer.append_pair(key, &value);
        }
    }
    serializer.finish()
}

/// Parse a query string into name -> values, keeping order; blank values are dropped
pub fn parse_qs(query: &str) -> IndexMap<String, Vec<String>> {
    let mut arguments: IndexMap<String, Vec<String>> = IndexMap::new();
    for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
        if value.is_empty() {
            continue;
        }
        arguments.entry(key.into_owned()).or_default().push(value.into_owned());
    }
    arguments
}

/// Form-encode a single component
pub fn quote(text: &str) -> String {
    form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

/// Decode a form-encoded component; literal `&` and `=` are kept
pub fn unquote(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut start = 0;
    for (at, c) in text.char_indices() {
        if c == '&' || c == '=' {
            out.push_str(&decode_run(&text[start..at]));
            out.push(c);
            start = at + 1;
        }
    }
    out.push_str(&decode_run(&text[start..]));
    out
}

fn decode_run(run: &str) -> String {
    form_urlencoded::parse(run.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}
