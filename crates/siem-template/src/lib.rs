//! A minimal, safe template scheme: `{dotted.path}` placeholders resolved
//! against a `serde_json::Value` context. No expressions, no code
//! execution; offence titles and response parameters never need more.

use serde_json::{Map, Value};

/// A lookup context built from whatever the caller wants addressable by a
/// template: usually an `{event, ioc, offence}` triple plus a handful of
/// flat convenience aliases (`ioc_value`, `event_source_ip`, ...).
#[derive(Debug, Clone, Default)]
pub struct Context {
    root: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self { root: Map::new() }
    }

    /// Binds a top-level name (e.g. `"event"`, `"ioc_value"`) to a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.root.insert(key.into(), value.into());
        self
    }

    /// Binds a top-level name to an already-built JSON object, so
    /// `{event.source_ip}` can resolve through it.
    pub fn set_object(&mut self, key: impl Into<String>, value: Map<String, Value>) -> &mut Self {
        self.root.insert(key.into(), Value::Object(value));
        self
    }

    fn resolve(&self, path: &str) -> Option<String> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.root.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        value_to_display(current)
    }
}

fn value_to_display(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Replaces every `{dotted.path}` placeholder in `template` with its
/// resolved value from `context`. A placeholder whose path does not resolve
/// is replaced with an empty string: rendering is total, never an error,
/// since a title/parameter template is never untrusted code.
pub fn render(template: &str, context: &Context) -> String {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = template[i..].find('}') {
                let path = &template[i + 1..i + end];
                if is_valid_path(path) {
                    out.push_str(&context.resolve(path).unwrap_or_default());
                    i += end + 1;
                    continue;
                }
            }
        }
        // Not a placeholder (or an unterminated `{`): copy the byte through.
        // Safe because we only skip ahead inside the placeholder branch.
        let ch_len = template[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        out.push_str(&template[i..i + ch_len]);
        i += ch_len;
    }
    out
}

fn is_valid_path(path: &str) -> bool {
    !path.is_empty()
        && path
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
}
