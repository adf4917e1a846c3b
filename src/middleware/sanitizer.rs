//! String sanitization for request bodies and query parameters

use serde_json::Value;
use std::collections::HashMap;

/// Rewrites untrusted strings into an inert form: control characters
/// removed, HTML metacharacters escaped, length capped.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    max_string_length: usize,
}

impl Sanitizer {
    pub fn new(max_string_length: usize) -> Self {
        Self { max_string_length }
    }

    /// Sanitize a single string
    pub fn sanitize_text(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut chars = 0;

        for c in text.chars() {
            if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
                continue;
            }

            let escaped = match c {
                '&' => "&amp;",
                '<' => "&lt;",
                '>' => "&gt;",
                '"' => "&quot;",
                '\'' => "&#x27;",
                _ => "",
            };

            let width = if escaped.is_empty() { 1 } else { escaped.chars().count() };
            if chars + width > self.max_string_length {
                break;
            }
            chars += width;

            if escaped.is_empty() {
                out.push(c);
            } else {
                out.push_str(escaped);
            }
        }

        out
    }

    /// Sanitize every string inside a JSON value, in place. Object keys are
    /// left as they are.
    pub fn sanitize_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.sanitize_text(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.sanitize_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.sanitize_value(v)),
            _ => {}
        }
    }

    /// Sanitize every value of a string map, in place
    pub fn sanitize_map(&self, map: &mut HashMap<String, String>) {
        for value in map.values_mut() {
            *value = self.sanitize_text(value);
        }
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(10_000)
    }
}
