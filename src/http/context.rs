//! Per-request context passed through the middleware chain.

use crate::auth::Identity;
use crate::http::Method;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use uuid::Uuid;

/// Attribute key under which the authenticated identity is stored
pub const IDENTITY_ATTRIBUTE: &str = "identity";

/// Normalized inbound request. Owned by exactly one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Value,
    query_params: HashMap<String, String>,
    path_params: HashMap<String, String>,
    attributes: HashMap<String, Value>,
    remote_addr: Option<SocketAddr>,
    content_length: u64,
    response_headers: HeaderMap,
}

impl RequestContext {
    /// Build a context from raw transport input.
    pub fn from_parts(
        method: Method,
        path: impl Into<String>,
        query: Option<&str>,
        headers: HeaderMap,
        body: &[u8],
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(body.len() as u64);

        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_ascii_lowercase().contains("application/json"))
            .unwrap_or(false);

        let body = if is_json {
            parse_json_body(body)
        } else {
            Value::Object(parse_form(body).into_iter().map(|(k, v)| (k, Value::String(v))).collect())
        };

        let query_params = query
            .map(|q| parse_form(q.as_bytes()).into_iter().collect())
            .unwrap_or_default();

        Self {
            request_id: Uuid::new_v4(),
            method,
            path: path.into(),
            headers,
            body,
            query_params,
            path_params: HashMap::new(),
            attributes: HashMap::new(),
            remote_addr,
            content_length,
            response_headers: HeaderMap::new(),
        }
    }

    /// Start building a context by hand (tests, internal callers)
    pub fn builder(method: Method, path: impl Into<String>) -> RequestContextBuilder {
        RequestContextBuilder {
            method,
            path: path.into(),
            query: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
            remote_addr: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// All values of a header joined by ", "; lookup is case-insensitive.
    pub fn header_line(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();

        if values.is_empty() {
            None
        } else {
            Some(values.join(", "))
        }
    }

    pub fn parsed_body(&self) -> &Value {
        &self.body
    }

    pub fn parsed_body_mut(&mut self) -> &mut Value {
        &mut self.body
    }

    /// Look up a top-level string field of the parsed body
    pub fn body_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    pub fn query_params(&self) -> &HashMap<String, String> {
        &self.query_params
    }

    pub fn query_params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.query_params
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn set_path_params(&mut self, params: HashMap<String, String>) {
        self.path_params = params;
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, value: Value) {
        self.attributes.insert(name.into(), value);
    }

    /// The identity attached by the authentication middleware, if any
    pub fn identity(&self) -> Option<Identity> {
        self.attributes
            .get(IDENTITY_ATTRIBUTE)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_identity(&mut self, identity: &Identity) {
        // Identity only holds strings, serialization cannot fail
        if let Ok(value) = serde_json::to_value(identity) {
            self.attributes.insert(IDENTITY_ATTRIBUTE.to_string(), value);
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Declared `Content-Length`, or the received body size when absent
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Queue a header for the outbound response
    pub fn stage_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    pub fn staged_headers(&self) -> &HeaderMap {
        &self.response_headers
    }

    pub(crate) fn take_staged_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.response_headers)
    }
}

/// Builder for [`RequestContext`]
#[derive(Debug, Clone)]
pub struct RequestContextBuilder {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Vec<u8>,
    remote_addr: Option<SocketAddr>,
}

impl RequestContextBuilder {
    /// Add a header; invalid names or values are skipped
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// JSON body with a matching content type
    pub fn json(mut self, body: &Value) -> Self {
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = body.to_string().into_bytes();
        self
    }

    /// Form-encoded body
    pub fn form(mut self, body: impl Into<String>) -> Self {
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.body = body.into().into_bytes();
        self
    }

    /// Body bytes as-is
    pub fn raw_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", &format!("Bearer {}", token))
    }

    pub fn build(self) -> RequestContext {
        RequestContext::from_parts(
            self.method,
            self.path,
            self.query.as_deref(),
            self.headers,
            &self.body,
            self.remote_addr,
        )
    }
}

/// Empty or invalid JSON yields an empty object
fn parse_json_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Map::new());
    }
    serde_json::from_slice(body).unwrap_or_else(|_| Value::Object(Map::new()))
}

fn parse_form(body: &[u8]) -> Vec<(String, String)> {
    serde_urlencoded::from_bytes::<Vec<(String, String)>>(body).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_body() {
        let ctx = RequestContext::builder(Method::Post, "/leads")
            .json(&json!({"name": "Ada", "tags": ["x"]}))
            .build();
        assert_eq!(ctx.body_str("name"), Some("Ada"));
        assert_eq!(ctx.parsed_body()["tags"][0], "x");
    }

    #[test]
    fn test_invalid_json_is_empty_map() {
        let ctx = RequestContext::builder(Method::Post, "/leads")
            .header("Content-Type", "application/json; charset=utf-8")
            .raw_body("{not json")
            .build();
        assert_eq!(ctx.parsed_body(), &json!({}));

        let ctx = RequestContext::builder(Method::Post, "/leads")
            .header("Content-Type", "application/json")
            .build();
        assert_eq!(ctx.parsed_body(), &json!({}));
    }

    #[test]
    fn test_form_body() {
        let ctx = RequestContext::builder(Method::Post, "/forms/1/submit")
            .form("first_name=Ada&last_name=Lovelace+King&note=a%26b")
            .build();
        assert_eq!(ctx.body_str("first_name"), Some("Ada"));
        assert_eq!(ctx.body_str("last_name"), Some("Lovelace King"));
        assert_eq!(ctx.body_str("note"), Some("a&b"));
    }

    #[test]
    fn test_no_content_type_parses_as_form() {
        let ctx = RequestContext::builder(Method::Post, "/x")
            .raw_body("a=1")
            .build();
        assert_eq!(ctx.body_str("a"), Some("1"));
    }

    #[test]
    fn test_query_params() {
        let ctx = RequestContext::builder(Method::Get, "/leads")
            .query("page=2&q=acme%20corp")
            .build();
        assert_eq!(ctx.query_params()["page"], "2");
        assert_eq!(ctx.query_params()["q"], "acme corp");
    }

    #[test]
    fn test_header_line_is_case_insensitive_and_joined() {
        let ctx = RequestContext::builder(Method::Get, "/")
            .header("X-Custom", "a")
            .header("x-custom", "b")
            .build();
        assert_eq!(ctx.header_line("X-CUSTOM").as_deref(), Some("a, b"));
        assert!(ctx.header_line("missing").is_none());
    }

    #[test]
    fn test_content_length_prefers_header() {
        let ctx = RequestContext::builder(Method::Post, "/")
            .header("Content-Length", "999")
            .raw_body("abc")
            .build();
        assert_eq!(ctx.content_length(), 999);

        let ctx = RequestContext::builder(Method::Post, "/").raw_body("abc").build();
        assert_eq!(ctx.content_length(), 3);
    }

    #[test]
    fn test_identity_attribute() {
        let mut ctx = RequestContext::builder(Method::Get, "/").build();
        assert!(ctx.identity().is_none());

        ctx.set_identity(&Identity {
            id: "7".to_string(),
            username: Some("ada".to_string()),
        });
        let identity = ctx.identity().unwrap();
        assert_eq!(identity.id, "7");
        assert_eq!(ctx.attribute("identity").unwrap()["username"], "ada");
    }
}
