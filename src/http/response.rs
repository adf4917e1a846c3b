//! Outbound response envelope.

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::Bytes;
use serde_json::{json, Value};

/// Response payload
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    /// Pre-rendered bytes; the caller is expected to set `Content-Type`
    Raw(Bytes),
    /// No payload and no `Content-Type`
    Empty,
}

/// Status, body and headers produced by a handler or a middleware
#[derive(Debug, Clone)]
pub struct ApiResponse {
    status: StatusCode,
    body: ResponseBody,
    headers: HeaderMap,
}

impl ApiResponse {
    pub fn json(status: StatusCode, body: Value) -> Self {
        Self {
            status,
            body: ResponseBody::Json(body),
            headers: HeaderMap::new(),
        }
    }

    /// 200 with a JSON body
    pub fn ok(body: Value) -> Self {
        Self::json(StatusCode::OK, body)
    }

    /// `{"error": message}`
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "error": message.into() }))
    }

    /// Non-JSON body with an explicit content type
    pub fn raw(status: StatusCode, body: impl Into<Bytes>, content_type: HeaderValue) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, content_type);
        Self {
            status,
            body: ResponseBody::Raw(body.into()),
            headers,
        }
    }

    /// Status only, e.g. 204
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// The JSON body, if this is a JSON response
    pub fn body_json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            ResponseBody::Raw(_) | ResponseBody::Empty => None,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Merge headers staged by middleware. Headers the response already
    /// carries win.
    pub fn merge_headers(&mut self, staged: HeaderMap) {
        let existing: Vec<HeaderName> = self.headers.keys().cloned().collect();
        let mut last = None;
        for (name, value) in staged {
            if let Some(name) = name {
                last = Some(name);
            }
            if let Some(name) = &last {
                if !existing.contains(name) {
                    self.headers.append(name.clone(), value);
                }
            }
        }
    }

    /// Serialize into transport parts. `Content-Type: application/json` is
    /// set unless a content type was provided explicitly or there is no body.
    pub fn finalize(self) -> (StatusCode, HeaderMap, Bytes) {
        let mut headers = self.headers;
        let has_body = !matches!(self.body, ResponseBody::Empty);
        if has_body && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let body = match self.body {
            ResponseBody::Json(value) => Bytes::from(value.to_string()),
            ResponseBody::Raw(bytes) => bytes,
            ResponseBody::Empty => Bytes::new(),
        };

        (self.status, headers, body)
    }
}
