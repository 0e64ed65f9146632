use getset::Getters;
use serde_json::Value;
use strum_macros::{Display, EnumString};

/// HTTP method of a logical request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

/// Description of a logical request as issued by a caller.
///
/// Two option values that fingerprint identically are treated as the same
/// request for deduplication and caching purposes.
#[derive(Clone, Debug, Getters)]
#[get = "pub"]
pub struct RequestOptions {
    method: Method,
    url: String,
    body: Option<Value>,
    headers: Vec<(String, String)>,
    /// Skip the response cache for this call (the in-flight tracker still
    /// applies).
    bypass_cache: bool,
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
            bypass_cache: false,
        }
    }

    /// Shorthand for a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Shorthand for a POST request carrying a JSON body.
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }
}
