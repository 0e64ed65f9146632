use crate::error::Error;
use crate::request_options::{Method, RequestOptions};
use async_trait::async_trait;
use serde_json::Value;
use surf::http::headers::HeaderName;
use surf::{Client, Url};

/// Header that marks speculative requests so the server can distinguish
/// them from user-initiated ones.
pub const PREFETCH_HEADER: &str = "x-prefetch";

/// The network boundary: issues a request and decodes a JSON body.
///
/// Tests substitute a scripted implementation behind this seam; production
/// code uses [`SurfTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &RequestOptions, prefetch: bool) -> Result<Value, Error>;
}

/// surf-backed transport. Non-2xx responses and transport failures are
/// both surfaced as `Network` errors; nothing is retried here.
pub struct SurfTransport {
    http: Client,
    default_headers: Vec<(String, String)>,
}

impl SurfTransport {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            default_headers: Vec::new(),
        }
    }

    /// Resolve relative request URLs against a base endpoint.
    pub fn with_base_url(base: &str) -> Result<Self, Error> {
        let url = Url::parse(base)
            .map_err(|e| Error::Configuration(format!("invalid base URL {base:?}: {e}")))?;
        let http: Client = surf::Config::new()
            .set_base_url(url)
            .try_into()
            .map_err(|e| Error::Configuration(format!("transport setup failed: {e}")))?;
        Ok(Self {
            http,
            default_headers: Vec::new(),
        })
    }

    /// Attach a header to every outgoing request, e.g. a session cookie
    /// or bearer token carrying the embedder's credential policy.
    pub fn with_default_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }
}

impl Default for SurfTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SurfTransport {
    async fn execute(&self, request: &RequestOptions, prefetch: bool) -> Result<Value, Error> {
        let mut builder = match request.method() {
            Method::Get => self.http.get(request.url()),
            Method::Post => self.http.post(request.url()),
            Method::Put => self.http.put(request.url()),
            Method::Delete => self.http.delete(request.url()),
            Method::Patch => self.http.patch(request.url()),
        };

        for (name, value) in self
            .default_headers
            .iter()
            .chain(request.headers().iter())
        {
            let header = HeaderName::from_bytes(name.to_lowercase().into_bytes())
                .map_err(|e| Error::Network(format!("invalid header {name:?}: {e}")))?;
            builder = builder.header(header, value.as_str());
        }

        if prefetch {
            let header = HeaderName::from_bytes(PREFETCH_HEADER.as_bytes().to_vec())
                .map_err(|e| Error::Network(e.to_string()))?;
            builder = builder.header(header, "true");
        }

        if let Some(body) = request.body() {
            let body = surf::Body::from_json(body)
                .map_err(|e| Error::Network(format!("body serialization failed: {e}")))?;
            builder = builder.body(body);
        }

        let mut response = builder
            .await
            .map_err(|e| Error::Network(format!("transport error: {e}")))?;

        if !response.status().is_success() {
            log::debug!(
                "Request to {} failed with status {}",
                request.url(),
                response.status()
            );
            return Err(Error::Network(format!(
                "unexpected status {} for {}",
                response.status(),
                request.url()
            )));
        }

        response
            .body_json::<Value>()
            .await
            .map_err(|e| Error::Network(format!("invalid JSON body: {e}")))
    }
}
