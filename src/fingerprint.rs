use crate::request_options::RequestOptions;
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// Canonical identity of a logical request, used as the cache/dedup key.
///
/// Derived from method + URL path + sorted query parameters + canonical
/// body, so parameter order and body key order never create spurious
/// misses. Computation is pure and deterministic.
#[derive(Hash, Eq, PartialEq, Clone, Debug)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint for a request.
    pub fn from_request(options: &RequestOptions) -> Self {
        let (path, query) = split_url(options.url());

        let mut hasher = Sha256::new();
        hasher.update(options.method().to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());
        hasher.update(b"\n");

        for (name, value) in normalized_query_pairs(query) {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"&");
        }
        hasher.update(b"\n");

        if let Some(body) = options.body() {
            // serde_json objects serialize with sorted keys, so structurally
            // identical payloads collapse to the same bytes.
            if let Ok(canonical) = serde_json::to_string(body) {
                hasher.update(canonical.as_bytes());
            }
        }

        Fingerprint(hex::encode(hasher.finalize()))
    }

    /// Coalescing key for a debounce window: method and path only, query
    /// and body excluded.
    ///
    /// Successive calls whose arguments are still evolving (keystroke
    /// search, filter tweaks) land in the same window this way, and the
    /// latest call's full options win when the window fires.
    pub fn from_endpoint(options: &RequestOptions) -> Self {
        let (path, _) = split_url(options.url());

        let mut hasher = Sha256::new();
        hasher.update(options.method().to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(path.as_bytes());

        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn split_url(url: &str) -> (&str, &str) {
    match url.split_once('?') {
        Some((path, query)) => (path, query),
        None => (url, ""),
    }
}

/// Percent-decode and sort query pairs so ordering and encoding variants
/// hash identically.
fn normalized_query_pairs(query: &str) -> Vec<(Cow<'_, str>, Cow<'_, str>)> {
    let mut pairs: Vec<(Cow<'_, str>, Cow<'_, str>)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect();
    pairs.sort();
    pairs
}

fn decode_component(raw: &str) -> Cow<'_, str> {
    urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request_options::{Method, RequestOptions};
    use serde_json::json;

    #[test]
    fn test_fingerprint_deterministic() {
        let options = RequestOptions::get("/api/users?page=1&sort=name");
        let a = Fingerprint::from_request(&options);
        let b = Fingerprint::from_request(&options);
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_order_does_not_matter() {
        let a = Fingerprint::from_request(&RequestOptions::get("/api/users?page=1&sort=name"));
        let b = Fingerprint::from_request(&RequestOptions::get("/api/users?sort=name&page=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_method_distinguishes() {
        let get = Fingerprint::from_request(&RequestOptions::get("/api/users"));
        let del = Fingerprint::from_request(&RequestOptions::new(Method::Delete, "/api/users"));
        assert_ne!(get, del);
    }

    #[test]
    fn test_body_key_order_does_not_matter() {
        let a = Fingerprint::from_request(&RequestOptions::post(
            "/api/users",
            json!({"name": "ada", "role": "admin"}),
        ));
        let b = Fingerprint::from_request(&RequestOptions::post(
            "/api/users",
            json!({"role": "admin", "name": "ada"}),
        ));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_bodies_differ() {
        let a = Fingerprint::from_request(&RequestOptions::post("/api/users", json!({"id": 1})));
        let b = Fingerprint::from_request(&RequestOptions::post("/api/users", json!({"id": 2})));
        assert_ne!(a, b);
    }

    #[test]
    fn test_endpoint_key_ignores_query_and_body() {
        let a = Fingerprint::from_endpoint(&RequestOptions::get("/api/search?q=r"));
        let b = Fingerprint::from_endpoint(&RequestOptions::get("/api/search?q=rust"));
        assert_eq!(a, b);

        let c = Fingerprint::from_endpoint(&RequestOptions::get("/api/orders?q=r"));
        assert_ne!(a, c);

        let d = Fingerprint::from_endpoint(&RequestOptions::new(
            Method::Delete,
            "/api/search",
        ));
        assert_ne!(a, d);
    }

    #[test]
    fn test_encoded_query_collapses() {
        let a = Fingerprint::from_request(&RequestOptions::get("/search?q=hello%20world"));
        let b = Fingerprint::from_request(&RequestOptions::get("/search?q=hello world"));
        assert_eq!(a, b);
    }
}
