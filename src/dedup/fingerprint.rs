//! Request descriptors and their fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Logical description of an outbound request, used only for fingerprinting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// Endpoint URL or path.
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request body. Object keys serialize sorted, so key order is irrelevant.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// User agent of the originating client.
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Caller/session identity.
    #[serde(default)]
    pub session_id: Option<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

impl RequestDescriptor {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
            user_agent: None,
            session_id: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Path component of the URL, used for exclusion matching.
    pub fn path(&self) -> &str {
        endpoint_path(self.url.trim())
    }

    /// True when the path starts with any excluded prefix.
    pub fn is_excluded(&self, exclude_endpoints: &[String]) -> bool {
        let path = self.path();
        exclude_endpoints.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Strip scheme and authority from an absolute URL.
fn endpoint_path(url: &str) -> &str {
    match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            rest.find('/').map(|slash| &rest[slash..]).unwrap_or("/")
        }
        None => url,
    }
}

/// Lowercase scheme and host, drop a trailing slash from the path.
fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let (prefix, path) = match url.find("://") {
        Some(idx) => {
            let rest = &url[idx + 3..];
            let split = rest.find('/').map(|s| idx + 3 + s).unwrap_or(url.len());
            (url[..split].to_ascii_lowercase(), &url[split..])
        }
        None => (String::new(), url),
    };

    let (path, query) = match path.find('?') {
        Some(q) => (&path[..q], &path[q..]),
        None => (path, ""),
    };
    let path = if path.len() > 1 { path.trim_end_matches('/') } else { path };

    format!("{prefix}{path}{query}")
}

/// Content hash identifying duplicate requests.
///
/// SHA-256 over the normalized URL, method, body, user agent, session and
/// time window. Every content field contributes, so two requests differing in
/// any of them never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `request` at `epoch_ms`.
    ///
    /// `bucket_ms == 0` disables time bucketing.
    pub fn compute(request: &RequestDescriptor, epoch_ms: u64, bucket_ms: u64) -> Self {
        let window = if bucket_ms == 0 {
            0
        } else {
            (epoch_ms / bucket_ms) * bucket_ms
        };

        let url = normalize_url(&request.url);
        let method = request.method.trim().to_ascii_uppercase();
        let body = request.body.as_ref().map(ToString::to_string).unwrap_or_default();
        let user_agent = request.user_agent.as_deref().unwrap_or("");
        let session = request.session_id.as_deref().unwrap_or("anonymous");

        let mut hasher = Sha256::new();
        for field in [url.as_str(), method.as_str(), body.as_str(), user_agent, session] {
            // Length prefix keeps field boundaries unambiguous.
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(window.to_le_bytes());

        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const BUCKET: u64 = 5_000;

    fn message(session: &str) -> RequestDescriptor {
        RequestDescriptor::post("/v1/messages")
            .with_body(json!({"model": "claude", "messages": [{"role": "user", "content": "hi"}]}))
            .with_session(session)
    }

    #[test]
    fn test_identical_requests_same_window_match() {
        let a = Fingerprint::compute(&message("s1"), 10_000, BUCKET);
        let b = Fingerprint::compute(&message("s1"), 14_999, BUCKET);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn test_different_window_differs() {
        let a = Fingerprint::compute(&message("s1"), 14_999, BUCKET);
        let b = Fingerprint::compute(&message("s1"), 15_000, BUCKET);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bucketing_disabled() {
        let a = Fingerprint::compute(&message("s1"), 0, 0);
        let b = Fingerprint::compute(&message("s1"), 3_600_000, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_every_field_contributes() {
        let base = Fingerprint::compute(&message("s1"), 0, BUCKET);

        assert_ne!(base, Fingerprint::compute(&message("s2"), 0, BUCKET));

        let mut get = message("s1");
        get.method = "GET".into();
        assert_ne!(base, Fingerprint::compute(&get, 0, BUCKET));

        let mut other_path = message("s1");
        other_path.url = "/v1/complete".into();
        assert_ne!(base, Fingerprint::compute(&other_path, 0, BUCKET));

        let other_body = message("s1").with_body(json!({"model": "claude", "messages": []}));
        assert_ne!(base, Fingerprint::compute(&other_body, 0, BUCKET));

        let agent = message("s1").with_user_agent("curl/8");
        assert_ne!(base, Fingerprint::compute(&agent, 0, BUCKET));
    }

    #[test]
    fn test_normalization() {
        let a = RequestDescriptor::post("HTTPS://API.Example.com/v1/messages/").with_session("s");
        let b = RequestDescriptor::new("post", "https://api.example.com/v1/messages").with_session("s");
        assert_eq!(
            Fingerprint::compute(&a, 0, BUCKET),
            Fingerprint::compute(&b, 0, BUCKET)
        );

        // Body key order is irrelevant.
        let x = RequestDescriptor::post("/x").with_body(json!({"a": 1, "b": 2}));
        let y = RequestDescriptor::post("/x").with_body(json!({"b": 2, "a": 1}));
        assert_eq!(Fingerprint::compute(&x, 0, BUCKET), Fingerprint::compute(&y, 0, BUCKET));
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let a = RequestDescriptor::post("/ab").with_session("c");
        let b = RequestDescriptor::post("/a").with_session("bc");
        assert_ne!(Fingerprint::compute(&a, 0, BUCKET), Fingerprint::compute(&b, 0, BUCKET));
    }

    #[test]
    fn test_exclusion_uses_path() {
        let excluded = vec!["/api/analytics".to_string(), "/ui/".to_string()];
        assert!(RequestDescriptor::get("/api/analytics/summary").is_excluded(&excluded));
        assert!(RequestDescriptor::get("http://localhost:3456/ui/index.html").is_excluded(&excluded));
        assert!(!RequestDescriptor::post("/v1/messages").is_excluded(&excluded));
        assert!(!RequestDescriptor::post("https://host").is_excluded(&excluded));
    }
}
