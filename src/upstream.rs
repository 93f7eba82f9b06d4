//! Types exchanged with the router that delegates calls to the guard.

use serde::{Deserialize, Serialize};

use crate::dedup::RequestDescriptor;

/// Response produced by an upstream provider call.
///
/// Owned values only: cloning is a deep copy, so a response stored in the
/// fingerprint cache can never be mutated through a caller's handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    /// HTTP-like status code.
    pub status: u16,
    /// Response headers worth keeping (name, value).
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Raw response body.
    #[serde(default)]
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Build a response carrying a JSON body.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// 1xx-3xx responses are successes; everything else is a failure.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Body as text, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Rough heap footprint, used for cache memory reporting.
    pub fn approximate_size(&self) -> usize {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        std::mem::size_of::<Self>() + headers + self.body.len()
    }
}

/// Failure reported by an upstream call.
///
/// `status` is `None` when no response was received at all
/// (connection refused, DNS failure, reset).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", describe_status(.status))]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("upstream returned {code}"),
        None => "upstream unreachable".to_string(),
    }
}

impl UpstreamError {
    /// Failure with an HTTP-like status.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            message: message.into(),
        }
    }

    /// Failure before any response was received.
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }
}

impl From<UpstreamResponse> for UpstreamError {
    fn from(response: UpstreamResponse) -> Self {
        let mut message = response.body_text();
        if message.len() > 256 {
            let mut cut = 256;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        Self::status(response.status, message)
    }
}

/// Routing context the caller supplies with every guarded call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallContext {
    /// Logical request, used only for fingerprinting.
    pub request: Option<RequestDescriptor>,
    /// Provider identity for breaker partitioning.
    pub provider_id: String,
    /// Queue partition key (API key or provider identity).
    pub key_id: String,
    /// Bypass the fingerprint cache for this call.
    #[serde(default)]
    pub skip_deduplication: bool,
    /// Bypass the request queue for this call.
    #[serde(default)]
    pub skip_queue: bool,
}

impl CallContext {
    pub fn new(provider_id: impl Into<String>) -> Self {
        let provider_id = provider_id.into();
        Self {
            request: None,
            key_id: provider_id.clone(),
            provider_id,
            skip_deduplication: false,
            skip_queue: false,
        }
    }

    pub fn with_request(mut self, request: RequestDescriptor) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_key(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    pub fn skip_deduplication(mut self) -> Self {
        self.skip_deduplication = true;
        self
    }

    pub fn skip_queue(mut self) -> Self {
        self.skip_queue = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_classification() {
        assert!(UpstreamResponse::new(200, "ok").is_success());
        assert!(UpstreamResponse::new(304, "").is_success());
        assert!(!UpstreamResponse::new(429, "slow down").is_success());
        assert!(!UpstreamResponse::new(503, "").is_success());
    }

    #[test]
    fn test_error_from_failed_response_truncates_body() {
        let body = "x".repeat(1000);
        let err = UpstreamError::from(UpstreamResponse::new(500, body));
        assert_eq!(err.status, Some(500));
        assert_eq!(err.message.len(), 256);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            UpstreamError::status(502, "bad gateway").to_string(),
            "upstream returned 502: bad gateway"
        );
        assert_eq!(
            UpstreamError::connection("refused").to_string(),
            "upstream unreachable: refused"
        );
    }

    #[test]
    fn test_context_defaults_key_to_provider() {
        let ctx = CallContext::new("anthropic");
        assert_eq!(ctx.key_id, "anthropic");
        assert!(!ctx.skip_queue);

        let ctx = ctx.with_key("sk-1").skip_queue();
        assert_eq!(ctx.key_id, "sk-1");
        assert!(ctx.skip_queue);
    }
}
