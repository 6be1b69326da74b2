//! Header filtering and request fingerprinting

use sha2::{Digest, Sha256};

/// Connection-scoped headers (RFC 9110 §7.6.1) that never cross the relay
pub(crate) fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Whether a client request header is copied to the backend request
///
/// `host` and `content-length` are recomputed for the new request.
/// `accept-encoding` is left to the HTTP client so response bodies arrive
/// decoded and can be rewritten.
pub(crate) fn forward_request_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !is_hop_by_hop(&lower)
        && lower != "host"
        && lower != "content-length"
        && lower != "accept-encoding"
}

/// Whether a backend response header is copied to the client response
///
/// The body may be rewritten, so its length is never copied.
pub(crate) fn forward_response_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !is_hop_by_hop(&lower) && lower != "content-length"
}

/// Short hash of the client's API key, for correlating sessions in logs
///
/// Never log the key itself.
pub(crate) fn client_fingerprint(headers: &axum::http::HeaderMap) -> Option<String> {
    let key = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .or_else(|| headers.get("x-api-key").and_then(|v| v.to_str().ok()))?;

    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    Some(format!("{:x}", hash)[..16].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_request_header_filter() {
        assert!(forward_request_header("Authorization"));
        assert!(forward_request_header("x-custom"));
        assert!(!forward_request_header("Host"));
        assert!(!forward_request_header("content-length"));
        assert!(!forward_request_header("Connection"));
        assert!(!forward_request_header("transfer-encoding"));
        assert!(!forward_request_header("accept-encoding"));
    }

    #[test]
    fn test_response_header_filter() {
        assert!(forward_response_header("content-type"));
        assert!(forward_response_header("x-request-id"));
        assert!(!forward_response_header("Content-Length"));
        assert!(!forward_response_header("keep-alive"));
    }

    #[test]
    fn test_client_fingerprint() {
        let mut headers = HeaderMap::new();
        assert!(client_fingerprint(&headers).is_none());

        headers.insert("authorization", "Bearer sk-test".parse().unwrap());
        let bearer = client_fingerprint(&headers).unwrap();
        assert_eq!(bearer.len(), 16);
        assert!(!bearer.contains("sk-test"));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-test".parse().unwrap());
        assert_eq!(client_fingerprint(&headers).unwrap(), bearer);
    }
}
