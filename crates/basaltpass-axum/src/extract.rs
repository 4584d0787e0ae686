// Credential extraction helpers.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Bearer token from the Authorization header.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// HTTP Basic client credentials, RFC 6749 §2.3.1.
pub fn basic_client(headers: &HeaderMap) -> Option<(String, String)> {
    let encoded = headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;
    Some((id.to_string(), secret.to_string()))
}

/// Client credentials from the Basic header, falling back to the form
/// body (`client_secret_post`).
pub fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> (String, Option<String>) {
    if let Some((id, secret)) = basic_client(headers) {
        return (id, Some(secret));
    }
    (
        form_id.unwrap_or_default().to_string(),
        form_secret.map(String::from),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer bp_at_x"));
        assert_eq!(bearer(&headers), Some("bp_at_x"));
    }

    #[test]
    fn test_basic_client() {
        let mut headers = HeaderMap::new();
        // base64("cid:shh")
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic Y2lkOnNoaA=="));
        assert_eq!(
            basic_client(&headers),
            Some(("cid".into(), "shh".into()))
        );
    }

    #[test]
    fn test_missing_header() {
        let headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        assert_eq!(basic_client(&headers), None);
    }
}
