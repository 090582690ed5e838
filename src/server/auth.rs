use base64ct::{Base64, Encoding};

use super::config::Credentials;
use super::request_parser::HttpRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    Deny,
}

/// Checks the Basic auth credentials carried by `request` against `expected`.
///
/// Only the configured halves are compared, so a username-only setup accepts
/// any password and vice versa.
pub fn evaluate(request: &HttpRequest, expected: &Credentials) -> AuthDecision {
    if !expected.is_enabled() {
        return AuthDecision::Allow;
    }

    let (user, pass) = basic_credentials(request);

    if expected.username.as_deref().is_some_and(|u| u != user) {
        return AuthDecision::Deny;
    }
    if expected.password.as_deref().is_some_and(|p| p != pass) {
        return AuthDecision::Deny;
    }

    AuthDecision::Allow
}

/// User and password from the `Authorization: Basic` header.
///
/// Anything missing or undecodable comes back as an empty string.
pub fn basic_credentials(request: &HttpRequest) -> (String, String) {
    let Some(encoded) = request
        .header("Authorization")
        .and_then(|value| value.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("Basic"))
        .map(|(_, token)| token.trim())
    else {
        return (String::new(), String::new());
    };

    let decoded = Base64::decode_vec(encoded)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default();

    match decoded.split_once(':') {
        Some((user, pass)) => (user.to_string(), pass.to_string()),
        None => (decoded, String::new()),
    }
}
