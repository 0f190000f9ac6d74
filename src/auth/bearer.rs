use axum::http::{header::AUTHORIZATION, HeaderMap};

use crate::error::GatewayError;

const SCHEME: &str = "bearer";

/// Extract the bearer token from the `Authorization` header
///
/// Returns `Ok(None)` when no header is present.
///
/// # Errors
/// Returns a 400-kind error if the header is repeated, is not visible ASCII,
/// or does not follow the `Bearer <token>` scheme
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<Option<String>, GatewayError> {
    let mut values = headers.get_all(AUTHORIZATION).iter();
    let Some(value) = values.next() else {
        return Ok(None);
    };
    if values.next().is_some() {
        return Err(GatewayError::DuplicateAuthorization);
    }

    let value = value
        .to_str()
        .map_err(|_| GatewayError::MalformedAuthorization)?;
    parse_bearer(value)
        .map(|token| Some(token.to_string()))
        .ok_or(GatewayError::MalformedAuthorization)
}

fn parse_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let scheme = value.get(..SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return None;
    }

    let rest = &value[SCHEME.len()..];
    let token = rest.trim_start();
    // at least one separator between scheme and token
    if token.len() == rest.len() || !is_token(token) {
        return None;
    }
    Some(token)
}

fn is_token(token: &str) -> bool {
    let body = token.trim_end_matches('=');
    !body.is_empty()
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~' | b'+' | b'/'))
}
