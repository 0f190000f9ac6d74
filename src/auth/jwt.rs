use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Verified claims of a request's JWT
pub type JwtClaims = Map<String, Value>;

/// Verifies HS256 tokens against a shared secret
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// An empty `audiences` slice disables the audience check.
    #[must_use]
    pub fn new(secret: &str, audiences: &[String]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` is honoured when present but not required
        validation.required_spec_claims.clear();
        if audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(audiences);
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// # Errors
    /// Returns a 403-kind error if the signature, expiry or audience is invalid
    pub fn verify(&self, token: &str) -> Result<JwtClaims, GatewayError> {
        let data = decode::<JwtClaims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}
