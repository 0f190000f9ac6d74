use std::collections::BTreeMap;

use serde_json::Value;

use crate::auth::JwtClaims;
use crate::error::GatewayError;

/// Postgres session settings applied for the duration of one request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PgSettings(BTreeMap<String, String>);

impl PgSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a setting, replacing any previous value
    ///
    /// # Errors
    /// Returns an error if the name is empty or contains whitespace
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), GatewayError> {
        let name = name.into();
        if name.is_empty() {
            return Err(GatewayError::InvalidSetting {
                name,
                reason: "name must not be empty",
            });
        }
        if name.chars().any(char::is_whitespace) {
            return Err(GatewayError::InvalidSetting {
                name,
                reason: "name must not contain whitespace",
            });
        }
        self.0.insert(name, value.into());
        Ok(())
    }

    /// Build settings from `name=value` pairs
    ///
    /// # Errors
    /// Returns an error if a name is invalid
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, GatewayError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut settings = Self::new();
        for (name, value) in pairs {
            settings.insert(name, value)?;
        }
        Ok(settings)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// How the role and claim settings are derived for a request
#[derive(Clone, Debug)]
pub struct RoleOptions {
    /// Claim holding the role to switch to
    pub role_claim: String,
    /// Role used when the request carries no role claim
    pub default_role: Option<String>,
}

impl Default for RoleOptions {
    fn default() -> Self {
        Self {
            role_claim: "role".to_string(),
            default_role: None,
        }
    }
}

/// Resolve the full settings for one request
///
/// The caller's own settings come first. `role` from the role claim or the
/// default role and every claim as `jwt.claims.<name>` are applied on top, so
/// per-request settings cannot replace verified values.
///
/// # Errors
/// Returns an error if a claim name produces an invalid setting name
pub fn request_settings(
    options: &RoleOptions,
    claims: Option<&JwtClaims>,
    user: PgSettings,
) -> Result<PgSettings, GatewayError> {
    let mut settings = user;

    let claimed_role = claims
        .and_then(|claims| claims.get(&options.role_claim))
        .and_then(Value::as_str);
    if let Some(role) = claimed_role.or(options.default_role.as_deref()) {
        settings.insert("role", role)?;
    }

    for (name, value) in claims.into_iter().flatten() {
        let value = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        settings.insert(format!("jwt.claims.{name}"), value)?;
    }

    Ok(settings)
}
