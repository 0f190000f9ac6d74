use async_graphql::{ErrorExtensions, Pos, ServerError};
use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while provisioning or releasing a request-scoped context
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Startup misconfiguration, not recoverable
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("Authorization header is not of the correct bearer scheme format")]
    MalformedAuthorization,

    #[error("multiple Authorization headers are not allowed")]
    DuplicateAuthorization,

    #[error("not allowed to provide a JWT token")]
    JwtNotAllowed,

    #[error("invalid JWT: {0}")]
    InvalidJwt(#[from] jsonwebtoken::errors::Error),

    #[error("invalid setting {name:?}: {reason}")]
    InvalidSetting { name: String, reason: &'static str },

    #[error("failed to resolve request settings: {0:#}")]
    Settings(anyhow::Error),

    #[error("failed to build additional context: {0:#}")]
    AdditionalContext(anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("request context was closed before it became available")]
    ScopeClosed,

    #[error("request context already acquired")]
    AlreadyAcquired,

    #[error("request context task failed: {0}")]
    Task(String),
}

impl GatewayError {
    /// HTTP status the host should answer with when this error aborts a request
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedAuthorization | Self::DuplicateAuthorization => StatusCode::BAD_REQUEST,
            Self::JwtNotAllowed | Self::InvalidJwt(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIGURATION",
            Self::MalformedAuthorization | Self::DuplicateAuthorization => "BAD_REQUEST",
            Self::JwtNotAllowed | Self::InvalidJwt(_) => "FORBIDDEN",
            Self::InvalidSetting { .. } | Self::Settings(_) | Self::AdditionalContext(_) => {
                "CONTEXT"
            }
            Self::Database(_) => "DATABASE",
            Self::ScopeClosed | Self::AlreadyAcquired | Self::Task(_) => "INTERNAL",
        }
    }

    /// Whether the caller, rather than the infrastructure, is at fault
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Convert into an async-graphql error, keeping `self` as the typed source
    #[must_use]
    pub fn into_server_error(self) -> ServerError {
        let status = i32::from(self.status().as_u16());
        let code = self.code();
        async_graphql::Error::new_with_source(self)
            .extend_with(|_, ext| {
                ext.set("status", status);
                ext.set("code", code);
            })
            .into_server_error(Pos::default())
    }
}

/// Highest HTTP status carried by the gateway errors of a response
#[must_use]
pub fn response_status(errors: &[ServerError]) -> StatusCode {
    errors
        .iter()
        .filter_map(|err| err.source::<GatewayError>())
        .map(GatewayError::status)
        .max_by_key(|status| status.as_u16())
        .unwrap_or(StatusCode::OK)
}
