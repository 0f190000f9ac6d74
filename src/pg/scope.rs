use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::auth::JwtClaims;
use crate::error::GatewayError;
use crate::pg::settings::PgSettings;

/// How a request's transaction ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Commit,
    Rollback,
}

/// Per-request inputs handed to a [`ConnectionScope`]
#[derive(Clone, Debug, Default)]
pub struct ScopeRequest {
    pub jwt_token: Option<String>,
    pub settings: PgSettings,
}

/// A connection leased for the lifetime of one scope body
pub struct ScopedLease<C> {
    connection: Arc<C>,
    claims: Option<JwtClaims>,
    settings: PgSettings,
}

impl<C> ScopedLease<C> {
    pub fn new(connection: Arc<C>, claims: Option<JwtClaims>, settings: PgSettings) -> Self {
        Self {
            connection,
            claims,
            settings,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    #[must_use]
    pub fn claims(&self) -> Option<&JwtClaims> {
        self.claims.as_ref()
    }

    #[must_use]
    pub fn settings(&self) -> &PgSettings {
        &self.settings
    }
}

impl<C> Clone for ScopedLease<C> {
    fn clone(&self) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            claims: self.claims.clone(),
            settings: self.settings.clone(),
        }
    }
}

/// Body run while a scope holds its connection; its output decides commit or rollback
pub type ScopeBody<C> = Box<dyn FnOnce(ScopedLease<C>) -> BoxFuture<'static, Outcome> + Send>;

/// Scoped acquisition of a configured connection
///
/// Implementations acquire a connection, configure it for `request`, run
/// `body` with it and release it once the body's future settles, on every
/// exit path.
#[async_trait]
pub trait ConnectionScope: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    async fn scope(
        &self,
        request: ScopeRequest,
        body: ScopeBody<Self::Connection>,
    ) -> Result<(), GatewayError>;
}
