use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::auth::{JwtClaims, JwtVerifier};
use crate::error::GatewayError;
use crate::pg::scope::{ConnectionScope, Outcome, ScopeBody, ScopeRequest, ScopedLease};
use crate::pg::settings::{request_settings, PgSettings, RoleOptions};

/// Options of the Postgres scope
#[derive(Clone, Debug, Default)]
pub struct PgScopeOptions {
    /// Secret used to verify HS256 tokens; tokens are refused with 403 without one
    pub jwt_secret: Option<String>,
    /// Accepted `aud` values; empty disables the check
    pub jwt_audiences: Vec<String>,
    pub roles: RoleOptions,
}

/// Transaction of one request, shared with its resolvers
pub struct PgClient {
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgClient {
    fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Lock the request's transaction
    pub async fn lock(&self) -> PgTxGuard<'_> {
        PgTxGuard(self.tx.lock().await)
    }

    /// Take the transaction back once the scope body has returned
    async fn take(&self) -> Result<Transaction<'static, Postgres>, GatewayError> {
        self.tx.lock().await.take().ok_or(GatewayError::ScopeClosed)
    }
}

/// Exclusive access to a request's transaction
pub struct PgTxGuard<'a>(MutexGuard<'a, Option<Transaction<'static, Postgres>>>);

impl PgTxGuard<'_> {
    /// Connection of the transaction
    ///
    /// # Errors
    /// Returns an error if the request has already been released
    pub fn connection(&mut self) -> Result<&mut PgConnection, GatewayError> {
        match self.0.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(GatewayError::ScopeClosed),
        }
    }
}

/// Scoped acquisition over a shared `PgPool`
///
/// Each scope runs inside its own transaction so that the settings are local
/// to the request.
pub struct PgScope {
    pool: PgPool,
    jwt: Option<JwtVerifier>,
    roles: RoleOptions,
}

impl PgScope {
    #[must_use]
    pub fn new(pool: PgPool, options: PgScopeOptions) -> Self {
        let jwt = options
            .jwt_secret
            .as_deref()
            .map(|secret| JwtVerifier::new(secret, &options.jwt_audiences));
        Self {
            pool,
            jwt,
            roles: options.roles,
        }
    }

    fn verify(&self, token: Option<&str>) -> Result<Option<JwtClaims>, GatewayError> {
        match (token, &self.jwt) {
            (None, _) => Ok(None),
            (Some(_), None) => Err(GatewayError::JwtNotAllowed),
            (Some(token), Some(verifier)) => verifier.verify(token).map(Some),
        }
    }
}

async fn apply_settings(
    tx: &mut Transaction<'static, Postgres>,
    settings: &PgSettings,
) -> Result<(), sqlx::Error> {
    for (name, value) in settings.iter() {
        sqlx::query("SELECT set_config($1, $2, true)")
            .bind(name)
            .bind(value)
            .execute(&mut **tx)
            .await?;
    }
    Ok(())
}

#[async_trait]
impl ConnectionScope for PgScope {
    type Connection = PgClient;

    async fn scope(
        &self,
        request: ScopeRequest,
        body: ScopeBody<PgClient>,
    ) -> Result<(), GatewayError> {
        let claims = self.verify(request.jwt_token.as_deref())?;
        let settings = request_settings(&self.roles, claims.as_ref(), request.settings)?;

        let mut tx = self.pool.begin().await?;
        apply_settings(&mut tx, &settings).await?;
        debug!("Leased connection with {} settings", settings.len());

        let client = Arc::new(PgClient::new(tx));
        let outcome = body(ScopedLease::new(Arc::clone(&client), claims, settings)).await;

        let tx = client.take().await?;
        match outcome {
            Outcome::Commit => tx.commit().await?,
            Outcome::Rollback => tx.rollback().await?,
        }
        debug!("Released connection ({:?})", outcome);

        Ok(())
    }
}
