use std::future::Future;
use std::sync::Arc;

use axum::http::HeaderMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{Map, Value};

use crate::auth::JwtClaims;
use crate::error::GatewayError;
use crate::pg::{PgClient, PgSettings, ScopedLease};

/// Context for GraphQL resolvers, scoped to a single request
pub struct RequestContext<C> {
    lease: ScopedLease<C>,
    token: Option<String>,
}

/// Request context backed by a Postgres transaction
pub type PgRequestContext = RequestContext<PgClient>;

impl<C> RequestContext<C> {
    pub(crate) fn new(lease: ScopedLease<C>, token: Option<String>) -> Self {
        Self { lease, token }
    }

    /// The connection leased for this request
    #[must_use]
    pub fn connection(&self) -> &C {
        self.lease.connection()
    }

    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    #[must_use]
    pub fn claims(&self) -> Option<&JwtClaims> {
        self.lease.claims()
    }

    /// Settings applied to the connection
    #[must_use]
    pub fn settings(&self) -> &PgSettings {
        self.lease.settings()
    }
}

/// Extra fields merged into the request context
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ContextExtras(pub Map<String, Value>);

impl ContextExtras {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

pub type SettingsFn =
    Arc<dyn Fn(&HeaderMap) -> BoxFuture<'static, anyhow::Result<PgSettings>> + Send + Sync>;

pub type AdditionalContextFn =
    Arc<dyn Fn(&HeaderMap) -> BoxFuture<'static, anyhow::Result<ContextExtras>> + Send + Sync>;

/// Per-request settings, either fixed or computed from the request headers
#[derive(Clone)]
pub enum SettingsSource {
    Static(PgSettings),
    Dynamic(SettingsFn),
}

impl SettingsSource {
    /// # Errors
    /// Returns an error if the settings callback fails
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<PgSettings, GatewayError> {
        match self {
            Self::Static(settings) => Ok(settings.clone()),
            Self::Dynamic(generate) => generate(headers).await.map_err(GatewayError::Settings),
        }
    }
}

/// Per-request configuration of the context plugin
#[derive(Clone, Default)]
pub struct ContextOptions {
    pub pg_settings: Option<SettingsSource>,
    pub additional_context: Option<AdditionalContextFn>,
}

impl ContextOptions {
    #[must_use]
    pub fn with_static_settings(mut self, settings: PgSettings) -> Self {
        self.pg_settings = Some(SettingsSource::Static(settings));
        self
    }

    #[must_use]
    pub fn with_settings_fn<F, Fut>(mut self, generate: F) -> Self
    where
        F: Fn(&HeaderMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<PgSettings>> + Send + 'static,
    {
        self.pg_settings = Some(SettingsSource::Dynamic(Arc::new(move |headers: &HeaderMap| {
            generate(headers).boxed()
        })));
        self
    }

    #[must_use]
    pub fn with_additional_context<F, Fut>(mut self, generate: F) -> Self
    where
        F: Fn(&HeaderMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<ContextExtras>> + Send + 'static,
    {
        self.additional_context = Some(Arc::new(move |headers: &HeaderMap| generate(headers).boxed()));
        self
    }

    pub(crate) async fn settings(&self, headers: &HeaderMap) -> Result<PgSettings, GatewayError> {
        match &self.pg_settings {
            Some(source) => source.resolve(headers).await,
            None => Ok(PgSettings::new()),
        }
    }

    pub(crate) async fn extras(&self, headers: &HeaderMap) -> Result<ContextExtras, GatewayError> {
        match &self.additional_context {
            Some(generate) => generate(headers)
                .await
                .map_err(GatewayError::AdditionalContext),
            None => Ok(ContextExtras::default()),
        }
    }
}
