pub mod api;
pub mod auth;
pub mod error;
pub mod options;
pub mod pg;

pub use error::GatewayError;
pub use options::GatewayOptions;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::HeaderMap,
    routing::get,
    Router, Server,
};
use serde_json::{Map, Value};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::api::graphql::{
    create_schema, ContextExtras, ContextOptions, GatewayConfig, GatewaySchema,
};
use crate::pg::{PgScopeOptions, PgSettings, RoleOptions};

/// Routes of the HTTP API
pub fn router(schema: GatewaySchema) -> Router {
    Router::new()
        .route(
            "/graphql",
            get(crate::api::handlers::graphiql).post(crate::api::handlers::graphql_handler),
        )
        .route("/health", get(crate::api::handlers::health_check))
        .layer(Extension(schema))
        .layer(CorsLayer::permissive())
}

pub struct Gateway {
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(options: GatewayOptions) -> Self {
        Self { options }
    }

    /// Translate the command line into the schema factory's configuration
    ///
    /// # Errors
    /// Returns an error if a static session setting is invalid
    pub fn config(&self) -> Result<GatewayConfig> {
        let scope = PgScopeOptions {
            jwt_secret: self.options.jwt_secret.clone(),
            jwt_audiences: self.options.jwt_audiences.clone(),
            roles: RoleOptions {
                role_claim: self.options.jwt_role_claim.clone(),
                default_role: self.options.default_role.clone(),
            },
        };

        let settings = PgSettings::from_pairs(self.options.pg_settings.iter().cloned())
            .context("Invalid --pg-setting")?;
        let context = ContextOptions::default()
            .with_static_settings(settings)
            .with_additional_context(request_id_context);

        Ok(GatewayConfig { scope, context })
    }

    pub async fn run(&self) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(self.options.max_connections)
            .connect(&self.options.database_url)
            .await
            .context("Failed to connect to database for API")?;

        let (schema, _plugin) = create_schema(pool, &self.options.schema_name, self.config()?)
            .context("Failed to build GraphQL schema")?;

        let api_router = router(schema);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.options.port));
        info!("Starting API server on {}", addr);

        if let Err(e) = Server::bind(&addr).serve(api_router.into_make_service()).await {
            error!("API server exited: {:?}", e);
            return Err(anyhow::anyhow!("API server error: {}", e));
        }

        Ok(())
    }
}

fn request_id_context(
    headers: &HeaderMap,
) -> std::future::Ready<Result<ContextExtras>> {
    let mut extras = Map::new();
    if let Some(id) = headers.get("x-request-id").and_then(|v| v.to_str().ok()) {
        extras.insert("requestId".to_string(), Value::String(id.to_string()));
    }
    std::future::ready(Ok(ContextExtras(extras)))
}
