use std::sync::Arc;

use async_graphql::{EmptyMutation, EmptySubscription, Schema};
use sqlx::PgPool;
use tracing::info;

use crate::api::graphql::{context::ContextOptions, plugin::ContextPlugin, resolvers::QueryRoot};
use crate::error::GatewayError;
use crate::pg::{PgScope, PgScopeOptions};

/// Type alias for the complete GraphQL schema
#[allow(clippy::module_name_repetitions)]
pub type GatewaySchema = Schema<QueryRoot, EmptyMutation, EmptySubscription>;

/// Database schema the GraphQL schema is generated for
#[derive(Clone, Debug)]
pub struct SchemaNamespace(pub String);

/// Everything the schema factory needs besides the pool
#[derive(Clone, Default)]
pub struct GatewayConfig {
    pub scope: PgScopeOptions,
    pub context: ContextOptions,
}

/// Build the schema for `schema_name` and the plugin that scopes a pooled
/// connection to each request
///
/// The schema is built once; the plugin is already registered on it and is
/// returned for callers that drive it directly.
///
/// # Errors
/// Returns a configuration error if the pool is closed or `schema_name` is
/// not a valid identifier
#[allow(clippy::module_name_repetitions)]
pub fn create_schema(
    pool: PgPool,
    schema_name: &str,
    config: GatewayConfig,
) -> Result<(GatewaySchema, ContextPlugin<PgScope>), GatewayError> {
    if pool.is_closed() {
        return Err(GatewayError::Config("database pool is closed".to_string()));
    }
    validate_namespace(schema_name)?;

    let scope = PgScope::new(pool, config.scope);
    let plugin = ContextPlugin::new(Arc::new(scope), config.context);

    let schema = Schema::build(QueryRoot, EmptyMutation, EmptySubscription)
        .data(SchemaNamespace(schema_name.to_string()))
        .extension(plugin.clone())
        .finish();
    info!("Built GraphQL schema for namespace {}", schema_name);

    Ok((schema, plugin))
}

fn validate_namespace(name: &str) -> Result<(), GatewayError> {
    let mut chars = name.chars();
    let valid = name.len() <= 63
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if valid {
        Ok(())
    } else {
        Err(GatewayError::Config(format!(
            "invalid schema namespace {name:?}"
        )))
    }
}
