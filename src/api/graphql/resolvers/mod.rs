mod catalog;
mod session;

use async_graphql::{Json, Object};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use catalog::resolve_tables;
use session::{
    resolve_current_role, resolve_current_setting, resolve_jwt_claims, resolve_now,
    resolve_request_extras,
};

/// Root query type that combines all GraphQL queries
pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Role the request's connection runs as
    async fn current_role(&self, ctx: &async_graphql::Context<'_>) -> async_graphql::Result<String> {
        resolve_current_role(ctx).await
    }

    /// Value of a session setting, null when unset
    async fn current_setting(&self, ctx: &async_graphql::Context<'_>, name: String) -> async_graphql::Result<Option<String>> {
        resolve_current_setting(ctx, name).await
    }

    /// Start time of the request's transaction
    async fn now(&self, ctx: &async_graphql::Context<'_>) -> async_graphql::Result<DateTime<Utc>> {
        resolve_now(ctx).await
    }

    /// Tables and views of the schema namespace
    async fn tables(&self, ctx: &async_graphql::Context<'_>) -> async_graphql::Result<Vec<crate::api::graphql::types::Table>> {
        resolve_tables(ctx).await
    }

    /// Verified JWT claims, null for anonymous requests
    async fn jwt_claims(&self, ctx: &async_graphql::Context<'_>) -> async_graphql::Result<Option<Json<Map<String, Value>>>> {
        resolve_jwt_claims(ctx)
    }

    /// Fields merged in by the additional-context callback
    async fn request_extras(&self, ctx: &async_graphql::Context<'_>) -> async_graphql::Result<Json<Map<String, Value>>> {
        resolve_request_extras(ctx)
    }
}
