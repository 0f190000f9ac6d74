use async_graphql::{Context, Json, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::api::graphql::context::{ContextExtras, PgRequestContext};

/// Resolves the role of the request's connection
///
/// # Errors
/// Returns an error if the request has no context or the query fails
pub async fn resolve_current_role(ctx: &Context<'_>) -> Result<String> {
    let client = ctx.data::<PgRequestContext>()?.connection();
    let mut tx = client.lock().await;
    let conn = tx.connection()?;

    let role: String = sqlx::query_scalar("SELECT current_user::text")
        .fetch_one(conn)
        .await?;
    Ok(role)
}

/// Resolves a session setting, `None` when it is not set
///
/// # Errors
/// Returns an error if the request has no context or the query fails
pub async fn resolve_current_setting(ctx: &Context<'_>, name: String) -> Result<Option<String>> {
    let client = ctx.data::<PgRequestContext>()?.connection();
    let mut tx = client.lock().await;
    let conn = tx.connection()?;

    let value: Option<String> = sqlx::query_scalar("SELECT current_setting($1, true)")
        .bind(name)
        .fetch_one(conn)
        .await?;
    // unset custom settings read back as an empty string once touched
    Ok(value.filter(|v| !v.is_empty()))
}

/// # Errors
/// Returns an error if the request has no context or the query fails
pub async fn resolve_now(ctx: &Context<'_>) -> Result<DateTime<Utc>> {
    let client = ctx.data::<PgRequestContext>()?.connection();
    let mut tx = client.lock().await;
    let conn = tx.connection()?;

    let now: DateTime<Utc> = sqlx::query_scalar("SELECT now()")
        .fetch_one(conn)
        .await?;
    Ok(now)
}

pub fn resolve_jwt_claims(ctx: &Context<'_>) -> Result<Option<Json<Map<String, Value>>>> {
    let context = ctx.data::<PgRequestContext>()?;
    Ok(context.claims().cloned().map(Json))
}

pub fn resolve_request_extras(ctx: &Context<'_>) -> Result<Json<Map<String, Value>>> {
    let extras = ctx
        .data_opt::<ContextExtras>()
        .map(|extras| extras.0.clone())
        .unwrap_or_default();
    Ok(Json(extras))
}
