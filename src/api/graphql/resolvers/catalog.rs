use async_graphql::{Context, Result};
use sqlx::Row;

use crate::api::graphql::{context::PgRequestContext, schema::SchemaNamespace, types::Table};

/// Resolves the tables and views of the schema namespace
///
/// Runs on the request's connection, so only relations visible to the
/// request's role are listed.
///
/// # Errors
/// Returns an error if the request has no context or the query fails
pub async fn resolve_tables(ctx: &Context<'_>) -> Result<Vec<Table>> {
    let namespace = &ctx.data::<SchemaNamespace>()?.0;
    let client = ctx.data::<PgRequestContext>()?.connection();
    let mut tx = client.lock().await;
    let conn = tx.connection()?;

    let rows = sqlx::query(
        r"
        SELECT
            table_name::text AS name,
            table_type::text AS kind
        FROM
            information_schema.tables
        WHERE
            table_schema = $1
        ORDER BY
            table_name
        ",
    )
    .bind(namespace)
    .fetch_all(conn)
    .await?;

    let tables = rows
        .into_iter()
        .map(|row| Table {
            name: row.get("name"),
            kind: row.get("kind"),
        })
        .collect();
    Ok(tables)
}
