use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};

use crate::api::graphql::schema::GatewaySchema;
use crate::error::response_status;

/// Executes a GraphQL request with the caller's headers in its request data
///
/// The HTTP status follows the most severe gateway error in the response.
pub async fn graphql_handler(
    Extension(schema): Extension<GatewaySchema>,
    headers: HeaderMap,
    req: GraphQLRequest,
) -> Response {
    let request = req.into_inner().data(headers);
    let response = schema.execute(request).await;
    let status = response_status(&response.errors);
    if status != StatusCode::OK {
        tracing::debug!("GraphQL request failed with status {}", status);
    }
    (status, GraphQLResponse::from(response)).into_response()
}

pub async fn graphiql() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
