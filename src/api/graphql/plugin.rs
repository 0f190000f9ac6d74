use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_graphql::extensions::{
    Extension, ExtensionContext, ExtensionFactory, NextPrepareRequest, NextRequest,
};
use async_graphql::{Request, Response, ServerResult};
use axum::http::HeaderMap;
use tracing::{debug, error, warn};

use crate::api::graphql::context::{ContextExtras, ContextOptions, RequestContext};
use crate::auth::extract_bearer_token;
use crate::error::GatewayError;
use crate::pg::{
    provision, ConnectionScope, Outcome, Provisioned, ReleaseFuture, ReleaseHandle, ScopeRequest,
};

/// Registers request-scoped contexts with the schema
///
/// async-graphql asks the factory for a fresh [`ContextLifecycle`] for every
/// request, so each request owns its own release slot.
pub struct ContextPlugin<S> {
    inner: Arc<PluginInner<S>>,
}

struct PluginInner<S> {
    scope: Arc<S>,
    options: ContextOptions,
}

impl<S> Clone for ContextPlugin<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ConnectionScope> ContextPlugin<S> {
    pub fn new(scope: Arc<S>, options: ContextOptions) -> Self {
        Self {
            inner: Arc::new(PluginInner { scope, options }),
        }
    }

    /// A lifecycle adapter for one request
    #[must_use]
    pub fn lifecycle(&self) -> ContextLifecycle<S> {
        ContextLifecycle {
            plugin: Arc::clone(&self.inner),
            state: Mutex::new(LifecycleState::Idle),
        }
    }
}

impl<S: ConnectionScope> ExtensionFactory for ContextPlugin<S> {
    fn create(&self) -> Arc<dyn Extension> {
        Arc::new(self.lifecycle())
    }
}

enum LifecycleState {
    Idle,
    Acquiring,
    Active(ReleaseHandle),
    Released,
}

/// Acquires a request's context when its operation is resolved and releases
/// it once the response is ready
///
/// Dropping an adapter that still holds a context rolls it back.
pub struct ContextLifecycle<S> {
    plugin: Arc<PluginInner<S>>,
    state: Mutex<LifecycleState>,
}

impl<S: ConnectionScope> ContextLifecycle<S> {
    /// Provision the request's context and attach it to `request`
    ///
    /// An empty `headers` map makes the request anonymous.
    ///
    /// # Errors
    /// Returns the first error raised by token extraction, the settings or
    /// additional-context callbacks, or the connection scope. A context
    /// captured before the failure has already been released.
    pub async fn acquire(
        &self,
        headers: &HeaderMap,
        request: Request,
    ) -> Result<Request, GatewayError> {
        {
            let mut state = self.lock_state();
            if !matches!(*state, LifecycleState::Idle) {
                return Err(GatewayError::AlreadyAcquired);
            }
            *state = LifecycleState::Acquiring;
        }

        match self.provision_context(headers).await {
            Ok((context, extras)) => Ok(request.data(context).data(extras)),
            Err(err) => {
                if err.is_client_error() {
                    warn!("Rejected request context: {}", err);
                } else {
                    error!("Failed to provision request context: {}", err);
                }
                if let Some(pending) = self.release(Outcome::Rollback) {
                    if let Err(release_err) = pending.await {
                        error!("Failed to release request context: {}", release_err);
                    }
                }
                Err(err)
            }
        }
    }

    async fn provision_context(
        &self,
        headers: &HeaderMap,
    ) -> Result<(RequestContext<S::Connection>, ContextExtras), GatewayError> {
        let token = extract_bearer_token(headers)?;
        let settings = self.plugin.options.settings(headers).await?;
        let extras = self.plugin.options.extras(headers).await?;

        let request = ScopeRequest {
            jwt_token: token.clone(),
            settings,
        };
        let Provisioned { lease, release } = provision(Arc::clone(&self.plugin.scope), request).await?;
        *self.lock_state() = LifecycleState::Active(release);
        debug!("Acquired request context");

        Ok((RequestContext::new(lease, token), extras))
    }

    /// Fire the release signal if a context is held
    ///
    /// Safe to call any number of times and before [`Self::acquire`]; only
    /// the first call after a successful acquisition returns a future.
    pub fn release(&self, outcome: Outcome) -> Option<ReleaseFuture> {
        let previous = std::mem::replace(&mut *self.lock_state(), LifecycleState::Released);
        match previous {
            LifecycleState::Active(handle) => {
                debug!("Releasing request context ({:?})", outcome);
                Some(handle.finish(outcome))
            }
            _ => None,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl<S: ConnectionScope> Extension for ContextLifecycle<S> {
    async fn request(&self, ctx: &ExtensionContext<'_>, next: NextRequest<'_>) -> Response {
        let mut response = next.run(ctx).await;

        let outcome = if response.is_ok() {
            Outcome::Commit
        } else {
            Outcome::Rollback
        };
        if let Some(pending) = self.release(outcome) {
            if let Err(err) = pending.await {
                error!("Failed to release request context: {}", err);
                response.errors.push(err.into_server_error());
            }
        }
        response
    }

    async fn prepare_request(
        &self,
        ctx: &ExtensionContext<'_>,
        request: Request,
        next: NextPrepareRequest<'_>,
    ) -> ServerResult<Request> {
        // async-graphql moves the request data into the extension context
        // before this hook runs
        let headers = ctx.data_opt::<HeaderMap>().cloned().unwrap_or_default();
        let request = self
            .acquire(&headers, request)
            .await
            .map_err(GatewayError::into_server_error)?;
        next.run(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pg::provision::testing::{CountingScope, FakeConnection};
    use crate::pg::PgSettings;
    use async_graphql::{Context, EmptyMutation, EmptySubscription, Object, Schema};
    use axum::http::{header::AUTHORIZATION, HeaderValue};
    use serde_json::{json, Map};
    use tokio::sync::Notify;

    struct TestQuery;

    #[Object]
    impl TestQuery {
        async fn lease_id(&self, ctx: &Context<'_>) -> async_graphql::Result<i32> {
            let context = ctx.data::<RequestContext<FakeConnection>>()?;
            Ok(i32::try_from(context.connection().id)?)
        }

        async fn token(&self, ctx: &Context<'_>) -> async_graphql::Result<Option<String>> {
            let context = ctx.data::<RequestContext<FakeConnection>>()?;
            Ok(context.token().map(str::to_string))
        }

        async fn tenant(&self, ctx: &Context<'_>) -> async_graphql::Result<Option<String>> {
            let context = ctx.data::<RequestContext<FakeConnection>>()?;
            Ok(context.settings().get("app.tenant").map(str::to_string))
        }

        async fn extra(&self, ctx: &Context<'_>, key: String) -> async_graphql::Result<Option<String>> {
            let extras = ctx.data::<ContextExtras>()?;
            Ok(extras.get(&key).and_then(|v| v.as_str()).map(str::to_string))
        }

        async fn wait_for_signal(&self, ctx: &Context<'_>) -> async_graphql::Result<bool> {
            ctx.data::<Arc<Notify>>()?.notified().await;
            Ok(true)
        }

        async fn fail(&self) -> async_graphql::Result<bool> {
            Err("resolver failed".into())
        }
    }

    type TestSchema = Schema<TestQuery, EmptyMutation, EmptySubscription>;

    fn schema(scope: &Arc<CountingScope>, options: ContextOptions) -> TestSchema {
        Schema::build(TestQuery, EmptyMutation, EmptySubscription)
            .extension(ContextPlugin::new(Arc::clone(scope), options))
            .finish()
    }

    fn request(query: &str, authorization: &[&str]) -> Request {
        let mut headers = HeaderMap::new();
        for value in authorization {
            headers.append(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        Request::new(query).data(headers)
    }

    fn lease_id(response: &Response) -> i64 {
        let data = response.data.clone().into_json().unwrap();
        data["leaseId"].as_i64().unwrap()
    }

    fn gateway_error(response: &Response) -> &GatewayError {
        response.errors[0].source::<GatewayError>().unwrap()
    }

    #[tokio::test]
    async fn test_success_releases_once_with_commit() {
        let scope = Arc::new(CountingScope::default());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema
            .execute(request("{ leaseId token }", &["Bearer abc.def-123"]))
            .await;

        assert!(response.is_ok(), "{:?}", response.errors);
        assert_eq!(lease_id(&response), 1);
        assert_eq!(
            response.data.clone().into_json().unwrap()["token"],
            json!("abc.def-123")
        );
        assert_eq!(scope.acquired(), 1);
        assert_eq!(scope.released(), vec![(1, Outcome::Commit)]);
        assert_eq!(
            scope.requests()[0].jwt_token.as_deref(),
            Some("abc.def-123")
        );
    }

    #[tokio::test]
    async fn test_resolver_error_rolls_back_once() {
        let scope = Arc::new(CountingScope::default());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema.execute(request("{ leaseId fail }", &[])).await;

        assert!(response.is_err());
        assert_eq!(scope.released(), vec![(1, Outcome::Rollback)]);
    }

    #[tokio::test]
    async fn test_malformed_header_is_rejected_before_acquiring() {
        let scope = Arc::new(CountingScope::default());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema.execute(request("{ leaseId }", &["Basic xyz"])).await;

        assert!(matches!(
            gateway_error(&response),
            GatewayError::MalformedAuthorization
        ));
        assert_eq!(gateway_error(&response).status().as_u16(), 400);
        assert_eq!(scope.acquired(), 0);
        assert!(scope.released().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_headers_are_rejected() {
        let scope = Arc::new(CountingScope::default());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema
            .execute(request("{ leaseId }", &["Bearer a", "Bearer b"]))
            .await;

        assert!(matches!(
            gateway_error(&response),
            GatewayError::DuplicateAuthorization
        ));
        assert_eq!(scope.acquired(), 0);
    }

    #[tokio::test]
    async fn test_scope_failure_is_propagated() {
        let scope = Arc::new(CountingScope::failing());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema.execute(request("{ leaseId }", &[])).await;

        assert!(matches!(
            gateway_error(&response),
            GatewayError::Database(sqlx::Error::PoolTimedOut)
        ));
        assert!(response.data == async_graphql::Value::Null);
        assert!(scope.released().is_empty());
    }

    #[tokio::test]
    async fn test_additional_context_failure_skips_acquire() {
        let scope = Arc::new(CountingScope::default());
        let options = ContextOptions::default().with_additional_context(|_| async {
            Err::<ContextExtras, _>(anyhow::anyhow!("session store unavailable"))
        });
        let schema = schema(&scope, options);

        let response = schema.execute(request("{ leaseId }", &[])).await;

        assert!(matches!(
            gateway_error(&response),
            GatewayError::AdditionalContext(_)
        ));
        assert_eq!(scope.acquired(), 0);
        assert!(scope.released().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_query_after_acquire_rolls_back_once() {
        let scope = Arc::new(CountingScope::default());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema.execute(request("{ leaseId noSuchField }", &[])).await;

        assert!(response.is_err());
        assert_eq!(scope.acquired(), 1);
        assert_eq!(scope.released(), vec![(1, Outcome::Rollback)]);
    }

    #[tokio::test]
    async fn test_failed_release_is_reported() {
        let scope = Arc::new(CountingScope::failing_release());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema.execute(request("{ leaseId }", &[])).await;

        assert_eq!(response.errors.len(), 1);
        assert!(matches!(
            gateway_error(&response),
            GatewayError::Database(sqlx::Error::PoolClosed)
        ));
        assert_eq!(scope.released(), vec![(1, Outcome::Commit)]);
    }

    #[tokio::test]
    async fn test_acquire_reads_the_given_headers() {
        let scope = Arc::new(CountingScope::default());
        let lifecycle = ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()).lifecycle();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer abc.def-123"));

        let request = lifecycle
            .acquire(&headers, Request::new("{ leaseId }"))
            .await
            .unwrap();

        let context = request
            .data
            .get(&std::any::TypeId::of::<RequestContext<FakeConnection>>())
            .and_then(|data| data.downcast_ref::<RequestContext<FakeConnection>>())
            .unwrap();
        assert_eq!(context.token(), Some("abc.def-123"));
        assert_eq!(
            scope.requests()[0].jwt_token.as_deref(),
            Some("abc.def-123")
        );
        lifecycle.release(Outcome::Commit).unwrap().await.unwrap();
    }

    #[tokio::test]
    async fn test_settings_and_extras_are_merged() {
        let scope = Arc::new(CountingScope::default());
        let options = ContextOptions::default()
            .with_static_settings(PgSettings::from_pairs([("app.tenant", "acme")]).unwrap())
            .with_additional_context(|headers| {
                let request_id = headers
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                async move {
                    let mut extras = Map::new();
                    extras.insert("requestId".to_string(), json!(request_id));
                    Ok::<_, anyhow::Error>(ContextExtras(extras))
                }
            });
        let schema = schema(&scope, options);

        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("req-7"));
        let response = schema
            .execute(Request::new(r#"{ tenant extra(key: "requestId") }"#).data(headers))
            .await;

        assert!(response.is_ok(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["tenant"], json!("acme"));
        assert_eq!(data["extra"], json!("req-7"));
        assert_eq!(scope.requests()[0].settings.get("app.tenant"), Some("acme"));
    }

    #[tokio::test]
    async fn test_request_without_headers_is_anonymous() {
        let scope = Arc::new(CountingScope::default());
        let schema = schema(&scope, ContextOptions::default());

        let response = schema.execute("{ leaseId token }").await;

        assert!(response.is_ok(), "{:?}", response.errors);
        assert!(scope.requests()[0].jwt_token.is_none());
        assert_eq!(scope.released(), vec![(1, Outcome::Commit)]);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let scope = Arc::new(CountingScope::default());
        let lifecycle = ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()).lifecycle();

        assert!(lifecycle.release(Outcome::Commit).is_none());

        let lifecycle = ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()).lifecycle();
        lifecycle.acquire(&HeaderMap::new(), Request::new("{ leaseId }")).await.unwrap();

        lifecycle.release(Outcome::Commit).unwrap().await.unwrap();
        assert!(lifecycle.release(Outcome::Commit).is_none());
        assert!(lifecycle.release(Outcome::Rollback).is_none());

        assert_eq!(scope.released(), vec![(1, Outcome::Commit)]);
    }

    #[tokio::test]
    async fn test_second_acquire_is_refused() {
        let scope = Arc::new(CountingScope::default());
        let lifecycle = ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()).lifecycle();

        lifecycle.acquire(&HeaderMap::new(), Request::new("{ leaseId }")).await.unwrap();
        let err = lifecycle.acquire(&HeaderMap::new(), Request::new("{ leaseId }")).await.unwrap_err();

        assert!(matches!(err, GatewayError::AlreadyAcquired));
        assert_eq!(scope.acquired(), 1);
    }

    #[tokio::test]
    async fn test_dropped_lifecycle_rolls_back() {
        let scope = Arc::new(CountingScope::default());
        let lifecycle = ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()).lifecycle();
        lifecycle.acquire(&HeaderMap::new(), Request::new("{ leaseId }")).await.unwrap();

        drop(lifecycle);
        scope.wait_released(1).await;

        assert_eq!(scope.released(), vec![(1, Outcome::Rollback)]);
    }

    #[tokio::test]
    async fn test_cancelled_request_rolls_back() {
        let scope = Arc::new(CountingScope::default());
        let gate = Arc::new(Notify::new());
        let schema = Schema::build(TestQuery, EmptyMutation, EmptySubscription)
            .extension(ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()))
            .data(Arc::clone(&gate))
            .finish();

        let pending = schema.execute(request("{ leaseId waitForSignal }", &[]));
        let timed_out =
            tokio::time::timeout(std::time::Duration::from_millis(50), pending).await;
        assert!(timed_out.is_err());

        scope.wait_released(1).await;
        assert_eq!(scope.released(), vec![(1, Outcome::Rollback)]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_release_independently() {
        let scope = Arc::new(CountingScope::default());
        let gate = Arc::new(Notify::new());
        let schema = Schema::build(TestQuery, EmptyMutation, EmptySubscription)
            .extension(ContextPlugin::new(Arc::clone(&scope), ContextOptions::default()))
            .data(Arc::clone(&gate))
            .finish();

        let slow = schema.execute(request("{ leaseId waitForSignal }", &[]));
        let fast = async {
            let response = schema.execute(request("{ leaseId }", &[])).await;
            let released = scope.released();
            gate.notify_one();
            (response, released)
        };
        let (slow, (fast, released_after_fast)) = tokio::join!(slow, fast);

        assert!(slow.is_ok(), "{:?}", slow.errors);
        assert!(fast.is_ok(), "{:?}", fast.errors);
        let slow_id = lease_id(&slow);
        let fast_id = lease_id(&fast);
        assert_ne!(slow_id, fast_id);

        let as_lease = |id: i64| usize::try_from(id).unwrap();
        assert_eq!(released_after_fast, vec![(as_lease(fast_id), Outcome::Commit)]);

        let mut released = scope.released();
        released.sort_by_key(|(id, _)| *id);
        let mut expected = vec![
            (as_lease(slow_id), Outcome::Commit),
            (as_lease(fast_id), Outcome::Commit),
        ];
        expected.sort_by_key(|(id, _)| *id);
        assert_eq!(released, expected);
        assert_eq!(scope.acquired(), 2);
    }
}
