use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::GatewayError;
use crate::pg::scope::{ConnectionScope, Outcome, ScopeRequest, ScopedLease};

/// A leased context plus the signal that ends its scope
pub struct Provisioned<C> {
    pub lease: ScopedLease<C>,
    pub release: ReleaseHandle,
}

/// Deferred completion of a scope
///
/// Dropping the handle without calling [`ReleaseHandle::finish`] ends the
/// scope with [`Outcome::Rollback`].
pub struct ReleaseHandle {
    signal: oneshot::Sender<Outcome>,
    task: JoinHandle<Result<(), GatewayError>>,
}

impl ReleaseHandle {
    /// Let the scope finish with `outcome`
    pub fn finish(self, outcome: Outcome) -> ReleaseFuture {
        // the scope body is gone only if the task already ended
        let _ = self.signal.send(outcome);
        ReleaseFuture { task: self.task }
    }
}

/// Resolves once the scope has returned its connection
pub struct ReleaseFuture {
    task: JoinHandle<Result<(), GatewayError>>,
}

impl Future for ReleaseFuture {
    type Output = Result<(), GatewayError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(GatewayError::Task(err.to_string())),
        })
    }
}

/// Acquire a context now and release it later
///
/// The scope runs on its own task; its body hands the lease back through a
/// channel and then parks on the release signal, so the connection stays
/// leased until the returned handle is finished or dropped.
///
/// # Errors
/// Returns the scope's own error if it fails before leasing a connection
pub async fn provision<S: ConnectionScope>(
    scope: Arc<S>,
    request: ScopeRequest,
) -> Result<Provisioned<S::Connection>, GatewayError> {
    let (lease_tx, lease_rx) = oneshot::channel::<ScopedLease<S::Connection>>();
    let (signal, finished) = oneshot::channel::<Outcome>();

    let task = tokio::spawn(async move {
        scope
            .scope(
                request,
                Box::new(move |lease: ScopedLease<S::Connection>| {
                    async move {
                        if lease_tx.send(lease).is_err() {
                            return Outcome::Rollback;
                        }
                        finished.await.unwrap_or(Outcome::Rollback)
                    }
                    .boxed()
                }),
            )
            .await
    });

    match lease_rx.await {
        Ok(lease) => Ok(Provisioned {
            lease,
            release: ReleaseHandle { signal, task },
        }),
        Err(_) => match task.await {
            Ok(Err(err)) => Err(err),
            Ok(Ok(())) => Err(GatewayError::ScopeClosed),
            Err(err) => Err(GatewayError::Task(err.to_string())),
        },
    }
}
