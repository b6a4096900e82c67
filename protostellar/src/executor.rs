//! The request execution loop.
//!
//! [`RequestExecutor`] runs one logical operation to completion:
//!
//! 1. refuse to start an attempt once the absolute deadline has passed,
//! 2. issue the RPC with the remaining budget as its wire timeout,
//! 3. return on success,
//! 4. otherwise classify the failure and either surface it or sleep the
//!    backoff and go back to step 1.
//!
//! Attempts of one operation are strictly sequential. The backoff sleep is
//! only ended by elapsing.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tonic::Status;
use tracing::{debug, instrument, warn};

use crate::classify::ErrorClassifier;
use crate::config::ExecutorConfig;
use crate::context::{deadline_after, RequestContext, RequestOptions};
use crate::errors::ProtostellarResult;
use crate::retry::{RetryDecision, RetryOrchestrator};
use crate::timeout::TimeoutResolver;

/// Responses of one server-streaming attempt, ended by an optional error status.
pub type ResponseStream<Resp> = BoxStream<'static, Result<Resp, Status>>;

/// Performs one unary RPC attempt.
///
/// Implemented for any `Fn(Req, Duration) -> impl Future<Output = Result<Resp, Status>>`,
/// so a generated client method can be passed as a closure.
#[async_trait]
pub trait UnaryRpc<Req, Resp>: Send + Sync {
    /// Sends `request` with `timeout` as the wire deadline.
    async fn call(&self, request: Req, timeout: Duration) -> Result<Resp, Status>;
}

/// Performs one server-streaming RPC attempt.
#[async_trait]
pub trait StreamingRpc<Req, Resp>: Send + Sync {
    /// Opens the stream for `request` with `timeout` as the wire deadline.
    async fn call(&self, request: Req, timeout: Duration) -> Result<ResponseStream<Resp>, Status>;
}

#[async_trait]
impl<Req, Resp, F, Fut> UnaryRpc<Req, Resp> for F
where
    F: Fn(Req, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Resp, Status>> + Send,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, request: Req, timeout: Duration) -> Result<Resp, Status> {
        self(request, timeout).await
    }
}

#[async_trait]
impl<Req, Resp, F, Fut> StreamingRpc<Req, Resp> for F
where
    F: Fn(Req, Duration) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ResponseStream<Resp>, Status>> + Send,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, request: Req, timeout: Duration) -> Result<ResponseStream<Resp>, Status> {
        self(request, timeout).await
    }
}

/// Runs operations against the Protostellar gRPC services.
///
/// Holds no per-operation state; one executor serves any number of
/// concurrent operations, each with its own [`RequestContext`].
///
/// # Example
///
/// ```rust,ignore
/// let executor = RequestExecutor::new(ExecutorConfig::default());
/// let mut ctx = executor.context(
///     get_request,
///     RequestOptions::new(ServiceClass::KeyValue).with_idempotent(true),
/// );
/// let response = executor
///     .run_unary(&mut ctx, &|request, timeout| kv_client.clone().get(request, timeout))
///     .await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestExecutor {
    timeouts: TimeoutResolver,
    classifier: ErrorClassifier,
}

impl RequestExecutor {
    /// Creates an executor from its configuration.
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            timeouts: TimeoutResolver::new(config.timeouts),
            classifier: ErrorClassifier::new(RetryOrchestrator::new(config.backoff)),
        }
    }

    /// The resolver computing deadline budgets.
    pub const fn timeouts(&self) -> &TimeoutResolver {
        &self.timeouts
    }

    /// The classifier deciding the fate of failed attempts.
    pub const fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Creates the context of a new operation, fixing its absolute deadline now.
    pub fn context<Req>(&self, request: Req, options: RequestOptions) -> RequestContext<Req> {
        let budget = self
            .timeouts
            .resolve(options.service(), options.timeout(), options.is_durable());
        RequestContext::new(request, options, deadline_after(budget))
    }

    /// Runs a unary operation until it succeeds, fails terminally, or times out.
    #[instrument(
        skip_all,
        fields(
            operation_id = %ctx.operation_id(),
            service = %ctx.service(),
            idempotent = ctx.is_idempotent()
        )
    )]
    pub async fn run_unary<Req, Resp, I>(
        &self,
        ctx: &mut RequestContext<Req>,
        invoker: &I,
    ) -> ProtostellarResult<Resp>
    where
        Req: Clone + Send,
        I: UnaryRpc<Req, Resp> + ?Sized,
    {
        loop {
            let budget = start_attempt(ctx)?;
            match invoker.call(ctx.request().clone(), budget).await {
                Ok(response) => return Ok(response),
                Err(status) => self.settle_failure(ctx, &status).await?,
            }
        }
    }

    /// Runs a server-streaming operation, returning every response in order.
    ///
    /// Each attempt's stream is drained before its status is inspected. A
    /// retried attempt discards the responses of the failed one.
    #[instrument(
        skip_all,
        fields(
            operation_id = %ctx.operation_id(),
            service = %ctx.service(),
            idempotent = ctx.is_idempotent()
        )
    )]
    pub async fn run_streaming<Req, Resp, I>(
        &self,
        ctx: &mut RequestContext<Req>,
        invoker: &I,
    ) -> ProtostellarResult<Vec<Resp>>
    where
        Req: Clone + Send,
        I: StreamingRpc<Req, Resp> + ?Sized,
    {
        loop {
            let budget = start_attempt(ctx)?;
            let outcome = match invoker.call(ctx.request().clone(), budget).await {
                Ok(stream) => drain(stream).await,
                Err(status) => Err(status),
            };
            match outcome {
                Ok(responses) => return Ok(responses),
                Err(status) => self.settle_failure(ctx, &status).await?,
            }
        }
    }

    async fn settle_failure<Req>(
        &self,
        ctx: &mut RequestContext<Req>,
        status: &Status,
    ) -> ProtostellarResult<()> {
        match self.classifier.classify(status, ctx) {
            RetryDecision::Retry { after } => {
                tokio::time::sleep(after).await;
                Ok(())
            }
            RetryDecision::Fail(error) => {
                warn!(
                    code = ?status.code(),
                    retry_count = ctx.retry_count(),
                    %error,
                    "request failed"
                );
                Err(error)
            }
        }
    }
}

/// Remaining budget for the next attempt, or the deadline error if none is left.
///
/// The deadline error keeps the diagnostics of the last failed attempt; an
/// attempt that does start clears them.
fn start_attempt<Req>(ctx: &mut RequestContext<Req>) -> ProtostellarResult<Duration> {
    let remaining = ctx.remaining();
    if remaining.is_zero() {
        let error = ctx.timeout_error();
        warn!(retry_count = ctx.retry_count(), %error, "deadline reached before attempt");
        return Err(error);
    }
    ctx.begin_attempt();
    debug!(
        attempt = ctx.attempt(),
        budget = ?remaining,
        "issuing attempt"
    );
    Ok(remaining)
}

async fn drain<Resp>(mut stream: ResponseStream<Resp>) -> Result<Vec<Resp>, Status> {
    let mut responses = Vec::new();
    while let Some(item) = stream.next().await {
        responses.push(item?);
    }
    Ok(responses)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use futures::stream;
    use tokio::time::Instant;
    use tracing_test::traced_test;

    use super::*;
    use crate::config::{BackoffConfig, BackoffMaxMs, TimeoutConfig, TimeoutMs};
    use crate::errors::ErrorKind;
    use crate::retry::RetryReason;
    use crate::timeout::ServiceClass;

    fn options(idempotent: bool) -> RequestOptions {
        RequestOptions::new(ServiceClass::KeyValue).with_idempotent(idempotent)
    }

    #[test]
    fn configuration_reaches_the_resolver_and_the_orchestrator() {
        let config = ExecutorConfig::default()
            .with_timeouts(
                TimeoutConfig::default().with_query(TimeoutMs::try_new(120_000).unwrap()),
            )
            .with_backoff(BackoffConfig::default().with_max(BackoffMaxMs::try_new(50).unwrap()));

        let executor = RequestExecutor::new(config.clone());

        assert_eq!(executor.timeouts().config(), &config.timeouts);
        assert_eq!(executor.classifier().orchestrator().backoff(), &config.backoff);
        assert_eq!(
            executor.timeouts().resolve(ServiceClass::Query, None, false),
            Duration::from_secs(120)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn context_uses_the_resolved_budget() {
        let executor = RequestExecutor::default();
        let start = Instant::now();

        let ctx = executor.context("get", options(true));
        let durable = executor.context("upsert", options(false).with_durability(true));

        assert_eq!(ctx.deadline() - start, Duration::from_millis(2_500));
        assert_eq!(durable.deadline() - start, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn closure_invoker_sees_the_remaining_budget() {
        let executor = RequestExecutor::default();
        let mut ctx = executor.context("get", options(true).with_timeout(Duration::from_secs(3)));

        let response = executor
            .run_unary(&mut ctx, &|request: &'static str, timeout: Duration| async move {
                assert_eq!(timeout, Duration::from_secs(3));
                Ok::<_, Status>(format!("{request}: ok"))
            })
            .await
            .unwrap();

        assert_eq!(response, "get: ok");
        assert_eq!(ctx.retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_deadline_then_times_out() {
        let executor = RequestExecutor::default();
        let mut ctx = executor.context("get", options(true).with_timeout(Duration::from_millis(100)));
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&attempts);
        let invoker = move |_request: &'static str, _timeout: Duration| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Status::unavailable("node restarting"))
            }
        };
        let error = executor.run_unary(&mut ctx, &invoker).await.unwrap_err();

        assert_eq!(error.kind(), &ErrorKind::UnambiguousTimeout);
        assert_eq!(error.retry_reasons(), [RetryReason::NodeUnavailable]);
        assert_eq!(error.retry_count(), attempts.load(Ordering::SeqCst));
        assert!(ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn streaming_closure_collects_all_chunks() {
        let executor = RequestExecutor::default();
        let mut ctx = executor.context((), RequestOptions::new(ServiceClass::Query).with_idempotent(true));

        let rows = executor
            .run_streaming(&mut ctx, &|_request: (), _timeout: Duration| async {
                Ok::<ResponseStream<u32>, Status>(stream::iter([Ok(1), Ok(2), Ok(3)]).boxed())
            })
            .await
            .unwrap();

        assert_eq!(rows, [1, 2, 3]);
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn terminal_failures_are_logged() {
        let executor = RequestExecutor::default();
        let mut ctx = executor.context("get", options(true));

        let result = executor
            .run_unary(&mut ctx, &|_request: &'static str, _timeout: Duration| async {
                Err::<(), _>(Status::invalid_argument("bad key"))
            })
            .await;

        assert!(result.is_err());
        assert!(logs_contain("issuing attempt"));
        assert!(logs_contain("request failed"));
        assert!(logs_contain("invalid argument"));
    }

    #[traced_test]
    #[tokio::test(start_paused = true)]
    async fn retries_are_logged() {
        let executor = RequestExecutor::default();
        let mut ctx = executor.context("get", options(true));
        let first = Arc::new(AtomicU32::new(0));

        let seen = Arc::clone(&first);
        let invoker = move |_request: &'static str, _timeout: Duration| {
            let seen = Arc::clone(&seen);
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Status::unavailable("node restarting"))
                } else {
                    Ok("document")
                }
            }
        };

        assert_eq!(executor.run_unary(&mut ctx, &invoker).await.unwrap(), "document");
        assert!(logs_contain("scheduling retry"));
        assert!(logs_contain("node_unavailable"));
    }
}
