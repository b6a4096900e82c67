use std::time::Duration;

use protostellar::{ErrorKind, RequestExecutor, RequestOptions, RetryReason, ServiceClass};
use protostellar_testing::chaos::{ChaosConfig, ChaosInvokerExt};
use protostellar_testing::scripted::ScriptedInvoker;

#[tokio::test(start_paused = true)]
async fn chaos_mode_can_force_every_attempt_unavailable() {
    // Given: deterministic chaos failing every attempt of an idempotent read
    let invoker = ScriptedInvoker::new()
        .then_respond("document")
        .with_chaos(ChaosConfig::deterministic().with_unavailable_probability(1.0));
    let executor = RequestExecutor::default();
    let mut ctx = executor.context(
        "airline_10",
        RequestOptions::new(ServiceClass::KeyValue)
            .with_idempotent(true)
            .with_timeout(Duration::from_millis(200)),
    );

    // When: running the read until its deadline
    let error = executor.run_unary(&mut ctx, &invoker).await.unwrap_err();

    // Then: the retries are absorbed and surface as an unambiguous timeout
    assert_eq!(error.kind(), &ErrorKind::UnambiguousTimeout);
    assert_eq!(error.retry_reasons(), [RetryReason::NodeUnavailable]);
    assert_eq!(error.retry_count(), invoker.injected());
    assert!(invoker.inner().attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn chaos_mode_failures_are_retried_through() {
    // Given: deterministic chaos failing roughly half of all attempts
    let invoker = ScriptedInvoker::new()
        .then_respond("document")
        .with_chaos(ChaosConfig::deterministic().with_unavailable_probability(0.5));
    let executor = RequestExecutor::default();
    let mut ctx = executor.context(
        "airline_10",
        RequestOptions::new(ServiceClass::KeyValue)
            .with_idempotent(true)
            .with_timeout(Duration::from_secs(30)),
    );

    // When: running the read
    let response = executor.run_unary(&mut ctx, &invoker).await.unwrap();

    // Then: the first attempt that got through produced the response
    assert_eq!(response, "document");
    assert_eq!(ctx.retry_count(), invoker.injected());
    assert_eq!(invoker.inner().attempts().len(), 1);
}
