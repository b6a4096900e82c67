//! Invokers that replay a script instead of talking to a server.
//!
//! Each attempt pops the next scripted outcome. When the script runs dry the
//! attempt fails with `INTERNAL`, which the classifier treats as terminal, so
//! a test with too short a script fails loudly instead of looping.
//!
//! # Example
//!
//! ```ignore
//! let invoker = ScriptedInvoker::new()
//!     .then_fail(Status::unavailable("node restarting"))
//!     .then_respond("document");
//!
//! let response = executor.run_unary(&mut ctx, &invoker).await?;
//! assert_eq!(invoker.attempts().len(), 2);
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use protostellar::{ResponseStream, StreamingRpc, UnaryRpc};
use tokio::time::Instant;
use tonic::Status;

/// Message of the status returned once a script is exhausted.
pub const SCRIPT_EXHAUSTED: &str = "script exhausted";

/// One attempt observed by a scripted invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// When the attempt was issued.
    pub started_at: Instant,
    /// Wire timeout the executor passed for the attempt.
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct Journal {
    attempts: Mutex<Vec<Attempt>>,
}

impl Journal {
    fn record(&self, timeout: Duration) {
        self.attempts
            .lock()
            .expect("attempt journal mutex should not be poisoned")
            .push(Attempt {
                started_at: Instant::now(),
                timeout,
            });
    }

    fn snapshot(&self) -> Vec<Attempt> {
        self.attempts
            .lock()
            .expect("attempt journal mutex should not be poisoned")
            .clone()
    }
}

/// Unary invoker replaying scripted responses and failures.
#[derive(Debug)]
pub struct ScriptedInvoker<T> {
    outcomes: Mutex<VecDeque<Result<T, Status>>>,
    journal: Journal,
}

impl<T> ScriptedInvoker<T> {
    /// Creates an invoker with an empty script.
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            journal: Journal::default(),
        }
    }

    /// Appends a successful attempt returning `response`.
    #[must_use]
    pub fn then_respond(self, response: T) -> Self {
        self.then(Ok(response))
    }

    /// Appends a failed attempt returning `status`.
    #[must_use]
    pub fn then_fail(self, status: Status) -> Self {
        self.then(Err(status))
    }

    fn then(self, outcome: Result<T, Status>) -> Self {
        self.outcomes
            .lock()
            .expect("script mutex should not be poisoned")
            .push_back(outcome);
        self
    }

    /// Attempts issued so far, in order.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.journal.snapshot()
    }

    /// Number of scripted outcomes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.outcomes
            .lock()
            .expect("script mutex should not be poisoned")
            .len()
    }

    fn next(&self, timeout: Duration) -> Result<T, Status> {
        self.journal.record(timeout);
        self.outcomes
            .lock()
            .expect("script mutex should not be poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(Status::internal(SCRIPT_EXHAUSTED)))
    }
}

impl<T> Default for ScriptedInvoker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Req, T> UnaryRpc<Req, T> for ScriptedInvoker<T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    async fn call(&self, _request: Req, timeout: Duration) -> Result<T, Status> {
        self.next(timeout)
    }
}

#[derive(Debug)]
enum StreamScript<T> {
    Open {
        chunks: Vec<T>,
        trailer: Option<Status>,
    },
    Reject(Status),
}

/// Server-streaming invoker replaying scripted streams.
#[derive(Debug)]
pub struct ScriptedStreamInvoker<T> {
    outcomes: Mutex<VecDeque<StreamScript<T>>>,
    journal: Journal,
}

impl<T> ScriptedStreamInvoker<T> {
    /// Creates an invoker with an empty script.
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            journal: Journal::default(),
        }
    }

    /// Appends an attempt streaming `chunks`, then ending with `OK`.
    #[must_use]
    pub fn then_stream(self, chunks: Vec<T>) -> Self {
        self.then(StreamScript::Open {
            chunks,
            trailer: None,
        })
    }

    /// Appends an attempt streaming `chunks`, then ending with `status`.
    #[must_use]
    pub fn then_stream_failing(self, chunks: Vec<T>, status: Status) -> Self {
        self.then(StreamScript::Open {
            chunks,
            trailer: Some(status),
        })
    }

    /// Appends an attempt whose stream fails to open with `status`.
    #[must_use]
    pub fn then_reject(self, status: Status) -> Self {
        self.then(StreamScript::Reject(status))
    }

    fn then(self, outcome: StreamScript<T>) -> Self {
        self.outcomes
            .lock()
            .expect("script mutex should not be poisoned")
            .push_back(outcome);
        self
    }

    /// Attempts issued so far, in order.
    pub fn attempts(&self) -> Vec<Attempt> {
        self.journal.snapshot()
    }

    fn next(&self, timeout: Duration) -> StreamScript<T> {
        self.journal.record(timeout);
        self.outcomes
            .lock()
            .expect("script mutex should not be poisoned")
            .pop_front()
            .unwrap_or_else(|| StreamScript::Reject(Status::internal(SCRIPT_EXHAUSTED)))
    }
}

impl<T> Default for ScriptedStreamInvoker<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Req, T> StreamingRpc<Req, T> for ScriptedStreamInvoker<T>
where
    Req: Send + 'static,
    T: Send + 'static,
{
    async fn call(&self, _request: Req, timeout: Duration) -> Result<ResponseStream<T>, Status> {
        match self.next(timeout) {
            StreamScript::Reject(status) => Err(status),
            StreamScript::Open { chunks, trailer } => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(trailer.map(Err))
                    .collect::<Vec<_>>();
                Ok(stream::iter(items).boxed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replays_outcomes_in_order_and_records_timeouts() {
        let invoker = ScriptedInvoker::new()
            .then_fail(Status::unavailable("restarting"))
            .then_respond(7_u32);

        let first = UnaryRpc::<(), u32>::call(&invoker, (), Duration::from_secs(2)).await;
        let second = UnaryRpc::<(), u32>::call(&invoker, (), Duration::from_secs(1)).await;

        assert_eq!(first.unwrap_err().code(), tonic::Code::Unavailable);
        assert_eq!(second.unwrap(), 7);
        let timeouts: Vec<_> = invoker.attempts().iter().map(|a| a.timeout).collect();
        assert_eq!(timeouts, [Duration::from_secs(2), Duration::from_secs(1)]);
        assert_eq!(invoker.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_script_fails_with_internal() {
        let invoker = ScriptedInvoker::<u32>::new();

        let status = UnaryRpc::<(), u32>::call(&invoker, (), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Internal);
        assert_eq!(status.message(), SCRIPT_EXHAUSTED);
    }

    #[tokio::test]
    async fn stream_failure_follows_the_chunks() {
        let invoker = ScriptedStreamInvoker::new()
            .then_stream_failing(vec![1_u32, 2], Status::unavailable("restarting"));

        let items: Vec<_> = StreamingRpc::<(), u32>::call(&invoker, (), Duration::from_secs(1))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().ok(), Some(&1));
        assert_eq!(items[1].as_ref().ok(), Some(&2));
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn rejected_stream_never_opens() {
        let invoker = ScriptedStreamInvoker::<u32>::new().then_reject(Status::cancelled("gone"));

        let result = StreamingRpc::<(), u32>::call(&invoker, (), Duration::from_secs(1)).await;

        assert_eq!(result.err().as_ref().map(Status::code), Some(tonic::Code::Cancelled));
        assert_eq!(invoker.attempts().len(), 1);
    }
}
