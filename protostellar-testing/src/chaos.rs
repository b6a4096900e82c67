//! Failure injection for executor tests.
//!
//! [`ChaosInvoker`] wraps any unary invoker and, with a configured
//! [`Probability`], answers an attempt with `UNAVAILABLE` instead of calling
//! through. A seed makes the injected sequence reproducible.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use nutype::nutype;
use protostellar::UnaryRpc;
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use tonic::Status;
use tracing::debug;

/// Message of the `UNAVAILABLE` status injected by [`ChaosInvoker`].
pub const INJECTED_UNAVAILABLE: &str = "chaos: node unavailable";

/// Probability value for chaos injection rates.
///
/// Probability represents a value in the range [0.0, 1.0] where 0.0 means
/// never inject failures and 1.0 means always inject failures.
///
/// # Examples
///
/// ```ignore
/// use protostellar_testing::chaos::Probability;
///
/// let never = Probability::try_new(0.0).unwrap();
/// let always = Probability::try_new(1.0).unwrap();
///
/// assert!(Probability::try_new(1.5).is_err());
/// ```
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Into)
)]
pub struct Probability(f32);

/// How often a [`ChaosInvoker`] fails attempts.
#[derive(Debug, Clone)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    unavailable_probability: Probability,
}

impl ChaosConfig {
    /// A configuration with a fixed seed, so injections repeat across runs.
    pub fn deterministic() -> Self {
        Self {
            deterministic_seed: Some(0),
            ..Self::default()
        }
    }

    /// Probability of replacing an attempt with an `UNAVAILABLE` failure.
    #[must_use]
    pub fn with_unavailable_probability(mut self, probability: f32) -> Self {
        self.unavailable_probability = Probability::try_new(probability.clamp(0.0, 1.0))
            .expect("clamped value is always valid");
        self
    }
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            deterministic_seed: None,
            unavailable_probability: Probability::try_new(0.0).expect("0.0 is valid probability"),
        }
    }
}

/// Wraps an invoker with chaos injection.
pub trait ChaosInvokerExt: Sized {
    /// Injects failures into this invoker according to `config`.
    fn with_chaos(self, config: ChaosConfig) -> ChaosInvoker<Self>;
}

/// An invoker that fails some attempts with `UNAVAILABLE` before they reach
/// the wrapped invoker.
#[derive(Debug)]
pub struct ChaosInvoker<I> {
    inner: I,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
    injected: AtomicU32,
}

impl<I> ChaosInvoker<I> {
    /// Wraps `inner`.
    pub fn new(inner: I, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            inner,
            config,
            rng: Mutex::new(rng),
            injected: AtomicU32::new(0),
        }
    }

    /// The wrapped invoker.
    pub const fn inner(&self) -> &I {
        &self.inner
    }

    /// Number of attempts failed by injection so far.
    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let prob_f32: f32 = probability.into();

        if prob_f32 <= 0.0 {
            return false;
        }

        if prob_f32 >= 1.0 {
            return true;
        }

        let mut rng = self
            .rng
            .lock()
            .expect("chaos RNG mutex should not be poisoned");

        rng.random_bool(f64::from(prob_f32))
    }
}

#[async_trait]
impl<Req, Resp, I> UnaryRpc<Req, Resp> for ChaosInvoker<I>
where
    I: UnaryRpc<Req, Resp>,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn call(&self, request: Req, timeout: Duration) -> Result<Resp, Status> {
        if self.should_inject(self.config.unavailable_probability) {
            let injected = self.injected.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(injected, "injecting unavailable status");
            return Err(Status::unavailable(INJECTED_UNAVAILABLE));
        }

        self.inner.call(request, timeout).await
    }
}

impl<I> ChaosInvokerExt for I
where
    I: Send + Sync,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosInvoker<Self> {
        ChaosInvoker::new(self, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedInvoker;

    #[test]
    fn deterministic_config_sets_seed() {
        let default_is_none = ChaosConfig::default().deterministic_seed.is_none();
        let deterministic_is_some = ChaosConfig::deterministic().deterministic_seed.is_some();

        assert!(default_is_none && deterministic_is_some);
    }

    #[test]
    fn out_of_range_probabilities_are_clamped() {
        let config = ChaosConfig::default().with_unavailable_probability(3.0);
        let probability: f32 = config.unavailable_probability.into();

        assert!((probability - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn zero_probability_passes_through() {
        let invoker = ScriptedInvoker::new()
            .then_respond("document")
            .with_chaos(ChaosConfig::default());

        let response = UnaryRpc::<(), &str>::call(&invoker, (), Duration::from_secs(1)).await;

        assert_eq!(response.unwrap(), "document");
        assert_eq!(invoker.injected(), 0);
    }

    #[tokio::test]
    async fn certain_injection_never_reaches_the_inner_invoker() {
        let invoker = ScriptedInvoker::new()
            .then_respond("document")
            .with_chaos(ChaosConfig::deterministic().with_unavailable_probability(1.0));

        let status = UnaryRpc::<(), &str>::call(&invoker, (), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert_eq!(invoker.injected(), 1);
        assert!(invoker.inner().attempts().is_empty());
    }
}
