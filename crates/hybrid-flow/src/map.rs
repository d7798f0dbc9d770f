//! Per-element fan-out

use crate::fanout::{record_failures_in, FanOut};
use async_trait::async_trait;
use hybrid_core::{
    Data, FailurePolicy, HybridResult, RunContext, Runnable, SharedRunnable, State, States,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Applies one worker to every input state concurrently
///
/// Output order matches input order regardless of completion order. With a
/// concurrency bound, excess elements wait for a free slot.
#[derive(Debug, Clone)]
pub struct Map {
    worker: SharedRunnable,
    max_concurrency: Option<usize>,
    policy: Option<FailurePolicy>,
    stop_grace: Option<Duration>,
}

impl Map {
    /// Create map over `worker`
    #[must_use]
    pub fn new(worker: impl Runnable + 'static) -> Self {
        Self::from_shared(Arc::new(worker))
    }

    /// Create map over an already shared worker
    #[must_use]
    pub fn from_shared(worker: SharedRunnable) -> Self {
        Self {
            worker,
            max_concurrency: None,
            policy: None,
            stop_grace: None,
        }
    }

    /// Bound the number of elements processed at once
    #[inline]
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// With failure policy, overriding the configured default
    #[inline]
    #[must_use]
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// With fail-fast stop grace period, overriding the configured default
    #[inline]
    #[must_use]
    pub fn with_stop_grace_period(mut self, grace: Duration) -> Self {
        self.stop_grace = Some(grace);
        self
    }
}

#[async_trait]
impl Runnable for Map {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let states = input.into_states("Map")?;
        if states.is_empty() {
            return Ok(Data::Many(States::new()));
        }

        let config = ctx.config();
        let policy = self.policy.unwrap_or(config.failure_policy);
        let stop_grace = self.stop_grace.unwrap_or_else(|| config.stop_grace_period());
        let max_concurrency = self.max_concurrency.or(config.map_max_concurrency).map(|max| max.max(1));
        let limit = max_concurrency.map(|max| Arc::new(Semaphore::new(max)));

        tracing::debug!(elements = states.len(), ?max_concurrency, "mapping");

        let jobs = states
            .into_iter()
            .map(|state| (Arc::clone(&self.worker), Data::One(state)));
        let gathered = FanOut::start(ctx, jobs, limit).gather(ctx, "Map", policy, stop_grace).await?;

        let worker = self.worker.name();
        let mut outputs = Vec::with_capacity(gathered.outputs.len());
        for data in gathered.outputs.into_iter().flatten() {
            outputs.push(data.into_state(&worker)?);
        }

        let mut states = States::from(outputs);
        record_failures_in(&mut states, gathered.failures);
        Ok(Data::Many(states))
    }
}

/// Free-standing form of [`Map`] over a state list
///
/// # Errors
/// As [`Map`]
pub async fn map_states(worker: SharedRunnable, states: Vec<State>, ctx: &RunContext) -> HybridResult<States> {
    Map::from_shared(worker)
        .next(Data::Many(States::from(states)), ctx)
        .await?
        .into_states("Map")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_core::{FlowConfig, HybridError};
    use hybrid_test_utils::{energies_of, state_with_energy, AddEnergy, Delayed};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[derive(Debug, Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Runnable for Gauge {
        async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(input)
        }
    }

    #[tokio::test]
    async fn empty_input_gives_empty_output() {
        let ctx = RunContext::default();
        let out = Map::new(AddEnergy(1.0)).next(Vec::<State>::new().into(), &ctx).await.unwrap();
        assert!(out.as_states().unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_state_input_is_rejected() {
        let ctx = RunContext::default();
        let err = Map::new(AddEnergy(1.0)).next(State::new().into(), &ctx).await.unwrap_err();
        assert!(matches!(err, HybridError::InvalidInput { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn output_follows_input_order() {
        let ctx = RunContext::default();
        let worker = Delayed::millis(0);
        let input: Vec<State> = [3.0, 1.0, 2.0].into_iter().map(state_with_energy).collect();

        let out = Map::new(worker).next(input.into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![3.0, 1.0, 2.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrency_bound_is_respected() {
        let ctx = RunContext::default();
        let gauge = Arc::new(Gauge::default());
        let map = Map::from_shared(gauge.clone()).with_max_concurrency(2);
        let input: Vec<State> = (0..6).map(|i| state_with_energy(f64::from(i))).collect();

        let started = Instant::now();
        let out = map.next(input.into(), &ctx).await.unwrap();
        assert_eq!(out.as_states().unwrap().len(), 6);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert!(started.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_concurrency_in_config_still_progresses() {
        let config = FlowConfig {
            map_max_concurrency: Some(0),
            ..FlowConfig::default()
        };
        let ctx = RunContext::new(config);
        let input: Vec<State> = [0.0, 1.0].into_iter().map(state_with_energy).collect();

        let out = tokio::time::timeout(
            Duration::from_secs(2),
            Map::new(Delayed::millis(1)).next(input.into(), &ctx),
        )
        .await
        .expect("map must not wait for a permit forever")
        .unwrap();
        assert_eq!(energies_of(&out), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn map_states_helper() {
        let ctx = RunContext::default();
        let states = map_states(
            Arc::new(AddEnergy(1.0)),
            vec![state_with_energy(0.0), state_with_energy(1.0)],
            &ctx,
        )
        .await
        .unwrap();
        let energies: Vec<Option<f64>> = states.iter().map(State::min_energy).collect();
        assert_eq!(energies, vec![Some(1.0), Some(2.0)]);
    }
}
