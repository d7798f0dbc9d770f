//! Leaf primitives
//!
//! Small synchronous building blocks: function adapters, replication,
//! pass-through helpers and a cancellable delay.

use async_trait::async_trait;
use hybrid_core::{Data, HybridError, HybridResult, RunContext, Runnable, SampleSet, State, States};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

type StateFn = dyn Fn(State) -> HybridResult<State> + Send + Sync;
type DataFn = dyn Fn(Data) -> HybridResult<Data> + Send + Sync;

#[derive(Clone)]
enum LambdaFn {
    State(Arc<StateFn>),
    Data(Arc<DataFn>),
}

/// Adapts a plain function into a runnable
///
/// The function runs synchronously on the calling task and is never
/// interrupted; stop requests are only seen by whatever runs next.
#[derive(Clone)]
pub struct Lambda {
    name: String,
    func: LambdaFn,
}

impl Lambda {
    /// Wrap a single-state function
    ///
    /// The resulting runnable rejects `Many` input.
    #[must_use]
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(State) -> HybridResult<State> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: LambdaFn::State(Arc::new(func)),
        }
    }

    /// Wrap a function over either input shape
    #[must_use]
    pub fn data<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(Data) -> HybridResult<Data> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: LambdaFn::Data(Arc::new(func)),
        }
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl Runnable for Lambda {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        match &self.func {
            LambdaFn::State(func) => func(input.into_state(&self.name)?).map(Data::One),
            LambdaFn::Data(func) => func(input),
        }
    }
}

/// Replicates one state into independent copies
#[derive(Debug, Clone, Copy)]
pub struct Dup {
    count: usize,
}

impl Dup {
    /// Create replicator for `count` copies
    ///
    /// # Errors
    /// `InvalidInput` if `count` is zero
    pub fn new(count: usize) -> HybridResult<Self> {
        if count == 0 {
            return Err(HybridError::invalid_input("Dup", "replication count must be at least 1"));
        }
        Ok(Self { count })
    }

    /// Number of copies produced
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

#[async_trait]
impl Runnable for Dup {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let state = input.into_state("Dup")?;
        let copies: States = std::iter::repeat(state).take(self.count).collect();
        Ok(copies.into())
    }
}

/// Returns its input unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

#[async_trait]
impl Runnable for Identity {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        Ok(input)
    }
}

/// Replaces the samples of every input state with a fixed set
#[derive(Debug, Clone)]
pub struct Const {
    samples: SampleSet,
}

impl Const {
    /// Create with the samples to emit
    #[inline]
    #[must_use]
    pub fn new(samples: SampleSet) -> Self {
        Self { samples }
    }
}

#[async_trait]
impl Runnable for Const {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        Ok(match input {
            Data::One(state) => Data::One(state.with_samples(self.samples.clone())),
            Data::Many(states) => {
                let mut states = states;
                for state in states.as_mut_slice() {
                    *state.samples_mut() = self.samples.clone();
                }
                Data::Many(states)
            }
        })
    }
}

/// Waits for a fixed duration, then returns its input
///
/// A stop request ends the wait early.
#[derive(Debug, Clone, Copy)]
pub struct Sleep {
    duration: Duration,
}

impl Sleep {
    /// Create delay
    #[inline]
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl Runnable for Sleep {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        tokio::select! {
            () = tokio::time::sleep(self.duration) => {}
            () = ctx.cancelled() => tracing::debug!("sleep interrupted"),
        }
        Ok(input)
    }
}

/// Logs a summary of its input and passes it through
#[derive(Debug, Clone)]
pub struct Log {
    label: String,
}

impl Log {
    /// Create logger with a label
    #[inline]
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self { label: label.into() }
    }
}

#[async_trait]
impl Runnable for Log {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let states = input.states();
        let best = states
            .iter()
            .filter_map(|s| s.min_energy())
            .min_by(f64::total_cmp);
        let samples: usize = states.iter().map(|s| s.samples().len()).sum();

        tracing::info!(
            label = %self.label,
            shape = input.shape(),
            states = states.len(),
            samples,
            best_energy = ?best,
            "state"
        );
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hybrid_test_utils::{energies_of, state_with_energies};
    use std::time::Instant;

    #[tokio::test]
    async fn lambda_applies_function() {
        let halve = Lambda::new("halve", |mut state: State| {
            for sample in state.samples_mut().make_mut() {
                sample.energy /= 2.0;
            }
            Ok(state)
        });
        assert_eq!(halve.name(), "halve");

        let ctx = RunContext::default();
        let out = halve.next(state_with_energies(&[4.0, 2.0]).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![2.0, 1.0]);
    }

    #[tokio::test]
    async fn lambda_rejects_many_for_state_function() {
        let id = Lambda::new("id", Ok);
        let ctx = RunContext::default();
        let err = id.next(vec![State::new()].into(), &ctx).await.unwrap_err();
        assert!(matches!(err, HybridError::InvalidInput { .. }));

        let count = Lambda::data("count", |data| Ok(State::new().with_info_entry("n", data.states().len()).into()));
        let out = count.next(vec![State::new(), State::new()].into(), &ctx).await.unwrap();
        assert_eq!(out.as_state().unwrap().info().get("n"), Some(&serde_json::json!(2)));
    }

    #[tokio::test]
    async fn dup_makes_independent_copies() {
        assert!(Dup::new(0).is_err());

        let ctx = RunContext::default();
        let input = state_with_energies(&[1.0]);
        let out = Dup::new(3).unwrap().next(input.clone().into(), &ctx).await.unwrap();
        let mut copies = out.into_states("test").unwrap().into_vec();
        assert_eq!(copies.len(), 3);

        copies[0].samples_mut().make_mut()[0].energy = -5.0;
        assert_eq!(copies[1].min_energy(), Some(1.0));
        assert_eq!(input.min_energy(), Some(1.0));
    }

    #[tokio::test]
    async fn const_replaces_samples() {
        let ctx = RunContext::default();
        let fixed = hybrid_test_utils::samples_with_energies(&[0.5]);
        let out = Const::new(fixed)
            .next(vec![state_with_energies(&[3.0]), state_with_energies(&[4.0])].into(), &ctx)
            .await
            .unwrap();
        assert_eq!(energies_of(&out), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn sleep_returns_early_when_stopped() {
        let ctx = RunContext::default();
        ctx.stop();
        let started = Instant::now();
        let out = Sleep::new(Duration::from_secs(5))
            .next(state_with_energies(&[1.0]).into(), &ctx)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(energies_of(&out), vec![1.0]);
    }

    #[tokio::test]
    async fn identity_and_log_pass_through() {
        let ctx = RunContext::default();
        let out = Identity.next(state_with_energies(&[2.0]).into(), &ctx).await.unwrap();
        let out = Log::new("checkpoint").next(out, &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![2.0]);
    }
}
