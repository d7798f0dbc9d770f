//! Iteration primitives
//!
//! Every loop feeds the body's output back as the next input and stops when
//! any configured criterion is met:
//! - Iteration count (`max_iter`)
//! - Wall-clock budget (`max_time`)
//! - A stop request on the run context
//! - A termination predicate over the best output so far
//!
//! Criteria are checked between iterations only; a running body is never
//! preempted. A stopped loop returns its current result rather than an
//! error.

use crate::select::{data_key, default_key, Key, MinTracker};
use async_trait::async_trait;
use hybrid_core::{Data, HybridResult, RunContext, Runnable, SharedRunnable, State, States};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Predicate over the best output so far; `true` ends the loop
pub type TerminateFn = Arc<dyn Fn(&Data) -> bool + Send + Sync>;

/// Termination criteria shared by the loop primitives
#[derive(Clone)]
pub struct LoopCriteria {
    /// Maximum number of body runs
    pub max_iter: Option<usize>,
    /// Wall-clock budget, checked before each run
    pub max_time: Option<Duration>,
    /// Early termination predicate
    pub terminate: Option<TerminateFn>,
    /// Key ranking outputs; lower is better
    pub key: Key,
}

impl LoopCriteria {
    /// Create unbounded criteria ranked by minimum energy
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_iter: None,
            max_time: None,
            terminate: None,
            key: default_key(),
        }
    }

    /// Why the loop must not start another iteration, if it must not
    fn exhausted(&self, iteration: usize, started: Instant, ctx: &RunContext) -> Option<&'static str> {
        if self.max_iter.is_some_and(|max| iteration >= max) {
            return Some("max_iter");
        }
        if self.max_time.is_some_and(|max| started.elapsed() >= max) {
            return Some("max_time");
        }
        if ctx.is_cancelled() {
            return Some("stopped");
        }
        None
    }

    fn should_terminate(&self, best: Option<&Data>) -> bool {
        match (&self.terminate, best) {
            (Some(pred), Some(best)) => pred(best),
            _ => false,
        }
    }
}

impl Default for LoopCriteria {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopCriteria")
            .field("max_iter", &self.max_iter)
            .field("max_time", &self.max_time)
            .field("terminate", &self.terminate.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder methods common to every loop
macro_rules! criteria_builders {
    ($ty:ty) => {
        impl $ty {
            /// Stop after `max_iter` body runs
            #[inline]
            #[must_use]
            pub fn with_max_iter(mut self, max_iter: usize) -> Self {
                self.criteria.max_iter = Some(max_iter);
                self
            }

            /// Stop once `max_time` has elapsed
            #[inline]
            #[must_use]
            pub fn with_max_time(mut self, max_time: Duration) -> Self {
                self.criteria.max_time = Some(max_time);
                self
            }

            /// Stop once `pred` holds for the best output so far
            #[must_use]
            pub fn with_terminate<F>(mut self, pred: F) -> Self
            where
                F: Fn(&Data) -> bool + Send + Sync + 'static,
            {
                self.criteria.terminate = Some(Arc::new(pred));
                self
            }

            /// Rank outputs by `key`; a list ranks by its best state
            #[must_use]
            pub fn with_key<F>(mut self, key: F) -> Self
            where
                F: Fn(&State) -> f64 + Send + Sync + 'static,
            {
                self.criteria.key = Arc::new(key);
                self
            }

            /// Replace every criterion at once
            #[inline]
            #[must_use]
            pub fn with_criteria(mut self, criteria: LoopCriteria) -> Self {
                self.criteria = criteria;
                self
            }
        }
    };
}

/// Outcome of one body run
enum Step {
    Output(Data),
    Stopped,
}

/// Run the body once, treating an acknowledged stop as end of iteration
async fn step(body: &SharedRunnable, input: Data, ctx: &RunContext) -> HybridResult<Step> {
    match ctx.execute(body.as_ref(), input).await {
        Ok(output) => Ok(Step::Output(output)),
        Err(e) if e.is_cancelled() && ctx.is_cancelled() => Ok(Step::Stopped),
        Err(e) => Err(e),
    }
}

/// Repeats the body, returning its last output
#[derive(Debug, Clone)]
pub struct Loop {
    body: SharedRunnable,
    criteria: LoopCriteria,
}

impl Loop {
    /// Create loop over `body`
    #[must_use]
    pub fn new(body: impl Runnable + 'static) -> Self {
        Self::from_shared(Arc::new(body))
    }

    /// Create loop over an already shared body
    #[must_use]
    pub fn from_shared(body: SharedRunnable) -> Self {
        Self {
            body,
            criteria: LoopCriteria::new(),
        }
    }
}

criteria_builders!(Loop);

#[async_trait]
impl Runnable for Loop {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let started = Instant::now();
        let mut best = MinTracker::<Data>::new();
        let mut current = input;
        let mut iteration = 0;

        loop {
            if let Some(reason) = self.criteria.exhausted(iteration, started, ctx) {
                tracing::debug!(reason, "loop criteria met");
                break;
            }
            match step(&self.body, current.clone(), ctx).await? {
                Step::Output(output) => current = output,
                Step::Stopped => break,
            }
            iteration += 1;

            if self.criteria.terminate.is_some() {
                best.update(data_key(&self.criteria.key, &current), &current);
                if self.criteria.should_terminate(best.best()) {
                    tracing::debug!(iteration, "loop terminated by predicate");
                    break;
                }
            }
        }

        tracing::debug!(iterations = iteration, "loop finished");
        Ok(current)
    }
}

/// Repeats the body until the best output stops improving
///
/// The counter of non-improving iterations resets on every strict
/// improvement; the loop halts when it reaches `patience`, counting the
/// iteration that reached it. Emits the best output, not the last.
#[derive(Debug, Clone)]
pub struct LoopUntilNoImprovement {
    body: SharedRunnable,
    criteria: LoopCriteria,
    patience: Option<usize>,
}

impl LoopUntilNoImprovement {
    /// Create loop over `body`
    #[must_use]
    pub fn new(body: impl Runnable + 'static) -> Self {
        Self::from_shared(Arc::new(body))
    }

    /// Create loop over an already shared body
    #[must_use]
    pub fn from_shared(body: SharedRunnable) -> Self {
        Self {
            body,
            criteria: LoopCriteria::new(),
            patience: None,
        }
    }

    /// Halt after `patience` consecutive iterations without improvement
    #[inline]
    #[must_use]
    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = Some(patience);
        self
    }
}

criteria_builders!(LoopUntilNoImprovement);

#[async_trait]
impl Runnable for LoopUntilNoImprovement {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let started = Instant::now();
        let mut best = MinTracker::<Data>::new();
        let mut current = input;
        let mut stale = 0;
        let mut iteration = 0;

        loop {
            if let Some(reason) = self.criteria.exhausted(iteration, started, ctx) {
                tracing::debug!(reason, "loop criteria met");
                break;
            }
            match step(&self.body, current.clone(), ctx).await? {
                Step::Output(output) => current = output,
                Step::Stopped => break,
            }
            iteration += 1;

            if best.update(data_key(&self.criteria.key, &current), &current) {
                stale = 0;
            } else {
                stale += 1;
            }

            if self.patience.is_some_and(|patience| stale >= patience) {
                tracing::debug!(iteration, stale, "no improvement within patience");
                break;
            }
            if self.criteria.should_terminate(best.best()) {
                tracing::debug!(iteration, "loop terminated by predicate");
                break;
            }
        }

        tracing::debug!(iterations = iteration, best = ?best.best_key(), "loop finished");
        Ok(best.into_best().unwrap_or(current))
    }
}

/// Retries the body from the best state until it improves
///
/// The input is the baseline. Every try runs the body on the current best;
/// the first strictly improving output ends the loop and is emitted. After
/// `max_tries` consecutive non-improving tries the baseline is emitted.
#[derive(Debug, Clone)]
pub struct LoopWhileNoImprovement {
    body: SharedRunnable,
    criteria: LoopCriteria,
    max_tries: Option<usize>,
}

impl LoopWhileNoImprovement {
    /// Create loop over `body`
    #[must_use]
    pub fn new(body: impl Runnable + 'static) -> Self {
        Self::from_shared(Arc::new(body))
    }

    /// Create loop over an already shared body
    #[must_use]
    pub fn from_shared(body: SharedRunnable) -> Self {
        Self {
            body,
            criteria: LoopCriteria::new(),
            max_tries: None,
        }
    }

    /// Give up after `max_tries` consecutive non-improving tries
    #[inline]
    #[must_use]
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = Some(max_tries);
        self
    }
}

criteria_builders!(LoopWhileNoImprovement);

#[async_trait]
impl Runnable for LoopWhileNoImprovement {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let started = Instant::now();
        let mut best = MinTracker::<Data>::new();
        best.update(data_key(&self.criteria.key, &input), &input);
        let mut tries = 0;

        loop {
            if let Some(reason) = self.criteria.exhausted(tries, started, ctx) {
                tracing::debug!(reason, "loop criteria met");
                break;
            }
            if self.max_tries.is_some_and(|max| tries >= max) {
                tracing::debug!(tries, "no improvement within max_tries");
                break;
            }

            let Some(baseline) = best.best().cloned() else {
                break;
            };
            let output = match step(&self.body, baseline, ctx).await? {
                Step::Output(output) => output,
                Step::Stopped => break,
            };
            tries += 1;

            if best.update(data_key(&self.criteria.key, &output), &output) {
                tracing::debug!(tries, "improvement found");
                return Ok(output);
            }
            if self.criteria.should_terminate(best.best()) {
                break;
            }
        }

        Ok(best.into_best().unwrap_or(input))
    }
}

/// Repeats the body and returns every intermediate output
///
/// Follows the same criteria as [`Loop`]. The body must produce single
/// states; the result is the list of outputs in iteration order.
#[derive(Debug, Clone)]
pub struct Unwind {
    body: SharedRunnable,
    criteria: LoopCriteria,
}

impl Unwind {
    /// Create unwinding loop over `body`
    #[must_use]
    pub fn new(body: impl Runnable + 'static) -> Self {
        Self::from_shared(Arc::new(body))
    }

    /// Create unwinding loop over an already shared body
    #[must_use]
    pub fn from_shared(body: SharedRunnable) -> Self {
        Self {
            body,
            criteria: LoopCriteria::new(),
        }
    }
}

criteria_builders!(Unwind);

#[async_trait]
impl Runnable for Unwind {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let started = Instant::now();
        let body_name = self.body.name();
        let mut best = MinTracker::<Data>::new();
        let mut history: Vec<State> = Vec::new();
        let mut current = input.into_state("Unwind")?;

        loop {
            if let Some(reason) = self.criteria.exhausted(history.len(), started, ctx) {
                tracing::debug!(reason, "loop criteria met");
                break;
            }
            let output = match step(&self.body, Data::One(current), ctx).await? {
                Step::Output(output) => output,
                Step::Stopped => break,
            };
            let state = output.into_state(&body_name)?;
            history.push(state.clone());
            current = state;

            if self.criteria.terminate.is_some() {
                let data = Data::One(current.clone());
                best.update(data_key(&self.criteria.key, &data), &data);
                if self.criteria.should_terminate(best.best()) {
                    break;
                }
            }
        }

        tracing::debug!(iterations = history.len(), "unwind finished");
        Ok(Data::Many(States::from(history)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Lambda;
    use hybrid_core::HybridError;
    use hybrid_test_utils::{energies_of, min_energies_of, state_with_energy, AddEnergy, Failing, Scripted};
    use serde_json::json;

    #[tokio::test]
    async fn loop_runs_max_iter_times() {
        let ctx = RunContext::default();
        let out = Loop::new(AddEnergy(1.0))
            .with_max_iter(5)
            .next(state_with_energy(0.0).into(), &ctx)
            .await
            .unwrap();
        assert_eq!(energies_of(&out), vec![5.0]);
        assert_eq!(ctx.profile().get("AddEnergy").unwrap().calls, 5);
    }

    #[tokio::test]
    async fn loop_terminates_on_predicate() {
        let ctx = RunContext::default();
        let out = Loop::new(AddEnergy(-1.0))
            .with_max_iter(100)
            .with_terminate(|best| best.as_state().and_then(State::min_energy) <= Some(-3.0))
            .next(state_with_energy(0.0).into(), &ctx)
            .await
            .unwrap();
        assert_eq!(energies_of(&out), vec![-3.0]);
    }

    #[tokio::test]
    async fn loop_respects_max_time() {
        let ctx = RunContext::default();
        let slow = Lambda::new("slow", |state| {
            std::thread::sleep(Duration::from_millis(5));
            Ok(state)
        });
        let started = Instant::now();
        Loop::new(slow)
            .with_max_time(Duration::from_millis(30))
            .next(state_with_energy(0.0).into(), &ctx)
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn loop_propagates_body_failure() {
        let ctx = RunContext::default();
        let err = Loop::new(Failing::new("bad"))
            .with_max_iter(3)
            .next(State::new().into(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HybridError::Runnable { .. }));
    }

    #[tokio::test]
    async fn stopped_loop_returns_current_state() {
        let ctx = RunContext::default();
        let stopper = {
            let ctx = ctx.clone();
            Lambda::new("stopper", move |state: State| {
                if state.min_energy() >= Some(2.0) {
                    ctx.stop();
                }
                Ok(state)
            })
        };
        let body = crate::Branch::new().then(AddEnergy(1.0)).then(stopper);
        let out = Loop::new(body).next(state_with_energy(0.0).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![2.0]);
    }

    #[tokio::test]
    async fn until_no_improvement_halts_on_patience() {
        let ctx = RunContext::default();
        let body = Arc::new(Scripted::new([10.0, 9.0, 9.0, 9.0, 1.0]));
        let out = LoopUntilNoImprovement::from_shared(body.clone())
            .with_patience(2)
            .next(State::new().into(), &ctx)
            .await
            .unwrap();

        assert_eq!(body.calls(), 4);
        let best = out.as_state().unwrap();
        assert_eq!(best.min_energy(), Some(9.0));
        assert_eq!(best.info().get("call"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn until_no_improvement_resets_on_improvement() {
        let ctx = RunContext::default();
        let body = Arc::new(Scripted::new([5.0, 5.0, 4.0, 4.0, 4.0]));
        let out = LoopUntilNoImprovement::from_shared(body.clone())
            .with_patience(2)
            .with_max_iter(50)
            .next(State::new().into(), &ctx)
            .await
            .unwrap();
        assert_eq!(body.calls(), 5);
        assert_eq!(min_energies_of(&out), vec![Some(4.0)]);
    }

    #[tokio::test]
    async fn while_no_improvement_stops_at_first_improvement() {
        let ctx = RunContext::default();
        let body = Arc::new(Scripted::new([7.0, 6.0, 3.0, 1.0]));
        let out = LoopWhileNoImprovement::from_shared(body.clone())
            .with_max_tries(5)
            .next(state_with_energy(4.0).into(), &ctx)
            .await
            .unwrap();
        assert_eq!(body.calls(), 3);
        assert_eq!(min_energies_of(&out), vec![Some(3.0)]);
    }

    #[tokio::test]
    async fn while_no_improvement_returns_baseline_when_exhausted() {
        let ctx = RunContext::default();
        let body = Arc::new(Scripted::new([7.0]));
        let out = LoopWhileNoImprovement::from_shared(body.clone())
            .with_max_tries(3)
            .next(state_with_energy(4.0).into(), &ctx)
            .await
            .unwrap();
        assert_eq!(body.calls(), 3);
        assert_eq!(min_energies_of(&out), vec![Some(4.0)]);
    }

    #[tokio::test]
    async fn unwind_records_history() {
        let ctx = RunContext::default();
        let out = Unwind::new(AddEnergy(1.0))
            .with_max_iter(4)
            .next(state_with_energy(0.0).into(), &ctx)
            .await
            .unwrap();
        assert_eq!(energies_of(&out), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn unwind_requires_single_states() {
        let ctx = RunContext::default();
        let split = Lambda::data("split", |data| Ok(Data::from(data.into_vec())));
        let err = Unwind::new(split)
            .with_max_iter(2)
            .next(State::new().into(), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, HybridError::InvalidInput { .. }));
    }
}
