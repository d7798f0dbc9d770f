//! Parallel fan-out / fan-in
//!
//! [`Branches`] runs every child concurrently and waits for all of them.
//! Fan-in always happens in declared order, so the result does not depend
//! on which child finished first.

use crate::fanout::{distribute, record_failures, record_failures_in, FanOut};
use async_trait::async_trait;
use hybrid_core::{
    BranchFailure, Data, FailurePolicy, HybridError, HybridResult, RunContext, Runnable, SampleSet,
    SharedRunnable, State, States,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Merge function reconciling branch outputs into one state
pub type MergeFn = Arc<dyn Fn(Vec<State>) -> HybridResult<State> + Send + Sync>;

/// Default merge: concatenate samples in argument order
///
/// Keeps the first state's problem reference and merges `info` additively,
/// earlier states winning on non-additive collisions.
///
/// # Errors
/// `EmptyInput` if `states` is empty
pub fn merge_samples(states: Vec<State>) -> HybridResult<State> {
    let mut iter = states.into_iter();
    let first = iter.next().ok_or(HybridError::EmptyInput {
        operation: "merge_samples",
    })?;

    let mut sets = vec![first.samples().clone()];
    let mut info = first.info().clone();
    for state in iter {
        info.merge(state.info());
        sets.push(state.samples().clone());
    }

    Ok(first.with_samples(SampleSet::concat(&sets)).with_info(info))
}

/// How branch outputs are combined
#[derive(Clone)]
pub enum FanIn {
    /// Reduce outputs to one state
    Merge(MergeFn),
    /// Keep every output as a list, in declared order
    Collect,
}

impl FanIn {
    /// Merge with a custom function
    #[must_use]
    pub fn merge<F>(func: F) -> Self
    where
        F: Fn(Vec<State>) -> HybridResult<State> + Send + Sync + 'static,
    {
        Self::Merge(Arc::new(func))
    }

    /// Apply to outputs already in fan-in order
    pub(crate) fn apply(&self, outputs: Vec<State>, failures: Vec<BranchFailure>) -> HybridResult<Data> {
        match self {
            FanIn::Merge(func) => {
                let mut merged = func(outputs)?;
                record_failures(&mut merged, &failures);
                Ok(Data::One(merged))
            }
            FanIn::Collect => {
                let mut states = States::from(outputs);
                record_failures_in(&mut states, failures);
                Ok(Data::Many(states))
            }
        }
    }
}

impl Default for FanIn {
    fn default() -> Self {
        Self::Merge(Arc::new(merge_samples))
    }
}

impl fmt::Debug for FanIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanIn::Merge(_) => f.write_str("Merge"),
            FanIn::Collect => f.write_str("Collect"),
        }
    }
}

/// Runs children concurrently, waits for all, then fans in
///
/// Input routing:
/// - One state: every child gets its own copy
/// - Many states, one per child: child `i` gets state `i`
///
/// Any other list length is rejected. [`Branches::parallel`] accepts only a
/// single input state.
#[derive(Debug, Clone, Default)]
pub struct Branches {
    children: Vec<SharedRunnable>,
    fan_in: FanIn,
    policy: Option<FailurePolicy>,
    stop_grace: Option<Duration>,
    single_input: bool,
}

impl Branches {
    /// Create empty fan-out
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create fan-out that copies one input state to every child
    #[inline]
    #[must_use]
    pub fn parallel() -> Self {
        Self {
            single_input: true,
            ..Self::default()
        }
    }

    /// Add a child
    #[must_use]
    pub fn add(self, child: impl Runnable + 'static) -> Self {
        self.add_shared(Arc::new(child))
    }

    /// Add an already shared child
    #[must_use]
    pub fn add_shared(mut self, child: SharedRunnable) -> Self {
        self.children.push(child);
        self
    }

    /// With fan-in strategy
    #[inline]
    #[must_use]
    pub fn with_fan_in(mut self, fan_in: FanIn) -> Self {
        self.fan_in = fan_in;
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

    /// Number of children
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Check if there are no children
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

#[async_trait]
impl Runnable for Branches {
    fn name(&self) -> String {
        if self.single_input {
            "ParallelBranches".to_string()
        } else {
            "Branches".to_string()
        }
    }

    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let name = self.name();
        if self.children.is_empty() {
            return Err(HybridError::invalid_input(name, "no branches to run"));
        }

        let inputs = distribute(&name, input, self.children.len(), !self.single_input)?;
        let policy = self.policy.unwrap_or(ctx.config().failure_policy);
        let stop_grace = self.stop_grace.unwrap_or_else(|| ctx.config().stop_grace_period());

        let fanout = FanOut::start(ctx, self.children.iter().cloned().zip(inputs), None);
        let gathered = fanout.gather(ctx, &name, policy, stop_grace).await?;

        let outputs: Vec<State> = gathered.outputs.into_iter().flatten().flat_map(Data::into_vec).collect();
        self.fan_in.apply(outputs, gathered.failures)
    }
}

/// Merges a list of states into one
///
/// Uses [`merge_samples`]; with `aggregate` set, samples sharing an
/// assignment are folded together afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeSamples {
    aggregate: bool,
}

impl MergeSamples {
    /// Create plain concatenating merge
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold duplicate samples after merging
    #[inline]
    #[must_use]
    pub fn aggregate(mut self) -> Self {
        self.aggregate = true;
        self
    }
}

#[async_trait]
impl Runnable for MergeSamples {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let states = input.into_states("MergeSamples")?;
        let merged = merge_samples(states.into_vec())?;
        if self.aggregate {
            let aggregated = merged.samples().aggregate();
            return Ok(merged.with_samples(aggregated).into());
        }
        Ok(merged.into())
    }
}
