//! Racing fan-out with early termination

use crate::branches::FanIn;
use crate::fanout::{distribute, Completion, FanOut};
use async_trait::async_trait;
use hybrid_core::{
    BranchFailure, Data, FailurePolicy, HybridError, HybridResult, RunContext, Runnable, SharedRunnable,
    State,
};
use std::sync::Arc;
use std::time::Duration;

/// Runs children concurrently and finishes with the first one to complete
///
/// The decisive child is picked by completion order; children that complete
/// together are ordered by declared index. Every other child is then
/// stopped and given a grace period to finish. Late finishers still
/// contribute to the fan-in after the decisive output; children that
/// outlive the grace period are abandoned.
///
/// Input routing follows [`Branches`](crate::Branches).
#[derive(Debug, Clone, Default)]
pub struct RacingBranches {
    children: Vec<SharedRunnable>,
    fan_in: FanIn,
    policy: Option<FailurePolicy>,
    grace: Option<Duration>,
}

impl RacingBranches {
    /// Create empty race
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contender
    #[must_use]
    pub fn add(self, child: impl Runnable + 'static) -> Self {
        self.add_shared(Arc::new(child))
    }

    /// Add an already shared contender
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

    /// With grace period for losers, overriding the configured default
    #[inline]
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    /// Number of contenders
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Check if there are no contenders
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

/// Bookkeeping for one race
struct Race<'a> {
    owner: &'a str,
    policy: FailurePolicy,
    decisive: Option<(usize, Data)>,
    late: Vec<(usize, Data)>,
    failures: Vec<BranchFailure>,
    first_error: Option<HybridError>,
}

impl Race<'_> {
    /// Account for one completion; returns the error to raise, if any
    fn observe(&mut self, fanout: &FanOut, completion: Completion) -> Option<HybridError> {
        let Completion { index, result } = completion;
        match result {
            Ok(data) if self.decisive.is_none() => {
                tracing::debug!(owner = self.owner, index, "decisive branch finished");
                self.decisive = Some((index, data));
            }
            Ok(data) => self.late.push((index, data)),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(owner = self.owner, index, "branch acknowledged stop");
            }
            Err(e) if self.decisive.is_none() && self.policy == FailurePolicy::FailFast => {
                tracing::debug!(owner = self.owner, index, error = %e, "decisive branch failed");
                return Some(e);
            }
            Err(e) => {
                tracing::warn!(owner = self.owner, index, error = %e, "racing branch failed");
                self.failures.push(BranchFailure::new(index, fanout.name(index), &e));
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
        }
        None
    }
}

#[async_trait]
impl Runnable for RacingBranches {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let owner = self.name();
        if self.children.is_empty() {
            return Err(HybridError::invalid_input(owner, "no branches to race"));
        }

        let inputs = distribute(&owner, input, self.children.len(), true)?;
        let grace = self.grace.unwrap_or_else(|| ctx.config().race_grace_period());
        let mut race = Race {
            owner: &owner,
            policy: self.policy.unwrap_or(ctx.config().failure_policy),
            decisive: None,
            late: Vec::new(),
            failures: Vec::new(),
            first_error: None,
        };

        let mut fanout = FanOut::start(ctx, self.children.iter().cloned().zip(inputs), None);

        // Decide: everything already finished when the first completion is
        // observed is ranked by declared index.
        while race.decisive.is_none() {
            let first = tokio::select! {
                biased;
                first = fanout.next() => first,
                () = ctx.cancelled() => {
                    tracing::debug!(owner = %owner, "race stopped before a decision");
                    None
                }
            };
            let Some(first) = first else {
                break;
            };
            let mut batch = vec![first];
            while let Some(more) = fanout.try_next() {
                batch.push(more);
            }
            batch.sort_by_key(|c| c.index);

            for completion in batch {
                if let Some(e) = race.observe(&fanout, completion) {
                    fanout.stop_all();
                    let _ = fanout.collect_within(grace).await;
                    fanout.abandon(&owner);
                    return Err(e);
                }
            }
        }

        // Stop the losers, or everyone if the race itself was stopped, and
        // keep whoever finishes within the grace period
        if fanout.outstanding() > 0 {
            fanout.stop_all();
            for completion in fanout.collect_within(grace).await {
                if let Some(e) = race.observe(&fanout, completion) {
                    fanout.abandon(&owner);
                    return Err(e);
                }
            }
        }
        let abandoned = fanout.abandon(&owner);

        let Some((decisive_index, decisive)) = race.decisive.take() else {
            return Err(match race.first_error.take() {
                Some(first) => HybridError::AllFailed {
                    count: race.failures.len(),
                    first: Box::new(first),
                },
                None => HybridError::Cancelled,
            });
        };

        race.late.sort_by_key(|(index, _)| *index);
        tracing::debug!(
            owner = %owner,
            decisive = decisive_index,
            late = race.late.len(),
            abandoned,
            "race finished"
        );

        let outputs: Vec<State> = std::iter::once(decisive)
            .chain(race.late.into_iter().map(|(_, data)| data))
            .flat_map(Data::into_vec)
            .collect();
        race.failures.sort_by_key(|f| f.index);
        self.fan_in.apply(outputs, race.failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::Const;
    use hybrid_test_utils::{energies_of, samples_with_energies, state_with_energy, Delayed, Failing, Stubborn};
    use std::time::Instant;

    #[tokio::test(flavor = "multi_thread")]
    async fn first_finisher_is_decisive() {
        let ctx = RunContext::default();
        let race = RacingBranches::new()
            .add(Delayed::millis(2_000).with_energy(1.0).with_label("slow"))
            .add(Delayed::millis(10).with_energy(2.0).with_label("fast"));

        let out = race.next(state_with_energy(9.0).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![2.0]);
        assert_eq!(
            out.as_state().unwrap().info().get("finished_by"),
            Some(&serde_json::json!("fast"))
        );
        assert_eq!(ctx.profile().get("fast").unwrap().calls, 1);
    }

    #[tokio::test]
    async fn simultaneous_finishers_rank_by_declared_index() {
        let ctx = RunContext::default();
        let race = RacingBranches::new()
            .add(Const::new(samples_with_energies(&[2.0])))
            .add(Const::new(samples_with_energies(&[1.0])))
            .with_fan_in(FanIn::Collect);

        let out = race.next(state_with_energy(9.0).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![2.0, 1.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stubborn_loser_is_abandoned_after_grace() {
        let ctx = RunContext::default();
        let race = RacingBranches::new()
            .add(Delayed::millis(10).with_energy(1.0))
            .add(Stubborn::new(Duration::from_secs(3), 0.0))
            .with_grace_period(Duration::from_millis(50));

        let started = Instant::now();
        let out = race.next(state_with_energy(9.0).into(), &ctx).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(energies_of(&out), vec![1.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn late_finisher_within_grace_contributes() {
        let ctx = RunContext::default();
        let race = RacingBranches::new()
            .add(Stubborn::new(Duration::from_millis(60), 5.0))
            .add(Delayed::millis(10).with_energy(1.0))
            .with_grace_period(Duration::from_millis(1_000));

        let out = race.next(state_with_energy(9.0).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![1.0, 5.0]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_decisive_branch_is_raised() {
        let ctx = RunContext::default();
        let race = RacingBranches::new()
            .add(Failing::new("crashed").after(Duration::from_millis(5)))
            .add(Delayed::millis(2_000).with_energy(1.0));

        let err = race.next(state_with_energy(9.0).into(), &ctx).await.unwrap_err();
        assert!(matches!(err, HybridError::Runnable { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn best_effort_skips_failures() {
        let ctx = RunContext::default();
        let race = RacingBranches::new()
            .add(Failing::new("crashed"))
            .add(Delayed::millis(20).with_energy(1.0))
            .with_failure_policy(FailurePolicy::BestEffort);

        let out = race.next(state_with_energy(9.0).into(), &ctx).await.unwrap();
        assert_eq!(energies_of(&out), vec![1.0]);
        assert!(out.as_state().unwrap().info().get("failures").is_some());

        let all_fail = RacingBranches::new()
            .add(Failing::new("a"))
            .add(Failing::new("b"))
            .with_failure_policy(FailurePolicy::BestEffort);
        let err = all_fail.next(State::new().into(), &ctx).await.unwrap_err();
        assert!(matches!(err, HybridError::AllFailed { count: 2, .. }));
    }
}
