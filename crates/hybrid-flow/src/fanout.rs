//! Concurrent child execution shared by the fan-out primitives
//!
//! Each child runs on its own task under a child context, so a stop on the
//! parent reaches every child while stopping one child leaves its siblings
//! running. Results are observed in completion order.

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use hybrid_core::{
    BranchFailure, Data, FailurePolicy, HybridError, HybridResult, RunContext, SharedRunnable, State,
    States,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A finished child
pub(crate) struct Completion {
    pub(crate) index: usize,
    pub(crate) result: HybridResult<Data>,
}

/// Set of running children
pub(crate) struct FanOut {
    names: Vec<String>,
    tokens: Vec<CancellationToken>,
    pending: FuturesUnordered<BoxFuture<'static, Completion>>,
}

impl FanOut {
    /// Start one task per `(runnable, input)` job
    pub(crate) fn start(
        ctx: &RunContext,
        jobs: impl IntoIterator<Item = (SharedRunnable, Data)>,
        limit: Option<Arc<Semaphore>>,
    ) -> Self {
        let mut names = Vec::new();
        let mut tokens = Vec::new();
        let pending = FuturesUnordered::new();

        for (index, (runnable, input)) in jobs.into_iter().enumerate() {
            let handle = match &limit {
                Some(semaphore) => ctx.spawn_limited(runnable, input, Arc::clone(semaphore)),
                None => ctx.spawn(runnable, input),
            };
            names.push(handle.name().to_string());
            tokens.push(handle.stop_token());
            pending.push(
                async move {
                    Completion {
                        index,
                        result: handle.result().await,
                    }
                }
                .boxed(),
            );
        }

        Self {
            names,
            tokens,
            pending,
        }
    }

    /// Number of children started
    pub(crate) fn len(&self) -> usize {
        self.names.len()
    }

    /// Name of the child at `index`
    pub(crate) fn name(&self, index: usize) -> &str {
        self.names.get(index).map_or("unknown", String::as_str)
    }

    /// Number of children not yet observed
    pub(crate) fn outstanding(&self) -> usize {
        self.pending.len()
    }

    /// Wait for the next child to finish
    pub(crate) async fn next(&mut self) -> Option<Completion> {
        self.pending.next().await
    }

    /// Take a child that has already finished, without waiting
    pub(crate) fn try_next(&mut self) -> Option<Completion> {
        self.pending.next().now_or_never().flatten()
    }

    /// Stop every child
    pub(crate) fn stop_all(&self) {
        for token in &self.tokens {
            token.cancel();
        }
    }

    /// Collect children finishing before `grace` elapses
    ///
    /// Children still running afterwards are left to the caller.
    pub(crate) async fn collect_within(&mut self, grace: Duration) -> Vec<Completion> {
        let deadline = Instant::now() + grace;
        let mut finished = Vec::new();

        while !self.pending.is_empty() {
            match tokio::time::timeout_at(deadline, self.pending.next()).await {
                Ok(Some(completion)) => finished.push(completion),
                Ok(None) | Err(_) => break,
            }
        }
        finished
    }

    /// Detach every child still running, returning how many there were
    pub(crate) fn abandon(self, owner: &str) -> usize {
        let count = self.pending.len();
        if count > 0 {
            tracing::warn!(
                owner,
                abandoned = count,
                "children did not acknowledge stop within grace period, abandoning"
            );
        }
        count
    }

    /// Wait for every child, applying `policy` to failures
    ///
    /// Returns outputs indexed by child position. Children that acknowledged
    /// a stop leave `None` without counting as failures. A stop on `ctx`
    /// stops every child and waits at most `stop_grace` for them; whatever
    /// finished by then is kept and the rest is abandoned.
    ///
    /// # Errors
    /// - The first failure in completion order under `FailFast`
    /// - `AllFailed` if no child produced an output and at least one failed
    /// - `Cancelled` if no child produced an output and none failed
    pub(crate) async fn gather(
        mut self,
        ctx: &RunContext,
        owner: &str,
        policy: FailurePolicy,
        stop_grace: Duration,
    ) -> HybridResult<Gathered> {
        let mut tally = Tally::new(self.len());

        loop {
            let event = tokio::select! {
                biased;
                completion = self.pending.next() => completion,
                () = ctx.cancelled() => None,
            };
            let Some(completion) = event else {
                break;
            };
            if let Err(e) = tally.accept(&self, owner, policy, completion) {
                tracing::debug!(owner, error = %e, "child failed, stopping siblings");
                self.stop_all();
                let _ = self.collect_within(stop_grace).await;
                self.abandon(owner);
                return Err(e);
            }
        }

        if !self.pending.is_empty() {
            tracing::debug!(owner, outstanding = self.outstanding(), "stopped, waiting for children");
            self.stop_all();
            for completion in self.collect_within(stop_grace).await {
                // The run is over; late failures are recorded, never raised
                let _ = tally.accept(&self, owner, FailurePolicy::BestEffort, completion);
            }
            self.abandon(owner);
        }

        tally.finish()
    }
}

/// Outputs and failures observed so far by [`FanOut::gather`]
struct Tally {
    outputs: Vec<Option<Data>>,
    failures: Vec<(BranchFailure, HybridError)>,
}

impl Tally {
    fn new(children: usize) -> Self {
        Self {
            outputs: (0..children).map(|_| None).collect(),
            failures: Vec::new(),
        }
    }

    /// Record one completion; returns the error to raise under `FailFast`
    fn accept(
        &mut self,
        fanout: &FanOut,
        owner: &str,
        policy: FailurePolicy,
        completion: Completion,
    ) -> HybridResult<()> {
        let Completion { index, result } = completion;
        match result {
            Ok(data) => self.outputs[index] = Some(data),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(owner, index, "child acknowledged stop");
            }
            Err(e) => match policy {
                FailurePolicy::FailFast => return Err(e),
                FailurePolicy::BestEffort => {
                    tracing::warn!(owner, index, error = %e, "child failed, continuing with survivors");
                    self.failures.push((BranchFailure::new(index, fanout.name(index), &e), e));
                }
            },
        }
        Ok(())
    }

    fn finish(mut self) -> HybridResult<Gathered> {
        let succeeded = self.outputs.iter().filter(|o| o.is_some()).count();
        if succeeded == 0 {
            if self.failures.is_empty() {
                return Err(HybridError::Cancelled);
            }
            let count = self.failures.len();
            let (_, first) = self.failures.swap_remove(0);
            return Err(HybridError::AllFailed {
                count,
                first: Box::new(first),
            });
        }

        self.failures.sort_by_key(|(failure, _)| failure.index);
        Ok(Gathered {
            outputs: self.outputs,
            failures: self.failures.into_iter().map(|(failure, _)| failure).collect(),
        })
    }
}

/// Outcome of [`FanOut::gather`]
pub(crate) struct Gathered {
    pub(crate) outputs: Vec<Option<Data>>,
    pub(crate) failures: Vec<BranchFailure>,
}

/// Split fan-out input into one input per child
///
/// A single state is copied to every child. With `per_child` set, a list
/// holding exactly one state per child feeds child `i` with state `i`.
pub(crate) fn distribute(owner: &str, input: Data, children: usize, per_child: bool) -> HybridResult<Vec<Data>> {
    match input {
        Data::One(state) => Ok(std::iter::repeat(state).take(children).map(Data::One).collect()),
        Data::Many(states) if per_child && states.len() == children => {
            Ok(states.into_iter().map(Data::One).collect())
        }
        Data::Many(states) if per_child => Err(HybridError::invalid_input(
            owner,
            format!("{} input states for {children} branches", states.len()),
        )),
        Data::Many(_) => Err(HybridError::invalid_input(owner, "expected one state, got many states")),
    }
}

/// Attach failure markers to a merged state
pub(crate) fn record_failures(state: &mut State, failures: &[BranchFailure]) {
    for failure in failures {
        state.info_mut().push(
            "failures",
            json!({
                "index": failure.index,
                "runnable": failure.runnable,
                "message": failure.message,
            }),
        );
    }
}

/// Attach failure markers to a collected list
pub(crate) fn record_failures_in(states: &mut States, failures: Vec<BranchFailure>) {
    for failure in failures {
        states.record_failure(failure);
    }
}
