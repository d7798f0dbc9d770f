//! Runnable contract
//!
//! Every building block, leaf or composite, implements [`Runnable`]. A
//! runnable is started with [`RunnableExt::run`] (or [`RunContext::spawn`]
//! from inside a composite), which returns a [`RunHandle`] that can be
//! stopped and awaited.
//!
//! Cancellation is cooperative: [`RunHandle::stop`] only cancels a token.
//! Implementations observe it through [`RunContext::is_cancelled`] at their
//! own suspension points and are never forcibly interrupted.

use crate::config::FlowConfig;
use crate::error::{HybridError, HybridResult};
use crate::profile::ExecutionProfile;
use crate::state::Data;
use async_trait::async_trait;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::Instrument;

/// Shared, type-erased runnable as held by composites
pub type SharedRunnable = Arc<dyn Runnable>;

/// Readable name of a type, without its module path
#[must_use]
pub fn short_type_name<T: ?Sized>() -> String {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Composable unit of execution
///
/// Implementations consume one [`Data`] value and produce another. They
/// must not mutate state they did not create; input is passed by value, so
/// each runnable owns what it receives.
#[async_trait]
pub trait Runnable: Send + Sync + fmt::Debug {
    /// Name used in logs, errors and profiles
    fn name(&self) -> String {
        short_type_name::<Self>()
    }

    /// Produce the next value from `input`
    ///
    /// # Errors
    /// Implementation-defined; leaves that observe cancellation may return
    /// `HybridError::Cancelled`
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data>;
}

#[async_trait]
impl<R: Runnable + ?Sized> Runnable for Arc<R> {
    fn name(&self) -> String {
        (**self).name()
    }

    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        (**self).next(input, ctx).await
    }
}

#[async_trait]
impl<R: Runnable + ?Sized> Runnable for Box<R> {
    fn name(&self) -> String {
        (**self).name()
    }

    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        (**self).next(input, ctx).await
    }
}

/// Execution context handed to every runnable
///
/// Carries the cancellation token of the current subtree plus the
/// configuration and profile of the root run.
#[derive(Debug, Clone)]
pub struct RunContext {
    token: CancellationToken,
    config: Arc<FlowConfig>,
    profile: Arc<ExecutionProfile>,
}

impl RunContext {
    /// Create root context
    #[must_use]
    pub fn new(config: FlowConfig) -> Self {
        Self {
            token: CancellationToken::new(),
            config: Arc::new(config),
            profile: Arc::new(ExecutionProfile::new()),
        }
    }

    /// Use a caller-owned profile
    #[inline]
    #[must_use]
    pub fn with_profile(mut self, profile: Arc<ExecutionProfile>) -> Self {
        self.profile = profile;
        self
    }

    /// Use a caller-owned cancellation token
    #[inline]
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Flow configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Execution profile shared by the whole run
    #[inline]
    #[must_use]
    pub fn profile(&self) -> &Arc<ExecutionProfile> {
        &self.profile
    }

    /// Cancellation token of this context
    #[inline]
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Derive a context for a subtree
    ///
    /// Cancelling `self` cancels the child; cancelling the child leaves
    /// `self` untouched.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            config: Arc::clone(&self.config),
            profile: Arc::clone(&self.profile),
        }
    }

    /// Check if this context was stopped
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until this context is stopped
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    /// Stop this context and every context derived from it
    #[inline]
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Run `runnable` to completion in the current task
    ///
    /// Opens a `runnable` span and records the call in the profile.
    ///
    /// # Errors
    /// Whatever `runnable` returns
    pub async fn execute<R: Runnable + ?Sized>(&self, runnable: &R, input: Data) -> HybridResult<Data> {
        let name = runnable.name();
        let span = tracing::info_span!("runnable", name = %name);

        async {
            tracing::debug!(input = input.shape(), "started");
            let started = Instant::now();
            let result = runnable.next(input, self).await;
            let elapsed = started.elapsed();

            self.profile.record(&name, elapsed, result.is_err());
            match &result {
                Ok(output) => {
                    tracing::debug!(
                        output = output.shape(),
                        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                        "finished"
                    );
                }
                Err(e) if e.is_cancelled() => tracing::debug!("cancelled"),
                Err(e) => tracing::debug!(error = %e, "failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Start `runnable` on its own task under a child context
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(&self, runnable: SharedRunnable, input: Data) -> RunHandle {
        self.spawn_inner(runnable, input, None)
    }

    /// Start `runnable` once a permit from `limit` is available
    ///
    /// A stop that arrives while waiting for the permit completes the task
    /// with `Cancelled` without running `runnable`.
    #[must_use]
    pub fn spawn_limited(&self, runnable: SharedRunnable, input: Data, limit: Arc<Semaphore>) -> RunHandle {
        self.spawn_inner(runnable, input, Some(limit))
    }

    fn spawn_inner(&self, runnable: SharedRunnable, input: Data, limit: Option<Arc<Semaphore>>) -> RunHandle {
        let ctx = self.child();
        let token = ctx.token.clone();
        let name = runnable.name();

        let task = tokio::spawn(async move {
            let _permit = match limit {
                Some(semaphore) => {
                    let acquired = tokio::select! {
                        biased;
                        () = ctx.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    match acquired {
                        Some(permit) => Some(permit),
                        None => return Err(HybridError::Cancelled),
                    }
                }
                None => None,
            };
            ctx.execute(&*runnable, input).await
        });

        RunHandle { name, task, token }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}

/// Handle to an in-flight execution
///
/// Owned by whoever started the execution. Dropping an unfinished handle
/// detaches the task; its eventual result is discarded.
#[derive(Debug)]
pub struct RunHandle {
    name: String,
    task: JoinHandle<HybridResult<Data>>,
    token: CancellationToken,
}

impl RunHandle {
    /// Name of the running runnable
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request cooperative cancellation
    ///
    /// Idempotent and non-blocking; a no-op once the run has finished.
    #[inline]
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Check if stop was requested
    #[inline]
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Check if the task has finished
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Token that stops this run
    #[inline]
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the result
    ///
    /// # Errors
    /// - The runnable's own error
    /// - `Panicked` if the task panicked
    pub async fn result(self) -> HybridResult<Data> {
        join_result(&self.name, self.task.await)
    }

    /// Wait for the result for at most `limit`
    ///
    /// On expiry the task is detached, not aborted.
    ///
    /// # Errors
    /// - `Timeout` if `limit` elapsed first
    /// - Otherwise as [`RunHandle::result`]
    pub async fn result_timeout(self, limit: Duration) -> HybridResult<Data> {
        match tokio::time::timeout(limit, self.task).await {
            Ok(joined) => join_result(&self.name, joined),
            Err(_) => Err(HybridError::Timeout {
                operation: self.name,
                duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

fn join_result(
    name: &str,
    joined: Result<HybridResult<Data>, tokio::task::JoinError>,
) -> HybridResult<Data> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(HybridError::Panicked {
            runnable: name.to_string(),
            message: panic_message(e.into_panic()),
        }),
        Err(_) => Err(HybridError::Cancelled),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Start a runnable from outside any composite
pub trait RunnableExt: Runnable + Sized + 'static {
    /// Start with default configuration
    fn run(self, input: impl Into<Data>) -> RunHandle {
        self.run_with(input, RunContext::default())
    }

    /// Start under `ctx`
    ///
    /// The run gets a child of `ctx`, so stopping `ctx` stops the run.
    fn run_with(self, input: impl Into<Data>, ctx: RunContext) -> RunHandle {
        ctx.spawn(Arc::new(self), input.into())
    }
}

impl<R: Runnable + Sized + 'static> RunnableExt for R {}
