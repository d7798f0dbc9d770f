//! Left fold over a state list

use async_trait::async_trait;
use hybrid_core::{Data, HybridError, HybridResult, RunContext, Runnable, SharedRunnable, State, States};
use std::fmt;
use std::sync::Arc;

type CombineFn = dyn Fn(State, State) -> HybridResult<State> + Send + Sync;

#[derive(Clone)]
enum Combiner {
    Func(Arc<CombineFn>),
    Runnable(SharedRunnable),
}

/// Folds a list of states into one, strictly left to right
///
/// `combine` is assumed associative but not commutative: the result over
/// `[a, b, c]` is always `combine(combine(a, b), c)`. Without an initial
/// state an empty list is an error. A stop between two combines abandons
/// the fold with `Cancelled`; a partial fold is never returned.
#[derive(Clone)]
pub struct Reduce {
    combiner: Combiner,
    initial: Option<State>,
}

impl Reduce {
    /// Fold with a binary function
    #[must_use]
    pub fn new<F>(combine: F) -> Self
    where
        F: Fn(State, State) -> HybridResult<State> + Send + Sync + 'static,
    {
        Self {
            combiner: Combiner::Func(Arc::new(combine)),
            initial: None,
        }
    }

    /// Fold with a runnable taking the pair as a two-state list
    #[must_use]
    pub fn with_runnable(combine: impl Runnable + 'static) -> Self {
        Self {
            combiner: Combiner::Runnable(Arc::new(combine)),
            initial: None,
        }
    }

    /// Start the fold from `initial`
    #[inline]
    #[must_use]
    pub fn with_initial(mut self, initial: State) -> Self {
        self.initial = Some(initial);
        self
    }

    async fn combine(&self, acc: State, item: State, ctx: &RunContext) -> HybridResult<State> {
        match &self.combiner {
            Combiner::Func(func) => func(acc, item),
            Combiner::Runnable(runnable) => {
                let pair = Data::Many(States::from(vec![acc, item]));
                ctx.execute(runnable.as_ref(), pair)
                    .await?
                    .into_state(&runnable.name())
            }
        }
    }
}

impl fmt::Debug for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let combiner = match &self.combiner {
            Combiner::Func(_) => "fn".to_string(),
            Combiner::Runnable(r) => r.name(),
        };
        f.debug_struct("Reduce")
            .field("combiner", &combiner)
            .field("initial", &self.initial.is_some())
            .finish()
    }
}

#[async_trait]
impl Runnable for Reduce {
    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        let mut states = input.into_states("Reduce")?.into_iter();

        let mut acc = match self.initial.clone() {
            Some(initial) => initial,
            None => states.next().ok_or(HybridError::EmptyInput { operation: "Reduce" })?,
        };

        for item in states {
            if ctx.is_cancelled() {
                tracing::debug!("reduce stopped before the fold completed");
                return Err(HybridError::Cancelled);
            }
            acc = self.combine(acc, item, ctx).await?;
        }

        Ok(Data::One(acc))
    }
}
