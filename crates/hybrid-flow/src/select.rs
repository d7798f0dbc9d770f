//! Selection and memoization of the best state
//!
//! Keys are `f64` values where lower is better, compared with
//! [`f64::total_cmp`] so every input has a defined position.

use async_trait::async_trait;
use hybrid_core::{Data, HybridError, HybridResult, RunContext, Runnable, State};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Comparison key over states
pub type Key = Arc<dyn Fn(&State) -> f64 + Send + Sync>;

/// Energy of the best sample, `+inf` for a state without samples
#[must_use]
pub fn min_energy(state: &State) -> f64 {
    state.min_energy().unwrap_or(f64::INFINITY)
}

/// Key ranking states by [`min_energy`]
#[must_use]
pub fn default_key() -> Key {
    Arc::new(min_energy)
}

/// Key over any input shape: the minimum over every state held
pub(crate) fn data_key(key: &Key, data: &Data) -> f64 {
    data.states()
        .into_iter()
        .map(|state| key(state))
        .min_by(f64::total_cmp)
        .unwrap_or(f64::INFINITY)
}

/// Position of the candidate minimizing `key`
///
/// Ties resolve to the earliest candidate.
///
/// # Errors
/// `EmptyInput` if `candidates` is empty
pub fn argmin<K>(candidates: &[State], key: K) -> HybridResult<usize>
where
    K: Fn(&State) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let value = key(candidate);
        match best {
            Some((_, current)) if value.total_cmp(&current) != Ordering::Less => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
        .ok_or(HybridError::EmptyInput { operation: "ArgMin" })
}

/// Selects the candidate minimizing a key from a list of states
#[derive(Clone)]
pub struct ArgMin {
    key: Key,
}

impl ArgMin {
    /// Select by [`min_energy`]
    #[must_use]
    pub fn new() -> Self {
        Self { key: default_key() }
    }

    /// Select by a custom key
    #[must_use]
    pub fn with_key<F>(key: F) -> Self
    where
        F: Fn(&State) -> f64 + Send + Sync + 'static,
    {
        Self { key: Arc::new(key) }
    }
}

impl Default for ArgMin {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArgMin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgMin").finish_non_exhaustive()
    }
}

#[async_trait]
impl Runnable for ArgMin {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let states = input.into_states("ArgMin")?;
        let index = argmin(states.as_slice(), |s| (self.key)(s))?;
        let selected = states
            .into_iter()
            .nth(index)
            .ok_or(HybridError::EmptyInput { operation: "ArgMin" })?;
        Ok(Data::One(selected))
    }
}

/// Best value seen across a sequence of observations
///
/// A candidate replaces the held best only on strict improvement, so ties
/// keep the earlier value.
#[derive(Debug, Clone)]
pub struct MinTracker<T = State> {
    best: Option<(f64, T)>,
    observed: usize,
    updates: Vec<usize>,
}

impl<T: Clone> MinTracker<T> {
    /// Create empty tracker
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            best: None,
            observed: 0,
            updates: Vec::new(),
        }
    }

    /// Offer a candidate with its key; returns whether it became the best
    pub fn update(&mut self, key: f64, candidate: &T) -> bool {
        let position = self.observed;
        self.observed += 1;

        let improves = match &self.best {
            None => true,
            Some((held, _)) => key.total_cmp(held) == Ordering::Less,
        };
        if improves {
            self.best = Some((key, candidate.clone()));
            self.updates.push(position);
        }
        improves
    }

    /// Held best, if any candidate was offered
    #[inline]
    #[must_use]
    pub fn best(&self) -> Option<&T> {
        self.best.as_ref().map(|(_, value)| value)
    }

    /// Key of the held best
    #[inline]
    #[must_use]
    pub fn best_key(&self) -> Option<f64> {
        self.best.as_ref().map(|(key, _)| *key)
    }

    /// Positions of the observations that replaced the best
    #[inline]
    #[must_use]
    pub fn updates(&self) -> &[usize] {
        &self.updates
    }

    /// Number of observations since the last reset
    #[inline]
    #[must_use]
    pub fn observed(&self) -> usize {
        self.observed
    }

    /// Forget everything
    pub fn reset(&mut self) {
        self.best = None;
        self.observed = 0;
        self.updates.clear();
    }

    /// Take the held best
    #[must_use]
    pub fn into_best(self) -> Option<T> {
        self.best.map(|(_, value)| value)
    }
}

impl<T: Clone> Default for MinTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembers the best state across invocations
///
/// Passes its input through, or emits the best state seen so far with
/// [`TrackMin::output_best`]. The held value persists until
/// [`TrackMin::reset`]; share one instance only with a single sequential
/// driver.
pub struct TrackMin {
    key: Key,
    output_best: bool,
    tracker: Mutex<MinTracker<State>>,
}

impl TrackMin {
    /// Track by [`min_energy`]
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: default_key(),
            output_best: false,
            tracker: Mutex::new(MinTracker::new()),
        }
    }

    /// Track by a custom key
    #[must_use]
    pub fn with_key<F>(mut self, key: F) -> Self
    where
        F: Fn(&State) -> f64 + Send + Sync + 'static,
    {
        self.key = Arc::new(key);
        self
    }

    /// Emit the best state instead of the input
    #[inline]
    #[must_use]
    pub fn output_best(mut self) -> Self {
        self.output_best = true;
        self
    }

    /// Best state seen so far
    #[must_use]
    pub fn best(&self) -> Option<State> {
        self.tracker.lock().best().cloned()
    }

    /// Key of the best state seen so far
    #[must_use]
    pub fn best_key(&self) -> Option<f64> {
        self.tracker.lock().best_key()
    }

    /// Positions of the invocations that replaced the best
    #[must_use]
    pub fn updates(&self) -> Vec<usize> {
        self.tracker.lock().updates().to_vec()
    }

    /// Forget the held best
    pub fn reset(&self) {
        self.tracker.lock().reset();
    }
}

impl Default for TrackMin {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TrackMin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackMin")
            .field("output_best", &self.output_best)
            .field("best_key", &self.best_key())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Runnable for TrackMin {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let state = input.into_state("TrackMin")?;
        let key = (self.key)(&state);

        let mut tracker = self.tracker.lock();
        if tracker.update(key, &state) {
            tracing::debug!(key, "new best state");
        }
        if self.output_best {
            if let Some(best) = tracker.best() {
                return Ok(Data::One(best.clone()));
            }
        }
        Ok(Data::One(state))
    }
}
