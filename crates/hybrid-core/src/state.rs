//! Pipeline state
//!
//! [`State`] is the value flowing through a composition graph: a shared,
//! read-only [`Problem`] reference, a [`SampleSet`] and auxiliary [`Info`].
//! [`States`] is an ordered list of states, and [`Data`] is what a runnable
//! consumes and produces: either one state or many.

use crate::error::{HybridError, HybridResult};
use crate::info::Info;
use crate::sample::SampleSet;
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

/// Opaque, shared handle to the problem instance being solved
///
/// The problem is owned by the collaborator that defines it; the engine only
/// shares it between branches and never mutates it.
#[derive(Clone)]
pub struct Problem {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Problem {
    /// Wrap a problem instance
    #[must_use]
    pub fn new<T: Any + Send + Sync>(problem: T) -> Self {
        Self::from_arc(Arc::new(problem))
    }

    /// Wrap an already shared problem instance
    #[must_use]
    pub fn from_arc<T: Any + Send + Sync>(problem: Arc<T>) -> Self {
        Self {
            inner: problem,
            type_name: type_name::<T>(),
        }
    }

    /// Typed read-only access
    #[inline]
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Check whether both handles point at the same instance
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Problem) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Problem").field(&self.type_name).finish()
    }
}

/// The unit of data flowing through a pipeline
///
/// Cloning yields an independent copy; the problem reference stays shared.
#[derive(Debug, Clone, Default)]
pub struct State {
    problem: Option<Problem>,
    samples: SampleSet,
    info: Info,
}

impl State {
    /// Create an empty state with no problem attached
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a state for a problem instance
    #[must_use]
    pub fn from_problem<T: Any + Send + Sync>(problem: T) -> Self {
        Self::new().with_problem(Problem::new(problem))
    }

    /// Attach a problem reference
    #[inline]
    #[must_use]
    pub fn with_problem(mut self, problem: Problem) -> Self {
        self.problem = Some(problem);
        self
    }

    /// Replace samples
    #[inline]
    #[must_use]
    pub fn with_samples(mut self, samples: SampleSet) -> Self {
        self.samples = samples;
        self
    }

    /// Replace metadata
    #[inline]
    #[must_use]
    pub fn with_info(mut self, info: Info) -> Self {
        self.info = info;
        self
    }

    /// Attach a single metadata entry
    #[inline]
    #[must_use]
    pub fn with_info_entry(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.info.insert(key, value);
        self
    }

    /// Problem reference, if any
    #[inline]
    #[must_use]
    pub fn problem(&self) -> Option<&Problem> {
        self.problem.as_ref()
    }

    /// Typed problem access
    #[inline]
    #[must_use]
    pub fn problem_as<T: Any>(&self) -> Option<&T> {
        self.problem.as_ref().and_then(|p| p.downcast_ref::<T>())
    }

    /// Samples
    #[inline]
    #[must_use]
    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    /// Mutable samples
    #[inline]
    pub fn samples_mut(&mut self) -> &mut SampleSet {
        &mut self.samples
    }

    /// Metadata
    #[inline]
    #[must_use]
    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Mutable metadata
    #[inline]
    pub fn info_mut(&mut self) -> &mut Info {
        &mut self.info
    }

    /// Energy of the best sample, if any
    #[inline]
    #[must_use]
    pub fn min_energy(&self) -> Option<f64> {
        self.samples.first().map(|s| s.energy)
    }
}

/// A failed element recorded by a best-effort fan-out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchFailure {
    /// Position of the failed child or element
    pub index: usize,
    /// Name of the runnable that failed
    pub runnable: String,
    /// Failure description
    pub message: String,
}

impl BranchFailure {
    /// Create failure marker
    #[inline]
    pub fn new(index: usize, runnable: impl Into<String>, error: &HybridError) -> Self {
        Self {
            index,
            runnable: runnable.into(),
            message: error.to_string(),
        }
    }
}

/// Ordered list of states
#[derive(Debug, Clone, Default)]
pub struct States {
    items: Vec<State>,
    failures: Vec<BranchFailure>,
}

impl States {
    /// Create empty list
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of states
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if list is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append a state
    #[inline]
    pub fn push(&mut self, state: State) {
        self.items.push(state);
    }

    /// Get state by position
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&State> {
        self.items.get(index)
    }

    /// Iterate states in order
    pub fn iter(&self) -> std::slice::Iter<'_, State> {
        self.items.iter()
    }

    /// States as a slice
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[State] {
        &self.items
    }

    /// States as a mutable slice
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [State] {
        &mut self.items
    }

    /// Consume into the underlying vector
    #[inline]
    #[must_use]
    pub fn into_vec(self) -> Vec<State> {
        self.items
    }

    /// Failure markers recorded by a best-effort fan-out
    #[inline]
    #[must_use]
    pub fn failures(&self) -> &[BranchFailure] {
        &self.failures
    }

    /// Record a failure marker
    #[inline]
    pub fn record_failure(&mut self, failure: BranchFailure) {
        self.failures.push(failure);
    }
}

impl From<Vec<State>> for States {
    fn from(items: Vec<State>) -> Self {
        Self {
            items,
            failures: Vec::new(),
        }
    }
}

impl FromIterator<State> for States {
    fn from_iter<I: IntoIterator<Item = State>>(iter: I) -> Self {
        States::from(iter.into_iter().collect::<Vec<_>>())
    }
}

impl IntoIterator for States {
    type Item = State;
    type IntoIter = std::vec::IntoIter<State>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a States {
    type Item = &'a State;
    type IntoIter = std::slice::Iter<'a, State>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Value consumed and produced by runnables
#[derive(Debug, Clone)]
pub enum Data {
    /// A single state
    One(State),
    /// An ordered list of states
    Many(States),
}

impl Data {
    /// Shape name, for diagnostics
    #[inline]
    #[must_use]
    pub fn shape(&self) -> &'static str {
        match self {
            Data::One(_) => "one state",
            Data::Many(_) => "many states",
        }
    }

    /// Unwrap a single state
    ///
    /// # Errors
    /// `InvalidInput` naming `runnable` if this holds many states
    pub fn into_state(self, runnable: &str) -> HybridResult<State> {
        match self {
            Data::One(state) => Ok(state),
            Data::Many(states) => Err(HybridError::invalid_input(
                runnable,
                format!("expected one state, got {} states", states.len()),
            )),
        }
    }

    /// Unwrap a list of states
    ///
    /// # Errors
    /// `InvalidInput` naming `runnable` if this holds a single state
    pub fn into_states(self, runnable: &str) -> HybridResult<States> {
        match self {
            Data::Many(states) => Ok(states),
            Data::One(_) => Err(HybridError::invalid_input(
                runnable,
                "expected many states, got one state",
            )),
        }
    }

    /// Borrow the single state, if this holds one
    #[inline]
    #[must_use]
    pub fn as_state(&self) -> Option<&State> {
        match self {
            Data::One(state) => Some(state),
            Data::Many(_) => None,
        }
    }

    /// Borrow the list, if this holds many states
    #[inline]
    #[must_use]
    pub fn as_states(&self) -> Option<&States> {
        match self {
            Data::Many(states) => Some(states),
            Data::One(_) => None,
        }
    }

    /// Every state held, in order
    #[must_use]
    pub fn states(&self) -> Vec<&State> {
        match self {
            Data::One(state) => vec![state],
            Data::Many(states) => states.iter().collect(),
        }
    }

    /// Consume into every state held, in order
    ///
    /// Failure markers of a `Many` value are dropped.
    #[must_use]
    pub fn into_vec(self) -> Vec<State> {
        match self {
            Data::One(state) => vec![state],
            Data::Many(states) => states.into_vec(),
        }
    }
}

impl From<State> for Data {
    fn from(state: State) -> Self {
        Data::One(state)
    }
}

impl From<States> for Data {
    fn from(states: States) -> Self {
        Data::Many(states)
    }
}

impl From<Vec<State>> for Data {
    fn from(states: Vec<State>) -> Self {
        Data::Many(States::from(states))
    }
}
