//! Testing utilities for hybrid workspace
//!
//! Shared state builders and leaf runnables with scripted behaviour.

#![allow(missing_docs)]

use async_trait::async_trait;
use hybrid_core::{Data, HybridError, HybridResult, RunContext, Runnable, Sample, SampleSet, State};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// State whose samples carry `energies`, in order
pub fn state_with_energies(energies: &[f64]) -> State {
    State::new().with_samples(samples_with_energies(energies))
}

/// State holding a single sample of `energy`
pub fn state_with_energy(energy: f64) -> State {
    state_with_energies(&[energy])
}

pub fn samples_with_energies(energies: &[f64]) -> SampleSet {
    energies
        .iter()
        .enumerate()
        .map(|(i, &e)| Sample::new(vec![i as i64], e))
        .collect()
}

/// Sample energies of every state held by `data`, flattened in order
pub fn energies_of(data: &Data) -> Vec<f64> {
    data.states()
        .into_iter()
        .flat_map(|s| s.samples().energies())
        .collect()
}

/// Best energy of each state held by `data`
pub fn min_energies_of(data: &Data) -> Vec<Option<f64>> {
    data.states().into_iter().map(State::min_energy).collect()
}

/// Install a test-friendly tracing subscriber once per process
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

fn replace_energy(state: State, energy: f64) -> State {
    state.with_samples(samples_with_energies(&[energy]))
}

/// Emits one scripted energy per call, repeating the last once exhausted
#[derive(Debug)]
pub struct Scripted {
    energies: Vec<f64>,
    cursor: AtomicUsize,
}

impl Scripted {
    pub fn new(energies: impl Into<Vec<f64>>) -> Self {
        Self {
            energies: energies.into(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Runnable for Scripted {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let state = input.into_state("Scripted")?;
        let call = self.cursor.fetch_add(1, Ordering::SeqCst);
        let energy = self
            .energies
            .get(call)
            .or_else(|| self.energies.last())
            .copied()
            .ok_or_else(|| HybridError::runnable("Scripted", "empty script"))?;

        Ok(replace_energy(state, energy)
            .with_info_entry("call", call)
            .into())
    }
}

/// Cooperative delay; returns `Cancelled` if stopped while waiting
#[derive(Debug)]
pub struct Delayed {
    delay: Duration,
    energy: Option<f64>,
    label: String,
}

impl Delayed {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            energy: None,
            label: "Delayed".to_string(),
        }
    }

    pub fn millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Replace samples with a single sample of `energy` on completion
    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[async_trait]
impl Runnable for Delayed {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn next(&self, input: Data, ctx: &RunContext) -> HybridResult<Data> {
        // An elapsed delay wins over a stop that arrives at the same time
        tokio::select! {
            biased;
            () = tokio::time::sleep(self.delay) => {}
            () = ctx.cancelled() => return Err(HybridError::Cancelled),
        }
        let state = input.into_state(&self.label)?;
        let state = match self.energy {
            Some(energy) => replace_energy(state, energy),
            None => state,
        };
        Ok(state.with_info_entry("finished_by", self.label.as_str()).into())
    }
}

/// Ignores cancellation and always runs for its full delay
#[derive(Debug)]
pub struct Stubborn {
    delay: Duration,
    energy: f64,
}

impl Stubborn {
    pub fn new(delay: Duration, energy: f64) -> Self {
        Self { delay, energy }
    }
}

#[async_trait]
impl Runnable for Stubborn {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        tokio::time::sleep(self.delay).await;
        let state = input.into_state("Stubborn")?;
        Ok(replace_energy(state, self.energy).into())
    }
}

/// Fails after an optional delay
#[derive(Debug)]
pub struct Failing {
    message: String,
    delay: Duration,
}

impl Failing {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Runnable for Failing {
    async fn next(&self, _input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Err(HybridError::runnable("Failing", self.message.clone()))
    }
}

/// Adds a constant to every sample energy
#[derive(Debug, Clone, Copy)]
pub struct AddEnergy(pub f64);

#[async_trait]
impl Runnable for AddEnergy {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let mut state = input.into_state("AddEnergy")?;
        for sample in state.samples_mut().make_mut() {
            sample.energy += self.0;
        }
        Ok(state.into())
    }
}

/// Appends a label to `info["trail"]`
#[derive(Debug, Clone)]
pub struct Tag(pub &'static str);

#[async_trait]
impl Runnable for Tag {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let mut state = input.into_state("Tag")?;
        state.info_mut().push("trail", self.0);
        Ok(state.into())
    }
}
