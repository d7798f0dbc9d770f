//! Parallel tempering workflows
//!
//! Replicas at fixed inverse temperatures are relaxed concurrently, then
//! adjacent replicas swap samples when the colder one would gain. Two
//! layouts are exercised: temperatures stored in each state and sampled
//! with `Map`, and temperatures owned by one `Branches` child per replica.

use async_trait::async_trait;
use hybrid_core::{
    Data, HybridError, HybridResult, RunContext, Runnable, RunnableExt, Sample, SampleSet, State, States,
};
use hybrid_flow::{min_energy, Branch, Branches, FanIn, Lambda, Loop, Map, MergeSamples};
use hybrid_test_utils::init_test_tracing;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TARGET: [i64; 8] = [1, -1, 1, 1, -1, 1, -1, -1];
const REPLICAS: usize = 4;
const ITERATIONS: usize = 10;

/// Toy problem: energy is the number of spins differing from the target
#[derive(Debug)]
struct Chain {
    target: Vec<i64>,
}

impl Chain {
    fn energy(&self, values: &[i64]) -> f64 {
        self.target.iter().zip(values).filter(|(t, v)| t != v).count() as f64
    }

    /// Align up to `flips` mismatched spins with the target
    fn relax(&self, sample: &Sample, flips: usize) -> Sample {
        let mut values = sample.values.clone();
        let mut remaining = flips;
        for (value, target) in values.iter_mut().zip(&self.target) {
            if remaining == 0 {
                break;
            }
            if value != target {
                *value = *target;
                remaining -= 1;
            }
        }
        let energy = self.energy(&values);
        Sample::new(values, energy)
    }
}

fn betas() -> Vec<f64> {
    let (hot, cold) = (0.5_f64, 3.0_f64);
    let ratio = (cold / hot).powf(1.0 / (REPLICAS as f64 - 1.0));
    (0..REPLICAS).map(|i| hot * ratio.powi(i as i32)).collect()
}

fn beta_of(state: &State) -> Option<f64> {
    state.info().get("beta").and_then(Value::as_f64)
}

fn initial_state() -> State {
    let chain = Chain {
        target: TARGET.to_vec(),
    };
    let start: Vec<i64> = TARGET.iter().map(|t| -t).collect();
    let energy = chain.energy(&start);
    State::from_problem(chain).with_samples(SampleSet::from(vec![Sample::new(start, energy)]))
}

/// Fixed-temperature update step
///
/// Uses its own temperature if it has one, otherwise the state's `beta`.
#[derive(Debug)]
struct FixedTemperatureSampler {
    beta: Option<f64>,
}

#[async_trait]
impl Runnable for FixedTemperatureSampler {
    async fn next(&self, input: Data, _ctx: &RunContext) -> HybridResult<Data> {
        let state = input.into_state("FixedTemperatureSampler")?;
        let beta = self
            .beta
            .or_else(|| beta_of(&state))
            .ok_or_else(|| HybridError::runnable("FixedTemperatureSampler", "no temperature"))?;
        let chain = state
            .problem_as::<Chain>()
            .ok_or_else(|| HybridError::runnable("FixedTemperatureSampler", "unexpected problem"))?;

        let flips = beta.ceil() as usize;
        let samples: SampleSet = state.samples().iter().map(|s| chain.relax(s, flips)).collect();
        Ok(state.with_samples(samples).into())
    }
}

fn accept_swap(beta_i: f64, beta_j: f64, energy_i: f64, energy_j: f64) -> bool {
    ((beta_i - beta_j) * (energy_i - energy_j)).min(0.0).exp() >= 1.0
}

/// Swap the samples of one adjacent replica pair, chosen round-robin
fn swap_replicas() -> Lambda {
    let cursor = AtomicUsize::new(0);
    Lambda::data("SwapReplicas", move |data| {
        let mut states = data.into_states("SwapReplicas")?;
        if states.len() < 2 {
            return Ok(states.into());
        }
        let i = cursor.fetch_add(1, Ordering::SeqCst) % (states.len() - 1);
        let pair = &mut states.as_mut_slice()[i..=i + 1];

        let betas = (beta_of(&pair[0]).unwrap_or(0.0), beta_of(&pair[1]).unwrap_or(0.0));
        if accept_swap(betas.0, betas.1, min_energy(&pair[0]), min_energy(&pair[1])) {
            let left = pair[0].samples().clone();
            let right = std::mem::replace(pair[1].samples_mut(), left);
            *pair[0].samples_mut() = right;
        }
        Ok(states.into())
    })
}

/// Sweep every adjacent pair, swapping whole replicas between branches
fn swap_sweep_down(betas: Vec<f64>) -> Lambda {
    Lambda::data("SwapReplicasSweepDown", move |data| {
        let mut states = data.into_states("SwapReplicasSweepDown")?;
        let slice = states.as_mut_slice();
        for i in 0..slice.len().saturating_sub(1) {
            if accept_swap(betas[i], betas[i + 1], min_energy(&slice[i]), min_energy(&slice[i + 1])) {
                slice.swap(i, i + 1);
            }
        }
        Ok(states.into())
    })
}

fn assert_converged(solution: &Data) {
    let state = solution.as_state().expect("merged solution");
    let best = state.samples().first().expect("at least one sample");
    assert_eq!(best.energy, 0.0);
    assert_eq!(best.values, TARGET.to_vec());

    let occurrences: u64 = state.samples().iter().map(|s| s.num_occurrences).sum();
    assert_eq!(occurrences, REPLICAS as u64);
    assert!(state.problem_as::<Chain>().is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_parallel_tempering_with_map() {
    init_test_tracing();

    let state = initial_state();
    let replicas: States = betas()
        .into_iter()
        .map(|beta| state.clone().with_info_entry("beta", beta))
        .collect();

    let update = Map::new(FixedTemperatureSampler { beta: None });
    let swap = Loop::new(swap_replicas()).with_max_iter(REPLICAS - 1);
    let workflow = Branch::new()
        .then(Loop::new(Branch::new().then(update).then(swap)).with_max_iter(ITERATIONS))
        .then(MergeSamples::new().aggregate());

    let ctx = RunContext::default();
    let solution = workflow.run_with(replicas, ctx.clone()).result().await.unwrap();
    assert_converged(&solution);

    let profile = ctx.profile();
    assert_eq!(profile.get("Map").unwrap().calls, ITERATIONS as u64);
    assert_eq!(
        profile.get("FixedTemperatureSampler").unwrap().calls,
        (ITERATIONS * REPLICAS) as u64
    );
    assert_eq!(
        profile.get("SwapReplicas").unwrap().calls,
        (ITERATIONS * (REPLICAS - 1)) as u64
    );
    assert!(profile.report().contains("MergeSamples"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_parallel_tempering_with_branches() {
    init_test_tracing();

    let betas = betas();
    let replicas: States = std::iter::repeat(initial_state()).take(REPLICAS).collect();

    let update = betas
        .iter()
        .fold(Branches::new().with_fan_in(FanIn::Collect), |branches, &beta| {
            branches.add(FixedTemperatureSampler { beta: Some(beta) })
        });
    let workflow = Branch::new()
        .then(
            Loop::new(Branch::new().then(update).then(swap_sweep_down(betas)))
                .with_max_iter(ITERATIONS),
        )
        .then(MergeSamples::new().aggregate());

    let ctx = RunContext::default();
    let solution = workflow.run_with(replicas, ctx.clone()).result().await.unwrap();
    assert_converged(&solution);

    let profile = ctx.profile();
    assert_eq!(profile.get("Branches").unwrap().calls, ITERATIONS as u64);
    assert_eq!(profile.get("SwapReplicasSweepDown").unwrap().calls, ITERATIONS as u64);
}

#[tokio::test]
async fn test_sampler_without_temperature_fails() {
    let workflow = Map::new(FixedTemperatureSampler { beta: None });
    let err = workflow
        .run(vec![initial_state()])
        .result()
        .await
        .unwrap_err();
    assert!(matches!(err, HybridError::Runnable { .. }));
}
