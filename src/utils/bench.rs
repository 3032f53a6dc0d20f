//! Measurement harness for the emulator benchmarks.
//!
//! Scenarios are sampled in a shuffled schedule so no scenario always runs
//! right after the same neighbour, and every raw sample is kept for
//! external analysis.
//!
//! By default (`cpu_cycles` feature) samples are cycle counts. With
//! `use_time` they are nanoseconds.

use rand::seq::SliceRandom;
use rand::Rng;
use std::hint::black_box;

/// Configuration for a benchmark run
#[derive(Clone, Debug)]
pub struct BenchConfig {
    /// Samples collected per scenario (default: 30)
    pub samples: usize,
    /// Unmeasured runs per scenario before sampling (default: 10)
    pub warmup: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            samples: 30,
            warmup: 10,
        }
    }
}

/// A scenario to be measured
pub struct Scenario<'a> {
    pub name: String,
    pub description: String,
    /// Runs the scenario once and returns the measured cycles. Timing
    /// happens inside the closure so setup stays out of the sample.
    pub run: Box<dyn FnMut() -> u64 + 'a>,
}

impl<'a> Scenario<'a> {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        run: impl FnMut() -> u64 + 'a,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            run: Box::new(run),
        }
    }
}

/// Summary statistics over a set of samples
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub median: u64,
    pub mean: f64,
    pub std_dev: f64,
}

impl Summary {
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let mean = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        let variance = sorted
            .iter()
            .map(|&s| {
                let diff = s as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / (sorted.len() - 1).max(1) as f64;

        Self {
            count: sorted.len(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            median: sorted[sorted.len() / 2],
            mean,
            std_dev: variance.sqrt(),
        }
    }
}

/// Result from measuring a single scenario
#[derive(Clone, Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub description: String,
    pub summary: Summary,
    /// Samples in the order they were taken
    pub samples: Vec<u64>,
}

/// Measure `scenarios` with a shuffled schedule drawn from `rng`.
///
/// 1. Warms up all scenarios
/// 2. Shuffles the (scenario, sample) task list
/// 3. Runs each task once
///
/// Results come back in the order the scenarios were given.
pub fn measure_scenarios<R: Rng + ?Sized>(
    mut scenarios: Vec<Scenario<'_>>,
    config: &BenchConfig,
    rng: &mut R,
) -> Vec<ScenarioResult> {
    if scenarios.is_empty() {
        return Vec::new();
    }

    for scenario in &mut scenarios {
        for _ in 0..config.warmup {
            black_box((scenario.run)());
        }
    }

    let mut tasks: Vec<usize> = (0..scenarios.len())
        .flat_map(|s| std::iter::repeat(s).take(config.samples))
        .collect();
    tasks.shuffle(rng);

    let mut samples: Vec<Vec<u64>> = (0..scenarios.len())
        .map(|_| Vec::with_capacity(config.samples))
        .collect();
    for idx in tasks {
        samples[idx].push((scenarios[idx].run)());
    }

    scenarios
        .into_iter()
        .zip(samples)
        .map(|(scenario, samples)| ScenarioResult {
            summary: Summary::from_samples(&samples),
            name: scenario.name,
            description: scenario.description,
            samples,
        })
        .collect()
}

/// Get the measurement unit name
#[cfg(all(feature = "cpu_cycles", not(feature = "use_time")))]
pub const fn unit_name() -> &'static str {
    #[cfg(target_arch = "aarch64")]
    {
        "ticks"
    }
    #[cfg(any(target_arch = "x86_64", target_arch = "x86"))]
    {
        "cycles"
    }
    #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64", target_arch = "x86")))]
    {
        "units"
    }
}

#[cfg(any(not(feature = "cpu_cycles"), feature = "use_time"))]
pub const fn unit_name() -> &'static str {
    "ns"
}
