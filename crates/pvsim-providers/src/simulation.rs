//! Simulated readings.
//!
//! A reading is the target value, optionally perturbed by Gaussian noise
//! with the configured standard deviation.

use pvsim_core::TargetEntry;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tracing::warn;

pub struct Simulation {
    target_value: Option<f64>,
    noise: Option<Normal<f64>>,
    rng: StdRng,
}

impl Simulation {
    pub fn new(target_value: Option<f64>, std_dev: Option<f64>) -> Self {
        Self::with_rng(target_value, std_dev, StdRng::from_entropy())
    }

    /// Deterministic noise sequence for reproducible runs.
    pub fn with_seed(target_value: Option<f64>, std_dev: Option<f64>, seed: u64) -> Self {
        Self::with_rng(target_value, std_dev, StdRng::seed_from_u64(seed))
    }

    pub fn from_entry(entry: &TargetEntry) -> Self {
        Self::new(entry.target_value, entry.std_dev)
    }

    fn with_rng(target_value: Option<f64>, std_dev: Option<f64>, rng: StdRng) -> Self {
        Self {
            target_value,
            noise: std_dev.and_then(noise_for),
            rng,
        }
    }

    pub fn target_value(&self) -> Option<f64> {
        self.target_value
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.noise.map(|noise| noise.std_dev())
    }

    /// Next reading, or `None` when no target value is configured.
    pub fn next_value(&mut self) -> Option<f64> {
        let target = self.target_value?;
        Some(match &self.noise {
            Some(noise) => target + noise.sample(&mut self.rng),
            None => target,
        })
    }
}

fn noise_for(std_dev: f64) -> Option<Normal<f64>> {
    if !std_dev.is_finite() || std_dev < 0.0 {
        warn!("Ignoring invalid standard deviation {}", std_dev);
        return None;
    }
    Normal::new(0.0, std_dev).ok()
}
