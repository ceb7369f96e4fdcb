//! Evolvable steering brains and a reference population optimizer for TrackPilot.

use rand::RngCore;
use std::fmt;

pub mod genetic;
pub mod mlp;

pub use genetic::{GeneticConfig, GeneticPopulation, MlpGenome};
pub use mlp::MlpBrain;

/// Stable identifier for a brain family, recorded next to persisted artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BrainKind(&'static str);

impl BrainKind {
    #[must_use]
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for BrainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Genetic operators shared by every evolvable brain.
pub trait Evolvable: Sized {
    fn kind(&self) -> BrainKind;

    /// Perturb parameters in place. Each parameter changes with probability `rate`.
    fn mutate(&mut self, rng: &mut dyn RngCore, rate: f32, scale: f32);

    /// Produce a child mixing `self` and `other`, or `None` if the two are incompatible.
    fn crossover(&self, other: &Self, rng: &mut dyn RngCore) -> Option<Self>;
}

/// Standard normal sample via Box-Muller.
pub(crate) fn gaussian(rng: &mut dyn RngCore) -> f32 {
    use rand::Rng;
    const TWO_PI: f32 = std::f32::consts::TAU;
    let u1 = rng.random::<f32>().clamp(f32::MIN_POSITIVE, 1.0);
    let u2 = rng.random::<f32>();
    (-2.0 * u1.ln()).sqrt() * (TWO_PI * u2).cos()
}
