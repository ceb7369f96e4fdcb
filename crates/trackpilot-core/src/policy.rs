//! Capability traits through which the core consumes external learners.
//!
//! Nothing here knows how a network is built or trained. Population optimizers, steering
//! brains and value approximators plug in behind these seams and are interchangeable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{GenomeId, SimulationError};

/// Continuous-control policy used by evolved genomes.
pub trait SteeringPolicy: Send {
    /// Map an observation onto `[steering, throttle]`. Any other width is a contract violation.
    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, SimulationError>;
}

/// Discrete-control policy used by value-based agents.
pub trait DiscretePolicy {
    /// Pick an action index in `0..DISCRETE_ACTIONS`.
    fn choose(&mut self, observation: &[f32]) -> Result<usize, SimulationError>;
}

/// Function approximator for action values, trained by the replay loop.
pub trait ValueFunction {
    /// Number of action values produced per observation.
    fn action_count(&self) -> usize;

    /// Estimate the value of every action for `observation`.
    fn predict(&mut self, observation: &[f32]) -> Result<Vec<f32>, SimulationError>;

    /// Take one gradient step towards the supplied targets.
    fn fit(&mut self, batch: &[crate::QTarget]) -> Result<(), SimulationError>;

    /// Overwrite this approximator's parameters with those of `source`. On error the
    /// previous parameters are kept.
    fn sync_from(&mut self, source: &Self) -> Result<(), SimulationError>
    where
        Self: Sized;
}

/// Genome as seen by the generation runner: an identity, a policy, and a fitness slot.
pub trait EvaluatedGenome: Send {
    fn id(&self) -> GenomeId;

    fn policy_mut(&mut self) -> &mut dyn SteeringPolicy;

    /// Record this generation's fitness. The runner calls this exactly once per generation.
    fn set_fitness(&mut self, fitness: f32);

    fn fitness(&self) -> Option<f32>;
}

/// Whether the evolution loop should keep producing generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationControl {
    Continue,
    Stop,
}

/// Population optimizer owning selection, mutation and reproduction between generations.
pub trait PopulationOptimizer {
    type Genome: EvaluatedGenome;

    /// Run up to `generations` generations. `evaluate` must set every genome's fitness; the
    /// optimizer stops early when it returns [`GenerationControl::Stop`]. Returns the best
    /// genome observed.
    fn evolve<F>(
        &mut self,
        generations: u32,
        evaluate: F,
    ) -> Result<Option<Self::Genome>, SimulationError>
    where
        F: FnMut(&mut [Self::Genome]) -> Result<GenerationControl, SimulationError>;
}

/// Activation applied after a dense layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ActivationKind {
    Identity,
    Relu,
    Sigmoid,
    #[default]
    Tanh,
}

impl ActivationKind {
    #[must_use]
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Self::Identity => value,
            Self::Relu => value.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-value).exp()),
            Self::Tanh => value.tanh(),
        }
    }
}

/// Dense layer description.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LayerSpec {
    pub inputs: usize,
    pub outputs: usize,
    pub activation: ActivationKind,
}

impl LayerSpec {
    #[must_use]
    pub const fn dense(inputs: usize, outputs: usize, activation: ActivationKind) -> Self {
        Self {
            inputs,
            outputs,
            activation,
        }
    }
}

/// Errors raised when validating network topologies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenomeError {
    #[error("layer stack must contain at least one layer")]
    EmptyLayers,
    #[error("layer {index} has zero-sized dimensions")]
    ZeroSizedLayer { index: usize },
    #[error("first layer takes {actual} inputs but observations have {expected}")]
    InputMismatch { expected: usize, actual: usize },
    #[error("layer {index} input {actual} does not match previous output {expected}")]
    MismatchedTopology {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("final layer outputs {actual} do not match action width {expected}")]
    OutputMismatch { expected: usize, actual: usize },
    #[error("layer {index} carries {actual} parameters, expected {expected}")]
    ParameterCount {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Ensure a layer stack maps `input_size` observations onto `output_size` actions.
pub fn validate_topology(
    layers: &[LayerSpec],
    input_size: usize,
    output_size: usize,
) -> Result<(), GenomeError> {
    let first = layers.first().ok_or(GenomeError::EmptyLayers)?;
    if first.inputs != input_size {
        return Err(GenomeError::InputMismatch {
            expected: input_size,
            actual: first.inputs,
        });
    }
    let mut expected_inputs = input_size;
    for (index, layer) in layers.iter().enumerate() {
        if layer.inputs == 0 || layer.outputs == 0 {
            return Err(GenomeError::ZeroSizedLayer { index });
        }
        if layer.inputs != expected_inputs {
            return Err(GenomeError::MismatchedTopology {
                index,
                expected: expected_inputs,
                actual: layer.inputs,
            });
        }
        expected_inputs = layer.outputs;
    }
    if expected_inputs != output_size {
        return Err(GenomeError::OutputMismatch {
            expected: output_size,
            actual: expected_inputs,
        });
    }
    Ok(())
}
