//! Dense feed-forward steering brain.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use trackpilot_core::{
    ActivationKind, GenomeError, LayerSpec, STEERING_ACTION_WIDTH, SimulationError,
    SteeringPolicy, validate_topology,
};

use crate::{BrainKind, Evolvable, gaussian};

/// One fully connected layer. `weights` is row-major, one row of `inputs` weights per output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct DenseLayer {
    spec: LayerSpec,
    weights: Vec<f32>,
    biases: Vec<f32>,
}

impl DenseLayer {
    fn random(spec: LayerSpec, rng: &mut dyn RngCore) -> Self {
        let limit = (6.0 / (spec.inputs + spec.outputs) as f32).sqrt();
        let weights = (0..spec.inputs * spec.outputs)
            .map(|_| rng.random_range(-limit..limit))
            .collect();
        let biases = (0..spec.outputs)
            .map(|_| rng.random_range(-0.1..0.1))
            .collect();
        Self {
            spec,
            weights,
            biases,
        }
    }

    fn forward(&self, inputs: &[f32], outputs: &mut Vec<f32>) {
        outputs.clear();
        for (row, bias) in self.weights.chunks_exact(self.spec.inputs).zip(&self.biases) {
            let sum: f32 = row.iter().zip(inputs).map(|(weight, input)| weight * input).sum();
            outputs.push(self.spec.activation.apply(sum + bias));
        }
    }

    fn parameters_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.weights.iter_mut().chain(self.biases.iter_mut())
    }
}

/// Evolvable multi-layer perceptron mapping observations onto `[steering, throttle]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MlpBrain {
    layers: Vec<DenseLayer>,
}

impl MlpBrain {
    pub const KIND: BrainKind = BrainKind::new("mlp.dense");

    /// Randomly initialize a network with the given topology.
    pub fn random(
        layers: &[LayerSpec],
        input_size: usize,
        output_size: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Self, GenomeError> {
        validate_topology(layers, input_size, output_size)?;
        Ok(Self {
            layers: layers
                .iter()
                .map(|spec| DenseLayer::random(*spec, rng))
                .collect(),
        })
    }

    /// Steering topology: tanh hidden layers of the given widths and a tanh output pair.
    pub fn steering(
        observation_len: usize,
        hidden: &[usize],
        rng: &mut dyn RngCore,
    ) -> Result<Self, GenomeError> {
        let specs = Self::steering_topology(observation_len, hidden);
        Self::random(&specs, observation_len, STEERING_ACTION_WIDTH, rng)
    }

    #[must_use]
    pub fn steering_topology(observation_len: usize, hidden: &[usize]) -> Vec<LayerSpec> {
        let mut specs = Vec::with_capacity(hidden.len() + 1);
        let mut inputs = observation_len;
        for &width in hidden {
            specs.push(LayerSpec::dense(inputs, width, ActivationKind::Tanh));
            inputs = width;
        }
        specs.push(LayerSpec::dense(
            inputs,
            STEERING_ACTION_WIDTH,
            ActivationKind::Tanh,
        ));
        specs
    }

    #[must_use]
    pub fn topology(&self) -> Vec<LayerSpec> {
        self.layers.iter().map(|layer| layer.spec).collect()
    }

    #[must_use]
    pub fn input_size(&self) -> usize {
        self.layers.first().map_or(0, |layer| layer.spec.inputs)
    }

    #[must_use]
    pub fn output_size(&self) -> usize {
        self.layers.last().map_or(0, |layer| layer.spec.outputs)
    }

    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.layers
            .iter()
            .map(|layer| layer.weights.len() + layer.biases.len())
            .sum()
    }

    /// Check a deserialized brain against the expected widths and its own parameter counts.
    pub fn validate(&self, input_size: usize, output_size: usize) -> Result<(), GenomeError> {
        validate_topology(&self.topology(), input_size, output_size)?;
        for (index, layer) in self.layers.iter().enumerate() {
            let expected = layer.spec.inputs * layer.spec.outputs + layer.spec.outputs;
            let actual = layer.weights.len() + layer.biases.len();
            if layer.weights.len() != layer.spec.inputs * layer.spec.outputs
                || layer.biases.len() != layer.spec.outputs
            {
                return Err(GenomeError::ParameterCount {
                    index,
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }

    /// Run a forward pass. `inputs` must match the first layer's width.
    pub fn forward(&self, inputs: &[f32]) -> Result<Vec<f32>, SimulationError> {
        if inputs.len() != self.input_size() {
            return Err(SimulationError::ObservationMismatch {
                expected: self.input_size(),
                actual: inputs.len(),
            });
        }
        let mut current = inputs.to_vec();
        let mut next = Vec::new();
        for layer in &self.layers {
            layer.forward(&current, &mut next);
            std::mem::swap(&mut current, &mut next);
        }
        Ok(current)
    }
}

impl SteeringPolicy for MlpBrain {
    fn act(&mut self, observation: &[f32]) -> Result<Vec<f32>, SimulationError> {
        self.forward(observation)
    }
}

impl Evolvable for MlpBrain {
    fn kind(&self) -> BrainKind {
        Self::KIND
    }

    fn mutate(&mut self, rng: &mut dyn RngCore, rate: f32, scale: f32) {
        for layer in &mut self.layers {
            for parameter in layer.parameters_mut() {
                if rng.random::<f32>() < rate {
                    *parameter += gaussian(rng) * scale;
                }
            }
        }
    }

    /// Uniform crossover over neurons: each output row (weights plus bias) comes from one parent.
    fn crossover(&self, other: &Self, rng: &mut dyn RngCore) -> Option<Self> {
        if self.topology() != other.topology() {
            return None;
        }
        let mut child = self.clone();
        for (child_layer, other_layer) in child.layers.iter_mut().zip(&other.layers) {
            let inputs = child_layer.spec.inputs;
            for neuron in 0..child_layer.spec.outputs {
                if rng.random::<bool>() {
                    continue;
                }
                let row = neuron * inputs..(neuron + 1) * inputs;
                child_layer.weights[row.clone()].copy_from_slice(&other_layer.weights[row]);
                child_layer.biases[neuron] = other_layer.biases[neuron];
            }
        }
        Some(child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn steering_brain_has_expected_structure() {
        let mut rng = SmallRng::seed_from_u64(0xDEAD_BEEF);
        let brain = MlpBrain::steering(11, &[16, 8], &mut rng).expect("brain");
        assert_eq!(brain.input_size(), 11);
        assert_eq!(brain.output_size(), 2);
        assert_eq!(brain.parameter_count(), 11 * 16 + 16 + 16 * 8 + 8 + 8 * 2 + 2);
        assert!(brain.validate(11, 2).is_ok());
    }

    #[test]
    fn forward_produces_bounded_actions() {
        let mut rng = SmallRng::seed_from_u64(123);
        let mut brain = MlpBrain::steering(11, &[16], &mut rng).expect("brain");
        let outputs = brain.act(&[0.5; 11]).expect("act");
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|v| v.is_finite() && v.abs() <= 1.0));
    }

    #[test]
    fn observation_of_wrong_width_is_not_padded() {
        let mut rng = SmallRng::seed_from_u64(321);
        let mut brain = MlpBrain::steering(11, &[4], &mut rng).expect("brain");
        assert_eq!(
            brain.act(&[0.5; 7]),
            Err(SimulationError::ObservationMismatch {
                expected: 11,
                actual: 7
            })
        );
        assert_eq!(
            brain.forward(&[0.5; 12]),
            Err(SimulationError::ObservationMismatch {
                expected: 11,
                actual: 12
            })
        );
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(5);
        let specs = MlpBrain::steering_topology(9, &[4]);
        assert_eq!(
            MlpBrain::random(&specs, 11, 2, &mut rng),
            Err(GenomeError::InputMismatch {
                expected: 11,
                actual: 9
            })
        );
    }

    #[test]
    fn mutate_changes_parameters() {
        let mut rng = SmallRng::seed_from_u64(456);
        let brain = MlpBrain::steering(11, &[8], &mut rng).expect("brain");
        let mut mutated = brain.clone();
        mutated.mutate(&mut rng, 1.0, 0.5);
        assert_ne!(brain, mutated);
        let mut untouched = brain.clone();
        untouched.mutate(&mut rng, 0.0, 0.5);
        assert_eq!(brain, untouched);
    }

    #[test]
    fn crossover_takes_each_neuron_from_a_parent() {
        let mut rng = SmallRng::seed_from_u64(789);
        let a = MlpBrain::steering(11, &[8], &mut rng).expect("a");
        let b = MlpBrain::steering(11, &[8], &mut rng).expect("b");
        let child = a.crossover(&b, &mut rng).expect("compatible");
        for ((child_layer, a_layer), b_layer) in child.layers.iter().zip(&a.layers).zip(&b.layers)
        {
            for neuron in 0..child_layer.spec.outputs {
                let bias = child_layer.biases[neuron];
                assert!(bias == a_layer.biases[neuron] || bias == b_layer.biases[neuron]);
            }
        }

        let other_shape = MlpBrain::steering(11, &[4], &mut rng).expect("c");
        assert!(a.crossover(&other_shape, &mut rng).is_none());
    }

    #[test]
    fn truncated_parameters_fail_validation() {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut brain = MlpBrain::steering(11, &[4], &mut rng).expect("brain");
        brain.layers[1].weights.pop();
        assert_eq!(
            brain.validate(11, 2),
            Err(GenomeError::ParameterCount {
                index: 1,
                expected: 4 * 2 + 2,
                actual: 4 * 2 + 2 - 1
            })
        );
    }

    #[test]
    fn serde_preserves_outputs() {
        let mut rng = SmallRng::seed_from_u64(7);
        let brain = MlpBrain::steering(11, &[6], &mut rng).expect("brain");
        let json = serde_json::to_string(&brain).expect("serialize");
        let restored: MlpBrain = serde_json::from_str(&json).expect("deserialize");
        let observation = [0.25; 11];
        assert_eq!(
            brain.forward(&observation).expect("brain"),
            restored.forward(&observation).expect("restored")
        );
    }
}
