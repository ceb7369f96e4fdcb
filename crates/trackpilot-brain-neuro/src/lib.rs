//! NeuroFlow-backed action-value network.
//!
//! Wraps the `neuroflow` crate's [`FeedForward`] network behind the core's
//! [`ValueFunction`] boundary. NeuroFlow applies its activation on every layer, output
//! included, so values are stored divided by [`ValueNetworkConfig::value_scale`] to keep
//! them inside the activation's range.

use neuroflow::FeedForward;
use neuroflow::activators::Type;
use rand::{Rng, RngCore};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use trackpilot_brain::BrainKind;
use trackpilot_core::{
    DISCRETE_ACTIONS, DiscretePolicy, QTarget, SimulationError, ValueFunction, greedy_action,
};

/// Activation families supported by NeuroFlow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NeuroflowActivation {
    #[default]
    Tanh,
    Sigmoid,
    Relu,
}

impl NeuroflowActivation {
    fn to_type(self) -> Type {
        match self {
            Self::Tanh => Type::Tanh,
            Self::Sigmoid => Type::Sigmoid,
            Self::Relu => Type::Relu,
        }
    }

    /// Interval the network's raw outputs can reach.
    fn output_range(self) -> (f64, f64) {
        match self {
            Self::Tanh => (-1.0, 1.0),
            Self::Sigmoid => (0.0, 1.0),
            Self::Relu => (0.0, f64::INFINITY),
        }
    }
}

/// Shape and optimizer settings of the value network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValueNetworkConfig {
    /// Sizes of hidden layers between the observation and action-value layers.
    pub hidden_layers: Vec<usize>,
    pub activation: NeuroflowActivation,
    pub learning_rate: f64,
    /// Momentum factor used by NeuroFlow's trainer.
    pub momentum: f64,
    /// Action values are divided by this before being fitted.
    pub value_scale: f32,
}

impl Default for ValueNetworkConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![32, 32],
            activation: NeuroflowActivation::Tanh,
            learning_rate: 0.01,
            momentum: 0.1,
            value_scale: 200.0,
        }
    }
}

impl ValueNetworkConfig {
    pub fn validate(&self) -> Result<(), NeuroError> {
        if self.hidden_layers.contains(&0) {
            return Err(NeuroError::InvalidConfig(
                "hidden_layers must not contain zero-width layers",
            ));
        }
        if self.learning_rate <= 0.0 || self.momentum < 0.0 {
            return Err(NeuroError::InvalidConfig(
                "learning_rate must be positive and momentum non-negative",
            ));
        }
        if !(self.value_scale.is_finite() && self.value_scale > 0.0) {
            return Err(NeuroError::InvalidConfig("value_scale must be positive"));
        }
        Ok(())
    }
}

/// Errors raised while building or restoring a value network.
#[derive(Debug, Error)]
pub enum NeuroError {
    #[error("invalid value network configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("network layout mismatch: {0}")]
    Layout(String),
    #[error("failed to (de)serialize network: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<NeuroError> for SimulationError {
    fn from(error: NeuroError) -> Self {
        Self::ValueFunction(error.to_string())
    }
}

#[derive(Serialize)]
struct LayerSeed {
    v: Vec<f64>,
    y: Vec<f64>,
    delta: Vec<f64>,
    prev_delta: Vec<f64>,
    w: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct FeedForwardSeed {
    layers: Vec<LayerSeed>,
    learn_rate: f64,
    momentum: f64,
    error: f64,
    act_type: Type,
}

/// Action-value approximator over the discrete vehicle actions.
pub struct NeuroflowValueNetwork {
    network: FeedForward,
    config: ValueNetworkConfig,
    observation_len: usize,
    inputs: Vec<f64>,
}

impl std::fmt::Debug for NeuroflowValueNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeuroflowValueNetwork")
            .field("config", &self.config)
            .field("observation_len", &self.observation_len)
            .finish_non_exhaustive()
    }
}

impl NeuroflowValueNetwork {
    pub const KIND: BrainKind = BrainKind::new("value.neuroflow");

    /// Construct a network with random weights drawn from `rng`.
    pub fn new(
        config: ValueNetworkConfig,
        observation_len: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Self, NeuroError> {
        config.validate()?;
        if observation_len == 0 {
            return Err(NeuroError::InvalidConfig("observation_len must be non-zero"));
        }
        let network = Self::build_network(&config, observation_len, rng)?;
        Ok(Self {
            network,
            config,
            observation_len,
            inputs: vec![0.0; observation_len],
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ValueNetworkConfig {
        &self.config
    }

    #[must_use]
    pub const fn observation_len(&self) -> usize {
        self.observation_len
    }

    fn architecture(config: &ValueNetworkConfig, observation_len: usize) -> Vec<usize> {
        let mut architecture = Vec::with_capacity(config.hidden_layers.len() + 2);
        architecture.push(observation_len);
        architecture.extend(config.hidden_layers.iter().copied());
        architecture.push(DISCRETE_ACTIONS);
        architecture
    }

    fn build_network(
        config: &ValueNetworkConfig,
        observation_len: usize,
        rng: &mut dyn RngCore,
    ) -> Result<FeedForward, NeuroError> {
        let architecture = Self::architecture(config, observation_len);
        debug!(layers = ?architecture, activation = ?config.activation, "building value network");
        let mut layers = Vec::with_capacity(architecture.len().saturating_sub(1));
        for window in architecture.windows(2) {
            let inputs = window[0];
            let outputs = window[1];
            let limit = (1.0 / inputs as f64).sqrt();
            let neurons = (0..outputs)
                .map(|_| {
                    // The trailing weight is the neuron's bias.
                    (0..=inputs)
                        .map(|_| rng.random_range(-limit..limit))
                        .collect()
                })
                .collect();
            layers.push(LayerSeed {
                v: vec![0.0; outputs],
                y: vec![0.0; outputs],
                delta: vec![0.0; outputs],
                prev_delta: vec![0.0; outputs],
                w: neurons,
            });
        }

        let seed = FeedForwardSeed {
            layers,
            learn_rate: config.learning_rate,
            momentum: config.momentum,
            error: 0.0,
            act_type: config.activation.to_type(),
        };
        let network: FeedForward = serde_json::from_value(serde_json::to_value(&seed)?)?;
        Ok(Self::configure(network, config))
    }

    fn configure(mut network: FeedForward, config: &ValueNetworkConfig) -> FeedForward {
        network
            .activation(config.activation.to_type())
            .learning_rate(config.learning_rate)
            .momentum(config.momentum);
        network
    }

    /// Deep copy of `network` through its serde representation.
    fn copy_network(
        network: &FeedForward,
        config: &ValueNetworkConfig,
    ) -> Result<FeedForward, NeuroError> {
        let copy: FeedForward = serde_json::from_value(serde_json::to_value(network)?)?;
        Ok(Self::configure(copy, config))
    }

    /// Read back `(inputs, outputs)` per layer from NeuroFlow's serialized weights.
    fn layer_widths(network: &FeedForward) -> Result<Vec<(usize, usize)>, NeuroError> {
        let value = serde_json::to_value(network)?;
        let layers = value
            .get("layers")
            .and_then(|layers| layers.as_array())
            .ok_or_else(|| NeuroError::Layout("missing layers".to_string()))?;
        layers
            .iter()
            .enumerate()
            .map(|(index, layer)| {
                let neurons = layer
                    .get("w")
                    .and_then(|w| w.as_array())
                    .ok_or_else(|| NeuroError::Layout(format!("layer {index} has no weights")))?;
                let inputs = neurons
                    .first()
                    .and_then(|row| row.as_array())
                    .map_or(0, |row| row.len().saturating_sub(1));
                let ragged = neurons
                    .iter()
                    .any(|row| row.as_array().is_none_or(|row| row.len() != inputs + 1));
                if ragged || inputs == 0 {
                    return Err(NeuroError::Layout(format!(
                        "layer {index} has inconsistent weight rows"
                    )));
                }
                Ok((inputs, neurons.len()))
            })
            .collect()
    }

    fn from_snapshot(snapshot: NetworkSnapshot) -> Result<Self, NeuroError> {
        snapshot.config.validate()?;
        let widths = Self::layer_widths(&snapshot.network)?;
        let expected = Self::architecture(&snapshot.config, snapshot.observation_len);
        let actual: Vec<usize> = widths
            .first()
            .map(|(inputs, _)| *inputs)
            .into_iter()
            .chain(widths.iter().map(|(_, outputs)| *outputs))
            .collect();
        let chained = widths.windows(2).all(|pair| pair[0].1 == pair[1].0);
        if actual != expected || !chained {
            return Err(NeuroError::Layout(format!(
                "expected layer widths {expected:?}, found {actual:?}"
            )));
        }
        Ok(Self {
            network: Self::configure(snapshot.network, &snapshot.config),
            inputs: vec![0.0; snapshot.observation_len],
            observation_len: snapshot.observation_len,
            config: snapshot.config,
        })
    }

    fn load_inputs(&mut self, observation: &[f32]) -> Result<(), SimulationError> {
        if observation.len() != self.observation_len {
            return Err(SimulationError::ObservationMismatch {
                expected: self.observation_len,
                actual: observation.len(),
            });
        }
        for (slot, value) in self.inputs.iter_mut().zip(observation) {
            *slot = f64::from(*value);
        }
        Ok(())
    }

    fn raw_target(&self, value: f32) -> f64 {
        let (low, high) = self.config.activation.output_range();
        let margin = 1e-3;
        (f64::from(value) / f64::from(self.config.value_scale)).clamp(low + margin, high - margin)
    }
}

impl ValueFunction for NeuroflowValueNetwork {
    fn action_count(&self) -> usize {
        DISCRETE_ACTIONS
    }

    fn predict(&mut self, observation: &[f32]) -> Result<Vec<f32>, SimulationError> {
        self.load_inputs(observation)?;
        let scale = self.config.value_scale;
        Ok(self
            .network
            .calc(&self.inputs)
            .iter()
            .map(|value| *value as f32 * scale)
            .collect())
    }

    fn fit(&mut self, batch: &[QTarget]) -> Result<(), SimulationError> {
        let mut targets = Vec::with_capacity(DISCRETE_ACTIONS);
        for sample in batch {
            if sample.values.len() != DISCRETE_ACTIONS {
                return Err(SimulationError::ValueWidthMismatch {
                    expected: DISCRETE_ACTIONS,
                    actual: sample.values.len(),
                });
            }
            self.load_inputs(&sample.observation)?;
            targets.clear();
            targets.extend(sample.values.iter().map(|value| self.raw_target(*value)));
            self.network.fit(&self.inputs, &targets);
        }
        Ok(())
    }

    fn sync_from(&mut self, source: &Self) -> Result<(), SimulationError> {
        if source.observation_len != self.observation_len {
            return Err(SimulationError::ObservationMismatch {
                expected: self.observation_len,
                actual: source.observation_len,
            });
        }
        self.network = Self::copy_network(&source.network, &source.config)?;
        self.config = source.config.clone();
        Ok(())
    }
}

#[derive(Serialize)]
struct NetworkSnapshotRef<'a> {
    config: &'a ValueNetworkConfig,
    observation_len: usize,
    network: &'a FeedForward,
}

#[derive(Deserialize)]
struct NetworkSnapshot {
    config: ValueNetworkConfig,
    observation_len: usize,
    network: FeedForward,
}

impl Serialize for NeuroflowValueNetwork {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        NetworkSnapshotRef {
            config: &self.config,
            observation_len: self.observation_len,
            network: &self.network,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NeuroflowValueNetwork {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let snapshot = NetworkSnapshot::deserialize(deserializer)?;
        Self::from_snapshot(snapshot).map_err(D::Error::custom)
    }
}

/// Discrete policy that always takes the highest-valued action.
#[derive(Debug)]
pub struct GreedyPolicy<V> {
    values: V,
}

impl<V: ValueFunction> GreedyPolicy<V> {
    #[must_use]
    pub const fn new(values: V) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn into_inner(self) -> V {
        self.values
    }
}

impl<V: ValueFunction> DiscretePolicy for GreedyPolicy<V> {
    fn choose(&mut self, observation: &[f32]) -> Result<usize, SimulationError> {
        Ok(greedy_action(&self.values.predict(observation)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn network(seed: u64) -> NeuroflowValueNetwork {
        let mut rng = SmallRng::seed_from_u64(seed);
        NeuroflowValueNetwork::new(ValueNetworkConfig::default(), 11, &mut rng).expect("network")
    }

    #[test]
    fn predictions_cover_every_action() {
        let mut net = network(0xBEEF);
        let values = net.predict(&[0.1; 11]).expect("predict");
        assert_eq!(values.len(), DISCRETE_ACTIONS);
        assert!(values.iter().all(|v| v.is_finite() && v.abs() <= 200.0));
    }

    #[test]
    fn fitting_moves_predictions_towards_targets() {
        let mut net = network(0xCAFE);
        let observation = vec![0.2, 0.4, 0.0, 0.5, 1.0, 0.8, 0.6, 0.4, 0.6, 0.8, 1.0];
        let target = QTarget {
            observation: observation.clone(),
            values: vec![60.0, -40.0, 10.0],
        };
        let error = |values: &[f32]| -> f32 {
            values
                .iter()
                .zip(&target.values)
                .map(|(a, b)| (a - b).abs())
                .sum()
        };
        let before = error(&net.predict(&observation).expect("predict"));
        for _ in 0..300 {
            net.fit(std::slice::from_ref(&target)).expect("fit");
        }
        let after = error(&net.predict(&observation).expect("predict"));
        assert!(after < before, "error grew from {before} to {after}");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(1);
        let config = ValueNetworkConfig {
            value_scale: 0.0,
            ..ValueNetworkConfig::default()
        };
        assert!(matches!(
            NeuroflowValueNetwork::new(config, 11, &mut rng),
            Err(NeuroError::InvalidConfig(_))
        ));
    }

    #[test]
    fn greedy_policy_picks_argmax() {
        let mut net = network(3);
        let observation = [0.3; 11];
        let values = net.predict(&observation).expect("predict");
        let mut policy = GreedyPolicy::new(net);
        assert_eq!(policy.choose(&observation), Ok(greedy_action(&values)));
    }

    #[test]
    fn wrong_observation_width_is_rejected() {
        let mut net = network(4);
        assert_eq!(
            net.predict(&[0.3; 9]),
            Err(SimulationError::ObservationMismatch {
                expected: 11,
                actual: 9
            })
        );
        let long = QTarget {
            observation: vec![0.3; 12],
            values: vec![0.0; DISCRETE_ACTIONS],
        };
        assert_eq!(
            net.fit(std::slice::from_ref(&long)),
            Err(SimulationError::ObservationMismatch {
                expected: 11,
                actual: 12
            })
        );
        let narrow = QTarget {
            observation: vec![0.3; 11],
            values: vec![0.0; 2],
        };
        assert_eq!(
            net.fit(std::slice::from_ref(&narrow)),
            Err(SimulationError::ValueWidthMismatch {
                expected: DISCRETE_ACTIONS,
                actual: 2
            })
        );
    }

    #[test]
    fn sync_between_layouts_fails_and_keeps_weights() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut replica = network(6);
        let before = replica.predict(&[0.3; 11]).expect("predict");
        let other = NeuroflowValueNetwork::new(ValueNetworkConfig::default(), 7, &mut rng)
            .expect("network");
        assert_eq!(
            replica.sync_from(&other),
            Err(SimulationError::ObservationMismatch {
                expected: 11,
                actual: 7
            })
        );
        assert_eq!(replica.predict(&[0.3; 11]).expect("predict"), before);
    }

    #[test]
    fn neuro_errors_surface_as_value_function_failures() {
        let error = SimulationError::from(NeuroError::Layout("missing layers".to_string()));
        assert_eq!(
            error,
            SimulationError::ValueFunction("network layout mismatch: missing layers".to_string())
        );
    }
}
