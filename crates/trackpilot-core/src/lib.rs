//! Core simulation engine shared by the TrackPilot learners.
//!
//! The crate owns the environment contract: an occupancy [`Track`], the kinematic
//! [`Vehicle`], the ray-casting [`SensorArray`], the per-agent [`Episode`] state machine,
//! and the [`FitnessEvaluator`] that turns trajectories into learning signal. Learners are
//! consumed through the capability traits in [`policy`], so the orchestration in
//! [`generation`] and [`replay`] never depends on a concrete network implementation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub mod episode;
pub mod fitness;
pub mod generation;
pub mod policy;
pub mod replay;
pub mod sensors;
pub mod track;
pub mod vehicle;

pub use config::{
    ControlConfig, EvolutionConfig, FitnessConfig, ReplayConfig, RewardConfig, SensorConfig,
    TerminationConfig, TrackPilotConfig,
};
pub use episode::{Episode, EpisodeResult, EpisodeStatus, StepOutcome, TerminalCause};
pub use fitness::FitnessEvaluator;
pub use generation::{
    CauseCounts, Evolution, EvolutionOutcome, GenerationReport, GenerationRunner, GenomeScore,
};
pub use policy::{
    ActivationKind, DiscretePolicy, EvaluatedGenome, GenerationControl, GenomeError, LayerSpec,
    PopulationOptimizer, SteeringPolicy, ValueFunction, validate_topology,
};
pub use replay::{
    EpisodeReport, EpsilonGreedy, QTarget, ReplayBuffer, ReplayTrainer, TrainingSummary,
    Transition, greedy_action,
};
pub use sensors::SensorArray;
pub use track::{StartPose, Track};
pub use vehicle::{Action, DiscreteAction, Vehicle};

/// Number of vehicle-state entries that precede the sensor readings in an observation.
pub const STATE_FEATURES: usize = 4;
/// Width of the continuous action vector: `[steering, throttle]`.
pub const STEERING_ACTION_WIDTH: usize = 2;
/// Number of discrete actions available to value-based agents.
pub const DISCRETE_ACTIONS: usize = 3;

/// Errors raised by the simulation core.
#[derive(Debug, Error, PartialEq)]
pub enum SimulationError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The start pose is off-road and no drivable cell exists within the search radius.
    #[error(
        "start pose ({x}, {y}) is not drivable and no drivable cell lies within {radius} units"
    )]
    NoDrivableSpawn { x: f32, y: f32, radius: f32 },
    /// A steering policy returned an action vector of the wrong width.
    #[error("policy returned {actual} action values, expected {expected}")]
    MalformedAction { expected: usize, actual: usize },
    /// A discrete policy returned an index outside the action space.
    #[error("policy chose action {index}, expected an index below {available}")]
    UnknownAction { index: usize, available: usize },
    /// A policy or value function was handed an observation of the wrong width.
    #[error("observation has {actual} values, expected {expected}")]
    ObservationMismatch { expected: usize, actual: usize },
    /// A value function produced a value vector of the wrong width.
    #[error("value function returned {actual} values, expected {expected}")]
    ValueWidthMismatch { expected: usize, actual: usize },
    /// The value-function backend failed to train or copy its parameters.
    #[error("value function failure: {0}")]
    ValueFunction(String),
    /// The population optimizer handed over an empty generation.
    #[error("population is empty")]
    EmptyPopulation,
    /// Network topology is inconsistent with the observation or action widths.
    #[error(transparent)]
    Genome(#[from] GenomeError),
}

/// Receives progress reports from the training loops.
///
/// Both hooks default to no-ops so sinks only implement what they record.
pub trait TrainingSink: Send {
    fn on_generation(&mut self, _report: &GenerationReport) {}

    fn on_episode(&mut self, _report: &EpisodeReport) {}
}

/// Sink that discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TrainingSink for NullSink {}

/// Simulation clock counting applied ticks within one episode.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Generation counter owned by the evolution orchestrator.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct Generation(pub u32);

impl Generation {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Stable identifier assigned to a genome by the population optimizer.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct GenomeId(pub u64);

/// Continuous 2D position in track coordinates (screen convention, +y points down).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance_to(self, other: Position) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

const FULL_TURN_DEGREES: f32 = 360.0;

/// Wrap a heading in degrees into `[0, 360)`.
pub(crate) fn wrap_degrees(mut angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    angle %= FULL_TURN_DEGREES;
    if angle < 0.0 {
        angle += FULL_TURN_DEGREES;
    }
    // -0.0 % 360 and tiny negatives can round up to exactly 360.
    if angle >= FULL_TURN_DEGREES {
        angle -= FULL_TURN_DEGREES;
    }
    angle
}

/// Unit direction for a heading in degrees, with the vertical axis inverted for screen space.
pub(crate) fn heading_direction(heading_degrees: f32) -> (f32, f32) {
    let radians = heading_degrees.to_radians();
    (radians.cos(), -radians.sin())
}
