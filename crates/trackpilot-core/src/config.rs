//! Static configuration for simulations and both training loops.
//!
//! Every constant here is a tunable default rather than a fixed contract; the values mirror the
//! reference configuration the environment was calibrated with.

use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};

use crate::SimulationError;

/// Ray fan and normalization constants for the [`SensorArray`](crate::SensorArray).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    /// Ray angles in degrees relative to the vehicle heading.
    pub ray_angles: Vec<f32>,
    /// Distance at which a ray is reported fully open.
    pub max_distance: f32,
    /// Marching increment along each ray.
    pub march_step: f32,
    /// Divisor applied to the vehicle speed in observations.
    pub speed_scale: f32,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            ray_angles: vec![-90.0, -45.0, -22.5, 0.0, 22.5, 45.0, 90.0],
            max_distance: 200.0,
            march_step: 1.0,
            speed_scale: 10.0,
        }
    }
}

/// Gains mapping policy outputs onto vehicle motion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Degrees of heading change per unit of steering output.
    pub steering_gain: f32,
    /// Speed per unit of throttle output.
    pub throttle_gain: f32,
    /// Distance covered by the discrete forward action.
    pub forward_step: f32,
    /// Heading change applied by the discrete turn actions.
    pub turn_delta: f32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            steering_gain: 5.0,
            throttle_gain: 3.0,
            forward_step: 5.0,
            turn_delta: 10.0,
        }
    }
}

/// Episode termination thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerminationConfig {
    /// Distance to goal at or below which the goal counts as reached.
    pub capture_radius: f32,
    /// Per-tick displacement below which a tick counts as stagnant.
    pub min_movement: f32,
    /// Consecutive stagnant ticks that end an episode.
    pub stagnation_ticks: u32,
    /// Maximum ticks per episode.
    pub step_budget: u32,
    /// Radius searched for a drivable cell when the start pose is off-road.
    pub spawn_search_radius: f32,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            capture_radius: 30.0,
            min_movement: 0.5,
            stagnation_ticks: 150,
            step_budget: 1500,
            spawn_search_radius: 50.0,
        }
    }
}

/// Weights for the population-mode fitness function.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FitnessConfig {
    /// Floor awarded to every goal-reaching episode.
    pub goal_reward: f32,
    /// Bonus per unused tick of the step budget for goal-reaching episodes.
    pub speed_weight: f32,
    /// Fitness awarded for closing the whole initial distance to the goal.
    pub progress_scale: f32,
    /// Upper bound of the survival term.
    pub survival_cap: f32,
    /// Distance under which the cubic proximity bonus activates.
    pub near_goal_threshold: f32,
    /// Proximity bonus at zero distance.
    pub proximity_scale: f32,
    /// Net displacement from start below which the idle penalty applies.
    pub idle_displacement: f32,
    /// Penalty subtracted from idle or oscillating trajectories.
    pub idle_penalty: f32,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            goal_reward: 10_000.0,
            speed_weight: 10.0,
            progress_scale: 1_000.0,
            survival_cap: 100.0,
            near_goal_threshold: 150.0,
            proximity_scale: 1_000.0,
            idle_displacement: 20.0,
            idle_penalty: 200.0,
        }
    }
}

impl FitnessConfig {
    /// Highest fitness any non-reaching episode can score.
    #[must_use]
    pub fn non_reaching_ceiling(&self) -> f32 {
        self.progress_scale + self.survival_cap + self.proximity_scale
    }
}

/// Weights for the per-tick reward used by the value-based learner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RewardConfig {
    /// Reward for every tick that ends on-road.
    pub alive_reward: f32,
    /// Reward per unit of distance-to-goal closed during the tick.
    pub shaping_weight: f32,
    /// One-time bonus on reaching the goal.
    pub goal_bonus: f32,
    /// Terminal reward for leaving the drivable surface.
    pub off_road_penalty: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            alive_reward: 0.1,
            shaping_weight: 1.0,
            goal_bonus: 100.0,
            off_road_penalty: -100.0,
        }
    }
}

/// Replay buffer, exploration and target-network settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayConfig {
    pub buffer_capacity: usize,
    pub batch_size: usize,
    /// Discount factor applied to the bootstrapped target.
    pub gamma: f32,
    pub epsilon_start: f32,
    pub epsilon_decay: f32,
    pub epsilon_floor: f32,
    /// Episodes between target-network synchronizations.
    pub target_sync_interval: u32,
    /// Episodes run by a training session.
    pub episodes: u32,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            batch_size: 64,
            gamma: 0.95,
            epsilon_start: 1.0,
            epsilon_decay: 0.995,
            epsilon_floor: 0.05,
            target_sync_interval: 10,
            episodes: 500,
        }
    }
}

/// Population-mode orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub generations: u32,
    /// Stop iterating generations once a genome reaches the goal.
    pub stop_on_goal: bool,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 100,
            stop_on_goal: true,
        }
    }
}

/// Aggregate configuration for a TrackPilot run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackPilotConfig {
    pub sensors: SensorConfig,
    pub control: ControlConfig,
    pub termination: TerminationConfig,
    pub fitness: FitnessConfig,
    pub reward: RewardConfig,
    pub replay: ReplayConfig,
    pub evolution: EvolutionConfig,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl TrackPilotConfig {
    /// Length of the observation vector produced under this configuration.
    #[must_use]
    pub fn observation_len(&self) -> usize {
        crate::STATE_FEATURES + self.sensors.ray_angles.len()
    }

    /// Rejects values that would produce a degenerate simulation.
    pub fn validate(&self) -> Result<(), SimulationError> {
        let sensors = &self.sensors;
        if sensors.ray_angles.is_empty() {
            return Err(SimulationError::InvalidConfig(
                "sensors.ray_angles must contain at least one ray",
            ));
        }
        if sensors.ray_angles.iter().any(|angle| !angle.is_finite()) {
            return Err(SimulationError::InvalidConfig(
                "sensors.ray_angles must be finite",
            ));
        }
        if sensors.max_distance <= 0.0 || sensors.march_step <= 0.0 || sensors.speed_scale <= 0.0
        {
            return Err(SimulationError::InvalidConfig(
                "sensor distances and speed_scale must be positive",
            ));
        }
        if sensors.march_step > sensors.max_distance {
            return Err(SimulationError::InvalidConfig(
                "sensors.march_step cannot exceed max_distance",
            ));
        }

        let control = &self.control;
        if control.throttle_gain < 0.0 || control.forward_step <= 0.0 || control.turn_delta <= 0.0
        {
            return Err(SimulationError::InvalidConfig(
                "throttle_gain must be non-negative, forward_step and turn_delta positive",
            ));
        }

        let termination = &self.termination;
        if termination.capture_radius <= 0.0 || termination.spawn_search_radius < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "capture_radius must be positive and spawn_search_radius non-negative",
            ));
        }
        if termination.min_movement < 0.0 {
            return Err(SimulationError::InvalidConfig(
                "min_movement must be non-negative",
            ));
        }
        if termination.stagnation_ticks == 0 || termination.step_budget == 0 {
            return Err(SimulationError::InvalidConfig(
                "stagnation_ticks and step_budget must be non-zero",
            ));
        }

        let fitness = &self.fitness;
        if fitness.progress_scale < 0.0
            || fitness.survival_cap < 0.0
            || fitness.proximity_scale < 0.0
            || fitness.speed_weight < 0.0
            || fitness.idle_penalty < 0.0
            || fitness.near_goal_threshold <= 0.0
        {
            return Err(SimulationError::InvalidConfig(
                "fitness weights must be non-negative and near_goal_threshold positive",
            ));
        }
        if fitness.goal_reward <= fitness.non_reaching_ceiling() {
            return Err(SimulationError::InvalidConfig(
                "fitness.goal_reward must exceed progress_scale + survival_cap + proximity_scale",
            ));
        }

        let replay = &self.replay;
        if replay.buffer_capacity == 0 || replay.batch_size == 0 {
            return Err(SimulationError::InvalidConfig(
                "replay buffer_capacity and batch_size must be non-zero",
            ));
        }
        if replay.batch_size > replay.buffer_capacity {
            return Err(SimulationError::InvalidConfig(
                "replay.batch_size cannot exceed buffer_capacity",
            ));
        }
        if !(0.0..=1.0).contains(&replay.gamma)
            || !(0.0..=1.0).contains(&replay.epsilon_start)
            || !(0.0..=1.0).contains(&replay.epsilon_floor)
            || !(0.0..=1.0).contains(&replay.epsilon_decay)
        {
            return Err(SimulationError::InvalidConfig(
                "gamma and epsilon parameters must lie in [0, 1]",
            ));
        }
        if replay.target_sync_interval == 0 {
            return Err(SimulationError::InvalidConfig(
                "replay.target_sync_interval must be non-zero",
            ));
        }

        if self.evolution.population_size == 0 {
            return Err(SimulationError::InvalidConfig(
                "evolution.population_size must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns an RNG seeded from the configuration, or from entropy when unseeded.
    #[must_use]
    pub fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = TrackPilotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.observation_len(), 11);
    }

    #[test]
    fn goal_floor_must_exceed_partial_credit() {
        let mut config = TrackPilotConfig::default();
        config.fitness.goal_reward = config.fitness.non_reaching_ceiling();
        assert!(matches!(
            config.validate(),
            Err(SimulationError::InvalidConfig(_))
        ));
    }

    #[test]
    fn batch_larger_than_capacity_is_rejected() {
        let mut config = TrackPilotConfig::default();
        config.replay.buffer_capacity = 8;
        config.replay.batch_size = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_ray_fan_is_rejected() {
        let mut config = TrackPilotConfig::default();
        config.sensors.ray_angles.clear();
        assert_eq!(
            config.validate(),
            Err(SimulationError::InvalidConfig(
                "sensors.ray_angles must contain at least one ray"
            ))
        );
    }
}
