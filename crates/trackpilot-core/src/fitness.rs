//! Fitness and reward shaping.
//!
//! Population mode scores whole trajectories. Any goal-reaching episode scores at least
//! `goal_reward`, and [`TrackPilotConfig::validate`](crate::TrackPilotConfig::validate) keeps
//! that floor strictly above the best possible partial-credit score.

use crate::{
    EpisodeResult, EpisodeStatus, FitnessConfig, RewardConfig, StepOutcome, TerminalCause,
    TrackPilotConfig,
};

/// Maps episode statistics onto learning signal for both training schemes.
#[derive(Debug, Clone, PartialEq)]
pub struct FitnessEvaluator {
    fitness: FitnessConfig,
    reward: RewardConfig,
    step_budget: u32,
}

impl FitnessEvaluator {
    #[must_use]
    pub fn new(config: &TrackPilotConfig) -> Self {
        Self {
            fitness: config.fitness.clone(),
            reward: config.reward.clone(),
            step_budget: config.termination.step_budget,
        }
    }

    /// Fitness every goal-reaching episode is guaranteed to meet.
    #[must_use]
    pub fn goal_floor(&self) -> f32 {
        self.fitness.goal_reward
    }

    /// Population-mode fitness of a finished episode.
    #[must_use]
    pub fn evaluate(&self, result: &EpisodeResult) -> f32 {
        let weights = &self.fitness;
        if result.reached_goal() {
            let unused = self.step_budget.saturating_sub(result.steps_survived) as f32;
            return weights.goal_reward + (unused * weights.speed_weight).max(0.0);
        }

        let mut fitness = 0.0;

        if let (Some(initial), Some(min)) =
            (result.initial_distance_to_goal, result.min_distance_to_goal)
        {
            if initial > 0.0 {
                let progress = ((initial - min) / initial).clamp(0.0, 1.0);
                fitness += progress * weights.progress_scale;
            }
            if min < weights.near_goal_threshold {
                let closeness = (weights.near_goal_threshold - min) / weights.near_goal_threshold;
                fitness += closeness.clamp(0.0, 1.0).powi(3) * weights.proximity_scale;
            }
        }

        let budget = self.step_budget.max(1) as f32;
        let survival = (result.steps_survived as f32 / budget).min(1.0);
        fitness += survival * weights.survival_cap;

        if result.net_displacement() < weights.idle_displacement {
            fitness -= weights.idle_penalty;
        }
        fitness
    }

    /// Single-agent reward for one tick.
    #[must_use]
    pub fn step_reward(&self, outcome: &StepOutcome) -> f32 {
        let reward = &self.reward;
        if outcome.status == EpisodeStatus::Terminated(TerminalCause::OffRoad) {
            return reward.off_road_penalty;
        }

        let mut total = reward.alive_reward;
        if let (Some(before), Some(after)) = (outcome.previous_distance, outcome.distance_to_goal)
        {
            total += (before - after) * reward.shaping_weight;
        }
        if outcome.status == EpisodeStatus::Terminated(TerminalCause::ReachedGoal) {
            total += reward.goal_bonus;
        }
        total
    }
}
