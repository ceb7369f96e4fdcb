//! Single-agent value-based training: replay buffer, exploration and the trainer loop.

use std::collections::VecDeque;

use ordered_float::OrderedFloat;
use rand::{Rng, RngCore, seq::index};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    Action, DISCRETE_ACTIONS, Episode, EpisodeResult, FitnessEvaluator, ReplayConfig, SensorArray,
    SimulationError, Track, TrackPilotConfig, TrainingSink, ValueFunction, episode,
};

/// One step of experience.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub observation: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_observation: Vec<f32>,
    pub done: bool,
}

/// Fixed-capacity FIFO store of transitions. Single writer, single reader.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    capacity: usize,
    entries: VecDeque<Transition>,
}

impl ReplayBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a transition, evicting the oldest once full.
    pub fn push(&mut self, transition: Transition) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(transition);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transition> + '_ {
        self.entries.iter()
    }

    /// Draw `batch_size` distinct transitions uniformly. `None` until enough are stored.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        batch_size: usize,
    ) -> Option<Vec<&Transition>> {
        if batch_size == 0 || self.entries.len() < batch_size {
            return None;
        }
        let picks = index::sample(rng, self.entries.len(), batch_size);
        Some(picks.iter().map(|idx| &self.entries[idx]).collect())
    }
}

/// Epsilon-greedy exploration with multiplicative decay towards a floor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpsilonGreedy {
    epsilon: f32,
    decay: f32,
    floor: f32,
}

impl EpsilonGreedy {
    #[must_use]
    pub fn new(start: f32, decay: f32, floor: f32) -> Self {
        Self {
            epsilon: start.clamp(0.0, 1.0),
            decay,
            floor,
        }
    }

    #[must_use]
    pub const fn epsilon(&self) -> f32 {
        self.epsilon
    }

    /// Whether this step should take a uniformly random action.
    pub fn explore<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.random::<f32>() < self.epsilon
    }

    /// Called once per completed episode.
    pub fn decay(&mut self) {
        self.epsilon = (self.epsilon * self.decay).max(self.floor);
    }
}

/// Index of the largest value; the first wins ties.
#[must_use]
pub fn greedy_action(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, value)| OrderedFloat(**value))
        .map_or(0, |(idx, _)| idx)
}

/// Regression target for one observation: the full action-value vector to fit.
#[derive(Debug, Clone, PartialEq)]
pub struct QTarget {
    pub observation: Vec<f32>,
    pub values: Vec<f32>,
}

/// Summary of one training episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpisodeReport {
    pub episode: u32,
    pub result: EpisodeResult,
    pub total_reward: f32,
    /// Exploration rate used during the episode.
    pub epsilon: f32,
    /// Mean squared TD error over the gradient steps taken this episode.
    pub mean_td_error: Option<f32>,
    pub training_steps: u32,
    pub target_synced: bool,
}

/// Aggregate of a training session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainingSummary {
    pub episodes: u32,
    pub goals_reached: u32,
    pub best_reward: Option<f32>,
    pub final_epsilon: f32,
    pub training_steps: u64,
}

/// Value-based single-agent trainer with experience replay and a frozen target network.
#[derive(Debug)]
pub struct ReplayTrainer<V> {
    online: V,
    target: V,
    buffer: ReplayBuffer,
    exploration: EpsilonGreedy,
    settings: ReplayConfig,
    config: TrackPilotConfig,
    sensors: SensorArray,
    evaluator: FitnessEvaluator,
    episodes_completed: u32,
    training_steps: u64,
}

impl<V: ValueFunction> ReplayTrainer<V> {
    /// Build a trainer; `target` is immediately synchronized from `online`.
    pub fn new(
        config: &TrackPilotConfig,
        online: V,
        mut target: V,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        if online.action_count() != DISCRETE_ACTIONS {
            return Err(SimulationError::ValueWidthMismatch {
                expected: DISCRETE_ACTIONS,
                actual: online.action_count(),
            });
        }
        target.sync_from(&online)?;
        let settings = config.replay.clone();
        Ok(Self {
            online,
            target,
            buffer: ReplayBuffer::new(settings.buffer_capacity),
            exploration: EpsilonGreedy::new(
                settings.epsilon_start,
                settings.epsilon_decay,
                settings.epsilon_floor,
            ),
            settings,
            sensors: SensorArray::new(&config.sensors),
            evaluator: FitnessEvaluator::new(config),
            config: config.clone(),
            episodes_completed: 0,
            training_steps: 0,
        })
    }

    #[must_use]
    pub const fn online(&self) -> &V {
        &self.online
    }

    #[must_use]
    pub fn into_online(self) -> V {
        self.online
    }

    #[must_use]
    pub const fn buffer(&self) -> &ReplayBuffer {
        &self.buffer
    }

    #[must_use]
    pub const fn exploration(&self) -> &EpsilonGreedy {
        &self.exploration
    }

    #[must_use]
    pub const fn episodes_completed(&self) -> u32 {
        self.episodes_completed
    }

    fn predict_checked(value: &mut V, observation: &[f32]) -> Result<Vec<f32>, SimulationError> {
        let values = value.predict(observation)?;
        if values.len() != DISCRETE_ACTIONS {
            return Err(SimulationError::ValueWidthMismatch {
                expected: DISCRETE_ACTIONS,
                actual: values.len(),
            });
        }
        Ok(values)
    }

    /// Run one episode to termination, training after every tick once the buffer holds a batch.
    pub fn run_episode(
        &mut self,
        track: &Track,
        rng: &mut dyn RngCore,
    ) -> Result<EpisodeReport, SimulationError> {
        let mut episode = Episode::spawn(track, &self.config.control, &self.config.termination)?;
        let epsilon = self.exploration.epsilon();
        let mut observation = episode.observe(track, &self.sensors);
        let mut total_reward = 0.0;
        let mut td_sum = 0.0;
        let mut training_steps = 0u32;

        while episode.is_running() {
            let action = if self.exploration.explore(rng) {
                rng.random_range(0..DISCRETE_ACTIONS)
            } else {
                greedy_action(&Self::predict_checked(&mut self.online, &observation)?)
            };
            let discrete = episode::discrete_action(action)?;
            let Some(outcome) = episode.apply(track, Action::Discrete(discrete)) else {
                break;
            };
            let reward = self.evaluator.step_reward(&outcome);
            total_reward += reward;
            let next_observation = episode.observe(track, &self.sensors);
            self.buffer.push(Transition {
                observation: std::mem::take(&mut observation),
                action,
                reward,
                next_observation: next_observation.clone(),
                done: outcome.status.is_terminal(),
            });
            observation = next_observation;

            if let Some(td_error) = self.train_batch(rng)? {
                td_sum += td_error;
                training_steps += 1;
            }
        }

        self.exploration.decay();
        self.episodes_completed += 1;
        let target_synced = self
            .episodes_completed
            .is_multiple_of(self.settings.target_sync_interval);
        if target_synced {
            self.target.sync_from(&self.online)?;
            debug!(episode = self.episodes_completed, "target network synchronized");
        }

        Ok(EpisodeReport {
            episode: self.episodes_completed,
            result: episode.result(),
            total_reward,
            epsilon,
            mean_td_error: (training_steps > 0).then(|| td_sum / training_steps as f32),
            training_steps,
            target_synced,
        })
    }

    /// Sample a batch and take one gradient step. Returns the batch's mean squared TD error.
    fn train_batch(&mut self, rng: &mut dyn RngCore) -> Result<Option<f32>, SimulationError> {
        let Self {
            online,
            target,
            buffer,
            settings,
            training_steps,
            ..
        } = self;
        let Some(batch) = buffer.sample(rng, settings.batch_size) else {
            return Ok(None);
        };

        let mut targets = Vec::with_capacity(batch.len());
        let mut squared_error = 0.0;
        for transition in &batch {
            let mut values = Self::predict_checked(online, &transition.observation)?;
            let bootstrap = if transition.done {
                0.0
            } else {
                let next = Self::predict_checked(target, &transition.next_observation)?;
                next.iter().copied().fold(f32::NEG_INFINITY, f32::max)
            };
            let value_target = transition.reward + settings.gamma * bootstrap;
            let td_error = value_target - values[transition.action];
            squared_error += td_error * td_error;
            values[transition.action] = value_target;
            targets.push(QTarget {
                observation: transition.observation.clone(),
                values,
            });
        }

        online.fit(&targets)?;
        *training_steps += 1;
        Ok(Some(squared_error / targets.len() as f32))
    }

    /// Run `episodes` sequential episodes, reporting each to `sink`.
    pub fn train(
        &mut self,
        track: &Track,
        rng: &mut dyn RngCore,
        episodes: u32,
        sink: &mut dyn TrainingSink,
    ) -> Result<TrainingSummary, SimulationError> {
        let mut summary = TrainingSummary::default();
        for _ in 0..episodes {
            let report = self.run_episode(track, rng)?;
            summary.episodes += 1;
            if report.result.reached_goal() {
                summary.goals_reached += 1;
            }
            if summary
                .best_reward
                .is_none_or(|best| report.total_reward > best)
            {
                summary.best_reward = Some(report.total_reward);
            }
            info!(
                episode = report.episode,
                cause = report.result.terminal_cause.as_str(),
                steps = report.result.steps_survived,
                reward = report.total_reward,
                epsilon = report.epsilon,
                td_error = report.mean_td_error.unwrap_or(f32::NAN),
                buffer = self.buffer.len(),
                "episode complete",
            );
            sink.on_episode(&report);
        }
        summary.final_epsilon = self.exploration.epsilon();
        summary.training_steps = self.training_steps;
        Ok(summary)
    }
}
