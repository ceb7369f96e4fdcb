//! Single-vehicle episode state machine: spawn, tick, terminate.
//!
//! Termination is checked after the action is applied, in a fixed priority order:
//! off-road, goal capture, stagnation, then step budget. A vehicle that lands off-road inside
//! the capture radius on the same tick therefore terminates as [`TerminalCause::OffRoad`].

use serde::{Deserialize, Serialize};

use crate::{
    Action, ControlConfig, DISCRETE_ACTIONS, DiscreteAction, DiscretePolicy, Position,
    STEERING_ACTION_WIDTH, SensorArray, SimulationError, SteeringPolicy, TerminationConfig, Tick,
    Track, Vehicle,
};

/// Why an episode stopped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TerminalCause {
    OffRoad,
    ReachedGoal,
    StuckTimeout,
    StepBudgetExhausted,
}

impl TerminalCause {
    pub const ALL: [TerminalCause; 4] = [
        Self::OffRoad,
        Self::ReachedGoal,
        Self::StuckTimeout,
        Self::StepBudgetExhausted,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OffRoad => "off_road",
            Self::ReachedGoal => "reached_goal",
            Self::StuckTimeout => "stuck_timeout",
            Self::StepBudgetExhausted => "step_budget_exhausted",
        }
    }
}

/// Lifecycle state of an episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum EpisodeStatus {
    #[default]
    Running,
    Terminated(TerminalCause),
}

impl EpisodeStatus {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    #[must_use]
    pub const fn cause(self) -> Option<TerminalCause> {
        match self {
            Self::Running => None,
            Self::Terminated(cause) => Some(cause),
        }
    }
}

/// Per-tick summary consumed by the stepwise reward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub tick: Tick,
    pub status: EpisodeStatus,
    /// Distance moved during this tick.
    pub displacement: f32,
    /// Distance to goal before the action, when a goal is configured.
    pub previous_distance: Option<f32>,
    /// Distance to goal after the action, when a goal is configured.
    pub distance_to_goal: Option<f32>,
}

/// Trajectory statistics of a finished episode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpisodeResult {
    pub steps_survived: u32,
    /// Distance to goal at spawn; `None` when the track has no goal.
    pub initial_distance_to_goal: Option<f32>,
    /// Running minimum over the spawn point and every tick; `None` when the track has no goal.
    pub min_distance_to_goal: Option<f32>,
    pub terminal_cause: TerminalCause,
    pub start_position: Position,
    pub final_position: Position,
}

impl EpisodeResult {
    #[must_use]
    pub fn reached_goal(&self) -> bool {
        self.terminal_cause == TerminalCause::ReachedGoal
    }

    /// Straight-line distance between spawn and final position.
    #[must_use]
    pub fn net_displacement(&self) -> f32 {
        self.start_position.distance_to(self.final_position)
    }
}

/// One vehicle driving one track until a terminal condition fires.
#[derive(Debug, Clone)]
pub struct Episode {
    vehicle: Vehicle,
    control: ControlConfig,
    capture_radius: f32,
    min_movement: f32,
    stagnation_ticks: u32,
    step_budget: u32,
    goal: Option<Position>,
    tick: Tick,
    stagnant_ticks: u32,
    status: EpisodeStatus,
    start: Position,
    initial_distance: Option<f32>,
    min_distance: Option<f32>,
}

impl Episode {
    /// Spawn a vehicle at the track's start pose, snapping to the nearest drivable cell when
    /// the recorded start is off-road.
    pub fn spawn(
        track: &Track,
        control: &ControlConfig,
        termination: &TerminationConfig,
    ) -> Result<Self, SimulationError> {
        let start = track.resolve_spawn(termination.spawn_search_radius)?;
        let vehicle = Vehicle::new(start.position(), start.heading);
        let goal = track.goal();
        let initial_distance = goal.map(|goal| start.position().distance_to(goal));
        Ok(Self {
            vehicle,
            control: control.clone(),
            capture_radius: termination.capture_radius,
            min_movement: termination.min_movement,
            stagnation_ticks: termination.stagnation_ticks,
            step_budget: termination.step_budget,
            goal,
            tick: Tick::zero(),
            stagnant_ticks: 0,
            status: EpisodeStatus::Running,
            start: start.position(),
            initial_distance,
            min_distance: initial_distance,
        })
    }

    /// Override the step budget, e.g. with a generation-wide budget.
    #[must_use]
    pub fn with_step_budget(mut self, step_budget: u32) -> Self {
        self.step_budget = step_budget.max(1);
        self
    }

    #[must_use]
    pub const fn vehicle(&self) -> &Vehicle {
        &self.vehicle
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn status(&self) -> EpisodeStatus {
        self.status
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Consecutive ticks with displacement below the minimal-movement threshold.
    #[must_use]
    pub const fn stagnant_ticks(&self) -> u32 {
        self.stagnant_ticks
    }

    #[must_use]
    pub const fn min_distance_to_goal(&self) -> Option<f32> {
        self.min_distance
    }

    /// Current observation for the policy.
    #[must_use]
    pub fn observe(&self, track: &Track, sensors: &SensorArray) -> Vec<f32> {
        sensors.observe(&self.vehicle, track)
    }

    fn distance_to_goal(&self) -> Option<f32> {
        self.goal
            .map(|goal| self.vehicle.position().distance_to(goal))
    }

    /// Apply one action and evaluate termination. Returns `None` once the episode has ended.
    pub fn apply(&mut self, track: &Track, action: Action) -> Option<StepOutcome> {
        if self.status.is_terminal() {
            return None;
        }

        let before = self.vehicle.position();
        let previous_distance = self.distance_to_goal();
        self.vehicle.apply(action, &self.control);
        self.tick = self.tick.next();

        let after = self.vehicle.position();
        let displacement = before.distance_to(after);
        let distance_to_goal = self.distance_to_goal();
        if let Some(distance) = distance_to_goal {
            self.min_distance = Some(self.min_distance.map_or(distance, |m| m.min(distance)));
        }

        if displacement < self.min_movement {
            self.stagnant_ticks += 1;
        } else {
            self.stagnant_ticks = 0;
        }

        self.status = self.check_termination(track, distance_to_goal);
        Some(StepOutcome {
            tick: self.tick,
            status: self.status,
            displacement,
            previous_distance,
            distance_to_goal,
        })
    }

    fn check_termination(&self, track: &Track, distance_to_goal: Option<f32>) -> EpisodeStatus {
        let position = self.vehicle.position();
        if !track.is_drivable(position.x, position.y) {
            return EpisodeStatus::Terminated(TerminalCause::OffRoad);
        }
        if distance_to_goal.is_some_and(|distance| distance <= self.capture_radius) {
            return EpisodeStatus::Terminated(TerminalCause::ReachedGoal);
        }
        if self.stagnant_ticks >= self.stagnation_ticks {
            return EpisodeStatus::Terminated(TerminalCause::StuckTimeout);
        }
        if self.tick.0 >= u64::from(self.step_budget) {
            return EpisodeStatus::Terminated(TerminalCause::StepBudgetExhausted);
        }
        EpisodeStatus::Running
    }

    /// Observe, query a steering policy, and apply its action.
    pub fn step_steering(
        &mut self,
        track: &Track,
        sensors: &SensorArray,
        policy: &mut dyn SteeringPolicy,
    ) -> Result<Option<StepOutcome>, SimulationError> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        let observation = self.observe(track, sensors);
        let outputs = policy.act(&observation)?;
        let action = steering_action(&outputs)?;
        Ok(self.apply(track, action))
    }

    /// Observe, query a discrete policy, and apply its action.
    pub fn step_discrete(
        &mut self,
        track: &Track,
        sensors: &SensorArray,
        policy: &mut dyn DiscretePolicy,
    ) -> Result<Option<StepOutcome>, SimulationError> {
        if self.status.is_terminal() {
            return Ok(None);
        }
        let observation = self.observe(track, sensors);
        let action = discrete_action(policy.choose(&observation)?)?;
        Ok(self.apply(track, Action::Discrete(action)))
    }

    /// Snapshot the trajectory statistics. A still-running episode is reported as having
    /// exhausted its budget, which is how callers halting at a tick boundary see it.
    #[must_use]
    pub fn result(&self) -> EpisodeResult {
        EpisodeResult {
            steps_survived: u32::try_from(self.tick.0).unwrap_or(u32::MAX),
            initial_distance_to_goal: self.initial_distance,
            min_distance_to_goal: self.min_distance,
            terminal_cause: self
                .status
                .cause()
                .unwrap_or(TerminalCause::StepBudgetExhausted),
            start_position: self.start,
            final_position: self.vehicle.position(),
        }
    }

    /// Drive a steering policy until the episode terminates.
    pub fn run_steering(
        mut self,
        track: &Track,
        sensors: &SensorArray,
        policy: &mut dyn SteeringPolicy,
    ) -> Result<EpisodeResult, SimulationError> {
        while self.step_steering(track, sensors, policy)?.is_some() {}
        Ok(self.result())
    }

    /// Drive a discrete policy until the episode terminates.
    pub fn run_discrete(
        mut self,
        track: &Track,
        sensors: &SensorArray,
        policy: &mut dyn DiscretePolicy,
    ) -> Result<EpisodeResult, SimulationError> {
        while self.step_discrete(track, sensors, policy)?.is_some() {}
        Ok(self.result())
    }
}

/// Validate a steering policy output vector. Wrong widths are rejected, never coerced.
pub fn steering_action(outputs: &[f32]) -> Result<Action, SimulationError> {
    match outputs {
        [steering, throttle] => Ok(Action::Steering {
            steering: *steering,
            throttle: *throttle,
        }),
        _ => Err(SimulationError::MalformedAction {
            expected: STEERING_ACTION_WIDTH,
            actual: outputs.len(),
        }),
    }
}

/// Validate a discrete action index.
pub fn discrete_action(index: usize) -> Result<DiscreteAction, SimulationError> {
    DiscreteAction::from_index(index).ok_or(SimulationError::UnknownAction {
        index,
        available: DISCRETE_ACTIONS,
    })
}
