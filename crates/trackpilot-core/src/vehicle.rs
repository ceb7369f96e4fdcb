//! Kinematic vehicle state and the actions that drive it.

use serde::{Deserialize, Serialize};

use crate::{ControlConfig, Position, heading_direction, wrap_degrees};

/// Discrete actions available to value-based agents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DiscreteAction {
    /// Move forward by the configured step.
    Forward,
    /// Increase heading (counter-clockwise in math space).
    TurnLeft,
    /// Decrease heading.
    TurnRight,
}

impl DiscreteAction {
    pub const ALL: [DiscreteAction; crate::DISCRETE_ACTIONS] =
        [Self::Forward, Self::TurnLeft, Self::TurnRight];

    /// Map an action index in `0..3` onto an action.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Forward => 0,
            Self::TurnLeft => 1,
            Self::TurnRight => 2,
        }
    }
}

/// Control applied to a vehicle for one tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum Action {
    /// Unitless steering and throttle produced by an evolved policy.
    Steering { steering: f32, throttle: f32 },
    Discrete(DiscreteAction),
}

/// Kinematic state of the simulated car.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Vehicle {
    position: Position,
    heading: f32,
    speed: f32,
}

impl Vehicle {
    #[must_use]
    pub fn new(position: Position, heading: f32) -> Self {
        Self {
            position,
            heading: wrap_degrees(heading),
            speed: 0.0,
        }
    }

    #[must_use]
    pub const fn position(&self) -> Position {
        self.position
    }

    /// Heading in degrees within `[0, 360)`.
    #[must_use]
    pub const fn heading(&self) -> f32 {
        self.heading
    }

    #[must_use]
    pub const fn speed(&self) -> f32 {
        self.speed
    }

    pub fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    /// Move `distance` units along the current heading.
    pub fn advance(&mut self, distance: f32) {
        let (dx, dy) = heading_direction(self.heading);
        self.position.x += distance * dx;
        self.position.y += distance * dy;
    }

    /// Face along the screen-space direction `(dx, dy)`. No-op for the zero vector.
    pub fn set_heading_towards(&mut self, dx: f32, dy: f32) {
        if dx == 0.0 && dy == 0.0 {
            return;
        }
        self.heading = wrap_degrees((-dy).atan2(dx).to_degrees());
    }

    pub fn adjust_heading(&mut self, delta_degrees: f32) {
        self.heading = wrap_degrees(self.heading + delta_degrees);
    }

    /// Apply one tick of control. Steering rotates first, then the vehicle advances at the
    /// throttle speed; discrete turns rotate in place.
    pub fn apply(&mut self, action: Action, control: &ControlConfig) {
        match action {
            Action::Steering { steering, throttle } => {
                self.adjust_heading(steering * control.steering_gain);
                self.speed = (throttle * control.throttle_gain).max(0.0);
                self.advance(self.speed);
            }
            Action::Discrete(DiscreteAction::Forward) => {
                self.speed = control.forward_step;
                self.advance(control.forward_step);
            }
            Action::Discrete(DiscreteAction::TurnLeft) => {
                self.speed = 0.0;
                self.adjust_heading(control.turn_delta);
            }
            Action::Discrete(DiscreteAction::TurnRight) => {
                self.speed = 0.0;
                self.adjust_heading(-control.turn_delta);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn advance_follows_heading_with_inverted_y() {
        let mut vehicle = Vehicle::new(Position::new(100.0, 100.0), 0.0);
        vehicle.advance(5.0);
        assert_eq!(vehicle.position(), Position::new(105.0, 100.0));

        let mut vehicle = Vehicle::new(Position::new(100.0, 100.0), 90.0);
        vehicle.advance(10.0);
        assert!(approx(vehicle.position().x, 100.0));
        assert!(approx(vehicle.position().y, 90.0));
    }

    #[test]
    fn set_heading_towards_matches_motion() {
        let mut vehicle = Vehicle::new(Position::new(0.0, 0.0), 0.0);
        vehicle.set_heading_towards(3.0, -3.0);
        assert!(approx(vehicle.heading(), 45.0));
        vehicle.advance(2.0_f32.sqrt());
        assert!(approx(vehicle.position().x, 1.0));
        assert!(approx(vehicle.position().y, -1.0));
    }

    #[test]
    fn zero_direction_keeps_heading() {
        let mut vehicle = Vehicle::new(Position::default(), 33.0);
        vehicle.set_heading_towards(0.0, 0.0);
        assert_eq!(vehicle.heading(), 33.0);
    }

    #[test]
    fn adjust_heading_wraps() {
        let mut vehicle = Vehicle::new(Position::default(), 350.0);
        vehicle.adjust_heading(20.0);
        assert!(approx(vehicle.heading(), 10.0));
        vehicle.adjust_heading(-30.0);
        assert!(approx(vehicle.heading(), 340.0));
    }

    #[test]
    fn steering_action_clamps_reverse_throttle() {
        let control = ControlConfig::default();
        let mut vehicle = Vehicle::new(Position::new(10.0, 10.0), 0.0);
        vehicle.apply(
            Action::Steering {
                steering: 1.0,
                throttle: -2.0,
            },
            &control,
        );
        assert_eq!(vehicle.speed(), 0.0);
        assert_eq!(vehicle.position(), Position::new(10.0, 10.0));
        assert!(approx(vehicle.heading(), 5.0));

        vehicle.apply(
            Action::Steering {
                steering: 0.0,
                throttle: 1.0,
            },
            &control,
        );
        assert!(approx(vehicle.speed(), 3.0));
        assert!(vehicle.position().x > 12.9);
    }

    #[test]
    fn discrete_turns_rotate_in_place() {
        let control = ControlConfig::default();
        let mut vehicle = Vehicle::new(Position::new(10.0, 10.0), 0.0);
        vehicle.apply(Action::Discrete(DiscreteAction::TurnLeft), &control);
        assert!(approx(vehicle.heading(), 10.0));
        vehicle.apply(Action::Discrete(DiscreteAction::TurnRight), &control);
        vehicle.apply(Action::Discrete(DiscreteAction::TurnRight), &control);
        assert!(approx(vehicle.heading(), 350.0));
        assert_eq!(vehicle.position(), Position::new(10.0, 10.0));
    }

    #[test]
    fn discrete_action_indices_round_trip() {
        for action in DiscreteAction::ALL {
            assert_eq!(DiscreteAction::from_index(action.index()), Some(action));
        }
        assert_eq!(DiscreteAction::from_index(3), None);
    }
}
