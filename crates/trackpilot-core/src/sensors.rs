//! Ray-marching distance sensors and observation assembly.

use crate::{SensorConfig, Track, Vehicle, heading_direction};

/// Fixed fan of distance rays cast relative to the vehicle heading.
///
/// Stateless between calls: readings depend only on the vehicle pose and the track.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorArray {
    ray_angles: Vec<f32>,
    max_distance: f32,
    march_step: f32,
    speed_scale: f32,
}

impl SensorArray {
    #[must_use]
    pub fn new(config: &SensorConfig) -> Self {
        Self {
            ray_angles: config.ray_angles.clone(),
            max_distance: config.max_distance,
            march_step: config.march_step,
            speed_scale: config.speed_scale,
        }
    }

    /// Number of rays in the fan.
    #[must_use]
    pub fn ray_count(&self) -> usize {
        self.ray_angles.len()
    }

    #[must_use]
    pub fn observation_len(&self) -> usize {
        crate::STATE_FEATURES + self.ray_angles.len()
    }

    /// Normalized free distance along each ray, in `[0, 1]`.
    #[must_use]
    pub fn sense(&self, vehicle: &Vehicle, track: &Track) -> Vec<f32> {
        let mut readings = Vec::with_capacity(self.ray_angles.len());
        self.sense_into(vehicle, track, &mut readings);
        readings
    }

    fn sense_into(&self, vehicle: &Vehicle, track: &Track, out: &mut Vec<f32>) {
        let origin = vehicle.position();
        for offset in &self.ray_angles {
            let (dx, dy) = heading_direction(vehicle.heading() + offset);
            let mut travelled = 0.0_f32;
            loop {
                let next = (travelled + self.march_step).min(self.max_distance);
                if next <= travelled {
                    break;
                }
                if !track.is_drivable(origin.x + dx * next, origin.y + dy * next) {
                    break;
                }
                travelled = next;
            }
            out.push((travelled / self.max_distance).clamp(0.0, 1.0));
        }
    }

    /// Build the policy observation: normalized vehicle state followed by the ray readings.
    #[must_use]
    pub fn observe(&self, vehicle: &Vehicle, track: &Track) -> Vec<f32> {
        let position = vehicle.position();
        let mut observation = Vec::with_capacity(self.observation_len());
        observation.push(position.x / track.width() as f32);
        observation.push(position.y / track.height() as f32);
        observation.push(vehicle.heading() / 360.0);
        observation.push(vehicle.speed() / self.speed_scale);
        self.sense_into(vehicle, track, &mut observation);
        observation
    }
}
