//! Stateless force generators.
//!
//! Every function maps kinematic state to a force vector and touches nothing
//! else. Callers add the result to a [`Particle`](crate::particle::Particle)
//! or [`RigidBody`](crate::rigid_body::RigidBody) accumulator.
//!
//! # Sign conventions
//!
//! - Gravity is a scalar magnitude acting along -Y.
//! - Spring functions return the force on the FIRST endpoint. The second
//!   endpoint receives the negation.

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, ConfigResult};

/// Below this length a spring direction is undefined and no force is applied.
pub const MIN_SPRING_LENGTH: f32 = 1e-4;

/// Below this speed quadratic drag is skipped.
pub const MIN_DRAG_SPEED: f32 = 0.01;

/// Weight of a mass under gravity.
///
/// # Arguments
/// * `mass` - Body mass
/// * `gravity` - Gravity magnitude (positive means downward)
pub fn gravity_force(mass: f32, gravity: f32) -> Vec3 {
    Vec3::new(0.0, -gravity * mass, 0.0)
}

/// Linear viscous drag, `-coefficient * v`.
pub fn linear_drag(velocity: Vec3, coefficient: f32) -> Vec3 {
    -coefficient * velocity
}

/// Velocity-squared air drag, `-coefficient * |v| * v`.
///
/// Used on spring-hung bodies where a linear term would dominate the spring
/// damping at low speeds.
pub fn velocity_squared_drag(velocity: Vec3, coefficient: f32) -> Vec3 {
    -coefficient * velocity.length() * velocity
}

/// Aerodynamic drag parameters for [`quadratic_drag`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DragParams {
    /// Dimensionless drag coefficient (Cd)
    pub coefficient: f32,
    /// Fluid density (rho), 1.2 for air at sea level
    pub air_density: f32,
    /// Cross-sectional area facing the flow
    pub area: f32,
}

impl Default for DragParams {
    fn default() -> Self {
        Self {
            coefficient: 0.1,
            air_density: 1.2,
            area: 1.0,
        }
    }
}

impl DragParams {
    pub fn validate(&self) -> ConfigResult<()> {
        check_non_negative("drag coefficient", self.coefficient)?;
        check_non_negative("air density", self.air_density)?;
        check_non_negative("drag area", self.area)?;
        Ok(())
    }

    /// Speed at which drag balances the weight of `mass`.
    ///
    /// Infinite when the parameters produce no drag.
    pub fn terminal_speed(&self, mass: f32, gravity: f32) -> f32 {
        let k = 0.5 * self.coefficient * self.air_density * self.area;
        (mass * gravity / k).sqrt()
    }
}

/// Aerodynamic drag `0.5 * Cd * rho * A * |v|^2`, opposing motion.
///
/// Returns zero below [`MIN_DRAG_SPEED`].
pub fn quadratic_drag(velocity: Vec3, params: &DragParams) -> Vec3 {
    let speed = velocity.length();
    if speed < MIN_DRAG_SPEED {
        return Vec3::ZERO;
    }

    let magnitude = 0.5 * params.coefficient * params.air_density * params.area * speed * speed;
    -velocity / speed * magnitude
}

/// Damped Hooke spring between two points.
///
/// Returns the force on endpoint `a`, or `None` when the endpoints coincide.
/// The force pulls `a` toward `b` when stretched and pushes it away when
/// compressed; damping acts on the relative velocity along the spring axis.
///
/// # Arguments
/// * `pos_a`, `vel_a` - First endpoint state
/// * `pos_b`, `vel_b` - Second endpoint state
/// * `rest_length` - Natural length
/// * `stiffness` - Spring constant k
/// * `damping` - Damping coefficient c
pub fn damped_spring_force(
    pos_a: Vec3,
    vel_a: Vec3,
    pos_b: Vec3,
    vel_b: Vec3,
    rest_length: f32,
    stiffness: f32,
    damping: f32,
) -> Option<Vec3> {
    let delta = pos_b - pos_a;
    let length = delta.length();
    if length < MIN_SPRING_LENGTH {
        return None;
    }

    let direction = delta / length;
    let displacement = length - rest_length;

    let spring = stiffness * displacement * direction;
    let relative_velocity = vel_b - vel_a;
    let damper = damping * relative_velocity.dot(direction) * direction;

    Some(spring + damper)
}

/// Undamped Hooke force on endpoint `a` plus the signed extension.
///
/// Used by the fracture lattices, which damp globally instead of per edge.
pub fn hooke_force(pos_a: Vec3, pos_b: Vec3, rest_length: f32, stiffness: f32) -> Option<(Vec3, f32)> {
    let delta = pos_b - pos_a;
    let length = delta.length();
    if length < MIN_SPRING_LENGTH {
        return None;
    }

    let extension = length - rest_length;
    Some((stiffness * extension * (delta / length), extension))
}

/// Elastic energy stored in a spring extended by `extension`.
pub fn spring_potential_energy(stiffness: f32, extension: f32) -> f32 {
    0.5 * stiffness * extension * extension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gravity_scales_with_mass() {
        assert_eq!(gravity_force(2.0, 9.81), Vec3::new(0.0, -19.62, 0.0));
        assert_eq!(gravity_force(1.0, 0.0), Vec3::ZERO);
    }

    #[test]
    fn test_drags_oppose_velocity() {
        let v = Vec3::new(3.0, -4.0, 0.0);
        assert!(linear_drag(v, 0.5).dot(v) < 0.0);
        assert!(velocity_squared_drag(v, 0.1).dot(v) < 0.0);
        // |v| = 5, so -0.1 * 5 * v
        assert_eq!(velocity_squared_drag(v, 0.1), Vec3::new(-1.5, 2.0, 0.0));
    }

    #[test]
    fn test_quadratic_drag_magnitude() {
        let params = DragParams::default();
        let force = quadratic_drag(Vec3::new(10.0, 0.0, 0.0), &params);

        // 0.5 * 0.1 * 1.2 * 1.0 * 100 = 6.0
        assert!((force.x + 6.0).abs() < 1e-4, "got {}", force.x);
        assert_eq!(quadratic_drag(Vec3::new(0.001, 0.0, 0.0), &params), Vec3::ZERO);
    }

    #[test]
    fn test_drag_balances_weight_at_terminal_speed() {
        let params = DragParams::default();
        let speed = params.terminal_speed(2.0, 9.81);
        let force = quadratic_drag(Vec3::new(0.0, -speed, 0.0), &params);
        assert!((force.y - 2.0 * 9.81).abs() < 1e-3, "got {}", force.y);

        let bad = DragParams {
            area: -1.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_stretched_spring_pulls_endpoints_together() {
        let force = damped_spring_force(
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::ZERO,
            1.0,
            10.0,
            0.0,
        )
        .unwrap();

        assert_eq!(force, Vec3::new(10.0, 0.0, 0.0), "a is pulled toward b");
    }

    #[test]
    fn test_compressed_spring_pushes_apart() {
        let force = damped_spring_force(
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::new(0.5, 0.0, 0.0),
            Vec3::ZERO,
            1.0,
            10.0,
            0.0,
        )
        .unwrap();

        assert!(force.x < 0.0, "a is pushed away from b, got {}", force.x);
    }

    #[test]
    fn test_spring_damping_resists_separation() {
        // At rest length, b moving away: damping should pull a along with b
        let force = damped_spring_force(
            Vec3::ZERO,
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            1.0,
            10.0,
            0.5,
        )
        .unwrap();

        assert_eq!(force, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_degenerate_spring_returns_none() {
        let p = Vec3::new(1.0, 1.0, 1.0);
        assert!(damped_spring_force(p, Vec3::ZERO, p, Vec3::ZERO, 1.0, 10.0, 1.0).is_none());
        assert!(hooke_force(p, p, 1.0, 10.0).is_none());
    }
}
