//! Point masses used by the cloth grid and the assembly deformation network.

use bevy::math::Vec3;

use crate::error::{check_mass, ConfigResult};

/// A point mass with a force accumulator.
///
/// Forces added between two calls to [`Particle::integrate`] are summed and
/// consumed by the next integration, which clears the accumulator. Callers
/// re-add their forces every step.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    force: Vec3,
    mass: f32,
    /// Pinned particles ignore forces and integration. External code may
    /// still move them by writing `position`.
    pub pinned: bool,
}

impl Particle {
    pub fn new(position: Vec3, mass: f32) -> ConfigResult<Self> {
        Ok(Self {
            position,
            velocity: Vec3::ZERO,
            force: Vec3::ZERO,
            mass: check_mass("particle", mass)?,
            pinned: false,
        })
    }

    pub fn pinned(position: Vec3, mass: f32) -> ConfigResult<Self> {
        let mut particle = Self::new(position, mass)?;
        particle.pinned = true;
        Ok(particle)
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Force accumulated since the last integration.
    pub fn force(&self) -> Vec3 {
        self.force
    }

    pub fn add_force(&mut self, force: Vec3) {
        if !self.pinned {
            self.force += force;
        }
    }

    /// Semi-implicit Euler step.
    ///
    /// Velocity is updated from the accumulated force and gravity first, and
    /// the new velocity moves the position. `gravity` is a magnitude along -Y.
    pub fn integrate(&mut self, dt: f32, gravity: f32) {
        if self.pinned {
            return;
        }

        self.velocity += (self.force / self.mass) * dt;
        self.velocity.y -= gravity * dt;
        self.position += self.velocity * dt;

        self.force = Vec3::ZERO;
    }

    /// Clamp speed to `max_speed`, keeping direction.
    pub fn clamp_velocity(&mut self, max_speed: f32) {
        if self.velocity.length_squared() > max_speed * max_speed {
            self.velocity = self.velocity.normalize_or_zero() * max_speed;
        }
    }

    /// Keep the particle on or above the ground plane.
    ///
    /// Vertical velocity is reflected upward scaled by `bounciness`;
    /// horizontal velocity is multiplied by `friction` (1.0 keeps it all).
    pub fn apply_ground_collision(&mut self, ground_y: f32, bounciness: f32, friction: f32) {
        if self.position.y < ground_y {
            self.position.y = ground_y;
            self.velocity.y = self.velocity.y.abs() * bounciness;
            self.velocity.x *= friction;
            self.velocity.z *= friction;
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }

    pub fn kinetic_energy(&self) -> f32 {
        0.5 * self.mass * self.velocity.length_squared()
    }

    /// Gravitational potential energy relative to `ground_y`.
    pub fn potential_energy(&self, gravity: f32, ground_y: f32) -> f32 {
        self.mass * gravity * (self.position.y - ground_y)
    }
}
