//! Rigid bodies: integration under accumulated force and ground response.
//!
//! One data structure covers every body in the sandbox. Shape-specific
//! behaviour (bounds, support extent, inertia size) is dispatched on the
//! [`Shape`] tag, and assembly membership is a [`MotionState`] tag instead of
//! a parent pointer.
//!
//! # Per-step pipeline
//!
//! 1. Caller adds external forces ([`RigidBody::add_force`])
//! 2. [`RigidBody::integrate`] adds gravity/drag, updates velocity then position
//! 3. [`RigidBody::resolve_ground`] clamps to the ground plane and bounces

use bevy::math::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::config::WorldConfig;
use crate::error::{check_length, check_mass, check_unit, ConfigResult};
use crate::forces::{gravity_force, linear_drag, quadratic_drag};
use crate::world::AssemblyId;

/// Spin below this rate is neither integrated nor damped.
const MIN_ANGULAR_SPEED: f32 = 0.01;

/// Collision shape of a body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    /// Axis-aligned box.
    Box { half_extents: Vec3 },
    /// Sphere.
    Sphere { radius: f32 },
    /// Aggregate stand-in for an intact fragmentable assembly. Collides as a box.
    Composite { half_extents: Vec3 },
}

impl Default for Shape {
    fn default() -> Self {
        Shape::Box {
            half_extents: Vec3::splat(0.5),
        }
    }
}

impl Shape {
    /// Box with full edge lengths `size`.
    pub fn cuboid(size: Vec3) -> Self {
        Shape::Box {
            half_extents: size * 0.5,
        }
    }

    pub fn sphere(radius: f32) -> Self {
        Shape::Sphere { radius }
    }

    /// Half extents of the axis-aligned bounding box.
    pub fn half_extents(&self) -> Vec3 {
        match *self {
            Shape::Box { half_extents } | Shape::Composite { half_extents } => half_extents,
            Shape::Sphere { radius } => Vec3::splat(radius),
        }
    }

    /// Extent of the shape along a unit direction, measured from its centre.
    pub fn support(&self, direction: Vec3) -> f32 {
        match *self {
            Shape::Box { half_extents } | Shape::Composite { half_extents } => {
                (half_extents * direction).abs().dot(Vec3::ONE)
            }
            Shape::Sphere { radius } => radius,
        }
    }

    /// Mean full edge length, used by the solid-cube inertia approximation.
    pub fn average_size(&self) -> f32 {
        let h = self.half_extents();
        2.0 * (h.x + h.y + h.z) / 3.0
    }

    pub fn is_sphere(&self) -> bool {
        matches!(self, Shape::Sphere { .. })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        match *self {
            Shape::Box { half_extents } | Shape::Composite { half_extents } => {
                check_length("box half extent x", half_extents.x)?;
                check_length("box half extent y", half_extents.y)?;
                check_length("box half extent z", half_extents.z)?;
            }
            Shape::Sphere { radius } => {
                check_length("sphere radius", radius)?;
            }
        }
        Ok(())
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Overlap test; touching boxes count as intersecting.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }
}

/// Whether a body simulates on its own or follows an assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// Integrated and collided independently.
    Free,
    /// Positioned by its assembly each step; not physical.
    Slaved { assembly: AssemblyId, piece: usize },
}

/// Everything needed to spawn a body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigidBodyDesc {
    pub position: Vec3,
    pub velocity: Vec3,
    pub shape: Shape,
    pub mass: f32,
    /// Restitution coefficient in [0, 1].
    pub bounciness: f32,
    /// Friction coefficient in [0, 1].
    pub friction: f32,
    pub use_gravity: bool,
    pub enable_collisions: bool,
}

impl Default for RigidBodyDesc {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            shape: Shape::default(),
            mass: 1.0,
            bounciness: 0.7,
            friction: 0.1,
            use_gravity: true,
            enable_collisions: true,
        }
    }
}

impl RigidBodyDesc {
    pub fn cube(position: Vec3, size: f32, mass: f32) -> Self {
        Self {
            position,
            shape: Shape::cuboid(Vec3::splat(size)),
            mass,
            ..Default::default()
        }
    }

    pub fn sphere(position: Vec3, radius: f32, mass: f32) -> Self {
        Self {
            position,
            shape: Shape::sphere(radius),
            mass,
            ..Default::default()
        }
    }

    pub fn with_velocity(mut self, velocity: Vec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_material(mut self, bounciness: f32, friction: f32) -> Self {
        self.bounciness = bounciness;
        self.friction = friction;
        self
    }

    pub fn validate(&self) -> ConfigResult<()> {
        check_mass("body", self.mass)?;
        check_unit("bounciness", self.bounciness)?;
        check_unit("friction", self.friction)?;
        self.shape.validate()
    }
}

/// Result of a ground contact that reversed downward motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundImpact {
    /// Downward speed at contact.
    pub speed: f32,
    /// Kinetic energy of the vertical motion at contact, `0.5 * m * vy^2`.
    pub energy: f32,
}

/// A simulated body.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub bounciness: f32,
    pub friction: f32,
    pub use_gravity: bool,
    pub enable_collisions: bool,
    shape: Shape,
    mass: f32,
    force: Vec3,
    destroyed: bool,
    motion: MotionState,
    spawn: RigidBodyDesc,
}

impl RigidBody {
    pub fn new(desc: RigidBodyDesc) -> ConfigResult<Self> {
        desc.validate()?;
        Ok(Self {
            position: desc.position,
            rotation: Quat::IDENTITY,
            velocity: desc.velocity,
            angular_velocity: Vec3::ZERO,
            bounciness: desc.bounciness,
            friction: desc.friction,
            use_gravity: desc.use_gravity,
            enable_collisions: desc.enable_collisions,
            shape: desc.shape,
            mass: desc.mass,
            force: Vec3::ZERO,
            destroyed: false,
            motion: MotionState::Free,
            spawn: desc,
        })
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn motion(&self) -> MotionState {
        self.motion
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Free, alive bodies take part in integration and collision.
    pub fn is_simulated(&self) -> bool {
        !self.destroyed && self.motion == MotionState::Free
    }

    /// Force accumulated since the last integration.
    pub fn accumulated_force(&self) -> Vec3 {
        self.force
    }

    /// Bounds derived from the current position; never cached.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_center(self.position, self.shape.half_extents())
    }

    /// Lowest point of the body.
    pub fn bottom(&self) -> f32 {
        self.position.y - self.shape.half_extents().y
    }

    /// Top-face centre, where tethers attach.
    pub fn attachment_point(&self) -> Vec3 {
        self.position + Vec3::new(0.0, self.shape.half_extents().y, 0.0)
    }

    pub fn set_mass(&mut self, mass: f32) -> ConfigResult<()> {
        self.mass = check_mass("body", mass)?;
        self.spawn.mass = mass;
        Ok(())
    }

    pub fn set_material(&mut self, bounciness: f32, friction: f32) -> ConfigResult<()> {
        self.bounciness = check_unit("bounciness", bounciness)?;
        self.friction = check_unit("friction", friction)?;
        self.spawn.bounciness = bounciness;
        self.spawn.friction = friction;
        Ok(())
    }

    /// Accumulate a force for the next integration.
    pub fn add_force(&mut self, force: Vec3) {
        if !self.destroyed {
            self.force += force;
        }
    }

    /// Apply an instantaneous impulse, `v += J / m`.
    pub fn add_impulse(&mut self, impulse: Vec3) {
        if !self.destroyed {
            self.velocity += impulse / self.mass;
        }
    }

    /// Advance one step with semi-implicit Euler.
    ///
    /// Destroyed and slaved bodies are skipped. The force accumulator is
    /// cleared whether or not the body moved.
    pub fn integrate(&mut self, dt: f32, config: &WorldConfig) {
        if !self.is_simulated() {
            self.force = Vec3::ZERO;
            return;
        }

        let mut force = self.force;
        if self.use_gravity {
            force += gravity_force(self.mass, config.gravity);
        }
        if config.enable_air_resistance {
            force += linear_drag(self.velocity, self.friction * self.mass);
        }
        if let Some(drag) = &config.aero_drag {
            force += quadratic_drag(self.velocity, drag);
        }

        let acceleration = force / self.mass;
        self.velocity += acceleration * dt;
        self.velocity = self.velocity.clamp_length_max(config.max_speed);
        self.position += self.velocity * dt;

        if self.angular_velocity.length() > MIN_ANGULAR_SPEED {
            self.rotation = integrate_rotation(self.rotation, self.angular_velocity, dt);
            self.angular_velocity *= config.angular_damping;
        }

        self.force = Vec3::ZERO;
    }

    /// Downward speed if the body is touching or below the ground while
    /// moving down, without changing any state.
    pub fn pending_ground_impact(&self, ground_y: f32) -> Option<f32> {
        if self.bottom() <= ground_y && self.velocity.y < 0.0 {
            Some(-self.velocity.y)
        } else {
            None
        }
    }

    /// Clamp to the ground plane and bounce.
    ///
    /// Returns the impact when downward motion was reversed.
    pub fn resolve_ground(&mut self, config: &WorldConfig) -> Option<GroundImpact> {
        if !self.is_simulated() || !self.enable_collisions {
            return None;
        }

        let ground_y = config.ground_height;
        let extent = self.shape.half_extents().y;
        let impact_speed = self.pending_ground_impact(ground_y);
        let depth = ground_y - self.bottom();

        if depth > 0.0 {
            self.position.y = ground_y + extent;
        }

        let speed = impact_speed?;
        self.position.y = ground_y + extent;

        // Lifting out of the ground gains m*g*depth; the rebound pays for it.
        let mut rebound = speed;
        if self.use_gravity && depth > 0.0 {
            rebound = (speed * speed - 2.0 * config.gravity * depth).max(0.0).sqrt();
        }
        self.velocity.y = rebound * self.bounciness;
        self.velocity.x *= 1.0 - self.friction;
        self.velocity.z *= 1.0 - self.friction;

        let horizontal = Vec3::new(self.velocity.x, 0.0, self.velocity.z);
        let horizontal_speed = horizontal.length();
        if horizontal_speed > config.rolling_threshold {
            let axis = Vec3::Y.cross(horizontal / horizontal_speed);
            self.angular_velocity += axis * horizontal_speed * self.friction * 2.0;
        }
        self.angular_velocity *= 1.0 - self.friction * 0.5;

        if self.velocity.y.abs() < config.rest_threshold {
            self.velocity.y = 0.0;
        }

        Some(GroundImpact {
            speed,
            energy: 0.5 * self.mass * speed * speed,
        })
    }

    pub fn kinetic_energy(&self) -> f32 {
        0.5 * self.mass * self.velocity.length_squared()
    }

    /// Gravitational potential of the centre of mass above `ground_y`.
    pub fn potential_energy(&self, gravity: f32, ground_y: f32) -> f32 {
        self.mass * gravity * (self.position.y - ground_y)
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.angular_velocity.is_finite()
            && self.rotation.is_finite()
    }

    /// Return to the spawn configuration (numerical recovery).
    pub fn restore_spawn(&mut self) {
        self.position = self.spawn.position;
        self.velocity = self.spawn.velocity;
        self.rotation = Quat::IDENTITY;
        self.angular_velocity = Vec3::ZERO;
        self.force = Vec3::ZERO;
    }

    /// Retire the body permanently.
    pub(crate) fn destroy(&mut self) {
        self.destroyed = true;
        self.force = Vec3::ZERO;
    }

    pub(crate) fn slave_to(&mut self, assembly: AssemblyId, piece: usize) {
        self.motion = MotionState::Slaved { assembly, piece };
        self.use_gravity = false;
        self.enable_collisions = false;
    }

    /// Hand a slaved piece over to the free-body set.
    pub(crate) fn release(&mut self, velocity: Vec3) {
        self.motion = MotionState::Free;
        self.use_gravity = true;
        self.enable_collisions = true;
        self.velocity = velocity;
        self.spawn.position = self.position;
        self.spawn.velocity = velocity;
    }
}

/// Integrate an orientation with the quaternion derivative
/// `q' = q + dt * 0.5 * (omega, 0) * q`, renormalized.
///
/// # Arguments
/// * `rotation` - Current orientation
/// * `angular_velocity` - World-space angular velocity (rad/s)
/// * `dt` - Time step
pub fn integrate_rotation(rotation: Quat, angular_velocity: Vec3, dt: f32) -> Quat {
    let q_xyz = Vec3::new(rotation.x, rotation.y, rotation.z);
    let q_w = rotation.w;

    // Product of the pure quaternion (omega, 0) with q
    let concat_xyz = q_w * angular_velocity + angular_velocity.cross(q_xyz);
    let concat_w = -angular_velocity.dot(q_xyz);

    let half_dt = 0.5 * dt;
    Quat::from_xyzw(
        rotation.x + concat_xyz.x * half_dt,
        rotation.y + concat_xyz.y * half_dt,
        rotation.z + concat_xyz.z * half_dt,
        rotation.w + concat_w * half_dt,
    )
    .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forces::DragParams;

    fn still_config() -> WorldConfig {
        WorldConfig::default()
    }

    #[test]
    fn test_rejects_invalid_descriptions() {
        assert!(RigidBody::new(RigidBodyDesc::cube(Vec3::ZERO, 1.0, 0.0)).is_err());
        assert!(RigidBody::new(RigidBodyDesc::sphere(Vec3::ZERO, 0.0, 1.0)).is_err());
        assert!(RigidBody::new(RigidBodyDesc::cube(Vec3::ZERO, 1.0, 1.0).with_material(1.5, 0.1)).is_err());
    }

    #[test]
    fn test_bounds_follow_position() {
        let mut body = RigidBody::new(RigidBodyDesc::cube(Vec3::ZERO, 2.0, 1.0)).unwrap();
        body.position = Vec3::new(5.0, 1.0, 0.0);

        let bounds = body.bounds();
        assert_eq!(bounds.min, Vec3::new(4.0, 0.0, -1.0));
        assert_eq!(bounds.max, Vec3::new(6.0, 2.0, 1.0));
    }

    #[test]
    fn test_gravity_integration() {
        let config = still_config();
        let mut body = RigidBody::new(RigidBodyDesc::cube(Vec3::new(0.0, 10.0, 0.0), 1.0, 2.0)).unwrap();
        body.integrate(0.1, &config);

        assert!((body.velocity.y + 0.981).abs() < 1e-5);
        assert!((body.position.y - (10.0 - 0.0981)).abs() < 1e-5);
    }

    #[test]
    fn test_velocity_clamped_to_max_speed() {
        let config = still_config();
        let desc = RigidBodyDesc::cube(Vec3::new(0.0, 100.0, 0.0), 1.0, 1.0)
            .with_velocity(Vec3::new(0.0, -200.0, 0.0));
        let mut body = RigidBody::new(desc).unwrap();
        body.integrate(0.02, &config);

        assert!(body.velocity.length() <= config.max_speed + 1e-3);
    }

    #[test]
    fn test_force_accumulator_cleared() {
        let config = still_config();
        let mut body = RigidBody::new(RigidBodyDesc::cube(Vec3::new(0.0, 5.0, 0.0), 1.0, 1.0)).unwrap();
        body.add_force(Vec3::new(10.0, 0.0, 0.0));
        body.integrate(0.1, &config);

        assert_eq!(body.accumulated_force(), Vec3::ZERO);
        assert!((body.velocity.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_add_impulse_divides_by_mass() {
        let mut body = RigidBody::new(RigidBodyDesc::cube(Vec3::ZERO, 1.0, 4.0)).unwrap();
        body.add_impulse(Vec3::new(8.0, 0.0, 0.0));
        assert_eq!(body.velocity, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_ground_bounce_reflects_and_rolls() {
        let config = still_config();
        let desc = RigidBodyDesc::cube(Vec3::new(0.0, 0.4, 0.0), 1.0, 1.0)
            .with_velocity(Vec3::new(4.0, -5.0, 0.0))
            .with_material(0.5, 0.2);
        let mut body = RigidBody::new(desc).unwrap();

        let impact = body.resolve_ground(&config).expect("body is moving into the ground");

        assert_eq!(impact.speed, 5.0);
        assert_eq!(body.position.y, 0.5, "clamped to surface");
        // Rebound from the surface speed after climbing out of 0.1 m of penetration.
        let surface_speed = (25.0 - 2.0 * 9.81 * 0.1f32).sqrt();
        assert!((body.velocity.y - surface_speed * 0.5).abs() < 1e-5, "got {}", body.velocity.y);
        assert!((body.velocity.x - 3.2).abs() < 1e-6);

        // Rolling about cross(Y, +X) = -Z
        assert!(body.angular_velocity.z < 0.0, "got {:?}", body.angular_velocity);
        assert_eq!(body.angular_velocity.x, 0.0);
    }

    #[test]
    fn test_ground_clamp_does_not_add_energy() {
        let config = still_config();
        let desc = RigidBodyDesc::cube(Vec3::new(0.0, 0.3, 0.0), 1.0, 2.0)
            .with_velocity(Vec3::new(0.0, -6.0, 0.0))
            .with_material(1.0, 0.0);
        let mut body = RigidBody::new(desc).unwrap();
        let before = body.kinetic_energy() + body.potential_energy(config.gravity, config.ground_height);

        body.resolve_ground(&config).expect("moving into the ground");

        let after = body.kinetic_energy() + body.potential_energy(config.gravity, config.ground_height);
        assert!(body.velocity.y > 0.0);
        assert!((after - before).abs() < 1e-4, "energy {} -> {}", before, after);
    }

    #[test]
    fn test_aero_drag_opposes_motion() {
        let config = WorldConfig {
            gravity: 0.0,
            aero_drag: Some(DragParams::default()),
            ..Default::default()
        };
        let desc = RigidBodyDesc::sphere(Vec3::new(0.0, 5.0, 0.0), 0.5, 1.0).with_velocity(Vec3::new(10.0, 0.0, 0.0));
        let mut body = RigidBody::new(desc).unwrap();
        body.integrate(0.02, &config);

        // 6 N of drag on 1 kg for 0.02 s
        assert!((body.velocity.x - 9.88).abs() < 1e-4, "got {}", body.velocity.x);
    }

    #[test]
    fn test_slow_bounce_comes_to_rest() {
        let config = still_config();
        let desc = RigidBodyDesc::sphere(Vec3::new(0.0, 0.45, 0.0), 0.5, 1.0)
            .with_velocity(Vec3::new(0.0, -0.15, 0.0))
            .with_material(0.5, 0.0);
        let mut body = RigidBody::new(desc).unwrap();
        body.resolve_ground(&config);

        assert_eq!(body.velocity.y, 0.0);
    }

    #[test]
    fn test_rising_body_is_clamped_without_bounce() {
        let config = still_config();
        let desc = RigidBodyDesc::cube(Vec3::new(0.0, 0.2, 0.0), 1.0, 1.0)
            .with_velocity(Vec3::new(0.0, 1.0, 0.0));
        let mut body = RigidBody::new(desc).unwrap();

        assert!(body.resolve_ground(&config).is_none());
        assert_eq!(body.position.y, 0.5);
        assert_eq!(body.velocity.y, 1.0);
    }

    #[test]
    fn test_destroyed_body_ignores_everything() {
        let config = still_config();
        let mut body = RigidBody::new(RigidBodyDesc::cube(Vec3::new(0.0, 3.0, 0.0), 1.0, 1.0)).unwrap();
        body.destroy();
        body.add_force(Vec3::splat(10.0));
        body.add_impulse(Vec3::splat(10.0));
        body.integrate(0.1, &config);

        assert_eq!(body.position, Vec3::new(0.0, 3.0, 0.0));
        assert_eq!(body.velocity, Vec3::ZERO);
        assert!(body.is_destroyed());
    }

    #[test]
    fn test_quaternion_integration_small_rotation() {
        let rotation = integrate_rotation(Quat::IDENTITY, Vec3::new(0.0, 1.0, 0.0), 1.0 / 60.0);

        assert!(rotation.is_normalized());
        let (axis, angle) = rotation.to_axis_angle();
        assert!(angle.abs() < 0.1, "small dt should produce a small angle");
        assert!((axis.y.abs() - 1.0).abs() < 0.01, "rotation should be about Y");
    }

    #[test]
    fn test_support_extent() {
        let shape = Shape::cuboid(Vec3::new(2.0, 4.0, 6.0));
        assert_eq!(shape.support(Vec3::X), 1.0);
        assert_eq!(shape.support(-Vec3::Y), 2.0);
        assert_eq!(Shape::sphere(0.3).support(Vec3::Z), 0.3);
        assert!((shape.average_size() - 4.0).abs() < 1e-6);
    }
}
