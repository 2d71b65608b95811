//! Mass-spring cloth with iterative position correction.
//!
//! The grid lies flat in the XZ plane at `origin.y`, centred on `origin.x`.
//! Particle `(x, y)` lives at index `x * height + y`, and the row
//! `y == height - 1` is pinned.
//!
//! Each step:
//! 1. Structural, shear and bend springs add forces (symmetric, no slack rule)
//! 2. Wind and air drag add forces
//! 3. Particles integrate, are speed-clamped and collide with the ground
//! 4. `constraint_iterations` Gauss-Seidel passes pull structural edges back
//!    toward rest length
//! 5. Any non-finite position rebuilds the cloth

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::{check_length, check_mass, check_non_negative, check_unit, ConfigError, ConfigResult};
use crate::forces::{damped_spring_force, linear_drag, MIN_SPRING_LENGTH};
use crate::particle::Particle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothConfig {
    /// Particles along X.
    pub width: usize,
    /// Particles along Z. The last row is pinned.
    pub height: usize,
    pub spacing: f32,
    pub particle_mass: f32,
    pub max_velocity: f32,
    pub constraint_iterations: u32,
    pub structural_stiffness: f32,
    pub shear_stiffness: f32,
    pub bend_stiffness: f32,
    /// Spring damping along each edge.
    pub damping: f32,
    pub air_resistance: f32,
    /// Wind acceleration, applied as `wind * mass` while enabled.
    pub wind: Vec3,
    pub enable_wind: bool,
    pub origin: Vec3,
    pub ground_bounciness: f32,
    /// Fraction of horizontal velocity kept on ground contact.
    pub ground_friction: f32,
}

impl Default for ClothConfig {
    fn default() -> Self {
        Self {
            width: 20,
            height: 20,
            spacing: 0.2,
            particle_mass: 0.05,
            max_velocity: 10.0,
            constraint_iterations: 3,
            structural_stiffness: 50.0,
            shear_stiffness: 25.0,
            bend_stiffness: 15.0,
            damping: 0.5,
            air_resistance: 0.02,
            wind: Vec3::new(2.0, 0.0, 0.0),
            enable_wind: false,
            origin: Vec3::new(0.0, 5.0, 0.0),
            ground_bounciness: 0.1,
            ground_friction: 0.9,
        }
    }
}

impl ClothConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.width < 2 || self.height < 2 {
            return Err(ConfigError::InvalidGrid {
                what: "cloth",
                width: self.width,
                height: self.height,
            });
        }
        check_length("cloth spacing", self.spacing)?;
        check_mass("cloth particle", self.particle_mass)?;
        check_length("cloth max velocity", self.max_velocity)?;
        check_non_negative("structural stiffness", self.structural_stiffness)?;
        check_non_negative("shear stiffness", self.shear_stiffness)?;
        check_non_negative("bend stiffness", self.bend_stiffness)?;
        check_non_negative("cloth damping", self.damping)?;
        check_non_negative("cloth air resistance", self.air_resistance)?;
        check_unit("cloth ground bounciness", self.ground_bounciness)?;
        check_unit("cloth ground friction", self.ground_friction)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Direct neighbours along X or Z.
    Structural,
    /// Diagonal neighbours.
    Shear,
    /// Neighbours two apart along X or Z.
    Bend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClothEdge {
    pub a: usize,
    pub b: usize,
    pub rest_length: f32,
    pub stiffness: f32,
    pub kind: EdgeKind,
}

/// Outcome of one cloth step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClothStatus {
    Stable,
    /// A particle went non-finite and the cloth was rebuilt.
    Reset,
}

#[derive(Debug, Clone)]
pub struct Cloth {
    config: ClothConfig,
    particles: Vec<Particle>,
    edges: Vec<ClothEdge>,
}

impl Cloth {
    pub fn new(config: ClothConfig) -> ConfigResult<Self> {
        config.validate()?;
        let particles = build_particles(&config)?;
        let edges = build_edges(&config);
        Ok(Self {
            config,
            particles,
            edges,
        })
    }

    pub fn config(&self) -> &ClothConfig {
        &self.config
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn edges(&self) -> &[ClothEdge] {
        &self.edges
    }

    pub fn index(&self, x: usize, y: usize) -> usize {
        x * self.config.height + y
    }

    pub fn particle(&self, x: usize, y: usize) -> Option<&Particle> {
        if x < self.config.width && y < self.config.height {
            self.particles.get(self.index(x, y))
        } else {
            None
        }
    }

    /// Move a particle directly, typically to drag a pinned corner.
    pub fn set_particle_position(&mut self, x: usize, y: usize, position: Vec3) {
        if x < self.config.width && y < self.config.height {
            let i = self.index(x, y);
            self.particles[i].position = position;
        }
    }

    pub fn set_wind(&mut self, enabled: bool) {
        self.config.enable_wind = enabled;
    }

    /// Rebuild the grid from the current config.
    pub fn reset(&mut self) {
        // The config was validated when it was installed.
        if let Ok(particles) = build_particles(&self.config) {
            self.particles = particles;
        }
    }

    /// Replace the config and rebuild. The old cloth is kept on error.
    pub fn reconfigure(&mut self, config: ClothConfig) -> ConfigResult<()> {
        config.validate()?;
        self.particles = build_particles(&config)?;
        self.edges = build_edges(&config);
        self.config = config;
        Ok(())
    }

    pub fn step(&mut self, dt: f32, gravity: f32, ground_y: f32) -> ClothStatus {
        self.apply_spring_forces();

        let wind = if self.config.enable_wind {
            self.config.wind * self.config.particle_mass
        } else {
            Vec3::ZERO
        };
        for particle in &mut self.particles {
            let drag = linear_drag(particle.velocity, self.config.air_resistance);
            particle.add_force(wind + drag);
        }

        for particle in &mut self.particles {
            particle.integrate(dt, gravity);
            particle.clamp_velocity(self.config.max_velocity);
            particle.apply_ground_collision(ground_y, self.config.ground_bounciness, self.config.ground_friction);
        }

        for _ in 0..self.config.constraint_iterations {
            self.relax();
        }

        if self.particles.iter().all(Particle::is_finite) {
            ClothStatus::Stable
        } else {
            self.reset();
            ClothStatus::Reset
        }
    }

    fn apply_spring_forces(&mut self) {
        let damping = self.config.damping;
        for edge in &self.edges {
            let (p1, p2) = (&self.particles[edge.a], &self.particles[edge.b]);
            let Some(force) = damped_spring_force(
                p1.position,
                p1.velocity,
                p2.position,
                p2.velocity,
                edge.rest_length,
                edge.stiffness,
                damping,
            ) else {
                continue;
            };
            self.particles[edge.a].add_force(force);
            self.particles[edge.b].add_force(-force);
        }
    }

    /// One Gauss-Seidel pass over the structural edges.
    ///
    /// Each edge moves its unpinned endpoints half the length error toward
    /// rest. Updates are applied in place, so later edges see earlier
    /// corrections.
    pub fn relax(&mut self) {
        for edge in &self.edges {
            if edge.kind != EdgeKind::Structural {
                continue;
            }

            let delta = self.particles[edge.b].position - self.particles[edge.a].position;
            let length = delta.length();
            if length < MIN_SPRING_LENGTH {
                continue;
            }

            let correction = delta * 0.5 * (length - edge.rest_length) / length;
            if !self.particles[edge.a].pinned {
                self.particles[edge.a].position += correction;
            }
            if !self.particles[edge.b].pinned {
                self.particles[edge.b].position -= correction;
            }
        }
    }

    /// Sum of squared length errors over the structural edges.
    pub fn relaxation_error(&self) -> f32 {
        self.edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Structural)
            .map(|e| {
                let length = self.particles[e.a].position.distance(self.particles[e.b].position);
                (length - e.rest_length).powi(2)
            })
            .sum()
    }

    pub fn kinetic_energy(&self) -> f32 {
        self.particles.iter().map(Particle::kinetic_energy).sum()
    }

    pub fn potential_energy(&self, gravity: f32, ground_y: f32) -> f32 {
        self.particles.iter().map(|p| p.potential_energy(gravity, ground_y)).sum()
    }
}

fn build_particles(config: &ClothConfig) -> ConfigResult<Vec<Particle>> {
    let start_x = config.origin.x - (config.width - 1) as f32 * config.spacing * 0.5;

    let mut particles = Vec::with_capacity(config.width * config.height);
    for x in 0..config.width {
        for y in 0..config.height {
            let position = Vec3::new(
                start_x + x as f32 * config.spacing,
                config.origin.y,
                config.origin.z + y as f32 * config.spacing,
            );
            let particle = if y == config.height - 1 {
                Particle::pinned(position, config.particle_mass)?
            } else {
                Particle::new(position, config.particle_mass)?
            };
            particles.push(particle);
        }
    }
    Ok(particles)
}

fn build_edges(config: &ClothConfig) -> Vec<ClothEdge> {
    let (w, h, s) = (config.width, config.height, config.spacing);
    let idx = |x: usize, y: usize| x * h + y;
    let edge = |a, b, rest_length, stiffness, kind| ClothEdge {
        a,
        b,
        rest_length,
        stiffness,
        kind,
    };

    let mut edges = Vec::new();
    for x in 0..w {
        for y in 0..h {
            if x + 1 < w {
                edges.push(edge(idx(x, y), idx(x + 1, y), s, config.structural_stiffness, EdgeKind::Structural));
            }
            if y > 0 {
                edges.push(edge(idx(x, y), idx(x, y - 1), s, config.structural_stiffness, EdgeKind::Structural));
            }
        }
    }

    let diagonal = s * std::f32::consts::SQRT_2;
    for x in 0..w - 1 {
        for y in 0..h - 1 {
            edges.push(edge(idx(x, y), idx(x + 1, y + 1), diagonal, config.shear_stiffness, EdgeKind::Shear));
            edges.push(edge(idx(x + 1, y), idx(x, y + 1), diagonal, config.shear_stiffness, EdgeKind::Shear));
        }
    }

    for x in 0..w {
        for y in 0..h {
            if x + 2 < w {
                edges.push(edge(idx(x, y), idx(x + 2, y), s * 2.0, config.bend_stiffness, EdgeKind::Bend));
            }
            if y > 1 {
                edges.push(edge(idx(x, y), idx(x, y - 2), s * 2.0, config.bend_stiffness, EdgeKind::Bend));
            }
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(width: usize, height: usize) -> ClothConfig {
        ClothConfig {
            width,
            height,
            ..Default::default()
        }
    }

    #[test]
    fn test_layout_and_pinning() {
        let cloth = Cloth::new(small_config(4, 3)).unwrap();
        assert_eq!(cloth.particles().len(), 12);

        let first = cloth.particle(0, 0).unwrap();
        assert!((first.position.x + 0.3).abs() < 1e-6, "grid is centred on the origin X");
        assert_eq!(first.position.y, 5.0);

        for x in 0..4 {
            assert!(cloth.particle(x, 2).unwrap().pinned, "last row pinned");
            assert!(!cloth.particle(x, 0).unwrap().pinned);
        }
        assert!(cloth.particle(4, 0).is_none());
    }

    #[test]
    fn test_edge_counts() {
        let cloth = Cloth::new(small_config(4, 3)).unwrap();
        let count = |kind| cloth.edges().iter().filter(|e| e.kind == kind).count();

        // 3*3 along X + 4*2 along Z
        assert_eq!(count(EdgeKind::Structural), 17);
        assert_eq!(count(EdgeKind::Shear), 12);
        // 2*3 along X + 4*1 along Z
        assert_eq!(count(EdgeKind::Bend), 10);
    }

    #[test]
    fn test_rejects_degenerate_grid() {
        assert!(matches!(Cloth::new(small_config(1, 5)), Err(ConfigError::InvalidGrid { .. })));
        let bad_spacing = ClothConfig {
            spacing: 0.0,
            ..Default::default()
        };
        assert!(Cloth::new(bad_spacing).is_err());
    }

    #[test]
    fn test_relaxation_reduces_error_monotonically() {
        let mut cloth = Cloth::new(small_config(3, 3)).unwrap();
        // Stretch every column uniformly along Z, away from the pinned row
        for x in 0..3 {
            for y in 0..2 {
                let p = cloth.particle(x, y).unwrap().position;
                let z = (y as f32 - 2.0) * 0.2 * 1.5 + 0.4;
                cloth.set_particle_position(x, y, Vec3::new(p.x, p.y, z));
            }
        }

        let mut previous = cloth.relaxation_error();
        assert!(previous > 0.0);
        for pass in 0..30 {
            cloth.relax();
            let error = cloth.relaxation_error();
            assert!(error <= previous + 1e-7, "pass {} increased error: {} -> {}", pass, previous, error);
            previous = error;
        }
        assert!(previous < 1e-6, "relaxation should converge, got {}", previous);
    }

    #[test]
    fn test_hanging_cloth_stays_finite_and_pinned() {
        let mut cloth = Cloth::new(ClothConfig::default()).unwrap();
        let pinned_before: Vec<Vec3> = (0..20).map(|x| cloth.particle(x, 19).unwrap().position).collect();

        for _ in 0..200 {
            assert_eq!(cloth.step(0.02, 9.8, 0.0), ClothStatus::Stable);
        }

        for (x, before) in pinned_before.iter().enumerate() {
            assert_eq!(cloth.particle(x, 19).unwrap().position, *before);
        }
        assert!(cloth.particle(10, 0).unwrap().position.y < 5.0, "free end sags");
        assert!(cloth.particles().iter().all(Particle::is_finite));
    }

    #[test]
    fn test_non_finite_state_resets() {
        let mut cloth = Cloth::new(small_config(3, 3)).unwrap();
        cloth.set_particle_position(1, 0, Vec3::new(f32::NAN, 0.0, 0.0));

        assert_eq!(cloth.step(0.02, 9.8, 0.0), ClothStatus::Reset);
        assert!(cloth.particles().iter().all(Particle::is_finite));
        assert_eq!(cloth.particle(1, 0).unwrap().position.y, 5.0);
    }

    #[test]
    fn test_reconfigure_keeps_old_cloth_on_error() {
        let mut cloth = Cloth::new(small_config(3, 3)).unwrap();
        let bad = ClothConfig {
            particle_mass: -1.0,
            ..small_config(5, 5)
        };
        assert!(cloth.reconfigure(bad).is_err());
        assert_eq!(cloth.particles().len(), 9);

        cloth.reconfigure(small_config(5, 4)).unwrap();
        assert_eq!(cloth.particles().len(), 20);
    }
}
