//! Block lattices that crack edge by edge.
//!
//! Blocks are point masses with a collision radius, joined to their
//! neighbours by undamped springs. An edge stretched or squashed past
//! `break_ratio` of its rest length snaps and converts a fraction `alpha` of
//! its stored energy into a velocity kick on both endpoints, so fracture
//! spreads locally instead of shattering everything at once.
//!
//! Two presets ship: a free-falling cube that only cracks once it is near
//! the ground, and a thin plate dropped onto a static sphere.

use bevy::math::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{check_length, check_mass, check_non_negative, check_unit, ConfigError, ConfigResult};
use crate::forces::{hooke_force, spring_potential_energy};

const MIN_SPIN: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridLayout {
    /// `n^3` blocks resting on their bottom layer, joined to face neighbours.
    Cube,
    /// `n^2` blocks in the XZ plane, joined along X and Z.
    Plate,
}

/// How a snapping edge scatters its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReleaseStyle {
    /// One small shared jitter, tiny spin about the break axis.
    Gentle { jitter: f32, scale: f32, spin: f32 },
    /// Independent random directions per endpoint and random spin.
    Scatter {
        scale: f32,
        jitter_min: f32,
        jitter_max: f32,
        spin_min: f32,
        spin_max: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridFractureConfig {
    pub layout: GridLayout,
    /// Blocks per side.
    pub grid_size: usize,
    pub block_size: f32,
    pub block_spacing: f32,
    /// Block height for the plate layout.
    pub plate_thickness: f32,
    pub block_mass: f32,
    pub stiffness: f32,
    /// Edge breaks when `|extension| > break_ratio * rest`.
    pub break_ratio: f32,
    /// Per-step velocity multiplier.
    pub damping: f32,
    /// Fraction of elastic energy released on break.
    pub alpha: f32,
    pub restitution: f32,
    /// Fraction of horizontal velocity kept on contact.
    pub friction: f32,
    /// Overrides the world gravity for this lattice.
    pub gravity: Option<f32>,
    /// Edges may only break after some block came within `impact_margin` of the ground.
    pub require_impact: bool,
    pub impact_margin: f32,
    /// Static sphere resting on the ground below the lattice.
    pub obstacle_radius: Option<f32>,
    /// Fraction of closing velocity exchanged between overlapping blocks.
    pub contact_response: f32,
    pub release: ReleaseStyle,
}

impl Default for GridFractureConfig {
    fn default() -> Self {
        Self::cube()
    }
}

impl GridFractureConfig {
    /// Soft 4x4x4 cube that crumbles gently on landing.
    pub fn cube() -> Self {
        Self {
            layout: GridLayout::Cube,
            grid_size: 4,
            block_size: 0.4,
            block_spacing: 0.42,
            plate_thickness: 0.4,
            block_mass: 1.0,
            stiffness: 30.0,
            break_ratio: 0.25,
            damping: 0.9999,
            alpha: 0.08,
            restitution: 0.02,
            friction: 0.995,
            gravity: None,
            require_impact: true,
            impact_margin: 0.5,
            obstacle_radius: None,
            contact_response: 0.1,
            release: ReleaseStyle::Gentle {
                jitter: 0.05,
                scale: 0.1,
                spin: 0.02,
            },
        }
    }

    /// Thin 8x8 glass plate falling slowly onto a sphere.
    pub fn plate() -> Self {
        Self {
            layout: GridLayout::Plate,
            grid_size: 8,
            block_size: 0.2,
            block_spacing: 0.22,
            plate_thickness: 0.15,
            block_mass: 0.5,
            stiffness: 40.0,
            break_ratio: 0.15,
            damping: 0.9995,
            alpha: 0.08,
            restitution: 0.02,
            friction: 0.98,
            gravity: Some(0.8),
            require_impact: false,
            impact_margin: 0.5,
            obstacle_radius: Some(1.2),
            contact_response: 0.2,
            release: ReleaseStyle::Scatter {
                scale: 0.15,
                jitter_min: 0.5,
                jitter_max: 1.5,
                spin_min: 0.05,
                spin_max: 0.15,
            },
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.grid_size < 2 {
            return Err(ConfigError::InvalidGrid {
                what: "fracture",
                width: self.grid_size,
                height: self.grid_size,
            });
        }
        check_length("block size", self.block_size)?;
        check_length("block spacing", self.block_spacing)?;
        check_length("plate thickness", self.plate_thickness)?;
        check_mass("block", self.block_mass)?;
        check_non_negative("lattice stiffness", self.stiffness)?;
        check_length("break ratio", self.break_ratio)?;
        check_unit("lattice damping", self.damping)?;
        check_unit("release alpha", self.alpha)?;
        check_unit("lattice restitution", self.restitution)?;
        check_unit("lattice friction", self.friction)?;
        check_unit("contact response", self.contact_response)?;
        check_non_negative("impact margin", self.impact_margin)?;
        if let Some(g) = self.gravity {
            check_non_negative("lattice gravity", g)?;
        }
        if let Some(radius) = self.obstacle_radius {
            check_length("obstacle radius", radius)?;
        }
        if let ReleaseStyle::Scatter {
            jitter_min,
            jitter_max,
            spin_min,
            spin_max,
            ..
        } = self.release
        {
            check_non_negative("release jitter range", jitter_max - jitter_min)?;
            check_non_negative("release spin range", spin_max - spin_min)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GridBlock {
    pub position: Vec3,
    pub velocity: Vec3,
    pub angular_velocity: Vec3,
    pub rotation: Quat,
    pub mass: f32,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridEdge {
    pub a: usize,
    pub b: usize,
    pub rest_length: f32,
    pub stiffness: f32,
    broken: bool,
}

impl GridEdge {
    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

/// Edges snapped during one step, with the energy each stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridStepReport {
    pub broken_edges: Vec<(usize, f32)>,
    /// A block went non-finite and the lattice was rebuilt.
    pub reset: bool,
}

/// Static sphere the plate lands on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub center: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone)]
pub struct FractureGrid {
    config: GridFractureConfig,
    origin: Vec3,
    ground_y: f32,
    blocks: Vec<GridBlock>,
    edges: Vec<GridEdge>,
    obstacle: Option<Obstacle>,
    has_impacted: bool,
}

impl FractureGrid {
    pub fn new(origin: Vec3, ground_y: f32, config: GridFractureConfig) -> ConfigResult<Self> {
        config.validate()?;
        let mut grid = Self {
            config,
            origin,
            ground_y,
            blocks: Vec::new(),
            edges: Vec::new(),
            obstacle: None,
            has_impacted: false,
        };
        grid.rebuild();
        Ok(grid)
    }

    pub fn config(&self) -> &GridFractureConfig {
        &self.config
    }

    pub fn blocks(&self) -> &[GridBlock] {
        &self.blocks
    }

    pub fn edges(&self) -> &[GridEdge] {
        &self.edges
    }

    pub fn obstacle(&self) -> Option<Obstacle> {
        self.obstacle
    }

    pub fn has_impacted(&self) -> bool {
        self.has_impacted
    }

    /// Render size of one block.
    pub fn block_extents(&self) -> Vec3 {
        match self.config.layout {
            GridLayout::Cube => Vec3::splat(self.config.block_size),
            GridLayout::Plate => Vec3::new(self.config.block_size, self.config.plate_thickness, self.config.block_size),
        }
    }

    pub fn broken_count(&self) -> usize {
        self.edges.iter().filter(|e| e.broken).count()
    }

    /// Replace the config and rebuild at the spawn origin.
    pub fn reconfigure(&mut self, config: GridFractureConfig) -> ConfigResult<()> {
        config.validate()?;
        self.config = config;
        self.rebuild();
        Ok(())
    }

    /// Restore the unbroken lattice at the spawn origin.
    pub fn rebuild(&mut self) {
        let c = &self.config;
        let n = c.grid_size;
        let s = c.block_spacing;
        let radius = c.block_size * 0.5;
        let block = |position| GridBlock {
            position,
            velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            mass: c.block_mass,
            radius,
        };

        let mut blocks = Vec::new();
        let mut edges = Vec::new();
        match c.layout {
            GridLayout::Cube => {
                let half = (n - 1) as f32 * s * 0.5;
                let corner = self.origin + Vec3::new(-half, 0.0, -half);
                for x in 0..n {
                    for y in 0..n {
                        for z in 0..n {
                            blocks.push(block(corner + Vec3::new(x as f32, y as f32, z as f32) * s));
                        }
                    }
                }
                for i in 0..blocks.len() {
                    for j in (i + 1)..blocks.len() {
                        let dist = blocks[i].position.distance(blocks[j].position);
                        if dist < s * 1.1 {
                            edges.push(new_edge(i, j, dist, c.stiffness));
                        }
                    }
                }
            }
            GridLayout::Plate => {
                let centre = n as f32 / 2.0 - 0.5;
                for x in 0..n {
                    for z in 0..n {
                        let offset = Vec3::new((x as f32 - centre) * s, 0.0, (z as f32 - centre) * s);
                        blocks.push(block(self.origin + offset));
                    }
                }
                for x in 0..n {
                    for z in 0..n {
                        let i = x * n + z;
                        if x + 1 < n {
                            let j = (x + 1) * n + z;
                            edges.push(new_edge(i, j, blocks[i].position.distance(blocks[j].position), c.stiffness));
                        }
                        if z + 1 < n {
                            let j = x * n + z + 1;
                            edges.push(new_edge(i, j, blocks[i].position.distance(blocks[j].position), c.stiffness));
                        }
                    }
                }
            }
        }

        self.obstacle = c.obstacle_radius.map(|radius| Obstacle {
            center: Vec3::new(self.origin.x, self.ground_y + radius, self.origin.z),
            radius,
        });
        self.blocks = blocks;
        self.edges = edges;
        self.has_impacted = false;
    }

    pub fn step<R: Rng>(&mut self, dt: f32, world_gravity: f32, rng: &mut R) -> GridStepReport {
        let mut report = GridStepReport::default();
        let gravity = self.config.gravity.unwrap_or(world_gravity);

        for block in &mut self.blocks {
            block.velocity.y -= gravity * dt;
        }

        self.apply_edges(dt, rng, &mut report);

        if !self.has_impacted {
            let threshold = self.ground_y + self.config.impact_margin;
            self.has_impacted = self.blocks.iter().any(|b| b.position.y - b.radius <= threshold);
        }

        if let Some(obstacle) = self.obstacle {
            self.collide_obstacle(obstacle);
        }
        self.collide_ground();
        self.collide_blocks();

        let damping = self.config.damping;
        for block in &mut self.blocks {
            block.position += block.velocity * dt;
            if block.angular_velocity.length() > MIN_SPIN {
                block.rotation = (Quat::from_scaled_axis(block.angular_velocity * dt) * block.rotation).normalize();
            }
            block.velocity *= damping;
            block.angular_velocity *= damping;
        }

        let finite = self
            .blocks
            .iter()
            .all(|b| b.position.is_finite() && b.velocity.is_finite());
        if !finite {
            self.rebuild();
            report.reset = true;
        }

        report
    }

    fn apply_edges<R: Rng>(&mut self, dt: f32, rng: &mut R, report: &mut GridStepReport) {
        let can_break = self.has_impacted || !self.config.require_impact;

        for (index, edge) in self.edges.iter_mut().enumerate() {
            if edge.broken {
                continue;
            }

            let (pa, pb) = (self.blocks[edge.a].position, self.blocks[edge.b].position);
            let Some((pull, extension)) = hooke_force(pa, pb, edge.rest_length, edge.stiffness) else {
                continue;
            };
            let n = (pb - pa).normalize();

            let (mass_a, mass_b) = (self.blocks[edge.a].mass, self.blocks[edge.b].mass);
            self.blocks[edge.a].velocity += pull * dt / mass_a;
            self.blocks[edge.b].velocity -= pull * dt / mass_b;

            if !can_break || extension.abs() <= self.config.break_ratio * edge.rest_length {
                continue;
            }

            edge.broken = true;
            let energy = spring_potential_energy(edge.stiffness, extension);
            let dv = (2.0 * self.config.alpha * energy / mass_a).sqrt();

            match self.config.release {
                ReleaseStyle::Gentle { jitter, scale, spin } => {
                    let shared = random_in_unit_sphere(rng) * jitter;
                    self.blocks[edge.a].velocity += (-n + shared) * dv * scale;
                    self.blocks[edge.b].velocity += (n + shared) * dv * scale;
                    self.blocks[edge.a].angular_velocity += n.cross(random_on_unit_sphere(rng)) * dv * spin;
                    self.blocks[edge.b].angular_velocity += (-n).cross(random_on_unit_sphere(rng)) * dv * spin;
                }
                ReleaseStyle::Scatter {
                    scale,
                    jitter_min,
                    jitter_max,
                    spin_min,
                    spin_max,
                } => {
                    let jitter_a = random_on_unit_sphere(rng) * rng.gen_range(jitter_min..=jitter_max);
                    let jitter_b = random_on_unit_sphere(rng) * rng.gen_range(jitter_min..=jitter_max);
                    self.blocks[edge.a].velocity += (-n + jitter_a) * dv * scale;
                    self.blocks[edge.b].velocity += (n + jitter_b) * dv * scale;
                    self.blocks[edge.a].angular_velocity +=
                        random_on_unit_sphere(rng) * dv * rng.gen_range(spin_min..=spin_max);
                    self.blocks[edge.b].angular_velocity +=
                        random_on_unit_sphere(rng) * dv * rng.gen_range(spin_min..=spin_max);
                }
            }

            report.broken_edges.push((index, energy));
        }
    }

    fn collide_obstacle(&mut self, obstacle: Obstacle) {
        let restitution = self.config.restitution;
        let friction = self.config.friction;
        for block in &mut self.blocks {
            let to_block = block.position - obstacle.center;
            let dist = to_block.length();
            let min_dist = obstacle.radius + block.radius;
            if dist >= min_dist || dist <= 0.0 {
                continue;
            }

            let normal = to_block / dist;
            block.position += normal * (min_dist - dist);

            let approach = block.velocity.dot(normal);
            if approach < 0.0 {
                block.velocity -= normal * approach * (1.0 + restitution);
                block.velocity *= friction;
                block.angular_velocity += normal.cross(block.velocity) * 0.2;
            }
        }
    }

    fn collide_ground(&mut self) {
        let (ground_y, restitution, friction) = (self.ground_y, self.config.restitution, self.config.friction);
        for block in &mut self.blocks {
            if block.position.y - block.radius < ground_y {
                block.position.y = ground_y + block.radius;
                block.velocity.y = -block.velocity.y * restitution;
                block.velocity.x *= friction;
                block.velocity.z *= friction;
                block.angular_velocity *= friction;
            }
        }
    }

    fn collide_blocks(&mut self) {
        let response = self.config.contact_response;
        for i in 0..self.blocks.len() {
            for j in (i + 1)..self.blocks.len() {
                let dir = self.blocks[j].position - self.blocks[i].position;
                let dist = dir.length();
                let min_dist = self.blocks[i].radius + self.blocks[j].radius;
                if dist >= min_dist || dist <= 0.0 {
                    continue;
                }

                let n = dir / dist;
                let push = n * (min_dist - dist) * 0.5;
                self.blocks[i].position -= push;
                self.blocks[j].position += push;

                let closing = (self.blocks[j].velocity - self.blocks[i].velocity).dot(n);
                if closing < 0.0 {
                    let impulse = -closing * n * response;
                    self.blocks[i].velocity -= impulse;
                    self.blocks[j].velocity += impulse;
                }
            }
        }
    }

    pub fn kinetic_energy(&self) -> f32 {
        self.blocks
            .iter()
            .map(|b| 0.5 * b.mass * b.velocity.length_squared())
            .sum()
    }

    pub fn potential_energy(&self, world_gravity: f32) -> f32 {
        let gravity = self.config.gravity.unwrap_or(world_gravity);
        let gravitational: f32 = self
            .blocks
            .iter()
            .map(|b| b.mass * gravity * (b.position.y - self.ground_y))
            .sum();
        gravitational + self.elastic_energy()
    }

    /// Energy stored in unbroken edges.
    pub fn elastic_energy(&self) -> f32 {
        self.edges
            .iter()
            .filter(|e| !e.broken)
            .map(|e| {
                let extension = self.blocks[e.a].position.distance(self.blocks[e.b].position) - e.rest_length;
                spring_potential_energy(e.stiffness, extension)
            })
            .sum()
    }
}

fn new_edge(a: usize, b: usize, rest_length: f32, stiffness: f32) -> GridEdge {
    GridEdge {
        a,
        b,
        rest_length,
        stiffness,
        broken: false,
    }
}

pub(crate) fn random_in_unit_sphere<R: Rng>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
            rng.gen_range(-1.0..=1.0),
        );
        if v.length_squared() <= 1.0 {
            return v;
        }
    }
}

pub(crate) fn random_on_unit_sphere<R: Rng>(rng: &mut R) -> Vec3 {
    loop {
        let v = random_in_unit_sphere(rng);
        let len_sq = v.length_squared();
        if len_sq > 1e-6 {
            return v / len_sq.sqrt();
        }
    }
}
