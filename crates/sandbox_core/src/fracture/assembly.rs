//! Rubik-style composite that shatters on hard impacts.
//!
//! While intact the assembly is one [`Shape::Composite`] body; its pieces sit
//! in the body arena as slaved, non-physical bodies that follow the aggregate.
//! A small spring network over the piece offsets wobbles after each bounce
//! purely for looks, but an overstretched link still counts as a fracture.
//!
//! Shattering hands every piece to the free-body set with an ejection
//! velocity derived from the aggregate's kinetic energy, retires the
//! aggregate, and starts a cleanup timer after which the pieces are retired
//! too.

use bevy::math::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::WorldConfig;
use crate::error::{check_length, check_mass, check_non_negative, check_unit, ConfigError, ConfigResult};
use crate::forces::damped_spring_force;
use crate::particle::Particle;
use crate::rigid_body::{GroundImpact, RigidBody, RigidBodyDesc, Shape};
use crate::world::{AssemblyId, BodyId};

/// Pieces this close to the centre get a random outward direction.
const MIN_EJECT_DISTANCE: f32 = 0.01;
/// Distance assumed for centre pieces.
const CENTRE_PIECE_DISTANCE: f32 = 0.5;
/// Deformation network nodes have unit mass regardless of the pieces.
const NODE_MASS: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyConfig {
    /// Total mass, split evenly over the pieces.
    pub mass: f32,
    /// Edge length of the whole assembly.
    pub base_size: f32,
    /// Pieces per edge.
    pub divisions: usize,
    pub gap: f32,
    pub bounciness: f32,
    pub friction: f32,
    pub piece_bounciness_scale: f32,
    pub piece_friction_scale: f32,
    /// Impact energy (J) above which the assembly shatters. Defaults to
    /// `80 + 15 * mass`.
    pub destruction_threshold: Option<f32>,
    pub network_stiffness: f32,
    pub network_damping: f32,
    /// Fraction of a bounce's velocity change fed back into the network.
    pub network_compliance: f32,
    /// Link strain above which an impacted assembly shatters.
    pub break_threshold: f32,
    /// Seconds released pieces live before cleanup.
    pub piece_lifetime: f32,
    /// Extra upward speed as a fraction of ejection speed.
    pub upward_bias: f32,
    /// Fraction of the aggregate velocity pieces keep.
    pub inherited_fraction: f32,
    pub speed_jitter_min: f32,
    pub speed_jitter_max: f32,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            mass: 3.0,
            base_size: 1.6,
            divisions: 3,
            gap: 0.02,
            bounciness: 0.05,
            friction: 0.5,
            piece_bounciness_scale: 0.8,
            piece_friction_scale: 1.2,
            destruction_threshold: None,
            network_stiffness: 40.0,
            network_damping: 1.0,
            network_compliance: 0.05,
            break_threshold: 0.25,
            piece_lifetime: 10.0,
            upward_bias: 0.25,
            inherited_fraction: 0.1,
            speed_jitter_min: 0.7,
            speed_jitter_max: 1.3,
        }
    }
}

impl AssemblyConfig {
    pub fn piece_count(&self) -> usize {
        self.divisions.pow(3)
    }

    /// Edge length of one piece, leaving room for the gaps.
    pub fn piece_size(&self) -> f32 {
        self.base_size / (self.divisions as f32 + 0.2)
    }

    pub fn piece_mass(&self) -> f32 {
        self.mass / self.piece_count() as f32
    }

    pub fn threshold(&self) -> f32 {
        self.destruction_threshold.unwrap_or(80.0 + 15.0 * self.mass)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.divisions < 2 {
            return Err(ConfigError::InvalidGrid {
                what: "assembly",
                width: self.divisions,
                height: self.divisions,
            });
        }
        check_mass("assembly", self.mass)?;
        check_length("assembly base size", self.base_size)?;
        check_non_negative("assembly gap", self.gap)?;
        check_unit("assembly bounciness", self.bounciness)?;
        check_unit("assembly friction", self.friction)?;
        check_non_negative("piece bounciness scale", self.piece_bounciness_scale)?;
        check_non_negative("piece friction scale", self.piece_friction_scale)?;
        if let Some(threshold) = self.destruction_threshold {
            check_non_negative("destruction threshold", threshold)?;
        }
        check_non_negative("network stiffness", self.network_stiffness)?;
        check_non_negative("network damping", self.network_damping)?;
        check_non_negative("network compliance", self.network_compliance)?;
        check_length("network break threshold", self.break_threshold)?;
        check_non_negative("piece lifetime", self.piece_lifetime)?;
        check_non_negative("upward bias", self.upward_bias)?;
        check_unit("inherited fraction", self.inherited_fraction)?;
        check_length("speed jitter min", self.speed_jitter_min)?;
        if self.speed_jitter_max < self.speed_jitter_min {
            return Err(ConfigError::Negative {
                what: "speed jitter range",
                value: self.speed_jitter_max - self.speed_jitter_min,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AssemblyState {
    /// One rigid body. `has_impacted` gates network fractures.
    Intact { has_impacted: bool },
    /// Pieces are free bodies until the timer runs out.
    Destroyed { remaining_lifetime: f32 },
}

/// What a ground contact did to an intact assembly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GroundOutcome {
    None,
    Bounced(GroundImpact),
    /// Impact energy exceeded the threshold; the caller shatters.
    Shatter { energy: f32 },
}

/// Per-step bookkeeping result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssemblyUpdate {
    Steady,
    /// A network link exceeded the break threshold after impact.
    Overstretched,
    /// The piece lifetime ran out and the pieces were retired.
    Expired,
}

#[derive(Debug, Clone)]
struct NetworkLink {
    a: usize,
    b: usize,
    rest_length: f32,
}

#[derive(Debug, Clone)]
pub struct FragmentableAssembly {
    id: AssemblyId,
    config: AssemblyConfig,
    body: BodyId,
    pieces: Vec<BodyId>,
    offsets: Vec<Vec3>,
    nodes: Vec<Particle>,
    links: Vec<NetworkLink>,
    state: AssemblyState,
    spawn_position: Vec3,
    spawn_velocity: Vec3,
    /// Arena slots left over from a rebuild with fewer pieces, kept destroyed.
    spare: Vec<BodyId>,
}

impl FragmentableAssembly {
    /// Build the aggregate body and its slaved pieces in `bodies`.
    pub(crate) fn spawn(
        id: AssemblyId,
        position: Vec3,
        velocity: Vec3,
        config: AssemblyConfig,
        bodies: &mut Vec<RigidBody>,
    ) -> ConfigResult<Self> {
        config.validate()?;

        let aggregate = RigidBody::new(RigidBodyDesc {
            position,
            velocity,
            shape: Shape::Composite {
                half_extents: Vec3::splat(config.base_size * 0.5),
            },
            mass: config.mass,
            bounciness: config.bounciness,
            friction: config.friction,
            use_gravity: true,
            enable_collisions: true,
        })?;

        let n = config.divisions;
        let piece_size = config.piece_size();
        let pitch = piece_size + config.gap;
        let centre = (n - 1) as f32 * 0.5;
        let piece_desc = RigidBodyDesc {
            position,
            velocity,
            shape: Shape::cuboid(Vec3::splat(piece_size)),
            mass: config.piece_mass(),
            bounciness: (config.bounciness * config.piece_bounciness_scale).min(1.0),
            friction: (config.friction * config.piece_friction_scale).min(1.0),
            use_gravity: true,
            enable_collisions: true,
        };

        let mut offsets = Vec::with_capacity(config.piece_count());
        let mut pieces = Vec::with_capacity(config.piece_count());
        let mut staged = Vec::with_capacity(config.piece_count());
        for x in 0..n {
            for y in 0..n {
                for z in 0..n {
                    let offset = (Vec3::new(x as f32, y as f32, z as f32) - Vec3::splat(centre)) * pitch;
                    let mut piece = RigidBody::new(RigidBodyDesc {
                        position: position + offset,
                        ..piece_desc
                    })?;
                    piece.slave_to(id, offsets.len());
                    offsets.push(offset);
                    staged.push(piece);
                }
            }
        }

        let mut nodes = Vec::with_capacity(offsets.len());
        for &offset in &offsets {
            nodes.push(Particle::new(offset, NODE_MASS)?);
        }

        let mut links = Vec::new();
        for a in 0..offsets.len() {
            for b in (a + 1)..offsets.len() {
                let rest_length = offsets[a].distance(offsets[b]);
                if rest_length < pitch * 1.1 {
                    links.push(NetworkLink { a, b, rest_length });
                }
            }
        }

        // Nothing touches the arena until every piece was built.
        let body = BodyId(bodies.len());
        bodies.push(aggregate);
        for piece in staged {
            pieces.push(BodyId(bodies.len()));
            bodies.push(piece);
        }

        Ok(Self {
            id,
            config,
            body,
            pieces,
            offsets,
            nodes,
            links,
            state: AssemblyState::Intact { has_impacted: false },
            spawn_position: position,
            spawn_velocity: velocity,
            spare: Vec::new(),
        })
    }

    pub fn id(&self) -> AssemblyId {
        self.id
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// The aggregate body used while intact.
    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn pieces(&self) -> &[BodyId] {
        &self.pieces
    }

    pub fn state(&self) -> AssemblyState {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(self.state, AssemblyState::Destroyed { .. })
    }

    /// Current visual displacement of piece `index` from its rest offset.
    pub fn deformation(&self, index: usize) -> Option<Vec3> {
        Some(self.nodes.get(index)?.position - *self.offsets.get(index)?)
    }

    /// Largest link strain `|len - rest| / rest` in the network.
    pub fn max_strain(&self) -> f32 {
        self.links
            .iter()
            .map(|l| (self.nodes[l.a].position.distance(self.nodes[l.b].position) - l.rest_length).abs() / l.rest_length)
            .fold(0.0, f32::max)
    }

    /// Ground response for the aggregate body.
    pub(crate) fn ground_contact(&mut self, bodies: &mut [RigidBody], world: &WorldConfig) -> GroundOutcome {
        let AssemblyState::Intact { .. } = self.state else {
            return GroundOutcome::None;
        };
        let body = &mut bodies[self.body.0];
        if !body.enable_collisions {
            return GroundOutcome::None;
        }

        if let Some(speed) = body.pending_ground_impact(world.ground_height) {
            let energy = 0.5 * body.mass() * speed * speed;
            if energy > self.config.threshold() {
                return GroundOutcome::Shatter { energy };
            }
        }

        let velocity_before = body.velocity;
        let Some(impact) = body.resolve_ground(world) else {
            return GroundOutcome::None;
        };
        let delta_v = body.velocity - velocity_before;

        // Upper layers lag behind the bounce.
        let floor = self.offsets.iter().map(|o| o.y).fold(f32::INFINITY, f32::min);
        let kick = -delta_v * self.config.network_compliance;
        for (node, offset) in self.nodes.iter_mut().zip(&self.offsets) {
            if offset.y > floor + f32::EPSILON {
                node.velocity += kick;
            }
        }

        self.state = AssemblyState::Intact { has_impacted: true };
        GroundOutcome::Bounced(impact)
    }

    /// Whether an impact of `impact_speed` against a body of `other_mass`
    /// is hard enough to shatter.
    pub(crate) fn collision_shatters(&self, bodies: &[RigidBody], impact_speed: f32, other_mass: f32) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let force = impact_speed * (bodies[self.body.0].mass() + other_mass) * 0.5;
        force > self.config.threshold()
    }

    /// Release every piece with an ejection velocity and retire the
    /// aggregate. Returns the kinetic energy that drove the explosion, or
    /// `None` if the assembly was already destroyed.
    pub(crate) fn shatter<R: Rng>(&mut self, bodies: &mut [RigidBody], rng: &mut R) -> Option<f32> {
        if self.is_destroyed() {
            return None;
        }

        let (centre, rotation, parent_velocity, mass) = {
            let body = &bodies[self.body.0];
            (body.position, body.rotation, body.velocity, body.mass())
        };
        let energy = 0.5 * mass * parent_velocity.length_squared();
        let energy_per_piece = energy / self.pieces.len() as f32;

        for (index, &piece_id) in self.pieces.iter().enumerate() {
            let piece = &mut bodies[piece_id.0];
            piece.position = centre + rotation * self.nodes[index].position;
            piece.rotation = rotation;

            let outward = piece.position - centre;
            let mut distance = outward.length();
            let direction = if distance < MIN_EJECT_DISTANCE {
                distance = CENTRE_PIECE_DISTANCE;
                Vec3::new(
                    rng.gen_range(-1.0..=1.0),
                    rng.gen_range(0.5..=1.0),
                    rng.gen_range(-1.0..=1.0),
                )
                .normalize()
            } else {
                outward / distance
            };

            let distance_factor = 0.3 + distance / self.config.base_size * 1.7;
            let piece_energy = energy_per_piece * distance_factor;
            let speed = (2.0 * piece_energy / piece.mass()).sqrt()
                * rng.gen_range(self.config.speed_jitter_min..=self.config.speed_jitter_max);

            let velocity = direction * speed
                + Vec3::new(0.0, speed * self.config.upward_bias, 0.0)
                + parent_velocity * self.config.inherited_fraction;
            piece.release(velocity);
        }

        bodies[self.body.0].destroy();
        self.state = AssemblyState::Destroyed {
            remaining_lifetime: self.config.piece_lifetime,
        };
        Some(energy)
    }

    pub(crate) fn update(&mut self, dt: f32, bodies: &mut [RigidBody]) -> AssemblyUpdate {
        match self.state {
            AssemblyState::Intact { has_impacted } => {
                self.step_network(dt);
                if has_impacted && self.max_strain() > self.config.break_threshold {
                    return AssemblyUpdate::Overstretched;
                }
                self.slave_pieces(bodies);
                AssemblyUpdate::Steady
            }
            AssemblyState::Destroyed { remaining_lifetime } => {
                if remaining_lifetime <= 0.0 {
                    return AssemblyUpdate::Steady;
                }
                let remaining_lifetime = remaining_lifetime - dt;
                self.state = AssemblyState::Destroyed { remaining_lifetime };
                if remaining_lifetime > 0.0 {
                    return AssemblyUpdate::Steady;
                }
                for piece in &self.pieces {
                    bodies[piece.0].destroy();
                }
                AssemblyUpdate::Expired
            }
        }
    }

    fn step_network(&mut self, dt: f32) {
        let (k, c) = (self.config.network_stiffness, self.config.network_damping);

        for link in &self.links {
            let (a, b) = (&self.nodes[link.a], &self.nodes[link.b]);
            if let Some(force) = damped_spring_force(a.position, a.velocity, b.position, b.velocity, link.rest_length, k, c) {
                self.nodes[link.a].add_force(force);
                self.nodes[link.b].add_force(-force);
            }
        }

        // Each node is also held to its rest offset so the network keeps its shape.
        for (node, &offset) in self.nodes.iter_mut().zip(&self.offsets) {
            let restore = -k * (node.position - offset) - c * node.velocity;
            node.add_force(restore);
            node.integrate(dt, 0.0);
        }

        if !self.nodes.iter().all(Particle::is_finite) {
            for (node, &offset) in self.nodes.iter_mut().zip(&self.offsets) {
                node.position = offset;
                node.velocity = Vec3::ZERO;
            }
        }
    }

    fn slave_pieces(&self, bodies: &mut [RigidBody]) {
        let (position, rotation, velocity) = {
            let body = &bodies[self.body.0];
            (body.position, body.rotation, body.velocity)
        };
        for (index, piece_id) in self.pieces.iter().enumerate() {
            let piece = &mut bodies[piece_id.0];
            piece.position = position + rotation * self.nodes[index].position;
            piece.rotation = rotation;
            piece.velocity = velocity;
        }
    }

    /// Retire the current bodies and build a fresh assembly at the spawn
    /// point. On error the assembly is left untouched.
    /// Rebuild from `config` at the spawn point.
    ///
    /// The new aggregate and pieces take over the slots this assembly already
    /// owns, aggregate first, so a linked aggregate id keeps working. The
    /// arena only grows when the new layout needs more bodies than it ever
    /// had. On error nothing changes.
    pub(crate) fn rebuild(&mut self, config: AssemblyConfig, bodies: &mut Vec<RigidBody>) -> ConfigResult<()> {
        let mut staged = Vec::new();
        let mut fresh = Self::spawn(self.id, self.spawn_position, self.spawn_velocity, config, &mut staged)?;

        let slots: Vec<BodyId> = std::iter::once(self.body)
            .chain(self.pieces.iter().copied())
            .chain(self.spare.iter().copied())
            .collect();

        let mut placed = Vec::with_capacity(staged.len());
        for (i, body) in staged.into_iter().enumerate() {
            match slots.get(i) {
                Some(&slot) => {
                    bodies[slot.0] = body;
                    placed.push(slot);
                }
                None => {
                    placed.push(BodyId(bodies.len()));
                    bodies.push(body);
                }
            }
        }
        for &slot in slots.iter().skip(placed.len()) {
            bodies[slot.0].destroy();
        }

        fresh.body = placed[fresh.body.0];
        for piece in &mut fresh.pieces {
            *piece = placed[piece.0];
        }
        fresh.spare = slots.into_iter().skip(placed.len()).collect();
        *self = fresh;
        Ok(())
    }
}
