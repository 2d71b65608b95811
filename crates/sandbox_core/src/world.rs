//! The simulation world: owner of every body, tether, cloth and structure.
//!
//! Objects live in arenas addressed by typed ids. Nothing is ever removed
//! during a run; retired bodies are flagged destroyed and skipped, so ids
//! stay valid for the lifetime of the world. A rebuilt assembly refills the
//! slots it already owns before growing the arena.
//!
//! # Step order
//!
//! 1. Tether forces on their bodies
//! 2. Body integration
//! 3. Ground response (assemblies first, since a hard landing shatters them)
//! 4. Cloth
//! 5. Pairwise body collisions
//! 6. Assembly networks, piece slaving and cleanup timers
//! 7. Fracture lattices
//! 8. Non-finite recovery for free bodies
//! 9. Post-step observer hook

use bevy::math::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::cloth::{Cloth, ClothConfig, ClothStatus};
use crate::collision::{self, CollisionEvent};
use crate::config::WorldConfig;
use crate::error::{check_non_negative, ConfigError, ConfigResult};
use crate::forces::DragParams;
use crate::fracture::assembly::{AssemblyUpdate, GroundOutcome};
use crate::fracture::{AssemblyConfig, FractureGrid, FragmentableAssembly, GridFractureConfig};
use crate::observer::{BreakEvent, Fault, NoOpObserver, PhysicsObserver, StepSummary};
use crate::rigid_body::{RigidBody, RigidBodyDesc, Shape};
use crate::tension::{TensionConstraint, TetherDesc};

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

arena_id!(
    /// Handle to a rigid body.
    BodyId
);
arena_id!(
    /// Handle to a tether.
    TetherId
);
arena_id!(
    /// Handle to a cloth.
    ClothId
);
arena_id!(
    /// Handle to a fragmentable assembly.
    AssemblyId
);
arena_id!(
    /// Handle to a fracture lattice.
    GridId
);

pub struct SimulationWorld {
    config: WorldConfig,
    bodies: Vec<RigidBody>,
    tethers: Vec<TensionConstraint>,
    cloths: Vec<Cloth>,
    assemblies: Vec<FragmentableAssembly>,
    grids: Vec<FractureGrid>,
    rng: StdRng,
    accumulator: f32,
    step_count: u64,
}

impl Default for SimulationWorld {
    fn default() -> Self {
        Self::with_config(WorldConfig::default())
    }
}

impl SimulationWorld {
    pub fn new(config: WorldConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: WorldConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            bodies: Vec::new(),
            tethers: Vec::new(),
            cloths: Vec::new(),
            assemblies: Vec::new(),
            grids: Vec::new(),
            rng,
            accumulator: 0.0,
            step_count: 0,
        }
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    // ------------------------------------------------------------------
    // Spawning
    // ------------------------------------------------------------------

    pub fn spawn_body(&mut self, desc: RigidBodyDesc) -> ConfigResult<BodyId> {
        let body = RigidBody::new(desc)?;
        let id = BodyId(self.bodies.len());
        self.bodies.push(body);
        Ok(id)
    }

    pub fn spawn_tether(&mut self, desc: TetherDesc) -> ConfigResult<TetherId> {
        self.check_body(desc.body)?;
        let tether = TensionConstraint::new(desc)?;
        let id = TetherId(self.tethers.len());
        self.tethers.push(tether);
        Ok(id)
    }

    pub fn spawn_cloth(&mut self, config: ClothConfig) -> ConfigResult<ClothId> {
        let cloth = Cloth::new(config)?;
        let id = ClothId(self.cloths.len());
        self.cloths.push(cloth);
        Ok(id)
    }

    pub fn spawn_assembly(&mut self, position: Vec3, velocity: Vec3, config: AssemblyConfig) -> ConfigResult<AssemblyId> {
        let id = AssemblyId(self.assemblies.len());
        let assembly = FragmentableAssembly::spawn(id, position, velocity, config, &mut self.bodies)?;
        self.assemblies.push(assembly);
        Ok(id)
    }

    pub fn spawn_grid(&mut self, position: Vec3, config: GridFractureConfig) -> ConfigResult<GridId> {
        let grid = FractureGrid::new(position, self.config.ground_height, config)?;
        let id = GridId(self.grids.len());
        self.grids.push(grid);
        Ok(id)
    }

    // ------------------------------------------------------------------
    // Forces and setters
    // ------------------------------------------------------------------

    pub fn add_force(&mut self, id: BodyId, force: Vec3) -> ConfigResult<()> {
        self.body_mut(id)?.add_force(force);
        Ok(())
    }

    pub fn add_impulse(&mut self, id: BodyId, impulse: Vec3) -> ConfigResult<()> {
        self.body_mut(id)?.add_impulse(impulse);
        Ok(())
    }

    pub fn set_body_mass(&mut self, id: BodyId, mass: f32) -> ConfigResult<()> {
        self.body_mut(id)?.set_mass(mass)
    }

    pub fn set_body_material(&mut self, id: BodyId, bounciness: f32, friction: f32) -> ConfigResult<()> {
        self.body_mut(id)?.set_material(bounciness, friction)
    }

    pub fn set_gravity(&mut self, gravity: f32) -> ConfigResult<()> {
        self.config.gravity = check_non_negative("gravity", gravity)?;
        Ok(())
    }

    pub fn set_air_resistance(&mut self, enabled: bool) {
        self.config.enable_air_resistance = enabled;
    }

    /// Turn aerodynamic drag on rigid bodies on or off.
    pub fn set_aero_drag(&mut self, drag: Option<DragParams>) -> ConfigResult<()> {
        if let Some(params) = &drag {
            params.validate()?;
        }
        self.config.aero_drag = drag;
        Ok(())
    }

    pub fn set_collisions_enabled(&mut self, enabled: bool) {
        self.config.enable_collisions = enabled;
    }

    /// Move a tether's anchor; `velocity` feeds the damping term.
    pub fn set_anchor(&mut self, id: TetherId, position: Vec3, velocity: Vec3) -> ConfigResult<()> {
        let tether = self.tethers.get_mut(id.0).ok_or(ConfigError::UnknownId {
            what: "tether",
            index: id.0,
        })?;
        tether.anchor = position;
        tether.anchor_velocity = velocity;
        Ok(())
    }

    pub fn set_cloth_wind(&mut self, id: ClothId, enabled: bool) -> ConfigResult<()> {
        self.cloth_mut(id)?.set_wind(enabled);
        Ok(())
    }

    /// Replace a cloth's parameters and rebuild it.
    pub fn reconfigure_cloth(&mut self, id: ClothId, config: ClothConfig) -> ConfigResult<()> {
        self.cloth_mut(id)?.reconfigure(config)
    }

    pub fn reset_cloth(&mut self, id: ClothId) -> ConfigResult<()> {
        self.cloth_mut(id)?.reset();
        Ok(())
    }

    /// Replace an assembly's parameters and rebuild it at its spawn point.
    ///
    /// The rebuilt bodies reuse the assembly's existing arena slots, so the
    /// aggregate keeps its id and repeated calls do not grow the world.
    pub fn reconfigure_assembly(&mut self, id: AssemblyId, config: AssemblyConfig) -> ConfigResult<()> {
        let assembly = self.assemblies.get_mut(id.0).ok_or(ConfigError::UnknownId {
            what: "assembly",
            index: id.0,
        })?;
        assembly.rebuild(config, &mut self.bodies)
    }

    /// Replace a lattice's parameters and rebuild it unbroken.
    pub fn reconfigure_grid(&mut self, id: GridId, config: GridFractureConfig) -> ConfigResult<()> {
        self.grid_mut(id)?.reconfigure(config)
    }

    // ------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------

    pub fn step(&mut self, dt: f32) {
        self.step_with(dt, &mut NoOpObserver);
    }

    /// Accumulate frame time and run as many fixed steps as fit, up to
    /// `max_steps_per_frame`. Returns the number of steps run.
    pub fn advance(&mut self, frame_dt: f32) -> u32 {
        self.advance_with(frame_dt, &mut NoOpObserver)
    }

    pub fn advance_with<O: PhysicsObserver>(&mut self, frame_dt: f32, observer: &mut O) -> u32 {
        self.accumulator += frame_dt;
        let fixed = self.config.fixed_timestep;

        let mut steps = 0;
        while self.accumulator >= fixed && steps < self.config.max_steps_per_frame {
            self.step_with(fixed, observer);
            self.accumulator -= fixed;
            steps += 1;
        }
        steps
    }

    /// Run one tick of `dt` seconds, reporting to `observer`.
    pub fn step_with<O: PhysicsObserver>(&mut self, dt: f32, observer: &mut O) {
        let mut collisions = 0;
        let mut breaks = 0;

        self.apply_tethers(observer, &mut breaks);

        for body in &mut self.bodies {
            body.integrate(dt, &self.config);
        }

        if self.config.enable_collisions {
            self.resolve_ground(observer, &mut breaks);
        }

        let (gravity, ground_y) = (self.config.gravity, self.config.ground_height);
        for (index, cloth) in self.cloths.iter_mut().enumerate() {
            if cloth.step(dt, gravity, ground_y) == ClothStatus::Reset {
                observer.on_fault(&Fault::ClothReset { cloth: ClothId(index) });
            }
        }

        if self.config.enable_collisions {
            self.resolve_collisions(observer, &mut collisions, &mut breaks);
        }

        self.update_assemblies(dt, observer, &mut breaks);

        for (index, grid) in self.grids.iter_mut().enumerate() {
            let report = grid.step(dt, gravity, &mut self.rng);
            for &(edge, energy) in &report.broken_edges {
                observer.on_break(&BreakEvent::GridEdge {
                    grid: GridId(index),
                    edge,
                    energy,
                });
            }
            breaks += report.broken_edges.len();
            if report.reset {
                observer.on_fault(&Fault::GridReset { grid: GridId(index) });
            }
        }

        for (index, body) in self.bodies.iter_mut().enumerate() {
            if body.is_simulated() && !body.is_finite() {
                body.restore_spawn();
                observer.on_fault(&Fault::BodyReset { body: BodyId(index) });
            }
        }

        self.step_count += 1;
        observer.on_step(&StepSummary {
            step: self.step_count,
            dt,
            active_bodies: self.bodies.iter().filter(|b| b.is_simulated()).count(),
            collisions,
            breaks,
            total_energy: self.total_energy(),
        });
    }

    fn apply_tethers<O: PhysicsObserver>(&mut self, observer: &mut O, breaks: &mut usize) {
        for (index, tether) in self.tethers.iter_mut().enumerate() {
            let Some(body) = self.bodies.get_mut(tether.body.0) else {
                continue;
            };
            if tether.is_broken() || !body.is_simulated() {
                continue;
            }

            let (force, snapped) = tether.update(body.attachment_point(), body.velocity);
            body.add_force(force);
            if snapped {
                *breaks += 1;
                observer.on_break(&BreakEvent::Tether {
                    tether: TetherId(index),
                });
            }
        }
    }

    fn resolve_ground<O: PhysicsObserver>(&mut self, observer: &mut O, breaks: &mut usize) {
        for assembly in &mut self.assemblies {
            if let GroundOutcome::Shatter { .. } = assembly.ground_contact(&mut self.bodies, &self.config) {
                if let Some(energy) = assembly.shatter(&mut self.bodies, &mut self.rng) {
                    *breaks += 1;
                    observer.on_break(&BreakEvent::Assembly {
                        assembly: assembly.id(),
                        energy,
                    });
                }
            }
        }

        for body in &mut self.bodies {
            // Aggregates were handled by their assembly.
            if matches!(body.shape(), Shape::Composite { .. }) {
                continue;
            }
            body.resolve_ground(&self.config);
        }
    }

    fn resolve_collisions<O: PhysicsObserver>(&mut self, observer: &mut O, collisions: &mut usize, breaks: &mut usize) {
        let candidates: Vec<usize> = (0..self.bodies.len())
            .filter(|&i| self.bodies[i].is_simulated() && self.bodies[i].enable_collisions)
            .collect();

        let mut shattered = Vec::new();
        for (n, &i) in candidates.iter().enumerate() {
            for &j in &candidates[n + 1..] {
                let (a, b) = pair_mut(&mut self.bodies, i, j);
                let Some(contact) = collision::detect(a, b) else {
                    continue;
                };
                let Some(response) = collision::resolve(a, b, contact) else {
                    continue;
                };

                *collisions += 1;
                let event = CollisionEvent {
                    a: BodyId(i),
                    b: BodyId(j),
                    impact_speed: response.impact_speed,
                    impulse: response.impulse,
                };
                observer.on_collision(&event);

                for (self_id, other_id) in [(i, j), (j, i)] {
                    let Some(index) = self.assemblies.iter().position(|a| a.body().0 == self_id) else {
                        continue;
                    };
                    let other_mass = self.bodies[other_id].mass();
                    if self.assemblies[index].collision_shatters(&self.bodies, response.impact_speed, other_mass) {
                        shattered.push(index);
                    }
                }
            }
        }

        for index in shattered {
            let assembly = &mut self.assemblies[index];
            if let Some(energy) = assembly.shatter(&mut self.bodies, &mut self.rng) {
                *breaks += 1;
                observer.on_break(&BreakEvent::Assembly {
                    assembly: assembly.id(),
                    energy,
                });
            }
        }
    }

    fn update_assemblies<O: PhysicsObserver>(&mut self, dt: f32, observer: &mut O, breaks: &mut usize) {
        for assembly in &mut self.assemblies {
            if assembly.update(dt, &mut self.bodies) != AssemblyUpdate::Overstretched {
                continue;
            }
            if let Some(energy) = assembly.shatter(&mut self.bodies, &mut self.rng) {
                *breaks += 1;
                observer.on_break(&BreakEvent::Assembly {
                    assembly: assembly.id(),
                    energy,
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn body(&self, id: BodyId) -> Option<&RigidBody> {
        self.bodies.get(id.0)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyId, &RigidBody)> {
        self.bodies.iter().enumerate().map(|(i, b)| (BodyId(i), b))
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Unknown ids count as destroyed.
    pub fn is_destroyed(&self, id: BodyId) -> bool {
        self.bodies.get(id.0).map_or(true, RigidBody::is_destroyed)
    }

    pub fn tether(&self, id: TetherId) -> Option<&TensionConstraint> {
        self.tethers.get(id.0)
    }

    pub fn cloth(&self, id: ClothId) -> Option<&Cloth> {
        self.cloths.get(id.0)
    }

    pub fn assembly(&self, id: AssemblyId) -> Option<&FragmentableAssembly> {
        self.assemblies.get(id.0)
    }

    pub fn grid(&self, id: GridId) -> Option<&FractureGrid> {
        self.grids.get(id.0)
    }

    pub fn grids(&self) -> impl Iterator<Item = (GridId, &FractureGrid)> {
        self.grids.iter().enumerate().map(|(i, g)| (GridId(i), g))
    }

    pub fn assemblies(&self) -> impl Iterator<Item = &FragmentableAssembly> {
        self.assemblies.iter()
    }

    /// Kinetic and gravitational potential energy of a body.
    pub fn body_energy(&self, id: BodyId) -> Option<(f32, f32)> {
        let body = self.bodies.get(id.0)?;
        Some((
            body.kinetic_energy(),
            body.potential_energy(self.config.gravity, self.config.ground_height),
        ))
    }

    /// Mechanical energy of everything still simulated.
    ///
    /// Slaved pieces are represented by their aggregate and not counted.
    pub fn total_energy(&self) -> f32 {
        let (g, ground) = (self.config.gravity, self.config.ground_height);

        let bodies: f32 = self
            .bodies
            .iter()
            .filter(|b| b.is_simulated())
            .map(|b| b.kinetic_energy() + b.potential_energy(g, ground))
            .sum();
        let tethers: f32 = self.tethers.iter().map(TensionConstraint::potential_energy).sum();
        let cloths: f32 = self
            .cloths
            .iter()
            .map(|c| c.kinetic_energy() + c.potential_energy(g, ground))
            .sum();
        let grids: f32 = self
            .grids
            .iter()
            .map(|grid| grid.kinetic_energy() + grid.potential_energy(g))
            .sum();

        bodies + tethers + cloths + grids
    }

    fn check_body(&self, id: BodyId) -> ConfigResult<()> {
        self.body(id).map(|_| ()).ok_or(ConfigError::UnknownId {
            what: "body",
            index: id.0,
        })
    }

    fn body_mut(&mut self, id: BodyId) -> ConfigResult<&mut RigidBody> {
        self.bodies.get_mut(id.0).ok_or(ConfigError::UnknownId {
            what: "body",
            index: id.0,
        })
    }

    fn cloth_mut(&mut self, id: ClothId) -> ConfigResult<&mut Cloth> {
        self.cloths.get_mut(id.0).ok_or(ConfigError::UnknownId {
            what: "cloth",
            index: id.0,
        })
    }

    fn grid_mut(&mut self, id: GridId) -> ConfigResult<&mut FractureGrid> {
        self.grids.get_mut(id.0).ok_or(ConfigError::UnknownId {
            what: "fracture grid",
            index: id.0,
        })
    }
}

/// Two distinct mutable elements, `i < j`.
fn pair_mut(bodies: &mut [RigidBody], i: usize, j: usize) -> (&mut RigidBody, &mut RigidBody) {
    let (head, tail) = bodies.split_at_mut(j);
    (&mut head[i], &mut tail[0])
}
