//! Bevy integration for `sandbox_core`.
//!
//! [`SandboxPhysicsPlugin`] owns a [`SimulationWorld`] as a resource and
//! steps it on `FixedUpdate`, so the world's fixed timestep becomes Bevy's
//! fixed timestep. Systems either touch [`PhysicsWorld`] directly or push
//! requests onto [`SpawnQueue`]; entities follow bodies through [`BodyLink`].

use std::ops::{Deref, DerefMut};

use bevy::prelude::*;
use sandbox_core::{
    AssemblyConfig, AssemblyId, BodyId, BreakEvent, ClothConfig, ClothId, CollisionEvent, ConfigResult, Fault,
    GridFractureConfig, GridId, LogObserver, PhysicsObserver, RigidBodyDesc, SimulationWorld, StepSummary,
    TetherDesc, TetherId, TetherKind, WorldConfig,
};

/// The simulation, stepped by [`SandboxPhysicsPlugin`].
#[derive(Resource)]
pub struct PhysicsWorld(pub SimulationWorld);

impl Deref for PhysicsWorld {
    type Target = SimulationWorld;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for PhysicsWorld {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Stops fixed stepping while set.
#[derive(Resource, Default, Debug, Clone, Copy)]
pub struct SimulationPaused(pub bool);

/// Log sink used while stepping.
#[derive(Resource, Default, Debug, Clone)]
pub struct PhysicsLog(pub LogObserver);

/// Running totals collected from the step observer.
#[derive(Resource, Debug, Default, Clone)]
pub struct StepDiagnostics {
    pub steps: u64,
    pub collisions: u64,
    pub breaks: u64,
    pub faults: Vec<Fault>,
    pub last_summary: Option<StepSummary>,
    /// Seconds between telemetry lines; 0 disables them.
    pub report_interval_secs: f32,
    time_since_report: f32,
}

impl StepDiagnostics {
    pub fn with_interval(report_interval_secs: f32) -> Self {
        Self {
            report_interval_secs,
            ..Default::default()
        }
    }
}

impl PhysicsObserver for StepDiagnostics {
    fn on_collision(&mut self, _event: &CollisionEvent) {
        self.collisions += 1;
    }

    fn on_break(&mut self, _event: &BreakEvent) {
        self.breaks += 1;
    }

    fn on_fault(&mut self, fault: &Fault) {
        self.faults.push(*fault);
    }

    fn on_step(&mut self, summary: &StepSummary) {
        self.steps = summary.step;
        self.last_summary = Some(*summary);
    }
}

/// Makes an entity's `Transform` follow a simulated body.
#[derive(Component, Debug, Clone, Copy)]
pub struct BodyLink(pub BodyId);

/// Something to add to the world on the next fixed tick.
#[derive(Debug, Clone)]
pub enum SpawnRequest {
    Body(RigidBodyDesc),
    /// Tether to a body that already exists.
    Tether(TetherDesc),
    /// A body and a tether holding it, spawned together.
    TetheredBody {
        body: RigidBodyDesc,
        anchor: Vec3,
        kind: TetherKind,
    },
    Cloth(ClothConfig),
    Assembly {
        position: Vec3,
        velocity: Vec3,
        config: AssemblyConfig,
    },
    Grid {
        position: Vec3,
        config: GridFractureConfig,
    },
}

/// Ids handed out while draining the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spawned {
    Body(BodyId),
    TetheredBody(BodyId, TetherId),
    Tether(TetherId),
    Cloth(ClothId),
    Assembly(AssemblyId),
    Grid(GridId),
}

impl Spawned {
    /// Body an entity should follow, if the spawn produced one.
    pub fn body(self, world: &SimulationWorld) -> Option<BodyId> {
        match self {
            Spawned::Body(body) | Spawned::TetheredBody(body, _) => Some(body),
            Spawned::Assembly(id) => world.assembly(id).map(|a| a.body()),
            Spawned::Tether(id) => world.tether(id).map(|t| t.body),
            Spawned::Cloth(_) | Spawned::Grid(_) => None,
        }
    }
}

/// Deferred spawns, applied at the start of the next fixed tick.
#[derive(Resource, Debug, Default)]
pub struct SpawnQueue {
    pending: Vec<(SpawnRequest, Option<Entity>)>,
    /// Everything spawned so far, in request order. Failed requests are
    /// logged and skipped.
    pub spawned: Vec<Spawned>,
}

impl SpawnQueue {
    pub fn push(&mut self, request: SpawnRequest) {
        self.pending.push((request, None));
    }

    /// Queue a spawn and attach a [`BodyLink`] to `entity` once it exists.
    pub fn push_linked(&mut self, request: SpawnRequest, entity: Entity) {
        self.pending.push((request, Some(entity)));
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn spawn_request(world: &mut SimulationWorld, request: SpawnRequest) -> ConfigResult<Spawned> {
    Ok(match request {
        SpawnRequest::Body(desc) => Spawned::Body(world.spawn_body(desc)?),
        SpawnRequest::Tether(desc) => Spawned::Tether(world.spawn_tether(desc)?),
        SpawnRequest::TetheredBody { body, anchor, kind } => {
            // Validate the tether first so a bad one leaves no orphan body.
            kind.validate()?;
            let body = world.spawn_body(body)?;
            let tether = world.spawn_tether(TetherDesc::new(anchor, body, kind))?;
            Spawned::TetheredBody(body, tether)
        }
        SpawnRequest::Cloth(config) => Spawned::Cloth(world.spawn_cloth(config)?),
        SpawnRequest::Assembly {
            position,
            velocity,
            config,
        } => Spawned::Assembly(world.spawn_assembly(position, velocity, config)?),
        SpawnRequest::Grid { position, config } => Spawned::Grid(world.spawn_grid(position, config)?),
    })
}

/// Steps a [`SimulationWorld`] on the fixed schedule.
pub struct SandboxPhysicsPlugin {
    pub world: WorldConfig,
    /// Seconds between telemetry lines; 0 disables them.
    pub report_interval_secs: f32,
}

impl Default for SandboxPhysicsPlugin {
    fn default() -> Self {
        Self {
            world: WorldConfig::default(),
            report_interval_secs: 2.0,
        }
    }
}

impl SandboxPhysicsPlugin {
    pub fn new(world: WorldConfig) -> Self {
        Self {
            world,
            ..Default::default()
        }
    }
}

impl Plugin for SandboxPhysicsPlugin {
    fn build(&self, app: &mut App) {
        let world = match SimulationWorld::new(self.world.clone()) {
            Ok(world) => world,
            Err(err) => {
                error!("Invalid world config ({}), falling back to defaults", err);
                SimulationWorld::default()
            }
        };
        let timestep = world.config().fixed_timestep;

        app.insert_resource(Time::<Fixed>::from_seconds(timestep as f64))
            .insert_resource(PhysicsWorld(world))
            .insert_resource(StepDiagnostics::with_interval(self.report_interval_secs))
            .init_resource::<PhysicsLog>()
            .init_resource::<SimulationPaused>()
            .init_resource::<SpawnQueue>()
            .add_systems(FixedUpdate, (drain_spawn_queue, step_physics).chain())
            .add_systems(Update, (sync_body_transforms, report_diagnostics).chain());
    }
}

fn drain_spawn_queue(mut commands: Commands, mut queue: ResMut<SpawnQueue>, mut physics: ResMut<PhysicsWorld>) {
    if queue.pending.is_empty() {
        return;
    }

    let pending = std::mem::take(&mut queue.pending);
    for (request, entity) in pending {
        let spawned = match spawn_request(&mut physics, request) {
            Ok(spawned) => spawned,
            Err(err) => {
                error!("Spawn request rejected: {}", err);
                continue;
            }
        };
        debug!("Spawned {:?}", spawned);
        queue.spawned.push(spawned);

        if let (Some(entity), Some(body)) = (entity, spawned.body(&physics)) {
            commands.entity(entity).try_insert(BodyLink(body));
        }
    }
}

fn step_physics(
    time: Res<Time>,
    paused: Res<SimulationPaused>,
    mut physics: ResMut<PhysicsWorld>,
    mut log: ResMut<PhysicsLog>,
    mut diagnostics: ResMut<StepDiagnostics>,
) {
    if paused.0 {
        return;
    }
    let dt = time.delta_secs();
    if dt <= 0.0 {
        return;
    }
    let mut observer = (&mut log.0, diagnostics.as_mut());
    physics.step_with(dt, &mut observer);
}

fn sync_body_transforms(
    physics: Res<PhysicsWorld>,
    mut query: Query<(&BodyLink, &mut Transform, Option<&mut Visibility>)>,
) {
    for (link, mut transform, visibility) in query.iter_mut() {
        let Some(body) = physics.body(link.0) else {
            continue;
        };
        transform.translation = body.position;
        transform.rotation = body.rotation;

        if let Some(mut visibility) = visibility {
            let wanted = if body.is_destroyed() {
                Visibility::Hidden
            } else {
                Visibility::Inherited
            };
            if *visibility != wanted {
                *visibility = wanted;
            }
        }
    }
}

fn report_diagnostics(time: Res<Time>, physics: Res<PhysicsWorld>, mut diagnostics: ResMut<StepDiagnostics>) {
    if diagnostics.report_interval_secs <= 0.0 {
        return;
    }

    diagnostics.time_since_report += time.delta_secs();
    if diagnostics.time_since_report >= diagnostics.report_interval_secs {
        info!(
            "Physics: {} steps, {} collisions, {} breaks, {} faults, energy {:.2} J",
            diagnostics.steps,
            diagnostics.collisions,
            diagnostics.breaks,
            diagnostics.faults.len(),
            physics.total_energy()
        );
        diagnostics.time_since_report = 0.0;
    }
}
