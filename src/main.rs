//! Headless sandbox demo.
//!
//! Builds the stock scenes (a tethered crate, a cloth sheet, a Rubik drop and
//! two fracture lattices), runs them for a few simulated seconds and logs
//! what happened. Pass a JSON config path as the first argument to override
//! any tuning value.

use std::time::Duration;

use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use sandbox_core::{RigidBodyDesc, SandboxConfig};
use sandbox_physics::{PhysicsWorld, SandboxPhysicsPlugin, SpawnQueue, SpawnRequest, StepDiagnostics};

const DEMO_SECONDS: f32 = 12.0;

#[derive(Resource)]
struct DemoConfig(SandboxConfig);

fn main() {
    let config = match std::env::args().nth(1) {
        Some(path) => match SandboxConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed to load {}: {}", path, err);
                std::process::exit(1);
            }
        },
        None => SandboxConfig::default(),
    };

    let timestep = config.world.fixed_timestep;
    let frames = (DEMO_SECONDS / timestep).ceil() as u32 + 1;

    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugins(LogPlugin {
            filter: "sandbox_core=info,sandbox_physics=info,particle_sandbox=info".to_string(),
            ..default()
        })
        .add_plugins(SandboxPhysicsPlugin::new(config.world.clone()))
        .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f32(timestep)))
        .insert_resource(DemoConfig(config))
        .add_systems(Startup, setup_scenes);
    app.finish();
    app.cleanup();

    for _ in 0..frames {
        app.update();
    }

    report(app.world());
}

fn setup_scenes(mut commands: Commands, config: Res<DemoConfig>, mut queue: ResMut<SpawnQueue>) {
    let config = &config.0;

    // Crate hanging from a tether, pushed sideways so it swings.
    let anchor = Vec3::new(-6.0, 10.0, 0.0);
    let hanging = commands.spawn((Name::new("Tethered crate"), Transform::default())).id();
    queue.push_linked(
        SpawnRequest::TetheredBody {
            body: RigidBodyDesc::cube(anchor - Vec3::Y * 4.0, 1.0, 2.0).with_velocity(Vec3::new(3.0, 0.0, 0.0)),
            anchor,
            kind: config.tether,
        },
        hanging,
    );

    // Ball thrown at a resting crate.
    let target = commands.spawn((Name::new("Target crate"), Transform::default())).id();
    queue.push_linked(
        SpawnRequest::Body(RigidBodyDesc::cube(Vec3::new(0.0, 0.5, -6.0), 1.0, 1.0)),
        target,
    );
    let ball = commands.spawn((Name::new("Ball"), Transform::default())).id();
    queue.push_linked(
        SpawnRequest::Body(
            RigidBodyDesc::sphere(Vec3::new(-4.0, 0.5, -6.0), 0.5, 1.0).with_velocity(Vec3::new(6.0, 0.0, 0.0)),
        ),
        ball,
    );

    queue.push(SpawnRequest::Cloth(config.cloth.clone()));

    let rubik = commands.spawn((Name::new("Rubik cube"), Transform::default())).id();
    queue.push_linked(
        SpawnRequest::Assembly {
            position: Vec3::new(0.0, 15.0, 6.0),
            velocity: Vec3::ZERO,
            config: config.rubik.clone(),
        },
        rubik,
    );

    queue.push(SpawnRequest::Grid {
        position: Vec3::new(6.0, 8.0, 0.0),
        config: config.cube_fracture.clone(),
    });
    queue.push(SpawnRequest::Grid {
        position: Vec3::new(12.0, 8.0, 0.0),
        config: config.plate_fracture.clone(),
    });

    info!("Queued {} spawns", queue.pending());
}

fn report(world: &World) {
    let physics = world.resource::<PhysicsWorld>();
    let diagnostics = world.resource::<StepDiagnostics>();

    info!(
        "Finished {} steps ({} spawns): {} collisions, {} breaks, {} faults",
        diagnostics.steps,
        world.resource::<SpawnQueue>().spawned.len(),
        diagnostics.collisions,
        diagnostics.breaks,
        diagnostics.faults.len()
    );

    for (id, grid) in physics.grids() {
        info!(
            "Lattice {}: {} of {} edges broken",
            id.index(),
            grid.broken_count(),
            grid.edges().len()
        );
    }
    for assembly in physics.assemblies() {
        info!("Assembly {:?}: {:?}", assembly.id(), assembly.state());
    }

    let destroyed = physics.bodies().filter(|(_, body)| body.is_destroyed()).count();
    info!(
        "{} bodies ({} destroyed), total energy {:.2} J",
        physics.body_count(),
        destroyed,
        physics.total_energy()
    );
}
