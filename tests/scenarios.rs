//! End-to-end scenarios run through `SimulationWorld`.
//!
//! Run with: cargo test --test scenarios

use bevy::math::Vec3;
use sandbox_core::{
    AssemblyConfig, AssemblyState, BreakEvent, ClothConfig, DragParams, EventRecorder, GridFractureConfig,
    RigidBodyDesc, SimulationWorld, TensionState, TetherDesc, TetherKind, WorldConfig,
};

const DT: f32 = 0.02;

fn world() -> SimulationWorld {
    SimulationWorld::new(WorldConfig::default()).expect("default config is valid")
}

#[test]
fn test_inelastic_cube_comes_to_rest_on_ground() {
    let mut world = world();
    let cube = world
        .spawn_body(RigidBodyDesc::cube(Vec3::new(0.0, 10.0, 0.0), 1.0, 1.0).with_material(0.0, 0.1))
        .unwrap();

    for _ in 0..300 {
        world.step(DT);
    }

    let body = world.body(cube).unwrap();
    assert!((body.position.y - 0.5).abs() < 1e-5, "cube rests on its face, y = {}", body.position.y);
    assert_eq!(body.velocity.y, 0.0);
}

#[test]
fn test_bouncing_never_creates_energy() {
    let mut world = world();
    let cube = world.spawn_body(RigidBodyDesc::cube(Vec3::new(0.0, 5.0, 0.0), 1.0, 1.0)).unwrap();
    let (ke, pe) = world.body_energy(cube).unwrap();
    let initial = ke + pe;

    let mut bounced = false;
    for step in 0..400 {
        let before = world.body(cube).unwrap().velocity.y;
        world.step(DT);
        let after = world.body(cube).unwrap().velocity.y;
        bounced |= before < 0.0 && after > 0.0;

        let (ke, pe) = world.body_energy(cube).unwrap();
        assert!(
            ke + pe <= initial + 1e-3,
            "step {}: energy grew from {} to {}",
            step,
            initial,
            ke + pe
        );
    }
    assert!(bounced, "a bouncy cube should leave the ground at least once");
}

#[test]
fn test_elastic_bounce_never_gains_energy() {
    let mut world = world();
    let cube = world
        .spawn_body(RigidBodyDesc::cube(Vec3::new(0.0, 10.0, 0.0), 1.0, 1.0).with_material(1.0, 0.0))
        .unwrap();
    let energy = |world: &SimulationWorld| {
        let (ke, pe) = world.body_energy(cube).unwrap();
        ke + pe
    };
    let initial = energy(&world);

    let mut apexes = Vec::new();
    for step in 0..600 {
        let before = world.body(cube).unwrap().velocity.y;
        world.step(DT);
        let after = world.body(cube).unwrap().velocity.y;

        let current = energy(&world);
        assert!(
            current <= initial + 1e-2,
            "step {}: energy grew from {} to {}",
            step,
            initial,
            current
        );
        if before > 0.0 && after <= 0.0 {
            apexes.push(current);
        }
    }

    assert!(apexes.len() >= 2, "expected repeated bounces, got {} apexes", apexes.len());
    for apex in &apexes {
        assert!(*apex <= initial + 1e-2, "apex energy {} above initial {}", apex, initial);
    }
    assert!(apexes[0] > 0.9 * initial, "elastic bounce kept only {} of {}", apexes[0], initial);
}

#[test]
fn test_aero_drag_caps_fall_speed() {
    let drag = DragParams::default();
    let mut still_air = world();
    let mut draggy = SimulationWorld::new(WorldConfig {
        aero_drag: Some(drag),
        ..Default::default()
    })
    .unwrap();

    let desc = RigidBodyDesc::sphere(Vec3::new(0.0, 500.0, 0.0), 0.5, 1.0);
    let free = still_air.spawn_body(desc).unwrap();
    let slowed = draggy.spawn_body(desc).unwrap();

    for _ in 0..250 {
        still_air.step(DT);
        draggy.step(DT);
    }

    let terminal = drag.terminal_speed(1.0, 9.81);
    let free_speed = still_air.body(free).unwrap().velocity.length();
    let slowed_speed = draggy.body(slowed).unwrap().velocity.length();
    assert!(free_speed > 40.0, "free fall reached {}", free_speed);
    assert!(
        (slowed_speed - terminal).abs() < 0.1,
        "drag should hold the fall near {} m/s, got {}",
        terminal,
        slowed_speed
    );
}

#[test]
fn test_spring_settles_at_static_extension() {
    let mut world = world();
    let anchor = Vec3::new(0.0, 6.0, 0.0);
    // Attachment (top face) starts exactly at rest length below the anchor.
    let crate_box = world.spawn_body(RigidBodyDesc::cube(Vec3::new(0.0, 2.5, 0.0), 1.0, 2.0)).unwrap();
    let tether = world
        .spawn_tether(TetherDesc::new(anchor, crate_box, TetherKind::spring()))
        .unwrap();

    for _ in 0..1500 {
        world.step(DT);
    }

    // k * x = m * g
    let expected_extension = 2.0 * 9.81 / 120.0;
    let attachment = world.body(crate_box).unwrap().attachment_point();
    let extension = anchor.distance(attachment) - 3.0;
    assert!(
        (extension - expected_extension).abs() < 1e-3,
        "extension {} should settle at {}",
        extension,
        expected_extension
    );
    assert_eq!(world.tether(tether).unwrap().last_sample().unwrap().state, TensionState::Taut);
}

#[test]
fn test_slack_chain_lets_body_fall_freely() {
    let mut world = world();
    let anchor = Vec3::new(0.0, 6.0, 0.0);
    let weight = world.spawn_body(RigidBodyDesc::cube(Vec3::new(0.0, 2.6, 0.0), 1.0, 1.0)).unwrap();
    let chain = world.spawn_tether(TetherDesc::new(anchor, weight, TetherKind::chain())).unwrap();

    world.step(DT);
    let sample = world.tether(chain).unwrap().last_sample().unwrap();
    assert_eq!(sample.state, TensionState::Slack);
    assert_eq!(sample.force, Vec3::ZERO);
    assert!(
        (world.body(weight).unwrap().velocity.y + 9.81 * DT).abs() < 1e-5,
        "slack chain must not slow the fall"
    );

    for _ in 0..1500 {
        world.step(DT);
        let sample = world.tether(chain).unwrap().last_sample().unwrap();
        if sample.length <= 3.0 {
            assert_eq!(sample.state, TensionState::Slack, "chain pushed at length {}", sample.length);
        }
    }

    let length = anchor.distance(world.body(weight).unwrap().attachment_point());
    assert!(
        (length - 3.0).abs() < 0.05,
        "weight should hang at the chain length, got {}",
        length
    );
}

#[test]
fn test_overstretched_tether_snaps_for_good() {
    let mut world = world();
    let anchor = Vec3::new(0.0, 10.0, 0.0);
    let body = world
        .spawn_body(
            RigidBodyDesc::cube(Vec3::new(0.0, 6.5, 0.0), 1.0, 5.0)
                .with_velocity(Vec3::new(0.0, -20.0, 0.0))
                .with_material(0.0, 0.1),
        )
        .unwrap();
    let tether = world
        .spawn_tether(TetherDesc::new(anchor, body, TetherKind::spring()).with_break_ratio(0.5))
        .unwrap();

    let mut recorder = EventRecorder::default();
    for _ in 0..300 {
        world.step_with(DT, &mut recorder);
    }

    assert!(world.tether(tether).unwrap().is_broken());
    let snaps = recorder
        .breaks
        .iter()
        .filter(|b| matches!(b, BreakEvent::Tether { .. }))
        .count();
    assert_eq!(snaps, 1, "a tether breaks exactly once");
    // Landed on the ground instead of being pulled back up.
    assert!((world.body(body).unwrap().position.y - 0.5).abs() < 0.05);
}

#[test]
fn test_high_drop_shatters_rubik_cube() {
    let mut world = world();
    let rubik = world
        .spawn_assembly(Vec3::new(0.0, 15.0, 0.0), Vec3::ZERO, AssemblyConfig::default())
        .unwrap();
    let aggregate = world.assembly(rubik).unwrap().body();

    let mut recorder = EventRecorder::default();
    for _ in 0..150 {
        world.step_with(DT, &mut recorder);
    }

    let assembly = world.assembly(rubik).unwrap();
    assert!(assembly.is_destroyed(), "15 m drop exceeds the threshold");
    assert!(world.is_destroyed(aggregate));
    assert!(recorder
        .breaks
        .iter()
        .any(|b| matches!(b, BreakEvent::Assembly { energy, .. } if *energy > assembly.config().threshold())));
    assert!(
        assembly.pieces().iter().all(|&p| !world.is_destroyed(p)),
        "pieces live until their lifetime runs out"
    );
}

#[test]
fn test_low_drop_bounces_rubik_cube() {
    let mut world = world();
    // Bottom face one metre above the ground.
    let rubik = world
        .spawn_assembly(Vec3::new(0.0, 1.8, 0.0), Vec3::ZERO, AssemblyConfig::default())
        .unwrap();

    for _ in 0..150 {
        world.step(DT);
    }

    let assembly = world.assembly(rubik).unwrap();
    assert_eq!(assembly.state(), AssemblyState::Intact { has_impacted: true });
    assert!(!world.is_destroyed(assembly.body()));
}

#[test]
fn test_lattice_breaks_are_irreversible() {
    let mut world = world();
    let grid = world.spawn_grid(Vec3::new(0.0, 8.0, 0.0), GridFractureConfig::cube()).unwrap();

    let mut broken = vec![false; world.grid(grid).unwrap().edges().len()];
    for step in 0..400 {
        world.step(DT);
        for (index, edge) in world.grid(grid).unwrap().edges().iter().enumerate() {
            assert!(
                edge.is_broken() || !broken[index],
                "edge {} healed at step {}",
                index,
                step
            );
            broken[index] = edge.is_broken();
        }
    }
}

#[test]
fn test_wind_pushes_cloth_downwind() {
    let config = ClothConfig {
        width: 8,
        height: 8,
        ..Default::default()
    };
    let mut calm = world();
    let mut windy = world();
    let calm_cloth = calm.spawn_cloth(config.clone()).unwrap();
    let windy_cloth = windy.spawn_cloth(config).unwrap();
    windy.set_cloth_wind(windy_cloth, true).unwrap();

    for _ in 0..100 {
        calm.step(DT);
        windy.step(DT);
    }

    let mean_x = |world: &SimulationWorld, id| {
        let cloth = world.cloth(id).unwrap();
        cloth.particles().iter().map(|p| p.position.x).sum::<f32>() / cloth.particles().len() as f32
    };
    let (calm_x, windy_x) = (mean_x(&calm, calm_cloth), mean_x(&windy, windy_cloth));
    assert!(
        windy_x > calm_x + 0.05,
        "wind along +X should shift the sheet, calm {} windy {}",
        calm_x,
        windy_x
    );
}

#[test]
fn test_weightless_collision_conserves_momentum() {
    let mut world = world();
    world.set_gravity(0.0).unwrap();
    let light = world
        .spawn_body(RigidBodyDesc::cube(Vec3::new(-2.0, 5.0, 0.0), 1.0, 1.0).with_velocity(Vec3::new(3.0, 0.0, 0.0)))
        .unwrap();
    let heavy = world
        .spawn_body(RigidBodyDesc::cube(Vec3::new(2.0, 5.0, 0.0), 1.0, 3.0).with_velocity(Vec3::new(-3.0, 0.0, 0.0)))
        .unwrap();

    let momentum = |world: &SimulationWorld| {
        let (a, b) = (world.body(light).unwrap(), world.body(heavy).unwrap());
        a.velocity * a.mass() + b.velocity * b.mass()
    };
    let before = momentum(&world);

    let mut recorder = EventRecorder::default();
    for _ in 0..100 {
        world.step_with(DT, &mut recorder);
    }

    assert!(!recorder.collisions.is_empty(), "the cubes should meet");
    let after = momentum(&world);
    assert!(
        (after - before).length() < 1e-3,
        "momentum changed from {:?} to {:?}",
        before,
        after
    );
}
