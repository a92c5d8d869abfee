//! Aether Physics Demo
//!
//! Builds a small level, drives two characters with scripted input, logs
//! landings and blocked moves, then replays the run and checks the hashes
//! match. Pass `--dump` to print the final snapshots as JSON.

use std::collections::BTreeMap;

use anyhow::{ensure, Context};
use glam::Vec2;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aether_physics::{
    core::aabb::Aabb,
    movement::InputFrame,
    physics::PhysicsEventData,
    protocol::{CollisionType, SurfaceDescriptor},
    runtime::{DriverConfig, PhysicsDriver},
    BodyDef, EntityId, MovementRequest, RespawnState, ResponseStatus, Simulation, SimulationConfig,
    VERSION,
};

const RUNNER: EntityId = EntityId(1);
const HOPPER: EntityId = EntityId(2);
const DEMO_TICKS: u64 = 600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Aether Physics v{}", VERSION);

    let config = SimulationConfig::from_env().context("loading configuration")?;
    info!(
        dt = config.physics.fixed_dt,
        gravity = config.physics.gravity,
        jump_force = config.character.jump_force,
        "configuration loaded"
    );

    let mut sim = Simulation::new(config.clone(), demo_level()).context("building simulation")?;
    sim.spawn(RUNNER, BodyDef::dynamic(Vec2::new(-300.0, 100.0), Vec2::new(12.0, 24.0)))?;
    sim.spawn(HOPPER, BodyDef::dynamic(Vec2::new(150.0, 100.0), Vec2::new(12.0, 24.0)))?;

    run_script(&mut sim)?;

    let hash = sim.compute_hash();
    info!(tick = sim.tick_count(), hash = %hex::encode(hash), "run finished");

    let replay = sim.replay().context("replaying run")?;
    let replay_hash = replay.compute_hash();
    info!(hash = %hex::encode(replay_hash), "replay finished");
    ensure!(hash == replay_hash, "replay diverged from the recorded run");
    info!("replay verified");

    if std::env::args().any(|arg| arg == "--dump") {
        println!("{}", serde_json::to_string_pretty(&sim.snapshots())?);
    }

    drive_async(config).await
}

/// Floor, a wall, a one-way ledge, a moving platform and a hazard sensor.
fn demo_level() -> aether_physics::StaticWorld {
    let mut world = aether_physics::StaticWorld::new();
    world.add_solid(
        Aabb::from_min_max(Vec2::new(-600.0, 200.0), Vec2::new(600.0, 260.0)),
        SurfaceDescriptor::stone(),
    );
    world.add_solid(
        Aabb::from_min_max(Vec2::new(-100.0, 80.0), Vec2::new(-60.0, 200.0)),
        SurfaceDescriptor::stone(),
    );
    world.add_solid(
        Aabb::from_min_max(Vec2::new(60.0, 190.0), Vec2::new(260.0, 200.0)),
        SurfaceDescriptor::ice(),
    );
    world.add_one_way(
        Aabb::from_min_max(Vec2::new(300.0, 120.0), Vec2::new(420.0, 128.0)),
        SurfaceDescriptor::one_way(),
    );
    world.add_moving_platform(
        Vec2::new(40.0, 6.0),
        Vec2::new(-450.0, 60.0),
        Vec2::new(-250.0, 60.0),
        50.0,
        SurfaceDescriptor::stone(),
    );
    world.add_sensor(
        Aabb::from_min_max(Vec2::new(500.0, 150.0), Vec2::new(560.0, 200.0)),
        CollisionType::Damage,
    );
    world
}

fn runner_input(tick: u64) -> InputFrame {
    match tick {
        0..=59 => InputFrame::new(),
        // Run right into the wall
        60..=179 => InputFrame::with_movement(127, 0),
        // Jump over it
        180..=195 => InputFrame::with_movement(127, 0).jumping(true),
        196..=299 => InputFrame::with_movement(127, 0),
        300 => InputFrame::with_movement(127, 0).dashing(true),
        _ => InputFrame::new(),
    }
}

fn hopper_input(tick: u64) -> InputFrame {
    // Short hops with a quick release every second
    let phase = tick % 60;
    InputFrame::with_movement(64, 0).jumping(phase < 4)
}

fn run_script(sim: &mut Simulation) -> anyhow::Result<()> {
    for tick in 1..=DEMO_TICKS {
        if tick == 420 {
            sim.respawn(RUNNER, &RespawnState::spawning(Vec2::new(-300.0, 100.0)).with_invulnerability(1.0))?;
            info!(tick, "runner respawned");
        }

        let inputs = BTreeMap::from([(RUNNER, runner_input(tick)), (HOPPER, hopper_input(tick))]);
        let result = sim.tick(&inputs);

        for response in &result.responses {
            if matches!(response.status, ResponseStatus::Blocked | ResponseStatus::Failed) {
                warn!(
                    tick,
                    entity = %response.entity(),
                    kind = %response.request.kind(),
                    status = ?response.status,
                    reason = response.reason.as_deref().unwrap_or(""),
                    "movement not applied"
                );
            }
        }
        for event in &result.events {
            match &event.data {
                PhysicsEventData::GroundStateChanged(ground) if ground.just_landed() => {
                    info!(
                        tick,
                        entity = %event.entity,
                        surface = ground.surface.as_ref().map_or("?", |s| s.material.as_str()),
                        "landed"
                    );
                }
                PhysicsEventData::CollisionStarted(contact) if contact.collision_type == CollisionType::Damage => {
                    warn!(tick, entity = %event.entity, "entered hazard");
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// Same stack on the async driver: one awaited request per call.
async fn drive_async(config: SimulationConfig) -> anyhow::Result<()> {
    let sim = Simulation::new(config, demo_level())?;
    let (handle, join) = PhysicsDriver::spawn(sim, DriverConfig::manual());
    handle
        .spawn(RUNNER, BodyDef::dynamic(Vec2::new(-300.0, 176.0), Vec2::new(12.0, 24.0)))
        .await?;

    let pending = handle
        .enqueue(MovementRequest::walk(RUNNER, Vec2::X, 180.0, 0.0))
        .await?;
    handle.step(1).await?;
    let response = pending.await?;
    info!(status = ?response.status, velocity = ?response.actual_velocity, "driver response");

    handle.shutdown().await?;
    let sim = join.await?;
    info!(ticks = sim.tick_count(), "driver stopped");
    Ok(())
}
