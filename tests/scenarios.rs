//! End-to-end movement scenarios through the public API.

use std::collections::BTreeMap;

use aether_physics::{
    core::aabb::Aabb,
    movement::{CharacterPhysics, InputFrame, MovementHandler},
    physics::{CollisionNotification, PhysicsCoordination, PhysicsCoordinator, StaticWorld},
    protocol::SurfaceDescriptor,
    BodyDef, EntityId, MovementRequest, Priority, RespawnState, ResponseStatus, Simulation,
    SimulationConfig,
};
use glam::Vec2;

const HERO: EntityId = EntityId(1);

fn physics_over(world: StaticWorld) -> PhysicsCoordinator {
    PhysicsCoordinator::from_config(&SimulationConfig::default(), world)
}

fn floor(world: &mut StaticWorld, top: f32, min_x: f32, max_x: f32) {
    world.add_solid(
        Aabb::from_min_max(Vec2::new(min_x, top), Vec2::new(max_x, top + 50.0)),
        SurfaceDescriptor::stone(),
    );
}

// -----------------------------------------------------------------------
// Walls
// -----------------------------------------------------------------------

#[test]
fn walk_into_flush_wall_is_blocked() {
    let mut world = StaticWorld::new();
    floor(&mut world, 124.0, -500.0, 500.0);
    world.add_solid(
        Aabb::from_min_max(Vec2::new(150.0, 0.0), Vec2::new(200.0, 124.0)),
        SurfaceDescriptor::stone(),
    );
    let mut physics = physics_over(world);
    physics
        .register_body(HERO, BodyDef::dynamic(Vec2::new(100.0, 100.0), Vec2::new(50.0, 24.0)))
        .unwrap();

    let response = physics.request_movement(HERO, Vec2::X, 200.0);
    assert_eq!(response.status, ResponseStatus::Blocked);
    assert!(response.reason.is_some());

    physics.step();
    assert!(physics.get_position(HERO).unwrap().x <= 150.0 - 50.0 + 1e-3);
}

#[test]
fn walk_into_near_wall_is_clipped() {
    let mut world = StaticWorld::new();
    floor(&mut world, 124.0, -500.0, 500.0);
    world.add_solid(
        Aabb::from_min_max(Vec2::new(150.0, 0.0), Vec2::new(200.0, 124.0)),
        SurfaceDescriptor::stone(),
    );
    let mut physics = physics_over(world);
    physics
        .register_body(HERO, BodyDef::dynamic(Vec2::new(100.0, 100.0), Vec2::new(49.0, 24.0)))
        .unwrap();

    let response = physics.request_movement(HERO, Vec2::X, 200.0);
    assert_eq!(response.status, ResponseStatus::PartialSuccess);
    assert!(response.actual_velocity.x < 200.0);

    for _ in 0..10 {
        physics.request_movement(HERO, Vec2::X, 200.0);
        physics.step();
    }
    assert!(physics.get_position(HERO).unwrap().x <= 150.0 - 49.0 + 1e-3);
}

// -----------------------------------------------------------------------
// Jumping and coyote time
// -----------------------------------------------------------------------

#[test]
fn grounded_jump_leaves_ground() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut physics = physics_over(world);
    physics
        .register_body(HERO, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    physics.step();
    assert!(physics.is_grounded(HERO));

    let response = physics.request_jump(HERO, 540.0);
    assert_eq!(response.status, ResponseStatus::Success);
    assert!((response.actual_velocity.y + 540.0).abs() < 1e-3);

    physics.step();
    assert!(!physics.is_grounded(HERO));
}

#[test]
fn coyote_window_after_walking_off_ledge() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 0.0);
    let mut physics = physics_over(world);
    physics
        .register_body(HERO, BodyDef::dynamic(Vec2::new(-30.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    physics.step();
    assert!(physics.is_grounded(HERO));

    let mut ticks = 0;
    while physics.is_grounded(HERO) {
        physics.request_movement(HERO, Vec2::X, 200.0);
        physics.step();
        ticks += 1;
        assert!(ticks < 60, "never left the ledge");
    }

    // Inside the window
    for _ in 0..5 {
        assert!(physics.notifier().can_jump(HERO));
        assert!(physics.notifier().get_coyote_time_remaining(HERO) > 0.0);
        physics.step();
    }
    // Well past it, still airborne
    for _ in 0..10 {
        physics.step();
    }
    assert!(!physics.is_grounded(HERO));
    assert!(!physics.notifier().can_jump(HERO));
    assert_eq!(physics.request_jump(HERO, 540.0).status, ResponseStatus::Blocked);
}

#[test]
fn jump_consumes_coyote_window() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut physics = physics_over(world);
    physics
        .register_body(HERO, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    physics.step();

    assert!(physics.request_jump(HERO, 540.0).is_applied());
    physics.step();
    assert_eq!(physics.request_jump(HERO, 540.0).status, ResponseStatus::Blocked);
}

// -----------------------------------------------------------------------
// Priority and authority
// -----------------------------------------------------------------------

#[test]
fn critical_beats_low_in_same_tick() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut sim = Simulation::new(SimulationConfig::default(), world).unwrap();
    sim.spawn(HERO, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    sim.tick(&BTreeMap::new());

    let now = sim.physics().now();
    let movement = sim.character_mut().movement_mut();
    let low = movement.submit_movement_request(
        MovementRequest::walk(HERO, Vec2::X, 200.0, now).with_priority(Priority::Low),
    );
    let critical = movement
        .submit_movement_request(MovementRequest::stop(HERO, now).with_priority(Priority::Critical));

    let result = sim.tick(&BTreeMap::new());
    let status_of = |id| {
        result
            .responses
            .iter()
            .find(|r| r.request.request_id() == Some(id))
            .map(|r| r.status)
    };
    assert_eq!(status_of(critical), Some(ResponseStatus::Success));
    assert_eq!(status_of(low), Some(ResponseStatus::Rejected));
    assert_eq!(sim.physics().get_velocity(HERO).unwrap().x, 0.0);
}

#[test]
fn responses_match_published_state() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut sim = Simulation::new(SimulationConfig::default(), world).unwrap();
    sim.spawn(HERO, BodyDef::dynamic(Vec2::new(0.0, 100.0), Vec2::new(16.0, 24.0)))
        .unwrap();

    for tick in 0..120u64 {
        let frame = match tick % 40 {
            0..=19 => InputFrame::with_movement(127, 0),
            20 => InputFrame::new().jumping(true),
            _ => InputFrame::with_movement(-127, 0),
        };
        let result = sim.tick(&BTreeMap::from([(HERO, frame)]));
        for response in &result.responses {
            assert_eq!(Some(response.actual_position), sim.physics().get_position(HERO));
            assert_eq!(response.grounded, sim.physics().is_grounded(HERO));
        }
    }
}

#[test]
fn unapplied_responses_report_published_state() {
    const SIDEKICK: EntityId = EntityId(2);

    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut sim = Simulation::new(SimulationConfig::default(), world).unwrap();
    sim.spawn(HERO, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    sim.spawn(SIDEKICK, BodyDef::dynamic(Vec2::new(200.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    sim.tick(&BTreeMap::new());
    sim.tick(&BTreeMap::new());

    let now = sim.physics().now();
    let movement = sim.character_mut().movement_mut();
    // Same-channel conflict: the walks lose to the stop
    movement.submit_movement_request(MovementRequest::walk(HERO, Vec2::X, 200.0, now).with_priority(Priority::Low));
    movement.submit_movement_request(MovementRequest::walk(HERO, Vec2::NEG_X, 200.0, now));
    movement.submit_movement_request(MovementRequest::stop(HERO, now).with_priority(Priority::Critical));
    // Stale walk next to a fresh jump on the other channel
    movement.submit_movement_request(MovementRequest::walk(SIDEKICK, Vec2::X, 200.0, now - 1.0));
    movement.submit_movement_request(MovementRequest::jump(SIDEKICK, 540.0, now));

    let result = sim.tick(&BTreeMap::new());
    let count = |status| result.responses.iter().filter(|r| r.status == status).count();
    assert_eq!(result.responses.len(), 5);
    assert_eq!(count(ResponseStatus::Rejected), 2);
    assert_eq!(count(ResponseStatus::Expired), 1);

    for response in &result.responses {
        let entity = response.entity();
        assert_eq!(Some(response.actual_position), sim.physics().get_position(entity));
        assert_eq!(Some(response.actual_velocity), sim.physics().get_velocity(entity));
        assert_eq!(response.grounded, sim.physics().is_grounded(entity));
    }
    let expired = result
        .responses
        .iter()
        .find(|r| r.status == ResponseStatus::Expired)
        .unwrap();
    assert!(expired.actual_velocity.y < 0.0, "sidekick is mid-jump");
}

// -----------------------------------------------------------------------
// Respawn
// -----------------------------------------------------------------------

#[test]
fn respawn_clears_accumulation() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut sim = Simulation::new(SimulationConfig::default(), world).unwrap();
    sim.spawn(HERO, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    sim.tick(&BTreeMap::new());

    sim.physics_mut().apply_force(HERO, Vec2::new(5000.0, 0.0)).unwrap();
    sim.physics_mut().set_material(HERO, 3.0, 2.0).unwrap();
    assert!(sim.physics().has_accumulation(HERO));

    sim.respawn(HERO, &RespawnState::spawning(Vec2::new(-200.0, 176.0)))
        .unwrap();
    let state = sim.physics().get_physics_state(HERO).unwrap();
    assert!(!sim.physics().has_accumulation(HERO));
    assert_eq!(state.position, Vec2::new(-200.0, 176.0));
    assert_eq!(state.velocity, Vec2::ZERO);
    assert_eq!(state.accumulated_forces, Vec2::ZERO);
    assert!(state.collisions.is_empty());
    assert!(sim.physics().validate_state_consistency(HERO));
}

#[test]
fn reset_is_idempotent() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut physics = physics_over(world);
    physics
        .register_body(HERO, BodyDef::dynamic(Vec2::new(0.0, 100.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    for _ in 0..30 {
        physics.step();
    }

    let spawn = RespawnState::teleporting(Vec2::new(40.0, 100.0));
    physics.reset_physics_state(HERO, Some(&spawn)).unwrap();
    let once = physics.get_physics_state(HERO).unwrap();
    physics.reset_physics_state(HERO, Some(&spawn)).unwrap();
    let twice = physics.get_physics_state(HERO).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn character_respawn_grants_invulnerability() {
    let mut world = StaticWorld::new();
    floor(&mut world, 200.0, -500.0, 500.0);
    let mut sim = Simulation::new(SimulationConfig::default(), world).unwrap();
    sim.spawn(HERO, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
        .unwrap();
    sim.tick(&BTreeMap::new());

    sim.respawn(HERO, &RespawnState::spawning(Vec2::new(0.0, 176.0)).with_invulnerability(0.5))
        .unwrap();
    let caps = sim.character().get_movement_capabilities(HERO).unwrap();
    assert!(caps.invulnerable);

    for _ in 0..31 {
        sim.tick(&BTreeMap::new());
    }
    let caps = sim.character().get_movement_capabilities(HERO).unwrap();
    assert!(!caps.invulnerable);
}
