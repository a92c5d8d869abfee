//! Physics Coordinator
//!
//! The single authority over position and velocity. Every other layer asks
//! for motion through movement requests and receives authoritative
//! responses; only this module writes `PhysicsState`.
//!
//! # Step pipeline
//!
//! 1. Advance clock and moving platforms
//! 2. Drain the request queue (priority, then timestamp, then sequence);
//!    drop expired requests, apply the rest as velocity intents
//! 3. Integrate every dynamic body, resolve penetration, carry riders
//! 4. Rebuild contacts and grounded state through the notifier
//! 5. Correct accumulation, bump update counters
//! 6. Build responses from the post-step state

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use glam::Vec2;
use tracing::{debug, info, warn};

use crate::config::{CollisionConfig, PhysicsConfig, SimulationConfig};
use crate::core::aabb::{Aabb, Axis, Separation, DOWN, UP};
use crate::core::hash::StateHasher;
use crate::core::time::{Seconds, SimClock};
use crate::physics::body::{Body, BodyDef, PhysicsError};
use crate::physics::events::PhysicsEvent;
use crate::physics::notifier::{CollisionNotification, CollisionNotifier, CONTACT_EPSILON};
use crate::physics::queue::RequestQueue;
use crate::physics::world::{ColliderKind, StaticWorld};
use crate::protocol::contact::CollisionInfo;
use crate::protocol::ids::{ColliderId, EntityId};
use crate::protocol::request::{
    MovementKind, MovementRequest, Priority, CONSTRAINT_HORIZONTAL_ONLY, CONSTRAINT_MAX_SPEED,
};
use crate::protocol::respawn::RespawnState;
use crate::protocol::response::{MovementResponse, ResponseStatus};
use crate::protocol::state::{AccumulationViolation, PhysicsState};

/// Speeds below this count as zero when judging blocked/clipped motion.
const VELOCITY_EPSILON: f32 = 1e-3;

// =============================================================================
// CAPABILITY TRAIT
// =============================================================================

/// Authoritative physics operations.
///
/// Queries return copies; the only position writes are integration and
/// `set_position_override`.
pub trait PhysicsCoordination {
    /// Apply a walk intent now; position changes on the next step.
    fn request_movement(&mut self, entity: EntityId, direction: Vec2, speed: f32) -> MovementResponse;

    /// Jump with upward speed `force` (grounded or coyote time required).
    fn request_jump(&mut self, entity: EntityId, force: f32) -> MovementResponse;

    /// Cancel driven horizontal motion.
    fn request_stop(&mut self, entity: EntityId) -> MovementResponse;

    /// Add an instantaneous velocity change (clamped to `max_impulse`).
    fn request_impulse(&mut self, entity: EntityId, vector: Vec2) -> MovementResponse;

    /// Queue a request for the next step. Immediate rejections are returned.
    fn submit_request(&mut self, request: MovementRequest, rapid: bool) -> Result<(), MovementResponse>;

    /// Run one fixed step; returns responses for everything processed.
    fn step(&mut self) -> Vec<MovementResponse>;

    /// Standing on ground.
    fn is_grounded(&self, entity: EntityId) -> bool;

    /// Current velocity.
    fn get_velocity(&self, entity: EntityId) -> Option<Vec2>;

    /// Current position.
    fn get_position(&self, entity: EntityId) -> Option<Vec2>;

    /// A blocking contact lies below the entity.
    fn has_collision_below(&self, entity: EntityId) -> bool;

    /// Full snapshot.
    fn get_physics_state(&self, entity: EntityId) -> Option<PhysicsState>;

    /// Material name of the ground stood on.
    fn get_current_ground_surface_material(&self, entity: EntityId) -> Option<String>;

    /// Zero motion, clear forces/contacts/materials, optionally relocate.
    /// Calling it twice leaves the same state as calling it once.
    fn reset_physics_state(
        &mut self,
        entity: EntityId,
        respawn: Option<&RespawnState>,
    ) -> Result<(), PhysicsError>;

    /// Narrow correction: zero forces, clamp velocity, restore materials.
    fn clear_accumulated_forces(&mut self, entity: EntityId) -> Result<(), PhysicsError>;

    /// Teleport. Follow with `reset_physics_state`.
    fn set_position_override(&mut self, entity: EntityId, position: Vec2) -> Result<(), PhysicsError>;

    /// Finite, within accumulation limits and in sync with the notifier.
    fn validate_state_consistency(&self, entity: EntityId) -> bool;
}

// =============================================================================
// COORDINATOR
// =============================================================================

#[derive(Debug)]
struct IntentOutcome {
    status: ResponseStatus,
    reason: Option<String>,
}

impl IntentOutcome {
    fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            reason: None,
        }
    }

    fn new(status: ResponseStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: Some(reason.into()),
        }
    }
}

/// Owner of all per-entity physics state.
pub struct PhysicsCoordinator {
    config: PhysicsConfig,
    notifier: CollisionNotifier,
    bodies: BTreeMap<EntityId, Body>,
    queue: RequestQueue,
    /// Outcomes decided outside a step (supersession, removal), answered
    /// with post-step state
    completed: Vec<(MovementRequest, IntentOutcome)>,
    clock: SimClock,
}

impl PhysicsCoordinator {
    /// Create a coordinator over a level.
    pub fn new(config: PhysicsConfig, collision: CollisionConfig, world: StaticWorld) -> Self {
        let clock = SimClock::new(config.fixed_dt);
        Self {
            notifier: CollisionNotifier::new(collision, world),
            config,
            bodies: BTreeMap::new(),
            queue: RequestQueue::new(),
            completed: Vec::new(),
            clock,
        }
    }

    /// Create from the full simulation config.
    pub fn from_config(config: &SimulationConfig, world: StaticWorld) -> Self {
        Self::new(config.physics.clone(), config.collision.clone(), world)
    }

    /// Physics configuration.
    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Collision queries.
    pub fn notifier(&self) -> &CollisionNotifier {
        &self.notifier
    }

    /// Listener registration and level edits.
    pub fn notifier_mut(&mut self) -> &mut CollisionNotifier {
        &mut self.notifier
    }

    /// Steps run so far.
    pub fn tick(&self) -> u64 {
        self.clock.tick()
    }

    /// Simulation time of the current state.
    pub fn now(&self) -> Seconds {
        self.clock.now()
    }

    /// Fixed step length.
    pub fn dt(&self) -> Seconds {
        self.clock.dt()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Create (or recreate) the body for `entity`.
    ///
    /// Re-registering a live id is treated as a pooled slot being reused:
    /// the old state and its queued requests are discarded.
    pub fn register_body(&mut self, entity: EntityId, def: BodyDef) -> Result<(), PhysicsError> {
        def.validate(entity)?;

        if self.bodies.contains_key(&entity) {
            debug!(entity = %entity, "re-registering entity, discarding previous state");
            self.reject_queued(entity, "entity re-registered");
        }

        let body = Body::new(entity, &def, &self.config, self.now());
        self.bodies.insert(entity, body);
        self.notifier.register(entity);
        debug!(entity = %entity, position = ?def.position, "body registered");
        Ok(())
    }

    /// Remove a body. Queued requests for it are rejected.
    pub fn unregister_body(&mut self, entity: EntityId) -> Option<PhysicsState> {
        let body = self.bodies.remove(&entity)?;
        self.notifier.unregister(entity);
        self.reject_queued(entity, "entity removed");
        debug!(entity = %entity, "body unregistered");
        Some(body.state)
    }

    fn reject_queued(&mut self, entity: EntityId, reason: &str) {
        for queued in self.queue.remove_entity(entity) {
            self.completed
                .push((queued.request, IntentOutcome::new(ResponseStatus::Rejected, reason)));
        }
    }

    /// Registered entity ids in order.
    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.bodies.keys().copied()
    }

    /// A body exists for `entity`.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.bodies.contains_key(&entity)
    }

    /// Entity is registered and not static.
    pub fn is_dynamic(&self, entity: EntityId) -> bool {
        self.bodies.get(&entity).is_some_and(|b| !b.state.is_static)
    }

    /// Number of bodies.
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    /// Requests waiting for the next step.
    pub fn queued_requests(&self) -> usize {
        self.queue.len()
    }

    /// Requests waiting for the next step for one entity.
    pub fn queued_for(&self, entity: EntityId) -> usize {
        self.queue.pending_for(entity)
    }

    // =========================================================================
    // Admin operations
    // =========================================================================

    /// Add a persistent force, consumed each step as `F / m`.
    ///
    /// Not corrected immediately; the accumulation pass bounds it before the
    /// next integration.
    pub fn apply_force(&mut self, entity: EntityId, force: Vec2) -> Result<(), PhysicsError> {
        if !force.is_finite() {
            return Err(PhysicsError::NonFinite);
        }
        let now = self.now();
        let body = self.bodies.get_mut(&entity).ok_or(PhysicsError::UnknownEntity(entity))?;
        body.state.accumulated_forces += force;
        body.touch(now);
        Ok(())
    }

    /// Set body friction and restitution.
    ///
    /// Values above the accumulation limits are accepted here and restored
    /// to defaults by the next accumulation pass.
    pub fn set_material(&mut self, entity: EntityId, friction: f32, restitution: f32) -> Result<(), PhysicsError> {
        if !(friction.is_finite() && friction >= 0.0 && restitution.is_finite() && restitution >= 0.0) {
            return Err(PhysicsError::InvalidMaterial { friction, restitution });
        }
        let now = self.now();
        let body = self.bodies.get_mut(&entity).ok_or(PhysicsError::UnknownEntity(entity))?;
        body.state.friction = friction;
        body.state.restitution = restitution;
        body.touch(now);
        Ok(())
    }

    /// True when the entity currently exceeds an accumulation limit.
    pub fn has_accumulation(&self, entity: EntityId) -> bool {
        self.bodies
            .get(&entity)
            .is_some_and(|b| b.state.has_accumulation(&self.config.accumulation))
    }

    /// Contacts the entity would make over the next step at its velocity.
    pub fn predict_collisions(&self, entity: EntityId) -> Vec<CollisionInfo> {
        match self.bodies.get(&entity) {
            Some(body) => self.notifier.predict_collisions(
                entity,
                &body.state.bounds(),
                body.state.velocity,
                self.dt(),
            ),
            None => Vec::new(),
        }
    }

    /// Apply any request immediately (no queueing, no expiry).
    pub fn apply_request(&mut self, request: MovementRequest) -> MovementResponse {
        let started = Instant::now();
        let outcome = self.apply_intent(&request, false);
        log_outcome(&request, &outcome);
        self.respond(request, outcome, started.elapsed())
    }

    /// Deliver queued events to listeners and return them.
    pub fn flush_events(&mut self) -> Vec<PhysicsEvent> {
        self.notifier.flush_events()
    }

    /// Feed all body state into a hasher (entity order).
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.clock.tick());
        for body in self.bodies.values() {
            body.state.hash_into(hasher);
        }
        for collider in self.notifier.world().iter().filter(|c| c.is_moving()) {
            hasher.update_u32(collider.id.0);
            hasher.update_vec2(collider.bounds.center);
        }
    }

    // =========================================================================
    // Intent application
    // =========================================================================

    fn apply_intent(&mut self, request: &MovementRequest, rapid: bool) -> IntentOutcome {
        let entity = request.entity();
        if let Err(err) = request.validate() {
            return IntentOutcome::new(ResponseStatus::Rejected, err.to_string());
        }
        let Some(body) = self.bodies.get(&entity) else {
            return IntentOutcome::new(ResponseStatus::Rejected, format!("unknown entity {entity}"));
        };
        if body.state.is_static {
            return IntentOutcome::new(ResponseStatus::Failed, "entity is static");
        }
        if !body.state.is_finite() {
            warn!(entity = %entity, "non-finite physics state, forcing reset");
            let position = body.state.position;
            let fallback = if position.is_finite() { position } else { Vec2::ZERO };
            self.reset_internal(entity, Some(&RespawnState::emergency_reset(fallback)));
            return IntentOutcome::new(ResponseStatus::Failed, "physics state corrupted; entity reset");
        }
        if rapid || body.state.has_accumulation(&self.config.accumulation) {
            self.correct_accumulation(entity, rapid);
        }

        let dt = self.clock.dt() as f32;
        let outcome = match request.kind() {
            MovementKind::Walk => self.apply_walk(request, dt),
            MovementKind::Jump => self.apply_jump(request, dt),
            MovementKind::Dash => self.apply_dash(request, dt),
            MovementKind::Stop => self.apply_stop(request),
            MovementKind::Impulse => self.apply_impulse(request),
        };

        let now = self.now();
        if let Some(body) = self.bodies.get_mut(&entity) {
            body.touch(now);
        }
        outcome
    }

    fn apply_walk(&mut self, request: &MovementRequest, dt: f32) -> IntentOutcome {
        let cfg = &self.config;
        let world = self.notifier.world();
        let Some(body) = self.bodies.get_mut(&request.entity()) else {
            return IntentOutcome::new(ResponseStatus::Rejected, "unknown entity");
        };
        let s = &mut body.state;

        let cap = request
            .constraint(CONSTRAINT_MAX_SPEED)
            .map_or(cfg.max_walk_speed, |c| c.min(cfg.max_walk_speed))
            .max(0.0);
        let mut speed = request.magnitude();
        let mut capped = None;
        if speed > cap {
            speed = cap;
            capped = Some(format!("speed capped at {cap:.0}"));
        }

        let desired = request.direction() * speed;
        let horizontal_only = s.gravity_enabled
            || request.constraint(CONSTRAINT_HORIZONTAL_ONLY).is_some_and(|v| v != 0.0);

        let (requested, applied) = if horizontal_only {
            let target = Vec2::new(desired.x, s.velocity.y);
            let constrained = constrain_velocity(world, &s.bounds(), target, dt);
            s.velocity.x = constrained.x;
            (Vec2::new(desired.x, 0.0), Vec2::new(constrained.x, 0.0))
        } else {
            let constrained = constrain_velocity(world, &s.bounds(), desired, dt);
            s.velocity = constrained;
            (desired, constrained)
        };
        body.driven = true;

        clip_outcome(requested, applied, capped)
    }

    fn apply_jump(&mut self, request: &MovementRequest, dt: f32) -> IntentOutcome {
        let entity = request.entity();
        if !self.notifier.can_jump(entity) {
            return IntentOutcome::new(ResponseStatus::Blocked, "not grounded");
        }

        let cfg = &self.config;
        let world = self.notifier.world();
        let Some(body) = self.bodies.get_mut(&entity) else {
            return IntentOutcome::new(ResponseStatus::Rejected, "unknown entity");
        };
        let s = &mut body.state;

        let mut force = request.magnitude();
        let mut capped = None;
        if force > cfg.max_velocity {
            force = cfg.max_velocity;
            capped = Some(format!("jump force capped at {force:.0}"));
        }

        let constrained = constrain_velocity(world, &s.bounds(), Vec2::new(0.0, -force), dt);
        if constrained.y.abs() <= VELOCITY_EPSILON {
            return IntentOutcome::new(ResponseStatus::Blocked, "ceiling overhead");
        }
        s.velocity.y = constrained.y;
        let outcome = clip_outcome(Vec2::new(0.0, -force), Vec2::new(0.0, constrained.y), capped);

        self.notifier.mark_jumped(entity);
        outcome
    }

    fn apply_dash(&mut self, request: &MovementRequest, dt: f32) -> IntentOutcome {
        let cfg = &self.config;
        let world = self.notifier.world();
        let Some(body) = self.bodies.get_mut(&request.entity()) else {
            return IntentOutcome::new(ResponseStatus::Rejected, "unknown entity");
        };
        let s = &mut body.state;

        let mut speed = request.magnitude();
        let mut capped = None;
        if speed > cfg.max_dash_speed {
            speed = cfg.max_dash_speed;
            capped = Some(format!("dash speed capped at {speed:.0}"));
        }

        let desired = request.direction() * speed;
        let constrained = constrain_velocity(world, &s.bounds(), desired, dt);
        s.velocity = constrained;
        body.driven = true;

        clip_outcome(desired, constrained, capped)
    }

    fn apply_stop(&mut self, request: &MovementRequest) -> IntentOutcome {
        let Some(body) = self.bodies.get_mut(&request.entity()) else {
            return IntentOutcome::new(ResponseStatus::Rejected, "unknown entity");
        };
        let s = &mut body.state;
        s.velocity.x = 0.0;
        if !s.gravity_enabled {
            s.velocity.y = 0.0;
        }
        body.driven = true;
        IntentOutcome::success()
    }

    fn apply_impulse(&mut self, request: &MovementRequest) -> IntentOutcome {
        let cfg = &self.config;
        let Some(body) = self.bodies.get_mut(&request.entity()) else {
            return IntentOutcome::new(ResponseStatus::Rejected, "unknown entity");
        };
        let s = &mut body.state;

        let mut impulse = request.vector();
        let mut outcome = IntentOutcome::success();
        if impulse.length() > cfg.max_impulse {
            impulse = impulse.clamp_length_max(cfg.max_impulse);
            outcome = IntentOutcome::new(
                ResponseStatus::PartialSuccess,
                format!("impulse clamped to {:.0}", cfg.max_impulse),
            );
        }

        let velocity = s.velocity + impulse;
        s.velocity = velocity.clamp_length_max(cfg.max_velocity);
        if s.velocity != velocity && outcome.status == ResponseStatus::Success {
            outcome = IntentOutcome::new(
                ResponseStatus::PartialSuccess,
                format!("velocity capped at {:.0}", cfg.max_velocity),
            );
        }
        outcome
    }

    // =========================================================================
    // Integration
    // =========================================================================

    fn integrate_all(&mut self, dt: Seconds, platform_deltas: &BTreeMap<ColliderId, Vec2>) {
        let dt = dt as f32;
        let ids: Vec<EntityId> = self.bodies.keys().copied().collect();
        let mut impacts: BTreeMap<EntityId, BTreeMap<ColliderId, f32>> = BTreeMap::new();

        for &id in &ids {
            // Corrupted input never reaches the integrator
            if self.has_accumulation(id) {
                self.correct_accumulation(id, false);
            }
            if let Some(hits) = self.integrate_body(id, dt, platform_deltas) {
                impacts.insert(id, hits);
            }
        }

        let snapshot: Vec<(EntityId, Aabb, Vec2)> = self
            .bodies
            .values()
            .map(|b| (b.state.entity, b.state.bounds(), b.state.velocity))
            .collect();
        let mut entity_contacts = self.notifier.detect_entity_contacts(&snapshot);

        let now = self.now();
        for id in ids {
            let Some(hits) = impacts.remove(&id) else {
                continue;
            };
            let Some(body) = self.bodies.get(&id) else {
                continue;
            };

            let mut contacts =
                self.notifier
                    .detect_static_contacts(id, &body.state.bounds(), body.state.velocity, &hits);
            contacts.extend(entity_contacts.remove(&id).unwrap_or_default());
            self.notifier.update_contacts(id, contacts);

            let collisions = self.notifier.get_collisions_for_entity(id);
            let grounded = self.notifier.is_grounded(id);
            if let Some(body) = self.bodies.get_mut(&id) {
                let s = &mut body.state;
                s.contact_points = collisions.len();
                s.collisions = collisions;
                s.was_grounded = s.grounded;
                s.grounded = grounded;
                body.driven = false;
                body.touch(now);
            }

            self.correct_accumulation(id, false);
        }
    }

    /// Integrate one dynamic body and resolve it against the level.
    /// Returns approach speeds per collider hit, or None for static bodies.
    fn integrate_body(
        &mut self,
        id: EntityId,
        dt: f32,
        platform_deltas: &BTreeMap<ColliderId, Vec2>,
    ) -> Option<BTreeMap<ColliderId, f32>> {
        let ground_collider = self.notifier.ground_collider(id);
        let grounded = self.notifier.is_grounded(id);
        let surface_friction = self
            .notifier
            .get_ground_info(id)
            .and_then(|g| g.surface)
            .map_or(1.0, |s| s.friction);

        let cfg = &self.config;
        let world = self.notifier.world();
        let body = self.bodies.get_mut(&id)?;
        if body.state.is_static {
            return None;
        }
        let driven = body.driven;
        let s = &mut body.state;

        if let Some(delta) = ground_collider.and_then(|c| platform_deltas.get(&c)) {
            s.position += *delta;
        }
        let prev = s.position;

        let mut accel = Vec2::ZERO;
        if s.gravity_enabled {
            accel.y += cfg.gravity * s.gravity_scale;
        }
        accel += s.accumulated_forces / s.mass;
        let accel = accel.clamp_length_max(cfg.max_acceleration);

        if !driven {
            if grounded {
                let mu = (s.friction * surface_friction).max(0.0).sqrt();
                s.velocity.x = move_toward_zero(s.velocity.x, mu * cfg.ground_deceleration * dt);
            } else {
                s.velocity.x *= (1.0 - cfg.air_drag * dt).max(0.0);
            }
        }

        s.position += s.velocity * dt + 0.5 * accel * dt * dt;
        s.velocity += accel * dt;
        s.velocity.y = s.velocity.y.min(cfg.max_fall_speed);
        s.velocity = s.velocity.clamp_length_max(cfg.max_velocity);
        s.acceleration = accel;

        Some(resolve_penetration(world, s, prev, cfg, self.notifier.config()))
    }

    // =========================================================================
    // Accumulation / reset
    // =========================================================================

    /// Clear forces and pull out-of-range values back. With `force` the
    /// clear runs even when no limit is exceeded (rapid input).
    fn correct_accumulation(&mut self, entity: EntityId, force: bool) {
        let tick = self.tick();
        let now = self.now();
        let cfg = &self.config;
        let limits = &cfg.accumulation;
        let Some(body) = self.bodies.get_mut(&entity) else {
            return;
        };

        let violations = body.state.accumulation_violations(limits);
        if violations.is_empty() && !force {
            return;
        }
        if violations.contains(&AccumulationViolation::NonFinite) {
            let position = body.state.position;
            let fallback = if position.is_finite() { position } else { Vec2::ZERO };
            warn!(entity = %entity, "non-finite physics state, forcing reset");
            self.reset_internal(entity, Some(&RespawnState::emergency_reset(fallback)));
            return;
        }

        let s = &mut body.state;
        s.accumulated_forces = Vec2::ZERO;
        s.velocity = s.velocity.clamp_length_max(cfg.max_velocity.min(limits.max_velocity));
        if !(0.0..=limits.max_friction).contains(&s.friction) {
            s.friction = cfg.default_friction;
        }
        if !(0.0..=limits.max_restitution).contains(&s.restitution) {
            s.restitution = cfg.default_restitution;
        }
        s.collisions.truncate(limits.max_contact_points);
        s.contact_points = s.collisions.len();
        body.touch(now);

        if !violations.is_empty() {
            warn!(entity = %entity, ?violations, "accumulation corrected");
            self.notifier
                .push_event(PhysicsEvent::accumulation_corrected(tick, entity, violations));
        }
    }

    /// Reset one body. Returns true when anything changed.
    fn reset_internal(&mut self, entity: EntityId, respawn: Option<&RespawnState>) -> bool {
        let tick = self.tick();
        let now = self.now();
        let cfg = &self.config;
        let Some(body) = self.bodies.get_mut(&entity) else {
            return false;
        };

        let mut next = body.state.clone();
        let reset_accumulation = respawn.map_or(true, |r| r.reset_accumulation);
        next.velocity = respawn.map_or(Vec2::ZERO, |r| r.velocity);
        next.acceleration = Vec2::ZERO;
        next.collisions.clear();
        next.contact_points = 0;
        next.grounded = false;
        next.was_grounded = false;
        if reset_accumulation {
            next.accumulated_forces = Vec2::ZERO;
            next.friction = cfg.default_friction;
            next.restitution = cfg.default_restitution;
        }
        if let Some(r) = respawn {
            next.position = r.position;
        }

        body.driven = false;
        let changed = next != body.state;
        if changed {
            body.state = next;
            body.touch(now);
        }

        self.notifier.reset_entity(entity);
        if changed {
            let tag = respawn.map(|r| r.tag);
            info!(entity = %entity, ?tag, "physics state reset");
            self.notifier.push_event(PhysicsEvent::state_reset(tick, entity, tag));
        }
        changed
    }

    /// Answer a request that never changed state (rejected, expired,
    /// refused) with the body's current state. Unknown entities get an
    /// empty response.
    pub fn respond_unapplied(
        &self,
        request: MovementRequest,
        status: ResponseStatus,
        reason: impl Into<String>,
    ) -> MovementResponse {
        self.respond(request, IntentOutcome::new(status, reason), Duration::ZERO)
    }

    fn respond(&self, request: MovementRequest, outcome: IntentOutcome, took: Duration) -> MovementResponse {
        let entity = request.entity();
        match self.bodies.get(&entity) {
            Some(body) => MovementResponse {
                actual_velocity: body.state.velocity,
                actual_position: body.state.position,
                grounded: self.notifier.is_grounded(entity),
                active_collisions: body.state.active_collision_ids(),
                processing_duration: took,
                reason: outcome.reason,
                status: outcome.status,
                request,
            },
            None => MovementResponse::unprocessed(
                request,
                outcome.status,
                outcome.reason.unwrap_or_else(|| format!("unknown entity {entity}")),
            ),
        }
    }
}

impl PhysicsCoordination for PhysicsCoordinator {
    fn request_movement(&mut self, entity: EntityId, direction: Vec2, speed: f32) -> MovementResponse {
        let request = MovementRequest::walk(entity, direction, speed, self.now());
        self.apply_request(request)
    }

    fn request_jump(&mut self, entity: EntityId, force: f32) -> MovementResponse {
        let request = MovementRequest::jump(entity, force, self.now());
        self.apply_request(request)
    }

    fn request_stop(&mut self, entity: EntityId) -> MovementResponse {
        let request = MovementRequest::stop(entity, self.now());
        self.apply_request(request)
    }

    fn request_impulse(&mut self, entity: EntityId, vector: Vec2) -> MovementResponse {
        let request = MovementRequest::impulse(entity, vector, self.now());
        self.apply_request(request)
    }

    fn submit_request(&mut self, request: MovementRequest, rapid: bool) -> Result<(), MovementResponse> {
        if let Err(err) = request.validate() {
            debug!(entity = %request.entity(), %err, "request rejected");
            return Err(self.respond_unapplied(request, ResponseStatus::Rejected, err.to_string()));
        }
        let entity = request.entity();
        if !self.bodies.contains_key(&entity) {
            debug!(entity = %entity, "request for unknown entity rejected");
            return Err(MovementResponse::unprocessed(
                request,
                ResponseStatus::Rejected,
                format!("unknown entity {entity}"),
            ));
        }

        let cancels = request.priority() == Priority::Critical
            && matches!(request.kind(), MovementKind::Stop | MovementKind::Impulse);
        if cancels {
            let reason = format!("superseded by critical {}", request.kind());
            for queued in self.queue.supersede(entity, Priority::Critical) {
                debug!(entity = %entity, kind = %queued.request.kind(), "queued request superseded");
                self.completed
                    .push((queued.request, IntentOutcome::new(ResponseStatus::Rejected, reason.clone())));
            }
        }

        self.queue.push(request, rapid);
        Ok(())
    }

    fn step(&mut self) -> Vec<MovementResponse> {
        let dt = self.clock.dt();
        let now = self.clock.advance();
        self.notifier.set_time(self.clock.tick(), now);
        let platform_deltas = self.notifier.world_mut().advance(dt);

        let mut processed = Vec::new();
        for queued in self.queue.drain_ordered() {
            let started = Instant::now();
            let request = queued.request;
            if request.is_expired(now, self.config.request_max_age) {
                debug!(
                    entity = %request.entity(),
                    kind = %request.kind(),
                    age_ms = request.age(now) * 1000.0,
                    "request expired"
                );
                let reason = format!("expired after {:.0} ms", request.age(now) * 1000.0);
                processed.push((request, IntentOutcome::new(ResponseStatus::Expired, reason), Duration::ZERO));
                continue;
            }
            let outcome = self.apply_intent(&request, queued.rapid);
            log_outcome(&request, &outcome);
            processed.push((request, outcome, started.elapsed()));
        }

        self.integrate_all(dt, &platform_deltas);

        let mut responses: Vec<MovementResponse> = std::mem::take(&mut self.completed)
            .into_iter()
            .map(|(request, outcome)| self.respond(request, outcome, Duration::ZERO))
            .collect();
        for (request, outcome, took) in processed {
            responses.push(self.respond(request, outcome, took));
        }
        responses
    }

    fn is_grounded(&self, entity: EntityId) -> bool {
        self.notifier.is_grounded(entity)
    }

    fn get_velocity(&self, entity: EntityId) -> Option<Vec2> {
        self.bodies.get(&entity).map(|b| b.state.velocity)
    }

    fn get_position(&self, entity: EntityId) -> Option<Vec2> {
        self.bodies.get(&entity).map(|b| b.state.position)
    }

    fn has_collision_below(&self, entity: EntityId) -> bool {
        self.notifier.has_collision_below(entity)
    }

    fn get_physics_state(&self, entity: EntityId) -> Option<PhysicsState> {
        self.bodies.get(&entity).map(|b| b.state.clone())
    }

    fn get_current_ground_surface_material(&self, entity: EntityId) -> Option<String> {
        self.notifier
            .get_ground_info(entity)
            .filter(|g| g.grounded)
            .and_then(|g| g.surface)
            .map(|s| s.material)
    }

    fn reset_physics_state(
        &mut self,
        entity: EntityId,
        respawn: Option<&RespawnState>,
    ) -> Result<(), PhysicsError> {
        if !self.bodies.contains_key(&entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        if respawn.is_some_and(|r| !r.is_valid()) {
            return Err(PhysicsError::NonFinite);
        }
        self.reset_internal(entity, respawn);
        Ok(())
    }

    fn clear_accumulated_forces(&mut self, entity: EntityId) -> Result<(), PhysicsError> {
        if !self.bodies.contains_key(&entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        self.correct_accumulation(entity, true);
        Ok(())
    }

    fn set_position_override(&mut self, entity: EntityId, position: Vec2) -> Result<(), PhysicsError> {
        if !position.is_finite() {
            return Err(PhysicsError::NonFinite);
        }
        let now = self.now();
        let body = self.bodies.get_mut(&entity).ok_or(PhysicsError::UnknownEntity(entity))?;
        body.state.position = position;
        body.touch(now);
        debug!(entity = %entity, ?position, "position override");
        Ok(())
    }

    fn validate_state_consistency(&self, entity: EntityId) -> bool {
        let Some(body) = self.bodies.get(&entity) else {
            return false;
        };
        let s = &body.state;
        s.is_finite()
            && s.mass > 0.0
            && s.bounds().is_valid()
            && !s.has_accumulation(&self.config.accumulation)
            && s.contact_points == s.collisions.len()
            && s.grounded == self.notifier.is_grounded(entity)
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn log_outcome(request: &MovementRequest, outcome: &IntentOutcome) {
    match outcome.status {
        ResponseStatus::Success | ResponseStatus::PartialSuccess => {}
        ResponseStatus::Failed => warn!(
            entity = %request.entity(),
            kind = %request.kind(),
            reason = outcome.reason.as_deref().unwrap_or(""),
            "movement request failed"
        ),
        status => debug!(
            entity = %request.entity(),
            kind = %request.kind(),
            %status,
            reason = outcome.reason.as_deref().unwrap_or(""),
            "movement request not applied"
        ),
    }
}

/// Judge a velocity intent by how much of it survived the constraints.
fn clip_outcome(requested: Vec2, applied: Vec2, capped: Option<String>) -> IntentOutcome {
    let want = requested.length();
    let got = applied.length();
    if want > VELOCITY_EPSILON && got <= VELOCITY_EPSILON {
        IntentOutcome::new(ResponseStatus::Blocked, "movement blocked by collision")
    } else if got + VELOCITY_EPSILON < want {
        IntentOutcome::new(
            ResponseStatus::PartialSuccess,
            format!("clipped by collision to {got:.1} of {want:.1}"),
        )
    } else if let Some(reason) = capped {
        IntentOutcome::new(ResponseStatus::PartialSuccess, reason)
    } else {
        IntentOutcome::success()
    }
}

#[inline]
fn move_toward_zero(value: f32, amount: f32) -> f32 {
    if value > 0.0 {
        (value - amount).max(0.0)
    } else {
        (value + amount).min(0.0)
    }
}

/// Clip a velocity so one step of it cannot enter blocking geometry.
///
/// Swept per axis, X first. Only geometry already aligned with the box on
/// the other axis can block; resting contacts never clip sideways motion.
pub(crate) fn constrain_velocity(world: &StaticWorld, bounds: &Aabb, velocity: Vec2, dt: f32) -> Vec2 {
    if dt <= 0.0 {
        return velocity;
    }
    let mut v = velocity;

    if v.x != 0.0 {
        let travel = v.x * dt;
        let mut allowed = travel.abs();
        for c in world.iter().filter(|c| c.kind == ColliderKind::Solid) {
            if bounds.overlap(&c.bounds).y <= CONTACT_EPSILON {
                continue;
            }
            let gap = if travel > 0.0 {
                c.bounds.min().x - bounds.max().x
            } else {
                bounds.min().x - c.bounds.max().x
            };
            if gap >= -CONTACT_EPSILON {
                allowed = allowed.min(gap.max(0.0));
            }
        }
        v.x = travel.signum() * allowed / dt;
    }

    if v.y != 0.0 {
        let moved = bounds.translated(Vec2::new(v.x * dt, 0.0));
        let travel = v.y * dt;
        let mut allowed = travel.abs();
        for c in world.iter() {
            let blocks = match c.kind {
                ColliderKind::Solid => true,
                ColliderKind::OneWay => travel > 0.0,
                ColliderKind::Sensor(_) => false,
            };
            if !blocks || moved.overlap(&c.bounds).x <= CONTACT_EPSILON {
                continue;
            }
            let gap = if travel > 0.0 {
                c.bounds.top() - moved.bottom()
            } else {
                moved.top() - c.bounds.bottom()
            };
            if gap >= -CONTACT_EPSILON {
                allowed = allowed.min(gap.max(0.0));
            }
        }
        v.y = travel.signum() * allowed / dt;
    }
    v
}

/// Push a body out of blocking geometry. Returns approach speed per collider.
///
/// When last step's position shows which side the body came from, that
/// face is used so tile seams never snag; otherwise the axis of least
/// overlap.
fn resolve_penetration(
    world: &StaticWorld,
    s: &mut PhysicsState,
    prev: Vec2,
    cfg: &PhysicsConfig,
    collision: &CollisionConfig,
) -> BTreeMap<ColliderId, f32> {
    let mut impacts = BTreeMap::new();

    for _ in 0..collision.max_resolution_iterations.max(1) {
        let mut moved = false;
        for collider in world.iter() {
            let bounds = s.bounds();
            let o = bounds.overlap(&collider.bounds);
            if o.x <= CONTACT_EPSILON || o.y <= CONTACT_EPSILON {
                continue;
            }
            let prev_box = bounds.at(prev);

            let separation = match collider.kind {
                ColliderKind::Sensor(_) => continue,
                ColliderKind::OneWay => {
                    let was_above = prev_box.bottom() <= collider.bounds.top() + collision.contact_skin;
                    if !was_above || s.velocity.y < 0.0 {
                        continue;
                    }
                    Separation {
                        normal: UP,
                        depth: bounds.bottom() - collider.bounds.top(),
                        axis: Axis::Y,
                    }
                }
                ColliderKind::Solid => match hinted_separation(&bounds, &prev_box, &collider.bounds) {
                    Some(sep) => sep,
                    None => continue,
                },
            };

            s.position += separation.vector();
            let vn = s.velocity.dot(separation.normal);
            if vn < 0.0 {
                impacts.insert(collider.id, -vn);
                let restitution = s.restitution.max(collider.surface.restitution);
                if restitution > 0.0 && -vn > cfg.bounce_threshold {
                    s.velocity -= (1.0 + restitution) * vn * separation.normal;
                } else {
                    s.velocity -= vn * separation.normal;
                }
            }
            moved = true;
        }
        if !moved {
            break;
        }
    }
    impacts
}

fn hinted_separation(bounds: &Aabb, prev_box: &Aabb, other: &Aabb) -> Option<Separation> {
    let po = prev_box.overlap(other);
    // Came from above or below: vertical, even at corners
    if po.y <= CONTACT_EPSILON {
        let (normal, depth) = if prev_box.center.y < other.center.y {
            (UP, bounds.bottom() - other.top())
        } else {
            (DOWN, other.bottom() - bounds.top())
        };
        return Some(Separation { normal, depth, axis: Axis::Y });
    }
    if po.x <= CONTACT_EPSILON {
        let (normal, depth) = if prev_box.center.x < other.center.x {
            (Vec2::NEG_X, bounds.max().x - other.min().x)
        } else {
            (Vec2::X, other.max().x - bounds.min().x)
        };
        return Some(Separation { normal, depth, axis: Axis::X });
    }
    bounds.mtv(other)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::contact::SurfaceDescriptor;

    const E: EntityId = EntityId(1);
    const HALF: Vec2 = Vec2::new(16.0, 24.0);

    /// Floor top at y = 200 spanning x in [-1000, 1000].
    fn floor_world() -> StaticWorld {
        let mut world = StaticWorld::new();
        world.add_solid(
            Aabb::from_min_max(Vec2::new(-1000.0, 200.0), Vec2::new(1000.0, 260.0)),
            SurfaceDescriptor::stone(),
        );
        world
    }

    fn coordinator(world: StaticWorld) -> PhysicsCoordinator {
        PhysicsCoordinator::new(PhysicsConfig::default(), CollisionConfig::default(), world)
    }

    /// Body resting on the floor after a couple of settling steps.
    fn grounded() -> PhysicsCoordinator {
        let mut physics = coordinator(floor_world());
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(0.0, 176.0), HALF))
            .unwrap();
        physics.step();
        physics.step();
        assert!(physics.is_grounded(E));
        physics
    }

    #[test]
    fn test_unknown_entity_rejected() {
        let mut physics = coordinator(StaticWorld::new());
        let resp = physics.request_movement(EntityId(9), Vec2::X, 100.0);
        assert_eq!(resp.status, ResponseStatus::Rejected);
        assert!(resp.reason.is_some());
    }

    #[test]
    fn test_register_rejects_bad_definitions() {
        let mut physics = coordinator(StaticWorld::new());
        assert_eq!(
            physics.register_body(E, BodyDef::dynamic(Vec2::ZERO, HALF).with_mass(-1.0)),
            Err(PhysicsError::InvalidMass(-1.0))
        );
        assert!(!physics.contains(E));
    }

    #[test]
    fn test_gravity_and_landing() {
        let mut physics = coordinator(floor_world());
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(0.0, 100.0), HALF))
            .unwrap();

        physics.step();
        let v = physics.get_velocity(E).unwrap();
        assert!(v.y > 0.0, "falls along +Y");

        for _ in 0..120 {
            physics.step();
        }
        let pos = physics.get_position(E).unwrap();
        assert!((pos.y - 176.0).abs() < 0.01, "rests on floor, got {}", pos.y);
        assert!(physics.is_grounded(E));
        assert!(physics.has_collision_below(E));
        assert_eq!(physics.get_velocity(E).unwrap().y, 0.0);
        assert_eq!(
            physics.get_current_ground_surface_material(E).as_deref(),
            Some("stone")
        );
    }

    #[test]
    fn test_walk_sets_velocity_without_moving() {
        let mut physics = grounded();
        let before = physics.get_position(E).unwrap();
        let resp = physics.request_movement(E, Vec2::X, 200.0);
        assert_eq!(resp.status, ResponseStatus::Success);
        assert_eq!(resp.actual_velocity.x, 200.0);
        assert_eq!(resp.actual_position, before);
        assert_eq!(physics.get_position(E), Some(resp.actual_position));

        physics.step();
        let after = physics.get_position(E).unwrap();
        assert!((after.x - before.x - 200.0 / 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_walk_speed_capped() {
        let mut physics = grounded();
        let resp = physics.request_movement(E, Vec2::X, 5000.0);
        assert_eq!(resp.status, ResponseStatus::PartialSuccess);
        assert_eq!(resp.actual_velocity.x, physics.config().max_walk_speed);
    }

    #[test]
    fn test_friction_stops_undriven_body() {
        let mut physics = grounded();
        physics.request_movement(E, Vec2::X, 200.0);
        for _ in 0..60 {
            physics.step();
        }
        assert_eq!(physics.get_velocity(E).unwrap().x, 0.0);
    }

    #[test]
    fn test_jump_requires_ground() {
        let mut physics = coordinator(StaticWorld::new());
        physics.register_body(E, BodyDef::dynamic(Vec2::ZERO, HALF)).unwrap();
        let resp = physics.request_jump(E, 540.0);
        assert_eq!(resp.status, ResponseStatus::Blocked);
        assert_eq!(resp.reason.as_deref(), Some("not grounded"));
    }

    #[test]
    fn test_jump_blocked_by_flush_ceiling() {
        let mut world = floor_world();
        // Ceiling bottom touching the body's top (y = 152)
        world.add_solid(
            Aabb::from_min_max(Vec2::new(-100.0, 100.0), Vec2::new(100.0, 152.0)),
            SurfaceDescriptor::stone(),
        );
        let mut physics = coordinator(world);
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(0.0, 176.0), HALF))
            .unwrap();
        physics.step();
        assert!(physics.is_grounded(E));

        let resp = physics.request_jump(E, 540.0);
        assert_eq!(resp.status, ResponseStatus::Blocked);
        assert_eq!(resp.reason.as_deref(), Some("ceiling overhead"));
        // Still allowed to jump once the ceiling is gone
        assert!(physics.notifier().can_jump(E));
    }

    #[test]
    fn test_impulse_clamped() {
        let mut physics = coordinator(StaticWorld::new());
        physics.register_body(E, BodyDef::dynamic(Vec2::ZERO, HALF)).unwrap();
        let resp = physics.request_impulse(E, Vec2::new(0.0, -9000.0));
        assert_eq!(resp.status, ResponseStatus::PartialSuccess);
        assert!((resp.actual_velocity.length() - physics.config().max_impulse).abs() < 1e-3);
    }

    #[test]
    fn test_stop_zeroes_horizontal() {
        let mut physics = grounded();
        physics.request_movement(E, Vec2::NEG_X, 150.0);
        let resp = physics.request_stop(E);
        assert_eq!(resp.status, ResponseStatus::Success);
        assert_eq!(resp.actual_velocity.x, 0.0);
    }

    #[test]
    fn test_static_body_fails() {
        let mut physics = coordinator(StaticWorld::new());
        physics.register_body(E, BodyDef::fixed(Vec2::ZERO, HALF)).unwrap();
        let resp = physics.request_movement(E, Vec2::X, 100.0);
        assert_eq!(resp.status, ResponseStatus::Failed);
        physics.step();
        assert_eq!(physics.get_position(E), Some(Vec2::ZERO));
    }

    #[test]
    fn test_queue_expiry() {
        let mut physics = coordinator(StaticWorld::new());
        physics.register_body(E, BodyDef::dynamic(Vec2::ZERO, HALF)).unwrap();
        for _ in 0..12 {
            physics.step();
        }
        // Created 0.2 s ago
        let old = MovementRequest::walk(E, Vec2::X, 100.0, physics.now() - 0.2);
        physics.submit_request(old, false).unwrap();
        let responses = physics.step();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, ResponseStatus::Expired);
        assert!(responses[0].reason.as_deref().unwrap().starts_with("expired"));
    }

    #[test]
    fn test_critical_stop_supersedes_queued() {
        let mut physics = grounded();
        let now = physics.now();
        physics
            .submit_request(MovementRequest::walk(E, Vec2::X, 200.0, now).with_priority(Priority::Low), false)
            .unwrap();
        physics
            .submit_request(MovementRequest::stop(E, now).with_priority(Priority::Critical), false)
            .unwrap();

        let responses = physics.step();
        assert_eq!(responses.len(), 2);
        let walk = responses.iter().find(|r| r.request.kind() == MovementKind::Walk).unwrap();
        assert_eq!(walk.status, ResponseStatus::Rejected);
        assert!(walk.reason.as_deref().unwrap().contains("superseded"));
        assert_eq!(physics.get_velocity(E).unwrap().x, 0.0);
    }

    #[test]
    fn test_submit_rejects_invalid_immediately() {
        let mut physics = grounded();
        let bad = MovementRequest::walk(E, Vec2::ZERO, 100.0, physics.now());
        let resp = physics.submit_request(bad, false).unwrap_err();
        assert_eq!(resp.status, ResponseStatus::Rejected);
        assert_eq!(physics.queued_requests(), 0);
    }

    #[test]
    fn test_accumulated_force_corrected_before_integration() {
        let mut physics = grounded();
        physics.apply_force(E, Vec2::new(5000.0, 0.0)).unwrap();
        assert!(physics.has_accumulation(E));
        assert!(!physics.validate_state_consistency(E));

        physics.step();
        let state = physics.get_physics_state(E).unwrap();
        assert_eq!(state.accumulated_forces, Vec2::ZERO);
        assert!(!physics.has_accumulation(E));
        assert!(physics.validate_state_consistency(E));

        let events = physics.flush_events();
        assert!(events
            .iter()
            .any(|e| matches!(e.data, crate::physics::events::PhysicsEventData::AccumulationCorrected { .. })));
    }

    #[test]
    fn test_out_of_range_material_restored() {
        let mut physics = grounded();
        physics.set_material(E, 0.9, 1.5).unwrap();
        assert!(physics.has_accumulation(E));
        physics.clear_accumulated_forces(E).unwrap();
        let state = physics.get_physics_state(E).unwrap();
        assert_eq!(state.friction, physics.config().default_friction);
        assert_eq!(state.restitution, physics.config().default_restitution);
        assert!(matches!(
            physics.set_material(E, -1.0, 0.0),
            Err(PhysicsError::InvalidMaterial { .. })
        ));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut physics = grounded();
        physics.request_movement(E, Vec2::X, 200.0);
        physics.apply_force(E, Vec2::new(10.0, 0.0)).unwrap();
        physics.step();

        physics.reset_physics_state(E, None).unwrap();
        let first = physics.get_physics_state(E).unwrap();
        physics.reset_physics_state(E, None).unwrap();
        let second = physics.get_physics_state(E).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.velocity, Vec2::ZERO);
        assert_eq!(first.acceleration, Vec2::ZERO);
        assert_eq!(first.contact_points, 0);
        assert!(!physics.is_grounded(E));
    }

    #[test]
    fn test_position_override_then_reset() {
        let mut physics = grounded();
        physics.request_movement(E, Vec2::X, 200.0);
        physics.set_position_override(E, Vec2::new(500.0, 0.0)).unwrap();
        physics.reset_physics_state(E, None).unwrap();
        assert_eq!(physics.get_position(E), Some(Vec2::new(500.0, 0.0)));
        assert_eq!(physics.get_velocity(E), Some(Vec2::ZERO));
        assert_eq!(
            physics.set_position_override(E, Vec2::new(f32::NAN, 0.0)),
            Err(PhysicsError::NonFinite)
        );
        assert_eq!(
            physics.set_position_override(EntityId(42), Vec2::ZERO),
            Err(PhysicsError::UnknownEntity(EntityId(42)))
        );
    }

    #[test]
    fn test_update_counter_monotonic() {
        let mut physics = grounded();
        let mut last = physics.get_physics_state(E).unwrap().update_counter;
        for _ in 0..5 {
            physics.request_movement(E, Vec2::X, 100.0);
            physics.step();
            let counter = physics.get_physics_state(E).unwrap().update_counter;
            assert!(counter > last);
            last = counter;
        }
    }

    #[test]
    fn test_one_way_platform_pass_through_from_below() {
        let mut world = floor_world();
        world.add_one_way(
            Aabb::from_min_max(Vec2::new(-100.0, 100.0), Vec2::new(100.0, 108.0)),
            SurfaceDescriptor::one_way(),
        );
        let mut physics = coordinator(world);
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(0.0, 176.0), HALF))
            .unwrap();
        physics.step();
        physics.request_jump(E, 700.0);

        let mut landed_on_platform = false;
        for _ in 0..90 {
            physics.step();
            let pos = physics.get_position(E).unwrap();
            if physics.is_grounded(E) && (pos.y - 76.0).abs() < 0.01 {
                landed_on_platform = true;
                break;
            }
        }
        assert!(landed_on_platform, "jumped through and landed on top");
        assert!(physics
            .get_physics_state(E)
            .unwrap()
            .collisions
            .iter()
            .any(|c| c.collision_type == crate::protocol::contact::CollisionType::Platform));
    }

    #[test]
    fn test_seam_between_tiles_does_not_snag() {
        let mut world = StaticWorld::new();
        for i in 0..10 {
            let x = i as f32 * 32.0;
            world.add_solid(
                Aabb::from_min_max(Vec2::new(x, 200.0), Vec2::new(x + 32.0, 232.0)),
                SurfaceDescriptor::stone(),
            );
        }
        let mut physics = coordinator(world);
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(40.0, 176.0), HALF))
            .unwrap();
        physics.step();

        for _ in 0..40 {
            physics.request_movement(E, Vec2::X, 200.0);
            physics.step();
        }
        let pos = physics.get_position(E).unwrap();
        assert!(pos.x > 40.0 + 200.0 * 39.0 / 60.0, "kept moving, got {}", pos.x);
        assert!((pos.y - 176.0).abs() < 0.01);
    }

    #[test]
    fn test_bouncy_surface_reflects() {
        let mut world = StaticWorld::new();
        world.add_solid(
            Aabb::from_min_max(Vec2::new(-500.0, 200.0), Vec2::new(500.0, 240.0)),
            SurfaceDescriptor::bouncy(),
        );
        let mut physics = coordinator(world);
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(0.0, 100.0), HALF).with_velocity(Vec2::new(0.0, 600.0)))
            .unwrap();

        let mut bounced = false;
        for _ in 0..30 {
            physics.step();
            if physics.get_velocity(E).unwrap().y < -100.0 {
                bounced = true;
                break;
            }
        }
        assert!(bounced);
    }

    #[test]
    fn test_moving_platform_carries_rider() {
        let mut world = StaticWorld::new();
        world.add_moving_platform(
            Vec2::new(64.0, 8.0),
            Vec2::new(0.0, 208.0),
            Vec2::new(400.0, 208.0),
            60.0,
            SurfaceDescriptor::stone(),
        );
        let mut physics = coordinator(world);
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(0.0, 176.0), HALF))
            .unwrap();
        for _ in 0..3 {
            physics.step();
        }
        assert!(physics.is_grounded(E));
        let start = physics.get_position(E).unwrap().x;
        for _ in 0..60 {
            physics.step();
        }
        let moved = physics.get_position(E).unwrap().x - start;
        assert!((moved - 60.0).abs() < 1.5, "carried about 60 px, got {moved}");
        let ground = physics.notifier().get_ground_info(E).unwrap();
        assert!(!ground.platform_stable);
    }

    #[test]
    fn test_unregister_rejects_queued() {
        let mut physics = grounded();
        let now = physics.now();
        physics
            .submit_request(MovementRequest::walk(E, Vec2::X, 100.0, now), false)
            .unwrap();
        let state = physics.unregister_body(E).unwrap();
        assert_eq!(state.entity, E);
        let responses = physics.step();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, ResponseStatus::Rejected);
        assert_eq!(responses[0].reason.as_deref(), Some("entity removed"));
        assert_eq!(responses[0].actual_position, Vec2::ZERO);
    }

    #[test]
    fn test_expired_response_reports_live_state() {
        let mut physics = grounded();
        let stale = physics.now() - 1.0;
        physics
            .submit_request(MovementRequest::walk(E, Vec2::X, 100.0, stale), false)
            .unwrap();
        let responses = physics.step();
        assert_eq!(responses.len(), 1);
        let expired = &responses[0];
        assert_eq!(expired.status, ResponseStatus::Expired);
        assert_eq!(Some(expired.actual_position), physics.get_position(E));
        assert_eq!(Some(expired.actual_velocity), physics.get_velocity(E));
        assert_eq!(expired.grounded, physics.is_grounded(E));
        assert!((expired.actual_position.y - 176.0).abs() < 1e-3);
    }

    #[test]
    fn test_superseded_response_reports_live_state() {
        let mut physics = grounded();
        let now = physics.now();
        physics
            .submit_request(MovementRequest::walk(E, Vec2::X, 100.0, now).with_priority(Priority::Low), false)
            .unwrap();
        physics
            .submit_request(MovementRequest::stop(E, now).with_priority(Priority::Critical), false)
            .unwrap();
        let responses = physics.step();
        assert_eq!(responses.len(), 2);
        for response in &responses {
            assert_eq!(Some(response.actual_position), physics.get_position(E));
            assert_eq!(response.grounded, physics.is_grounded(E));
        }
        assert!(responses.iter().any(|r| r.status == ResponseStatus::Rejected));
    }

    #[test]
    fn test_reregister_rejection_reports_new_body() {
        let mut physics = grounded();
        let now = physics.now();
        physics
            .submit_request(MovementRequest::walk(E, Vec2::X, 100.0, now), false)
            .unwrap();
        physics
            .register_body(E, BodyDef::dynamic(Vec2::new(-50.0, 176.0), HALF))
            .unwrap();
        let responses = physics.step();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, ResponseStatus::Rejected);
        assert_eq!(Some(responses[0].actual_position), physics.get_position(E));
        assert!((responses[0].actual_position.x + 50.0).abs() < 1e-3);
    }

    #[test]
    fn test_constrain_velocity_against_wall() {
        let mut world = StaticWorld::new();
        world.add_solid(
            Aabb::from_min_max(Vec2::new(150.0, 0.0), Vec2::new(200.0, 200.0)),
            SurfaceDescriptor::stone(),
        );
        let body = Aabb::new(Vec2::new(100.0, 100.0), Vec2::new(48.0, 24.0));
        let v = constrain_velocity(&world, &body, Vec2::new(200.0, 0.0), 1.0 / 60.0);
        assert!((v.x - 120.0).abs() < 1e-2);
        // Moving away is unaffected
        let v = constrain_velocity(&world, &body, Vec2::new(-200.0, 0.0), 1.0 / 60.0);
        assert_eq!(v.x, -200.0);
    }
}
