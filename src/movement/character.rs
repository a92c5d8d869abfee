//! Character Physics Coordinator
//!
//! Gameplay abilities layered on the movement pipeline: variable-height
//! jumps, dashes gated by cooldown and energy, respawn handling and
//! invulnerability windows. Owns the movement coordinator, which owns the
//! physics coordinator.

use std::collections::BTreeMap;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{CharacterConfig, SimulationConfig};
use crate::core::hash::StateHasher;
use crate::core::time::{Seconds, TIME_EPSILON};
use crate::movement::coordinator::{MovementCoordinator, MovementHandler};
use crate::physics::body::{BodyDef, PhysicsError};
use crate::physics::coordinator::{PhysicsCoordination, PhysicsCoordinator};
use crate::physics::notifier::CollisionNotification;
use crate::physics::world::StaticWorld;
use crate::protocol::ids::{EntityId, RequestId};
use crate::protocol::request::{MovementKind, MovementRequest, Priority};
use crate::protocol::respawn::RespawnState;
use crate::protocol::response::{MovementResponse, ResponseStatus};

/// Ability bookkeeping for one character.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// Current energy
    pub energy: f32,
    /// Seconds until the next dash is allowed
    pub dash_cooldown: Seconds,
    /// Seconds left in the active dash (0 when not dashing)
    pub dash_remaining: Seconds,
    /// Direction of the active dash
    pub dash_direction: Vec2,
    /// A queued dash is waiting for its response
    pub dash_pending: bool,
    /// Rising from a jump that can still be cut short
    pub jumping: bool,
    /// Last horizontal facing (-1 or 1)
    pub facing: f32,
    /// Seconds of damage immunity left
    pub invulnerable_remaining: Seconds,
}

impl CharacterState {
    fn new(config: &CharacterConfig) -> Self {
        Self {
            energy: config.max_energy,
            dash_cooldown: 0.0,
            dash_remaining: 0.0,
            dash_direction: Vec2::X,
            dash_pending: false,
            jumping: false,
            facing: 1.0,
            invulnerable_remaining: 0.0,
        }
    }

    /// A dash is in progress.
    #[inline]
    pub fn is_dashing(&self) -> bool {
        self.dash_remaining > 0.0
    }

    /// Damage should be ignored.
    #[inline]
    pub fn is_invulnerable(&self) -> bool {
        self.invulnerable_remaining > 0.0
    }
}

/// Snapshot of what a character can do right now.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MovementCapabilities {
    /// Jump would be accepted
    pub can_jump: bool,
    /// Dash would be accepted
    pub can_dash: bool,
    /// Standing on ground
    pub grounded: bool,
    /// Dash in progress
    pub is_dashing: bool,
    /// Seconds until dash is off cooldown
    pub dash_cooldown_remaining: Seconds,
    /// Coyote time left
    pub coyote_time_remaining: Seconds,
    /// Current energy
    pub energy: f32,
    /// Energy pool size
    pub max_energy: f32,
    /// Damage immunity active
    pub invulnerable: bool,
}

/// Character-level ability operations.
pub trait CharacterPhysics {
    /// Jump immediately. Force scales with `hold_duration` between
    /// `min_jump_ratio * jump_force` and `jump_force`.
    fn request_jump(&mut self, entity: EntityId, hold_duration: Seconds) -> MovementResponse;

    /// Cut a rising jump down to the minimum height.
    fn release_jump(&mut self, entity: EntityId) -> Option<MovementResponse>;

    /// Dash immediately along `direction` (normalized; zero uses facing).
    fn request_dash(&mut self, entity: EntityId, direction: Vec2) -> MovementResponse;

    /// Jump would be accepted now.
    fn can_perform_jump(&self, entity: EntityId) -> bool;

    /// Dash would be accepted now.
    fn can_perform_dash(&self, entity: EntityId) -> bool;

    /// Ability snapshot.
    fn get_movement_capabilities(&self, entity: EntityId) -> Option<MovementCapabilities>;

    /// Death, teleport or emergency reset.
    fn respawn(&mut self, entity: EntityId, respawn: &RespawnState) -> Result<(), PhysicsError>;
}

/// Top of the coordinator stack.
pub struct CharacterPhysicsCoordinator {
    config: CharacterConfig,
    movement: MovementCoordinator,
    characters: BTreeMap<EntityId, CharacterState>,
}

impl CharacterPhysicsCoordinator {
    /// Wrap a movement coordinator.
    pub fn new(config: CharacterConfig, movement: MovementCoordinator) -> Self {
        Self {
            config,
            movement,
            characters: BTreeMap::new(),
        }
    }

    /// Build the whole stack over a level.
    pub fn from_config(config: &SimulationConfig, world: StaticWorld) -> Self {
        let physics = PhysicsCoordinator::from_config(config, world);
        let movement = MovementCoordinator::new(config.movement.clone(), physics);
        Self::new(config.character.clone(), movement)
    }

    /// Character configuration.
    pub fn config(&self) -> &CharacterConfig {
        &self.config
    }

    /// Movement intake.
    pub fn movement(&self) -> &MovementCoordinator {
        &self.movement
    }

    /// Movement intake (submissions).
    pub fn movement_mut(&mut self) -> &mut MovementCoordinator {
        &mut self.movement
    }

    /// Physics authority.
    pub fn physics(&self) -> &PhysicsCoordinator {
        self.movement.physics()
    }

    /// Physics authority (mutable).
    pub fn physics_mut(&mut self) -> &mut PhysicsCoordinator {
        self.movement.physics_mut()
    }

    /// Register a body with character abilities.
    pub fn register_character(&mut self, entity: EntityId, def: BodyDef) -> Result<(), PhysicsError> {
        self.physics_mut().register_body(entity, def)?;
        self.characters.insert(entity, CharacterState::new(&self.config));
        debug!(entity = %entity, "character registered");
        Ok(())
    }

    /// Remove a character and its body.
    pub fn unregister_character(&mut self, entity: EntityId) -> Option<CharacterState> {
        self.movement.clear_input_buffer(entity);
        self.physics_mut().unregister_body(entity);
        self.characters.remove(&entity)
    }

    /// Ability state of a character.
    pub fn character_state(&self, entity: EntityId) -> Option<&CharacterState> {
        self.characters.get(&entity)
    }

    /// Registered characters in id order.
    pub fn characters(&self) -> impl Iterator<Item = (EntityId, &CharacterState)> + '_ {
        self.characters.iter().map(|(id, state)| (*id, state))
    }

    /// Jump force for a given hold duration.
    pub fn jump_force_for_hold(&self, hold_duration: Seconds) -> f32 {
        let c = &self.config;
        let t = if c.max_jump_hold > 0.0 {
            (hold_duration / c.max_jump_hold).clamp(0.0, 1.0) as f32
        } else {
            1.0
        };
        c.jump_force * (c.min_jump_ratio + (1.0 - c.min_jump_ratio) * t)
    }

    /// Queue a jump for the next tick.
    pub fn submit_jump(&mut self, entity: EntityId, hold_duration: Seconds) -> RequestId {
        let force = self.jump_force_for_hold(hold_duration);
        let request = MovementRequest::jump(entity, force, self.movement.now());
        self.movement.submit_movement_request(request)
    }

    /// Queue a dash for the next tick. Ability bookkeeping happens when the
    /// response arrives. Returns None when the dash is not allowed.
    pub fn submit_dash(&mut self, entity: EntityId, direction: Vec2) -> Option<RequestId> {
        if self.dash_denial(entity).is_some() {
            return None;
        }
        let direction = self.dash_direction(entity, direction);
        let request = MovementRequest::dash(entity, direction, self.config.dash_speed, self.movement.now())
            .with_priority(Priority::High);
        let id = self.movement.submit_movement_request(request);
        if let Some(state) = self.characters.get_mut(&entity) {
            state.dash_pending = true;
            state.dash_direction = direction;
        }
        Some(id)
    }

    /// Why a dash would be refused, if it would be.
    fn dash_denial(&self, entity: EntityId) -> Option<&'static str> {
        let Some(state) = self.characters.get(&entity) else {
            return Some("unknown character");
        };
        if state.is_dashing() || state.dash_pending {
            Some("already dashing")
        } else if state.dash_cooldown > TIME_EPSILON {
            Some("dash on cooldown")
        } else if state.energy + f32::EPSILON < self.config.dash_energy_cost {
            Some("insufficient energy")
        } else if !self.physics().is_dynamic(entity) {
            Some("entity cannot move")
        } else {
            None
        }
    }

    fn dash_direction(&self, entity: EntityId, direction: Vec2) -> Vec2 {
        let normalized = direction.normalize_or_zero();
        if normalized != Vec2::ZERO {
            return normalized;
        }
        let facing = self.characters.get(&entity).map_or(1.0, |s| s.facing);
        Vec2::new(facing, 0.0)
    }

    fn start_dash(&mut self, entity: EntityId, direction: Vec2) {
        let c = &self.config;
        if let Some(state) = self.characters.get_mut(&entity) {
            state.energy = (state.energy - c.dash_energy_cost).max(0.0);
            state.dash_cooldown = c.dash_cooldown;
            state.dash_remaining = c.dash_duration;
            state.dash_direction = direction;
            state.dash_pending = false;
            debug!(entity = %entity, energy = state.energy, "dash started");
        }
    }

    /// Advance one tick: timers, active dashes, the movement pipeline, and
    /// ability bookkeeping from the responses.
    pub fn step(&mut self) -> Vec<MovementResponse> {
        let dt = self.physics().dt();
        let regen = self.config.energy_regen_per_second * dt as f32;
        let max_energy = self.config.max_energy;

        let mut continuing = Vec::new();
        for (&entity, state) in self.characters.iter_mut() {
            state.energy = (state.energy + regen).min(max_energy);
            state.dash_cooldown = (state.dash_cooldown - dt).max(0.0);
            state.invulnerable_remaining = (state.invulnerable_remaining - dt).max(0.0);
            if state.is_dashing() {
                state.dash_remaining -= dt;
                if state.dash_remaining > TIME_EPSILON {
                    continuing.push((entity, state.dash_direction));
                } else {
                    state.dash_remaining = 0.0;
                    debug!(entity = %entity, "dash ended");
                }
            }
        }

        // Dashes hold their velocity for the whole duration
        let now = self.movement.now();
        for (entity, direction) in continuing {
            let request = MovementRequest::dash(entity, direction, self.config.dash_speed, now)
                .with_priority(Priority::High);
            let response = self.physics_mut().apply_request(request);
            if !response.is_applied() {
                if let Some(state) = self.characters.get_mut(&entity) {
                    state.dash_remaining = 0.0;
                }
            }
        }

        let responses = self.movement.process_tick();

        for response in &responses {
            let entity = response.entity();
            match response.request.kind() {
                MovementKind::Dash => {
                    let pending = self.characters.get(&entity).is_some_and(|s| s.dash_pending);
                    if pending && response.is_applied() {
                        self.start_dash(entity, response.request.direction());
                    } else if let Some(state) = self.characters.get_mut(&entity) {
                        state.dash_pending = false;
                    }
                }
                MovementKind::Jump if response.is_applied() => {
                    if let Some(state) = self.characters.get_mut(&entity) {
                        state.jumping = true;
                    }
                }
                _ => {}
            }
        }

        let ids: Vec<EntityId> = self.characters.keys().copied().collect();
        for entity in ids {
            let grounded = self.physics().is_grounded(entity);
            let velocity = self.physics().get_velocity(entity).unwrap_or(Vec2::ZERO);
            if let Some(state) = self.characters.get_mut(&entity) {
                if velocity.x.abs() > 1.0 {
                    state.facing = velocity.x.signum();
                }
                if grounded || velocity.y >= 0.0 {
                    state.jumping = false;
                }
            }
        }

        responses
    }

    /// Feed ability state into a hasher (entity order).
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        for (entity, state) in &self.characters {
            hasher.update_bytes(&entity.0.to_le_bytes());
            hasher.update_f32(state.energy);
            hasher.update_f64(state.dash_cooldown);
            hasher.update_f64(state.dash_remaining);
            hasher.update_vec2(state.dash_direction);
            hasher.update_bool(state.jumping);
            hasher.update_f64(state.invulnerable_remaining);
        }
    }
}

impl CharacterPhysics for CharacterPhysicsCoordinator {
    fn request_jump(&mut self, entity: EntityId, hold_duration: Seconds) -> MovementResponse {
        let force = self.jump_force_for_hold(hold_duration);
        let request = MovementRequest::jump(entity, force, self.movement.now());
        if !self.characters.contains_key(&entity) {
            return self
                .physics()
                .respond_unapplied(request, ResponseStatus::Rejected, "unknown character");
        }
        let response = self.physics_mut().apply_request(request);
        if response.is_applied() {
            if let Some(state) = self.characters.get_mut(&entity) {
                state.jumping = true;
            }
        }
        response
    }

    fn release_jump(&mut self, entity: EntityId) -> Option<MovementResponse> {
        let state = self.characters.get_mut(&entity)?;
        if !state.jumping {
            return None;
        }
        state.jumping = false;

        let min_speed = self.config.jump_force * self.config.min_jump_ratio;
        let vy = self.physics().get_velocity(entity)?.y;
        if vy >= -min_speed {
            return None;
        }
        let cut = Vec2::new(0.0, -min_speed - vy);
        let request = MovementRequest::impulse(entity, cut, self.movement.now());
        Some(self.physics_mut().apply_request(request))
    }

    fn request_dash(&mut self, entity: EntityId, direction: Vec2) -> MovementResponse {
        let direction = self.dash_direction(entity, direction);
        let request = MovementRequest::dash(entity, direction, self.config.dash_speed, self.movement.now())
            .with_priority(Priority::High);

        if !self.characters.contains_key(&entity) {
            return self
                .physics()
                .respond_unapplied(request, ResponseStatus::Rejected, "unknown character");
        }
        if let Some(reason) = self.dash_denial(entity) {
            debug!(entity = %entity, reason, "dash refused");
            return self.physics().respond_unapplied(request, ResponseStatus::Blocked, reason);
        }

        let response = self.physics_mut().apply_request(request);
        if response.is_applied() {
            self.start_dash(entity, direction);
        }
        response
    }

    fn can_perform_jump(&self, entity: EntityId) -> bool {
        self.characters.contains_key(&entity)
            && self.physics().is_dynamic(entity)
            && self.physics().notifier().can_jump(entity)
    }

    fn can_perform_dash(&self, entity: EntityId) -> bool {
        self.dash_denial(entity).is_none()
    }

    fn get_movement_capabilities(&self, entity: EntityId) -> Option<MovementCapabilities> {
        let state = self.characters.get(&entity)?;
        let notifier = self.physics().notifier();
        Some(MovementCapabilities {
            can_jump: self.can_perform_jump(entity),
            can_dash: self.can_perform_dash(entity),
            grounded: notifier.is_grounded(entity),
            is_dashing: state.is_dashing(),
            dash_cooldown_remaining: state.dash_cooldown,
            coyote_time_remaining: notifier.get_coyote_time_remaining(entity),
            energy: state.energy,
            max_energy: self.config.max_energy,
            invulnerable: state.is_invulnerable(),
        })
    }

    fn respawn(&mut self, entity: EntityId, respawn: &RespawnState) -> Result<(), PhysicsError> {
        if !self.characters.contains_key(&entity) {
            return Err(PhysicsError::UnknownEntity(entity));
        }
        self.physics_mut().reset_physics_state(entity, Some(respawn))?;
        if respawn.clear_history {
            self.movement.clear_input_buffer(entity);
        }

        let fresh = CharacterState::new(&self.config);
        if let Some(state) = self.characters.get_mut(&entity) {
            if respawn.reset_abilities {
                *state = fresh;
            } else {
                state.dash_remaining = 0.0;
                state.dash_pending = false;
                state.jumping = false;
            }
            state.invulnerable_remaining = respawn.invulnerability();
        }

        info!(
            entity = %entity,
            tag = %respawn.tag,
            position = ?respawn.position,
            "character respawned"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::aabb::Aabb;
    use crate::protocol::contact::SurfaceDescriptor;

    const E: EntityId = EntityId(1);

    fn stack() -> CharacterPhysicsCoordinator {
        let mut world = StaticWorld::new();
        world.add_solid(
            Aabb::from_min_max(Vec2::new(-2000.0, 200.0), Vec2::new(2000.0, 260.0)),
            SurfaceDescriptor::stone(),
        );
        let mut c = CharacterPhysicsCoordinator::from_config(&SimulationConfig::default(), world);
        c.register_character(E, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
            .unwrap();
        c.step();
        c
    }

    #[test]
    fn test_jump_force_scales_with_hold() {
        let c = stack();
        assert_eq!(c.jump_force_for_hold(0.0), 270.0);
        assert_eq!(c.jump_force_for_hold(0.2), 540.0);
        assert_eq!(c.jump_force_for_hold(5.0), 540.0);
        assert!((c.jump_force_for_hold(0.1) - 405.0).abs() < 1e-3);
    }

    #[test]
    fn test_full_jump_leaves_ground() {
        let mut c = stack();
        let resp = c.request_jump(E, 0.2);
        assert_eq!(resp.status, ResponseStatus::Success);
        assert!((resp.actual_velocity.y + 540.0).abs() < 1e-3);
        c.step();
        assert!(!c.physics().is_grounded(E));
        assert!(!c.can_perform_jump(E));
    }

    #[test]
    fn test_release_cuts_jump() {
        let mut c = stack();
        c.request_jump(E, 0.2);
        c.step();
        let resp = c.release_jump(E).unwrap();
        assert!(resp.is_applied());
        assert!((resp.actual_velocity.y + 270.0).abs() < 1e-3);
        // Only once per jump
        assert!(c.release_jump(E).is_none());
    }

    #[test]
    fn test_dash_cooldown_and_energy() {
        let mut c = stack();
        let resp = c.request_dash(E, Vec2::new(3.0, 0.0));
        assert_eq!(resp.status, ResponseStatus::Success);
        assert_eq!(resp.actual_velocity.x, 900.0);
        assert_eq!(c.character_state(E).unwrap().energy, 75.0);

        let again = c.request_dash(E, Vec2::X);
        assert_eq!(again.status, ResponseStatus::Blocked);
        assert_eq!(again.reason.as_deref(), Some("already dashing"));
        assert_eq!(again.actual_position, c.physics().get_position(E).unwrap());
        assert_eq!(again.actual_velocity, c.physics().get_velocity(E).unwrap());
        assert_eq!(again.processing_duration, std::time::Duration::ZERO);

        for _ in 0..12 {
            c.step();
        }
        assert!(!c.character_state(E).unwrap().is_dashing());
        assert!(!c.can_perform_dash(E), "still cooling down");
        for _ in 0..30 {
            c.step();
        }
        assert!(c.can_perform_dash(E));
    }

    #[test]
    fn test_dash_holds_velocity_for_duration() {
        let mut c = stack();
        c.request_dash(E, Vec2::NEG_X);
        c.step();
        c.step();
        assert_eq!(c.physics().get_velocity(E).unwrap().x, -900.0);
    }

    #[test]
    fn test_zero_direction_dash_uses_facing() {
        let mut c = stack();
        c.physics_mut().request_movement(E, Vec2::NEG_X, 200.0);
        c.step();
        let resp = c.request_dash(E, Vec2::ZERO);
        assert_eq!(resp.request.direction(), Vec2::NEG_X);
    }

    #[test]
    fn test_queued_dash_bookkeeping() {
        let mut c = stack();
        let id = c.submit_dash(E, Vec2::X).unwrap();
        assert!(c.submit_dash(E, Vec2::X).is_none(), "one dash in flight");
        let responses = c.step();
        let resp = responses.iter().find(|r| r.request.request_id() == Some(id)).unwrap();
        assert!(resp.is_applied());
        let state = c.character_state(E).unwrap();
        assert!(state.is_dashing());
        assert!(!state.dash_pending);
    }

    #[test]
    fn test_insufficient_energy() {
        let mut c = stack();
        for _ in 0..4 {
            let resp = c.request_dash(E, Vec2::X);
            assert!(resp.is_applied());
            if let Some(state) = c.characters.get_mut(&E) {
                state.dash_remaining = 0.0;
                state.dash_cooldown = 0.0;
            }
        }
        let resp = c.request_dash(E, Vec2::X);
        assert_eq!(resp.status, ResponseStatus::Blocked);
        assert_eq!(resp.reason.as_deref(), Some("insufficient energy"));
    }

    #[test]
    fn test_respawn_resets_everything() {
        let mut c = stack();
        c.request_dash(E, Vec2::X);
        c.physics_mut().apply_force(E, Vec2::new(4000.0, 0.0)).unwrap();
        let now = c.movement().now();
        c.movement_mut()
            .submit_movement_request(MovementRequest::walk(E, Vec2::X, 100.0, now));

        let spawn = RespawnState::spawning(Vec2::new(50.0, 176.0)).with_invulnerability(1.0);
        c.respawn(E, &spawn).unwrap();

        let physics = c.physics().get_physics_state(E).unwrap();
        assert_eq!(physics.position, Vec2::new(50.0, 176.0));
        assert_eq!(physics.velocity, Vec2::ZERO);
        assert!(!c.physics().has_accumulation(E));
        assert_eq!(c.movement().pending_for(E), 0);

        let caps = c.get_movement_capabilities(E).unwrap();
        assert!(caps.invulnerable);
        assert_eq!(caps.energy, caps.max_energy);
        assert!(!caps.is_dashing);
        assert_eq!(caps.dash_cooldown_remaining, 0.0);

        assert_eq!(
            c.respawn(EntityId(77), &spawn),
            Err(PhysicsError::UnknownEntity(EntityId(77)))
        );
    }

    #[test]
    fn test_energy_regenerates() {
        let mut c = stack();
        c.request_dash(E, Vec2::X);
        for _ in 0..60 {
            c.step();
        }
        let energy = c.character_state(E).unwrap().energy;
        assert!((energy - 95.0).abs() < 1e-2, "75 + 20/s for 1 s, got {energy}");
    }
}
