//! Input Capture and Translation
//!
//! Raw per-tick controller frames are turned into movement requests here.
//! Jumps and dashes are edge-triggered, a jump pressed slightly too early is
//! buffered, and violent left/right mashing clears accumulated forces before
//! anything reaches the physics layer.
//!
//! Frames are also recorded delta-compressed so a run can be replayed.

use std::collections::{BTreeMap, VecDeque};

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MovementConfig;
use crate::core::time::{Seconds, TIME_EPSILON};
use crate::movement::character::{CharacterPhysics, CharacterPhysicsCoordinator};
use crate::movement::coordinator::MovementHandler;
use crate::physics::coordinator::PhysicsCoordination;
use crate::protocol::ids::{EntityId, RequestId};
use crate::protocol::request::MovementRequest;

/// Convert an axis byte to `[-1, 1]`. `NO_INPUT` reads as centered.
#[inline]
pub fn axis_value(input: i8) -> f32 {
    if input == InputFrame::NO_INPUT {
        0.0
    } else {
        input as f32 / 127.0
    }
}

// =============================================================================
// INPUT FRAME
// =============================================================================

/// Controller state for one entity on one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFrame {
    /// Horizontal stick: -127 (left) to +127 (right); -128 = released
    pub move_x: i8,
    /// Vertical stick: -127 (down) to +127 (up); -128 = released
    pub move_y: i8,
    /// Held buttons
    pub flags: u8,
}

impl InputFrame {
    /// Stick released.
    pub const NO_INPUT: i8 = -128;

    /// Jump button held.
    pub const FLAG_JUMP: u8 = 0x01;

    /// Dash button held.
    pub const FLAG_DASH: u8 = 0x02;

    /// Nothing pressed.
    pub const fn new() -> Self {
        Self {
            move_x: Self::NO_INPUT,
            move_y: Self::NO_INPUT,
            flags: 0,
        }
    }

    /// Stick deflection, no buttons.
    pub const fn with_movement(move_x: i8, move_y: i8) -> Self {
        Self {
            move_x,
            move_y,
            flags: 0,
        }
    }

    /// Copy with the jump button held or released.
    pub const fn jumping(mut self, held: bool) -> Self {
        if held {
            self.flags |= Self::FLAG_JUMP;
        } else {
            self.flags &= !Self::FLAG_JUMP;
        }
        self
    }

    /// Copy with the dash button held or released.
    pub const fn dashing(mut self, held: bool) -> Self {
        if held {
            self.flags |= Self::FLAG_DASH;
        } else {
            self.flags &= !Self::FLAG_DASH;
        }
        self
    }

    /// Horizontal axis in `[-1, 1]`.
    #[inline]
    pub fn horizontal(&self) -> f32 {
        axis_value(self.move_x)
    }

    /// Stick direction in world space (y down).
    #[inline]
    pub fn direction(&self) -> Vec2 {
        Vec2::new(axis_value(self.move_x), -axis_value(self.move_y))
    }

    /// Jump button down this frame.
    #[inline]
    pub fn jump_held(&self) -> bool {
        self.flags & Self::FLAG_JUMP != 0
    }

    /// Dash button down this frame.
    #[inline]
    pub fn dash_held(&self) -> bool {
        self.flags & Self::FLAG_DASH != 0
    }

    /// No stick deflection and no buttons.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.horizontal() == 0.0 && axis_value(self.move_y) == 0.0 && self.flags == 0
    }
}

// =============================================================================
// RECORDING
// =============================================================================

/// Input state change at a tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDelta {
    /// First tick with this frame
    pub tick: u64,
    /// The new frame
    pub frame: InputFrame,
}

/// Delta-compressed input history of one entity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputTrack {
    /// First recorded tick
    pub start_tick: u64,
    /// Last recorded tick
    pub end_tick: u64,
    deltas: Vec<InputDelta>,
    #[serde(skip)]
    last_frame: Option<InputFrame>,
}

impl InputTrack {
    fn record(&mut self, tick: u64, frame: InputFrame) {
        if self.last_frame.is_none() {
            self.start_tick = tick;
        }
        self.end_tick = tick;
        if self.last_frame != Some(frame) {
            self.deltas.push(InputDelta { tick, frame });
            self.last_frame = Some(frame);
        }
    }

    /// Frame in effect at `tick` (idle before the first change).
    pub fn get_input_at(&self, tick: u64) -> InputFrame {
        let idx = self.deltas.partition_point(|d| d.tick <= tick);
        if idx == 0 {
            InputFrame::new()
        } else {
            self.deltas[idx - 1].frame
        }
    }

    /// Stored changes.
    pub fn deltas(&self) -> &[InputDelta] {
        &self.deltas
    }

    /// Tick-by-tick frames from `start_tick` to `end_tick`.
    pub fn replay_iter(&self) -> ReplayIterator<'_> {
        ReplayIterator {
            track: self,
            current_tick: self.start_tick,
            delta_idx: 0,
            current_frame: InputFrame::new(),
        }
    }
}

/// Replays a track tick by tick.
pub struct ReplayIterator<'a> {
    track: &'a InputTrack,
    current_tick: u64,
    delta_idx: usize,
    current_frame: InputFrame,
}

impl Iterator for ReplayIterator<'_> {
    type Item = (u64, InputFrame);

    fn next(&mut self) -> Option<Self::Item> {
        if self.track.deltas.is_empty() || self.current_tick > self.track.end_tick {
            return None;
        }
        while let Some(delta) = self.track.deltas.get(self.delta_idx) {
            if delta.tick > self.current_tick {
                break;
            }
            self.current_frame = delta.frame;
            self.delta_idx += 1;
        }
        let item = (self.current_tick, self.current_frame);
        self.current_tick += 1;
        Some(item)
    }
}

/// Input history for every entity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InputRecorder {
    tracks: BTreeMap<EntityId, InputTrack>,
}

impl InputRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `frame` for `entity` at `tick`. Unchanged frames cost nothing.
    pub fn record(&mut self, entity: EntityId, tick: u64, frame: InputFrame) {
        self.tracks.entry(entity).or_default().record(tick, frame);
    }

    /// History of one entity.
    pub fn track(&self, entity: EntityId) -> Option<&InputTrack> {
        self.tracks.get(&entity)
    }

    /// Frame `entity` had at `tick`.
    pub fn get_input_at(&self, entity: EntityId, tick: u64) -> InputFrame {
        self.tracks
            .get(&entity)
            .map_or_else(InputFrame::new, |t| t.get_input_at(tick))
    }

    /// Recorded tick span across all entities.
    pub fn tick_range(&self) -> Option<(u64, u64)> {
        let start = self.tracks.values().map(|t| t.start_tick).min()?;
        let end = self.tracks.values().map(|t| t.end_tick).max()?;
        Some((start, end))
    }

    /// Every recorded entity's frame at `tick`, for entities whose track
    /// covers it.
    pub fn frames_at(&self, tick: u64) -> BTreeMap<EntityId, InputFrame> {
        self.tracks
            .iter()
            .filter(|(_, t)| t.start_tick <= tick && tick <= t.end_tick)
            .map(|(id, t)| (*id, t.get_input_at(tick)))
            .collect()
    }

    /// Total stored changes.
    pub fn delta_count(&self) -> usize {
        self.tracks.values().map(|t| t.deltas.len()).sum()
    }

    /// Drop every track.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}

// =============================================================================
// HANDLER
// =============================================================================

#[derive(Debug, Default)]
struct EntityInput {
    previous: InputFrame,
    jump_buffered_at: Option<Seconds>,
    last_sign: i8,
    reversals: VecDeque<Seconds>,
}

/// Translates frames into requests against the character stack.
#[derive(Debug)]
pub struct InputHandler {
    config: MovementConfig,
    entities: BTreeMap<EntityId, EntityInput>,
}

impl InputHandler {
    /// Handler with no per-entity history yet.
    pub fn new(config: MovementConfig) -> Self {
        Self {
            config,
            entities: BTreeMap::new(),
        }
    }

    /// A jump press is waiting for the entity to be able to jump.
    pub fn has_buffered_jump(&self, entity: EntityId) -> bool {
        self.entities
            .get(&entity)
            .is_some_and(|e| e.jump_buffered_at.is_some())
    }

    /// Forget edge state, buffered jumps and reversal history.
    pub fn reset_entity(&mut self, entity: EntityId) {
        self.entities.remove(&entity);
    }

    /// Handle one frame for `entity`. Returns the ids of submitted queued
    /// requests; jump releases act immediately and are not listed.
    pub fn process(
        &mut self,
        character: &mut CharacterPhysicsCoordinator,
        entity: EntityId,
        frame: InputFrame,
    ) -> Vec<RequestId> {
        let now = character.movement().now();
        let state = self.entities.entry(entity).or_default();
        let previous = std::mem::replace(&mut state.previous, frame);
        let mut submitted = Vec::new();
        let budget = self.config.max_requests_per_tick;

        // Mashing left/right fast enough builds up forces; drop them first
        let sign = match frame.horizontal() {
            x if x > 0.0 => 1,
            x if x < 0.0 => -1,
            _ => 0,
        };
        if sign != 0 {
            if state.last_sign != 0 && sign != state.last_sign {
                state.reversals.push_back(now);
            }
            state.last_sign = sign;
        }
        let window = self.config.rapid_input_window;
        while state
            .reversals
            .front()
            .is_some_and(|&t| now - t > window - TIME_EPSILON)
        {
            state.reversals.pop_front();
        }
        if state.reversals.len() > self.config.direction_reversal_limit {
            debug!(entity = %entity, reversals = state.reversals.len(), "direction mashing, clearing forces");
            state.reversals.clear();
            if let Err(err) = character.physics_mut().clear_accumulated_forces(entity) {
                debug!(entity = %entity, %err, "could not clear forces");
            }
        }

        if frame.jump_held() && !previous.jump_held() {
            state.jump_buffered_at = Some(now);
        }
        if !frame.jump_held() && previous.jump_held() {
            state.jump_buffered_at = None;
            character.release_jump(entity);
        }

        let dashing = character.character_state(entity).is_some_and(|c| c.is_dashing());
        let axis = frame.horizontal();
        if axis != 0.0 && !dashing && submitted.len() < budget {
            let speed = self.config.walk_speed * axis.abs();
            let request = MovementRequest::walk(entity, Vec2::new(axis.signum(), 0.0), speed, now);
            submitted.push(character.movement_mut().submit_movement_request(request));
        }

        if let Some(pressed_at) = state.jump_buffered_at {
            if now - pressed_at > self.config.jump_buffer_time + TIME_EPSILON {
                debug!(entity = %entity, "buffered jump expired");
                state.jump_buffered_at = None;
            } else if character.can_perform_jump(entity) && submitted.len() < budget {
                let hold = character.config().max_jump_hold;
                submitted.push(character.submit_jump(entity, hold));
                state.jump_buffered_at = None;
            }
        }

        if frame.dash_held() && !previous.dash_held() && submitted.len() < budget {
            match character.submit_dash(entity, frame.direction()) {
                Some(id) => submitted.push(id),
                None => debug!(entity = %entity, "dash unavailable"),
            }
        }

        submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::core::aabb::Aabb;
    use crate::physics::body::BodyDef;
    use crate::physics::world::StaticWorld;
    use crate::protocol::contact::SurfaceDescriptor;

    const E: EntityId = EntityId(1);

    fn setup() -> (InputHandler, CharacterPhysicsCoordinator) {
        let mut world = StaticWorld::new();
        world.add_solid(
            Aabb::from_min_max(Vec2::new(-2000.0, 200.0), Vec2::new(2000.0, 260.0)),
            SurfaceDescriptor::stone(),
        );
        let config = SimulationConfig::default();
        let mut character = CharacterPhysicsCoordinator::from_config(&config, world);
        character
            .register_character(E, BodyDef::dynamic(Vec2::new(0.0, 176.0), Vec2::new(16.0, 24.0)))
            .unwrap();
        character.step();
        (InputHandler::new(config.movement), character)
    }

    #[test]
    fn test_axis_values() {
        assert_eq!(axis_value(127), 1.0);
        assert_eq!(axis_value(-127), -1.0);
        assert_eq!(axis_value(0), 0.0);
        assert_eq!(axis_value(InputFrame::NO_INPUT), 0.0);
        assert!(InputFrame::new().is_idle());
        assert_eq!(InputFrame::with_movement(0, 127).direction(), Vec2::new(0.0, -1.0));
    }

    #[test]
    fn test_frame_flags() {
        let frame = InputFrame::new().jumping(true).dashing(true);
        assert!(frame.jump_held() && frame.dash_held());
        let frame = frame.jumping(false);
        assert!(!frame.jump_held() && frame.dash_held());
    }

    #[test]
    fn test_walk_every_held_tick() {
        let (mut input, mut character) = setup();
        let frame = InputFrame::with_movement(127, 0);
        for _ in 0..3 {
            assert_eq!(input.process(&mut character, E, frame).len(), 1);
            character.step();
        }
        assert_eq!(character.physics().get_velocity(E).unwrap().x, 200.0);
        assert_eq!(input.process(&mut character, E, InputFrame::new()).len(), 0);
    }

    #[test]
    fn test_jump_is_edge_triggered() {
        let (mut input, mut character) = setup();
        let held = InputFrame::new().jumping(true);
        assert_eq!(input.process(&mut character, E, held).len(), 1);
        character.step();
        assert!(!character.physics().is_grounded(E));
        assert!(input.process(&mut character, E, held).is_empty());
    }

    #[test]
    fn test_early_release_cuts_jump() {
        let (mut input, mut character) = setup();
        input.process(&mut character, E, InputFrame::new().jumping(true));
        character.step();
        character.step();
        input.process(&mut character, E, InputFrame::new());
        let vy = character.physics().get_velocity(E).unwrap().y;
        assert!((vy + 270.0).abs() < 1e-3, "cut to minimum jump, got {vy}");
    }

    #[test]
    fn test_jump_buffer() {
        let (mut input, mut character) = setup();
        // Airborne past coyote time: press is buffered, not submitted
        character.physics_mut().request_impulse(E, Vec2::new(0.0, -600.0));
        for _ in 0..12 {
            character.step();
        }
        assert!(!character.can_perform_jump(E));
        assert!(input.process(&mut character, E, InputFrame::new().jumping(true)).is_empty());
        assert!(input.has_buffered_jump(E));

        // Buffer lapses long before landing
        for _ in 0..10 {
            character.step();
            input.process(&mut character, E, InputFrame::new().jumping(true));
        }
        assert!(!input.has_buffered_jump(E));
    }

    #[test]
    fn test_budget_limits_submissions() {
        let (_, mut character) = setup();
        let mut config = SimulationConfig::default().movement;
        config.max_requests_per_tick = 1;
        let mut input = InputHandler::new(config);
        let frame = InputFrame::with_movement(127, 0).jumping(true).dashing(true);
        assert_eq!(input.process(&mut character, E, frame).len(), 1);
    }

    #[test]
    fn test_direction_mashing_clears_forces() {
        let (mut input, mut character) = setup();
        character.physics_mut().apply_force(E, Vec2::new(100.0, 0.0)).unwrap();
        let left = InputFrame::with_movement(-127, 0);
        let right = InputFrame::with_movement(127, 0);
        for i in 0..8 {
            let frame = if i % 2 == 0 { left } else { right };
            input.process(&mut character, E, frame);
        }
        let state = character.physics().get_physics_state(E).unwrap();
        assert_eq!(state.accumulated_forces, Vec2::ZERO);
    }

    #[test]
    fn test_recorder_delta_compression() {
        let mut recorder = InputRecorder::new();
        let a = InputFrame::with_movement(100, 0);
        let b = InputFrame::with_movement(-100, 0).jumping(true);
        for tick in 1..=4 {
            recorder.record(E, tick, a);
        }
        recorder.record(E, 5, b);
        recorder.record(E, 6, b);

        assert_eq!(recorder.delta_count(), 2);
        assert_eq!(recorder.get_input_at(E, 0), InputFrame::new());
        assert_eq!(recorder.get_input_at(E, 3), a);
        assert_eq!(recorder.get_input_at(E, 100), b);
        assert_eq!(recorder.tick_range(), Some((1, 6)));
        assert!(recorder.frames_at(7).is_empty());
        assert_eq!(recorder.frames_at(6).get(&E), Some(&b));
    }

    #[test]
    fn test_replay_iterator() {
        let mut recorder = InputRecorder::new();
        recorder.record(E, 10, InputFrame::with_movement(10, 0));
        recorder.record(E, 11, InputFrame::with_movement(10, 0));
        recorder.record(E, 12, InputFrame::with_movement(20, 0));

        let frames: Vec<_> = recorder.track(E).unwrap().replay_iter().collect();
        let xs: Vec<(u64, i8)> = frames.iter().map(|(t, f)| (*t, f.move_x)).collect();
        assert_eq!(xs, vec![(10, 10), (11, 10), (12, 20)]);
    }
}
