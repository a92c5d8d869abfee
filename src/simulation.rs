//! Simulation Facade
//!
//! Owns the coordinator stack, the input handler and the recorder, and runs
//! the fixed-step loop. Given the same level, configuration, spawns and
//! input frames, two simulations hash identically at every tick.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, SimulationConfig};
use crate::core::hash::{compute_world_hash, StateHash};
use crate::core::time::FixedTimestep;
use crate::movement::character::{CharacterPhysics, CharacterPhysicsCoordinator};
use crate::movement::input::{InputFrame, InputHandler, InputRecorder};
use crate::physics::body::{BodyDef, PhysicsError};
use crate::physics::coordinator::{PhysicsCoordination, PhysicsCoordinator};
use crate::physics::events::PhysicsEvent;
use crate::physics::world::StaticWorld;
use crate::protocol::ids::EntityId;
use crate::protocol::respawn::RespawnState;
use crate::protocol::response::MovementResponse;
use crate::protocol::state::PhysicsState;

/// Output of one tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TickResult {
    /// Tick that just ran
    pub tick: u64,
    /// Responses finished this tick
    pub responses: Vec<MovementResponse>,
    /// Collision events, ordered
    pub events: Vec<PhysicsEvent>,
}

/// Administrative change applied between ticks, kept for replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum ControlEvent {
    Spawn { entity: EntityId, def: BodyDef },
    Despawn { entity: EntityId },
    Respawn { entity: EntityId, state: RespawnState },
}

/// A running simulation.
pub struct Simulation {
    config: SimulationConfig,
    level: StaticWorld,
    character: CharacterPhysicsCoordinator,
    input: InputHandler,
    recorder: InputRecorder,
    timestep: FixedTimestep,
    control_log: Vec<(u64, ControlEvent)>,
}

impl Simulation {
    /// Validate `config` and build a simulation over `level`.
    pub fn new(config: SimulationConfig, level: StaticWorld) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            colliders = level.len(),
            dt = config.physics.fixed_dt,
            gravity = config.physics.gravity,
            "simulation created"
        );
        Ok(Self::assemble(config, level))
    }

    fn assemble(config: SimulationConfig, level: StaticWorld) -> Self {
        Self {
            character: CharacterPhysicsCoordinator::from_config(&config, level.clone()),
            input: InputHandler::new(config.movement.clone()),
            recorder: InputRecorder::new(),
            timestep: FixedTimestep::new(config.physics.fixed_dt, config.physics.max_frame_time),
            control_log: Vec::new(),
            config,
            level,
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.physics().tick()
    }

    /// Character facade.
    pub fn character(&self) -> &CharacterPhysicsCoordinator {
        &self.character
    }

    /// Character facade (mutable). Requests made here directly are not
    /// recorded for replay.
    pub fn character_mut(&mut self) -> &mut CharacterPhysicsCoordinator {
        &mut self.character
    }

    /// Physics authority.
    pub fn physics(&self) -> &PhysicsCoordinator {
        self.character.physics()
    }

    /// Physics authority (mutable).
    pub fn physics_mut(&mut self) -> &mut PhysicsCoordinator {
        self.character.physics_mut()
    }

    /// Recorded input.
    pub fn recorder(&self) -> &InputRecorder {
        &self.recorder
    }

    /// Add a character.
    pub fn spawn(&mut self, entity: EntityId, def: BodyDef) -> Result<(), PhysicsError> {
        self.character.register_character(entity, def.clone())?;
        self.log_control(ControlEvent::Spawn { entity, def });
        Ok(())
    }

    /// Remove a character. Returns its last physics state.
    pub fn despawn(&mut self, entity: EntityId) -> Option<PhysicsState> {
        let state = self.physics().get_physics_state(entity);
        self.character.unregister_character(entity)?;
        self.input.reset_entity(entity);
        self.log_control(ControlEvent::Despawn { entity });
        state
    }

    /// Respawn or teleport a character.
    pub fn respawn(&mut self, entity: EntityId, state: &RespawnState) -> Result<(), PhysicsError> {
        self.character.respawn(entity, state)?;
        if state.clear_history {
            self.input.reset_entity(entity);
        }
        self.log_control(ControlEvent::Respawn {
            entity,
            state: state.clone(),
        });
        Ok(())
    }

    fn log_control(&mut self, event: ControlEvent) {
        let tick = self.tick_count();
        self.control_log.push((tick, event));
    }

    /// Run exactly one tick. Characters without a frame in `inputs` are
    /// treated as idle.
    pub fn tick(&mut self, inputs: &BTreeMap<EntityId, InputFrame>) -> TickResult {
        let tick = self.tick_count() + 1;
        let ids: Vec<EntityId> = self.character.characters().map(|(id, _)| id).collect();
        for entity in ids {
            let frame = inputs.get(&entity).copied().unwrap_or_default();
            self.recorder.record(entity, tick, frame);
            self.input.process(&mut self.character, entity, frame);
        }

        let responses = self.character.step();
        let events = self.physics_mut().flush_events();
        if !events.is_empty() {
            debug!(tick, events = events.len(), "events flushed");
        }

        TickResult {
            tick,
            responses,
            events,
        }
    }

    /// Feed real elapsed time; runs as many fixed ticks as are due with the
    /// same held inputs.
    pub fn advance(&mut self, frame_dt: f64, inputs: &BTreeMap<EntityId, InputFrame>) -> Vec<TickResult> {
        let steps = self.timestep.accumulate(frame_dt);
        (0..steps).map(|_| self.tick(inputs)).collect()
    }

    /// Render interpolation factor between the last two ticks.
    pub fn alpha(&self) -> f32 {
        self.timestep.alpha()
    }

    /// Hash of all physics and ability state.
    pub fn compute_hash(&self) -> StateHash {
        compute_world_hash(self.tick_count(), |hasher| {
            self.physics().hash_into(hasher);
            self.character.hash_into(hasher);
        })
    }

    /// Rebuild from the level and re-run every recorded spawn, respawn and
    /// input frame up to the current tick.
    pub fn replay(&self) -> Result<Simulation, PhysicsError> {
        let mut replay = Self::assemble(self.config.clone(), self.level.clone());
        let end = self.tick_count();
        let mut log = self.control_log.iter().peekable();

        for tick in 0..=end {
            if tick > 0 {
                let frames = self.recorder.frames_at(tick);
                replay.tick(&frames);
            }
            while let Some((_, event)) = log.next_if(|(at, _)| *at == tick) {
                replay.apply_control(event)?;
            }
        }

        debug!(ticks = end, "replay finished");
        Ok(replay)
    }

    fn apply_control(&mut self, event: &ControlEvent) -> Result<(), PhysicsError> {
        match event {
            ControlEvent::Spawn { entity, def } => self.spawn(*entity, def.clone()),
            ControlEvent::Despawn { entity } => {
                self.despawn(*entity);
                Ok(())
            }
            ControlEvent::Respawn { entity, state } => self.respawn(*entity, state),
        }
    }

    /// Replay from scratch and compare hashes.
    pub fn verify_replay(&self) -> Result<bool, PhysicsError> {
        Ok(self.replay()?.compute_hash() == self.compute_hash())
    }

    /// Published state of every body, in id order.
    pub fn snapshots(&self) -> Vec<PhysicsState> {
        self.physics()
            .entities()
            .filter_map(|id| self.physics().get_physics_state(id))
            .collect()
    }
}
