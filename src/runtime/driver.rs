//! Physics Driver Task
//!
//! Single owner of the simulation. Ticks on a tokio interval (or on demand
//! in manual mode), routes responses to waiting callers by `RequestId` and
//! publishes events.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::core::hash::StateHash;
use crate::movement::coordinator::MovementHandler;
use crate::movement::input::InputFrame;
use crate::physics::body::{BodyDef, PhysicsError};
use crate::physics::coordinator::PhysicsCoordination;
use crate::physics::events::PhysicsEvent;
use crate::protocol::ids::{EntityId, RequestId};
use crate::protocol::request::MovementRequest;
use crate::protocol::respawn::RespawnState;
use crate::protocol::response::{MovementResponse, ResponseStatus};
use crate::protocol::state::PhysicsState;
use crate::simulation::Simulation;

/// Driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Ticks per second in real-time mode
    pub tick_rate_hz: u32,
    /// Tick on a timer; when false, only `DriverHandle::step` advances
    pub realtime: bool,
    /// Command channel capacity
    pub command_buffer: usize,
    /// Event broadcast capacity
    pub event_buffer: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            realtime: true,
            command_buffer: 256,
            event_buffer: 1024,
        }
    }
}

impl DriverConfig {
    /// Manual stepping, for tests and offline tools.
    pub fn manual() -> Self {
        Self {
            realtime: false,
            ..Self::default()
        }
    }
}

/// Driver errors.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The driver task has stopped.
    #[error("physics driver has shut down")]
    Closed,

    /// The driver dropped a reply without answering.
    #[error("physics driver dropped the reply")]
    ReplyDropped,

    /// Administrative physics operation failed.
    #[error("physics error: {0}")]
    Physics(#[from] PhysicsError),
}

impl<T> From<mpsc::error::SendError<T>> for DriverError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::Closed
    }
}

impl From<oneshot::error::RecvError> for DriverError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::ReplyDropped
    }
}

enum Command {
    Submit {
        request: MovementRequest,
        reply: oneshot::Sender<MovementResponse>,
    },
    Input {
        entity: EntityId,
        frame: InputFrame,
    },
    Spawn {
        entity: EntityId,
        def: BodyDef,
        reply: oneshot::Sender<Result<(), PhysicsError>>,
    },
    Respawn {
        entity: EntityId,
        state: RespawnState,
        reply: oneshot::Sender<Result<(), PhysicsError>>,
    },
    Snapshot {
        entity: EntityId,
        reply: oneshot::Sender<Option<PhysicsState>>,
    },
    Hash {
        reply: oneshot::Sender<(u64, StateHash)>,
    },
    Step {
        ticks: u32,
        reply: oneshot::Sender<u64>,
    },
    Shutdown,
}

/// Cloneable client side of a running driver.
#[derive(Clone)]
pub struct DriverHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<PhysicsEvent>,
}

impl DriverHandle {
    /// Hand a request to the driver and get the receiver its response will
    /// arrive on (after the tick that processes it).
    pub async fn enqueue(
        &self,
        request: MovementRequest,
    ) -> Result<oneshot::Receiver<MovementResponse>, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Submit { request, reply }).await?;
        Ok(rx)
    }

    /// Submit a request and wait for its response.
    pub async fn submit(&self, request: MovementRequest) -> Result<MovementResponse, DriverError> {
        let rx = self.enqueue(request).await?;
        Ok(rx.await?)
    }

    /// Set the held input frame of an entity (used every tick until changed).
    pub async fn set_input(&self, entity: EntityId, frame: InputFrame) -> Result<(), DriverError> {
        self.commands.send(Command::Input { entity, frame }).await?;
        Ok(())
    }

    /// Add a character.
    pub async fn spawn(&self, entity: EntityId, def: BodyDef) -> Result<(), DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Spawn { entity, def, reply }).await?;
        Ok(rx.await??)
    }

    /// Respawn or teleport a character.
    pub async fn respawn(&self, entity: EntityId, state: RespawnState) -> Result<(), DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Respawn { entity, state, reply }).await?;
        Ok(rx.await??)
    }

    /// Published state of an entity.
    pub async fn snapshot(&self, entity: EntityId) -> Result<Option<PhysicsState>, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Snapshot { entity, reply }).await?;
        Ok(rx.await?)
    }

    /// Current tick and world hash.
    pub async fn hash(&self) -> Result<(u64, StateHash), DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Hash { reply }).await?;
        Ok(rx.await?)
    }

    /// Run `ticks` ticks now; returns the tick count afterwards.
    pub async fn step(&self, ticks: u32) -> Result<u64, DriverError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Step { ticks, reply }).await?;
        Ok(rx.await?)
    }

    /// Collision event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<PhysicsEvent> {
        self.events.subscribe()
    }

    /// Ask the driver to stop after the current command.
    pub async fn shutdown(&self) -> Result<(), DriverError> {
        self.commands.send(Command::Shutdown).await?;
        Ok(())
    }
}

/// The driver task state.
pub struct PhysicsDriver {
    config: DriverConfig,
    sim: Simulation,
    inputs: BTreeMap<EntityId, InputFrame>,
    waiting: BTreeMap<RequestId, oneshot::Sender<MovementResponse>>,
    events: broadcast::Sender<PhysicsEvent>,
}

impl PhysicsDriver {
    /// Start driving `sim` on a new task. The join handle yields the
    /// simulation back after shutdown.
    pub fn spawn(sim: Simulation, config: DriverConfig) -> (DriverHandle, JoinHandle<Simulation>) {
        let (commands, rx) = mpsc::channel(config.command_buffer.max(1));
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let handle = DriverHandle {
            commands,
            events: events.clone(),
        };
        let driver = Self {
            config,
            sim,
            inputs: BTreeMap::new(),
            waiting: BTreeMap::new(),
            events,
        };
        let join = tokio::spawn(driver.run(rx));
        (handle, join)
    }

    #[instrument(skip_all)]
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Simulation {
        info!(tick_rate = self.config.tick_rate_hz, "physics driver started");

        if self.config.realtime {
            let period = Duration::from_secs_f64(1.0 / f64::from(self.config.tick_rate_hz.max(1)));
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_tick(),
                    command = commands.recv() => match command {
                        Some(command) => {
                            if !self.handle(command) {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
        } else {
            while let Some(command) = commands.recv().await {
                if !self.handle(command) {
                    break;
                }
            }
        }

        // Waiters still pending never get a tick
        for (id, _) in std::mem::take(&mut self.waiting) {
            debug!(request = %id, "dropping reply on shutdown");
        }
        info!(tick = self.sim.tick_count(), "physics driver stopped");
        self.sim
    }

    /// Returns false on shutdown.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Submit { request, reply } => self.submit(request, reply),
            Command::Input { entity, frame } => {
                self.inputs.insert(entity, frame);
            }
            Command::Spawn { entity, def, reply } => {
                let _ = reply.send(self.sim.spawn(entity, def));
            }
            Command::Respawn { entity, state, reply } => {
                let result = self.sim.respawn(entity, &state);
                if result.is_ok() && state.clear_history {
                    self.inputs.remove(&entity);
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { entity, reply } => {
                let _ = reply.send(self.sim.physics().get_physics_state(entity));
            }
            Command::Hash { reply } => {
                let _ = reply.send((self.sim.tick_count(), self.sim.compute_hash()));
            }
            Command::Step { ticks, reply } => {
                for _ in 0..ticks {
                    self.run_tick();
                }
                let _ = reply.send(self.sim.tick_count());
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn submit(&mut self, request: MovementRequest, reply: oneshot::Sender<MovementResponse>) {
        if let Some(id) = request.request_id() {
            if self.waiting.contains_key(&id) {
                let response = self.sim.physics().respond_unapplied(
                    request,
                    ResponseStatus::Rejected,
                    format!("duplicate request id {id}"),
                );
                let _ = reply.send(response);
                return;
            }
        }
        let id = self
            .sim
            .character_mut()
            .movement_mut()
            .submit_movement_request(request);
        self.waiting.insert(id, reply);
    }

    fn run_tick(&mut self) {
        let result = self.sim.tick(&self.inputs);

        for response in result.responses {
            let waiter = response
                .request
                .request_id()
                .and_then(|id| self.waiting.remove(&id));
            match waiter {
                Some(reply) => {
                    if reply.send(response).is_err() {
                        debug!(tick = result.tick, "caller stopped waiting for response");
                    }
                }
                None => {
                    if response.status == ResponseStatus::Failed {
                        warn!(entity = %response.entity(), tick = result.tick, "unrouted failed response");
                    }
                }
            }
        }

        for event in result.events {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}
