//! Movement Coordinator
//!
//! Front door for every non-physics system that wants something to move.
//! Validates and correlates requests, detects rapid-input bursts, resolves
//! same-tick conflicts, forwards winners to the physics coordinator and
//! retries failures at reduced strength.
//!
//! All outcomes, including immediate rejections, come back as
//! `MovementResponse`s from `process_tick` (or `take_responses`), matched to
//! submissions by `RequestId`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, warn};

use crate::config::MovementConfig;
use crate::core::time::{Seconds, TIME_EPSILON};
use crate::physics::coordinator::{PhysicsCoordination, PhysicsCoordinator};
use crate::physics::notifier::CollisionNotification;
use crate::protocol::ids::{EntityId, RequestId};
use crate::protocol::request::{MovementKind, MovementRequest};
use crate::protocol::response::{MovementResponse, ResponseStatus};

const CHANNEL_HORIZONTAL: u8 = 0b01;
const CHANNEL_VERTICAL: u8 = 0b10;

/// Motion channels a kind claims when resolving same-tick conflicts.
pub fn channels(kind: MovementKind) -> u8 {
    match kind {
        MovementKind::Walk | MovementKind::Dash => CHANNEL_HORIZONTAL,
        MovementKind::Jump => CHANNEL_VERTICAL,
        MovementKind::Stop | MovementKind::Impulse => CHANNEL_HORIZONTAL | CHANNEL_VERTICAL,
    }
}

/// Intake operations exposed to input, AI and combat systems.
pub trait MovementHandler {
    /// Submit one request; the returned id correlates the eventual response.
    fn submit_movement_request(&mut self, request: MovementRequest) -> RequestId;

    /// Submit several requests in order.
    fn submit_movement_sequence(&mut self, requests: Vec<MovementRequest>) -> Vec<RequestId>;

    /// The entity exists, is dynamic and has queue room.
    fn can_process_input(&self, entity: EntityId) -> bool;

    /// `can_process_input` plus kind-specific preconditions.
    fn can_process_movement_type(&self, entity: EntityId, kind: MovementKind) -> bool;

    /// Drop everything pending for the entity and forget its input rate.
    fn clear_input_buffer(&mut self, entity: EntityId);

    /// The entity is currently submitting faster than the rapid threshold.
    fn is_rapid_input(&self, entity: EntityId) -> bool;
}

#[derive(Clone, Debug)]
struct Pending {
    request: MovementRequest,
    seq: u64,
    rapid: bool,
    attempt: u32,
}

/// Request intake in front of the physics coordinator.
pub struct MovementCoordinator {
    config: MovementConfig,
    physics: PhysicsCoordinator,
    pending: Vec<Pending>,
    /// Attempt number of each request currently inside physics
    attempts: BTreeMap<RequestId, u32>,
    in_flight: BTreeSet<RequestId>,
    submissions: BTreeMap<EntityId, VecDeque<Seconds>>,
    /// Refused before reaching physics; answered with the state current
    /// when drained
    refused: Vec<(MovementRequest, ResponseStatus, String)>,
    outbox: Vec<MovementResponse>,
    next_request_id: u64,
    next_seq: u64,
}

impl MovementCoordinator {
    /// Wrap a physics coordinator.
    pub fn new(config: MovementConfig, physics: PhysicsCoordinator) -> Self {
        Self {
            config,
            physics,
            pending: Vec::new(),
            attempts: BTreeMap::new(),
            in_flight: BTreeSet::new(),
            submissions: BTreeMap::new(),
            refused: Vec::new(),
            outbox: Vec::new(),
            next_request_id: 1,
            next_seq: 0,
        }
    }

    /// Movement configuration.
    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    /// The physics authority (queries).
    pub fn physics(&self) -> &PhysicsCoordinator {
        &self.physics
    }

    /// The physics authority (registration, direct requests, resets).
    pub fn physics_mut(&mut self) -> &mut PhysicsCoordinator {
        &mut self.physics
    }

    /// Simulation time of the current state.
    pub fn now(&self) -> Seconds {
        self.physics.now()
    }

    /// Allocate a fresh correlation id.
    pub fn allocate_request_id(&mut self) -> RequestId {
        let id = RequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    /// Requests waiting for the next tick (including retries).
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Pending requests for one entity.
    pub fn pending_for(&self, entity: EntityId) -> usize {
        self.pending.iter().filter(|p| p.request.entity() == entity).count()
    }

    /// Responses produced since the last drain without running a tick.
    pub fn take_responses(&mut self) -> Vec<MovementResponse> {
        let mut responses: Vec<MovementResponse> = std::mem::take(&mut self.refused)
            .into_iter()
            .map(|(request, status, reason)| self.physics.respond_unapplied(request, status, reason))
            .collect();
        responses.append(&mut self.outbox);
        responses
    }

    fn reject(&mut self, request: MovementRequest, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(entity = %request.entity(), kind = %request.kind(), %reason, "movement request rejected");
        if let Some(id) = request.request_id() {
            self.in_flight.remove(&id);
            self.attempts.remove(&id);
        }
        self.refused.push((request, ResponseStatus::Rejected, reason));
    }

    /// Record a submission time; true when the rate is above threshold.
    fn record_submission(&mut self, entity: EntityId, now: Seconds) -> bool {
        let window = self.config.rapid_input_window;
        let limit = (self.config.rapid_input_threshold_hz as f64 * window).floor() as usize;
        let times = self.submissions.entry(entity).or_default();
        times.push_back(now);
        while times.front().is_some_and(|&t| now - t > window - TIME_EPSILON) {
            times.pop_front();
        }
        times.len() > limit
    }

    fn enqueue(&mut self, request: MovementRequest, rapid: bool, attempt: u32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending {
            request,
            seq,
            rapid,
            attempt,
        });
    }

    /// Run one tick: resolve conflicts, forward winners, step physics,
    /// schedule retries. Returns every response finished this tick.
    pub fn process_tick(&mut self) -> Vec<MovementResponse> {
        let mut batch = std::mem::take(&mut self.pending);
        batch.sort_by(|a, b| {
            b.request
                .priority()
                .cmp(&a.request.priority())
                .then_with(|| a.request.created_at().total_cmp(&b.request.created_at()))
                .then_with(|| a.seq.cmp(&b.seq))
        });

        let mut claimed: BTreeMap<EntityId, (u8, MovementKind)> = BTreeMap::new();
        for pending in batch {
            let entity = pending.request.entity();
            let wanted = channels(pending.request.kind());
            if let Some(&(taken, winner)) = claimed.get(&entity) {
                if taken & wanted != 0 {
                    self.reject(pending.request, format!("superseded by {winner} this tick"));
                    continue;
                }
            }
            let entry = claimed.entry(entity).or_insert((0, pending.request.kind()));
            entry.0 |= wanted;

            let id = pending.request.request_id();
            match self.physics.submit_request(pending.request, pending.rapid) {
                Ok(()) => {
                    if let Some(id) = id {
                        self.attempts.insert(id, pending.attempt);
                    }
                }
                Err(response) => {
                    if let Some(id) = id {
                        self.in_flight.remove(&id);
                    }
                    let reason = response.reason.unwrap_or_default();
                    self.refused.push((response.request, response.status, reason));
                }
            }
        }

        let responses = self.physics.step();
        let now = self.physics.now();
        for response in responses {
            let id = response.request.request_id();
            let attempt = id.and_then(|id| self.attempts.remove(&id)).unwrap_or(0);

            if response.status == ResponseStatus::Failed && attempt < self.config.max_retries {
                let retry = response
                    .request
                    .retry_with(self.config.fallback_speed_multiplier, now);
                debug!(
                    entity = %retry.entity(),
                    kind = %retry.kind(),
                    attempt = attempt + 1,
                    magnitude = retry.magnitude(),
                    "retrying failed movement request"
                );
                self.enqueue(retry, false, attempt + 1);
                continue;
            }
            if response.status == ResponseStatus::Failed {
                warn!(
                    entity = %response.entity(),
                    kind = %response.request.kind(),
                    attempts = attempt + 1,
                    "movement request failed after retries"
                );
            }
            if let Some(id) = id {
                self.in_flight.remove(&id);
            }
            self.outbox.push(response);
        }

        self.take_responses()
    }
}

impl MovementHandler for MovementCoordinator {
    fn submit_movement_request(&mut self, request: MovementRequest) -> RequestId {
        let (request, id) = match request.request_id() {
            Some(id) => {
                if self.in_flight.contains(&id) {
                    self.refused
                        .push((request, ResponseStatus::Rejected, format!("duplicate request id {id}")));
                    return id;
                }
                (request, id)
            }
            None => {
                let id = self.allocate_request_id();
                (request.with_request_id(id), id)
            }
        };

        let entity = request.entity();
        if let Err(err) = request.validate() {
            self.reject(request, err.to_string());
            return id;
        }
        if !self.physics.contains(entity) {
            self.reject(request, format!("unknown entity {entity}"));
            return id;
        }
        if self.pending_for(entity) >= self.config.max_queued_per_entity {
            self.reject(request, "input queue full");
            return id;
        }

        let rapid = self.record_submission(entity, self.physics.now());
        if rapid {
            debug!(entity = %entity, "rapid input detected");
        }
        self.in_flight.insert(id);
        self.enqueue(request, rapid, 0);
        id
    }

    fn submit_movement_sequence(&mut self, requests: Vec<MovementRequest>) -> Vec<RequestId> {
        requests
            .into_iter()
            .map(|request| self.submit_movement_request(request))
            .collect()
    }

    fn can_process_input(&self, entity: EntityId) -> bool {
        self.physics.is_dynamic(entity) && self.pending_for(entity) < self.config.max_queued_per_entity
    }

    fn can_process_movement_type(&self, entity: EntityId, kind: MovementKind) -> bool {
        if !self.can_process_input(entity) {
            return false;
        }
        match kind {
            MovementKind::Jump => self.physics.notifier().can_jump(entity),
            _ => true,
        }
    }

    fn clear_input_buffer(&mut self, entity: EntityId) {
        let (cleared, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.request.entity() == entity);
        self.pending = kept;
        for pending in cleared {
            self.reject(pending.request, "input buffer cleared");
        }
        self.submissions.remove(&entity);
    }

    fn is_rapid_input(&self, entity: EntityId) -> bool {
        let window = self.config.rapid_input_window;
        let limit = (self.config.rapid_input_threshold_hz as f64 * window).floor() as usize;
        let now = self.physics.now();
        self.submissions.get(&entity).is_some_and(|times| {
            times.iter().filter(|&&t| now - t <= window - TIME_EPSILON).count() > limit
        })
    }
}
