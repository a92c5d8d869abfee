//! Pending Request Queue
//!
//! Max-heap ordered by priority (highest first), then creation time
//! (earliest first), then submission sequence. Draining it yields the
//! processing order for one step.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::protocol::ids::EntityId;
use crate::protocol::request::{MovementRequest, Priority};

/// A request waiting for the next step.
#[derive(Clone, Debug)]
pub struct QueuedRequest {
    /// The request
    pub request: MovementRequest,
    /// Submission sequence number
    pub seq: u64,
    /// Part of a rapid-input burst; clear accumulated forces first
    pub rapid: bool,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // "Greater" pops first: higher priority, then earlier, then lower seq
        self.request
            .priority()
            .cmp(&other.request.priority())
            .then_with(|| other.request.created_at().total_cmp(&self.request.created_at()))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Priority queue of pending movement requests.
#[derive(Debug, Default)]
pub struct RequestQueue {
    heap: BinaryHeap<QueuedRequest>,
    next_seq: u64,
}

impl RequestQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request; returns its sequence number.
    pub fn push(&mut self, request: MovementRequest, rapid: bool) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedRequest { request, seq, rapid });
        seq
    }

    /// Remove and return everything in processing order.
    pub fn drain_ordered(&mut self) -> Vec<QueuedRequest> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(item) = self.heap.pop() {
            out.push(item);
        }
        out
    }

    /// Remove queued requests for `entity` with priority below `priority`.
    pub fn supersede(&mut self, entity: EntityId, priority: Priority) -> Vec<QueuedRequest> {
        self.remove_where(|q| q.request.entity() == entity && q.request.priority() < priority)
    }

    /// Remove every queued request for `entity`.
    pub fn remove_entity(&mut self, entity: EntityId) -> Vec<QueuedRequest> {
        self.remove_where(|q| q.request.entity() == entity)
    }

    fn remove_where<F>(&mut self, predicate: F) -> Vec<QueuedRequest>
    where
        F: Fn(&QueuedRequest) -> bool,
    {
        let (mut removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.heap).into_iter().partition(|q| predicate(q));
        self.heap = kept.into();
        removed.sort_by(|a, b| b.cmp(a));
        removed
    }

    /// Requests queued for `entity`.
    pub fn pending_for(&self, entity: EntityId) -> usize {
        self.heap.iter().filter(|q| q.request.entity() == entity).count()
    }

    /// Total queued.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Nothing queued.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
