//! Priority request queue.
//!
//! Three lanes (high, normal, low) feed a fixed worker pool. Two rules keep
//! dispatch fair:
//!
//! - **Weighted round-robin across lanes.** Each cycle grants `weights.high`
//!   dispatches to the high lane, `weights.normal` to normal and
//!   `weights.low` to low. A lane with no eligible work forfeits its turn.
//!   With the default 4/2/1 weights, a waiting low-priority request is
//!   dispatched within 7 dispatches.
//! - **Per-workspace cap and rotation within a lane.** A workspace may hold
//!   at most `ceil(workers * workspace_fraction)` in-flight slots; requests
//!   beyond that wait even if workers are idle. Inside a lane, workspaces are
//!   served in rotation, while each workspace's own requests keep arrival order.
//!
//! Enqueue fails with [`Rejected`] above `max_depth` instead of growing without bound.

mod request;

pub use request::Request;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::{LaneWeights, QueueConfig};
use crate::error::HeraldError;
use crate::routing::Priority;

// ============================================================================
// Public types
// ============================================================================

/// Receipt for an admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub id: u64,
    pub trace_id: String,
    pub priority: Priority,
    /// Requests ahead of this one in its lane at admission time.
    pub position: usize,
}

/// Why a request was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    QueueFull,
    Closed,
}

/// A request the queue refused. The request is handed back so the caller
/// can tell the user.
#[derive(Debug)]
pub struct Rejected {
    pub request: Request,
    pub reason: RejectReason,
    pub depth: usize,
    pub threshold: usize,
}

impl From<Rejected> for HeraldError {
    fn from(r: Rejected) -> Self {
        HeraldError::AdmissionRejected {
            depth: r.depth,
            threshold: r.threshold,
        }
    }
}

/// A request handed to a worker.
#[derive(Debug)]
pub struct Dispatched {
    pub ticket_id: u64,
    pub priority: Priority,
    pub request: Request,
    /// Time spent queued.
    pub waited: Duration,
}

/// Queued requests per lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LaneDepths {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

impl LaneDepths {
    pub fn total(&self) -> usize {
        self.high + self.normal + self.low
    }
}

/// Wait statistics for one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LaneWait {
    pub dispatched: u64,
    pub avg_wait_ms: f64,
    pub max_wait_ms: u64,
}

/// Snapshot of queue counters, used for admission decisions and health checks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueMetrics {
    pub queue_size: usize,
    pub depths: LaneDepths,
    pub in_flight: usize,
    pub admitted_count: u64,
    pub rejected_count: u64,
    pub wait_high: LaneWait,
    pub wait_normal: LaneWait,
    pub wait_low: LaneWait,
    pub busy: bool,
    pub closed: bool,
}

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug)]
struct Queued {
    ticket_id: u64,
    request: Request,
    enqueued_at: Instant,
}

/// One priority lane: per-workspace FIFOs served in rotation.
#[derive(Debug, Default)]
struct Lane {
    ring: VecDeque<String>,
    per_workspace: HashMap<String, VecDeque<Queued>>,
    len: usize,
}

impl Lane {
    fn push(&mut self, item: Queued) {
        let ws = item.request.workspace_id.clone();
        let fifo = self.per_workspace.entry(ws.clone()).or_default();
        if fifo.is_empty() {
            self.ring.push_back(ws);
        }
        fifo.push_back(item);
        self.len += 1;
    }

    fn has_eligible(&self, in_flight: &HashMap<String, usize>, cap: usize) -> bool {
        self.ring.iter().any(|ws| under_cap(in_flight, ws, cap))
    }

    fn pop_eligible(&mut self, in_flight: &HashMap<String, usize>, cap: usize) -> Option<Queued> {
        let pos = self.ring.iter().position(|ws| under_cap(in_flight, ws, cap))?;
        let ws = self.ring.remove(pos)?;
        let fifo = self.per_workspace.get_mut(&ws)?;
        let item = fifo.pop_front()?;
        if fifo.is_empty() {
            self.per_workspace.remove(&ws);
        } else {
            self.ring.push_back(ws);
        }
        self.len -= 1;
        Some(item)
    }

    fn drain(&mut self) -> Vec<Request> {
        self.ring.clear();
        self.len = 0;
        self.per_workspace
            .drain()
            .flat_map(|(_, fifo)| fifo.into_iter().map(|q| q.request))
            .collect()
    }
}

fn under_cap(in_flight: &HashMap<String, usize>, ws: &str, cap: usize) -> bool {
    in_flight.get(ws).copied().unwrap_or(0) < cap
}

#[derive(Debug, Default)]
struct WaitStats {
    dispatched: u64,
    total: Duration,
    max: Duration,
}

impl WaitStats {
    fn record(&mut self, waited: Duration) {
        self.dispatched += 1;
        self.total += waited;
        self.max = self.max.max(waited);
    }

    fn snapshot(&self) -> LaneWait {
        LaneWait {
            dispatched: self.dispatched,
            avg_wait_ms: if self.dispatched == 0 {
                0.0
            } else {
                self.total.as_secs_f64() * 1000.0 / self.dispatched as f64
            },
            max_wait_ms: self.max.as_millis() as u64,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    lanes: [Lane; 3],
    credits: [u32; 3],
    in_flight: HashMap<String, usize>,
    in_flight_total: usize,
    next_ticket: u64,
    admitted: u64,
    rejected: u64,
    waits: [WaitStats; 3],
    closed: bool,
}

impl QueueState {
    fn depth(&self) -> usize {
        self.lanes.iter().map(|l| l.len).sum()
    }

    /// Pick the next lane under weighted round-robin, or `None` if no lane
    /// has a request whose workspace is under its cap.
    fn select_lane(&mut self, weights: &LaneWeights, cap: usize) -> Option<usize> {
        let eligible: Vec<bool> = self
            .lanes
            .iter()
            .map(|lane| lane.has_eligible(&self.in_flight, cap))
            .collect();
        if !eligible.iter().any(|e| *e) {
            return None;
        }

        let credited = |credits: &[u32; 3]| (0..3).find(|&i| credits[i] > 0 && eligible[i]);

        let lane = match credited(&self.credits) {
            Some(lane) => lane,
            None => {
                // Cycle over: every lane with eligible work is out of credit.
                self.credits = [weights.high, weights.normal, weights.low];
                match credited(&self.credits) {
                    Some(lane) => lane,
                    // All eligible lanes have zero weight; serve them anyway.
                    None => eligible.iter().position(|e| *e)?,
                }
            }
        };
        self.credits[lane] = self.credits[lane].saturating_sub(1);
        Some(lane)
    }

    fn depths(&self) -> LaneDepths {
        LaneDepths {
            high: self.lanes[0].len,
            normal: self.lanes[1].len,
            low: self.lanes[2].len,
        }
    }
}

// ============================================================================
// RequestQueue
// ============================================================================

/// Admission control and fair dispatch for the worker pool.
pub struct RequestQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    weights: LaneWeights,
    workers: usize,
    workspace_cap: usize,
    max_depth: usize,
    busy_depth: usize,
}

impl RequestQueue {
    pub fn new(config: &QueueConfig) -> Self {
        let weights = config.weights;
        let state = QueueState {
            credits: [weights.high, weights.normal, weights.low],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
            notify: Notify::new(),
            weights,
            workers: config.workers.max(1),
            workspace_cap: config.workspace_slot_cap(),
            max_depth: config.max_depth,
            busy_depth: config.busy_depth,
        }
    }

    /// Most in-flight slots one workspace may hold.
    pub fn workspace_cap(&self) -> usize {
        self.workspace_cap
    }

    /// Admit a request into the lane for `priority`.
    pub fn enqueue(&self, request: Request, priority: Priority) -> Result<Ticket, Rejected> {
        let mut state = self.state.lock().unwrap();
        let depth = state.depth();

        if state.closed || depth >= self.max_depth {
            state.rejected += 1;
            let reason = if state.closed {
                RejectReason::Closed
            } else {
                RejectReason::QueueFull
            };
            warn!(
                workspace = %request.workspace_id,
                trace_id = %request.trace_id,
                depth = depth,
                threshold = self.max_depth,
                reason = ?reason,
                "Request rejected"
            );
            return Err(Rejected {
                request,
                reason,
                depth,
                threshold: self.max_depth,
            });
        }

        state.next_ticket += 1;
        state.admitted += 1;
        let id = state.next_ticket;
        let lane = &mut state.lanes[priority.index()];
        let ticket = Ticket {
            id,
            trace_id: request.trace_id.clone(),
            priority,
            position: lane.len,
        };
        debug!(
            ticket = id,
            trace_id = %request.trace_id,
            workspace = %request.workspace_id,
            priority = %priority,
            position = ticket.position,
            "Request admitted"
        );
        lane.push(Queued {
            ticket_id: id,
            request,
            enqueued_at: Instant::now(),
        });
        drop(state);

        self.notify.notify_waiters();
        Ok(ticket)
    }

    /// Dispatch the next request if one is eligible, without waiting.
    pub fn try_dequeue(&self) -> Option<Dispatched> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return None;
        }
        let lane = state.select_lane(&self.weights, self.workspace_cap)?;

        let QueueState {
            lanes, in_flight, ..
        } = &mut *state;
        let item = lanes[lane].pop_eligible(in_flight, self.workspace_cap)?;

        *state
            .in_flight
            .entry(item.request.workspace_id.clone())
            .or_insert(0) += 1;
        state.in_flight_total += 1;

        let waited = item.enqueued_at.elapsed();
        state.waits[lane].record(waited);

        let priority = Priority::all()[lane];
        debug!(
            ticket = item.ticket_id,
            trace_id = %item.request.trace_id,
            priority = %priority,
            waited_ms = waited.as_millis() as u64,
            "Request dispatched"
        );
        Some(Dispatched {
            ticket_id: item.ticket_id,
            priority,
            request: item.request,
            waited,
        })
    }

    /// Wait for the next eligible request. Returns `None` once the queue is closed.
    pub async fn dequeue_next(&self) -> Option<Dispatched> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(dispatched) = self.try_dequeue() {
                return Some(dispatched);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Release the worker slot held by a dispatched request.
    pub fn complete(&self, workspace_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(count) = state.in_flight.get_mut(workspace_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.in_flight.remove(workspace_id);
            }
            state.in_flight_total = state.in_flight_total.saturating_sub(1);
        }
        drop(state);
        // A capped workspace may have become eligible again.
        self.notify.notify_waiters();
    }

    /// Stop admitting and dispatching. Returns requests still queued so the
    /// caller can tell their senders.
    pub fn close(&self) -> Vec<Request> {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        let drained: Vec<Request> = state.lanes.iter_mut().flat_map(|l| l.drain()).collect();
        drop(state);
        if !drained.is_empty() {
            info!(count = drained.len(), "Queue closed with pending requests");
        }
        self.notify.notify_waiters();
        drained
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Backpressure signal: the backlog reached `busy_depth`, or every worker is occupied.
    pub fn is_busy(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.depth() >= self.busy_depth || state.in_flight_total >= self.workers
    }

    /// Current queued requests per lane.
    pub fn lane_depths(&self) -> LaneDepths {
        self.state.lock().unwrap().depths()
    }

    /// In-flight requests for one workspace.
    pub fn in_flight(&self, workspace_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .in_flight
            .get(workspace_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> QueueMetrics {
        let state = self.state.lock().unwrap();
        let depths = state.depths();
        QueueMetrics {
            queue_size: depths.total(),
            depths,
            in_flight: state.in_flight_total,
            admitted_count: state.admitted,
            rejected_count: state.rejected,
            wait_high: state.waits[0].snapshot(),
            wait_normal: state.waits[1].snapshot(),
            wait_low: state.waits[2].snapshot(),
            busy: depths.total() >= self.busy_depth || state.in_flight_total >= self.workers,
            closed: state.closed,
        }
    }
}
