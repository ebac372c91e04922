//! Orchestrator - inbound handling and the worker pool
//!
//! ```text
//! inbound ─> fast path ──matched──> reply
//!               │
//!               └─> intent router ─> queue ──rejected──> busy notice
//!                                      │
//!                          workers <───┘
//!                            ├─ sync:       ExecutionLoop ─> result
//!                            └─ background: TaskManager + ExecutionLoop ─> ack, progress, result
//! ```
//!
//! Each worker runs at most one execution at a time. Background executions
//! run on the worker that dequeued them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::{ExecutionLoop, ExecutionOutcome, ExecutionReport, LoopControl};
use crate::bus::{Delivery, DeliveryPayload, InboundMessage, MessageBus, ThreadRef};
use crate::config::Config;
use crate::error::{HeraldError, Result};
use crate::guard::RateLimiter;
use crate::health::{start_periodic_usage_flush, HealthState, UsageMetrics};
use crate::log_component;
use crate::providers::LLMProvider;
use crate::queue::{Dispatched, RejectReason, Request, RequestQueue, Ticket};
use crate::routing::{ConversationContext, FastPathEvaluator, IntentRouter, RoutingSignals};
use crate::tasks::{Task, TaskManager, TaskOutcome, TaskProgress, TaskState, TaskStatus};
use crate::tools::ToolExecutor;

/// Sent when the queue refuses a request.
pub const BUSY_MESSAGE: &str =
    "I'm at capacity right now and couldn't take this request. Please send it again in a minute.";

/// Sent when shutdown drains a queued request.
pub const SHUTDOWN_MESSAGE: &str =
    "I'm restarting and dropped your queued request. Please send it again shortly.";

/// Sent when an execution hits its deadline with nothing gathered.
pub const TIMEOUT_MESSAGE: &str =
    "This took longer than I'm allowed to spend on one request. Try narrowing it down (fewer items, a shorter time range) and ask again.";

/// Sent when a background task could not be set up for a reason other than
/// the per-workspace limit.
pub const TASK_FAILED_MESSAGE: &str =
    "I couldn't start this request in the background. Please try again in a moment.";

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Answered immediately without queueing.
    FastPath { reply: String },
    /// Admitted; a worker will pick it up.
    Queued { ticket: Ticket },
    /// Not admitted; the user was told to resend.
    Busy { message: String },
}

/// Ties routing, admission, execution and delivery together.
pub struct Orchestrator {
    fast_path: FastPathEvaluator,
    router: IntentRouter,
    queue: Arc<RequestQueue>,
    limiter: Arc<RateLimiter>,
    tasks: Arc<TaskManager>,
    executor: ExecutionLoop,
    delivery: Arc<dyn Delivery>,
    metrics: Arc<UsageMetrics>,
    workers: usize,
    sync_timeout: Duration,
    gc_interval: Duration,
}

impl Orchestrator {
    /// Build every component from config.
    ///
    /// # Arguments
    /// * `config` - Effective configuration
    /// * `provider` - Model gateway
    /// * `tools` - Tool executor
    /// * `delivery` - Where replies, progress and busy notices go
    pub fn new(
        config: &Config,
        provider: Arc<dyn LLMProvider>,
        tools: Arc<dyn ToolExecutor>,
        delivery: Arc<dyn Delivery>,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let executor = ExecutionLoop::new(
            provider,
            tools,
            Arc::clone(&limiter),
            config.models.clone(),
            config.agent.clone(),
        );
        Self {
            fast_path: FastPathEvaluator::new(config.routing.fast_path_max_len),
            router: IntentRouter::new(config.routing.frontier_length_threshold),
            queue: Arc::new(RequestQueue::new(&config.queue)),
            limiter,
            tasks: Arc::new(TaskManager::new(&config.tasks)),
            executor,
            delivery,
            metrics: Arc::new(UsageMetrics::new()),
            workers: config.queue.workers,
            sync_timeout: Duration::from_secs(config.tasks.timeout_secs),
            gc_interval: Duration::from_secs(config.tasks.gc_interval_secs),
        }
    }

    /// Replace the task manager (e.g. one with a short deadline).
    pub fn with_task_manager(mut self, tasks: TaskManager) -> Self {
        self.tasks = Arc::new(tasks);
        self
    }

    /// Deadline for synchronous executions.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.tasks
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn metrics(&self) -> &Arc<UsageMetrics> {
        &self.metrics
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::new(
            Arc::clone(&self.metrics),
            Arc::clone(&self.queue),
            Arc::clone(&self.tasks),
        )
    }

    // ------------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------------

    /// Route one inbound message: fast path, or classify and enqueue.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> InboundOutcome {
        self.metrics.record_request();

        let ctx = ConversationContext {
            in_active_thread: msg.in_active_thread,
            active_tasks: self.tasks.active_count(&msg.workspace_id),
        };
        let fast = self.fast_path.evaluate(&msg.text, &ctx);
        if let (true, Some(reply)) = (fast.matched, fast.reply) {
            self.metrics.record_fast_path();
            log_component!(debug, "orchestrator", "Fast path reply", workspace = msg.workspace_id.as_str());
            self.send_result(&msg.workspace_id, &msg.thread_ref, &reply).await;
            return InboundOutcome::FastPath { reply };
        }

        let signals = RoutingSignals {
            fast_path_matched: false,
            in_active_thread: msg.in_active_thread,
        };
        let classification = self.router.classify(&msg.text, &signals);
        let request = Request::from_inbound(&msg, classification);
        log_component!(
            info,
            "orchestrator",
            "Request classified",
            trace_id = request.trace_id.as_str(),
            workspace = request.workspace_id.as_str(),
            tier = classification.tier.as_str(),
            priority = classification.priority.as_str(),
            background = classification.is_background()
        );

        match self.queue.enqueue(request, classification.priority) {
            Ok(ticket) => {
                if self.queue.is_busy() {
                    let notice = format!(
                        "I'm handling a lot of requests right now. Yours is queued ({} ahead of it) and I'll reply here when it's done.",
                        ticket.position
                    );
                    self.send_progress(&msg.workspace_id, &msg.thread_ref, &notice)
                        .await;
                }
                InboundOutcome::Queued { ticket }
            }
            Err(rejected) => {
                self.metrics.record_rejection();
                let message = match rejected.reason {
                    RejectReason::QueueFull => BUSY_MESSAGE,
                    RejectReason::Closed => SHUTDOWN_MESSAGE,
                };
                warn!(
                    trace_id = %rejected.request.trace_id,
                    depth = rejected.depth,
                    threshold = rejected.threshold,
                    "Request not admitted"
                );
                self.send_busy(&msg.workspace_id, &msg.thread_ref, message)
                    .await;
                InboundOutcome::Busy {
                    message: message.to_string(),
                }
            }
        }
    }

    /// Feed messages from the bus until it closes or shutdown is signalled.
    pub async fn run_bus(&self, bus: Arc<MessageBus>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                msg = bus.consume_inbound() => match msg {
                    Some(msg) => {
                        self.handle_inbound(msg).await;
                    }
                    None => {
                        info!("Inbound channel closed");
                        break;
                    }
                },
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Workers
    // ------------------------------------------------------------------------

    /// Start `count` workers. They exit once the queue is closed.
    pub fn spawn_workers(self: &Arc<Self>, count: usize) -> Vec<JoinHandle<()>> {
        self.metrics.set_ready(true);
        info!(workers = count, "Starting worker pool");
        (0..count)
            .map(|worker_id| {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.worker_loop(worker_id).await })
            })
            .collect()
    }

    /// Start task GC and the periodic usage summary.
    pub fn spawn_background_services(
        self: &Arc<Self>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        vec![
            Arc::clone(&self.tasks).spawn_gc(self.gc_interval, shutdown_rx.clone()),
            start_periodic_usage_flush(Arc::clone(&self.metrics), shutdown_rx),
        ]
    }

    async fn worker_loop(&self, worker_id: usize) {
        debug!(worker_id, "Worker started");
        while let Some(dispatched) = self.queue.dequeue_next().await {
            let workspace_id = dispatched.request.workspace_id.clone();
            self.process(dispatched).await;
            self.queue.complete(&workspace_id);
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Run one dispatched request to delivery.
    pub async fn process(&self, dispatched: Dispatched) {
        let Dispatched {
            request,
            priority,
            waited,
            ..
        } = dispatched;
        let span = info_span!(
            "request",
            trace_id = %request.trace_id,
            workspace = %request.workspace_id
        );
        async {
            info!(
                priority = %priority,
                waited_ms = waited.as_millis() as u64,
                "Dispatched"
            );
            if request.is_background() {
                self.run_background(&request).await;
            } else {
                self.run_sync(&request).await;
            }
        }
        .instrument(span)
        .await
    }

    async fn run_sync(&self, request: &Request) {
        let control = LoopControl::new().with_deadline(Instant::now() + self.sync_timeout);
        let report = self.executor.run(request, &control).await;
        self.record(&report);
        self.send_user_visible(request, &report).await;
        if let Some(text) = final_text(&report.outcome) {
            self.send_result(&request.workspace_id, &request.thread_ref, &text)
                .await;
        }
    }

    async fn run_background(&self, request: &Request) {
        let task_id = match self.tasks.create(
            &request.workspace_id,
            &request.thread_ref,
            &request.trace_id,
        ) {
            Ok(id) => id,
            Err(e) => {
                match create_refusal(&e) {
                    CreateRefusal::Busy(message) => {
                        self.metrics.record_rejection();
                        self.send_busy(&request.workspace_id, &request.thread_ref, &message)
                            .await;
                    }
                    CreateRefusal::Failed(message) => {
                        warn!(error = %e, "Task creation failed");
                        self.metrics.record_error();
                        self.send_result(&request.workspace_id, &request.thread_ref, message)
                            .await;
                    }
                }
                return;
            }
        };

        let ack = format!(
            "On it. This will take a while, so I'm working on it in the background (task {}). Ask for its status any time.",
            task_id
        );
        self.send_progress(&request.workspace_id, &request.thread_ref, &ack)
            .await;

        let handle = match self.tasks.start(&task_id) {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!(task_id = %task_id, "Task cancelled before it started");
                return;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Task start failed");
                return;
            }
        };

        let control = LoopControl::new()
            .with_cancel(handle.cancel)
            .with_deadline(handle.deadline)
            .with_progress(Arc::new(TaskProgress::new(Arc::clone(&self.tasks), &task_id)));
        let report = self.executor.run(request, &control).await;
        self.record(&report);

        let text = final_text(&report.outcome);
        let outcome: TaskOutcome = report.outcome.clone().into();
        let expected = outcome.target_state();
        match self.tasks.finish(&task_id, outcome) {
            Ok(state) if state == expected => {
                self.send_user_visible(request, &report).await;
                if let Some(text) = text {
                    self.send_result(&request.workspace_id, &request.thread_ref, &text)
                        .await;
                }
            }
            Ok(TaskState::TimedOut) => {
                self.send_result(&request.workspace_id, &request.thread_ref, TIMEOUT_MESSAGE)
                    .await;
            }
            Ok(state) => {
                debug!(task_id = %task_id, state = %state, "Result discarded");
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "Task finish failed"),
        }
    }

    fn record(&self, report: &ExecutionReport) {
        self.metrics.record_tool_calls(u64::from(report.tool_calls));
        self.metrics
            .record_tokens(report.prompt_tokens, report.completion_tokens);
        if !report.outcome.is_success() && report.outcome != ExecutionOutcome::Cancelled {
            self.metrics.record_error();
        }
    }

    // ------------------------------------------------------------------------
    // Task queries
    // ------------------------------------------------------------------------

    pub fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        self.tasks.get_status(task_id)
    }

    pub fn cancel_task(&self, task_id: &str) -> Result<TaskState> {
        self.tasks.cancel(task_id)
    }

    pub fn active_tasks(&self, workspace_id: &str) -> Vec<Task> {
        self.tasks.active_tasks(workspace_id)
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop admitting work and tell everyone still queued to resend.
    ///
    /// Running executions finish; workers exit once idle.
    pub async fn shutdown(&self) -> usize {
        self.metrics.set_ready(false);
        let drained = self.queue.close();
        info!(drained = drained.len(), "Queue closed");
        for request in &drained {
            self.send_busy(&request.workspace_id, &request.thread_ref, SHUTDOWN_MESSAGE)
                .await;
        }
        drained.len()
    }

    // ------------------------------------------------------------------------
    // Delivery helpers: failures are logged, never propagated
    // ------------------------------------------------------------------------

    async fn send_result(&self, workspace_id: &str, thread: &ThreadRef, text: &str) {
        if let Err(e) = self
            .delivery
            .deliver_result(workspace_id, thread, DeliveryPayload::text(text))
            .await
        {
            self.delivery_failed("result", e);
        }
    }

    async fn send_progress(&self, workspace_id: &str, thread: &ThreadRef, text: &str) {
        if let Err(e) = self
            .delivery
            .deliver_progress(workspace_id, thread, text)
            .await
        {
            self.delivery_failed("progress", e);
        }
    }

    async fn send_busy(&self, workspace_id: &str, thread: &ThreadRef, text: &str) {
        if let Err(e) = self.delivery.deliver_busy(workspace_id, thread, text).await {
            self.delivery_failed("busy", e);
        }
    }

    async fn send_user_visible(&self, request: &Request, report: &ExecutionReport) {
        for text in &report.user_visible {
            self.send_progress(&request.workspace_id, &request.thread_ref, text)
                .await;
        }
    }

    fn delivery_failed(&self, kind: &str, error: HeraldError) {
        self.metrics.record_error();
        warn!(kind, error = %error, "Delivery failed");
    }
}

/// Reply for a background request whose task was not created.
#[derive(Debug, PartialEq, Eq)]
enum CreateRefusal {
    /// The workspace is at its task limit; resend later.
    Busy(String),
    Failed(&'static str),
}

fn create_refusal(err: &HeraldError) -> CreateRefusal {
    match err {
        HeraldError::TaskLimit { limit, .. } => CreateRefusal::Busy(format!(
            "You already have {} background tasks running. Send this again once one of them finishes.",
            limit
        )),
        _ => CreateRefusal::Failed(TASK_FAILED_MESSAGE),
    }
}

/// Text delivered for an outcome. Cancelled executions deliver nothing.
fn final_text(outcome: &ExecutionOutcome) -> Option<String> {
    match outcome {
        ExecutionOutcome::Cancelled => None,
        ExecutionOutcome::TimedOut { partial: None } => Some(TIMEOUT_MESSAGE.to_string()),
        other => other.user_text().map(str::to_string),
    }
}
