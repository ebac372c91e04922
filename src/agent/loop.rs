//! Agent execution loop
//!
//! Drives one request through the multi-turn tool-calling state machine:
//!
//! ```text
//! AWAITING_MODEL ──text──> RESPONDED_WITH_TEXT (done)
//!       ^   │
//!       │   └─tool calls─> RESPONDED_WITH_TOOL_CALLS ──> EXECUTING_TOOLS
//!       └──────────────────────────────────────────────────────┘
//! ```
//!
//! The loop never returns an error. Every failure is turned into a recovery
//! step (trim, retry, tier switch) or a terminal [`ExecutionOutcome`].
//!
//! Cancellation and the deadline are observed at suspension points: before
//! and during a model call, during a backoff sleep, while waiting on a tool's
//! rate-limit bucket, and between tool calls. A tool call that has started
//! always runs to completion. A passed deadline wins over cancellation so a
//! timed-out run keeps its partial result.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{AgentConfig, ModelsConfig};
use crate::error::{FailureKind, HeraldError, Result};
use crate::guard::{BucketKey, MutationDeduper, RateLimiter, RepeatDetector, RepeatVerdict, REPEAT_CORRECTION};
use crate::providers::{ChatOptions, LLMProvider, LLMResponse, LLMToolCall, ToolDefinition};
use crate::queue::Request;
use crate::routing::ModelTier;
use crate::tasks::TaskOutcome;
use crate::tools::{ToolContext, ToolExecutor};

use super::recovery::{RecoveryAction, RecoveryLadder};
use super::transcript::{Message, ToolCall, Transcript};
use super::ProgressSink;

/// Opening line of every partial delivery.
pub const PARTIAL_PREFIX: &str =
    "I couldn't finish this completely. Here is what I gathered before stopping:";

/// Tool outputs quoted in a partial delivery.
const PARTIAL_MAX_OUTPUTS: usize = 3;
/// Characters kept from each quoted tool output.
const PARTIAL_MAX_CHARS: usize = 800;

// ============================================================================
// Turn states and outcomes
// ============================================================================

/// Per-turn state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    AwaitingModel,
    RespondedWithText,
    RespondedWithToolCalls,
    ExecutingTools,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::AwaitingModel => "AWAITING_MODEL",
            TurnState::RespondedWithText => "MODEL_RESPONDED_WITH_TEXT",
            TurnState::RespondedWithToolCalls => "MODEL_RESPONDED_WITH_TOOL_CALLS",
            TurnState::ExecutingTools => "EXECUTING_TOOLS",
        };
        f.write_str(s)
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The model answered in plain text.
    Completed { text: String },
    /// Recovery ran out; `text` is framed as incomplete.
    Partial { text: String },
    /// Nothing to deliver. `message` carries a concrete next step.
    Failed { message: String },
    Cancelled,
    TimedOut { partial: Option<String> },
}

impl ExecutionOutcome {
    /// Text to show the user, if this outcome delivers anything.
    pub fn user_text(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::Completed { text } | ExecutionOutcome::Partial { text } => Some(text),
            ExecutionOutcome::Failed { message } => Some(message),
            ExecutionOutcome::TimedOut { partial } => partial.as_deref(),
            ExecutionOutcome::Cancelled => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Completed { .. } => "completed",
            ExecutionOutcome::Partial { .. } => "partial",
            ExecutionOutcome::Failed { .. } => "failed",
            ExecutionOutcome::Cancelled => "cancelled",
            ExecutionOutcome::TimedOut { .. } => "timed_out",
        }
    }
}

impl From<ExecutionOutcome> for TaskOutcome {
    fn from(outcome: ExecutionOutcome) -> Self {
        match outcome {
            ExecutionOutcome::Completed { text } => TaskOutcome::Success(text),
            ExecutionOutcome::Partial { text } => TaskOutcome::Partial(text),
            ExecutionOutcome::Failed { message } => TaskOutcome::Failed(message),
            ExecutionOutcome::Cancelled => TaskOutcome::Cancelled,
            ExecutionOutcome::TimedOut { partial } => TaskOutcome::TimedOut(partial),
        }
    }
}

/// Outcome plus the bookkeeping the orchestrator records.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    /// Model calls made, retries included.
    pub turns: u32,
    /// Tool calls that reached the tool layer.
    pub tool_calls: u32,
    pub final_tier: ModelTier,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// `for_user` text produced by tools, in call order.
    pub user_visible: Vec<String>,
}

// ============================================================================
// Loop control: cancellation, deadline, progress
// ============================================================================

/// Why a suspension point gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

/// External controls for one execution.
#[derive(Clone, Default)]
pub struct LoopControl {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl LoopControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop at the next suspension point once the channel reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Non-blocking check at a suspension point.
    pub fn check(&self) -> Option<Interrupt> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(Interrupt::TimedOut);
        }
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(Interrupt::Cancelled);
        }
        None
    }

    pub fn report(&self, text: &str) {
        if let Some(progress) = &self.progress {
            progress.report(text);
        }
    }

    /// Run `fut` unless cancellation or the deadline arrives first. The
    /// future is dropped when interrupted, so only use this around work
    /// without side effects.
    pub async fn guard<F: Future>(&self, fut: F) -> std::result::Result<F::Output, Interrupt> {
        if let Some(interrupt) = self.check() {
            return Err(interrupt);
        }
        let deadline = self.deadline;
        tokio::select! {
            biased;
            _ = wait_deadline(deadline) => Err(Interrupt::TimedOut),
            _ = wait_cancelled(self.cancel.clone()) => Err(Interrupt::Cancelled),
            out = fut => Ok(out),
        }
    }
}

async fn wait_cancelled(cancel: Option<watch::Receiver<bool>>) {
    let Some(mut rx) = cancel else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: cancellation can no longer arrive.
            return std::future::pending().await;
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d)).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// ExecutionLoop
// ============================================================================

/// Runs requests against a model provider and a tool executor.
///
/// Shared by every worker; all per-request state lives inside [`run`](Self::run).
pub struct ExecutionLoop {
    provider: Arc<dyn LLMProvider>,
    tools: Arc<dyn ToolExecutor>,
    limiter: Arc<RateLimiter>,
    deduper: Arc<MutationDeduper>,
    models: ModelsConfig,
    config: AgentConfig,
}

/// Mutable state of one execution.
struct Run<'a> {
    request: &'a Request,
    control: &'a LoopControl,
    ctx: ToolContext,
    transcript: Transcript,
    tier: ModelTier,
    turns: u32,
    tool_calls: u32,
    prompt_tokens: u64,
    completion_tokens: u64,
    gathered: Vec<String>,
    user_visible: Vec<String>,
    repeats: RepeatDetector,
    ladder: RecoveryLadder,
    context_escalated: bool,
}

enum Step {
    Continue,
    Done(ExecutionOutcome),
    Failed(HeraldError),
}

impl ExecutionLoop {
    /// Create a loop with its own mutation deduper.
    ///
    /// # Arguments
    /// * `provider` - Model gateway
    /// * `tools` - Tool executor
    /// * `limiter` - Shared token buckets
    /// * `models` - Tier to model id mapping
    /// * `config` - Turn budget, retries and guard limits
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        tools: Arc<dyn ToolExecutor>,
        limiter: Arc<RateLimiter>,
        models: ModelsConfig,
        config: AgentConfig,
    ) -> Self {
        let deduper = Arc::new(MutationDeduper::new(Duration::from_millis(
            config.dedup_window_ms,
        )));
        Self {
            provider,
            tools,
            limiter,
            deduper,
            models,
            config,
        }
    }

    /// Share a deduper across loops.
    pub fn with_deduper(mut self, deduper: Arc<MutationDeduper>) -> Self {
        self.deduper = deduper;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Execute one request to a terminal outcome.
    pub async fn run(&self, request: &Request, control: &LoopControl) -> ExecutionReport {
        let span = info_span!(
            "execution",
            trace_id = %request.trace_id,
            workspace = %request.workspace_id
        );
        async move {
            let started = Instant::now();
            let mut run = Run {
                request,
                control,
                ctx: ToolContext::new()
                    .with_workspace(&request.workspace_id)
                    .with_channel(
                        &request.thread_ref.channel,
                        request.thread_ref.thread_ts.as_deref(),
                    )
                    .with_trace_id(&request.trace_id),
                transcript: Transcript::new(&self.config.system_prompt, &request.text),
                tier: request.classification.tier,
                turns: 0,
                tool_calls: 0,
                prompt_tokens: 0,
                completion_tokens: 0,
                gathered: Vec::new(),
                user_visible: Vec::new(),
                repeats: RepeatDetector::new(self.config.max_tool_repeats),
                ladder: RecoveryLadder::new(&self.config),
                context_escalated: false,
            };

            info!(tier = %run.tier, priority = %request.classification.priority, "Execution started");
            let outcome = self.drive(&mut run).await;
            info!(
                outcome = outcome.label(),
                turns = run.turns,
                tool_calls = run.tool_calls,
                tier = %run.tier,
                latency_ms = started.elapsed().as_millis() as u64,
                "Execution finished"
            );

            ExecutionReport {
                outcome,
                turns: run.turns,
                tool_calls: run.tool_calls,
                final_tier: run.tier,
                prompt_tokens: run.prompt_tokens,
                completion_tokens: run.completion_tokens,
                user_visible: run.user_visible,
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(&self, run: &mut Run<'_>) -> ExecutionOutcome {
        let definitions = self.tools.definitions();
        let options = ChatOptions::new()
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);
        let control = run.control;

        loop {
            if let Some(interrupt) = control.check() {
                return run.interrupted(interrupt);
            }
            if run.turns >= self.config.max_turns {
                warn!(turns = run.turns, "Turn budget exhausted");
                let action = run.ladder.give_up(FailureKind::Difficulty, run.has_partial());
                return run.conclude(action);
            }
            run.turns += 1;
            log_transition(run, TurnState::AwaitingModel);

            let failure = if let Some(err) = self.oversized(run) {
                err
            } else {
                let call = self.call_model(run.tier, &run.transcript, &definitions, &options);
                let result = control.guard(call).await;
                match result {
                    Err(interrupt) => return run.interrupted(interrupt),
                    Ok(Err(err)) => err,
                    Ok(Ok(response)) => match self.handle_response(run, response).await {
                        Step::Continue => continue,
                        Step::Done(outcome) => return outcome,
                        Step::Failed(err) => err,
                    },
                }
            };

            if let Some(outcome) = self.recover(run, failure).await {
                return outcome;
            }
        }
    }

    /// Catch transcripts that clearly exceed the tier's window before
    /// spending a model call on them.
    fn oversized(&self, run: &Run<'_>) -> Option<HeraldError> {
        let estimate = run.transcript.estimated_tokens();
        let window = self.models.context_window(run.tier);
        (estimate > window).then(|| {
            HeraldError::ContextTooLarge(format!(
                "transcript of ~{} tokens exceeds the {} token window of tier {}",
                estimate, window, run.tier
            ))
        })
    }

    async fn call_model(
        &self,
        tier: ModelTier,
        transcript: &Transcript,
        definitions: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<LLMResponse> {
        self.limiter.acquire(BucketKey::Model(tier), 1.0).await?;
        self.provider
            .chat(
                transcript.messages().to_vec(),
                definitions.to_vec(),
                Some(self.models.model_for(tier)),
                options.clone(),
            )
            .await
    }

    async fn handle_response(&self, run: &mut Run<'_>, response: LLMResponse) -> Step {
        if let Some(usage) = response.usage {
            run.prompt_tokens += u64::from(usage.prompt_tokens);
            run.completion_tokens += u64::from(usage.completion_tokens);
        }

        if !response.has_tool_calls() {
            let text = response.content.trim();
            if text.is_empty() {
                return Step::Failed(HeraldError::Provider(
                    "model returned neither text nor tool calls".to_string(),
                ));
            }
            run.ladder.reset();
            log_transition(run, TurnState::RespondedWithText);
            return Step::Done(ExecutionOutcome::Completed {
                text: text.to_string(),
            });
        }

        run.ladder.reset();
        log_transition(run, TurnState::RespondedWithToolCalls);
        let calls = response
            .tool_calls
            .iter()
            .map(|c| ToolCall::new(&c.id, &c.name, &c.arguments))
            .collect();
        run.transcript
            .push(Message::assistant_with_tools(&response.content, calls));

        log_transition(run, TurnState::ExecutingTools);
        let total = response.tool_calls.len();
        for (i, call) in response.tool_calls.iter().enumerate() {
            if let Some(interrupt) = run.control.check() {
                return Step::Done(run.interrupted(interrupt));
            }
            run.control
                .report(&format!("Running {} ({} of {})", call.name, i + 1, total));
            match self.execute_call(run, call).await {
                Ok(content) => run.transcript.push(Message::tool_result(&call.id, &content)),
                Err(interrupt) => return Step::Done(run.interrupted(interrupt)),
            }
        }
        Step::Continue
    }

    /// Run one tool call through the guards. Returns the text fed back to
    /// the model; failures become text too. `Err` means the run was
    /// interrupted before the tool started.
    async fn execute_call(
        &self,
        run: &mut Run<'_>,
        call: &LLMToolCall,
    ) -> std::result::Result<String, Interrupt> {
        let params = match call.arguments_json() {
            Ok(params) => params,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Invalid JSON in tool arguments");
                return Ok(format!("Error: invalid JSON arguments for {}: {}", call.name, e));
            }
        };

        if let RepeatVerdict::Suppressed { count } = run.repeats.record(&call.name, &params) {
            warn!(tool = %call.name, count, "Suppressing repeated tool call");
            return Ok(REPEAT_CORRECTION.to_string());
        }

        let category = self.tools.category(&call.name);
        let dedup_key = if category.is_idempotent() {
            None
        } else {
            let key = MutationDeduper::key(&run.request.workspace_id, &call.name, &params);
            if !self.deduper.check_and_record(&key) {
                info!(tool = %call.name, "Blocked duplicate mutating call");
                return Ok(format!(
                    "Already performed: an identical {} call ran moments ago, so it was not repeated. Treat it as done.",
                    call.name
                ));
            }
            Some(key)
        };

        // The bucket wait is a suspension point, and nothing may start once
        // the run is interrupted, even if the token was just granted.
        let acquired = run
            .control
            .guard(self.limiter.acquire_for_tool(&call.name))
            .await
            .and_then(|acquired| match run.control.check() {
                Some(interrupt) => Err(interrupt),
                None => Ok(acquired),
            });
        let forget = |key: &Option<String>| {
            if let Some(key) = key {
                self.deduper.forget(key);
            }
        };
        match acquired {
            Err(interrupt) => {
                forget(&dedup_key);
                debug!(tool = %call.name, ?interrupt, "Interrupted while waiting for rate limit");
                return Err(interrupt);
            }
            Ok(Err(e)) => {
                forget(&dedup_key);
                warn!(tool = %call.name, error = %e, "Tool deferred by rate limit");
                return Ok(format!(
                    "Error: {} is rate limited right now ({}). Continue without it or summarise what you have.",
                    call.name, e
                ));
            }
            Ok(Ok(_)) => {}
        }

        run.tool_calls += 1;
        info!(tool = %call.name, id = %call.id, category = %category, "Executing tool");
        let start = Instant::now();
        let result = self.tools.call_tool(&call.name, params, &run.ctx).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        if category.is_heavy() {
            let upgraded = run.tier.for_heavy_tools();
            if upgraded != run.tier {
                info!(from = %run.tier, to = %upgraded, tool = %call.name, "Upgrading tier after heavy tool");
                run.tier = upgraded;
            }
        }

        Ok(match result {
            Ok(output) => {
                debug!(tool = %call.name, latency_ms, is_error = output.is_error, "Tool executed");
                if !output.is_error {
                    run.gathered.push(output.for_llm.clone());
                }
                if let Some(text) = output.for_user {
                    run.user_visible.push(text);
                }
                output.for_llm
            }
            Err(e) => {
                error!(tool = %call.name, latency_ms, error = %e, "Tool execution failed");
                // A throttled call never ran, so the same mutation may be retried.
                if matches!(e, HeraldError::RateLimited { .. }) {
                    forget(&dedup_key);
                }
                format!(
                    "Error: {} failed: {}. Try a different approach or continue with what you have.",
                    call.name, e
                )
            }
        })
    }

    /// Apply the next recovery step. `Some` ends the execution.
    async fn recover(&self, run: &mut Run<'_>, err: HeraldError) -> Option<ExecutionOutcome> {
        let kind = err.failure_kind();
        warn!(turn = run.turns, tier = %run.tier, kind = %kind, error = %err, "Model turn failed");

        if kind == FailureKind::ContextOverflow {
            return self.recover_context(run);
        }

        match run.ladder.next_action(kind, run.tier, run.has_partial()) {
            RecoveryAction::Retry { backoff, note } => {
                if let Some(note) = note {
                    run.transcript.push(Message::user(note));
                }
                debug!(backoff_ms = backoff.as_millis() as u64, "Retrying turn");
                match run.control.guard(tokio::time::sleep(backoff)).await {
                    Ok(()) => None,
                    Err(interrupt) => Some(run.interrupted(interrupt)),
                }
            }
            RecoveryAction::SwitchTier(tier) => {
                info!(from = %run.tier, to = %tier, kind = %kind, "Switching tier");
                run.tier = tier;
                None
            }
            action => Some(run.conclude(action)),
        }
    }

    /// Trim old tool results, then move to a larger window once, then give up.
    fn recover_context(&self, run: &mut Run<'_>) -> Option<ExecutionOutcome> {
        let trimmed = run
            .transcript
            .trim_tool_results(self.config.keep_recent_tool_results);
        if trimmed > 0 {
            info!(trimmed, "Trimmed old tool results");
            return None;
        }

        if !run.context_escalated {
            if let Some(larger) = run.tier.larger_context(&self.models) {
                info!(from = %run.tier, to = %larger, "Escalating to larger context tier");
                run.context_escalated = true;
                run.tier = larger;
                return None;
            }
        }

        let action = run
            .ladder
            .give_up(FailureKind::ContextOverflow, run.has_partial());
        Some(run.conclude(action))
    }
}

impl Run<'_> {
    fn has_partial(&self) -> bool {
        !self.gathered.is_empty() || self.transcript.last_assistant_text().is_some()
    }

    fn partial_text(&self) -> Option<String> {
        let mut sections: Vec<String> = self
            .gathered
            .iter()
            .rev()
            .take(PARTIAL_MAX_OUTPUTS)
            .rev()
            .map(|s| truncate_chars(s, PARTIAL_MAX_CHARS))
            .collect();
        if sections.is_empty() {
            sections.extend(self.transcript.last_assistant_text().map(str::to_string));
        }
        if sections.is_empty() {
            return None;
        }
        Some(format!("{}\n\n{}", PARTIAL_PREFIX, sections.join("\n\n")))
    }

    /// Map a terminal recovery action onto an outcome.
    fn conclude(&self, action: RecoveryAction) -> ExecutionOutcome {
        match action {
            RecoveryAction::Fail { next_step } => ExecutionOutcome::Failed {
                message: format!("I couldn't complete this request. {}", next_step),
            },
            _ => match self.partial_text() {
                Some(text) => ExecutionOutcome::Partial { text },
                None => ExecutionOutcome::Failed {
                    message: "I couldn't complete this request. Please try rephrasing it or splitting it into smaller steps.".to_string(),
                },
            },
        }
    }

    fn interrupted(&self, interrupt: Interrupt) -> ExecutionOutcome {
        match interrupt {
            Interrupt::Cancelled => {
                info!(turn = self.turns, "Execution cancelled");
                ExecutionOutcome::Cancelled
            }
            Interrupt::TimedOut => {
                warn!(turn = self.turns, "Execution deadline exceeded");
                ExecutionOutcome::TimedOut {
                    partial: self.partial_text(),
                }
            }
        }
    }
}

fn log_transition(run: &Run<'_>, state: TurnState) {
    debug!(turn = run.turns, state = %state, tier = %run.tier, "Turn transition");
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::bus::InboundMessage;
    use crate::config::{BucketConfig, RateLimitConfig};
    use crate::error::ProviderError;
    use crate::providers::Usage;
    use crate::routing::{Classification, Priority};
    use crate::tools::{ToolCategory, ToolOutput};

    // ---- test doubles -----------------------------------------------------

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<LLMResponse>>>,
        calls: Mutex<Vec<(Option<String>, usize)>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<LLMResponse>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn models_used(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(m, _)| m.clone().unwrap_or_default())
                .collect()
        }

        fn message_counts(&self) -> Vec<usize> {
            self.calls.lock().unwrap().iter().map(|(_, n)| *n).collect()
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedProvider {
        async fn chat(
            &self,
            messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
            model: Option<&str>,
            _options: ChatOptions,
        ) -> Result<LLMResponse> {
            self.calls
                .lock()
                .unwrap()
                .push((model.map(str::to_string), messages.len()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LLMResponse::text("done")))
        }

        fn default_model(&self) -> &str {
            "scripted"
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    #[derive(Default)]
    struct RecordingTools {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl RecordingTools {
        fn executed(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    #[async_trait]
    impl ToolExecutor for RecordingTools {
        async fn call_tool(&self, name: &str, params: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
            self.calls.lock().unwrap().push((name.to_string(), params));
            if name == "broken_fetch" {
                return Err(HeraldError::ToolExecution("upstream 502".into()));
            }
            Ok(ToolOutput::llm_only(format!("{} ok", name)))
        }

        fn definitions(&self) -> Vec<ToolDefinition> {
            vec![ToolDefinition::new(
                "calendar_list_events",
                "List events",
                json!({"type": "object"}),
            )]
        }
    }

    struct RecordingProgress(Mutex<Vec<String>>);

    impl ProgressSink for RecordingProgress {
        fn report(&self, text: &str) {
            self.0.lock().unwrap().push(text.to_string());
        }
    }

    fn fast_config() -> AgentConfig {
        AgentConfig {
            retry_base_ms: 1,
            retry_max_ms: 2,
            ..AgentConfig::default()
        }
    }

    fn build(provider: Arc<ScriptedProvider>, tools: Arc<RecordingTools>) -> ExecutionLoop {
        ExecutionLoop::new(
            provider,
            tools,
            Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            ModelsConfig::default(),
            fast_config(),
        )
    }

    fn request(text: &str, tier: ModelTier) -> Request {
        let msg = InboundMessage::new("T1", "C1", text);
        Request::from_inbound(
            &msg,
            Classification {
                tier,
                priority: Priority::Normal,
                expects_tools: true,
            },
        )
    }

    fn tool_call(id: &str, name: &str, args: &str) -> LLMResponse {
        LLMResponse::with_tools("", vec![LLMToolCall::new(id, name, args)])
    }

    fn overflow() -> Result<LLMResponse> {
        Err(HeraldError::ProviderTyped(ProviderError::ContextTooLarge(
            "maximum context length exceeded".into(),
        )))
    }

    // ---- tests ------------------------------------------------------------

    #[tokio::test]
    async fn test_single_tool_call_then_text() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("c1", "calendar_list_events", r#"{"day":"today"}"#)),
            Ok(LLMResponse::text("You have 2 meetings today.").with_usage(Usage::new(100, 20))),
        ]);
        let tools = Arc::new(RecordingTools::default());
        let exec = build(provider.clone(), tools.clone());

        let report = exec
            .run(&request("pull my calendar", ModelTier::Default), &LoopControl::new())
            .await;

        assert_eq!(
            report.outcome,
            ExecutionOutcome::Completed {
                text: "You have 2 meetings today.".into()
            }
        );
        assert_eq!(report.turns, 2);
        assert_eq!(report.tool_calls, 1);
        assert_eq!(report.completion_tokens, 20);
        assert_eq!(tools.executed(), vec!["calendar_list_events"]);
        assert_eq!(provider.models_used()[0], ModelsConfig::default().default.model);
    }

    #[tokio::test]
    async fn test_fourth_identical_call_never_reaches_tools() {
        let mut script: Vec<Result<LLMResponse>> = (0..4)
            .map(|i| Ok(tool_call(&format!("c{}", i), "drive_search_files", r#"{"q":"x"}"#)))
            .collect();
        script.push(Ok(LLMResponse::text("Found it.")));
        let provider = ScriptedProvider::new(script);
        let tools = Arc::new(RecordingTools::default());
        let exec = build(provider, tools.clone());

        let report = exec
            .run(&request("find x", ModelTier::Default), &LoopControl::new())
            .await;

        assert!(report.outcome.is_success());
        assert_eq!(tools.executed().len(), 3);
        assert_eq!(report.tool_calls, 3);
    }

    #[tokio::test]
    async fn test_duplicate_mutation_blocked_read_allowed() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("c1", "gmail_send_email", r#"{"to":"a@b.c"}"#)),
            Ok(tool_call("c2", "gmail_send_email", r#"{"to":"a@b.c"}"#)),
            Ok(tool_call("c3", "gmail_list_messages", r#"{}"#)),
            Ok(tool_call("c4", "gmail_list_messages", r#"{}"#)),
            Ok(LLMResponse::text("Sent.")),
        ]);
        let tools = Arc::new(RecordingTools::default());
        let exec = build(provider, tools.clone());

        exec.run(&request("email a", ModelTier::Default), &LoopControl::new())
            .await;

        let executed = tools.executed();
        assert_eq!(executed.iter().filter(|n| *n == "gmail_send_email").count(), 1);
        assert_eq!(executed.iter().filter(|n| *n == "gmail_list_messages").count(), 2);
    }

    #[tokio::test]
    async fn test_context_overflow_trims_then_escalates() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("c1", "drive_read_file", r#"{"id":"1"}"#)),
            Ok(tool_call("c2", "drive_read_file", r#"{"id":"2"}"#)),
            Ok(tool_call("c3", "drive_read_file", r#"{"id":"3"}"#)),
            overflow(),
            overflow(),
            Ok(LLMResponse::text("Summary ready.")),
        ]);
        let tools = Arc::new(RecordingTools::default());
        let exec = build(provider.clone(), tools);

        let report = exec
            .run(&request("summarise files", ModelTier::Default), &LoopControl::new())
            .await;

        assert!(report.outcome.is_success());
        // First overflow trims, second escalates to a larger window.
        assert_ne!(report.final_tier, ModelTier::Default);
        let models = provider.models_used();
        assert_eq!(models[4], ModelsConfig::default().default.model);
        assert_ne!(models[5], ModelsConfig::default().default.model);
    }

    #[tokio::test]
    async fn test_overflow_after_escalation_delivers_partial() {
        let mut script = vec![Ok(tool_call("c1", "drive_read_file", r#"{"id":"1"}"#))];
        script.extend((0..10).map(|_| overflow()));
        let provider = ScriptedProvider::new(script);
        let exec = build(provider, Arc::new(RecordingTools::default()));

        let report = exec
            .run(&request("summarise", ModelTier::Default), &LoopControl::new())
            .await;

        match report.outcome {
            ExecutionOutcome::Partial { text } => {
                assert!(text.starts_with(PARTIAL_PREFIX));
                assert!(text.contains("drive_read_file ok"));
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_capacity_failure_downgrades_tier() {
        let mut script: Vec<Result<LLMResponse>> = (0..4)
            .map(|_| {
                Err(HeraldError::ProviderTyped(ProviderError::Overloaded(
                    "busy".into(),
                )))
            })
            .collect();
        script.push(Ok(LLMResponse::text("Answer from a smaller model.")));
        let provider = ScriptedProvider::new(script);
        let exec = build(provider.clone(), Arc::new(RecordingTools::default()));

        let report = exec
            .run(&request("explain", ModelTier::Frontier), &LoopControl::new())
            .await;

        assert!(report.outcome.is_success());
        assert_eq!(report.final_tier, ModelTier::Default);
        assert_eq!(provider.models_used().len(), 5);
    }

    #[tokio::test]
    async fn test_fatal_without_partial_reports_next_step() {
        let provider = ScriptedProvider::new(vec![Err(HeraldError::ProviderTyped(
            ProviderError::Auth("invalid key".into()),
        ))]);
        let exec = build(provider, Arc::new(RecordingTools::default()));

        let report = exec
            .run(&request("hello there friend", ModelTier::Default), &LoopControl::new())
            .await;

        match report.outcome {
            ExecutionOutcome::Failed { message } => {
                assert!(message.contains("gateway credentials"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_error_fed_back_to_model() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("c1", "broken_fetch", "{}")),
            Ok(LLMResponse::text("The source is down, here is what I know.")),
        ]);
        let tools = Arc::new(RecordingTools::default());
        let exec = build(provider.clone(), tools);

        let report = exec
            .run(&request("fetch it", ModelTier::Default), &LoopControl::new())
            .await;

        assert!(report.outcome.is_success());
        // system + user + assistant tool call + tool error
        assert_eq!(provider.message_counts()[1], 4);
    }

    #[tokio::test]
    async fn test_heavy_tool_upgrades_tier_not_priority() {
        let provider = ScriptedProvider::new(vec![
            Ok(tool_call("c1", "sandbox_run_script", r#"{"code":"1+1"}"#)),
            Ok(LLMResponse::text("2")),
        ]);
        let exec = build(provider.clone(), Arc::new(RecordingTools::default()));
        let req = request("run it", ModelTier::Default);

        let report = exec.run(&req, &LoopControl::new()).await;

        assert_eq!(ToolCategory::classify("sandbox_run_script"), ToolCategory::CodeExecution);
        assert_eq!(report.final_tier, ModelTier::Code);
        assert_eq!(req.classification.priority, Priority::Normal);
        assert_eq!(provider.models_used()[1], ModelsConfig::default().code.model);
    }

    #[tokio::test]
    async fn test_progress_reported_per_tool_call() {
        let provider = ScriptedProvider::new(vec![
            Ok(LLMResponse::with_tools(
                "",
                vec![
                    LLMToolCall::new("a", "calendar_list_events", "{}"),
                    LLMToolCall::new("b", "gmail_list_messages", "{}"),
                ],
            )),
            Ok(LLMResponse::text("ok")),
        ]);
        let progress = Arc::new(RecordingProgress(Mutex::new(Vec::new())));
        let exec = build(provider, Arc::new(RecordingTools::default()));
        let control = LoopControl::new().with_progress(progress.clone());

        exec.run(&request("status", ModelTier::Default), &control).await;

        assert_eq!(
            *progress.0.lock().unwrap(),
            vec![
                "Running calendar_list_events (1 of 2)",
                "Running gmail_list_messages (2 of 2)"
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let provider = ScriptedProvider::new(vec![]);
        let exec = build(provider.clone(), Arc::new(RecordingTools::default()));

        let report = exec
            .run(
                &request("anything", ModelTier::Default),
                &LoopControl::new().with_cancel(rx),
            )
            .await;

        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert!(provider.models_used().is_empty());
    }

    #[tokio::test]
    async fn test_deadline_yields_timed_out() {
        let exec = build(ScriptedProvider::new(vec![]), Arc::new(RecordingTools::default()));
        let control = LoopControl::new().with_deadline(Instant::now());

        let report = exec.run(&request("slow", ModelTier::Default), &control).await;

        assert_eq!(report.outcome, ExecutionOutcome::TimedOut { partial: None });
    }

    #[tokio::test]
    async fn test_turn_budget_exhaustion_is_not_bare() {
        let script: Vec<Result<LLMResponse>> = (0..20)
            .map(|i| Ok(tool_call(&format!("c{}", i), "notes_list_items", &format!(r#"{{"page":{}}}"#, i))))
            .collect();
        let exec = build(ScriptedProvider::new(script), Arc::new(RecordingTools::default()));

        let report = exec
            .run(&request("list all", ModelTier::Default), &LoopControl::new())
            .await;

        assert_eq!(report.turns, AgentConfig::default().max_turns);
        assert!(matches!(report.outcome, ExecutionOutcome::Partial { .. }));
    }

    #[tokio::test]
    async fn test_rate_limited_tool_is_deferred() {
        let mut limits = RateLimitConfig::default();
        limits.buckets.insert(
            "api:email".to_string(),
            BucketConfig::new(1.0, 0.0),
        );
        let tools = Arc::new(RecordingTools::default());
        let exec = ExecutionLoop::new(
            ScriptedProvider::new(vec![
                Ok(tool_call("c1", "gmail_list_messages", r#"{"page":1}"#)),
                Ok(tool_call("c2", "gmail_list_messages", r#"{"page":2}"#)),
                Ok(LLMResponse::text("Partial inbox.")),
            ]),
            tools.clone(),
            Arc::new(RateLimiter::new(&limits).with_max_wait(Duration::from_millis(10))),
            ModelsConfig::default(),
            fast_config(),
        );

        let report = exec
            .run(&request("inbox", ModelTier::Default), &LoopControl::new())
            .await;

        assert!(report.outcome.is_success());
        assert_eq!(tools.executed().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_bucket_wait_starts_no_tool() {
        let mut limits = RateLimitConfig::default();
        limits
            .buckets
            .insert("api:email".to_string(), BucketConfig::new(1.0, 2.0));
        let tools = Arc::new(RecordingTools::default());
        let exec = ExecutionLoop::new(
            ScriptedProvider::new(vec![Ok(LLMResponse::with_tools(
                "",
                vec![
                    LLMToolCall::new("a", "gmail_send_email", r#"{"to":"a"}"#),
                    LLMToolCall::new("b", "gmail_send_email", r#"{"to":"b"}"#),
                ],
            ))]),
            tools.clone(),
            Arc::new(RateLimiter::new(&limits).with_max_wait(Duration::from_secs(2))),
            ModelsConfig::default(),
            fast_config(),
        );
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let report = exec
            .run(
                &request("email both", ModelTier::Default),
                &LoopControl::new().with_cancel(rx),
            )
            .await;

        assert_eq!(report.outcome, ExecutionOutcome::Cancelled);
        assert_eq!(tools.executed(), vec!["gmail_send_email"]);
        assert_eq!(report.tool_calls, 1);
        assert!(started.elapsed() < Duration::from_millis(400));
        // The interrupted mutation may be sent again later.
        let key = MutationDeduper::key("T1", "gmail_send_email", &json!({"to": "b"}));
        assert!(exec.deduper.check_and_record(&key));
    }

    #[tokio::test]
    async fn test_deadline_during_bucket_wait_keeps_partial() {
        let mut limits = RateLimitConfig::default();
        limits
            .buckets
            .insert("api:email".to_string(), BucketConfig::new(1.0, 2.0));
        let exec = ExecutionLoop::new(
            ScriptedProvider::new(vec![Ok(LLMResponse::with_tools(
                "",
                vec![
                    LLMToolCall::new("a", "gmail_list_messages", r#"{"page":1}"#),
                    LLMToolCall::new("b", "gmail_list_messages", r#"{"page":2}"#),
                ],
            ))]),
            Arc::new(RecordingTools::default()),
            Arc::new(RateLimiter::new(&limits).with_max_wait(Duration::from_secs(2))),
            ModelsConfig::default(),
            fast_config(),
        );
        let control = LoopControl::new().with_deadline(Instant::now() + Duration::from_millis(50));

        let report = exec.run(&request("inbox", ModelTier::Default), &control).await;

        match report.outcome {
            ExecutionOutcome::TimedOut { partial: Some(text) } => {
                assert!(text.contains("gmail_list_messages ok"));
            }
            other => panic!("expected timed out with partial, got {:?}", other),
        }
    }

    #[test]
    fn test_deadline_wins_over_cancel() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let control = LoopControl::new()
            .with_cancel(rx)
            .with_deadline(Instant::now());
        assert_eq!(control.check(), Some(Interrupt::TimedOut));
    }

    #[tokio::test]
    async fn test_repeated_empty_answers_exhaust_ladder() {
        let script: Vec<Result<LLMResponse>> = (0..20).map(|_| Ok(LLMResponse::text(""))).collect();
        let provider = ScriptedProvider::new(script);
        let exec = build(provider.clone(), Arc::new(RecordingTools::default()));

        let report = exec
            .run(&request("explain this", ModelTier::Default), &LoopControl::new())
            .await;

        // 1 + 3 retries, tier switch, 1 + 3 retries, then give up.
        assert_eq!(report.turns, 8);
        assert!(report.turns < AgentConfig::default().max_turns);
        assert_eq!(report.final_tier, ModelTier::Frontier);
        assert!(matches!(report.outcome, ExecutionOutcome::Failed { .. }));
    }

    #[test]
    fn test_outcome_maps_to_task_outcome() {
        let outcome: TaskOutcome = ExecutionOutcome::Partial { text: "x".into() }.into();
        assert!(matches!(outcome, TaskOutcome::Partial(_)));
        assert_eq!(ExecutionOutcome::Cancelled.user_text(), None);
        assert_eq!(TurnState::ExecutingTools.to_string(), "EXECUTING_TOOLS");
    }

    #[test]
    fn test_truncate_chars_is_char_safe() {
        assert_eq!(truncate_chars("héllo", 2), "hé...");
        assert_eq!(truncate_chars("ok", 5), "ok");
    }
}
