//! Failure-cascade recovery ladder.
//!
//! When a model turn fails, the loop asks the ladder what to do next. Rungs,
//! in order:
//!
//! 1. retry the same turn after a backoff (difficulty failures also get a
//!    note asking the model to take a different approach)
//! 2. switch tier once: down to a cheaper model for capacity failures, up to
//!    a more capable one for difficulty failures
//! 3. deliver whatever partial result exists, framed as incomplete
//! 4. fail with a concrete next step for the user
//!
//! Fatal failures (auth, billing, missing model) skip straight to rung 3.

use std::time::Duration;

use crate::config::AgentConfig;
use crate::error::FailureKind;
use crate::providers::backoff_delay;
use crate::routing::ModelTier;

/// Note added to the transcript before retrying a difficulty failure.
pub const VARY_APPROACH_NOTE: &str =
    "The previous attempt did not produce a usable answer. Take a different approach: \
     use other tools or arguments, or answer directly with what you already know.";

/// What the loop should do after a failed step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Wait, then run the same turn again.
    Retry {
        backoff: Duration,
        note: Option<&'static str>,
    },
    /// Continue on a different tier.
    SwitchTier(ModelTier),
    /// Stop and deliver what was gathered so far.
    DeliverPartial,
    /// Stop with nothing to deliver; tell the user what to try next.
    Fail { next_step: String },
}

/// Per-execution recovery state. Owned by one loop.
#[derive(Debug)]
pub struct RecoveryLadder {
    max_retries: u32,
    retry_base_ms: u64,
    retry_max_ms: u64,
    retries_used: u32,
    tier_switched: bool,
}

impl RecoveryLadder {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
            retry_max_ms: config.retry_max_ms,
            retries_used: 0,
            tier_switched: false,
        }
    }

    /// Pick the next rung for a failure of `kind` on `tier`.
    pub fn next_action(
        &mut self,
        kind: FailureKind,
        tier: ModelTier,
        has_partial: bool,
    ) -> RecoveryAction {
        match kind {
            FailureKind::Capacity | FailureKind::Difficulty => {}
            FailureKind::ContextOverflow | FailureKind::Fatal => {
                return self.give_up(kind, has_partial)
            }
        }

        if self.retries_used < self.max_retries {
            let backoff = backoff_delay(self.retries_used, self.retry_base_ms, self.retry_max_ms);
            self.retries_used += 1;
            let note = (kind == FailureKind::Difficulty).then_some(VARY_APPROACH_NOTE);
            return RecoveryAction::Retry { backoff, note };
        }

        if !self.tier_switched {
            let target = match kind {
                FailureKind::Capacity => tier.downgrade(),
                _ => tier.escalate(),
            };
            if let Some(target) = target {
                self.tier_switched = true;
                self.retries_used = 0;
                return RecoveryAction::SwitchTier(target);
            }
        }

        self.give_up(kind, has_partial)
    }

    /// Final rungs: partial delivery if anything exists, otherwise a failure
    /// report with a next step.
    pub fn give_up(&self, kind: FailureKind, has_partial: bool) -> RecoveryAction {
        if has_partial {
            RecoveryAction::DeliverPartial
        } else {
            RecoveryAction::Fail {
                next_step: next_step_for(kind).to_string(),
            }
        }
    }

    /// A model turn succeeded: the next failure starts from the first rung.
    /// A tier switch already spent stays spent.
    pub fn reset(&mut self) {
        self.retries_used = 0;
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }
}

fn next_step_for(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::Capacity => {
            "The model service is saturated right now. Please send the request again in a few minutes."
        }
        FailureKind::Difficulty => {
            "Try splitting the request into smaller steps, or add detail about the data or outcome you need."
        }
        FailureKind::ContextOverflow => {
            "The request pulls in more data than fits in one pass. Narrow it down (a shorter date range, fewer files) and ask again."
        }
        FailureKind::Fatal => {
            "The assistant cannot reach its model service with the current setup. An admin should check the gateway credentials and model names."
        }
    }
}
