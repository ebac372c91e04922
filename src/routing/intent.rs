//! Intent router.
//!
//! Deterministic, rule-based tier selection. Rules are checked in order and
//! the first one that fires wins:
//!
//! 1. code / build / deploy / script vocabulary → [`ModelTier::Code`]
//! 2. research / analysis / comparison vocabulary, or a long message → [`ModelTier::Frontier`]
//! 3. everything else → [`ModelTier::Default`]
//!
//! [`ModelTier::Fast`] is only assigned when the caller reports a fast-path match.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::{HeraldError, Result};

use super::{ModelTier, Priority};

static CODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(code|coding|script|scripts|deploy|deployment|build|compile|debug|refactor|function|bug|stack ?trace|unit tests?|pull request|commit|dockerfile|python|javascript|typescript|rust|sql|regex|cron job|api endpoint)\b",
    )
    .expect("code pattern")
});

static RESEARCH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(research|analy[sz]e|analysis|compare|comparison|versus|vs|evaluate|evaluation|investigate|deep dive|pros and cons|trade-?offs?|benchmark|literature|competitive landscape)\b",
    )
    .expect("research pattern")
});

/// Verbs and nouns that imply the request needs tools to answer.
static TOOL_HINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(pull|fetch|get|send|create|schedule|book|search|find|look ?up|check|update|delete|post|sync|syncs|email|calendar|sheets?|spreadsheets?|drive|docs?|slack|github|repo|deploy|run|execute|script|research|sources|latest|file|files)\b",
    )
    .expect("tool hint pattern")
});

/// Inputs to classification beyond the text itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingSignals {
    /// The fast-path evaluator matched this message.
    pub fast_path_matched: bool,
    /// The message is a reply inside an active thread.
    pub in_active_thread: bool,
}

/// Router output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub tier: ModelTier,
    pub priority: Priority,
    /// The request is expected to call at least one tool.
    pub expects_tools: bool,
}

impl Classification {
    fn for_tier(tier: ModelTier, expects_tools: bool) -> Self {
        Self {
            tier,
            priority: tier.priority(),
            expects_tools,
        }
    }

    /// Whether the execution should run as a tracked background task.
    ///
    /// Only capable tiers that are expected to use tools qualify; fast and
    /// default requests are always answered synchronously.
    pub fn is_background(&self) -> bool {
        self.expects_tools
            && matches!(
                self.tier,
                ModelTier::Code | ModelTier::Frontier | ModelTier::Heavy
            )
    }
}

/// Rule-based tier classifier.
#[derive(Debug, Clone)]
pub struct IntentRouter {
    frontier_length_threshold: usize,
}

impl Default for IntentRouter {
    fn default() -> Self {
        Self {
            frontier_length_threshold: 600,
        }
    }
}

impl IntentRouter {
    /// Create a router that sends messages longer than `frontier_length_threshold`
    /// characters to the frontier tier.
    pub fn new(frontier_length_threshold: usize) -> Self {
        Self {
            frontier_length_threshold,
        }
    }

    /// Classify `text`, reporting a [`HeraldError::Classification`] for input
    /// that cannot be classified at all.
    pub fn try_classify(&self, text: &str, signals: &RoutingSignals) -> Result<Classification> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(HeraldError::Classification("empty message".to_string()));
        }

        if signals.fast_path_matched {
            return Ok(Classification::for_tier(ModelTier::Fast, false));
        }

        let expects_tools = TOOL_HINT.is_match(trimmed);

        if CODE.is_match(trimmed) {
            return Ok(Classification::for_tier(ModelTier::Code, expects_tools));
        }
        if RESEARCH.is_match(trimmed) || trimmed.chars().count() > self.frontier_length_threshold
        {
            return Ok(Classification::for_tier(ModelTier::Frontier, expects_tools));
        }
        Ok(Classification::for_tier(ModelTier::Default, expects_tools))
    }

    /// Classify `text`. Never fails: unclassifiable input gets the default tier.
    ///
    /// # Example
    /// ```
    /// use herald::routing::{IntentRouter, ModelTier, Priority, RoutingSignals};
    ///
    /// let router = IntentRouter::default();
    /// let c = router.classify("pull my calendar for today", &RoutingSignals::default());
    /// assert_eq!(c.tier, ModelTier::Default);
    /// assert_eq!(c.priority, Priority::Normal);
    /// ```
    pub fn classify(&self, text: &str, signals: &RoutingSignals) -> Classification {
        match self.try_classify(text, signals) {
            Ok(c) => c,
            Err(e) => {
                tracing::debug!(error = %e, "Falling back to default tier");
                Classification::for_tier(ModelTier::Default, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// (input, expected tier, expected background)
    const CASES: &[(&str, ModelTier, bool)] = &[
        ("pull my calendar for today", ModelTier::Default, false),
        (
            "write and deploy a script that syncs two spreadsheets",
            ModelTier::Code,
            true,
        ),
        ("fix the bug in the login function", ModelTier::Code, false),
        ("explain what this python error means", ModelTier::Code, false),
        ("build the release and run the unit tests", ModelTier::Code, true),
        (
            "research the latest vector databases and compare pricing",
            ModelTier::Frontier,
            true,
        ),
        ("compare postgres versus mysql for our use case", ModelTier::Frontier, false),
        ("give me the pros and cons of remote work", ModelTier::Frontier, false),
        ("send the weekly update email to the team", ModelTier::Default, false),
        ("draft a polite reply declining the invite", ModelTier::Default, false),
        ("what's the capital of peru", ModelTier::Default, false),
    ];

    #[test]
    fn test_classification_table() {
        let router = IntentRouter::default();
        for (text, tier, background) in CASES {
            let c = router.classify(text, &RoutingSignals::default());
            assert_eq!(c.tier, *tier, "tier for {:?}", text);
            assert_eq!(c.priority, tier.priority(), "priority for {:?}", text);
            assert_eq!(c.is_background(), *background, "background for {:?}", text);
        }
    }

    #[test]
    fn test_end_to_end_scenarios() {
        let router = IntentRouter::default();
        let c = router.classify("pull my calendar for today", &RoutingSignals::default());
        assert_eq!(c.tier, ModelTier::Default);
        assert_eq!(c.priority, Priority::Normal);
        assert!(c.expects_tools);
        assert!(!c.is_background());

        let c = router.classify(
            "write and deploy a script that syncs two spreadsheets",
            &RoutingSignals::default(),
        );
        assert_eq!(c.tier, ModelTier::Code);
        assert_eq!(c.priority, Priority::Low);
        assert!(c.is_background());
    }

    #[test]
    fn test_long_message_goes_frontier() {
        let router = IntentRouter::new(50);
        let text = "please summarise the following notes for me ".repeat(3);
        let c = router.classify(&text, &RoutingSignals::default());
        assert_eq!(c.tier, ModelTier::Frontier);
    }

    #[test]
    fn test_fast_only_via_signal() {
        let router = IntentRouter::default();
        assert_ne!(
            router.classify("hi", &RoutingSignals::default()).tier,
            ModelTier::Fast
        );
        let signals = RoutingSignals {
            fast_path_matched: true,
            in_active_thread: false,
        };
        let c = router.classify("hi", &signals);
        assert_eq!(c.tier, ModelTier::Fast);
        assert_eq!(c.priority, Priority::High);
    }

    #[test]
    fn test_empty_input_is_classification_error_but_classify_defaults() {
        let router = IntentRouter::default();
        assert!(matches!(
            router.try_classify("  ", &RoutingSignals::default()),
            Err(HeraldError::Classification(_))
        ));
        let c = router.classify("  ", &RoutingSignals::default());
        assert_eq!(c.tier, ModelTier::Default);
        assert_eq!(c.priority, Priority::Normal);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let router = IntentRouter::default();
        for (text, _, _) in CASES {
            let a = router.classify(text, &RoutingSignals::default());
            let b = router.classify(text, &RoutingSignals::default());
            assert_eq!(a, b);
        }
    }
}
