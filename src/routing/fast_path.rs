//! Fast-path evaluator.
//!
//! A pure, allocation-light check run on every inbound message before
//! anything is queued. It answers greetings, "are you busy?" style status
//! checks and help requests directly, and refuses everything else.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(hi|hello|hey|hiya|howdy|yo|hi there|hey there|hello there|good (morning|afternoon|evening)|thanks|thank you)[\s!.,:)]*$",
    )
    .expect("greeting pattern")
});

static STATUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(are you (busy|there|around|free|available|working)|you (busy|there|around)|busy|status)[\s?!.]*$",
    )
    .expect("status pattern")
});

static HELP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(help|help me|what can you do|what do you do|how do i use (you|this)|commands)[\s?!.]*$",
    )
    .expect("help pattern")
});

/// Anything that smells like a question about data the bot would have to fetch.
static EXTERNAL_DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(calendar|email|emails|inbox|meeting|meetings|schedule|drive|docs?|sheets?|spreadsheets?|slack|github|repo|files?|my|our|today|tomorrow|yesterday|weather|news|price|latest)\b",
    )
    .expect("external data pattern")
});

static CLAUSE_JOINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(and|then|also|but)\b|[;\n]").expect("clause pattern")
});

/// Conversation state the evaluator may look at.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversationContext {
    /// The message is a reply inside a thread with prior context.
    pub in_active_thread: bool,
    /// Background tasks currently running for this workspace.
    pub active_tasks: usize,
}

/// Why the fast path did or did not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FastPathReason {
    Greeting,
    StatusQuery,
    HelpRequest,
    Empty,
    InThread,
    TooLong,
    ExternalData,
    MultiClause,
    NoMatch,
}

/// Decision returned by [`FastPathEvaluator::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FastPathResult {
    pub matched: bool,
    pub reason: FastPathReason,
    /// Text to send verbatim when `matched` is true.
    pub reply: Option<String>,
}

impl FastPathResult {
    fn hit(reason: FastPathReason, reply: String) -> Self {
        Self {
            matched: true,
            reason,
            reply: Some(reply),
        }
    }

    fn miss(reason: FastPathReason) -> Self {
        Self {
            matched: false,
            reason,
            reply: None,
        }
    }
}

/// Stateless fast-path classifier.
#[derive(Debug, Clone)]
pub struct FastPathEvaluator {
    max_len: usize,
}

impl Default for FastPathEvaluator {
    fn default() -> Self {
        Self { max_len: 80 }
    }
}

impl FastPathEvaluator {
    /// Create an evaluator that never matches messages longer than `max_len` characters.
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    /// Decide whether `text` can be answered without queueing or calling a model.
    ///
    /// # Example
    /// ```
    /// use herald::routing::{ConversationContext, FastPathEvaluator};
    ///
    /// let fp = FastPathEvaluator::default();
    /// assert!(fp.evaluate("hi", &ConversationContext::default()).matched);
    /// assert!(!fp.evaluate("what's on my calendar", &ConversationContext::default()).matched);
    /// ```
    pub fn evaluate(&self, text: &str, ctx: &ConversationContext) -> FastPathResult {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return FastPathResult::miss(FastPathReason::Empty);
        }
        if ctx.in_active_thread {
            return FastPathResult::miss(FastPathReason::InThread);
        }
        if trimmed.chars().count() > self.max_len {
            return FastPathResult::miss(FastPathReason::TooLong);
        }
        if EXTERNAL_DATA.is_match(trimmed) {
            return FastPathResult::miss(FastPathReason::ExternalData);
        }
        if is_multi_clause(trimmed) {
            return FastPathResult::miss(FastPathReason::MultiClause);
        }

        if GREETING.is_match(trimmed) {
            return FastPathResult::hit(
                FastPathReason::Greeting,
                "Hey! What can I help you with?".to_string(),
            );
        }
        if STATUS.is_match(trimmed) {
            let reply = match ctx.active_tasks {
                0 => "Not busy at all. What do you need?".to_string(),
                1 => "I'm working on 1 task right now, but I can take more.".to_string(),
                n => format!("I'm working on {} tasks right now, but I can take more.", n),
            };
            return FastPathResult::hit(FastPathReason::StatusQuery, reply);
        }
        if HELP.is_match(trimmed) {
            return FastPathResult::hit(
                FastPathReason::HelpRequest,
                "I can look things up in your connected apps, draft and send messages, and run longer jobs like scripts or research in the background. Just tell me what you need.".to_string(),
            );
        }

        FastPathResult::miss(FastPathReason::NoMatch)
    }
}

/// More than one sentence, or clauses joined by a conjunction.
fn is_multi_clause(text: &str) -> bool {
    let sentences = text
        .split(['.', '?', '!'])
        .filter(|s| s.chars().any(|c| c.is_alphanumeric()))
        .count();
    sentences > 1 || CLAUSE_JOINER.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(text: &str) -> FastPathResult {
        FastPathEvaluator::default().evaluate(text, &ConversationContext::default())
    }

    #[test]
    fn test_greetings_match() {
        for text in ["hi", "Hello!", "hey there", "good morning", "thanks!"] {
            let res = eval(text);
            assert!(res.matched, "expected match for {:?}", text);
            assert_eq!(res.reason, FastPathReason::Greeting);
            assert!(res.reply.is_some());
        }
    }

    #[test]
    fn test_status_query_matches() {
        let res = eval("are you busy?");
        assert!(res.matched);
        assert_eq!(res.reason, FastPathReason::StatusQuery);
    }

    #[test]
    fn test_status_reply_reflects_active_tasks() {
        let fp = FastPathEvaluator::default();
        let ctx = ConversationContext {
            in_active_thread: false,
            active_tasks: 2,
        };
        let res = fp.evaluate("are you busy?", &ctx);
        assert!(res.reply.unwrap().contains("2 tasks"));
    }

    #[test]
    fn test_help_matches() {
        let res = eval("what can you do?");
        assert!(res.matched);
        assert_eq!(res.reason, FastPathReason::HelpRequest);
    }

    #[test]
    fn test_external_data_never_matches() {
        for text in [
            "what's on my calendar",
            "any new email?",
            "hi, what's on my calendar today?",
            "help me with the spreadsheet",
        ] {
            let res = eval(text);
            assert!(!res.matched, "unexpected match for {:?}", text);
        }
        assert_eq!(eval("what's on my calendar").reason, FastPathReason::ExternalData);
    }

    #[test]
    fn test_multi_clause_rejected() {
        let res = eval("hi and can you help");
        assert!(!res.matched);
        assert_eq!(res.reason, FastPathReason::MultiClause);

        let res = eval("hello. are you busy?");
        assert_eq!(res.reason, FastPathReason::MultiClause);
    }

    #[test]
    fn test_in_thread_never_matches() {
        let fp = FastPathEvaluator::default();
        let ctx = ConversationContext {
            in_active_thread: true,
            active_tasks: 0,
        };
        let res = fp.evaluate("hi", &ctx);
        assert!(!res.matched);
        assert_eq!(res.reason, FastPathReason::InThread);
    }

    #[test]
    fn test_long_and_empty_rejected() {
        assert_eq!(eval("   ").reason, FastPathReason::Empty);
        let long = format!("hello {}", "x".repeat(200));
        assert_eq!(eval(&long).reason, FastPathReason::TooLong);
    }

    #[test]
    fn test_ordinary_request_no_match() {
        let res = eval("write a haiku");
        assert!(!res.matched);
        assert_eq!(res.reason, FastPathReason::NoMatch);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        assert_eq!(eval("hey"), eval("hey"));
        assert_eq!(eval("are you busy?"), eval("are you busy?"));
    }
}
