//! Classify command handler: dry-run routing for one message.

use anyhow::{Context, Result};

use herald::config::Config;
use herald::routing::{
    Classification, ConversationContext, FastPathEvaluator, FastPathResult, IntentRouter,
    RoutingSignals,
};

/// Routing decision for one message, as printed by `herald classify`.
pub(crate) struct RouteReport {
    pub fast_path: FastPathResult,
    pub classification: Option<Classification>,
}

pub(crate) fn route(config: &Config, text: &str, in_thread: bool) -> RouteReport {
    let ctx = ConversationContext {
        in_active_thread: in_thread,
        active_tasks: 0,
    };
    let fast_path = FastPathEvaluator::new(config.routing.fast_path_max_len).evaluate(text, &ctx);
    let classification = (!fast_path.matched).then(|| {
        IntentRouter::new(config.routing.frontier_length_threshold).classify(
            text,
            &RoutingSignals {
                fast_path_matched: false,
                in_active_thread: in_thread,
            },
        )
    });
    RouteReport {
        fast_path,
        classification,
    }
}

pub(crate) fn cmd_classify(text: &str, in_thread: bool) -> Result<()> {
    let config = Config::load().with_context(|| "Failed to load configuration")?;
    let report = route(&config, text, in_thread);

    println!("Fast path:  {:?}", report.fast_path.reason);
    if let Some(reply) = &report.fast_path.reply {
        println!("Reply:      {}", reply);
        return Ok(());
    }
    if let Some(c) = report.classification {
        println!("Tier:       {} ({})", c.tier, config.models.model_for(c.tier));
        println!("Priority:   {}", c.priority);
        println!("Tools:      {}", if c.expects_tools { "expected" } else { "none" });
        println!(
            "Execution:  {}",
            if c.is_background() { "background task" } else { "synchronous" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald::routing::{FastPathReason, ModelTier};

    #[test]
    fn test_greeting_stops_at_fast_path() {
        let report = route(&Config::default(), "hi", false);
        assert!(report.fast_path.matched);
        assert!(report.classification.is_none());
    }

    #[test]
    fn test_thread_reply_is_classified() {
        let report = route(&Config::default(), "hi", true);
        assert_eq!(report.fast_path.reason, FastPathReason::InThread);
        assert!(report.classification.is_some());
    }

    #[test]
    fn test_deploy_request_runs_in_background() {
        let report = route(
            &Config::default(),
            "write and deploy a script that syncs two spreadsheets",
            false,
        );
        let c = report.classification.unwrap();
        assert_eq!(c.tier, ModelTier::Code);
        assert!(c.is_background());
    }
}
