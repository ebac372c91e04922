//! Model tiers and queue priorities.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::config::ModelsConfig;

/// Model capability class selected for a request.
///
/// Each tier is backed by one model id (see [`ModelsConfig`]) and owns its
/// own token bucket in the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Reserved for fast-path answers.
    Fast,
    Default,
    Code,
    Frontier,
    /// Largest context window. Only reached by escalation inside a loop.
    Heavy,
}

impl ModelTier {
    pub fn all() -> [ModelTier; 5] {
        [
            ModelTier::Fast,
            ModelTier::Default,
            ModelTier::Code,
            ModelTier::Frontier,
            ModelTier::Heavy,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Fast => "fast",
            ModelTier::Default => "default",
            ModelTier::Code => "code",
            ModelTier::Frontier => "frontier",
            ModelTier::Heavy => "heavy",
        }
    }

    /// Admission priority derived from the classified tier.
    pub fn priority(&self) -> Priority {
        match self {
            ModelTier::Fast => Priority::High,
            ModelTier::Default => Priority::Normal,
            ModelTier::Code | ModelTier::Frontier | ModelTier::Heavy => Priority::Low,
        }
    }

    /// Next more capable tier, used when a task proves too hard.
    pub fn escalate(&self) -> Option<ModelTier> {
        match self {
            ModelTier::Fast => Some(ModelTier::Default),
            ModelTier::Default | ModelTier::Code => Some(ModelTier::Frontier),
            ModelTier::Frontier => Some(ModelTier::Heavy),
            ModelTier::Heavy => None,
        }
    }

    /// Next cheaper/faster tier, used when the current one is saturated.
    pub fn downgrade(&self) -> Option<ModelTier> {
        match self {
            ModelTier::Heavy => Some(ModelTier::Frontier),
            ModelTier::Frontier | ModelTier::Code => Some(ModelTier::Default),
            ModelTier::Default => Some(ModelTier::Fast),
            ModelTier::Fast => None,
        }
    }

    /// Tier to use after the loop has invoked code-execution or heavy-compute tools.
    pub fn for_heavy_tools(&self) -> ModelTier {
        match self {
            ModelTier::Fast | ModelTier::Default => ModelTier::Code,
            other => *other,
        }
    }

    /// The least capable tier whose context window is larger than this one's.
    pub fn larger_context(&self, models: &ModelsConfig) -> Option<ModelTier> {
        let current = models.context_window(*self);
        ModelTier::all()
            .into_iter()
            .filter(|t| models.context_window(*t) > current)
            .min_by_key(|t| (models.context_window(*t), *t))
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(ModelTier::Fast),
            "default" => Ok(ModelTier::Default),
            "code" => Ok(ModelTier::Code),
            "frontier" => Ok(ModelTier::Frontier),
            "heavy" => Ok(ModelTier::Heavy),
            other => Err(format!("unknown model tier '{}'", other)),
        }
    }
}

/// Queue lane. Fixed at admission and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn all() -> [Priority; 3] {
        [Priority::High, Priority::Normal, Priority::Low]
    }

    /// Lane index, highest priority first.
    pub fn index(&self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(ModelTier::Fast.priority(), Priority::High);
        assert_eq!(ModelTier::Default.priority(), Priority::Normal);
        assert_eq!(ModelTier::Code.priority(), Priority::Low);
        assert_eq!(ModelTier::Frontier.priority(), Priority::Low);
        assert_eq!(ModelTier::Heavy.priority(), Priority::Low);
    }

    #[test]
    fn test_escalation_terminates() {
        let mut tier = ModelTier::Fast;
        let mut steps = 0;
        while let Some(next) = tier.escalate() {
            tier = next;
            steps += 1;
        }
        assert_eq!(tier, ModelTier::Heavy);
        assert_eq!(steps, 3);
    }

    #[test]
    fn test_downgrade_terminates() {
        assert_eq!(ModelTier::Code.downgrade(), Some(ModelTier::Default));
        assert_eq!(ModelTier::Fast.downgrade(), None);
    }

    #[test]
    fn test_heavy_tool_upgrade() {
        assert_eq!(ModelTier::Default.for_heavy_tools(), ModelTier::Code);
        assert_eq!(ModelTier::Frontier.for_heavy_tools(), ModelTier::Frontier);
    }

    #[test]
    fn test_larger_context_uses_windows() {
        let models = ModelsConfig::default();
        assert_eq!(
            ModelTier::Fast.larger_context(&models),
            Some(ModelTier::Default)
        );
        // code and frontier share a window, so the next step up is heavy
        assert_eq!(
            ModelTier::Code.larger_context(&models),
            Some(ModelTier::Heavy)
        );
        assert_eq!(ModelTier::Heavy.larger_context(&models), None);
    }

    #[test]
    fn test_tier_parse_roundtrip() {
        for tier in ModelTier::all() {
            assert_eq!(tier.as_str().parse::<ModelTier>().unwrap(), tier);
        }
        assert!("turbo".parse::<ModelTier>().is_err());
    }
}
