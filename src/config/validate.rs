//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

use crate::config::Config;
use crate::guard::BucketKey;

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "models",
    "routing",
    "queue",
    "rate_limits",
    "tasks",
    "agent",
    "gateway",
    "tool_service",
    "health",
    "logging",
];

/// Known fields per section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("models", &["fast", "default", "code", "frontier", "heavy"]),
    ("routing", &["frontier_length_threshold", "fast_path_max_len"]),
    (
        "queue",
        &[
            "workers",
            "max_depth",
            "busy_depth",
            "workspace_fraction",
            "weights",
        ],
    ),
    ("rate_limits", &["max_wait_ms", "buckets"]),
    (
        "tasks",
        &[
            "max_running_per_workspace",
            "timeout_secs",
            "retention_secs",
            "gc_interval_secs",
        ],
    ),
    (
        "agent",
        &[
            "max_turns",
            "max_tool_repeats",
            "dedup_window_ms",
            "keep_recent_tool_results",
            "max_retries",
            "retry_base_ms",
            "retry_max_ms",
            "max_tokens",
            "temperature",
            "system_prompt",
        ],
    ),
    ("gateway", &["api_base", "api_key", "timeout_secs"]),
    ("tool_service", &["base_url", "api_key", "timeout_secs"]),
    ("health", &["enabled", "host", "port"]),
    ("logging", &["level", "format", "file"]),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_field(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let msg = match suggest_field(key, known) {
        Some(hint) => format!("Unknown field '{}' - {}", key, hint),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic::new(DiagnosticLevel::Error, path, msg)
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "",
                "Config must be a JSON object",
            ));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let known_set: HashSet<&str> = KNOWN_TOP_LEVEL.iter().copied().collect();
    let mut has_unknown = false;
    for key in obj.keys() {
        if !known_set.contains(key.as_str()) {
            has_unknown = true;
            diagnostics.push(unknown_field(key.clone(), key, KNOWN_TOP_LEVEL));
        }
    }

    for (section, fields) in KNOWN_SECTIONS {
        let Some(section_obj) = obj.get(*section).and_then(|v| v.as_object()) else {
            continue;
        };
        for key in section_obj.keys() {
            if !fields.contains(&key.as_str()) {
                has_unknown = true;
                diagnostics.push(unknown_field(format!("{}.{}", section, key), key, fields));
            }
        }
    }

    // Bucket keys are free-form strings in JSON, so check them explicitly.
    if let Some(buckets) = obj
        .get("rate_limits")
        .and_then(|v| v.get("buckets"))
        .and_then(|v| v.as_object())
    {
        for key in buckets.keys() {
            if BucketKey::parse(key).is_none() {
                has_unknown = true;
                diagnostics.push(Diagnostic::new(
                    DiagnosticLevel::Error,
                    format!("rate_limits.buckets.{}", key),
                    "Unknown bucket (expected model:<tier> or api:<family>)",
                ));
            }
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }

    diagnostics
}

/// Check the loaded configuration for values that parse but cannot work.
pub fn validate_semantics(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.queue.workers == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "queue.workers",
            "Must be at least 1",
        ));
    }
    let fraction = config.queue.workspace_fraction;
    if !(fraction > 0.0 && fraction <= 1.0) {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "queue.workspace_fraction",
            format!("{} is outside (0, 1]", fraction),
        ));
    }
    if config.queue.busy_depth > config.queue.max_depth {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "queue.busy_depth",
            "Greater than max_depth, the queue will reject before it reports busy",
        ));
    }
    if config.queue.weights.low == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "queue.weights.low",
            "Zero weight lets the low lane starve",
        ));
    }

    for (key, bucket) in &config.rate_limits.buckets {
        if bucket.capacity <= 0.0 {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                format!("rate_limits.buckets.{}", key),
                "Capacity must be positive",
            ));
        } else if bucket.refill_per_sec <= 0.0 {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Warn,
                format!("rate_limits.buckets.{}", key),
                "No refill, the bucket empties permanently",
            ));
        }
    }

    if config.gateway.api_key.is_none() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "gateway.api_key",
            "Not set, model calls will be rejected by the gateway",
        ));
    }

    diagnostics
}
