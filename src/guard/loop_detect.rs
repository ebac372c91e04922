//! Repeated tool-call detection within one execution.

use std::collections::HashMap;

use serde_json::Value;

use super::call_fingerprint;

/// Instruction fed back to the model in place of a suppressed call.
pub const REPEAT_CORRECTION: &str = "This exact tool call (same tool, same arguments) has already been made several times in this conversation and will not be executed again. Use the results you already have, try a different tool or different arguments, or answer with what you know so far.";

/// Outcome of recording a tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatVerdict {
    /// Call may run. `count` includes this call.
    Allowed { count: u32 },
    /// Call exceeded the repeat limit and must not reach the tool layer.
    Suppressed { count: u32 },
}

/// Counts identical (tool, params) calls for a single execution.
///
/// Owned by one agent loop, never shared.
#[derive(Debug)]
pub struct RepeatDetector {
    counts: HashMap<String, u32>,
    max_repeats: u32,
}

impl RepeatDetector {
    /// Allow each distinct call `max_repeats` times; later ones are suppressed.
    pub fn new(max_repeats: u32) -> Self {
        Self {
            counts: HashMap::new(),
            max_repeats,
        }
    }

    pub fn record(&mut self, tool: &str, params: &Value) -> RepeatVerdict {
        let count = self
            .counts
            .entry(call_fingerprint(tool, params))
            .and_modify(|c| *c += 1)
            .or_insert(1);
        if *count > self.max_repeats {
            RepeatVerdict::Suppressed { count: *count }
        } else {
            RepeatVerdict::Allowed { count: *count }
        }
    }
}
