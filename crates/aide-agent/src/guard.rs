//! Per-task limiter for tool-calling loops.

use std::collections::{HashMap, HashSet};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    StepLimit { max_steps: usize },
    RepeatedTool { name: String },
    LoopDetected,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepLimit { .. } => "step_limit",
            Self::RepeatedTool { .. } => "repeated_tool",
            Self::LoopDetected => "loop_detected",
        }
    }
}

/// Owned by exactly one task execution and dropped with it.
#[derive(Clone, Debug)]
pub struct IterationGuard {
    max_steps: usize,
    tool_calls: HashMap<String, usize>,
    fingerprints: HashSet<String>,
    stop: Option<StopReason>,
}

impl IterationGuard {
    pub fn new(max_steps: usize) -> Self {
        Self {
            max_steps,
            tool_calls: HashMap::new(),
            fingerprints: HashSet::new(),
            stop: None,
        }
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    /// True once `steps` reaches the ceiling or a repetition was seen.
    pub fn should_stop(&mut self, steps: usize) -> bool {
        if self.stop.is_none() && steps >= self.max_steps {
            self.stop = Some(StopReason::StepLimit {
                max_steps: self.max_steps,
            });
        }
        self.stop.is_some()
    }

    /// Counts one call of `name`. The second call of the same name stops the task.
    pub fn record_tool_call(&mut self, name: &str) -> bool {
        let count = self.tool_calls.entry(name.to_string()).or_insert(0);
        *count += 1;
        if *count >= 2 && self.stop.is_none() {
            tracing::debug!(tool = name, "repeated tool call, stopping task");
            self.stop = Some(StopReason::RepeatedTool {
                name: name.to_string(),
            });
        }
        *count >= 2
    }

    /// Returns true when the normalised `content` was already seen.
    pub fn track_conversation_state(&mut self, content: &str) -> bool {
        let repeated = !self.fingerprints.insert(fingerprint(content));
        if repeated && self.stop.is_none() {
            self.stop = Some(StopReason::LoopDetected);
        }
        repeated
    }

    pub fn tool_call_count(&self, name: &str) -> usize {
        self.tool_calls.get(name).copied().unwrap_or(0)
    }

    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop.as_ref()
    }

    pub fn reset(&mut self) {
        self.tool_calls.clear();
        self.fingerprints.clear();
        self.stop = None;
    }
}

fn fingerprint(content: &str) -> String {
    let normalized = content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    blake3::hash(normalized.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_exactly_at_step_ceiling() {
        let mut guard = IterationGuard::new(3);
        assert!(!guard.should_stop(0));
        assert!(!guard.should_stop(2));
        assert!(guard.should_stop(3));
        assert_eq!(
            guard.stop_reason(),
            Some(&StopReason::StepLimit { max_steps: 3 })
        );
    }

    #[test]
    fn second_call_of_same_tool_stops_regardless_of_steps() {
        let mut guard = IterationGuard::new(100);
        assert!(!guard.record_tool_call("list_tasks"));
        assert!(!guard.record_tool_call("list_events"));
        assert!(!guard.should_stop(1));
        assert!(guard.record_tool_call("list_tasks"));
        assert!(guard.should_stop(1));
        assert_eq!(
            guard.stop_reason(),
            Some(&StopReason::RepeatedTool {
                name: "list_tasks".to_string()
            })
        );
    }

    #[test]
    fn repeated_fingerprint_is_detected_after_normalisation() {
        let mut guard = IterationGuard::new(100);
        assert!(!guard.track_conversation_state("Checking  the Calendar"));
        assert!(guard.track_conversation_state("checking the\ncalendar"));
        assert_eq!(guard.stop_reason(), Some(&StopReason::LoopDetected));
    }

    #[test]
    fn reset_clears_all_state() {
        let mut guard = IterationGuard::new(2);
        guard.record_tool_call("a");
        guard.record_tool_call("a");
        guard.reset();
        assert_eq!(guard.tool_call_count("a"), 0);
        assert!(!guard.should_stop(1));
    }
}
