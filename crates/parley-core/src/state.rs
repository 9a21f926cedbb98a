use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::NodeKind;

/// Outcome status shared by step results and history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    InProgress,
    WaitingForInput,
    Completed,
    Error,
}

impl StepStatus {
    /// Chat-completion `finish_reason` for this status.
    pub fn finish_reason(&self) -> Option<&'static str> {
        match self {
            Self::Completed => Some("stop"),
            Self::WaitingForInput => Some("function_call"),
            Self::InProgress => None,
            Self::Error => Some("length"),
        }
    }

    /// Whether the driver loop stops on this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// Handler-to-driver contract describing the outcome of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepResult {
    /// Continue to `next`, or complete the run when there is no next node.
    pub fn advance(output: impl Into<String>, next: Option<String>) -> Self {
        let status = if next.is_some() {
            StepStatus::InProgress
        } else {
            StepStatus::Completed
        };
        Self {
            status,
            output: Some(output.into()),
            next_node_id: next,
            message: None,
        }
    }

    pub fn waiting(output: impl Into<String>) -> Self {
        Self {
            status: StepStatus::WaitingForInput,
            output: Some(output.into()),
            next_node_id: None,
            message: None,
        }
    }

    pub fn completed(output: Option<String>) -> Self {
        Self {
            status: StepStatus::Completed,
            output,
            next_node_id: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StepStatus::Error,
            output: None,
            next_node_id: None,
            message: Some(message.into()),
        }
    }

    /// Text shown to the caller: the output, or the error message.
    pub fn display_text(&self) -> &str {
        self.output
            .as_deref()
            .or(self.message.as_deref())
            .unwrap_or("")
    }
}

/// One executed node in a run's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub node_id: String,
    pub node_type: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
}

impl StepRecord {
    pub fn new(node_id: impl Into<String>, node_type: NodeKind, status: StepStatus) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            input: None,
            output: None,
            message: None,
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = Some(input);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Pause bookkeeping for interface nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PauseState {
    pub has_paused_once: bool,
    pub pause_count: u32,
    #[serde(default)]
    pub first_pause_node_id: Option<String>,
    #[serde(default)]
    pub last_pause_node_id: Option<String>,
}

/// Mutable record of one conversation's run.
///
/// Created once by the first turn, then loaded, mutated and saved on every
/// later turn. `history` only grows; `completed` is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionState {
    pub current_node_id: String,
    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub history: Vec<StepRecord>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub pause: PauseState,
}

impl ExecutionState {
    /// A fresh run positioned at `start_node_id`.
    pub fn new(start_node_id: impl Into<String>) -> Self {
        Self {
            current_node_id: start_node_id.into(),
            variables: HashMap::new(),
            history: Vec::new(),
            completed: false,
            pause: PauseState::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.variables.get(key)
    }

    /// Get a variable as a string, if it's a non-empty string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.variables
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables
            .insert(key.into(), serde_json::Value::String(value.into()));
    }

    /// Append a history record.
    pub fn record(&mut self, record: StepRecord) {
        self.history.push(record);
    }

    /// Output of the most recent history record that has one.
    pub fn last_output(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .filter_map(|r| r.output.as_deref())
            .find(|o| !o.is_empty())
    }

    /// The most recent user input: `lastUserInput`, else `userInput`.
    pub fn latest_user_input(&self) -> Option<&str> {
        self.get_str("lastUserInput")
            .or_else(|| self.get_str("userInput"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(StepStatus::Completed.finish_reason(), Some("stop"));
        assert_eq!(
            StepStatus::WaitingForInput.finish_reason(),
            Some("function_call")
        );
        assert_eq!(StepStatus::InProgress.finish_reason(), None);
        assert_eq!(StepStatus::Error.finish_reason(), Some("length"));
    }

    #[test]
    fn test_advance_without_next_completes() {
        let r = StepResult::advance("done", None);
        assert_eq!(r.status, StepStatus::Completed);
        let r = StepResult::advance("more", Some("n2".into()));
        assert_eq!(r.status, StepStatus::InProgress);
        assert_eq!(r.next_node_id.as_deref(), Some("n2"));
    }

    #[test]
    fn test_last_output_skips_empty() {
        let mut state = ExecutionState::new("begin");
        state.record(StepRecord::new("a", NodeKind::Begin, StepStatus::InProgress).with_output("hi"));
        state.record(StepRecord::new("b", NodeKind::Retrieval, StepStatus::InProgress).with_output(""));
        state.record(StepRecord::new("c", NodeKind::Categorize, StepStatus::InProgress));
        assert_eq!(state.last_output(), Some("hi"));
    }

    #[test]
    fn test_latest_user_input_priority() {
        let mut state = ExecutionState::new("begin");
        assert_eq!(state.latest_user_input(), None);
        state.set_str("userInput", "old");
        assert_eq!(state.latest_user_input(), Some("old"));
        state.set_str("lastUserInput", "new");
        assert_eq!(state.latest_user_input(), Some("new"));
    }

    #[test]
    fn test_state_json_shape() {
        let mut state = ExecutionState::new("begin");
        state.pause.has_paused_once = true;
        state.pause.last_pause_node_id = Some("ui".into());
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["currentNodeId"], "begin");
        assert_eq!(json["pause"]["hasPausedOnce"], true);
        assert_eq!(json["pause"]["lastPauseNodeId"], "ui");

        let back: ExecutionState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
