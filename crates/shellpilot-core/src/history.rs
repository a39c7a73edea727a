//! Conversation history.
//!
//! Turns are the unit of record: one user utterance, one assistant
//! explanation, or one executed command with its output. The history is
//! append-only and bounded; turns are never mutated or reordered once
//! recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Unique identifier for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        write!(f, "{s}")
    }
}

/// One recorded exchange unit in the conversation.
///
/// A turn carrying a command is only constructed after execution has
/// produced an exit status (`command_result`) or failed outright
/// (`command_failure`), so the history never contains a command with an
/// unknown outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: TurnId,
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,

    /// The shell command this turn records, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Captured output of the command.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Exit status of the command. `None` on a command turn means the
    /// command never produced one; `text` then carries the failure marker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
}

impl Turn {
    fn plain(role: Role, text: String) -> Self {
        Self {
            id: TurnId::new(),
            timestamp: Utc::now(),
            role,
            text,
            command: None,
            output: None,
            exit_status: None,
        }
    }

    /// A user utterance.
    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text.into())
    }

    /// An assistant explanation with no command attached.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text.into())
    }

    /// An out-of-band notice (connection changes, declined commands, ...).
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text.into())
    }

    /// An executed command together with its captured output and exit status.
    pub fn command_result(
        command: impl Into<String>,
        output: impl Into<String>,
        exit_status: i32,
    ) -> Self {
        let command = command.into();
        Self {
            id: TurnId::new(),
            timestamp: Utc::now(),
            role: Role::Assistant,
            text: format!("Executed: {command}"),
            command: Some(command),
            output: Some(output.into()),
            exit_status: Some(exit_status),
        }
    }

    /// A command that never produced an exit status. The text is the
    /// explicit failure marker required for command turns.
    pub fn command_failure(command: impl Into<String>, error: impl std::fmt::Display) -> Self {
        let command = command.into();
        Self {
            id: TurnId::new(),
            timestamp: Utc::now(),
            role: Role::Assistant,
            text: format!("Command failed: {error}"),
            command: Some(command),
            output: None,
            exit_status: None,
        }
    }

    /// Render this turn as one role-tagged block for the model context.
    pub fn context_text(&self) -> String {
        match (&self.command, &self.output) {
            (Some(command), Some(output)) => {
                format!("{}: Executed: {command}\nOutput: {output}", self.role)
            }
            _ => format!("{}: {}", self.role, self.text),
        }
    }
}

/// Bounded, append-only sequence of turns, oldest first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    max_len: usize,
}

impl ConversationHistory {
    /// Create a history holding at most `max_len` turns (minimum 1).
    pub fn new(max_len: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_len: max_len.max(1),
        }
    }

    /// Append a turn, evicting the oldest if the bound is exceeded.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_len {
            self.turns.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Iterate turns in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Format the last `window` turns as role-tagged text for the model.
    /// Returns an empty string when the history is empty.
    pub fn context_window(&self, window: usize) -> String {
        let skip = self.turns.len().saturating_sub(window);
        self.turns
            .iter()
            .skip(skip)
            .map(Turn::context_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod turn {
        use super::*;

        #[test]
        fn user_turn_has_no_command() {
            let turn = Turn::user("list files");
            assert_eq!(turn.role, Role::User);
            assert_eq!(turn.text, "list files");
            assert!(turn.command.is_none());
            assert!(turn.exit_status.is_none());
        }

        #[test]
        fn command_result_records_exit_status() {
            let turn = Turn::command_result("ls /var/log", "syslog\n", 0);
            assert_eq!(turn.role, Role::Assistant);
            assert_eq!(turn.command.as_deref(), Some("ls /var/log"));
            assert_eq!(turn.output.as_deref(), Some("syslog\n"));
            assert_eq!(turn.exit_status, Some(0));
        }

        #[test]
        fn command_failure_carries_marker() {
            let turn = Turn::command_failure("uptime", "connection reset");
            assert!(turn.text.contains("Command failed"));
            assert!(turn.text.contains("connection reset"));
            assert!(turn.exit_status.is_none());
            assert_eq!(turn.command.as_deref(), Some("uptime"));
        }

        #[test]
        fn context_text_for_plain_turn() {
            let turn = Turn::user("hello");
            assert_eq!(turn.context_text(), "user: hello");
        }

        #[test]
        fn context_text_for_command_turn() {
            let turn = Turn::command_result("pwd", "/home/user", 0);
            assert_eq!(turn.context_text(), "assistant: Executed: pwd\nOutput: /home/user");
        }

        #[test]
        fn serialization_roundtrip() {
            let turn = Turn::command_result("pwd", "/tmp", 0);
            let json = serde_json::to_string(&turn).unwrap();
            let parsed: Turn = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.id, turn.id);
            assert_eq!(parsed.command, turn.command);
            assert_eq!(parsed.exit_status, Some(0));
        }

        #[test]
        fn optional_fields_skipped_when_absent() {
            let turn = Turn::assistant("hi");
            let json = serde_json::to_string(&turn).unwrap();
            assert!(!json.contains("command"));
            assert!(!json.contains("exitStatus"));
        }
    }

    mod history {
        use super::*;

        #[test]
        fn push_preserves_insertion_order() {
            let mut history = ConversationHistory::new(10);
            history.push(Turn::user("one"));
            history.push(Turn::assistant("two"));
            history.push(Turn::user("three"));

            let texts: Vec<_> = history.iter().map(|t| t.text.as_str()).collect();
            assert_eq!(texts, vec!["one", "two", "three"]);
        }

        #[test]
        fn timestamps_are_monotonic() {
            let mut history = ConversationHistory::new(10);
            for i in 0..5 {
                history.push(Turn::user(format!("turn {i}")));
            }
            let stamps: Vec<_> = history.iter().map(|t| t.timestamp).collect();
            for pair in stamps.windows(2) {
                assert!(pair[0] <= pair[1]);
            }
        }

        #[test]
        fn evicts_oldest_first_at_bound() {
            let mut history = ConversationHistory::new(3);
            for i in 0..5 {
                history.push(Turn::user(format!("turn {i}")));
            }
            assert_eq!(history.len(), 3);
            let texts: Vec<_> = history.iter().map(|t| t.text.as_str()).collect();
            assert_eq!(texts, vec!["turn 2", "turn 3", "turn 4"]);
        }

        #[test]
        fn length_never_exceeds_max() {
            let mut history = ConversationHistory::new(4);
            for i in 0..100 {
                history.push(Turn::user(format!("{i}")));
                assert!(history.len() <= 4);
            }
        }

        #[test]
        fn zero_max_len_is_clamped() {
            let mut history = ConversationHistory::new(0);
            history.push(Turn::user("kept"));
            assert_eq!(history.len(), 1);
        }

        #[test]
        fn roundtrip_reads_back_same_turns() {
            let mut history = ConversationHistory::new(50);
            let originals: Vec<Turn> = (0..10).map(|i| Turn::user(format!("msg {i}"))).collect();
            for turn in &originals {
                history.push(turn.clone());
            }

            assert_eq!(history.len(), originals.len());
            for (read, original) in history.iter().zip(&originals) {
                assert_eq!(read.id, original.id);
                assert_eq!(read.text, original.text);
            }
        }

        #[test]
        fn context_window_takes_last_n() {
            let mut history = ConversationHistory::new(10);
            history.push(Turn::user("a"));
            history.push(Turn::assistant("b"));
            history.push(Turn::user("c"));

            let window = history.context_window(2);
            assert_eq!(window, "assistant: b\nuser: c");
        }

        #[test]
        fn context_window_larger_than_history() {
            let mut history = ConversationHistory::new(10);
            history.push(Turn::user("only"));
            assert_eq!(history.context_window(5), "user: only");
        }

        #[test]
        fn context_window_empty_history() {
            let history = ConversationHistory::new(10);
            assert_eq!(history.context_window(5), "");
        }
    }
}
