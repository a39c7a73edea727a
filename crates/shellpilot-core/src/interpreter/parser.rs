//! Model response parsing.
//!
//! The model is told to answer in a strict line format:
//!
//! ```text
//! DECISION: COMMAND | CONVERSATION
//! COMMAND: <shell command or NONE>
//! RESPONSE: <free text, may span lines>
//! ```
//!
//! The model is an untrusted text generator, so parsing is defensive: a
//! response that deviates from the format degrades to a zero-command
//! interpretation carrying whatever text was produced. Parsing never fails.

use serde::Serialize;

/// What the model proposed for one utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    /// The model's explanation or conversational reply.
    pub explanation: String,

    /// Proposed shell commands in execution order. Empty when the model
    /// decided the utterance was conversation, or when nothing could be
    /// recognized.
    pub commands: Vec<String>,
}

/// Parse a raw model completion into an [`Interpretation`].
pub fn parse_response(raw: &str) -> Interpretation {
    let mut decision: Option<String> = None;
    let mut commands: Vec<String> = Vec::new();
    let mut explanation = String::new();
    let mut in_response = false;
    let mut saw_any_marker = false;

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("DECISION:") {
            decision = Some(rest.trim().to_string());
            in_response = false;
            saw_any_marker = true;
        } else if let Some(rest) = line.strip_prefix("COMMAND:") {
            if let Some(command) = clean_command(rest) {
                commands.push(command);
            }
            in_response = false;
            saw_any_marker = true;
        } else if let Some(rest) = line.strip_prefix("RESPONSE:") {
            explanation = rest.trim().to_string();
            in_response = true;
            saw_any_marker = true;
        } else if in_response {
            explanation.push('\n');
            explanation.push_str(line);
        }
    }

    // Nothing recognizable: surface the raw text, propose nothing.
    if !saw_any_marker {
        return Interpretation {
            explanation: raw.trim().to_string(),
            commands: Vec::new(),
        };
    }

    // Commands only count when the model explicitly decided to run one.
    let wants_command = decision
        .as_deref()
        .map(|d| d.eq_ignore_ascii_case("COMMAND"))
        .unwrap_or(false);
    if !wants_command {
        commands.clear();
    }

    Interpretation {
        explanation: explanation.trim().to_string(),
        commands,
    }
}

/// Normalize one COMMAND line. Strips the NONE placeholder, surrounding
/// backticks, and a leading `$ ` prompt the model sometimes adds.
fn clean_command(raw: &str) -> Option<String> {
    let mut cmd = raw.trim();
    cmd = cmd.trim_matches('`').trim();
    cmd = cmd.strip_prefix("$ ").unwrap_or(cmd).trim();
    if cmd.is_empty() || cmd.eq_ignore_ascii_case("NONE") {
        return None;
    }
    Some(cmd.to_string())
}
