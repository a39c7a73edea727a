//! Utterance interpretation.
//!
//! Sends a user utterance plus a window of recent conversation to a
//! language-model endpoint and parses the completion into zero or more
//! candidate shell commands with an explanation. Each call is stateless:
//! all context travels in the prompt, never in server-side session state.

mod ollama;
mod parser;

pub use ollama::OllamaClient;
pub use parser::{parse_response, Interpretation};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum InterpreterError {
    #[error("Model endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Model request timed out: {0}")]
    Timeout(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),
}

/// Abstraction over the completion endpoint, mockable in tests.
pub trait ModelClient: Send {
    /// Produce a raw text completion for `prompt`.
    fn generate(&self, prompt: &str) -> Result<String, InterpreterError>;
}

impl ModelClient for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, InterpreterError> {
        OllamaClient::generate(self, prompt)
    }
}

/// Persona the assistant presents in the prompt.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub role: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Jarvis".to_string(),
            role: "Linux Expert".to_string(),
        }
    }
}

/// Turns utterances into candidate commands via a [`ModelClient`].
pub struct Interpreter {
    client: Box<dyn ModelClient>,
    persona: Persona,
}

impl Interpreter {
    pub fn new(client: Box<dyn ModelClient>, persona: Persona) -> Self {
        Self { client, persona }
    }

    /// Interpret `utterance` given role-tagged `history_window` text.
    ///
    /// Network and timeout failures surface as errors; a completion in an
    /// unexpected shape degrades to a zero-command interpretation.
    pub fn interpret(
        &self,
        utterance: &str,
        history_window: &str,
    ) -> Result<Interpretation, InterpreterError> {
        let prompt = build_prompt(&self.persona, history_window, utterance);
        let completion = self.client.generate(&prompt)?;
        Ok(parse_response(&completion))
    }
}

/// Build the instruction prompt. The DECISION/COMMAND/RESPONSE format is
/// the contract [`parse_response`] is written against.
fn build_prompt(persona: &Persona, history_window: &str, utterance: &str) -> String {
    let context = if history_window.is_empty() {
        String::new()
    } else {
        format!("\n\nPrevious conversation context:\n{history_window}\n")
    };

    format!(
        r#"You are {name}, a {role}. YOU HAVE FULL SSH ACCESS TO THE SERVER and can run any command.
{context}
A user has now requested: "{utterance}"

IMPORTANT INSTRUCTIONS:
- You MUST respond in EXACTLY this format, with each line starting with the exact keywords below
- Do NOT use JSON, do NOT use code blocks, do NOT deviate from this format
- Each response must have these 3 lines:

DECISION: [COMMAND if user wants you to run something, or CONVERSATION if just talking]
COMMAND: [If DECISION is COMMAND, write the single shell command. If DECISION is CONVERSATION, write NONE]
RESPONSE: [Your analysis or conversation response]

Example 1 - Running a command:
User: "show me the current directory"
DECISION: COMMAND
COMMAND: pwd
RESPONSE: I'll show you the current directory using the pwd command.

Example 2 - Conversation:
User: "hello"
DECISION: CONVERSATION
COMMAND: NONE
RESPONSE: Hello! I'm {name}, your {role}. How can I help you today?
"#,
        name = persona.name,
        role = persona.role,
        context = context,
        utterance = utterance,
    )
}
