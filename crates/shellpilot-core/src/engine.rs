//! Conversation engine.
//!
//! Owns the turn lifecycle: a user utterance goes to the model, the
//! model's proposed commands are risk-classified, risky ones wait for an
//! explicit go-ahead, runnable ones execute over the transport, and every
//! step lands in bounded history and on the event bus. One turn is in
//! flight at a time; a new submission while one is pending is rejected
//! outright rather than queued.

use crate::event_bus::{EngineEvent, EventBus};
use crate::history::{ConversationHistory, Turn};
use crate::interpreter::{Interpreter, InterpreterError};
use crate::safety::{RiskLevel, SafetyGate, Verdict};
use crate::transport::{CancelToken, SessionTransport, TransportError};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Where the engine is in the turn lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// Ready for a new utterance.
    Idle,
    /// Waiting on the model endpoint.
    AwaitingModel,
    /// Commands are pending an explicit confirm or deny.
    AwaitingConfirmation,
    /// Commands are running on the transport.
    Executing,
    /// A transport failure needs acknowledging before new work.
    Error,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::AwaitingModel => "awaiting model",
            EngineState::AwaitingConfirmation => "awaiting confirmation",
            EngineState::Executing => "executing",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A turn is already in flight (engine is {0})")]
    Busy(EngineState),

    #[error("No commands are awaiting confirmation (engine is {0})")]
    NotAwaitingConfirmation(EngineState),

    #[error("No error to acknowledge (engine is {0})")]
    NotInError(EngineState),
}

/// A proposed command together with its risk verdict.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCommand {
    pub raw: String,
    pub risk: RiskLevel,
    pub rationale: String,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Turns retained in history.
    pub max_history: usize,
    /// Turns sent to the model as context.
    pub history_window: usize,
    /// Per-command output cap in characters.
    pub max_output_chars: usize,
    /// Per-command execution deadline.
    pub command_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_history: 200,
            history_window: 5,
            max_output_chars: 150_000,
            command_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ConversationEngine {
    state: EngineState,
    history: ConversationHistory,
    transport: Box<dyn SessionTransport>,
    interpreter: Interpreter,
    gate: SafetyGate,
    options: EngineOptions,
    bus: Arc<EventBus>,
    cancel: CancelToken,
    pending: Vec<CandidateCommand>,
}

impl ConversationEngine {
    pub fn new(
        transport: Box<dyn SessionTransport>,
        interpreter: Interpreter,
        gate: SafetyGate,
        options: EngineOptions,
        bus: Arc<EventBus>,
    ) -> Self {
        let history = ConversationHistory::new(options.max_history);
        Self {
            state: EngineState::Idle,
            history,
            transport,
            interpreter,
            gate,
            options,
            bus,
            cancel: CancelToken::new(),
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Commands waiting on [`confirm`](Self::confirm) or
    /// [`deny`](Self::deny), in execution order.
    pub fn pending(&self) -> &[CandidateCommand] {
        &self.pending
    }

    /// A handle front ends can use to interrupt the in-flight turn.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Request cancellation of the in-flight turn, best effort.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Metadata for the session this engine drives.
    pub fn session(&self) -> crate::transport::Session {
        self.transport.session()
    }

    /// Swap the active session for a new one, tearing the old one down.
    /// Only allowed at rest so history never straddles two hosts
    /// mid-turn.
    pub fn replace_session(
        &mut self,
        transport: Box<dyn SessionTransport>,
    ) -> Result<(), EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::Busy(self.state));
        }
        self.transport.close();
        self.transport = transport;
        let session = self.transport.session();
        self.append(Turn::system(format!(
            "Connected to {}@{}",
            session.username, session.host
        )));
        Ok(())
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Run one full turn for `utterance`.
    ///
    /// Rejected without touching history when a turn is already in flight.
    /// Model and transport failures do not bubble out of this call; they
    /// are folded into history and the engine state instead.
    pub fn submit(&mut self, utterance: &str) -> Result<(), EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::Busy(self.state));
        }
        self.cancel.reset();

        // Context is the window before this utterance; the utterance
        // itself travels separately in the prompt.
        let context = self.history.context_window(self.options.history_window);
        self.append(Turn::user(utterance));
        self.set_state(EngineState::AwaitingModel);

        let interpretation = match self.interpreter.interpret(utterance, &context) {
            Ok(interpretation) => interpretation,
            Err(e) => {
                log::warn!("interpretation failed: {e}");
                self.append(Turn::assistant(describe_interpreter_error(&e)));
                self.set_state(EngineState::Idle);
                return Ok(());
            }
        };

        // Cancellation during the model call cannot abort the request
        // itself, but nothing proposed afterwards may run.
        if self.cancel.is_cancelled() {
            self.append(Turn::system("Cancelled."));
            self.set_state(EngineState::Idle);
            return Ok(());
        }

        if !interpretation.explanation.is_empty() {
            self.append(Turn::assistant(interpretation.explanation.clone()));
        }
        if interpretation.commands.is_empty() {
            self.set_state(EngineState::Idle);
            return Ok(());
        }

        let mut runnable = Vec::new();
        let mut blocked = 0usize;
        for raw in &interpretation.commands {
            let Verdict { risk, rationale } = self.gate.classify(raw);
            if risk == RiskLevel::Blocked {
                blocked += 1;
                log::warn!("blocked command dropped: {raw} ({rationale})");
                self.append(Turn::system(format!(
                    "Refused to run `{raw}`: {rationale}"
                )));
            } else {
                runnable.push(CandidateCommand {
                    raw: raw.clone(),
                    risk,
                    rationale,
                });
            }
        }

        if runnable.is_empty() {
            if blocked > 0 {
                self.append(Turn::assistant(
                    "Every proposed command was refused as unsafe; nothing was run.",
                ));
            }
            self.set_state(EngineState::Idle);
            return Ok(());
        }

        // A batch that lost a blocked command is held too: the survivors
        // came from a plan the gate already distrusted.
        if blocked > 0 || runnable.iter().any(|c| c.risk == RiskLevel::Confirm) {
            self.pending = runnable;
            self.set_state(EngineState::AwaitingConfirmation);
            return Ok(());
        }

        self.execute_batch(runnable);
        Ok(())
    }

    /// Approve and run the pending commands.
    pub fn confirm(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::AwaitingConfirmation {
            return Err(EngineError::NotAwaitingConfirmation(self.state));
        }
        let batch = std::mem::take(&mut self.pending);
        self.execute_batch(batch);
        Ok(())
    }

    /// Discard the pending commands without running them.
    pub fn deny(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::AwaitingConfirmation {
            return Err(EngineError::NotAwaitingConfirmation(self.state));
        }
        let dropped: Vec<String> = self.pending.drain(..).map(|c| c.raw).collect();
        log::info!("user declined {} pending command(s)", dropped.len());
        self.append(Turn::system(format!(
            "Declined: {}",
            dropped.join(", ")
        )));
        self.set_state(EngineState::Idle);
        Ok(())
    }

    /// Leave the error state and accept new utterances again.
    pub fn acknowledge_error(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Error {
            return Err(EngineError::NotInError(self.state));
        }
        self.set_state(EngineState::Idle);
        Ok(())
    }

    /// Run a batch in order. Stops at the first non-zero exit, skipping the
    /// rest. Transport failures park the engine in [`EngineState::Error`];
    /// cancellation and ordinary command failures return it to idle.
    fn execute_batch(&mut self, batch: Vec<CandidateCommand>) {
        self.set_state(EngineState::Executing);
        let dir_before = self.transport.current_dir().map(str::to_string);

        for candidate in &batch {
            if self.cancel.is_cancelled() {
                self.append(Turn::system("Execution cancelled."));
                self.set_state(EngineState::Idle);
                return;
            }

            match self
                .transport
                .execute(&candidate.raw, self.options.command_timeout, &self.cancel)
            {
                Ok(result) => {
                    let output =
                        truncate_output(&result.combined_output(), self.options.max_output_chars);
                    let exit_code = result.exit_code;
                    self.append(Turn::command_result(&candidate.raw, output, exit_code));
                    if exit_code != 0 {
                        log::info!(
                            "command exited with status {exit_code}, skipping the rest of the batch"
                        );
                        break;
                    }
                }
                Err(TransportError::Cancelled) => {
                    self.append(Turn::system(format!(
                        "Cancelled while running `{}`.",
                        candidate.raw
                    )));
                    self.set_state(EngineState::Idle);
                    return;
                }
                Err(e) => {
                    log::error!("transport failure running `{}`: {e}", candidate.raw);
                    self.append(Turn::command_failure(&candidate.raw, &e));
                    self.set_state(EngineState::Error);
                    return;
                }
            }
        }

        let dir_after = self.transport.current_dir().map(str::to_string);
        if dir_after != dir_before {
            if let Some(dir) = &dir_after {
                self.append(Turn::system(format!("Working directory is now {dir}")));
            }
        }

        self.set_state(EngineState::Idle);
    }

    fn set_state(&mut self, to: EngineState) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        self.bus.emit(EngineEvent::StateChanged { from, to });
    }

    fn append(&mut self, turn: Turn) {
        self.bus.emit(EngineEvent::TurnAppended { turn: turn.clone() });
        self.history.push(turn);
    }
}

fn describe_interpreter_error(err: &InterpreterError) -> String {
    match err {
        InterpreterError::Unreachable(detail) => {
            format!("I couldn't reach the model endpoint: {detail}")
        }
        InterpreterError::Timeout(detail) => {
            format!("The model took too long to answer: {detail}")
        }
        InterpreterError::MalformedResponse(detail) => {
            format!("The model answered in a shape I couldn't read: {detail}")
        }
    }
}

/// Cap `output` at `max_chars`, appending a marker with the original size.
fn truncate_output(output: &str, max_chars: usize) -> String {
    let total = output.chars().count();
    if total <= max_chars {
        return output.to_string();
    }
    let mut truncated: String = output.chars().take(max_chars).collect();
    truncated.push_str(&format!(
        "\n... (output truncated, {total} chars total)"
    ));
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::Role;
    use crate::interpreter::{ModelClient, Persona};
    use crate::transport::ExecResult;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedModel {
        replies: Mutex<VecDeque<Result<String, InterpreterError>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<Result<String, InterpreterError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    impl ModelClient for ScriptedModel {
        fn generate(&self, _prompt: &str) -> Result<String, InterpreterError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("DECISION: CONVERSATION\nCOMMAND: NONE\nRESPONSE: ok".into()))
        }
    }

    #[derive(Default)]
    struct MockTransport {
        executed: Arc<Mutex<Vec<String>>>,
        results: Mutex<VecDeque<Result<ExecResult, TransportError>>>,
        dir: Option<String>,
    }

    impl MockTransport {
        fn ok(stdout: &str, exit_code: i32) -> Result<ExecResult, TransportError> {
            Ok(ExecResult {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code,
                duration: Duration::from_millis(1),
            })
        }
    }

    impl SessionTransport for MockTransport {
        fn execute(
            &mut self,
            command: &str,
            _timeout: Duration,
            cancel: &CancelToken,
        ) -> Result<ExecResult, TransportError> {
            if cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }
            self.executed.lock().unwrap().push(command.to_string());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Self::ok("done\n", 0))
        }

        fn session(&self) -> crate::transport::Session {
            crate::transport::Session {
                host: "mock".to_string(),
                port: 22,
                username: "tester".to_string(),
                connected: true,
                established_at: chrono::Utc::now(),
            }
        }

        fn current_dir(&self) -> Option<&str> {
            self.dir.as_deref()
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    fn engine_with(
        replies: Vec<Result<String, InterpreterError>>,
        results: Vec<Result<ExecResult, TransportError>>,
    ) -> (ConversationEngine, Arc<Mutex<Vec<String>>>) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            executed: executed.clone(),
            results: Mutex::new(results.into()),
            dir: None,
        };
        let interpreter =
            Interpreter::new(Box::new(ScriptedModel::new(replies)), Persona::default());
        let engine = ConversationEngine::new(
            Box::new(transport),
            interpreter,
            SafetyGate::new(),
            EngineOptions::default(),
            Arc::new(EventBus::new()),
        );
        (engine, executed)
    }

    fn command_reply(command: &str) -> Result<String, InterpreterError> {
        Ok(format!(
            "DECISION: COMMAND\nCOMMAND: {command}\nRESPONSE: Running it."
        ))
    }

    #[test]
    fn conversation_reply_executes_nothing() {
        let (mut engine, executed) = engine_with(
            vec![Ok(
                "DECISION: CONVERSATION\nCOMMAND: NONE\nRESPONSE: Hello there!".into(),
            )],
            vec![],
        );

        engine.submit("hello").unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(executed.lock().unwrap().is_empty());
        let texts: Vec<_> = engine.history().iter().map(|t| t.text.clone()).collect();
        assert_eq!(texts, vec!["hello", "Hello there!"]);
    }

    #[test]
    fn safe_command_runs_without_confirmation() {
        let (mut engine, executed) =
            engine_with(vec![command_reply("ls -la")], vec![MockTransport::ok("files\n", 0)]);

        engine.submit("list files").unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(*executed.lock().unwrap(), vec!["ls -la"]);
        let last = engine.history().last().unwrap();
        assert_eq!(last.command.as_deref(), Some("ls -la"));
        assert_eq!(last.output.as_deref(), Some("files\n"));
        assert_eq!(last.exit_status, Some(0));
    }

    #[test]
    fn risky_command_waits_for_confirmation() {
        let (mut engine, executed) = engine_with(vec![command_reply("sudo systemctl restart nginx")], vec![]);

        engine.submit("restart nginx").unwrap();

        assert_eq!(engine.state(), EngineState::AwaitingConfirmation);
        assert!(executed.lock().unwrap().is_empty());
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.pending()[0].risk, RiskLevel::Confirm);

        engine.confirm().unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(*executed.lock().unwrap(), vec!["sudo systemctl restart nginx"]);
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn deny_discards_pending_without_executing() {
        let (mut engine, executed) = engine_with(vec![command_reply("sudo reboot")], vec![]);

        engine.submit("reboot the box").unwrap();
        assert_eq!(engine.state(), EngineState::AwaitingConfirmation);

        engine.deny().unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
        assert!(executed.lock().unwrap().is_empty());
        assert!(engine.pending().is_empty());
        let last = engine.history().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.text.contains("Declined"));
    }

    #[test]
    fn blocked_command_is_dropped_and_reported() {
        let (mut engine, executed) = engine_with(vec![command_reply("rm -rf /")], vec![]);

        engine.submit("wipe everything").unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(executed.lock().unwrap().is_empty());
        let texts: Vec<_> = engine.history().iter().map(|t| t.text.clone()).collect();
        assert!(texts.iter().any(|t| t.contains("Refused to run")));
        assert!(texts.iter().any(|t| t.contains("nothing was run")));
    }

    #[test]
    fn mixed_batch_with_a_blocked_command_waits_for_confirmation() {
        let reply = Ok(
            "DECISION: COMMAND\nCOMMAND: rm -rf /\nCOMMAND: ls\nRESPONSE: Doing both."
                .to_string(),
        );
        let (mut engine, executed) = engine_with(vec![reply], vec![MockTransport::ok("ok\n", 0)]);

        engine.submit("clean up then list").unwrap();

        // Dropping a blocked command taints the whole plan: the safe
        // remainder must not run until the user signs off on it.
        assert_eq!(engine.state(), EngineState::AwaitingConfirmation);
        assert!(executed.lock().unwrap().is_empty());
        assert_eq!(engine.pending().len(), 1);
        assert_eq!(engine.pending()[0].raw, "ls");

        engine.confirm().unwrap();
        assert_eq!(*executed.lock().unwrap(), vec!["ls"]);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn mixed_batch_can_be_denied_entirely() {
        let reply = Ok(
            "DECISION: COMMAND\nCOMMAND: rm -rf /\nCOMMAND: ls\nRESPONSE: Doing both."
                .to_string(),
        );
        let (mut engine, executed) = engine_with(vec![reply], vec![]);

        engine.submit("clean up then list").unwrap();
        engine.deny().unwrap();

        assert!(executed.lock().unwrap().is_empty());
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn submit_while_awaiting_confirmation_is_rejected_without_history_change() {
        let (mut engine, _) = engine_with(vec![command_reply("sudo ls")], vec![]);
        engine.submit("first").unwrap();
        let len_before = engine.history().len();

        let err = engine.submit("second").unwrap_err();
        assert!(matches!(err, EngineError::Busy(EngineState::AwaitingConfirmation)));
        assert_eq!(engine.history().len(), len_before);
    }

    #[test]
    fn model_failure_lands_in_history_and_returns_to_idle() {
        let (mut engine, executed) = engine_with(
            vec![Err(InterpreterError::Timeout("deadline".into()))],
            vec![],
        );

        engine.submit("anything").unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(executed.lock().unwrap().is_empty());
        let last = engine.history().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert!(last.text.contains("took too long"));
    }

    #[test]
    fn transport_failure_parks_in_error_until_acknowledged() {
        let (mut engine, _) = engine_with(
            vec![command_reply("ls")],
            vec![Err(TransportError::NotConnected)],
        );

        engine.submit("list").unwrap();
        assert_eq!(engine.state(), EngineState::Error);
        let last = engine.history().last().unwrap();
        assert!(last.text.starts_with("Command failed:"));
        assert!(last.exit_status.is_none());

        let err = engine.submit("again").unwrap_err();
        assert!(matches!(err, EngineError::Busy(EngineState::Error)));

        engine.acknowledge_error().unwrap();
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[test]
    fn batch_stops_after_first_nonzero_exit() {
        let reply = Ok(
            "DECISION: COMMAND\nCOMMAND: ls /missing\nCOMMAND: ls /tmp\nRESPONSE: Two steps."
                .to_string(),
        );
        let (mut engine, executed) = engine_with(
            vec![reply],
            vec![MockTransport::ok("no such file\n", 2)],
        );

        engine.submit("two steps").unwrap();

        assert_eq!(*executed.lock().unwrap(), vec!["ls /missing"]);
        assert_eq!(engine.state(), EngineState::Idle);
        let last = engine.history().last().unwrap();
        assert_eq!(last.exit_status, Some(2));
    }

    #[test]
    fn cancellation_mid_batch_returns_to_idle() {
        let (mut engine, executed) = engine_with(
            vec![command_reply("ls")],
            vec![Err(TransportError::Cancelled)],
        );

        engine.submit("list").unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(executed.lock().unwrap().len(), 1);
        let last = engine.history().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.text.contains("Cancelled"));
    }

    #[test]
    fn long_output_is_truncated_with_marker() {
        let long = "x".repeat(200_000);
        let (mut engine, _) = engine_with(
            vec![command_reply("cat big.log")],
            vec![MockTransport::ok(&long, 0)],
        );

        engine.submit("show the log").unwrap();

        let last = engine.history().last().unwrap();
        let output = last.output.as_deref().unwrap();
        assert!(output.contains("output truncated, 200000 chars total"));
        assert!(output.chars().count() < 200_000);
    }

    #[test]
    fn confirm_outside_awaiting_confirmation_errors() {
        let (mut engine, _) = engine_with(vec![], vec![]);
        assert!(matches!(
            engine.confirm().unwrap_err(),
            EngineError::NotAwaitingConfirmation(EngineState::Idle)
        ));
        assert!(matches!(
            engine.deny().unwrap_err(),
            EngineError::NotAwaitingConfirmation(EngineState::Idle)
        ));
        assert!(matches!(
            engine.acknowledge_error().unwrap_err(),
            EngineError::NotInError(EngineState::Idle)
        ));
    }

    #[test]
    fn state_changes_are_broadcast_in_order() {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            executed: executed.clone(),
            results: Mutex::new(VecDeque::new()),
            dir: None,
        };
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let interpreter = Interpreter::new(
            Box::new(ScriptedModel::new(vec![command_reply("pwd")])),
            Persona::default(),
        );
        let mut engine = ConversationEngine::new(
            Box::new(transport),
            interpreter,
            SafetyGate::new(),
            EngineOptions::default(),
            bus,
        );

        engine.submit("where am I").unwrap();

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::StateChanged { to, .. } = event {
                states.push(to);
            }
        }
        assert_eq!(
            states,
            vec![
                EngineState::AwaitingModel,
                EngineState::Executing,
                EngineState::Idle,
            ]
        );
    }

    #[test]
    fn replace_session_requires_idle() {
        let (mut engine, _) = engine_with(vec![command_reply("sudo ls")], vec![]);
        engine.submit("list as root").unwrap();
        assert_eq!(engine.state(), EngineState::AwaitingConfirmation);

        let err = engine
            .replace_session(Box::new(MockTransport::default()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Busy(_)));
    }

    #[test]
    fn replace_session_records_the_new_connection() {
        let (mut engine, _) = engine_with(vec![], vec![]);
        engine
            .replace_session(Box::new(MockTransport::default()))
            .unwrap();
        let last = engine.history().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.text.contains("Connected to tester@mock"));
    }

    #[test]
    fn cancel_during_model_call_runs_nothing() {
        struct CancellingModel {
            token: Mutex<Option<CancelToken>>,
        }
        impl ModelClient for CancellingModel {
            fn generate(&self, _prompt: &str) -> Result<String, InterpreterError> {
                if let Some(token) = self.token.lock().unwrap().take() {
                    token.cancel();
                }
                command_reply("ls")
            }
        }

        struct Forward(Arc<CancellingModel>);
        impl ModelClient for Forward {
            fn generate(&self, prompt: &str) -> Result<String, InterpreterError> {
                self.0.generate(prompt)
            }
        }

        let executed = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            executed: executed.clone(),
            results: Mutex::new(VecDeque::new()),
            dir: None,
        };
        let model = Arc::new(CancellingModel {
            token: Mutex::new(None),
        });
        let mut engine = ConversationEngine::new(
            Box::new(transport),
            Interpreter::new(Box::new(Forward(model.clone())), Persona::default()),
            SafetyGate::new(),
            EngineOptions::default(),
            Arc::new(EventBus::new()),
        );
        // submit() re-arms the token, so the model itself pulls the
        // trigger mid-call, after the reset.
        *model.token.lock().unwrap() = Some(engine.cancel_token());

        engine.submit("list files").unwrap();

        assert_eq!(engine.state(), EngineState::Idle);
        assert!(executed.lock().unwrap().is_empty());
        let last = engine.history().last().unwrap();
        assert_eq!(last.role, Role::System);
        assert!(last.text.contains("Cancelled"));
    }

    #[test]
    fn truncate_output_below_limit_is_untouched() {
        assert_eq!(truncate_output("short", 100), "short");
    }

    #[test]
    fn history_stays_bounded_across_turns() {
        let replies: Vec<_> = (0..10)
            .map(|_| Ok("DECISION: CONVERSATION\nCOMMAND: NONE\nRESPONSE: hi".to_string()))
            .collect();
        let executed = Arc::new(Mutex::new(Vec::new()));
        let transport = MockTransport {
            executed,
            results: Mutex::new(VecDeque::new()),
            dir: None,
        };
        let interpreter =
            Interpreter::new(Box::new(ScriptedModel::new(replies)), Persona::default());
        let mut engine = ConversationEngine::new(
            Box::new(transport),
            interpreter,
            SafetyGate::new(),
            EngineOptions {
                max_history: 6,
                ..EngineOptions::default()
            },
            Arc::new(EventBus::new()),
        );

        for i in 0..10 {
            engine.submit(&format!("message {i}")).unwrap();
        }
        assert_eq!(engine.history().len(), 6);
    }
}
