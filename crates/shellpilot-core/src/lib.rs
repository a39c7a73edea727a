//! # shellpilot-core
//!
//! Core logic for Shellpilot, a natural-language shell assistant.
//!
//! This crate is front-end agnostic and can be driven by:
//! - Interactive CLI (REPL over stdin)
//! - Desktop shell (via the event bus)
//! - Test harness (mock transport and model)
//!
//! ## Key Concepts
//!
//! - **Turn**: One entry in the conversation (utterance, reply, or command run)
//! - **ConversationEngine**: The state machine driving a session
//! - **SafetyGate**: Risk classification deciding what may run
//! - **SessionTransport**: Where commands execute (SSH or local shell)

pub mod config;
pub mod engine;
pub mod event_bus;
pub mod history;
pub mod interpreter;
pub mod safety;
pub mod transport;

// Re-export commonly used types
pub use engine::{ConversationEngine, EngineOptions, EngineState};
pub use event_bus::{EngineEvent, EventBus};
pub use history::{ConversationHistory, Role, Turn};
pub use safety::{RiskLevel, SafetyGate, Verdict};
pub use transport::{CancelToken, Session, SessionTransport};
