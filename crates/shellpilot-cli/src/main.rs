//! Interactive terminal front end.
//!
//! Wires the core engine to a read-eval loop: utterances go in, turns and
//! state changes stream back over the event bus and are printed as they
//! arrive. Confirmation prompts block the loop until the user answers.

use clap::Parser;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password};
use shellpilot_core::config::{ServerEntry, Settings};
use shellpilot_core::engine::{ConversationEngine, EngineState};
use shellpilot_core::event_bus::{EngineEvent, EventBus};
use shellpilot_core::history::Role;
use shellpilot_core::interpreter::{Interpreter, OllamaClient};
use shellpilot_core::safety::{RiskLevel, SafetyGate};
use shellpilot_core::transport::{Credential, LocalTransport, SessionTransport, SshTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(name = "shellpilot", about = "Natural-language shell assistant")]
struct Args {
    /// Path to the settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Named server from settings to connect to.
    #[arg(long)]
    server: Option<String>,

    /// Run commands on this machine instead of over SSH.
    #[arg(long)]
    local: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = args
        .config
        .clone()
        .or_else(default_config_path)
        .ok_or("cannot determine a settings path; pass --config")?;
    let settings = Settings::load(&config_path)?;

    let transport = build_transport(&args, &settings)?;
    if let Some(dir) = transport.current_dir() {
        println!("connected, working directory {dir}");
    }

    let client = OllamaClient::new(
        settings.model.url.clone(),
        settings.model.model.clone(),
        settings.request_timeout(),
    );
    match client.test_connection() {
        Ok(()) => match client.list_models() {
            Ok(models) if !models.iter().any(|m| m.starts_with(client.model())) => {
                eprintln!(
                    "warning: model '{}' not found on the endpoint (available: {})",
                    client.model(),
                    models.join(", ")
                );
            }
            Ok(_) => {}
            Err(e) => log::warn!("could not list models: {e}"),
        },
        Err(e) => eprintln!(
            "warning: model endpoint {} is not responding ({e}); requests will fail until it is up",
            settings.model.url
        ),
    }
    let interpreter = Interpreter::new(Box::new(client), settings.assistant.persona());
    let gate = if settings.safety_overrides.is_empty() {
        SafetyGate::new()
    } else {
        SafetyGate::with_overrides(&settings.safety_overrides)?
    };

    let bus = Arc::new(EventBus::new());
    let mut engine = ConversationEngine::new(
        transport,
        interpreter,
        gate,
        settings.engine_options(),
        bus.clone(),
    );

    let printer = spawn_printer(&bus);
    repl(&mut engine)?;
    drop(engine);
    drop(bus);
    let _ = printer.join();
    Ok(())
}

fn build_transport(
    args: &Args,
    settings: &Settings,
) -> Result<Box<dyn SessionTransport>, Box<dyn std::error::Error>> {
    if args.local {
        return Ok(Box::new(LocalTransport::new()));
    }

    let entry = match (&args.server, &settings.last_server) {
        (Some(name), _) => settings.server(name)?.clone(),
        (None, Some(name)) => settings.server(name)?.clone(),
        (None, None) => prompt_for_server()?,
    };

    let entry = fill_in_credential(entry)?;
    let transport = SshTransport::connect(&entry.ssh_config(settings.connect_timeout()))?;
    Ok(Box::new(transport))
}

fn prompt_for_server() -> Result<ServerEntry, Box<dyn std::error::Error>> {
    let theme = ColorfulTheme::default();
    let host: String = Input::with_theme(&theme).with_prompt("Host").interact_text()?;
    let username: String = Input::with_theme(&theme)
        .with_prompt("Username")
        .interact_text()?;
    let port: u16 = Input::with_theme(&theme)
        .with_prompt("Port")
        .default(22)
        .interact_text()?;
    Ok(ServerEntry {
        name: host.clone(),
        host,
        port,
        username,
        credential: Credential::Password(String::new()),
    })
}

/// Ask for a password when the saved entry carries an empty one.
fn fill_in_credential(mut entry: ServerEntry) -> Result<ServerEntry, Box<dyn std::error::Error>> {
    if let Credential::Password(password) = &entry.credential {
        if password.is_empty() {
            let typed = Password::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Password for {}@{}", entry.username, entry.host))
                .interact()?;
            entry.credential = Credential::Password(typed);
        }
    }
    Ok(entry)
}

/// Print turns as the engine appends them. State changes are logged, not
/// printed; the prompt itself shows where the engine is.
fn spawn_printer(bus: &Arc<EventBus>) -> std::thread::JoinHandle<()> {
    let mut rx = bus.subscribe();
    std::thread::spawn(move || loop {
        match rx.blocking_recv() {
            Ok(EngineEvent::TurnAppended { turn }) => match turn.role {
                Role::User => {}
                Role::Assistant => {
                    println!("{}", turn.text);
                    if let Some(output) = &turn.output {
                        print!("{output}");
                        if !output.ends_with('\n') {
                            println!();
                        }
                    }
                }
                Role::System => println!("[{}]", turn.text),
            },
            Ok(EngineEvent::StateChanged { from, to }) => {
                log::debug!("engine state: {from} -> {to}");
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                log::warn!("printer fell behind, {missed} event(s) dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    })
}

fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("shellpilot")
            .join("settings.json")
    })
}

fn repl(engine: &mut ConversationEngine) -> Result<(), Box<dyn std::error::Error>> {
    let theme = ColorfulTheme::default();
    println!("Type a request, or 'exit' to quit.");

    loop {
        let line: String = Input::with_theme(&theme)
            .with_prompt(">")
            .allow_empty(true)
            .interact_text()?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        if let Err(e) = engine.submit(line) {
            eprintln!("{e}");
            continue;
        }

        // Printing happens on the bus thread; this loop only resolves the
        // states that need user input.
        match engine.state() {
            EngineState::AwaitingConfirmation => resolve_confirmation(engine, &theme)?,
            EngineState::Error => {
                engine.acknowledge_error()?;
            }
            _ => {}
        }
    }

    Ok(())
}

fn resolve_confirmation(
    engine: &mut ConversationEngine,
    theme: &ColorfulTheme,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("The assistant wants to run:");
    for candidate in engine.pending() {
        let marker = match candidate.risk {
            RiskLevel::Confirm => format!(" ({})", candidate.rationale),
            _ => String::new(),
        };
        println!("  $ {}{marker}", candidate.raw);
    }

    let approved = Confirm::with_theme(theme)
        .with_prompt("Run these commands?")
        .default(false)
        .interact()?;

    if approved {
        engine.confirm()?;
        if engine.state() == EngineState::Error {
            engine.acknowledge_error()?;
        }
    } else {
        engine.deny()?;
    }
    Ok(())
}
