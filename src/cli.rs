//! Command-line interface and REPL

use anyhow::{bail, Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;
use tracing::debug;

use midi_switcher::activity::{LogEntry, MessageLog};
use midi_switcher::config::ButtonConfig;
use midi_switcher::platform::MidiPlatform;
use midi_switcher::{PortInfo, SessionEvent};

const PROMPT: &str = "midi> ";

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Press(u32),
    Release(u32),
    ControlChange { channel: u8, controller: u8, value: u8 },
    Ports,
    Buttons,
    AddButton,
    RemoveButton(u32),
    Log,
    Clear,
    Connect,
    Disconnect,
    Export(Option<String>),
    Import(String),
    Help,
    Quit,
}

impl Command {
    /// Parse a prompt line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let command = match (name.to_ascii_lowercase().as_str(), args.as_slice()) {
            ("press" | "p", [id]) => Command::Press(number(id, "button id")?),
            ("release" | "r", [id]) => Command::Release(number(id, "button id")?),
            ("cc", [channel, controller, value]) => Command::ControlChange {
                channel: number(channel, "channel")?,
                controller: number(controller, "controller")?,
                value: number(value, "value")?,
            },
            ("ports", []) => Command::Ports,
            ("buttons", []) => Command::Buttons,
            ("add", []) => Command::AddButton,
            ("remove", [id]) => Command::RemoveButton(number(id, "button id")?),
            ("log", []) => Command::Log,
            ("clear", []) => Command::Clear,
            ("connect", []) => Command::Connect,
            ("disconnect", []) => Command::Disconnect,
            ("export", []) => Command::Export(None),
            ("export", [path]) => Command::Export(Some(path.to_string())),
            ("import", [path]) => Command::Import(path.to_string()),
            ("help" | "?", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            (other, _) => bail!("Unknown command or wrong arguments: '{}' (try 'help')", other),
        };
        Ok(Some(command))
    }
}

fn number<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.parse()
        .ok()
        .with_context(|| format!("Invalid {}: '{}'", what, text))
}

/// Read prompt lines on a dedicated thread and forward parsed commands.
///
/// EOF and Ctrl+C at the prompt are sent as `Quit`.
pub fn spawn_repl(tx: mpsc::UnboundedSender<Command>) -> Result<std::thread::JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || {
            let mut rl = match DefaultEditor::new() {
                Ok(rl) => rl,
                Err(e) => {
                    eprintln!("{} {}", "Prompt unavailable:".red(), e);
                    let _ = tx.send(Command::Quit);
                    return;
                }
            };
            read_commands(&mut rl, &tx);
        })?;

    Ok(handle)
}

fn read_commands(rl: &mut DefaultEditor, tx: &mpsc::UnboundedSender<Command>) {
    loop {
        let command = match rl.readline(PROMPT) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match Command::parse(&line) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        println!("{}", e.to_string().red());
                        continue;
                    }
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => Command::Quit,
            Err(e) => {
                debug!("Prompt closed: {}", e);
                Command::Quit
            }
        };

        let quit = command == Command::Quit;
        if tx.send(command).is_err() || quit {
            break;
        }
    }
}

pub fn print_help() {
    println!("\n{}", "Commands:".bold());
    for (usage, what) in [
        ("press <id>", "send a button's press messages"),
        ("release <id>", "send a button's release messages"),
        ("cc <ch> <ctrl> <val>", "send a Control Change (channel 0-15)"),
        ("ports", "list active inputs and outputs"),
        ("buttons", "list configured buttons"),
        ("add | remove <id>", "add a CC button or remove one"),
        ("log | clear", "show or clear the message log"),
        ("connect | disconnect", "start or stop the MIDI session"),
        ("export [path] | import <path>", "save or load button settings"),
        ("quit", "exit"),
    ] {
        println!("  {:<32} {}", usage.cyan(), what);
    }
    println!();
}

pub fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::DeviceConnected { port } => {
            println!(
                "{} {} ({})",
                "[+]".bright_green(),
                port.name.bold(),
                port.direction
            );
        }
        SessionEvent::DeviceDisconnected { port } => {
            println!("{} {} ({})", "[-]".red(), port.name.bold(), port.direction);
        }
        SessionEvent::MessageRouted(_) => {}
    }
}

pub fn print_entry(entry: &LogEntry) {
    println!(
        "{} {} {} {}  {}",
        entry.timestamp.dimmed(),
        entry.source.yellow(),
        "->".dimmed(),
        entry.destinations.join(", ").green(),
        entry.label.bright_white()
    );
}

pub fn print_log(log: &MessageLog) {
    println!("\n{}", "=== Message Log ===".bold().cyan());
    if log.is_empty() {
        println!("  {}", "No messages yet".dimmed());
    }
    for entry in log.entries() {
        print!("  ");
        print_entry(entry);
    }
    println!();
}

pub fn print_ports(inputs: &[PortInfo], outputs: &[PortInfo]) {
    println!("\n{}", "=== Active MIDI Ports ===".bold().cyan());
    print_port_list("Input Ports:", "No input devices", inputs);
    print_port_list("Output Ports:", "No output devices", outputs);
    println!();
}

fn print_port_list(title: &str, empty: &str, ports: &[PortInfo]) {
    println!("\n{}", title.bold());
    if ports.is_empty() {
        println!("  {}", empty.dimmed());
    }
    for port in ports {
        let marker = if port.is_connected() {
            "[CONNECTED]".green()
        } else {
            format!("[{}]", port.state.to_string().to_uppercase()).yellow()
        };
        println!("  {} {} {}", marker, port.name, port.id.dimmed());
    }
}

pub fn print_buttons(buttons: &[ButtonConfig], held: &[u32]) {
    println!("\n{}", "=== Buttons ===".bold().cyan());
    if buttons.is_empty() {
        println!("  {}", "No buttons configured".dimmed());
    }
    for button in buttons {
        let marker = if held.contains(&button.id) {
            "●".bright_green()
        } else {
            "○".dimmed()
        };
        println!(
            "  {} {:>3}  {:<20} press: {} msg, release: {} msg",
            marker,
            button.id,
            button.label,
            button.press.len(),
            button.release.len()
        );
    }
    println!();
}

/// Print every port the platform reports, including disconnected ones
pub async fn list_ports_formatted(platform: &dyn MidiPlatform) -> Result<()> {
    let access = platform
        .request_access()
        .await
        .context("Failed to access MIDI")?;

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    print_port_list("Input Ports:", "No input ports found", &access.inputs());
    print_port_list("Output Ports:", "No output ports found", &access.outputs());
    println!();
    Ok(())
}
