//! MIDI Switcher - command-line front end
//!
//! Routes every connected MIDI input to all other outputs and sends the
//! configured button messages from an interactive prompt.

use anyhow::Result;
use clap::Parser;
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::Command;
use midi_switcher::activity::MessageLog;
use midi_switcher::buttons::ButtonBoard;
use midi_switcher::config::{settings, AppConfig, ConfigWatcher, SettingsDocument};
use midi_switcher::platform::{MidiPlatform, MidirPlatform, VirtualPlatform};
use midi_switcher::{PortInfo, PortState, SessionEvent, SessionManager};

/// MIDI Switcher - fan every MIDI input out to all other outputs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (created with defaults if missing)
    #[arg(short, long, default_value = midi_switcher::config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Use in-memory demo ports instead of the system MIDI service
    #[arg(long = "virtual")]
    virtual_ports: bool,

    /// Do not connect automatically at startup
    #[arg(long)]
    no_auto_connect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!("Starting MIDI Switcher v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let (config_watcher, config) = ConfigWatcher::new(args.config.clone()).await?;
    info!("Configuration loaded successfully with hot-reload enabled");

    let demo = args.virtual_ports.then(demo_platform);
    let platform: Arc<dyn MidiPlatform> = match &demo {
        Some(demo) => Arc::new(demo.clone()),
        None => Arc::new(MidirPlatform::new(
            config.midi.client_name.clone(),
            Duration::from_millis(config.midi.poll_interval_ms),
        )),
    };

    if args.list_ports {
        cli::list_ports_formatted(platform.as_ref()).await?;
        return Ok(());
    }

    let session = SessionManager::new(platform);

    if config.midi.auto_connect && !args.no_auto_connect {
        let session = session.clone();
        let delay = Duration::from_millis(config.midi.auto_connect_delay_ms);
        let retries = config.midi.reconnect_attempts;
        tokio::spawn(async move {
            if let Err(e) = session.auto_connect(delay, retries).await {
                println!("{} {}", "MIDI connection failed:".red(), e);
            }
        });
    } else {
        info!("Auto-connect disabled, use 'connect' at the prompt");
    }

    if let Some(demo) = demo {
        tokio::spawn(run_demo_input(demo));
    }

    let app = App::new(session, config, args.config);
    run_app(app, config_watcher).await?;

    info!("MIDI Switcher shutdown complete");
    Ok(())
}

/// Interactive state owned by the main loop
struct App {
    session: SessionManager,
    board: ButtonBoard,
    log: MessageLog,
    config: AppConfig,
    config_path: String,
}

impl App {
    fn new(session: SessionManager, config: AppConfig, config_path: String) -> Self {
        Self {
            board: ButtonBoard::new(config.buttons.clone(), Duration::from_millis(config.debounce_ms)),
            log: MessageLog::new(config.log.max_entries),
            session,
            config,
            config_path,
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        match &event {
            SessionEvent::MessageRouted(result) => {
                let entry = self.log.record(result);
                cli::print_entry(entry);
            }
            _ => cli::print_event(&event),
        }
    }

    fn apply_config(&mut self, config: AppConfig) {
        if config.midi != self.config.midi {
            info!("MIDI backend settings take effect after restart");
        }
        self.board
            .replace(config.buttons.clone(), Duration::from_millis(config.debounce_ms));
        self.log.set_capacity(config.log.max_entries);
        self.config = config;
    }

    /// Write the current buttons back to the config file
    async fn persist_buttons(&mut self) -> Result<()> {
        self.config.buttons = self.board.buttons().to_vec();
        self.config.save(&self.config_path).await
    }

    /// Returns false when the app should exit
    async fn handle(&mut self, command: Command) -> Result<bool> {
        debug!("Command: {:?}", command);
        match command {
            Command::Press(id) => {
                self.board.press(&self.session, id)?;
            }
            Command::Release(id) => {
                self.board.release(&self.session, id)?;
            }
            Command::ControlChange {
                channel,
                controller,
                value,
            } => {
                self.session.send_control_change(channel, controller, value)?;
            }
            Command::Ports => cli::print_ports(&self.session.inputs(), &self.session.outputs()),
            Command::Buttons => {
                let held: Vec<u32> = self.board.held().collect();
                cli::print_buttons(self.board.buttons(), &held);
            }
            Command::AddButton => {
                let added = self.board.add_button()?;
                println!("{} {} ({})", "Added".green(), added.label, added.id);
                self.persist_buttons().await?;
            }
            Command::RemoveButton(id) => {
                if self.board.remove_button(id) {
                    println!("{} button {}", "Removed".green(), id);
                    self.persist_buttons().await?;
                } else {
                    println!("{} {}", "No such button:".yellow(), id);
                }
            }
            Command::Log => cli::print_log(&self.log),
            Command::Clear => self.log.clear(),
            Command::Connect => {
                let has_ports = self.session.connect().await?;
                if !has_ports {
                    println!("{}", "Connected, but no MIDI devices were found".yellow());
                }
                cli::print_ports(&self.session.inputs(), &self.session.outputs());
            }
            Command::Disconnect => self.session.cleanup(),
            Command::Export(path) => {
                let path = path.unwrap_or_else(|| settings::export_file_name(chrono::Utc::now()));
                SettingsDocument::new(self.board.buttons().to_vec(), self.config.locale.clone())
                    .export(&path)
                    .await?;
                println!("{} {}", "Settings exported to".green(), path);
            }
            Command::Import(path) => {
                let document = SettingsDocument::import(&path).await?;
                if document.locale.is_some() {
                    self.config.locale = document.locale;
                }
                self.board.replace(
                    document.buttons,
                    Duration::from_millis(self.config.debounce_ms),
                );
                self.persist_buttons().await?;
                println!("{} {}", "Settings imported from".green(), path);
            }
            Command::Help => cli::print_help(),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }
}

async fn run_app(mut app: App, mut config_watcher: ConfigWatcher) -> Result<()> {
    info!("Starting main application loop...");

    let mut events = app.session.subscribe();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let _repl = cli::spawn_repl(command_tx)?;
    cli::print_help();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => app.on_event(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Message log fell behind, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            command = command_rx.recv() => {
                let Some(command) = command else { break };
                match app.handle(command).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => println!("{} {:#}", "Error:".red(), e),
                }
            }

            Some(new_config) = config_watcher.next_config() => {
                info!("Configuration file changed, reloading buttons");
                app.apply_config(new_config);
            }

            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping event loop");
                break;
            }
        }
    }

    info!("Shutting down...");
    app.session.cleanup();
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
}

fn demo_platform() -> VirtualPlatform {
    let platform = VirtualPlatform::new();
    platform.add_input("demo-in-keys", "Demo Keys");
    platform.add_output("demo-out-keys", "Demo Keys");
    platform.add_output("demo-out-synth", "Demo Synth");
    platform.add_output("demo-out-drums", "Demo Drums");
    platform
}

/// Play a slow note loop on the demo keyboard and unplug the drum machine now
/// and then so device events can be seen without hardware.
async fn run_demo_input(platform: VirtualPlatform) {
    let mut ticker = tokio::time::interval(Duration::from_secs(4));
    let mut tick: u64 = 0;
    loop {
        ticker.tick().await;
        tick += 1;

        let note = 60 + (tick % 12) as u8;
        platform.inject("demo-in-keys", &[0x90, note, 100]);
        tokio::time::sleep(Duration::from_millis(300)).await;
        platform.inject("demo-in-keys", &[0x80, note, 0]);

        if tick % 5 == 0 {
            platform.set_state("demo-out-drums", PortState::Disconnected);
        } else if tick % 5 == 1 && tick > 1 {
            platform.plug(PortInfo::new(
                "demo-out-drums",
                "Demo Drums",
                midi_switcher::PortDirection::Output,
                PortState::Connected,
            ));
        }
    }
}
