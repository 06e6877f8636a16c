//! autofetch - CLI entry point

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use autofetch::cli::{Cli, Command, OutputFormat, SettingsCommand, WatchArgs};
use autofetch::config::Config;
use autofetch::coordinator::{Coordinator, CoordinatorHandle, FetchPhase, FetchState};
use autofetch::http::HttpProducer;
use autofetch::settings::{SettingsStore, VisibilitySignal};
use autofetch::terminal::{self, TerminalGuard, ViewContext, render_state};
use autofetch::view::{Filter, Sort, ViewQuery};
use keystore::{FileStore, KeyValueStore};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("autofetch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("autofetch.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    debug!(?config, "main: config loaded");

    match cli.command {
        Command::Settings { command } => cmd_settings(&config, command),
        Command::Watch(args) => cmd_watch(&config, args).await,
    }
}

fn open_storage(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let path = &config.storage.path;
    let store = FileStore::open(path).context(format!("Failed to open settings store {}", path.display()))?;
    Ok(Arc::new(store))
}

fn cmd_settings(config: &Config, command: SettingsCommand) -> Result<()> {
    debug!(?command, "cmd_settings: called");
    let settings = SettingsStore::open(open_storage(config)?);

    match command {
        SettingsCommand::Show { format } => {
            let current = settings.get();
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&current)?),
                OutputFormat::Text => {
                    let state = if current.global_enabled {
                        "enabled".green()
                    } else {
                        "disabled".yellow()
                    };
                    println!("Auto-fetch: {}", state);
                    println!("Interval:   {}ms", current.interval_ms);
                    println!("Storage:    {}", config.storage.path.display());
                }
            }
            return Ok(());
        }
        SettingsCommand::Interval { ms } => settings.set_interval(ms)?,
        SettingsCommand::Enable => settings.set_global_enabled(true),
        SettingsCommand::Disable => settings.set_global_enabled(false),
        SettingsCommand::Toggle => settings.toggle_global_enabled(),
    }

    let current = settings.get();
    println!(
        "{} auto-fetch {} every {}ms",
        "✓".green(),
        if current.global_enabled { "enabled" } else { "disabled" },
        current.interval_ms
    );
    Ok(())
}

async fn cmd_watch(config: &Config, args: WatchArgs) -> Result<()> {
    debug!(?args, "cmd_watch: called");

    let signal = VisibilitySignal::new();
    let settings = SettingsStore::with_visibility(open_storage(config)?, &signal);

    let mut coordinator_config = config.coordinator.clone();
    if let Some(ms) = args.interval_ms {
        coordinator_config = coordinator_config.with_interval(ms);
    }
    if args.timeout_ms.is_some() {
        coordinator_config.timeout_ms = args.timeout_ms;
    }
    let (names, key): (Vec<String>, Vec<Value>) = args.params.iter().cloned().unzip();
    coordinator_config.dependency_key = key;

    let producer = HttpProducer::new(&args.url, names, &config.http).context("Failed to build HTTP client")?;
    let handle =
        Coordinator::spawn(producer, coordinator_config.clone(), &settings).context("Failed to start coordinator")?;
    info!(id = handle.id(), url = %args.url, "Watching");

    let mut watch = WatchScreen {
        url: args.url.clone(),
        items_pointer: args.items.clone(),
        interval_override: coordinator_config.interval_ms,
        query: ViewQuery {
            filter: args.filter.as_deref().map(Filter::parse),
            sort: args.sort.clone().map(|field| Sort {
                field,
                descending: args.desc,
            }),
            page: args.page,
            page_size: args.page_size,
        },
        paused: !coordinator_config.enabled,
        interactive: !args.plain,
    };

    let result = if args.plain {
        watch.run_plain(&handle, &settings).await
    } else {
        watch.run_interactive(&handle, &settings, &signal).await
    };

    handle.dispose();
    settings.dispose();
    result
}

struct WatchScreen {
    url: String,
    items_pointer: Option<String>,
    interval_override: Option<u64>,
    query: ViewQuery,
    paused: bool,
    interactive: bool,
}

impl WatchScreen {
    fn render(&mut self, state: &FetchState<Value>, settings: &SettingsStore) -> Vec<String> {
        let ctx = ViewContext {
            url: &self.url,
            settings: settings.get(),
            paused: self.paused,
            interval_override: self.interval_override,
            query: &self.query,
            items_pointer: self.items_pointer.as_deref(),
            interactive: self.interactive,
        };
        let (lines, page) = render_state(state, &ctx);
        if let Some(page) = page {
            self.query.page = page.page;
        }
        lines
    }

    async fn run_plain(&mut self, handle: &CoordinatorHandle<Value>, settings: &SettingsStore) -> Result<()> {
        let mut states = handle.subscribe();
        loop {
            let state = states.borrow_and_update().clone();
            for line in self.render(&state, settings) {
                println!("{}", line);
            }
            println!();

            if state.phase == FetchPhase::Disposed {
                return Ok(());
            }

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                    return Ok(());
                }
            }
        }
    }

    async fn run_interactive(
        &mut self,
        handle: &CoordinatorHandle<Value>,
        settings: &SettingsStore,
        signal: &VisibilitySignal,
    ) -> Result<()> {
        let guard = TerminalGuard::enter()?;
        let (tx, mut commands) = mpsc::unbounded_channel();
        terminal::spawn_input(tx);

        let mut states = handle.subscribe();
        let mut settings_rx = settings.subscribe();

        loop {
            let state = states.borrow_and_update().clone();
            guard.draw(&self.render(&state, settings))?;

            tokio::select! {
                changed = states.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                _ = settings_rx.changed() => {}
                cmd = commands.recv() => match cmd {
                    None | Some(terminal::Command::Quit) => return Ok(()),
                    Some(terminal::Command::Refresh) => handle.trigger(),
                    Some(terminal::Command::TogglePause) => {
                        self.paused = !self.paused;
                        handle.set_enabled(!self.paused);
                    }
                    Some(terminal::Command::ToggleGlobal) => settings.toggle_global_enabled(),
                    Some(terminal::Command::NextPage) => self.query.page += 1,
                    Some(terminal::Command::PrevPage) => self.query.page = self.query.page.saturating_sub(1).max(1),
                    Some(terminal::Command::Visibility(visibility)) => signal.set(visibility),
                },
            }
        }
    }
}
