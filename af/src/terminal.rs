//! Terminal input and rendering for `af watch`
//!
//! Input is read on a blocking thread and forwarded over a tokio channel.
//! Focus events drive the application [`Visibility`].

use std::io::{Write, stdout};
use std::time::Duration;

use colored::*;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{self, Clear, ClearType};
use eyre::{Context, Result};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::coordinator::{FetchPhase, FetchState};
use crate::settings::{AutoFetchSettings, Visibility};
use crate::view::{Page, ViewQuery, extract_items};

/// User commands from the keyboard or the terminal itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Refresh,
    TogglePause,
    ToggleGlobal,
    NextPage,
    PrevPage,
    Quit,
    Visibility(Visibility),
}

/// Map a key press to a command
pub fn map_key(key: KeyEvent) -> Option<Command> {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return Some(Command::Quit);
    }
    match key.code {
        KeyCode::Char('r') => Some(Command::Refresh),
        KeyCode::Char('p') => Some(Command::TogglePause),
        KeyCode::Char('g') => Some(Command::ToggleGlobal),
        KeyCode::Char('n') | KeyCode::Right => Some(Command::NextPage),
        KeyCode::Char('b') | KeyCode::Left => Some(Command::PrevPage),
        KeyCode::Char('q') | KeyCode::Esc => Some(Command::Quit),
        _ => None,
    }
}

fn map_event(evt: Event) -> Option<Command> {
    match evt {
        Event::Key(key) if key.kind == event::KeyEventKind::Press => map_key(key),
        Event::FocusGained => Some(Command::Visibility(Visibility::Foreground)),
        Event::FocusLost => Some(Command::Visibility(Visibility::Background)),
        _ => None,
    }
}

/// Start the input thread; it exits once the receiver is dropped
pub fn spawn_input(tx: mpsc::UnboundedSender<Command>) {
    std::thread::spawn(move || {
        debug!("spawn_input: input thread started");
        loop {
            if tx.is_closed() {
                break;
            }
            match event::poll(Duration::from_millis(100)) {
                Ok(true) => match event::read() {
                    Ok(evt) => {
                        if let Some(cmd) = map_event(evt)
                            && tx.send(cmd).is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read terminal event");
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to poll terminal events");
                    break;
                }
            }
        }
        debug!("spawn_input: input thread exiting");
    });
}

/// Raw mode with focus reporting, restored on drop
pub struct TerminalGuard;

impl TerminalGuard {
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        execute!(stdout(), EnableFocusChange).context("Failed to enable focus reporting")?;
        Ok(Self)
    }

    /// Replace the screen contents with `lines`
    pub fn draw(&self, lines: &[String]) -> Result<()> {
        let mut out = stdout();
        execute!(out, Clear(ClearType::All), MoveTo(0, 0))?;
        for line in lines {
            // Raw mode needs an explicit carriage return
            write!(out, "{}\r\n", line)?;
        }
        out.flush()?;
        Ok(())
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = execute!(stdout(), DisableFocusChange);
        let _ = terminal::disable_raw_mode();
    }
}

/// What the watch screen shows besides the fetch state
pub struct ViewContext<'a> {
    pub url: &'a str,
    pub settings: AutoFetchSettings,
    pub paused: bool,
    pub interval_override: Option<u64>,
    pub query: &'a ViewQuery,
    pub items_pointer: Option<&'a str>,
    pub interactive: bool,
}

/// Render a state snapshot; returns the lines and the page actually shown
pub fn render_state(state: &FetchState<Value>, ctx: &ViewContext<'_>) -> (Vec<String>, Option<Page>) {
    let mut lines = Vec::new();

    let interval_ms = ctx.interval_override.unwrap_or(ctx.settings.interval_ms);
    let polling = match (ctx.settings.global_enabled, ctx.paused) {
        (false, _) => "auto-fetch off (global)".yellow(),
        (true, true) => "auto-fetch paused".yellow(),
        (true, false) => format!("auto-fetch every {}ms", interval_ms).green(),
    };
    lines.push(format!("{} {}", ctx.url.bold(), polling));

    let phase = match state.phase {
        FetchPhase::Fetching => state.phase.as_str().cyan(),
        FetchPhase::Disposed => state.phase.as_str().dimmed(),
        _ => state.phase.as_str().normal(),
    };
    let updated = state
        .updated_at
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let loading = if state.is_loading { " (loading)" } else { "" };
    lines.push(format!("[{}]{} updated {}", phase, loading, updated));

    if let Some(e) = &state.error {
        lines.push(format!("{} {}", "error:".red(), e));
    }

    let page = match &state.data {
        None => {
            lines.push("no data yet".dimmed().to_string());
            None
        }
        Some(data) => match extract_items(data, ctx.items_pointer) {
            None => {
                let pointer = ctx.items_pointer.unwrap_or("");
                lines.push(format!("{} nothing at {}", "error:".red(), pointer));
                None
            }
            Some(items) => {
                let page = ctx.query.apply(&items);
                lines.push(format!("page {}/{} ({} items)", page.page, page.page_count, page.total));
                lines.extend(page.items.iter().map(|item| item.to_string()));
                Some(page)
            }
        },
    };

    if ctx.interactive {
        lines.push(String::new());
        lines.push("r refresh  p pause  g global  n/b page  q quit".dimmed().to_string());
    }

    (lines, page)
}
