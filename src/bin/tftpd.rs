//! `tftpd` — the server binary. Bootstraps logging, resolves the served
//! directory, and drives either the TUI dashboard or a plain stderr logger
//! depending on `--no-tui` (spec.md §6).

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::{mpsc, watch};

use tftp_rs::config::ServerConfig;
use tftp_rs::server::{self, ServerEvent, TransferKind};
use tftp_rs::server::ui::App;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ServerConfig::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

    let dir = cli.resolve_base_dir()?;
    let no_tui = cli.no_tui;
    let port = cli.port;
    let cli = Arc::new(cli);

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_handle = {
        let dir = dir.clone();
        let tx = ev_tx.clone();
        let cli = Arc::clone(&cli);
        tokio::spawn(async move {
            if let Err(e) = server::run(cli, dir, tx.clone(), shutdown_rx).await {
                let _ = tx.send(ServerEvent::Log(format!("Server fatal: {e}")));
            }
        })
    };

    let result = if no_tui {
        run_plain(&mut ev_rx).await
    } else {
        run_tui(port, dir, &mut ev_rx).await
    };

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_millis(200), server_handle).await;

    result
}

/// Wait for the platform's terminate signal: Ctrl-C everywhere, plus
/// SIGTERM on unix so the server shuts down cleanly under a process
/// supervisor too.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Headless mode: just relay server events to the `log` crate and wait for
/// a shutdown signal.
async fn run_plain(ev_rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Result<()> {
    log::info!("tftpd starting (no-tui mode)");
    loop {
        tokio::select! {
            Some(ev) = ev_rx.recv() => log_event_plain(ev),
            _ = wait_for_shutdown_signal() => {
                log::info!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

fn log_event_plain(ev: ServerEvent) {
    match ev {
        ServerEvent::Log(msg) => log::info!("{msg}"),
        ServerEvent::TransferStarted(info) => log::info!(
            "transfer #{} started: {:?} {} ({})",
            info.id,
            info.kind,
            info.filename,
            info.peer
        ),
        ServerEvent::TransferProgress { id, transferred, total_bytes } => {
            log::debug!("transfer #{id}: {transferred}/{total_bytes} bytes");
        }
        ServerEvent::TransferComplete(id) => log::info!("transfer #{id} complete"),
        ServerEvent::TransferFailed { id, error } => log::warn!("transfer #{id} failed: {error}"),
    }
}

/// TUI mode, adapted from the dashboard event loop.
async fn run_tui(
    port: u16,
    dir: std::path::PathBuf,
    ev_rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
) -> Result<()> {
    enable_raw_mode()?;
    io::stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(port, dir, None);
    app.online = true;
    app.push_log("Starting tftpd...".into());

    // A SIGINT/SIGTERM should end the TUI the same way pressing `q`/Esc and
    // confirming does — not just a raw process kill.
    let signalled = Arc::new(AtomicBool::new(false));
    let signalled2 = Arc::clone(&signalled);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signalled2.store(true, Ordering::SeqCst);
    });

    let result = tui_loop(&mut terminal, &mut app, ev_rx, &signalled).await;

    app.push_log("Shutting down...".into());
    disable_raw_mode()?;
    io::stdout().execute(LeaveAlternateScreen)?;
    result
}

async fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    ev_rx: &mut mpsc::UnboundedReceiver<ServerEvent>,
    signalled: &AtomicBool,
) -> Result<()> {
    loop {
        if signalled.load(Ordering::SeqCst) {
            return Ok(());
        }

        terminal.draw(|f| tftp_rs::server::ui::draw(f, app))?;

        while let Ok(ev) = ev_rx.try_recv() {
            handle_server_event(app, ev);
        }

        app.refresh_interfaces_if_needed();

        if event::poll(Duration::from_millis(100))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            if app.show_quit_dialog {
                match key.code {
                    KeyCode::Char('y') | KeyCode::Char('Y') => return Ok(()),
                    KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                        app.show_quit_dialog = false;
                    }
                    KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
                        app.quit_selection = !app.quit_selection;
                    }
                    KeyCode::Enter => {
                        if app.quit_selection {
                            return Ok(());
                        } else {
                            app.show_quit_dialog = false;
                        }
                    }
                    _ => {}
                }
            } else {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => {
                        app.show_quit_dialog = true;
                        app.quit_selection = false;
                    }
                    KeyCode::Tab => app.cycle_focus(),
                    KeyCode::Up => app.scroll_up(),
                    KeyCode::Down => app.scroll_down(),
                    _ => {}
                }
            }
        }
    }
}

fn handle_server_event(app: &mut App, ev: ServerEvent) {
    match ev {
        ServerEvent::Log(msg) => app.push_log(msg),
        ServerEvent::TransferStarted(info) => {
            app.push_log(format!(
                "Transfer #{} started: {} {} ({})",
                info.id,
                match info.kind {
                    TransferKind::Download => "DL",
                    TransferKind::Upload => "UL",
                },
                info.filename,
                info.peer,
            ));
            app.transfers.push(info);
        }
        ServerEvent::TransferProgress { id, transferred, total_bytes } => {
            if let Some(tf) = app.transfers.iter_mut().find(|t| t.id == id) {
                tf.transferred = transferred;
                tf.total_bytes = total_bytes;
            }
        }
        ServerEvent::TransferComplete(id) => {
            app.transfers.retain(|t| t.id != id);
            app.push_log(format!("Transfer #{id} complete"));
        }
        ServerEvent::TransferFailed { id, error } => {
            app.transfers.retain(|t| t.id != id);
            app.push_log(format!("Transfer #{id} failed: {error}"));
        }
    }
}
