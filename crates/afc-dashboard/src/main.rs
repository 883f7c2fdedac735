mod api;
mod app;
mod config;
mod dispatch;
mod stream;
mod ui;

use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use clap::Parser;
use crossterm::{
    event::EventStream,
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures_util::StreamExt;
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

use crate::api::{HttpApi, WorkflowApi};
use crate::app::App;
use crate::config::{load_config, Args, Config};
use crate::dispatch::Dispatcher;

const STREAM_QUEUE_CAPACITY: usize = 1024;
const OUTCOME_QUEUE_CAPACITY: usize = 64;
/// Upper bound on stream events folded between two redraws.
const STREAM_DRAIN_BATCH: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = load_config(Args::parse())?;
    let _log_guard = init_logging(&config);
    info!(
        "dashboard_start: api={} stream={}",
        config.api_url, config.stream_url
    );

    let api: Arc<dyn WorkflowApi> = Arc::new(HttpApi::new(config.api_url.clone(), config.http_timeout)?);
    let (outcome_tx, mut outcome_rx) = mpsc::channel(OUTCOME_QUEUE_CAPACITY);
    let mut app = App::new(&config, Dispatcher::new(api, outcome_tx));
    app.bootstrap(Utc::now());

    let (stream_tx, mut stream_rx) = mpsc::channel(STREAM_QUEUE_CAPACITY);
    let stream = stream::open(config.stream_url.clone(), config.reconnect, stream_tx);
    let mut connection_rx = stream.state();
    let mut watching_connection = true;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    let mut events = EventStream::new();

    loop {
        terminal.draw(|frame| ui::render_ui(frame, &app))?;
        tokio::select! {
            Some(event) = stream_rx.recv() => {
                app.apply_stream_event(event, Utc::now());
                for _ in 0..STREAM_DRAIN_BATCH {
                    match stream_rx.try_recv() {
                        Ok(event) => app.apply_stream_event(event, Utc::now()),
                        Err(_) => break,
                    }
                }
            }
            Some(outcome) = outcome_rx.recv() => {
                app.apply_outcome(outcome, Utc::now());
            }
            changed = connection_rx.changed(), if watching_connection => {
                match changed {
                    Ok(()) => {
                        let snapshot = connection_rx.borrow_and_update().clone();
                        app.set_connection(snapshot);
                    }
                    Err(_) => watching_connection = false,
                }
            }
            maybe_event = events.next() => {
                if let Some(Ok(event)) = maybe_event {
                    if ui::handle_input(event, &mut app, Utc::now()) {
                        break;
                    }
                }
            }
        }
    }

    drop(stream_rx);
    stream.close().await;
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    info!("dashboard_stop: runs_seen={}", app.state().runs().len());
    Ok(())
}

struct LogGuard {
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

/// Fans log lines out to the log file and, when enabled, stdout. With neither
/// configured every line is discarded so the terminal UI stays intact.
struct LogWriter {
    stdout_enabled: bool,
    file: Option<Arc<StdMutex<std::fs::File>>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.write_all(buf)?;
            }
        }
        if self.stdout_enabled {
            io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                file.flush()?;
            }
        }
        if self.stdout_enabled {
            io::stdout().flush()?;
        }
        Ok(())
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let guard = match config.log_dir.as_deref() {
        Some(dir) => match open_log_file(dir) {
            Ok(guard) => guard,
            Err(err) => {
                eprintln!("log_file_error: {err}");
                LogGuard { file: None }
            }
        },
        None => LogGuard { file: None },
    };
    let file = guard.file.clone();
    let stdout_enabled = config.log_stdout;
    let make_writer = BoxMakeWriter::new(move || LogWriter {
        stdout_enabled,
        file: file.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn open_log_file(dir: &Path) -> io::Result<LogGuard> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("afc-dashboard-{}.log", std::process::id()));
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(StdMutex::new(file))),
    })
}
