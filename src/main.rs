use std::path::PathBuf;

use clap::Parser;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use rmtui::config::ConfigManager;
use rmtui::{App, AppEvent, Coordinator, DeviceClient, Result};

/// Browse, download and upload documents on a reMarkable tablet over USB
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Base URL of the tablet's web interface
    #[arg(long)]
    device_url: Option<String>,

    /// Directory downloads are written to
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level written to rmtui.log (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    rmtui::init_panic_hook();
    rmtui::init_tracing(&args.log_level)?;

    let mut config = match &args.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    config.apply_overrides(args.device_url, args.download_dir)?;
    tracing::info!("Loaded config from {}", config.config_path().display());
    let settings = config.into_settings();

    let client = DeviceClient::new(&settings)?;
    tracing::info!("Using device at {}", client.base_url());
    let (coordinator, coordinator_rx) = Coordinator::new(client, &settings);

    let terminal = Terminal::new(CrosstermBackend::new(std::io::stdout()))?;
    let mut app = App::new(terminal, coordinator, coordinator_rx, &settings);
    app.init_terminal()?;

    let (tx, mut rx) = mpsc::channel::<AppEvent>(100);
    let input_token = CancellationToken::new();
    let input_task = rmtui::spawn_input_task(tx, settings.tick_rate(), input_token.clone());

    let res = app.run(&mut rx).await;

    input_token.cancel();
    let _ = input_task.await;
    drop(app);

    if let Err(e) = &res {
        tracing::error!("Exited with error: {}", e);
    }
    res
}
