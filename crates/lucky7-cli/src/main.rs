// Lucky Seven headless client entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file, stdout is the UI)
// 2. Load config
// 3. Build the wallet and application state
// 4. Open the connection channel
// 5. Spawn the app loop and the UI printer
// 6. Read commands from stdin until quit, EOF or Ctrl+C
// 7. Cleanup on exit

mod input;
mod render;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use lucky7_core::account::InMemoryWallet;
use lucky7_core::app::{self, AppState, UserCommand};
use lucky7_core::channel::{ConnectionChannel, WsConnector};
use lucky7_core::config;
use lucky7_core::protocol::EventKind;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::input::{parse_line, Input};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Lucky Seven client starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: server={}, stakes {}..={}",
        config.client.server.url, config.client.stakes.min, config.client.stakes.max
    );

    // 3. Wallet and application state
    let wallet = Arc::new(InMemoryWallet::new(config.client.wallet.starting_balance));
    let app_state = AppState::from_config(&config, wallet);
    let presets = app_state.presets().to_vec();
    let catalog = app_state.catalog().clone();

    // 4. Connection channel
    let (events_tx, events_rx) = mpsc::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (ui_tx, mut ui_rx) = mpsc::channel(256);

    let connector = WsConnector::new(config.client.server.url.clone(), config.session_token());
    let channel = ConnectionChannel::open(
        connector,
        config.reconnect_policy(),
        EventKind::ALL,
        events_tx,
    );

    // 5. App loop and printer
    let app_handle = tokio::spawn(app::run(
        events_rx,
        channel.watch_state(),
        cmd_rx,
        ui_tx,
        app_state,
    ));

    let printer = tokio::spawn(async move {
        while let Some(update) = ui_rx.recv().await {
            let line = render::render(&update);
            if !line.is_empty() {
                println!("{line}");
            }
        }
    });

    println!("{}", render::render_markets(&catalog, &presets));
    println!("{}", input::HELP);

    // 6. Stdin command loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received");
                None
            }
        };
        let Some(line) = line else {
            let _ = cmd_tx.send(UserCommand::Quit).await;
            break;
        };

        match parse_line(&line, &presets) {
            Ok(Some(Input::Command(cmd))) => {
                let quit = cmd == UserCommand::Quit;
                if cmd_tx.send(cmd).await.is_err() || quit {
                    break;
                }
            }
            Ok(Some(Input::Reconnect)) => channel.reconnect(),
            Ok(Some(Input::Markets)) => println!("{}", render::render_markets(&catalog, &presets)),
            Ok(Some(Input::Help)) => println!("{}", input::HELP),
            Ok(None) => {}
            Err(e) => println!("{e}"),
        }
    }

    // 7. Cleanup: let the app loop drain, then close the connection.
    drop(cmd_tx);
    match tokio::time::timeout(Duration::from_secs(5), app_handle).await {
        Ok(Ok(Err(e))) => error!("Application loop error: {}", e),
        Ok(Err(e)) => error!("Application task failed: {}", e),
        Err(_) => error!("Application loop did not stop in time"),
        Ok(Ok(Ok(()))) => {}
    }
    channel.close().await;
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

    info!("Lucky Seven client shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (stdout carries the UI).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("lucky7.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("lucky7=info,lucky7_core=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
