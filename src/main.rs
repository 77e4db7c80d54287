//! cloze-minder - a headless, controller-driven audio incremental-learning
//! appliance.
//!
//! Listens to Topic recordings, lets a connected controller carve Extracts
//! and cloze Items out of them, and tracks playback progress and garbage
//! collection in the background. No GUI: everything reachable here is also
//! reachable from the CLI subcommands for scripting and local development.

pub mod actions;
pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod cues;
pub mod db;
pub mod error;
pub mod gc;
pub mod input;
pub mod model;
pub mod player;
pub mod progress;
pub mod queue;
pub mod session;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::Application;
use error::Result;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("cloze_minder=info".parse().unwrap()))
        .init();

    let config = config::load();

    if cli::run_command(&args, &config).await? {
        return Ok(());
    }

    run_appliance(config).await?;
    Ok(())
}

/// The `run` path: build the appliance, sweep once, then spawn the
/// Progress Tracker and Input Dispatcher and wait for Ctrl-C.
async fn run_appliance(config: config::Config) -> Result<()> {
    let app = Application::build(config.clone()).await?;

    let initial_sweep = gc::sweep(&app.pool).await?;
    tracing::info!(
        items = initial_sweep.items,
        extracts = initial_sweep.extracts,
        topics = initial_sweep.topics,
        "startup sweep complete"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let progress_handle = tokio::spawn(progress::run(
        app.pool.clone(),
        app.player.clone(),
        std::time::Duration::from_secs(config.progress_interval_secs),
        shutdown_rx.clone(),
    ));

    let (key_tx, key_rx) = mpsc::channel(64);
    let (mon_tx, mon_rx) = mpsc::channel(64);

    #[cfg(target_os = "linux")]
    let feed_handle = {
        let devices = config.devices.clone();
        tokio::spawn(async move {
            if let Err(e) = input::linux::run_hardware_feed(devices, key_tx, mon_tx).await {
                tracing::error!(error = %e, "input hardware feed stopped");
            }
        })
    };
    #[cfg(not(target_os = "linux"))]
    {
        drop(key_tx);
        drop(mon_tx);
    }

    let dispatcher_handle = {
        let devices = config.devices.clone();
        let queue = app.queue.clone();
        let player = app.player.clone();
        let cues = app.cues.clone();
        let capture = app.capture.clone();
        let cutter = app.cutter.clone();
        let media = config.media.clone();
        let restart_cmd = config.audio.audio_daemon_restart_cmd.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            input::run(
                key_rx,
                mon_rx,
                devices,
                queue.as_ref(),
                player.as_ref(),
                cues.as_ref(),
                capture.as_ref(),
                cutter.as_ref(),
                &media,
                &restart_cmd,
                shutdown_rx,
            )
            .await;
        })
    };

    tokio::signal::ctrl_c().await.map_err(error::Error::Io)?;
    tracing::info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    let _ = progress_handle.await;
    let _ = dispatcher_handle.await;
    #[cfg(target_os = "linux")]
    feed_handle.abort();

    let final_sweep = gc::sweep(&app.pool).await?;
    tracing::info!(
        items = final_sweep.items,
        extracts = final_sweep.extracts,
        topics = final_sweep.topics,
        "shutdown sweep complete"
    );

    Ok(())
}
