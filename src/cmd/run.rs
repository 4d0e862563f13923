//! `proxyhost run`: serve a config file until interrupted.
//!
//! Stages the environment overlay, starts the engine from the config file,
//! and spawns a background refresh loop that reloads the engine whenever
//! the file's content hash changes. SIGTERM / Ctrl+C stops the engine with
//! the configured drain grace.

use std::time::Duration;

use tokio::sync::watch;

use crate::cli::RunArgs;
use crate::config::sources;
use crate::config::{ConfigSource, ConfigVersion};
use crate::controller::Controller;
use crate::error::ProxyHostError;
use crate::logging;

pub async fn execute(args: RunArgs) -> Result<(), ProxyHostError> {
    logging::init(&args.log_level, logging::resolve_format(args.pretty, args.json));

    let controller = std::sync::Arc::new(Controller::new(args.controller_settings()));

    let overlay = super::read_env_file(args.env_file.as_deref())?;
    if !overlay.is_empty() {
        let staged = controller.set_environment(overlay).await?;
        tracing::info!(keys = staged.staged_keys, "environment overlay staged");
    }

    let source = sources::open_file(&args.config)?;
    let (raw, version) = source.load().await?;
    let started = controller.start(&raw).await?;
    tracing::info!(
        config = %args.config.display(),
        listeners = started.active_listeners.len(),
        version = %started.config_version,
        "proxyhost started"
    );

    // Dropping shutdown_tx closes the channel and stops the refresh loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let refresh_controller = std::sync::Arc::clone(&controller);
    let poll_interval = args.poll_interval;
    let refresh_handle = tokio::spawn(async move {
        config_refresh_loop(
            &refresh_controller,
            source,
            version,
            poll_interval,
            shutdown_rx,
        )
        .await;
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    // Wait for the config refresh task to finish (catches panics)
    if let Err(e) = refresh_handle.await {
        tracing::error!(error = %e, "config refresh task failed");
    }

    let stopped = controller.stop().await?;
    if let Some(warning) = stopped.warning {
        tracing::warn!(
            forced = stopped.forced_connections,
            message = %warning.message,
            "stopped with connections still open"
        );
    }
    tracing::info!(drained = stopped.drained_connections, "proxyhost stopped");
    Ok(())
}

async fn config_refresh_loop(
    controller: &Controller,
    source: Box<dyn ConfigSource>,
    mut current: ConfigVersion,
    interval_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                tracing::debug!("config refresh loop shutting down");
                return;
            }
        }

        match source.has_changed(&current).await {
            Ok(true) => {
                tracing::info!(source = source.name(), "config change detected, reloading");
                match source.load().await {
                    Ok((raw, version)) => {
                        // A rejected file is not retried until its content changes again.
                        current = version;
                        match controller.reload(&raw).await {
                            Ok(outcome) => tracing::info!(
                                listeners = outcome.active_listeners.len(),
                                version = %outcome.config_version,
                                "config reloaded"
                            ),
                            Err(e) => tracing::error!(
                                error = %e,
                                "config reload failed, keeping current config"
                            ),
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "config reload failed, keeping current config");
                    }
                }
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(error = %e, "config change check failed");
            }
        }
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}
