/*!

The builder service. It polls the task store for cluster tasks, reconciles each cluster through the
infrastructure, configuration, bootstrap and in-cluster engines, and commits the results back to
the store.

All settings are read from `BUILDER_*` environment variables, see [`Config`]. SIGINT or SIGTERM
stop the intake of new tasks; tasks in flight finish their current stage and commit what they
reached.

!*/

#![deny(
    clippy::expect_used,
    clippy::get_unwrap,
    clippy::panic,
    clippy::panic_in_result_fn,
    clippy::panicking_unwrap,
    clippy::unwrap_in_result,
    clippy::unwrap_used
)]

use crate::config::Config;
use crate::error::Result;
use builder::clients::{HttpEngineClient, HttpTaskStore};
use builder::{Builder, Dispatcher, Engines};
use env_logger::Builder as LogBuilder;
use log::{error, info, warn, LevelFilter};
use snafu::ResultExt;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

mod config;
mod error;

#[tokio::main]
async fn main() {
    init_logger();
    info!("Starting");
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let engine = |engine: &'static str, url: &str| {
        HttpEngineClient::new(url, config.engine_timeout)
            .context(error::EngineClientSnafu { engine })
    };
    let engines = Engines {
        infrastructure: Arc::new(engine("infrastructure", &config.infrastructure_url)?),
        configuration: Arc::new(engine("configuration", &config.configuration_url)?),
        bootstrap: Arc::new(engine("bootstrap", &config.bootstrap_url)?),
        in_cluster: Arc::new(engine("in-cluster", &config.in_cluster_url)?),
        store: Arc::new(
            HttpTaskStore::new(&config.store_url, config.store_timeout)
                .context(error::StoreClientSnafu)?,
        ),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let builder = Builder::new(engines, shutdown.clone());
    Dispatcher::new(builder, config.dispatch_settings(), shutdown)
        .run()
        .await;
    info!("Stopped");
    Ok(())
}

/// Cancels `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => Some(terminate),
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            None
        }
    };
    let sigterm = async {
        match terminate.as_mut() {
            Some(terminate) => {
                terminate.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
        _ = sigterm => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}

/// The log level used when the `RUST_LOG` environment variable does not exist.
const DEFAULT_LEVEL_FILTER: LevelFilter = LevelFilter::Info;

/// Extract the value of `RUST_LOG` if it exists, otherwise log this crate and the builder at
/// `DEFAULT_LEVEL_FILTER`.
fn init_logger() {
    match std::env::var(env_logger::DEFAULT_FILTER_ENV).ok() {
        Some(_) => {
            // RUST_LOG exists; env_logger will use it.
            LogBuilder::from_default_env().init();
        }
        None => {
            // RUST_LOG does not exist; use default log level for our crates only.
            LogBuilder::new()
                .filter(Some(env!("CARGO_CRATE_NAME")), DEFAULT_LEVEL_FILTER)
                .filter(Some("builder"), DEFAULT_LEVEL_FILTER)
                .filter(Some("reconciler_model"), DEFAULT_LEVEL_FILTER)
                .init();
        }
    }
}
