//! motion_verifyd - confirm camera motion events before they fire automations
//!
//! This daemon:
//! 1. Loads the settings and camera documents
//! 2. Logs in to the surveillance platform (aborts if that fails)
//! 3. Serves `GET /{camera_id}` until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use motion_verify::{
    api::{ApiConfig, ApiServer},
    config::{ServiceConfig, DEFAULT_CAMERAS_PATH, DEFAULT_SETTINGS_PATH},
    CaptureDirWriter, Collaborators, DebounceStore, DeepstackClient, Engine, HttpNotifier,
    InMemoryTriggerStore, SessionManager, SqliteTriggerStore, TriggerStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Verify motion events with object detection")]
struct Args {
    /// Global settings document.
    #[arg(long, env = "SETTINGS_JSON", default_value = DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Per-camera policy document.
    #[arg(long, env = "CAMERAS_JSON", default_value = DEFAULT_CAMERAS_PATH)]
    cameras: PathBuf,

    /// Address the trigger endpoint listens on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:80")]
    bind: String,

    /// Number of requests handled in parallel.
    #[arg(long, env = "WORKERS", default_value_t = 5)]
    workers: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("LOG_LEVEL", "info"))
        .init();
    let args = Args::parse();
    log::info!("motion_verifyd {} starting", env!("CARGO_PKG_VERSION"));

    let config = ServiceConfig::load_from(&args.settings, &args.cameras)?;
    log::info!(
        "{} camera(s) configured, detection labels {:?}",
        config.cameras.len(),
        config.settings.detection_labels
    );

    let timeout = config.settings.request_timeout;
    log::info!("platform login to {}", config.platform.url);
    let session = SessionManager::connect(&config.platform, timeout).map_err(|err| {
        log::error!("login error: {}", err);
        anyhow!(err)
    })?;

    let trigger_store: Box<dyn TriggerStore> = if config.debounce_db == ":memory:" {
        log::warn!("debounce state is not persisted across restarts");
        Box::new(InMemoryTriggerStore::default())
    } else {
        Box::new(SqliteTriggerStore::open(&config.debounce_db)?)
    };
    let debounce = DebounceStore::new(trigger_store, config.settings.trigger_interval);

    let collaborators = Collaborators {
        snapshots: Box::new(session),
        detector: Box::new(DeepstackClient::new(&config.detection_url, timeout)?),
        notifier: Box::new(HttpNotifier::new(timeout)),
        evidence: Box::new(CaptureDirWriter::new(config.capture_dir.clone())),
    };
    let engine = Engine::new(
        config.settings.clone(),
        config.cameras.clone(),
        config.homebridge_webhook_url.clone(),
        debounce,
        collaborators,
    );

    let api_config = ApiConfig {
        addr: args.bind,
        workers: args.workers,
    };
    let api_handle = ApiServer::new(api_config, Arc::new(engine)).spawn()?;
    log::info!(
        "trigger api listening on {} with {} worker(s)",
        api_handle.addr,
        args.workers
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let _ = rx.recv();
    log::info!("shutdown signal received, stopping trigger api...");
    api_handle.stop()?;

    Ok(())
}
