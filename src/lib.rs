//! Attendance Console - face-recognition attendance capture
//!
//! Turns a live camera feed into a deduplicated roster of recognized students
//! for one class session, talking to an external recognition service.

pub mod camera;
pub mod config;
pub mod console;
pub mod database;
pub mod error;
pub mod export;
pub mod logging;
pub mod notification;
pub mod recognition;
pub mod session;

use anyhow::{anyhow, Result};
use camera::{CameraState, CapabilityProbe, FrameAcquirer};
use console::{Args, Console};
use notification::NotificationBus;
use recognition::AttendanceApiClient;
use session::CaptureController;
use std::sync::Arc;

/// Start the console: load config, probe the camera, then read commands
pub async fn run(args: Args) -> Result<()> {
    logging::init_logging(&logging::default_log_dir());
    tracing::info!("Attendance console v{} starting", env!("CARGO_PKG_VERSION"));

    let mut cfg = match &args.config {
        Some(path) => config::load_from_path(path).map_err(|e| anyhow!(e))?,
        None => config::get_config(),
    };
    args.apply(&mut cfg);

    let client = AttendanceApiClient::with_config(&cfg.backend.base_url, cfg.backend.timeout_secs)?;
    let source = console::build_frame_source(&cfg)?;
    let acquirer = FrameAcquirer::new(
        source,
        CapabilityProbe::new(),
        cfg.capture.acquire_settings(),
    );
    let notifications = NotificationBus::new(cfg.notifications.auto_hide());
    let controller = CaptureController::new(
        acquirer,
        Arc::new(client.clone()),
        notifications.clone(),
        cfg.capture.controller_settings(),
    );

    let printer = console::spawn_notification_printer(&notifications);

    match controller.probe_camera().await {
        CameraState::Ready => println!("Camera ready"),
        state => println!("{}", state.description()),
    }

    let mut console = Console::new(controller, client, cfg.storage.database_path());
    if !console.client_is_available().await {
        println!(
            "Recognition service at {} is not reachable",
            cfg.backend.base_url
        );
    }
    match console.reload_subjects().await {
        Ok(count) => println!("Loaded {} subject(s)", count),
        Err(e) => {
            tracing::warn!("{:#}", e);
            println!("Could not load subjects; use 'subjects' to retry");
        }
    }

    let result = console::run_repl(&mut console).await;
    printer.abort();
    tracing::info!("Attendance console exiting");
    result
}
