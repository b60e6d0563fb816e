mod api;
mod camera;
mod command;
mod config;
mod input;
mod protocol;
mod session;
mod status;
mod telemetry;

use api::{CameraApi, CommandSink, HttpApi, UnlockApi};
use camera::{CameraManager, HttpStreamTransport};
use command::{DriveDispatcher, DriveHandle};
use config::ConsoleConfig;
use input::{InputSampler, RawSample};
use protocol::UnlockRequest;
use session::SessionMonitor;
use status::StatusSender;
use telemetry::{TelemetryEvent, TelemetryReconciler};

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ConsoleConfig::from_env();
    info!("Operator console starting");
    info!("  controller: {}", config.base_url);
    info!("  client id: {}", config.client_id);

    let api = Arc::new(HttpApi::new(&config)?);
    let (status, mut status_rx) = StatusSender::new(config.status_ttl);

    let monitor = Arc::new(SessionMonitor::new(
        api.clone() as Arc<dyn UnlockApi>,
        status.clone(),
    ));

    // Resume an existing authorization, or unlock with the configured password
    if monitor.resume().await {
        info!("Resumed existing session");
    } else if let Ok(password) = std::env::var("CONSOLE_PASSWORD") {
        if let Err(e) = monitor.unlock(&UnlockRequest::password(password)).await {
            warn!("Startup unlock failed: {}", e);
        }
    } else {
        info!("No session; use `unlock <password>` to start");
    }

    let (sampler, intent_rx) = InputSampler::new(config.dead_zone);

    let (drive, mut movement_rx, _dispatch_task) = DriveDispatcher::spawn(
        api.clone() as Arc<dyn CommandSink>,
        monitor.context(),
        intent_rx,
        status.clone(),
        &config,
    );

    let (mut badge_rx, mut frames_rx, _camera_task) = CameraManager::spawn(
        api.clone() as Arc<dyn CameraApi>,
        Arc::new(HttpStreamTransport::new()),
        monitor.context(),
        status.clone(),
        &config,
    );

    // Drain the frame channel; a real frontend would render these
    tokio::spawn(async move {
        let mut frames: u64 = 0;
        while frames_rx.recv().await.is_some() {
            frames += 1;
            if frames % 100 == 0 {
                debug!("{} frames received", frames);
            }
        }
    });

    // Telemetry push channel (fed by the controller's push transport)
    let (telemetry_tx, telemetry_rx) = mpsc::channel::<TelemetryEvent>(32);
    let reconciler = Arc::new(TelemetryReconciler::new(monitor.clone(), status.clone()));
    let _telemetry_task = reconciler.clone().spawn(telemetry_rx);

    // Operator command loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Ready. Commands: unlock <pw> | drive <x> <y> | stop | speed <v> | blade <action> | emergency | lock | status | quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                let _ = telemetry_tx
                    .send(TelemetryEvent::Lockout { reason: "console shutdown".into() })
                    .await;
                // Give the dispatcher a moment to emit its final stop
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_command(line.trim(), &sampler, &drive, &monitor, &reconciler).await {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Input read failed: {}", e);
                        break;
                    }
                }
            }
            changed = status_rx.changed() => {
                if changed.is_ok() {
                    if let Some(note) = status_rx.borrow_and_update().clone() {
                        if note.ok {
                            info!("[STATUS] {}", note.text);
                        } else {
                            warn!("[STATUS] {}", note.text);
                        }
                    }
                }
            }
            changed = badge_rx.changed() => {
                if changed.is_ok() {
                    let badge = *badge_rx.borrow_and_update();
                    info!("[CAMERA] {:?} (failures: {})", badge.mode, badge.failure_count);
                }
            }
            changed = movement_rx.changed() => {
                if changed.is_ok() {
                    let vector = *movement_rx.borrow_and_update();
                    debug!("[MOVE] linear={:.2} angular={:.2}", vector.linear, vector.angular);
                }
            }
        }
    }

    Ok(())
}

/// Handle one operator command line; returns false to quit
async fn handle_command(
    line: &str,
    sampler: &InputSampler,
    drive: &DriveHandle,
    monitor: &Arc<SessionMonitor>,
    reconciler: &Arc<TelemetryReconciler>,
) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("unlock") => {
            let password = parts.next().unwrap_or_default();
            let _ = monitor.unlock(&UnlockRequest::password(password)).await;
        }
        Some("drive") => {
            let x: f32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let y: f32 = parts.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
            sampler.sample(RawSample { x, y, active: true });
        }
        Some("stop") => {
            sampler.release();
            drive.stop();
        }
        Some("speed") => {
            if let Some(limit) = parts.next().and_then(|v| v.parse::<f32>().ok()) {
                drive.set_speed_limit(limit);
                info!("Speed limit set to {:.0}%", limit.clamp(0.0, 1.0) * 100.0);
            }
        }
        Some("blade") => {
            let action = parts.next().unwrap_or("stop");
            drive.blade(action, "operator");
        }
        Some("emergency") => {
            drive.emergency();
        }
        Some("lock") => {
            monitor.lockout("operator requested").await;
        }
        Some("status") => {
            let telemetry = reconciler.snapshot().await;
            let remaining = monitor.remaining_ms().await;
            info!(
                "safety={:?} lease_remaining={:?}ms",
                telemetry.safety_state, remaining
            );
        }
        Some("quit") | Some("exit") => return false,
        Some(other) => warn!("Unknown command: {}", other),
        None => {}
    }
    true
}
