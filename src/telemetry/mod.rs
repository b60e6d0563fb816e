//! Server-pushed telemetry reconciliation

mod reconciler;

pub use reconciler::{EchoedCommand, TelemetryEvent, TelemetryReconciler, TelemetrySnapshot};
