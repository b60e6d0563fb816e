//! Input Sampler
//!
//! Converts raw pointer/joystick samples into a normalized drive intent.
//! The sampler only publishes on its watch channel; it never touches the
//! network, that is the dispatcher's job.

use crate::protocol::DriveVector;
use tokio::sync::watch;

/// One raw sample from the pointer or joystick, components in [-1, 1]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawSample {
    pub x: f32,
    pub y: f32,
    pub active: bool,
}

/// Normalized intent: forward/turn vector plus whether the stick is held
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DriveIntent {
    pub vector: DriveVector,
    pub engaged: bool,
}

/// Debounces raw input through a dead-zone and publishes drive intent
pub struct InputSampler {
    dead_zone: f32,
    tx: watch::Sender<DriveIntent>,
}

impl InputSampler {
    pub fn new(dead_zone: f32) -> (Self, watch::Receiver<DriveIntent>) {
        let (tx, rx) = watch::channel(DriveIntent::default());
        (Self { dead_zone, tx }, rx)
    }

    /// Normalize one raw sample and publish the resulting intent
    pub fn sample(&self, raw: RawSample) -> DriveIntent {
        let intent = self.normalize(raw);
        let _ = self.tx.send(intent);
        intent
    }

    /// Publish an explicit release (stop button, pointer up)
    pub fn release(&self) -> DriveIntent {
        let intent = DriveIntent::default();
        let _ = self.tx.send(intent);
        intent
    }

    fn normalize(&self, raw: RawSample) -> DriveIntent {
        if !raw.active {
            return DriveIntent::default();
        }

        let x = raw.x.clamp(-1.0, 1.0);
        let y = raw.y.clamp(-1.0, 1.0);

        // Inside the dead-zone the stick reads as released
        if (x * x + y * y).sqrt() < self.dead_zone {
            return DriveIntent::default();
        }

        DriveIntent {
            // y drives forward/back, x drives the turn rate
            vector: DriveVector::clamped(y, x),
            engaged: true,
        }
    }
}
