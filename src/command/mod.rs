//! Drive command dispatch
//!
//! This module handles:
//! - Coalescing joystick input into at most one pending drive request
//! - Serializing outbound command sends (single-flight)
//! - Re-issuing the current vector on a cadence while the stick is held
//! - Guaranteeing a final stop on disengagement and lockout

mod dispatcher;

pub use dispatcher::{DriveDispatcher, DriveHandle};
