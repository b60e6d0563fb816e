//! Joystick input sampling

mod sampler;

pub use sampler::{DriveIntent, InputSampler, RawSample};
