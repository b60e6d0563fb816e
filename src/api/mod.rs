//! REST client for the remote controller

mod error;
mod http;
mod traits;

pub use error::ApiError;
pub use http::HttpApi;
pub use traits::{CameraApi, CommandSink, UnlockApi};
