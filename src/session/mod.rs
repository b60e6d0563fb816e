//! Authorization session tracking

mod monitor;

pub use monitor::{LockState, Session, SessionContext, SessionMonitor};

#[cfg(test)]
pub(crate) use monitor::test_support;
