//! Operator status banner
//!
//! Advisory text only: components post what happened, the banner shows the
//! last write, and transient notes clear themselves after a short TTL.
//! Nothing reads the banner to make control decisions.

use crate::protocol::now_ms;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// One banner message
#[derive(Debug, Clone, PartialEq)]
pub struct StatusNote {
    pub text: String,
    pub ok: bool,
    pub at: u64,
}

/// Write handle for the status banner, cloneable across components
#[derive(Clone)]
pub struct StatusSender {
    tx: Arc<watch::Sender<Option<StatusNote>>>,
    generation: Arc<AtomicU64>,
    ttl: Duration,
}

impl StatusSender {
    pub fn new(ttl: Duration) -> (Self, watch::Receiver<Option<StatusNote>>) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                tx: Arc::new(tx),
                generation: Arc::new(AtomicU64::new(0)),
                ttl,
            },
            rx,
        )
    }

    /// Post an informational note that auto-clears after the TTL
    pub fn advise(&self, text: impl Into<String>) {
        self.post(text.into(), true);
    }

    /// Post a failure note that auto-clears after the TTL
    pub fn warn(&self, text: impl Into<String>) {
        self.post(text.into(), false);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatusNote>> {
        self.tx.subscribe()
    }

    fn post(&self, text: String, ok: bool) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.tx.send(Some(StatusNote {
            text,
            ok,
            at: now_ms(),
        }));

        // Clear later, unless a newer note has replaced this one
        let tx = self.tx.clone();
        let gen_counter = self.generation.clone();
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if gen_counter.load(Ordering::SeqCst) == generation {
                let _ = tx.send(None);
            }
        });
    }
}
