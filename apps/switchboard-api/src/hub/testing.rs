//! Fake transports for hub unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::connection::{Connection, OutboundSink, TransportError};
use crate::identity::Identity;

pub fn identity(name: &str) -> Identity {
    Identity {
        id: format!("usr_{name}"),
        email: format!("{name}@x"),
        display_name: name.to_string(),
    }
}

/// Records every frame written to it; can be switched to fail or stall.
#[derive(Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<String>>,
    failing: AtomicBool,
    stalled: AtomicBool,
    closes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let sink = Self::new();
        sink.fail();
        sink
    }

    pub fn stalled() -> Arc<Self> {
        let sink = Self::new();
        sink.stalled.store(true, Ordering::SeqCst);
        sink
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Decoded `message` fields, in arrival order.
    pub fn texts(&self) -> Vec<String> {
        self.frames()
            .iter()
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f).unwrap();
                v["message"].as_str().unwrap().to_string()
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` frames have arrived.
    pub async fn wait_for_frames(&self, n: usize) -> Vec<String> {
        wait_until(|| self.frames.lock().len() >= n).await;
        self.frames()
    }

    pub async fn wait_for_close(&self) {
        wait_until(|| self.close_count() > 0).await;
    }
}

#[async_trait]
impl OutboundSink for RecordingSink {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.frames.lock().push(text.to_string());
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn connection(name: &str, sink: &Arc<RecordingSink>) -> Connection {
    Connection::new(identity(name), sink.clone())
}

/// Poll `done` every few milliseconds; panic after two seconds.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !done() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
