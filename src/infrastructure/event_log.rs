//! Best-effort discovery event log
//!
//! Events go into a bounded queue drained by a background task that writes
//! them as structured tracing records and, optionally, to a JSON-lines
//! file. `emit` never waits: when the queue is full the event is dropped
//! and counted.

#![allow(clippy::uninlined_format_args)]

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::domain::DiscoveryEvent;

/// Additional destination for drained events
pub trait EventSink: Send {
    fn record(&mut self, event: &DiscoveryEvent) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Appends one JSON object per line
pub struct JsonLinesSink {
    writer: BufWriter<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {:?}", path))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for JsonLinesSink {
    fn record(&mut self, event: &DiscoveryEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct EventLog {
    sender: Option<mpsc::Sender<DiscoveryEvent>>,
    dropped: Arc<AtomicU64>,
}

/// Handle on the drain task; resolves once every [`EventLog`] clone is gone
pub struct EventDrain {
    handle: JoinHandle<u64>,
}

impl EventDrain {
    /// Waits for the queue to empty and returns the number of drained events
    pub async fn finish(self) -> u64 {
        self.handle.await.unwrap_or(0)
    }
}

impl EventLog {
    /// Starts the drain task on the current runtime
    pub fn spawn(capacity: usize, mut sink: Option<Box<dyn EventSink>>) -> (Self, EventDrain) {
        let (sender, mut receiver) = mpsc::channel::<DiscoveryEvent>(capacity.max(1));

        let handle = tokio::spawn(async move {
            let mut drained = 0u64;
            while let Some(event) = receiver.recv().await {
                drained += 1;
                match serde_json::to_string(&event) {
                    Ok(json) => info!(target: "discovery_events", event = event.name(), "{}", json),
                    Err(e) => warn!("Failed to encode discovery event: {}", e),
                }
                if let Some(sink) = sink.as_mut() {
                    if let Err(e) = sink.record(&event) {
                        warn!("Event sink write failed: {}", e);
                    }
                }
            }
            if let Some(sink) = sink.as_mut() {
                if let Err(e) = sink.flush() {
                    warn!("Event sink flush failed: {}", e);
                }
            }
            drained
        });

        let log = Self {
            sender: Some(sender),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (log, EventDrain { handle })
    }

    /// A log that discards everything
    pub fn noop() -> Self {
        Self {
            sender: None,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Never blocks and never fails the caller
    pub fn emit(&self, event: DiscoveryEvent) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events lost to a full or closed queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
