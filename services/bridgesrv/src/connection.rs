//! Shared serial connection
//!
//! [`ConnectionManager`] owns the one physical link to the controller. The
//! command path and the batch-read path both go through it, and one async
//! mutex keeps their bytes apart: a command holds the lock across
//! write, settle delay and response read, and the reader holds it for each
//! individual timeout-bounded line read.
//!
//! Link failures are never fatal. Any I/O error marks the manager
//! disconnected; commands then fail fast and the batch reader blocks in
//! [`ConnectionManager::ensure_connected`] until the link is back.

use futures::Stream;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::batch::{Batch, BatchAssembler};
use crate::error::{BridgeError, Result};
use crate::reconnect::{ReconnectError, ReconnectHelper, ReconnectPolicy, ReconnectStats};
use crate::transport::{LineTransport, TransportStats};

/// Timing of the serial link
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Upper bound on a single line read
    pub read_timeout: Duration,
    /// Wait between writing a command and reading its response
    pub settle_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            settle_delay: Duration::from_millis(200),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Snapshot of link counters
#[derive(Debug, Clone, Serialize)]
pub struct LinkStats {
    pub endpoint: String,
    pub connected: bool,
    pub commands_written: u64,
    pub commands_failed: u64,
    pub reconnect: ReconnectStats,
    pub transport: TransportStats,
}

/// Owner of the serial link
#[derive(Debug)]
pub struct ConnectionManager {
    transport: Mutex<Box<dyn LineTransport>>,
    connected: AtomicBool,
    settings: LinkSettings,
    reconnect: ReconnectHelper,
    endpoint: String,
    commands_written: AtomicU64,
    commands_failed: AtomicU64,
}

impl ConnectionManager {
    /// Wrap `transport` without opening it
    pub fn new(transport: Box<dyn LineTransport>, settings: LinkSettings) -> Self {
        let endpoint = transport.endpoint();
        Self {
            transport: Mutex::new(transport),
            connected: AtomicBool::new(false),
            reconnect: ReconnectHelper::new(settings.reconnect.clone()),
            settings,
            endpoint,
            commands_written: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
        }
    }

    /// Wrap `transport` and make the initial connection attempt
    ///
    /// A failed attempt leaves the manager disconnected.
    pub async fn open(transport: Box<dyn LineTransport>, settings: LinkSettings) -> Arc<Self> {
        let manager = Arc::new(Self::new(transport, settings));
        manager.connect().await;
        manager
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mark_disconnected(&self, reason: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!(endpoint = %self.endpoint, "Serial link lost: {reason}");
        }
    }

    /// Open (or reopen) the link
    ///
    /// Returns whether the link is now up. Never fails.
    pub async fn connect(&self) -> bool {
        let mut transport = self.transport.lock().await;
        match transport.connect().await {
            Ok(()) => {
                self.connected.store(true, Ordering::SeqCst);
                info!(endpoint = %self.endpoint, "Serial link connected");
                true
            },
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                warn!(endpoint = %self.endpoint, "No serial link: {e}");
                false
            },
        }
    }

    /// Block until the link is up
    ///
    /// Retries with the configured backoff and poll interval. Only fails when
    /// `cancel` fires or the policy gives up.
    pub async fn ensure_connected(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), ReconnectError> {
        if self.is_connected() {
            return Ok(());
        }

        info!(
            endpoint = %self.endpoint,
            "Waiting for serial link, polling every {:?}",
            self.reconnect.policy().poll_interval
        );
        let this = self;
        self.reconnect
            .reconnect_until(cancel, move || async move {
                if this.connect().await {
                    Ok(())
                } else {
                    Err("serial port unavailable")
                }
            })
            .await
            .map(|_| ())
    }

    /// Send one command line and read the controller's reply
    ///
    /// Appends `\n` when missing. Fails immediately when the link is down; an
    /// I/O error while writing or reading the reply marks the link
    /// disconnected. Never retries.
    pub async fn write_command(&self, command: &str) -> Result<String> {
        if !self.is_connected() {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
            return Err(BridgeError::transport_unavailable(format!(
                "cannot send '{}': serial link down",
                command.trim_end()
            )));
        }

        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut transport = self.transport.lock().await;
        let result = self.exchange(transport.as_mut(), &line).await;
        drop(transport);

        match &result {
            Ok(reply) => {
                self.commands_written.fetch_add(1, Ordering::Relaxed);
                debug!(command = %line.trim_end(), reply = %reply, "Command sent");
            },
            Err(e) => {
                self.commands_failed.fetch_add(1, Ordering::Relaxed);
                warn!(command = %line.trim_end(), "Command failed: {e}");
            },
        }
        result
    }

    async fn exchange(&self, transport: &mut dyn LineTransport, line: &str) -> Result<String> {
        // The link may have dropped while we waited for the lock
        if !self.is_connected() {
            return Err(BridgeError::transport_unavailable("serial link down"));
        }

        if let Err(e) = transport.write_bytes(line.as_bytes()).await {
            self.mark_disconnected(&e.to_string());
            return Err(e.into());
        }

        tokio::time::sleep(self.settings.settle_delay).await;

        match transport.read_line(self.settings.read_timeout).await {
            Ok(reply) => Ok(reply.unwrap_or_default()),
            Err(e) => {
                self.mark_disconnected(&e.to_string());
                Err(e.into())
            },
        }
    }

    /// Read one non-empty line
    ///
    /// `None` on an idle timeout, and on any transport or decode error, which
    /// also marks the link disconnected.
    pub async fn read_line(&self) -> Option<String> {
        if !self.is_connected() {
            return None;
        }

        let result = {
            let mut transport = self.transport.lock().await;
            transport.read_line(self.settings.read_timeout).await
        };
        match result {
            Ok(Some(line)) if !line.is_empty() => Some(line),
            Ok(_) => None,
            Err(e) => {
                self.mark_disconnected(&e.to_string());
                None
            },
        }
    }

    /// Stream of complete batches, until `cancel` fires
    pub fn read_batches(self: &Arc<Self>, cancel: CancellationToken) -> BatchReader {
        BatchReader {
            manager: Arc::clone(self),
            assembler: BatchAssembler::new(),
            cancel,
        }
    }

    /// Close the link
    pub async fn close(&self) {
        let mut transport = self.transport.lock().await;
        if let Err(e) = transport.disconnect().await {
            warn!(endpoint = %self.endpoint, "Error closing serial link: {e}");
        }
        self.connected.store(false, Ordering::SeqCst);
        info!(endpoint = %self.endpoint, "Serial link closed");
    }

    pub async fn stats(&self) -> LinkStats {
        let transport = self.transport.lock().await.stats();
        LinkStats {
            endpoint: self.endpoint.clone(),
            connected: self.is_connected(),
            commands_written: self.commands_written.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            reconnect: self.reconnect.stats(),
            transport,
        }
    }
}

/// Pull-based reader of complete batches
///
/// Owns its own [`BatchAssembler`]; partial readings are not shared with
/// other readers. Ends only when its cancellation token fires.
#[derive(Debug)]
pub struct BatchReader {
    manager: Arc<ConnectionManager>,
    assembler: BatchAssembler,
    cancel: CancellationToken,
}

impl BatchReader {
    /// Wait for the next complete batch
    pub async fn next(&mut self) -> Option<Batch> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }

            if !self.manager.is_connected() {
                match self.manager.ensure_connected(&self.cancel).await {
                    Ok(()) => {},
                    Err(ReconnectError::Cancelled) => return None,
                    Err(e) => warn!("Serial reconnection gave up: {e}; starting over"),
                }
                continue;
            }

            let line = tokio::select! {
                () = self.cancel.cancelled() => return None,
                line = self.manager.read_line() => line,
            };

            if let Some(line) = line {
                if let Some(batch) = self.assembler.push(&line) {
                    return Some(batch);
                }
            }
        }
    }

    pub fn assembler(&self) -> &BatchAssembler {
        &self.assembler
    }

    /// Adapt into a [`Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Batch> + Send {
        futures::stream::unfold(self, |mut reader| async move {
            reader.next().await.map(|batch| (batch, reader))
        })
    }
}
