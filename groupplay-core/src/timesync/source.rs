//! A single clock endpoint sampler
//!
//! One `TimeSyncSource` pings one endpoint (the server, or a peer over its
//! data channel) and keeps a rolling window of round-trip samples. The
//! current offset/ping estimate is the arithmetic mean over the window.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, warn};

use crate::now_local_ms;

/// Identifier of the direct server source.
pub const SERVER_SOURCE_ID: &str = "server";

/// Samples kept for averaging.
const SAMPLE_WINDOW: usize = 8;

/// Ping cadence until the window is full.
const GREEDY_PING_INTERVAL: Duration = Duration::from_millis(1000);

/// Steady-state ping cadence.
const STEADY_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Errors raised while sampling a clock endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TimeSyncError {
    #[error("clock sample failed: {0}")]
    SampleFailed(String),

    #[error("ping timed out")]
    Timeout,

    #[error("peer disconnected")]
    PeerDisconnected,
}

/// One completed round trip, all instants in milliseconds.
///
/// `request_sent` and `response_received` are read from the local clock; the
/// middle two come from the remote endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSample {
    pub request_sent: i64,
    pub request_received: i64,
    pub response_sent: i64,
    pub response_received: i64,
}

impl PingSample {
    /// Network round-trip time, remote processing excluded. Coarse clocks can
    /// produce a negative value; clamp to zero.
    pub fn rtt_ms(&self) -> i64 {
        let rtt = (self.response_received - self.request_sent)
            - (self.response_sent - self.request_received);
        rtt.max(0)
    }

    /// Signed offset to add to a local instant to obtain the remote one.
    pub fn offset_ms(&self) -> f64 {
        let outbound = self.request_received - self.request_sent;
        let inbound = self.response_sent - self.response_received;
        (outbound + inbound) as f64 / 2.0
    }
}

/// How a source reaches its endpoint. The server kind is an RPC; the peer
/// kind is a request/response pair over the peer's data channel.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self) -> Result<PingSample, TimeSyncError>;
}

/// Estimate update pushed after every ping attempt.
#[derive(Debug, Clone)]
pub struct SyncUpdate {
    pub source_id: String,
    pub error: Option<TimeSyncError>,
    pub offset_ms: Option<f64>,
    pub ping_ms: Option<f64>,
}

#[derive(Debug, Default)]
struct SourceState {
    samples: VecDeque<PingSample>,
    offset_ms: f64,
    ping_ms: f64,
}

impl SourceState {
    fn record(&mut self, sample: PingSample) {
        if self.samples.len() >= SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);

        let n = self.samples.len() as f64;
        self.offset_ms = self.samples.iter().map(|s| s.offset_ms()).sum::<f64>() / n;
        self.ping_ms = self.samples.iter().map(|s| s.rtt_ms() as f64).sum::<f64>() / n;
    }

    fn window_full(&self) -> bool {
        self.samples.len() >= SAMPLE_WINDOW
    }
}

/// Samples one clock endpoint in the background.
///
/// Ping attempts are serialized: the polling loop issues one ping, records
/// the result, then waits out the interval. A ping still in flight when the
/// loop is cancelled is dropped without touching the window.
pub struct TimeSyncSource {
    id: String,
    pinger: Arc<dyn Pinger>,
    state: Arc<RwLock<SourceState>>,
    updates: broadcast::Sender<SyncUpdate>,
    poke: Arc<Notify>,
    poll_cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl TimeSyncSource {
    pub fn new(id: impl Into<String>, pinger: Arc<dyn Pinger>) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            id: id.into(),
            pinger,
            state: Arc::new(RwLock::new(SourceState::default())),
            updates,
            poke: Arc::new(Notify::new()),
            poll_cancel: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Mean offset over the current window (ms).
    pub fn offset_ms(&self) -> f64 {
        self.state.read().unwrap().offset_ms
    }

    /// Mean round-trip time over the current window (ms).
    pub fn ping_ms(&self) -> f64 {
        self.state.read().unwrap().ping_ms
    }

    pub fn local_to_remote(&self, local_ms: i64) -> i64 {
        local_ms + self.offset_ms().round() as i64
    }

    pub fn remote_to_local(&self, remote_ms: i64) -> i64 {
        remote_ms - self.offset_ms().round() as i64
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncUpdate> {
        self.updates.subscribe()
    }

    /// Start the polling loop. Restarts from scratch if already running.
    pub fn start(&self) {
        self.stop();

        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.poll_cancel.lock().unwrap() = Some(cancel_tx);

        let id = self.id.clone();
        let pinger = Arc::clone(&self.pinger);
        let state = Arc::clone(&self.state);
        let updates = self.updates.clone();
        let poke = Arc::clone(&self.poke);

        tokio::spawn(async move {
            debug!("time sync source {} started", id);

            loop {
                let update = match pinger.ping().await {
                    Ok(sample) => {
                        let mut guard = state.write().unwrap();
                        guard.record(sample);
                        SyncUpdate {
                            source_id: id.clone(),
                            error: None,
                            offset_ms: Some(guard.offset_ms),
                            ping_ms: Some(guard.ping_ms),
                        }
                    }
                    Err(err) => {
                        // The window keeps its previous samples; the prior
                        // estimate stays in effect until a ping succeeds.
                        warn!("time sync ping to {} failed: {}", id, err);
                        SyncUpdate {
                            source_id: id.clone(),
                            error: Some(err),
                            offset_ms: None,
                            ping_ms: None,
                        }
                    }
                };
                let _ = updates.send(update);

                let interval = if state.read().unwrap().window_full() {
                    STEADY_PING_INTERVAL
                } else {
                    GREEDY_PING_INTERVAL
                };

                tokio::select! {
                    _ = &mut cancel_rx => {
                        debug!("time sync source {} stopped", id);
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {}
                    _ = poke.notified() => {}
                }
            }
        });
    }

    /// Stop the polling loop; the estimate remains readable.
    pub fn stop(&self) {
        if let Some(tx) = self.poll_cancel.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }

    /// Skip the current wait and ping immediately.
    pub fn force_update(&self) {
        self.poke.notify_one();
    }

    /// Record a completed sample directly (used by owners that sample out of
    /// band, and by tests).
    pub fn record_sample(&self, sample: PingSample) {
        self.state.write().unwrap().record(sample);
    }
}

impl Drop for TimeSyncSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pinger for the server endpoint: one RPC returning the two server-side
/// timestamps; the local pair is read around the call.
pub struct ServerPinger {
    api: Arc<dyn crate::api::ServerApi>,
}

impl ServerPinger {
    pub fn new(api: Arc<dyn crate::api::ServerApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Pinger for ServerPinger {
    async fn ping(&self) -> Result<PingSample, TimeSyncError> {
        let request_sent = now_local_ms();
        let payload = self
            .api
            .server_time()
            .await
            .map_err(|e| TimeSyncError::SampleFailed(e.to_string()))?;
        let response_received = now_local_ms();

        Ok(PingSample {
            request_sent,
            request_received: payload.request_reception_time,
            response_sent: payload.response_transmission_time,
            response_received,
        })
    }
}
