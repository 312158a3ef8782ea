//! The `producer` module implements the producer role: it sends requests to
//! the broker and matches the answer packets the broker routes back.
//!
//! A request sent with a callback is tracked until its answer arrives or its
//! timeout expires; a request sent without one is fire-and-forget. Whether a
//! request expects one answer or one per subscribed consumer is the
//! producer's `AnswerMode`, fixed at construction.

pub mod pending;

pub use pending::{AnswerMode, Callback, PendingRequestTracker};

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ProducerSettings;
use crate::endpoint::{EndpointEvent, EndpointRef, Link};
use crate::protocol::Packet;
use crate::utils::{Error, Result};

/// Shortest sweep period; a zero interval is raised to this.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ProducerOptions {
    pub answer_mode: AnswerMode,
    pub request_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            answer_mode: AnswerMode::Single,
            request_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

impl From<&ProducerSettings> for ProducerOptions {
    fn from(settings: &ProducerSettings) -> Self {
        Self {
            answer_mode: settings.answer_mode,
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
            sweep_interval: Duration::from_millis(settings.sweep_interval_ms.max(1)),
        }
    }
}

#[derive(Debug)]
pub struct Producer {
    broker: EndpointRef,
    tracker: PendingRequestTracker,
    options: ProducerOptions,
}

impl Producer {
    pub fn new(broker: EndpointRef, options: ProducerOptions) -> Self {
        Self {
            broker,
            tracker: PendingRequestTracker::new(options.answer_mode),
            options,
        }
    }

    /// Build a producer on `link` and spawn the task that drives it.
    pub fn spawn(link: Link, options: ProducerOptions) -> (Arc<Self>, JoinHandle<()>) {
        let producer = Arc::new(Self::new(link.endpoint, options));
        let handle = tokio::spawn(producer.clone().run(link.events));
        (producer, handle)
    }

    pub fn tracker(&self) -> &PendingRequestTracker {
        &self.tracker
    }

    pub fn options(&self) -> &ProducerOptions {
        &self.options
    }

    /// Send without expecting an answer.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<u32> {
        self.broker.send(payload.into())
    }

    /// Send and run `callback` with the answer, or with `Error::Timeout` after
    /// `timeout` (the configured request timeout when `None`).
    pub fn send_with<F>(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
        callback: F,
    ) -> Result<u32>
    where
        F: Fn(u32, Result<Bytes>) + Send + Sync + 'static,
    {
        self.tracker.track(
            payload.into(),
            Arc::new(callback),
            timeout.unwrap_or(self.options.request_timeout),
            |payload| self.broker.send(payload),
        )
    }

    /// Send and wait for the first answer.
    pub async fn request(&self, payload: impl Into<Bytes>) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let id = self.send_with(payload, None, move |_, result| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(result);
            }
        })?;
        rx.await.map_err(|_| Error::Timeout(id))?
    }

    /// Stop tracking request `id`, e.g. once enough answers arrived.
    pub fn forget(&self, id: u32) -> bool {
        self.tracker.remove(id)
    }

    pub fn handle_event(&self, event: EndpointEvent) {
        match event {
            EndpointEvent::Connected => info!(broker = %self.broker.address(), "connected to broker"),
            EndpointEvent::Disconnected => {
                warn!(broker = %self.broker.address(), "disconnected from broker")
            }
            EndpointEvent::DataReceived { data, .. } => {
                let answer = match Packet::decode(&data) {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!("answer unmarshal error: {e}");
                        return;
                    }
                };
                if let Err(e) = self.tracker.on_answer(answer.id, answer.payload) {
                    debug!("answer id {} error: {e}", answer.id);
                }
            }
        }
    }

    /// Process answers and sweep timeouts until the link closes, then keep
    /// sweeping until every pending request has resolved.
    pub async fn run(self: Arc<Self>, mut events: UnboundedReceiver<EndpointEvent>) {
        let period = self.options.sweep_interval.max(MIN_SWEEP_INTERVAL);
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let closed = event == EndpointEvent::Disconnected;
                    self.handle_event(event);
                    if closed {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }

        while !self.tracker.is_empty() {
            ticker.tick().await;
            self.sweep();
        }
    }

    fn sweep(&self) {
        let expired = self.tracker.sweep(Instant::now());
        if expired > 0 {
            debug!(expired, "pending requests timed out");
        }
    }
}
