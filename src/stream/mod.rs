//! Stream Connection Manager.
//!
//! Owns the long-lived subscription to the firehose and the reconnect loop
//! around it. The transport is a trait seam ([`StreamTransport`]) so the
//! state machine can be driven by scripted sessions in tests; delays go
//! through a [`Sleeper`] for the same reason.
//!
//! # State machine
//!
//! ```text
//!         (keys non-empty)
//! Idle ─────────────────► Connecting ──handshake──► Connected
//!                             ▲                         │
//!                             │                 close / error
//!                             │                         ▼
//!                          Backoff ◄─────────────── Draining
//! ```
//!
//! A clean close waits the baseline delay; any other transport failure waits
//! the error delay on top of the baseline. There is no retry limit.

pub mod websocket;

pub use websocket::WebSocketTransport;

use crate::dispatcher::Dispatcher;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Query parameter carrying one subscribed DID
pub const WANTED_DIDS_PARAM: &str = "wantedDids";

/// Delay after a clean remote close
const DEFAULT_CLEAN_CLOSE_DELAY: Duration = Duration::from_secs(5);

/// Extra delay after a transport error, added to the clean-close delay
const DEFAULT_ERROR_DELAY: Duration = Duration::from_secs(10);

/// Stream-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid subscription URL: {0}")]
    InvalidUrl(String),

    /// Handshake with the stream endpoint failed
    #[error("connect failed: {0}")]
    Connect(String),

    /// The established connection failed
    #[error("stream error: {0}")]
    Stream(String),
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Draining,
    Backoff,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// Remote end closed the connection
    Clean,
    /// Handshake or read failure
    Error,
}

/// Fixed reconnect delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub clean_close_delay: Duration,
    pub error_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            clean_close_delay: DEFAULT_CLEAN_CLOSE_DELAY,
            error_delay: DEFAULT_ERROR_DELAY,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnecting after `disconnect`.
    pub fn delay_for(&self, disconnect: Disconnect) -> Duration {
        match disconnect {
            Disconnect::Clean => self.clean_close_delay,
            Disconnect::Error => self.error_delay + self.clean_close_delay,
        }
    }
}

/// Source of backoff waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// An open subscription yielding text messages in arrival order.
#[async_trait]
pub trait MessageStream: Send {
    /// Next message.
    ///
    /// `None` means the remote end closed the connection cleanly.
    async fn next_message(&mut self) -> Option<Result<String, TransportError>>;
}

/// Opens subscriptions.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn MessageStream>, TransportError>;
}

/// Build the subscription URL with one `wantedDids` parameter per key.
pub fn subscription_url(base: &str, keys: &[String]) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    {
        let mut query = url.query_pairs_mut();
        for key in keys {
            query.append_pair(WANTED_DIDS_PARAM, key);
        }
    }
    Ok(url)
}

/// Counters for the lifetime of a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub clean_closes: u64,
    pub errors: u64,
}

/// Drives the connect / consume / backoff loop.
pub struct ConnectionManager {
    /// Subscription target; `None` when there is nothing to subscribe to
    url: Option<Url>,

    transport: Arc<dyn StreamTransport>,
    dispatcher: Arc<Dispatcher>,
    sleeper: Arc<dyn Sleeper>,
    policy: BackoffPolicy,
    state: ConnectionState,
    stats: ConnectionStats,
}

impl ConnectionManager {
    /// Create a manager subscribing to `keys` on the stream at `base_url`.
    ///
    /// With no keys the manager stays [`ConnectionState::Idle`] forever.
    pub fn new(
        base_url: &str,
        keys: &[String],
        transport: Arc<dyn StreamTransport>,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, TransportError> {
        let url = if keys.is_empty() {
            None
        } else {
            Some(subscription_url(base_url, keys)?)
        };

        Ok(Self {
            url,
            transport,
            dispatcher,
            sleeper: Arc::new(TokioSleeper),
            policy: BackoffPolicy::default(),
            state: ConnectionState::Idle,
            stats: ConnectionStats::default(),
        })
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Run the reconnect loop forever.
    ///
    /// Returns immediately when there is nothing to subscribe to.
    pub async fn run(&mut self) {
        if self.url.is_none() {
            warn!("No authors to subscribe to, stream client will not start");
            return;
        }

        while self.cycle().await.is_some() {}
    }

    /// Run until `shutdown` fires.
    ///
    /// An idle manager (no keys) parks here until shutdown instead of
    /// returning, so the worker stays up and visible.
    pub async fn run_until(&mut self, shutdown: &ShutdownSignal) {
        if self.url.is_none() {
            warn!("No authors to subscribe to, worker idle until shutdown");
            shutdown.triggered().await;
            return;
        }

        let stopped = tokio::select! {
            _ = shutdown.triggered() => true,
            _ = self.run() => false,
        };

        if stopped {
            info!(
                attempts = self.stats.attempts,
                clean_closes = self.stats.clean_closes,
                errors = self.stats.errors,
                "Stream client stopped"
            );
        }
    }

    /// One connect / consume / backoff round.
    ///
    /// Returns `None` without touching the transport when idle.
    pub async fn cycle(&mut self) -> Option<Disconnect> {
        let url = self.url.clone()?;

        self.state = ConnectionState::Connecting;
        self.stats.attempts += 1;
        debug!(attempt = self.stats.attempts, "Connecting to stream");

        let disconnect = match self.transport.connect(&url).await {
            Ok(stream) => {
                self.state = ConnectionState::Connected;
                info!("Connected to stream, listening for new posts");
                self.consume(stream).await
            }
            Err(e) => {
                error!(error = %e, "Stream connection failed");
                Disconnect::Error
            }
        };

        self.state = ConnectionState::Draining;
        match disconnect {
            Disconnect::Clean => self.stats.clean_closes += 1,
            Disconnect::Error => self.stats.errors += 1,
        }

        let delay = self.policy.delay_for(disconnect);
        self.state = ConnectionState::Backoff;
        warn!(
            disconnect = ?disconnect,
            delay_ms = delay.as_millis() as u64,
            attempts = self.stats.attempts,
            clean_closes = self.stats.clean_closes,
            errors = self.stats.errors,
            "Stream disconnected, reconnecting after delay"
        );
        self.sleeper.sleep(delay).await;

        Some(disconnect)
    }

    /// Hand messages to the dispatcher until the connection ends.
    async fn consume(&self, mut stream: Box<dyn MessageStream>) -> Disconnect {
        loop {
            match stream.next_message().await {
                Some(Ok(message)) => {
                    self.dispatcher.dispatch(&message);
                }
                Some(Err(e)) => {
                    error!(error = %e, "Stream read failed");
                    return Disconnect::Error;
                }
                None => {
                    info!("Stream closed by remote");
                    return Disconnect::Clean;
                }
            }
        }
    }
}
