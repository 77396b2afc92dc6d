//! Process shutdown signalling.
//!
//! A [`ShutdownSignal`] is cloned into every component that must stop when
//! the process receives SIGINT or SIGTERM. Shutdown is abrupt: the stream
//! loop is dropped where it stands and in-flight trigger calls may be lost.
//!
//! The signal is latched, so a component that starts waiting after it fired
//! still returns at once.
//!
//! # Example
//!
//! ```rust,ignore
//! use skyrelay::shutdown::ShutdownSignal;
//!
//! let shutdown = ShutdownSignal::new();
//!
//! let listener = shutdown.clone();
//! tokio::spawn(async move { listener.listen().await });
//!
//! manager.run_until(&shutdown).await;
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Latched stop flag shared by the signal listener and the stream loop.
#[derive(Clone)]
pub struct ShutdownSignal {
    fired: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            fired: Arc::new(fired),
        }
    }

    /// Wait for SIGINT or SIGTERM, then fire.
    pub async fn listen(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let source = tokio::select! {
            _ = ctrl_c => "SIGINT",
            _ = terminate => "SIGTERM",
        };
        info!(signal = source, "Stopping worker");

        self.fired.send_replace(true);
    }

    /// Fire without an OS signal.
    pub fn trigger(&self) {
        info!("Shutdown triggered programmatically");
        self.fired.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.fired.borrow()
    }

    /// Resolve once the signal has fired, including when it fired earlier.
    pub async fn triggered(&self) {
        let mut receiver = self.fired.subscribe();
        // The sender lives as long as `self`, so this only returns once fired
        let _ = receiver.wait_for(|fired| *fired).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
