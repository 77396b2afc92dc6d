//! Trigger forwarding.
//!
//! The [`TriggerForwarder`] hands a [`TriggerPayload`] to the control API's
//! workflow endpoint. The dispatcher only sees the [`TriggerSink`] trait, so
//! stream consumption never waits on a downstream call.

use crate::control_api::{ControlApi, ControlApiError};
use crate::event::TriggerPayload;
use reqwest::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Errors from a single trigger call.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// The workflow API answered with a non-success status
    #[error("workflow API returned status {status}: {body}")]
    HttpStatus { status: StatusCode, body: String },

    /// The request never produced a response
    #[error("workflow API request failed: {0}")]
    Transport(String),
}

impl From<ControlApiError> for ForwardError {
    fn from(error: ControlApiError) -> Self {
        match error {
            ControlApiError::HttpStatus { status, body } => Self::HttpStatus { status, body },
            ControlApiError::Auth { status, body } => Self::HttpStatus { status, body },
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Receiver of payloads produced by the dispatcher.
///
/// `submit` must not block; failures are the sink's to log.
pub trait TriggerSink: Send + Sync {
    fn submit(&self, payload: TriggerPayload);
}

/// Sends trigger payloads through a [`ControlApi`].
#[derive(Clone)]
pub struct TriggerForwarder {
    api: Arc<dyn ControlApi>,
}

impl TriggerForwarder {
    pub fn new(api: Arc<dyn ControlApi>) -> Self {
        Self { api }
    }

    /// Send one payload and wait for the response.
    ///
    /// The request timeout is owned by the [`ControlApi`] implementation.
    pub async fn forward(&self, payload: &TriggerPayload) -> Result<(), ForwardError> {
        info!(
            author_id = %payload.subject_internal_id,
            "Sending post to workflow API"
        );

        self.api.trigger_workflow(payload).await?;

        info!(
            author_id = %payload.subject_internal_id,
            "Successfully triggered workflow"
        );
        Ok(())
    }
}

impl TriggerSink for TriggerForwarder {
    /// Spawn the call on the runtime and log its outcome.
    fn submit(&self, payload: TriggerPayload) {
        let forwarder = self.clone();
        tokio::spawn(async move {
            if let Err(e) = forwarder.forward(&payload).await {
                error!(
                    author_id = %payload.subject_internal_id,
                    error = %e,
                    "Workflow trigger failed"
                );
            }
        });
    }
}
