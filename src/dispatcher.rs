//! Event Dispatcher - turns raw stream messages into trigger payloads.
//!
//! Each message runs through an ordered sequence of guard stages. The first
//! stage that rejects the message ends the dispatch with a [`SkipReason`].
//!
//! ```text
//! raw message
//!     │
//!     ▼
//! decode ──► kind == commit ──► operation == create ──► did in roster
//!                                                          │
//!                                                          ▼
//!                     submit ◄── id + text present ◄── collection == post
//! ```
//!
//! Stages are ordered cheapest first: almost all firehose traffic is rejected
//! before the roster is consulted or a payload is built.

use crate::event::{Commit, EventKind, Operation, StreamEvent, TriggerPayload};
use crate::forwarder::TriggerSink;
use crate::roster::{IdentityRecord, RosterStore};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Number of characters of post text shown in logs
const PREVIEW_CHARS: usize = 100;

/// Forwarded events between two statistics log lines
const STATS_INTERVAL: u64 = 100;

/// Why a message did not produce a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not valid JSON, or not shaped like a stream event
    Malformed,
    NotCommit,
    NotCreate,
    /// Emitting DID is not in the roster
    UnknownIdentity,
    WrongCollection,
    /// Internal id or post text is empty
    EmptyContent,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::Malformed => "malformed",
            SkipReason::NotCommit => "not_commit",
            SkipReason::NotCreate => "not_create",
            SkipReason::UnknownIdentity => "unknown_identity",
            SkipReason::WrongCollection => "wrong_collection",
            SkipReason::EmptyContent => "empty_content",
        };
        f.write_str(reason)
    }
}

/// Result of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A payload was handed to the trigger sink
    Forwarded,
    Skipped(SkipReason),
}

impl DispatchOutcome {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, DispatchOutcome::Forwarded)
    }
}

/// Counters kept across the lifetime of a dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    skipped: AtomicU64,
    malformed: AtomicU64,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub skipped: u64,
    pub malformed: u64,
}

impl DispatchStats {
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Dispatches stream messages against the roster.
///
/// The dispatcher never returns an error: every rejection is logged (at
/// `debug` for ordinary traffic, `warn` for malformed input) and counted.
pub struct Dispatcher {
    roster: Arc<RosterStore>,
    sink: Arc<dyn TriggerSink>,

    /// Collection whose creates are forwarded
    collection: String,

    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        roster: Arc<RosterStore>,
        sink: Arc<dyn TriggerSink>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            roster,
            sink,
            collection: collection.into(),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }

    /// Dispatch one raw message.
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        match self.evaluate(raw) {
            Ok(payload) => {
                self.sink.submit(payload);
                let forwarded = self.stats.forwarded.fetch_add(1, Ordering::Relaxed) + 1;

                if forwarded % STATS_INTERVAL == 0 {
                    let stats = self.stats();
                    info!(
                        received = stats.received,
                        forwarded = stats.forwarded,
                        skipped = stats.skipped,
                        malformed = stats.malformed,
                        "Dispatcher statistics"
                    );
                }

                DispatchOutcome::Forwarded
            }
            Err(reason) => {
                if reason == SkipReason::Malformed {
                    self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                }
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Skipped(reason)
            }
        }
    }

    /// Run the guard stages in order.
    fn evaluate(&self, raw: &str) -> Result<TriggerPayload, SkipReason> {
        let event = decode(raw)?;
        let commit = require_commit(&event)?;
        require_create(commit)?;
        let identity = self.resolve(&event.did)?;
        require_collection(commit, &self.collection)?;
        build_payload(&identity, commit)
    }

    fn resolve(&self, did: &str) -> Result<IdentityRecord, SkipReason> {
        self.roster.get(did).ok_or_else(|| {
            debug!(did = %did, "Commit from identity outside the roster");
            SkipReason::UnknownIdentity
        })
    }
}

fn decode(raw: &str) -> Result<StreamEvent, SkipReason> {
    StreamEvent::parse(raw).map_err(|e| {
        warn!(error = %e, "Could not decode stream message");
        SkipReason::Malformed
    })
}

fn require_commit(event: &StreamEvent) -> Result<&Commit, SkipReason> {
    match (&event.kind, &event.commit) {
        (EventKind::Commit, Some(commit)) => Ok(commit),
        (EventKind::Commit, None) => {
            warn!(did = %event.did, "Commit message without commit body");
            Err(SkipReason::Malformed)
        }
        _ => Err(SkipReason::NotCommit),
    }
}

fn require_create(commit: &Commit) -> Result<(), SkipReason> {
    if commit.operation == Operation::Create {
        Ok(())
    } else {
        Err(SkipReason::NotCreate)
    }
}

fn require_collection(commit: &Commit, collection: &str) -> Result<(), SkipReason> {
    if commit.collection == collection {
        Ok(())
    } else {
        Err(SkipReason::WrongCollection)
    }
}

fn build_payload(identity: &IdentityRecord, commit: &Commit) -> Result<TriggerPayload, SkipReason> {
    let text = commit.text();

    info!(
        author_id = %identity.internal_id,
        author = %identity.display_name,
        "New post: {}",
        preview(text)
    );

    if !identity.has_internal_id() || text.is_empty() {
        debug!(did = %identity.external_key, "Post without author id or text, not forwarding");
        return Err(SkipReason::EmptyContent);
    }

    Ok(TriggerPayload::new(identity.internal_id.clone(), text))
}

/// First [`PREVIEW_CHARS`] characters of `text`.
fn preview(text: &str) -> &str {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
