//! Roster of watched identities.
//!
//! The [`RosterStore`] holds the mapping from external key (a DID) to the
//! author metadata the control API returned for it. It is filled once at
//! startup and then only read by the dispatcher. A reload swaps the whole
//! [`Roster`] snapshot, so readers never observe a partial roster.

use crate::control_api::{AuthorEntry, ControlApi};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

/// Metadata for one watched identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub external_key: String,

    /// Internal id, opaque to the relay
    pub internal_id: Value,

    pub display_name: String,

    /// Opaque author context blob
    pub context: Value,
}

impl IdentityRecord {
    /// Build a record from an API entry; entries without a platform id are skipped.
    fn from_entry(entry: AuthorEntry) -> Option<Self> {
        let external_key = entry.platform_id.filter(|key| !key.is_empty())?;
        Some(Self {
            external_key,
            internal_id: entry.id,
            display_name: entry.name.unwrap_or_default(),
            context: entry.author_context,
        })
    }

    /// True when the internal id carries a usable value.
    pub fn has_internal_id(&self) -> bool {
        match &self.internal_id {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }
}

/// An immutable roster snapshot.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    records: HashMap<String, IdentityRecord>,

    /// Keys in the order the API returned them, without duplicates
    keys: Vec<String>,
}

impl Roster {
    /// Build a roster from API entries.
    ///
    /// A key listed twice keeps the last record and appears once in [`Roster::keys`].
    pub fn from_entries(entries: Vec<AuthorEntry>) -> Self {
        let mut roster = Roster::default();

        for record in entries.into_iter().filter_map(IdentityRecord::from_entry) {
            if !roster.records.contains_key(&record.external_key) {
                roster.keys.push(record.external_key.clone());
            }
            roster.records.insert(record.external_key.clone(), record);
        }

        roster
    }

    pub fn get(&self, key: &str) -> Option<&IdentityRecord> {
        self.records.get(key)
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Owner of the current roster snapshot.
///
/// Designed to be wrapped in `Arc` and shared with the dispatcher.
#[derive(Debug, Default)]
pub struct RosterStore {
    current: RwLock<Arc<Roster>>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store already holding `roster`.
    pub fn with_roster(roster: Roster) -> Self {
        Self {
            current: RwLock::new(Arc::new(roster)),
        }
    }

    /// Fetch the roster for `platform` and replace the current snapshot.
    ///
    /// Returns the subscription keys. Failures are logged and yield an empty
    /// set while keeping the previous snapshot; an empty API result replaces
    /// the snapshot with an empty roster.
    pub async fn load(&self, api: &dyn ControlApi, platform: &str, timeout: Duration) -> Vec<String> {
        info!(platform = %platform, "Fetching subscribed authors");

        let entries = match tokio::time::timeout(timeout, api.fetch_roster(platform)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                error!(platform = %platform, error = %e, "Failed to fetch authors");
                return Vec::new();
            }
            Err(_) => {
                error!(
                    platform = %platform,
                    timeout_ms = timeout.as_millis() as u64,
                    "Author fetch timed out"
                );
                return Vec::new();
            }
        };

        if entries.is_empty() {
            warn!(platform = %platform, "API returned no authors");
        }

        let roster = Roster::from_entries(entries);
        let keys = roster.keys().to_vec();
        self.replace(roster);

        info!(platform = %platform, authors = keys.len(), "Roster loaded");
        keys
    }

    /// Atomically swap in a new roster.
    pub fn replace(&self, roster: Roster) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Arc::new(roster);
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<Roster> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn get(&self, key: &str) -> Option<IdentityRecord> {
        self.snapshot().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.snapshot().keys().to_vec()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_api::{decode_roster, ControlApiError};
    use crate::event::TriggerPayload;
    use async_trait::async_trait;
    use serde_json::json;

    enum FakeApi {
        Entries(Vec<AuthorEntry>),
        Fails,
        Hangs,
    }

    #[async_trait]
    impl ControlApi for FakeApi {
        async fn fetch_roster(&self, _platform: &str) -> Result<Vec<AuthorEntry>, ControlApiError> {
            match self {
                FakeApi::Entries(entries) => Ok(entries.clone()),
                FakeApi::Fails => Err(ControlApiError::Decode("bad body".into())),
                FakeApi::Hangs => std::future::pending().await,
            }
        }

        async fn trigger_workflow(&self, _payload: &TriggerPayload) -> Result<(), ControlApiError> {
            Ok(())
        }
    }

    fn entries(body: &str) -> Vec<AuthorEntry> {
        decode_roster(body.as_bytes()).unwrap()
    }

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_load_single_author() {
        let api = FakeApi::Entries(entries(
            r#"[{"platform_id":"did:abc","id":42,"name":"A","author_context":null}]"#,
        ));
        let store = RosterStore::new();

        let keys = store.load(&api, "bluesky", TIMEOUT).await;

        assert_eq!(keys, vec!["did:abc".to_string()]);
        let record = store.get("did:abc").unwrap();
        assert_eq!(record.internal_id, json!(42));
        assert_eq!(record.display_name, "A");
        assert!(record.context.is_null());
        assert!(store.get("did:unknown").is_none());
    }

    #[tokio::test]
    async fn test_load_skips_entries_without_key() {
        let api = FakeApi::Entries(entries(
            r#"[{"id":1,"name":"no key"},{"platform_id":"","id":2},{"platform_id":"did:b","id":3}]"#,
        ));
        let store = RosterStore::new();

        let keys = store.load(&api, "bluesky", TIMEOUT).await;
        assert_eq!(keys, vec!["did:b".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_keys_keep_last_record() {
        let api = FakeApi::Entries(entries(
            r#"[{"platform_id":"did:a","id":1},{"platform_id":"did:b","id":2},{"platform_id":"did:a","id":3}]"#,
        ));
        let store = RosterStore::new();

        let keys = store.load(&api, "bluesky", TIMEOUT).await;
        assert_eq!(keys, vec!["did:a".to_string(), "did:b".to_string()]);
        assert_eq!(store.get("did:a").unwrap().internal_id, json!(3));
    }

    #[tokio::test]
    async fn test_empty_result() {
        let store = RosterStore::new();
        let keys = store.load(&FakeApi::Entries(Vec::new()), "bluesky", TIMEOUT).await;
        assert!(keys.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_roster() {
        let store = RosterStore::with_roster(Roster::from_entries(entries(
            r#"[{"platform_id":"did:a","id":1}]"#,
        )));

        let keys = store.load(&FakeApi::Fails, "bluesky", TIMEOUT).await;
        assert!(keys.is_empty());
        assert!(store.get("did:a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let store = RosterStore::new();
        let keys = store.load(&FakeApi::Hangs, "bluesky", TIMEOUT).await;
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn test_reload_replaces_whole_roster() {
        let store = RosterStore::with_roster(Roster::from_entries(entries(
            r#"[{"platform_id":"did:a","id":1},{"platform_id":"did:b","id":2}]"#,
        )));
        let before = store.snapshot();

        let api = FakeApi::Entries(entries(r#"[{"platform_id":"did:c","id":3}]"#));
        store.load(&api, "bluesky", TIMEOUT).await;

        assert_eq!(store.keys(), vec!["did:c".to_string()]);
        assert!(store.get("did:a").is_none());
        // Snapshots taken earlier are unaffected
        assert_eq!(before.len(), 2);
    }

    #[test]
    fn test_has_internal_id() {
        let mut record = IdentityRecord {
            external_key: "did:a".into(),
            internal_id: json!(42),
            display_name: String::new(),
            context: Value::Null,
        };
        assert!(record.has_internal_id());

        record.internal_id = json!("");
        assert!(!record.has_internal_id());

        record.internal_id = Value::Null;
        assert!(!record.has_internal_id());

        record.internal_id = json!("uuid-1");
        assert!(record.has_internal_id());
    }
}
