//! Process-wide session table keyed by session id (§4.4).
//!
//! The store is *not* required to be multi-thread safe: every session
//! mutation runs on the worker's own task (§5), so [`SessionStore`] is a
//! plain, non-atomic structure owned by the [`crate::inspection`] loop.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::time::{Duration, Instant};

use uuid::Uuid;
use vigil_common::{IntakeError, IntakeResult, SessionId};
use vigil_protocol::{CompressionStream, TransactionMetadata};

/// Priority-ordered source-identifier kinds (§4.8). Declaration order is
/// ascending priority (`SourceIp` lowest, `CustomHeader` highest); `Ord`
/// derives the total order the resolver compares against. Descending
/// priority per §4.8: custom header > authorization > x-forwarded-for >
/// cookie > sourceip (the initial, lowest-priority default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SourceIdentifierKind {
    SourceIp,
    Cookie,
    XForwardedFor,
    Authorization,
    CustomHeader,
}

/// The session's current source identifier: a kind plus the resolved
/// value.
#[derive(Debug, Clone)]
pub struct SourceIdentifier {
    pub kind: SourceIdentifierKind,
    pub value: String,
}

impl Default for SourceIdentifier {
    fn default() -> Self {
        SourceIdentifier {
            kind: SourceIdentifierKind::SourceIp,
            value: String::new(),
        }
    }
}

impl SourceIdentifier {
    /// Replaces the current identifier only if `candidate` is strictly
    /// higher priority (§4.8).
    pub fn maybe_upgrade(&mut self, candidate: SourceIdentifier) {
        if candidate.kind > self.kind {
            *self = candidate;
        }
    }
}

/// Per-session side table carried across chunks (§3 "Session opaque").
pub struct SessionOpaque {
    pub metadata: Option<TransactionMetadata>,
    pub request_compression: CompressionStream,
    pub response_compression: CompressionStream,
    pub source_identifier: SourceIdentifier,
    pub saved_data: HashMap<String, String>,
    pub uuid: Uuid,
    pub tenant_id: String,
    pub profile_id: String,
    pub next_request_header_index: u8,
    pub next_response_header_index: u8,
    extra: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl SessionOpaque {
    fn new() -> Self {
        SessionOpaque {
            metadata: None,
            request_compression: CompressionStream::new(),
            response_compression: CompressionStream::new(),
            source_identifier: SourceIdentifier::default(),
            saved_data: HashMap::new(),
            uuid: Uuid::new_v4(),
            tenant_id: String::new(),
            profile_id: String::new(),
            next_request_header_index: 0,
            next_response_header_index: 0,
            extra: HashMap::new(),
        }
    }

    pub fn save(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.saved_data.insert(key.into(), value.into());
    }

    pub fn saved(&self, key: &str) -> Option<&str> {
        self.saved_data.get(key).map(String::as_str)
    }

    /// Typed side-table lookup, attached to this entry (§4.4
    /// `has_state<T>`/`get_state<T>`).
    pub fn has_state<T: 'static>(&self) -> bool {
        self.extra.contains_key(&TypeId::of::<T>())
    }

    pub fn get_state<T: 'static>(&self) -> Option<&T> {
        self.extra.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref::<T>())
    }

    pub fn get_state_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.extra.get_mut(&TypeId::of::<T>()).and_then(|b| b.downcast_mut::<T>())
    }

    pub fn create_state<T: Send + 'static>(&mut self, value: T) {
        self.extra.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn delete_state<T: 'static>(&mut self) {
        self.extra.remove(&TypeId::of::<T>());
    }
}

struct Entry {
    opaque: SessionOpaque,
    expires_at: Instant,
}

/// Process-wide `session-id → opaque` table plus the single "active"
/// session slot (I2).
pub struct SessionStore {
    entries: HashMap<u32, Entry>,
    active_key: Option<u32>,
    default_ttl: Duration,
}

impl SessionStore {
    pub fn new(default_ttl: Duration) -> Self {
        SessionStore {
            entries: HashMap::new(),
            active_key: None,
            default_ttl,
        }
    }

    /// Creates a fresh opaque for `id`. Fails if an entry already exists —
    /// callers implementing (I4) must `delete_entry` first.
    pub fn create_entry(&mut self, id: SessionId) -> IntakeResult<()> {
        if self.entries.contains_key(&id.0) {
            return Err(IntakeError::Fatal(format!(
                "session {id} already present in store"
            )));
        }
        self.entries.insert(
            id.0,
            Entry {
                opaque: SessionOpaque::new(),
                expires_at: Instant::now() + self.default_ttl,
            },
        );
        Ok(())
    }

    /// Implements (I4): deletes any prior entry for `id`, then creates a
    /// fresh one unconditionally.
    pub fn recreate_entry(&mut self, id: SessionId) {
        self.entries.remove(&id.0);
        self.entries.insert(
            id.0,
            Entry {
                opaque: SessionOpaque::new(),
                expires_at: Instant::now() + self.default_ttl,
            },
        );
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.entries.contains_key(&id.0)
    }

    pub fn delete_entry(&mut self, id: SessionId) {
        if self.active_key == Some(id.0) {
            self.active_key = None;
        }
        self.entries.remove(&id.0);
    }

    /// Sets the single active session key (I2) if `id` has an entry.
    /// Returns `false` for an unknown `id` — the ordinary runtime case of
    /// a chunk that references a session with no preceding `RequestStart`
    /// (I3); callers drop that chunk rather than treat this as an error.
    ///
    /// Activating a second key while one is already active without
    /// unsetting it first is a programmer bug, not a traffic condition:
    /// the per-worker loop never dispatches more than one chunk at a time,
    /// so this can only happen if a dispatch path forgot to unset the
    /// previous key.
    pub fn set_active_key(&mut self, id: SessionId) -> bool {
        if !self.entries.contains_key(&id.0) {
            return false;
        }
        if let Some(current) = self.active_key {
            assert_eq!(
                current, id.0,
                "session {current} is already active, cannot activate {id}"
            );
        }
        self.active_key = Some(id.0);
        true
    }

    pub fn unset_active_key(&mut self) {
        self.active_key = None;
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active_key.map(SessionId)
    }

    pub fn state_of_active(&self) -> Option<&SessionOpaque> {
        self.active_key.and_then(|k| self.entries.get(&k)).map(|e| &e.opaque)
    }

    pub fn state_of_active_mut(&mut self) -> Option<&mut SessionOpaque> {
        self.active_key
            .and_then(move |k| self.entries.get_mut(&k))
            .map(|e| &mut e.opaque)
    }

    pub fn get(&self, id: SessionId) -> Option<&SessionOpaque> {
        self.entries.get(&id.0).map(|e| &e.opaque)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut SessionOpaque> {
        self.entries.get_mut(&id.0).map(|e| &mut e.opaque)
    }

    /// Resets the TTL of the currently active entry (§4.4
    /// `set_expiration`).
    pub fn set_expiration(&mut self, duration: Duration) {
        if let Some(key) = self.active_key {
            if let Some(entry) = self.entries.get_mut(&key) {
                entry.expires_at = Instant::now() + duration;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Evicts every entry whose TTL has elapsed as of `now`, releasing
    /// their compression streams and saved data along with them (they are
    /// owned by `SessionOpaque` and simply drop). Returns the number of
    /// entries evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            if self.active_key == Some(*id) {
                self.active_key = None;
            }
            self.entries.remove(id);
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_entry_fails_if_present() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        store.create_entry(SessionId(1)).unwrap();
        assert!(store.create_entry(SessionId(1)).is_err());
    }

    #[test]
    fn recreate_entry_replaces_prior_opaque() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        store.create_entry(SessionId(1)).unwrap();
        assert!(store.set_active_key(SessionId(1)));
        store.state_of_active_mut().unwrap().save("req_headers", "Host: a");

        store.recreate_entry(SessionId(1));
        assert!(store.get(SessionId(1)).unwrap().saved("req_headers").is_none());
    }

    #[test]
    fn set_active_key_returns_false_for_unknown_session() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        assert!(!store.set_active_key(SessionId(1)));
        assert!(store.active_id().is_none());
    }

    #[test]
    fn active_key_is_single_slot() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        store.create_entry(SessionId(1)).unwrap();
        store.create_entry(SessionId(2)).unwrap();
        assert!(store.set_active_key(SessionId(1)));
        store.unset_active_key();
        assert!(store.set_active_key(SessionId(2)));
        assert_eq!(store.active_id(), Some(SessionId(2)));
    }

    #[test]
    #[should_panic(expected = "already active")]
    fn activating_second_key_without_unsetting_panics() {
        let mut store = SessionStore::new(Duration::from_secs(60));
        store.create_entry(SessionId(1)).unwrap();
        store.create_entry(SessionId(2)).unwrap();
        store.set_active_key(SessionId(1));
        store.set_active_key(SessionId(2));
    }

    #[test]
    fn source_identifier_upgrades_only_on_higher_priority() {
        let mut ident = SourceIdentifier::default();
        assert_eq!(ident.kind, SourceIdentifierKind::SourceIp);

        ident.maybe_upgrade(SourceIdentifier {
            kind: SourceIdentifierKind::XForwardedFor,
            value: "10.0.0.1".into(),
        });
        assert_eq!(ident.kind, SourceIdentifierKind::XForwardedFor);

        // Authorization outranks XFF per the priority list.
        ident.maybe_upgrade(SourceIdentifier {
            kind: SourceIdentifierKind::Authorization,
            value: "sub=alice".into(),
        });
        assert_eq!(ident.kind, SourceIdentifierKind::Authorization);

        // A lower-priority candidate never downgrades the current identifier.
        ident.maybe_upgrade(SourceIdentifier {
            kind: SourceIdentifierKind::Cookie,
            value: "jsessionid=abc".into(),
        });
        assert_eq!(ident.kind, SourceIdentifierKind::Authorization);
    }

    #[test]
    fn typed_side_table_round_trips() {
        struct Marker(u32);
        let mut store = SessionStore::new(Duration::from_secs(60));
        store.create_entry(SessionId(1)).unwrap();
        assert!(store.set_active_key(SessionId(1)));

        let opaque = store.state_of_active_mut().unwrap();
        assert!(!opaque.has_state::<Marker>());
        opaque.create_state(Marker(42));
        assert!(opaque.has_state::<Marker>());
        assert_eq!(opaque.get_state::<Marker>().unwrap().0, 42);
        opaque.delete_state::<Marker>();
        assert!(!opaque.has_state::<Marker>());
    }

    #[test]
    fn evict_expired_removes_only_past_ttl_entries() {
        let mut store = SessionStore::new(Duration::from_millis(10));
        store.create_entry(SessionId(1)).unwrap();
        store.create_entry(SessionId(2)).unwrap();

        let now = Instant::now();
        assert_eq!(store.evict_expired(now), 0);

        let later = now + Duration::from_millis(11);
        assert_eq!(store.evict_expired(later), 2);
        assert_eq!(store.count(), 0);
    }
}
