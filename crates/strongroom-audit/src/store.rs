use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use strongroom_types::{ActorContext, AuditLogEntry, GENESIS_HASH, SubjectId};

use crate::chain::ChainFields;
use crate::error::StorageError;

/// A fully hashed entry that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub subject_id: SubjectId,
    pub actor: ActorContext,
    pub action: String,
    pub target_id: Option<u64>,
    pub details: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub previous_hash: String,
    pub hash: String,
}

impl PendingEntry {
    pub fn into_entry(self, id: u64) -> AuditLogEntry {
        AuditLogEntry {
            id,
            subject_id: self.subject_id,
            actor: self.actor,
            action: self.action,
            target_id: self.target_id,
            details: self.details,
            created_at: self.created_at,
            previous_hash: self.previous_hash,
            hash: self.hash,
        }
    }
}

impl<'a> From<&'a PendingEntry> for ChainFields<'a> {
    fn from(entry: &'a PendingEntry) -> Self {
        Self {
            subject_id: entry.subject_id,
            actor: &entry.actor,
            action: &entry.action,
            target_id: entry.target_id,
            details: &entry.details,
            created_at: &entry.created_at,
        }
    }
}

/// Append-only persistence for audit chains.
///
/// Implementations must never expose a way to change or remove a stored row.
pub trait AuditStore: Send + Sync {
    /// Hash of the newest entry for `subject`, if any.
    fn tip_hash(&self, subject: SubjectId) -> Result<Option<String>, StorageError>;

    /// Read `subject`'s tip (the genesis hash for an empty chain), pass it to
    /// `build`, insert the returned entry and return its id. Ids grow
    /// monotonically across the store.
    ///
    /// The tip read and the insert must be one atomic step with respect to every
    /// other writer on the store, including other processes. An entry that does
    /// not extend the tip it was built from is refused with
    /// [`StorageError::TipMoved`] and nothing is written.
    fn append_with(
        &self,
        subject: SubjectId,
        build: &dyn Fn(&str) -> PendingEntry,
    ) -> Result<u64, StorageError>;

    /// Every entry of `subject`, oldest first.
    fn entries(&self, subject: SubjectId) -> Result<Vec<AuditLogEntry>, StorageError>;

    /// Newest-first slice of `subject`'s entries.
    fn page(&self, subject: SubjectId, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>, StorageError>;

    fn count(&self, subject: SubjectId) -> Result<usize, StorageError>;

    /// Every subject with at least one entry, ascending.
    fn subjects(&self) -> Result<Vec<SubjectId>, StorageError>;
}

#[derive(Default)]
struct MemoryInner {
    last_id: u64,
    chains: BTreeMap<SubjectId, Vec<AuditLogEntry>>,
}

/// In-process store for tests and single-process embedding.
#[derive(Default)]
pub struct MemoryAuditStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut MemoryInner) -> Result<T, StorageError>,
    {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| StorageError::Backend(format!("audit store lock poisoned: {}", e)))?;
        f(&mut inner)
    }

    /// Overwrite a stored row in place, bypassing the append-only contract.
    #[cfg(test)]
    pub(crate) fn tamper<F: FnOnce(&mut AuditLogEntry)>(&self, id: u64, f: F) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .chains
            .values_mut()
            .flat_map(|chain| chain.iter_mut())
            .find(|entry| entry.id == id)
            .expect("no such entry");
        f(entry);
    }

    #[cfg(test)]
    pub(crate) fn remove(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        for chain in inner.chains.values_mut() {
            chain.retain(|entry| entry.id != id);
        }
    }
}

impl AuditStore for MemoryAuditStore {
    fn tip_hash(&self, subject: SubjectId) -> Result<Option<String>, StorageError> {
        self.with_inner(|inner| {
            Ok(inner
                .chains
                .get(&subject)
                .and_then(|chain| chain.last())
                .map(|entry| entry.hash.clone()))
        })
    }

    fn append_with(
        &self,
        subject: SubjectId,
        build: &dyn Fn(&str) -> PendingEntry,
    ) -> Result<u64, StorageError> {
        self.with_inner(|inner| {
            let tip = inner
                .chains
                .get(&subject)
                .and_then(|chain| chain.last())
                .map_or(GENESIS_HASH, |last| last.hash.as_str());
            let entry = build(tip);
            if entry.subject_id != subject || entry.previous_hash != tip {
                return Err(StorageError::TipMoved { subject });
            }

            inner.last_id += 1;
            let id = inner.last_id;
            inner.chains.entry(subject).or_default().push(entry.into_entry(id));
            Ok(id)
        })
    }

    fn entries(&self, subject: SubjectId) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.with_inner(|inner| Ok(inner.chains.get(&subject).cloned().unwrap_or_default()))
    }

    fn page(&self, subject: SubjectId, limit: usize, offset: usize) -> Result<Vec<AuditLogEntry>, StorageError> {
        self.with_inner(|inner| {
            Ok(inner
                .chains
                .get(&subject)
                .map(|chain| chain.iter().rev().skip(offset).take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn count(&self, subject: SubjectId) -> Result<usize, StorageError> {
        self.with_inner(|inner| Ok(inner.chains.get(&subject).map_or(0, Vec::len)))
    }

    fn subjects(&self) -> Result<Vec<SubjectId>, StorageError> {
        self.with_inner(|inner| {
            Ok(inner
                .chains
                .iter()
                .filter(|(_, chain)| !chain.is_empty())
                .map(|(subject, _)| *subject)
                .collect())
        })
    }
}
