use std::sync::Arc;

use chrono::SubsecRound;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use strongroom_types::{
    ActorContext, AuditLogEntry, GENESIS_HASH, IntegrityFailure, IntegrityReport, SubjectId,
};

use crate::chain::{canonical_record, chain_hash, entry_hash};
use crate::clock::{Clock, SystemClock};
use crate::error::{AuditError, AuditResult};
use crate::store::{AuditStore, PendingEntry};

/// What happened, as described by the caller. Which actions get logged is the
/// caller's decision.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: String,
    pub target_id: Option<u64>,
    pub details: Map<String, Value>,
}

impl AuditEvent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            target_id: None,
            details: Map::new(),
        }
    }

    pub fn target(mut self, target_id: u64) -> Self {
        self.target_id = Some(target_id);
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }
}

/// Append-only, hash-chained audit log with one independent chain per subject.
pub struct AuditLogService {
    store: Arc<dyn AuditStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLogService {
    pub fn new(store: Arc<dyn AuditStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_system_clock(store: Arc<dyn AuditStore>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    /// Append an event to `subject`'s chain and return the new entry's id.
    ///
    /// Keeps appending even if an older entry has been tampered with; only
    /// [`verify_integrity`](Self::verify_integrity) reports that.
    pub fn log(&self, subject: SubjectId, actor: &ActorContext, event: AuditEvent) -> AuditResult<u64> {
        if event.action.trim().is_empty() {
            return Err(AuditError::EmptyAction);
        }

        // The store hands over the tip inside its own write transaction, so
        // concurrent writers (other services, other processes) never fork a chain.
        let created_at = self.clock.now().trunc_subsecs(6);
        let build = |previous_hash: &str| {
            let mut pending = PendingEntry {
                subject_id: subject,
                actor: actor.clone(),
                action: event.action.clone(),
                target_id: event.target_id,
                details: event.details.clone(),
                // Stored timestamps round-trip at microsecond precision
                created_at,
                previous_hash: previous_hash.to_string(),
                hash: String::new(),
            };
            pending.hash = chain_hash(&pending.previous_hash, &canonical_record(&(&pending).into()));
            pending
        };
        let id = self.store.append_with(subject, &build)?;

        debug!(
            subject_id = %subject,
            entry_id = id,
            actor_id = actor.actor_id,
            action = %event.action,
            "Audit entry appended"
        );
        Ok(id)
    }

    /// Walk `subject`'s chain oldest-first and report the first bad entry.
    pub fn verify_integrity(&self, subject: SubjectId) -> AuditResult<IntegrityReport> {
        let entries = self.store.entries(subject)?;
        let total = entries.len();

        let mut expected_previous: &str = GENESIS_HASH;
        for (index, entry) in entries.iter().enumerate() {
            let position = index + 1;

            let expected = entry_hash(entry);
            if expected != entry.hash {
                let failure = IntegrityFailure::HashMismatch {
                    entry_id: entry.id,
                    expected,
                    stored: entry.hash.clone(),
                };
                return Ok(self.broken(subject, total, position, failure));
            }

            if entry.previous_hash != expected_previous {
                let failure = IntegrityFailure::BrokenLink {
                    entry_id: entry.id,
                    expected_previous: expected_previous.to_string(),
                    stored_previous: entry.previous_hash.clone(),
                };
                return Ok(self.broken(subject, total, position, failure));
            }

            expected_previous = entry.hash.as_str();
        }

        debug!(subject_id = %subject, total_entries = total, "Audit chain verified");
        Ok(IntegrityReport::intact(total))
    }

    /// Verify every subject the store knows about.
    pub fn verify_all(&self) -> AuditResult<Vec<(SubjectId, IntegrityReport)>> {
        self.store
            .subjects()?
            .into_iter()
            .map(|subject| Ok((subject, self.verify_integrity(subject)?)))
            .collect()
    }

    /// Newest-first page for display. Does not re-verify anything.
    pub fn get_log(&self, subject: SubjectId, limit: usize, offset: usize) -> AuditResult<Vec<AuditLogEntry>> {
        Ok(self.store.page(subject, limit, offset)?)
    }

    pub fn count(&self, subject: SubjectId) -> AuditResult<usize> {
        Ok(self.store.count(subject)?)
    }

    /// Current tip hash, or the genesis hash for an empty chain.
    pub fn latest_hash(&self, subject: SubjectId) -> AuditResult<String> {
        Ok(self
            .store
            .tip_hash(subject)?
            .unwrap_or_else(|| GENESIS_HASH.to_string()))
    }

    fn broken(&self, subject: SubjectId, total: usize, position: usize, failure: IntegrityFailure) -> IntegrityReport {
        warn!(
            subject_id = %subject,
            broken_at = position,
            entry_id = failure.entry_id(),
            "Audit chain integrity violation: {}",
            failure
        );
        IntegrityReport::broken(total, position, failure)
    }
}
