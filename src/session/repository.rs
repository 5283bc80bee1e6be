use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use std::collections::HashSet;
use tracing::{debug, error, instrument, warn};

use super::models::{SessionRecord, SessionStatus};
use super::types::SessionStats;
use crate::shared::AppError;

/// Trait for session store operations.
///
/// Records are keyed by `session_id`; at most one record per `(client_id, bank_id)` pair is
/// current. Implementations must make the supersede step of `put` and `replace` atomic with
/// respect to every other operation on the same pair.
pub trait SessionStore: Send + Sync {
    /// Inserts the record as the current one for its pair, revoking any prior current record.
    /// Returns the id of the superseded record, if any.
    fn put(&self, record: SessionRecord) -> Result<Option<String>, AppError>;

    /// Like `put`, but only if `previous_session_id` is still the active current record
    /// for the pair. The transition time is the new record's `issued_at`, never earlier than
    /// the prior record's.
    fn replace(&self, previous_session_id: &str, record: SessionRecord) -> Result<(), AppError>;

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError>;

    /// Current record for the pair, only while it is active at `now`
    fn get_current(
        &self,
        client_id: &str,
        bank_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, AppError>;

    /// Session ids currently indexed for the client, in no particular order
    fn current_sessions(&self, client_id: &str) -> Result<Vec<String>, AppError>;

    /// Snapshot of every record for the bank, terminal ones included, in no particular order
    fn sessions_for_bank(&self, bank_id: &str) -> Result<Vec<SessionRecord>, AppError>;

    /// Marks the record revoked if it is active. Absent or terminal records are a no-op.
    /// Returns whether the record changed.
    fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, AppError>;

    /// Removes records that have been terminal for at least `grace_period`. Returns the count.
    fn sweep(&self, now: DateTime<Utc>, grace_period: Duration) -> Result<usize, AppError>;

    fn stats(&self, now: DateTime<Utc>) -> Result<SessionStats, AppError>;
}

type PairKey = (String, String);

/// In-memory session store.
///
/// Two sharded maps: records by id, and the current-session index by pair. A pair's index
/// entry is locked for the whole supersede step. Record entries are only locked while holding
/// an index entry or on their own, never the other way round, so the two maps cannot deadlock.
/// Data is lost when the process exits.
pub struct InMemorySessionStore {
    records: DashMap<String, SessionRecord>,
    current: DashMap<PairKey, String>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySessionStore {
    /// Creates a new empty store
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            current: DashMap::new(),
        }
    }

    /// Returns the current number of records, terminal ones included
    pub fn session_count(&self) -> usize {
        self.records.len()
    }

    /// Checks if a record exists by ID (useful for debugging)
    pub fn has_session(&self, session_id: &str) -> bool {
        self.records.contains_key(session_id)
    }

    fn pair_of(record: &SessionRecord) -> PairKey {
        (record.client_id.clone(), record.bank_id.clone())
    }

    fn ensure_unused_id(&self, session_id: &str) -> Result<(), AppError> {
        if self.records.contains_key(session_id) {
            warn!(session_id = %session_id, "Session id already present in store");
            return Err(AppError::Internal);
        }
        Ok(())
    }

    /// Must be called while holding the pair's index entry
    fn insert_record(&self, record: SessionRecord) {
        let session_id = record.session_id.clone();
        if self.records.insert(session_id.clone(), record).is_some() {
            error!(session_id = %session_id, "Session id collision replaced an existing record");
        }
    }
}

impl SessionStore for InMemorySessionStore {
    #[instrument(skip(self, record), fields(session_id = %record.session_id, bank_id = %record.bank_id))]
    fn put(&self, record: SessionRecord) -> Result<Option<String>, AppError> {
        self.ensure_unused_id(&record.session_id)?;

        let supersede_at = record.issued_at;
        let session_id = record.session_id.clone();

        match self.current.entry(Self::pair_of(&record)) {
            Entry::Occupied(mut entry) => {
                let prior_id = entry.get().clone();
                if let Some(mut prior) = self.records.get_mut(&prior_id) {
                    // A slower caller may carry an older timestamp than the record it supersedes
                    let retire_at = supersede_at.max(prior.issued_at);
                    prior.revoke(retire_at);
                }
                self.insert_record(record);
                entry.insert(session_id);

                debug!(superseded = %prior_id, "Stored session and superseded prior current session");
                Ok(Some(prior_id))
            }
            Entry::Vacant(entry) => {
                self.insert_record(record);
                entry.insert(session_id);

                debug!("Stored session as first current session for pair");
                Ok(None)
            }
        }
    }

    #[instrument(skip(self, record), fields(session_id = %record.session_id, bank_id = %record.bank_id))]
    fn replace(&self, previous_session_id: &str, record: SessionRecord) -> Result<(), AppError> {
        self.ensure_unused_id(&record.session_id)?;

        let at = record.issued_at;
        let session_id = record.session_id.clone();

        match self.current.entry(Self::pair_of(&record)) {
            Entry::Occupied(mut entry) if entry.get() == previous_session_id => {
                let retired = match self.records.get_mut(previous_session_id) {
                    Some(mut previous) => {
                        let retire_at = at.max(previous.issued_at);
                        previous.revoke(retire_at)
                    }
                    None => false,
                };
                if !retired {
                    debug!(previous = %previous_session_id, "Session no longer active, refusing replace");
                    return Err(AppError::SessionExpired(previous_session_id.to_string()));
                }

                self.insert_record(record);
                entry.insert(session_id);
                debug!(previous = %previous_session_id, "Replaced current session");
                Ok(())
            }
            _ => {
                if self.records.contains_key(previous_session_id) {
                    debug!(previous = %previous_session_id, "Session is no longer current, refusing replace");
                    Err(AppError::SessionExpired(previous_session_id.to_string()))
                } else {
                    Err(AppError::SessionNotFound(previous_session_id.to_string()))
                }
            }
        }
    }

    #[instrument(skip(self))]
    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>, AppError> {
        let record = self.records.get(session_id).map(|r| r.value().clone());

        match &record {
            Some(r) => debug!(bank_id = %r.bank_id, status = %r.status, "Session found in memory"),
            None => debug!("Session not found in memory"),
        }

        Ok(record)
    }

    #[instrument(skip(self, client_id))]
    fn get_current(
        &self,
        client_id: &str,
        bank_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SessionRecord>, AppError> {
        let key = (client_id.to_string(), bank_id.to_string());
        let Some(current) = self.current.get(&key) else {
            return Ok(None);
        };

        let record = self
            .records
            .get(current.value())
            .map(|r| r.value().clone())
            .filter(|r| r.is_active(now));

        Ok(record)
    }

    #[instrument(skip(self, client_id))]
    fn current_sessions(&self, client_id: &str) -> Result<Vec<String>, AppError> {
        let ids = self
            .current
            .iter()
            .filter(|entry| entry.key().0 == client_id)
            .map(|entry| entry.value().clone())
            .collect();

        Ok(ids)
    }

    #[instrument(skip(self))]
    fn sessions_for_bank(&self, bank_id: &str) -> Result<Vec<SessionRecord>, AppError> {
        let records: Vec<SessionRecord> = self
            .records
            .iter()
            .filter(|entry| entry.bank_id == bank_id)
            .map(|entry| entry.value().clone())
            .collect();

        debug!(count = records.len(), "Collected sessions for bank");
        Ok(records)
    }

    #[instrument(skip(self))]
    fn revoke(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let changed = match self.records.get_mut(session_id) {
            Some(mut record) => record.revoke(now),
            None => false,
        };

        debug!(changed, "Processed session revocation");
        Ok(changed)
    }

    #[instrument(skip(self))]
    fn sweep(&self, now: DateTime<Utc>, grace_period: Duration) -> Result<usize, AppError> {
        let cutoff = now - grace_period;
        let evictable =
            |record: &SessionRecord| record.terminal_since(now).is_some_and(|t| t <= cutoff);

        // Collect first: removing while iterating would deadlock on the shard being read.
        let candidates: Vec<String> = self
            .records
            .iter()
            .filter(|entry| evictable(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for session_id in candidates {
            let Some((_, record)) = self
                .records
                .remove_if(&session_id, |_, record| evictable(record))
            else {
                continue;
            };

            self.current
                .remove_if(&Self::pair_of(&record), |_, current| current == &session_id);
            removed += 1;
        }

        debug!(removed, remaining = self.records.len(), "Swept terminal sessions");
        Ok(removed)
    }

    #[instrument(skip(self))]
    fn stats(&self, now: DateTime<Utc>) -> Result<SessionStats, AppError> {
        let mut stats = SessionStats::default();
        let mut banks = HashSet::new();

        for entry in self.records.iter() {
            stats.total_sessions += 1;
            match entry.effective_status(now) {
                SessionStatus::Active => {
                    stats.active_sessions += 1;
                    banks.insert(entry.bank_id.clone());
                }
                SessionStatus::Expired => stats.expired_sessions += 1,
                SessionStatus::Revoked => stats.revoked_sessions += 1,
            }
        }

        stats.banks_with_active_sessions = banks.len();
        Ok(stats)
    }
}
