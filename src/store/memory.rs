//! In-memory store, the default arbiter for single-process use and tests.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::engine::tree::{ExecutionId, SentryPartId};
use crate::store::{CaseStore, ExecutionRecord, Revision, SentryPartRecord, StoreError};

#[derive(Default)]
struct Inner {
    executions: FxHashMap<ExecutionId, (ExecutionRecord, Revision)>,
    parts: FxHashMap<SentryPartId, (SentryPartRecord, Revision)>,
}

/// Thread-safe in-memory [`CaseStore`].
///
/// Shared behind an `Arc` between engines it behaves exactly like a real
/// backend for conflict purposes: two engines loaded from the same
/// revisions race on every save and touch, and exactly one wins.
///
/// # Examples
///
/// ```rust
/// use caseweave::store::{CaseStore, InMemoryCaseStore};
/// use std::sync::Arc;
///
/// let store: Arc<dyn CaseStore> = Arc::new(InMemoryCaseStore::new());
/// ```
#[derive(Default)]
pub struct InMemoryCaseStore {
    inner: Mutex<Inner>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stored revision of an execution, for assertions.
    #[must_use]
    pub fn execution_revision(&self, id: ExecutionId) -> Option<Revision> {
        self.inner.lock().executions.get(&id).map(|(_, rev)| *rev)
    }

    /// Current stored revision of a sentry part, for assertions.
    #[must_use]
    pub fn sentry_part_revision(&self, id: SentryPartId) -> Option<Revision> {
        self.inner.lock().parts.get(&id).map(|(_, rev)| *rev)
    }
}

fn check(entity: &'static str, id: String, expected: Revision, stored: Revision) -> Result<(), StoreError> {
    if expected == stored {
        Ok(())
    } else {
        Err(StoreError::RevisionConflict {
            entity,
            id,
            expected,
            stored,
        })
    }
}

impl CaseStore for InMemoryCaseStore {
    fn save_execution(
        &self,
        record: &ExecutionRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.executions.get(&record.id).map_or(0, |(_, rev)| *rev);
        check("execution", record.id.to_string(), expected, stored)?;
        let next = stored + 1;
        inner.executions.insert(record.id, (record.clone(), next));
        Ok(next)
    }

    fn load_execution(&self, id: ExecutionId) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .executions
            .get(&id)
            .map(|(record, _)| record.clone()))
    }

    fn save_sentry_part(
        &self,
        record: &SentryPartRecord,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.parts.get(&record.id).map_or(0, |(_, rev)| *rev);
        check("sentry part", record.id.to_string(), expected, stored)?;
        let next = stored + 1;
        inner.parts.insert(record.id, (record.clone(), next));
        Ok(next)
    }

    fn touch_sentry_part(
        &self,
        id: SentryPartId,
        expected: Revision,
    ) -> Result<Revision, StoreError> {
        let mut inner = self.inner.lock();
        let (_, stored) = inner
            .parts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "sentry part",
                id: id.to_string(),
            })?;
        check("sentry part", id.to_string(), expected, *stored)?;
        *stored += 1;
        Ok(*stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(id: SentryPartId) -> SentryPartRecord {
        SentryPartRecord {
            id,
            case_execution_id: ExecutionId::new(),
            case_instance_id: ExecutionId::new(),
            sentry_id: "S1".into(),
            kind: "onPart".into(),
            source: Some("c1".into()),
            variable_name: None,
            variable_event: None,
            satisfied: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn touch_bumps_without_field_change() {
        let store = InMemoryCaseStore::new();
        let id = SentryPartId::new();
        let rev = store.save_sentry_part(&record(id), 0).unwrap();
        assert_eq!(rev, 1);

        let rev = store.touch_sentry_part(id, 1).unwrap();
        assert_eq!(rev, 2);
        assert_eq!(store.sentry_part_revision(id), Some(2));
    }

    #[test]
    fn stale_touch_conflicts() {
        let store = InMemoryCaseStore::new();
        let id = SentryPartId::new();
        store.save_sentry_part(&record(id), 0).unwrap();
        store.touch_sentry_part(id, 1).unwrap();

        let err = store.touch_sentry_part(id, 1).unwrap_err();
        assert!(matches!(err, StoreError::RevisionConflict { .. }));
    }
}
