use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::models::DiagnosisRecord;

/// Records kept when no limit is configured.
pub const DEFAULT_HISTORY_LIMIT: usize = 10_000;

/// Trait for storing and retrieving completed diagnoses
#[async_trait]
pub trait DiagnosisHistory: Send + Sync {
    async fn save(&self, record: DiagnosisRecord) -> anyhow::Result<()>;
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<DiagnosisRecord>>;
    /// Records of one patient, newest first.
    async fn for_patient(&self, patient_id: &str) -> anyhow::Result<Vec<DiagnosisRecord>>;
}

/// In-memory implementation of DiagnosisHistory.
///
/// Holds at most `limit` records; the oldest by `created_at` are evicted first.
pub struct InMemoryDiagnosisHistory {
    records: DashMap<Uuid, DiagnosisRecord>,
    by_patient: DashMap<String, Vec<Uuid>>,
    by_age: Mutex<BTreeSet<(DateTime<Utc>, Uuid)>>,
    limit: usize,
}

impl Default for InMemoryDiagnosisHistory {
    fn default() -> Self {
        Self::with_limit(DEFAULT_HISTORY_LIMIT)
    }
}

impl InMemoryDiagnosisHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            records: DashMap::new(),
            by_patient: DashMap::new(),
            by_age: Mutex::new(BTreeSet::new()),
            limit: limit.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn evict(&self, id: Uuid) {
        let Some((_, record)) = self.records.remove(&id) else {
            return;
        };
        if let Some(patient_id) = record.patient_id {
            if let Some(mut ids) = self.by_patient.get_mut(&patient_id) {
                ids.retain(|other| *other != id);
            }
            self.by_patient.remove_if(&patient_id, |_, ids| ids.is_empty());
        }
        debug!(%id, "evicted diagnosis record");
    }
}

#[async_trait]
impl DiagnosisHistory for InMemoryDiagnosisHistory {
    async fn save(&self, record: DiagnosisRecord) -> anyhow::Result<()> {
        let mut by_age = self
            .by_age
            .lock()
            .map_err(|_| anyhow!("diagnosis history lock poisoned"))?;

        let id = record.id;
        by_age.insert((record.created_at, id));
        if let Some(patient_id) = &record.patient_id {
            self.by_patient.entry(patient_id.clone()).or_default().push(id);
        }
        self.records.insert(id, record);

        while by_age.len() > self.limit {
            match by_age.pop_first() {
                Some((_, oldest)) => self.evict(oldest),
                None => break,
            }
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<DiagnosisRecord>> {
        Ok(self.records.get(&id).map(|entry| entry.clone()))
    }

    async fn for_patient(&self, patient_id: &str) -> anyhow::Result<Vec<DiagnosisRecord>> {
        let ids = match self.by_patient.get(patient_id) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        let mut records: Vec<DiagnosisRecord> = ids
            .iter()
            .filter_map(|id| self.records.get(id).map(|entry| entry.clone()))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use xdoc_core::{Audience, Disease};

    fn record(patient_id: Option<&str>, minutes_ago: i64) -> DiagnosisRecord {
        DiagnosisRecord {
            id: Uuid::new_v4(),
            patient_id: patient_id.map(String::from),
            doctor_id: None,
            disease: Disease::Diabetes,
            audience: Audience::Patient,
            predicted_class: 0,
            label: "Non-Diabetic".to_string(),
            confidence: 0.9,
            explanation: "ok".to_string(),
            model_version: "test".to_string(),
            created_at: Utc::now() - Duration::minutes(minutes_ago),
        }
    }

    #[tokio::test]
    async fn history_is_per_patient_and_newest_first() {
        let history = InMemoryDiagnosisHistory::new();
        let old = record(Some("p-1"), 30);
        let new = record(Some("p-1"), 1);
        let other = record(Some("p-2"), 5);
        let anonymous = record(None, 2);
        for r in [old.clone(), new.clone(), other, anonymous.clone()] {
            history.save(r).await.unwrap();
        }

        let records = history.for_patient("p-1").await.unwrap();
        assert_eq!(records, vec![new, old]);

        assert_eq!(
            history.get(anonymous.id).await.unwrap(),
            Some(anonymous)
        );
        assert!(history.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(history.for_patient("p-3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oldest_records_are_evicted_past_the_limit() {
        let history = InMemoryDiagnosisHistory::with_limit(2);
        let oldest = record(Some("p-1"), 30);
        let middle = record(None, 20);
        let newest = record(Some("p-1"), 10);
        // saved out of order: eviction follows created_at, not arrival
        for r in [middle.clone(), newest.clone(), oldest.clone()] {
            history.save(r).await.unwrap();
        }

        assert_eq!(history.len(), 2);
        assert!(history.get(oldest.id).await.unwrap().is_none());
        assert_eq!(history.get(middle.id).await.unwrap(), Some(middle));
        assert_eq!(history.for_patient("p-1").await.unwrap(), vec![newest.clone()]);

        let latest = record(None, 0);
        history.save(latest.clone()).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.for_patient("p-1").await.unwrap(), vec![newest]);
        assert_eq!(history.get(latest.id).await.unwrap(), Some(latest));
    }

    #[tokio::test]
    async fn evicting_a_patients_last_record_drops_the_index() {
        let history = InMemoryDiagnosisHistory::with_limit(1);
        history.save(record(Some("p-1"), 5)).await.unwrap();
        history.save(record(Some("p-2"), 1)).await.unwrap();

        assert!(history.for_patient("p-1").await.unwrap().is_empty());
        assert!(!history.by_patient.contains_key("p-1"));
        assert_eq!(history.for_patient("p-2").await.unwrap().len(), 1);
    }
}
