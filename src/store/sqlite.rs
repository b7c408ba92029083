//! SQLite-backed store.
//!
//! A single connection is guarded by a mutex; every multi-statement write
//! runs inside one transaction. Timestamps are stored as fixed-width RFC 3339
//! UTC text so that lexical order matches chronological order. A partial
//! unique index enforces at most one active model version per modality.

use super::Store;
use crate::error::PersistenceError;
use crate::types::{
    FeedbackRecord, Label, LabeledTransaction, Modality, ModelMetrics, ModelStatus, ModelVersion,
    Outcome, OutcomeSummary, PredictionRecord, RetrainingRun, TransactionRecord,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS predictions (
        id                   TEXT PRIMARY KEY,
        modality             TEXT NOT NULL,
        created_at           TEXT NOT NULL,
        decision             INTEGER NOT NULL,
        record_json          TEXT NOT NULL,
        actual_label         INTEGER,
        feedback_received_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_predictions_modality_created
        ON predictions(modality, created_at);

    CREATE TABLE IF NOT EXISTS feedback (
        seq           INTEGER PRIMARY KEY AUTOINCREMENT,
        prediction_id TEXT NOT NULL REFERENCES predictions(id),
        modality      TEXT NOT NULL,
        actual_label  INTEGER NOT NULL,
        outcome       TEXT NOT NULL,
        note          TEXT NOT NULL,
        received_at   TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_feedback_modality_received
        ON feedback(modality, received_at);

    CREATE TABLE IF NOT EXISTS model_versions (
        id           TEXT PRIMARY KEY,
        version      TEXT NOT NULL UNIQUE,
        modality     TEXT NOT NULL,
        artifact_ref TEXT NOT NULL,
        threshold    REAL NOT NULL,
        metrics_json TEXT NOT NULL,
        status       TEXT NOT NULL,
        is_active    INTEGER NOT NULL DEFAULT 0,
        created_at   TEXT NOT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_model_versions_one_active
        ON model_versions(modality) WHERE is_active = 1;

    CREATE TABLE IF NOT EXISTS retraining_runs (
        id          TEXT PRIMARY KEY,
        modality    TEXT NOT NULL,
        started_at  TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        decision    TEXT NOT NULL,
        run_json    TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_retraining_runs_modality_started
        ON retraining_runs(modality, started_at);
";

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, PersistenceError> {
    Uuid::parse_str(raw).map_err(|e| PersistenceError::Corrupt(format!("bad uuid '{raw}': {e}")))
}

fn parse_label(raw: i64) -> Result<Label, PersistenceError> {
    u8::try_from(raw)
        .ok()
        .and_then(|v| Label::try_from(v).ok())
        .ok_or_else(|| PersistenceError::Corrupt(format!("bad label {raw}")))
}

/// Raw columns of a prediction row
struct PredictionRow {
    record_json: String,
    actual_label: Option<i64>,
    feedback_received_at: Option<String>,
}

impl PredictionRow {
    const COLUMNS: &'static str = "record_json, actual_label, feedback_received_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_json: row.get(0)?,
            actual_label: row.get(1)?,
            feedback_received_at: row.get(2)?,
        })
    }

    fn into_record(self) -> Result<PredictionRecord, PersistenceError> {
        let mut record: PredictionRecord = serde_json::from_str(&self.record_json)?;
        record.actual_label = self.actual_label.map(parse_label).transpose()?;
        record.feedback_received_at = self
            .feedback_received_at
            .as_deref()
            .map(parse_ts)
            .transpose()?;
        Ok(record)
    }
}

/// Raw columns of a model version row
struct VersionRow {
    id: String,
    version: String,
    modality: String,
    artifact_ref: String,
    threshold: f64,
    metrics_json: String,
    status: String,
    is_active: bool,
    created_at: String,
}

impl VersionRow {
    const COLUMNS: &'static str =
        "id, version, modality, artifact_ref, threshold, metrics_json, status, is_active, created_at";

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            version: row.get(1)?,
            modality: row.get(2)?,
            artifact_ref: row.get(3)?,
            threshold: row.get(4)?,
            metrics_json: row.get(5)?,
            status: row.get(6)?,
            is_active: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_version(self) -> Result<ModelVersion, PersistenceError> {
        let metrics: ModelMetrics = serde_json::from_str(&self.metrics_json)?;
        Ok(ModelVersion {
            id: parse_uuid(&self.id)?,
            version: self.version,
            modality: parse_modality(&self.modality)?,
            artifact_ref: self.artifact_ref,
            threshold: self.threshold,
            metrics,
            status: ModelStatus::parse(&self.status)
                .ok_or_else(|| PersistenceError::Corrupt(format!("bad status '{}'", self.status)))?,
            is_active: self.is_active,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn parse_modality(raw: &str) -> Result<Modality, PersistenceError> {
    raw.parse()
        .map_err(|_| PersistenceError::Corrupt(format!("bad modality '{raw}'")))
}

/// `Store` implementation over a SQLite database file
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| PersistenceError::Corrupt(format!("cannot create {}: {e}", dir.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            ",
        )?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "SQLite store opened");
        Ok(store)
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::LockPoisoned)
    }

    fn query_versions(&self, sql: &str, modality: Modality) -> Result<Vec<ModelVersion>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![modality.as_str()], VersionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(VersionRow::into_version).collect()
    }
}

impl Store for SqliteStore {
    fn insert_prediction(&self, record: &PredictionRecord) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(record)?;
        self.lock()?.execute(
            "INSERT INTO predictions (id, modality, created_at, decision, record_json, actual_label, feedback_received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id.to_string(),
                record.modality.as_str(),
                ts(&record.created_at),
                u8::from(record.decision),
                json,
                record.actual_label.map(u8::from),
                record.feedback_received_at.as_ref().map(ts),
            ],
        )?;
        Ok(())
    }

    fn get_prediction(&self, id: Uuid) -> Result<Option<PredictionRecord>, PersistenceError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM predictions WHERE id = ?1", PredictionRow::COLUMNS),
                params![id.to_string()],
                PredictionRow::from_row,
            )
            .optional()?;
        row.map(PredictionRow::into_record).transpose()
    }

    fn recent_predictions(
        &self,
        modality: Option<Modality>,
        limit: usize,
    ) -> Result<Vec<PredictionRecord>, PersistenceError> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match modality {
            Some(m) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM predictions WHERE modality = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2",
                    PredictionRow::COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![m.as_str(), limit], PredictionRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM predictions ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                    PredictionRow::COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![limit], PredictionRow::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        rows.into_iter().map(PredictionRow::into_record).collect()
    }

    fn record_feedback(
        &self,
        prediction_id: Uuid,
        actual_label: Label,
        note: &str,
        received_at: DateTime<Utc>,
    ) -> Result<FeedbackRecord, PersistenceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let existing: Option<(String, i64, Option<i64>)> = tx
            .query_row(
                "SELECT modality, decision, actual_label FROM predictions WHERE id = ?1",
                params![prediction_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        let (modality, decision, label) =
            existing.ok_or(PersistenceError::PredictionNotFound(prediction_id))?;
        if label.is_some() {
            return Err(PersistenceError::AlreadyLabeled(prediction_id));
        }

        let modality = parse_modality(&modality)?;
        let outcome = Outcome::classify(parse_label(decision)?, actual_label);

        // The IS NULL guard keeps the label write-once even under concurrent writers
        let updated = tx.execute(
            "UPDATE predictions SET actual_label = ?2, feedback_received_at = ?3
             WHERE id = ?1 AND actual_label IS NULL",
            params![prediction_id.to_string(), u8::from(actual_label), ts(&received_at)],
        )?;
        if updated != 1 {
            return Err(PersistenceError::AlreadyLabeled(prediction_id));
        }
        tx.execute(
            "INSERT INTO feedback (prediction_id, modality, actual_label, outcome, note, received_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                prediction_id.to_string(),
                modality.as_str(),
                u8::from(actual_label),
                outcome.as_str(),
                note,
                ts(&received_at),
            ],
        )?;
        tx.commit()?;

        Ok(FeedbackRecord {
            prediction_id,
            modality,
            actual_label,
            outcome,
            note: note.to_string(),
            received_at,
        })
    }

    fn feedback_count_since(
        &self,
        modality: Modality,
        since: Option<DateTime<Utc>>,
    ) -> Result<u64, PersistenceError> {
        let conn = self.lock()?;
        let count: i64 = match since {
            Some(since) => conn.query_row(
                "SELECT COUNT(*) FROM feedback WHERE modality = ?1 AND received_at > ?2",
                params![modality.as_str(), ts(&since)],
                |row| row.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM feedback WHERE modality = ?1",
                params![modality.as_str()],
                |row| row.get(0),
            )?,
        };
        Ok(count.max(0) as u64)
    }

    fn labeled_transactions(&self, modality: Modality) -> Result<Vec<LabeledTransaction>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT record_json, actual_label FROM predictions
             WHERE modality = ?1 AND actual_label IS NOT NULL
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map(params![modality.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(json, label)| {
                let record: PredictionRecord = serde_json::from_str(&json)?;
                let transaction: TransactionRecord = record.transaction;
                Ok(LabeledTransaction {
                    transaction,
                    label: parse_label(label)?,
                })
            })
            .collect()
    }

    fn outcome_summary(&self, modality: Modality) -> Result<OutcomeSummary, PersistenceError> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM predictions WHERE modality = ?1",
            params![modality.as_str()],
            |row| row.get(0),
        )?;

        let mut summary = OutcomeSummary {
            total_predictions: total.max(0) as u64,
            ..Default::default()
        };
        let mut stmt = conn.prepare(
            "SELECT decision, actual_label, COUNT(*) FROM predictions
             WHERE modality = ?1 AND actual_label IS NOT NULL
             GROUP BY decision, actual_label",
        )?;
        let groups = stmt
            .query_map(params![modality.as_str()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (decision, actual, count) in groups {
            let outcome = Outcome::classify(parse_label(decision)?, parse_label(actual)?);
            summary.record_many(outcome, count.max(0) as u64);
        }
        Ok(summary)
    }

    fn insert_model_version(&self, version: &ModelVersion) -> Result<(), PersistenceError> {
        let metrics = serde_json::to_string(&version.metrics)?;
        self.lock()?.execute(
            "INSERT INTO model_versions (id, version, modality, artifact_ref, threshold, metrics_json, status, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                version.id.to_string(),
                version.version,
                version.modality.as_str(),
                version.artifact_ref,
                version.threshold,
                metrics,
                version.status.as_str(),
                version.is_active,
                ts(&version.created_at),
            ],
        )?;
        Ok(())
    }

    fn active_model_version(&self, modality: Modality) -> Result<Option<ModelVersion>, PersistenceError> {
        let mut versions = self.query_versions(
            &format!(
                "SELECT {} FROM model_versions WHERE modality = ?1 AND is_active = 1",
                VersionRow::COLUMNS
            ),
            modality,
        )?;
        Ok(versions.pop())
    }

    fn model_versions(&self, modality: Modality) -> Result<Vec<ModelVersion>, PersistenceError> {
        self.query_versions(
            &format!(
                "SELECT {} FROM model_versions WHERE modality = ?1 ORDER BY created_at DESC, rowid DESC",
                VersionRow::COLUMNS
            ),
            modality,
        )
    }

    fn activate_model_version(&self, modality: Modality, id: Uuid) -> Result<(), PersistenceError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM model_versions WHERE id = ?1 AND modality = ?2",
                params![id.to_string(), modality.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(PersistenceError::ModelVersionNotFound(id));
        }

        tx.execute(
            "UPDATE model_versions SET is_active = 0, status = ?2
             WHERE modality = ?1 AND is_active = 1 AND id != ?3",
            params![modality.as_str(), ModelStatus::Archived.as_str(), id.to_string()],
        )?;
        tx.execute(
            "UPDATE model_versions SET is_active = 1, status = ?2 WHERE id = ?1",
            params![id.to_string(), ModelStatus::Active.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn set_model_status(&self, id: Uuid, status: ModelStatus) -> Result<(), PersistenceError> {
        let updated = self.lock()?.execute(
            "UPDATE model_versions SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if updated == 0 {
            return Err(PersistenceError::ModelVersionNotFound(id));
        }
        Ok(())
    }

    fn insert_retraining_run(&self, run: &RetrainingRun) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(run)?;
        self.lock()?.execute(
            "INSERT INTO retraining_runs (id, modality, started_at, finished_at, decision, run_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.id.to_string(),
                run.modality.as_str(),
                ts(&run.started_at),
                ts(&run.finished_at),
                run.decision.label(),
                json,
            ],
        )?;
        Ok(())
    }

    fn last_retraining_run(&self, modality: Modality) -> Result<Option<RetrainingRun>, PersistenceError> {
        Ok(self.retraining_runs(modality, 1)?.pop())
    }

    fn retraining_runs(&self, modality: Modality, limit: usize) -> Result<Vec<RetrainingRun>, PersistenceError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT run_json FROM retraining_runs WHERE modality = ?1
             ORDER BY started_at DESC, rowid DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![modality.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| row.get::<_, String>(0),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(PersistenceError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_prediction_round_trip() {
        conformance::prediction_round_trip(&store());
    }

    #[test]
    fn test_feedback_is_set_once() {
        conformance::feedback_is_set_once(&store());
    }

    #[test]
    fn test_feedback_counts_and_summary() {
        conformance::feedback_counts_and_summary(&store());
    }

    #[test]
    fn test_single_active_version() {
        conformance::single_active_version(&store());
    }

    #[test]
    fn test_retraining_runs() {
        conformance::retraining_runs(&store());
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("fraud.db");
        let record = conformance::prediction(10.0, Label::Fraud);
        {
            let store = SqliteStore::open(&path).unwrap();
            store.insert_prediction(&record).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get_prediction(record.id).unwrap().unwrap().id, record.id);
    }

    #[test]
    fn test_partial_index_rejects_second_active_row() {
        let store = store();
        let mut v1 = conformance::version(Modality::Banking, "v1");
        v1.is_active = true;
        let mut v2 = conformance::version(Modality::Banking, "v2");
        v2.is_active = true;
        store.insert_model_version(&v1).unwrap();
        assert!(store.insert_model_version(&v2).is_err());
    }
}
