//! SQLite result store.
//!
//! Holds longtail analyses with their detections and detection↔session links,
//! one checkpoint row per calendar date, and snowshoe verdicts. Per-session
//! vectors are written only when the connection exposes a vector extension
//! (`vec_version()`); that step never rolls back committed detections.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::longtail::{LongtailAnalysisResult, SessionVector};
use crate::snowshoe::SnowshoeResult;
use crate::vectorizer::CommandVectorizer;

/// Row id of a `longtail_analysis` record.
pub type AnalysisId = i64;

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = r#"
    -- One row per longtail run
    CREATE TABLE IF NOT EXISTS longtail_analysis (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        window_start TEXT NOT NULL,
        window_end TEXT NOT NULL,
        lookback_days INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        total_sessions INTEGER NOT NULL,
        total_events INTEGER NOT NULL,
        rare_command_count INTEGER NOT NULL,
        anomalous_sequence_count INTEGER NOT NULL,
        outlier_session_count INTEGER NOT NULL,
        emerging_pattern_count INTEGER NOT NULL,
        high_entropy_payload_count INTEGER NOT NULL,
        analysis_duration_seconds REAL NOT NULL,
        statistical_summary TEXT NOT NULL,
        vectors_persisted INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_longtail_analysis_window ON longtail_analysis(window_start);

    -- Individual findings
    CREATE TABLE IF NOT EXISTS longtail_detections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        analysis_id INTEGER NOT NULL REFERENCES longtail_analysis(id) ON DELETE CASCADE,
        detection_type TEXT NOT NULL,
        label TEXT NOT NULL,
        score REAL NOT NULL,
        payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_longtail_detections_analysis ON longtail_detections(analysis_id);
    CREATE INDEX IF NOT EXISTS idx_longtail_detections_type ON longtail_detections(detection_type);

    -- Detection to contributing session
    CREATE TABLE IF NOT EXISTS longtail_detection_sessions (
        detection_id INTEGER NOT NULL REFERENCES longtail_detections(id) ON DELETE CASCADE,
        session_id TEXT NOT NULL,
        PRIMARY KEY (detection_id, session_id)
    );
    CREATE INDEX IF NOT EXISTS idx_detection_sessions_session ON longtail_detection_sessions(session_id);

    -- One row per calendar date
    CREATE TABLE IF NOT EXISTS longtail_analysis_checkpoints (
        checkpoint_date TEXT PRIMARY KEY,
        window_start TEXT NOT NULL,
        window_end TEXT NOT NULL,
        sessions_analyzed INTEGER NOT NULL,
        vocabulary_hash TEXT NOT NULL,
        last_analysis_id INTEGER,
        updated_at TEXT NOT NULL
    );

    -- Snowshoe verdicts
    CREATE TABLE IF NOT EXISTS snowshoe_detections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        window_start TEXT NOT NULL,
        window_end TEXT NOT NULL,
        created_at TEXT NOT NULL,
        is_likely_snowshoe INTEGER NOT NULL,
        confidence_score REAL NOT NULL,
        unique_ips INTEGER NOT NULL,
        single_attempt_ips INTEGER NOT NULL,
        low_volume_ips INTEGER NOT NULL,
        coordinated_timing INTEGER NOT NULL,
        geographic_spread REAL NOT NULL,
        recommendation TEXT NOT NULL,
        indicators TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_snowshoe_window ON snowshoe_detections(window_start);
"#;

const VECTOR_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS longtail_session_vectors (
        analysis_id INTEGER NOT NULL REFERENCES longtail_analysis(id) ON DELETE CASCADE,
        session_id TEXT NOT NULL,
        vector TEXT NOT NULL,
        PRIMARY KEY (analysis_id, session_id)
    );
"#;

/// Outcome of persisting one longtail analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredAnalysis {
    pub id: AnalysisId,
    pub vectors_persisted: bool,
}

/// Persisted marker of what has been analyzed for one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCheckpoint {
    pub checkpoint_date: NaiveDate,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub sessions_analyzed: usize,
    pub vocabulary_hash: String,
    pub last_analysis_id: Option<AnalysisId>,
    pub updated_at: DateTime<Utc>,
}

/// Kinds of longtail findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionType {
    RareCommand,
    AnomalousSequence,
    OutlierSession,
    EmergingPattern,
    HighEntropyPayload,
}

impl DetectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RareCommand => "rare_command",
            Self::AnomalousSequence => "anomalous_sequence",
            Self::OutlierSession => "outlier_session",
            Self::EmergingPattern => "emerging_pattern",
            Self::HighEntropyPayload => "high_entropy_payload",
        }
    }
}

impl std::fmt::Display for DetectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DetectionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rare_command" => Ok(Self::RareCommand),
            "anomalous_sequence" => Ok(Self::AnomalousSequence),
            "outlier_session" => Ok(Self::OutlierSession),
            "emerging_pattern" => Ok(Self::EmergingPattern),
            "high_entropy_payload" => Ok(Self::HighEntropyPayload),
            _ => Err(format!("Unknown detection type: {}", s)),
        }
    }
}

/// A stored longtail finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    pub analysis_id: AnalysisId,
    pub detection_type: DetectionType,
    pub label: String,
    pub score: f64,
    pub payload: serde_json::Value,
    pub session_count: usize,
}

/// A finding about to be written.
struct PendingDetection {
    detection_type: DetectionType,
    label: String,
    score: f64,
    payload: serde_json::Value,
    session_ids: Vec<String>,
}

/// Thread-safe store handle.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    persist_vectors: bool,
}

impl SqliteStore {
    /// Open or create the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!("Opened result store at {}", path.as_ref().display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            persist_vectors: true,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Enables or disables the optional vector step.
    pub fn with_vector_persistence(mut self, enabled: bool) -> Self {
        self.persist_vectors = enabled;
        self
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    // ==================== Longtail Analyses ====================

    /// Persists an analysis, its detections and their session links in one
    /// transaction, then attempts the optional vector step.
    pub fn store_longtail_result(
        &self,
        result: &LongtailAnalysisResult,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        lookback_days: u32,
    ) -> StoreResult<StoredAnalysis> {
        let detections = pending_detections(result)?;
        let summary = serde_json::to_string(&result.statistical_summary)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO longtail_analysis (window_start, window_end, lookback_days, created_at,
                total_sessions, total_events, rare_command_count, anomalous_sequence_count,
                outlier_session_count, emerging_pattern_count, high_entropy_payload_count,
                analysis_duration_seconds, statistical_summary)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                window_start.to_rfc3339(),
                window_end.to_rfc3339(),
                lookback_days,
                now,
                result.statistical_summary.sessions_analyzed as i64,
                result.statistical_summary.total_events as i64,
                result.rare_command_count as i64,
                result.anomalous_sequence_count as i64,
                result.outlier_session_count as i64,
                result.emerging_pattern_count as i64,
                result.high_entropy_payload_count as i64,
                result.analysis_duration_seconds,
                summary,
            ],
        )?;
        let analysis_id = tx.last_insert_rowid();

        for detection in &detections {
            tx.execute(
                "INSERT INTO longtail_detections (analysis_id, detection_type, label, score, payload, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    analysis_id,
                    detection.detection_type.as_str(),
                    detection.label,
                    detection.score,
                    detection.payload.to_string(),
                    now,
                ],
            )?;
            let detection_id = tx.last_insert_rowid();
            for session_id in &detection.session_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO longtail_detection_sessions (detection_id, session_id) VALUES (?, ?)",
                    params![detection_id, session_id],
                )?;
            }
        }
        tx.commit()?;
        info!(
            "Stored longtail analysis {} with {} detections",
            analysis_id,
            detections.len()
        );

        let vectors_persisted = if self.persist_vectors && !result.session_vectors.is_empty() {
            match write_session_vectors(&mut *conn, analysis_id, &result.session_vectors) {
                Ok(persisted) => persisted,
                Err(e) => {
                    warn!("Vector persistence failed for analysis {}: {}", analysis_id, e);
                    false
                }
            }
        } else {
            false
        };

        Ok(StoredAnalysis {
            id: analysis_id,
            vectors_persisted,
        })
    }

    /// Detections recorded for one analysis, in insertion order.
    pub fn detections_for_analysis(&self, analysis_id: AnalysisId) -> StoreResult<Vec<DetectionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT d.id, d.analysis_id, d.detection_type, d.label, d.score, d.payload,
                    (SELECT COUNT(*) FROM longtail_detection_sessions s WHERE s.detection_id = d.id)
             FROM longtail_detections d WHERE d.analysis_id = ? ORDER BY d.id",
        )?;

        let rows = stmt
            .query_map([analysis_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, analysis_id, kind, label, score, payload, sessions)| {
                Ok(DetectionRecord {
                    id,
                    analysis_id,
                    detection_type: kind.parse().map_err(|_| StoreError::InvalidStoredValue {
                        column: "detection_type",
                        value: kind.clone(),
                    })?,
                    label,
                    score,
                    payload: serde_json::from_str(&payload)?,
                    session_count: sessions.max(0) as usize,
                })
            })
            .collect()
    }

    /// Sessions linked to one detection, sorted.
    pub fn sessions_for_detection(&self, detection_id: i64) -> StoreResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT session_id FROM longtail_detection_sessions WHERE detection_id = ? ORDER BY session_id",
        )?;
        let sessions = stmt
            .query_map([detection_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(sessions)
    }

    /// Whether vectors were persisted for an analysis; `None` if it does not exist.
    pub fn analysis_vectors_persisted(&self, analysis_id: AnalysisId) -> StoreResult<Option<bool>> {
        let conn = self.lock()?;
        let flag = conn
            .query_row(
                "SELECT vectors_persisted FROM longtail_analysis WHERE id = ?",
                [analysis_id],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(flag)
    }

    // ==================== Checkpoints ====================

    pub fn get_checkpoint(&self, date: NaiveDate) -> StoreResult<Option<AnalysisCheckpoint>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT window_start, window_end, sessions_analyzed, vocabulary_hash, last_analysis_id, updated_at
                 FROM longtail_analysis_checkpoints WHERE checkpoint_date = ?",
                [date.format(DATE_FORMAT).to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(start, end, sessions, hash, last_id, updated)| {
            Ok(AnalysisCheckpoint {
                checkpoint_date: date,
                window_start: parse_timestamp("window_start", &start)?,
                window_end: parse_timestamp("window_end", &end)?,
                sessions_analyzed: sessions.max(0) as usize,
                vocabulary_hash: hash,
                last_analysis_id: last_id,
                updated_at: parse_timestamp("updated_at", &updated)?,
            })
        })
        .transpose()
    }

    /// Inserts or updates the checkpoint row for `date`.
    pub fn upsert_checkpoint(
        &self,
        date: NaiveDate,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        sessions_analyzed: usize,
        vocabulary_hash: &str,
        analysis_id: Option<AnalysisId>,
    ) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO longtail_analysis_checkpoints
                (checkpoint_date, window_start, window_end, sessions_analyzed, vocabulary_hash, last_analysis_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(checkpoint_date) DO UPDATE SET
                window_start = excluded.window_start,
                window_end = excluded.window_end,
                sessions_analyzed = excluded.sessions_analyzed,
                vocabulary_hash = excluded.vocabulary_hash,
                last_analysis_id = excluded.last_analysis_id,
                updated_at = excluded.updated_at",
            params![
                date.format(DATE_FORMAT).to_string(),
                window_start.to_rfc3339(),
                window_end.to_rfc3339(),
                sessions_analyzed as i64,
                vocabulary_hash,
                analysis_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        debug!("Checkpoint for {} updated", date);
        Ok(())
    }

    /// Fingerprint of the vectorizer's vocabulary, for checkpoint comparison.
    pub fn vocabulary_fingerprint(&self, vectorizer: &CommandVectorizer) -> String {
        vectorizer.vocabulary_fingerprint()
    }

    // ==================== Snowshoe ====================

    pub fn store_snowshoe_result(
        &self,
        result: &SnowshoeResult,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> StoreResult<i64> {
        let indicators = serde_json::to_string(&result.indicators)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO snowshoe_detections (window_start, window_end, created_at, is_likely_snowshoe,
                confidence_score, unique_ips, single_attempt_ips, low_volume_ips, coordinated_timing,
                geographic_spread, recommendation, indicators)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                window_start.to_rfc3339(),
                window_end.to_rfc3339(),
                Utc::now().to_rfc3339(),
                result.is_likely_snowshoe,
                result.confidence_score,
                result.analysis_metadata.unique_ips as i64,
                result.single_attempt_ips.len() as i64,
                result.low_volume_ips.len() as i64,
                result.coordinated_timing,
                result.geographic_spread,
                result.recommendation.to_string(),
                indicators,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    #[cfg(test)]
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let conn = self.conn.lock().unwrap();
        f(&conn)
    }
}

/// Writes vectors and sets the analysis' `vectors_persisted` flag in one
/// transaction, if the connection advertises vector support. Returns
/// `Ok(false)` when the extension is absent.
fn write_session_vectors(
    conn: &mut Connection,
    analysis_id: AnalysisId,
    vectors: &[SessionVector],
) -> StoreResult<bool> {
    let version: Option<String> = conn
        .query_row("SELECT vec_version()", [], |row| row.get(0))
        .ok();
    let Some(version) = version else {
        debug!("Vector extension not available, skipping session vectors");
        return Ok(false);
    };
    debug!("Persisting {} session vectors (vec {})", vectors.len(), version);

    conn.execute_batch(VECTOR_SCHEMA)?;
    let tx = conn.transaction()?;
    for v in vectors {
        tx.execute(
            "INSERT OR REPLACE INTO longtail_session_vectors (analysis_id, session_id, vector) VALUES (?, ?, ?)",
            params![analysis_id, v.session_id, serde_json::to_string(&v.vector)?],
        )?;
    }
    tx.execute(
        "UPDATE longtail_analysis SET vectors_persisted = 1 WHERE id = ?",
        [analysis_id],
    )?;
    tx.commit()?;
    Ok(true)
}

fn pending_detections(result: &LongtailAnalysisResult) -> StoreResult<Vec<PendingDetection>> {
    let mut out = Vec::with_capacity(result.total_detections());

    for rare in &result.rare_commands {
        out.push(PendingDetection {
            detection_type: DetectionType::RareCommand,
            label: rare.command.clone(),
            score: rare.rarity_score,
            payload: serde_json::to_value(rare)?,
            session_ids: rare.session_ids.clone(),
        });
    }
    for seq in &result.anomalous_sequences {
        out.push(PendingDetection {
            detection_type: DetectionType::AnomalousSequence,
            label: seq.sequence.clone(),
            score: seq.anomaly_score,
            payload: serde_json::to_value(seq)?,
            session_ids: seq.session_ids.clone(),
        });
    }
    for outlier in &result.outlier_sessions {
        out.push(PendingDetection {
            detection_type: DetectionType::OutlierSession,
            label: outlier.session_id.clone(),
            score: 1.0,
            payload: serde_json::to_value(outlier)?,
            session_ids: vec![outlier.session_id.clone()],
        });
    }
    for pattern in &result.emerging_patterns {
        out.push(PendingDetection {
            detection_type: DetectionType::EmergingPattern,
            label: pattern.pattern.clone(),
            score: 1.0,
            payload: serde_json::to_value(pattern)?,
            session_ids: pattern.session_ids.clone(),
        });
    }
    for payload in &result.high_entropy_payloads {
        out.push(PendingDetection {
            detection_type: DetectionType::HighEntropyPayload,
            label: payload.payload.clone(),
            score: payload.entropy,
            payload: serde_json::to_value(payload)?,
            session_ids: vec![payload.session_id.clone()],
        });
    }

    Ok(out)
}

fn parse_timestamp(column: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| StoreError::InvalidStoredValue {
            column,
            value: value.to_string(),
        })
}
