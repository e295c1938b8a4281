//! Checkpointed daily longtail runs.
//!
//! A run covers `[date 00:00 UTC, date+1 00:00 UTC)`. It is skipped when the
//! date's checkpoint already records the same window, the same session count
//! and the same vocabulary fingerprint, so re-running a day is a no-op until
//! its input changes.

use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::info;

use crate::error::StoreResult;
use crate::longtail::{LongtailAnalysisResult, LongtailAnalyzer};
use crate::session::{Event, Session};
use crate::store::{AnalysisCheckpoint, AnalysisId, SqliteStore};
use crate::vectorizer::CommandVectorizer;

/// Parameters of one daily run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyRun {
    pub date: NaiveDate,
    pub lookback_days: u32,
    /// Analyze even when the checkpoint is current.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub enum DailyOutcome {
    /// The checkpoint already covered this input.
    Skipped { checkpoint: AnalysisCheckpoint },
    Analyzed {
        analysis_id: AnalysisId,
        vectors_persisted: bool,
        result: Box<LongtailAnalysisResult>,
    },
}

/// Half-open UTC window covering one calendar day.
pub fn day_window(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    (start, start + Duration::days(1))
}

/// Runs the longtail analysis for one day, consulting and updating the
/// checkpoint. Sessions are selected by their start time; events by the
/// session they belong to.
pub fn run_daily(
    store: &SqliteStore,
    analyzer: &LongtailAnalyzer,
    vectorizer: &mut CommandVectorizer,
    sessions: &[Session],
    events: &[Event],
    run: DailyRun,
) -> StoreResult<DailyOutcome> {
    let (window_start, window_end) = day_window(run.date);

    let day_sessions: Vec<Session> = sessions
        .iter()
        .filter(|s| {
            s.timestamp()
                .map(|ts| ts >= window_start && ts < window_end)
                .unwrap_or(false)
        })
        .cloned()
        .collect();
    let outside = sessions.len() - day_sessions.len();
    if outside > 0 {
        info!(
            "{} of {} sessions fall outside {} and are ignored",
            outside,
            sessions.len(),
            run.date
        );
    }
    let ids: HashSet<&str> = day_sessions.iter().map(|s| s.session_id.as_str()).collect();
    let day_events: Vec<Event> = events
        .iter()
        .filter(|e| ids.contains(e.session_id.as_str()))
        .cloned()
        .collect();

    if !run.force {
        if let Some(checkpoint) = store.get_checkpoint(run.date)? {
            let fingerprint = analyzer.corpus_fingerprint(&day_events, vectorizer);
            if checkpoint.window_start == window_start
                && checkpoint.window_end == window_end
                && checkpoint.sessions_analyzed == day_sessions.len()
                && checkpoint.vocabulary_hash == fingerprint
            {
                info!(
                    "Checkpoint for {} is current ({} sessions), skipping",
                    run.date, checkpoint.sessions_analyzed
                );
                return Ok(DailyOutcome::Skipped { checkpoint });
            }
        }
    }

    let result = analyzer.analyze(&day_sessions, &day_events, run.lookback_days, vectorizer);
    let stored = store.store_longtail_result(&result, window_start, window_end, run.lookback_days)?;
    store.upsert_checkpoint(
        run.date,
        window_start,
        window_end,
        day_sessions.len(),
        &store.vocabulary_fingerprint(vectorizer),
        Some(stored.id),
    )?;

    info!(
        "Analyzed {}: {} sessions, {} detections (analysis {})",
        run.date,
        day_sessions.len(),
        result.total_detections(),
        stored.id
    );

    Ok(DailyOutcome::Analyzed {
        analysis_id: stored.id,
        vectors_persisted: stored.vectors_persisted,
        result: Box::new(result),
    })
}
