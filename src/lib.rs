//! Honeypot threat analysis.
//!
//! Batch analyzers over honeypot session telemetry:
//!
//! - **Snowshoe detection**: distributed, low-volume-per-source campaigns,
//!   scored from volume, timing, geographic and behavioral signals.
//! - **Longtail analysis**: rare commands, anomalous command sequences and
//!   behavioral outlier sessions.
//! - **Infrastructure classification** and **population features** for
//!   reporting.
//! - A **SQLite store** for results and per-day checkpoints, driving
//!   idempotent daily runs.
//!
//! ```text
//! sessions/events ──> snowshoe ──────────────┐
//!                 └─> longtail (vectorizer) ──┼──> store ──> checkpoints
//!                 └─> features (classifier) ──┘
//! ```
//!
//! Every analyzer is synchronous and holds no state between calls; the TF-IDF
//! vectorizer is owned by the caller.

pub mod classifier;
pub mod cluster;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod export;
pub mod features;
pub mod longtail;
pub mod pipeline;
pub mod session;
pub mod snowshoe;
pub mod stats;
pub mod store;
pub mod vectorizer;

pub use classifier::{Confidence, ProviderClassifier, ProviderFeatures};
pub use config::Config;
pub use error::{AnalysisError, ClusteringError, StoreError};
pub use features::{aggregate_features, PopulationFeatures};
pub use longtail::{analyze_longtail, LongtailAnalysisResult, LongtailAnalyzer};
pub use pipeline::{run_daily, DailyOutcome, DailyRun};
pub use session::{Event, Session};
pub use snowshoe::{detect_snowshoe, SnowshoeDetector, SnowshoeResult};
pub use stats::{great_circle_km, normalized_entropy};
pub use store::{AnalysisCheckpoint, AnalysisId, SqliteStore};
pub use vectorizer::CommandVectorizer;

/// Process exit code for a run that could not complete.
pub const EXIT_FAILURE: u8 = 1;

/// Outcome of a completed run, as reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Ran successfully, nothing detected.
    Clean,
    /// Ran successfully, at least one detection.
    Detected,
}

impl RunStatus {
    pub fn from_detection(detected: bool) -> Self {
        if detected {
            Self::Detected
        } else {
            Self::Clean
        }
    }

    /// Status of a snowshoe run. A result carrying an error means the run
    /// could not be completed and maps to a failure, not a clean run.
    pub fn from_snowshoe(result: &SnowshoeResult) -> Result<Self, AnalysisError> {
        match &result.error {
            Some(reason) => Err(AnalysisError::invalid(reason.clone())),
            None => Ok(Self::from_detection(result.is_detection())),
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            Self::Clean => 0,
            Self::Detected => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        assert_eq!(RunStatus::from_detection(false).exit_code(), 0);
        assert_eq!(RunStatus::from_detection(true).exit_code(), 2);
        assert_ne!(RunStatus::Detected.exit_code(), EXIT_FAILURE);
        assert_ne!(RunStatus::Clean.exit_code(), EXIT_FAILURE);
    }

    #[test]
    fn test_failed_snowshoe_run_is_not_clean() {
        let sessions: Vec<Session> = (0..20)
            .map(|i| Session {
                source_ip: Some(format!("45.33.1.{}", i + 1)),
                ..Session::new("dup")
            })
            .collect();
        let result = SnowshoeDetector::default().detect(&sessions, 24);
        assert_eq!(result.confidence_score, 0.0);
        assert!(!result.is_detection());

        let err = RunStatus::from_snowshoe(&result).unwrap_err();
        assert!(err.to_string().contains("duplicate session id 'dup'"));
    }

    #[test]
    fn test_snowshoe_status_without_error() {
        let result = SnowshoeDetector::default().detect(&[], 24);
        assert_eq!(RunStatus::from_snowshoe(&result).unwrap(), RunStatus::Clean);
    }
}
