//! Snowshoe attack detection.
//!
//! A snowshoe campaign spreads low per-source volume across many source
//! addresses. The detector combines four signals over a session population:
//!
//! ## Volume
//! single_attempt_ratio = |{ip : sessions(ip) = 1}| / total_ips
//! low_volume_ratio     = |{ip : 1 ≤ sessions(ip) ≤ threshold}| / total_ips
//!
//! ## Timing
//! DBSCAN over session start times (epoch seconds), eps = hours × 3600.
//! coordination_score = clustered_points / total_points, and timing counts as
//! coordinated when at least one cluster exists and the score exceeds 0.3.
//!
//! ## Geography
//! diversity = (unique_countries / total_ips + unique_asns / total_ips) / 2,
//! with each ratio capped at 1.
//!
//! ## Behavior
//! duration_consistency = 1 / (1 + variance(session durations))
//!
//! ## Composite
//! score = 0.4·single_attempt_ratio + 0.3·diversity + 0.2·[coordinated]
//!       + 0.1·low_volume_ratio, clamped to [0, 1] and rounded to 6 decimals.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cluster::Dbscan;
use crate::config::SnowshoeConfig;
use crate::error::AnalysisError;
use crate::session::Session;
use crate::stats::{mean, population_variance, round6};

/// Minimum distinct source IPs required before any signal is computed.
pub const MIN_UNIQUE_IPS: usize = 10;

/// Coordination score above which timing clusters count as coordinated.
const COORDINATION_THRESHOLD: f64 = 0.3;

const WEIGHT_SINGLE_ATTEMPT: f64 = 0.4;
const WEIGHT_DIVERSITY: f64 = 0.3;
const WEIGHT_TIMING: f64 = 0.2;
const WEIGHT_LOW_VOLUME: f64 = 0.1;

/// Recommendation tier derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    #[serde(rename = "HIGH CONFIDENCE: Likely snowshoe attack detected")]
    HighConfidence,
    #[serde(rename = "MODERATE CONFIDENCE: Possible snowshoe attack, investigate further")]
    Moderate,
    #[serde(rename = "LOW CONFIDENCE: Weak snowshoe indicators, continue monitoring")]
    Low,
    #[serde(rename = "NO DETECTION: No snowshoe pattern detected")]
    NoDetection,
    #[serde(rename = "INSUFFICIENT DATA: Not enough distinct sources for analysis")]
    InsufficientData,
}

impl Recommendation {
    /// Returns the tier for a composite score.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 0.8 => Self::HighConfidence,
            s if s >= 0.6 => Self::Moderate,
            s if s >= 0.4 => Self::Low,
            _ => Self::NoDetection,
        }
    }

    /// Returns a short severity label.
    pub fn severity(&self) -> &'static str {
        match self {
            Self::HighConfidence => "HIGH",
            Self::Moderate => "MODERATE",
            Self::Low => "LOW",
            Self::NoDetection => "NONE",
            Self::InsufficientData => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HighConfidence => write!(f, "HIGH CONFIDENCE: Likely snowshoe attack detected"),
            Self::Moderate => write!(
                f,
                "MODERATE CONFIDENCE: Possible snowshoe attack, investigate further"
            ),
            Self::Low => write!(
                f,
                "LOW CONFIDENCE: Weak snowshoe indicators, continue monitoring"
            ),
            Self::NoDetection => write!(f, "NO DETECTION: No snowshoe pattern detected"),
            Self::InsufficientData => write!(
                f,
                "INSUFFICIENT DATA: Not enough distinct sources for analysis"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeIndicator {
    pub total_sessions: usize,
    pub total_ips: usize,
    pub single_attempt_ips: usize,
    pub low_volume_ips: usize,
    pub single_attempt_ratio: f64,
    pub low_volume_ratio: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingIndicator {
    pub has_clustering: bool,
    pub cluster_count: usize,
    pub coordination_score: f64,
    pub clustered_sessions: usize,
    pub time_span_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Country and ASN counts relative to distinct source IPs. Each ratio is
/// capped at 1, since one IP can appear under several countries or ASNs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeographicIndicator {
    pub unique_countries: usize,
    pub unique_asns: usize,
    pub country_ratio: f64,
    pub asn_ratio: f64,
    pub diversity_score: f64,
    pub is_diverse: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralIndicator {
    pub avg_session_duration: f64,
    pub duration_variance: f64,
    pub duration_consistency: f64,
    pub avg_commands_per_session: f64,
}

/// Per-signal breakdown of a detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Indicators {
    pub volume: VolumeIndicator,
    pub timing: TimingIndicator,
    pub geographic: GeographicIndicator,
    pub behavioral: BehavioralIndicator,
}

/// Facts about the analyzed population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub total_sessions: usize,
    pub analyzed_sessions: usize,
    pub unique_ips: usize,
    pub rejected_sessions: usize,
    pub window_hours: u32,
    pub insufficient_data: bool,
}

/// Outcome of one snowshoe detection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowshoeResult {
    pub is_likely_snowshoe: bool,
    pub confidence_score: f64,
    pub single_attempt_ips: Vec<String>,
    pub low_volume_ips: Vec<String>,
    pub coordinated_timing: bool,
    pub geographic_spread: f64,
    pub recommendation: Recommendation,
    pub indicators: Indicators,
    pub analysis_metadata: AnalysisMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SnowshoeResult {
    /// Creates a result indicating insufficient data.
    pub fn insufficient(metadata: AnalysisMetadata) -> Self {
        Self {
            is_likely_snowshoe: false,
            confidence_score: 0.0,
            single_attempt_ips: Vec::new(),
            low_volume_ips: Vec::new(),
            coordinated_timing: false,
            geographic_spread: 0.0,
            recommendation: Recommendation::InsufficientData,
            indicators: Indicators::default(),
            analysis_metadata: AnalysisMetadata {
                insufficient_data: true,
                ..metadata
            },
            error: None,
        }
    }

    /// Same shape as [`Self::insufficient`], carrying the failure reason.
    pub fn failed(metadata: AnalysisMetadata, error: &AnalysisError) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::insufficient(metadata)
        }
    }

    /// True when the run produced a snowshoe verdict.
    pub fn is_detection(&self) -> bool {
        self.is_likely_snowshoe
    }
}

/// Sessions grouped by validated source address.
#[derive(Debug, Default)]
struct Extraction {
    sessions_per_ip: BTreeMap<IpAddr, usize>,
    timestamps: Vec<f64>,
    durations: Vec<f64>,
    command_counts: Vec<f64>,
    countries: BTreeSet<String>,
    asns: BTreeSet<u32>,
    analyzed_sessions: usize,
    rejected_sessions: usize,
}

/// Stateless snowshoe detector.
#[derive(Debug, Clone, Default)]
pub struct SnowshoeDetector {
    config: SnowshoeConfig,
}

impl SnowshoeDetector {
    pub fn new(config: SnowshoeConfig) -> Self {
        Self { config }
    }

    /// Runs every signal over the population and produces a verdict.
    pub fn detect(&self, sessions: &[Session], window_hours: u32) -> SnowshoeResult {
        let mut metadata = AnalysisMetadata {
            total_sessions: sessions.len(),
            window_hours,
            ..Default::default()
        };

        let extraction = match self.extract(sessions) {
            Ok(extraction) => extraction,
            Err(e) => {
                warn!("Snowshoe extraction failed: {}", e);
                return SnowshoeResult::failed(metadata, &e);
            }
        };

        let total_ips = extraction.sessions_per_ip.len();
        metadata.analyzed_sessions = extraction.analyzed_sessions;
        metadata.rejected_sessions = extraction.rejected_sessions;
        metadata.unique_ips = total_ips;

        if total_ips < MIN_UNIQUE_IPS {
            debug!(
                "Insufficient data for snowshoe analysis: {} unique IPs (need {})",
                total_ips, MIN_UNIQUE_IPS
            );
            return SnowshoeResult::insufficient(metadata);
        }

        let (volume, single_attempt_ips, low_volume_ips) = self.volume_signal(&extraction);
        let timing = self
            .timing_signal(&extraction.timestamps)
            .unwrap_or_else(|e| {
                warn!("Timing clustering failed, treating as uncoordinated: {}", e);
                TimingIndicator {
                    error: Some(e.to_string()),
                    ..Default::default()
                }
            });
        let geographic = self.geographic_signal(&extraction);
        let behavioral = behavioral_signal(&extraction);

        let raw = WEIGHT_SINGLE_ATTEMPT * volume.single_attempt_ratio
            + WEIGHT_DIVERSITY * geographic.diversity_score
            + WEIGHT_TIMING * if timing.has_clustering { 1.0 } else { 0.0 }
            + WEIGHT_LOW_VOLUME * volume.low_volume_ratio;
        let confidence_score = round6(raw.clamp(0.0, 1.0));
        let is_likely_snowshoe = confidence_score >= self.config.sensitivity_threshold;
        let recommendation = Recommendation::from_score(confidence_score);

        if is_likely_snowshoe {
            info!(
                "Snowshoe pattern detected: score {:.3} across {} IPs",
                confidence_score, total_ips
            );
        } else {
            debug!(
                "No snowshoe verdict: score {:.3} across {} IPs",
                confidence_score, total_ips
            );
        }

        SnowshoeResult {
            is_likely_snowshoe,
            confidence_score,
            single_attempt_ips,
            low_volume_ips,
            coordinated_timing: timing.has_clustering,
            geographic_spread: geographic.diversity_score,
            recommendation,
            indicators: Indicators {
                volume,
                timing,
                geographic,
                behavioral,
            },
            analysis_metadata: metadata,
            error: None,
        }
    }

    /// Whether an address is usable as an attacker source under this config.
    pub fn accepts_address(&self, ip: &IpAddr) -> bool {
        if is_reserved(ip) {
            return false;
        }
        self.config.allow_private_addresses || !is_private(ip)
    }

    fn extract(&self, sessions: &[Session]) -> Result<Extraction, AnalysisError> {
        let mut seen_ids = HashSet::with_capacity(sessions.len());
        let mut extraction = Extraction::default();

        for session in sessions {
            if !seen_ids.insert(session.session_id.as_str()) {
                return Err(AnalysisError::invalid(format!(
                    "duplicate session id '{}'",
                    session.session_id
                )));
            }
            if let (Some(first), Some(last)) = (session.first_event_at, session.last_event_at) {
                if first > last {
                    return Err(AnalysisError::invalid(format!(
                        "session '{}' ends before it starts",
                        session.session_id
                    )));
                }
            }

            let Some(ip) = session.source_addr().filter(|ip| self.accepts_address(ip)) else {
                extraction.rejected_sessions += 1;
                continue;
            };

            extraction.analyzed_sessions += 1;
            *extraction.sessions_per_ip.entry(ip).or_insert(0) += 1;

            if let Some(ts) = session.timestamp() {
                extraction
                    .timestamps
                    .push(ts.timestamp_millis() as f64 / 1000.0);
            }
            extraction.durations.push(session.duration_seconds());
            extraction.command_counts.push(session.command_count as f64);

            if let Some(country) = session.enrichment.country() {
                extraction.countries.insert(country.to_uppercase());
            }
            if let Some(asn) = session.enrichment.asn() {
                extraction.asns.insert(asn);
            }
        }

        Ok(extraction)
    }

    fn volume_signal(&self, extraction: &Extraction) -> (VolumeIndicator, Vec<String>, Vec<String>) {
        let threshold = self.config.single_attempt_threshold;
        let single: Vec<String> = extraction
            .sessions_per_ip
            .iter()
            .filter(|(_, count)| **count == 1)
            .map(|(ip, _)| ip.to_string())
            .collect();
        let low: Vec<String> = extraction
            .sessions_per_ip
            .iter()
            .filter(|(_, count)| (1..=threshold).contains(*count))
            .map(|(ip, _)| ip.to_string())
            .collect();

        let total_ips = extraction.sessions_per_ip.len();
        let ratio = |n: usize| {
            if total_ips > 0 {
                n as f64 / total_ips as f64
            } else {
                0.0
            }
        };

        let indicator = VolumeIndicator {
            total_sessions: extraction.analyzed_sessions,
            total_ips,
            single_attempt_ips: single.len(),
            low_volume_ips: low.len(),
            single_attempt_ratio: ratio(single.len()),
            low_volume_ratio: ratio(low.len()),
        };
        (indicator, single, low)
    }

    fn timing_signal(&self, timestamps: &[f64]) -> Result<TimingIndicator, AnalysisError> {
        if timestamps.is_empty() {
            return Ok(TimingIndicator::default());
        }

        let dbscan = Dbscan::new(
            self.config.time_cluster_eps_hours * 3600.0,
            self.config.min_cluster_size,
        )?;
        let clustering = dbscan.fit_1d(timestamps)?;

        let clustered = clustering.clustered_count();
        let coordination_score = clustered as f64 / timestamps.len() as f64;
        let has_clustering =
            clustering.cluster_count > 0 && coordination_score > COORDINATION_THRESHOLD;

        let (min, max) = timestamps
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
                (lo.min(t), hi.max(t))
            });

        Ok(TimingIndicator {
            has_clustering,
            cluster_count: clustering.cluster_count,
            coordination_score: round6(coordination_score),
            clustered_sessions: clustered,
            time_span_hours: round6((max - min) / 3600.0),
            error: None,
        })
    }

    fn geographic_signal(&self, extraction: &Extraction) -> GeographicIndicator {
        let total_ips = extraction.sessions_per_ip.len();
        if total_ips == 0 {
            return GeographicIndicator::default();
        }

        let country_ratio = (extraction.countries.len() as f64 / total_ips as f64).min(1.0);
        let asn_ratio = (extraction.asns.len() as f64 / total_ips as f64).min(1.0);
        let diversity_score = (country_ratio + asn_ratio) / 2.0;

        GeographicIndicator {
            unique_countries: extraction.countries.len(),
            unique_asns: extraction.asns.len(),
            country_ratio: round6(country_ratio),
            asn_ratio: round6(asn_ratio),
            diversity_score,
            is_diverse: diversity_score >= self.config.geographic_diversity_threshold,
        }
    }
}

fn behavioral_signal(extraction: &Extraction) -> BehavioralIndicator {
    let variance = population_variance(&extraction.durations);
    let duration_consistency = if variance == 0.0 {
        1.0
    } else {
        1.0 / (1.0 + variance)
    };

    BehavioralIndicator {
        avg_session_duration: round6(mean(&extraction.durations)),
        duration_variance: round6(variance),
        duration_consistency: round6(duration_consistency),
        avg_commands_per_session: round6(mean(&extraction.command_counts)),
    }
}

/// Convenience entry point mirroring [`SnowshoeDetector::detect`].
pub fn detect_snowshoe(
    sessions: &[Session],
    window_hours: u32,
    config: SnowshoeConfig,
) -> SnowshoeResult {
    SnowshoeDetector::new(config).detect(sessions, window_hours)
}

/// Addresses that can never be a remote attacker.
fn is_reserved(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_unspecified()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_multicast()
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// RFC 1918 and IPv6 unique-local ranges.
fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}
