//! Infrastructure classification of session sources.
//!
//! Labels a session's source as cloud / VPN / Tor from its enrichment and
//! grades each label by how fresh the enrichment is.
//!
//! | Enrichment age      | Positive match | Negative match |
//! |---------------------|----------------|----------------|
//! | < fresh_days        | high           | medium         |
//! | fresh..=stale_days  | medium         | low            |
//! | > stale_days        | medium         | low            |
//! | no enrichment       | none           | none           |
//!
//! With `stale_as_none` set, stale enrichment always yields `none`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::session::Session;

/// Confidence attached to one infrastructure label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
    None,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Infrastructure labels for one session, computed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderFeatures {
    pub is_cloud_provider: bool,
    pub is_vpn_provider: bool,
    pub is_tor_exit: bool,
    pub cloud_confidence: Confidence,
    pub vpn_confidence: Confidence,
    pub tor_confidence: Confidence,
    pub provider_name: Option<String>,
    pub enrichment_age_days: Option<f64>,
}

impl ProviderFeatures {
    /// Result for a session without any enrichment.
    pub fn unenriched() -> Self {
        Self {
            is_cloud_provider: false,
            is_vpn_provider: false,
            is_tor_exit: false,
            cloud_confidence: Confidence::None,
            vpn_confidence: Confidence::None,
            tor_confidence: Confidence::None,
            provider_name: None,
            enrichment_age_days: None,
        }
    }
}

/// Stateless classifier over session enrichment.
#[derive(Debug, Clone)]
pub struct ProviderClassifier {
    cloud_keywords: Vec<String>,
    fresh_days: f64,
    stale_days: f64,
    stale_as_none: bool,
}

impl ProviderClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            cloud_keywords: config
                .cloud_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            fresh_days: config.fresh_days,
            stale_days: config.stale_days,
            stale_as_none: config.stale_as_none,
        }
    }

    /// Classifies a session relative to the current time.
    pub fn classify(&self, session: &Session) -> ProviderFeatures {
        self.classify_at(session, Utc::now())
    }

    /// Classifies a session relative to `now`.
    pub fn classify_at(&self, session: &Session, now: DateTime<Utc>) -> ProviderFeatures {
        let enrichment = &session.enrichment;
        if enrichment.is_empty() {
            return ProviderFeatures::unenriched();
        }

        let age_days = enrichment_age_days(session, now);
        let descriptions = enrichment.asn_descriptions();

        let cloud_match = descriptions
            .iter()
            .find(|desc| self.matches_cloud_keyword(desc))
            .map(|desc| desc.to_string());

        let infrastructure = enrichment.infrastructure().map(str::to_uppercase);
        let tunnel_is_tor = |kind: Option<&str>| {
            kind.map(|k| k.eq_ignore_ascii_case("TOR"))
                .unwrap_or(false)
        };

        let is_tor = infrastructure.as_deref() == Some("TOR")
            || enrichment
                .tunnels()
                .iter()
                .any(|t| tunnel_is_tor(t.kind.as_deref()));
        let is_vpn = infrastructure.as_deref() == Some("VPN")
            || enrichment
                .tunnels()
                .iter()
                .any(|t| t.operator.is_some() && !tunnel_is_tor(t.kind.as_deref()));
        let is_cloud = cloud_match.is_some();

        let provider_name = cloud_match
            .or_else(|| enrichment.tunnel_operator().map(str::to_string))
            .or_else(|| descriptions.first().map(|d| d.to_string()));

        ProviderFeatures {
            is_cloud_provider: is_cloud,
            is_vpn_provider: is_vpn,
            is_tor_exit: is_tor,
            cloud_confidence: self.confidence(age_days, is_cloud),
            vpn_confidence: self.confidence(age_days, is_vpn),
            tor_confidence: self.confidence(age_days, is_tor),
            provider_name,
            enrichment_age_days: Some(age_days),
        }
    }

    fn matches_cloud_keyword(&self, description: &str) -> bool {
        let lowered = description.to_lowercase();
        self.cloud_keywords.iter().any(|k| lowered.contains(k))
    }

    /// Confidence as a function of enrichment age and match outcome.
    pub fn confidence(&self, age_days: f64, positive: bool) -> Confidence {
        let stale = age_days > self.stale_days;
        if stale && self.stale_as_none {
            return Confidence::None;
        }

        match (age_days < self.fresh_days, positive) {
            (true, true) => Confidence::High,
            (true, false) => Confidence::Medium,
            (false, true) => Confidence::Medium,
            (false, false) => Confidence::Low,
        }
    }
}

impl Default for ProviderClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}

/// Days since enrichment. Falls back to the session's own timestamps when the
/// enrichment carries none; enrichment of unknown age counts as fresh.
fn enrichment_age_days(session: &Session, now: DateTime<Utc>) -> f64 {
    let reference = session
        .enrichment
        .enriched_at()
        .or(session.last_event_at)
        .or(session.first_event_at);

    reference
        .map(|at| now.signed_duration_since(at).num_seconds().max(0) as f64 / 86_400.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::Enrichment;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn session_with(mut enrichment: serde_json::Value, age_days: i64) -> Session {
        let enriched_at = now() - Duration::days(age_days);
        if let Some(map) = enrichment.as_object_mut() {
            map.insert("enriched_at".to_string(), json!(enriched_at.to_rfc3339()));
        }
        let mut s = Session::new("s1");
        s.enrichment = Enrichment::from_value(&enrichment);
        s
    }

    #[test]
    fn test_no_enrichment_is_none() {
        let classifier = ProviderClassifier::default();
        let features = classifier.classify_at(&Session::new("s"), now());
        assert_eq!(features, ProviderFeatures::unenriched());
    }

    #[test]
    fn test_cloud_keyword_case_insensitive() {
        let classifier = ProviderClassifier::default();
        let s = session_with(json!({"dshield": {"ip": {"asname": "AMAZON-02"}}}), 5);
        let f = classifier.classify_at(&s, now());
        assert!(f.is_cloud_provider);
        assert_eq!(f.cloud_confidence, Confidence::High);
        assert_eq!(f.provider_name.as_deref(), Some("AMAZON-02"));
        assert!(!f.is_vpn_provider);
        assert_eq!(f.vpn_confidence, Confidence::Medium);
    }

    #[test]
    fn test_vpn_and_tor_tags() {
        let classifier = ProviderClassifier::default();

        let vpn = session_with(json!({"spur": {"infrastructure": "vpn"}}), 1);
        let f = classifier.classify_at(&vpn, now());
        assert!(f.is_vpn_provider);
        assert!(!f.is_tor_exit);

        let tunnel = session_with(
            json!({"spur": {"tunnels": [{"operator": "MULLVAD_VPN", "type": "VPN"}]}}),
            1,
        );
        let f = classifier.classify_at(&tunnel, now());
        assert!(f.is_vpn_provider);
        assert_eq!(f.provider_name.as_deref(), Some("MULLVAD_VPN"));

        let tor = session_with(json!({"spur": {"infrastructure": "TOR"}}), 1);
        let f = classifier.classify_at(&tor, now());
        assert!(f.is_tor_exit);
        assert!(!f.is_vpn_provider);
        assert_eq!(f.tor_confidence, Confidence::High);
    }

    #[test]
    fn test_confidence_decay() {
        let classifier = ProviderClassifier::default();
        assert_eq!(classifier.confidence(10.0, true), Confidence::High);
        assert_eq!(classifier.confidence(10.0, false), Confidence::Medium);
        assert_eq!(classifier.confidence(100.0, true), Confidence::Medium);
        assert_eq!(classifier.confidence(100.0, false), Confidence::Low);
        assert_eq!(classifier.confidence(365.0, false), Confidence::Low);
        assert_eq!(classifier.confidence(400.0, true), Confidence::Medium);
        assert_eq!(classifier.confidence(400.0, false), Confidence::Low);
    }

    #[test]
    fn test_stale_as_none() {
        let classifier = ProviderClassifier::new(&ClassifierConfig {
            stale_as_none: true,
            ..Default::default()
        });
        assert_eq!(classifier.confidence(400.0, true), Confidence::None);
        assert_eq!(classifier.confidence(100.0, true), Confidence::Medium);

        let s = session_with(json!({"dshield": {"ip": {"asname": "Google LLC"}}}), 500);
        let f = classifier.classify_at(&s, now());
        assert!(f.is_cloud_provider);
        assert_eq!(f.cloud_confidence, Confidence::None);
        assert_eq!(f.enrichment_age_days, Some(500.0));
    }

    #[test]
    fn test_classify_is_pure() {
        let classifier = ProviderClassifier::default();
        let s = session_with(json!({"spur": {"infrastructure": "DATACENTER",
                                             "as": {"organization": "Hetzner Online GmbH"}}}), 40);
        assert_eq!(classifier.classify_at(&s, now()), classifier.classify_at(&s, now()));
    }
}
