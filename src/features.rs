//! Population-level feature aggregation.
//!
//! Combines many sessions into a flat feature set used by reporting. Missing
//! or malformed enrichment always degrades to the neutral value for the
//! affected feature.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ProviderClassifier;
use crate::session::Session;
use crate::stats::{max_pairwise_distance_km, mean, normalized_entropy};

/// Aggregated features for a session population.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PopulationFeatures {
    pub session_count: usize,
    pub unique_ip_count: usize,
    pub avg_sessions_per_ip: f64,
    pub geographic_spread_km: f64,
    pub password_entropy: f64,
    pub username_entropy: f64,
    pub command_entropy: f64,
    pub cloud_provider_ratio: f64,
    pub vpn_provider_ratio: f64,
    pub tor_exit_ratio: f64,
    pub avg_reputation: f64,
    pub total_commands: usize,
    pub unique_commands: usize,
    pub command_diversity: f64,
}

impl PopulationFeatures {
    /// Flat name → value view, in stable key order.
    pub fn to_feature_map(&self) -> BTreeMap<&'static str, f64> {
        BTreeMap::from([
            ("session_count", self.session_count as f64),
            ("unique_ip_count", self.unique_ip_count as f64),
            ("avg_sessions_per_ip", self.avg_sessions_per_ip),
            ("geographic_spread_km", self.geographic_spread_km),
            ("password_entropy", self.password_entropy),
            ("username_entropy", self.username_entropy),
            ("command_entropy", self.command_entropy),
            ("cloud_provider_ratio", self.cloud_provider_ratio),
            ("vpn_provider_ratio", self.vpn_provider_ratio),
            ("tor_exit_ratio", self.tor_exit_ratio),
            ("avg_reputation", self.avg_reputation),
            ("total_commands", self.total_commands as f64),
            ("unique_commands", self.unique_commands as f64),
            ("command_diversity", self.command_diversity),
        ])
    }
}

/// Aggregates features relative to the current time.
pub fn aggregate_features(
    sessions: &[Session],
    classifier: &ProviderClassifier,
) -> PopulationFeatures {
    aggregate_features_at(sessions, classifier, Utc::now())
}

/// Aggregates features with classifier age computed relative to `now`.
pub fn aggregate_features_at(
    sessions: &[Session],
    classifier: &ProviderClassifier,
    now: DateTime<Utc>,
) -> PopulationFeatures {
    if sessions.is_empty() {
        return PopulationFeatures::default();
    }

    let mut sessions_per_ip: HashMap<&str, usize> = HashMap::new();
    for ip in sessions.iter().filter_map(Session::source_ip_text) {
        *sessions_per_ip.entry(ip.trim()).or_insert(0) += 1;
    }
    let unique_ip_count = sessions_per_ip.len();
    let sessions_with_ip: usize = sessions_per_ip.values().sum();
    let avg_sessions_per_ip = if unique_ip_count > 0 {
        sessions_with_ip as f64 / unique_ip_count as f64
    } else {
        0.0
    };

    let coordinates: Vec<_> = sessions
        .iter()
        .filter_map(|s| s.enrichment.coordinates())
        .collect();
    let geographic_spread_km = max_pairwise_distance_km(&coordinates);

    let password_entropy = normalized_entropy(
        sessions
            .iter()
            .flat_map(|s| s.passwords.iter().map(|p| Some(p.as_str()))),
    );
    let username_entropy = normalized_entropy(
        sessions
            .iter()
            .flat_map(|s| s.usernames.iter().map(|u| Some(u.as_str()))),
    );
    let command_entropy = normalized_entropy(
        sessions
            .iter()
            .flat_map(|s| s.commands.iter().map(|c| c.trim()))
            .filter(|c| !c.is_empty())
            .map(Some),
    );

    let mut cloud = 0usize;
    let mut vpn = 0usize;
    let mut tor = 0usize;
    for session in sessions {
        let features = classifier.classify_at(session, now);
        cloud += usize::from(features.is_cloud_provider);
        vpn += usize::from(features.is_vpn_provider);
        tor += usize::from(features.is_tor_exit);
    }
    let n = sessions.len() as f64;

    let reputations: Vec<f64> = sessions
        .iter()
        .filter_map(|s| s.enrichment.attack_count())
        .map(|c| c as f64)
        .collect();

    let commands: Vec<&str> = sessions
        .iter()
        .flat_map(|s| s.commands.iter().map(|c| c.trim()))
        .filter(|c| !c.is_empty())
        .collect();
    let total_commands = commands.len();
    let unique_commands = commands.iter().collect::<HashSet<_>>().len();
    let command_diversity = if total_commands > 0 {
        unique_commands as f64 / total_commands as f64
    } else {
        0.0
    };

    PopulationFeatures {
        session_count: sessions.len(),
        unique_ip_count,
        avg_sessions_per_ip,
        geographic_spread_km,
        password_entropy,
        username_entropy,
        command_entropy,
        cloud_provider_ratio: cloud as f64 / n,
        vpn_provider_ratio: vpn as f64 / n,
        tor_exit_ratio: tor as f64 / n,
        avg_reputation: mean(&reputations),
        total_commands,
        unique_commands,
        command_diversity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::Enrichment;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn session(id: &str, ip: &str, enrichment: serde_json::Value) -> Session {
        Session {
            source_ip: Some(ip.to_string()),
            enrichment: Enrichment::from_value(&enrichment),
            ..Session::new(id)
        }
    }

    #[test]
    fn test_empty_population() {
        let f = aggregate_features_at(&[], &ProviderClassifier::default(), now());
        assert_eq!(f, PopulationFeatures::default());
    }

    #[test]
    fn test_ip_and_geography() {
        let sessions = vec![
            session("a", "45.1.1.1", json!({"geo": {"latitude": 40.7128, "longitude": -74.0060}})),
            session("b", "45.1.1.1", json!({"geo": {"latitude": 51.5074, "longitude": -0.1278}})),
            session("c", "45.1.1.2", json!({"geo": {"latitude": "bad"}})),
            session("d", "45.1.1.3", json!(null)),
        ];
        let f = aggregate_features_at(&sessions, &ProviderClassifier::default(), now());
        assert_eq!(f.session_count, 4);
        assert_eq!(f.unique_ip_count, 3);
        assert!((f.avg_sessions_per_ip - 4.0 / 3.0).abs() < 1e-12);
        assert!((5520.0..=5620.0).contains(&f.geographic_spread_km));
    }

    #[test]
    fn test_single_coordinate_has_zero_spread() {
        let sessions = vec![session(
            "a",
            "45.1.1.1",
            json!({"geo": {"latitude": 10.0, "longitude": 10.0}}),
        )];
        let f = aggregate_features_at(&sessions, &ProviderClassifier::default(), now());
        assert_eq!(f.geographic_spread_km, 0.0);
    }

    #[test]
    fn test_entropy_and_commands() {
        let mut a = session("a", "45.1.1.1", json!({}));
        a.usernames = vec!["root".into(), "root".into()];
        a.passwords = vec!["123456".into(), "admin".into()];
        a.commands = vec!["uname -a".into(), "ls".into()];
        let mut b = session("b", "45.1.1.2", json!({}));
        b.usernames = vec!["root".into()];
        b.passwords = vec!["password".into()];
        b.commands = vec!["uname -a".into(), "  ".into()];

        let f = aggregate_features_at(&[a, b], &ProviderClassifier::default(), now());
        assert_eq!(f.username_entropy, 0.0);
        assert_eq!(f.password_entropy, 1.0);
        assert_eq!(f.total_commands, 3);
        assert_eq!(f.unique_commands, 2);
        assert!((f.command_diversity - 2.0 / 3.0).abs() < 1e-12);
        assert!(f.command_entropy > 0.0 && f.command_entropy < 1.0);
    }

    #[test]
    fn test_infrastructure_ratios_and_reputation() {
        let sessions = vec![
            session("a", "45.1.1.1", json!({"dshield": {"ip": {"asname": "DIGITALOCEAN", "attacks": 10}}})),
            session("b", "45.1.1.2", json!({"spur": {"infrastructure": "TOR"}})),
            session("c", "45.1.1.3", json!({"spur": {"infrastructure": "VPN"}, "dshield": {"ip": {"attacks": 30}}})),
            session("d", "45.1.1.4", json!({"dshield": "garbage"})),
        ];
        let f = aggregate_features_at(&sessions, &ProviderClassifier::default(), now());
        assert_eq!(f.cloud_provider_ratio, 0.25);
        assert_eq!(f.tor_exit_ratio, 0.25);
        assert_eq!(f.vpn_provider_ratio, 0.25);
        assert_eq!(f.avg_reputation, 20.0);
    }

    #[test]
    fn test_feature_map_keys() {
        let map = PopulationFeatures::default().to_feature_map();
        assert_eq!(map.len(), 14);
        assert!(map.contains_key("geographic_spread_km"));
        assert!(map.values().all(|v| *v == 0.0));
    }
}
