//! Export Module
//!
//! Renders detection results as text, JSON or JSON Lines for the CLI and for
//! integration with other security tools. JSON output is the result object
//! itself; JSON Lines emits a summary line followed by one line per finding.

use serde::Serialize;
use serde_json::json;

use crate::features::PopulationFeatures;
use crate::longtail::LongtailAnalysisResult;
use crate::snowshoe::SnowshoeResult;
use crate::store::AnalysisCheckpoint;

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonLines, // One JSON object per line (JSONL)
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "jsonl" | "jsonlines" => Ok(Self::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::JsonLines => write!(f, "jsonl"),
        }
    }
}

fn to_json_pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

fn to_json_line<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

// ==================== Snowshoe ====================

/// Exports a snowshoe result in the specified format
pub fn export_snowshoe(result: &SnowshoeResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => snowshoe_text(result),
        OutputFormat::Json => to_json_pretty(result),
        OutputFormat::JsonLines => snowshoe_jsonl(result),
    }
}

fn snowshoe_jsonl(result: &SnowshoeResult) -> String {
    let mut lines = Vec::new();

    let summary = json!({
        "type": "snowshoe_summary",
        "is_likely_snowshoe": result.is_likely_snowshoe,
        "confidence_score": result.confidence_score,
        "recommendation": result.recommendation,
        "coordinated_timing": result.coordinated_timing,
        "geographic_spread": result.geographic_spread,
        "unique_ips": result.analysis_metadata.unique_ips,
        "error": result.error,
    });
    lines.extend(to_json_line(&summary));

    for ip in &result.single_attempt_ips {
        lines.extend(to_json_line(&json!({"type": "single_attempt_ip", "ip": ip})));
    }

    lines.join("\n")
}

fn snowshoe_text(result: &SnowshoeResult) -> String {
    let mut output = String::new();
    let meta = &result.analysis_metadata;
    let ind = &result.indicators;

    output.push_str(&format!(
        "--- Snowshoe Analysis ---\nWindow: {}h\nSessions: {} ({} analyzed, {} rejected)\nUnique IPs: {}\n",
        meta.window_hours,
        meta.total_sessions,
        meta.analyzed_sessions,
        meta.rejected_sessions,
        meta.unique_ips
    ));

    if let Some(error) = &result.error {
        output.push_str(&format!("Error: {}\n", error));
    }

    output.push_str(&format!(
        "\n[{:8}] {}\nConfidence: {:.3}\nVerdict: {}\n",
        result.recommendation.severity(),
        result.recommendation,
        result.confidence_score,
        if result.is_likely_snowshoe {
            "likely snowshoe"
        } else {
            "not snowshoe"
        }
    ));

    if meta.insufficient_data {
        return output;
    }

    output.push_str("\nIndicators:\n");
    output.push_str(&"-".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "Volume:     single-attempt {:.1}% ({}), low-volume {:.1}% ({})\n",
        ind.volume.single_attempt_ratio * 100.0,
        ind.volume.single_attempt_ips,
        ind.volume.low_volume_ratio * 100.0,
        ind.volume.low_volume_ips
    ));
    output.push_str(&format!(
        "Timing:     {} cluster(s), coordination {:.3}{}\n",
        ind.timing.cluster_count,
        ind.timing.coordination_score,
        if ind.timing.has_clustering {
            " [coordinated]"
        } else {
            ""
        }
    ));
    output.push_str(&format!(
        "Geographic: {} countries, {} ASNs, diversity {:.3}{}\n",
        ind.geographic.unique_countries,
        ind.geographic.unique_asns,
        ind.geographic.diversity_score,
        if ind.geographic.is_diverse {
            " [diverse]"
        } else {
            ""
        }
    ));
    output.push_str(&format!(
        "Behavioral: avg duration {:.1}s, consistency {:.3}, avg commands {:.1}\n",
        ind.behavioral.avg_session_duration,
        ind.behavioral.duration_consistency,
        ind.behavioral.avg_commands_per_session
    ));

    output
}

// ==================== Longtail ====================

/// Exports a longtail result in the specified format
pub fn export_longtail(result: &LongtailAnalysisResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => longtail_text(result),
        OutputFormat::Json => to_json_pretty(result),
        OutputFormat::JsonLines => longtail_jsonl(result),
    }
}

fn longtail_jsonl(result: &LongtailAnalysisResult) -> String {
    let mut lines = Vec::new();

    let summary = json!({
        "type": "longtail_summary",
        "rare_command_count": result.rare_command_count,
        "anomalous_sequence_count": result.anomalous_sequence_count,
        "outlier_session_count": result.outlier_session_count,
        "emerging_pattern_count": result.emerging_pattern_count,
        "high_entropy_payload_count": result.high_entropy_payload_count,
        "analysis_duration_seconds": result.analysis_duration_seconds,
    });
    lines.extend(to_json_line(&summary));

    for rare in &result.rare_commands {
        lines.extend(to_json_line(&json!({"type": "rare_command", "detection": rare})));
    }
    for seq in &result.anomalous_sequences {
        lines.extend(to_json_line(&json!({"type": "anomalous_sequence", "detection": seq})));
    }
    for outlier in &result.outlier_sessions {
        lines.extend(to_json_line(&json!({"type": "outlier_session", "detection": outlier})));
    }

    lines.join("\n")
}

fn longtail_text(result: &LongtailAnalysisResult) -> String {
    let stats = &result.statistical_summary;
    let mut output = format!(
        "--- Longtail Analysis ---\nLookback: {} days\nSessions: {}\nEvents: {} ({} commands, {} unique)\nDuration: {:.3}s ({:.0} events/s)\n",
        stats.lookback_days,
        stats.sessions_analyzed,
        stats.total_events,
        stats.total_commands,
        stats.unique_commands,
        result.analysis_duration_seconds,
        stats.events_per_second
    );

    if !result.has_detections() {
        output.push_str("Detections: None\n");
        return output;
    }

    if !result.rare_commands.is_empty() {
        output.push_str(&format!("\nRare Commands ({}):\n", result.rare_command_count));
        output.push_str(&"-".repeat(60));
        output.push('\n');
        for rare in &result.rare_commands {
            output.push_str(&format!(
                "{:>6}x  {:.4}  {}  [{} session(s)]\n",
                rare.frequency,
                rare.rarity_score,
                truncate(&rare.command, 80),
                rare.session_ids.len()
            ));
        }
    }

    if !result.anomalous_sequences.is_empty() {
        output.push_str(&format!(
            "\nAnomalous Sequences ({}):\n",
            result.anomalous_sequence_count
        ));
        output.push_str(&"-".repeat(60));
        output.push('\n');
        for seq in &result.anomalous_sequences {
            output.push_str(&format!(
                "{}  [{}]\n",
                truncate(&seq.sequence, 100),
                seq.session_ids.join(", ")
            ));
        }
    }

    if !result.outlier_sessions.is_empty() {
        output.push_str(&format!(
            "\nOutlier Sessions ({}):\n",
            result.outlier_session_count
        ));
        output.push_str(&"-".repeat(60));
        output.push('\n');
        for outlier in &result.outlier_sessions {
            output.push_str(&format!(
                "{} {} | {:.0}s | {} cmds | {} logins | {} downloads\n",
                outlier.session_id,
                outlier.source_ip.as_deref().unwrap_or("-"),
                outlier.duration_seconds,
                outlier.command_count,
                outlier.login_attempt_count,
                outlier.file_download_count
            ));
        }
    }

    output
}

/// Truncates to `max` characters, marking the cut with an ellipsis.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

// ==================== Features / Checkpoints ====================

/// Exports population features in the specified format
pub fn export_features(features: &PopulationFeatures, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = String::from("--- Population Features ---\n");
            for (name, value) in features.to_feature_map() {
                output.push_str(&format!("{:<24} {:.6}\n", name, value));
            }
            output
        }
        OutputFormat::Json => to_json_pretty(features),
        OutputFormat::JsonLines => to_json_line(features).unwrap_or_default(),
    }
}

/// Exports a checkpoint (or its absence) in the specified format
pub fn export_checkpoint(checkpoint: Option<&AnalysisCheckpoint>, format: OutputFormat) -> String {
    match (format, checkpoint) {
        (OutputFormat::Text, None) => "No checkpoint recorded\n".to_string(),
        (OutputFormat::Text, Some(cp)) => format!(
            "--- Checkpoint {} ---\nWindow: {} .. {}\nSessions analyzed: {}\nVocabulary: {}\nLast analysis: {}\nUpdated: {}\n",
            cp.checkpoint_date,
            cp.window_start.format("%Y-%m-%d %H:%M:%S"),
            cp.window_end.format("%Y-%m-%d %H:%M:%S"),
            cp.sessions_analyzed,
            cp.vocabulary_hash,
            cp.last_analysis_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            cp.updated_at.format("%Y-%m-%d %H:%M:%S"),
        ),
        (OutputFormat::Json, cp) => to_json_pretty(&cp),
        (OutputFormat::JsonLines, cp) => to_json_line(&cp).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LongtailConfig;
    use crate::longtail::{analyze_longtail, RareCommand};
    use crate::snowshoe::SnowshoeDetector;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "jsonl".parse::<OutputFormat>().unwrap(),
            OutputFormat::JsonLines
        );
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Text.to_string(), "text");
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::JsonLines.to_string(), "jsonl");
    }

    #[test]
    fn test_snowshoe_exports() {
        let result = SnowshoeDetector::default().detect(&[], 24);

        let text = export_snowshoe(&result, OutputFormat::Text);
        assert!(text.contains("INSUFFICIENT DATA"));
        assert!(!text.contains("Indicators:"));

        let json: serde_json::Value =
            serde_json::from_str(&export_snowshoe(&result, OutputFormat::Json)).unwrap();
        assert_eq!(json["is_likely_snowshoe"], false);
        assert!(json["indicators"]["volume"].is_object());

        let jsonl = export_snowshoe(&result, OutputFormat::JsonLines);
        assert_eq!(jsonl.lines().count(), 1);
    }

    #[test]
    fn test_longtail_exports() {
        let mut result = analyze_longtail(&[], &[], 7, LongtailConfig::default());
        assert!(export_longtail(&result, OutputFormat::Text).contains("Detections: None"));

        result.rare_commands.push(RareCommand {
            command: "busybox tftp".to_string(),
            frequency: 1,
            rarity_score: 0.01,
            session_ids: vec!["s1".to_string()],
        });
        result.rare_command_count = 1;

        let text = export_longtail(&result, OutputFormat::Text);
        assert!(text.contains("Rare Commands (1)"));
        assert!(text.contains("busybox tftp"));

        let jsonl = export_longtail(&result, OutputFormat::JsonLines);
        let lines: Vec<&str> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        let line: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(line["type"], "rare_command");
    }

    #[test]
    fn test_features_export() {
        let text = export_features(&PopulationFeatures::default(), OutputFormat::Text);
        assert_eq!(text.lines().count(), 15);
    }

    #[test]
    fn test_checkpoint_export_missing() {
        assert_eq!(
            export_checkpoint(None, OutputFormat::Text),
            "No checkpoint recorded\n"
        );
        assert_eq!(export_checkpoint(None, OutputFormat::JsonLines), "null");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
    }
}
