//! Timestamp manipulation ("timestomping") detection.
//!
//! Each file is scored independently by summing the weights of the checks it
//! fails, capped at 1.0. A batch pass additionally looks for many files that
//! share one modification second, which points at bulk timestamp rewriting.

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::TimestampConfig;
use crate::FileEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    MissingTimestamps,
    IdenticalTimestamps,
    IllogicalOrder,
    ZeroPrecision,
    FutureTimestamp,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::MissingTimestamps => "missing_timestamps",
            AnomalyKind::IdenticalTimestamps => "identical_timestamps",
            AnomalyKind::IllogicalOrder => "illogical_order",
            AnomalyKind::ZeroPrecision => "zero_precision",
            AnomalyKind::FutureTimestamp => "future_timestamp",
        }
    }
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One manipulation indicator on a single file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub description: String,
    pub severity: Severity,
}

impl AnomalyRecord {
    fn new(kind: AnomalyKind, description: impl Into<String>, severity: Severity) -> Self {
        Self {
            kind,
            description: description.into(),
            severity,
        }
    }
}

/// Timestamps the verdict was based on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampDetail {
    pub created_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
    pub accessed_at: Option<DateTime<Utc>>,
    pub record_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileAnalysis {
    pub file_path: String,
    pub anomalies: Vec<AnomalyRecord>,
    pub confidence: f64,
    pub detail: TimestampDetail,
}

impl FileAnalysis {
    pub fn is_suspicious(&self) -> bool {
        !self.anomalies.is_empty()
    }

    pub fn has(&self, kind: AnomalyKind) -> bool {
        self.anomalies.iter().any(|a| a.kind == kind)
    }
}

/// Many files modified within the same second
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassTimestampPattern {
    pub timestamp: DateTime<Utc>,
    pub file_count: usize,
    pub sample_files: Vec<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    /// Non-directory entries analyzed
    pub total_files: usize,
    pub suspicious_files: Vec<FileAnalysis>,
    pub patterns: Vec<MassTimestampPattern>,
    /// Mean confidence over suspicious files (0 when there are none)
    pub average_confidence: f64,
    pub max_confidence: f64,
}

impl AnalysisSummary {
    pub fn suspicious_count(&self) -> usize {
        self.suspicious_files.len()
    }
}

pub struct TimestampAnalyzer {
    config: TimestampConfig,
    reference_time: Option<DateTime<Utc>>,
}

impl TimestampAnalyzer {
    pub fn new(config: TimestampConfig) -> Self {
        Self {
            config,
            reference_time: None,
        }
    }

    /// Pin "now" for the future-timestamp check
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        self.reference_time.unwrap_or_else(Utc::now)
    }

    /// Score a single entry
    pub fn analyze(&self, entry: &FileEntry) -> FileAnalysis {
        let mut analysis = FileAnalysis {
            file_path: entry.path.clone(),
            anomalies: Vec::new(),
            confidence: 0.0,
            detail: TimestampDetail {
                created_at: entry.created_at,
                modified_at: entry.modified_at,
                accessed_at: entry.accessed_at,
                record_id: entry.record_id,
            },
        };

        let (Some(created), Some(modified), Some(accessed)) =
            (entry.created_at, entry.modified_at, entry.accessed_at)
        else {
            analysis.anomalies.push(AnomalyRecord::new(
                AnomalyKind::MissingTimestamps,
                "One or more timestamps are missing",
                Severity::Low,
            ));
            return analysis;
        };

        let named = [("created", created), ("modified", modified), ("accessed", accessed)];
        let mut score = 0.0;

        let first = truncate_to_second(created);
        if named.iter().all(|(_, ts)| truncate_to_second(*ts) == first) {
            analysis.anomalies.push(AnomalyRecord::new(
                AnomalyKind::IdenticalTimestamps,
                "All timestamps are identical (possible timestomping)",
                Severity::High,
            ));
            score += self.config.identical_weight;
        }

        if created > modified {
            analysis.anomalies.push(AnomalyRecord::new(
                AnomalyKind::IllogicalOrder,
                "Created time is after modified time",
                Severity::Medium,
            ));
            score += self.config.order_weight;
        }

        if named.iter().all(|(_, ts)| ts.nanosecond() == 0) {
            analysis.anomalies.push(AnomalyRecord::new(
                AnomalyKind::ZeroPrecision,
                "All timestamps have zero sub-second precision (possible tool usage)",
                Severity::Medium,
            ));
            score += self.config.precision_weight;
        }

        let threshold = self.now() + Duration::seconds(self.config.future_tolerance_secs);
        let future: Vec<&str> = named
            .iter()
            .filter(|(_, ts)| *ts > threshold)
            .map(|(name, _)| *name)
            .collect();
        if !future.is_empty() {
            analysis.anomalies.push(AnomalyRecord::new(
                AnomalyKind::FutureTimestamp,
                format!("Timestamp(s) in the future: {}", future.join(", ")),
                Severity::High,
            ));
            score += self.config.future_weight;
        }

        analysis.confidence = f64::min(score, 1.0);
        analysis
    }

    /// Analyze every non-directory entry and look for cross-file patterns
    pub fn analyze_all(&self, entries: &[FileEntry]) -> AnalysisSummary {
        let files: Vec<&FileEntry> = entries.iter().filter(|e| !e.is_directory).collect();

        let analyses: Vec<FileAnalysis> = files.par_iter().map(|e| self.analyze(e)).collect();
        let suspicious_files: Vec<FileAnalysis> =
            analyses.into_iter().filter(FileAnalysis::is_suspicious).collect();

        let patterns = self.find_mass_patterns(&files);

        let (average_confidence, max_confidence) = if suspicious_files.is_empty() {
            (0.0, 0.0)
        } else {
            let sum: f64 = suspicious_files.iter().map(|f| f.confidence).sum();
            let max = suspicious_files.iter().map(|f| f.confidence).fold(0.0, f64::max);
            (sum / suspicious_files.len() as f64, max)
        };

        tracing::info!(
            "Timestamp analysis: {} files, {} suspicious, {} mass patterns",
            files.len(),
            suspicious_files.len(),
            patterns.len()
        );

        AnalysisSummary {
            total_files: files.len(),
            suspicious_files,
            patterns,
            average_confidence,
            max_confidence,
        }
    }

    fn find_mass_patterns(&self, files: &[&FileEntry]) -> Vec<MassTimestampPattern> {
        let mut groups: BTreeMap<DateTime<Utc>, Vec<&str>> = BTreeMap::new();
        for entry in files {
            if let Some(modified) = entry.modified_at {
                groups
                    .entry(truncate_to_second(modified))
                    .or_default()
                    .push(entry.path.as_str());
            }
        }

        groups
            .into_iter()
            .filter(|(_, paths)| paths.len() > self.config.mass_pattern_threshold)
            .map(|(timestamp, paths)| MassTimestampPattern {
                timestamp,
                file_count: paths.len(),
                sample_files: paths
                    .iter()
                    .take(self.config.mass_pattern_samples)
                    .map(|p| p.to_string())
                    .collect(),
                description: format!("{} files have identical modification time", paths.len()),
            })
            .collect()
    }
}

impl Default for TimestampAnalyzer {
    fn default() -> Self {
        Self::new(TimestampConfig::default())
    }
}

fn truncate_to_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.duration_trunc(Duration::seconds(1)).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, ms: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap() + Duration::milliseconds(ms as i64)
    }

    fn file(path: &str, c: DateTime<Utc>, m: DateTime<Utc>, a: DateTime<Utc>) -> FileEntry {
        FileEntry {
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            path: path.to_string(),
            size: 1,
            is_directory: false,
            is_deleted: false,
            created_at: Some(c),
            modified_at: Some(m),
            accessed_at: Some(a),
            record_id: Some(32),
            parent_id: None,
            attributes: Default::default(),
            children: Vec::new(),
        }
    }

    fn analyzer() -> TimestampAnalyzer {
        TimestampAnalyzer::default().with_reference_time(at(2024, 6, 1, 12, 0, 0, 0))
    }

    #[test]
    fn test_clean_file() {
        let e = file(
            "/ok.txt",
            at(2023, 1, 1, 8, 0, 0, 120),
            at(2023, 2, 1, 8, 0, 0, 340),
            at(2023, 3, 1, 8, 0, 0, 560),
        );
        let result = analyzer().analyze(&e);
        assert!(result.anomalies.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.detail.record_id, Some(32));
    }

    #[test]
    fn test_missing_stops_analysis() {
        let old = at(2020, 1, 1, 0, 0, 0, 0);
        let mut e = file("/m", at(2030, 1, 1, 0, 0, 0, 0), old, old);
        e.accessed_at = None;
        let result = analyzer().analyze(&e);
        assert_eq!(result.anomalies.len(), 1);
        assert_eq!(result.anomalies[0].kind, AnomalyKind::MissingTimestamps);
        assert_eq!(result.anomalies[0].severity, Severity::Low);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_identical_to_the_second() {
        let e = file(
            "/same",
            at(2022, 5, 5, 10, 0, 0, 100),
            at(2022, 5, 5, 10, 0, 0, 900),
            at(2022, 5, 5, 10, 0, 0, 500),
        );
        let result = analyzer().analyze(&e);
        assert!(result.has(AnomalyKind::IdenticalTimestamps));
        assert!(!result.has(AnomalyKind::ZeroPrecision));
        assert!((result.confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_order_precision_and_future_cap() {
        // created after modified, whole seconds, and far in the future
        let e = file(
            "/bad",
            at(2031, 1, 2, 0, 0, 0, 0),
            at(2031, 1, 1, 0, 0, 0, 0),
            at(2031, 1, 3, 0, 0, 0, 0),
        );
        let result = analyzer().analyze(&e);
        let kinds: Vec<AnomalyKind> = result.anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                AnomalyKind::IllogicalOrder,
                AnomalyKind::ZeroPrecision,
                AnomalyKind::FutureTimestamp,
            ]
        );
        assert_eq!(result.confidence, 1.0);
        assert_eq!(
            result.anomalies[2].description,
            "Timestamp(s) in the future: created, modified, accessed"
        );
    }

    #[test]
    fn test_future_tolerance() {
        let now = at(2024, 6, 1, 12, 0, 0, 0);
        let soon = now + Duration::hours(23);
        let e = file("/soon", at(2024, 1, 1, 0, 0, 0, 5), at(2024, 1, 2, 0, 0, 0, 5), soon);
        assert!(!analyzer().analyze(&e).has(AnomalyKind::FutureTimestamp));

        let later = now + Duration::hours(25);
        let e = file("/later", at(2024, 1, 1, 0, 0, 0, 5), at(2024, 1, 2, 0, 0, 0, 5), later);
        assert!(analyzer().analyze(&e).has(AnomalyKind::FutureTimestamp));
    }

    #[test]
    fn test_analyze_all_skips_directories_and_aggregates() {
        let stomped = at(2020, 1, 1, 0, 0, 0, 0);
        let mut dir = file("/dir", stomped, stomped, stomped);
        dir.is_directory = true;
        let entries = vec![
            dir,
            file("/a", stomped, stomped, stomped),
            file(
                "/b",
                at(2021, 1, 1, 0, 0, 0, 1),
                at(2021, 1, 2, 0, 0, 0, 1),
                at(2021, 1, 3, 0, 0, 0, 1),
            ),
        ];
        let summary = analyzer().analyze_all(&entries);
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.suspicious_count(), 1);
        assert_eq!(summary.suspicious_files[0].file_path, "/a");
        assert!((summary.max_confidence - 0.6).abs() < 1e-9);
        assert!((summary.average_confidence - 0.6).abs() < 1e-9);
        assert!(summary.patterns.is_empty());
    }

    #[test]
    fn test_serialized_shape() {
        let same = at(2020, 1, 1, 0, 0, 0, 0);
        let e = file("/s", same, same, same);
        let value = serde_json::to_value(analyzer().analyze(&e)).unwrap();
        assert_eq!(value["anomalies"][0]["type"], "identical_timestamps");
        assert_eq!(value["anomalies"][0]["severity"], "high");
        assert!(value["detail"]["created_at"].is_string());
    }
}
