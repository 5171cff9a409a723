//! Timestamp anomaly analysis over walked file systems

use chrono::{DateTime, Duration, TimeZone, Utc};
use forensix_core::fs::walk;
use forensix_core::image::SyntheticImage;
use forensix_core::{AnomalyKind, EvidenceImage, FileEntry, Severity, TimestampAnalyzer};
use std::collections::BTreeMap;
use std::sync::Arc;

fn entry(
    path: &str,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    accessed: DateTime<Utc>,
) -> FileEntry {
    FileEntry {
        name: path.trim_start_matches('/').to_string(),
        path: path.to_string(),
        size: 0,
        is_directory: false,
        is_deleted: false,
        created_at: Some(created),
        modified_at: Some(modified),
        accessed_at: Some(accessed),
        record_id: None,
        parent_id: None,
        attributes: BTreeMap::new(),
        children: Vec::new(),
    }
}

/// `count` files sharing one modification second, each with distinct sub-second noise
fn batch_touched(count: usize) -> Vec<FileEntry> {
    let base = Utc.with_ymd_and_hms(2022, 6, 1, 12, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let jitter = Duration::milliseconds(10 * (i as i64 + 1));
            entry(
                &format!("/f{}", i),
                base - Duration::days(30) + jitter,
                base + jitter,
                base + Duration::hours(1) + jitter,
            )
        })
        .collect()
}

#[test]
fn test_mass_pattern_above_threshold() {
    let summary = TimestampAnalyzer::default().analyze_all(&batch_touched(5));
    assert_eq!(summary.patterns.len(), 1);

    let pattern = &summary.patterns[0];
    assert_eq!(pattern.file_count, 5);
    assert_eq!(pattern.sample_files.len(), 5);
    assert_eq!(pattern.timestamp, Utc.with_ymd_and_hms(2022, 6, 1, 12, 0, 0).unwrap());
    assert!(pattern.description.contains('5'));
    assert_eq!(summary.suspicious_count(), 0);
}

#[test]
fn test_mass_pattern_samples_are_capped() {
    let summary = TimestampAnalyzer::default().analyze_all(&batch_touched(8));
    assert_eq!(summary.patterns[0].file_count, 8);
    assert_eq!(summary.patterns[0].sample_files.len(), 5);
}

#[test]
fn test_no_mass_pattern_at_or_below_threshold() {
    assert!(TimestampAnalyzer::default().analyze_all(&batch_touched(3)).patterns.is_empty());
}

#[test]
fn test_identical_timestamps_score() {
    let t = Utc.with_ymd_and_hms(2019, 3, 3, 3, 3, 3).unwrap() + Duration::milliseconds(250);
    let analysis = TimestampAnalyzer::default().analyze(&entry("/stomped", t, t, t));

    assert!(analysis.has(AnomalyKind::IdenticalTimestamps));
    assert!(!analysis.has(AnomalyKind::ZeroPrecision));
    assert!(analysis.confidence >= 0.4);
    assert!(analysis
        .anomalies
        .iter()
        .any(|a| a.kind == AnomalyKind::IdenticalTimestamps && a.severity == Severity::High));
}

#[test]
fn test_synthetic_image_flags_planted_files() {
    let image = EvidenceImage::from_backend(Arc::new(SyntheticImage::new()), "synthetic");
    let fs = image.open_file_system(0).unwrap();
    let entries: Vec<FileEntry> = walk(fs.as_ref()).collect();

    let reference = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let analyzer = TimestampAnalyzer::default().with_reference_time(reference);
    let summary = analyzer.analyze_all(&entries);

    let flagged: Vec<&str> =
        summary.suspicious_files.iter().map(|f| f.file_path.as_str()).collect();
    assert!(flagged.contains(&"/Pictures/holiday.jpg"));
    assert!(flagged.contains(&"/Pictures/backup.zip"));

    let zip = summary
        .suspicious_files
        .iter()
        .find(|f| f.file_path == "/Pictures/backup.zip")
        .unwrap();
    assert!(zip.has(AnomalyKind::IllogicalOrder));
    assert!(summary.max_confidence <= 1.0);
}
