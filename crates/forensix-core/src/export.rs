//! Flat CSV and JSON exports for every record type.
//!
//! CSV output always has a header row and every field is double-quoted.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::io::{self, Write};

use crate::analysis::FileAnalysis;
use crate::error::{ForensicsError, Result};
use crate::integrity::HashRecord;
use crate::{CarvedFile, FileEntry};

/// A record type with a fixed CSV layout
pub trait CsvRecord {
    fn header() -> &'static [&'static str];
    fn fields(&self) -> Vec<String>;
}

fn timestamp(ts: Option<&DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_csv<T: CsvRecord, W: Write>(records: &[T], writer: W) -> io::Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(writer);
    csv.write_record(T::header()).map_err(io::Error::from)?;
    for record in records {
        csv.write_record(record.fields()).map_err(io::Error::from)?;
    }
    csv.flush()
}

/// Pretty-printed JSON array
pub fn write_json<T: Serialize, W: Write>(records: &[T], mut writer: W) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, records)
        .map_err(|e| ForensicsError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    writeln!(writer)?;
    Ok(())
}

impl CsvRecord for HashRecord {
    fn header() -> &'static [&'static str] {
        &[
            "File Path",
            "Source Type",
            "File Size",
            "MD5",
            "SHA1",
            "SHA256",
            "SHA512",
            "Calculated At",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.file_path.clone(),
            self.source_type.to_string(),
            self.size.to_string(),
            opt(self.md5.as_deref()),
            opt(self.sha1.as_deref()),
            opt(self.sha256.as_deref()),
            opt(self.sha512.as_deref()),
            timestamp(Some(&self.calculated_at)),
        ]
    }
}

impl CsvRecord for CarvedFile {
    fn header() -> &'static [&'static str] {
        &[
            "Filename",
            "Path",
            "Type",
            "Size",
            "Offset",
            "Footer Found",
            "Content Hash",
            "Created At",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.filename.clone(),
            self.path.display().to_string(),
            self.file_type.clone(),
            self.size.to_string(),
            self.offset.to_string(),
            self.footer_found.to_string(),
            self.content_hash.clone(),
            timestamp(Some(&self.created_at)),
        ]
    }
}

impl CsvRecord for FileEntry {
    fn header() -> &'static [&'static str] {
        &[
            "Name",
            "Path",
            "Size",
            "Is Directory",
            "Is Deleted",
            "Created",
            "Modified",
            "Accessed",
            "Record ID",
            "Parent ID",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.path.clone(),
            self.size.to_string(),
            self.is_directory.to_string(),
            self.is_deleted.to_string(),
            timestamp(self.created_at.as_ref()),
            timestamp(self.modified_at.as_ref()),
            timestamp(self.accessed_at.as_ref()),
            opt(self.record_id),
            opt(self.parent_id),
        ]
    }
}

impl CsvRecord for FileAnalysis {
    fn header() -> &'static [&'static str] {
        &[
            "File Path",
            "Confidence",
            "Anomalies",
            "Severities",
            "Created",
            "Modified",
            "Accessed",
            "Record ID",
        ]
    }

    fn fields(&self) -> Vec<String> {
        let kinds: Vec<&str> = self.anomalies.iter().map(|a| a.kind.as_str()).collect();
        let severities: Vec<&str> = self.anomalies.iter().map(|a| a.severity.as_str()).collect();
        vec![
            self.file_path.clone(),
            format!("{:.2}", self.confidence),
            kinds.join(";"),
            severities.join(";"),
            timestamp(self.detail.created_at.as_ref()),
            timestamp(self.detail.modified_at.as_ref()),
            timestamp(self.detail.accessed_at.as_ref()),
            opt(self.detail.record_id),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn entry(name: &str) -> FileEntry {
        FileEntry {
            name: name.to_string(),
            path: format!("/{}", name),
            size: 10,
            is_directory: false,
            is_deleted: true,
            created_at: Some(Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()),
            modified_at: None,
            accessed_at: None,
            record_id: Some(4096),
            parent_id: None,
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    fn to_csv<T: CsvRecord>(records: &[T]) -> String {
        let mut out = Vec::new();
        write_csv(records, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_quoting() {
        let mut rec = entry("x");
        rec.name = "say \"hi\", ok".to_string();
        let csv = to_csv(&[rec]);
        assert!(csv.lines().nth(1).unwrap().starts_with("\"say \"\"hi\"\", ok\",\"/x\""));
    }

    #[test]
    fn test_file_entry_csv() {
        let csv = to_csv(&[entry("a,b.txt")]);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("\"Name\",\"Path\""));
        assert_eq!(
            lines[1],
            concat!(
                "\"a,b.txt\",\"/a,b.txt\",\"10\",\"false\",\"true\",",
                "\"2021-03-04T05:06:07.000Z\",\"\",\"\",\"4096\",\"\""
            )
        );
    }

    #[test]
    fn test_json_array_shape() {
        let mut out = Vec::new();
        write_json(&[entry("x")], &mut out).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let obj = &value.as_array().unwrap()[0];
        assert_eq!(obj["record_id"], 4096);
        assert!(obj["modified_at"].is_null());
        // Empty attribute bag and children are omitted
        assert!(obj.get("attributes").is_none());
        assert!(obj.get("children").is_none());
    }

    #[test]
    fn test_carved_file_serialized_type_field() {
        let carved = CarvedFile {
            filename: "carved_1.jpg".into(),
            path: PathBuf::from("/out/carved_1.jpg"),
            file_type: "jpg".into(),
            size: 1005,
            offset: 0,
            footer_found: true,
            content_hash: "abc".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&carved).unwrap();
        assert_eq!(value["type"], "jpg");
        assert!(to_csv(&[carved]).contains("\"1005\",\"0\",\"true\""));
    }
}
