//! Evidence analysis passes over walker output

pub mod timestamps;

pub use timestamps::{
    AnalysisSummary, AnomalyKind, AnomalyRecord, FileAnalysis, MassTimestampPattern, Severity,
    TimestampAnalyzer, TimestampDetail,
};
