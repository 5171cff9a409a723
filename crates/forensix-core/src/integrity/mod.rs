//! Integrity hashing, verification and the persistent hash store

pub mod hashing;
pub mod service;
pub mod store;

pub use hashing::{hash_bytes, hash_file, Digests, HashAlgorithm, MultiHasher};
pub use service::{BatchItem, BatchOutcome, Comparison, ComparisonStatus, HashInput, HashService};
pub use store::{HashRecord, HashStore, SourceType};
