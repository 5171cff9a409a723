//! Signature carving: recover files from raw image bytes by header and footer

pub mod engine;
pub mod signatures;
pub mod validate;

pub use engine::{carve_path, CarveMode, CarveOutcome, FileCarver};
pub use signatures::{identify, supported_types, FileSignature};
pub use validate::{StructureCheck, ValidationFailure};
