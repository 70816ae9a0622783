//! CyberLab Common Library
//!
//! Shared types and utilities for the CyberLab machine catalog.

pub mod error;
pub mod format;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use format::format_size;
pub use types::{Difficulty, MachineRecord, WriteupRecord};

/// CyberLab version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder size shown while a record's archive has not been resolved yet.
pub const SIZE_PENDING: &str = "Calculando...";

/// Placeholder size shown when a record has no resolvable archive.
pub const SIZE_UNAVAILABLE: &str = "No disponible";
