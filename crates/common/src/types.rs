//! Core types for CyberLab

use serde::{Deserialize, Serialize};

/// Machine difficulty rating, serialized with the Spanish labels the
/// catalog has always used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    #[serde(rename = "Fácil")]
    Facil,
    #[serde(rename = "Intermedio")]
    Intermedio,
    #[serde(rename = "Avanzado")]
    Avanzado,
}

impl Difficulty {
    /// Parse a difficulty label from form input. Accepts the accented
    /// spelling as well as a plain-ASCII fallback, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fácil" | "facil" => Some(Difficulty::Facil),
            "intermedio" => Some(Difficulty::Intermedio),
            "avanzado" => Some(Difficulty::Avanzado),
            _ => None,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Facil => write!(f, "Fácil"),
            Difficulty::Intermedio => write!(f, "Intermedio"),
            Difficulty::Avanzado => write!(f, "Avanzado"),
        }
    }
}

/// A published solution guide attached to a machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteupRecord {
    /// Wall-clock epoch milliseconds at creation. Not guaranteed unique
    /// under rapid succession.
    pub id: i64,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    pub added_by: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
}

impl WriteupRecord {
    pub fn new(title: String, url: String, description: Option<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: now.timestamp_millis(),
            title,
            url,
            description,
            added_by: "admin".to_string(),
            created_at: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

/// A catalog entry for one downloadable vulnerable machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRecord {
    pub id: u64,
    /// Also the archive's base filename.
    pub name: String,
    pub difficulty: Difficulty,
    pub description: String,
    /// Human-readable size, or a placeholder pending resolution.
    pub size: String,
    /// Insertion order preserved, duplicates allowed.
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub writeups: Vec<WriteupRecord>,

    /// Transient cache of the last archive resolution. Never exposed
    /// at the HTTP boundary.
    #[serde(skip)]
    pub file_exists: bool,
    #[serde(skip)]
    pub file_path: Option<std::path::PathBuf>,
}

impl MachineRecord {
    pub fn new(
        id: u64,
        name: String,
        difficulty: Difficulty,
        description: String,
        size: String,
        tags: Vec<String>,
    ) -> Self {
        Self {
            id,
            name,
            difficulty,
            description,
            size,
            tags,
            completed: false,
            starred: false,
            writeups: Vec::new(),
            file_exists: false,
            file_path: None,
        }
    }
}
