//! In-memory machine catalog
//!
//! The repository is the single source of truth for machine records. It
//! is memory-only by design: the catalog reseeds on every process start
//! and mutations do not survive a restart.

use std::path::PathBuf;

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use cyberlab_common::{
    format_size, Difficulty, Error, MachineRecord, Result, WriteupRecord, SIZE_UNAVAILABLE,
};

use crate::store::{sanitize_name, ArchiveStore, Resolution};

// ============================================================================
// Request types
// ============================================================================

/// Tags arrive either as a comma-separated string (form posts) or as an
/// already-split list (JSON clients). Both are accepted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagsField {
    List(Vec<String>),
    Csv(String),
}

impl TagsField {
    pub fn into_tags(self) -> Vec<String> {
        match self {
            TagsField::List(tags) => tags.into_iter().map(|t| t.trim().to_string()).collect(),
            TagsField::Csv(s) => split_tags(&s),
        }
    }
}

/// Split a comma-separated tag string, trimming entries and dropping
/// empties. Duplicates are kept.
pub fn split_tags(s: &str) -> Vec<String> {
    s.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Metadata fields of an upload request.
#[derive(Debug, Clone, Default)]
pub struct UploadFields {
    pub name: String,
    pub description: String,
    pub difficulty: String,
    pub tags: String,
}

/// An upload already streamed to disk under a staging name, waiting for
/// field validation before it is adopted into the store.
#[derive(Debug)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub extension: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateMachineRequest {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub tags: Option<TagsField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddWriteupRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ============================================================================
// Repository
// ============================================================================

/// Ordered machine records plus a dedicated monotonic id counter. Ids
/// are never recomputed from current contents, so deleting the highest
/// record cannot lead to id reuse within a process lifetime.
#[derive(Debug)]
pub struct CatalogRepository {
    machines: Vec<MachineRecord>,
    next_id: u64,
}

impl CatalogRepository {
    pub fn new() -> Self {
        Self {
            machines: Vec::new(),
            next_id: 1,
        }
    }

    /// Repository pre-populated with the built-in lab catalog.
    pub fn with_seed() -> Self {
        let machines = seed_machines();
        let next_id = machines.iter().map(|m| m.id).max().unwrap_or(0) + 1;
        Self { machines, next_id }
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Snapshot of the full catalog, insertion order.
    pub fn list(&self) -> Vec<MachineRecord> {
        self.machines.clone()
    }

    pub fn find(&self, id: u64) -> Option<&MachineRecord> {
        self.machines.iter().find(|m| m.id == id)
    }

    /// Append a new record with the next id.
    pub fn create(
        &mut self,
        name: String,
        difficulty: Difficulty,
        description: String,
        size: String,
        tags: Vec<String>,
    ) -> MachineRecord {
        let id = self.next_id;
        self.next_id += 1;

        let record = MachineRecord::new(id, name, difficulty, description, size, tags);
        self.machines.push(record.clone());
        record
    }

    /// Merge the present fields of a patch into an existing record.
    pub fn update(&mut self, id: u64, patch: UpdateMachineRequest) -> Result<MachineRecord> {
        let machine = self
            .machines
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::machine_not_found(id))?;

        if let Some(description) = patch.description {
            machine.description = description;
        }
        if let Some(difficulty) = patch.difficulty {
            machine.difficulty = Difficulty::parse(&difficulty)
                .ok_or_else(|| Error::Validation(format!("invalid difficulty: {}", difficulty)))?;
        }
        if let Some(tags) = patch.tags {
            machine.tags = tags.into_tags();
        }

        Ok(machine.clone())
    }

    pub fn remove(&mut self, id: u64) -> Result<MachineRecord> {
        let index = self
            .machines
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| Error::machine_not_found(id))?;
        Ok(self.machines.remove(index))
    }

    pub fn add_writeup(&mut self, id: u64, writeup: WriteupRecord) -> Result<WriteupRecord> {
        let machine = self
            .machines
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| Error::machine_not_found(id))?;
        machine.writeups.push(writeup.clone());
        Ok(writeup)
    }
}

impl Default for CatalogRepository {
    fn default() -> Self {
        Self::with_seed()
    }
}

/// The built-in catalog every process starts from.
fn seed_machines() -> Vec<MachineRecord> {
    let seed = [
        (
            1,
            "anonymouspingu",
            Difficulty::Intermedio,
            "Máquina de pentesting enfocada en técnicas de anonimato y steganografía avanzada",
            "231.2 MB",
            vec!["Steganography", "OSINT", "Network"],
            true,
            true,
        ),
        (
            2,
            "dance-samba",
            Difficulty::Facil,
            "Desafío de explotación web con temática brasileña, ideal para principiantes",
            "159.3 MB",
            vec!["Web", "SQLi", "File Upload"],
            true,
            true,
        ),
        (
            3,
            "inclusion",
            Difficulty::Intermedio,
            "Desafío de inclusión de archivos locales y remotos con escalada de privilegios",
            "187.6 MB",
            vec!["File Inclusion", "LFI", "RFI", "Linux"],
            true,
            false,
        ),
        (
            4,
            "mirame",
            Difficulty::Facil,
            "Máquina introductoria con vulnerabilidades básicas de enumeración",
            "142.8 MB",
            vec!["Beginner", "Web", "Enumeration"],
            true,
            false,
        ),
        (
            5,
            "pinguinazo",
            Difficulty::Avanzado,
            "Desafío avanzado con múltiples vectores de ataque y técnicas complejas",
            "203.1 MB",
            vec!["Advanced", "Multi-vector", "Exploitation"],
            true,
            true,
        ),
        (
            6,
            "whoiam",
            Difficulty::Intermedio,
            "Desafío de identificación de usuarios y escalada de privilegios en sistema Linux",
            "188.5 MB",
            vec!["Privilege Escalation", "Linux", "Identity"],
            true,
            false,
        ),
    ];

    seed.into_iter()
        .map(
            |(id, name, difficulty, description, size, tags, completed, starred)| {
                let mut m = MachineRecord::new(
                    id,
                    name.to_string(),
                    difficulty,
                    description.to_string(),
                    size.to_string(),
                    tags.into_iter().map(String::from).collect(),
                );
                m.completed = completed;
                m.starred = starred;
                m
            },
        )
        .collect()
}

// ============================================================================
// Service
// ============================================================================

/// Orchestrates repository operations with archive-aware side effects.
pub struct CatalogService {
    store: ArchiveStore,
    repo: RwLock<CatalogRepository>,
}

impl CatalogService {
    pub fn new(store: ArchiveStore, repo: CatalogRepository) -> Self {
        Self {
            store,
            repo: RwLock::new(repo),
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub async fn machine_count(&self) -> usize {
        self.repo.read().await.len()
    }

    /// List the catalog. With `refresh`, every record's size is
    /// recomputed from the archive store: formatted size on a hit,
    /// "No disponible" on a miss.
    pub async fn list_machines(&self, refresh: bool) -> Vec<MachineRecord> {
        if !refresh {
            return self.repo.read().await.list();
        }

        let mut repo = self.repo.write().await;
        for machine in &mut repo.machines {
            match self.store.resolve(&machine.name) {
                Resolution::Found { path, size_bytes } => {
                    machine.size = format_size(size_bytes);
                    machine.file_exists = true;
                    machine.file_path = Some(path);
                }
                Resolution::NotFound => {
                    machine.size = SIZE_UNAVAILABLE.to_string();
                    machine.file_exists = false;
                    machine.file_path = None;
                }
            }
        }
        repo.list()
    }

    /// Adopt a staged upload into the store and create its catalog
    /// record. The staged file is removed again when validation fails.
    pub async fn upload_machine(
        &self,
        fields: UploadFields,
        staged: StagedUpload,
    ) -> Result<MachineRecord> {
        let record = self.adopt_upload(&fields, &staged).await;
        if record.is_err() {
            if let Err(e) = std::fs::remove_file(&staged.path) {
                warn!("Failed to remove staged upload {}: {}", staged.path.display(), e);
            }
        }
        record
    }

    async fn adopt_upload(
        &self,
        fields: &UploadFields,
        staged: &StagedUpload,
    ) -> Result<MachineRecord> {
        if fields.name.trim().is_empty()
            || fields.description.trim().is_empty()
            || fields.difficulty.trim().is_empty()
        {
            return Err(Error::Validation(
                "name, description and difficulty are required".to_string(),
            ));
        }

        let difficulty = Difficulty::parse(&fields.difficulty).ok_or_else(|| {
            Error::Validation(format!("invalid difficulty: {}", fields.difficulty))
        })?;

        let sanitized = sanitize_name(&fields.name);
        if sanitized.is_empty() {
            return Err(Error::Validation("name has no usable characters".to_string()));
        }

        let final_path = self
            .store
            .upload_dir()
            .join(format!("{}.{}", sanitized, staged.extension));
        std::fs::rename(&staged.path, &final_path)?;

        let size = match std::fs::metadata(&final_path) {
            Ok(meta) => format_size(meta.len()),
            Err(_) => "Unknown".to_string(),
        };

        let tags = split_tags(&fields.tags);

        let mut repo = self.repo.write().await;
        let mut record = repo.create(
            fields.name.trim().to_string(),
            difficulty,
            fields.description.trim().to_string(),
            size.clone(),
            tags,
        );
        record.file_exists = true;
        record.file_path = Some(final_path);

        info!("New machine added: {} ({})", record.name, size);
        Ok(record)
    }

    pub async fn update_machine(
        &self,
        id: u64,
        patch: UpdateMachineRequest,
    ) -> Result<MachineRecord> {
        self.repo.write().await.update(id, patch)
    }

    /// Remove a record and, best-effort, its backing archive. A failed
    /// file delete is logged and the record is removed regardless.
    pub async fn delete_machine(&self, id: u64) -> Result<()> {
        let mut repo = self.repo.write().await;
        let name = repo
            .find(id)
            .map(|m| m.name.clone())
            .ok_or_else(|| Error::machine_not_found(id))?;

        self.store.delete(&name);
        repo.remove(id)?;
        Ok(())
    }

    pub async fn add_writeup(&self, id: u64, req: AddWriteupRequest) -> Result<WriteupRecord> {
        if req.title.trim().is_empty() || req.url.trim().is_empty() {
            return Err(Error::Validation("title and url are required".to_string()));
        }

        let writeup = WriteupRecord::new(req.title, req.url, req.description);
        self.repo.write().await.add_writeup(id, writeup)
    }
}
