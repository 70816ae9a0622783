//! CyberLab Web Service
//!
//! HTTP surface for the machine catalog: listing, uploads, metadata
//! edits, writeups, and streamed archive downloads.

pub mod catalog;
pub mod download;
pub mod server;
pub mod store;

pub use catalog::{CatalogRepository, CatalogService};
pub use server::{AdminCredentials, WebServer, WebServerConfig};
pub use store::{ArchiveStore, Resolution, MAX_UPLOAD_BYTES};
