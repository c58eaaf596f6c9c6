//! Per-user file store with background gzip compression of uploads.
//!
//! Uploads land in the caller's namespace directory and are compressed on a
//! detached task; the latest job per user is tracked in a shared registry that
//! clients poll. Admins can browse, download and delete across namespaces.

pub mod catalog;
pub mod config;
pub mod error;
pub mod locks;
pub mod namespace;
pub mod policy;
pub mod registry;
pub mod routes;
pub mod worker;

pub use catalog::{CatalogEntry, FileCatalog};
pub use error::{FileStoreError, FileStoreResult};
pub use namespace::UserNamespace;
pub use registry::{CompressionJob, CompressionJobRegistry, JobStatus};
pub use routes::{router, AppState};
pub use worker::CompressionWorker;
