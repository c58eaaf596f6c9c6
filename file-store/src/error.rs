use std::io;
use std::path::{Path, PathBuf};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Unable to {operation} {}: {source}", .path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type FileStoreResult<T> = Result<T, FileStoreError>;

impl FileStoreError {
    /// Classifies an I/O error: a missing path is `NotFound`, anything else is an access failure.
    pub fn from_io(operation: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            FileStoreError::NotFound(path_label(path))
        } else {
            FileStoreError::Io {
                operation,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            FileStoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            FileStoreError::Forbidden => StatusCode::FORBIDDEN,
            FileStoreError::NotFound(_) => StatusCode::NOT_FOUND,
            FileStoreError::InvalidName(_) | FileStoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FileStoreError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// only the last component goes back to the client, never the storage root
fn path_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl IntoResponse for FileStoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            FileStoreError::Io { operation, path, source } => {
                tracing::error!(operation = *operation, path = %path.display(), "I/O failure: {}", source);
                format!("Unable to {} file.", operation)
            }
            FileStoreError::NotFound(_) => "File not found.".to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
