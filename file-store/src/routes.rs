use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Extension, Json, Multipart, Path, Query, State},
    http::{StatusCode, header},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tower::ServiceBuilder;

use auth_check::{auth_middleware, Identity, SharedAuthenticator};

use crate::catalog::{CatalogEntry, FileCatalog};
use crate::error::{FileStoreError, FileStoreResult};
use crate::locks::UserLocks;
use crate::namespace::{validate_name, UserNamespace};
use crate::policy::{require, Operation, Target};
use crate::registry::{CompressionJob, CompressionJobRegistry};
use crate::worker::CompressionWorker;

pub const UPLOAD_FIELD: &str = "uploadFile";

#[derive(Clone)]
pub struct AppState {
    pub namespaces: UserNamespace,
    pub registry: CompressionJobRegistry,
    pub catalog: FileCatalog,
    pub worker: CompressionWorker,
    pub locks: UserLocks,
}

impl AppState {
    pub fn new(namespaces: UserNamespace) -> Self {
        let registry = CompressionJobRegistry::new();
        let locks = UserLocks::new();
        AppState {
            catalog: FileCatalog::new(namespaces.clone(), locks.clone()),
            worker: CompressionWorker::new(registry.clone(), locks.clone()),
            namespaces,
            registry,
            locks,
        }
    }
}

/// Optional `?user=` naming another namespace (admins only).
#[derive(Debug, Default, Deserialize)]
pub struct TargetQuery {
    user: Option<String>,
}

impl TargetQuery {
    fn namespace<'a>(&'a self, identity: &'a Identity) -> &'a str {
        self.user.as_deref().unwrap_or(&identity.username)
    }
}

pub fn router(state: AppState, authenticator: SharedAuthenticator, max_upload_bytes: usize) -> Router {
    let protected = Router::new()
        .route("/files", get(list_files))
        .route("/files/upload", post(upload_file))
        .route("/files/compression-status", get(compression_status))
        .route("/files/delete/{file_name}", delete(delete_file))
        .route("/files/download/{file_name}", get(download_file))
        .route("/files/admin/all", get(list_all_files))
        .route("/files/admin/{user}", get(list_user_files))
        .route_layer(
            ServiceBuilder::new()
                .layer(DefaultBodyLimit::max(max_upload_bytes))
                .layer(from_fn_with_state(authenticator, auth_middleware))
        );

    Router::new()
        .route("/files/health", get(|| async { "OK" }))
        .merge(protected)
        .with_state(state)
}

/// List the files of the caller's namespace, or of `?user=` for admins.
///
/// The caller's own namespace is created on first access, so a new user gets an
/// empty list rather than a not-found.
async fn list_files(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Query(query): Query<TargetQuery>,
) -> FileStoreResult<Json<Vec<String>>> {
    let namespace = query.namespace(&identity);
    require(&identity, Target::Namespace(namespace), Operation::List)?;

    if namespace == identity.username {
        state.namespaces.resolve(namespace).await?;
    }
    Ok(Json(state.catalog.list(namespace).await?))
}

/// Store the `uploadFile` part in the caller's namespace and start compressing it.
///
/// Responds as soon as the file is on disk; the job is polled through
/// `/files/compression-status`.
async fn upload_file(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> FileStoreResult<impl IntoResponse> {
    require(&identity, Target::Namespace(&identity.username), Operation::Upload)?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| FileStoreError::BadRequest(err.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| FileStoreError::BadRequest("Missing file name.".to_string()))?;
        validate_name(&file_name)?;

        let data = field
            .bytes()
            .await
            .map_err(|err| FileStoreError::BadRequest(err.body_text()))?;

        tracing::info!(user = %identity.username, file = %file_name, size = data.len(), "Received upload");

        state.namespaces.resolve(&identity.username).await?;
        let path = state.namespaces.path_for(&identity.username, &file_name).await?;
        // waits out an in-flight job that may still be reading a file of the same name
        let guard = state.locks.lock(&identity.username).await;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| FileStoreError::from_io("write", &path, e))?;
        drop(state.worker.dispatch(&identity.username, path).await);
        drop(guard);

        return Ok((StatusCode::OK, "File uploaded, compression started."));
    }

    Err(FileStoreError::BadRequest("No files were uploaded.".to_string()))
}

async fn compression_status(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> FileStoreResult<Json<CompressionJob>> {
    require(&identity, Target::Namespace(&identity.username), Operation::CompressionStatus)?;
    Ok(Json(state.registry.get(&identity.username).await))
}

async fn delete_file(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> FileStoreResult<impl IntoResponse> {
    let namespace = query.namespace(&identity);
    require(&identity, Target::Namespace(namespace), Operation::Delete)?;

    state.catalog.delete(namespace, &file_name).await?;
    Ok((StatusCode::OK, "File deleted."))
}

async fn download_file(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    Query(query): Query<TargetQuery>,
) -> FileStoreResult<Response> {
    let namespace = query.namespace(&identity);
    require(&identity, Target::Namespace(namespace), Operation::Download)?;

    let download = state.catalog.open(namespace, &file_name).await?;
    let disposition = format!("attachment; filename=\"{}\"", file_name.replace('"', "_"));

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, download.len.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(download.file)),
    )
        .into_response())
}

async fn list_all_files(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
) -> FileStoreResult<Json<Vec<CatalogEntry>>> {
    require(&identity, Target::All, Operation::ListAll)?;
    Ok(Json(state.catalog.list_all().await?))
}

/// One namespace, in the same shape as the aggregate listing.
async fn list_user_files(
    Extension(identity): Extension<Identity>,
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> FileStoreResult<Json<Vec<CatalogEntry>>> {
    require(&identity, Target::All, Operation::ListAll)?;

    let files = state.catalog.list(&user).await?;
    Ok(Json(
        files
            .into_iter()
            .map(|file| CatalogEntry { user_dir: user.clone(), file })
            .collect(),
    ))
}
