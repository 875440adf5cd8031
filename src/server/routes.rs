//! HTTP handlers.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use catalog_sync_core::envelope::{CHANGESET_FIELD, ROOT_ID_FIELD};
use catalog_sync_core::{
    apply_changeset, ApplyError, BinaryMap, CanonicalTree, Changeset, FieldError, Root, ServerId,
    TransportEnvelope,
};

use super::context::DiskContext;
use super::storage::{ServerStorage, ServerStorageError};
use super::AppState;

/// Error responses.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Validation(Vec<FieldError>),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
}

#[derive(Serialize)]
struct ValidationBody<'a> {
    errors: &'a [FieldError],
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match &self {
            ApiError::Validation(errors) => {
                return (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(ValidationBody { errors }),
                )
                    .into_response();
            }
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m),
            ApiError::Internal(m) => {
                tracing::error!("internal error: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", m)
            }
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<ServerStorageError> for ApiError {
    fn from(e: ServerStorageError) -> Self {
        match e {
            ServerStorageError::InvalidId(_) => ApiError::BadRequest(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ApplyError> for ApiError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::Asset(_) => ApiError::Internal(e.to_string()),
            _ => ApiError::Validation(vec![FieldError::new(e.subject(), e.to_string())]),
        }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Health check endpoint (no auth required)
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Runs storage I/O off the async worker threads.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
}

pub async fn get_root(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
) -> Result<Json<Root>, ApiError> {
    let storage = state.storage.clone();
    blocking(move || {
        storage
            .load(&root_id)?
            .map(Json)
            .ok_or_else(|| ApiError::NotFound(format!("Root {} not found", root_id)))
    })
    .await
}

/// Seeds or replaces a stored tree.
pub async fn put_root(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
    Json(root): Json<Root>,
) -> Result<StatusCode, ApiError> {
    if root.server_id().map(ServerId::as_str) != Some(root_id.as_str()) {
        return Err(ApiError::BadRequest(format!(
            "Tree root {} does not match path {}",
            root.id, root_id
        )));
    }
    if let Some(id) = first_unpersisted(&root) {
        return Err(ApiError::BadRequest(format!(
            "Stored trees may only contain server ids, found new entity {}",
            id
        )));
    }

    let _guard = state.write_lock.lock().await;
    let storage = state.storage.clone();
    let groups = root.groups.len();
    let id = root_id.clone();
    let existed = blocking(move || {
        let existed = storage.load(&id)?.is_some();
        storage.save(&id, &root)?;
        Ok(existed)
    })
    .await?;
    tracing::info!(root = %root_id, groups, "stored tree");

    Ok(if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    })
}

/// Accepts a multipart envelope and returns the canonical tree.
pub async fn post_changeset(
    State(state): State<AppState>,
    Path(root_id): Path<String>,
    multipart: Multipart,
) -> Result<Json<CanonicalTree>, ApiError> {
    ServerStorage::validate_id(&root_id)?;
    let envelope = read_envelope(multipart).await?;
    if envelope.root_id.as_str() != root_id {
        return Err(ApiError::Conflict(format!(
            "Envelope is for root {}, not {}",
            envelope.root_id, root_id
        )));
    }
    let changeset = envelope
        .decode()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let _guard = state.write_lock.lock().await;
    let storage = state.storage.clone();
    let canonical = blocking(move || apply_and_save(&storage, &root_id, changeset)).await?;

    Ok(Json(canonical))
}

fn apply_and_save(
    storage: &ServerStorage,
    root_id: &str,
    changeset: Changeset,
) -> Result<CanonicalTree, ApiError> {
    let stored = storage
        .load(root_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Root {} not found", root_id)))?;

    let entries = changeset.entry_count();
    let mut ctx = DiskContext::new(storage, root_id);
    let canonical = match apply_changeset(&stored, changeset, &mut ctx) {
        Ok(canonical) => canonical,
        Err(e) => {
            tracing::warn!(root = %root_id, error = %e, "rejected changeset");
            return Err(e.into());
        }
    };
    storage.save(root_id, &canonical.root)?;

    tracing::info!(
        root = %root_id,
        entries,
        created = canonical.assigned_ids.len(),
        assets = ctx.written.len(),
        "applied changeset"
    );
    Ok(canonical)
}

async fn read_envelope(mut multipart: Multipart) -> Result<TransportEnvelope, ApiError> {
    let mut root_id = None;
    let mut structured_diff = None;
    let mut binary_parts = BinaryMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let name = field
            .name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("Multipart field without a name".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;

        match name.as_str() {
            ROOT_ID_FIELD => root_id = Some(utf8_field(&name, bytes)?),
            CHANGESET_FIELD => structured_diff = Some(utf8_field(&name, bytes)?),
            _ => {
                if binary_parts.insert(name.clone(), bytes.to_vec()).is_some() {
                    return Err(ApiError::BadRequest(format!("Duplicate part {}", name)));
                }
            }
        }
    }

    Ok(TransportEnvelope {
        root_id: ServerId::new(
            root_id.ok_or_else(|| ApiError::BadRequest(format!("Missing {} field", ROOT_ID_FIELD)))?,
        ),
        structured_diff: structured_diff
            .ok_or_else(|| ApiError::BadRequest(format!("Missing {} field", CHANGESET_FIELD)))?,
        binary_parts,
    })
}

fn utf8_field(name: &str, bytes: Bytes) -> Result<String, ApiError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ApiError::BadRequest(format!("Field {} is not UTF-8", name)))
}

pub async fn get_asset(
    State(state): State<AppState>,
    Path((root_id, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let storage = state.storage.clone();
    let (id, asset) = (root_id.clone(), name.clone());
    match blocking(move || Ok(storage.load_asset(&id, &asset)?)).await? {
        Some(bytes) => {
            Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
        }
        None => Err(ApiError::NotFound(format!(
            "Asset {}/{} not found",
            root_id, name
        ))),
    }
}

fn first_unpersisted(root: &Root) -> Option<&catalog_sync_core::Identity> {
    root.groups.iter().find_map(|group| {
        if group.id.is_new() {
            return Some(&group.id);
        }
        group
            .leaves
            .iter()
            .find(|leaf| leaf.id.is_new())
            .map(|leaf| &leaf.id)
    })
}
