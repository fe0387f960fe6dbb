//! REST file API over per-request SFTP sessions.
//!
//! Every handler authenticates against the target with the caller's vault
//! key (the `x-vault-key` header), performs one operation, and tears the
//! connection down. Downloads stream; uploads are buffered by the body
//! extractor.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use server_core::{BridgeError, StoreError, VaultError};
use ssh_core::{FileSession, RemoteFile, SshCoreError};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::io::ReaderStream;

use super::{AppState, Authenticated};

const VAULT_KEY_HEADER: &str = "x-vault-key";

#[derive(Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    path: String,
}

#[derive(Deserialize)]
pub struct RenameRequest {
    from: String,
    to: String,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Response {
    let session = match open(&state, target_id, auth.owner_id, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let result = session.list(&query.path).await;
    session.close().await;
    match result {
        Ok(entries) => Json(entries).into_response(),
        Err(err) => error_response(&err.into()),
    }
}

pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Response {
    let Some(path) = required_path(&query) else {
        return bad_request("path is required");
    };
    let session = match open(&state, target_id, auth.owner_id, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    match session.read(path).await {
        Ok((file, size)) => {
            let filename = path.rsplit('/').next().unwrap_or(path).to_string();
            let stream = ReaderStream::new(Download {
                file,
                _session: session,
            });
            (
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_LENGTH, size.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                Body::from_stream(stream),
            )
                .into_response()
        }
        Err(err) => {
            session.close().await;
            error_response(&err.into())
        }
    }
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> Response {
    let Some(path) = required_path(&query) else {
        return bad_request("path is required");
    };
    let session = match open(&state, target_id, auth.owner_id, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let result = session.write(path, &mut body.as_ref()).await;
    session.close().await;
    match result {
        Ok(written) => (StatusCode::CREATED, written.to_string()).into_response(),
        Err(err) => error_response(&err.into()),
    }
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Response {
    let Some(path) = required_path(&query) else {
        return bad_request("path is required");
    };
    let session = match open(&state, target_id, auth.owner_id, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let result = session.remove(path).await;
    session.close().await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err.into()),
    }
}

pub async fn mkdir(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Response {
    let Some(path) = required_path(&query) else {
        return bad_request("path is required");
    };
    let session = match open(&state, target_id, auth.owner_id, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let result = session.mkdir_all(path).await;
    session.close().await;
    match result {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(err) => error_response(&err.into()),
    }
}

pub async fn rename(
    State(state): State<Arc<AppState>>,
    Path(target_id): Path<i64>,
    auth: Authenticated,
    headers: HeaderMap,
    Json(request): Json<RenameRequest>,
) -> Response {
    if request.from.is_empty() || request.to.is_empty() {
        return bad_request("both from and to are required");
    }
    let session = match open(&state, target_id, auth.owner_id, &headers).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let result = session.rename(&request.from, &request.to).await;
    session.close().await;
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err.into()),
    }
}

async fn open(
    state: &AppState,
    target_id: i64,
    owner_id: i64,
    headers: &HeaderMap,
) -> Result<FileSession, Response> {
    let key = headers
        .get(VAULT_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| {
            (StatusCode::UNAUTHORIZED, "missing vault key").into_response()
        })?;
    state
        .files
        .open(target_id, owner_id, key)
        .await
        .map_err(|err| error_response(&err))
}

fn required_path(query: &PathQuery) -> Option<&str> {
    if query.path.is_empty() {
        None
    } else {
        Some(query.path.as_str())
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

fn error_response(err: &BridgeError) -> Response {
    let (status, message) = match err {
        BridgeError::Store(StoreError::NotFound { .. }) => {
            (StatusCode::NOT_FOUND, "Target not found".to_string())
        }
        BridgeError::Vault(VaultError::AuthenticationFailed) => {
            (StatusCode::UNAUTHORIZED, "Invalid authentication key".to_string())
        }
        BridgeError::Ssh(SshCoreError::NotFound { path }) => {
            (StatusCode::NOT_FOUND, format!("Remote path not found: {path}"))
        }
        BridgeError::Ssh(SshCoreError::IsDirectory { path }) => {
            (StatusCode::BAD_REQUEST, format!("Path is a directory: {path}"))
        }
        BridgeError::Ssh(err) if err.is_host_key_rejection() => (
            StatusCode::CONFLICT,
            "Host key mismatch; verify it from a terminal session first".to_string(),
        ),
        other => (StatusCode::BAD_GATEWAY, other.client_message()),
    };
    (status, message).into_response()
}

/// Keeps the SFTP session alive for as long as the download body streams.
struct Download {
    file: RemoteFile,
    _session: FileSession,
}

impl AsyncRead for Download {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.file).poll_read(cx, buf)
    }
}
