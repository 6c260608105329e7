use axum::{
    Json,
    body::{Body, Bytes},
    extract::{ConnectInfo, Extension, Query, Request, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use super::protocol::{
    AdminResponse, AssignVolumeRequest, DeleteResponse, ErrorResponse, FreezeVolumeRequest,
    NeedleQuery, StatusResponse, VERSION, WriteResponse,
};
use super::server::{Outcome, ReadOutcome, VolumeServer};
use super::types::{Needle, NeedlePath};
use crate::error::Error;

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Clients allowed to change data. An empty list allows everyone.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    networks: Vec<IpNet>,
}

impl Whitelist {
    pub fn new(networks: Vec<IpNet>) -> Self {
        Self { networks }
    }

    pub fn allows(&self, peer: Option<IpAddr>) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        peer.is_some_and(|ip| self.networks.iter().any(|net| net.contains(&ip)))
    }
}

fn peer_ip(connect: &Option<ConnectInfo<SocketAddr>>) -> Option<IpAddr> {
    connect.as_ref().map(|ConnectInfo(addr)| addr.ip())
}

fn forbidden(peer: Option<IpAddr>, path: &str) -> Response {
    tracing::warn!("Rejecting {} from {:?}: not whitelisted", path, peer);
    error_response(StatusCode::FORBIDDEN, "client address not allowed")
}

/// Guards the admin routes.
pub async fn require_whitelisted(
    Extension(whitelist): Extension<Arc<Whitelist>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = peer_ip(&connect);
    if !whitelist.allows(peer) {
        return forbidden(peer, request.uri().path());
    }
    next.run(request).await
}

/// Clients never learn that a cookie was wrong.
fn client_error(error: Error) -> Error {
    match error {
        Error::CookieMismatch(fid) => Error::NeedleNotFound(fid),
        other => other,
    }
}

/// Every request that is not an admin endpoint addresses a needle.
pub async fn handle_needle(
    Extension(server): Extension<Arc<VolumeServer>>,
    Extension(whitelist): Extension<Arc<Whitelist>>,
    connect: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    query: Result<Query<NeedleQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            tracing::debug!("Bad query on {}: {}", uri, rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let path = match NeedlePath::parse(uri.path()) {
        Ok(path) => path,
        Err(e) => {
            tracing::debug!("Rejecting {} {}: {}", method, uri.path(), e);
            return error_response(StatusCode::BAD_REQUEST, e);
        }
    };

    let mutating = matches!(method, Method::POST | Method::PUT | Method::DELETE);
    let peer = peer_ip(&connect);
    if mutating && !whitelist.allows(peer) {
        return forbidden(peer, uri.path());
    }

    match method {
        Method::GET | Method::HEAD => {
            let head = method == Method::HEAD;
            read_needle(&server, &path, uri.path(), &headers, head).await
        }
        Method::POST | Method::PUT => write_needle(&server, path, &query, &headers, body).await,
        Method::DELETE => {
            let outcome = server
                .replicated_delete(path.file_id, query.is_replicate())
                .await;
            delete_response(outcome)
        }
        _ => error_response(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
    }
}

async fn read_needle(
    server: &VolumeServer,
    path: &NeedlePath,
    raw_path: &str,
    headers: &HeaderMap,
    head: bool,
) -> Response {
    match server.read(path, raw_path).await {
        ReadOutcome::Found(needle) if not_modified(&needle, headers) => {
            let mut response = StatusCode::NOT_MODIFIED.into_response();
            if let Some(value) = last_modified_header(&needle) {
                response.headers_mut().insert(header::LAST_MODIFIED, value);
            }
            response
        }
        ReadOutcome::Found(needle) => needle_response(needle, head),
        ReadOutcome::Redirect(url) => {
            tracing::debug!("Redirecting {} to {}", raw_path, url);
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, url)]).into_response()
        }
        ReadOutcome::NotFound => {
            error_response(StatusCode::NOT_FOUND, Error::NeedleNotFound(path.file_id))
        }
    }
}

fn last_modified_header(needle: &Needle) -> Option<HeaderValue> {
    if needle.last_modified == 0 {
        return None;
    }
    let time = DateTime::<Utc>::from_timestamp(needle.last_modified as i64, 0)?;
    HeaderValue::from_str(&time.format(HTTP_DATE).to_string()).ok()
}

/// True when `If-Modified-Since` is at or after the needle's timestamp.
fn not_modified(needle: &Needle, headers: &HeaderMap) -> bool {
    if needle.last_modified == 0 {
        return false;
    }
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .is_some_and(|since| since.timestamp() >= needle.last_modified as i64)
}

fn needle_response(needle: Needle, head: bool) -> Response {
    let mut headers = HeaderMap::new();

    let mime = needle.mime.as_deref().unwrap_or("application/octet-stream");
    if let Ok(value) = HeaderValue::from_str(mime) {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(name) = &needle.name
        && let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", name))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(value) = last_modified_header(&needle) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    if needle.is_gzipped() {
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
    }

    let body = if head {
        Body::empty()
    } else {
        Body::from(needle.data)
    };
    (StatusCode::OK, headers, body).into_response()
}

async fn write_needle(
    server: &VolumeServer,
    path: NeedlePath,
    query: &NeedleQuery,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let replicate = query.is_replicate();

    let limit = server.store().volume_size_limit();
    if body.len() as u64 > limit {
        tracing::warn!("Rejecting {} byte write to {}: limit {}", body.len(), path.file_id, limit);
        return error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("needle of {} bytes exceeds the volume size limit", body.len()),
        );
    }

    let needle = if replicate {
        match bincode::deserialize::<Needle>(&body) {
            Ok(needle) => needle,
            Err(e) => {
                tracing::warn!("Malformed replica write for {}: {}", path.file_id, e);
                return error_response(StatusCode::BAD_REQUEST, e);
            }
        }
    } else {
        upload_needle(&path, query, headers, body)
    };

    let name = needle.name.clone();
    let outcome = server.replicated_write(path.file_id, needle, replicate).await;

    let status = match &outcome.error {
        None => StatusCode::CREATED,
        Some(e) => client_error_status(e),
    };
    let response = WriteResponse {
        name,
        size: outcome.size,
        error: outcome.error.map(|e| client_error(e).to_string()),
    };
    (status, Json(response)).into_response()
}

fn upload_needle(path: &NeedlePath, query: &NeedleQuery, headers: &HeaderMap, body: Bytes) -> Needle {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    };

    let mut needle = Needle::new(path.file_id.key, path.file_id.cookie, body.to_vec());

    if let Some(name) = path.filename.clone().or_else(|| query.name.clone()) {
        needle = needle.with_name(name);
    }
    if let Some(mime) = header_value(header::CONTENT_TYPE).filter(|m| m != "application/octet-stream") {
        needle = needle.with_mime(mime);
    }
    let last_modified = query
        .ts
        .unwrap_or_else(|| Utc::now().timestamp().max(0) as u64);
    needle = needle.with_last_modified(last_modified);
    if header_value(header::CONTENT_ENCODING).is_some_and(|e| e.eq_ignore_ascii_case("gzip")) {
        needle = needle.gzipped();
    }

    needle
}

fn delete_response(outcome: Outcome) -> Response {
    let status = match &outcome.error {
        None => StatusCode::ACCEPTED,
        Some(e) => client_error_status(e),
    };
    let response = DeleteResponse {
        size: outcome.size,
        error: outcome.error.map(|e| client_error(e).to_string()),
    };
    (status, Json(response)).into_response()
}

fn client_error_status(error: &Error) -> StatusCode {
    if error.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        error.status_code()
    }
}

pub async fn handle_status(
    Extension(server): Extension<Arc<VolumeServer>>,
) -> (StatusCode, Json<StatusResponse>) {
    let volumes = server.store().status().await;
    (
        StatusCode::OK,
        Json(StatusResponse {
            version: VERSION.to_string(),
            volumes,
        }),
    )
}

pub async fn handle_assign_volume(
    Extension(server): Extension<Arc<VolumeServer>>,
    Query(request): Query<AssignVolumeRequest>,
) -> (StatusCode, Json<AdminResponse>) {
    let replication = if request.replication.is_empty() {
        "000"
    } else {
        request.replication.as_str()
    };

    match server
        .store()
        .add_volumes(&request.volume, &request.collection, replication)
    {
        Ok(()) => (StatusCode::OK, Json(AdminResponse::default())),
        Err(e) => {
            tracing::error!("Failed to assign volume {:?}: {}", request.volume, e);
            (
                e.status_code(),
                Json(AdminResponse {
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_freeze_volume(
    Extension(server): Extension<Arc<VolumeServer>>,
    Query(request): Query<FreezeVolumeRequest>,
) -> (StatusCode, Json<AdminResponse>) {
    match server.store().freeze_volume(request.volume) {
        Ok(()) => (StatusCode::OK, Json(AdminResponse::default())),
        Err(e) => (
            e.status_code(),
            Json(AdminResponse {
                error: Some(e.to_string()),
            }),
        ),
    }
}
