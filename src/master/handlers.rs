use axum::{
    Json,
    extract::{Extension, Query},
    http::StatusCode,
};
use std::sync::Arc;

use super::protocol::{
    AssignQuery, AssignResponse, ErrorResponse, GrowQuery, GrowResponse, JoinResponse,
    LookupQuery, LookupResponse,
};
use super::server::MasterServer;
use crate::error::Error;
use crate::membership::types::Heartbeat;
use crate::topology::TopologyStatus;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(e: Error) -> ApiError {
    (
        e.status_code(),
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

pub async fn handle_assign(
    Extension(master): Extension<Arc<MasterServer>>,
    Query(query): Query<AssignQuery>,
) -> Result<Json<AssignResponse>, ApiError> {
    match master.assign(&query).await {
        Ok(assignment) => {
            tracing::debug!("Assigned {} on {}", assignment.fid, assignment.url);
            Ok(Json(assignment))
        }
        Err(e) => {
            tracing::warn!("Assign failed: {}", e);
            Err(api_error(e))
        }
    }
}

pub async fn handle_lookup(
    Extension(master): Extension<Arc<MasterServer>>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    master.lookup(&query).await.map(Json).map_err(|e| {
        tracing::debug!("Lookup of {:?} failed: {}", query.volume_id, e);
        api_error(e)
    })
}

pub async fn handle_join(
    Extension(master): Extension<Arc<MasterServer>>,
    Json(heartbeat): Json<Heartbeat>,
) -> Result<Json<JoinResponse>, ApiError> {
    if heartbeat.ip.is_empty() || heartbeat.port == 0 {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "heartbeat without address".to_string(),
            }),
        ));
    }

    let registration = master.topology.register_volumes(&heartbeat).await;
    if !registration.rejected.is_empty() {
        tracing::error!(
            "{}:{} reported conflicting volumes {:?}",
            heartbeat.ip,
            heartbeat.port,
            registration.rejected
        );
    }

    Ok(Json(JoinResponse {
        volume_size_limit: master.topology.volume_size_limit(),
    }))
}

pub async fn handle_status(
    Extension(master): Extension<Arc<MasterServer>>,
) -> (StatusCode, Json<TopologyStatus>) {
    (StatusCode::OK, Json(master.topology.status().await))
}

pub async fn handle_grow(
    Extension(master): Extension<Arc<MasterServer>>,
    Query(query): Query<GrowQuery>,
) -> Result<Json<GrowResponse>, ApiError> {
    match master.grow(&query).await {
        Ok(count) => Ok(Json(GrowResponse { count })),
        Err(e) => {
            tracing::warn!("Volume growth failed: {}", e);
            Err(api_error(e))
        }
    }
}
