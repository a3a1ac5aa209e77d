use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use ro_core::audit::AuditEntry;
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::auth::require_admin;
use crate::{ok, ApiError, ApiResult, AppState, Envelope};

#[derive(Deserialize, ToSchema)]
pub struct SyncActionRequest {
    pub action: String,
}

pub async fn sync_status(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Envelope<ro_sync::SyncStatus>>> {
    require_admin(&state, &jar).await?;
    Ok(ok(state.sync.status().await))
}

pub async fn sync_action(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<SyncActionRequest>,
) -> ApiResult<Json<Envelope<Value>>> {
    let admin = require_admin(&state, &jar).await?;

    match payload.action.as_str() {
        "start" => {
            let started = state.sync.start().await;
            audit_action(&state, &admin.email, "sync.start");
            Ok(ok(json!({ "running": true, "started": started })))
        }
        "stop" => {
            let stopped = state.sync.stop().await;
            audit_action(&state, &admin.email, "sync.stop");
            Ok(ok(json!({ "running": false, "stopped": stopped })))
        }
        "initial" => {
            let report = state.sync.initial_sync().await.map_err(|err| {
                tracing::error!(error = %err, "initial sync failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SYNC_FAILED",
                    "initial sync failed",
                )
            })?;
            audit_action(&state, &admin.email, "sync.initial");
            Ok(ok(json!({
                "users": report.users,
                "registrations": report.registrations,
                "payments": report.payments,
                "success": report.success,
            })))
        }
        other => Err(ApiError::bad_request(
            "UNKNOWN_ACTION",
            format!("unknown sync action: {other}"),
        )),
    }
}

fn audit_action(state: &AppState, actor: &str, action: &'static str) {
    ro_core::audit::record_detached(
        state.pool.clone(),
        crate::SERVICE_NAME,
        AuditEntry::new(
            Some(actor.to_string()),
            action,
            "sync_service",
            "sync",
            None,
        ),
    );
}
