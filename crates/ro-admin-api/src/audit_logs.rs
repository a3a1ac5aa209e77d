use axum::extract::{Query, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use ro_core::audit::{self, AuditFilter, AuditLogRow};
use serde::Deserialize;

use crate::auth::require_admin;
use crate::{ok, ApiResult, AppState, Envelope};

#[derive(Deserialize)]
pub struct AuditLogQuery {
    pub action: Option<String>,
    pub collection: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Json<Envelope<Vec<AuditLogRow>>>> {
    require_admin(&state, &jar).await?;

    let filter = AuditFilter {
        action: query.action,
        collection: query.collection,
        actor: query.user_id,
        limit: query.limit,
    };
    let logs = audit::list(&state.pool, &filter).await.map_err(|err| {
        tracing::error!(error = %err, "audit query failed");
        crate::ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "DB_ERROR",
            "internal error",
        )
    })?;

    Ok(ok(logs))
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn audit_logs_require_admin_session() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/admin/audit-logs?action=payment.resolution_update&limit=2")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
