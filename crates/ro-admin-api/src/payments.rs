use axum::extract::{Path, Query, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use ro_core::audit::AuditEntry;
use ro_core::records::{ChangeOp, RecordKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Postgres, QueryBuilder, Row};
use utoipa::ToSchema;

use crate::auth::require_admin;
use crate::{ok, ApiError, ApiResult, AppState, Envelope};

/// Review state of a flagged payment. The overlay is last-write-wins;
/// concurrent updates to the same payment simply overwrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    InProgress,
    Resolved,
}

impl ResolutionStatus {
    pub fn parse(value: &str) -> Option<ResolutionStatus> {
        match value {
            "pending" => Some(ResolutionStatus::Pending),
            "in_progress" => Some(ResolutionStatus::InProgress),
            "resolved" => Some(ResolutionStatus::Resolved),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::InProgress => "in_progress",
            ResolutionStatus::Resolved => "resolved",
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitPaymentRequest {
    pub registration_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reference: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SubmitPaymentResponse {
    pub payment_id: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateStatusRequest {
    #[serde(rename = "resolutionStatus")]
    pub resolution_status: String,
}

#[derive(Serialize, ToSchema)]
pub struct ResolutionStatusResponse {
    pub payment_id: String,
    #[serde(rename = "resolutionStatus")]
    pub resolution_status: &'static str,
    pub updated_by: String,
    pub updated_at: i64,
}

#[derive(Deserialize)]
pub struct PaymentQuery {
    pub status: Option<String>,
    pub resolution: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub user_id: String,
    pub registration_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reference: Option<String>,
    pub status: String,
    #[serde(rename = "resolutionStatus")]
    pub resolution_status: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub(crate) fn valid_currency(currency: &str) -> bool {
    currency.len() == 3 && currency.chars().all(|c| c.is_ascii_alphabetic())
}

pub async fn submit_payment(
    State(state): State<AppState>,
    Json(payload): Json<SubmitPaymentRequest>,
) -> ApiResult<Json<Envelope<SubmitPaymentResponse>>> {
    if payload.amount_cents <= 0 {
        return Err(ApiError::bad_request(
            "INVALID_AMOUNT",
            "amount_cents must be positive",
        ));
    }
    if !valid_currency(&payload.currency) {
        return Err(ApiError::bad_request(
            "INVALID_CURRENCY",
            "currency must be a 3-letter code",
        ));
    }

    let registration = sqlx::query(
        "SELECT user_id FROM ro_app.registrations WHERE registration_id = $1",
    )
    .bind(&payload.registration_id)
    .fetch_optional(&state.pool)
    .await?;
    let Some(registration) = registration else {
        return Err(ApiError::not_found("registration not found"));
    };
    let user_id: String = registration.try_get("user_id")?;

    let payment_id = uuid::Uuid::new_v4().to_string();
    let currency = payload.currency.to_uppercase();
    sqlx::query(
        "INSERT INTO ro_app.payments          (payment_id, user_id, registration_id, amount_cents, currency, reference, status)          VALUES ($1, $2, $3, $4, $5, $6, 'reported')",
    )
    .bind(&payment_id)
    .bind(&user_id)
    .bind(&payload.registration_id)
    .bind(payload.amount_cents)
    .bind(&currency)
    .bind(&payload.reference)
    .execute(&state.pool)
    .await?;

    ro_core::audit::record_detached(
        state.pool.clone(),
        crate::SERVICE_NAME,
        AuditEntry::new(
            None,
            "payment.create",
            RecordKind::Payments.collection(),
            payment_id.clone(),
            Some(json!({
                "registration_id": payload.registration_id,
                "amount_cents": payload.amount_cents,
                "currency": currency,
            })),
        ),
    );
    state
        .sync
        .notify(RecordKind::Payments, payment_id.clone(), ChangeOp::Insert);

    Ok(ok(SubmitPaymentResponse { payment_id }))
}

pub async fn update_resolution_status(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(payment_id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> ApiResult<Json<Envelope<ResolutionStatusResponse>>> {
    let admin = require_admin(&state, &jar).await?;

    let Some(status) = ResolutionStatus::parse(&payload.resolution_status) else {
        return Err(ApiError::bad_request(
            "INVALID_STATUS",
            "resolutionStatus must be one of pending, in_progress, resolved",
        ));
    };

    let exists = sqlx::query_scalar::<_, String>(
        "SELECT payment_id FROM ro_app.payments WHERE payment_id = $1",
    )
    .bind(&payment_id)
    .fetch_optional(&state.pool)
    .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("payment not found"));
    }

    let updated_at: chrono::DateTime<chrono::Utc> = sqlx::query_scalar(
        "INSERT INTO ro_app.payment_statuses          (payment_id, resolution_status, updated_by, updated_at)          VALUES ($1, $2, $3, NOW())          ON CONFLICT (payment_id) DO UPDATE              SET resolution_status = EXCLUDED.resolution_status,                  updated_by = EXCLUDED.updated_by,                  updated_at = NOW()          RETURNING updated_at",
    )
    .bind(&payment_id)
    .bind(status.as_str())
    .bind(&admin.email)
    .fetch_one(&state.pool)
    .await?;

    ro_core::audit::record_detached(
        state.pool.clone(),
        crate::SERVICE_NAME,
        AuditEntry::new(
            Some(admin.email.clone()),
            "payment.resolution_update",
            RecordKind::Payments.collection(),
            payment_id.clone(),
            Some(json!({ "resolution_status": status.as_str() })),
        ),
    );
    state
        .sync
        .notify(RecordKind::Payments, payment_id.clone(), ChangeOp::Update);

    Ok(ok(ResolutionStatusResponse {
        payment_id,
        resolution_status: status.as_str(),
        updated_by: admin.email,
        updated_at: updated_at.timestamp(),
    }))
}

pub async fn list_payments(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PaymentQuery>,
) -> ApiResult<Json<Envelope<Vec<PaymentResponse>>>> {
    require_admin(&state, &jar).await?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT p.payment_id, p.user_id, p.registration_id, p.amount_cents, p.currency,                 p.reference, p.status, s.resolution_status, p.created_at, p.updated_at          FROM ro_app.payments p          LEFT JOIN ro_app.payment_statuses s ON s.payment_id = p.payment_id          WHERE 1=1",
    );
    if let Some(status) = query.status {
        builder.push(" AND p.status = ");
        builder.push_bind(status);
    }
    if let Some(resolution) = query.resolution {
        builder.push(" AND s.resolution_status = ");
        builder.push_bind(resolution);
    }
    builder.push(" ORDER BY p.created_at DESC");
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    builder.push(" LIMIT ");
    builder.push(limit.to_string());

    let rows = builder.build().fetch_all(&state.pool).await?;

    let mut payments = Vec::new();
    for row in rows {
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        let updated_at: chrono::DateTime<chrono::Utc> = row.try_get("updated_at")?;
        payments.push(PaymentResponse {
            payment_id: row.try_get("payment_id")?,
            user_id: row.try_get("user_id")?,
            registration_id: row.try_get("registration_id")?,
            amount_cents: row.try_get("amount_cents")?,
            currency: row.try_get("currency")?,
            reference: row.try_get("reference").ok(),
            status: row.try_get("status")?,
            resolution_status: row.try_get("resolution_status").ok().flatten(),
            created_at: created_at.timestamp(),
            updated_at: updated_at.timestamp(),
        });
    }

    Ok(ok(payments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn parse_accepts_exactly_the_three_states() {
        assert_eq!(
            ResolutionStatus::parse("pending"),
            Some(ResolutionStatus::Pending)
        );
        assert_eq!(
            ResolutionStatus::parse("in_progress"),
            Some(ResolutionStatus::InProgress)
        );
        assert_eq!(
            ResolutionStatus::parse("resolved"),
            Some(ResolutionStatus::Resolved)
        );
    }

    #[test]
    fn parse_rejects_anything_else() {
        assert_eq!(ResolutionStatus::parse("approved"), None);
        assert_eq!(ResolutionStatus::parse("Pending"), None);
        assert_eq!(ResolutionStatus::parse(""), None);
        assert_eq!(ResolutionStatus::parse("in-progress"), None);
    }

    #[test]
    fn parse_round_trips_as_str() {
        for status in [
            ResolutionStatus::Pending,
            ResolutionStatus::InProgress,
            ResolutionStatus::Resolved,
        ] {
            assert_eq!(ResolutionStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn valid_currency_wants_three_letters() {
        assert!(valid_currency("EUR"));
        assert!(valid_currency("usd"));
        assert!(!valid_currency("EU"));
        assert!(!valid_currency("EURO"));
        assert!(!valid_currency("E1R"));
    }

    #[tokio::test]
    async fn status_update_requires_admin_session() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/v1/admin/payments/p-1/status")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"resolutionStatus":"resolved"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_payment_rejects_non_positive_amount() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/payments")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"registration_id":"r-1","amount_cents":0,"currency":"EUR"}"#,
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
