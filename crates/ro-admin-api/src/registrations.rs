use axum::extract::{Query, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use regex::Regex;
use ro_core::audit::AuditEntry;
use ro_core::records::{ChangeOp, RecordKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder, Row};
use std::sync::OnceLock;
use utoipa::ToSchema;

use crate::auth::require_admin;
use crate::{ok, ApiError, ApiResult, AppState, Envelope};

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
}

pub(crate) fn valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

#[derive(Deserialize, ToSchema)]
pub struct SubmitRegistrationRequest {
    pub email: String,
    pub display_name: Option<String>,
    pub event_slug: String,
    pub answers: Option<Value>,
}

#[derive(Serialize, ToSchema)]
pub struct SubmitRegistrationResponse {
    pub registration_id: String,
    pub user_id: String,
}

#[derive(Deserialize)]
pub struct RegistrationQuery {
    pub event_slug: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct RegistrationResponse {
    pub registration_id: String,
    pub user_id: String,
    pub event_slug: String,
    pub status: String,
    pub answers: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

pub async fn submit_registration(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRegistrationRequest>,
) -> ApiResult<Json<Envelope<SubmitRegistrationResponse>>> {
    if !valid_email(&payload.email) {
        return Err(ApiError::bad_request("INVALID_EMAIL", "invalid email address"));
    }
    if payload.event_slug.trim().is_empty() {
        return Err(ApiError::bad_request("INVALID_EVENT", "event_slug is required"));
    }
    let email = payload.email.to_lowercase();

    let existing = sqlx::query_scalar::<_, String>(
        "SELECT user_id FROM ro_app.users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&state.pool)
    .await?;

    let (user_id, user_op) = match existing {
        Some(user_id) => {
            sqlx::query(
                "UPDATE ro_app.users                  SET display_name = COALESCE($1, display_name), updated_at = NOW()                  WHERE user_id = $2",
            )
            .bind(&payload.display_name)
            .bind(&user_id)
            .execute(&state.pool)
            .await?;
            (user_id, ChangeOp::Update)
        }
        None => {
            let user_id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO ro_app.users (user_id, email, display_name)                  VALUES ($1, $2, $3)",
            )
            .bind(&user_id)
            .bind(&email)
            .bind(&payload.display_name)
            .execute(&state.pool)
            .await?;
            ro_core::audit::record_detached(
                state.pool.clone(),
                crate::SERVICE_NAME,
                AuditEntry::new(
                    None,
                    "user.create",
                    RecordKind::Users.collection(),
                    user_id.clone(),
                    Some(json!({ "email": email })),
                ),
            );
            (user_id, ChangeOp::Insert)
        }
    };

    let registration_id = uuid::Uuid::new_v4().to_string();
    let answers = payload.answers.unwrap_or_else(|| json!({}));
    sqlx::query(
        "INSERT INTO ro_app.registrations          (registration_id, user_id, event_slug, status, answers_json)          VALUES ($1, $2, $3, 'submitted', $4)",
    )
    .bind(&registration_id)
    .bind(&user_id)
    .bind(&payload.event_slug)
    .bind(&answers)
    .execute(&state.pool)
    .await?;

    ro_core::audit::record_detached(
        state.pool.clone(),
        crate::SERVICE_NAME,
        AuditEntry::new(
            None,
            "registration.create",
            RecordKind::Registrations.collection(),
            registration_id.clone(),
            Some(json!({ "event_slug": payload.event_slug, "user_id": user_id.clone() })),
        ),
    );

    state.sync.notify(RecordKind::Users, user_id.clone(), user_op);
    state
        .sync
        .notify(RecordKind::Registrations, registration_id.clone(), ChangeOp::Insert);

    Ok(ok(SubmitRegistrationResponse {
        registration_id,
        user_id,
    }))
}

pub async fn list_registrations(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<RegistrationQuery>,
) -> ApiResult<Json<Envelope<Vec<RegistrationResponse>>>> {
    require_admin(&state, &jar).await?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT registration_id, user_id, event_slug, status, answers_json, created_at, updated_at FROM ro_app.registrations WHERE 1=1",
    );
    if let Some(event_slug) = query.event_slug {
        builder.push(" AND event_slug = ");
        builder.push_bind(event_slug);
    }
    if let Some(status) = query.status {
        builder.push(" AND status = ");
        builder.push_bind(status);
    }
    builder.push(" ORDER BY created_at DESC");
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    builder.push(" LIMIT ");
    builder.push(limit.to_string());

    let rows = builder.build().fetch_all(&state.pool).await?;

    let mut registrations = Vec::new();
    for row in rows {
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        let updated_at: chrono::DateTime<chrono::Utc> = row.try_get("updated_at")?;
        registrations.push(RegistrationResponse {
            registration_id: row.try_get("registration_id")?,
            user_id: row.try_get("user_id")?,
            event_slug: row.try_get("event_slug")?,
            status: row.try_get("status")?,
            answers: row.try_get("answers_json")?,
            created_at: created_at.timestamp(),
            updated_at: updated_at.timestamp(),
        });
    }

    Ok(ok(registrations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn valid_email_accepts_ordinary_addresses() {
        assert!(valid_email("person@example.com"));
        assert!(valid_email("first.last+tag@sub.example.org"));
    }

    #[test]
    fn valid_email_rejects_garbage() {
        assert!(!valid_email(""));
        assert!(!valid_email("no-at-sign"));
        assert!(!valid_email("two@@example.com"));
        assert!(!valid_email("spaces in@example.com"));
    }

    #[tokio::test]
    async fn submit_rejects_invalid_email_without_touching_the_store() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/registrations")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"email":"not-an-email","event_slug":"spring-gala"}"#,
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_requires_admin_session() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/admin/registrations")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
