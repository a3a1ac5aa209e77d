use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::time::Duration;
use utoipa::ToSchema;

use crate::{ok, ApiError, ApiResult, AppState, Envelope};

const SESSION_COOKIE: &str = "ro_admin_session";

/// Verifies ID tokens against the external identity provider's tokeninfo
/// endpoint. Who may administer is decided locally by the email allow-list,
/// not by the provider.
#[derive(Clone)]
pub(crate) struct IdpVerifier {
    http: reqwest::Client,
    tokeninfo_url: String,
    audience: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    email: Option<String>,
    email_verified: Option<String>,
    aud: Option<String>,
    name: Option<String>,
}

pub(crate) struct VerifiedIdentity {
    pub email: String,
    pub display_name: Option<String>,
}

impl IdpVerifier {
    pub(crate) fn new(tokeninfo_url: String, audience: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            tokeninfo_url,
            audience,
        })
    }

    pub(crate) async fn verify(&self, id_token: &str) -> ApiResult<VerifiedIdentity> {
        let response = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|err| {
                tracing::error!(error = %err, "identity provider unreachable");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IDP_ERROR",
                    "identity provider unreachable",
                )
            })?;
        if !response.status().is_success() {
            return Err(ApiError::unauthorized("invalid token"));
        }
        let info: TokenInfo = response.json().await.map_err(|err| {
            tracing::error!(error = %err, "tokeninfo response malformed");
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "IDP_ERROR",
                "identity provider unreachable",
            )
        })?;

        if let Some(expected) = &self.audience {
            if info.aud.as_deref() != Some(expected.as_str()) {
                return Err(ApiError::unauthorized("invalid token"));
            }
        }
        if info.email_verified.as_deref() != Some("true") {
            return Err(ApiError::unauthorized("email not verified"));
        }
        let Some(email) = info.email else {
            return Err(ApiError::unauthorized("invalid token"));
        };

        Ok(VerifiedIdentity {
            email: email.to_lowercase(),
            display_name: info.name,
        })
    }
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub id_token: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub email: String,
    pub display_name: Option<String>,
    pub expires_at: i64,
}

#[derive(Serialize, ToSchema)]
pub struct AdminUser {
    pub email: String,
    pub display_name: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<(CookieJar, Json<Envelope<LoginResponse>>)> {
    let identity = state.idp.verify(&payload.id_token).await?;

    if !state.allowed_admins.contains(&identity.email) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "NOT_ALLOWED",
            "not an administrator",
        ));
    }

    let expires_at = chrono::Utc::now() + chrono::Duration::seconds(state.session_ttl_seconds);
    let session_id = uuid::Uuid::new_v4().to_string();

    sqlx::query(
        "INSERT INTO ro_admin.admin_sessions          (session_id, email, display_name, expires_at)          VALUES ($1, $2, $3, $4)",
    )
    .bind(&session_id)
    .bind(&identity.email)
    .bind(&identity.display_name)
    .bind(expires_at)
    .execute(&state.pool)
    .await?;

    ro_core::audit::record_detached(
        state.pool.clone(),
        crate::SERVICE_NAME,
        ro_core::audit::AuditEntry::new(
            Some(identity.email.clone()),
            "admin.login",
            "admin_sessions",
            session_id.clone(),
            None,
        ),
    );

    let cookie = Cookie::build((SESSION_COOKIE, session_id))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    let jar = jar.add(cookie);

    Ok((
        jar,
        ok(LoginResponse {
            email: identity.email,
            display_name: identity.display_name,
            expires_at: expires_at.timestamp(),
        }),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<(CookieJar, Json<Envelope<serde_json::Value>>)> {
    let mut jar = jar;
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session_id = cookie.value().to_string();
        sqlx::query("DELETE FROM ro_admin.admin_sessions WHERE session_id = $1")
            .bind(&session_id)
            .execute(&state.pool)
            .await
            .ok();
        jar = jar.remove(Cookie::from(SESSION_COOKIE));
    }

    Ok((jar, ok(serde_json::json!({ "status": "ok" }))))
}

pub async fn me(
    State(state): State<AppState>,
    jar: CookieJar,
) -> ApiResult<Json<Envelope<AdminUser>>> {
    let admin = require_admin(&state, &jar).await?;
    Ok(ok(admin))
}

pub(crate) async fn require_admin(state: &AppState, jar: &CookieJar) -> ApiResult<AdminUser> {
    let Some(cookie) = jar.get(SESSION_COOKIE) else {
        return Err(ApiError::unauthorized("missing session"));
    };
    let session_id = cookie.value();
    let row = sqlx::query(
        "SELECT email, display_name, expires_at          FROM ro_admin.admin_sessions WHERE session_id = $1",
    )
    .bind(session_id)
    .fetch_optional(&state.pool)
    .await?;

    let Some(row) = row else {
        return Err(ApiError::unauthorized("invalid session"));
    };

    let expires_at: chrono::DateTime<chrono::Utc> = row.try_get("expires_at")?;
    if chrono::Utc::now() > expires_at {
        return Err(ApiError::unauthorized("session expired"));
    }

    let email: String = row.try_get("email")?;
    // Removal from the allow-list revokes access even for live sessions.
    if !state.allowed_admins.contains(&email) {
        return Err(ApiError::unauthorized("not an administrator"));
    }

    Ok(AdminUser {
        email,
        display_name: row.try_get("display_name").ok(),
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn me_requires_session_cookie() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/admin/auth/me")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_error_body_uses_the_envelope() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/admin/auth/me")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["success"], false);
        assert!(body["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn login_rejects_invalid_json() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/admin/auth/login")
                    .header("content-type", "application/json")
                    .body(Body::from("{invalid"))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_without_cookie_returns_ok() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/admin/auth/logout")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
