use axum::extract::{Query, State};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder, Row};
use utoipa::ToSchema;

use crate::auth::require_admin;
use crate::{ok, ApiResult, AppState, Envelope};

#[derive(Deserialize)]
pub struct UserQuery {
    pub email: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize, ToSchema)]
pub struct UserResponse {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

pub async fn list_users(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<UserQuery>,
) -> ApiResult<Json<Envelope<Vec<UserResponse>>>> {
    require_admin(&state, &jar).await?;

    let mut builder = QueryBuilder::<Postgres>::new(
        "SELECT user_id, email, display_name, created_at, updated_at FROM ro_app.users WHERE 1=1",
    );
    if let Some(email) = query.email {
        builder.push(" AND email = ");
        builder.push_bind(email.to_lowercase());
    }
    builder.push(" ORDER BY created_at DESC");
    let limit = query.limit.unwrap_or(200).clamp(1, 1000);
    builder.push(" LIMIT ");
    builder.push(limit.to_string());

    let rows = builder.build().fetch_all(&state.pool).await?;

    let mut users = Vec::new();
    for row in rows {
        let created_at: chrono::DateTime<chrono::Utc> = row.try_get("created_at")?;
        let updated_at: chrono::DateTime<chrono::Utc> = row.try_get("updated_at")?;
        users.push(UserResponse {
            user_id: row.try_get("user_id")?,
            email: row.try_get("email")?,
            display_name: row.try_get("display_name").ok(),
            created_at: created_at.timestamp(),
            updated_at: updated_at.timestamp(),
        });
    }

    Ok(ok(users))
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn list_users_requires_admin_session() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/v1/admin/users")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
