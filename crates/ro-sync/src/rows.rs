use anyhow::Result;
use chrono::{DateTime, Utc};
use ro_core::records::RecordKind;
use serde_json::{json, Value};
use sqlx::{FromRow, Pool, Postgres};

#[derive(Debug, FromRow)]
pub struct UserRow {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct RegistrationRow {
    pub registration_id: String,
    pub user_id: String,
    pub event_slug: String,
    pub status: String,
    pub answers_json: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct PaymentRow {
    pub payment_id: String,
    pub user_id: String,
    pub registration_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reference: Option<String>,
    pub status: String,
    pub resolution_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn user_cells(row: &UserRow) -> Value {
    json!({
        "user_id": row.user_id,
        "email": row.email,
        "display_name": row.display_name,
        "created_at": row.created_at.to_rfc3339(),
        "updated_at": row.updated_at.to_rfc3339(),
    })
}

pub(crate) fn registration_cells(row: &RegistrationRow) -> Value {
    json!({
        "registration_id": row.registration_id,
        "user_id": row.user_id,
        "event_slug": row.event_slug,
        "status": row.status,
        "answers": row.answers_json,
        "created_at": row.created_at.to_rfc3339(),
        "updated_at": row.updated_at.to_rfc3339(),
    })
}

pub(crate) fn payment_cells(row: &PaymentRow) -> Value {
    json!({
        "payment_id": row.payment_id,
        "user_id": row.user_id,
        "registration_id": row.registration_id,
        "amount_cents": row.amount_cents,
        "currency": row.currency,
        "reference": row.reference,
        "status": row.status,
        "resolution_status": row.resolution_status,
        "created_at": row.created_at.to_rfc3339(),
        "updated_at": row.updated_at.to_rfc3339(),
    })
}

/// Loads the current projection of one record as (row key, sheet cells).
/// Returns None when the record no longer exists; the mirror keeps whatever
/// state it last saw.
pub async fn fetch_cells(
    pool: &Pool<Postgres>,
    kind: RecordKind,
    record_id: &str,
) -> Result<Option<(String, Value)>> {
    match kind {
        RecordKind::Users => {
            let row = sqlx::query_as::<_, UserRow>(
                "SELECT user_id, email, display_name, created_at, updated_at                  FROM ro_app.users WHERE user_id = $1",
            )
            .bind(record_id)
            .fetch_optional(pool)
            .await?;
            Ok(row.map(|row| (row.user_id.clone(), user_cells(&row))))
        }
        RecordKind::Registrations => {
            let row = sqlx::query_as::<_, RegistrationRow>(
                "SELECT registration_id, user_id, event_slug, status, answers_json, created_at, updated_at                  FROM ro_app.registrations WHERE registration_id = $1",
            )
            .bind(record_id)
            .fetch_optional(pool)
            .await?;
            Ok(row.map(|row| (row.registration_id.clone(), registration_cells(&row))))
        }
        RecordKind::Payments => {
            let row = sqlx::query_as::<_, PaymentRow>(
                "SELECT p.payment_id, p.user_id, p.registration_id, p.amount_cents, p.currency,                         p.reference, p.status, s.resolution_status, p.created_at, p.updated_at                  FROM ro_app.payments p                  LEFT JOIN ro_app.payment_statuses s ON s.payment_id = p.payment_id                  WHERE p.payment_id = $1",
            )
            .bind(record_id)
            .fetch_optional(pool)
            .await?;
            Ok(row.map(|row| (row.payment_id.clone(), payment_cells(&row))))
        }
    }
}

/// Identifiers of records touched at or after the cutoff, oldest first so the
/// mirror converges in write order.
pub async fn changed_ids_since(
    pool: &Pool<Postgres>,
    kind: RecordKind,
    cutoff: DateTime<Utc>,
) -> Result<Vec<String>> {
    let sql = match kind {
        RecordKind::Users => {
            "SELECT user_id FROM ro_app.users WHERE updated_at >= $1 ORDER BY updated_at ASC"
        }
        RecordKind::Registrations => {
            "SELECT registration_id FROM ro_app.registrations WHERE updated_at >= $1 ORDER BY updated_at ASC"
        }
        RecordKind::Payments => {
            "SELECT p.payment_id FROM ro_app.payments p              LEFT JOIN ro_app.payment_statuses s ON s.payment_id = p.payment_id              WHERE p.updated_at >= $1 OR s.updated_at >= $1              ORDER BY p.updated_at ASC"
        }
    };
    let ids = sqlx::query_scalar::<_, String>(sql)
        .bind(cutoff)
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn all_ids(pool: &Pool<Postgres>, kind: RecordKind) -> Result<Vec<String>> {
    let sql = match kind {
        RecordKind::Users => "SELECT user_id FROM ro_app.users ORDER BY created_at ASC",
        RecordKind::Registrations => {
            "SELECT registration_id FROM ro_app.registrations ORDER BY created_at ASC"
        }
        RecordKind::Payments => "SELECT payment_id FROM ro_app.payments ORDER BY created_at ASC",
    };
    let ids = sqlx::query_scalar::<_, String>(sql).fetch_all(pool).await?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    #[test]
    fn payment_cells_carry_resolution_overlay() {
        let row = PaymentRow {
            payment_id: "p-1".to_string(),
            user_id: "u-1".to_string(),
            registration_id: "r-1".to_string(),
            amount_cents: 12500,
            currency: "EUR".to_string(),
            reference: Some("bank-777".to_string()),
            status: "reported".to_string(),
            resolution_status: Some("in_progress".to_string()),
            created_at: at(1_700_000_000),
            updated_at: at(1_700_000_600),
        };
        let cells = payment_cells(&row);
        assert_eq!(cells["payment_id"], "p-1");
        assert_eq!(cells["amount_cents"], 12500);
        assert_eq!(cells["resolution_status"], "in_progress");
    }

    #[test]
    fn registration_cells_embed_the_answers_document() {
        let row = RegistrationRow {
            registration_id: "r-1".to_string(),
            user_id: "u-1".to_string(),
            event_slug: "spring-gala".to_string(),
            status: "submitted".to_string(),
            answers_json: json!({"diet": "vegan"}),
            created_at: at(1_700_000_000),
            updated_at: at(1_700_000_000),
        };
        let cells = registration_cells(&row);
        assert_eq!(cells["event_slug"], "spring-gala");
        assert_eq!(cells["answers"]["diet"], "vegan");
    }

    #[test]
    fn user_cells_tolerate_missing_display_name() {
        let row = UserRow {
            user_id: "u-1".to_string(),
            email: "a@example.com".to_string(),
            display_name: None,
            created_at: at(1_700_000_000),
            updated_at: at(1_700_000_000),
        };
        let cells = user_cells(&row);
        assert!(cells["display_name"].is_null());
    }
}
