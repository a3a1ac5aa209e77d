use anyhow::{Context, Result};
use ro_core::{config, records::RecordKind};
use serde_json::Value;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub api_token: String,
}

impl SheetsConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: config::required_env("SHEETS_BASE_URL")?,
            spreadsheet_id: config::required_env("SHEETS_SPREADSHEET_ID")?,
            api_token: config::required_env("SHEETS_API_TOKEN")?,
        })
    }
}

/// Client for the spreadsheet mirror. Rows are addressed by the record
/// identifier, so a repeated delivery overwrites instead of appending.
#[derive(Clone)]
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    api_token: String,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: config.spreadsheet_id,
            api_token: config.api_token,
        })
    }

    pub(crate) fn row_url(&self, kind: RecordKind, key: &str) -> String {
        format!(
            "{}/spreadsheets/{}/sheets/{}/rows/{}",
            self.base_url,
            self.spreadsheet_id,
            kind.collection(),
            key
        )
    }

    pub async fn upsert_row(&self, kind: RecordKind, key: &str, cells: &Value) -> Result<()> {
        let response = self
            .http
            .put(self.row_url(kind, key))
            .bearer_auth(&self.api_token)
            .json(cells)
            .send()
            .await
            .with_context(|| format!("sheet upsert failed for {}:{key}", kind.collection()))?;
        if !response.status().is_success() {
            anyhow::bail!(
                "sheet upsert rejected for {}:{} ({})",
                kind.collection(),
                key,
                response.status()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> SheetsClient {
        SheetsClient::new(SheetsConfig {
            base_url: "https://sheets.internal/".to_string(),
            spreadsheet_id: "reg-2026".to_string(),
            api_token: "token".to_string(),
        })
        .expect("client")
    }

    #[test]
    fn row_url_is_keyed_by_record_id() {
        let client = test_client();
        assert_eq!(
            client.row_url(RecordKind::Payments, "p-42"),
            "https://sheets.internal/spreadsheets/reg-2026/sheets/payments/rows/p-42"
        );
    }

    #[test]
    fn row_url_is_stable_across_deliveries() {
        // Same record id must always address the same external row.
        let client = test_client();
        let first = client.row_url(RecordKind::Users, "u-1");
        let second = client.row_url(RecordKind::Users, "u-1");
        assert_eq!(first, second);
    }
}
