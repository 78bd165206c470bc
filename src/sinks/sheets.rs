//! Google Sheets append sink.
//!
//! Each record becomes one `values:append` call against the Sheets v4 REST
//! API with `valueInputOption=RAW`. Authentication is a bearer access token
//! handed in at startup; obtaining and refreshing that token is the
//! credential layer's job, not this sink's.

use tracing::{info, instrument};

use crate::config::SheetConfig;
use crate::error::SinkError;
use crate::models::EnrichedRecord;
use crate::sinks::Sink;
use crate::utils::truncate_for_log;

/// Sink appending one spreadsheet row per record.
#[derive(Debug)]
pub struct SheetsSink {
    http: reqwest::Client,
    append_url: String,
    access_token: String,
}

impl SheetsSink {
    pub fn new(config: &SheetConfig, access_token: String) -> Self {
        let append_url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}:append",
            config.spreadsheet_id,
            urlencoding::encode(&config.range),
        );
        SheetsSink {
            http: reqwest::Client::new(),
            append_url,
            access_token,
        }
    }
}

impl Sink for SheetsSink {
    #[instrument(level = "info", skip_all, fields(id = record.source_id))]
    async fn append(&self, record: &EnrichedRecord) -> Result<(), SinkError> {
        let body = serde_json::json!({ "values": [record.row()] });

        let response = self
            .http
            .post(&self.append_url)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body: truncate_for_log(&body, 300),
            });
        }

        info!("Appended row to sheet");
        Ok(())
    }
}
