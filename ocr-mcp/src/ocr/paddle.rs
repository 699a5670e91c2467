use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::PaddleConfig;
use crate::error::{OcrError, Result};

use super::engine::Backend;
use super::raw::RawOutput;

/// `fileType` value for images in the PaddleOCR serving API (0 is PDF).
const FILE_TYPE_IMAGE: u8 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OcrRequest {
    file: String,
    file_type: u8,
}

/// Structured-detection backend talking to a PaddleOCR serving endpoint.
#[derive(Clone, Debug)]
pub struct PaddleBackend {
    client: Client,
    base_url: String,
}

impl PaddleBackend {
    pub fn new(config: &PaddleConfig) -> Result<Self> {
        let base_url = config.base_url.clone().ok_or_else(|| {
            OcrError::BackendUnavailable(
                "PaddleOCR serving endpoint not configured (set PADDLEOCR_BASE_URL)".to_string(),
            )
        })?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| {
                OcrError::BackendUnavailable(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Dig the first page out of a serving response envelope.
///
/// `{"errorCode": 0, "result": {"ocrResults": [{"prunedResult": {...}}]}}` yields the
/// pruned result. Bodies without the envelope are returned unchanged.
fn unwrap_envelope(mut body: Value) -> Result<Value> {
    if let Some(code) = body.get("errorCode").and_then(Value::as_i64) {
        if code != 0 {
            let message = body
                .get("errorMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(OcrError::BackendExecution(format!(
                "PaddleOCR error {code}: {message}"
            )));
        }
    }

    let Some(mut result) = body.get_mut("result").map(Value::take) else {
        return Ok(body);
    };

    match result.get_mut("ocrResults").map(Value::take) {
        Some(Value::Array(pages)) => match pages.into_iter().next() {
            Some(mut page) => match page.get_mut("prunedResult") {
                Some(pruned) => Ok(pruned.take()),
                None => Ok(page),
            },
            None => Ok(Value::Null),
        },
        Some(other) => Ok(other),
        None => Ok(result),
    }
}

#[async_trait]
impl Backend for PaddleBackend {
    fn name(&self) -> &'static str {
        "paddleocr"
    }

    async fn run(&self, image_path: &Path) -> Result<RawOutput> {
        let bytes = tokio::fs::read(image_path)
            .await
            .map_err(|e| OcrError::InvalidInput(format!("Failed to read image: {e}")))?;

        let request = OcrRequest {
            file: STANDARD.encode(&bytes),
            file_type: FILE_TYPE_IMAGE,
        };

        debug!(
            endpoint = %self.base_url,
            image_bytes = bytes.len(),
            "Sending image to PaddleOCR"
        );

        let response = self
            .client
            .post(format!("{}/ocr", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::BackendExecution(format!("PaddleOCR request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::BackendExecution(format!(
                "PaddleOCR request failed: {status} - {body}"
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            OcrError::BackendExecution(format!("Failed to parse PaddleOCR response: {e}"))
        })?;

        RawOutput::from_json(unwrap_envelope(body)?)
    }
}
