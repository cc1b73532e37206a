// src/recording/exporter.rs
//! Export request history
//!
//! Supports:
//! - JSON (full records, for analysis)
//! - HAR 1.2 (for browser devtools and HAR viewers)

use crate::record::{HeaderList, RequestRecord, ResponseOutcome};
use crate::utils::errors::{EngineError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Har,
}

impl std::str::FromStr for ExportFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "har" => Ok(ExportFormat::Har),
            other => Err(EngineError::ExportFailed(format!(
                "unknown export format: {}",
                other
            ))),
        }
    }
}

pub struct Exporter {
    format: ExportFormat,
}

impl Exporter {
    pub fn new(format: ExportFormat) -> Self {
        Self { format }
    }

    pub fn export(&self, records: &[Arc<RequestRecord>]) -> Result<String> {
        debug!("Exporting {} records to {:?}", records.len(), self.format);

        match self.format {
            ExportFormat::Json => self.export_json(records),
            ExportFormat::Har => self.export_har(records),
        }
    }

    fn export_json(&self, records: &[Arc<RequestRecord>]) -> Result<String> {
        let records: Vec<&RequestRecord> = records.iter().map(Arc::as_ref).collect();
        serde_json::to_string_pretty(&records)
            .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))
    }

    /// Only records that reached the network are exported; HAR has no way
    /// to express a request that was never sent.
    fn export_har(&self, records: &[Arc<RequestRecord>]) -> Result<String> {
        let har = HarDocument {
            log: HarLog {
                version: "1.2".to_string(),
                creator: HarCreator {
                    name: "netpanel".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
                entries: records
                    .iter()
                    .filter(|r| r.state.was_forwarded())
                    .map(|r| har_entry(r))
                    .collect(),
            },
        };

        serde_json::to_string_pretty(&har)
            .map_err(|e| EngineError::ExportFailed(format!("HAR serialization error: {}", e)))
    }
}

fn har_entry(record: &RequestRecord) -> HarEntry {
    let started = record.forwarded_at.unwrap_or(record.observed_at);
    let time = record
        .response
        .as_ref()
        .map(|r| r.timing.duration_ms().max(0) as f64)
        .unwrap_or(0.0);

    let request_body = record.body().map(|body| HarPostData {
        mime_type: record
            .headers()
            .get("content-type")
            .unwrap_or("application/octet-stream")
            .to_string(),
        text: String::from_utf8_lossy(body).into_owned(),
    });

    let response = match record.response.as_ref().map(|r| &r.outcome) {
        Some(ResponseOutcome::Received(response)) => HarResponse {
            status: response.status,
            status_text: status_text(response.status),
            http_version: "HTTP/1.1".to_string(),
            headers: har_headers(&response.headers),
            content: HarContent {
                size: response.body.len() as i64,
                mime_type: response
                    .headers
                    .get("content-type")
                    .unwrap_or("")
                    .to_string(),
                text: Some(String::from_utf8_lossy(&response.body).into_owned()),
            },
            body_size: response.body.len() as i64,
            error: None,
        },
        Some(ResponseOutcome::Failed(reason)) => HarResponse::failed(reason.to_string()),
        None => HarResponse::failed("pending".to_string()),
    };

    HarEntry {
        started_date_time: started.to_rfc3339(),
        time,
        request: HarRequest {
            method: record.method().to_string(),
            url: record.url().to_string(),
            http_version: "HTTP/1.1".to_string(),
            headers: har_headers(record.headers()),
            body_size: record.body().map_or(0, |b| b.len() as i64),
            post_data: request_body,
        },
        response,
        timings: HarTimings {
            send: 0.0,
            wait: time,
            receive: 0.0,
        },
        comment: record.replay_of.map(|id| format!("replay of {}", id)),
    }
}

fn har_headers(headers: &HeaderList) -> Vec<HarHeader> {
    headers
        .iter()
        .map(|(name, value)| HarHeader {
            name: name.to_string(),
            value: value.to_string(),
        })
        .collect()
}

fn status_text(status: u16) -> String {
    hyper::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

// HAR format structures
#[derive(Serialize)]
struct HarDocument {
    log: HarLog,
}

#[derive(Serialize)]
struct HarLog {
    version: String,
    creator: HarCreator,
    entries: Vec<HarEntry>,
}

#[derive(Serialize)]
struct HarCreator {
    name: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarEntry {
    started_date_time: String,
    time: f64,
    request: HarRequest,
    response: HarResponse,
    timings: HarTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    http_version: String,
    headers: Vec<HarHeader>,
    body_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    post_data: Option<HarPostData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarPostData {
    mime_type: String,
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarResponse {
    status: u16,
    status_text: String,
    http_version: String,
    headers: Vec<HarHeader>,
    content: HarContent,
    body_size: i64,
    #[serde(rename = "_error", skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl HarResponse {
    /// HAR convention for requests that got no response
    fn failed(error: String) -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            http_version: String::new(),
            headers: Vec::new(),
            content: HarContent {
                size: 0,
                mime_type: String::new(),
                text: None,
            },
            body_size: -1,
            error: Some(error),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HarContent {
    size: i64,
    mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Serialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Serialize)]
struct HarTimings {
    send: f64,
    wait: f64,
    receive: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        DropReason, FailureReason, HttpResponse, Origin, OutboundRequest, RecordId,
        RequestState, ResponseRecord, Timing,
    };
    use chrono::{Duration, Utc};

    fn record(state: RequestState, outcome: Option<ResponseOutcome>) -> Arc<RequestRecord> {
        let now = Utc::now();
        let request = OutboundRequest::new("POST", "http://example.test/api")
            .with_header("Content-Type", "application/json")
            .with_body("{\"a\":1}");
        Arc::new(RequestRecord {
            id: RecordId::new(),
            sequence: 1,
            origin: Origin::tab(1),
            replay_of: None,
            observed_at: now,
            original: request.clone(),
            outbound: request,
            state,
            drop_reason: (state == RequestState::Dropped).then_some(DropReason::User),
            forwarded_at: outcome.as_ref().map(|_| now),
            response: outcome.map(|outcome| ResponseRecord {
                timing: Timing {
                    started_at: now,
                    finished_at: now + Duration::milliseconds(42),
                },
                outcome,
            }),
        })
    }

    #[test]
    fn test_json_export() {
        let records = vec![record(RequestState::Dropped, None)];
        let json = Exporter::new(ExportFormat::Json).export(&records).unwrap();

        let parsed: Vec<RequestRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].id, records[0].id);
        assert_eq!(parsed[0].drop_reason, Some(DropReason::User));
    }

    #[test]
    fn test_har_export() {
        let records = vec![
            record(
                RequestState::Completed,
                Some(ResponseOutcome::Received(
                    HttpResponse::new(201).with_header("Content-Type", "text/plain"),
                )),
            ),
            record(
                RequestState::Failed,
                Some(ResponseOutcome::Failed(FailureReason::Timeout)),
            ),
            record(RequestState::Dropped, None),
        ];

        let har = Exporter::new(ExportFormat::Har).export(&records).unwrap();
        let value: serde_json::Value = serde_json::from_str(&har).unwrap();

        let entries = value["log"]["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["request"]["method"], "POST");
        assert_eq!(entries[0]["request"]["url"], "http://example.test/api");
        assert_eq!(entries[0]["request"]["postData"]["mimeType"], "application/json");
        assert_eq!(entries[0]["response"]["status"], 201);
        assert_eq!(entries[0]["response"]["statusText"], "Created");
        assert_eq!(entries[0]["time"], 42.0);
        assert_eq!(entries[1]["response"]["status"], 0);
        assert_eq!(entries[1]["response"]["_error"], "timeout");
        assert_eq!(value["log"]["creator"]["name"], "netpanel");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("HAR".parse::<ExportFormat>().unwrap(), ExportFormat::Har);
        assert!("junit".parse::<ExportFormat>().is_err());
    }
}
