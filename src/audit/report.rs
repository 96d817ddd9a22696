use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{ReportConfig, RetryPolicy};
use crate::models::{AuditRecord, OperationType};

/// Body posted to the external audit system.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest<'a> {
    pub module_name: &'a str,
    pub operation_type: OperationType,
    pub business_id: Option<&'a str>,
    pub operator_id: i64,
    pub operator_name: &'a str,
    pub operate_time: DateTime<Utc>,
    pub before_data: Option<&'a serde_json::Value>,
    pub after_data: Option<&'a serde_json::Value>,
    pub changed_fields: &'a [String],
    pub client_ip: Option<&'a str>,
    pub trace_id: &'a str,
}

impl<'a> From<&'a AuditRecord> for ReportRequest<'a> {
    fn from(record: &'a AuditRecord) -> Self {
        Self {
            module_name: &record.module_name,
            operation_type: record.operation_type,
            business_id: record.business_id.as_deref(),
            operator_id: record.operator_id,
            operator_name: &record.operator_name,
            operate_time: record.operate_time,
            before_data: record.before_data.as_ref(),
            after_data: record.after_data.as_ref(),
            changed_fields: record.changed_fields.as_deref().unwrap_or(&[]),
            client_ip: record.client_ip.as_deref(),
            trace_id: &record.trace_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    pub success: Option<bool>,
    pub message: Option<String>,
    pub audit_id: Option<String>,
    pub error_code: Option<String>,
    pub received_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReportOutcome {
    /// The receiver accepted the record.
    Delivered { audit_id: Option<String> },
    /// Reporting is disabled or unconfigured; nothing to do.
    Skipped,
    Failed { reason: String },
}

impl ReportOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, ReportOutcome::Failed { .. })
    }
}

/// Delivers audit records to the external audit system.
pub struct ReportClient {
    client: reqwest::Client,
    config: ReportConfig,
    retry: RetryPolicy,
}

impl ReportClient {
    pub fn new(config: ReportConfig, retry: RetryPolicy) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| format!("Failed to build report client: {e}"))?;
        Ok(Self {
            client,
            config,
            retry,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.api_key.is_empty()
    }

    /// Deliver one record, retrying per the configured policy.
    pub async fn report(&self, record: &AuditRecord) -> ReportOutcome {
        if !self.config.enabled {
            tracing::debug!("Audit reporting disabled, skipping record {}", record.id);
            return ReportOutcome::Skipped;
        }
        if self.config.api_key.is_empty() {
            tracing::warn!("Audit report API key not configured, skipping record {}", record.id);
            return ReportOutcome::Skipped;
        }

        let body = ReportRequest::from(record);
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.attempt(&body).await {
                Ok(response) => {
                    tracing::info!(
                        "Audit record {} reported (external audit id {:?}, attempt {attempt})",
                        record.id,
                        response.audit_id
                    );
                    return ReportOutcome::Delivered {
                        audit_id: response.audit_id,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        "Audit record {} report attempt {attempt}/{max_attempts} failed: {e}",
                        record.id
                    );
                    last_error = e;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }

        ReportOutcome::Failed {
            reason: format!("Report failed after {max_attempts} attempt(s): {last_error}"),
        }
    }

    async fn attempt(&self, body: &ReportRequest<'_>) -> Result<ReportResponse, String> {
        let resp = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("X-API-Key", &self.config.api_key)
            .header("X-Request-ID", body.trace_id)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request error: {e}"))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet = text.chars().take(256).collect::<String>();
            return Err(format!("HTTP {status}: {snippet}"));
        }

        match serde_json::from_str::<ReportResponse>(&text) {
            Ok(response) if response.success == Some(false) => Err(format!(
                "receiver rejected record: {} ({})",
                response.message.as_deref().unwrap_or("no message"),
                response.error_code.as_deref().unwrap_or("no error code")
            )),
            Ok(response) => Ok(response),
            Err(e) => {
                tracing::warn!("Unparseable audit report response ({status}): {e}");
                Ok(ReportResponse {
                    success: Some(true),
                    message: None,
                    audit_id: None,
                    error_code: None,
                    received_at: None,
                })
            }
        }
    }
}
