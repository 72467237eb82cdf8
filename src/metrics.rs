use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::job::TargetLanguage;
use crate::usage::UsageMetrics;

/// One record per finished job, mirroring the fields a billing or
/// abuse review needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetricsRecord {
    pub timestamp: DateTime<Utc>,
    pub client_id: String,
    pub filename: String,
    pub pages: usize,
    pub text_count: usize,
    pub target_lang: TargetLanguage,
    pub status: String,
    pub processing_time: f64,
    pub file_size: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    pub model_name: Option<String>,
    pub error_message: Option<String>,
}

impl JobMetricsRecord {
    pub fn completed(
        client_id: &str,
        filename: &str,
        pages: usize,
        text_count: usize,
        target_lang: TargetLanguage,
        processing_time: f64,
        file_size: u64,
        usage: &UsageMetrics,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            client_id: client_id.to_string(),
            filename: filename.to_string(),
            pages,
            text_count,
            target_lang,
            status: "completed".to_string(),
            processing_time,
            file_size,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total_tokens,
            total_cost_usd: usage.total_cost_usd,
            model_name: Some(usage.model.clone()),
            error_message: None,
        }
    }

    /// Failed jobs are recorded with zeroed usage.
    pub fn failed(
        client_id: &str,
        filename: &str,
        pages: usize,
        text_count: usize,
        target_lang: TargetLanguage,
        processing_time: f64,
        file_size: u64,
        error_message: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            client_id: client_id.to_string(),
            filename: filename.to_string(),
            pages,
            text_count,
            target_lang,
            status: "failed".to_string(),
            processing_time,
            file_size,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            total_cost_usd: 0.0,
            model_name: None,
            error_message: Some(error_message.to_string()),
        }
    }
}

/// Periodic queue-depth snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueDepthRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub queue_size: usize,
    pub processing_count: usize,
}

impl QueueDepthRecord {
    pub fn new(queue_size: usize, processing_count: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type: "queue_status".to_string(),
            queue_size,
            processing_count,
        }
    }
}

/// Sink for structured metrics records. Persistence mechanics live
/// behind this seam; the core only emits.
pub trait MetricsSink: Send + Sync {
    fn record_job(&self, record: &JobMetricsRecord);
    fn record_queue(&self, record: &QueueDepthRecord);
}

/// Appends one JSON line per record, the same format the queue status
/// dashboards consume.
pub struct JsonlMetricsSink {
    file: Mutex<File>,
}

impl JsonlMetricsSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }

    fn write_line(&self, line: &str) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!("Failed to write metrics record: {}", e);
        }
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn record_job(&self, record: &JobMetricsRecord) {
        match serde_json::to_string(record) {
            Ok(line) => self.write_line(&line),
            Err(e) => warn!("Failed to serialize job metrics record: {}", e),
        }
    }

    fn record_queue(&self, record: &QueueDepthRecord) {
        match serde_json::to_string(record) {
            Ok(line) => self.write_line(&line),
            Err(e) => warn!("Failed to serialize queue metrics record: {}", e),
        }
    }
}
