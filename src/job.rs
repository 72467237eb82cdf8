use std::path::PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, DeckError};

/// Languages the service translates into. Closed set; anything else is
/// rejected before a job is created.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    Ja,
    En,
}

impl TargetLanguage {
    pub fn parse(code: &str) -> Result<Self> {
        match code.to_lowercase().as_str() {
            "ja" => Ok(Self::Ja),
            "en" => Ok(Self::En),
            other => Err(DeckError::Validation(format!(
                "Unsupported target language '{}' (supported: ja, en)",
                other
            ))),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Ja => "ja",
            Self::En => "en",
        }
    }

    /// Full language name, used in translation prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Ja => "Japanese",
            Self::En => "English",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One translation job as tracked by the scheduler. Status only ever
/// moves Queued -> Processing -> {Completed, Failed}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub filename: String,
    pub target_lang: TargetLanguage,
    pub status: JobStatus,
    pub pages: usize,
    pub text_count: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Everything the submission boundary hands over for one job. Page and
/// text counts come from the collaborator's analysis pass.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub filename: String,
    pub target_lang: TargetLanguage,
    pub client_id: String,
    pub file_size: u64,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub pages: usize,
    pub text_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_language_codes() {
        assert_eq!(TargetLanguage::parse("ja").unwrap(), TargetLanguage::Ja);
        assert_eq!(TargetLanguage::parse("EN").unwrap(), TargetLanguage::En);
    }

    #[test]
    fn rejects_unsupported_language() {
        assert!(matches!(
            TargetLanguage::parse("fr"),
            Err(DeckError::Validation(_))
        ));
    }

    #[test]
    fn status_serializes_as_lowercase() {
        assert_eq!(serde_json::to_string(&JobStatus::Processing).unwrap(), "\"processing\"");
        assert_eq!(JobStatus::Failed.as_str(), "failed");
    }
}
