use crate::config::LimitsConfig;
use crate::error::{Result, DeckError};
use crate::job::TargetLanguage;

/// Validate an upload before any job exists. Rejections here are
/// caller-visible and produce no job and no metrics record.
pub fn validate_upload(
    filename: &str,
    file_size: u64,
    target_lang: &str,
    limits: &LimitsConfig,
) -> Result<TargetLanguage> {
    if !filename.to_lowercase().ends_with(".pptx") {
        return Err(DeckError::Validation(
            "Only .pptx files are supported".to_string(),
        ));
    }

    if file_size > limits.max_file_size {
        return Err(DeckError::Validation(format!(
            "File too large: {:.1} MB (maximum {} MB)",
            file_size as f64 / 1024.0 / 1024.0,
            limits.max_file_size / 1024 / 1024
        )));
    }

    TargetLanguage::parse(target_lang)
}
