//! Upload extension allow-list.
//!
//! Storage itself lives outside the pipeline core; this only decides which
//! file types a stage result upload may carry. Audio stages return audio,
//! recognition stages return text or JSON.

use crate::error::{PipelineError, Result};
use crate::state_machine::StageAction;

const AUDIO_RESULT_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "flac", "ogg", "m4a", "opus"];
const TEXT_RESULT_EXTENSIONS: &[&str] = &["txt", "json"];
const GENERIC_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "flac", "ogg", "m4a", "txt", "json"];

/// Extensions accepted for an upload tied to `stage` (or to no stage)
pub fn allowed_extensions(stage: Option<StageAction>) -> &'static [&'static str] {
    match stage {
        Some(StageAction::Extract | StageAction::Clear) => AUDIO_RESULT_EXTENSIONS,
        Some(StageAction::Fast | StageAction::Transcribe) => TEXT_RESULT_EXTENSIONS,
        None => GENERIC_EXTENSIONS,
    }
}

/// Check `extension` (with or without the leading dot, any case) against the stage's list
pub fn validate_result_extension(extension: &str, stage: Option<StageAction>) -> Result<()> {
    let normalized = extension.trim().trim_start_matches('.').to_ascii_lowercase();
    let allowed = allowed_extensions(stage);
    if allowed.contains(&normalized.as_str()) {
        return Ok(());
    }

    let scope = stage.map_or_else(|| "upload".to_string(), |s| format!("{s} result"));
    Err(PipelineError::validation(format!(
        "file type '{extension}' is not allowed for {scope}; expected one of: {}",
        allowed.join(", ")
    )))
}
