//! Diagnostic dump: writes the intermediate artifacts of a pipeline run.
//!
//! Disabled unless `dump_dir` is configured (or `LAB_BUNDLE_DUMP_DIR` is
//! set). Each run gets its own directory:
//!
//! ```text
//! {dump_dir}/{run_id}/
//!   01-ocr-text.txt
//!   02-prompt.txt
//!   03-llm-response.txt
//!   04-repaired.json
//!   05-bundle.json
//! ```
//!
//! Dump failures are logged and never interrupt the pipeline.

use std::path::{Path, PathBuf};

use uuid::Uuid;

pub const OCR_TEXT_FILE: &str = "01-ocr-text.txt";
pub const PROMPT_FILE: &str = "02-prompt.txt";
pub const LLM_RESPONSE_FILE: &str = "03-llm-response.txt";
pub const REPAIRED_FILE: &str = "04-repaired.json";
pub const BUNDLE_FILE: &str = "05-bundle.json";

/// Returns the dump directory for one run, or `None` if dumping is disabled
/// or the directory cannot be created.
pub fn dump_dir_for(base: Option<&Path>, run_id: &Uuid) -> Option<PathBuf> {
    let dir = base?.join(run_id.to_string());

    if let Err(e) = std::fs::create_dir_all(&dir) {
        tracing::warn!(
            path = %dir.display(),
            error = %e,
            "Diagnostic dump: failed to create directory"
        );
        return None;
    }

    Some(dir)
}

/// Write a JSON artifact, pretty-printed.
pub fn dump_json<T: serde::Serialize>(dir: &Path, filename: &str, value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => dump_text(dir, filename, &json),
        Err(e) => tracing::warn!(
            file = filename,
            error = %e,
            "Diagnostic dump: failed to serialize JSON"
        ),
    }
}

/// Write a text artifact (OCR text, prompt, raw model response).
pub fn dump_text(dir: &Path, filename: &str, text: &str) {
    let path = dir.join(filename);
    match std::fs::write(&path, text.as_bytes()) {
        Ok(()) => tracing::debug!(
            path = %path.display(),
            size = text.len(),
            "Diagnostic dump: written"
        ),
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "Diagnostic dump: failed to write"
        ),
    }
}
