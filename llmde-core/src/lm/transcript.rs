use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use anyhow::Context;
use anyhow::Result;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::ProviderKind;

/// Global state for verbose LLM logging
static VERBOSE_LLM_LOGGING: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Enable verbose LLM logging to the specified directory
pub fn enable_verbose_llm_logging(log_dir: PathBuf) {
    if let Ok(mut guard) = VERBOSE_LLM_LOGGING.lock() {
        *guard = Some(log_dir);
    }
}

fn get_llm_log_dir() -> Option<PathBuf> {
    VERBOSE_LLM_LOGGING.lock().ok()?.clone()
}

#[derive(Debug, Serialize, Deserialize)]
struct LlmLogEntry {
    timestamp: String,
    provider: String,
    model: String,
    request: Value,
    response: Value,
}

/// Record one request/response exchange if verbose logging is enabled.
/// Requests reference uploaded files by handle only, never by content.
pub(crate) fn log_llm_interaction(
    provider: ProviderKind,
    model: &str,
    request: &Value,
    response: &Value,
) {
    if let Some(log_dir) = get_llm_log_dir()
        && let Err(err) = try_log_llm_interaction(provider, model, request, response, &log_dir)
    {
        tracing::warn!(error = %err, "failed to write LLM transcript");
    }
}

fn try_log_llm_interaction(
    provider: ProviderKind,
    model: &str,
    request: &Value,
    response: &Value,
    log_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create LLM log directory {}", log_dir.display()))?;

    let entry = LlmLogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        provider: provider.to_string(),
        model: model.to_string(),
        request: request.clone(),
        response: response.clone(),
    };

    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let millis = SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_millis())
        .unwrap_or(0);
    let mut file_path = log_dir.join(format!("{timestamp}_llm_{millis:03}.json"));
    let mut suffix = 1;
    while file_path.exists() {
        file_path = log_dir.join(format!("{timestamp}_llm_{millis:03}_{suffix}.json"));
        suffix += 1;
    }

    let json = serde_json::to_string_pretty(&entry).context("failed to serialize LLM log entry")?;
    fs::write(&file_path, json)
        .with_context(|| format!("failed to write LLM log to {}", file_path.display()))?;

    Ok(file_path)
}
