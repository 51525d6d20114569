//! Provider adapters behind a single query contract.
//!
//! Each provider speaks a different request/response shape; [`ModelAdapter`]
//! hides that behind `query` and `close`. Provider-specific inputs (a JSON
//! schema for structured output) travel in the [`QueryRequest`] options
//! object so the trait signature stays the same for every provider.

mod claude;
mod gemini;
mod transcript;

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

pub use claude::ClaudeModel;
pub use gemini::GeminiModel;
pub use transcript::enable_verbose_llm_logging;

use crate::config::ProviderSettings;
use crate::error::LlmdeError;
use crate::error::Result;
use crate::params::GenerationConfig;

/// Inputs for a single generation call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRequest {
    pub prompt_path: PathBuf,
    pub files: Vec<PathBuf>,
    /// Only honoured by providers with structured output; others ignore it.
    pub json_schema: Option<PathBuf>,
}

impl QueryRequest {
    pub fn new(prompt_path: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            prompt_path: prompt_path.into(),
            files,
            json_schema: None,
        }
    }

    pub fn with_json_schema(mut self, json_schema: Option<PathBuf>) -> Self {
        self.json_schema = json_schema;
        self
    }
}

/// Text extracted from a provider response, alongside the untouched body.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub raw: Value,
}

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Model identifier passed verbatim to the provider.
    fn model_name(&self) -> &str;

    fn provider(&self) -> ProviderKind;

    /// Upload `request.files`, send them with the prompt and return the
    /// model's text output.
    async fn query(&self, request: &QueryRequest) -> Result<ModelResponse>;

    /// Release the provider client. Safe to call more than once; queries
    /// after closing fail with [`LlmdeError::AdapterClosed`].
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Claude,
    Gemini,
}

/// Model-name prefixes in match order. The first prefix that matches wins.
const PROVIDERS: &[(&str, ProviderKind)] = &[
    ("claude", ProviderKind::Claude),
    ("gemini", ProviderKind::Gemini),
];

impl ProviderKind {
    /// Select the provider for `model_name` by case-insensitive prefix.
    pub fn from_model_name(model_name: &str) -> Result<Self> {
        let lowered = model_name.to_ascii_lowercase();
        PROVIDERS
            .iter()
            .find(|(prefix, _)| lowered.starts_with(prefix))
            .map(|(_, kind)| *kind)
            .ok_or_else(|| LlmdeError::UnknownModel {
                model: model_name.to_string(),
                supported: Self::supported_prefixes(),
            })
    }

    pub fn supported_prefixes() -> Vec<&'static str> {
        PROVIDERS.iter().map(|(prefix, _)| *prefix).collect()
    }

    pub fn all() -> impl Iterator<Item = ProviderKind> {
        PROVIDERS.iter().map(|(_, kind)| *kind)
    }

    pub fn prefix(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
        }
    }

    /// Environment variable consulted when no API key is passed explicitly.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::Claude => "LLMDE_CLAUDE_API_KEY",
            Self::Gemini => "LLMDE_GEMINI_API_KEY",
        }
    }

    pub fn resolve_api_key(self, explicit: Option<&str>) -> Result<String> {
        self.resolve_api_key_with(explicit, |var| std::env::var(var).ok())
    }

    pub fn resolve_api_key_with(
        self,
        explicit: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<String> {
        if let Some(key) = explicit.filter(|key| !key.trim().is_empty()) {
            return Ok(key.to_string());
        }

        lookup(self.env_var())
            .filter(|value| !value.trim().is_empty())
            .ok_or(LlmdeError::MissingCredential {
                provider: self.prefix(),
                env_var: self.env_var(),
            })
    }

    /// Construct the adapter for this provider. Every argument is checked
    /// before any network resource is opened.
    pub fn build(
        self,
        model_name: &str,
        api_key: &str,
        generation: GenerationConfig,
        settings: &ProviderSettings,
    ) -> Result<Box<dyn ModelAdapter>> {
        Ok(match self {
            Self::Claude => Box::new(ClaudeModel::new(model_name, api_key, generation, settings)?),
            Self::Gemini => Box::new(GeminiModel::new(model_name, api_key, generation, settings)?),
        })
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Owns an adapter and closes it when dropped, so every exit path of the
/// owning scope releases the provider client.
pub struct ClosingAdapter {
    inner: Box<dyn ModelAdapter>,
}

impl ClosingAdapter {
    pub fn new(inner: Box<dyn ModelAdapter>) -> Self {
        Self { inner }
    }

    pub fn close(&mut self) {
        self.inner.close();
    }
}

impl std::ops::Deref for ClosingAdapter {
    type Target = dyn ModelAdapter;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl Drop for ClosingAdapter {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for ClosingAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosingAdapter")
            .field("model", &self.inner.model_name())
            .field("closed", &self.inner.is_closed())
            .finish()
    }
}

/// State shared by every provider adapter: identity, credentials,
/// validated parameters and the HTTP client it exclusively owns.
#[derive(Debug)]
pub(crate) struct AdapterBase {
    pub model_name: String,
    pub api_key: String,
    pub generation: GenerationConfig,
    pub base_url: String,
    client: Option<reqwest::Client>,
}

impl AdapterBase {
    pub fn new(
        model_name: &str,
        api_key: &str,
        generation: GenerationConfig,
        settings: &ProviderSettings,
        default_base_url: &str,
    ) -> Result<Self> {
        if model_name.trim().is_empty() {
            return Err(LlmdeError::EmptyField {
                field: "model_name",
            });
        }
        if api_key.trim().is_empty() {
            return Err(LlmdeError::EmptyField { field: "api_key" });
        }

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = settings.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|err| LlmdeError::Generation {
            model: model_name.to_string(),
            message: format!("failed to create HTTP client: {err}"),
        })?;

        let base_url = settings
            .base_url
            .as_deref()
            .unwrap_or(default_base_url)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            model_name: model_name.to_string(),
            api_key: api_key.to_string(),
            generation,
            base_url,
            client: Some(client),
        })
    }

    pub fn client(&self) -> Result<&reqwest::Client> {
        self.client.as_ref().ok_or_else(|| LlmdeError::AdapterClosed {
            model: self.model_name.clone(),
        })
    }

    pub fn close(&mut self) {
        if self.client.take().is_some() {
            tracing::debug!(model = %self.model_name, "closed model client");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_none()
    }

    pub fn generation_error(&self, message: impl Into<String>) -> LlmdeError {
        LlmdeError::Generation {
            model: self.model_name.clone(),
            message: message.into(),
        }
    }
}

/// Prompt text plus the checked file list, ready for upload.
#[derive(Debug)]
pub(crate) struct PreparedQuery {
    pub prompt: String,
    pub files: Vec<PathBuf>,
}

/// Read the prompt and confirm every file exists, in input order, before
/// anything is uploaded.
pub(crate) async fn prepare_query(request: &QueryRequest) -> Result<PreparedQuery> {
    let prompt = read_text_file(&request.prompt_path).await?;

    for file in &request.files {
        if !is_file(file).await {
            return Err(LlmdeError::FileNotFound { path: file.clone() });
        }
    }

    Ok(PreparedQuery {
        prompt,
        files: request.files.clone(),
    })
}

pub(crate) async fn read_text_file(path: &Path) -> Result<String> {
    if !is_file(path).await {
        return Err(LlmdeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    tokio::fs::read_to_string(path)
        .await
        .map_err(|err| LlmdeError::io(path, err))
}

pub(crate) async fn read_json_schema(path: &Path) -> Result<Value> {
    let content = read_text_file(path).await?;
    serde_json::from_str(&content).map_err(|err| LlmdeError::InvalidSchema {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

/// Uploadable bytes of a local document.
pub(crate) struct DocumentPayload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl DocumentPayload {
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| LlmdeError::io(path, err))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();

        Ok(Self {
            file_name,
            mime_type,
            bytes,
        })
    }
}

/// Render a non-success HTTP response as `"<status>: <body>"`.
pub(crate) async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolves_providers_by_case_insensitive_prefix() {
        for name in ["claude-sonnet-4-5", "Claude-3-Opus", "CLAUDE"] {
            assert_eq!(
                ProviderKind::from_model_name(name).unwrap(),
                ProviderKind::Claude
            );
        }
        for name in ["gemini-2.0-flash", "Gemini-2.5-pro"] {
            assert_eq!(
                ProviderKind::from_model_name(name).unwrap(),
                ProviderKind::Gemini
            );
        }
    }

    #[test]
    fn unknown_model_reports_supported_prefixes() {
        for name in ["gpt-4o", "", "my-claude", " gemini"] {
            let err = ProviderKind::from_model_name(name).unwrap_err();
            match err {
                LlmdeError::UnknownModel { model, supported } => {
                    assert_eq!(model, name);
                    assert_eq!(supported, vec!["claude", "gemini"]);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn explicit_api_key_wins_over_environment() {
        let key = ProviderKind::Claude
            .resolve_api_key_with(Some("explicit"), |_| Some("from-env".to_string()))
            .unwrap();
        assert_eq!(key, "explicit");
    }

    #[test]
    fn api_key_falls_back_to_provider_variable() {
        let key = ProviderKind::Gemini
            .resolve_api_key_with(None, |var| {
                (var == "LLMDE_GEMINI_API_KEY").then(|| "gem-key".to_string())
            })
            .unwrap();
        assert_eq!(key, "gem-key");
    }

    #[test]
    fn missing_api_key_names_variable() {
        let err = ProviderKind::Claude
            .resolve_api_key_with(None, |_| None)
            .unwrap_err();
        assert!(matches!(
            err,
            LlmdeError::MissingCredential {
                env_var: "LLMDE_CLAUDE_API_KEY",
                ..
            }
        ));

        let blank = ProviderKind::Claude
            .resolve_api_key_with(None, |_| Some("  ".to_string()))
            .unwrap_err();
        assert!(matches!(blank, LlmdeError::MissingCredential { .. }));
    }

    #[test]
    fn blank_explicit_api_key_counts_as_missing() {
        let err = ProviderKind::Gemini
            .resolve_api_key_with(Some(""), |_| None)
            .unwrap_err();
        assert!(matches!(
            err,
            LlmdeError::MissingCredential {
                env_var: "LLMDE_GEMINI_API_KEY",
                ..
            }
        ));

        let key = ProviderKind::Gemini
            .resolve_api_key_with(Some("  "), |_| Some("from-env".to_string()))
            .unwrap();
        assert_eq!(key, "from-env");
    }

    #[test]
    fn build_rejects_empty_identity() {
        let settings = ProviderSettings::default();
        let err = ProviderKind::Claude
            .build("claude-x", "", GenerationConfig::default(), &settings)
            .err()
            .unwrap();
        assert!(matches!(err, LlmdeError::EmptyField { field: "api_key" }));

        let err = ProviderKind::Gemini
            .build(" ", "key", GenerationConfig::default(), &settings)
            .err()
            .unwrap();
        assert!(matches!(err, LlmdeError::EmptyField { field: "model_name" }));
    }

    #[test]
    fn build_selects_adapter_for_provider() {
        let settings = ProviderSettings::default();
        let claude = ProviderKind::Claude
            .build("claude-x", "key", GenerationConfig::default(), &settings)
            .unwrap();
        assert_eq!(claude.provider(), ProviderKind::Claude);
        assert_eq!(claude.model_name(), "claude-x");

        let gemini = ProviderKind::Gemini
            .build("gemini-x", "key", GenerationConfig::default(), &settings)
            .unwrap();
        assert_eq!(gemini.provider(), ProviderKind::Gemini);
    }

    #[test]
    fn close_is_idempotent() {
        let settings = ProviderSettings::default();
        let mut adapter = ProviderKind::Claude
            .build("claude-x", "key", GenerationConfig::default(), &settings)
            .unwrap();
        assert!(!adapter.is_closed());
        adapter.close();
        adapter.close();
        assert!(adapter.is_closed());
    }

    #[test]
    fn closing_adapter_closes_on_drop() {
        use std::sync::Arc;
        use std::sync::atomic::AtomicUsize;
        use std::sync::atomic::Ordering;

        struct CountingAdapter(Arc<AtomicUsize>);

        #[async_trait]
        impl ModelAdapter for CountingAdapter {
            fn model_name(&self) -> &str {
                "claude-counting"
            }

            fn provider(&self) -> ProviderKind {
                ProviderKind::Claude
            }

            async fn query(&self, _request: &QueryRequest) -> Result<ModelResponse> {
                unreachable!("not queried")
            }

            fn close(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }

            fn is_closed(&self) -> bool {
                self.0.load(Ordering::SeqCst) > 0
            }
        }

        let closes = Arc::new(AtomicUsize::new(0));
        {
            let mut guard = ClosingAdapter::new(Box::new(CountingAdapter(closes.clone())));
            assert_eq!(guard.model_name(), "claude-counting");
            guard.close();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn query_after_close_fails() {
        let tmp = TempDir::new().unwrap();
        let prompt = tmp.path().join("prompt.md");
        std::fs::write(&prompt, "Extract").unwrap();

        let settings = ProviderSettings::default();
        let mut adapter = ProviderKind::Gemini
            .build("gemini-x", "key", GenerationConfig::default(), &settings)
            .unwrap();
        adapter.close();

        let err = adapter
            .query(&QueryRequest::new(&prompt, Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmdeError::AdapterClosed { .. }));
    }

    #[tokio::test]
    async fn prepare_query_reports_missing_prompt() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.md");
        let err = prepare_query(&QueryRequest::new(&missing, Vec::new()))
            .await
            .unwrap_err();
        match err {
            LlmdeError::FileNotFound { path } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn prepare_query_names_first_missing_file() {
        let tmp = TempDir::new().unwrap();
        let prompt = tmp.path().join("prompt.md");
        let present = tmp.path().join("a.pdf");
        let missing = tmp.path().join("b.pdf");
        std::fs::write(&prompt, "Extract the study design").unwrap();
        std::fs::write(&present, b"%PDF-1.7").unwrap();

        let err = prepare_query(&QueryRequest::new(
            &prompt,
            vec![present.clone(), missing.clone(), tmp.path().join("c.pdf")],
        ))
        .await
        .unwrap_err();
        match err {
            LlmdeError::FileNotFound { path } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }

        let prepared = prepare_query(&QueryRequest::new(&prompt, vec![present.clone()]))
            .await
            .unwrap();
        assert_eq!(prepared.prompt, "Extract the study design");
        assert_eq!(prepared.files, vec![present]);
    }

    #[tokio::test]
    async fn invalid_schema_is_reported_with_path() {
        let tmp = TempDir::new().unwrap();
        let schema = tmp.path().join("schema.json");
        std::fs::write(&schema, "{ not json").unwrap();
        let err = read_json_schema(&schema).await.unwrap_err();
        assert!(matches!(err, LlmdeError::InvalidSchema { .. }));
    }

    #[tokio::test]
    async fn document_payload_guesses_pdf_mime() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("paper.pdf");
        std::fs::write(&pdf, b"%PDF-1.7").unwrap();
        let payload = DocumentPayload::read(&pdf).await.unwrap();
        assert_eq!(payload.file_name, "paper.pdf");
        assert_eq!(payload.mime_type, "application/pdf");
        assert_eq!(payload.bytes, b"%PDF-1.7");
    }
}
