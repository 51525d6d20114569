use std::path::PathBuf;

use anyhow::Result as AnyResult;

use crate::config::AppConfig;
use crate::config::AppPaths;
use crate::config::ConfigBundle;
use crate::config::load_or_initialize_config;
use crate::error::LlmdeError;
use crate::error::Result;
use crate::lm::ClosingAdapter;
use crate::lm::ProviderKind;
use crate::lm::enable_verbose_llm_logging;
use crate::params::GenerationParams;
use crate::pipeline::BatchPipeline;
use crate::pipeline::PipelineEvent;
use crate::pipeline::RunReport;
use crate::prompts::PromptLibrary;
use crate::runner::SingleQuery;
use crate::runner::SingleQueryOutcome;
use crate::runner::run_single_query;

/// Generation values given on the command line. Unset fields fall back to
/// the `[generation]` section of the configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOverrides {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub max_tokens: Option<i64>,
}

/// Which model to talk to and how.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelOptions {
    pub model: String,
    pub api_key: Option<String>,
    /// Builtin system-instruction name or path to a file.
    pub system_instruction: Option<String>,
    pub generation: GenerationOverrides,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub src: PathBuf,
    pub out: PathBuf,
    /// Builtin prompt names or prompt file paths, in processing order.
    pub prompts: Vec<String>,
    pub model: ModelOptions,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleRequest {
    pub prompt: String,
    pub files: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub model: ModelOptions,
}

/// High-level orchestrator: resolves prompts, credentials and the model
/// adapter up front, then drives the batch pipeline or a single query.
#[derive(Debug)]
pub struct ExtractionEngine {
    bundle: ConfigBundle,
    prompts: PromptLibrary,
}

impl ExtractionEngine {
    /// Load configuration from disk (creating defaults if needed) and produce a
    /// ready-to-use engine instance.
    pub fn load(app_name: impl AsRef<str>) -> AnyResult<Self> {
        let bundle = load_or_initialize_config(app_name)?;
        if let Some(log_dir) = bundle.config.resolved_llm_log_dir(&bundle.paths)? {
            tracing::info!(dir = %log_dir.display(), "verbose LLM logging enabled");
            enable_verbose_llm_logging(log_dir);
        }
        Ok(Self::from_bundle(bundle))
    }

    /// Construct an engine from an existing [`ConfigBundle`]. Useful for tests.
    pub fn from_bundle(bundle: ConfigBundle) -> Self {
        let prompts = PromptLibrary::new(bundle.paths.prompt_library_dir());
        Self { bundle, prompts }
    }

    pub fn config(&self) -> &AppConfig {
        &self.bundle.config
    }

    pub fn paths(&self) -> &AppPaths {
        &self.bundle.paths
    }

    pub fn prompt_library(&self) -> &PromptLibrary {
        &self.prompts
    }

    /// Command-line values over configured defaults.
    pub fn generation_params(
        &self,
        overrides: &GenerationOverrides,
        system_instruction: Option<String>,
    ) -> GenerationParams {
        let defaults = &self.bundle.config.generation;
        GenerationParams {
            temperature: overrides.temperature.or(defaults.temperature),
            top_p: overrides.top_p.or(defaults.top_p),
            top_k: overrides.top_k.or(defaults.top_k),
            max_tokens: overrides.max_tokens.or(defaults.max_tokens),
            system_instruction,
        }
    }

    /// Resolve system instruction and credentials, validate parameters and
    /// build the adapter. Nothing here touches the network.
    pub fn prepare_model(&self, options: &ModelOptions) -> Result<ClosingAdapter> {
        let provider = ProviderKind::from_model_name(&options.model)?;

        let system_instruction = options
            .system_instruction
            .as_deref()
            .map(|name| self.prompts.resolve_system_instruction(name))
            .transpose()?;

        let api_key = provider.resolve_api_key(options.api_key.as_deref())?;
        let generation = self
            .generation_params(&options.generation, system_instruction)
            .validate()?;

        let settings = self.bundle.config.providers.settings_for(provider);
        let adapter = provider.build(&options.model, &api_key, generation, settings)?;
        tracing::info!(model = %options.model, %provider, "model initialized");
        Ok(ClosingAdapter::new(adapter))
    }

    pub async fn run_batch(
        &self,
        request: &BatchRequest,
        progress: impl Fn(&PipelineEvent<'_>) + Send + Sync + 'static,
    ) -> Result<RunReport> {
        let prompts = self.prompts.resolve_prompts(request.prompts.as_slice())?;
        if prompts.is_empty() {
            return Err(LlmdeError::EmptyField { field: "prompts" });
        }
        for prompt in &prompts {
            tracing::info!(
                prompt = %prompt.stem(),
                path = %prompt.prompt_path.display(),
                schema = prompt.json_schema.is_some(),
                "prompt resolved"
            );
        }

        let adapter = self.prepare_model(&request.model)?;
        let pipeline =
            BatchPipeline::new(prompts, self.bundle.config.pacing).with_progress(progress);
        run_pipeline(&pipeline, adapter, request).await
    }

    /// Pre-flight for a single query: the prompt resolves, every file
    /// exists and the adapter builds.
    pub fn prepare_single(&self, request: &SingleRequest) -> Result<(ClosingAdapter, SingleQuery)> {
        let prompt = self.prompts.resolve_prompt(&request.prompt)?;

        if request.files.is_empty() {
            return Err(LlmdeError::EmptyField { field: "files" });
        }
        if let Some(missing) = request.files.iter().find(|file| !file.is_file()) {
            return Err(LlmdeError::FileNotFound {
                path: missing.clone(),
            });
        }

        let adapter = self.prepare_model(&request.model)?;
        Ok((
            adapter,
            SingleQuery {
                files: request.files.clone(),
                prompt,
                output: request.output.clone(),
            },
        ))
    }

    /// Pre-flight errors are returned; a failed query is reported in the
    /// outcome.
    pub async fn run_single(&self, request: &SingleRequest) -> Result<SingleQueryOutcome> {
        let (adapter, query) = self.prepare_single(request)?;
        Ok(run_single_query(adapter, &query).await)
    }
}

/// Drive `pipeline` with `adapter`, closing the adapter once the run ends
/// whether or not it succeeded.
async fn run_pipeline(
    pipeline: &BatchPipeline,
    mut adapter: ClosingAdapter,
    request: &BatchRequest,
) -> Result<RunReport> {
    let report = pipeline.run(&*adapter, &request.src, &request.out).await;
    adapter.close();
    tracing::debug!(model = %adapter.model_name(), "model closed after batch run");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationDefaults;
    use crate::config::PacingSettings;
    use crate::lm::ModelAdapter;
    use crate::lm::ModelResponse;
    use crate::lm::QueryRequest;
    use crate::prompts::PromptSpec;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn engine(root: &std::path::Path) -> ExtractionEngine {
        ExtractionEngine::from_bundle(ConfigBundle {
            config: AppConfig::default(),
            paths: AppPaths::rooted_at(root, "llmde-test"),
        })
    }

    fn options(model: &str) -> ModelOptions {
        ModelOptions {
            model: model.to_string(),
            api_key: Some("test-key".to_string()),
            ..ModelOptions::default()
        }
    }

    #[test]
    fn overrides_win_over_configured_defaults() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path());

        let params = engine.generation_params(
            &GenerationOverrides {
                top_k: Some(1),
                max_tokens: Some(8192),
                ..GenerationOverrides::default()
            },
            None,
        );
        let defaults = GenerationDefaults::default();
        assert_eq!(params.temperature, defaults.temperature);
        assert_eq!(params.top_p, None);
        assert_eq!(params.top_k, Some(1));
        assert_eq!(params.max_tokens, Some(8192));
    }

    #[test]
    fn prepare_model_builds_adapter_with_system_instruction() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path());
        let adapter = engine
            .prepare_model(&ModelOptions {
                system_instruction: Some("systematic_reviewer".to_string()),
                ..options("gemini-2.0-flash")
            })
            .unwrap();
        assert_eq!(adapter.provider(), ProviderKind::Gemini);
        assert_eq!(adapter.model_name(), "gemini-2.0-flash");
        assert!(!adapter.is_closed());
    }

    #[test]
    fn invalid_parameters_fail_before_adapter_exists() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path());
        let err = engine
            .prepare_model(&ModelOptions {
                generation: GenerationOverrides {
                    temperature: Some(1.2),
                    ..GenerationOverrides::default()
                },
                ..options("claude-sonnet-4-5")
            })
            .unwrap_err();
        assert!(matches!(err, LlmdeError::Validation(ref v) if v.field == "temperature"));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_system_instruction_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path());
        let err = engine
            .prepare_model(&ModelOptions {
                system_instruction: Some("missing_instruction".to_string()),
                ..options("claude-sonnet-4-5")
            })
            .unwrap_err();
        assert!(matches!(err, LlmdeError::SystemInstructionNotFound { .. }));
    }

    #[tokio::test]
    async fn batch_preflight_errors_leave_no_output() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path());
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.pdf"), b"%PDF").unwrap();
        let out = tmp.path().join("out");

        let unknown_model = BatchRequest {
            src: src.clone(),
            out: out.clone(),
            prompts: vec!["study_design".to_string()],
            model: options("gpt-4o"),
        };
        let err = engine.run_batch(&unknown_model, |_| {}).await.unwrap_err();
        assert!(matches!(err, LlmdeError::UnknownModel { .. }));

        let unknown_prompt = BatchRequest {
            prompts: vec!["study_design".to_string(), "nope".to_string()],
            model: options("claude-sonnet-4-5"),
            ..unknown_model
        };
        let err = engine.run_batch(&unknown_prompt, |_| {}).await.unwrap_err();
        assert!(matches!(err, LlmdeError::PromptNotFound { ref name } if name == "nope"));

        assert!(!out.exists());
    }

    struct TrackedAdapter {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ModelAdapter for TrackedAdapter {
        fn model_name(&self) -> &str {
            "claude-tracked"
        }

        fn provider(&self) -> ProviderKind {
            ProviderKind::Claude
        }

        async fn query(&self, _request: &QueryRequest) -> Result<ModelResponse> {
            Ok(ModelResponse {
                text: "{}".to_string(),
                raw: serde_json::json!({}),
            })
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn batch_run_closes_adapter_on_success_and_failure() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.pdf"), b"%PDF").unwrap();
        let prompt = tmp.path().join("p1.md");
        fs::write(&prompt, "Extract").unwrap();

        let pipeline = BatchPipeline::new(
            vec![PromptSpec::new(&prompt, None)],
            PacingSettings::none(),
        );
        let request = BatchRequest {
            src: src.clone(),
            out: tmp.path().join("out"),
            prompts: vec![prompt.display().to_string()],
            model: options("claude-tracked"),
        };

        let closed = Arc::new(AtomicBool::new(false));
        let adapter = ClosingAdapter::new(Box::new(TrackedAdapter {
            closed: closed.clone(),
        }));
        let report = run_pipeline(&pipeline, adapter, &request).await.unwrap();
        assert_eq!(report.written(), 1);
        assert!(closed.load(Ordering::SeqCst));

        let closed = Arc::new(AtomicBool::new(false));
        let adapter = ClosingAdapter::new(Box::new(TrackedAdapter {
            closed: closed.clone(),
        }));
        let missing_src = BatchRequest {
            src: tmp.path().join("missing"),
            ..request
        };
        let err = run_pipeline(&pipeline, adapter, &missing_src).await.unwrap_err();
        assert!(matches!(err, LlmdeError::FileNotFound { .. }));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn prepare_single_checks_files_and_attaches_schema() {
        let tmp = TempDir::new().unwrap();
        let engine = engine(tmp.path());
        let pdf = tmp.path().join("paper.pdf");
        fs::write(&pdf, b"%PDF").unwrap();

        let request = SingleRequest {
            prompt: "study_design".to_string(),
            files: vec![pdf.clone()],
            output: None,
            model: options("gemini-2.0-flash"),
        };
        let (adapter, query) = engine.prepare_single(&request).unwrap();
        assert_eq!(adapter.provider(), ProviderKind::Gemini);
        assert_eq!(query.files, vec![pdf.clone()]);
        assert!(query.prompt.json_schema.is_some());

        let missing = tmp.path().join("missing.pdf");
        let err = engine
            .prepare_single(&SingleRequest {
                files: vec![pdf, missing.clone()],
                ..request
            })
            .unwrap_err();
        match err {
            LlmdeError::FileNotFound { path } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }
}
