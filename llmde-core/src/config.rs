use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use config::Config as ConfigLoader;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::lm::ProviderKind;
use crate::params::DEFAULT_MAX_TOKENS;
use crate::params::GenerationParams;

/// Written to the config path on first run.
pub const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../assets/config.toml");

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub config: AppConfig,
    pub paths: AppPaths,
}

/// Load `<config_dir>/config.toml`, seeding it from the template when
/// absent, then layer `<APP>__SECTION__KEY` environment variables on top.
pub fn load_or_initialize_config(app_name: impl AsRef<str>) -> Result<ConfigBundle> {
    let app_name = app_name.as_ref();
    let paths = AppPaths::discover(app_name)?;
    paths.ensure_config_dir()?;
    seed_config_file(&paths.config_file)?;

    let config = read_config(&paths.config_file, &env_prefix(app_name))?;
    config.validate()?;

    let paths = paths.apply_storage_overrides(&config.storage)?;
    paths.ensure_runtime_dirs()?;
    Ok(ConfigBundle { config, paths })
}

fn seed_config_file(path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, DEFAULT_CONFIG_TEMPLATE)
        .with_context(|| format!("failed to seed {} from the default template", path.display()))
}

/// `llmde-dev` reads variables prefixed `LLMDE_DEV__`.
fn env_prefix(app_name: &str) -> String {
    app_name.replace('-', "_").to_ascii_uppercase()
}

fn read_config(path: &Path, prefix: &str) -> Result<AppConfig> {
    ConfigLoader::builder()
        .add_source(File::from(path.to_path_buf()))
        .add_source(
            Environment::with_prefix(prefix)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("invalid configuration in {}", path.display()))?
        .try_deserialize()
        .with_context(|| format!("configuration in {} does not match the expected sections", path.display()))
}

/// Where configuration, prompt library and transcripts live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub app_name: String,
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl AppPaths {
    /// `$XDG_{CONFIG,DATA,STATE}_HOME/<app>`, each defaulting under `$HOME`.
    pub fn discover(app_name: impl Into<String>) -> Result<Self> {
        let app_name = app_name.into();
        let home = home_dir().context("neither HOME nor USERPROFILE is set")?;
        let base = |var: &str, fallback: &str| -> PathBuf {
            env::var_os(var)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(fallback))
                .join(&app_name)
        };

        let config_dir = base("XDG_CONFIG_HOME", ".config");
        let data_dir = base("XDG_DATA_HOME", ".local/share");
        let state_dir = base("XDG_STATE_HOME", ".local/state");
        Ok(Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            data_dir,
            state_dir,
            app_name,
        })
    }

    /// Paths rooted in a single directory. Nothing is created on disk.
    pub fn rooted_at(root: &Path, app_name: impl Into<String>) -> Self {
        let config_dir = root.join("config");
        Self {
            app_name: app_name.into(),
            config_file: config_dir.join("config.toml"),
            config_dir,
            data_dir: root.join("data"),
            state_dir: root.join("state"),
        }
    }

    pub fn ensure_config_dir(&self) -> Result<()> {
        create_dir(&self.config_dir)
    }

    pub fn ensure_runtime_dirs(&self) -> Result<()> {
        create_dir(&self.data_dir)?;
        create_dir(&self.state_dir)
    }

    /// `[storage]` entries replace the discovered data and state dirs;
    /// relative values are taken from the config dir.
    pub fn apply_storage_overrides(&self, storage: &StorageSettings) -> Result<Self> {
        let resolve = |value: &Option<String>, current: &PathBuf| -> Result<PathBuf> {
            match value {
                Some(value) => resolve_path_value(value, &self.config_dir),
                None => Ok(current.clone()),
            }
        };
        Ok(Self {
            data_dir: resolve(&storage.data_dir, &self.data_dir)?,
            state_dir: resolve(&storage.state_dir, &self.state_dir)?,
            ..self.clone()
        })
    }

    /// Directory the builtin prompt library is materialised into.
    pub fn prompt_library_dir(&self) -> PathBuf {
        self.data_dir.join("prompts")
    }
}

fn create_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub generation: GenerationDefaults,
    pub pacing: PacingSettings,
    pub providers: ProviderSection,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Reject configured generation defaults that could never pass validation,
    /// so a bad config file fails at load rather than on the first run.
    pub fn validate(&self) -> Result<()> {
        self.generation
            .to_params()
            .validate()
            .map(|_| ())
            .context("invalid [generation] defaults in configuration")
    }

    pub fn resolved_llm_log_dir(&self, paths: &AppPaths) -> Result<Option<PathBuf>> {
        if !self.logging.verbose_llm_logging {
            return Ok(None);
        }

        let dir = if let Some(custom_dir) = self.logging.llm_log_dir.as_ref() {
            resolve_path_value(custom_dir, &paths.config_dir)?
        } else {
            paths.state_dir.join("llm_logs")
        };

        Ok(Some(dir))
    }
}

/// Generation parameters applied when the command line leaves them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<i64>,
    pub max_tokens: Option<i64>,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            temperature: Some(0.0),
            top_p: None,
            top_k: None,
            max_tokens: Some(i64::from(DEFAULT_MAX_TOKENS)),
        }
    }
}

impl GenerationDefaults {
    pub fn to_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            max_tokens: self.max_tokens,
            system_instruction: None,
        }
    }
}

/// Fixed rate-limit pauses between network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    pub query_pause_secs: u64,
    pub document_pause_secs: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            query_pause_secs: 30,
            document_pause_secs: 30,
        }
    }
}

impl PacingSettings {
    /// No pauses at all.
    pub fn none() -> Self {
        Self {
            query_pause_secs: 0,
            document_pause_secs: 0,
        }
    }

    pub fn query_pause(&self) -> Duration {
        Duration::from_secs(self.query_pause_secs)
    }

    pub fn document_pause(&self) -> Duration {
        Duration::from_secs(self.document_pause_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub claude: ProviderSettings,
    pub gemini: ProviderSettings,
}

impl ProviderSection {
    pub fn settings_for(&self, provider: ProviderKind) -> &ProviderSettings {
        match provider {
            ProviderKind::Claude => &self.claude,
            ProviderKind::Gemini => &self.gemini,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Overrides the provider's public endpoint, e.g. for a proxy.
    pub base_url: Option<String>,
    /// Absent means the HTTP client's own default.
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: Option<String>,
    pub state_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Write every provider exchange to a JSON transcript.
    pub verbose_llm_logging: bool,
    /// Transcript directory; defaults to `<state_dir>/llm_logs`.
    pub llm_log_dir: Option<String>,
}

/// Expand `~` and `$VAR` in `value`; a relative result is joined onto
/// `base_dir`.
pub fn resolve_path_value(value: &str, base_dir: &Path) -> Result<PathBuf> {
    let path = PathBuf::from(expand_path(value)?);
    Ok(if path.is_absolute() {
        path.components().collect()
    } else {
        base_dir.join(path)
    })
}

fn expand_path(value: &str) -> Result<String> {
    let home = home_dir()
        .map(|home| {
            home.into_os_string()
                .into_string()
                .map_err(|_| anyhow!("home directory is not valid UTF-8"))
        })
        .transpose()?;

    shellexpand::full_with_context(value, || home.as_deref(), |var| {
        Ok::<_, env::VarError>(env::var(var).ok())
    })
        .map(|expanded| expanded.into_owned())
        .map_err(|error| anyhow!("cannot expand path '{value}': {error}"))
}

fn home_dir() -> Option<PathBuf> {
    ["HOME", "USERPROFILE"]
        .into_iter()
        .find_map(env::var_os)
        .map(PathBuf::from)
}
