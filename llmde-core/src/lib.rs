//! Core library for the LLMDE PDF data extraction pipeline.

pub mod config;
pub mod engine;
pub mod error;
pub mod lm;
pub mod normalize;
pub mod params;
pub mod pipeline;
pub mod prompts;
pub mod runner;
pub mod worker;

pub use config::AppConfig;
pub use config::AppPaths;
pub use config::ConfigBundle;
pub use config::PacingSettings;
pub use config::ProviderSettings;
pub use config::load_or_initialize_config;
pub use engine::BatchRequest;
pub use engine::ExtractionEngine;
pub use engine::GenerationOverrides;
pub use engine::ModelOptions;
pub use engine::SingleRequest;
pub use error::ErrorKind;
pub use error::LlmdeError;
pub use lm::ClosingAdapter;
pub use lm::ModelAdapter;
pub use lm::ModelResponse;
pub use lm::ProviderKind;
pub use lm::QueryRequest;
pub use normalize::NormalizedResponse;
pub use normalize::normalize;
pub use params::GenerationConfig;
pub use params::GenerationParams;
pub use params::ValidationError;
pub use pipeline::BatchPipeline;
pub use pipeline::JobOutcome;
pub use pipeline::PipelineEvent;
pub use pipeline::RunReport;
pub use prompts::PromptLibrary;
pub use prompts::PromptSpec;
pub use runner::SingleQuery;
pub use runner::SingleQueryOutcome;
pub use worker::QueryWorker;
pub use worker::WorkerEvent;
