use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use llmde_core::ExtractionEngine;
use llmde_core::GenerationOverrides;
use llmde_core::ModelOptions;
use llmde_core::prompts::parse_prompt_list;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

const APP_NAME: &str = "llmde";

/// Token ceiling for `prompt` when none is given.
const PROMPT_MAX_TOKENS: i64 = 8192;

#[derive(Parser)]
#[command(name = "llmde")]
#[command(about = "Extract structured data from PDF documents with LLMs", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[arg(long, short, global = true, help = "Show verbose debug output")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run every prompt against every PDF in a directory")]
    Run {
        #[arg(long, help = "Directory containing the PDF documents")]
        src: PathBuf,

        #[arg(long, help = "Directory receiving the extraction results")]
        out: PathBuf,

        #[arg(long, help = "Comma-separated builtin prompt names or prompt file paths")]
        prompts: String,

        #[command(flatten)]
        model: ModelArgs,

        #[arg(
            long,
            allow_negative_numbers = true,
            help = "Maximum tokens to generate (default from config)"
        )]
        max_tokens: Option<i64>,
    },

    #[command(about = "Ask one prompt about one or more files")]
    Prompt {
        #[arg(long, help = "Builtin prompt name or prompt file path")]
        prompt: String,

        #[arg(long = "file", required = true, help = "File to attach (repeatable)")]
        files: Vec<PathBuf>,

        #[arg(long, help = "Write the response to this file instead of stdout")]
        output: Option<PathBuf>,

        #[command(flatten)]
        model: ModelArgs,

        #[arg(
            long,
            default_value_t = PROMPT_MAX_TOKENS,
            allow_negative_numbers = true,
            help = "Maximum tokens to generate"
        )]
        max_tokens: i64,
    },

    #[command(about = "Show configuration, providers and builtin prompts")]
    Info,
}

#[derive(Args)]
struct ModelArgs {
    #[arg(long, help = "Model name, e.g. claude-sonnet-4-5 or gemini-2.5-pro")]
    model: String,

    #[arg(long, help = "Builtin system instruction name or file path")]
    system_instruction: Option<String>,

    #[arg(long, help = "API key (defaults to the provider's environment variable)")]
    api_key: Option<String>,

    #[arg(long, allow_negative_numbers = true, help = "Sampling temperature, 0.0-1.0")]
    temperature: Option<f64>,

    #[arg(long, allow_negative_numbers = true, help = "Nucleus sampling threshold, 0.0-1.0")]
    top_p: Option<f64>,

    #[arg(long, allow_negative_numbers = true, help = "Top-k sampling, at least 1")]
    top_k: Option<i64>,
}

impl ModelArgs {
    fn into_options(self, max_tokens: Option<i64>) -> ModelOptions {
        ModelOptions {
            model: self.model,
            api_key: self.api_key,
            system_instruction: self.system_instruction,
            generation: GenerationOverrides {
                temperature: self.temperature,
                top_p: self.top_p,
                top_k: self.top_k,
                max_tokens,
            },
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,llmde_core=debug,llmde=debug"
    } else {
        "warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine = ExtractionEngine::load(APP_NAME)?;
    tracing::debug!(
        config = %engine.paths().config_file.display(),
        "configuration loaded"
    );

    match cli.command {
        Commands::Run {
            src,
            out,
            prompts,
            model,
            max_tokens,
        } => {
            let prompts = parse_prompt_list(&prompts);
            commands::handle_run(&engine, src, out, prompts, model.into_options(max_tokens)).await?;
        }
        Commands::Prompt {
            prompt,
            files,
            output,
            model,
            max_tokens,
        } => {
            commands::handle_prompt(
                &engine,
                prompt,
                files,
                output,
                model.into_options(Some(max_tokens)),
            )
            .await?;
        }
        Commands::Info => {
            commands::handle_info(&engine);
        }
    }

    Ok(())
}
