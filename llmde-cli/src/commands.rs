use anyhow::Result;
use llmde_core::BatchRequest;
use llmde_core::ExtractionEngine;
use llmde_core::JobOutcome;
use llmde_core::ModelOptions;
use llmde_core::PipelineEvent;
use llmde_core::ProviderKind;
use llmde_core::SingleQueryOutcome;
use llmde_core::SingleRequest;
use llmde_core::pipeline::ArtifactFormat;
use std::path::PathBuf;

pub async fn handle_run(
    engine: &ExtractionEngine,
    src: PathBuf,
    out: PathBuf,
    prompts: Vec<String>,
    model: ModelOptions,
) -> Result<()> {
    println!("LLMDE Data Extraction Pipeline");
    println!("  Source: {}", src.display());
    println!("  Output: {}", out.display());
    println!("  Model: {}", model.model);
    println!("  Prompts: {}", prompts.join(", "));
    println!();

    let request = BatchRequest {
        src,
        out,
        prompts,
        model,
    };
    let report = engine.run_batch(&request, print_event).await?;

    if report.nothing_to_do() {
        println!("No PDF files found in {}", request.src.display());
        return Ok(());
    }

    println!();
    println!(
        "✓ Extraction complete! Processed {} papers",
        report.documents.len()
    );
    println!(
        "  Saved: {}  Skipped: {}  Failed: {}",
        report.written(),
        report.skipped(),
        report.failed()
    );
    println!("  Results: {}", request.out.display());
    Ok(())
}

fn print_event(event: &PipelineEvent<'_>) {
    match event {
        PipelineEvent::DocumentsFound { count, output_dir } => {
            println!("Found {} PDF files", count);
            println!("Writing results to {}", output_dir.display());
        }
        PipelineEvent::DocumentStarted {
            ordinal,
            total,
            name,
        } => {
            println!();
            println!("[{}/{}] Processing: {}", ordinal, total, name);
        }
        PipelineEvent::DocumentCopied {
            already_present: false,
            ..
        } => println!("  ✓ PDF copied"),
        PipelineEvent::DocumentCopied {
            already_present: true,
            ..
        } => println!("  ⊘ PDF exists"),
        PipelineEvent::JobStarted {
            index,
            total,
            prompt,
        } => println!("  [{}/{}] {}", index, total, prompt),
        PipelineEvent::JobFinished(record) => match &record.outcome {
            JobOutcome::Skipped { .. } => println!("    ⊘ Already exists, skipping"),
            JobOutcome::Written {
                format: ArtifactFormat::Json,
                ..
            } => println!("    ✓ Saved valid JSON"),
            JobOutcome::Written {
                format: ArtifactFormat::RawText { parse_error },
                ..
            } => println!("    ⚠ Invalid JSON ({}), saving raw text", parse_error),
            JobOutcome::Failed { error } => println!("    ✗ Error: {}", error),
        },
        PipelineEvent::Pausing(duration) => {
            println!("    … waiting {}s", duration.as_secs());
        }
        PipelineEvent::ManifestWritten(path) => {
            println!();
            println!("✓ Manifest written to {}", path.display());
        }
    }
}

pub async fn handle_prompt(
    engine: &ExtractionEngine,
    prompt: String,
    files: Vec<PathBuf>,
    output: Option<PathBuf>,
    model: ModelOptions,
) -> Result<()> {
    eprintln!("LLMDE Prompt Query");
    eprintln!("  Model: {}", model.model);
    eprintln!("  Prompt: {}", prompt);
    for file in &files {
        eprintln!("  File: {}", file.display());
    }

    let request = SingleRequest {
        prompt,
        files,
        output,
        model,
    };

    match engine.run_single(&request).await? {
        SingleQueryOutcome::Saved { path, .. } => {
            eprintln!("✓ Response saved to {}", path.display());
        }
        SingleQueryOutcome::Returned { text } => {
            println!("{}", text);
        }
        SingleQueryOutcome::Failed { error } => {
            eprintln!("✗ Error: {}", error);
        }
    }

    Ok(())
}

pub fn handle_info(engine: &ExtractionEngine) {
    let paths = engine.paths();
    let config = engine.config();

    println!("Loaded configuration from {}", paths.config_file.display());
    println!("  Data dir: {}", paths.data_dir.display());
    println!("  State dir: {}", paths.state_dir.display());
    println!(
        "  Prompt library: {}",
        engine.prompt_library().root().display()
    );
    println!(
        "  Pacing: {}s between queries, {}s between documents",
        config.pacing.query_pause_secs, config.pacing.document_pause_secs
    );

    println!();
    println!("Providers:");
    for provider in ProviderKind::all() {
        let key_state = match provider.resolve_api_key(None) {
            Ok(_) => "set",
            Err(_) => "not set",
        };
        println!(
            "  - {} (models '{}*', key from {}: {})",
            provider,
            provider.prefix(),
            provider.env_var(),
            key_state
        );
    }

    let library = engine.prompt_library();
    let with_schema = library.builtin_prompts_with_schema();
    println!();
    println!("Builtin prompts:");
    for name in library.list_builtin_prompts() {
        if with_schema.contains(&name) {
            println!("  - {} (JSON schema)", name);
        } else {
            println!("  - {}", name);
        }
    }

    println!();
    println!("Builtin system instructions:");
    for name in library.list_builtin_system_instructions() {
        println!("  - {}", name);
    }
}
