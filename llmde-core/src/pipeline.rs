//! Batch extraction over a directory of PDFs.
//!
//! Every (document, prompt) pair is one job with one artifact at
//! `<out>/<ordinal>/<prompt stem>.json`. An existing artifact means the job
//! is done, so re-running over the same output directory only fills gaps.
//! Job failures are recorded in the [`RunReport`] and never stop the loop.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::config::PacingSettings;
use crate::error::LlmdeError;
use crate::error::Result;
use crate::lm::ModelAdapter;
use crate::lm::QueryRequest;
use crate::normalize::NormalizedResponse;
use crate::normalize::normalize;
use crate::prompts::PromptSpec;

pub const MANIFEST_FILE_NAME: &str = "MANIFEST.csv";

/// One manifest row. Field names double as the CSV header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub index: String,
    pub pdf_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    /// Model output that failed to parse, stored verbatim.
    RawText { parse_error: String },
}

#[derive(Debug)]
pub enum JobOutcome {
    Written { path: PathBuf, format: ArtifactFormat },
    Skipped { path: PathBuf },
    Failed { error: LlmdeError },
}

#[derive(Debug)]
pub struct JobRecord {
    pub ordinal: usize,
    pub document: String,
    pub prompt: String,
    pub outcome: JobOutcome,
}

impl JobRecord {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, JobOutcome::Failed { .. })
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub documents: Vec<ManifestEntry>,
    pub jobs: Vec<JobRecord>,
    pub manifest_path: Option<PathBuf>,
}

impl RunReport {
    /// True when the source directory held no PDFs.
    pub fn nothing_to_do(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn written(&self) -> usize {
        self.count(|outcome| matches!(outcome, JobOutcome::Written { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, JobOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, JobOutcome::Failed { .. }))
    }

    fn count(&self, predicate: impl Fn(&JobOutcome) -> bool) -> usize {
        self.jobs.iter().filter(|job| predicate(&job.outcome)).count()
    }
}

/// Progress notifications for a front end to render.
#[derive(Debug)]
pub enum PipelineEvent<'a> {
    DocumentsFound {
        count: usize,
        output_dir: &'a Path,
    },
    DocumentStarted {
        ordinal: usize,
        total: usize,
        name: &'a str,
    },
    DocumentCopied {
        name: &'a str,
        already_present: bool,
    },
    JobStarted {
        index: usize,
        total: usize,
        prompt: &'a str,
    },
    JobFinished(&'a JobRecord),
    Pausing(Duration),
    ManifestWritten(&'a Path),
}

type ProgressFn = Box<dyn Fn(&PipelineEvent<'_>) + Send + Sync>;

pub struct BatchPipeline {
    prompts: Vec<PromptSpec>,
    pacing: PacingSettings,
    progress: Option<ProgressFn>,
}

impl std::fmt::Debug for BatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPipeline")
            .field("prompts", &self.prompts)
            .field("pacing", &self.pacing)
            .finish_non_exhaustive()
    }
}

impl BatchPipeline {
    pub fn new(prompts: Vec<PromptSpec>, pacing: PacingSettings) -> Self {
        Self {
            prompts,
            pacing,
            progress: None,
        }
    }

    pub fn with_progress(
        mut self,
        progress: impl Fn(&PipelineEvent<'_>) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    fn emit(&self, event: PipelineEvent<'_>) {
        if let Some(progress) = &self.progress {
            progress(&event);
        }
    }

    /// Process every PDF in `src` against every prompt, writing into `out`.
    /// The adapter is borrowed; closing it is the caller's job.
    pub async fn run(
        &self,
        adapter: &dyn ModelAdapter,
        src: &Path,
        out: &Path,
    ) -> Result<RunReport> {
        let documents = discover_documents(src)?;
        let mut report = RunReport::default();

        if documents.is_empty() {
            tracing::info!(src = %src.display(), "no PDF files found");
            return Ok(report);
        }

        fs::create_dir_all(out).map_err(|err| LlmdeError::io(out, err))?;
        self.emit(PipelineEvent::DocumentsFound {
            count: documents.len(),
            output_dir: out,
        });

        let total = documents.len();
        for (position, document) in documents.iter().enumerate() {
            let ordinal = position + 1;
            let is_last_document = ordinal == total;
            let name = file_name(document);
            let index = format!("{ordinal:03}");

            self.emit(PipelineEvent::DocumentStarted {
                ordinal,
                total,
                name: &name,
            });
            tracing::info!(ordinal, document = %name, "processing document");

            let document_dir = out.join(&index);
            fs::create_dir_all(&document_dir).map_err(|err| LlmdeError::io(&document_dir, err))?;
            self.copy_document(document, &document_dir.join(&name), &name);

            report.documents.push(ManifestEntry {
                index,
                pdf_name: name.clone(),
            });

            let mut queried = false;
            let prompt_total = self.prompts.len();
            for (prompt_position, prompt) in self.prompts.iter().enumerate() {
                let stem = prompt.stem();
                self.emit(PipelineEvent::JobStarted {
                    index: prompt_position + 1,
                    total: prompt_total,
                    prompt: &stem,
                });

                let artifact = document_dir.join(format!("{stem}.json"));
                let record = if artifact.exists() {
                    tracing::info!(ordinal, document = %name, prompt = %stem, "artifact exists, skipping");
                    JobRecord {
                        ordinal,
                        document: name.clone(),
                        prompt: stem,
                        outcome: JobOutcome::Skipped { path: artifact },
                    }
                } else {
                    queried = true;
                    let outcome = match run_job(adapter, document, prompt, &artifact).await {
                        Ok(format) => JobOutcome::Written {
                            path: artifact,
                            format,
                        },
                        Err(error) => {
                            tracing::warn!(
                                ordinal,
                                document = %name,
                                prompt = %stem,
                                error = %error,
                                "extraction job failed"
                            );
                            JobOutcome::Failed { error }
                        }
                    };
                    JobRecord {
                        ordinal,
                        document: name.clone(),
                        prompt: stem,
                        outcome,
                    }
                };

                let ran_query = !matches!(record.outcome, JobOutcome::Skipped { .. });
                self.emit(PipelineEvent::JobFinished(&record));
                report.jobs.push(record);

                let more_jobs = !(is_last_document && prompt_position + 1 == prompt_total);
                if ran_query && more_jobs {
                    self.pause(self.pacing.query_pause()).await;
                }
            }

            if queried && !is_last_document {
                self.pause(self.pacing.document_pause()).await;
            }
        }

        let manifest_path = out.join(MANIFEST_FILE_NAME);
        write_manifest(&manifest_path, &report.documents)?;
        self.emit(PipelineEvent::ManifestWritten(&manifest_path));
        report.manifest_path = Some(manifest_path);

        tracing::info!(
            documents = report.documents.len(),
            written = report.written(),
            skipped = report.skipped(),
            failed = report.failed(),
            "batch run finished"
        );
        Ok(report)
    }

    fn copy_document(&self, source: &Path, target: &Path, name: &str) {
        if target.exists() {
            self.emit(PipelineEvent::DocumentCopied {
                name,
                already_present: true,
            });
            return;
        }

        match fs::copy(source, target) {
            Ok(_) => self.emit(PipelineEvent::DocumentCopied {
                name,
                already_present: false,
            }),
            Err(err) => {
                tracing::warn!(document = %name, error = %err, "failed to copy document into output directory");
            }
        }
    }

    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        self.emit(PipelineEvent::Pausing(duration));
        tracing::debug!(secs = duration.as_secs(), "pausing for rate limit");
        tokio::time::sleep(duration).await;
    }
}

async fn run_job(
    adapter: &dyn ModelAdapter,
    document: &Path,
    prompt: &PromptSpec,
    artifact: &Path,
) -> Result<ArtifactFormat> {
    let request = QueryRequest::new(&prompt.prompt_path, vec![document.to_path_buf()])
        .with_json_schema(prompt.json_schema.clone());
    let response = adapter.query(&request).await?;

    let normalized = normalize(&response.text);
    write_atomic(artifact, normalized.to_artifact()?.as_bytes())?;

    Ok(match normalized {
        NormalizedResponse::Json(_) => ArtifactFormat::Json,
        NormalizedResponse::Raw { error, .. } => ArtifactFormat::RawText { parse_error: error },
    })
}

/// Sorted PDF files (extension matched case-insensitively) directly inside
/// `src`.
pub fn discover_documents(src: &Path) -> Result<Vec<PathBuf>> {
    if !src.is_dir() {
        return Err(LlmdeError::FileNotFound {
            path: src.to_path_buf(),
        });
    }

    let mut documents = Vec::new();
    for entry in fs::read_dir(src).map_err(|err| LlmdeError::io(src, err))? {
        let path = entry.map_err(|err| LlmdeError::io(src, err))?.path();
        let is_pdf = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf && path.is_file() {
            documents.push(path);
        }
    }

    documents.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(documents)
}

/// Write through a temporary file in the same directory so the final path
/// only ever holds a complete artifact.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = NamedTempFile::new_in(dir).map_err(|err| LlmdeError::io(dir, err))?;
    file.write_all(contents)
        .and_then(|()| file.flush())
        .map_err(|err| LlmdeError::io(file.path(), err))?;
    file.persist(path)
        .map_err(|err| LlmdeError::io(path, err.error))?;
    Ok(())
}

pub fn write_manifest(path: &Path, entries: &[ManifestEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush().map_err(|err| LlmdeError::io(path, err))?;
    tracing::debug!(path = %path.display(), rows = entries.len(), "wrote manifest");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
