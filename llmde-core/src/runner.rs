use std::fs;
use std::path::PathBuf;

use crate::error::LlmdeError;
use crate::error::Result;
use crate::lm::ClosingAdapter;
use crate::lm::ModelAdapter;
use crate::lm::QueryRequest;
use crate::prompts::PromptSpec;

/// One prompt over one or more files, answered once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingleQuery {
    pub files: Vec<PathBuf>,
    pub prompt: PromptSpec,
    /// Where to save the response; `None` hands the text back to the caller.
    pub output: Option<PathBuf>,
}

impl SingleQuery {
    fn request(&self) -> QueryRequest {
        QueryRequest::new(&self.prompt.prompt_path, self.files.clone())
            .with_json_schema(self.prompt.json_schema.clone())
    }
}

#[derive(Debug)]
pub enum SingleQueryOutcome {
    Saved { path: PathBuf, text: String },
    Returned { text: String },
    Failed { error: LlmdeError },
}

impl SingleQueryOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Response text on success, the error message otherwise.
    pub fn message(&self) -> String {
        match self {
            Self::Saved { text, .. } | Self::Returned { text } => text.clone(),
            Self::Failed { error } => error.to_string(),
        }
    }
}

/// Run `query` and close the adapter whatever the result. Errors are
/// reported in the outcome rather than returned.
pub async fn run_single_query(mut adapter: ClosingAdapter, query: &SingleQuery) -> SingleQueryOutcome {
    let outcome = match execute(&*adapter, query).await {
        Ok(outcome) => outcome,
        Err(error) => {
            tracing::warn!(model = %adapter.model_name(), error = %error, "query failed");
            SingleQueryOutcome::Failed { error }
        }
    };
    adapter.close();
    outcome
}

async fn execute(adapter: &dyn ModelAdapter, query: &SingleQuery) -> Result<SingleQueryOutcome> {
    let response = adapter.query(&query.request()).await?;
    tracing::info!(model = %adapter.model_name(), chars = response.text.len(), "response received");

    match &query.output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|err| LlmdeError::io(parent, err))?;
            }
            fs::write(path, &response.text).map_err(|err| LlmdeError::io(path, err))?;
            Ok(SingleQueryOutcome::Saved {
                path: path.clone(),
                text: response.text,
            })
        }
        None => Ok(SingleQueryOutcome::Returned {
            text: response.text,
        }),
    }
}
