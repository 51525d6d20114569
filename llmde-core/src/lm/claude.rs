use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::Form;
use reqwest::multipart::Part;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::AdapterBase;
use super::DocumentPayload;
use super::ModelAdapter;
use super::ModelResponse;
use super::ProviderKind;
use super::QueryRequest;
use super::describe_failure;
use super::prepare_query;
use super::transcript::log_llm_interaction;
use crate::config::ProviderSettings;
use crate::error::LlmdeError;
use crate::error::Result;
use crate::params::GenerationConfig;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const FILES_API_BETA: &str = "files-api-2025-04-14";

/// Messages-API adapter: documents are uploaded through the Files API and
/// referenced as `document` content blocks ahead of the prompt text.
#[derive(Debug)]
pub struct ClaudeModel {
    base: AdapterBase,
}

impl ClaudeModel {
    pub fn new(
        model_name: &str,
        api_key: &str,
        generation: GenerationConfig,
        settings: &ProviderSettings,
    ) -> Result<Self> {
        Ok(Self {
            base: AdapterBase::new(model_name, api_key, generation, settings, DEFAULT_BASE_URL)?,
        })
    }

    async fn upload(&self, client: &reqwest::Client, path: &Path) -> Result<String> {
        let upload_error = |message: String| LlmdeError::Upload {
            file: path.to_path_buf(),
            message,
        };

        let payload = DocumentPayload::read(path).await?;
        let part = Part::bytes(payload.bytes)
            .file_name(payload.file_name)
            .mime_str(&payload.mime_type)
            .map_err(|err| upload_error(err.to_string()))?;

        let response = client
            .post(format!("{}/v1/files", self.base.base_url))
            .header("x-api-key", &self.base.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", FILES_API_BETA)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|err| upload_error(err.to_string()))?;

        if !response.status().is_success() {
            return Err(upload_error(describe_failure(response).await));
        }

        let uploaded: UploadedFile = response
            .json()
            .await
            .map_err(|err| upload_error(format!("unexpected upload response: {err}")))?;

        tracing::debug!(file = %path.display(), file_id = %uploaded.id, "uploaded document");
        Ok(uploaded.id)
    }
}

#[async_trait]
impl ModelAdapter for ClaudeModel {
    fn model_name(&self) -> &str {
        &self.base.model_name
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    async fn query(&self, request: &QueryRequest) -> Result<ModelResponse> {
        let client = self.base.client()?;
        let prepared = prepare_query(request).await?;

        if let Some(schema) = &request.json_schema {
            tracing::debug!(
                schema = %schema.display(),
                "structured output schema ignored by claude models"
            );
        }

        let mut file_ids = Vec::with_capacity(prepared.files.len());
        for file in &prepared.files {
            file_ids.push(self.upload(client, file).await?);
        }

        let body = serde_json::to_value(build_message_request(
            &self.base.model_name,
            &self.base.generation,
            &file_ids,
            &prepared.prompt,
        ))?;

        let response = client
            .post(format!("{}/v1/messages", self.base.base_url))
            .header("x-api-key", &self.base.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", FILES_API_BETA)
            .json(&body)
            .send()
            .await
            .map_err(|err| self.base.generation_error(err.to_string()))?;

        if !response.status().is_success() {
            let message = describe_failure(response).await;
            return Err(self.base.generation_error(message));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|err| self.base.generation_error(format!("unreadable response: {err}")))?;
        log_llm_interaction(ProviderKind::Claude, &self.base.model_name, &body, &raw);

        let text = first_text_block(&raw).ok_or_else(|| LlmdeError::NoTextContent {
            model: self.base.model_name.clone(),
        })?;

        Ok(ModelResponse { text, raw })
    }

    fn close(&mut self) {
        self.base.close();
    }

    fn is_closed(&self) -> bool {
        self.base.is_closed()
    }
}

#[derive(Debug, Deserialize)]
struct UploadedFile {
    id: String,
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    // Absent and null are different to this API, so unset fields are
    // omitted rather than sent as null.
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Document { source: DocumentSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DocumentSource<'a> {
    File { file_id: &'a str },
}

fn build_message_request<'a>(
    model: &'a str,
    generation: &'a GenerationConfig,
    file_ids: &'a [String],
    prompt: &'a str,
) -> MessageRequest<'a> {
    let mut content: Vec<ContentBlock<'a>> = file_ids
        .iter()
        .map(|file_id| ContentBlock::Document {
            source: DocumentSource::File { file_id },
        })
        .collect();
    content.push(ContentBlock::Text { text: prompt });

    MessageRequest {
        model,
        max_tokens: generation.max_tokens(),
        system: generation.system_instruction(),
        temperature: generation.temperature(),
        top_p: generation.top_p(),
        top_k: generation.top_k(),
        messages: vec![Message {
            role: "user",
            content,
        }],
    }
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Text of the first `text` block, in response order.
fn first_text_block(raw: &Value) -> Option<String> {
    let parsed: MessageResponse = serde_json::from_value(raw.clone()).ok()?;
    parsed
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
}
