use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use super::AdapterBase;
use super::DocumentPayload;
use super::ModelAdapter;
use super::ModelResponse;
use super::ProviderKind;
use super::QueryRequest;
use super::describe_failure;
use super::prepare_query;
use super::read_json_schema;
use super::transcript::log_llm_interaction;
use crate::config::ProviderSettings;
use crate::error::LlmdeError;
use crate::error::Result;
use crate::params::GenerationConfig;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// generateContent adapter with optional JSON-schema constrained output.
#[derive(Debug)]
pub struct GeminiModel {
    base: AdapterBase,
    config: GenerationSettings,
}

impl GeminiModel {
    pub fn new(
        model_name: &str,
        api_key: &str,
        generation: GenerationConfig,
        settings: &ProviderSettings,
    ) -> Result<Self> {
        let config = GenerationSettings::from_config(&generation);
        Ok(Self {
            base: AdapterBase::new(model_name, api_key, generation, settings, DEFAULT_BASE_URL)?,
            config,
        })
    }

    /// Resumable upload: a `start` call returns the session URL, then the
    /// bytes are sent with `upload, finalize`.
    async fn upload(&self, client: &reqwest::Client, path: &Path) -> Result<FileData> {
        let upload_error = |message: String| LlmdeError::Upload {
            file: path.to_path_buf(),
            message,
        };

        let payload = DocumentPayload::read(path).await?;
        let length = payload.bytes.len().to_string();

        let start = client
            .post(format!("{}/upload/v1beta/files", self.base.base_url))
            .header("x-goog-api-key", &self.base.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", &length)
            .header("X-Goog-Upload-Header-Content-Type", &payload.mime_type)
            .json(&json!({ "file": { "display_name": payload.file_name } }))
            .send()
            .await
            .map_err(|err| upload_error(err.to_string()))?;

        if !start.status().is_success() {
            return Err(upload_error(describe_failure(start).await));
        }

        let session_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| upload_error("upload session URL missing from response".to_string()))?;

        let finished = client
            .post(session_url)
            .header("Content-Length", &length)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(payload.bytes)
            .send()
            .await
            .map_err(|err| upload_error(err.to_string()))?;

        if !finished.status().is_success() {
            return Err(upload_error(describe_failure(finished).await));
        }

        let envelope: UploadEnvelope = finished
            .json()
            .await
            .map_err(|err| upload_error(format!("unexpected upload response: {err}")))?;

        tracing::debug!(file = %path.display(), uri = %envelope.file.uri, "uploaded document");
        Ok(FileData {
            mime_type: envelope.file.mime_type.unwrap_or(payload.mime_type),
            file_uri: envelope.file.uri,
        })
    }
}

#[async_trait]
impl ModelAdapter for GeminiModel {
    fn model_name(&self) -> &str {
        &self.base.model_name
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    async fn query(&self, request: &QueryRequest) -> Result<ModelResponse> {
        let client = self.base.client()?;
        let prepared = prepare_query(request).await?;

        // Read the schema before uploading so a bad schema costs no uploads.
        let config = match &request.json_schema {
            Some(path) => self.config.with_json_schema(read_json_schema(path).await?),
            None => self.config.clone(),
        };

        let mut uploaded = Vec::with_capacity(prepared.files.len());
        for file in &prepared.files {
            uploaded.push(self.upload(client, file).await?);
        }

        let body = serde_json::to_value(build_generate_request(
            &prepared.prompt,
            &uploaded,
            self.base.generation.system_instruction(),
            config,
        ))?;

        let response = client
            .post(format!(
                "{}/v1beta/models/{}:generateContent",
                self.base.base_url, self.base.model_name
            ))
            .header("x-goog-api-key", &self.base.api_key)
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
        log_llm_interaction(ProviderKind::Gemini, &self.base.model_name, &body, &raw);

        let text = response_text(&raw).ok_or_else(|| LlmdeError::NoTextContent {
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

/// Provider-side generation config. `max_output_tokens` replaces the
/// shared `max_tokens` name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<Value>,
}

impl GenerationSettings {
    fn from_config(config: &GenerationConfig) -> Self {
        Self {
            temperature: config.temperature(),
            top_p: config.top_p(),
            top_k: config.top_k(),
            max_output_tokens: config.max_tokens(),
            response_mime_type: None,
            response_json_schema: None,
        }
    }

    /// Copy of the base settings constrained to JSON matching `schema`.
    fn with_json_schema(&self, schema: Value) -> Self {
        let mut next = self.clone();
        next.response_mime_type = Some("application/json".to_string());
        next.response_json_schema = Some(schema);
        next
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationSettings,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Text {
        text: &'a str,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: &'a FileData,
    },
}

fn build_generate_request<'a>(
    prompt: &'a str,
    files: &'a [FileData],
    system_instruction: Option<&'a str>,
    config: GenerationSettings,
) -> GenerateContentRequest<'a> {
    let mut parts = vec![RequestPart::Text { text: prompt }];
    parts.extend(files.iter().map(|file_data| RequestPart::File { file_data }));

    GenerateContentRequest {
        contents: vec![Content {
            role: Some("user"),
            parts,
        }],
        system_instruction: system_instruction.map(|text| Content {
            role: None,
            parts: vec![RequestPart::Text { text }],
        }),
        generation_config: config,
    }
}

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    uri: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
}

/// Concatenated non-thought text parts of the first candidate.
fn response_text(raw: &Value) -> Option<String> {
    let parsed: GenerateContentResponse = serde_json::from_value(raw.clone()).ok()?;
    let parts = parsed.candidates.into_iter().next()?.content?.parts;

    let texts: Vec<String> = parts
        .into_iter()
        .filter(|part| !part.thought)
        .filter_map(|part| part.text)
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}
