use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::llm::provider::{GenerationRequest, LLMProvider};
use crate::models::{ChatRole, JobStatus, SpeechClip, VideoAsset};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
const VIDEO_MODEL: &str = "veo-3.0-generate-preview";
const PLACEHOLDER_KEYS: &[&str] = &["", "your_api_key_here", "PLACEHOLDER_API_KEY", "changeme"];

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<ThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    speech_config: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    response: Option<Value>,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: Option<String>) -> Result<Self> {
        if PLACEHOLDER_KEYS.contains(&api_key.trim()) {
            return Err(Error::InvalidConfiguration(
                "GEMINI_API_KEY is missing or still a placeholder".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, url: &str, body: &B) -> Result<R> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn read<R: DeserializeOwned>(response: reqwest::Response) -> Result<R> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            return Err(Error::UpstreamApi {
                status: status.as_u16(),
                message: format!("Inference service error: {}", message),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("Failed to parse inference reply: {}", e)))
    }

    async fn generate_content(&self, model: &str, body: &GenerateRequest) -> Result<Vec<Part>> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let result: GenerateResponse = self.post(&url, body).await?;

        if let Some(error) = result.error {
            return Err(Error::upstream(error.message));
        }

        Ok(result
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default())
    }
}

fn text_content(role: Option<&str>, text: &str) -> Content {
    Content {
        role: role.map(str::to_string),
        parts: vec![Part {
            text: Some(text.to_string()),
            inline_data: None,
        }],
    }
}

fn video_from_operation(response: Option<Value>) -> Option<VideoAsset> {
    let response = response?;
    let sample = &response["generateVideoResponse"]["generatedSamples"][0]["video"];
    let uri = sample["uri"].as_str()?;
    Some(VideoAsset {
        uri: uri.to_string(),
        mime_type: sample["mimeType"].as_str().map(str::to_string),
    })
}

#[async_trait]
impl LLMProvider for GeminiProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<String> {
        tracing::debug!(
            "Sending {} chars to {} (schema: {}, thinking: {:?})",
            request.prompt.len(),
            self.model,
            request.schema.is_some(),
            request.thinking_budget
        );

        let mut contents: Vec<Content> = request
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                };
                text_content(Some(role), &turn.text)
            })
            .collect();
        contents.push(text_content(Some("user"), &request.prompt));

        let structured = request.schema.is_some();
        let body = GenerateRequest {
            contents,
            system_instruction: request.system.as_deref().map(|s| text_content(None, s)),
            generation_config: Some(GenerationConfig {
                response_mime_type: structured.then(|| "application/json".to_string()),
                response_schema: request.schema,
                thinking_config: request
                    .thinking_budget
                    .map(|thinking_budget| ThinkingConfig { thinking_budget }),
                ..Default::default()
            }),
        };

        let text = self
            .generate_content(&self.model, &body)
            .await?
            .into_iter()
            .filter_map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(Error::upstream("Empty response from inference service"));
        }
        Ok(text)
    }

    async fn synthesize_speech(&self, text: &str, voice: &str) -> Result<SpeechClip> {
        let body = GenerateRequest {
            contents: vec![text_content(Some("user"), text)],
            system_instruction: None,
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["AUDIO".to_string()]),
                speech_config: Some(serde_json::json!({
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                })),
                ..Default::default()
            }),
        };

        self.generate_content(SPEECH_MODEL, &body)
            .await?
            .into_iter()
            .find_map(|p| p.inline_data)
            .map(|audio| SpeechClip {
                mime_type: audio.mime_type,
                data_base64: audio.data,
            })
            .ok_or_else(|| Error::upstream("Speech reply contained no audio"))
    }

    async fn submit_video(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:predictLongRunning", self.base_url, VIDEO_MODEL);
        let body = serde_json::json!({ "instances": [{ "prompt": prompt }] });
        let operation: Operation = self.post(&url, &body).await?;
        tracing::info!("Submitted video job {}", operation.name);
        Ok(operation.name)
    }

    async fn poll_video(&self, handle: &str) -> Result<JobStatus> {
        let url = format!("{}/{}", self.base_url, handle);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await?;
        let operation: Operation = Self::read(response).await?;

        if !operation.done {
            return Ok(JobStatus::Pending);
        }
        if let Some(error) = operation.error {
            return Ok(JobStatus::Failed(error.message));
        }
        Ok(match video_from_operation(operation.response) {
            Some(asset) => JobStatus::Succeeded(asset),
            None => JobStatus::Failed("Job finished without a video".to_string()),
        })
    }

    fn name(&self) -> &str {
        "Gemini"
    }
}
