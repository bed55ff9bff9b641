use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::models::{ContextTurn, GenerationParams, ModelRequest, TurnPart};

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-latest";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const SAFETY_CATEGORIES: [&str; 4] = [
  "HARM_CATEGORY_HARASSMENT",
  "HARM_CATEGORY_HATE_SPEECH",
  "HARM_CATEGORY_SEXUALLY_EXPLICIT",
  "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
  #[error("request to model failed: {0}")]
  Transport(reqwest::Error),
  #[error("model API error ({status}): {body}")]
  Api { status: StatusCode, body: String },
  #[error("model returned no text{}", block_suffix(.0))]
  EmptyResponse(Option<String>),
  #[error("could not decode model response: {0}")]
  InvalidResponse(String),
}

// Request URLs are dropped so transport errors never carry endpoint details
// into messages or logs.
impl From<reqwest::Error> for ModelError {
  fn from(err: reqwest::Error) -> Self {
    ModelError::Transport(err.without_url())
  }
}

fn block_suffix(reason: &Option<String>) -> String {
  reason
    .as_deref()
    .map(|r| format!(" (blocked: {r})"))
    .unwrap_or_default()
}

/// A language model that turns a conversation context into one reply.
#[async_trait]
pub trait ChatModel: Send + Sync {
  async fn generate(&self, request: ModelRequest) -> Result<String, ModelError>;
}

#[derive(Clone)]
pub struct GeminiClient {
  client: reqwest::Client,
  base_url: String,
  model: String,
  api_key: String,
}

impl GeminiClient {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      client: reqwest::Client::new(),
      base_url: BASE_URL.to_string(),
      model: DEFAULT_MODEL.to_string(),
      api_key: api_key.into(),
    }
  }

  pub fn with_model(mut self, model: impl Into<String>) -> Self {
    self.model = model.into();
    self
  }

  pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
    self.base_url = base_url.into().trim_end_matches('/').to_string();
    self
  }

  pub fn model(&self) -> &str {
    &self.model
  }

  fn endpoint(&self) -> String {
    format!("{}/models/{}:generateContent", self.base_url, self.model)
  }
}

#[async_trait]
impl ChatModel for GeminiClient {
  async fn generate(&self, request: ModelRequest) -> Result<String, ModelError> {
    let payload = to_gemini_request(&request);

    tracing::debug!(
      model = %self.model,
      turns = payload.contents.len(),
      "sending generateContent request"
    );

    let resp = self
      .client
      .post(self.endpoint())
      .header(API_KEY_HEADER, &self.api_key)
      .json(&payload)
      .send()
      .await?;

    if !resp.status().is_success() {
      let status = resp.status();
      let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "Gemini request failed.".to_string());
      return Err(ModelError::Api { status, body });
    }

    let body = resp
      .json::<GenerateContentResponse>()
      .await
      .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
    extract_text(body)
  }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
  contents: Vec<Content>,
  generation_config: GenerationConfig,
  safety_settings: Vec<SafetySetting>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  role: Option<String>,
  #[serde(default)]
  parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
  Text {
    text: String,
  },
  InlineData {
    #[serde(rename = "inlineData")]
    inline_data: InlineData,
  },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
  mime_type: String,
  data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
  temperature: f32,
  top_p: f32,
  top_k: u32,
  max_output_tokens: u32,
}

#[derive(Serialize)]
struct SafetySetting {
  category: &'static str,
  threshold: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
  #[serde(default)]
  candidates: Vec<Candidate>,
  #[serde(default)]
  prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
  #[serde(default)]
  content: Content,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
  block_reason: Option<String>,
}

fn to_gemini_request(request: &ModelRequest) -> GenerateContentRequest {
  GenerateContentRequest {
    contents: request.turns.iter().map(to_content).collect(),
    generation_config: to_generation_config(&request.params),
    safety_settings: SAFETY_CATEGORIES
      .iter()
      .map(|&category| SafetySetting {
        category,
        threshold: SAFETY_THRESHOLD,
      })
      .collect(),
  }
}

fn to_content(turn: &ContextTurn) -> Content {
  let parts = turn
    .parts
    .iter()
    .map(|part| match part {
      TurnPart::Text(text) => Part::Text { text: text.clone() },
      TurnPart::Image(image) => Part::InlineData {
        inline_data: InlineData {
          mime_type: image.mime.clone(),
          data: image.base64.clone(),
        },
      },
    })
    .collect();
  Content {
    role: Some(turn.role.as_str().to_string()),
    parts,
  }
}

fn to_generation_config(params: &GenerationParams) -> GenerationConfig {
  GenerationConfig {
    temperature: params.temperature,
    top_p: params.top_p,
    top_k: params.top_k,
    max_output_tokens: params.max_output_tokens,
  }
}

fn extract_text(body: GenerateContentResponse) -> Result<String, ModelError> {
  let text: String = body
    .candidates
    .first()
    .map(|candidate| {
      candidate
        .content
        .parts
        .iter()
        .filter_map(|part| match part {
          Part::Text { text } => Some(text.as_str()),
          Part::InlineData { .. } => None,
        })
        .collect()
    })
    .unwrap_or_default();

  if text.is_empty() {
    let reason = body.prompt_feedback.and_then(|f| f.block_reason);
    return Err(ModelError::EmptyResponse(reason));
  }
  Ok(text)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{ImageData, TurnRole};
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn request_with_image() -> ModelRequest {
    ModelRequest {
      turns: vec![
        ContextTurn::text(TurnRole::User, "First"),
        ContextTurn::text(TurnRole::Model, "Ack"),
        ContextTurn {
          role: TurnRole::User,
          parts: vec![
            TurnPart::Text("What is this?".to_string()),
            TurnPart::Image(ImageData {
              mime: "image/png".to_string(),
              base64: "abc".to_string(),
            }),
          ],
        },
      ],
      params: GenerationParams::default(),
    }
  }

  #[test]
  fn request_serializes_to_gemini_shape() {
    let payload = serde_json::to_value(to_gemini_request(&request_with_image())).unwrap();

    assert_eq!(payload["contents"][0]["role"], "user");
    assert_eq!(payload["contents"][1]["role"], "model");
    assert_eq!(payload["contents"][2]["parts"][0]["text"], "What is this?");
    assert_eq!(payload["contents"][2]["parts"][1]["inlineData"]["mimeType"], "image/png");
    assert_eq!(payload["contents"][2]["parts"][1]["inlineData"]["data"], "abc");
    assert_eq!(payload["generationConfig"]["maxOutputTokens"], 1000);
    assert_eq!(payload["safetySettings"].as_array().unwrap().len(), 4);
  }

  #[test]
  fn extract_text_joins_text_parts() {
    let body: GenerateContentResponse = serde_json::from_value(serde_json::json!({
      "candidates": [{ "content": { "role": "model", "parts": [{ "text": "Hi " }, { "text": "there" }] } }]
    }))
    .unwrap();
    assert_eq!(extract_text(body).unwrap(), "Hi there");
  }

  #[test]
  fn extract_text_reports_block_reason() {
    let body: GenerateContentResponse = serde_json::from_value(serde_json::json!({
      "promptFeedback": { "blockReason": "SAFETY" }
    }))
    .unwrap();
    let err = extract_text(body).unwrap_err();
    assert!(matches!(err, ModelError::EmptyResponse(Some(ref r)) if r == "SAFETY"));
    assert!(err.to_string().contains("SAFETY"));
  }

  #[tokio::test]
  async fn generate_posts_to_model_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/models/gemini-test:generateContent"))
      .and(header(API_KEY_HEADER, "abc123"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "candidates": [{ "content": { "parts": [{ "text": "Hi there" }] } }]
      })))
      .expect(1)
      .mount(&server)
      .await;

    let client = GeminiClient::new("abc123")
      .with_model("gemini-test")
      .with_base_url(server.uri());
    let text = client.generate(request_with_image()).await.unwrap();
    assert_eq!(text, "Hi there");
  }

  #[tokio::test]
  async fn generate_surfaces_api_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(403).set_body_string("API key not valid"))
      .mount(&server)
      .await;

    let client = GeminiClient::new("bad").with_base_url(server.uri());
    let err = client.generate(request_with_image()).await.unwrap_err();
    match err {
      ModelError::Api { status, body } => {
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("API key not valid"));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[tokio::test]
  async fn transport_errors_do_not_reveal_the_key() {
    let client = GeminiClient::new("SECRETKEY123").with_base_url("http://127.0.0.1:1");
    let err = client.generate(request_with_image()).await.unwrap_err();

    assert!(matches!(err, ModelError::Transport(_)));
    assert!(!err.to_string().contains("SECRETKEY123"));
    assert!(!format!("{err:?}").contains("SECRETKEY123"));
  }
}
