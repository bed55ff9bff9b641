use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;

const ENDPOINT: &str = "https://image.pollinations.ai/prompt/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ImageGenError {
  #[error("please enter a description for your image")]
  EmptyPrompt,
  #[error("invalid image endpoint: {0}")]
  Endpoint(String),
  #[error("image request failed: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("Failed to generate image: Status {0}")]
  Status(u16),
  #[error("could not save image: {0}")]
  Io(#[from] std::io::Error),
  #[error("{0} is not a generated image")]
  NotGenerated(PathBuf),
}

#[derive(Clone)]
pub struct ImageGenerator {
  client: reqwest::Client,
  endpoint: String,
  output_dir: PathBuf,
}

impl ImageGenerator {
  pub fn new(output_dir: PathBuf) -> Result<Self, ImageGenError> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    Ok(Self {
      client,
      endpoint: ENDPOINT.to_string(),
      output_dir,
    })
  }

  pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
    self.endpoint = endpoint.into();
    self
  }

  pub fn output_dir(&self) -> &Path {
    &self.output_dir
  }

  fn prompt_url(&self, prompt: &str) -> Result<Url, ImageGenError> {
    let mut url = Url::parse(&self.endpoint).map_err(|err| ImageGenError::Endpoint(err.to_string()))?;
    url
      .path_segments_mut()
      .map_err(|_| ImageGenError::Endpoint(self.endpoint.clone()))?
      .pop_if_empty()
      .push(prompt);
    Ok(url)
  }

  /// Downloads an image for `prompt` and returns where it was saved.
  pub async fn generate(&self, prompt: &str) -> Result<PathBuf, ImageGenError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
      return Err(ImageGenError::EmptyPrompt);
    }

    let url = self.prompt_url(prompt)?;
    tracing::info!(%url, "requesting generated image");
    let resp = self.client.get(url).send().await?;
    if !resp.status().is_success() {
      let status = resp.status().as_u16();
      tracing::warn!(status, "image generation failed");
      return Err(ImageGenError::Status(status));
    }
    let bytes = resp.bytes().await?;

    tokio::fs::create_dir_all(&self.output_dir).await?;
    let path = self
      .output_dir
      .join(format!("generated_image_{}.jpg", Utc::now().timestamp_millis()));
    tokio::fs::write(&path, &bytes).await?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "saved generated image");
    Ok(path)
  }

  /// Copies a generated image to a location the user picked. Only files
  /// inside the output directory can be copied.
  pub async fn save_copy(&self, source: &Path, destination: &Path) -> Result<(), ImageGenError> {
    let source = tokio::fs::canonicalize(source).await?;
    let output_dir = tokio::fs::canonicalize(&self.output_dir).await?;
    if !source.starts_with(&output_dir) {
      tracing::warn!(path = %source.display(), "refusing to copy file outside the image directory");
      return Err(ImageGenError::NotGenerated(source));
    }
    tokio::fs::copy(&source, destination).await?;
    tracing::info!(from = %source.display(), to = %destination.display(), "saved image copy");
    Ok(())
  }
}
