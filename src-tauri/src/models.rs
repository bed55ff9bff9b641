use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
  System,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
  pub id: Uuid,
  pub role: Role,
  pub content: String,
  pub image: Option<PathBuf>,
  pub timestamp: DateTime<Utc>,
}

impl Message {
  fn new(role: Role, content: String, image: Option<PathBuf>) -> Self {
    Self {
      id: Uuid::new_v4(),
      role,
      content,
      image,
      timestamp: Utc::now(),
    }
  }

  pub fn user(content: impl Into<String>, image: Option<PathBuf>) -> Self {
    Self::new(Role::User, content.into(), image)
  }

  pub fn assistant(content: impl Into<String>) -> Self {
    Self::new(Role::Assistant, content.into(), None)
  }

  pub fn system(content: impl Into<String>) -> Self {
    Self::new(Role::System, content.into(), None)
  }

  /// System messages are shown to the user but never replayed to the model.
  pub fn is_context(&self) -> bool {
    self.role != Role::System
  }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageData {
  pub mime: String,
  pub base64: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnRole {
  User,
  Model,
}

impl TurnRole {
  pub fn as_str(self) -> &'static str {
    match self {
      TurnRole::User => "user",
      TurnRole::Model => "model",
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnPart {
  Text(String),
  Image(ImageData),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ContextTurn {
  pub role: TurnRole,
  pub parts: Vec<TurnPart>,
}

impl ContextTurn {
  pub fn text(role: TurnRole, text: impl Into<String>) -> Self {
    Self {
      role,
      parts: vec![TurnPart::Text(text.into())],
    }
  }

  pub fn image(&self) -> Option<&ImageData> {
    self.parts.iter().find_map(|part| match part {
      TurnPart::Image(image) => Some(image),
      TurnPart::Text(_) => None,
    })
  }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationParams {
  pub temperature: f32,
  pub top_p: f32,
  pub top_k: u32,
  pub max_output_tokens: u32,
}

impl Default for GenerationParams {
  fn default() -> Self {
    Self {
      temperature: 0.9,
      top_p: 1.0,
      top_k: 1,
      max_output_tokens: 1000,
    }
  }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
  pub turns: Vec<ContextTurn>,
  pub params: GenerationParams,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ModelReply {
  pub text: String,
  pub images: Vec<PathBuf>,
}
