//! Single-slot request dispatch.
//!
//! At most one model call is outstanding at a time. The slot is owned by the
//! [`DispatchHandle`] returned from [`Dispatcher::submit`] and is released
//! once the outcome has been taken or the handle is dropped. The background
//! task only produces an outcome; it never touches session state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::gemini::ChatModel;
use crate::models::{
  ContextTurn, GenerationParams, ImageData, Message, ModelReply, ModelRequest, Role, TurnPart, TurnRole,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
  #[error("a request is already in flight")]
  Busy,
}

#[derive(Clone, Debug)]
pub struct PendingRequest {
  pub id: Uuid,
  pub text: String,
  pub image: Option<PathBuf>,
  pub snapshot: Arc<[Message]>,
}

impl PendingRequest {
  pub fn new(text: impl Into<String>, image: Option<PathBuf>, snapshot: Arc<[Message]>) -> Self {
    Self {
      id: Uuid::new_v4(),
      text: text.into(),
      image,
      snapshot,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
  ImageEncoding,
  Request,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispatchFailure {
  pub kind: FailureKind,
  pub message: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
  Success(ModelReply),
  Failure(DispatchFailure),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
  pub request_id: Uuid,
  pub outcome: DispatchOutcome,
}

type Slot = Arc<Mutex<Option<Uuid>>>;

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<Uuid>> {
  slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Frees the slot on drop, but only while it still belongs to this request.
struct SlotGuard {
  slot: Slot,
  request_id: Uuid,
}

impl Drop for SlotGuard {
  fn drop(&mut self) {
    let mut current = lock_slot(&self.slot);
    if *current == Some(self.request_id) {
      *current = None;
    }
  }
}

pub struct DispatchHandle {
  request_id: Uuid,
  rx: oneshot::Receiver<DispatchOutcome>,
  slot: Option<SlotGuard>,
}

impl DispatchHandle {
  pub fn request_id(&self) -> Uuid {
    self.request_id
  }

  pub async fn outcome(self) -> Completion {
    let request_id = self.request_id;
    let outcome = self.rx.await.unwrap_or_else(|_| worker_lost());
    Completion { request_id, outcome }
  }

  /// Non-blocking poll for event loops that cannot await.
  pub fn try_outcome(&mut self) -> Option<Completion> {
    let outcome = match self.rx.try_recv() {
      Ok(outcome) => outcome,
      Err(oneshot::error::TryRecvError::Empty) => return None,
      Err(oneshot::error::TryRecvError::Closed) => worker_lost(),
    };
    self.slot.take();
    Some(Completion {
      request_id: self.request_id,
      outcome,
    })
  }
}

fn worker_lost() -> DispatchOutcome {
  DispatchOutcome::Failure(DispatchFailure {
    kind: FailureKind::Request,
    message: "request worker stopped before reporting a result".to_string(),
  })
}

#[derive(Clone)]
pub struct Dispatcher {
  model: Arc<dyn ChatModel>,
  params: GenerationParams,
  runtime: Handle,
  slot: Slot,
}

impl Dispatcher {
  pub fn new(model: Arc<dyn ChatModel>, runtime: Handle) -> Self {
    Self {
      model,
      params: GenerationParams::default(),
      runtime,
      slot: Arc::new(Mutex::new(None)),
    }
  }

  pub fn with_params(mut self, params: GenerationParams) -> Self {
    self.params = params;
    self
  }

  pub fn is_busy(&self) -> bool {
    lock_slot(&self.slot).is_some()
  }

  /// Gives up on the outstanding request. Its result, if it ever arrives,
  /// goes nowhere and its handle no longer holds the slot.
  pub fn abandon(&self) {
    if let Some(request_id) = lock_slot(&self.slot).take() {
      tracing::info!(%request_id, "abandoned in-flight request");
    }
  }

  pub fn submit(&self, request: PendingRequest) -> Result<DispatchHandle, DispatchError> {
    {
      let mut current = lock_slot(&self.slot);
      if current.is_some() {
        return Err(DispatchError::Busy);
      }
      *current = Some(request.id);
    }
    let slot = SlotGuard {
      slot: self.slot.clone(),
      request_id: request.id,
    };

    let (tx, rx) = oneshot::channel();
    let model = self.model.clone();
    let params = self.params;
    let request_id = request.id;

    tracing::info!(%request_id, has_image = request.image.is_some(), "dispatching chat request");

    self.runtime.spawn(async move {
      let outcome = run(model.as_ref(), params, request).await;
      // The receiver is gone when the chat was cleared; nothing to report to.
      let _ = tx.send(outcome);
    });

    Ok(DispatchHandle {
      request_id,
      rx,
      slot: Some(slot),
    })
  }
}

async fn run(model: &dyn ChatModel, params: GenerationParams, request: PendingRequest) -> DispatchOutcome {
  let image = match request.image.as_deref() {
    Some(path) => match load_image(path).await {
      Ok(image) => Some(image),
      Err(err) => {
        tracing::warn!(request_id = %request.id, path = %path.display(), error = %err, "image encoding failed");
        return DispatchOutcome::Failure(DispatchFailure {
          kind: FailureKind::ImageEncoding,
          message: format!("Failed to process image: {err}"),
        });
      }
    },
    None => None,
  };

  let turns = build_context(&request.snapshot, &request.text, image);
  match model.generate(ModelRequest { turns, params }).await {
    Ok(text) => {
      tracing::info!(request_id = %request.id, chars = text.len(), "chat request completed");
      DispatchOutcome::Success(ModelReply { text, images: Vec::new() })
    }
    Err(err) => {
      tracing::warn!(request_id = %request.id, error = %err, "chat request failed");
      DispatchOutcome::Failure(DispatchFailure {
        kind: FailureKind::Request,
        message: err.to_string(),
      })
    }
  }
}

/// Builds the model context: prior user/assistant messages as plain text,
/// followed by the new turn. Only the new turn may carry an image.
pub fn build_context(snapshot: &[Message], text: &str, image: Option<ImageData>) -> Vec<ContextTurn> {
  let mut turns: Vec<ContextTurn> = snapshot
    .iter()
    .filter(|m| m.is_context())
    .map(|m| {
      let role = match m.role {
        Role::User => TurnRole::User,
        _ => TurnRole::Model,
      };
      ContextTurn::text(role, m.content.clone())
    })
    .collect();

  let mut parts = Vec::new();
  if !text.is_empty() {
    parts.push(TurnPart::Text(text.to_string()));
  }
  if let Some(image) = image {
    parts.push(TurnPart::Image(image));
  }
  turns.push(ContextTurn {
    role: TurnRole::User,
    parts,
  });
  turns
}

pub async fn load_image(path: &Path) -> std::io::Result<ImageData> {
  let bytes = tokio::fs::read(path).await?;
  Ok(ImageData {
    mime: mime_for(path).to_string(),
    base64: base64::engine::general_purpose::STANDARD.encode(bytes),
  })
}

fn mime_for(path: &Path) -> &'static str {
  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| e.to_ascii_lowercase());
  match ext.as_deref() {
    Some("png") => "image/png",
    Some("gif") => "image/gif",
    Some("webp") => "image/webp",
    _ => "image/jpeg",
  }
}
