//! The chat session: owns the transcript and the `Idle -> Awaiting -> Idle`
//! request lifecycle. Every transcript mutation happens here, on the
//! caller's control flow; background work only hands back a [`Completion`].

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::dispatcher::{Completion, DispatchError, DispatchHandle, DispatchOutcome, Dispatcher, PendingRequest};
use crate::formatter;
use crate::models::Message;
use crate::transcript::Transcript;

pub const CLEARED_NOTICE: &str = "Chat cleared! Fresh vibes only from here! ✨";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
  #[error("not connected to Gemini; set an API key first")]
  NotConfigured,
  #[error("still waiting on the previous reply")]
  Busy,
}

impl From<DispatchError> for SessionError {
  fn from(err: DispatchError) -> Self {
    match err {
      DispatchError::Busy => SessionError::Busy,
    }
  }
}

#[derive(Debug, Clone)]
pub enum SessionState {
  Idle,
  Awaiting(PendingRequest),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
  MessageAppended { message: Message },
  LoadingStarted,
  LoadingFinished,
  Cleared,
  Notice { text: String },
  ImageAttached { path: PathBuf },
  ImageCleared,
}

pub trait SessionObserver: Send {
  fn notify(&self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
  F: Fn(&SessionEvent) + Send,
{
  fn notify(&self, event: &SessionEvent) {
    self(event)
  }
}

pub struct SessionController {
  transcript: Transcript,
  dispatcher: Option<Dispatcher>,
  state: SessionState,
  attached_image: Option<PathBuf>,
  observer: Box<dyn SessionObserver>,
  rng: StdRng,
}

impl SessionController {
  pub fn new(observer: impl SessionObserver + 'static) -> Self {
    Self {
      transcript: Transcript::new(),
      dispatcher: None,
      state: SessionState::Idle,
      attached_image: None,
      observer: Box::new(observer),
      rng: StdRng::from_entropy(),
    }
  }

  pub fn with_rng(mut self, rng: StdRng) -> Self {
    self.rng = rng;
    self
  }

  pub fn connect(&mut self, dispatcher: Dispatcher) {
    self.dispatcher = Some(dispatcher);
  }

  pub fn is_connected(&self) -> bool {
    self.dispatcher.is_some()
  }

  pub fn state(&self) -> &SessionState {
    &self.state
  }

  pub fn is_awaiting(&self) -> bool {
    matches!(self.state, SessionState::Awaiting(_))
  }

  pub fn transcript(&self) -> &Transcript {
    &self.transcript
  }

  pub fn attached_image(&self) -> Option<&Path> {
    self.attached_image.as_deref()
  }

  /// Attaches an image to the next submitted message, replacing any
  /// previously attached one.
  pub fn attach_image(&mut self, path: PathBuf) {
    self.attached_image = Some(path.clone());
    self.emit(SessionEvent::ImageAttached { path });
  }

  pub fn clear_image(&mut self) {
    if self.attached_image.take().is_some() {
      self.emit(SessionEvent::ImageCleared);
    }
  }

  pub fn notice(&self, text: impl Into<String>) {
    self.emit(SessionEvent::Notice { text: text.into() });
  }

  /// Sends user text (plus the attached image, if any) to the model.
  ///
  /// Blank input is ignored and yields `Ok(None)`. The returned handle
  /// resolves to a [`Completion`] that must be fed back through
  /// [`SessionController::complete`].
  pub fn submit(&mut self, text: &str) -> Result<Option<DispatchHandle>, SessionError> {
    let text = text.trim();
    if text.is_empty() {
      return Ok(None);
    }
    let dispatcher = self.dispatcher.as_ref().ok_or(SessionError::NotConfigured)?;
    if self.is_awaiting() {
      return Err(SessionError::Busy);
    }

    let request = PendingRequest::new(text, self.attached_image.clone(), self.transcript.snapshot());
    let handle = dispatcher.submit(request.clone())?;

    let message = Message::user(text, request.image.clone());
    self.state = SessionState::Awaiting(request);
    self.append(message);
    self.clear_image();
    self.emit(SessionEvent::LoadingStarted);
    Ok(Some(handle))
  }

  /// Applies the result of a submitted request. Results for a request that
  /// is no longer pending are dropped; returns whether it was applied.
  pub fn complete(&mut self, completion: Completion) -> bool {
    match &self.state {
      SessionState::Awaiting(pending) if pending.id == completion.request_id => {}
      _ => {
        tracing::debug!(request_id = %completion.request_id, "ignoring stale completion");
        return false;
      }
    }
    self.state = SessionState::Idle;
    self.emit(SessionEvent::LoadingFinished);

    let message = match completion.outcome {
      DispatchOutcome::Success(reply) => Message::assistant(formatter::format_reply(&reply.text, &mut self.rng)),
      DispatchOutcome::Failure(failure) => {
        tracing::warn!(kind = ?failure.kind, "showing request failure");
        Message::system(format!("Error: {}", failure.message))
      }
    };
    self.append(message);
    true
  }

  pub fn clear(&mut self) {
    if let SessionState::Awaiting(pending) = &self.state {
      tracing::info!(request_id = %pending.id, "clearing chat with a request in flight");
      if let Some(dispatcher) = &self.dispatcher {
        dispatcher.abandon();
      }
      self.emit(SessionEvent::LoadingFinished);
    }
    self.state = SessionState::Idle;
    self.transcript.reset();
    self.emit(SessionEvent::Cleared);
    self.notice(CLEARED_NOTICE);
  }

  fn append(&mut self, message: Message) {
    self.transcript.append(message.clone());
    self.emit(SessionEvent::MessageAppended { message });
  }

  fn emit(&self, event: SessionEvent) {
    self.observer.notify(&event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dispatcher::tests::ScriptedModel;
  use crate::gemini::GeminiClient;
  use crate::models::{Role, TurnPart};
  use std::sync::{Arc, Mutex};
  use tokio::runtime::Handle;
  use tokio::sync::Semaphore;

  type Events = Arc<Mutex<Vec<SessionEvent>>>;

  fn recording_session() -> (SessionController, Events) {
    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let session = SessionController::new(move |event: &SessionEvent| sink.lock().unwrap().push(event.clone()))
      .with_rng(StdRng::seed_from_u64(11));
    (session, events)
  }

  fn connected(model: Arc<ScriptedModel>) -> (SessionController, Events) {
    let (mut session, events) = recording_session();
    session.connect(Dispatcher::new(model, Handle::current()));
    (session, events)
  }

  fn context_texts(model: &ScriptedModel, call: usize) -> Vec<String> {
    model.requests()[call]
      .turns
      .iter()
      .flat_map(|turn| turn.parts.iter())
      .filter_map(|part| match part {
        TurnPart::Text(text) => Some(text.clone()),
        TurnPart::Image(_) => None,
      })
      .collect()
  }

  #[tokio::test]
  async fn submit_appends_user_message_and_awaits() {
    let model = Arc::new(ScriptedModel::replying("Hi there"));
    let (mut session, events) = connected(model);

    let handle = session.submit("hello").unwrap();
    assert!(handle.is_some());
    assert!(session.is_awaiting());
    assert_eq!(session.transcript().len(), 1);
    let message = session.transcript().last().unwrap();
    assert_eq!(message.role, Role::User);
    assert_eq!(message.content, "hello");

    let events = events.lock().unwrap();
    assert!(matches!(events[0], SessionEvent::MessageAppended { .. }));
    assert_eq!(events[1], SessionEvent::LoadingStarted);
  }

  #[tokio::test]
  async fn blank_submit_is_a_no_op() {
    let model = Arc::new(ScriptedModel::replying("unused"));
    let (mut session, events) = connected(model.clone());

    for blank in ["", "   ", "\n\t"] {
      assert!(session.submit(blank).unwrap().is_none());
    }
    assert!(session.transcript().is_empty());
    assert!(!session.is_awaiting());
    assert!(events.lock().unwrap().is_empty());
    assert!(model.requests().is_empty());
  }

  #[test]
  fn submit_without_model_is_not_configured() {
    let (mut session, _) = recording_session();
    assert_eq!(session.submit("hello").err(), Some(SessionError::NotConfigured));
    assert!(session.transcript().is_empty());
    assert!(!session.is_awaiting());
  }

  #[tokio::test]
  async fn submit_while_awaiting_is_busy() {
    let gate = Arc::new(Semaphore::new(0));
    let model = Arc::new(ScriptedModel::gated("done", gate.clone()));
    let (mut session, _) = connected(model.clone());

    let handle = session.submit("one").unwrap().unwrap();
    assert_eq!(session.submit("two").err(), Some(SessionError::Busy));
    assert_eq!(session.transcript().len(), 1);

    gate.add_permits(1);
    let completion = handle.outcome().await;
    assert!(session.complete(completion));
    assert_eq!(model.requests().len(), 1);
  }

  #[tokio::test]
  async fn successful_reply_becomes_formatted_assistant_message() {
    let model = Arc::new(ScriptedModel::replying("Hi there"));
    let (mut session, events) = connected(model.clone());

    let completion = session.submit("hello").unwrap().unwrap().outcome().await;
    let requests = model.requests();
    let request = &requests[0];
    assert_eq!(request.turns.len(), 1);
    assert!(request.turns[0].image().is_none());
    assert_eq!(context_texts(&model, 0), vec!["hello".to_string()]);

    assert!(session.complete(completion));
    assert!(!session.is_awaiting());
    let reply = session.transcript().last().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert!(reply.content.starts_with("Hi there"));
    assert!(events.lock().unwrap().contains(&SessionEvent::LoadingFinished));
  }

  #[tokio::test]
  async fn failure_is_shown_but_not_replayed_to_model() {
    let model = Arc::new(ScriptedModel::failing("timeout"));
    let (mut session, _) = connected(model.clone());

    let completion = session.submit("hello").unwrap().unwrap().outcome().await;
    assert!(session.complete(completion));
    assert!(!session.is_awaiting());
    let shown = session.transcript().last().unwrap();
    assert_eq!(shown.role, Role::System);
    assert!(shown.content.contains("timeout"));

    let completion = session.submit("again").unwrap().unwrap().outcome().await;
    session.complete(completion);
    let texts = context_texts(&model, 1);
    assert_eq!(texts, vec!["hello".to_string(), "again".to_string()]);
  }

  #[tokio::test]
  async fn attached_image_travels_with_next_message_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.jpg");
    std::fs::write(&path, b"jpeg").unwrap();

    let model = Arc::new(ScriptedModel::replying("a cat"));
    let (mut session, events) = connected(model.clone());
    session.attach_image(path.clone());

    let completion = session.submit("what is this").unwrap().unwrap().outcome().await;
    session.complete(completion);
    assert_eq!(session.transcript().messages()[0].image.as_deref(), Some(path.as_path()));
    assert!(session.attached_image().is_none());
    assert!(events.lock().unwrap().contains(&SessionEvent::ImageCleared));

    let completion = session.submit("and now?").unwrap().unwrap().outcome().await;
    session.complete(completion);
    let requests = model.requests();
    assert!(requests[0].turns[0].image().is_some());
    assert!(requests[1].turns.iter().all(|turn| turn.image().is_none()));
  }

  #[tokio::test]
  async fn clear_resets_transcript_and_drops_pending_result() {
    let gate = Arc::new(Semaphore::new(0));
    let model = Arc::new(ScriptedModel::gated("late", gate.clone()));
    let (mut session, events) = connected(model);

    let stale = session.submit("hello").unwrap().unwrap();
    session.clear();
    assert!(session.transcript().is_empty());
    assert!(!session.is_awaiting());
    assert!(events.lock().unwrap().contains(&SessionEvent::Cleared));

    let fresh = session.submit("fresh start").unwrap().unwrap();
    gate.add_permits(2);
    assert!(!session.complete(stale.outcome().await));
    assert!(session.complete(fresh.outcome().await));
    assert_eq!(session.transcript().len(), 2);
  }

  #[tokio::test]
  async fn unreachable_model_error_does_not_show_the_key() {
    let client = GeminiClient::new("SECRETKEY123").with_base_url("http://127.0.0.1:1");
    let (mut session, _) = recording_session();
    session.connect(Dispatcher::new(Arc::new(client), Handle::current()));

    let completion = session.submit("hello").unwrap().unwrap().outcome().await;
    assert!(session.complete(completion));

    let shown = session.transcript().last().unwrap();
    assert_eq!(shown.role, Role::System);
    assert!(shown.content.starts_with("Error: request to model failed"));
    assert!(!shown.content.contains("SECRETKEY123"));
  }
}
