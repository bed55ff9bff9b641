use std::sync::Arc;

use crate::models::Message;

/// Ordered, append-only log of one chat session.
#[derive(Default, Debug)]
pub struct Transcript {
  messages: Vec<Message>,
}

impl Transcript {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn append(&mut self, message: Message) {
    self.messages.push(message);
  }

  pub fn reset(&mut self) {
    self.messages.clear();
  }

  pub fn snapshot(&self) -> Arc<[Message]> {
    Arc::from(self.messages.as_slice())
  }

  pub fn messages(&self) -> &[Message] {
    &self.messages
  }

  pub fn last(&self) -> Option<&Message> {
    self.messages.last()
  }

  pub fn len(&self) -> usize {
    self.messages.len()
  }

  pub fn is_empty(&self) -> bool {
    self.messages.is_empty()
  }
}
