use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::{load_config, save_config, AppConfig, ConfigError};
use crate::dispatcher::Dispatcher;
use crate::gemini::{ChatModel, GeminiClient};
use crate::session::SessionController;

pub const CONNECTED_NOTICE: &str = "Connected to Gemini! Vibes are immaculate! 💯";

#[derive(Debug, thiserror::Error)]
pub enum AppError {
  #[error("an API key is required to use this application")]
  EmptyCredential,
  #[error(transparent)]
  ConfigWriteFailed(#[from] ConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Startup {
  Connected,
  CredentialRequired,
}

type Connector = Box<dyn Fn(&str) -> Arc<dyn ChatModel> + Send + Sync>;

/// Ties the stored credential to a live session.
pub struct ChatApp {
  config_path: PathBuf,
  session: SessionController,
  connector: Connector,
  runtime: Handle,
}

impl ChatApp {
  pub fn new(config_path: PathBuf, session: SessionController, runtime: Handle) -> Self {
    Self::with_connector(config_path, session, runtime, |key: &str| -> Arc<dyn ChatModel> {
      Arc::new(GeminiClient::new(key))
    })
  }

  pub fn with_connector(
    config_path: PathBuf,
    session: SessionController,
    runtime: Handle,
    connector: impl Fn(&str) -> Arc<dyn ChatModel> + Send + Sync + 'static,
  ) -> Self {
    Self {
      config_path,
      session,
      connector: Box::new(connector),
      runtime,
    }
  }

  pub fn start(&mut self) -> Startup {
    let config = match load_config(&self.config_path) {
      Ok(config) => config,
      Err(err) => {
        tracing::warn!(error = %err, "could not load configuration");
        None
      }
    };
    match config.as_ref().and_then(AppConfig::credential) {
      Some(key) => {
        self.connect(key);
        Startup::Connected
      }
      None => {
        tracing::info!(path = %self.config_path.display(), "no API key configured");
        Startup::CredentialRequired
      }
    }
  }

  /// Stores a new key and reconnects the session with it.
  pub fn provide_api_key(&mut self, key: &str) -> Result<(), AppError> {
    let key = key.trim();
    if key.is_empty() {
      return Err(AppError::EmptyCredential);
    }
    save_config(&self.config_path, &AppConfig::with_api_key(key))?;
    self.connect(key);
    Ok(())
  }

  pub fn has_api_key(&self) -> bool {
    self.session.is_connected()
  }

  pub fn config_path(&self) -> &PathBuf {
    &self.config_path
  }

  pub fn session(&self) -> &SessionController {
    &self.session
  }

  pub fn session_mut(&mut self) -> &mut SessionController {
    &mut self.session
  }

  fn connect(&mut self, key: &str) {
    let model = (self.connector)(key);
    self.session.connect(Dispatcher::new(model, self.runtime.clone()));
    self.session.notice(CONNECTED_NOTICE);
    tracing::info!("connected chat session");
  }
}
