#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tauri::{Manager, State};
use tokio::sync::Mutex;

use genz_chat::app::{ChatApp, Startup};
use genz_chat::config::{default_config_path, default_image_dir, CONFIG_FILE_NAME, IMAGE_DIR_NAME};
use genz_chat::imagegen::ImageGenerator;
use genz_chat::logger;
use genz_chat::models::Message;
use genz_chat::session::{SessionController, SessionEvent};

const SESSION_EVENT: &str = "session-event";
const IMAGE_READY_NOTICE: &str = "Image generated successfully! Lowkey fire ngl ✨";

struct AppState {
  chat: Arc<Mutex<ChatApp>>,
  images: ImageGenerator,
  log_path: PathBuf,
}

#[tauri::command]
async fn start_session(state: State<'_, AppState>) -> Result<Startup, String> {
  Ok(state.chat.lock().await.start())
}

#[tauri::command]
async fn has_api_key(state: State<'_, AppState>) -> Result<bool, String> {
  Ok(state.chat.lock().await.has_api_key())
}

#[tauri::command]
async fn set_api_key(state: State<'_, AppState>, key: String) -> Result<(), String> {
  state
    .chat
    .lock()
    .await
    .provide_api_key(&key)
    .map_err(|e| e.to_string())
}

#[tauri::command]
async fn send_message(state: State<'_, AppState>, text: String) -> Result<bool, String> {
  let handle = state
    .chat
    .lock()
    .await
    .session_mut()
    .submit(&text)
    .map_err(|e| e.to_string())?;
  let Some(handle) = handle else {
    return Ok(false);
  };

  let chat = state.chat.clone();
  tauri::async_runtime::spawn(async move {
    let completion = handle.outcome().await;
    chat.lock().await.session_mut().complete(completion);
  });
  Ok(true)
}

#[tauri::command]
async fn get_transcript(state: State<'_, AppState>) -> Result<Vec<Message>, String> {
  Ok(state.chat.lock().await.session().transcript().messages().to_vec())
}

#[tauri::command]
async fn clear_chat(state: State<'_, AppState>) -> Result<(), String> {
  state.chat.lock().await.session_mut().clear();
  Ok(())
}

#[tauri::command]
async fn attach_image(state: State<'_, AppState>, path: PathBuf) -> Result<(), String> {
  state.chat.lock().await.session_mut().attach_image(path);
  Ok(())
}

#[tauri::command]
async fn clear_image(state: State<'_, AppState>) -> Result<(), String> {
  state.chat.lock().await.session_mut().clear_image();
  Ok(())
}

#[tauri::command]
async fn generate_image(state: State<'_, AppState>, prompt: String) -> Result<PathBuf, String> {
  let path = state.images.generate(&prompt).await.map_err(|e| e.to_string())?;
  let mut chat = state.chat.lock().await;
  let session = chat.session_mut();
  session.attach_image(path.clone());
  session.notice(IMAGE_READY_NOTICE);
  Ok(path)
}

#[tauri::command]
async fn save_image(state: State<'_, AppState>, source: PathBuf, destination: PathBuf) -> Result<(), String> {
  state
    .images
    .save_copy(&source, &destination)
    .await
    .map_err(|e| e.to_string())
}

#[tauri::command]
fn get_log_path(state: State<'_, AppState>) -> String {
  state.log_path.display().to_string()
}

fn main() {
  tauri::Builder::default()
    .setup(|app| {
      (|| -> anyhow::Result<()> {
        let data_dir = app
          .path_resolver()
          .app_data_dir()
          .context("missing app data dir")?;
        std::fs::create_dir_all(&data_dir)?;

        let log_path = data_dir.join("genz-chat.log");
        logger::init_logging(&log_path)?;
        tracing::info!("GenZ Chat starting up");

        let config_path = default_config_path().unwrap_or_else(|| data_dir.join(CONFIG_FILE_NAME));
        let image_dir = default_image_dir().unwrap_or_else(|| data_dir.join(IMAGE_DIR_NAME));

        let handle = app.handle();
        let session = SessionController::new(move |event: &SessionEvent| {
          if let Err(err) = handle.emit_all(SESSION_EVENT, event) {
            tracing::warn!(error = %err, "failed to deliver session event");
          }
        });
        let runtime = tauri::async_runtime::block_on(async { tokio::runtime::Handle::current() });

        app.manage(AppState {
          chat: Arc::new(Mutex::new(ChatApp::new(config_path, session, runtime))),
          images: ImageGenerator::new(image_dir)?,
          log_path,
        });
        Ok(())
      })()
      .map_err(|e| e.into())
    })
    .invoke_handler(tauri::generate_handler![
      start_session,
      has_api_key,
      set_api_key,
      send_message,
      get_transcript,
      clear_chat,
      attach_image,
      clear_image,
      generate_image,
      save_image,
      get_log_path
    ])
    .run(tauri::generate_context!())
    .expect("error while running tauri application");
}
