use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber, appending plain-text lines to `path`.
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_logging(path: &Path) -> anyhow::Result<()> {
  let file = OpenOptions::new().create(true).append(true).open(path)?;
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(Mutex::new(file))
    .with_ansi(false)
    .with_target(true)
    .try_init()
    .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))?;
  Ok(())
}
