//! File-watch hot-reload for the configuration file, behind the `runtime`
//! feature — mirrors the corpus's own config crate's `runtime` feature gate.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{info, warn};

use crate::{ConfigError, IntakeConfig};

/// Watches `path` for writes and re-runs [`IntakeConfig::load`] on each one,
/// invoking `on_reload` with the freshly validated configuration. A reload
/// that fails validation is logged and the previously loaded configuration
/// stays in effect (§6: "the previous configuration stays live").
pub fn watch_config(
    path: PathBuf,
    mut on_reload: impl FnMut(IntakeConfig) + Send + 'static,
) -> Result<RecommendedWatcher, ConfigError> {
    let (tx, rx) = mpsc::channel();

    let mut watcher = notify::recommended_watcher(tx)
        .map_err(|e| ConfigError::Load(format!("failed to start config file watcher: {e}")))?;
    watcher
        .watch(&path, RecursiveMode::NonRecursive)
        .map_err(|e| ConfigError::Load(format!("failed to watch {path:?}: {e}")))?;

    let watched_path = path.clone();
    std::thread::spawn(move || run_watch_loop(rx, &watched_path, &mut on_reload));

    Ok(watcher)
}

fn run_watch_loop(
    rx: mpsc::Receiver<notify::Result<notify::Event>>,
    path: &Path,
    on_reload: &mut impl FnMut(IntakeConfig),
) {
    for event in rx.iter() {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(error = %err, "configuration watcher error");
                continue;
            }
        };

        if !event.kind.is_modify() && !event.kind.is_create() {
            continue;
        }

        // Debounce: editors often emit several events for one save.
        std::thread::sleep(Duration::from_millis(50));

        match IntakeConfig::load(Some(path)) {
            Ok(config) => {
                info!(path = ?path, "configuration reloaded");
                on_reload(config);
            }
            Err(err) => {
                warn!(path = ?path, error = %err, "configuration reload failed, keeping previous configuration");
            }
        }
    }
}
