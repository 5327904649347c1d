//! Config hot-reload watcher.
//!
//! Watches `stagehand.toml` for modifications and invokes a callback with the
//! reloadable sections after a debounce window. Only lane concurrency limits
//! are applied at runtime; everything else needs a restart.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use stagehand_core::{StagehandError, StagehandResult};
use stagehand_orchestrator::LaneConfig;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;

/// Sections of the config file that can change without a restart.
#[derive(Debug, Clone, Deserialize)]
pub struct ReloadableConfig {
    /// New lane limits, when the `[lanes]` table is present.
    #[serde(default)]
    pub lanes: Option<LaneConfig>,
}

/// Keeps a file watch alive; dropping it stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `config_path`.
    ///
    /// `on_reload` runs on a background thread after each successfully
    /// parsed change. Parse errors are logged and skipped.
    pub fn start<F>(config_path: PathBuf, debounce_ms: u64, on_reload: F) -> StagehandResult<Self>
    where
        F: Fn(ReloadableConfig) + Send + Sync + 'static,
    {
        let (tx, rx) = std_mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = tx.send(());
                }
            }
        })
        .map_err(|e| StagehandError::Config(format!("Failed to create file watcher: {e}")))?;

        watcher
            .watch(config_path.as_ref(), RecursiveMode::NonRecursive)
            .map_err(|e| StagehandError::Config(format!("Failed to watch config file: {e}")))?;

        let path = config_path.clone();
        std::thread::spawn(move || {
            let debounce = std::time::Duration::from_millis(debounce_ms);
            while rx.recv().is_ok() {
                // Editors often write in several steps.
                std::thread::sleep(debounce);
                while rx.try_recv().is_ok() {}

                match parse_config(&path) {
                    Ok(config) => on_reload(config),
                    Err(e) => tracing::warn!(error = %e, "Failed to reload config"),
                }
            }
            tracing::debug!("Config watcher thread exiting");
        });

        tracing::info!(path = %config_path.display(), "Config hot-reload watcher started");
        Ok(Self { _watcher: watcher })
    }
}

/// Read and parse the reloadable sections of a config file.
pub fn parse_config(path: &Path) -> StagehandResult<ReloadableConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        StagehandError::Config(format!("Failed to read config '{}': {e}", path.display()))
    })?;
    let config: ReloadableConfig = toml::from_str(&content).map_err(|e| {
        StagehandError::Config(format!("Failed to parse config '{}': {e}", path.display()))
    })?;
    if let Some(lanes) = &config.lanes {
        if lanes.standard_concurrency == 0 || lanes.latency_sensitive_concurrency == 0 {
            return Err(StagehandError::Config(
                "lane concurrency limits must be at least 1".into(),
            ));
        }
    }
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_lanes_section() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp.as_file_mut(),
            r#"
persona = "ignored here"

[lanes]
standard_concurrency = 6
"#
        )
        .unwrap();

        let config = parse_config(tmp.path()).unwrap();
        let lanes = config.lanes.unwrap();
        assert_eq!(lanes.standard_concurrency, 6);
        assert_eq!(lanes.latency_sensitive_concurrency, 1);
    }

    #[test]
    fn test_parse_without_lanes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "[retry]\nmax_retries = 5").unwrap();
        assert!(parse_config(tmp.path()).unwrap().lanes.is_none());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "[lanes]\nlatency_sensitive_concurrency = 0").unwrap();
        assert!(parse_config(tmp.path()).is_err());
    }

    #[test]
    fn test_parse_invalid_toml_returns_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp.as_file_mut(), "{{{{invalid toml!!!!").unwrap();
        let err_msg = parse_config(tmp.path()).unwrap_err().to_string();
        assert!(err_msg.contains("Failed to parse config"), "unexpected error: {err_msg}");
    }

    #[test]
    fn test_parse_nonexistent_file_returns_error() {
        let err_msg = parse_config(Path::new("/nonexistent/path/stagehand.toml"))
            .unwrap_err()
            .to_string();
        assert!(err_msg.contains("Failed to read config"), "unexpected error: {err_msg}");
    }
}
