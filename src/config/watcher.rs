//! Configuration file watcher for hot-reload support
//!
//! The parent directory is watched instead of the file itself, so editors
//! that save by writing a temp file and renaming it over the config keep
//! triggering reloads.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Delay between the first change event and the re-read, so partial writes
/// settle and a burst of events yields one reload
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the config file and delivers every valid new version
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the config (writing defaults when the file is missing) and start
    /// watching it
    pub async fn new(config_path: String) -> Result<(Self, AppConfig)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load_or_create(&config_path)
            .await
            .context("Failed to load initial config")?;

        let (watch_dir, file_name) = split_config_path(Path::new(&config_path))?;
        let reload_pending = Arc::new(AtomicBool::new(false));
        let path = config_path.clone();

        // notify callbacks run on their own OS thread, outside the runtime
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Watch error: {}", e);
                    return;
                }
            };
            if !is_config_event(&event, &file_name) {
                return;
            }
            if reload_pending.swap(true, Ordering::AcqRel) {
                debug!("Config reload already scheduled");
                return;
            }
            debug!("Config file changed ({:?}): {:?}", event.kind, event.paths);

            let path = path.clone();
            let tx = tx.clone();
            let reload_pending = reload_pending.clone();
            runtime_handle.spawn(async move {
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                reload_pending.store(false, Ordering::Release);

                match AppConfig::load(&path).await {
                    Ok(new_config) => {
                        info!("Configuration reloaded successfully");
                        if let Err(e) = tx.send(new_config).await {
                            error!("Failed to send config update: {}", e);
                        }
                    }
                    Err(e) => {
                        warn!("Failed to reload config (keeping old config): {:#}", e);
                    }
                }
            });
        })?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", watch_dir.display()))?;

        info!("Config file watcher started for: {}", config_path);

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            initial_config,
        ))
    }

    /// Wait for the next config update.
    /// Returns None if the watcher has been closed.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

/// Directory to watch and the file name to match within it
fn split_config_path(config_path: &Path) -> Result<(PathBuf, OsString)> {
    let file_name = config_path
        .file_name()
        .with_context(|| format!("Config path has no file name: {}", config_path.display()))?
        .to_os_string();
    let dir = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, file_name))
}

/// Whether a directory event means the config file now has new content.
///
/// Removals are ignored: a rename-over save removes then recreates the file,
/// and the recreate is what triggers the reload.
fn is_config_event(event: &Event, file_name: &OsString) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(file_name.as_os_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_watcher_basic() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("test-config.yaml");

        let initial_config = r#"
midi:
  client_name: "first"
buttons:
  - id: 0
    label: "Sustain"
    press: [{ type: cc, channel: 0, controller: 64, value: 127 }]
"#;
        fs::write(&config_path, initial_config)?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;

        assert_eq!(config.midi.client_name, "first");
        assert_eq!(config.buttons[0].label, "Sustain");

        let modified_config = r#"
midi:
  client_name: "second"
buttons:
  - id: 0
    label: "Hold"
"#;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&config_path, modified_config)?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;

        if let Some(new_config) = new_config {
            assert_eq!(new_config.midi.client_name, "second");
            assert_eq!(new_config.buttons[0].label, "Hold");
        }

        Ok(())
    }

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_only_config_file_events_trigger_reload() {
        let name = OsString::from("midi-switcher.yaml");

        assert!(is_config_event(
            &event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), "/etc/midi-switcher.yaml"),
            &name
        ));
        assert!(is_config_event(
            &event(EventKind::Create(CreateKind::File), "./midi-switcher.yaml"),
            &name
        ));
        // Saved as a temp file, then renamed over the config
        assert!(is_config_event(
            &event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), "/etc/midi-switcher.yaml"),
            &name
        ));

        assert!(!is_config_event(
            &event(EventKind::Modify(ModifyKind::Any), "/etc/other.yaml"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Create(CreateKind::File), "/etc/midi-switcher.yaml.swp"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Remove(RemoveKind::File), "/etc/midi-switcher.yaml"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Access(AccessKind::Any), "/etc/midi-switcher.yaml"),
            &name
        ));
    }

    #[test]
    fn test_split_config_path() -> Result<()> {
        let (dir, name) = split_config_path(Path::new("midi-switcher.yaml"))?;
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, OsString::from("midi-switcher.yaml"));

        let (dir, name) = split_config_path(Path::new("/home/me/conf/live.yaml"))?;
        assert_eq!(dir, PathBuf::from("/home/me/conf"));
        assert_eq!(name, OsString::from("live.yaml"));

        assert!(split_config_path(Path::new("/")).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_reload_after_rename_over_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("live.yaml");
        fs::write(&config_path, "debounce_ms: 100\n")?;

        let (mut watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.debounce_ms, 100);

        tokio::time::sleep(Duration::from_millis(100)).await;
        // Unrelated files in the same directory are not reloads
        fs::write(temp_dir.path().join("notes.txt"), "hello")?;
        let staged = temp_dir.path().join("live.yaml.tmp");
        fs::write(&staged, "debounce_ms: 250\n")?;
        fs::rename(&staged, &config_path)?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;
        if let Some(new_config) = new_config {
            assert_eq!(new_config.debounce_ms, 250);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_is_created() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("absent.yaml");

        let (_watcher, config) =
            ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;

        assert_eq!(config, AppConfig::default());
        assert!(config_path.exists());
        Ok(())
    }
}
