use anyhow::{Context, Result};
use avatar_playback::Preferences;
use std::path::{Path, PathBuf};
use tracing::warn;

const PREFS_FILE: &str = "preferences.toml";

/// Playback preferences kept as TOML under the user's config directory.
pub struct PrefsStore {
    path: PathBuf,
}

impl PrefsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<config dir>/avatar/preferences.toml`
    pub fn default_location() -> Option<Self> {
        dirs::config_dir().map(|dir| Self::new(dir.join("avatar").join(PREFS_FILE)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable files fall back to defaults.
    pub fn load(&self) -> Preferences {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Preferences::default(),
            Err(e) => {
                warn!("Failed to read {}: {}", self.path.display(), e);
                return Preferences::default();
            }
        };
        match toml::from_str(&text) {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.path.display(), e);
                Preferences::default()
            }
        }
    }

    pub fn save(&self, prefs: &Preferences) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let text = toml::to_string_pretty(prefs).context("Failed to encode preferences")?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write {:?}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PrefsStore::new(tmp.path().join("nope.toml"));
        assert_eq!(store.load(), Preferences::default());
    }

    #[test]
    fn save_then_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = PrefsStore::new(tmp.path().join("nested").join(PREFS_FILE));
        let prefs = Preferences {
            auto_read_enabled: true,
            auto_read_interval_ms: 3500,
            auto_record_enabled: false,
            text_speed: 120,
        };
        store.save(&prefs).unwrap();
        assert_eq!(store.load(), prefs);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(PREFS_FILE);
        std::fs::write(&path, "text_speed = 80\n").unwrap();
        let prefs = PrefsStore::new(path).load();
        assert_eq!(prefs.text_speed, 80);
        assert_eq!(prefs.auto_read_interval_ms, 2000);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(PREFS_FILE);
        std::fs::write(&path, "text_speed = [").unwrap();
        assert_eq!(PrefsStore::new(path).load(), Preferences::default());
    }
}
