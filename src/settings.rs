// ============================================
// settings.rs - Flat section/key/value settings store
// ============================================
// Persists last-used paths, indices, and flags per mount slot so the
// front end can restore them between sessions. The core only depends
// on the get/set boundary; the on-disk shape is TOML tables, one per
// section (WIM, WIM2, DRIVER, EXTRACT).
//
// Loading a missing or corrupt file yields an empty store - settings
// are a convenience, never worth failing an operation over.
// ============================================

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// In-memory settings: section -> key -> value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl Settings {
    pub fn new() -> Self {
        Settings::default()
    }

    /// Load from a TOML file. Missing file or parse failure both give
    /// an empty store.
    pub fn load(path: &Path) -> Self {
        let Ok(text) = fs::read_to_string(path) else {
            return Settings::default();
        };
        match toml::from_str::<Settings>(&text) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable settings file");
                Settings::default()
            }
        }
    }

    /// Write the store back out. The parent directory must exist; the
    /// settings file lives next to the executable by convention.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        fs::write(path, text)
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|keys| keys.get(key))
            .map(|v| v.as_str())
    }

    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    /// Convenience for the boolean flags ("1"/"0" as the original
    /// settings file spelled them).
    pub fn get_flag(&self, section: &str, key: &str) -> bool {
        matches!(self.get(section, key), Some("1") | Some("true"))
    }

    pub fn set_flag(&mut self, section: &str, key: &str, value: bool) {
        self.set(section, key, if value { "1" } else { "0" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");

        let mut settings = Settings::new();
        settings.set("WIM", "wim_file", "C:\\images\\install.wim");
        settings.set("WIM", "index", "2");
        settings.set_flag("WIM", "readonly", true);
        settings.set("WIM2", "mount_dir", "C:\\mount\\b");
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path);
        assert_eq!(loaded, settings);
        assert_eq!(loaded.get("WIM", "wim_file"), Some("C:\\images\\install.wim"));
        assert!(loaded.get_flag("WIM", "readonly"));
        assert!(!loaded.get_flag("WIM2", "readonly"));
    }

    #[test]
    fn missing_and_corrupt_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(&dir.path().join("absent.toml")), Settings::new());

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "not [ valid { toml").unwrap();
        assert_eq!(Settings::load(&bad), Settings::new());
    }

    #[test]
    fn get_of_unknown_section_or_key_is_none() {
        let mut settings = Settings::new();
        settings.set("DRIVER", "recurse", "1");
        assert_eq!(settings.get("DRIVER", "absent"), None);
        assert_eq!(settings.get("ABSENT", "recurse"), None);
    }
}
