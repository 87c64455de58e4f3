//! Local client preferences.
//!
//! Remembers the last opened peer across restarts in a small TOML file
//! (`~/.config/pairchat/prefs.toml`). A remembered peer is re-validated
//! against the live peer listing before being restored; a vanished peer
//! falls back to no selection.

use std::path::{Path, PathBuf};

use pairchat_proto::message::UserId;

/// Errors that can occur when reading or writing preferences.
#[derive(Debug, thiserror::Error)]
pub enum PrefsError {
    /// Failed to read the preferences file.
    #[error("failed to read prefs file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to write the preferences file.
    #[error("failed to write prefs file {path}: {source}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML preferences.
    #[error("failed to parse prefs file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Failed to serialize the preferences.
    #[error("failed to serialize prefs: {0}")]
    SerializeToml(#[from] toml::ser::Error),
}

/// Persisted client preferences.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Prefs {
    /// The peer whose conversation was last open, if any.
    pub last_peer: Option<UserId>,
}

impl Prefs {
    /// Loads preferences from the default location. A missing file yields
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsError`] if the file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self, PrefsError> {
        match default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads preferences from `path`. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsError`] on read or parse failure.
    pub fn load_from(path: &Path) -> Result<Self, PrefsError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Ok(toml::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(PrefsError::ReadFile {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Saves preferences to the default location, creating the parent
    /// directory if needed. Silently does nothing if no config directory
    /// can be resolved.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsError`] on serialization or write failure.
    pub fn save(&self) -> Result<(), PrefsError> {
        match default_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    /// Saves preferences to `path`, creating the parent directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`PrefsError`] on serialization or write failure.
    pub fn save_to(&self, path: &Path) -> Result<(), PrefsError> {
        let contents = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PrefsError::WriteFile {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        std::fs::write(path, contents).map_err(|e| PrefsError::WriteFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Remembers `peer` as the last opened conversation.
    pub fn remember(&mut self, peer: UserId) {
        self.last_peer = Some(peer);
    }

    /// Forgets the remembered peer.
    pub fn clear(&mut self) {
        self.last_peer = None;
    }

    /// Returns the remembered peer if it still appears in `peers`.
    pub fn restore_selection(&self, peers: &[UserId]) -> Option<UserId> {
        self.last_peer
            .as_ref()
            .filter(|peer| peers.contains(peer))
            .cloned()
    }
}

/// Default preferences file path: `~/.config/pairchat/prefs.toml`.
fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pairchat").join("prefs.toml"))
}
