//! Engine configuration from `.oa/config.toml`.
//!
//! ```toml
//! events_log = ".oa/events.jsonl"
//!
//! [storage]
//! backend = "sqlite"
//! path = ".oa/state.db"
//! history = true
//! ```
//!
//! Without a config file the engine keeps its document in
//! `<workspace>/.agent_state.json`.

use std::path::{Path, PathBuf};

use oa_storage::StorageConfig;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::events::{JsonlObserver, StateNotifier};
use crate::state::AgentState;

pub const CONFIG_DIR: &str = ".oa";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root against which relative paths resolve. Not read from the file.
    #[serde(skip)]
    pub workspace: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Append every state event to this JSONL file.
    #[serde(default)]
    pub events_log: Option<PathBuf>,
}

impl EngineConfig {
    /// Defaults for `root`: JSON document, no event log.
    pub fn for_workspace(root: impl AsRef<Path>) -> Self {
        Self {
            workspace: root.as_ref().to_path_buf(),
            storage: StorageConfig::default(),
            events_log: None,
        }
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Read `<root>/.oa/config.toml`, falling back to defaults when the file
    /// does not exist.
    pub fn load(root: impl AsRef<Path>) -> Result<Self, StateError> {
        let root = root.as_ref();
        let path = Self::config_path(root);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::for_workspace(root));
            }
            Err(source) => return Err(StateError::IoError { path, source }),
        };

        let mut config: EngineConfig = toml::from_str(&content)
            .map_err(|source| StateError::InvalidConfig {
                path: path.clone(),
                source,
            })?;
        config.workspace = root.to_path_buf();
        tracing::debug!(
            path = %path.display(),
            backend = config.storage.backend_name(),
            "loaded engine config"
        );
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// Open the configured backend and load the aggregate from it.
    pub fn open_state(&self) -> Result<AgentState, StateError> {
        let storage = self.storage.open(&self.workspace)?;
        let mut notifier = StateNotifier::new();
        if let Some(log) = &self.events_log {
            notifier.subscribe(Box::new(JsonlObserver::new(self.resolve(log))));
        }
        AgentState::with_notifier(storage, notifier)
    }
}
