use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use treedrive_core::JobMode;

use crate::paths;

const STATE_FILE_NAME: &str = "client-state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("data directory is unavailable")]
    MissingDataDir,
}

/// Expand/collapse intent, serialized as the legacy display values so old
/// state files keep parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpandState {
    #[serde(rename = "block")]
    Expanded,
    #[serde(rename = "none")]
    Collapsed,
}

/// Client-side resume metadata for a server-executed job. Progress is
/// authoritative on the server; only the id and presentation state live here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResume {
    pub job_id: String,
    pub folder: String,
    pub mode: JobMode,
    #[serde(default)]
    pub minimized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PersistedState {
    /// source id -> folder path -> expand intent.
    tree: HashMap<String, HashMap<String, ExpandState>>,
    /// Pre-namespacing flat map, drained into `tree` on first read.
    legacy_tree: HashMap<String, ExpandState>,
    /// source id -> last opened folder path.
    last_opened: HashMap<String, String>,
    /// source id -> folder path -> color annotation.
    colors: HashMap<String, HashMap<String, String>>,
    resume: Option<JobResume>,
}

/// Outcome of the persisted half of a move/rename, applied as one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveStateChange {
    /// `(old, new)` when the active view path pointed at the moved node or
    /// one of its descendants and was rewritten.
    pub active_rewritten: Option<(String, String)>,
}

/// The only client state that outlives the page: expand/collapse intent,
/// last-opened folder, color annotations and the job resume record. Backed
/// by one JSON file written atomically (temp file + rename).
pub struct StateStore {
    path: PathBuf,
    state: Mutex<PersistedState>,
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let state = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => PersistedState::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn open_default() -> Result<Self, StateError> {
        let dir = dirs::data_dir()
            .ok_or(StateError::MissingDataDir)?
            .join("treedrive");
        fs::create_dir_all(&dir)?;
        Self::open(dir.join(STATE_FILE_NAME))
    }

    pub fn is_expanded(&self, source_id: &str, folder: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        if let Some(value) = state.tree.get(source_id).and_then(|map| map.get(folder)) {
            return *value == ExpandState::Expanded;
        }
        // One-time migration of the legacy flat key into the namespaced map.
        if let Some(value) = state.legacy_tree.remove(folder) {
            state
                .tree
                .entry(source_id.to_string())
                .or_default()
                .insert(folder.to_string(), value);
            if let Err(err) = save_to(&self.path, &state) {
                warn!(folder, "failed to persist migrated tree state: {err}");
            }
            return value == ExpandState::Expanded;
        }
        false
    }

    pub fn set_expanded(
        &self,
        source_id: &str,
        folder: &str,
        expanded: bool,
    ) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        let value = if expanded {
            ExpandState::Expanded
        } else {
            ExpandState::Collapsed
        };
        state
            .tree
            .entry(source_id.to_string())
            .or_default()
            .insert(folder.to_string(), value);
        state.legacy_tree.remove(folder);
        save_to(&self.path, &state)
    }

    pub fn last_opened(&self, source_id: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .last_opened
            .get(source_id)
            .cloned()
    }

    pub fn set_last_opened(&self, source_id: &str, folder: &str) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        state
            .last_opened
            .insert(source_id.to_string(), folder.to_string());
        save_to(&self.path, &state)
    }

    pub fn folder_color(&self, source_id: &str, folder: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .colors
            .get(source_id)
            .and_then(|map| map.get(folder))
            .cloned()
    }

    pub fn set_folder_color(
        &self,
        source_id: &str,
        folder: &str,
        color: &str,
    ) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        state
            .colors
            .entry(source_id.to_string())
            .or_default()
            .insert(folder.to_string(), color.to_string());
        save_to(&self.path, &state)
    }

    pub fn clear_folder_color(&self, source_id: &str, folder: &str) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        if let Some(map) = state.colors.get_mut(source_id) {
            map.remove(folder);
        }
        save_to(&self.path, &state)
    }

    pub fn resume_record(&self) -> Option<JobResume> {
        self.state.lock().unwrap().resume.clone()
    }

    pub fn set_resume_record(&self, record: JobResume) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        state.resume = Some(record);
        save_to(&self.path, &state)
    }

    pub fn clear_resume_record(&self) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        state.resume = None;
        save_to(&self.path, &state)
    }

    pub fn set_resume_minimized(&self, minimized: bool) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.resume.as_mut() {
            record.minimized = minimized;
        }
        save_to(&self.path, &state)
    }

    /// Applies every persisted consequence of moving (or renaming)
    /// `old_path` to `new_path` in one commit: color carry, expand-key
    /// rewrite, force-expanding the destination ancestor chain, and the
    /// active-view rewrite. A partial rewrite can therefore never persist.
    pub fn apply_move(
        &self,
        source_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<MoveStateChange, StateError> {
        let mut state = self.state.lock().unwrap();

        if let Some(colors) = state.colors.get_mut(source_id) {
            rewrite_map_keys(colors, old_path, new_path);
        }

        let tree = state.tree.entry(source_id.to_string()).or_default();
        rewrite_map_keys(tree, old_path, new_path);
        for ancestor in paths::ancestors(new_path) {
            tree.insert(ancestor, ExpandState::Expanded);
        }

        let active_rewritten = state
            .last_opened
            .get(source_id)
            .filter(|active| paths::is_within(active, old_path))
            .and_then(|active| {
                paths::rewrite_prefix(active, old_path, new_path)
                    .map(|new_active| (active.clone(), new_active))
            });
        if let Some((_, new_active)) = &active_rewritten {
            state
                .last_opened
                .insert(source_id.to_string(), new_active.clone());
        }

        save_to(&self.path, &state)?;
        Ok(MoveStateChange { active_rewritten })
    }

    /// Drops every persisted key at or under a deleted path, so a later
    /// reload cannot resurrect it. The active view falls back to the parent.
    pub fn apply_delete(&self, source_id: &str, path: &str) -> Result<(), StateError> {
        let mut state = self.state.lock().unwrap();

        if let Some(tree) = state.tree.get_mut(source_id) {
            tree.retain(|key, _| !paths::is_within(key, path));
        }
        state
            .legacy_tree
            .retain(|key, _| !paths::is_within(key, path));
        if let Some(colors) = state.colors.get_mut(source_id) {
            colors.retain(|key, _| !paths::is_within(key, path));
        }
        if state
            .last_opened
            .get(source_id)
            .is_some_and(|active| paths::is_within(active, path))
        {
            state
                .last_opened
                .insert(source_id.to_string(), paths::parent_of(path));
        }

        save_to(&self.path, &state)
    }

    #[cfg(test)]
    fn expanded_keys(&self, source_id: &str) -> Vec<(String, ExpandState)> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<_> = state
            .tree
            .get(source_id)
            .map(|map| map.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

fn rewrite_map_keys<V>(map: &mut HashMap<String, V>, old_path: &str, new_path: &str) {
    let affected: Vec<String> = map
        .keys()
        .filter(|key| paths::is_within(key, old_path))
        .cloned()
        .collect();
    for key in affected {
        if let (Some(value), Some(new_key)) = (
            map.remove(&key),
            paths::rewrite_prefix(&key, old_path, new_path),
        ) {
            map.insert(new_key, value);
        }
    }
}

fn save_to(path: &Path, state: &PersistedState) -> Result<(), StateError> {
    let data = serde_json::to_vec_pretty(state)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
