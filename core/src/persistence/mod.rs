//! Persistence Store (SPEC_FULL.md §4.3, §6).
//!
//! Five independent JSON files under a configured directory (normally
//! `~/.session-manager/`), each shaped `{version, <collection>}`. Writes
//! are atomic: serialize, write to `<path>.tmp`, rename over `<path>`
//! (grounded on `other_examples/b4a90aad_saltyskip-cthulu` — the teacher's
//! own persistence code writes directly and was not used here, see
//! DESIGN.md). Reads are whole-file; the server is the sole writer so no
//! file locking is needed. Each file's write path is serialized behind its
//! own mutex — one in-flight atomic write per file at a time.

pub mod models;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use models::{validate_workspace_name, BacklogItem, Todo, Workspace};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error("{file} has unknown future version {version}")]
    UnknownVersion { file: String, version: u32 },
    #[error("{0}")]
    Validation(String),
}

const WORKSPACES_VERSION: u32 = 1;
const SESSION_WORKSPACES_VERSION: u32 = 1;
const HIDDEN_SESSIONS_VERSION: u32 = 1;
const TODOS_VERSION: u32 = 1;
const BACKLOG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspacesFile {
    version: u32,
    workspaces: Vec<Workspace>,
}

impl Default for WorkspacesFile {
    fn default() -> Self {
        Self {
            version: WORKSPACES_VERSION,
            workspaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionWorkspacesFile {
    version: u32,
    map: HashMap<String, Option<String>>,
}

impl Default for SessionWorkspacesFile {
    fn default() -> Self {
        Self {
            version: SESSION_WORKSPACES_VERSION,
            map: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HiddenSessionsFile {
    version: u32,
    ids: Vec<String>,
}

impl Default for HiddenSessionsFile {
    fn default() -> Self {
        Self {
            version: HIDDEN_SESSIONS_VERSION,
            ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TodosFile {
    version: u32,
    todos: Vec<Todo>,
}

impl Default for TodosFile {
    fn default() -> Self {
        Self {
            version: TODOS_VERSION,
            todos: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BacklogFile {
    version: u32,
    items: Vec<BacklogItem>,
}

impl Default for BacklogFile {
    fn default() -> Self {
        Self {
            version: BACKLOG_VERSION,
            items: Vec::new(),
        }
    }
}

/// Write `value` to `path` atomically: serialize, write `<path>.tmp`,
/// rename over `path`. A partially-written temp file is never observable
/// at `path` since rename is atomic on the same filesystem.
fn atomic_write<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load `path` into `T`, applying `migrate` to bring an older `version`
/// up to `current_version`. Returns `T::default()` (and writes the
/// initial shape) if the file is missing, corrupt, or carries an unknown
/// future version.
fn load_or_init<T>(
    path: &Path,
    current_version: u32,
    migrate: impl Fn(serde_json::Value, u32) -> Result<serde_json::Value, PersistenceError>,
) -> T
where
    T: Default + Serialize + DeserializeOwned,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!(path = %path.display(), "no persisted file, writing initial shape");
            let fresh = T::default();
            let _ = atomic_write(path, &fresh);
            return fresh;
        }
    };

    let raw: serde_json::Value = match serde_json::from_str(&contents) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt persisted file, resetting to defaults");
            return T::default();
        }
    };

    let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    if version > current_version {
        warn!(
            path = %path.display(),
            version,
            current_version,
            "persisted file has unknown future version, resetting to defaults"
        );
        return T::default();
    }

    let migrated = match migrate(raw, current_version) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "migration failed, resetting to defaults");
            return T::default();
        }
    };

    match serde_json::from_value(migrated) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "post-migration parse failed, resetting to defaults");
            T::default()
        }
    }
}

/// Identity migration: every file currently sits at version 1, so there
/// is no prior version to step through yet. Future migrations append
/// `if version == N { ... ; version = N + 1 }` steps here, applied in
/// sequence until `version == current_version`.
fn identity_migration(value: serde_json::Value, _current: u32) -> Result<serde_json::Value, PersistenceError> {
    Ok(value)
}

/// Owns the five persisted collections and serializes writes per file.
pub struct PersistenceStore {
    dir: PathBuf,
    workspaces: Mutex<WorkspacesFile>,
    session_workspaces: Mutex<SessionWorkspacesFile>,
    hidden_sessions: Mutex<HiddenSessionsFile>,
    todos: Mutex<TodosFile>,
    backlog: Mutex<BacklogFile>,
}

impl PersistenceStore {
    pub fn new(dir: PathBuf) -> Self {
        let workspaces = load_or_init(&dir.join("workspaces.json"), WORKSPACES_VERSION, identity_migration);
        let session_workspaces = load_or_init(
            &dir.join("session-workspaces.json"),
            SESSION_WORKSPACES_VERSION,
            identity_migration,
        );
        let hidden_sessions = load_or_init(
            &dir.join("hidden-sessions.json"),
            HIDDEN_SESSIONS_VERSION,
            identity_migration,
        );
        let todos = load_or_init(&dir.join("todos.json"), TODOS_VERSION, identity_migration);
        let backlog = load_or_init(&dir.join("backlog.json"), BACKLOG_VERSION, identity_migration);

        Self {
            dir,
            workspaces: Mutex::new(workspaces),
            session_workspaces: Mutex::new(session_workspaces),
            hidden_sessions: Mutex::new(hidden_sessions),
            todos: Mutex::new(todos),
            backlog: Mutex::new(backlog),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    // --- workspaces ---

    pub fn list_workspaces(&self) -> Vec<Workspace> {
        self.workspaces.lock().unwrap().workspaces.clone()
    }

    pub fn create_workspace(
        &self,
        id: String,
        name: String,
        description: Option<String>,
        now: String,
    ) -> Result<Workspace, PersistenceError> {
        validate_workspace_name(&name).map_err(PersistenceError::Validation)?;
        let workspace = Workspace {
            id,
            name,
            description,
            hidden: false,
            created_at: now.clone(),
            updated_at: now,
        };
        let mut file = self.workspaces.lock().unwrap();
        file.workspaces.push(workspace.clone());
        atomic_write(&self.path("workspaces.json"), &*file)?;
        Ok(workspace)
    }

    pub fn rename_workspace(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<Option<String>>,
        now: String,
    ) -> Result<Workspace, PersistenceError> {
        if let Some(n) = &name {
            validate_workspace_name(n).map_err(PersistenceError::Validation)?;
        }
        let mut file = self.workspaces.lock().unwrap();
        let workspace = file
            .workspaces
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| PersistenceError::Validation(format!("workspace {id} not found")))?;
        if let Some(n) = name {
            workspace.name = n;
        }
        if let Some(d) = description {
            workspace.description = d;
        }
        workspace.updated_at = now;
        let updated = workspace.clone();
        atomic_write(&self.path("workspaces.json"), &*file)?;
        Ok(updated)
    }

    /// Delete a workspace, nulling the workspace id of every session bound
    /// to it in the *same* logical write (SPEC_FULL.md §4.3 invariant).
    pub fn delete_workspace(&self, id: &str) -> Result<(), PersistenceError> {
        let mut sw = self.session_workspaces.lock().unwrap();
        for v in sw.map.values_mut() {
            if v.as_deref() == Some(id) {
                *v = None;
            }
        }
        atomic_write(&self.path("session-workspaces.json"), &*sw)?;
        drop(sw);

        let mut ws = self.workspaces.lock().unwrap();
        ws.workspaces.retain(|w| w.id != id);
        atomic_write(&self.path("workspaces.json"), &*ws)?;
        Ok(())
    }

    // --- binding map / hidden set ---

    pub fn binding_map(&self) -> HashMap<String, Option<String>> {
        self.session_workspaces.lock().unwrap().map.clone()
    }

    pub fn is_managed(&self, session_id: &str) -> bool {
        self.session_workspaces.lock().unwrap().map.contains_key(session_id)
    }

    /// `addManaged(sessionId, workspaceId?)`.
    pub fn add_managed(&self, session_id: &str, workspace_id: Option<String>) -> Result<(), PersistenceError> {
        let mut sw = self.session_workspaces.lock().unwrap();
        sw.map.insert(session_id.to_string(), workspace_id);
        atomic_write(&self.path("session-workspaces.json"), &*sw)
    }

    /// `removeManaged(sessionId)`.
    pub fn remove_managed(&self, session_id: &str) -> Result<(), PersistenceError> {
        let mut sw = self.session_workspaces.lock().unwrap();
        sw.map.remove(session_id);
        atomic_write(&self.path("session-workspaces.json"), &*sw)
    }

    /// `setWorkspace(sessionId, workspaceId|null)`.
    pub fn set_workspace(&self, session_id: &str, workspace_id: Option<String>) -> Result<(), PersistenceError> {
        let mut sw = self.session_workspaces.lock().unwrap();
        sw.map.insert(session_id.to_string(), workspace_id);
        atomic_write(&self.path("session-workspaces.json"), &*sw)
    }

    pub fn hidden_ids(&self) -> Vec<String> {
        self.hidden_sessions.lock().unwrap().ids.clone()
    }

    pub fn is_hidden(&self, session_id: &str) -> bool {
        self.hidden_sessions.lock().unwrap().ids.iter().any(|i| i == session_id)
    }

    pub fn hide(&self, session_id: &str) -> Result<(), PersistenceError> {
        let mut hs = self.hidden_sessions.lock().unwrap();
        if !hs.ids.iter().any(|i| i == session_id) {
            hs.ids.push(session_id.to_string());
        }
        atomic_write(&self.path("hidden-sessions.json"), &*hs)
    }

    /// Unhide; also used when attaching to a hidden session, which must
    /// unhide it in the same operation (SPEC_FULL.md §4.3).
    pub fn unhide(&self, session_id: &str) -> Result<(), PersistenceError> {
        let mut hs = self.hidden_sessions.lock().unwrap();
        hs.ids.retain(|i| i != session_id);
        atomic_write(&self.path("hidden-sessions.json"), &*hs)
    }

    // --- todos ---

    pub fn list_todos(&self) -> Vec<Todo> {
        self.todos.lock().unwrap().todos.clone()
    }

    pub fn create_todo(&self, todo: Todo) -> Result<Todo, PersistenceError> {
        let mut file = self.todos.lock().unwrap();
        file.todos.push(todo.clone());
        atomic_write(&self.path("todos.json"), &*file)?;
        Ok(todo)
    }

    pub fn update_todo(&self, id: &str, completed: Option<bool>, text: Option<String>, now: String) -> Result<Todo, PersistenceError> {
        let mut file = self.todos.lock().unwrap();
        let todo = file
            .todos
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| PersistenceError::Validation(format!("todo {id} not found")))?;
        if let Some(c) = completed {
            todo.completed = c;
        }
        if let Some(t) = text {
            todo.text = t;
        }
        todo.updated_at = now;
        let updated = todo.clone();
        atomic_write(&self.path("todos.json"), &*file)?;
        Ok(updated)
    }

    pub fn delete_todo(&self, id: &str) -> Result<(), PersistenceError> {
        let mut file = self.todos.lock().unwrap();
        file.todos.retain(|t| t.id != id);
        atomic_write(&self.path("todos.json"), &*file)
    }

    // --- backlog ---

    pub fn list_backlog(&self) -> Vec<BacklogItem> {
        self.backlog.lock().unwrap().items.clone()
    }

    pub fn create_backlog_item(&self, item: BacklogItem) -> Result<BacklogItem, PersistenceError> {
        let mut file = self.backlog.lock().unwrap();
        file.items.push(item.clone());
        atomic_write(&self.path("backlog.json"), &*file)?;
        Ok(item)
    }

    pub fn update_backlog_item(
        &self,
        id: &str,
        status: Option<String>,
        priority: Option<String>,
        now: String,
    ) -> Result<BacklogItem, PersistenceError> {
        let mut file = self.backlog.lock().unwrap();
        let item = file
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| PersistenceError::Validation(format!("backlog item {id} not found")))?;
        if let Some(s) = status {
            item.status = s;
        }
        if let Some(p) = priority {
            item.priority = p;
        }
        item.updated_at = now;
        let updated = item.clone();
        atomic_write(&self.path("backlog.json"), &*file)?;
        Ok(updated)
    }

    pub fn delete_backlog_item(&self, id: &str) -> Result<(), PersistenceError> {
        let mut file = self.backlog.lock().unwrap();
        file.items.retain(|i| i.id != id);
        atomic_write(&self.path("backlog.json"), &*file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, PersistenceStore) {
        let dir = TempDir::new().unwrap();
        let store = PersistenceStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[test]
    fn missing_files_get_initial_shape() {
        let (dir, _store) = store();
        let contents = std::fs::read_to_string(dir.path().join("workspaces.json")).unwrap();
        assert!(contents.contains("\"version\""));
        assert!(!dir.path().join("workspaces.json.tmp").exists());
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file_behind() {
        let (dir, store) = store();
        store
            .create_workspace("w1".into(), "Work".into(), None, "2026-01-01T00:00:00Z".into())
            .unwrap();
        assert!(!dir.path().join("workspaces.json.tmp").exists());
        assert!(dir.path().join("workspaces.json").exists());
    }

    #[test]
    fn read_after_write_round_trips() {
        let (dir, store) = store();
        store
            .create_workspace("w1".into(), "Work".into(), Some("desc".into()), "2026-01-01T00:00:00Z".into())
            .unwrap();
        drop(store);
        let reloaded = PersistenceStore::new(dir.path().to_path_buf());
        let list = reloaded.list_workspaces();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Work");
    }

    #[test]
    fn corrupt_file_resets_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("workspaces.json"), "{not valid json").unwrap();
        let store = PersistenceStore::new(dir.path().to_path_buf());
        assert!(store.list_workspaces().is_empty());
    }

    #[test]
    fn unknown_future_version_resets_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("workspaces.json"),
            r#"{"version": 999, "workspaces": []}"#,
        )
        .unwrap();
        let store = PersistenceStore::new(dir.path().to_path_buf());
        assert!(store.list_workspaces().is_empty());
    }

    #[test]
    fn workspace_name_too_long_rejected() {
        let (_dir, store) = store();
        let long_name = "a".repeat(51);
        let result = store.create_workspace("w1".into(), long_name, None, "now".into());
        assert!(result.is_err());
    }

    #[test]
    fn delete_workspace_cascades_null_bindings() {
        let (_dir, store) = store();
        store
            .create_workspace("w1".into(), "Work".into(), None, "now".into())
            .unwrap();
        store.add_managed("local:$0:%0", Some("w1".into())).unwrap();
        store.add_managed("local:$0:%1", Some("w1".into())).unwrap();
        store.add_managed("local:$0:%2", Some("other".into())).unwrap();

        store.delete_workspace("w1").unwrap();

        let map = store.binding_map();
        assert_eq!(map.get("local:$0:%0").unwrap(), &None);
        assert_eq!(map.get("local:$0:%1").unwrap(), &None);
        assert_eq!(map.get("local:$0:%2").unwrap(), &Some("other".to_string()));
        assert!(store.list_workspaces().is_empty());
    }

    #[test]
    fn add_then_remove_managed_leaves_map_unchanged() {
        let (_dir, store) = store();
        let before = store.binding_map();
        store.add_managed("local:$0:%0", None).unwrap();
        store.remove_managed("local:$0:%0").unwrap();
        let after = store.binding_map();
        assert_eq!(before, after);
    }

    #[test]
    fn set_workspace_twice_is_idempotent() {
        let (_dir, store) = store();
        store.add_managed("local:$0:%0", None).unwrap();
        store.set_workspace("local:$0:%0", Some("w1".into())).unwrap();
        let first = store.binding_map();
        store.set_workspace("local:$0:%0", Some("w1".into())).unwrap();
        let second = store.binding_map();
        assert_eq!(first, second);
    }

    #[test]
    fn hide_then_unhide_leaves_hidden_set_unchanged() {
        let (_dir, store) = store();
        let before = store.hidden_ids();
        store.hide("local:$0:%0").unwrap();
        store.unhide("local:$0:%0").unwrap();
        let after = store.hidden_ids();
        assert_eq!(before, after);
    }

    #[test]
    fn hide_is_idempotent_on_double_call() {
        let (_dir, store) = store();
        store.hide("local:$0:%0").unwrap();
        store.hide("local:$0:%0").unwrap();
        assert_eq!(store.hidden_ids().len(), 1);
    }

    #[test]
    fn todo_crud() {
        let (_dir, store) = store();
        let todo = models::Todo {
            id: "t1".into(),
            workspace_id: None,
            text: "write tests".into(),
            completed: false,
            created_at: "now".into(),
            updated_at: "now".into(),
        };
        store.create_todo(todo).unwrap();
        let updated = store.update_todo("t1", Some(true), None, "later".into()).unwrap();
        assert!(updated.completed);
        store.delete_todo("t1").unwrap();
        assert!(store.list_todos().is_empty());
    }

    #[test]
    fn backlog_crud() {
        let (_dir, store) = store();
        let item = models::BacklogItem {
            id: "b1".into(),
            item_type: "feature".into(),
            title: "ship it".into(),
            description: None,
            priority: "low".into(),
            status: "open".into(),
            created_at: "now".into(),
            updated_at: "now".into(),
        };
        store.create_backlog_item(item).unwrap();
        let updated = store
            .update_backlog_item("b1", Some("done".into()), None, "later".into())
            .unwrap();
        assert_eq!(updated.status, "done");
        store.delete_backlog_item("b1").unwrap();
        assert!(store.list_backlog().is_empty());
    }
}
