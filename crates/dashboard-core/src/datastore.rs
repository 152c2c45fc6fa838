use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::filter::StatusCheckbox;
use crate::task::{Category, Task};

pub const KEY_PREFIX: &str = "taskDashboard_";

const TASKS_KEY: &str = "tasks";
const CATEGORIES_KEY: &str = "categories";
const FILTER_CHECKBOXES_KEY: &str = "filterCheckboxes";
const SELECTED_CATEGORIES_KEY: &str = "selectedCategories";
const SEARCH_TERM_KEY: &str = "searchTerm";
const LAST_DELETED_TASK_KEY: &str = "lastDeletedTask";

/// String-keyed blob storage, the shape of browser local storage.
pub trait KvStore: fmt::Debug + Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
    fn keys(&self) -> anyhow::Result<Vec<String>>;
}

/// One file per key under a data directory.
#[derive(Debug)]
pub struct FileKvStore {
    pub data_dir: PathBuf,
}

impl FileKvStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened key-value store");
        Ok(Self { data_dir })
    }

    fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-');
        if !valid {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.json")))
    }
}

impl KvStore for FileKvStore {
    #[tracing::instrument(skip(self))]
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Some(raw))
    }

    #[tracing::instrument(skip(self, value))]
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        debug!(file = %path.display(), bytes = value.len(), "writing key atomically");

        let mut temp = NamedTempFile::new_in(&self.data_dir)?;
        temp.write_all(value.as_bytes())?;
        temp.flush()?;
        temp.persist(&path)
            .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.data_dir)
            .with_context(|| format!("failed listing {}", self.data_dir.display()))?
        {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                out.push(stem.to_string());
            }
        }
        out.sort();
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct MemoryKvStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.map.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.map.lock().keys().cloned().collect())
    }
}

/// Typed, prefixed view over a [`KvStore`]. Each collection is one JSON blob.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    store: Arc<dyn KvStore>,
}

impl LocalStorage {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKvStore::new()))
    }

    pub fn open_dir(data_dir: &Path) -> anyhow::Result<Self> {
        Ok(Self::new(Arc::new(FileKvStore::open(data_dir)?)))
    }

    fn prefixed(name: &str) -> String {
        format!("{KEY_PREFIX}{name}")
    }

    fn read<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        let key = Self::prefixed(name);
        let Some(raw) = self.store.get(&key)? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("failed parsing stored value for {key}"))?;
        Ok(Some(value))
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> anyhow::Result<()> {
        let key = Self::prefixed(name);
        let raw = serde_json::to_string(value)?;
        self.store
            .set(&key, &raw)
            .with_context(|| format!("failed saving {key}"))
    }

    pub fn tasks(&self) -> anyhow::Result<Option<Vec<Task>>> {
        self.read(TASKS_KEY)
    }

    pub fn save_tasks(&self, tasks: &[Task]) -> anyhow::Result<()> {
        self.write(TASKS_KEY, tasks)
    }

    pub fn categories(&self) -> anyhow::Result<Option<Vec<Category>>> {
        self.read(CATEGORIES_KEY)
    }

    pub fn save_categories(&self, categories: &[Category]) -> anyhow::Result<()> {
        self.write(CATEGORIES_KEY, categories)
    }

    pub fn filter_checkboxes(&self) -> anyhow::Result<Option<Vec<StatusCheckbox>>> {
        self.read(FILTER_CHECKBOXES_KEY)
    }

    pub fn save_filter_checkboxes(&self, checkboxes: &[StatusCheckbox]) -> anyhow::Result<()> {
        self.write(FILTER_CHECKBOXES_KEY, checkboxes)
    }

    pub fn selected_categories(&self) -> anyhow::Result<Option<Vec<String>>> {
        self.read(SELECTED_CATEGORIES_KEY)
    }

    pub fn save_selected_categories(&self, ids: &[String]) -> anyhow::Result<()> {
        self.write(SELECTED_CATEGORIES_KEY, ids)
    }

    pub fn search_term(&self) -> anyhow::Result<Option<String>> {
        self.read(SEARCH_TERM_KEY)
    }

    pub fn save_search_term(&self, term: &str) -> anyhow::Result<()> {
        self.write(SEARCH_TERM_KEY, term)
    }

    pub fn last_deleted_task(&self) -> anyhow::Result<Option<Task>> {
        self.read(LAST_DELETED_TASK_KEY)
    }

    pub fn save_last_deleted_task(&self, task: &Task) -> anyhow::Result<()> {
        self.write(LAST_DELETED_TASK_KEY, task)
    }

    pub fn clear_last_deleted_task(&self) -> anyhow::Result<()> {
        self.store.remove(&Self::prefixed(LAST_DELETED_TASK_KEY))
    }

    /// Unprefixed marker keys, e.g. migration bookkeeping.
    pub fn marker(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.store.get(key)
    }

    pub fn set_marker(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.store.set(key, value)
    }

    pub fn remove_collection(&self, name: &str) -> anyhow::Result<()> {
        self.store.remove(&Self::prefixed(name))
    }

    /// Removes every prefixed key and leaves everything else alone.
    #[tracing::instrument(skip(self))]
    pub fn clear_all(&self) -> anyhow::Result<()> {
        let keys = self.store.keys()?;
        let mut removed = 0usize;
        for key in keys.iter().filter(|key| key.starts_with(KEY_PREFIX)) {
            self.store.remove(key)?;
            removed += 1;
        }
        info!(removed, "cleared local storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::default_checkboxes;
    use crate::task::seed_tasks;
    use tempfile::tempdir;

    #[test]
    fn file_store_roundtrips_collections() {
        let temp = tempdir().expect("tempdir");
        let storage = LocalStorage::open_dir(temp.path()).expect("open");

        assert_eq!(storage.tasks().unwrap(), None);
        storage.save_tasks(&seed_tasks()).unwrap();
        assert_eq!(storage.tasks().unwrap(), Some(seed_tasks()));
        assert!(temp.path().join("taskDashboard_tasks.json").exists());
    }

    #[test]
    fn last_deleted_slot_can_be_cleared() {
        let storage = LocalStorage::in_memory();
        let task = seed_tasks().remove(0);
        storage.save_last_deleted_task(&task).unwrap();
        assert_eq!(storage.last_deleted_task().unwrap(), Some(task));

        storage.clear_last_deleted_task().unwrap();
        assert_eq!(storage.last_deleted_task().unwrap(), None);
    }

    #[test]
    fn clear_all_keeps_unprefixed_keys() {
        let temp = tempdir().expect("tempdir");
        let storage = LocalStorage::open_dir(temp.path()).expect("open");
        storage.save_filter_checkboxes(&default_checkboxes()).unwrap();
        storage.save_selected_categories(&["1".to_string()]).unwrap();
        storage.set_marker("dataMigrated", "true").unwrap();

        storage.clear_all().unwrap();

        assert_eq!(storage.filter_checkboxes().unwrap(), None);
        assert_eq!(storage.selected_categories().unwrap(), None);
        assert_eq!(storage.marker("dataMigrated").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn corrupt_blob_is_reported_with_key() {
        let store = Arc::new(MemoryKvStore::new());
        store.set("taskDashboard_tasks", "{ not json").unwrap();
        let storage = LocalStorage::new(store);

        let err = storage.tasks().unwrap_err();
        assert!(format!("{err:#}").contains("taskDashboard_tasks"));
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let temp = tempdir().expect("tempdir");
        let store = FileKvStore::open(temp.path()).expect("open");
        assert!(store.set("../escape", "x").is_err());
    }
}
