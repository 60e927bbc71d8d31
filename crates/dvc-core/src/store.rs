//! Crash-safe JSON persistence.
//!
//! A [`JsonFile`] keeps an in-memory mirror of one JSON document and writes it
//! back with an atomic replace: serialize to a temp file in the same directory,
//! fsync, rename over the target. Readers of the file therefore see either the
//! previous or the next complete version.
//!
//! Saves go through a FIFO writer lock and snapshot the mirror only once they
//! hold it, so a save can never clobber the result of a later one.

use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::{errors::Error, Result};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// String-keyed store (`{}` on disk).
pub type JsonStore<V> = JsonFile<BTreeMap<String, V>>;

#[derive(Debug)]
struct Mirror<D> {
    revision: u64,
    doc: D,
}

#[derive(Debug)]
pub struct JsonFile<D> {
    path: PathBuf,
    data: RwLock<Mirror<D>>,
    /// Revision of the last successfully persisted snapshot.
    writer: Mutex<u64>,
}

impl<D> JsonFile<D>
where
    D: Default + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Load the document at `path`, or create it (and its directory) holding an
    /// empty default.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let loaded = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || read_document::<D>(&path))
                .await
                .map_err(|e| Error::External(format!("store loader task failed: {e}")))??
        };

        let (doc, revision) = match loaded {
            Some(doc) => (doc, 0),
            None => (D::default(), 1),
        };

        let store = Self {
            path,
            data: RwLock::new(Mirror { revision, doc }),
            writer: Mutex::new(0),
        };

        if revision != 0 {
            // The file must exist after construction.
            store.save().await?;
        }

        tracing::debug!(path = %store.path.display(), "opened store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read from the mirror.
    pub async fn read<R>(&self, f: impl FnOnce(&D) -> R) -> R {
        let guard = self.data.read().await;
        f(&guard.doc)
    }

    /// Mutate the mirror. Always marks the document dirty.
    pub async fn update<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.mutate(|doc| (f(doc), true)).await
    }

    /// Mutate the mirror; the closure reports whether it changed anything.
    /// Unchanged documents are not rewritten by the next save.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut D) -> (R, bool)) -> R {
        let mut guard = self.data.write().await;
        let (out, changed) = f(&mut guard.doc);
        if changed {
            guard.revision += 1;
        }
        out
    }

    /// Persist the mirror. No-op when nothing changed since the last successful save.
    ///
    /// On failure the on-disk file is untouched and the next call retries.
    pub async fn save(&self) -> Result<()> {
        let mut persisted = self.writer.lock().await;

        let (revision, bytes) = {
            let guard = self.data.read().await;
            if guard.revision == *persisted {
                return Ok(());
            }
            (guard.revision, serde_json::to_vec(&guard.doc)?)
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| self.persistence_error(format!("writer task failed: {e}")))?
            .map_err(|e| self.persistence_error(e.to_string()))?;

        *persisted = revision;
        Ok(())
    }

    fn persistence_error(&self, reason: String) -> Error {
        Error::PersistenceFailure {
            path: self.path.clone(),
            reason,
        }
    }
}

impl<V> JsonFile<BTreeMap<String, V>>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn get(&self, key: &str) -> Option<V> {
        self.read(|m| m.get(key).cloned()).await
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.read(|m| m.contains_key(key)).await
    }

    /// Insert or replace; returns the previous value.
    pub async fn set(&self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        self.update(|m| m.insert(key, value)).await
    }

    pub async fn delete(&self, key: &str) -> Option<V> {
        self.mutate(|m| {
            let old = m.remove(key);
            let changed = old.is_some();
            (old, changed)
        })
        .await
    }

    /// Remove every entry matching `remove`; returns the removed entries.
    pub async fn remove_where(&self, mut remove: impl FnMut(&str, &V) -> bool) -> Vec<(String, V)> {
        self.mutate(|m| {
            let keys: Vec<String> = m
                .iter()
                .filter(|(k, v)| remove(k.as_str(), v))
                .map(|(k, _)| k.clone())
                .collect();
            let removed: Vec<(String, V)> = keys
                .into_iter()
                .filter_map(|k| m.remove(&k).map(|v| (k, v)))
                .collect();
            let changed = !removed.is_empty();
            (removed, changed)
        })
        .await
    }

    pub async fn len(&self) -> usize {
        self.read(|m| m.len()).await
    }

    pub async fn is_empty(&self) -> bool {
        self.read(|m| m.is_empty()).await
    }

    pub async fn entries(&self) -> Vec<(String, V)> {
        self.read(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .await
    }

    pub async fn values(&self) -> Vec<V> {
        self.read(|m| m.values().cloned().collect()).await
    }
}

fn read_document<D: DeserializeOwned>(path: &Path) -> Result<Option<D>> {
    if let Some(dir) = parent_dir(path) {
        fs::create_dir_all(dir)?;
    }

    match fs::read_to_string(path) {
        Ok(txt) if txt.trim().is_empty() => Ok(None),
        Ok(txt) => Ok(Some(serde_json::from_str(&txt)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path).unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let tmp = dir.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = (|| {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }

    sync_dir(dir);
    Ok(())
}

/// Make the rename itself durable. Best-effort: not every platform/filesystem
/// allows opening directories.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    {
        if let Ok(d) = fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn open_creates_empty_documents() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = dir.path().join("nested/map.json");
        let list_path = dir.path().join("list.json");

        let map: JsonStore<u32> = JsonFile::open(&map_path).await.unwrap();
        let list: JsonFile<Vec<u64>> = JsonFile::open(&list_path).await.unwrap();

        assert!(map.is_empty().await);
        assert_eq!(fs::read_to_string(&map_path).unwrap(), "{}");
        assert_eq!(fs::read_to_string(&list_path).unwrap(), "[]");
        assert_eq!(list.read(|l| l.len()).await, 0);
    }

    #[tokio::test]
    async fn empty_file_is_treated_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "  \n").unwrap();

        let store: JsonStore<String> = JsonFile::open(&path).await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        fs::write(&path, "{not json").unwrap();

        let res: Result<JsonStore<String>> = JsonFile::open(&path).await;
        assert!(matches!(res, Err(Error::Json(_))));
        // Left alone for the operator to inspect.
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn save_then_reload_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");

        let store: JsonStore<Vec<String>> = JsonFile::open(&path).await.unwrap();
        store.set("1", vec!["heck".into(), "darn".into()]).await;
        store.set("2", vec![]).await;
        store.set("3", vec!["x".into()]).await;
        assert_eq!(store.delete("3").await, Some(vec!["x".to_string()]));
        store.save().await.unwrap();

        let reloaded: JsonStore<Vec<String>> = JsonFile::open(&path).await.unwrap();
        assert_eq!(reloaded.entries().await, store.entries().await);
        assert_eq!(reloaded.get("1").await.unwrap().len(), 2);
        assert!(reloaded.get("3").await.is_none());

        assert_eq!(dir_entries(dir.path()), vec!["s.json".to_string()]);
    }

    #[tokio::test]
    async fn save_without_changes_does_not_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let store: JsonStore<u32> = JsonFile::open(&path).await.unwrap();
        store.set("a", 1).await;
        store.save().await.unwrap();

        fs::write(&path, "sentinel").unwrap();
        store.save().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "sentinel");

        // Deleting a missing key is not a change either.
        assert!(store.delete("missing").await.is_none());
        store.save().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "sentinel");
    }

    #[tokio::test]
    async fn failed_save_keeps_mirror_and_retries_later() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("data");
        let path = sub.join("s.json");
        let store: JsonStore<u32> = JsonFile::open(&path).await.unwrap();

        fs::remove_dir_all(&sub).unwrap();
        store.set("a", 42).await;
        let err = store.save().await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailure { .. }));
        assert!(err.is_operator_visible());
        assert_eq!(store.get("a").await, Some(42));

        fs::create_dir_all(&sub).unwrap();
        store.save().await.unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), r#"{"a":42}"#);
        assert_eq!(dir_entries(&sub), vec!["s.json".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_saves_end_with_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let store: Arc<JsonStore<u32>> = Arc::new(JsonFile::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..32u32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.set(format!("k{i}"), i).await;
                if i % 3 == 0 {
                    store.delete(&format!("k{}", i.saturating_sub(1))).await;
                }
                store.save().await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        store.save().await.unwrap();

        let reloaded: JsonStore<u32> = JsonFile::open(&path).await.unwrap();
        assert_eq!(reloaded.entries().await, store.entries().await);
        assert_eq!(dir_entries(dir.path()), vec!["s.json".to_string()]);
    }

    #[tokio::test]
    async fn remove_where_reports_removed_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<u32> = JsonFile::open(dir.path().join("s.json")).await.unwrap();
        for (k, v) in [("a", 1), ("b", 2), ("c", 3)] {
            store.set(k, v).await;
        }

        let removed = store.remove_where(|_, v| *v % 2 == 1).await;
        assert_eq!(removed, vec![("a".to_string(), 1), ("c".to_string(), 3)]);
        assert_eq!(store.len().await, 1);
        assert!(store.remove_where(|_, _| false).await.is_empty());
    }
}
