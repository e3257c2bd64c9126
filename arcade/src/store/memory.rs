use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::RwLock;

use chrono::Utc;
use fs2::FileExt;
use log::debug;
use log::info;
use uuid::Uuid;

use super::legacy_order;
use super::Listener;
use super::ParticipantRecord;
use super::ParticipantStore;
use super::Snapshot;
use super::WatchId;
use crate::common::ParticipantId;
use crate::error::StoreError;

type Documents = BTreeMap<ParticipantId, ParticipantRecord>;

fn poisoned<T>(_: T) -> StoreError {
  StoreError::Unavailable(String::from("lock poisoned"))
}

fn read_documents(path: &Path) -> Result<Documents, StoreError> {
  match fs::read_to_string(path) {
    Ok(json) => Ok(serde_json::from_str(&json)?),
    Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(Documents::new()),
    Err(error) => Err(error.into()),
  }
}

/// Advisory lock on `<collection>.lock`, shared by every process using the
/// same collection file. Released on drop.
struct FileLock {
  file: File,
}

impl FileLock {
  fn acquire(collection: &Path, exclusive: bool) -> Result<Self, StoreError> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(collection.with_extension("json.lock"))?;

    // SEE: https://docs.rs/fs2/0.4.3/fs2/trait.FileExt.html
    if exclusive {
      FileExt::lock_exclusive(&file)?;
    } else {
      FileExt::lock_shared(&file)?;
    }

    Ok(Self { file })
  }
}

impl Drop for FileLock {
  fn drop(&mut self) {
    // NOTE: Closing the file releases the lock too, this only makes it
    // immediate.
    let _ = FileExt::unlock(&self.file);
  }
}

/// In-process collection, optionally mirrored to a JSON file.
///
/// With a file, every change is made under an exclusive file lock on top of
/// the latest file contents, so several processes can share one collection
/// without losing each other's writes. Reads pick up the latest file too.
#[derive(Default)]
pub struct MemoryStore {
  documents: RwLock<Documents>,
  listeners: Mutex<Vec<(WatchId, Listener)>>,
  next_watch: AtomicU64,
  path: Option<PathBuf>,
}

impl MemoryStore {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Loads `path` when it exists. Starts empty otherwise.
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let path = path.into();
    let documents = {
      let _lock = FileLock::acquire(&path, false)?;
      read_documents(&path)?
    };
    info!("Opened {path:?} with {} participants.", documents.len());

    Ok(Self {
      documents: RwLock::new(documents),
      path: Some(path),
      ..Self::default()
    })
  }

  /// Replaces the in-memory copy with the file's contents.
  fn reload(&self) -> Result<(), StoreError> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    // NOTE: The file lock is never held while waiting for `documents`.
    // `mutate` takes them in the opposite order.
    let fresh = {
      let _lock = FileLock::acquire(path, false)?;
      read_documents(path)?
    };
    *self.documents.write().map_err(poisoned)? = fresh;

    Ok(())
  }

  fn persist(&self, documents: &Documents) -> Result<(), StoreError> {
    let Some(path) = &self.path else {
      return Ok(());
    };

    // NOTE: Written next to the target then renamed so a crash never leaves
    // a half-written collection behind.
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, serde_json::to_vec_pretty(documents)?)?;
    fs::rename(&staging, path)?;

    Ok(())
  }

  /// Applies `change` to a copy of the latest collection, persists it and
  /// only then publishes it.
  fn mutate<T>(
    &self,
    change: impl FnOnce(&mut Documents) -> Result<T, StoreError>,
  ) -> Result<T, StoreError> {
    let result = {
      let mut documents = self.documents.write().map_err(poisoned)?;
      let _lock = match &self.path {
        Some(path) => {
          let lock = FileLock::acquire(path, true)?;
          *documents = read_documents(path)?;
          Some(lock)
        }
        None => None,
      };

      let mut next = documents.clone();
      let result = change(&mut next)?;
      self.persist(&next)?;
      *documents = next;
      result
    };

    self.notify();
    Ok(result)
  }

  fn listeners(&self) -> Vec<Listener> {
    self
      .listeners
      .lock()
      .map(|listeners| {
        listeners
          .iter()
          .map(|(_, listener)| Listener::clone(listener))
          .collect()
      })
      .unwrap_or_default()
  }

  fn notify(&self) {
    let listeners = self.listeners();
    if listeners.is_empty() {
      return;
    }

    debug!("Notifying {} listeners.", listeners.len());
    for listener in listeners {
      listener(self.list());
    }
  }
}

impl ParticipantStore for MemoryStore {
  fn list(&self) -> Result<Snapshot, StoreError> {
    self.reload()?;
    let documents = self.documents.read().map_err(poisoned)?;

    let mut snapshot: Snapshot = documents
      .iter()
      .map(|(id, record)| (id.clone(), record.clone()))
      .collect();
    snapshot.sort_by(legacy_order);

    Ok(snapshot)
  }

  fn get(&self, id: &str) -> Result<Option<ParticipantRecord>, StoreError> {
    self.reload()?;
    let documents = self.documents.read().map_err(poisoned)?;

    Ok(documents.get(id).cloned())
  }

  fn add(&self, record: ParticipantRecord) -> Result<ParticipantId, StoreError> {
    let id = Uuid::new_v4().simple().to_string();
    let now = Utc::now();

    self.mutate(|documents| {
      documents.insert(
        id.clone(),
        ParticipantRecord {
          created_at: Some(now),
          updated_at: Some(now),
          ..record
        },
      );
      Ok(())
    })?;
    debug!("Added participant {id}.");

    Ok(id)
  }

  fn update(&self, id: &str, record: ParticipantRecord) -> Result<(), StoreError> {
    self.mutate(|documents| {
      let stored = documents
        .get_mut(id)
        .ok_or_else(|| StoreError::NotFound(String::from(id)))?;
      *stored = ParticipantRecord {
        created_at: stored.created_at,
        updated_at: Some(Utc::now()),
        ..record
      };
      Ok(())
    })?;
    debug!("Updated participant {id}.");

    Ok(())
  }

  fn delete(&self, id: &str) -> Result<(), StoreError> {
    self.mutate(|documents| {
      documents
        .remove(id)
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(String::from(id)))
    })?;
    debug!("Deleted participant {id}.");

    Ok(())
  }

  fn watch(&self, listener: Listener) -> WatchId {
    let watch = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));
    if let Ok(mut listeners) = self.listeners.lock() {
      listeners.push((watch, Listener::clone(&listener)));
    }

    listener(self.list());
    watch
  }

  fn unwatch(&self, watch: WatchId) {
    if let Ok(mut listeners) = self.listeners.lock() {
      listeners.retain(|(id, _)| *id != watch);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::Mutex;

  use pretty_assertions::assert_eq;

  use super::MemoryStore;
  use crate::common::League;
  use crate::common::ProfileMetrics;
  use crate::error::StoreError;
  use crate::store::ParticipantRecord;
  use crate::store::ParticipantStore;
  use crate::store::Snapshot;

  fn record(name: &str, badges: u64, labs: u64) -> ParticipantRecord {
    ParticipantRecord::new(
      &format!("https://www.skills.google/public_profiles/{badges}{labs}"),
      &ProfileMetrics::new(name, League::Bronze, 0, badges, labs, "2024"),
    )
  }

  #[test]
  fn test_store_assigns_timestamps() {
    let store = MemoryStore::new();
    let id = store.add(record("Ada", 1, 0)).unwrap();

    let added = store.get(&id).unwrap().unwrap();
    assert!(added.created_at.is_some());
    assert_eq!(added.created_at, added.updated_at);

    store
      .update(
        &id,
        ParticipantRecord {
          created_at: None,
          ..record("Ada", 2, 0)
        },
      )
      .unwrap();
    let updated = store.get(&id).unwrap().unwrap();
    assert_eq!(updated.created_at, added.created_at);
    assert!(updated.updated_at >= added.updated_at);
    assert_eq!(updated.badges_earned, 2);
  }

  #[test]
  fn test_list_uses_legacy_order() {
    let store = MemoryStore::new();
    for (name, badges, labs) in [("Cy", 1, 9), ("Al", 2, 0), ("Bo", 1, 9), ("Di", 1, 10)] {
      store.add(record(name, badges, labs)).unwrap();
    }

    let names: Vec<_> = store
      .list()
      .unwrap()
      .into_iter()
      .filter_map(|(_, record)| record.name)
      .collect();
    assert_eq!(names, vec!["Al", "Di", "Bo", "Cy"]);
  }

  #[test]
  fn test_missing_documents() {
    let store = MemoryStore::new();

    assert!(matches!(
      store.update("nope", record("Ada", 1, 0)),
      Err(StoreError::NotFound(_))
    ));
    assert!(matches!(store.delete("nope"), Err(StoreError::NotFound(_))));
    assert_eq!(store.get("nope").unwrap(), None);
  }

  #[test]
  fn test_watchers_get_every_change() {
    let store = MemoryStore::new();
    let sizes = Arc::new(Mutex::new(vec![]));

    let seen = Arc::clone(&sizes);
    let listener = move |snapshot: Result<Snapshot, StoreError>| {
      seen.lock().unwrap().push(snapshot.unwrap().len());
    };
    let watch = store.watch(Arc::new(listener));
    let id = store.add(record("Ada", 1, 0)).unwrap();
    store.add(record("Bo", 1, 0)).unwrap();
    store.delete(&id).unwrap();
    store.unwatch(watch);
    store.add(record("Cy", 1, 0)).unwrap();

    assert_eq!(*sizes.lock().unwrap(), vec![0, 1, 2, 1]);
  }

  #[test]
  fn test_persists_between_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaderboard.json");

    let id = {
      let store = MemoryStore::open(&path).unwrap();
      store.add(record("Ada", 4, 2)).unwrap()
    };

    let reopened = MemoryStore::open(&path).unwrap();
    let stored = reopened.get(&id).unwrap().unwrap();
    assert_eq!(stored.name.as_deref(), Some("Ada"));
    assert_eq!(stored.badges_earned, 4);
    assert!(!path.with_extension("json.tmp").exists());
  }

  #[test]
  fn test_two_writers_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("leaderboard.json");
    let first = MemoryStore::open(&path).unwrap();
    let second = MemoryStore::open(&path).unwrap();

    let ada = first.add(record("Ada", 1, 0)).unwrap();
    let bo = second.add(record("Bo", 2, 0)).unwrap();

    assert_eq!(MemoryStore::open(&path).unwrap().list().unwrap().len(), 2);
    assert_eq!(
      first.get(&bo).unwrap().and_then(|record| record.name),
      Some(String::from("Bo"))
    );

    second.delete(&ada).unwrap();
    first.update(&bo, record("Bo", 3, 0)).unwrap();

    let reopened = MemoryStore::open(&path).unwrap();
    let stored = reopened.list().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].0, bo);
    assert_eq!(stored[0].1.badges_earned, 3);
  }
}
