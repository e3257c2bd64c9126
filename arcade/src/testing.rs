//! Collaborator doubles shared by the unit tests.

use std::collections::HashMap;
use std::fs;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use crate::common::ParticipantId;
use crate::error::FetchError;
use crate::error::StoreError;
use crate::profile::fetching::ProfileFetcher;
use crate::profile::fetching::ProfileUrl;
use crate::store::memory::MemoryStore;
use crate::store::Listener;
use crate::store::ParticipantRecord;
use crate::store::ParticipantStore;
use crate::store::Snapshot;
use crate::store::WatchId;

pub fn fixture(name: &str) -> String {
  fs::read_to_string(format!("data/{name}-2024-05-02.html")).unwrap()
}

#[derive(Clone)]
enum Reply {
  Markup(String),
  Failure(u16),
  Hang(Duration),
}

/// Serves canned pages keyed by profile id and counts the requests.
#[derive(Default)]
pub struct FakeFetcher {
  replies: Mutex<HashMap<String, Vec<Reply>>>,
  requests: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  fn push(&self, profile_id: &str, reply: Reply) {
    self
      .replies
      .lock()
      .unwrap()
      .entry(profile_id.to_lowercase())
      .or_default()
      .push(reply);
  }

  /// Served on every request once it is the last queued reply.
  pub fn page(self, profile_id: &str, markup: &str) -> Self {
    self.push(profile_id, Reply::Markup(String::from(markup)));
    self
  }

  /// Service unavailable, worth retrying.
  pub fn failure(self, profile_id: &str) -> Self {
    self.status(profile_id, 503)
  }

  pub fn status(self, profile_id: &str, status: u16) -> Self {
    self.push(profile_id, Reply::Failure(status));
    self
  }

  pub fn hang(self, profile_id: &str, delay: Duration) -> Self {
    self.push(profile_id, Reply::Hang(delay));
    self
  }

  pub fn requests(&self) -> usize {
    self.requests.load(Ordering::SeqCst)
  }
}

impl ProfileFetcher for FakeFetcher {
  fn fetch(&self, profile_url: &ProfileUrl) -> Result<String, FetchError> {
    self.requests.fetch_add(1, Ordering::SeqCst);

    let reply = {
      let mut replies = self.replies.lock().unwrap();
      match replies.get_mut(profile_url.id().as_str()) {
        Some(queue) if queue.len() > 1 => queue.remove(0),
        Some(queue) => queue[0].clone(),
        None => Reply::Failure(404),
      }
    };

    match reply {
      Reply::Markup(markup) => Ok(markup),
      Reply::Failure(status) => Err(FetchError::Status {
        url: String::from(profile_url.as_str()),
        status,
      }),
      Reply::Hang(delay) => {
        std::thread::sleep(delay);
        Ok(String::new())
      }
    }
  }
}

/// `MemoryStore` that can be told to fail its next reads or writes.
#[derive(Default)]
pub struct FlakyStore {
  inner: MemoryStore,
  failing_reads: Arc<AtomicUsize>,
  failing_writes: AtomicUsize,
}

fn take(counter: &AtomicUsize) -> bool {
  counter
    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
    .is_ok()
}

fn unavailable() -> StoreError {
  StoreError::Unavailable(String::from("injected failure"))
}

impl FlakyStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn fail_reads(&self, count: usize) {
    self.failing_reads.store(count, Ordering::SeqCst);
  }

  pub fn fail_writes(&self, count: usize) {
    self.failing_writes.store(count, Ordering::SeqCst);
  }

  fn write(&self) -> Result<(), StoreError> {
    if take(&self.failing_writes) {
      return Err(unavailable());
    }
    Ok(())
  }
}

impl ParticipantStore for FlakyStore {
  fn list(&self) -> Result<Snapshot, StoreError> {
    if take(&self.failing_reads) {
      return Err(unavailable());
    }
    self.inner.list()
  }

  fn get(&self, id: &str) -> Result<Option<ParticipantRecord>, StoreError> {
    if take(&self.failing_reads) {
      return Err(unavailable());
    }
    self.inner.get(id)
  }

  fn add(&self, record: ParticipantRecord) -> Result<ParticipantId, StoreError> {
    self.write()?;
    self.inner.add(record)
  }

  fn update(&self, id: &str, record: ParticipantRecord) -> Result<(), StoreError> {
    self.write()?;
    self.inner.update(id, record)
  }

  fn delete(&self, id: &str) -> Result<(), StoreError> {
    self.write()?;
    self.inner.delete(id)
  }

  /// Deliveries also count as reads.
  fn watch(&self, listener: Listener) -> WatchId {
    let failing_reads = Arc::clone(&self.failing_reads);
    self.inner.watch(Arc::new(move |snapshot: Result<Snapshot, StoreError>| {
      if take(&failing_reads) {
        listener(Err(unavailable()));
      } else {
        listener(snapshot);
      }
    }))
  }

  fn unwatch(&self, watch: WatchId) {
    self.inner.unwatch(watch);
  }
}
