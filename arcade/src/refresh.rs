//! Batch refresh of every stored participant.
//!
//! Participants are processed `batch_width` at a time with a pause between
//! batches. Each one goes through the same fetch, parse and update flow as an
//! interactive submission; a participant that keeps failing is recorded and
//! skipped, it never stops the run.

use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use fs2::FileExt;
use log::debug;
use log::error;
use log::info;
use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::common::League;
use crate::common::Participant;
use crate::common::ParticipantId;
use crate::common::ProfileMetrics;
use crate::common::Tier;
use crate::config::Config;
use crate::error::Error;
use crate::error::StoreError;
use crate::leaderboard::Leaderboard;
use crate::profile::fetching::validate_profile_url;
use crate::profile::fetching::ProfileFetcher;
use crate::profile::parsing::parse_profile;
use crate::store::ParticipantStore;
use crate::submission::fetch_with_timeout;
use crate::submission::FetchPolicy;

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshOptions {
  pub policy: FetchPolicy,
  pub batch_width: usize,
  pub batch_pause: Duration,
  pub cleanup_duplicates_first: bool,
}

impl RefreshOptions {
  pub fn from_config(config: &Config) -> Self {
    Self {
      policy: FetchPolicy::from_config(config),
      batch_width: config.refresh.batch_width,
      batch_pause: Duration::from_millis(config.refresh.batch_pause_millis),
      cleanup_duplicates_first: config.refresh.cleanup_duplicates_first,
    }
  }
}

/// Progress of the current (or last) run.
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RefreshStatus {
  pub is_running: bool,
  pub start_time: Option<DateTime<Utc>>,
  pub last_update: Option<DateTime<Utc>>,
  pub total_participants: usize,
  pub completed: usize,
  pub errors: usize,
  pub duplicates_removed: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Changes {
  pub badges: (u64, u64),
  pub points: (u64, u64),
  pub labs: (u64, u64),
  pub tier: (Tier, Tier),
  pub league: (League, League),
}

impl Changes {
  fn between(old: &ProfileMetrics, new: &ProfileMetrics) -> Self {
    Self {
      badges: (old.badges_earned, new.badges_earned),
      points: (old.points, new.points),
      labs: (old.labs_completed, new.labs_completed),
      tier: (old.tier, new.tier),
      league: (old.league, new.league),
    }
  }

  #[must_use]
  pub fn any(&self) -> bool {
    self.badges.0 != self.badges.1
      || self.points.0 != self.points.1
      || self.labs.0 != self.labs.1
      || self.tier.0 != self.tier.1
      || self.league.0 != self.league.1
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshResult {
  Updated { changes: Changes },
  NoChanges,
  Failed { error: String },
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantRefresh {
  pub id: ParticipantId,
  pub name: String,
  pub result: RefreshResult,
}

#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
  pub results: Vec<ParticipantRefresh>,
  pub duplicates_removed: usize,
}

impl RefreshReport {
  fn count(&self, predicate: impl Fn(&RefreshResult) -> bool) -> usize {
    self.results.iter().filter(|r| predicate(&r.result)).count()
  }

  #[must_use]
  pub fn updated(&self) -> usize {
    self.count(|result| matches!(result, RefreshResult::Updated { .. }))
  }

  #[must_use]
  pub fn unchanged(&self) -> usize {
    self.count(|result| matches!(result, RefreshResult::NoChanges))
  }

  #[must_use]
  pub fn failed(&self) -> usize {
    self.count(|result| matches!(result, RefreshResult::Failed { .. }))
  }
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshTrigger {
  Started(RefreshReport),
  /// Another run is in progress, here is how far it got.
  AlreadyRunning(RefreshStatus),
}

/// Files next to the collection that make the run a singleton across
/// processes: an exclusive lock held for the whole run and the published
/// status of the run holding it.
struct SharedRun {
  lock_path: PathBuf,
  status_path: PathBuf,
}

impl SharedRun {
  /// The run lock, or `None` when another process holds it.
  fn claim(&self) -> Result<Option<File>, StoreError> {
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .open(&self.lock_path)?;

    match FileExt::try_lock_exclusive(&file) {
      Ok(()) => Ok(Some(file)),
      Err(error) if error.kind() == fs2::lock_contended_error().kind() => {
        Ok(None)
      }
      Err(error) => Err(error.into()),
    }
  }

  fn read_status(&self) -> RefreshStatus {
    let status = fs::read_to_string(&self.status_path)
      .ok()
      .and_then(|json| serde_json::from_str(&json).ok())
      .unwrap_or_default();

    RefreshStatus {
      is_running: true,
      ..status
    }
  }

  fn publish(&self, status: &RefreshStatus) {
    let written = serde_json::to_vec_pretty(status)
      .map_err(StoreError::from)
      .and_then(|json| Ok(fs::write(&self.status_path, json)?));
    if let Err(error) = written {
      warn!("Publishing refresh status to {:?} failed: {error}", self.status_path);
    }
  }
}

/// Owns the run state. At most one run per coordinator at a time, and with
/// `shared` at most one per collection file across processes.
#[derive(Default)]
pub struct RefreshCoordinator {
  status: Mutex<RefreshStatus>,
  shared: Option<SharedRun>,
}

/// Marks the run as finished however it ends. The run lock is released after
/// the final status is published.
struct RunGuard<'a> {
  coordinator: &'a RefreshCoordinator,
  _run_lock: Option<File>,
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    self.coordinator.update(|status| {
      status.is_running = false;
      status.last_update = Some(Utc::now());
    });
  }
}

impl RefreshCoordinator {
  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Coordinates with every other process refreshing `collection`.
  #[must_use]
  pub fn shared(collection: &Path) -> Self {
    Self {
      shared: Some(SharedRun {
        lock_path: collection.with_extension("refresh.lock"),
        status_path: collection.with_extension("refresh.json"),
      }),
      ..Self::default()
    }
  }

  fn lock(&self) -> MutexGuard<'_, RefreshStatus> {
    // NOTE: The status is plain counters, still meaningful after a panic.
    self.status.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn status(&self) -> RefreshStatus {
    self.lock().clone()
  }

  fn update(&self, change: impl FnOnce(&mut RefreshStatus)) {
    let mut status = self.lock();
    change(&mut status);
    if let Some(shared) = &self.shared {
      shared.publish(&status);
    }
  }

  fn record(&self, result: &RefreshResult) {
    self.update(|status| {
      status.completed += 1;
      if matches!(result, RefreshResult::Failed { .. }) {
        status.errors += 1;
      }
      status.last_update = Some(Utc::now());
    });
  }

  /// Refreshes every participant unless a run is already in progress.
  ///
  /// Only failing to list the participants fails the run as a whole.
  pub fn run<S: ParticipantStore>(
    &self,
    leaderboard: &Leaderboard<S>,
    fetcher: &Arc<dyn ProfileFetcher>,
    options: &RefreshOptions,
  ) -> Result<RefreshTrigger, Error> {
    let run_lock = {
      let mut status = self.lock();
      let claimed = match &self.shared {
        _ if status.is_running => Err(status.clone()),
        Some(shared) => shared.claim()?.ok_or_else(|| shared.read_status()).map(Some),
        None => Ok(None),
      };
      let run_lock = match claimed {
        Ok(run_lock) => run_lock,
        Err(running) => {
          info!(
            "Refresh already running ({}/{} done).",
            running.completed, running.total_participants
          );
          return Ok(RefreshTrigger::AlreadyRunning(running));
        }
      };

      let now = Utc::now();
      *status = RefreshStatus {
        is_running: true,
        start_time: Some(now),
        last_update: Some(now),
        ..RefreshStatus::default()
      };
      if let Some(shared) = &self.shared {
        shared.publish(&status);
      }
      run_lock
    };
    let _guard = RunGuard {
      coordinator: self,
      _run_lock: run_lock,
    };

    let mut report = RefreshReport::default();
    if options.cleanup_duplicates_first {
      match leaderboard.cleanup_duplicates() {
        Ok(removed) => report.duplicates_removed = removed,
        Err(error) => warn!("Skipping duplicate cleanup: {error}"),
      }
      self.update(|status| status.duplicates_removed = report.duplicates_removed);
    }

    let participants = options.policy.retry(Error::is_retryable_in_batch, || {
      Ok(leaderboard.participants()?)
    })?;
    self.update(|status| status.total_participants = participants.len());
    info!(
      "Refreshing {} participants, {} at a time.",
      participants.len(),
      options.batch_width.max(1)
    );

    let batches = participants.chunks(options.batch_width.max(1));
    let batch_count = batches.len();
    for (i, batch) in batches.enumerate() {
      if i > 0 {
        thread::sleep(options.batch_pause);
      }
      info!("Batch {}/{batch_count}.", i + 1);

      let results = thread::scope(|scope| {
        let handles: Vec<_> = batch
          .iter()
          .map(|participant| {
            scope.spawn(move || {
              refresh_one(leaderboard, fetcher, participant, options)
            })
          })
          .collect();

        handles
          .into_iter()
          .map(|handle| {
            handle.join().unwrap_or_else(|_| RefreshResult::Failed {
              error: String::from("refresh panicked"),
            })
          })
          .collect::<Vec<_>>()
      });

      for (participant, result) in batch.iter().zip(results) {
        self.record(&result);
        report.results.push(ParticipantRefresh {
          id: participant.id.clone(),
          name: participant.metrics.name.clone(),
          result,
        });
      }
    }

    info!(
      "Refresh done: {} updated, {} unchanged, {} failed.",
      report.updated(),
      report.unchanged(),
      report.failed()
    );
    Ok(RefreshTrigger::Started(report))
  }
}

fn refresh_one<S: ParticipantStore>(
  leaderboard: &Leaderboard<S>,
  fetcher: &Arc<dyn ProfileFetcher>,
  participant: &Participant,
  options: &RefreshOptions,
) -> RefreshResult {
  let outcome = options.policy.retry(Error::is_retryable_in_batch, || {
    let profile_url = validate_profile_url(&participant.profile_url)?;
    let markup = fetch_with_timeout(fetcher, &profile_url, options.policy.timeout)?;
    let fresh = parse_profile(&markup);

    let changes = Changes::between(&participant.metrics, &fresh);
    if !changes.any() {
      return Ok(None);
    }
    let update = leaderboard.update_progress(participant, &fresh)?;
    if update.progress.has_progress {
      debug!(
        "{} gained {} badges, {} points, {} labs.",
        update.participant.metrics.name,
        update.progress.badge_progress,
        update.progress.point_progress,
        update.progress.lab_progress,
      );
    }
    Ok(Some(changes))
  });

  match outcome {
    Ok(Some(changes)) => RefreshResult::Updated { changes },
    Ok(None) => RefreshResult::NoChanges,
    Err(error) => {
      error!(
        "Giving up on {} ({}): {error}",
        participant.metrics.name, participant.id
      );
      RefreshResult::Failed {
        error: error.to_string(),
      }
    }
  }
}
