//! Participant bookkeeping on top of a `ParticipantStore`: one participant per
//! profile id, progress history, live ranked snapshots and maintenance.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use itertools::Itertools;
use log::error;
use log::info;
use log::warn;

use crate::common::Participant;
use crate::common::ParticipantId;
use crate::common::ProfileId;
use crate::common::ProfileMetrics;
use crate::common::ProgressEntry;
use crate::common::ProgressInfo;
use crate::common::RankedParticipant;
use crate::common::Tier;
use crate::error::Error;
use crate::error::StoreError;
use crate::error::ValidationError;
use crate::ranking::rank;
use crate::store::ParticipantRecord;
use crate::store::ParticipantStore;
use crate::store::Snapshot;
use crate::store::WatchId;

pub const HISTORY_CAP: usize = 30;

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
  pub participant: Participant,
  pub progress: ProgressInfo,
}

#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LeaderboardStats {
  pub total_participants: usize,
  pub total_badges: u64,
  pub total_labs: u64,
  pub total_points: u64,
  pub tier_distribution: BTreeMap<Tier, usize>,
}

/// Live ranked view. Dropping it stops the deliveries.
#[must_use = "the subscription ends when dropped"]
pub struct Subscription<'a> {
  store: &'a dyn ParticipantStore,
  watch: WatchId,
}

impl Subscription<'_> {
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription<'_> {
  fn drop(&mut self) {
    self.store.unwatch(self.watch);
  }
}

pub struct Leaderboard<S> {
  store: S,
}

impl<S: ParticipantStore> Leaderboard<S> {
  pub fn new(store: S) -> Self {
    Self { store }
  }

  pub fn store(&self) -> &S {
    &self.store
  }

  /// Every participant in legacy order (badges, labs, name).
  pub fn participants(&self) -> Result<Vec<Participant>, StoreError> {
    Ok(
      self
        .store
        .list()?
        .into_iter()
        .map(|(id, record)| record.into_participant(id))
        .collect(),
    )
  }

  pub fn ranked(&self) -> Result<Vec<RankedParticipant>, StoreError> {
    Ok(rank(self.participants()?))
  }

  pub fn exists(&self, profile_url: &str) -> Result<bool, StoreError> {
    Ok(self.get_existing(profile_url)?.is_some())
  }

  /// The stored participant with the same profile id, whichever domain either
  /// URL uses. The newest one if duplicates slipped in.
  pub fn get_existing(
    &self,
    profile_url: &str,
  ) -> Result<Option<Participant>, StoreError> {
    let Some(profile_id) = ProfileId::from_url(profile_url) else {
      return Ok(None);
    };

    Ok(
      self
        .participants()?
        .into_iter()
        .filter(|participant| {
          participant.profile_id().as_ref() == Some(&profile_id)
        })
        .max_by(|a, b| {
          a.created_at.cmp(&b.created_at).then_with(|| b.id.cmp(&a.id))
        }),
    )
  }

  pub fn insert(
    &self,
    profile_url: &str,
    metrics: &ProfileMetrics,
  ) -> Result<ParticipantId, Error> {
    if metrics.name.trim().is_empty() {
      return Err(ValidationError::MissingField("name").into());
    }
    if profile_url.trim().is_empty() {
      return Err(ValidationError::MissingField("profileUrl").into());
    }

    let id = self
      .store
      .add(ParticipantRecord::new(profile_url.trim(), metrics))?;
    info!("Added {} as {id}.", metrics.name);

    Ok(id)
  }

  /// Overwrites the stored metrics with `fresh` and records a history entry
  /// when anything went up.
  pub fn update_progress(
    &self,
    existing: &Participant,
    fresh: &ProfileMetrics,
  ) -> Result<ProgressUpdate, StoreError> {
    let progress = ProgressInfo::between(&existing.metrics, fresh);

    let mut progress_history = existing.progress_history.clone();
    if progress.has_progress {
      progress_history.push(ProgressEntry {
        date: Utc::now(),
        badge_progress: progress.badge_progress,
        point_progress: progress.point_progress,
        lab_progress: progress.lab_progress,
        total_badges: fresh.badges_earned,
        total_points: fresh.points,
        total_labs: fresh.labs_completed,
      });
      let overflow = progress_history.len().saturating_sub(HISTORY_CAP);
      progress_history.drain(..overflow);
    }

    // NOTE: A page whose name couldn't be read keeps the name we have.
    let mut metrics = fresh.clone();
    if fresh.has_unknown_name() && !existing.metrics.has_unknown_name() {
      metrics.name = existing.metrics.name.clone();
      metrics.avatar = existing.metrics.avatar.clone();
    }

    self.store.update(
      &existing.id,
      ParticipantRecord {
        created_at: existing.created_at,
        updated_at: existing.updated_at,
        progress_history,
        ..ParticipantRecord::new(&existing.profile_url, &metrics)
      },
    )?;

    let participant = self
      .store
      .get(&existing.id)?
      .ok_or_else(|| StoreError::NotFound(existing.id.clone()))?
      .into_participant(existing.id.clone());
    info!(
      "Updated {} ({:+} badges, {:+} points, {:+} labs).",
      participant.metrics.name,
      progress.badge_progress,
      progress.point_progress,
      progress.lab_progress,
    );

    Ok(ProgressUpdate {
      participant,
      progress,
    })
  }

  /// Calls `callback` with the freshly ranked list now and after every change
  /// to the collection. A failed delivery is logged and reported as an empty
  /// list; the subscription stays alive.
  pub fn subscribe(
    &self,
    callback: impl Fn(Vec<RankedParticipant>) + Send + Sync + 'static,
  ) -> Subscription<'_> {
    let listener = move |snapshot: Result<Snapshot, StoreError>| match snapshot {
      Ok(snapshot) => callback(rank(
        snapshot
          .into_iter()
          .map(|(id, record)| record.into_participant(id))
          .collect(),
      )),
      Err(error) => {
        error!("Leaderboard subscription failed: {error}");
        callback(vec![]);
      }
    };
    let watch = self.store.watch(Arc::new(listener));

    Subscription {
      store: &self.store,
      watch,
    }
  }

  pub fn delete(&self, id: &str) -> Result<(), StoreError> {
    self.store.delete(id)?;
    info!("Deleted participant {id}.");
    Ok(())
  }

  /// Keeps the most recently created participant per profile id and deletes
  /// the others. Their progress histories are merged into the survivor first.
  /// Returns how many were deleted.
  pub fn cleanup_duplicates(&self) -> Result<usize, StoreError> {
    let groups = self
      .participants()?
      .into_iter()
      .filter_map(|participant| {
        participant.profile_id().map(|profile_id| (profile_id, participant))
      })
      .into_group_map();

    let mut removed = 0;
    for (profile_id, mut group) in groups {
      if group.len() < 2 {
        continue;
      }

      // NOTE: Newest first. Unknown creation times count as oldest.
      group.sort_by(|a, b| {
        b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
      });
      let keeper = &group[0];
      warn!(
        "Profile {profile_id} stored {} times, keeping {}.",
        group.len(),
        keeper.id,
      );

      let merged_history = merge_histories(&group);
      if merged_history != keeper.progress_history {
        self.store.update(
          &keeper.id,
          ParticipantRecord {
            progress_history: merged_history,
            ..ParticipantRecord::from(keeper)
          },
        )?;
      }

      for duplicate in &group[1..] {
        self.store.delete(&duplicate.id)?;
        removed += 1;
      }
    }

    info!("Removed {removed} duplicate participants.");
    Ok(removed)
  }

  pub fn stats(&self) -> Result<LeaderboardStats, StoreError> {
    let ranked = self.ranked()?;

    let mut tier_distribution: BTreeMap<Tier, usize> =
      Tier::ALL.into_iter().map(|tier| (tier, 0)).collect();
    for entry in &ranked {
      *tier_distribution
        .entry(entry.participant.metrics.tier)
        .or_default() += 1;
    }

    let metrics = || ranked.iter().map(|entry| &entry.participant.metrics);
    Ok(LeaderboardStats {
      total_participants: ranked.len(),
      total_badges: metrics().map(|m| m.badges_earned).sum(),
      total_labs: metrics().map(|m| m.labs_completed).sum(),
      total_points: metrics().map(|m| m.points).sum(),
      tier_distribution,
    })
  }
}

/// Union of the groups' histories by date, capped to the newest entries.
fn merge_histories(group: &[Participant]) -> Vec<ProgressEntry> {
  let mut merged: Vec<ProgressEntry> = group
    .iter()
    .flat_map(|participant| participant.progress_history.iter().cloned())
    .sorted_by_key(|entry| entry.date)
    .dedup()
    .collect();

  let overflow = merged.len().saturating_sub(HISTORY_CAP);
  merged.drain(..overflow);
  merged
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::Mutex;

  use chrono::TimeZone;
  use chrono::Utc;
  use pretty_assertions::assert_eq;

  use super::Leaderboard;
  use super::HISTORY_CAP;
  use crate::common::League;
  use crate::common::ProfileMetrics;
  use crate::common::ProgressEntry;
  use crate::common::Tier;
  use crate::error::Error;
  use crate::error::ValidationError;
  use crate::store::memory::MemoryStore;
  use crate::store::ParticipantRecord;
  use crate::store::ParticipantStore;
  use crate::testing::FlakyStore;

  const OLD_URL: &str =
    "https://www.cloudskillsboost.google/public_profiles/5e1f-77aa";
  const NEW_URL: &str = "https://www.skills.google/public_profiles/5e1f-77aa";

  fn metrics(badges: u64, points: u64, labs: u64) -> ProfileMetrics {
    ProfileMetrics::new("Ada", League::Silver, points, badges, labs, "2023")
  }

  fn entry(day: u32) -> ProgressEntry {
    ProgressEntry {
      date: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
      badge_progress: 1,
      point_progress: 0,
      lab_progress: 0,
      total_badges: u64::from(day),
      total_points: 0,
      total_labs: 0,
    }
  }

  #[test]
  fn test_exists_across_domains() {
    let leaderboard = Leaderboard::new(MemoryStore::new());
    leaderboard.insert(OLD_URL, &metrics(1, 0, 0)).unwrap();

    assert!(leaderboard.exists(NEW_URL).unwrap());
    assert!(leaderboard.exists(&NEW_URL.to_uppercase()).unwrap());
    assert!(!leaderboard
      .exists("https://www.skills.google/public_profiles/5e1f")
      .unwrap());
    assert!(!leaderboard.exists("https://www.skills.google/").unwrap());

    let existing = leaderboard.get_existing(NEW_URL).unwrap().unwrap();
    assert_eq!(existing.profile_url, OLD_URL);
    assert_eq!(existing.metrics, metrics(1, 0, 0));
  }

  #[test]
  fn test_insert_requires_name_and_url() {
    let leaderboard = Leaderboard::new(MemoryStore::new());

    assert!(matches!(
      leaderboard.insert("  ", &metrics(0, 0, 0)),
      Err(Error::Validation(ValidationError::MissingField("profileUrl")))
    ));
    let nameless = ProfileMetrics {
      name: String::from(" "),
      ..metrics(0, 0, 0)
    };
    assert!(matches!(
      leaderboard.insert(NEW_URL, &nameless),
      Err(Error::Validation(ValidationError::MissingField("name")))
    ));
    assert!(leaderboard.participants().unwrap().is_empty());
  }

  #[test]
  fn test_update_progress_records_gains_only() {
    let leaderboard = Leaderboard::new(MemoryStore::new());
    leaderboard.insert(NEW_URL, &metrics(2, 100, 1)).unwrap();
    let existing = leaderboard.get_existing(NEW_URL).unwrap().unwrap();

    let same = leaderboard.update_progress(&existing, &metrics(2, 100, 1));
    let same = same.unwrap();
    assert!(!same.progress.has_progress);
    assert!(same.participant.progress_history.is_empty());
    assert_eq!(same.participant.metrics, existing.metrics);
    assert_eq!(same.participant.created_at, existing.created_at);

    let worse = leaderboard
      .update_progress(&same.participant, &metrics(2, 90, 1))
      .unwrap();
    assert!(!worse.progress.has_progress);
    assert!(worse.participant.progress_history.is_empty());
    assert_eq!(worse.participant.metrics.points, 90);

    let better = leaderboard
      .update_progress(&worse.participant, &metrics(4, 90, 3))
      .unwrap();
    assert_eq!(better.progress.badge_progress, 2);
    assert_eq!(better.progress.lab_progress, 2);
    assert_eq!(better.participant.progress_history.len(), 1);
    let recorded = &better.participant.progress_history[0];
    assert_eq!(
      (recorded.total_badges, recorded.total_points, recorded.total_labs),
      (4, 90, 3)
    );
    assert_eq!(better.participant.metrics.tier, Tier::CloudBeginner);
    assert_eq!(leaderboard.participants().unwrap().len(), 1);
  }

  #[test]
  fn test_history_is_capped() {
    let leaderboard = Leaderboard::new(MemoryStore::new());
    leaderboard.insert(NEW_URL, &metrics(0, 0, 0)).unwrap();
    let mut participant = leaderboard.get_existing(NEW_URL).unwrap().unwrap();

    for badges in 1..=(HISTORY_CAP as u64 + 5) {
      participant = leaderboard
        .update_progress(&participant, &metrics(badges, 0, 0))
        .unwrap()
        .participant;
    }

    let history = &participant.progress_history;
    assert_eq!(history.len(), HISTORY_CAP);
    assert_eq!(history[0].total_badges, 6);
    assert_eq!(history[HISTORY_CAP - 1].total_badges, 35);
  }

  #[test]
  fn test_unreadable_name_keeps_stored_name() {
    let leaderboard = Leaderboard::new(MemoryStore::new());
    leaderboard.insert(NEW_URL, &metrics(1, 0, 0)).unwrap();
    let existing = leaderboard.get_existing(NEW_URL).unwrap().unwrap();

    let update = leaderboard
      .update_progress(&existing, &ProfileMetrics::unknown())
      .unwrap();

    assert_eq!(update.participant.metrics.name, "Ada");
    assert_eq!(update.participant.metrics.badges_earned, 0);
  }

  #[test]
  fn test_subscription_delivers_ranked_snapshots() {
    let leaderboard = Leaderboard::new(MemoryStore::new());
    let deliveries = Arc::new(Mutex::new(vec![]));

    let seen = Arc::clone(&deliveries);
    let subscription = leaderboard.subscribe(move |ranked| {
      seen.lock().unwrap().push(
        ranked
          .into_iter()
          .map(|r| (r.place, r.participant.metrics.badges_earned))
          .collect::<Vec<_>>(),
      );
    });
    leaderboard
      .insert("https://www.skills.google/public_profiles/aa01", &metrics(5, 900, 0))
      .unwrap();
    leaderboard
      .insert("https://www.skills.google/public_profiles/bb02", &metrics(6, 10, 0))
      .unwrap();
    subscription.unsubscribe();
    leaderboard
      .insert("https://www.skills.google/public_profiles/cc03", &metrics(7, 0, 0))
      .unwrap();

    assert_eq!(
      *deliveries.lock().unwrap(),
      vec![vec![], vec![(1, 5)], vec![(1, 6), (2, 5)]]
    );
  }

  #[test]
  fn test_subscription_survives_store_errors() {
    let store = FlakyStore::new();
    let leaderboard = Leaderboard::new(&store);
    let deliveries = Arc::new(Mutex::new(vec![]));

    let seen = Arc::clone(&deliveries);
    let _subscription = leaderboard
      .subscribe(move |ranked| seen.lock().unwrap().push(ranked.len()));
    leaderboard.insert(NEW_URL, &metrics(1, 0, 0)).unwrap();
    store.fail_reads(1);
    leaderboard.insert(OLD_URL, &metrics(1, 0, 0)).unwrap();
    leaderboard
      .insert("https://www.skills.google/public_profiles/cc03", &metrics(1, 0, 0))
      .unwrap();

    assert_eq!(*deliveries.lock().unwrap(), vec![0, 1, 0, 3]);
  }

  #[test]
  fn test_cleanup_keeps_newest_and_merges_history() {
    let store = MemoryStore::new();
    let older = store
      .add(ParticipantRecord {
        progress_history: vec![entry(1), entry(2)],
        ..ParticipantRecord::new(OLD_URL, &metrics(1, 0, 0))
      })
      .unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let newer = store
      .add(ParticipantRecord {
        progress_history: vec![entry(2), entry(3)],
        ..ParticipantRecord::new(NEW_URL, &metrics(3, 0, 0))
      })
      .unwrap();
    store
      .add(ParticipantRecord::new(
        "https://www.skills.google/public_profiles/0a0b",
        &metrics(9, 0, 0),
      ))
      .unwrap();
    store
      .add(ParticipantRecord::new("not a profile", &metrics(0, 0, 0)))
      .unwrap();
    let leaderboard = Leaderboard::new(store);

    assert_eq!(leaderboard.cleanup_duplicates().unwrap(), 1);
    assert_eq!(leaderboard.cleanup_duplicates().unwrap(), 0);

    assert_eq!(leaderboard.store().get(&older).unwrap(), None);
    let kept = leaderboard.get_existing(OLD_URL).unwrap().unwrap();
    assert_eq!(kept.id, newer);
    assert_eq!(kept.metrics.badges_earned, 3);
    assert_eq!(kept.progress_history, vec![entry(1), entry(2), entry(3)]);
    assert_eq!(leaderboard.participants().unwrap().len(), 3);
  }

  #[test]
  fn test_stats() {
    let leaderboard = Leaderboard::new(MemoryStore::new());
    leaderboard
      .insert("https://www.skills.google/public_profiles/aa01", &metrics(16, 10, 2))
      .unwrap();
    leaderboard
      .insert("https://www.skills.google/public_profiles/bb02", &metrics(0, 5, 1))
      .unwrap();

    let stats = leaderboard.stats().unwrap();

    assert_eq!(stats.total_participants, 2);
    assert_eq!(stats.total_badges, 16);
    assert_eq!(stats.total_points, 15);
    assert_eq!(stats.total_labs, 3);
    assert_eq!(stats.tier_distribution[&Tier::CloudPro], 1);
    assert_eq!(stats.tier_distribution[&Tier::CloudBeginner], 1);
    assert_eq!(stats.tier_distribution[&Tier::Newcomer], 0);
  }
}
