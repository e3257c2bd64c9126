//! The participant collection.
//!
//! Storage itself is a collaborator behind `ParticipantStore`; this module
//! owns the persisted document shape and the coercion applied whenever a
//! document crosses into or out of the store.

mod coercion;
pub mod memory;

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::common::current_year;
use crate::common::League;
use crate::common::Participant;
use crate::common::ParticipantId;
use crate::common::ProfileMetrics;
use crate::common::ProgressEntry;
use crate::common::Tier;
use crate::common::UNKNOWN_NAME;
use crate::error::StoreError;

/// Persisted shape of a participant. Every field reads leniently.
#[must_use]
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParticipantRecord {
  #[serde(deserialize_with = "coercion::text")]
  pub name: Option<String>,
  #[serde(deserialize_with = "coercion::league")]
  pub league: League,
  #[serde(deserialize_with = "coercion::count")]
  pub points: u64,
  #[serde(deserialize_with = "coercion::count")]
  pub badges_earned: u64,
  #[serde(deserialize_with = "coercion::count")]
  pub labs_completed: u64,
  /// Kept for readers of the raw collection. Never trusted on read.
  #[serde(deserialize_with = "coercion::tier")]
  pub tier: Option<Tier>,
  #[serde(deserialize_with = "coercion::count")]
  pub ranking_score: u64,
  #[serde(deserialize_with = "coercion::text")]
  pub member_since: Option<String>,
  #[serde(deserialize_with = "coercion::text")]
  pub avatar: Option<String>,
  #[serde(deserialize_with = "coercion::text")]
  pub profile_url: Option<String>,
  #[serde(deserialize_with = "coercion::timestamp")]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(deserialize_with = "coercion::timestamp")]
  pub updated_at: Option<DateTime<Utc>>,
  #[serde(deserialize_with = "coercion::history")]
  pub progress_history: Vec<ProgressEntry>,
}

impl ParticipantRecord {
  pub fn new(profile_url: &str, metrics: &ProfileMetrics) -> Self {
    Self {
      profile_url: Some(String::from(profile_url)),
      ..Self::default()
    }
    .with_metrics(metrics)
  }

  pub fn with_metrics(self, metrics: &ProfileMetrics) -> Self {
    Self {
      name: Some(metrics.name.clone()),
      league: metrics.league,
      points: metrics.points,
      badges_earned: metrics.badges_earned,
      labs_completed: metrics.labs_completed,
      tier: Some(metrics.tier),
      ranking_score: metrics.ranking_score,
      member_since: Some(metrics.member_since.clone()),
      avatar: Some(metrics.avatar.clone()),
      ..self
    }
  }

  /// Fills the gaps a stored document may have. Tier and ranking score are
  /// derived again from the counts.
  pub fn into_participant(self, id: ParticipantId) -> Participant {
    let name = self.name.unwrap_or_else(|| String::from(UNKNOWN_NAME));
    let mut metrics = ProfileMetrics::new(
      &name,
      self.league,
      self.points,
      self.badges_earned,
      self.labs_completed,
      &self.member_since.unwrap_or_else(current_year),
    );
    if let Some(avatar) = self.avatar {
      metrics.avatar = avatar;
    }

    Participant {
      id,
      profile_url: self.profile_url.unwrap_or_default(),
      metrics,
      created_at: self.created_at,
      updated_at: self.updated_at,
      progress_history: self.progress_history,
    }
  }
}

impl From<&Participant> for ParticipantRecord {
  fn from(participant: &Participant) -> Self {
    Self {
      created_at: participant.created_at,
      updated_at: participant.updated_at,
      progress_history: participant.progress_history.clone(),
      ..Self::new(&participant.profile_url, &participant.metrics)
    }
  }
}

/// Every document of the collection with its id.
pub type Snapshot = Vec<(ParticipantId, ParticipantRecord)>;

/// Receives the full collection after every change. Errors are delivered
/// through the same callback and do not end the subscription.
pub type Listener = Arc<dyn Fn(Result<Snapshot, StoreError>) + Send + Sync>;

#[must_use]
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct WatchId(pub u64);

/// A keyed document collection with change notifications.
///
/// Creation and update timestamps are assigned by the store, not the caller.
pub trait ParticipantStore: Send + Sync {
  /// Every document in legacy order: badges and labs descending, then name.
  fn list(&self) -> Result<Snapshot, StoreError>;
  fn get(&self, id: &str) -> Result<Option<ParticipantRecord>, StoreError>;
  /// Stamps `createdAt` and `updatedAt`.
  fn add(&self, record: ParticipantRecord) -> Result<ParticipantId, StoreError>;
  /// Keeps the stored `createdAt` and stamps `updatedAt`.
  fn update(&self, id: &str, record: ParticipantRecord) -> Result<(), StoreError>;
  fn delete(&self, id: &str) -> Result<(), StoreError>;
  /// Delivers the current snapshot right away and again after each change.
  fn watch(&self, listener: Listener) -> WatchId;
  fn unwatch(&self, watch: WatchId);
}

macro_rules! forward_store {
  ($($pointer:ty),*) => {$(
    impl<T: ParticipantStore + ?Sized> ParticipantStore for $pointer {
      fn list(&self) -> Result<Snapshot, StoreError> {
        (**self).list()
      }
      fn get(&self, id: &str) -> Result<Option<ParticipantRecord>, StoreError> {
        (**self).get(id)
      }
      fn add(&self, record: ParticipantRecord) -> Result<ParticipantId, StoreError> {
        (**self).add(record)
      }
      fn update(&self, id: &str, record: ParticipantRecord) -> Result<(), StoreError> {
        (**self).update(id, record)
      }
      fn delete(&self, id: &str) -> Result<(), StoreError> {
        (**self).delete(id)
      }
      fn watch(&self, listener: Listener) -> WatchId {
        (**self).watch(listener)
      }
      fn unwatch(&self, watch: WatchId) {
        (**self).unwatch(watch);
      }
    }
  )*};
}

forward_store!(&T, Arc<T>, Box<T>);

/// Legacy read order, used for non-live reads.
#[must_use]
pub fn legacy_order(
  (a_id, a): &(ParticipantId, ParticipantRecord),
  (b_id, b): &(ParticipantId, ParticipantRecord),
) -> Ordering {
  b.badges_earned
    .cmp(&a.badges_earned)
    .then_with(|| b.labs_completed.cmp(&a.labs_completed))
    .then_with(|| a.name.cmp(&b.name))
    .then_with(|| a_id.cmp(b_id))
}
