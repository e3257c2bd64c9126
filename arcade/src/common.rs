use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::DateTime;
use chrono::Datelike;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde::Serialize;

use crate::scoring;

pub type ParticipantId = String;

pub const UNKNOWN_NAME: &str = "Unknown User";

/// Externally assigned league, scraped from the profile. Declaration order is
/// league rank.
#[must_use]
#[derive(
  Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
  Deserialize,
)]
pub enum League {
  #[default]
  Bronze,
  Silver,
  Gold,
  Platinum,
  Diamond,
}

impl League {
  pub const ALL: [Self; 5] = [
    Self::Bronze,
    Self::Silver,
    Self::Gold,
    Self::Platinum,
    Self::Diamond,
  ];

  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Bronze => "Bronze",
      Self::Silver => "Silver",
      Self::Gold => "Gold",
      Self::Platinum => "Platinum",
      Self::Diamond => "Diamond",
    }
  }
}

impl fmt::Display for League {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for League {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    Self::ALL
      .into_iter()
      .find(|league| league.as_str().eq_ignore_ascii_case(s))
      .ok_or(())
  }
}

/// Our own classification. Declaration order is tier rank so rules can only
/// ever raise it with `max`.
#[must_use]
#[derive(
  Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
  Deserialize,
)]
pub enum Tier {
  #[default]
  Newcomer,
  #[serde(rename = "Cloud Beginner")]
  CloudBeginner,
  #[serde(rename = "Cloud Explorer")]
  CloudExplorer,
  #[serde(rename = "Cloud Pro")]
  CloudPro,
}

impl Tier {
  pub const ALL: [Self; 4] = [
    Self::Newcomer,
    Self::CloudBeginner,
    Self::CloudExplorer,
    Self::CloudPro,
  ];

  #[must_use]
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Newcomer => "Newcomer",
      Self::CloudBeginner => "Cloud Beginner",
      Self::CloudExplorer => "Cloud Explorer",
      Self::CloudPro => "Cloud Pro",
    }
  }
}

impl fmt::Display for Tier {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Tier {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    Self::ALL
      .into_iter()
      .find(|tier| tier.as_str().eq_ignore_ascii_case(s))
      .ok_or(())
  }
}

/// The path-embedded id of a public profile. Host independent, lowercase.
#[must_use]
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProfileId(String);

impl ProfileId {
  /// Captures the id following `/public_profiles/` anywhere in `url`.
  #[must_use]
  pub fn from_url(url: &str) -> Option<Self> {
    static PROFILE_ID: OnceLock<Regex> = OnceLock::new();
    let re = PROFILE_ID.get_or_init(|| {
      Regex::new(r"(?i)/public_profiles/([a-f0-9-]+)").unwrap()
    });

    re.captures(url)
      .and_then(|captures| captures.get(1))
      .map(|id| id.as_str().trim_matches('-'))
      .filter(|id| !id.is_empty())
      .map(|id| Self(id.to_ascii_lowercase()))
  }

  #[must_use]
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ProfileId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// What the parser could read from one profile page.
#[must_use]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileMetrics {
  pub name: String,
  pub league: League,
  pub points: u64,
  pub badges_earned: u64,
  pub labs_completed: u64,
  pub member_since: String,
  pub tier: Tier,
  pub ranking_score: u64,
  pub avatar: String,
}

impl ProfileMetrics {
  /// Derives tier, ranking score and avatar from the scraped values.
  pub fn new(
    name: &str,
    league: League,
    points: u64,
    badges_earned: u64,
    labs_completed: u64,
    member_since: &str,
  ) -> Self {
    Self {
      name: String::from(name),
      league,
      points,
      badges_earned,
      labs_completed,
      member_since: String::from(member_since),
      tier: scoring::derive_tier(badges_earned, points, league),
      ranking_score: scoring::ranking_score(
        badges_earned,
        points,
        labs_completed,
      ),
      avatar: scoring::avatar_for(name),
    }
  }

  /// Fully defaulted metrics, used when nothing could be read.
  pub fn unknown() -> Self {
    Self::new(UNKNOWN_NAME, League::Bronze, 0, 0, 0, &current_year())
  }

  #[must_use]
  pub fn has_unknown_name(&self) -> bool {
    self.name == UNKNOWN_NAME
  }
}

#[must_use]
pub fn current_year() -> String {
  Utc::now().year().to_string()
}

/// One net-positive re-submission. Totals are the values after the change.
#[must_use]
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
  pub date: DateTime<Utc>,
  pub badge_progress: i64,
  pub point_progress: i64,
  pub lab_progress: i64,
  pub total_badges: u64,
  pub total_points: u64,
  pub total_labs: u64,
}

#[must_use]
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressInfo {
  pub badge_progress: i64,
  pub point_progress: i64,
  pub lab_progress: i64,
  pub has_progress: bool,
}

impl ProgressInfo {
  pub fn between(old: &ProfileMetrics, new: &ProfileMetrics) -> Self {
    let badge_progress = delta(old.badges_earned, new.badges_earned);
    let point_progress = delta(old.points, new.points);
    let lab_progress = delta(old.labs_completed, new.labs_completed);

    Self {
      badge_progress,
      point_progress,
      lab_progress,
      has_progress: badge_progress > 0 || point_progress > 0 || lab_progress > 0,
    }
  }
}

#[must_use]
#[allow(clippy::cast_possible_wrap)]
fn delta(old: u64, new: u64) -> i64 {
  // NOTE: Counts come from scraped pages and never get near `i64::MAX`.
  (new as i64).saturating_sub(old as i64)
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
  pub id: ParticipantId,
  pub profile_url: String,
  pub metrics: ProfileMetrics,
  pub created_at: Option<DateTime<Utc>>,
  pub updated_at: Option<DateTime<Utc>>,
  pub progress_history: Vec<ProgressEntry>,
}

impl Participant {
  #[must_use]
  pub fn profile_id(&self) -> Option<ProfileId> {
    ProfileId::from_url(&self.profile_url)
  }
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedParticipant {
  pub place: usize,
  pub participant: Participant,
}
