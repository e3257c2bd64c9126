use std::cmp::Ordering;

use chrono::DateTime;
use chrono::Utc;
use itertools::Itertools;

use crate::common::Participant;
use crate::common::RankedParticipant;
use crate::scoring::derive_tier;
use crate::scoring::ranking_score;

/// Orders participants and hands out places `1..=n`.
///
/// Stored tiers are never trusted: the rules changed over time, so the tier is
/// derived again from badges, points and league before anything is shown.
/// Counts are already non-negative integers by the time a `Participant`
/// exists (see `store::ParticipantRecord`).
pub fn rank(participants: Vec<Participant>) -> Vec<RankedParticipant> {
  participants
    .into_iter()
    .map(|mut participant| {
      let metrics = &mut participant.metrics;
      metrics.tier =
        derive_tier(metrics.badges_earned, metrics.points, metrics.league);
      metrics.ranking_score = ranking_score(
        metrics.badges_earned,
        metrics.points,
        metrics.labs_completed,
      );
      participant
    })
    .sorted_by(ranking_order)
    .enumerate()
    .map(|(i, participant)| RankedParticipant {
      place: i + 1,
      participant,
    })
    .collect()
}

/// Badges, points and labs descending, then earliest sign-up, then name.
///
/// Compared field by field rather than through the weighted ranking score so
/// no amount of points ever outweighs a badge.
#[must_use]
pub fn ranking_order(a: &Participant, b: &Participant) -> Ordering {
  let (x, y) = (&a.metrics, &b.metrics);

  let mut ordering = y.badges_earned.cmp(&x.badges_earned);
  if ordering != Ordering::Equal {
    return ordering;
  }

  ordering = y.points.cmp(&x.points);
  if ordering != Ordering::Equal {
    return ordering;
  }

  ordering = y.labs_completed.cmp(&x.labs_completed);
  if ordering != Ordering::Equal {
    return ordering;
  }

  ordering = earliest_first(a.created_at, b.created_at);
  if ordering != Ordering::Equal {
    return ordering;
  }

  ordering = x
    .name
    .to_lowercase()
    .cmp(&y.name.to_lowercase())
    .then_with(|| x.name.cmp(&y.name));
  if ordering != Ordering::Equal {
    return ordering;
  }

  // NOTE: Only reachable for same-named duplicates. Keeps the order total
  // regardless of input order.
  a.id.cmp(&b.id)
}

/// Known timestamps before unknown ones.
fn earliest_first(
  a: Option<DateTime<Utc>>,
  b: Option<DateTime<Utc>>,
) -> Ordering {
  match (a, b) {
    (Some(a), Some(b)) => a.cmp(&b),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}
