//! Derived values: tier, ranking score, badge estimate and avatar.
//!
//! The parser and the ranking engine both go through `derive_tier` so a tier
//! read back from storage can always be recomputed from its inputs.

use crate::common::League;
use crate::common::Tier;

const BADGE_WEIGHT: u64 = 1000;
const POINT_WEIGHT: u64 = 10;
const LAB_WEIGHT: u64 = 1;

const AVATAR_BASE_URL: &str = "https://ui-avatars.com/api/";
const AVATAR_PALETTE: [&str; 4] = ["4285F4", "0F9D58", "F4B400", "DB4437"];

/// Badge rule, then league rule, then points rule. League and points each
/// set a floor, so a later rule may only raise the tier.
pub fn derive_tier(badges_earned: u64, points: u64, league: League) -> Tier {
  let by_badges = match badges_earned {
    15.. => Tier::CloudPro,
    8..=14 => Tier::CloudExplorer,
    3..=7 => Tier::CloudBeginner,
    _ => Tier::Newcomer,
  };

  // NOTE: Gold and Platinum lift beginners too, which keeps the tier
  // monotonic in badges.
  let league_floor = match league {
    League::Diamond => Tier::CloudPro,
    League::Platinum | League::Gold => Tier::CloudExplorer,
    League::Silver => Tier::CloudBeginner,
    League::Bronze => Tier::Newcomer,
  };

  let points_floor = match points {
    1000.. => Tier::CloudPro,
    500..=999 => Tier::CloudExplorer,
    150..=499 => Tier::CloudBeginner,
    _ => Tier::Newcomer,
  };

  by_badges.max(league_floor).max(points_floor)
}

/// Display value only. Ordering compares the fields one by one.
#[must_use]
pub fn ranking_score(
  badges_earned: u64,
  points: u64,
  labs_completed: u64,
) -> u64 {
  badges_earned
    .saturating_mul(BADGE_WEIGHT)
    .saturating_add(points.saturating_mul(POINT_WEIGHT))
    .saturating_add(labs_completed.saturating_mul(LAB_WEIGHT))
}

/// Last-resort badge count for pages where no badge markup was recognised.
/// Low confidence.
#[must_use]
pub fn estimate_badges(league: League, points: u64) -> u64 {
  let (divisor, floor) = match league {
    League::Bronze => (50, 0),
    League::Silver => (60, 1),
    League::Gold => (70, 3),
    League::Platinum => (80, 6),
    League::Diamond => (90, 10),
  };

  (points / divisor).max(floor)
}

/// Initials avatar whose colour is picked from the name, so the same name
/// always renders the same image.
#[must_use]
pub fn avatar_for(name: &str) -> String {
  let shade = name
    .bytes()
    .fold(0usize, |acc, byte| acc.wrapping_mul(31).wrapping_add(byte.into()))
    % AVATAR_PALETTE.len();
  let encoded_name: String =
    url::form_urlencoded::byte_serialize(name.trim().as_bytes()).collect();

  format!(
    "{AVATAR_BASE_URL}?name={encoded_name}&background={background}&color=ffffff&bold=true",
    background = AVATAR_PALETTE[shade],
  )
}
