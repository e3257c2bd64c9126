//! Profile page scraping.
//!
//! The page markup is not under our control and has changed shape several
//! times, so every field is read by an ordered list of strategies. The first
//! strategy that produces a value wins; adding a heuristic means appending a
//! strategy, never rewriting the others.

use std::sync::OnceLock;

use log::debug;
use log::warn;
use regex::Regex;

use crate::common::current_year;
use crate::common::League;
use crate::common::ProfileMetrics;
use crate::common::UNKNOWN_NAME;
use crate::scoring::estimate_badges;

// NOTE: Compared against lowercased markup. Pages have used every one of
// these apostrophe spellings at some point.
const NO_BADGES_NOTICES: [&str; 7] = [
  "hasn't earned any badges yet",
  "hasn&#39;t earned any badges yet",
  "hasn&#039;t earned any badges yet",
  "hasn&#x27;t earned any badges yet",
  "hasn&apos;t earned any badges yet",
  "hasn\u{2019}t earned any badges yet",
  "no badges earned",
];

/// Which badge strategy produced the count.
#[must_use]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BadgeSource {
  NoBadgesNotice,
  BadgeContainers,
  EarnedDates,
  BadgeCards,
  Estimate,
}

impl BadgeSource {
  #[must_use]
  pub fn is_low_confidence(self) -> bool {
    self == Self::Estimate
  }
}

/// How a parse went: which fields fell back to defaults and where the badge
/// count came from.
#[must_use]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParseReport {
  pub defaulted: Vec<&'static str>,
  pub badge_source: BadgeSource,
}

impl ParseReport {
  #[must_use]
  pub fn is_degraded(&self) -> bool {
    !self.defaulted.is_empty() || self.badge_source.is_low_confidence()
  }
}

struct Strategy<T> {
  name: &'static str,
  extract: fn(&str) -> Option<T>,
}

struct BadgeInput<'a> {
  markup: &'a str,
  league: League,
  points: u64,
}

struct BadgeStrategy {
  source: BadgeSource,
  extract: fn(&BadgeInput<'_>) -> Option<u64>,
}

const NAME_STRATEGIES: [Strategy<String>; 2] = [
  Strategy {
    name: "title",
    extract: name_from_title,
  },
  Strategy {
    name: "heading",
    extract: name_from_heading,
  },
];

const LEAGUE_STRATEGIES: [Strategy<League>; 1] = [Strategy {
  name: "league-label",
  extract: league_from_label,
}];

const POINTS_STRATEGIES: [Strategy<u64>; 1] = [Strategy {
  name: "points-label",
  extract: points_from_label,
}];

const LABS_STRATEGIES: [Strategy<u64>; 1] = [Strategy {
  name: "completed-label",
  extract: labs_from_label,
}];

const MEMBER_SINCE_STRATEGIES: [Strategy<String>; 1] = [Strategy {
  name: "member-since",
  extract: member_since_year,
}];

// NOTE: Order matters. The notice check must stay first as it overrides all
// the counting heuristics, and the estimate must stay last.
const BADGE_STRATEGIES: [BadgeStrategy; 5] = [
  BadgeStrategy {
    source: BadgeSource::NoBadgesNotice,
    extract: badges_from_notice,
  },
  BadgeStrategy {
    source: BadgeSource::BadgeContainers,
    extract: badges_from_containers,
  },
  BadgeStrategy {
    source: BadgeSource::EarnedDates,
    extract: badges_from_earned_dates,
  },
  BadgeStrategy {
    source: BadgeSource::BadgeCards,
    extract: badges_from_cards,
  },
  BadgeStrategy {
    source: BadgeSource::Estimate,
    extract: badges_from_estimate,
  },
];

/// Never fails. Whatever can't be read is defaulted and a warning is logged.
pub fn parse_profile(markup: &str) -> ProfileMetrics {
  let (metrics, report) = parse_profile_with_report(markup);

  if report.is_degraded() {
    warn!(
      "Profile of {:?} parsed with defaults for {:?} (badges from {:?}).",
      metrics.name, report.defaulted, report.badge_source,
    );
  }

  metrics
}

pub fn parse_profile_with_report(markup: &str) -> (ProfileMetrics, ParseReport) {
  let mut defaulted = vec![];
  let mut field = |name: &'static str, found: bool| {
    if !found {
      defaulted.push(name);
    }
  };

  let name = first_match(&NAME_STRATEGIES, markup);
  field("name", name.is_some());
  let league = first_match(&LEAGUE_STRATEGIES, markup);
  field("league", league.is_some());
  let points = first_match(&POINTS_STRATEGIES, markup);
  field("points", points.is_some());
  let labs_completed = first_match(&LABS_STRATEGIES, markup);
  field("labsCompleted", labs_completed.is_some());
  let member_since = first_match(&MEMBER_SINCE_STRATEGIES, markup);
  field("memberSince", member_since.is_some());

  let name = name.unwrap_or_else(|| String::from(UNKNOWN_NAME));
  let league = league.unwrap_or_default();
  let points = points.unwrap_or(0);

  let input = BadgeInput {
    markup,
    league,
    points,
  };
  let (badge_source, badges_earned) = BADGE_STRATEGIES
    .iter()
    .find_map(|strategy| {
      (strategy.extract)(&input).map(|count| (strategy.source, count))
    })
    // NOTE: Unreachable as the estimate always answers.
    .unwrap_or((BadgeSource::Estimate, 0));
  debug!("Badges of {name:?}: {badges_earned} ({badge_source:?}).");

  let metrics = ProfileMetrics::new(
    &name,
    league,
    points,
    badges_earned,
    labs_completed.unwrap_or(0),
    &member_since.unwrap_or_else(current_year),
  );

  (
    metrics,
    ParseReport {
      defaulted,
      badge_source,
    },
  )
}

fn first_match<T>(strategies: &[Strategy<T>], markup: &str) -> Option<T> {
  strategies.iter().find_map(|strategy| {
    let value = (strategy.extract)(markup);
    if value.is_some() {
      debug!("Matched by {:?}.", strategy.name);
    }
    value
  })
}

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
  cell.get_or_init(|| Regex::new(pattern).unwrap())
}

fn capture<'a>(re: &Regex, markup: &'a str) -> Option<&'a str> {
  re.captures(markup)
    .and_then(|captures| captures.get(1))
    .map(|m| m.as_str())
}

/// Counts like `1,250`. Anything that doesn't fit a `u64` is treated as
/// unreadable.
fn parse_count(digits: &str) -> Option<u64> {
  digits.replace(',', "").parse().ok()
}

fn clean_text(text: &str) -> Option<String> {
  let decoded = text
    .replace("&nbsp;", " ")
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&#039;", "'")
    .replace("&#x27;", "'")
    .replace("&apos;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&");
  let collapsed = decoded.split_whitespace().collect::<Vec<_>>().join(" ");

  (!collapsed.is_empty()).then_some(collapsed)
}

fn name_from_title(markup: &str) -> Option<String> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(
    &RE,
    r"(?is)<title[^>]*>\s*([^|<]+?)\s*\|\s*Google(?:\s+Cloud)?\s+Skills(?:\s+Boost)?\s*</title>",
  );
  capture(re, markup).and_then(clean_text)
}

fn name_from_heading(markup: &str) -> Option<String> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(&RE, r"(?is)<h[1-6][^>]*>([^<]*)</h[1-6]>");
  re.captures_iter(markup)
    .filter_map(|captures| captures.get(1))
    .find_map(|m| clean_text(m.as_str()))
}

fn league_from_label(markup: &str) -> Option<League> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(&RE, r"(?i)\b(Bronze|Silver|Gold|Platinum|Diamond)\s+League\b");
  capture(re, markup).and_then(|league| league.parse().ok())
}

fn points_from_label(markup: &str) -> Option<u64> {
  static RE: OnceLock<Regex> = OnceLock::new();
  // NOTE: The number may be wrapped in its own element, e.g.
  // `<strong>1,250</strong> points`.
  let re = cached(&RE, r"(?i)\b(\d[\d,]*)\s*(?:<[^>]*>\s*)*points?\b");
  capture(re, markup).and_then(parse_count)
}

fn labs_from_label(markup: &str) -> Option<u64> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(
    &RE,
    r"(?i)\b(\d[\d,]*)\s*(?:<[^>]*>\s*)*(?:labs?|quests?)\s+completed\b",
  );
  capture(re, markup).and_then(parse_count)
}

fn member_since_year(markup: &str) -> Option<String> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(&RE, r"(?i)\bMember\s+since\s+(\d{4})\b");
  capture(re, markup).map(String::from)
}

fn badges_from_notice(input: &BadgeInput<'_>) -> Option<u64> {
  let lowercase = input.markup.to_lowercase();
  NO_BADGES_NOTICES
    .iter()
    .any(|notice| lowercase.contains(notice))
    .then_some(0)
}

fn count_nonzero(re: &Regex, markup: &str) -> Option<u64> {
  let count = re.find_iter(markup).count() as u64;
  (count > 0).then_some(count)
}

fn badges_from_containers(input: &BadgeInput<'_>) -> Option<u64> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(
    &RE,
    r#"(?i)class\s*=\s*["'](?:[^"']*\s)?profile-badge(?:\s[^"']*)?["']"#,
  );
  count_nonzero(re, input.markup)
}

fn badges_from_earned_dates(input: &BadgeInput<'_>) -> Option<u64> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(
    &RE,
    r"(?i)\bEarned\s+(?:(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\.?\s+\d{1,2},?\s+\d{4}|\d{4}-\d{2}-\d{2})",
  );
  count_nonzero(re, input.markup)
}

fn badges_from_cards(input: &BadgeInput<'_>) -> Option<u64> {
  static RE: OnceLock<Regex> = OnceLock::new();
  let re = cached(
    &RE,
    r#"(?i)class\s*=\s*["'](?:[^"']*\s)?badge-(?:card|tile|item)(?:\s[^"']*)?["']"#,
  );
  count_nonzero(re, input.markup)
}

#[allow(clippy::unnecessary_wraps)]
fn badges_from_estimate(input: &BadgeInput<'_>) -> Option<u64> {
  Some(estimate_badges(input.league, input.points))
}
