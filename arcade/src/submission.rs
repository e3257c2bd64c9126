//! Interactive submission of one profile URL, plus the fetch policy (timeout
//! race, bounded retries) it shares with batch refreshes.

use std::fmt;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::debug;
use log::info;
use log::warn;
use thiserror::Error;

use crate::common::ParticipantId;
use crate::common::ProfileMetrics;
use crate::config::Config;
use crate::error::Error;
use crate::leaderboard::Leaderboard;
use crate::leaderboard::ProgressUpdate;
use crate::profile::fetching::validate_profile_url;
use crate::profile::fetching::ProfileFetcher;
use crate::profile::fetching::ProfileUrl;
use crate::profile::parsing::parse_profile;
use crate::store::ParticipantStore;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SubmissionStage {
  Idle,
  ValidatingUrl,
  Fetching,
  Parsing,
  DedupCheck,
  Inserting,
  Updating,
  Done,
  Failed,
}

impl fmt::Display for SubmissionStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Idle => "idle",
      Self::ValidatingUrl => "validating-url",
      Self::Fetching => "fetching",
      Self::Parsing => "parsing",
      Self::DedupCheck => "dedup-check",
      Self::Inserting => "inserting",
      Self::Updating => "updating",
      Self::Done => "done",
      Self::Failed => "failed",
    })
  }
}

/// A submission that ended in `SubmissionStage::Failed`, with the stage it
/// failed in.
#[derive(Debug, Error)]
#[error("submission failed while {stage}: {source}")]
pub struct SubmissionError {
  pub stage: SubmissionStage,
  #[source]
  pub source: Error,
}

#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
  Inserted {
    id: ParticipantId,
    metrics: ProfileMetrics,
  },
  /// The profile was already on the leaderboard. Not a failure: shown as a
  /// "welcome back" with the progress made since the last visit.
  Updated(ProgressUpdate),
}

/// How a single profile fetch is bounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchPolicy {
  pub timeout: Duration,
  pub max_attempts: u32,
  /// Waited `backoff * attempt` after each failed attempt.
  pub backoff: Duration,
}

impl FetchPolicy {
  #[must_use]
  pub fn from_config(config: &Config) -> Self {
    Self {
      timeout: config.fetch.timeout(),
      max_attempts: config.refresh.max_attempts,
      backoff: Duration::from_millis(config.refresh.retry_backoff_millis),
    }
  }

  /// Runs `operation` until it succeeds, fails for good or runs out of
  /// attempts.
  pub fn retry<T>(
    &self,
    is_retryable: impl Fn(&Error) -> bool,
    mut operation: impl FnMut() -> Result<T, Error>,
  ) -> Result<T, Error> {
    let max_attempts = self.max_attempts.max(1);

    let mut attempt = 1;
    loop {
      match operation() {
        Ok(value) => return Ok(value),
        Err(error) if attempt < max_attempts && is_retryable(&error) => {
          let delay = self.backoff * attempt;
          warn!("Attempt {attempt}/{max_attempts} failed ({error}), retrying in {delay:?}.");
          thread::sleep(delay);
          attempt += 1;
        }
        Err(error) => return Err(error),
      }
    }
  }
}

/// One fetch raced against `timeout`.
///
/// NOTE: A fetch that loses the race keeps running on its own thread and its
/// result is dropped.
pub fn fetch_with_timeout(
  fetcher: &Arc<dyn ProfileFetcher>,
  profile_url: &ProfileUrl,
  timeout: Duration,
) -> Result<String, Error> {
  let (sender, receiver) = mpsc::channel();
  let fetcher = Arc::clone(fetcher);
  let url = profile_url.clone();
  thread::spawn(move || {
    // NOTE: The receiver is gone when the race was already lost.
    let _ = sender.send(fetcher.fetch(&url));
  });

  match receiver.recv_timeout(timeout) {
    Ok(markup) => Ok(markup?),
    Err(_) => Err(Error::Timeout {
      url: String::from(profile_url.as_str()),
      after: timeout,
    }),
  }
}

/// Fetch with timeout, retried on network failures.
pub fn fetch_markup(
  fetcher: &Arc<dyn ProfileFetcher>,
  profile_url: &ProfileUrl,
  policy: &FetchPolicy,
) -> Result<String, Error> {
  policy.retry(Error::is_transient, || {
    fetch_with_timeout(fetcher, profile_url, policy.timeout)
  })
}

pub struct Submitter<'a, S> {
  leaderboard: &'a Leaderboard<S>,
  fetcher: Arc<dyn ProfileFetcher>,
  policy: FetchPolicy,
}

impl<'a, S: ParticipantStore> Submitter<'a, S> {
  pub fn new(
    leaderboard: &'a Leaderboard<S>,
    fetcher: Arc<dyn ProfileFetcher>,
    policy: FetchPolicy,
  ) -> Self {
    Self {
      leaderboard,
      fetcher,
      policy,
    }
  }

  pub fn submit(&self, raw_url: &str) -> Result<SubmissionOutcome, SubmissionError> {
    self.submit_with(raw_url, |_| {})
  }

  /// Like `submit`, reporting every stage entered to `on_stage`.
  pub fn submit_with(
    &self,
    raw_url: &str,
    mut on_stage: impl FnMut(SubmissionStage),
  ) -> Result<SubmissionOutcome, SubmissionError> {
    let mut stage = SubmissionStage::Idle;
    on_stage(stage);

    let result = self.run(raw_url, &mut |next| {
      debug!("Submission of {raw_url}: {stage} -> {next}");
      stage = next;
      on_stage(next);
    });

    match result {
      Ok(outcome) => {
        on_stage(SubmissionStage::Done);
        Ok(outcome)
      }
      Err(source) => {
        warn!("Submission of {raw_url} failed while {stage}: {source}");
        on_stage(SubmissionStage::Failed);
        Err(SubmissionError { stage, source })
      }
    }
  }

  fn run(
    &self,
    raw_url: &str,
    enter: &mut dyn FnMut(SubmissionStage),
  ) -> Result<SubmissionOutcome, Error> {
    enter(SubmissionStage::ValidatingUrl);
    let profile_url = validate_profile_url(raw_url)?;

    enter(SubmissionStage::Fetching);
    let markup = fetch_markup(&self.fetcher, &profile_url, &self.policy)?;

    enter(SubmissionStage::Parsing);
    let metrics = parse_profile(&markup);
    info!(
      "Fetched {} ({} badges, {} points, {} labs, {}).",
      metrics.name,
      metrics.badges_earned,
      metrics.points,
      metrics.labs_completed,
      metrics.league,
    );

    enter(SubmissionStage::DedupCheck);
    match self.leaderboard.get_existing(profile_url.as_str())? {
      Some(existing) => {
        enter(SubmissionStage::Updating);
        info!("{} is back, updating {}.", metrics.name, existing.id);
        let update = self.leaderboard.update_progress(&existing, &metrics)?;
        Ok(SubmissionOutcome::Updated(update))
      }
      None => {
        enter(SubmissionStage::Inserting);
        let id = self.leaderboard.insert(profile_url.as_str(), &metrics)?;
        Ok(SubmissionOutcome::Inserted { id, metrics })
      }
    }
  }
}
