use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::common::ParticipantId;

/// Rejected input. Never retried.
#[derive(Debug, Error)]
pub enum ValidationError {
  #[error("profile URL is empty")]
  EmptyUrl,
  #[error("malformed profile URL {url:?}: {source}")]
  MalformedUrl {
    url: String,
    #[source]
    source: url::ParseError,
  },
  #[error("unsupported URL scheme {scheme:?}")]
  UnsupportedScheme { scheme: String },
  #[error("unsupported profile host {host:?}")]
  UnsupportedHost { host: String },
  #[error("URL {url:?} is not a public profile URL")]
  MissingProfilePath { url: String },
  #[error("participant is missing required field `{0}`")]
  MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("building HTTP client failed: {0}")]
  Client(#[source] reqwest::Error),
  #[error("request for {url} failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },
  #[error("{url} responded with status {status}")]
  Status { url: String, status: u16 },
  #[error("invalid relay URL {relay:?}: {source}")]
  Relay {
    relay: String,
    #[source]
    source: url::ParseError,
  },
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("permission denied: {0}")]
  PermissionDenied(String),
  #[error("store unavailable: {0}")]
  Unavailable(String),
  #[error("participant {0} not found")]
  NotFound(ParticipantId),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error(transparent)]
  Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("reading config {path:?} failed: {source}")]
  Io {
    path: String,
    #[source]
    source: io::Error,
  },
  #[error("parsing config {path:?} failed: {source}")]
  Json {
    path: String,
    #[source]
    source: serde_json::Error,
  },
}

#[derive(Debug, Error)]
pub enum ImportError {
  #[error("no profile URL column, expected one of {expected:?}")]
  MissingColumn { expected: &'static [&'static str] },
  #[error(transparent)]
  Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Validation(#[from] ValidationError),
  #[error(transparent)]
  Fetch(#[from] FetchError),
  #[error("fetching {url} timed out after {after:?}")]
  Timeout { url: String, after: Duration },
  #[error(transparent)]
  Store(#[from] StoreError),
}

impl Error {
  /// Network level failures that are worth another attempt: transport
  /// errors, timeouts, throttling and server errors. A missing profile or a
  /// broken relay configuration fails the same way every time.
  #[must_use]
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Timeout { .. } | Self::Fetch(FetchError::Request { .. }) => true,
      Self::Fetch(FetchError::Status { status, .. }) => {
        *status == 429 || (500..600).contains(status)
      }
      _ => false,
    }
  }

  /// Batch runs also retry a store that is temporarily unreachable, unlike
  /// interactive submissions which report it straight away.
  #[must_use]
  pub fn is_retryable_in_batch(&self) -> bool {
    self.is_transient()
      || matches!(
        self,
        Self::Store(StoreError::Unavailable(_) | StoreError::Io(_))
      )
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::Error;
  use super::FetchError;
  use super::StoreError;
  use super::ValidationError;

  #[test]
  fn test_retry_classification() {
    let timeout = Error::Timeout {
      url: String::from("https://www.skills.google/public_profiles/ab12"),
      after: Duration::from_secs(15),
    };
    assert!(timeout.is_transient());
    assert!(timeout.is_retryable_in_batch());

    let status = |status| {
      Error::from(FetchError::Status {
        url: String::from("https://www.skills.google/public_profiles/ab12"),
        status,
      })
    };
    assert!(status(503).is_transient());
    assert!(status(500).is_transient());
    assert!(status(429).is_transient());
    assert!(!status(404).is_transient());
    assert!(!status(403).is_transient());
    assert!(!status(404).is_retryable_in_batch());

    let relay = Error::from(FetchError::Relay {
      relay: String::from("not a url"),
      source: url::ParseError::RelativeUrlWithoutBase,
    });
    assert!(!relay.is_transient());
    assert!(!relay.is_retryable_in_batch());

    let validation = Error::from(ValidationError::EmptyUrl);
    assert!(!validation.is_transient());
    assert!(!validation.is_retryable_in_batch());

    let unavailable =
      Error::from(StoreError::Unavailable(String::from("offline")));
    assert!(!unavailable.is_transient());
    assert!(unavailable.is_retryable_in_batch());

    let denied =
      Error::from(StoreError::PermissionDenied(String::from("read-only")));
    assert!(!denied.is_retryable_in_batch());
  }
}
