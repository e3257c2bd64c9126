use std::fmt;
use std::time::Duration;

use itertools::Itertools;
use log::debug;
use reqwest::blocking::Client;
use url::Url;

use crate::common::ProfileId;
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::error::ValidationError;

/// Old and new domains of the learning platform.
pub const ACCEPTED_HOSTS: [&str; 4] = [
  "www.cloudskillsboost.google",
  "cloudskillsboost.google",
  "www.skills.google",
  "skills.google",
];

const PROFILE_PATH_SEGMENT: &str = "public_profiles";

/// A profile URL that passed validation. Only these ever reach the network.
#[must_use]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProfileUrl {
  url: Url,
  id: ProfileId,
}

impl ProfileUrl {
  #[must_use]
  pub fn as_str(&self) -> &str {
    self.url.as_str()
  }

  pub fn id(&self) -> &ProfileId {
    &self.id
  }
}

impl fmt::Display for ProfileUrl {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.url.as_str())
  }
}

/// Accepts `http(s)://<accepted host>/public_profiles/<hex-or-uuid id>`.
pub fn validate_profile_url(raw: &str) -> Result<ProfileUrl, ValidationError> {
  let raw = raw.trim();
  if raw.is_empty() {
    return Err(ValidationError::EmptyUrl);
  }

  let url = Url::parse(raw).map_err(|source| ValidationError::MalformedUrl {
    url: String::from(raw),
    source,
  })?;

  if !matches!(url.scheme(), "http" | "https") {
    return Err(ValidationError::UnsupportedScheme {
      scheme: String::from(url.scheme()),
    });
  }

  let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
  if !ACCEPTED_HOSTS.contains(&host.as_str()) {
    return Err(ValidationError::UnsupportedHost { host });
  }

  let has_profile_path = url.path_segments().map_or(false, |segments| {
    segments
      .tuple_windows()
      .any(|(segment, id)| segment == PROFILE_PATH_SEGMENT && is_profile_id(id))
  });
  let id = has_profile_path
    .then(|| ProfileId::from_url(url.as_str()))
    .flatten()
    .ok_or_else(|| ValidationError::MissingProfilePath {
      url: String::from(raw),
    })?;

  Ok(ProfileUrl { url, id })
}

fn is_profile_id(segment: &str) -> bool {
  segment.chars().any(|c| c.is_ascii_hexdigit())
    && segment.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

/// Retrieves the raw markup of a profile page.
///
/// Errors only for transport failures and non-success responses. An empty or
/// odd page is still a successful fetch, the parser deals with it.
pub trait ProfileFetcher: Send + Sync {
  fn fetch(&self, profile_url: &ProfileUrl) -> Result<String, FetchError>;
}

/// Talks to the profile host itself.
pub struct DirectFetcher {
  client: Client,
}

impl DirectFetcher {
  pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
    Ok(Self {
      client: get_client(&config.user_agent, config.timeout())?,
    })
  }
}

impl ProfileFetcher for DirectFetcher {
  fn fetch(&self, profile_url: &ProfileUrl) -> Result<String, FetchError> {
    get_text(&self.client, profile_url.as_str())
  }
}

/// Goes through an intermediary that answers `GET <relay>?url=<profile>` with
/// the raw profile markup.
pub struct RelayFetcher {
  client: Client,
  relay: Url,
}

impl RelayFetcher {
  pub fn new(relay: &str, config: &FetchConfig) -> Result<Self, FetchError> {
    let relay = Url::parse(relay).map_err(|source| FetchError::Relay {
      relay: String::from(relay),
      source,
    })?;

    Ok(Self {
      client: get_client(&config.user_agent, config.timeout())?,
      relay,
    })
  }

  #[must_use]
  pub fn request_url(&self, profile_url: &ProfileUrl) -> String {
    let mut url = self.relay.clone();
    url
      .query_pairs_mut()
      .append_pair("url", profile_url.as_str());
    url.into()
  }
}

impl ProfileFetcher for RelayFetcher {
  fn fetch(&self, profile_url: &ProfileUrl) -> Result<String, FetchError> {
    get_text(&self.client, &self.request_url(profile_url))
  }
}

/// Relay when one is configured, direct otherwise.
pub fn build_fetcher(
  config: &FetchConfig,
) -> Result<Box<dyn ProfileFetcher>, FetchError> {
  Ok(match &config.relay_url {
    Some(relay) => Box::new(RelayFetcher::new(relay, config)?),
    None => Box::new(DirectFetcher::new(config)?),
  })
}

fn get_client(user_agent: &str, timeout: Duration) -> Result<Client, FetchError> {
  use reqwest::header::HeaderMap;
  use reqwest::header::HeaderValue;

  // SEE: https://docs.rs/reqwest/0.11.13/reqwest/blocking/struct.ClientBuilder.html
  let mut headers = HeaderMap::new();
  headers.insert(
    "Accept",
    HeaderValue::from_static("text/html,application/xhtml+xml"),
  );
  headers.insert(
    "Accept-Language",
    HeaderValue::from_static("en-US,en;q=0.5"),
  );

  Client::builder()
    .user_agent(user_agent)
    .default_headers(headers)
    .timeout(timeout)
    .gzip(true)
    .deflate(true)
    .brotli(true)
    .build()
    .map_err(FetchError::Client)
}

fn get_text(client: &Client, url: &str) -> Result<String, FetchError> {
  debug!("GET {url}");

  let response =
    client
      .get(url)
      .send()
      .map_err(|source| FetchError::Request {
        url: String::from(url),
        source,
      })?;

  let status = response.status();
  if !status.is_success() {
    return Err(FetchError::Status {
      url: String::from(url),
      status: status.as_u16(),
    });
  }

  response.text().map_err(|source| FetchError::Request {
    url: String::from(url),
    source,
  })
}
