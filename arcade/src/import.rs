//! Bulk import of profile URLs from a CSV export, one submission per row.

use std::io;

use log::info;
use log::warn;

use crate::error::ImportError;
use crate::profile::fetching::validate_profile_url;
use crate::store::ParticipantStore;
use crate::submission::SubmissionOutcome;
use crate::submission::Submitter;

/// Header names tried in order for the profile URL column.
pub const URL_COLUMNS: [&str; 3] = [
  "Google Cloud Skills Boost Profile URL",
  "Profile URL",
  "profileUrl",
];

#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
  pub inserted: usize,
  /// Rows whose profile was already on the leaderboard.
  pub updated: usize,
  /// Unreadable rows and rows without a usable profile URL.
  pub skipped: usize,
  pub failed: usize,
}

/// Submits the profile URL of every row in `reader`.
///
/// A bad row never stops the import. Only a missing URL column or an
/// unreadable header fails it as a whole.
pub fn import_profiles<S: ParticipantStore, R: io::Read>(
  submitter: &Submitter<'_, S>,
  reader: R,
) -> Result<ImportReport, ImportError> {
  // SEE: https://docs.rs/csv/1/csv/struct.ReaderBuilder.html
  let mut rows = csv::ReaderBuilder::new()
    .flexible(true)
    .trim(csv::Trim::All)
    .from_reader(reader);

  let headers = rows.headers()?.clone();
  let column = URL_COLUMNS
    .iter()
    .find_map(|name| headers.iter().position(|header| header == *name))
    .ok_or(ImportError::MissingColumn {
      expected: &URL_COLUMNS,
    })?;

  let mut report = ImportReport::default();
  for (line, row) in rows.records().enumerate() {
    // NOTE: Line 1 is the header.
    let line = line + 2;
    let row = match row {
      Ok(row) => row,
      Err(error) => {
        warn!("Skipping unreadable line {line}: {error}");
        report.skipped += 1;
        continue;
      }
    };

    let raw_url = row.get(column).unwrap_or_default();
    if let Err(error) = validate_profile_url(raw_url) {
      warn!("Skipping line {line}: {error}");
      report.skipped += 1;
      continue;
    }

    match submitter.submit(raw_url) {
      Ok(SubmissionOutcome::Inserted { .. }) => report.inserted += 1,
      Ok(SubmissionOutcome::Updated(_)) => report.updated += 1,
      // Already logged by the submitter.
      Err(_) => report.failed += 1,
    }
  }

  info!(
    "Import done: {} inserted, {} updated, {} skipped, {} failed.",
    report.inserted, report.updated, report.skipped, report.failed
  );
  Ok(report)
}
