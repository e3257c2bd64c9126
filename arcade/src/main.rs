use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use arcade::common::RankedParticipant;
use arcade::config::Config;
use arcade::config::DEFAULT_CONFIG_PATH;
use arcade::import::import_profiles;
use arcade::leaderboard::Leaderboard;
use arcade::profile::fetching::build_fetcher;
use arcade::profile::fetching::ProfileFetcher;
use arcade::profile::parsing::parse_profile_with_report;
use arcade::refresh::RefreshCoordinator;
use arcade::refresh::RefreshOptions;
use arcade::refresh::RefreshResult;
use arcade::refresh::RefreshTrigger;
use arcade::store::memory::MemoryStore;
use arcade::submission::FetchPolicy;
use arcade::submission::SubmissionOutcome;
use arcade::submission::Submitter;

#[derive(clap::Subcommand)]
enum Subcommand {
  /// Adds a public profile, or updates it when already on the leaderboard.
  Submit { url: String },
  /// Fetches every participant again.
  Refresh,
  /// Prints the ranked leaderboard.
  Rank,
  /// Prints leaderboard totals and the tier distribution.
  Stats,
  /// Removes participants stored more than once under the same profile id.
  Cleanup,
  /// Submits every profile URL listed in a CSV export.
  Import { file: PathBuf },
  /// Deletes one participant.
  Delete { id: String },
  /// Parses a saved profile page without touching the leaderboard.
  Parse { file: PathBuf },
}

#[derive(clap::Parser)]
#[clap(version)]
struct Args {
  #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
  config: PathBuf,
  #[clap(subcommand)]
  subcommand: Subcommand,
}

#[derive(Debug, thiserror::Error)]
enum Error {
  #[error(transparent)]
  Arcade(#[from] arcade::Error),
  #[error(transparent)]
  Config(#[from] arcade::error::ConfigError),
  #[error(transparent)]
  Fetch(#[from] arcade::error::FetchError),
  #[error(transparent)]
  Import(#[from] arcade::error::ImportError),
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error(transparent)]
  Store(#[from] arcade::error::StoreError),
  #[error(transparent)]
  Submission(#[from] arcade::submission::SubmissionError),
}

fn main() -> Result<(), Error> {
  env_logger::Builder::from_default_env()
    .filter_level(log::LevelFilter::Info)
    .init();

  let Args { config, subcommand } = clap::Parser::parse();
  let config = Config::load(&config)?;

  if let Subcommand::Parse { file } = &subcommand {
    let (metrics, report) = parse_profile_with_report(&fs::read_to_string(file)?);
    println!("{metrics:#?}");
    println!("{report:#?}");
    return Ok(());
  }

  let leaderboard = Leaderboard::new(MemoryStore::open(&config.store_path)?);
  match subcommand {
    Subcommand::Submit { url } => {
      let fetcher: Arc<dyn ProfileFetcher> = build_fetcher(&config.fetch)?.into();
      let submitter =
        Submitter::new(&leaderboard, fetcher, FetchPolicy::from_config(&config));
      match submitter.submit(&url)? {
        SubmissionOutcome::Inserted { id, metrics } => {
          println!("Welcome, {} ({id})! Tier: {}.", metrics.name, metrics.tier);
        }
        SubmissionOutcome::Updated(update) => {
          let progress = update.progress;
          println!(
            "Welcome back, {}! {:+} badges, {:+} points, {:+} labs since last time.",
            update.participant.metrics.name,
            progress.badge_progress,
            progress.point_progress,
            progress.lab_progress,
          );
        }
      }
    }
    Subcommand::Refresh => {
      let fetcher: Arc<dyn ProfileFetcher> = build_fetcher(&config.fetch)?.into();
      let coordinator = RefreshCoordinator::shared(&config.store_path);
      let options = RefreshOptions::from_config(&config);
      match coordinator.run(&leaderboard, &fetcher, &options)? {
        RefreshTrigger::Started(report) => {
          for refresh in &report.results {
            match &refresh.result {
              RefreshResult::Updated { changes } => println!(
                "{:30.30} {} -> {} badges, {} -> {} points",
                refresh.name,
                changes.badges.0,
                changes.badges.1,
                changes.points.0,
                changes.points.1,
              ),
              RefreshResult::NoChanges => {
                println!("{:30.30} no changes", refresh.name);
              }
              RefreshResult::Failed { error } => {
                println!("{:30.30} failed: {error}", refresh.name);
              }
            }
          }
          println!(
            "{} updated, {} unchanged, {} failed, {} duplicates removed.",
            report.updated(),
            report.unchanged(),
            report.failed(),
            report.duplicates_removed,
          );
        }
        RefreshTrigger::AlreadyRunning(status) => println!(
          "Already running: {}/{} done.",
          status.completed, status.total_participants
        ),
      }
    }
    Subcommand::Import { file } => {
      let fetcher: Arc<dyn ProfileFetcher> = build_fetcher(&config.fetch)?.into();
      let submitter =
        Submitter::new(&leaderboard, fetcher, FetchPolicy::from_config(&config));
      let report = import_profiles(&submitter, fs::File::open(file)?)?;
      println!(
        "{} inserted, {} updated, {} skipped, {} failed.",
        report.inserted, report.updated, report.skipped, report.failed,
      );
    }
    Subcommand::Rank => print_ranking(&leaderboard.ranked()?),
    Subcommand::Stats => {
      let stats = leaderboard.stats()?;
      println!("Participants: {}", stats.total_participants);
      println!("Badges:       {}", stats.total_badges);
      println!("Labs:         {}", stats.total_labs);
      println!("Points:       {}", stats.total_points);
      for (tier, count) in &stats.tier_distribution {
        println!("{:14}{count}", format!("{tier}:"));
      }
    }
    Subcommand::Cleanup => {
      let removed = leaderboard.cleanup_duplicates()?;
      println!("Removed {removed} duplicates.");
    }
    Subcommand::Delete { id } => leaderboard.delete(&id)?,
    Subcommand::Parse { .. } => {}
  }

  Ok(())
}

fn print_ranking(ranked: &[RankedParticipant]) {
  // SEE: https://doc.rust-lang.org/std/fmt/#fillalignment
  println!("|{:-^95}|", "");
  println!(
    "| {place:5} | {name:30} | {tier:14} | {league:8} | {badges:>6} | {points:>7} | {labs:>5} |",
    place = "Place",
    name = "Name",
    tier = "Tier",
    league = "League",
    badges = "Badges",
    points = "Points",
    labs = "Labs",
  );
  println!("|{:-^95}|", "");

  for entry in ranked {
    let metrics = &entry.participant.metrics;
    println!(
      "| {place:5} | {name:30.30} | {tier:14} | {league:8} | {badges:>6} | {points:>7} | {labs:>5} |",
      place = entry.place,
      name = metrics.name,
      tier = metrics.tier.as_str(),
      league = metrics.league.as_str(),
      badges = metrics.badges_earned,
      points = metrics.points,
      labs = metrics.labs_completed,
    );
  }
  println!("|{:-^95}|", "");
}
