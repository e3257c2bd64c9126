pub mod common;
pub mod config;
pub mod error;
pub mod import;
pub mod leaderboard;
pub mod profile;
pub mod ranking;
pub mod refresh;
pub mod scoring;
pub mod store;
pub mod submission;

#[cfg(test)]
mod testing;

pub use crate::error::Error;
pub use crate::leaderboard::Leaderboard;
pub use crate::ranking::rank;
pub use crate::refresh::RefreshCoordinator;
pub use crate::submission::Submitter;
