//! Getting from a profile URL to `ProfileMetrics`: `fetching` validates the
//! URL and retrieves the page, `parsing` reads the metrics out of it.

pub mod fetching;
pub mod parsing;
