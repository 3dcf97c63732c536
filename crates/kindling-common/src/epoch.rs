//! Per-run timestamp tag

use std::fmt;

use chrono::{DateTime, Utc};

const EPOCH_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// UTC timestamp tag computed once per run.
///
/// Scratch snapshots of applied manifests carry it in their file names so
/// repeated runs never overwrite each other. The textual form sorts in
/// chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpochTag(DateTime<Utc>);

impl EpochTag {
    /// Tag for the current instant
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Tag for a fixed instant
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self(instant)
    }

    /// The instant this tag was taken
    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for EpochTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(EPOCH_FORMAT))
    }
}
