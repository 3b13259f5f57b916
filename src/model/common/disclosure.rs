use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tally::{top_candidates, Tally, Verdict};

/// How much of a revealed round's tally participants get to see.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosureLevel {
    /// Every entry with its count.
    All,
    /// The top-count entries (ties included) with their counts.
    Top,
    /// The top-count entries without counts. Needs a majority winner.
    TopNoCount,
    /// Nothing beyond the fact that the round completed.
    #[serde(rename = "none")]
    Hidden,
}

impl DisclosureLevel {
    pub fn requires_majority(self) -> bool {
        self == Self::TopNoCount
    }

    pub fn shows_counts(self) -> bool {
        matches!(self, Self::All | Self::Top)
    }

    /// The part of a ranked tally visible under this level.
    pub fn visible(self, tallies: &[Tally]) -> &[Tally] {
        match self {
            Self::All => tallies,
            Self::Top | Self::TopNoCount => top_candidates(tallies),
            Self::Hidden => &[],
        }
    }

    /// Reject this level if the round's outcome cannot support it.
    pub fn check(self, verdict: &Verdict) -> Result<()> {
        if self.requires_majority() && !verdict.has_majority {
            let base = match verdict.body_size {
                Some(size) => format!("{size}-member body"),
                None => format!("{} votes cast", verdict.total_votes),
            };
            return Err(Error::Conflict(format!(
                "Cannot use \"top without count\" without a majority (>{} of {base}). \
                 Please choose another disclosure option.",
                verdict.majority_base / 2
            )));
        }
        Ok(())
    }
}

impl From<DisclosureLevel> for Bson {
    fn from(level: DisclosureLevel) -> Self {
        to_bson(&level).expect("Serialisation is infallible")
    }
}
