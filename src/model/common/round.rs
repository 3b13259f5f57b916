//! The voting round lifecycle.
//!
//! ```text
//!            close              reveal
//!  voting ─────────▶ closed ─────────▶ revealed
//!     │                 │
//!     └──── cancel ─────┴────────────▶ cancelled
//! ```
//!
//! `voting` and `closed` are active; a session has at most one active round,
//! which the database enforces with a unique partial index on `active`.
//! Every transition is applied as a single conditional write whose filter is
//! [`RoundAction::guard`], so the status check and the write are one atomic
//! step even when commands race.

use mongodb::bson::{doc, to_bson, Bson, Document};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Error;
use crate::model::{common::disclosure::DisclosureLevel, mongodb::Id};

/// States in the round lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Open for ballots.
    Voting,
    /// Ballots sealed; the teller is reviewing the tally privately.
    Closed,
    /// Result published under a disclosure level. Terminal.
    Revealed,
    /// Abandoned; its votes were discarded. Terminal.
    Cancelled,
}

impl RoundStatus {
    /// Does a round in this status occupy the session's single active slot?
    pub fn is_active(self) -> bool {
        matches!(self, Self::Voting | Self::Closed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

impl From<RoundStatus> for Bson {
    fn from(status: RoundStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// A teller or voter command that moves (or, for votes, requires) a round status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RoundAction {
    /// Cast a ballot. Leaves the status unchanged.
    Vote,
    /// Seal the ballots.
    Close,
    /// Publish the result under the given disclosure level.
    Reveal(DisclosureLevel),
    /// Abandon the round.
    Cancel,
}

/// Attempted an action on a round whose status does not allow it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
#[error("cannot {action:?} a round that is {from:?}")]
pub struct InvalidTransition {
    pub from: RoundStatus,
    pub action: RoundAction,
}

impl RoundAction {
    /// Statuses from which this action is permitted.
    pub fn sources(self) -> &'static [RoundStatus] {
        match self {
            Self::Vote | Self::Close => &[RoundStatus::Voting],
            Self::Reveal(_) => &[RoundStatus::Closed],
            Self::Cancel => &[RoundStatus::Voting, RoundStatus::Closed],
        }
    }

    /// Status of the round once the action has been applied.
    pub fn target(self) -> RoundStatus {
        match self {
            Self::Vote => RoundStatus::Voting,
            Self::Close => RoundStatus::Closed,
            Self::Reveal(_) => RoundStatus::Revealed,
            Self::Cancel => RoundStatus::Cancelled,
        }
    }

    pub fn permits(self, from: RoundStatus) -> bool {
        self.sources().contains(&from)
    }

    /// Apply the action to a round in status `from`.
    pub fn apply(self, from: RoundStatus) -> Result<RoundStatus, InvalidTransition> {
        if self.permits(from) {
            Ok(self.target())
        } else {
            Err(InvalidTransition { from, action: self })
        }
    }

    /// Filter matching the given round only while this action is permitted on it.
    pub fn guard(self, round_id: Id, session_id: Id) -> Document {
        let sources: Vec<Bson> = self.sources().iter().copied().map(Bson::from).collect();
        doc! {
            "_id": round_id,
            "session_id": session_id,
            "status": { "$in": sources },
        }
    }

    /// Update document that performs the action on a round matched by [`Self::guard`].
    pub fn update(self) -> Document {
        match self {
            Self::Vote => doc! {
                "$inc": { "votes_cast": 1 },
            },
            Self::Close => doc! {
                "$set": { "status": RoundStatus::Closed },
            },
            Self::Reveal(level) => doc! {
                "$set": {
                    "status": RoundStatus::Revealed,
                    "disclosure_level": level,
                    "active": false,
                },
            },
            Self::Cancel => doc! {
                "$set": {
                    "status": RoundStatus::Cancelled,
                    "active": false,
                    "votes_cast": 0,
                },
            },
        }
    }

    /// Message given when the guard matched nothing.
    pub fn rejection(self) -> &'static str {
        match self {
            Self::Vote => "Round not found or not accepting votes",
            Self::Close => "Round not found or not in voting status",
            Self::Reveal(_) => "Round not found or voting not closed yet",
            Self::Cancel => "Round not found or already completed",
        }
    }
}

impl From<InvalidTransition> for Error {
    fn from(err: InvalidTransition) -> Self {
        debug!("{err}");
        Error::NotFound(err.action.rejection().to_string())
    }
}
