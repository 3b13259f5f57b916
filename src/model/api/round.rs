use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    api::{id::ApiId, validated_text},
    common::{DisclosureLevel, RoundStatus},
    db::Round,
    mongodb::Id,
};
use crate::tally::{Tally, Verdict};

pub const MAX_OFFICE: usize = 100;
pub const MAX_DESCRIPTION: usize = 500;

/// A teller's request to open voting on an office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSpec {
    pub office: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl RoundSpec {
    /// Trim the office, and drop an empty description.
    pub fn validated(self) -> Result<Self> {
        let office = validated_text("office", &self.office, MAX_OFFICE)?;
        let description = match self.description.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => Some(validated_text("description", text, MAX_DESCRIPTION)?),
        };
        Ok(Self {
            office,
            description,
        })
    }
}

/// A ballot as submitted. `None` abstains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    #[serde(default)]
    pub candidate_id: Option<Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndRequest {
    pub disclosure_level: DisclosureLevel,
}

/// Public information about a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundDescription {
    pub id: ApiId,
    pub office: String,
    pub description: Option<String>,
    pub status: RoundStatus,
    pub disclosure_level: Option<DisclosureLevel>,
    pub created_at: DateTime<Utc>,
}

impl From<&Round> for RoundDescription {
    fn from(round: &Round) -> Self {
        Self {
            id: round.id.into(),
            office: round.office.clone(),
            description: round.description.clone(),
            status: round.status,
            disclosure_level: round.disclosure_level,
            created_at: round.created_at,
        }
    }
}

/// One line of a published result. `count` is withheld at some disclosure levels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub candidate_id: Option<ApiId>,
    pub candidate_name: Option<String>,
    pub count: Option<u32>,
}

impl VoteTally {
    fn new(tally: &Tally, with_count: bool) -> Self {
        Self {
            candidate_id: tally.candidate_id.map(ApiId::from),
            candidate_name: tally.candidate_name.clone(),
            count: with_count.then_some(tally.count),
        }
    }
}

/// Unfiltered tally line, for the teller's private preview.
impl From<&Tally> for VoteTally {
    fn from(tally: &Tally) -> Self {
        Self::new(tally, true)
    }
}

/// A revealed round's result as everyone sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round: RoundDescription,
    pub tallies: Vec<VoteTally>,
    pub total_votes: Option<u32>,
}

impl RoundResult {
    /// Filter a verdict through the disclosure level it was revealed with.
    pub fn disclosed(round: &Round, level: DisclosureLevel, verdict: &Verdict) -> Self {
        let counts = level.shows_counts();
        Self {
            round: round.into(),
            tallies: level
                .visible(&verdict.tallies)
                .iter()
                .map(|tally| VoteTally::new(tally, counts))
                .collect(),
            total_votes: counts.then_some(verdict.total_votes),
        }
    }
}

/// What the closing teller alone gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedSummary {
    pub tallies: Vec<VoteTally>,
    pub total_votes: u32,
    pub majority_threshold: u32,
    pub has_majority: bool,
    pub body_size: Option<u32>,
}

impl From<&Verdict> for ClosedSummary {
    fn from(verdict: &Verdict) -> Self {
        Self {
            tallies: verdict.tallies.iter().map(VoteTally::from).collect(),
            total_votes: verdict.total_votes,
            majority_threshold: verdict.majority_threshold,
            has_majority: verdict.has_majority,
            body_size: verdict.body_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRef {
    pub round_id: ApiId,
}

impl From<Id> for RoundRef {
    fn from(round_id: Id) -> Self {
        Self {
            round_id: round_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turnout {
    pub round_id: ApiId,
    pub voted_count: u64,
    pub total_participants: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEnded {
    pub round: RoundDescription,
    pub result: RoundResult,
}
