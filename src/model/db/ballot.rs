use mongodb::bson::doc;
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::{Coll, Id};

/// An anonymous cast vote.
///
/// This record deliberately holds nothing that leads back to the voter: no
/// voter reference, no timestamp, and an ID of pure random bytes rather than
/// a time-ordered ObjectId. Turnout and double-vote prevention live in
/// [`super::VoteReceipt`], which is stored separately and says nothing about
/// the choice made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    pub round_id: Id,
    /// The participant voted for, or `None` to abstain.
    pub candidate_id: Option<Id>,
}

impl Ballot {
    pub fn new(round_id: Id, candidate_id: Option<Id>) -> Self {
        Self {
            id: Id::random(),
            round_id,
            candidate_id,
        }
    }

    /// The choices made in a round, one per ballot.
    pub async fn choices(ballots: &Coll<Ballot>, round_id: Id) -> Result<Vec<Option<Id>>> {
        let choices = ballots
            .find(doc! { "round_id": round_id }, None)
            .await?
            .map_ok(|ballot| ballot.candidate_id)
            .try_collect()
            .await?;
        Ok(choices)
    }
}
