use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Proof that a participant voted in a round, without the choice they made.
/// Unique per `(round_id, voter_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    #[serde(rename = "_id")]
    pub id: Id,
    pub round_id: Id,
    pub voter_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub voted_at: DateTime<Utc>,
}

impl VoteReceipt {
    pub fn new(round_id: Id, voter_id: Id) -> Self {
        Self {
            id: Id::new(),
            round_id,
            voter_id,
            voted_at: Utc::now(),
        }
    }
}
