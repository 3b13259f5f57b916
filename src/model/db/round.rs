use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{DisclosureLevel, RoundStatus},
    mongodb::Id,
};

/// One office being voted on, as stored in the database.
///
/// Status only ever changes through [`crate::model::common::RoundAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    #[serde(rename = "_id")]
    pub id: Id,
    pub session_id: Id,
    /// Office or question title.
    pub office: String,
    pub description: Option<String>,
    pub status: RoundStatus,
    /// Set exactly when the round is revealed.
    pub disclosure_level: Option<DisclosureLevel>,
    /// True iff the status is active. Backs the one-active-round-per-session
    /// partial unique index.
    pub active: bool,
    /// Ballots accepted so far. Every vote writes this field, which makes
    /// concurrent votes and status changes on the same round conflict.
    pub votes_cast: u32,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Round {
    /// A freshly started round, open for voting.
    pub fn start(session_id: Id, office: String, description: Option<String>) -> Self {
        Self {
            id: Id::new(),
            session_id,
            office,
            description,
            status: RoundStatus::Voting,
            disclosure_level: None,
            active: true,
            votes_cast: 0,
            created_at: Utc::now(),
        }
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::Duration;

    use super::*;

    impl Round {
        /// A round in the given state, created `age_minutes` ago.
        pub fn example(
            session_id: Id,
            office: &str,
            status: RoundStatus,
            disclosure_level: Option<DisclosureLevel>,
            age_minutes: i64,
        ) -> Self {
            let mut round = Self::start(session_id, office.to_string(), None);
            round.status = status;
            round.disclosure_level = disclosure_level;
            round.active = status.is_active();
            round.created_at = Utc::now() - Duration::minutes(age_minutes);
            round
        }
    }
}
