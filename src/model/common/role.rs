use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// What a participant may do within their session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// Runs rounds and manages the roster. Every session has at least one.
    Teller,
    /// May vote and be voted for.
    Voter,
}

impl ParticipantRole {
    pub fn is_teller(self) -> bool {
        self == Self::Teller
    }
}

impl From<ParticipantRole> for Bson {
    fn from(role: ParticipantRole) -> Self {
        to_bson(&role).expect("Serialisation is infallible")
    }
}
