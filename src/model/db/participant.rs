use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime},
    options::FindOptions,
};
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    common::{code::generate_token, ParticipantRole},
    mongodb::{Coll, Id},
};

/// Someone who has joined a session, as stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(rename = "_id")]
    pub id: Id,
    pub session_id: Id,
    pub name: String,
    pub role: ParticipantRole,
    /// Secret bearer token. Never leaves the server except in the join response.
    pub token: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// A new participant with a freshly issued token.
    pub fn new(session_id: Id, name: String, role: ParticipantRole) -> Self {
        Self {
            id: Id::new(),
            session_id,
            name,
            role,
            token: generate_token(),
            joined_at: Utc::now(),
        }
    }

    /// Everyone in the session, in join order.
    pub async fn roster(participants: &Coll<Participant>, session_id: Id) -> Result<Vec<Self>> {
        let options = FindOptions::builder()
            .sort(doc! { "joined_at": 1, "_id": 1 })
            .build();
        let roster = participants
            .find(doc! { "session_id": session_id }, options)
            .await?
            .try_collect()
            .await?;
        Ok(roster)
    }
}
