use chrono::{DateTime, Duration, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// An election session, as stored in the database. Root of every other record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Short human-typable join code. Unique.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Size of the electing body. When set, majorities are measured against
    /// this rather than the number of ballots cast.
    pub body_size: Option<u32>,
    /// Number of participants currently holding the teller role.
    /// Role changes update it in the same transaction, and stepping down
    /// only succeeds while it is above one.
    pub teller_count: u32,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A new session with its creator counted as the only teller.
    pub fn new(code: String, name: String, body_size: Option<u32>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            code,
            name,
            body_size,
            teller_count: 1,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
