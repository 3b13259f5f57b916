use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    api::{id::ApiId, validated_text},
    common::ParticipantRole,
    db::{Participant, Session},
    mongodb::Id,
};

pub const MAX_SESSION_NAME: usize = 200;
pub const MAX_PARTICIPANT_NAME: usize = 100;

/// A request to open a new session, made by its first teller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    pub name: String,
    pub teller_name: String,
    #[serde(default)]
    pub body_size: Option<u32>,
}

impl SessionSpec {
    /// Trim names and reject anything out of range.
    pub fn validated(self) -> Result<Self> {
        Ok(Self {
            name: validated_text("name", &self.name, MAX_SESSION_NAME)?,
            teller_name: validated_text("teller_name", &self.teller_name, MAX_PARTICIPANT_NAME)?,
            body_size: validated_body_size(self.body_size)?,
        })
    }
}

/// Returned to whoever creates a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreated {
    pub code: String,
    pub token: String,
}

/// A display name, used both to join and to rename oneself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameRequest {
    pub name: String,
}

impl NameRequest {
    pub fn validated(&self) -> Result<String> {
        validated_text("name", &self.name, MAX_PARTICIPANT_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joined {
    pub token: String,
}

/// The stored token still grants access to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verified {
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoteRequest {
    pub participant_id: Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodySizeRequest {
    #[serde(default)]
    pub body_size: Option<u32>,
}

impl BodySizeRequest {
    pub fn validated(self) -> Result<Option<u32>> {
        validated_body_size(self.body_size)
    }
}

fn validated_body_size(body_size: Option<u32>) -> Result<Option<u32>> {
    match body_size {
        Some(0) => Err(Error::Validation(
            "body_size must be at least 1".to_string(),
        )),
        other => Ok(other),
    }
}

/// Public information about a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub id: ApiId,
    pub code: String,
    pub name: String,
    pub body_size: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Session> for SessionDescription {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.into(),
            code: session.code.clone(),
            name: session.name.clone(),
            body_size: session.body_size,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}

/// Public information about a participant. Never includes the token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDescription {
    pub id: ApiId,
    pub name: String,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
}

impl From<&Participant> for ParticipantDescription {
    fn from(participant: &Participant) -> Self {
        Self {
            id: participant.id.into(),
            name: participant.name.clone(),
            role: participant.role,
            joined_at: participant.joined_at,
        }
    }
}

/// The changed fields of a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantUpdate {
    pub id: ApiId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<ParticipantRole>,
}

impl ParticipantUpdate {
    pub fn renamed(id: Id, name: String) -> Self {
        Self {
            id: id.into(),
            name: Some(name),
            role: None,
        }
    }

    pub fn role_changed(id: Id, role: ParticipantRole) -> Self {
        Self {
            id: id.into(),
            name: None,
            role: Some(role),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub body_size: Option<u32>,
}
