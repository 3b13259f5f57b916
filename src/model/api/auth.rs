use std::marker::PhantomData;

use mongodb::{bson::doc, Database};
use rocket::{
    request::{FromRequest, Outcome},
    Request,
};

use crate::error::{Error, GuardFailure, Result};
use crate::model::{
    common::ParticipantRole,
    db::{Participant, Session},
    mongodb::Coll,
};

/// What a bearer must be allowed to do for a route to accept them.
pub trait Rights: Send + Sync + 'static {
    /// Used in the rejection message.
    const DESCRIPTION: &'static str;

    fn permits(role: ParticipantRole) -> bool;
}

/// Any participant of the session.
pub enum Member {}

/// A participant holding the teller role.
pub enum Teller {}

impl Rights for Member {
    const DESCRIPTION: &'static str = "participants";

    fn permits(_role: ParticipantRole) -> bool {
        true
    }
}

impl Rights for Teller {
    const DESCRIPTION: &'static str = "tellers";

    fn permits(role: ParticipantRole) -> bool {
        role.is_teller()
    }
}

/// An authenticated participant and the session they belong to, resolved from
/// an `Authorization: Bearer <token>` header.
///
/// The guard only authenticates. Handlers call [`AuthToken::authorize`] with
/// the route's join code before doing anything else.
pub struct AuthToken<R> {
    pub participant: Participant,
    pub session: Session,
    phantom: PhantomData<R>,
}

impl<R> AuthToken<R>
where
    R: Rights,
{
    /// Look up the bearer of `token`.
    async fn load(db: &Database, token: &str) -> Result<Self> {
        let participant = Coll::<Participant>::from_db(db)
            .find_one(doc! { "token": token }, None)
            .await?
            .ok_or_else(|| Error::Unauthorized("Invalid token".to_string()))?;

        let session = Coll::<Session>::from_db(db)
            .find_one(participant.session_id.as_doc(), None)
            .await?
            .filter(|session| !session.is_expired())
            .ok_or_else(|| Error::not_found("Session"))?;

        Ok(Self {
            participant,
            session,
            phantom: PhantomData,
        })
    }

    /// Reject the token unless it was issued for the session with this join
    /// code, then unless the bearer's role has the rights `R`.
    pub fn authorize(&self, code: &str) -> Result<()> {
        if !self.session.code.eq_ignore_ascii_case(code.trim()) {
            return Err(Error::Unauthorized(
                "Token does not belong to this session".to_string(),
            ));
        }
        if !R::permits(self.participant.role) {
            return Err(Error::Forbidden(format!(
                "Only {} can do this",
                R::DESCRIPTION
            )));
        }
        Ok(())
    }
}

/// Extract the token from an `Authorization` header value.
fn bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[rocket::async_trait]
impl<'r, R> FromRequest<'r> for AuthToken<R>
where
    R: Rights,
{
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let token = match req.headers().get_one("Authorization").and_then(bearer) {
            Some(token) => token,
            None => {
                let err = Error::Unauthorized("Missing bearer token".to_string());
                return GuardFailure::record(req, err);
            }
        };

        let db = match req.rocket().state::<Database>() {
            Some(db) => db,
            None => {
                error!("Database is not in managed state");
                let err = Error::Internal("Database unavailable".to_string());
                return GuardFailure::record(req, err);
            }
        };

        match Self::load(db, token).await {
            Ok(auth) => Outcome::Success(auth),
            Err(err) => {
                debug!("Rejected bearer: {err}");
                GuardFailure::record(req, err)
            }
        }
    }
}
