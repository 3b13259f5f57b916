use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};

use crate::model::db::{Ballot, Participant, Round, Session, VoteReceipt};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database from managed state and wrap it in a collection.
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        match req.rocket().state::<Database>() {
            Some(db) => request::Outcome::Success(Coll::from_db(db)),
            None => {
                error!("Database is not in managed state");
                request::Outcome::Error((Status::InternalServerError, ()))
            }
        }
    }
}

impl MongoCollection for Session {
    const NAME: &'static str = "sessions";
}

impl MongoCollection for Participant {
    const NAME: &'static str = "participants";
}

impl MongoCollection for Round {
    const NAME: &'static str = "rounds";
}

impl MongoCollection for Ballot {
    const NAME: &'static str = "ballots";
}

impl MongoCollection for VoteReceipt {
    const NAME: &'static str = "vote_receipts";
}

/// Ensure that all the required indexes exist on the given database.
///
/// Two of these carry the core concurrency guarantees: the unique receipt
/// index makes double voting impossible, and the partial index on active
/// rounds makes a second concurrent round start fail.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Join codes.
    let code_index = IndexModel::builder()
        .keys(doc! {"code": 1})
        .options(unique.clone())
        .build();
    Coll::<Session>::from_db(db)
        .create_index(code_index, None)
        .await?;

    // Bearer tokens, and roster lookups.
    let token_index = IndexModel::builder()
        .keys(doc! {"token": 1})
        .options(unique.clone())
        .build();
    let roster_index = IndexModel::builder()
        .keys(doc! {"session_id": 1, "joined_at": 1})
        .build();
    Coll::<Participant>::from_db(db)
        .create_indexes([token_index, roster_index], None)
        .await?;

    // At most one active round per session.
    let active_round_index = IndexModel::builder()
        .keys(doc! {"session_id": 1})
        .options(
            IndexOptions::builder()
                .name("one_active_round_per_session".to_string())
                .unique(true)
                .partial_filter_expression(doc! {"active": true})
                .build(),
        )
        .build();
    let round_log_index = IndexModel::builder()
        .keys(doc! {"session_id": 1, "created_at": -1})
        .build();
    Coll::<Round>::from_db(db)
        .create_indexes([active_round_index, round_log_index], None)
        .await?;

    // At most one receipt per voter per round.
    let receipt_index = IndexModel::builder()
        .keys(doc! {"round_id": 1, "voter_id": 1})
        .options(unique)
        .build();
    Coll::<VoteReceipt>::from_db(db)
        .create_index(receipt_index, None)
        .await?;

    let ballot_index = IndexModel::builder().keys(doc! {"round_id": 1}).build();
    Coll::<Ballot>::from_db(db)
        .create_index(ballot_index, None)
        .await?;

    Ok(())
}
