//! Background removal of expired sessions and everything that belongs to them.

use chrono::Utc;
use mongodb::{
    bson::{doc, DateTime as BsonDateTime},
    Client, Database,
};
use rocket::{
    fairing::{Fairing, Info, Kind},
    futures::TryStreamExt,
    tokio::{self, time::sleep},
    Orbit, Rocket,
};

use crate::config::Config;
use crate::error::Result;
use crate::model::{
    db::{Ballot, Participant, Round, Session, VoteReceipt},
    mongodb::{retry_transient, Coll, Id},
};

/// Delete one session with its participants, rounds, ballots and receipts,
/// all or nothing.
pub async fn delete_session(client: &Client, db: &Database, session_id: Id) -> Result<()> {
    let mut txn = client.start_session(None).await?;
    txn.start_transaction(None).await?;

    let by_session = doc! { "session_id": session_id };
    let round_ids = Coll::<Round>::from_db(db)
        .distinct_with_session("_id", by_session.clone(), None, &mut txn)
        .await?;
    let by_round = doc! { "round_id": { "$in": round_ids } };

    Coll::<Ballot>::from_db(db)
        .delete_many_with_session(by_round.clone(), None, &mut txn)
        .await?;
    Coll::<VoteReceipt>::from_db(db)
        .delete_many_with_session(by_round, None, &mut txn)
        .await?;
    Coll::<Round>::from_db(db)
        .delete_many_with_session(by_session.clone(), None, &mut txn)
        .await?;
    Coll::<Participant>::from_db(db)
        .delete_many_with_session(by_session, None, &mut txn)
        .await?;
    Coll::<Session>::from_db(db)
        .delete_one_with_session(session_id.as_doc(), None, &mut txn)
        .await?;

    txn.commit_transaction().await?;
    Ok(())
}

/// Delete every session that has expired. Returns how many went.
pub async fn sweep_expired(client: &Client, db: &Database) -> Result<usize> {
    let filter = doc! {
        "expires_at": { "$lte": BsonDateTime::from_chrono(Utc::now()) },
    };
    let expired: Vec<Id> = Coll::<Session>::from_db(db)
        .find(filter, None)
        .await?
        .map_ok(|session| session.id)
        .try_collect()
        .await?;

    for &session_id in &expired {
        retry_transient(|| delete_session(client, db, session_id)).await?;
        info!("Swept expired session {session_id}");
    }
    Ok(expired.len())
}

/// A fairing that sweeps expired sessions at liftoff and then every
/// `sweep_interval` until shutdown.
pub struct SweeperFairing;

#[rocket::async_trait]
impl Fairing for SweeperFairing {
    fn info(&self) -> Info {
        Info {
            name: "Expired session sweeper",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (client, db, config) = match (
            rocket.state::<Client>(),
            rocket.state::<Database>(),
            rocket.state::<Config>(),
        ) {
            (Some(client), Some(db), Some(config)) => (client.clone(), db.clone(), config.clone()),
            _ => {
                error!("Sweeper needs the database and config in managed state");
                return;
            }
        };
        let mut shutdown = rocket.shutdown();

        tokio::spawn(async move {
            loop {
                match sweep_expired(&client, &db).await {
                    Ok(0) => debug!("No expired sessions"),
                    Ok(n) => info!("Swept {n} expired session(s)"),
                    Err(e) => error!("Sweeping expired sessions failed: {e}"),
                }
                tokio::select! {
                    _ = sleep(config.sweep_interval()) => {}
                    _ = &mut shutdown => break,
                }
            }
            debug!("Sweeper stopped");
        });
    }
}
