#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use config::{ConfigFairing, DatabaseFairing};
use logging::LoggerFairing;
use notifier::Notifier;
use sweeper::SweeperFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod notifier;
pub mod sweeper;
pub mod tally;

/// The server, ready to ignite.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(SweeperFairing)
        .manage(Notifier::new())
        .mount("/", api::routes())
        .register("/", api::catchers())
}

/// A MongoDB client for tests, using the configured `db_uri`.
#[cfg(test)]
async fn db_client() -> mongodb::Client {
    let db_uri = rocket::Config::figment()
        .extract_inner::<String>("db_uri")
        .expect("`db_uri` not set");
    mongodb::Client::with_uri_str(&db_uri)
        .await
        .expect("Could not connect to database")
}

/// A fresh database name for one test.
#[cfg(test)]
fn database() -> String {
    config::get_database_name()
}

/// The server, built on the given database and without the background
/// sweeper, so tests control every write.
#[cfg(test)]
async fn rocket_for_db(client: mongodb::Client, db_name: &str) -> Rocket<Build> {
    let db = client.database(db_name);
    model::mongodb::ensure_indexes_exist(&db)
        .await
        .expect("Could not create indexes");
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .manage(Notifier::new())
        .manage(client)
        .manage(db)
        .mount("/", api::routes())
        .register("/", api::catchers())
}
