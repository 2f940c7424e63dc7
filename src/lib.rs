#[macro_use]
extern crate rocket;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

use crate::config::{ConfigFairing, StoreFairing};
use crate::logging::LoggerFairing;

pub mod api;
pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod model;

/// Build the server: configuration and the ledger store are loaded by
/// fairings when it ignites.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StoreFairing)
        .mount("/", api::routes())
}

#[cfg(test)]
pub(crate) const TEST_ADMIN_KEY: &str = "test-admin-key";

/// Dependencies injected into `#[backend_test]` tests.
#[cfg(test)]
pub(crate) struct TestContext {
    pub client: rocket::local::asynchronous::Client,
    pub store: ledger::Store,
    pub ledger: ledger::VoteLedger,
    pub history: ledger::HistoryLog,
    pub db: Option<mongodb::Database>,
}

#[cfg(test)]
impl TestContext {
    /// A server over a fresh in-memory store.
    pub async fn memory() -> Self {
        Self::for_store(ledger::Store::new(ledger::MemoryStore::new()), None).await
    }

    /// A server over a fresh, randomly-named MongoDB database at `DB_URI`
    /// (default: a local single-node replica set).
    pub async fn mongodb() -> Self {
        let db_uri = std::env::var("DB_URI")
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());
        let client = mongodb::Client::with_uri_str(db_uri).await.unwrap();
        let db = client.database(&config::get_database_name());
        model::mongodb::ensure_indexes_exist(&db).await.unwrap();
        let store = ledger::Store::new(ledger::MongoStore::new(client, &db));
        Self::for_store(store, Some(db)).await
    }

    async fn for_store(store: ledger::Store, db: Option<mongodb::Database>) -> Self {
        log4rs_test_utils::test_logging::init_logging_once_for(["votes_backend"], None, None);

        let figment = rocket::Config::figment().merge(("admin_key", TEST_ADMIN_KEY));
        let rocket = rocket::custom(figment)
            .attach(LoggerFairing)
            .attach(ConfigFairing)
            .mount("/", api::routes());
        let rocket = config::manage_store(rocket, store.clone(), ledger::DEFAULT_TRANSACTION_ATTEMPTS);
        let client = rocket::local::asynchronous::Client::tracked(rocket)
            .await
            .unwrap();

        let ledger = client.rocket().state::<ledger::VoteLedger>().unwrap().clone();
        let history = client.rocket().state::<ledger::HistoryLog>().unwrap().clone();
        Self {
            client,
            store,
            ledger,
            history,
            db,
        }
    }
}
