use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::ledger::{
    HistoryLog, MemoryStore, MongoStore, Store, VoteLedger, DEFAULT_TRANSACTION_ATTEMPTS,
};
use crate::model::mongodb::ensure_indexes_exist;

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // secrets
    admin_key: String,
}

impl Config {
    /// Key that administrators present to create candidates.
    pub fn admin_key(&self) -> &str {
        &self.admin_key
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.admin_key.is_empty() {
            error!("`admin_key` must not be empty");
            return Err(rocket);
        }

        // Manage the state.
        rocket = rocket.manage(config);
        Ok(rocket)
    }
}

/// Which ledger store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    #[default]
    Mongodb,
    /// Non-persistent; everything is lost on shutdown.
    Memory,
}

fn default_transaction_retries() -> u32 {
    DEFAULT_TRANSACTION_ATTEMPTS
}

/// Configuration for the ledger store.
#[derive(Deserialize)]
struct StoreConfig {
    // non-secrets
    #[serde(default)]
    store: StoreKind,
    #[serde(default = "default_transaction_retries")]
    transaction_retries: u32,
    // secrets
    db_uri: Option<String>,
}

/// A fairing that loads the store config, connects to the database if
/// needed, performs any setup necessary, and places the `Store`,
/// `VoteLedger` and `HistoryLog` into managed state. A MongoDB-backed store
/// also manages its `Client` and `Database`.
pub struct StoreFairing;

#[rocket::async_trait]
impl Fairing for StoreFairing {
    fn info(&self) -> Info {
        Info {
            name: "Ledger store",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<StoreConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load store config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if config.transaction_retries == 0 {
            error!("`transaction_retries` must be at least 1");
            return Err(rocket);
        }

        let store = match config.store {
            StoreKind::Memory => {
                warn!("Using the in-memory store; votes will not survive a restart");
                Store::new(MemoryStore::new())
            }
            StoreKind::Mongodb => {
                let db_uri = match config.db_uri {
                    Some(db_uri) => db_uri,
                    None => {
                        error!("`db_uri` is required for the mongodb store");
                        return Err(rocket);
                    }
                };
                info!("Loaded database config, connecting...");
                // Construct the connection.
                let client = match MongoClient::with_uri_str(db_uri).await {
                    Ok(client) => client,
                    Err(e) => {
                        error!("Failed to connect to database: {e}");
                        return Err(rocket);
                    }
                };
                let db = client.database(&get_database_name());

                // Ensure the required indexes exist.
                if let Err(e) = ensure_indexes_exist(&db).await {
                    error!("Failed to connect to database: {e}");
                    return Err(rocket);
                }
                info!("...database connection online!");

                let store = Store::new(MongoStore::new(client.clone(), &db));
                rocket = rocket.manage(client).manage(db);
                store
            }
        };

        Ok(manage_store(rocket, store, config.transaction_retries))
    }
}

/// Put `store` and the ledger components built on it into managed state.
pub(crate) fn manage_store(rocket: Rocket<Build>, store: Store, attempts: u32) -> Rocket<Build> {
    let ledger = VoteLedger::new(store.clone(), attempts);
    let history = HistoryLog::new(store.clone());
    rocket.manage(store).manage(ledger).manage(history)
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "votes".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
pub(crate) fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}
