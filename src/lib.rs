#[macro_use]
extern crate rocket;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod sweeper;

pub use config::Config;

use config::{ConfigFairing, DatabaseFairing};
use events::SessionBroker;
use logging::LoggerFairing;
use sweeper::SessionSweeper;

/// Assemble the server: routes, configuration, database connection,
/// request logging, the session event broker, and the stale-session sweeper.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(LoggerFairing)
        .attach(SessionSweeper)
        .manage(SessionBroker::default())
}
