//! Background sweeper for abandoned voting sessions.
//!
//! A session that is dispatched but never picked up, or picked up but never
//! completed, would otherwise linger forever. The sweeper deletes
//! `pending`/`voting` sessions older than the configured TTL. Completed
//! sessions are left alone; deletion is not a status transition, so session
//! monotonicity is unaffected.

use chrono::Utc;
use log::{error, info, warn};
use mongodb::bson::doc;
use mongodb::Database;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio, Orbit, Rocket,
};

use crate::config::Config;
use crate::model::mongodb::Coll;
use crate::model::session::{SessionStatus, VotingSession};

pub struct SessionSweeper;

#[rocket::async_trait]
impl Fairing for SessionSweeper {
    fn info(&self) -> Info {
        Info {
            name: "Session sweeper",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let (Some(config), Some(db)) = (rocket.state::<Config>(), rocket.state::<Database>())
        else {
            // Liftoff only happens after the ignite fairings have run, so
            // this indicates a wiring mistake rather than a runtime fault.
            error!("Session sweeper not started: config or database missing");
            return;
        };
        if !config.sweeper_enabled() {
            info!("Session TTL is 0, sweeper disabled");
            return;
        }

        let sessions = Coll::<VotingSession>::from_db(db);
        let ttl = config.session_ttl();
        let interval = config.sweep_interval();
        let shutdown = rocket.shutdown();

        tokio::spawn(async move {
            let mut shutdown = shutdown;
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => sweep(&sessions, ttl).await,
                    _ = &mut shutdown => break,
                }
            }
        });
        info!(
            "Session sweeper running: TTL {}s, sweeping every {:?}",
            ttl.num_seconds(),
            interval
        );
    }
}

/// Delete every unfinished session older than the TTL.
async fn sweep(sessions: &Coll<VotingSession>, ttl: chrono::Duration) {
    let cutoff = mongodb::bson::DateTime::from_chrono(Utc::now() - ttl);
    let filter = doc! {
        "status": {"$in": [SessionStatus::Pending, SessionStatus::Voting]},
        "created_at": {"$lt": cutoff},
    };
    match sessions.delete_many(filter, None).await {
        Ok(result) if result.deleted_count > 0 => {
            info!("Swept {} abandoned voting session(s)", result.deleted_count);
        }
        Ok(_) => {}
        Err(e) => warn!("Session sweep failed: {e}"),
    }
}
