//! The supervisor console: dispatching voters to stations and watching
//! completions roll in.

use log::warn;
use mongodb::{bson::doc, Database};
use rocket::response::stream::{Event, EventStream};
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::{serde::json::Json, Route, Shutdown, State};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{SessionBroker, SessionEventKind};
use crate::model::{
    audit::{self, NewAuditEntry},
    mongodb::Coll,
    session::{self, NewSession, SessionStatus, VotingSession},
    voter::Voter,
};

pub fn routes() -> Vec<Route> {
    routes![dispatch_voter, supervisor_feed]
}

#[derive(Debug, Deserialize)]
struct DispatchRequest {
    search_term: String,
    station_id: String,
}

/// Look the voter up and open a `pending` session on the chosen station.
///
/// The station learns about the session over its own feed; the supervisor
/// gets the created session back so the console can show where the voter
/// was sent.
#[post("/supervisor/dispatch", data = "<request>", format = "json")]
async fn dispatch_voter(
    request: Json<DispatchRequest>,
    voters: Coll<Voter>,
    new_sessions: Coll<NewSession>,
    broker: &State<SessionBroker>,
    db: &State<Database>,
) -> Result<Json<VotingSession>> {
    let voter = Voter::lookup(&voters, &request.search_term)
        .await?
        .ok_or_else(|| Error::VoterNotFound(request.search_term.clone()))?;

    let session = session::create(&new_sessions, broker, &voter, &request.station_id).await?;

    let entry = NewAuditEntry::new(
        &voter.email,
        audit::DISPATCH_VOTER,
        doc! {
            "station_id": &request.station_id,
            "session_id": session.id,
        },
    );
    audit::append(&Coll::from_db(db), entry).await;

    Ok(Json(session))
}

/// What the console flashes when a voter finishes: who, where, and how long
/// the banner should stay up.
#[derive(Debug, Serialize)]
struct CompletionNotice {
    voter_name: String,
    voter_email: String,
    station_id: String,
    display_secs: u32,
}

/// Build the notice for one completed session. `display_secs` comes
/// straight from [`Config::completion_notice_secs`].
fn completion_notice(session: &VotingSession, display_secs: u32) -> CompletionNotice {
    CompletionNotice {
        voter_name: session.voter_name.clone(),
        voter_email: session.voter_email.clone(),
        station_id: session.station_id.clone(),
        display_secs,
    }
}

/// Server-sent stream of completed sessions, console-wide.
///
/// Unlike the station feed there is no backlog replay: a completion the
/// console missed is history, not pending work.
#[get("/supervisor/feed")]
async fn supervisor_feed(
    broker: &State<SessionBroker>,
    config: &State<Config>,
    mut end: Shutdown,
) -> EventStream![] {
    let mut rx = broker.subscribe();
    let display_secs = config.completion_notice_secs();
    EventStream! {
        loop {
            let event = select! {
                event = rx.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(missed)) => {
                        warn!("Supervisor feed lagged by {missed} events");
                        continue;
                    }
                },
                _ = &mut end => break,
            };
            if event.kind == SessionEventKind::Updated
                && event.session.status == SessionStatus::Completed
            {
                let notice = completion_notice(&event.session, display_secs);
                yield Event::json(&notice).event("completion");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rocket::serde::json::serde_json;

    #[test]
    fn completion_notice_mirrors_the_session_and_config() {
        let session = VotingSession::example();
        // The display duration keeps the config's type all the way to the
        // wire; no widening happens along the way.
        let display_secs: u32 = 3;
        let notice = completion_notice(&session, display_secs);

        assert_eq!(notice.voter_name, session.voter_name);
        assert_eq!(notice.voter_email, session.voter_email);
        assert_eq!(notice.station_id, session.station_id);
        assert_eq!(notice.display_secs, 3);

        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["display_secs"], 3);
        assert_eq!(json["station_id"], session.station_id);
    }
}
