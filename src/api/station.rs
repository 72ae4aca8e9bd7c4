//! The station kiosk surface: a feed of incoming sessions, pickup, and the
//! session-bound vote that completes the interaction.

use log::warn;
use mongodb::{bson::doc, Database};
use rocket::http::Status;
use rocket::response::stream::{Event, EventStream};
use rocket::tokio::select;
use rocket::tokio::sync::broadcast::error::RecvError;
use rocket::{futures::TryStreamExt, serde::json::Json, Route, Shutdown, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{SessionBroker, SessionEventKind};
use crate::model::{
    candidate::Candidate,
    clan::Clan,
    mongodb::{Coll, Id},
    rules,
    session::{self, SessionStatus, VotingSession},
    vote::{self, VoterIdentity},
};

use super::voting::CastReceipt;

pub fn routes() -> Vec<Route> {
    routes![station_feed, pickup_session, cast_session_vote]
}

/// Server-sent stream of `pending` sessions addressed to this station.
///
/// On (re)connect the still-pending backlog is replayed from the database
/// before following live events; a station that missed an insert while
/// offline therefore still sees it. Duplicates across the replay/live
/// boundary are possible and harmless: pickup is idempotent-safe because
/// the `pending -> voting` transition only fires once.
#[get("/stations/<station_id>/feed")]
async fn station_feed(
    station_id: String,
    sessions: Coll<VotingSession>,
    broker: &State<SessionBroker>,
    mut end: Shutdown,
) -> EventStream![] {
    let mut rx = broker.subscribe();
    EventStream! {
        // Reconciliation path: replay whatever is already waiting.
        let backlog = doc! {
            "station_id": &station_id,
            "status": SessionStatus::Pending,
        };
        match sessions.find(backlog, None).await {
            Ok(cursor) => {
                let pending: Vec<VotingSession> = match cursor.try_collect().await {
                    Ok(pending) => pending,
                    Err(e) => {
                        warn!("Station {station_id} backlog replay failed: {e}");
                        Vec::new()
                    }
                };
                for session in pending {
                    yield Event::json(&session).event("session");
                }
            }
            Err(e) => warn!("Station {station_id} backlog query failed: {e}"),
        }

        // Live events, filtered down to this station's fresh sessions.
        loop {
            let event = select! {
                event = rx.recv() => match event {
                    Ok(event) => event,
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(missed)) => {
                        // The client reconnects to trigger a fresh replay.
                        warn!("Station {station_id} feed lagged by {missed} events");
                        continue;
                    }
                },
                _ = &mut end => break,
            };
            if event.kind == SessionEventKind::Created
                && event.session.station_id == station_id
                && event.session.status == SessionStatus::Pending
            {
                yield Event::json(&event.session).event("session");
            }
        }
    }
}

/// Everything the station needs to put the voter in front of their ballot:
/// the session (now `voting`), the clan's display metadata, and the
/// eligibility engine's output for the denormalised voter cohort.
#[derive(Debug, Serialize)]
struct PickupResponse {
    session: VotingSession,
    clan: Option<Clan>,
    candidates: Vec<Candidate>,
}

#[post("/sessions/<session_id>/pickup")]
async fn pickup_session(
    session_id: Id,
    sessions: Coll<VotingSession>,
    clans: Coll<Clan>,
    broker: &State<SessionBroker>,
    db: &State<Database>,
) -> Result<Json<PickupResponse>> {
    let session = session::pickup(&sessions, broker, session_id).await?;
    let clan = clans
        .find_one(doc! { "_id": &session.voter_clan }, None)
        .await?;
    let candidates = rules::resolve_candidates(
        db,
        &session.voter_section,
        &session.voter_batch,
        &session.voter_clan,
    )
    .await?;
    Ok(Json(PickupResponse {
        session,
        clan,
        candidates,
    }))
}

/// What the station submits once the voter has chosen.
#[derive(Debug, Deserialize)]
struct SessionBallot {
    candidate_id: Id,
    device_hash: Option<String>,
}

/// Cast the vote for a session's voter and complete the session.
///
/// The cast and the completion are two backend round trips; if completion
/// fails (say the session was swept meanwhile) the vote still stands, which
/// is the correct outcome: the ledger, not the session, is the record.
#[post("/sessions/<session_id>/votes", data = "<ballot>", format = "json")]
async fn cast_session_vote(
    session_id: Id,
    ballot: Json<SessionBallot>,
    sessions: Coll<VotingSession>,
    broker: &State<SessionBroker>,
    db: &State<Database>,
) -> Result<Json<CastReceipt>> {
    let session = sessions
        .find_one(session_id.as_doc(), None)
        .await?
        .ok_or_else(|| Error::not_found(format!("Session {session_id}")))?;
    if session.status != SessionStatus::Voting {
        return Err(Error::Status(
            Status::Conflict,
            format!("Session {session_id} is {:?}, not ready to vote", session.status),
        ));
    }

    let identity = VoterIdentity::from(&session);
    let (vote, action) = vote::cast_vote(
        db,
        &identity,
        &session.voter_clan,
        ballot.candidate_id,
        ballot.0.device_hash,
        Some(session_id),
    )
    .await?;

    session::complete(&sessions, broker, session_id).await?;

    Ok(Json(CastReceipt {
        action,
        voter_email: vote.voter_email,
        clan_id: vote.clan_id,
        candidate_id: vote.candidate_id,
    }))
}
