//! The voting-session state machine: the ephemeral record binding one
//! voter to one physical station for a single voting interaction.
//!
//! States move `pending -> voting -> completed`, linearly and terminally.
//! Both transitions are single `find_one_and_update` calls whose filter
//! includes the expected prior status, so duplicate or stale notifications
//! can never regress a session.

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_bson, Bson};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use rocket::http::Status;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{SessionBroker, SessionEventKind};
use crate::model::mongodb::{serde_option_datetime, Coll, Id};
use crate::model::voter::Voter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created by the supervisor, not yet noticed by the station.
    Pending,
    /// Picked up by the station; the voter is at the screen.
    Voting,
    /// The vote landed. Terminal.
    Completed,
}

impl SessionStatus {
    /// The only legal transitions: `pending -> voting -> completed`.
    pub fn can_advance_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Pending, SessionStatus::Voting)
                | (SessionStatus::Voting, SessionStatus::Completed)
        )
    }
}

impl From<SessionStatus> for Bson {
    fn from(status: SessionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}

/// Core session data, as stored in the database. Voter fields are
/// denormalised so the station never needs a registry lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCore {
    pub station_id: String,
    pub voter_email: String,
    pub voter_regnum: String,
    pub voter_clan: String,
    pub voter_name: String,
    pub voter_section: String,
    pub voter_batch: String,
    pub voter_year: u32,
    pub status: SessionStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "serde_option_datetime")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// A session without an ID, ready for insertion.
pub type NewSession = SessionCore;

/// A session from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingSession {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub session: SessionCore,
}

impl Deref for VotingSession {
    type Target = SessionCore;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl DerefMut for VotingSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.session
    }
}

impl SessionCore {
    /// A fresh `pending` session for the given voter at the given station.
    pub fn new(voter: &Voter, station_id: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            voter_email: voter.email.clone(),
            voter_regnum: voter.reg_num.clone(),
            voter_clan: voter.clan.clone(),
            voter_name: voter.name.clone(),
            voter_section: voter.section.clone(),
            voter_batch: voter.batch.clone(),
            voter_year: voter.year,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

/// Create a session and announce it to the assigned station's feed.
pub async fn create(
    new_sessions: &Coll<NewSession>,
    broker: &SessionBroker,
    voter: &Voter,
    station_id: &str,
) -> Result<VotingSession> {
    let core = SessionCore::new(voter, station_id);
    let id: Id = new_sessions
        .insert_one(&core, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();
    let session = VotingSession { id, session: core };
    broker.publish(SessionEventKind::Created, session.clone());
    Ok(session)
}

/// `pending -> voting`: the station has noticed the session and the voter
/// is now at the screen.
pub async fn pickup(
    sessions: &Coll<VotingSession>,
    broker: &SessionBroker,
    id: Id,
) -> Result<VotingSession> {
    let update = doc! { "$set": { "status": SessionStatus::Voting } };
    advance(sessions, broker, id, SessionStatus::Pending, update).await
}

/// `voting -> completed`: called only after the vote has landed in the
/// ledger. Stamps `completed_at`; terminal.
pub async fn complete(
    sessions: &Coll<VotingSession>,
    broker: &SessionBroker,
    id: Id,
) -> Result<VotingSession> {
    let update = doc! {
        "$set": {
            "status": SessionStatus::Completed,
            "completed_at": mongodb::bson::DateTime::now(),
        },
    };
    advance(sessions, broker, id, SessionStatus::Voting, update).await
}

/// Run one transition atomically. The expected prior status is part of the
/// filter; a session in any other state is left untouched and reported as a
/// conflict, a missing session as not-found.
async fn advance(
    sessions: &Coll<VotingSession>,
    broker: &SessionBroker,
    id: Id,
    expected: SessionStatus,
    update: mongodb::bson::Document,
) -> Result<VotingSession> {
    let filter = doc! { "_id": *id, "status": expected };
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();
    match sessions.find_one_and_update(filter, update, options).await? {
        Some(session) => {
            broker.publish(SessionEventKind::Updated, session.clone());
            Ok(session)
        }
        None => match sessions.find_one(id.as_doc(), None).await? {
            Some(session) => Err(Error::Status(
                Status::Conflict,
                format!(
                    "Session {} is {:?}, not {:?}",
                    id, session.status, expected
                ),
            )),
            None => Err(Error::not_found(format!("Session {id}"))),
        },
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl VotingSession {
        pub fn example() -> Self {
            Self {
                id: Id::new(),
                session: SessionCore::new(&Voter::example(), "station-1"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mongodb::bson::to_document;

    #[test]
    fn lifecycle_is_linear_and_terminal() {
        use SessionStatus::*;
        assert!(Pending.can_advance_to(Voting));
        assert!(Voting.can_advance_to(Completed));
        // No skips, no regressions, no way out of `completed`.
        assert!(!Pending.can_advance_to(Completed));
        assert!(!Voting.can_advance_to(Pending));
        assert!(!Completed.can_advance_to(Pending));
        assert!(!Completed.can_advance_to(Voting));
        assert!(!Completed.can_advance_to(Completed));
    }

    #[test]
    fn status_wire_form_is_snake_case() {
        assert_eq!(
            Bson::from(SessionStatus::Pending),
            Bson::String("pending".to_string())
        );
        assert_eq!(
            Bson::from(SessionStatus::Completed),
            Bson::String("completed".to_string())
        );
    }

    #[test]
    fn new_session_denormalises_the_voter() {
        // The station must be able to serve the voter from the session row
        // alone, with no second registry lookup.
        let voter = Voter::example();
        let session = SessionCore::new(&voter, "station-2");
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.station_id, "station-2");
        assert_eq!(session.voter_email, voter.email);
        assert_eq!(session.voter_regnum, voter.reg_num);
        assert_eq!(session.voter_clan, voter.clan);
        assert_eq!(session.voter_name, voter.name);
        assert_eq!(session.voter_section, voter.section);
        assert_eq!(session.voter_batch, voter.batch);
        assert_eq!(session.voter_year, voter.year);
        assert_eq!(session.completed_at, None);
    }

    #[test]
    fn sessions_serialise_with_flattened_core() {
        let session = VotingSession::example();
        let doc = to_document(&session).unwrap();
        assert!(doc.get_object_id("_id").is_ok());
        assert_eq!(doc.get_str("status").unwrap(), "pending");
        assert_eq!(doc.get_str("station_id").unwrap(), "station-1");
    }
}
