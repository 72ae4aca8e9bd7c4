use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    audit::NewAuditEntry,
    candidate::{Candidate, CandidateCore},
    clan::Clan,
    rules::{NewVotingRule, VotingRule},
    session::{NewSession, VotingSession},
    settings::ElectionSettings,
    vote::{NewVote, Vote},
    voter::Voter,
};

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

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Voter registry
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}

// Candidates
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for CandidateCore {
    const NAME: &'static str = CANDIDATES;
}

// Clans
const CLANS: &str = "clans";
impl MongoCollection for Clan {
    const NAME: &'static str = CLANS;
}

// Voting rules
const VOTING_RULES: &str = "voting_rules";
impl MongoCollection for VotingRule {
    const NAME: &'static str = VOTING_RULES;
}
impl MongoCollection for NewVotingRule {
    const NAME: &'static str = VOTING_RULES;
}

// Election settings singleton
const ELECTION_SETTINGS: &str = "election_settings";
impl MongoCollection for ElectionSettings {
    const NAME: &'static str = ELECTION_SETTINGS;
}

// The vote ledger
const VOTES: &str = "votes";
impl MongoCollection for Vote {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for NewVote {
    const NAME: &'static str = VOTES;
}

// Voting sessions
const VOTING_SESSIONS: &str = "voting_sessions";
impl MongoCollection for VotingSession {
    const NAME: &'static str = VOTING_SESSIONS;
}
impl MongoCollection for NewSession {
    const NAME: &'static str = VOTING_SESSIONS;
}

// Audit log
const AUDIT_LOG: &str = "audit_log";
impl MongoCollection for NewAuditEntry {
    const NAME: &'static str = AUDIT_LOG;
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Voter registry: both handles are unique.
    let email_index = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(unique.clone())
        .build();
    let regnum_index = IndexModel::builder()
        .keys(doc! {"reg_num": 1})
        .options(unique.clone())
        .build();
    Coll::<Voter>::from_db(db)
        .create_indexes([email_index, regnum_index], None)
        .await?;

    // Vote ledger: the conflict target of every cast. This is the invariant
    // that at most one vote exists per (voter_email, clan_id, batch).
    let vote_index = IndexModel::builder()
        .keys(doc! {"voter_email": 1, "clan_id": 1, "batch": 1})
        .options(unique)
        .build();
    Coll::<Vote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Sessions: stations query their own backlog on reconnect.
    let session_index = IndexModel::builder()
        .keys(doc! {"station_id": 1, "status": 1})
        .build();
    Coll::<VotingSession>::from_db(db)
        .create_index(session_index, None)
        .await?;

    Ok(())
}
