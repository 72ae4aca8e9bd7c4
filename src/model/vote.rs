//! The vote ledger: at most one vote per `(voter_email, clan_id, batch)`,
//! written as an upsert on exactly that key so concurrent casts for the
//! same voter collapse deterministically to the last accepted write.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime, Document};
use mongodb::options::ReplaceOptions;
use mongodb::Database;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::audit::{self, NewAuditEntry};
use crate::model::candidate::Candidate;
use crate::model::mongodb::{Coll, Id};
use crate::model::rules;
use crate::model::session::VotingSession;
use crate::model::settings::ElectionSettings;
use crate::model::voter::Voter;

/// The identity fields the ledger needs to key and gate a vote. Built from
/// the registry row in the supervised flow, or from the denormalised
/// session fields in the station flow.
#[derive(Debug, Clone, PartialEq)]
pub struct VoterIdentity {
    pub email: String,
    pub reg_num: String,
    pub section: String,
    pub batch: String,
}

impl From<&Voter> for VoterIdentity {
    fn from(voter: &Voter) -> Self {
        Self {
            email: voter.email.clone(),
            reg_num: voter.reg_num.clone(),
            section: voter.section.clone(),
            batch: voter.batch.clone(),
        }
    }
}

impl From<&VotingSession> for VoterIdentity {
    fn from(session: &VotingSession) -> Self {
        Self {
            email: session.voter_email.clone(),
            reg_num: session.voter_regnum.clone(),
            section: session.voter_section.clone(),
            batch: session.voter_batch.clone(),
        }
    }
}

/// Core vote data, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVote {
    pub voter_email: String,
    pub voter_regnum: String,
    pub clan_id: String,
    pub batch: String,
    pub candidate_id: Id,
    pub device_hash: Option<String>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub vote: NewVote,
}

impl Deref for Vote {
    type Target = NewVote;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

impl DerefMut for Vote {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.vote
    }
}

impl NewVote {
    fn new(
        voter: &VoterIdentity,
        clan_id: &str,
        candidate_id: Id,
        device_hash: Option<String>,
    ) -> Self {
        Self {
            voter_email: voter.email.clone(),
            voter_regnum: voter.reg_num.clone(),
            clan_id: clan_id.to_string(),
            batch: voter.batch.clone(),
            candidate_id,
            device_hash,
            created_at: Utc::now(),
        }
    }
}

/// Whether a cast created a fresh vote or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteAction {
    Cast,
    Update,
}

impl VoteAction {
    pub fn audit_action(self) -> &'static str {
        match self {
            Self::Cast => audit::CAST_VOTE,
            Self::Update => audit::UPDATE_VOTE,
        }
    }
}

/// The uniqueness key: the upsert's conflict target.
pub fn conflict_filter(voter: &VoterIdentity, clan_id: &str) -> Document {
    doc! {
        "voter_email": &voter.email,
        "clan_id": clan_id,
        "batch": &voter.batch,
    }
}

/// Decide whether a cast may proceed given an existing vote for the key.
pub fn vote_action(already_voted: bool, allow_changes: bool) -> Result<VoteAction> {
    match (already_voted, allow_changes) {
        (false, _) => Ok(VoteAction::Cast),
        (true, true) => Ok(VoteAction::Update),
        (true, false) => Err(Error::VoteAlreadyCast),
    }
}

/// Containment check: the chosen candidate must be on the resolved ballot.
pub fn ensure_eligible(eligible: &[Candidate], candidate_id: Id) -> Result<()> {
    if eligible.iter().any(|c| c.id == candidate_id) {
        Ok(())
    } else {
        Err(Error::CandidateNotEligible)
    }
}

/// Cast (or, when permitted, replace) a vote.
///
/// Preconditions are checked in order, short-circuiting on the first
/// failure: election open, not frozen, candidate eligible, no locked
/// existing vote. The checks are advisory reads; the only mutation is the
/// final upsert, so a failed call leaves the ledger untouched. The
/// check-then-write pair is not transactional: if two casts for the same
/// key race, the unique index still collapses them to a single row and the
/// later write wins.
pub async fn cast_vote(
    db: &Database,
    voter: &VoterIdentity,
    clan_id: &str,
    candidate_id: Id,
    device_hash: Option<String>,
    session_id: Option<Id>,
) -> Result<(NewVote, VoteAction)> {
    let settings = ElectionSettings::load(&Coll::from_db(db)).await?;
    settings.ensure_votable(Utc::now())?;

    let eligible = rules::resolve_candidates(db, &voter.section, &voter.batch, clan_id).await?;
    ensure_eligible(&eligible, candidate_id)?;

    let filter = conflict_filter(voter, clan_id);
    let votes = Coll::<Vote>::from_db(db);
    let existing = votes.find_one(filter.clone(), None).await?;
    let action = vote_action(existing.is_some(), settings.allow_vote_changes)?;

    // Upsert keyed on the conflict target: concurrent casts for the same
    // key race to "last write wins", never to duplicate rows.
    let vote = NewVote::new(voter, clan_id, candidate_id, device_hash);
    let options = ReplaceOptions::builder().upsert(true).build();
    Coll::<NewVote>::from_db(db)
        .replace_one(filter, &vote, options)
        .await?;

    let mut payload = doc! {
        "clan_id": clan_id,
        "candidate_id": *candidate_id,
    };
    if let Some(session_id) = session_id {
        payload.insert("station_session", *session_id);
    }
    audit::append(
        &Coll::from_db(db),
        NewAuditEntry::new(&voter.email, action.audit_action(), payload),
    )
    .await;

    Ok((vote, action))
}

/// Per-candidate vote counts. Pure fold over ledger rows.
pub fn tally(votes: &[Vote]) -> HashMap<Id, u64> {
    let mut counts = HashMap::new();
    for vote in votes {
        *counts.entry(vote.candidate_id).or_insert(0) += 1;
    }
    counts
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Vote {
        pub fn example(candidate_id: Id, voter_email: &str, batch: &str) -> Self {
            Self {
                id: Id::new(),
                vote: NewVote {
                    voter_email: voter_email.to_string(),
                    voter_regnum: "R-1001".to_string(),
                    clan_id: "X".to_string(),
                    batch: batch.to_string(),
                    candidate_id,
                    device_hash: None,
                    created_at: Utc::now(),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cast_always_allowed() {
        assert_eq!(vote_action(false, false).unwrap(), VoteAction::Cast);
        assert_eq!(vote_action(false, true).unwrap(), VoteAction::Cast);
    }

    #[test]
    fn recast_gated_by_allow_changes() {
        // Scenario: second cast for the same key is refused while changes
        // are disabled, and becomes an update once they are allowed.
        assert!(matches!(
            vote_action(true, false),
            Err(Error::VoteAlreadyCast)
        ));
        assert_eq!(vote_action(true, true).unwrap(), VoteAction::Update);
    }

    #[test]
    fn eligibility_containment() {
        let ballot = vec![
            Candidate::example("Abeni", "MBA"),
            Candidate::example("Bola", "MBA"),
        ];
        assert!(ensure_eligible(&ballot, ballot[0].id).is_ok());
        assert!(matches!(
            ensure_eligible(&ballot, Id::new()),
            Err(Error::CandidateNotEligible)
        ));
        assert!(matches!(
            ensure_eligible(&[], Id::new()),
            Err(Error::CandidateNotEligible)
        ));
    }

    #[test]
    fn conflict_filter_is_exactly_the_uniqueness_key() {
        let voter = VoterIdentity::from(&Voter::example());
        let filter = conflict_filter(&voter, "X");
        assert_eq!(
            filter.keys().collect::<Vec<_>>(),
            vec!["voter_email", "clan_id", "batch"]
        );
        assert_eq!(filter.get_str("voter_email").unwrap(), voter.email);
        assert_eq!(filter.get_str("clan_id").unwrap(), "X");
        assert_eq!(filter.get_str("batch").unwrap(), voter.batch);
    }

    #[test]
    fn audit_actions_distinguish_cast_from_update() {
        assert_eq!(VoteAction::Cast.audit_action(), "CAST_VOTE");
        assert_eq!(VoteAction::Update.audit_action(), "UPDATE_VOTE");
    }

    #[test]
    fn tally_counts_per_candidate() {
        let (a, b) = (Id::new(), Id::new());
        let votes = vec![
            Vote::example(a, "v1@campus.edu", "MBA"),
            Vote::example(a, "v2@campus.edu", "MBA"),
            Vote::example(b, "v3@campus.edu", "PHD"),
        ];
        let counts = tally(&votes);
        assert_eq!(counts[&a], 2);
        assert_eq!(counts[&b], 1);
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn identity_from_session_matches_identity_from_voter() {
        // The station flow keys votes off the denormalised session fields;
        // they must agree with the registry row the session was built from.
        let voter = Voter::example();
        let session = VotingSession::example();
        assert_eq!(
            VoterIdentity::from(&voter),
            VoterIdentity::from(&session)
        );
    }
}
