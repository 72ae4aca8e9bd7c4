//! The supervised voting flow: look a voter up, show their ballot for a
//! clan, cast the vote. Stations have their own session-driven surface in
//! [`super::station`].

use mongodb::{bson::doc, Database};
use rocket::http::Status;
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    audit::{self, NewAuditEntry},
    candidate::Candidate,
    mongodb::{Coll, Id},
    rules,
    settings::ElectionSettings,
    vote::{self, Vote, VoteAction, VoterIdentity},
    voter::Voter,
};

pub fn routes() -> Vec<Route> {
    routes![lookup_voter, register_voter, clan_ballot, cast_clan_vote]
}

/// A voter search request from the supervisor console.
#[derive(Debug, Deserialize)]
struct LookupRequest {
    search_term: String,
}

#[post("/voters/lookup", data = "<request>", format = "json")]
async fn lookup_voter(request: Json<LookupRequest>, voters: Coll<Voter>) -> Result<Json<Voter>> {
    let voter = Voter::lookup(&voters, &request.search_term)
        .await?
        .ok_or_else(|| Error::VoterNotFound(request.search_term.clone()))?;
    Ok(Json(voter))
}

/// Ad-hoc self-registration, available only while the corresponding
/// election switch is on.
#[post("/voters/register", data = "<new_voter>", format = "json")]
async fn register_voter(
    new_voter: Json<Voter>,
    voters: Coll<Voter>,
    settings: Coll<ElectionSettings>,
    db: &State<Database>,
) -> Result<Json<Voter>> {
    let settings = ElectionSettings::load(&settings).await?;
    if !settings.allow_adhoc_voters {
        return Err(Error::Status(
            Status::Forbidden,
            "Ad-hoc voter registration is disabled".to_string(),
        ));
    }

    // Friendlier duplicate reporting than the index error alone.
    let duplicate = doc! {
        "$or": [
            {"email": &new_voter.email},
            {"reg_num": &new_voter.reg_num},
        ],
    };
    if voters.find_one(duplicate, None).await?.is_some() {
        return Err(Error::Status(
            Status::Conflict,
            "A voter with that email or registration number already exists".to_string(),
        ));
    }

    let voter = new_voter.0;
    voters.insert_one(&voter, None).await?;
    audit::append(
        &Coll::from_db(db),
        NewAuditEntry::new(
            &voter.email,
            audit::REGISTER_VOTER,
            doc! { "reg_num": &voter.reg_num },
        ),
    )
    .await;
    Ok(Json(voter))
}

/// A voter's ballot for one clan: the candidates they may vote for, plus
/// any vote they have already cast so a console can preselect it.
#[derive(Debug, Serialize)]
struct BallotResponse {
    candidates: Vec<Candidate>,
    existing_vote: Option<Vote>,
}

#[get("/clans/<clan_id>/candidates?<voter>")]
async fn clan_ballot(
    clan_id: &str,
    voter: &str,
    voters: Coll<Voter>,
    votes: Coll<Vote>,
    db: &State<Database>,
) -> Result<Json<BallotResponse>> {
    let voter = voters
        .find_one(doc! { "email": voter }, None)
        .await?
        .ok_or_else(|| Error::VoterNotFound(voter.to_string()))?;

    let candidates =
        rules::resolve_candidates(db, &voter.section, &voter.batch, clan_id).await?;
    let identity = VoterIdentity::from(&voter);
    let existing_vote = votes
        .find_one(vote::conflict_filter(&identity, clan_id), None)
        .await?;

    Ok(Json(BallotResponse {
        candidates,
        existing_vote,
    }))
}

/// What a console submits to cast a vote.
#[derive(Debug, Deserialize)]
struct BallotSpec {
    voter_email: String,
    candidate_id: Id,
    device_hash: Option<String>,
}

/// What every successful cast returns.
#[derive(Debug, Serialize)]
pub(super) struct CastReceipt {
    pub action: VoteAction,
    pub voter_email: String,
    pub clan_id: String,
    pub candidate_id: Id,
}

#[post("/clans/<clan_id>/votes", data = "<ballot>", format = "json")]
async fn cast_clan_vote(
    clan_id: &str,
    ballot: Json<BallotSpec>,
    voters: Coll<Voter>,
    db: &State<Database>,
) -> Result<Json<CastReceipt>> {
    let voter = voters
        .find_one(doc! { "email": &ballot.voter_email }, None)
        .await?
        .ok_or_else(|| Error::VoterNotFound(ballot.voter_email.clone()))?;

    // The supervised flow only ever votes in the voter's own clan.
    if voter.clan != clan_id {
        return Err(Error::Status(
            Status::Forbidden,
            format!("Voter belongs to clan {}, not {clan_id}", voter.clan),
        ));
    }

    let identity = VoterIdentity::from(&voter);
    let (vote, action) = vote::cast_vote(
        db,
        &identity,
        clan_id,
        ballot.candidate_id,
        ballot.0.device_hash,
        None,
    )
    .await?;

    Ok(Json(CastReceipt {
        action,
        voter_email: vote.voter_email,
        clan_id: vote.clan_id,
        candidate_id: vote.candidate_id,
    }))
}
