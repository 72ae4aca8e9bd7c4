//! The results aggregator. Everything here is a pure fold over the ledger;
//! the handler only fetches and gates.

use std::collections::HashMap;

use mongodb::bson::doc;
use rocket::http::Status;
use rocket::{futures::TryStreamExt, serde::json::Json, Route};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{
    candidate::Candidate,
    clan::Clan,
    mongodb::Coll,
    settings::ElectionSettings,
    vote::{self, Vote},
    voter::{Gender, Voter},
};

pub fn routes() -> Vec<Route> {
    routes![election_results]
}

#[derive(Debug, Serialize)]
struct CandidateStanding {
    candidate: Candidate,
    votes: u64,
}

#[derive(Debug, Serialize)]
struct ClanStandings {
    clan: Clan,
    total_votes: u64,
    candidates: Vec<CandidateStanding>,
}

#[derive(Debug, Serialize)]
struct ResultsResponse {
    total_votes: u64,
    clans: Vec<ClanStandings>,
    votes_by_batch: HashMap<String, u64>,
    votes_by_gender: HashMap<Gender, u64>,
}

/// Full election results, refused until the administrators flip
/// `publish_results`.
#[get("/results")]
async fn election_results(
    settings: Coll<ElectionSettings>,
    votes: Coll<Vote>,
    candidates: Coll<Candidate>,
    clans: Coll<Clan>,
    voters: Coll<Voter>,
) -> Result<Json<ResultsResponse>> {
    let settings = ElectionSettings::load(&settings).await?;
    if !settings.publish_results {
        return Err(Error::Status(
            Status::Forbidden,
            "Results have not been published".to_string(),
        ));
    }

    let votes: Vec<Vote> = votes.find(None, None).await?.try_collect().await?;
    let candidates: Vec<Candidate> = candidates
        .find(doc! { "is_active": true }, None)
        .await?
        .try_collect()
        .await?;
    let clans: Vec<Clan> = clans.find(None, None).await?.try_collect().await?;
    let voters: Vec<Voter> = voters.find(None, None).await?.try_collect().await?;

    Ok(Json(aggregate(votes, candidates, clans, voters)))
}

fn aggregate(
    votes: Vec<Vote>,
    candidates: Vec<Candidate>,
    mut clans: Vec<Clan>,
    voters: Vec<Voter>,
) -> ResultsResponse {
    let tally = vote::tally(&votes);

    let mut votes_by_batch: HashMap<String, u64> = HashMap::new();
    for vote in &votes {
        *votes_by_batch.entry(vote.batch.clone()).or_default() += 1;
    }

    // The ledger stores no gender; join back to the registry by email.
    // Voters deleted since they voted simply drop out of this breakdown.
    let genders: HashMap<&str, Gender> = voters
        .iter()
        .map(|voter| (voter.email.as_str(), voter.gender))
        .collect();
    let mut votes_by_gender: HashMap<Gender, u64> = HashMap::new();
    for vote in &votes {
        if let Some(gender) = genders.get(vote.voter_email.as_str()) {
            *votes_by_gender.entry(*gender).or_default() += 1;
        }
    }

    let mut per_clan: HashMap<String, Vec<CandidateStanding>> = HashMap::new();
    for candidate in candidates {
        let clan_id = candidate.clan_id.clone();
        let votes = tally.get(&candidate.id).copied().unwrap_or(0);
        per_clan
            .entry(clan_id)
            .or_default()
            .push(CandidateStanding { candidate, votes });
    }

    clans.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.id.cmp(&b.id))
    });
    let clans = clans
        .into_iter()
        .map(|clan| {
            let mut standings = per_clan.remove(&clan.id).unwrap_or_default();
            standings.sort_by(|a, b| {
                b.votes
                    .cmp(&a.votes)
                    .then_with(|| a.candidate.name.cmp(&b.candidate.name))
            });
            let total_votes = standings.iter().map(|s| s.votes).sum();
            ClanStandings {
                clan,
                total_votes,
                candidates: standings,
            }
        })
        .collect();

    ResultsResponse {
        total_votes: votes.len() as u64,
        clans,
        votes_by_batch,
        votes_by_gender,
    }
}
