//! Administrative surface: election settings, the eligibility rule set, and
//! the destructive registry operations the other surfaces never perform.

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_document, DateTime as BsonDateTime};
use mongodb::options::{FindOptions, UpdateOptions};
use mongodb::Database;
use rocket::http::Status;
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::model::{
    audit::{self, NewAuditEntry},
    candidate::{Candidate, NewCandidate},
    mongodb::{Coll, Id},
    rules::{NewVotingRule, VotingRule},
    settings::{ElectionSettings, SETTINGS_ID},
    vote::Vote,
    voter::Voter,
};

/// Label recorded against administrative audit entries. There is no operator
/// login; the console runs on a trusted machine.
const ADMIN_ACTOR: &str = "admin";

pub fn routes() -> Vec<Route> {
    routes![
        get_settings,
        put_settings,
        list_rules,
        create_rule,
        toggle_rule,
        delete_rule,
        create_candidate,
        deactivate_candidate,
        delete_candidate,
        delete_voter,
    ]
}

#[get("/admin/settings")]
async fn get_settings(settings: Coll<ElectionSettings>) -> Result<Json<ElectionSettings>> {
    Ok(Json(ElectionSettings::load(&settings).await?))
}

#[derive(Debug, Deserialize)]
struct SettingsUpdate {
    is_live: bool,
    allow_vote_changes: bool,
    allow_adhoc_voters: bool,
    frozen: bool,
    publish_results: bool,
    start_at: Option<DateTime<Utc>>,
    end_at: Option<DateTime<Utc>>,
}

/// Replace the election switchboard wholesale. Partial updates are not
/// supported; the console always submits the full set of toggles.
#[put("/admin/settings", data = "<update>", format = "json")]
async fn put_settings(
    update: Json<SettingsUpdate>,
    settings: Coll<ElectionSettings>,
    db: &State<Database>,
) -> Result<Json<ElectionSettings>> {
    let update = update.0;
    let set = doc! {
        "is_live": update.is_live,
        "allow_vote_changes": update.allow_vote_changes,
        "allow_adhoc_voters": update.allow_adhoc_voters,
        "frozen": update.frozen,
        "publish_results": update.publish_results,
        "start_at": update.start_at.map(BsonDateTime::from_chrono),
        "end_at": update.end_at.map(BsonDateTime::from_chrono),
    };
    let options = UpdateOptions::builder().upsert(true).build();
    settings
        .update_one(
            doc! { "_id": SETTINGS_ID },
            doc! { "$set": set.clone() },
            options,
        )
        .await?;

    let entry = NewAuditEntry::new(ADMIN_ACTOR, audit::UPDATE_SETTINGS, set);
    audit::append(&Coll::from_db(db), entry).await;

    Ok(Json(ElectionSettings::load(&settings).await?))
}

#[get("/admin/rules")]
async fn list_rules(rules: Coll<VotingRule>) -> Result<Json<Vec<VotingRule>>> {
    let options = FindOptions::builder()
        .sort(doc! { "created_at": -1 })
        .build();
    let rules: Vec<VotingRule> = rules.find(None, options).await?.try_collect().await?;
    Ok(Json(rules))
}

#[derive(Debug, Deserialize)]
struct RuleSpec {
    voter_section: String,
    voter_batch: String,
    candidate_section: Option<String>,
    candidate_batch: Option<String>,
    #[serde(default)]
    same_clan_only: bool,
}

/// New rules are born active and stamped with the creation time, which the
/// rule engine uses to break ties between equally specific rules.
#[post("/admin/rules", data = "<spec>", format = "json")]
async fn create_rule(
    spec: Json<RuleSpec>,
    new_rules: Coll<NewVotingRule>,
    db: &State<Database>,
) -> Result<Json<VotingRule>> {
    let spec = spec.0;
    let rule = NewVotingRule {
        voter_section: spec.voter_section,
        voter_batch: spec.voter_batch,
        candidate_section: spec.candidate_section,
        candidate_batch: spec.candidate_batch,
        same_clan_only: spec.same_clan_only,
        is_active: true,
        created_at: Utc::now(),
    };
    let id: Id = new_rules
        .insert_one(&rule, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();

    let entry = NewAuditEntry::new(ADMIN_ACTOR, audit::CREATE_RULE, to_document(&rule)?);
    audit::append(&Coll::from_db(db), entry).await;

    Ok(Json(VotingRule { id, rule }))
}

#[patch("/admin/rules/<rule_id>?<active>")]
async fn toggle_rule(
    rule_id: Id,
    active: bool,
    rules: Coll<VotingRule>,
    db: &State<Database>,
) -> Result<()> {
    let result = rules
        .update_one(rule_id.as_doc(), doc! { "$set": { "is_active": active } }, None)
        .await?;
    if result.matched_count == 0 {
        return Err(Error::not_found(format!("Rule {rule_id}")));
    }

    let entry = NewAuditEntry::new(
        ADMIN_ACTOR,
        audit::TOGGLE_RULE,
        doc! { "rule_id": rule_id, "is_active": active },
    );
    audit::append(&Coll::from_db(db), entry).await;
    Ok(())
}

#[delete("/admin/rules/<rule_id>")]
async fn delete_rule(rule_id: Id, rules: Coll<VotingRule>, db: &State<Database>) -> Result<()> {
    let result = rules.delete_one(rule_id.as_doc(), None).await?;
    if result.deleted_count == 0 {
        return Err(Error::not_found(format!("Rule {rule_id}")));
    }

    let entry = NewAuditEntry::new(
        ADMIN_ACTOR,
        audit::DELETE_RULE,
        doc! { "rule_id": rule_id },
    );
    audit::append(&Coll::from_db(db), entry).await;
    Ok(())
}

#[post("/admin/candidates", data = "<candidate>", format = "json")]
async fn create_candidate(
    candidate: Json<NewCandidate>,
    new_candidates: Coll<NewCandidate>,
    db: &State<Database>,
) -> Result<Json<Candidate>> {
    let candidate = candidate.0;
    let id: Id = new_candidates
        .insert_one(&candidate, None)
        .await?
        .inserted_id
        .as_object_id()
        .unwrap() // Valid because the ID comes directly from the DB
        .into();

    let entry = NewAuditEntry::new(
        ADMIN_ACTOR,
        audit::CREATE_CANDIDATE,
        doc! { "candidate_id": id, "name": &candidate.name },
    );
    audit::append(&Coll::from_db(db), entry).await;

    Ok(Json(Candidate { id, candidate }))
}

/// Soft removal: the candidate stays in the ledger's history but leaves
/// every future ballot.
#[post("/admin/candidates/<candidate_id>/deactivate")]
async fn deactivate_candidate(
    candidate_id: Id,
    candidates: Coll<Candidate>,
    db: &State<Database>,
) -> Result<()> {
    let result = candidates
        .update_one(
            candidate_id.as_doc(),
            doc! { "$set": { "is_active": false } },
            None,
        )
        .await?;
    if result.matched_count == 0 {
        return Err(Error::not_found(format!("Candidate {candidate_id}")));
    }

    let entry = NewAuditEntry::new(
        ADMIN_ACTOR,
        audit::DEACTIVATE_CANDIDATE,
        doc! { "candidate_id": candidate_id },
    );
    audit::append(&Coll::from_db(db), entry).await;
    Ok(())
}

/// Hard removal, refused while any vote still points at the candidate.
/// Deactivation is the escape hatch once voting has started.
#[delete("/admin/candidates/<candidate_id>")]
async fn delete_candidate(
    candidate_id: Id,
    candidates: Coll<Candidate>,
    votes: Coll<Vote>,
    db: &State<Database>,
) -> Result<()> {
    let referencing = votes
        .count_documents(doc! { "candidate_id": candidate_id }, None)
        .await?;
    if referencing > 0 {
        return Err(Error::Status(
            Status::Conflict,
            format!("Candidate {candidate_id} has {referencing} votes; deactivate instead"),
        ));
    }

    let result = candidates.delete_one(candidate_id.as_doc(), None).await?;
    if result.deleted_count == 0 {
        return Err(Error::not_found(format!("Candidate {candidate_id}")));
    }

    let entry = NewAuditEntry::new(
        ADMIN_ACTOR,
        audit::DELETE_CANDIDATE,
        doc! { "candidate_id": candidate_id },
    );
    audit::append(&Coll::from_db(db), entry).await;
    Ok(())
}

/// Remove a voter from the registry, refused while their votes stand.
#[delete("/admin/voters/<email>")]
async fn delete_voter(
    email: &str,
    voters: Coll<Voter>,
    votes: Coll<Vote>,
    db: &State<Database>,
) -> Result<()> {
    let cast = votes
        .count_documents(doc! { "voter_email": email }, None)
        .await?;
    if cast > 0 {
        return Err(Error::Status(
            Status::Conflict,
            format!("Voter {email} has cast {cast} votes and cannot be deleted"),
        ));
    }

    let result = voters.delete_one(doc! { "email": email }, None).await?;
    if result.deleted_count == 0 {
        return Err(Error::not_found(format!("Voter {email}")));
    }

    let entry = NewAuditEntry::new(
        ADMIN_ACTOR,
        audit::DELETE_VOTER,
        doc! { "voter_email": email },
    );
    audit::append(&Coll::from_db(db), entry).await;
    Ok(())
}
