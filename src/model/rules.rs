//! The eligibility rule engine: given a voter's cohort and a clan, which
//! candidates may they vote for?

use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, serde_helpers::chrono_datetime_as_bson_datetime};
use mongodb::Database;
use rocket::futures::TryStreamExt;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::candidate::Candidate;
use crate::model::mongodb::{Coll, Id};

/// The reserved cohort value meaning "any".
pub const WILDCARD: &str = "All";

/// An administrator-authored eligibility statement mapping a voter cohort
/// to the candidate cohort they may vote for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingRuleCore {
    /// Which voters this rule applies to. `"All"` is a wildcard.
    pub voter_section: String,
    pub voter_batch: String,
    /// Which candidates it opens up. `None` or `"All"` means no constraint.
    pub candidate_section: Option<String>,
    pub candidate_batch: Option<String>,
    /// Candidates are already scoped to the voter's clan, so this flag is
    /// satisfied by construction; it is kept as declarative data.
    pub same_clan_only: bool,
    pub is_active: bool,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

/// A rule without an ID, ready for insertion.
pub type NewVotingRule = VotingRuleCore;

/// A rule from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingRule {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub rule: VotingRuleCore,
}

impl Deref for VotingRule {
    type Target = VotingRuleCore;

    fn deref(&self) -> &Self::Target {
        &self.rule
    }
}

impl DerefMut for VotingRule {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.rule
    }
}

impl VotingRuleCore {
    /// Does this rule apply to a voter in the given cohort?
    pub fn matches(&self, section: &str, batch: &str) -> bool {
        self.is_active
            && cohort_matches(&self.voter_section, section)
            && cohort_matches(&self.voter_batch, batch)
    }

    /// Does this rule put the given candidate on the ballot?
    /// Clan scoping has already happened; only cohort constraints remain.
    pub fn permits(&self, candidate: &Candidate) -> bool {
        opt_cohort_matches(&self.candidate_section, &candidate.section)
            && opt_cohort_matches(&self.candidate_batch, &candidate.batch)
    }

    fn is_batch_exact(&self) -> bool {
        self.voter_batch != WILDCARD
    }
}

fn cohort_matches(rule_value: &str, actual: &str) -> bool {
    rule_value == WILDCARD || rule_value == actual
}

fn opt_cohort_matches(rule_value: &Option<String>, actual: &str) -> bool {
    match rule_value {
        Some(value) => cohort_matches(value, actual),
        None => true,
    }
}

/// Select the applicable rule for a voter cohort: an exact `voter_batch`
/// beats the wildcard, and among equally specific rules the most recently
/// created wins (rule ID as the final stable key).
pub fn applicable_rule<'r>(
    rules: &'r [VotingRule],
    section: &str,
    batch: &str,
) -> Option<&'r VotingRule> {
    rules
        .iter()
        .filter(|rule| rule.matches(section, batch))
        .max_by_key(|rule| (rule.is_batch_exact(), rule.created_at, rule.id))
}

/// Apply the applicable rule (or the no-rule fallback) to the clan's active
/// candidates. With no applicable rule, voters see exactly the active
/// candidates of their own batch. An empty ballot is a valid outcome.
pub fn select_eligible(
    rules: &[VotingRule],
    section: &str,
    batch: &str,
    candidates: Vec<Candidate>,
) -> Vec<Candidate> {
    let mut eligible: Vec<Candidate> = match applicable_rule(rules, section, batch) {
        Some(rule) => candidates.into_iter().filter(|c| rule.permits(c)).collect(),
        None => candidates.into_iter().filter(|c| c.batch == batch).collect(),
    };
    eligible.sort_by(|a, b| a.name.cmp(&b.name));
    eligible
}

/// Resolve the full candidate set a voter in the given cohort may vote for
/// within a clan.
pub async fn resolve_candidates(
    db: &Database,
    section: &str,
    batch: &str,
    clan_id: &str,
) -> Result<Vec<Candidate>> {
    let rule_filter = doc! {
        "is_active": true,
        "voter_section": {"$in": [section, WILDCARD]},
    };
    let rules: Vec<VotingRule> = Coll::<VotingRule>::from_db(db)
        .find(rule_filter, None)
        .await?
        .try_collect()
        .await?;

    let candidate_filter = doc! {
        "clan_id": clan_id,
        "is_active": true,
    };
    let candidates: Vec<Candidate> = Coll::<Candidate>::from_db(db)
        .find(candidate_filter, None)
        .await?
        .try_collect()
        .await?;

    Ok(select_eligible(&rules, section, batch, candidates))
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    use chrono::Duration;

    impl VotingRule {
        pub fn example(voter_section: &str, voter_batch: &str) -> Self {
            Self {
                id: Id::new(),
                rule: VotingRuleCore {
                    voter_section: voter_section.to_string(),
                    voter_batch: voter_batch.to_string(),
                    candidate_section: None,
                    candidate_batch: None,
                    same_clan_only: true,
                    is_active: true,
                    created_at: Utc::now(),
                },
            }
        }

        pub fn targeting(mut self, section: Option<&str>, batch: Option<&str>) -> Self {
            self.rule.candidate_section = section.map(str::to_string);
            self.rule.candidate_batch = batch.map(str::to_string);
            self
        }

        pub fn created_days_ago(mut self, days: i64) -> Self {
            self.rule.created_at = Utc::now() - Duration::days(days);
            self
        }

        pub fn inactive(mut self) -> Self {
            self.rule.is_active = false;
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn no_rules_falls_back_to_own_batch() {
        // Scenario: voter of batch MBA with zero configured rules sees only
        // active MBA candidates of the clan.
        let candidates = vec![
            Candidate::example("Bola", "MBA"),
            Candidate::example("Abeni", "MBA"),
            Candidate::example("Chidi", "PHD"),
        ];
        let eligible = select_eligible(&[], "MBA", "MBA", candidates);
        assert_eq!(names(&eligible), vec!["Abeni", "Bola"]);
    }

    #[test]
    fn empty_ballot_is_valid() {
        let candidates = vec![Candidate::example("Chidi", "PHD")];
        let eligible = select_eligible(&[], "MBA", "MBA", candidates);
        assert!(eligible.is_empty());
    }

    #[test]
    fn inactive_rules_never_apply() {
        let rules = vec![VotingRule::example("MBA", "MBA").inactive()];
        assert!(applicable_rule(&rules, "MBA", "MBA").is_none());
    }

    #[test]
    fn exact_batch_beats_wildcard() {
        // Scenario: a rule for (MBA, batch 3) restricting the ballot to
        // batch 3 exists alongside a wildcard-batch rule; the batch-3 voter
        // must never see batch-11 candidates.
        let specific = VotingRule::example("MBA", "3").targeting(Some("MBA"), Some("3"));
        let wildcard = VotingRule::example("MBA", WILDCARD).targeting(None, None);
        let rules = vec![wildcard, specific.clone()];

        let chosen = applicable_rule(&rules, "MBA", "3").unwrap();
        assert_eq!(chosen.id, specific.id);

        let candidates = vec![
            Candidate::example_in_section("Young", "MBA", "3"),
            Candidate::example_in_section("Old", "MBA", "11"),
            Candidate::example_in_section("Foreign", "PHD", "3"),
        ];
        let eligible = select_eligible(&rules, "MBA", "3", candidates);
        assert_eq!(names(&eligible), vec!["Young"]);
    }

    #[test]
    fn equally_specific_ties_break_on_recency() {
        let older = VotingRule::example("MBA", "MBA").created_days_ago(2);
        let newer = VotingRule::example("MBA", "MBA").created_days_ago(1);
        let rules = vec![older, newer.clone()];
        assert_eq!(applicable_rule(&rules, "MBA", "MBA").unwrap().id, newer.id);

        // Order of the slice does not matter.
        let mut reversed = rules;
        reversed.reverse();
        assert_eq!(
            applicable_rule(&reversed, "MBA", "MBA").unwrap().id,
            newer.id
        );
    }

    #[test]
    fn wildcard_section_rule_applies_to_anyone() {
        let rules = vec![VotingRule::example(WILDCARD, WILDCARD)];
        assert!(applicable_rule(&rules, "HHM", "HHM").is_some());
        assert!(applicable_rule(&rules, "SEP", "1").is_some());
    }

    #[test]
    fn rule_opens_ballot_across_batches() {
        // A wildcard-target rule lets a voter vote outside their own batch,
        // which the fallback would never allow.
        let rules = vec![VotingRule::example("MBA", "MBA").targeting(None, None)];
        let candidates = vec![
            Candidate::example("Own", "MBA"),
            Candidate::example("Other", "PHD"),
        ];
        let eligible = select_eligible(&rules, "MBA", "MBA", candidates);
        assert_eq!(names(&eligible), vec!["Other", "Own"]);
    }
}
