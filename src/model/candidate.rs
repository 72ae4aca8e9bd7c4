use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;
use crate::model::voter::Gender;

/// Core candidate data, as stored in the database.
///
/// Only candidates with `is_active` set may appear on a ballot or receive
/// votes. A candidate referenced by a vote is never hard-deleted, only
/// deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub name: String,
    pub email: Option<String>,
    pub gender: Gender,
    /// The clan this candidate is running in.
    pub clan_id: String,
    pub section: String,
    pub batch: String,
    pub year: u32,
    pub manifesto: Option<String>,
    pub photo_url: Option<String>,
    pub is_active: bool,
}

/// A candidate without an ID, ready for insertion.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

impl DerefMut for Candidate {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.candidate
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Candidate {
        pub fn example(name: &str, batch: &str) -> Self {
            Self {
                id: Id::new(),
                candidate: CandidateCore {
                    name: name.to_string(),
                    email: None,
                    gender: Gender::Male,
                    clan_id: "X".to_string(),
                    section: "MBA".to_string(),
                    batch: batch.to_string(),
                    year: 1,
                    manifesto: None,
                    photo_url: None,
                    is_active: true,
                },
            }
        }

        pub fn example_in_section(name: &str, section: &str, batch: &str) -> Self {
            let mut candidate = Self::example(name, batch);
            candidate.candidate.section = section.to_string();
            candidate
        }
    }
}
