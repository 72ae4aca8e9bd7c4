use mongodb::bson::{doc, to_bson, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::mongodb::Coll;

/// A registered voter. The email is the primary handle; the registration
/// number is the secondary one. Both are unique (enforced by index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Voter {
    pub email: String,
    pub reg_num: String,
    pub name: String,
    pub gender: Gender,
    /// Which clan this voter votes in.
    pub clan: String,
    /// Cohort classifiers used by the eligibility rules.
    pub section: String,
    pub batch: String,
    pub year: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
    #[serde(rename = "Prefer not to say")]
    PreferNotToSay,
}

impl From<Gender> for Bson {
    fn from(gender: Gender) -> Self {
        to_bson(&gender).expect("Serialisation is infallible")
    }
}

impl Voter {
    /// Find a single voter by case-insensitive partial match on email or
    /// registration number. `None` means nothing matched; if several voters
    /// match, the first by natural order is taken, so operators should use
    /// terms as specific as possible.
    pub async fn lookup(voters: &Coll<Voter>, term: &str) -> Result<Option<Voter>> {
        let term = term.trim();
        if term.is_empty() {
            return Ok(None);
        }
        Ok(voters.find_one(lookup_filter(term), None).await?)
    }
}

fn lookup_filter(term: &str) -> Document {
    let pattern = regex_escape(term);
    doc! {
        "$or": [
            {"email": {"$regex": &pattern, "$options": "i"}},
            {"reg_num": {"$regex": &pattern, "$options": "i"}},
        ],
    }
}

/// Escape a user-supplied search term so it matches literally inside a
/// `$regex` query.
fn regex_escape(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if r"\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Voter {
        pub fn example() -> Self {
            Self {
                email: "ada@campus.edu".to_string(),
                reg_num: "R-1001".to_string(),
                name: "Ada Achebe".to_string(),
                gender: Gender::Female,
                clan: "X".to_string(),
                section: "MBA".to_string(),
                batch: "MBA".to_string(),
                year: 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use mongodb::bson::{from_bson, to_document};

    #[test]
    fn regex_escape_neutralises_metacharacters() {
        assert_eq!(regex_escape("a.b+c"), r"a\.b\+c");
        assert_eq!(regex_escape("r(1)$"), r"r\(1\)\$");
        assert_eq!(regex_escape("plain-123"), "plain-123");
    }

    #[test]
    fn lookup_filter_matches_either_handle() {
        let filter = lookup_filter("ada@campus");
        let alternatives = filter.get_array("$or").unwrap();
        assert_eq!(alternatives.len(), 2);
    }

    #[test]
    fn gender_uses_original_wire_names() {
        let doc = to_document(&Voter::example()).unwrap();
        assert_eq!(doc.get_str("gender").unwrap(), "Female");
        let gender: Gender = from_bson(Bson::String("Prefer not to say".to_string())).unwrap();
        assert_eq!(gender, Gender::PreferNotToSay);
    }
}
