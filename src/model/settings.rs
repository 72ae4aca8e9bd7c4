use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_document};
use mongodb::error::Error as DbError;
use mongodb::options::UpdateOptions;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::mongodb::{serde_option_datetime, Coll};

/// The `_id` of the one and only settings document.
pub const SETTINGS_ID: i32 = 1;

/// Process-wide election switches, stored as a singleton document and read
/// as a gating precondition by every voting operation. Callers load a fresh
/// copy per operation rather than caching it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionSettings {
    #[serde(rename = "_id")]
    pub id: i32,
    pub is_live: bool,
    pub allow_vote_changes: bool,
    pub allow_adhoc_voters: bool,
    /// Once set, every vote is permanently immutable, regardless of any
    /// other flag.
    pub frozen: bool,
    pub publish_results: bool,
    #[serde(default, with = "serde_option_datetime")]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default, with = "serde_option_datetime")]
    pub end_at: Option<DateTime<Utc>>,
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            id: SETTINGS_ID,
            is_live: false,
            allow_vote_changes: false,
            allow_adhoc_voters: false,
            frozen: false,
            publish_results: false,
            start_at: None,
            end_at: None,
        }
    }
}

impl ElectionSettings {
    /// Load the singleton. Falls back to defaults if the document is
    /// somehow missing (the database fairing seeds it at startup).
    pub async fn load(settings: &Coll<ElectionSettings>) -> Result<Self> {
        Ok(settings
            .find_one(doc! { "_id": SETTINGS_ID }, None)
            .await?
            .unwrap_or_default())
    }

    /// Whether the current time falls inside the configured voting window.
    /// The window only applies when both ends are set.
    pub fn window_open(&self, now: DateTime<Utc>) -> bool {
        match (self.start_at, self.end_at) {
            (Some(start), Some(end)) => start <= now && now <= end,
            _ => true,
        }
    }

    /// The gating preconditions shared by every cast, checked in order:
    /// the election must be open, and must not be frozen.
    pub fn ensure_votable(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_live || !self.window_open(now) {
            return Err(Error::ElectionNotOpen);
        }
        if self.frozen {
            return Err(Error::ResultsFrozen);
        }
        Ok(())
    }
}

/// Seed the settings singleton if it does not exist yet.
///
/// Uses `$setOnInsert` so concurrent server starts cannot clobber settings
/// an administrator already changed.
pub async fn ensure_settings_exist(
    settings: &Coll<ElectionSettings>,
) -> std::result::Result<(), DbError> {
    let mut defaults = to_document(&ElectionSettings::default())?;
    defaults.remove("_id");
    let update = doc! { "$setOnInsert": defaults };
    let options = UpdateOptions::builder().upsert(true).build();
    settings
        .update_one(doc! { "_id": SETTINGS_ID }, update, options)
        .await?;
    Ok(())
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl ElectionSettings {
        /// A live, unfrozen election with no window.
        pub fn example_live() -> Self {
            Self {
                is_live: true,
                ..Default::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;

    #[test]
    fn not_live_means_not_open() {
        let settings = ElectionSettings::default();
        assert!(matches!(
            settings.ensure_votable(Utc::now()),
            Err(Error::ElectionNotOpen)
        ));
    }

    #[test]
    fn freeze_is_reported_after_openness() {
        // A frozen election that is also closed reports closure first,
        // matching the documented precondition order.
        let mut settings = ElectionSettings::default();
        settings.frozen = true;
        assert!(matches!(
            settings.ensure_votable(Utc::now()),
            Err(Error::ElectionNotOpen)
        ));

        settings.is_live = true;
        assert!(matches!(
            settings.ensure_votable(Utc::now()),
            Err(Error::ResultsFrozen)
        ));
    }

    #[test]
    fn window_applies_only_when_both_ends_are_set() {
        let now = Utc::now();
        let mut settings = ElectionSettings::example_live();

        settings.start_at = Some(now + Duration::hours(1));
        assert!(settings.window_open(now), "half-open window is ignored");

        settings.end_at = Some(now + Duration::hours(2));
        assert!(!settings.window_open(now), "window has not started");
        assert!(matches!(
            settings.ensure_votable(now),
            Err(Error::ElectionNotOpen)
        ));

        settings.start_at = Some(now - Duration::hours(1));
        assert!(settings.window_open(now));
        assert!(settings.ensure_votable(now).is_ok());

        settings.end_at = Some(now - Duration::minutes(5));
        assert!(!settings.window_open(now), "window has closed");
    }
}
