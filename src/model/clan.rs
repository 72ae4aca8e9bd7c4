use serde::{Deserialize, Serialize};

/// One of the fixed voting arenas. The short code is the immutable
/// identifier; everything else is display metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clan {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub quote: Option<String>,
    pub main_color: Option<String>,
    pub sub_color: Option<String>,
    pub logo_url: Option<String>,
    pub sort_order: Option<i32>,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Clan {
        pub fn example(id: &str, sort_order: i32) -> Self {
            Self {
                id: id.to_string(),
                name: format!("Clan {id}"),
                quote: None,
                main_color: Some("#B91C1C".to_string()),
                sub_color: None,
                logo_url: None,
                sort_order: Some(sort_order),
            }
        }
    }
}
