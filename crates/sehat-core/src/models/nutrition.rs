//! Nutrition log and CHW share models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One meal recorded in the nutrition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutritionEntry {
    /// What was eaten, as typed or dictated
    pub food: String,
    /// When it was logged (Unix ms, 0 for entries imported from the legacy format)
    pub logged_at: i64,
}

impl NutritionEntry {
    /// Create an entry stamped with the current time.
    pub fn new(food: impl Into<String>) -> Result<Self> {
        let food = food.into().trim().to_string();
        if food.is_empty() {
            return Err(Error::InvalidInput("Food description cannot be empty".into()));
        }
        Ok(Self {
            food,
            logged_at: chrono::Utc::now().timestamp_millis(),
        })
    }
}

/// Nutrition summary shared with a community health worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChwShare {
    /// Foods in the log, oldest first
    pub nutrition_log: Vec<String>,
    /// Day of the share (`YYYY-MM-DD`)
    pub date: String,
}

impl ChwShare {
    /// Build a share from the current log.
    pub fn from_entries(entries: &[NutritionEntry], date: NaiveDate) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::InvalidInput(
                "Nothing to share: the nutrition log is empty".into(),
            ));
        }
        Ok(Self {
            nutrition_log: entries.iter().map(|entry| entry.food.clone()).collect(),
            date: date.format("%Y-%m-%d").to_string(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Current(NutritionEntry),
    Legacy(String),
}

/// Decode a stored `nutritionLog` value.
///
/// Accepts both the structured entry list and the plain string array the web
/// pages wrote to `localStorage`.
pub fn decode_nutrition_log(raw: &str) -> Result<Vec<NutritionEntry>> {
    let stored: Vec<StoredEntry> = serde_json::from_str(raw)?;
    Ok(stored
        .into_iter()
        .map(|entry| match entry {
            StoredEntry::Current(entry) => entry,
            StoredEntry::Legacy(food) => NutritionEntry { food, logged_at: 0 },
        })
        .collect())
}
