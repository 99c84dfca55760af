//! Data models for SehatLink

mod action;
mod nutrition;

pub use action::{ActionId, ActionKind, ActionStatus, QueuedAction};
pub use nutrition::{decode_nutrition_log, ChwShare, NutritionEntry};
