use serde::Serialize;

use crate::commands::common::{format_timestamp, open_service};
use crate::config::Context;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MealsView {
    meals: Vec<sehat_core::models::NutritionEntry>,
    pending_share: Option<sehat_core::models::ChwShare>,
}

pub async fn run_meals(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let view = MealsView {
        meals: service.nutrition_log()?,
        pending_share: service.pending_share()?,
    };
    service.teardown().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if view.meals.is_empty() {
        println!("No meals logged yet");
    }
    for (index, entry) in view.meals.iter().enumerate() {
        println!(
            "{:>3}. {}  {}",
            index + 1,
            format_timestamp(entry.logged_at),
            entry.food
        );
    }
    if let Some(share) = view.pending_share {
        println!(
            "Last share: {} ({} meal(s))",
            share.date,
            share.nutrition_log.len()
        );
    }
    Ok(())
}
