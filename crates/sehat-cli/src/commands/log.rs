use sehat_core::cache::OFFLINE_NOTICE;

use crate::commands::common::{finish, normalize_food, open_service};
use crate::config::Context;
use crate::error::CliError;

pub async fn run_log(food_parts: &[String], ctx: &Context) -> Result<(), CliError> {
    let food = normalize_food(food_parts).ok_or(CliError::EmptyFood)?;

    let service = open_service(ctx).await?;
    let action = service.log_nutrition_entry(&food)?;
    println!("Logged \"{food}\" ({})", action.id);
    if service.is_offline() {
        println!("{OFFLINE_NOTICE}");
    }

    finish(service).await
}
