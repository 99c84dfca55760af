use chrono::{Local, NaiveDate};
use sehat_core::cache::OFFLINE_NOTICE;

use crate::commands::common::{finish, open_service};
use crate::config::Context;
use crate::error::CliError;

pub async fn run_share(date: Option<NaiveDate>, ctx: &Context) -> Result<(), CliError> {
    let date = date.unwrap_or_else(|| Local::now().date_naive());

    let service = open_service(ctx).await?;
    let action = match service.share_with_chw(date) {
        Ok(action) => action,
        Err(error) => {
            service.teardown().await;
            return Err(error.into());
        }
    };
    let count = action
        .payload
        .get("nutritionLog")
        .and_then(serde_json::Value::as_array)
        .map_or(0, Vec::len);
    println!("Shared {count} meal(s) for {date} with your health worker ({})", action.id);
    if service.is_offline() {
        println!("{OFFLINE_NOTICE}");
    }

    finish(service).await
}
