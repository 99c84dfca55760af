use sehat_core::ActionStatus;

use crate::commands::common::{format_action_line, open_service};
use crate::config::Context;
use crate::error::CliError;

pub async fn run_queue(
    status: Option<ActionStatus>,
    as_json: bool,
    ctx: &Context,
) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let actions = service.queued_actions();
    service.teardown().await;

    let actions = actions?
        .into_iter()
        .filter(|action| status.is_none_or(|wanted| action.status == wanted))
        .collect::<Vec<_>>();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&actions)?);
    } else if actions.is_empty() {
        println!("Queue is empty");
    } else {
        for action in &actions {
            println!("{}", format_action_line(action));
        }
    }
    Ok(())
}
