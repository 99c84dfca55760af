use sehat_core::sync::CycleOutcome;

use crate::commands::common::{format_report, open_service};
use crate::config::Context;
use crate::error::CliError;

pub async fn run_flush(ctx: &Context) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let report = service.flush().await;
    let pending = service.pending_count();
    service.teardown().await;

    let report = report?;
    if report.outcome == CycleOutcome::Offline && report.delivered.is_empty() {
        println!("Offline; {} action(s) stay queued", pending?);
    } else {
        println!("{}", format_report(&report));
    }
    Ok(())
}
