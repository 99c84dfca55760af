use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::cli::CacheCommands;
use crate::commands::common::open_service;
use crate::commands::status::{format_cache_line, CacheView};
use crate::config::Context;
use crate::error::CliError;

const INSTALL_WAIT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub async fn run_cache(command: CacheCommands, ctx: &Context) -> Result<(), CliError> {
    match command {
        CacheCommands::Install => run_cache_install(ctx).await,
        CacheCommands::Status { json } => run_cache_status(json, ctx).await,
    }
}

async fn run_cache_install(ctx: &Context) -> Result<(), CliError> {
    let settings = ctx.load_settings()?;
    if settings.precache.is_empty() {
        println!("No pages configured for precaching");
        return Ok(());
    }

    let service = open_service(ctx).await?;
    if service.is_degraded() {
        service.teardown().await;
        return Err(CliError::CacheDisabled);
    }

    // The install itself is started by the service at startup
    let version = settings.app_version;
    let deadline = Instant::now() + INSTALL_WAIT;
    let mut saw_install = false;
    let result = loop {
        let status = match service.cache_status().await {
            Ok(status) => status,
            Err(error) => break Err(error.into()),
        };
        if status.active.as_deref() == Some(version.as_str())
            || status.waiting.as_deref() == Some(version.as_str())
        {
            break Ok(CacheView::from(status));
        }
        if status.installing.is_some() {
            saw_install = true;
        } else if saw_install {
            break Err(CliError::InstallFailed(version.clone()));
        }
        if Instant::now() >= deadline {
            break Err(CliError::InstallTimeout);
        }
        sleep(POLL_INTERVAL).await;
    };
    service.teardown().await;

    let cache = result?;
    if cache.active.as_deref() == Some(version.as_str()) {
        println!("Serving {version} offline ({} pages)", cache.precached);
    } else {
        println!("Precached {version}; it takes over once open sessions close");
    }
    Ok(())
}

async fn run_cache_status(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    if service.is_degraded() {
        service.teardown().await;
        return Err(CliError::CacheDisabled);
    }
    let status = service.cache_status().await;
    service.teardown().await;
    let cache = CacheView::from(status?);

    if as_json {
        println!("{}", serde_json::to_string_pretty(&cache)?);
    } else {
        println!("{}", format_cache_line(&cache));
    }
    Ok(())
}
