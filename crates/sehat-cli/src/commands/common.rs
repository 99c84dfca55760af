use chrono::{Local, TimeZone};
use sehat_core::cache::{HttpAssetFetcher, WorkerPlatform};
use sehat_core::db::Database;
use sehat_core::network::ConnectivityState;
use sehat_core::sync::{CycleOutcome, CycleReport, DeliveryRequest, HttpSyncEndpoint, SyncEndpoint};
use sehat_core::{Error, OfflineSupportService, QueuedAction};

use crate::config::Context;
use crate::error::CliError;

/// Sync endpoint chosen from settings.
pub enum Upstream {
    Http(HttpSyncEndpoint),
    /// No sync service configured; the service stays offline
    Disabled,
}

impl SyncEndpoint for Upstream {
    async fn deliver(&self, request: &DeliveryRequest) -> sehat_core::Result<()> {
        match self {
            Self::Http(endpoint) => endpoint.deliver(request).await,
            Self::Disabled => Err(Error::DeliveryFailed(
                "no sync endpoint configured".to_string(),
            )),
        }
    }
}

pub async fn open_service(ctx: &Context) -> Result<OfflineSupportService, CliError> {
    let settings = ctx.load_settings()?;
    tracing::debug!("Opening database at {}", ctx.db_path.display());
    let db = Database::open(&ctx.db_path)?;

    let upstream = match settings.sync_endpoint_url.as_deref() {
        Some(url) if !ctx.force_offline => Upstream::Http(HttpSyncEndpoint::new(url)?),
        _ => Upstream::Disabled,
    };
    let connectivity = match upstream {
        Upstream::Http(_) => ConnectivityState::Online,
        Upstream::Disabled => ConnectivityState::Offline,
    };

    let mut builder = OfflineSupportService::builder(db, upstream)
        .connectivity(connectivity)
        .settings(settings.clone());
    if let Some(origin) = settings.asset_origin.as_deref() {
        if !ctx.force_offline {
            let fetcher = HttpAssetFetcher::new(origin)?;
            builder = builder.cache_worker(WorkerPlatform::new(origin_host(origin)), fetcher);
        }
    }

    Ok(builder.init().await?)
}

/// Drain the queue if online, then stop the background tasks.
pub async fn finish(service: OfflineSupportService) -> Result<(), CliError> {
    if !service.is_offline() {
        let report = service.drain().await?;
        eprintln!("{}", format_report(&report));
    }
    service.teardown().await;
    Ok(())
}

/// Host part of an `http(s)://host[:port]/...` origin
pub fn origin_host(origin: &str) -> &str {
    let rest = origin
        .split_once("://")
        .map_or(origin, |(_, rest)| rest);
    let end = rest
        .find(|c: char| c == '/' || c == ':' || c == '?')
        .unwrap_or(rest.len());
    &rest[..end]
}

pub fn normalize_food(parts: &[String]) -> Option<String> {
    let food = parts.join(" ");
    let trimmed = food.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map_or_else(|| millis.to_string(), |at| at.format("%Y-%m-%d %H:%M").to_string())
}

pub fn format_report(report: &CycleReport) -> String {
    let mut line = format!("Synced {} action(s)", report.delivered.len());
    if !report.abandoned.is_empty() {
        line.push_str(&format!(", {} failed", report.abandoned.len()));
    }
    match &report.outcome {
        CycleOutcome::Empty => {}
        CycleOutcome::Offline => line.push_str(", offline"),
        CycleOutcome::Backoff { attempts, delay, .. } => line.push_str(&format!(
            ", retrying in {}s (attempt {attempts})",
            delay.as_secs().max(1)
        )),
        CycleOutcome::Stalled(reason) => line.push_str(&format!(", stalled: {reason}")),
    }
    line
}

pub fn format_action_line(action: &QueuedAction) -> String {
    let mut line = format!(
        "{:>5}  {:<10}  {:<19}  {:<16}  attempts {}",
        action.id.to_string(),
        action.status.as_str(),
        action.kind.as_str(),
        format_timestamp(action.created_at),
        action.attempts
    );
    if let Some(error) = action.last_error.as_deref() {
        line.push_str("  ");
        line.push_str(error);
    }
    line
}
