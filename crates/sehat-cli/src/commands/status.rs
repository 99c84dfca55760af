use sehat_core::cache::CacheStatus;
use sehat_core::sync::EngineState;
use sehat_core::OfflineSupportService;
use serde::Serialize;

use crate::commands::common::open_service;
use crate::config::Context;
use crate::error::CliError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    device_id: String,
    connectivity: String,
    engine: String,
    pending: usize,
    failed: usize,
    cache: Option<CacheView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheView {
    pub active: Option<String>,
    pub waiting: Option<String>,
    pub installing: Option<String>,
    pub precached: usize,
    pub runtime: usize,
}

impl From<CacheStatus> for CacheView {
    fn from(status: CacheStatus) -> Self {
        Self {
            active: status.active,
            waiting: status.waiting,
            installing: status.installing,
            precached: status.precached,
            runtime: status.runtime,
        }
    }
}

pub fn describe_engine_state(state: &EngineState) -> String {
    match state {
        EngineState::Idle => "idle".to_string(),
        EngineState::Draining => "draining".to_string(),
        EngineState::Backoff {
            action,
            attempts,
            delay,
        } => format!(
            "backing off {action} after {attempts} attempt(s), retry in {}ms",
            delay.as_millis()
        ),
    }
}

pub async fn run_status(as_json: bool, ctx: &Context) -> Result<(), CliError> {
    let service = open_service(ctx).await?;
    let cache = if service.is_degraded() {
        None
    } else {
        service.cache_status().await.ok().map(CacheView::from)
    };
    let view = build_view(&service, cache);
    service.teardown().await;
    let view = view?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("Device:       {}", view.device_id);
    println!("Connectivity: {}", view.connectivity);
    println!("Sync engine:  {}", view.engine);
    println!("Pending:      {}", view.pending);
    println!("Failed:       {}", view.failed);
    match view.cache {
        Some(cache) => println!("{}", format_cache_line(&cache)),
        None => println!("Asset cache:  unavailable"),
    }
    Ok(())
}

fn build_view(
    service: &OfflineSupportService,
    cache: Option<CacheView>,
) -> Result<StatusView, CliError> {
    Ok(StatusView {
        device_id: service.device_id().to_string(),
        connectivity: service.monitor().state().to_string(),
        engine: describe_engine_state(&service.engine_state()),
        pending: service.pending_count()?,
        failed: service.failed_actions()?.len(),
        cache,
    })
}

pub fn format_cache_line(cache: &CacheView) -> String {
    let mut line = format!(
        "Asset cache:  {} ({} precached, {} runtime)",
        cache.active.as_deref().unwrap_or("none"),
        cache.precached,
        cache.runtime
    );
    if let Some(waiting) = cache.waiting.as_deref() {
        line.push_str(&format!(", {waiting} waiting"));
    }
    if let Some(installing) = cache.installing.as_deref() {
        line.push_str(&format!(", installing {installing}"));
    }
    line
}
