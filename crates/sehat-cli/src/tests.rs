use std::time::Duration;

use clap::{CommandFactory, Parser};
use sehat_core::sync::{CycleOutcome, CycleReport, DeliveryRequest, SyncEndpoint};
use sehat_core::{ActionId, ActionKind, ActionStatus, Error};

use crate::cli::{parse_status, CacheCommands, Cli, Commands};
use crate::commands::common::{
    format_report, normalize_food, open_service, origin_host, Upstream,
};
use crate::commands::status::{describe_engine_state, format_cache_line, CacheView};
use crate::config::Context;

fn temp_context(dir: &tempfile::TempDir) -> Context {
    Context::resolve(
        Some(dir.path().join("sehat.db")),
        Some(dir.path().join("config.json")),
        true,
    )
    .unwrap()
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn add_is_an_alias_for_log() {
    let cli = Cli::try_parse_from(["sehat", "add", "rice", "and", "dal"]).unwrap();
    match cli.command {
        Commands::Log { food } => assert_eq!(food, ["rice", "and", "dal"]),
        _ => panic!("expected log command"),
    }
}

#[test]
fn global_flags_parse_after_subcommand() {
    let cli = Cli::try_parse_from(["sehat", "cache", "status", "--json", "--offline"]).unwrap();
    assert!(cli.offline);
    assert!(matches!(
        cli.command,
        Commands::Cache {
            command: CacheCommands::Status { json: true }
        }
    ));
}

#[test]
fn share_date_must_be_iso() {
    assert!(Cli::try_parse_from(["sehat", "share", "--date", "2026-03-01"]).is_ok());
    assert!(Cli::try_parse_from(["sehat", "share", "--date", "01/03/2026"]).is_err());
}

#[test]
fn parse_status_accepts_dashed_names() {
    assert_eq!(parse_status("in-flight").unwrap(), ActionStatus::InFlight);
    assert_eq!(parse_status(" failed ").unwrap(), ActionStatus::Failed);
    assert!(parse_status("done").is_err());
}

#[test]
fn normalize_food_joins_and_trims() {
    let parts = vec!["  rice".to_string(), "dal  ".to_string()];
    assert_eq!(normalize_food(&parts), Some("rice dal".to_string()));
    assert_eq!(normalize_food(&[" ".to_string()]), None);
    assert_eq!(normalize_food(&[]), None);
}

#[test]
fn origin_host_strips_scheme_port_and_path() {
    assert_eq!(origin_host("https://sehat.example.org"), "sehat.example.org");
    assert_eq!(origin_host("http://localhost:3000/app"), "localhost");
    assert_eq!(
        origin_host("https://abc.vusercontent.net/?x=1"),
        "abc.vusercontent.net"
    );
}

#[test]
fn format_report_mentions_backoff() {
    let report = CycleReport {
        delivered: vec![ActionId::new(1)],
        abandoned: vec![ActionId::new(2)],
        outcome: CycleOutcome::Backoff {
            action: ActionId::new(3),
            attempts: 2,
            delay: Duration::from_secs(4),
        },
    };
    assert_eq!(
        format_report(&report),
        "Synced 1 action(s), 1 failed, retrying in 4s (attempt 2)"
    );
    assert_eq!(format_report(&CycleReport::default()), "Synced 0 action(s)");
}

#[test]
fn cache_line_lists_waiting_version() {
    let cache = CacheView {
        active: Some("1.0.0".to_string()),
        waiting: Some("1.1.0".to_string()),
        installing: None,
        precached: 4,
        runtime: 2,
    };
    assert_eq!(
        format_cache_line(&cache),
        "Asset cache:  1.0.0 (4 precached, 2 runtime), 1.1.0 waiting"
    );
}

#[test]
fn engine_state_is_described_in_words() {
    assert_eq!(
        describe_engine_state(&sehat_core::sync::EngineState::Idle),
        "idle"
    );
}

#[tokio::test]
async fn disabled_upstream_refuses_delivery() {
    let request = DeliveryRequest {
        idempotency_key: "device:1".to_string(),
        id: ActionId::new(1),
        kind: ActionKind::NutritionLogEntry,
        payload: serde_json::json!({ "food": "rice" }),
        created_at: 0,
        attempt: 1,
    };
    let result = Upstream::Disabled.deliver(&request).await;
    assert!(matches!(result, Err(Error::DeliveryFailed(_))));
}

#[tokio::test]
async fn offline_service_queues_meals_locally() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = temp_context(&dir);

    let service = open_service(&ctx).await.unwrap();
    assert!(service.is_offline());
    assert!(service.is_degraded());
    service.log_nutrition_entry("khichdi").unwrap();
    assert_eq!(service.pending_count().unwrap(), 1);
    service.teardown().await;

    let service = open_service(&ctx).await.unwrap();
    let meals = service.nutrition_log().unwrap();
    assert_eq!(meals.len(), 1);
    assert_eq!(meals[0].food, "khichdi");
    assert_eq!(service.pending_count().unwrap(), 1);
    service.teardown().await;
}

#[tokio::test]
async fn invalid_settings_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = temp_context(&dir);
    std::fs::write(&ctx.config_path, r#"{ "backoff_base_ms": 0 }"#).unwrap();

    let error = open_service(&ctx).await.unwrap_err();
    assert!(error.to_string().contains("backoff_base_ms"));
}
