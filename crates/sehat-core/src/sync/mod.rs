//! Reconciliation of queued actions with the upstream sync endpoint

mod backoff;
mod endpoint;
mod engine;

pub use backoff::RetryPolicy;
pub use endpoint::{DeliveryRequest, HttpSyncEndpoint, SyncEndpoint};
pub use engine::{
    CycleOutcome, CycleReport, EngineHandle, EngineState, ReconciliationEngine, SyncEvent,
};
