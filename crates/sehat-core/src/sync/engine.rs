//! Reconciliation engine: a single scheduler task that drains the sync queue

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use super::{DeliveryRequest, RetryPolicy, SyncEndpoint};
use crate::error::{Error, Result};
use crate::models::{ActionId, QueuedAction};
use crate::network::{
    ConnectivityEvent, ConnectivityState, ConnectivitySubscription, NetworkMonitor,
};
use crate::queue::SyncQueue;

const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_CAPACITY: usize = 64;

/// What the engine is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing to do until a trigger or a connectivity change
    Idle,
    /// A drain cycle is running
    Draining,
    /// Waiting before retrying the oldest pending action
    Backoff {
        /// Action that will be retried
        action: ActionId,
        /// Attempts made so far
        attempts: u32,
        /// Delay before the retry
        delay: Duration,
    },
}

/// Why a drain cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No pending actions left
    Empty,
    /// Connectivity lost (or never there)
    Offline,
    /// A delivery failed; the engine retries after the delay
    Backoff {
        /// Action that will be retried
        action: ActionId,
        /// Attempts made so far
        attempts: u32,
        /// Delay before the retry
        delay: Duration,
    },
    /// Local storage failed mid-cycle
    Stalled(String),
}

/// Result of one drain cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Actions acknowledged by the endpoint, in delivery order
    pub delivered: Vec<ActionId>,
    /// Actions that hit the retry ceiling during this cycle
    pub abandoned: Vec<ActionId>,
    /// Why the cycle ended
    pub outcome: CycleOutcome,
}

impl Default for CycleReport {
    fn default() -> Self {
        Self {
            delivered: Vec::new(),
            abandoned: Vec::new(),
            outcome: CycleOutcome::Empty,
        }
    }
}

/// Progress notifications for pending-count indicators and banners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Endpoint acknowledged the action; it has been purged from the queue
    Delivered {
        /// Delivered action
        id: ActionId,
        /// Attempts it took
        attempts: u32,
    },
    /// Delivery failed; the action stays first in line
    RetryScheduled {
        /// Failed action
        id: ActionId,
        /// Attempts made so far
        attempts: u32,
        /// Delay before the retry
        delay: Duration,
        /// Failure description
        error: String,
    },
    /// Retry ceiling exceeded; the action needs a manual retry
    Abandoned {
        /// Abandoned action
        id: ActionId,
        /// Attempts made
        attempts: u32,
        /// Last failure description
        error: String,
    },
    /// A drain cycle ended
    CycleFinished {
        /// Actions delivered during the cycle
        delivered: usize,
        /// Why it ended
        outcome: CycleOutcome,
    },
}

enum Command {
    Trigger,
    Drain(oneshot::Sender<CycleReport>),
    Flush(oneshot::Sender<Result<CycleReport>>),
    Shutdown,
}

enum Wake {
    Command(Command),
    Connectivity(ConnectivityEvent),
    BackoffElapsed,
    MonitorClosed,
    HandleDropped,
}

/// Wake-ups collected in one loop turn; they collapse into at most one cycle.
#[derive(Default)]
struct Batch {
    trigger: bool,
    urgent: bool,
    went_offline: bool,
    shutdown: bool,
    drain_replies: Vec<oneshot::Sender<CycleReport>>,
    flush_replies: Vec<oneshot::Sender<Result<CycleReport>>>,
}

impl Batch {
    fn absorb(&mut self, wake: Wake) {
        match wake {
            Wake::Command(Command::Trigger) => self.trigger = true,
            Wake::Command(Command::Drain(reply)) => {
                self.urgent = true;
                self.drain_replies.push(reply);
            }
            Wake::Command(Command::Flush(reply)) => {
                self.urgent = true;
                self.flush_replies.push(reply);
            }
            Wake::Command(Command::Shutdown) | Wake::HandleDropped => self.shutdown = true,
            Wake::Connectivity(event) => match event.current {
                ConnectivityState::Online => self.urgent = true,
                ConnectivityState::Offline => self.went_offline = true,
            },
            Wake::BackoffElapsed => self.urgent = true,
            Wake::MonitorClosed => {}
        }
    }
}

/// Drains the sync queue against the endpoint whenever connectivity allows.
///
/// Owned by one tokio task after [`spawn`](Self::spawn); every trigger,
/// connectivity change and manual flush is funnelled through that task, so
/// deliveries never overlap.
pub struct ReconciliationEngine<E> {
    queue: SyncQueue,
    monitor: NetworkMonitor,
    endpoint: Arc<E>,
    policy: RetryPolicy,
    delivery_timeout: Duration,
    device_id: String,
    state: watch::Sender<EngineState>,
    events: broadcast::Sender<SyncEvent>,
}

impl<E: SyncEndpoint> ReconciliationEngine<E> {
    /// Create an engine with the default retry policy and timeout.
    pub fn new(
        queue: SyncQueue,
        monitor: NetworkMonitor,
        endpoint: E,
        device_id: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            monitor,
            endpoint: Arc::new(endpoint),
            policy: RetryPolicy::default(),
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            device_id: device_id.into(),
            state,
            events,
        }
    }

    /// Set the retry policy
    #[must_use]
    pub const fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the per-attempt delivery timeout
    #[must_use]
    pub const fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Start the scheduler task. Pending work is picked up right away.
    pub fn spawn(self) -> EngineHandle {
        let (commands, rx) = mpsc::unbounded_channel();
        let state = self.state.subscribe();
        let events = self.events.clone();
        let connectivity = self.monitor.subscribe();

        let task = tokio::spawn(self.run(rx, connectivity));
        let handle = EngineHandle {
            commands,
            state,
            events,
            task,
        };
        handle.trigger();
        handle
    }

    async fn run(
        self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        connectivity: ConnectivitySubscription,
    ) {
        let mut connectivity = Some(connectivity);
        let mut backoff: Option<Pin<Box<Sleep>>> = None;
        tracing::debug!("Reconciliation engine started");

        loop {
            let wake = tokio::select! {
                command = commands.recv() => command.map_or(Wake::HandleDropped, Wake::Command),
                event = next_transition(connectivity.as_mut()) => {
                    event.map_or(Wake::MonitorClosed, Wake::Connectivity)
                }
                () = wait_backoff(backoff.as_mut()) => Wake::BackoffElapsed,
            };
            if matches!(wake, Wake::MonitorClosed) {
                connectivity = None;
            }

            let mut batch = Batch::default();
            batch.absorb(wake);
            while let Ok(command) = commands.try_recv() {
                batch.absorb(Wake::Command(command));
            }

            if batch.shutdown {
                break;
            }

            let flush_error = if batch.flush_replies.is_empty() {
                None
            } else {
                self.queue.retry_failed().err().map(|error| error.to_string())
            };

            let cancelled = (batch.urgent || batch.went_offline) && backoff.take().is_some();
            if cancelled && !batch.urgent {
                tracing::debug!("Backoff cancelled: connectivity lost");
                self.set_state(EngineState::Idle);
            }

            let should_drain = batch.urgent || (batch.trigger && backoff.is_none());
            if !should_drain {
                continue;
            }

            let report = self.drain_cycle().await;
            if let CycleOutcome::Backoff { delay, .. } = report.outcome {
                backoff = Some(Box::pin(tokio::time::sleep(delay)));
            }

            for reply in batch.drain_replies {
                let _ = reply.send(report.clone());
            }
            for reply in batch.flush_replies {
                let result = match &flush_error {
                    Some(message) => Err(Error::StorageUnavailable(message.clone())),
                    None => Ok(report.clone()),
                };
                let _ = reply.send(result);
            }
        }

        self.set_state(EngineState::Idle);
        tracing::debug!("Reconciliation engine stopped");
    }

    /// Run one drain cycle: deliver pending actions oldest first until the
    /// queue is empty, connectivity is lost or a delivery needs a backoff.
    pub async fn drain_cycle(&self) -> CycleReport {
        self.set_state(EngineState::Draining);

        let mut report = CycleReport::default();
        report.outcome = match self.drain_into(&mut report).await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!("Drain cycle stalled: {error}");
                CycleOutcome::Stalled(error.to_string())
            }
        };

        self.set_state(match report.outcome {
            CycleOutcome::Backoff {
                action,
                attempts,
                delay,
            } => EngineState::Backoff {
                action,
                attempts,
                delay,
            },
            _ => EngineState::Idle,
        });
        self.emit(SyncEvent::CycleFinished {
            delivered: report.delivered.len(),
            outcome: report.outcome.clone(),
        });
        report
    }

    async fn drain_into(&self, report: &mut CycleReport) -> Result<CycleOutcome> {
        // Anything in flight between cycles was interrupted
        self.queue.recover_in_flight()?;

        loop {
            if !self.monitor.is_online() {
                return Ok(CycleOutcome::Offline);
            }
            let Some(action) = self.queue.peek_oldest_pending()? else {
                return Ok(CycleOutcome::Empty);
            };

            self.queue.mark_in_flight(action.id)?;
            tracing::debug!(
                "Delivering {} action {} (attempt {})",
                action.kind,
                action.id,
                action.attempts + 1
            );

            let attempts = action.attempts + 1;
            match self.attempt(&action).await {
                Ok(()) => {
                    self.queue.mark_synced(action.id)?;
                    self.queue.purge_synced()?;
                    report.delivered.push(action.id);
                    self.emit(SyncEvent::Delivered {
                        id: action.id,
                        attempts,
                    });
                }
                Err(error) => {
                    let message = error.to_string();
                    if self.policy.is_exhausted(attempts) {
                        self.queue.mark_failed(action.id, &message)?;
                        tracing::error!(
                            "{}",
                            Error::DeliveryAbandoned {
                                id: action.id,
                                attempts
                            }
                        );
                        report.abandoned.push(action.id);
                        self.emit(SyncEvent::Abandoned {
                            id: action.id,
                            attempts,
                            error: message,
                        });
                        continue;
                    }

                    self.queue.record_retry(action.id, &message)?;
                    let delay = self.policy.delay_for(attempts);
                    tracing::warn!(
                        "Delivery of action {} failed (attempt {attempts}): {message}; \
                         retrying in {delay:?}",
                        action.id
                    );
                    self.emit(SyncEvent::RetryScheduled {
                        id: action.id,
                        attempts,
                        delay,
                        error: message,
                    });
                    return Ok(CycleOutcome::Backoff {
                        action: action.id,
                        attempts,
                        delay,
                    });
                }
            }
        }
    }

    async fn attempt(&self, action: &QueuedAction) -> Result<()> {
        let request = DeliveryRequest::for_action(&self.device_id, action);
        match tokio::time::timeout(self.delivery_timeout, self.endpoint.deliver(&request)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeliveryFailed(format!(
                "timed out after {} ms",
                self.delivery_timeout.as_millis()
            ))),
        }
    }

    fn set_state(&self, state: EngineState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn next_transition(
    subscription: Option<&mut ConnectivitySubscription>,
) -> Option<ConnectivityEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_backoff(backoff: Option<&mut Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Handle to a running [`ReconciliationEngine`].
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<EngineState>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Ask for a drain cycle. Collapses with other triggers and is ignored
    /// while a backoff is pending.
    pub fn trigger(&self) {
        let _ = self.commands.send(Command::Trigger);
    }

    /// Run a drain cycle now, cancelling any backoff, and wait for its report.
    pub async fn drain_now(&self) -> Result<CycleReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Drain(reply))
            .map_err(|_| Error::TaskStopped("reconciliation engine"))?;
        rx.await
            .map_err(|_| Error::TaskStopped("reconciliation engine"))
    }

    /// User-triggered retry: re-queue failed actions, cancel any backoff and
    /// drain immediately.
    pub async fn flush(&self) -> Result<CycleReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Flush(reply))
            .map_err(|_| Error::TaskStopped("reconciliation engine"))?;
        rx.await
            .map_err(|_| Error::TaskStopped("reconciliation engine"))?
    }

    /// Current engine state.
    pub fn state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    /// Watch engine state changes.
    pub fn watch_state(&self) -> watch::Receiver<EngineState> {
        self.state.clone()
    }

    /// Subscribe to delivery progress.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop the scheduler task, letting an in-progress attempt finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(error) = self.task.await {
            tracing::error!("Reconciliation engine task failed: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{ActionKind, ActionStatus};
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        calls: Vec<ActionId>,
        delivered: Vec<ActionId>,
        failures: HashMap<ActionId, u32>,
        hang_once: HashSet<ActionId>,
    }

    #[derive(Clone, Default)]
    struct ScriptedEndpoint {
        script: Arc<Mutex<Script>>,
    }

    impl ScriptedEndpoint {
        fn fail_times(&self, id: ActionId, times: u32) {
            self.script.lock().unwrap().failures.insert(id, times);
        }

        fn hang_once(&self, id: ActionId) {
            self.script.lock().unwrap().hang_once.insert(id);
        }

        fn delivered(&self) -> Vec<ActionId> {
            self.script.lock().unwrap().delivered.clone()
        }

        fn calls(&self) -> Vec<ActionId> {
            self.script.lock().unwrap().calls.clone()
        }
    }

    impl SyncEndpoint for ScriptedEndpoint {
        async fn deliver(&self, request: &DeliveryRequest) -> Result<()> {
            let hang = {
                let mut script = self.script.lock().unwrap();
                script.calls.push(request.id);
                script.hang_once.remove(&request.id)
            };
            if hang {
                std::future::pending::<()>().await;
            }

            let mut script = self.script.lock().unwrap();
            if let Some(remaining) = script.failures.get_mut(&request.id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::DeliveryFailed("scripted failure".into()));
                }
            }
            script.delivered.push(request.id);
            Ok(())
        }
    }

    struct Fixture {
        queue: SyncQueue,
        monitor: NetworkMonitor,
        endpoint: ScriptedEndpoint,
    }

    impl Fixture {
        fn new(initial: ConnectivityState) -> Self {
            Self {
                queue: SyncQueue::new(Database::open_in_memory().unwrap()),
                monitor: NetworkMonitor::new(initial),
                endpoint: ScriptedEndpoint::default(),
            }
        }

        fn enqueue(&self, food: &str) -> ActionId {
            self.queue
                .enqueue(
                    ActionKind::NutritionLogEntry,
                    &serde_json::json!({ "food": food }),
                )
                .unwrap()
                .id
        }

        fn engine(&self, policy: RetryPolicy) -> ReconciliationEngine<ScriptedEndpoint> {
            ReconciliationEngine::new(
                self.queue.clone(),
                self.monitor.clone(),
                self.endpoint.clone(),
                "device-test",
            )
            .with_policy(policy)
            .with_delivery_timeout(Duration::from_secs(5))
        }
    }

    fn fast_policy(retry_ceiling: u32) -> RetryPolicy {
        RetryPolicy {
            retry_ceiling,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        }
    }

    async fn wait_for_drained(events: &mut broadcast::Receiver<SyncEvent>) {
        loop {
            if let SyncEvent::CycleFinished {
                outcome: CycleOutcome::Empty,
                ..
            } = events.recv().await.unwrap()
            {
                return;
            }
        }
    }

    #[tokio::test]
    async fn drain_cycle_delivers_in_order() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let ids = ["Rice", "Dal", "Roti"].map(|food| fixture.enqueue(food));
        let engine = fixture.engine(fast_policy(5));

        let report = engine.drain_cycle().await;

        assert_eq!(report.delivered, ids.to_vec());
        assert_eq!(report.outcome, CycleOutcome::Empty);
        assert_eq!(fixture.endpoint.delivered(), ids.to_vec());
        assert_eq!(fixture.queue.pending_count().unwrap(), 0);
        assert!(fixture.queue.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn drain_cycle_does_nothing_offline() {
        let fixture = Fixture::new(ConnectivityState::Offline);
        fixture.enqueue("Rice");
        let engine = fixture.engine(fast_policy(5));

        let report = engine.drain_cycle().await;

        assert_eq!(report.outcome, CycleOutcome::Offline);
        assert!(fixture.endpoint.calls().is_empty());
        assert_eq!(fixture.queue.pending_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn failure_enters_backoff_and_keeps_order() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let a = fixture.enqueue("Rice");
        let b = fixture.enqueue("Dal");
        fixture.endpoint.fail_times(a, 1);
        let engine = fixture.engine(fast_policy(5));

        let report = engine.drain_cycle().await;

        assert_eq!(
            report.outcome,
            CycleOutcome::Backoff {
                action: a,
                attempts: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert!(fixture.endpoint.delivered().is_empty());
        let head = fixture.queue.peek_oldest_pending().unwrap().unwrap();
        assert_eq!(head.id, a);
        assert_eq!(head.attempts, 1);
        assert_eq!(fixture.queue.get(b).unwrap().unwrap().status, ActionStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn connectivity_restored_triggers_drain() {
        let fixture = Fixture::new(ConnectivityState::Offline);
        let a = fixture.enqueue("Rice");
        let handle = fixture.engine(fast_policy(5)).spawn();
        let mut events = handle.subscribe();

        fixture.monitor.report(true);
        wait_for_drained(&mut events).await;

        assert_eq!(fixture.endpoint.delivered(), vec![a]);
        assert_eq!(handle.state(), EngineState::Idle);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_retries_same_action_before_later_ones() {
        let fixture = Fixture::new(ConnectivityState::Offline);
        let a = fixture.enqueue("Rice");
        let b = fixture.enqueue("Dal");
        let c = fixture.enqueue("Roti");
        fixture.endpoint.fail_times(b, 2);
        let handle = fixture.engine(fast_policy(5)).spawn();
        let mut events = handle.subscribe();

        fixture.monitor.report(true);
        wait_for_drained(&mut events).await;

        assert_eq!(fixture.endpoint.delivered(), vec![a, b, c]);
        assert_eq!(fixture.endpoint.calls(), vec![a, b, b, b, c]);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_action_fails_without_blocking_others() {
        let fixture = Fixture::new(ConnectivityState::Offline);
        let a = fixture.enqueue("Rice");
        let b = fixture.enqueue("Dal");
        let c = fixture.enqueue("Roti");
        fixture.endpoint.fail_times(b, 100);
        let handle = fixture.engine(fast_policy(2)).spawn();
        let mut events = handle.subscribe();

        fixture.monitor.report(true);
        wait_for_drained(&mut events).await;

        assert_eq!(fixture.endpoint.delivered(), vec![a, c]);
        let failed = fixture.queue.get(b).unwrap().unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.attempts, 3);
        assert_eq!(failed.last_error.as_deref(), Some("Delivery failed: scripted failure"));

        // Later cycles leave it alone
        handle.trigger();
        let report = handle.drain_now().await.unwrap();
        assert!(report.delivered.is_empty());
        assert_eq!(fixture.queue.get(b).unwrap().unwrap().status, ActionStatus::Failed);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_retries_failed_actions() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let a = fixture.enqueue("Rice");
        fixture.endpoint.fail_times(a, 1);
        let handle = fixture.engine(fast_policy(0)).spawn();

        let report = handle.drain_now().await.unwrap();
        assert_eq!(report.abandoned, vec![a]);
        assert_eq!(fixture.queue.failed_count().unwrap(), 1);

        let report = handle.flush().await.unwrap();
        assert_eq!(report.delivered, vec![a]);
        assert_eq!(fixture.queue.failed_count().unwrap(), 0);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn flush_cancels_pending_backoff() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let a = fixture.enqueue("Rice");
        fixture.endpoint.fail_times(a, 1);
        let policy = RetryPolicy {
            retry_ceiling: 5,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let handle = fixture.engine(policy).spawn();

        let report = handle.drain_now().await.unwrap();
        assert!(matches!(report.outcome, CycleOutcome::Backoff { .. }));
        assert!(matches!(handle.state(), EngineState::Backoff { .. }));

        let started = tokio::time::Instant::now();
        let report = handle.flush().await.unwrap();
        assert_eq!(report.delivered, vec![a]);
        assert!(started.elapsed() < Duration::from_secs(60));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failed_attempt() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let a = fixture.enqueue("Rice");
        fixture.endpoint.hang_once(a);
        let engine = fixture.engine(fast_policy(5));

        let report = engine.drain_cycle().await;

        assert!(matches!(report.outcome, CycleOutcome::Backoff { action, .. } if action == a));
        let action = fixture.queue.get(a).unwrap().unwrap();
        assert_eq!(action.attempts, 1);
        assert!(action.last_error.unwrap().contains("timed out"));

        let report = engine.drain_cycle().await;
        assert_eq!(report.delivered, vec![a]);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_connectivity_stops_the_cycle() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let a = fixture.enqueue("Rice");
        fixture.endpoint.fail_times(a, 1);
        let handle = fixture.engine(fast_policy(5)).spawn();

        let report = handle.drain_now().await.unwrap();
        assert!(matches!(report.outcome, CycleOutcome::Backoff { .. }));

        fixture.monitor.report(false);
        let report = handle.drain_now().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Offline);
        assert_eq!(handle.state(), EngineState::Idle);
        assert_eq!(fixture.queue.pending_count().unwrap(), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_triggers_deliver_each_action_once() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let handle = fixture.engine(fast_policy(5)).spawn();

        let mut ids = Vec::new();
        for food in ["Rice", "Dal", "Roti", "Sabzi"] {
            ids.push(fixture.enqueue(food));
            handle.trigger();
            handle.trigger();
        }
        handle.drain_now().await.unwrap();

        assert_eq!(fixture.endpoint.delivered(), ids);
        assert_eq!(fixture.endpoint.calls(), ids);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stopped_engine_reports_task_stopped() {
        let fixture = Fixture::new(ConnectivityState::Online);
        let handle = fixture.engine(fast_policy(5)).spawn();
        let commands = handle.commands.clone();
        handle.shutdown().await;

        let (reply, rx) = oneshot::channel();
        assert!(commands.send(Command::Drain(reply)).is_err());
        drop(rx);
    }
}
