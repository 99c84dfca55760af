//! Connectivity state and transition notifications

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::util::unix_millis_now;

/// Process-wide connectivity as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// Link reported up
    Online,
    /// Link reported down
    Offline,
}

impl ConnectivityState {
    /// Map a platform `onLine` flag.
    pub const fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    /// Whether this state is `Online`.
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

/// A single connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityEvent {
    /// State before the transition
    pub previous: ConnectivityState,
    /// State after the transition
    pub current: ConnectivityState,
    /// When the transition was observed (Unix ms)
    pub observed_at: i64,
}

/// Receiving end of a connectivity subscription.
///
/// Every transition is delivered, in the order it happened.
#[derive(Debug)]
pub struct ConnectivitySubscription {
    rx: mpsc::UnboundedReceiver<ConnectivityEvent>,
}

impl ConnectivitySubscription {
    /// Wait for the next transition. `None` once the monitor is torn down.
    pub async fn recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.recv().await
    }

    /// Next transition if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ConnectivityEvent> {
        self.rx.try_recv().ok()
    }
}

struct MonitorInner {
    state: ConnectivityState,
    subscribers: Vec<mpsc::UnboundedSender<ConnectivityEvent>>,
}

/// Observes platform connectivity and fans transitions out to subscribers.
///
/// Constructed once at startup and handed to consumers; only `report` changes
/// the state.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<Mutex<MonitorInner>>,
}

impl fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Create a monitor seeded with the platform's initial state.
    pub fn new(initial: ConnectivityState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MonitorInner {
                state: initial,
                subscribers: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MonitorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current connectivity.
    pub fn state(&self) -> ConnectivityState {
        self.lock().state
    }

    /// Whether the platform currently reports a link.
    pub fn is_online(&self) -> bool {
        self.state().is_online()
    }

    /// Feed a platform connectivity signal.
    ///
    /// Emits one event per actual change; repeated identical signals are
    /// dropped. Returns whether a transition happened.
    pub fn report(&self, online: bool) -> bool {
        let next = ConnectivityState::from_online(online);
        let mut inner = self.lock();
        if inner.state == next {
            return false;
        }

        let event = ConnectivityEvent {
            previous: inner.state,
            current: next,
            observed_at: unix_millis_now(),
        };
        inner.state = next;
        // Sending under the lock keeps concurrent reporters in order
        inner.subscribers.retain(|tx| tx.send(event).is_ok());

        match next {
            ConnectivityState::Online => tracing::info!("Network: online"),
            ConnectivityState::Offline => tracing::warn!("Network: offline"),
        }
        true
    }

    /// Subscribe to future transitions.
    pub fn subscribe(&self) -> ConnectivitySubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        ConnectivitySubscription { rx }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }

    /// Close every subscription; subscribers see `None` after draining.
    pub fn teardown(&self) {
        self.lock().subscribers.clear();
        tracing::debug!("Network monitor torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert!(NetworkMonitor::new(ConnectivityState::Online).is_online());
        assert!(!NetworkMonitor::new(ConnectivityState::Offline).is_online());
    }

    #[test]
    fn test_duplicate_signals_are_dropped() {
        let monitor = NetworkMonitor::new(ConnectivityState::Offline);
        let mut sub = monitor.subscribe();

        assert!(!monitor.report(false));
        assert!(monitor.report(true));
        assert!(!monitor.report(true));
        assert!(monitor.report(false));

        let first = sub.try_recv().unwrap();
        assert_eq!(first.previous, ConnectivityState::Offline);
        assert_eq!(first.current, ConnectivityState::Online);
        assert_eq!(sub.try_recv().unwrap().current, ConnectivityState::Offline);
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_every_subscriber_sees_every_transition_in_order() {
        let monitor = NetworkMonitor::new(ConnectivityState::Online);
        let mut first = monitor.subscribe();
        let mut second = monitor.subscribe();

        for online in [false, true, false, true] {
            monitor.report(online);
        }

        for sub in [&mut first, &mut second] {
            let states: Vec<_> = std::iter::from_fn(|| sub.try_recv())
                .map(|event| event.current)
                .collect();
            assert_eq!(
                states,
                vec![
                    ConnectivityState::Offline,
                    ConnectivityState::Online,
                    ConnectivityState::Offline,
                    ConnectivityState::Online,
                ]
            );
        }
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let monitor = NetworkMonitor::new(ConnectivityState::Online);
        let sub = monitor.subscribe();
        assert_eq!(monitor.subscriber_count(), 1);

        drop(sub);
        monitor.report(false);
        assert_eq!(monitor.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_closes_subscriptions() {
        let monitor = NetworkMonitor::new(ConnectivityState::Online);
        let mut sub = monitor.subscribe();
        monitor.report(false);
        monitor.teardown();

        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
    }
}
