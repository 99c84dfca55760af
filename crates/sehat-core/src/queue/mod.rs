//! Durable FIFO queue of user actions awaiting delivery

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{upsert_entry, Database};
use crate::error::{Error, Result};
use crate::models::{ActionId, ActionKind, ActionStatus, QueuedAction};
use crate::util::unix_millis_now;

const SELECT_COLUMNS: &str =
    "SELECT id, kind, payload, created_at, status, attempts, last_error FROM queued_actions";

/// Ordered, durable queue of pending actions.
///
/// Delivery order is ascending `id`. At most one action is `in_flight` at any
/// time, enforced here and by a partial unique index in the schema.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    db: Database,
}

#[derive(Debug)]
struct RawAction {
    id: i64,
    kind: String,
    payload: String,
    created_at: i64,
    status: String,
    attempts: u32,
    last_error: Option<String>,
}

impl RawAction {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            payload: row.get(2)?,
            created_at: row.get(3)?,
            status: row.get(4)?,
            attempts: row.get(5)?,
            last_error: row.get(6)?,
        })
    }

    fn decode(self) -> Result<QueuedAction> {
        let payload = serde_json::from_str(&self.payload).map_err(|error| {
            Error::CorruptRecord(format!("payload of action {}: {error}", self.id))
        })?;
        Ok(QueuedAction {
            id: ActionId::new(self.id),
            kind: self.kind.parse()?,
            payload,
            created_at: self.created_at,
            status: self.status.parse()?,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

impl SyncQueue {
    /// Create a queue over the given database
    pub const fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an action; it is durable once this returns.
    pub fn enqueue(&self, kind: ActionKind, payload: &serde_json::Value) -> Result<QueuedAction> {
        let payload_json = serde_json::to_string(payload)?;
        let created_at = unix_millis_now();

        let id = self
            .db
            .with_connection(|conn| insert_action(conn, kind, &payload_json, created_at))?;
        Ok(Self::queued(id, kind, payload, created_at))
    }

    /// Append an action and write the data of record it carries under `key`.
    ///
    /// Both writes commit together: if either fails, the store keeps its
    /// previous value and nothing is queued.
    pub fn enqueue_with_record(
        &self,
        kind: ActionKind,
        payload: &serde_json::Value,
        key: &str,
        value: &str,
    ) -> Result<QueuedAction> {
        let payload_json = serde_json::to_string(payload)?;
        let created_at = unix_millis_now();

        let id = self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            upsert_entry(&tx, key, value)?;
            let id = insert_action(&tx, kind, &payload_json, created_at)?;
            tx.commit()?;
            Ok(id)
        })?;
        Ok(Self::queued(id, kind, payload, created_at))
    }

    fn queued(
        id: i64,
        kind: ActionKind,
        payload: &serde_json::Value,
        created_at: i64,
    ) -> QueuedAction {
        tracing::debug!("Queued {kind} action {id}");
        QueuedAction {
            id: ActionId::new(id),
            kind,
            payload: payload.clone(),
            created_at,
            status: ActionStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    /// Fetch an action by id
    pub fn get(&self, id: ActionId) -> Result<Option<QueuedAction>> {
        let raw = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                    [id.get()],
                    RawAction::from_row,
                )
                .optional()?)
        })?;
        raw.map(RawAction::decode).transpose()
    }

    /// Oldest action still waiting for delivery; failed actions are skipped.
    pub fn peek_oldest_pending(&self) -> Result<Option<QueuedAction>> {
        let raw = self.db.with_connection(|conn| {
            Ok(conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id ASC LIMIT 1"),
                    [ActionStatus::Pending.as_str()],
                    RawAction::from_row,
                )
                .optional()?)
        })?;
        raw.map(RawAction::decode).transpose()
    }

    /// Claim an action for delivery.
    ///
    /// Idempotent for the action already in flight. Fails with
    /// [`Error::QueueBusy`] while a different action is in flight.
    pub fn mark_in_flight(&self, id: ActionId) -> Result<()> {
        self.db.with_connection(|conn| {
            let tx = conn.transaction()?;
            let current: Option<i64> = tx
                .query_row(
                    "SELECT id FROM queued_actions WHERE status = ?1",
                    [ActionStatus::InFlight.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            match current {
                Some(existing) if existing == id.get() => return Ok(()),
                Some(existing) => {
                    return Err(Error::QueueBusy {
                        in_flight: ActionId::new(existing),
                    })
                }
                None => {}
            }

            if claim(&tx, id)? == 0 {
                return Err(transition_error(&tx, id, ActionStatus::InFlight));
            }
            tx.commit()?;
            Ok(())
        })
    }

    /// Record an acknowledged delivery. Repeating it for a synced action is a no-op.
    pub fn mark_synced(&self, id: ActionId) -> Result<()> {
        self.db.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE queued_actions SET status = ?1, last_error = NULL
                 WHERE id = ?2 AND status IN (?3, ?1)",
                params![
                    ActionStatus::Synced.as_str(),
                    id.get(),
                    ActionStatus::InFlight.as_str()
                ],
            )?;
            if updated == 0 {
                return Err(transition_error(conn, id, ActionStatus::Synced));
            }
            Ok(())
        })
    }

    /// Abandon an action after a failed attempt; it stays queued for a manual retry.
    pub fn mark_failed(&self, id: ActionId, error: &str) -> Result<QueuedAction> {
        self.finish_attempt(id, ActionStatus::Failed, error)
    }

    /// Return an in-flight action to `pending` after a failed attempt.
    pub fn record_retry(&self, id: ActionId, error: &str) -> Result<QueuedAction> {
        self.finish_attempt(id, ActionStatus::Pending, error)
    }

    fn finish_attempt(
        &self,
        id: ActionId,
        next: ActionStatus,
        error: &str,
    ) -> Result<QueuedAction> {
        self.db.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE queued_actions SET status = ?1, attempts = attempts + 1, last_error = ?2
                 WHERE id = ?3 AND status = ?4",
                params![
                    next.as_str(),
                    error,
                    id.get(),
                    ActionStatus::InFlight.as_str()
                ],
            )?;
            if updated == 0 {
                return Err(transition_error(conn, id, next));
            }
            Ok(())
        })?;
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("queued action {id}")))
    }

    /// Remove synced actions; returns how many were purged.
    pub fn purge_synced(&self) -> Result<usize> {
        self.db.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM queued_actions WHERE status = ?1",
                [ActionStatus::Synced.as_str()],
            )?)
        })
    }

    /// Put every failed action back in line with a fresh retry budget.
    ///
    /// Only called for an explicit user retry.
    pub fn retry_failed(&self) -> Result<usize> {
        let count = self.db.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE queued_actions SET status = ?1, attempts = 0 WHERE status = ?2",
                [ActionStatus::Pending.as_str(), ActionStatus::Failed.as_str()],
            )?)
        })?;
        if count > 0 {
            tracing::info!("Re-queued {count} failed action(s) for manual retry");
        }
        Ok(count)
    }

    /// Return stale in-flight actions to `pending`.
    ///
    /// An in-flight action seen outside a delivery attempt was interrupted (app
    /// closed, storage error). Its outcome is unknown, so it is delivered again
    /// and the endpoint's idempotency absorbs the duplicate.
    pub fn recover_in_flight(&self) -> Result<usize> {
        let count = self.db.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE queued_actions SET status = ?1 WHERE status = ?2",
                [
                    ActionStatus::Pending.as_str(),
                    ActionStatus::InFlight.as_str(),
                ],
            )?)
        })?;
        if count > 0 {
            tracing::warn!("Recovered {count} interrupted in-flight action(s)");
        }
        Ok(count)
    }

    /// Number of actions not yet delivered (pending or in flight).
    pub fn pending_count(&self) -> Result<usize> {
        self.count_where(
            "status IN (?1, ?2)",
            &[ActionStatus::Pending.as_str(), ActionStatus::InFlight.as_str()],
        )
    }

    /// Number of abandoned actions awaiting a manual retry.
    pub fn failed_count(&self) -> Result<usize> {
        self.count_where("status = ?1", &[ActionStatus::Failed.as_str()])
    }

    fn count_where(&self, clause: &str, values: &[&str]) -> Result<usize> {
        self.db.with_connection(|conn| {
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM queued_actions WHERE {clause}"),
                rusqlite::params_from_iter(values),
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    /// All queued actions in delivery order.
    pub fn list(&self) -> Result<Vec<QueuedAction>> {
        self.list_filtered(None)
    }

    /// Queued actions with the given status, in delivery order.
    pub fn list_by_status(&self, status: ActionStatus) -> Result<Vec<QueuedAction>> {
        self.list_filtered(Some(status))
    }

    fn list_filtered(&self, status: Option<ActionStatus>) -> Result<Vec<QueuedAction>> {
        let raws = self.db.with_connection(|conn| {
            let rows = if let Some(status) = status {
                let mut stmt =
                    conn.prepare(&format!("{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id ASC"))?;
                let rows = stmt
                    .query_map([status.as_str()], RawAction::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            } else {
                let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))?;
                let rows = stmt
                    .query_map([], RawAction::from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            };
            Ok(rows)
        })?;
        raws.into_iter().map(RawAction::decode).collect()
    }
}

fn insert_action(
    conn: &Connection,
    kind: ActionKind,
    payload_json: &str,
    created_at: i64,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO queued_actions (kind, payload, created_at, status, attempts)
         VALUES (?1, ?2, ?3, ?4, 0)",
        params![
            kind.as_str(),
            payload_json,
            created_at,
            ActionStatus::Pending.as_str()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Move a pending row to in flight; returns the rows changed.
///
/// The single-in-flight index rejects a second claim, reported as
/// [`Error::QueueBusy`].
fn claim(conn: &Connection, id: ActionId) -> Result<usize> {
    conn.execute(
        "UPDATE queued_actions SET status = ?1 WHERE id = ?2 AND status = ?3",
        params![
            ActionStatus::InFlight.as_str(),
            id.get(),
            ActionStatus::Pending.as_str()
        ],
    )
    .map_err(|error| {
        let unique_violation = matches!(
            &error,
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        );
        if unique_violation {
            busy_error(conn, error)
        } else {
            error.into()
        }
    })
}

fn busy_error(conn: &Connection, cause: rusqlite::Error) -> Error {
    let in_flight: rusqlite::Result<Option<i64>> = conn
        .query_row(
            "SELECT id FROM queued_actions WHERE status = ?1",
            [ActionStatus::InFlight.as_str()],
            |row| row.get(0),
        )
        .optional();
    match in_flight {
        Ok(Some(existing)) => Error::QueueBusy {
            in_flight: ActionId::new(existing),
        },
        _ => cause.into(),
    }
}

fn transition_error(conn: &rusqlite::Connection, id: ActionId, to: ActionStatus) -> Error {
    let current: rusqlite::Result<Option<String>> = conn
        .query_row(
            "SELECT status FROM queued_actions WHERE id = ?1",
            [id.get()],
            |row| row.get(0),
        )
        .optional();

    match current {
        Ok(Some(from)) => Error::InvalidTransition {
            id,
            from,
            to: to.as_str().to_string(),
        },
        Ok(None) => Error::NotFound(format!("queued action {id}")),
        Err(error) => error.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{PersistentStore, SqliteStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn setup() -> SyncQueue {
        SyncQueue::new(Database::open_in_memory().unwrap())
    }

    fn enqueue_food(queue: &SyncQueue, food: &str) -> ActionId {
        queue
            .enqueue(ActionKind::NutritionLogEntry, &json!({ "food": food }))
            .unwrap()
            .id
    }

    #[test]
    fn test_enqueue_assigns_increasing_ids() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        let b = enqueue_food(&queue, "Dal");

        assert!(b > a);
        assert_eq!(queue.pending_count().unwrap(), 2);
        assert_eq!(queue.peek_oldest_pending().unwrap().unwrap().id, a);
    }

    #[test]
    fn test_ids_never_reused_after_purge() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        queue.mark_in_flight(a).unwrap();
        queue.mark_synced(a).unwrap();
        assert_eq!(queue.purge_synced().unwrap(), 1);

        let b = enqueue_food(&queue, "Dal");
        assert!(b > a);
    }

    #[test]
    fn test_in_flight_is_idempotent_and_exclusive() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        let b = enqueue_food(&queue, "Dal");

        queue.mark_in_flight(a).unwrap();
        queue.mark_in_flight(a).unwrap();

        let error = queue.mark_in_flight(b).unwrap_err();
        assert!(matches!(error, Error::QueueBusy { in_flight } if in_flight == a));
        assert_eq!(
            queue.get(b).unwrap().unwrap().status,
            ActionStatus::Pending
        );
    }

    #[test]
    fn test_in_flight_index_violation_is_queue_busy() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        let b = enqueue_food(&queue, "Dal");

        // Claim b directly, skipping the up-front in-flight check
        let error = queue
            .db
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE queued_actions SET status = 'in_flight' WHERE id = ?1",
                    [a.get()],
                )?;
                claim(conn, b)
            })
            .unwrap_err();
        assert!(matches!(error, Error::QueueBusy { in_flight } if in_flight == a));
    }

    #[test]
    fn test_record_and_action_commit_together() {
        let queue = setup();
        let store = SqliteStore::new(queue.db.clone());
        queue
            .db
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_actions BEFORE INSERT ON queued_actions
                     BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
                )?;
                Ok(())
            })
            .unwrap();

        let error = queue
            .enqueue_with_record(
                ActionKind::NutritionLogEntry,
                &json!({ "food": "Rice" }),
                "nutritionLog",
                r#"["Rice"]"#,
            )
            .unwrap_err();
        assert!(matches!(error, Error::StorageUnavailable(_)));
        assert_eq!(store.get("nutritionLog").unwrap(), None);
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_retry_returns_to_pending_and_counts_attempts() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");

        queue.mark_in_flight(a).unwrap();
        let action = queue.record_retry(a, "connection reset").unwrap();

        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.attempts, 1);
        assert_eq!(action.last_error.as_deref(), Some("connection reset"));
        assert_eq!(queue.peek_oldest_pending().unwrap().unwrap().id, a);
    }

    #[test]
    fn test_failed_actions_are_skipped_but_kept() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        let b = enqueue_food(&queue, "Dal");

        queue.mark_in_flight(a).unwrap();
        let failed = queue.mark_failed(a, "HTTP 500").unwrap();
        assert!(failed.needs_attention());

        assert_eq!(queue.peek_oldest_pending().unwrap().unwrap().id, b);
        assert_eq!(queue.failed_count().unwrap(), 1);
        assert_eq!(queue.pending_count().unwrap(), 1);
        assert_eq!(queue.list().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_stays_failed_until_retry_failed() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        queue.mark_in_flight(a).unwrap();
        queue.mark_failed(a, "HTTP 500").unwrap();

        assert!(queue.mark_in_flight(a).is_err());
        assert!(queue.record_retry(a, "again").is_err());
        assert_eq!(queue.recover_in_flight().unwrap(), 0);
        assert_eq!(queue.get(a).unwrap().unwrap().status, ActionStatus::Failed);

        assert_eq!(queue.retry_failed().unwrap(), 1);
        let action = queue.get(a).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.attempts, 0);
    }

    #[test]
    fn test_synced_requires_in_flight() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");

        let error = queue.mark_synced(a).unwrap_err();
        assert!(matches!(error, Error::InvalidTransition { .. }));

        queue.mark_in_flight(a).unwrap();
        queue.mark_synced(a).unwrap();
        queue.mark_synced(a).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_unknown_action_is_not_found() {
        let queue = setup();
        let error = queue.mark_in_flight(ActionId::new(404)).unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[test]
    fn test_recover_in_flight_after_interruption() {
        let queue = setup();
        let a = enqueue_food(&queue, "Rice");
        queue.mark_in_flight(a).unwrap();

        assert_eq!(queue.recover_in_flight().unwrap(), 1);
        let action = queue.get(a).unwrap().unwrap();
        assert_eq!(action.status, ActionStatus::Pending);
        assert_eq!(action.attempts, 0);
    }

    #[test]
    fn test_list_by_status_in_order() {
        let queue = setup();
        let ids = ["Rice", "Dal", "Roti"].map(|food| enqueue_food(&queue, food));

        let pending = queue.list_by_status(ActionStatus::Pending).unwrap();
        assert_eq!(
            pending.iter().map(|action| action.id).collect::<Vec<_>>(),
            ids.to_vec()
        );
        assert_eq!(pending[0].payload, json!({ "food": "Rice" }));
    }
}
