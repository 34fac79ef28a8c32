//! Notification lifecycle: create, read, dismiss, snooze and reactivation.
//!
//! Transitions are decided here against a freshly loaded row, then written
//! as a single-column change. A write never touches another lifecycle flag,
//! so a concurrent dismiss is never undone.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AlertError, AlertResult};
use crate::models::{ListQuery, NewNotification, Notification, SnoozeDuration};
use crate::store::{Clock, NotificationStore, StateChange};

/// Outcome of a single-row lifecycle operation on an existing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Unchanged,
}

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Whether `change` would alter `notification`. A snooze always resets the
/// timer unless the notification is dismissed.
pub fn plan_change(notification: &Notification, change: StateChange) -> Transition {
    let applies = match change {
        StateChange::Read => !notification.is_read,
        StateChange::Dismiss => !notification.is_dismissed,
        StateChange::Snooze(_) => !notification.is_dismissed,
    };
    if applies {
        Transition::Applied
    } else {
        Transition::Unchanged
    }
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn NotificationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn create(&self, new: NewNotification) -> AlertResult<Notification> {
        new.validate()?;
        let notification = Notification::from_new(new, self.clock.now());
        self.store.insert(&notification).await?;
        info!(
            id = %notification.id,
            kind = %notification.kind,
            title = %notification.title,
            "notification created"
        );
        Ok(notification)
    }

    pub async fn list(&self, query: ListQuery) -> AlertResult<Vec<Notification>> {
        self.store.list(&query.normalized(), self.clock.now()).await
    }

    pub async fn unread_count(&self) -> AlertResult<i64> {
        self.store.count_unread(self.clock.now()).await
    }

    pub async fn history(&self, limit: i64) -> AlertResult<Vec<Notification>> {
        if limit < 1 {
            return Err(AlertError::Validation(format!(
                "history limit must be positive, got {limit}"
            )));
        }
        self.store.history(limit).await
    }

    pub async fn mark_as_read(&self, id: Uuid) -> AlertResult<Transition> {
        self.transition(id, "read", StateChange::Read).await
    }

    pub async fn dismiss(&self, id: Uuid) -> AlertResult<Transition> {
        self.transition(id, "dismissed", StateChange::Dismiss).await
    }

    pub async fn snooze(&self, id: Uuid, duration: SnoozeDuration) -> AlertResult<Transition> {
        let until = self.clock.now() + duration.offset();
        self.transition(id, "snoozed", StateChange::Snooze(until)).await
    }

    pub async fn mark_all_as_read(&self) -> AlertResult<u64> {
        let changed = self.store.mark_all_read(self.clock.now()).await?;
        info!(changed, "marked all active notifications read");
        Ok(changed)
    }

    /// Safe to call on every poll: rows already reactivated have no timer left.
    pub async fn reactivate_snoozed(&self) -> AlertResult<u64> {
        let reactivated = self.store.clear_expired_snoozes(self.clock.now()).await?;
        if reactivated > 0 {
            info!(reactivated, "reactivated snoozed notifications");
        } else {
            debug!("no snoozed notifications due");
        }
        Ok(reactivated)
    }

    async fn transition(
        &self,
        id: Uuid,
        action: &'static str,
        change: StateChange,
    ) -> AlertResult<Transition> {
        let notification = self.store.get(id).await?.ok_or(AlertError::NotFound(id))?;
        if plan_change(&notification, change) == Transition::Unchanged {
            debug!(%id, action, "notification already in target state");
            return Ok(Transition::Unchanged);
        }
        if !self.store.apply_change(id, change).await? {
            return match change {
                StateChange::Snooze(_) => {
                    debug!(%id, action, "notification dismissed before snooze was written");
                    Ok(Transition::Unchanged)
                }
                StateChange::Read | StateChange::Dismiss => Err(AlertError::NotFound(id)),
            };
        }
        info!(%id, action, "notification updated");
        Ok(Transition::Applied)
    }
}
