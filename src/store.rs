//! Persistence seams for notifications and message analytics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AlertResult;
use crate::models::{CategoryVolume, ListQuery, Notification, SentimentCounts, WindowAverage};

/// A single-field lifecycle write. Each variant touches only its own column,
/// so a stale writer can never clear `is_dismissed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Read,
    Dismiss,
    Snooze(DateTime<Utc>),
}

/// Row-level notification persistence. Single-row writes must be atomic;
/// the two batch updates must each run as one statement or transaction.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> AlertResult<()>;

    async fn get(&self, id: Uuid) -> AlertResult<Option<Notification>>;

    /// Writes one lifecycle field on one row. Returns false when no row was
    /// changed: the id is gone, or the row is dismissed and the change is a snooze.
    async fn apply_change(&self, id: Uuid, change: StateChange) -> AlertResult<bool>;

    /// Most-recent-first page of notifications matching `query` at `now`.
    async fn list(&self, query: &ListQuery, now: DateTime<Utc>) -> AlertResult<Vec<Notification>>;

    async fn count_unread(&self, now: DateTime<Utc>) -> AlertResult<i64>;

    /// Marks every active unread notification read; returns rows changed.
    async fn mark_all_read(&self, now: DateTime<Utc>) -> AlertResult<u64>;

    /// Clears expired snooze timers on undismissed rows; returns rows changed.
    async fn clear_expired_snoozes(&self, now: DateTime<Utc>) -> AlertResult<u64>;

    /// Everything, dismissed included, most recent first.
    async fn history(&self, limit: i64) -> AlertResult<Vec<Notification>>;
}

/// Windowed aggregates over chatbot messages. Windows are half-open: `[from, to)`.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn sentiment_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<SentimentCounts>;

    async fn response_time(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> AlertResult<WindowAverage>;

    async fn rating(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AlertResult<WindowAverage>;

    /// Per-category message and negative-sentiment counts. Uncategorised rows are skipped.
    async fn category_volumes(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<Vec<CategoryVolume>>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
