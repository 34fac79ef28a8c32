//! In-memory store, message source and clock used by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AlertError, AlertResult};
use crate::models::{
    CategoryVolume, ListQuery, Notification, Sentiment, SentimentCounts, WindowAverage,
};
use crate::store::{Clock, MessageSource, NotificationStore, StateChange};

/// A single chatbot exchange as the detectors see it.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub student_id: i64,
    pub sentiment: Sentiment,
    pub category: Option<String>,
    pub response_time_ms: Option<i32>,
    pub rating: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl SentimentCounts {
    pub fn from_sentiments(sentiments: &[Sentiment]) -> Self {
        let mut counts = SentimentCounts::default();
        for sentiment in sentiments {
            match sentiment {
                Sentiment::Positive => counts.positive += 1,
                Sentiment::Neutral => counts.neutral += 1,
                Sentiment::Negative => counts.negative += 1,
            }
        }
        counts
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<Uuid, Notification>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(rows: &mut [Notification]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, notification: &Notification) -> AlertResult<()> {
        self.rows
            .write()
            .await
            .insert(notification.id, notification.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AlertResult<Option<Notification>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn apply_change(&self, id: Uuid, change: StateChange) -> AlertResult<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&id) else {
            return Ok(false);
        };
        match change {
            StateChange::Read => row.is_read = true,
            StateChange::Dismiss => row.is_dismissed = true,
            StateChange::Snooze(_) if row.is_dismissed => return Ok(false),
            StateChange::Snooze(until) => row.snooze_until = Some(until),
        }
        Ok(true)
    }

    async fn list(&self, query: &ListQuery, now: DateTime<Utc>) -> AlertResult<Vec<Notification>> {
        let rows = self.rows.read().await;
        let mut matching: Vec<Notification> = rows
            .values()
            .filter(|n| query.matches(n, now))
            .cloned()
            .collect();
        newest_first(&mut matching);
        Ok(matching
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn count_unread(&self, now: DateTime<Utc>) -> AlertResult<i64> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|n| !n.is_read && n.is_active(now)).count() as i64)
    }

    async fn mark_all_read(&self, now: DateTime<Utc>) -> AlertResult<u64> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for row in rows.values_mut() {
            if !row.is_read && row.is_active(now) {
                row.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn clear_expired_snoozes(&self, now: DateTime<Utc>) -> AlertResult<u64> {
        let mut rows = self.rows.write().await;
        let mut changed = 0;
        for row in rows.values_mut() {
            if !row.is_dismissed && row.snooze_until.is_some_and(|until| until <= now) {
                row.snooze_until = None;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn history(&self, limit: i64) -> AlertResult<Vec<Notification>> {
        let mut all: Vec<Notification> = self.rows.read().await.values().cloned().collect();
        newest_first(&mut all);
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Sentiment,
    ResponseTime,
    Rating,
    Categories,
}

/// Message source over a fixed set of records. Queries listed in `failing`
/// return a store outage.
#[derive(Default)]
pub struct MemorySource {
    pub messages: Vec<MessageRecord>,
    pub failing: Vec<Query>,
}

impl MemorySource {
    pub fn new(messages: Vec<MessageRecord>) -> Self {
        Self {
            messages,
            failing: Vec::new(),
        }
    }

    pub fn failing() -> Self {
        Self {
            messages: Vec::new(),
            failing: vec![
                Query::Sentiment,
                Query::ResponseTime,
                Query::Rating,
                Query::Categories,
            ],
        }
    }

    pub fn failing_on(mut self, query: Query) -> Self {
        self.failing.push(query);
        self
    }

    fn window(
        &self,
        query: Query,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<impl Iterator<Item = &MessageRecord>> {
        if self.failing.contains(&query) {
            return Err(AlertError::Unavailable(sqlx::Error::PoolTimedOut));
        }
        Ok(self
            .messages
            .iter()
            .filter(move |m| m.created_at >= from && m.created_at < to))
    }
}

fn average(values: impl Iterator<Item = i32>) -> WindowAverage {
    let (sum, samples) = values.fold((0i64, 0i64), |(s, n), v| (s + v as i64, n + 1));
    WindowAverage {
        average: (samples > 0).then(|| sum as f64 / samples as f64),
        samples,
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn sentiment_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<SentimentCounts> {
        let sentiments: Vec<Sentiment> = self
            .window(Query::Sentiment, from, to)?
            .map(|m| m.sentiment)
            .collect();
        Ok(SentimentCounts::from_sentiments(&sentiments))
    }

    async fn response_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<WindowAverage> {
        Ok(average(
            self.window(Query::ResponseTime, from, to)?
                .filter_map(|m| m.response_time_ms),
        ))
    }

    async fn rating(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AlertResult<WindowAverage> {
        Ok(average(self.window(Query::Rating, from, to)?.filter_map(|m| m.rating)))
    }

    async fn category_volumes(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<Vec<CategoryVolume>> {
        let mut map: HashMap<String, (i64, i64)> = HashMap::new();
        for message in self.window(Query::Categories, from, to)? {
            let Some(category) = &message.category else {
                continue;
            };
            let entry = map.entry(category.clone()).or_insert((0, 0));
            entry.0 += 1;
            if message.sentiment == Sentiment::Negative {
                entry.1 += 1;
            }
        }
        let mut volumes: Vec<CategoryVolume> = map
            .into_iter()
            .map(|(category, (count, negative))| CategoryVolume {
                category,
                count,
                negative,
            })
            .collect();
        volumes.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));
        Ok(volumes)
    }
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
