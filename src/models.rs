use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AlertError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Critical,
    Warning,
    Info,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::Critical => "critical",
            NotificationType::Warning => "warning",
            NotificationType::Info => "info",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = AlertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "critical" => Ok(NotificationType::Critical),
            "warning" => Ok(NotificationType::Warning),
            "info" => Ok(NotificationType::Info),
            other => Err(AlertError::Validation(format!(
                "unknown notification type '{other}' (expected critical, warning or info)"
            ))),
        }
    }
}

/// Fixed snooze offsets offered to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnoozeDuration {
    #[serde(rename = "15min")]
    FifteenMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "4hours")]
    FourHours,
    #[serde(rename = "1day")]
    OneDay,
}

impl SnoozeDuration {
    pub fn as_millis(self) -> i64 {
        match self {
            SnoozeDuration::FifteenMinutes => 15 * 60 * 1000,
            SnoozeDuration::OneHour => 60 * 60 * 1000,
            SnoozeDuration::FourHours => 4 * 60 * 60 * 1000,
            SnoozeDuration::OneDay => 24 * 60 * 60 * 1000,
        }
    }

    pub fn offset(self) -> Duration {
        Duration::milliseconds(self.as_millis())
    }

    pub fn label(self) -> &'static str {
        match self {
            SnoozeDuration::FifteenMinutes => "15 minutes",
            SnoozeDuration::OneHour => "1 hour",
            SnoozeDuration::FourHours => "4 hours",
            SnoozeDuration::OneDay => "1 day",
        }
    }
}

impl FromStr for SnoozeDuration {
    type Err = AlertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "15min" => Ok(SnoozeDuration::FifteenMinutes),
            "1hour" => Ok(SnoozeDuration::OneHour),
            "4hours" => Ok(SnoozeDuration::FourHours),
            "1day" => Ok(SnoozeDuration::OneDay),
            other => Err(AlertError::Validation(format!(
                "unknown snooze duration '{other}' (expected 15min, 1hour, 4hours or 1day)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub student_id: Option<i64>,
    pub message_id: Option<i64>,
    pub is_read: bool,
    pub is_dismissed: bool,
    pub snooze_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Where a notification sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationState {
    Active,
    Read,
    Snoozed,
    Dismissed,
}

impl Notification {
    pub fn from_new(new: NewNotification, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: new.kind,
            title: new.title,
            message: new.message,
            student_id: new.student_id,
            message_id: new.message_id,
            is_read: false,
            is_dismissed: false,
            snooze_until: None,
            created_at,
        }
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.is_some_and(|until| until > now)
    }

    /// Shown in default listings: not dismissed and not inside a snooze window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_dismissed && !self.is_snoozed(now)
    }

    pub fn state(&self, now: DateTime<Utc>) -> NotificationState {
        if self.is_dismissed {
            NotificationState::Dismissed
        } else if self.is_snoozed(now) {
            NotificationState::Snoozed
        } else if self.is_read {
            NotificationState::Read
        } else {
            NotificationState::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub student_id: Option<i64>,
    pub message_id: Option<i64>,
}

impl NewNotification {
    pub fn validate(&self) -> Result<(), AlertError> {
        if self.title.trim().is_empty() {
            return Err(AlertError::Validation("title must not be empty".into()));
        }
        if self.message.trim().is_empty() {
            return Err(AlertError::Validation("message must not be empty".into()));
        }
        Ok(())
    }
}

pub const DEFAULT_LIST_LIMIT: i64 = 20;
pub const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub include_read: bool,
    pub include_dismissed: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            include_read: false,
            include_dismissed: false,
            limit: DEFAULT_LIST_LIMIT,
            offset: 0,
        }
    }
}

impl ListQuery {
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, MAX_LIST_LIMIT);
        self.offset = self.offset.max(0);
        self
    }

    pub fn matches(&self, notification: &Notification, now: DateTime<Utc>) -> bool {
        if notification.is_snoozed(now) && !notification.is_dismissed {
            return false;
        }
        if !self.include_dismissed && notification.is_dismissed {
            return false;
        }
        if !self.include_read && notification.is_read {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }
}

impl FromStr for Sentiment {
    type Err = AlertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "positive" => Ok(Sentiment::Positive),
            "neutral" => Ok(Sentiment::Neutral),
            "negative" => Ok(Sentiment::Negative),
            other => Err(AlertError::Validation(format!("unknown sentiment '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SentimentCounts {
    pub positive: i64,
    pub neutral: i64,
    pub negative: i64,
}

impl SentimentCounts {
    pub fn total(&self) -> i64 {
        self.positive + self.neutral + self.negative
    }

    pub fn negative_rate(&self) -> f64 {
        ratio(self.negative, self.total())
    }
}

/// Average of a numeric column over a window plus how many rows fed it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowAverage {
    pub average: Option<f64>,
    pub samples: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryVolume {
    pub category: String,
    pub count: i64,
    pub negative: i64,
}

pub fn ratio(part: i64, whole: i64) -> f64 {
    if whole <= 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}
