use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AlertError, AlertResult};
use crate::models::{
    CategoryVolume, ListQuery, Notification, NotificationType, Sentiment, SentimentCounts,
    WindowAverage,
};
use crate::store::{MessageSource, NotificationStore, StateChange};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed notification store and message source.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const NOTIFICATION_COLUMNS: &str = "id, type, title, message, student_id, message_id, \
     is_read, is_dismissed, snooze_until, created_at";

fn notification_from_row(row: &PgRow) -> AlertResult<Notification> {
    let kind: String = row.try_get("type")?;
    let kind = kind
        .parse::<NotificationType>()
        .map_err(|err| AlertError::Corrupt(err.to_string()))?;
    Ok(Notification {
        id: row.try_get("id")?,
        kind,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        student_id: row.try_get("student_id")?,
        message_id: row.try_get("message_id")?,
        is_read: row.try_get("is_read")?,
        is_dismissed: row.try_get("is_dismissed")?,
        snooze_until: row.try_get("snooze_until")?,
        created_at: row.try_get("created_at")?,
    })
}

fn window_average(row: &PgRow) -> AlertResult<WindowAverage> {
    Ok(WindowAverage {
        average: row.try_get("average")?,
        samples: row.try_get("samples")?,
    })
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, notification: &Notification) -> AlertResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messaging_alerts.notifications
            (id, type, title, message, student_id, message_id,
             is_read, is_dismissed, snooze_until, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(notification.id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.student_id)
        .bind(notification.message_id)
        .bind(notification.is_read)
        .bind(notification.is_dismissed)
        .bind(notification.snooze_until)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> AlertResult<Option<Notification>> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM messaging_alerts.notifications WHERE id = $1"
        );
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(notification_from_row).transpose()
    }

    async fn apply_change(&self, id: Uuid, change: StateChange) -> AlertResult<bool> {
        let query = match change {
            StateChange::Read => sqlx::query(
                "UPDATE messaging_alerts.notifications SET is_read = TRUE WHERE id = $1",
            )
            .bind(id),
            StateChange::Dismiss => sqlx::query(
                "UPDATE messaging_alerts.notifications SET is_dismissed = TRUE WHERE id = $1",
            )
            .bind(id),
            StateChange::Snooze(until) => sqlx::query(
                r#"
                UPDATE messaging_alerts.notifications
                SET snooze_until = $2
                WHERE id = $1 AND NOT is_dismissed
                "#,
            )
            .bind(id)
            .bind(until),
        };
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list(&self, query: &ListQuery, now: DateTime<Utc>) -> AlertResult<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM messaging_alerts.notifications \
             WHERE (is_dismissed OR snooze_until IS NULL OR snooze_until <= $1) \
             AND ($2 OR NOT is_dismissed) \
             AND ($3 OR NOT is_read) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(query.include_dismissed)
            .bind(query.include_read)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn count_unread(&self, now: DateTime<Utc>) -> AlertResult<i64> {
        let count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS unread
            FROM messaging_alerts.notifications
            WHERE NOT is_read AND NOT is_dismissed
              AND (snooze_until IS NULL OR snooze_until <= $1)
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?
        .try_get("unread")?;
        Ok(count)
    }

    async fn mark_all_read(&self, now: DateTime<Utc>) -> AlertResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messaging_alerts.notifications
            SET is_read = TRUE
            WHERE NOT is_read AND NOT is_dismissed
              AND (snooze_until IS NULL OR snooze_until <= $1)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn clear_expired_snoozes(&self, now: DateTime<Utc>) -> AlertResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE messaging_alerts.notifications
            SET snooze_until = NULL
            WHERE NOT is_dismissed AND snooze_until <= $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn history(&self, limit: i64) -> AlertResult<Vec<Notification>> {
        let sql = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM messaging_alerts.notifications \
             ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(notification_from_row).collect()
    }
}

#[async_trait]
impl MessageSource for PgStore {
    async fn sentiment_counts(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<SentimentCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE sentiment = 'positive') AS positive,
                COUNT(*) FILTER (WHERE sentiment = 'neutral') AS neutral,
                COUNT(*) FILTER (WHERE sentiment = 'negative') AS negative
            FROM messaging_alerts.messages
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        Ok(SentimentCounts {
            positive: row.try_get("positive")?,
            neutral: row.try_get("neutral")?,
            negative: row.try_get("negative")?,
        })
    }

    async fn response_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<WindowAverage> {
        let row = sqlx::query(
            r#"
            SELECT AVG(response_time_ms)::float8 AS average, COUNT(response_time_ms) AS samples
            FROM messaging_alerts.messages
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        window_average(&row)
    }

    async fn rating(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> AlertResult<WindowAverage> {
        let row = sqlx::query(
            r#"
            SELECT AVG(rating)::float8 AS average, COUNT(rating) AS samples
            FROM messaging_alerts.messages
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        window_average(&row)
    }

    async fn category_volumes(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> AlertResult<Vec<CategoryVolume>> {
        let rows = sqlx::query(
            r#"
            SELECT category,
                   COUNT(*) AS count,
                   COUNT(*) FILTER (WHERE sentiment = 'negative') AS negative
            FROM messaging_alerts.messages
            WHERE created_at >= $1 AND created_at < $2 AND category IS NOT NULL
            GROUP BY category
            ORDER BY count DESC, category
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut volumes = Vec::with_capacity(rows.len());
        for row in rows {
            volumes.push(CategoryVolume {
                category: row.try_get("category")?,
                count: row.try_get("count")?,
                negative: row.try_get("negative")?,
            });
        }
        Ok(volumes)
    }
}

async fn upsert_student(
    pool: &PgPool,
    student_key: &str,
    full_name: &str,
    email: &str,
    department: &str,
) -> anyhow::Result<i64> {
    let id: i64 = sqlx::query(
        r#"
        INSERT INTO messaging_alerts.students (student_key, full_name, email, department)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_key) DO UPDATE
        SET full_name = EXCLUDED.full_name,
            email = EXCLUDED.email,
            department = EXCLUDED.department
        RETURNING id
        "#,
    )
    .bind(student_key)
    .bind(full_name)
    .bind(email)
    .bind(department)
    .fetch_one(pool)
    .await?
    .get("id");
    Ok(id)
}

struct NewMessage<'a> {
    student_id: i64,
    query: &'a str,
    response: Option<&'a str>,
    sentiment: Sentiment,
    category: Option<&'a str>,
    response_time_ms: Option<i32>,
    rating: Option<i32>,
    created_at: DateTime<Utc>,
    source_key: String,
}

async fn insert_message(pool: &PgPool, message: NewMessage<'_>) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO messaging_alerts.messages
        (student_id, query, response, sentiment, category, response_time_ms,
         rating, created_at, source_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (source_key) DO NOTHING
        "#,
    )
    .bind(message.student_id)
    .bind(message.query)
    .bind(message.response)
    .bind(message.sentiment.as_str())
    .bind(message.category)
    .bind(message.response_time_ms)
    .bind(message.rating)
    .bind(message.created_at)
    .bind(message.source_key)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

const SEED_CATEGORIES: [(&str, &str); 5] = [
    ("financial_aid", "When is the financial aid deadline?"),
    ("registration", "How do I add a course after the deadline?"),
    ("housing", "Can I switch dorm rooms mid-semester?"),
    ("meal_plans", "How do I change my meal plan?"),
    ("it_support", "I can't log into the student portal."),
];

/// Thirty days of steady traffic followed by a negative, slow spike in
/// financial aid questions over the last twelve hours.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = [
        ("S-1001", "Avery Lee", "avery.lee@example.edu", "Engineering"),
        ("S-1002", "Jules Moreno", "jules.moreno@example.edu", "Business"),
        ("S-1003", "Kiara Patel", "kiara.patel@example.edu", "Nursing"),
    ];
    let mut student_ids = Vec::with_capacity(students.len());
    for (key, name, email, department) in students {
        student_ids.push(upsert_student(pool, key, name, email, department).await?);
    }

    let now = Utc::now();
    for day in 1..=30i64 {
        for slot in 0..SEED_CATEGORIES.len() as i64 {
            let (category, query) = SEED_CATEGORIES[slot as usize];
            let sentiment = match (day + slot) % 6 {
                0 => Sentiment::Negative,
                1 | 2 => Sentiment::Neutral,
                _ => Sentiment::Positive,
            };
            insert_message(
                pool,
                NewMessage {
                    student_id: student_ids[((day + slot) % 3) as usize],
                    query,
                    response: Some("Here is what I found in the student handbook."),
                    sentiment,
                    category: Some(category),
                    response_time_ms: Some(800 + ((day * 37 + slot * 53) % 900) as i32),
                    rating: Some(3 + ((day + slot) % 3) as i32),
                    created_at: now - Duration::days(day) - Duration::hours(slot * 3),
                    source_key: format!("seed-{day}-{slot}"),
                },
            )
            .await?;
        }
    }

    for i in 0..14i64 {
        insert_message(
            pool,
            NewMessage {
                student_id: student_ids[(i % 3) as usize],
                query: "Why hasn't my financial aid been disbursed yet?",
                response: None,
                sentiment: if i % 2 == 0 {
                    Sentiment::Negative
                } else {
                    Sentiment::Neutral
                },
                category: Some("financial_aid"),
                response_time_ms: Some(2300 + (i * 40) as i32),
                rating: Some(2),
                created_at: now - Duration::minutes(50 * i + 10),
                source_key: format!("seed-surge-{i}"),
            },
        )
        .await?;
    }

    let notifications = [
        (
            "9b0f5a52-3f1e-4c8e-a1d4-2f6b1c0e7a01",
            NotificationType::Critical,
            "Student Frustration Detected",
            "A student has expressed frustration multiple times about financial aid deadlines. Immediate attention recommended.",
            Some(student_ids[0]),
            false,
        ),
        (
            "9b0f5a52-3f1e-4c8e-a1d4-2f6b1c0e7a02",
            NotificationType::Warning,
            "Low Satisfaction Score Alert",
            "Satisfaction score dropped below 70% in the last hour.",
            None,
            false,
        ),
        (
            "9b0f5a52-3f1e-4c8e-a1d4-2f6b1c0e7a03",
            NotificationType::Info,
            "Weekly Report Ready",
            "Your weekly analytics report is ready for review.",
            None,
            true,
        ),
    ];
    for (id, kind, title, message, student_id, is_read) in notifications {
        sqlx::query(
            r#"
            INSERT INTO messaging_alerts.notifications
            (id, type, title, message, student_id, is_read)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(Uuid::parse_str(id).context("invalid seed notification id")?)
        .bind(kind.as_str())
        .bind(title)
        .bind(message)
        .bind(student_id)
        .bind(is_read)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_key: String,
        full_name: String,
        email: String,
        department: String,
        query: String,
        response: Option<String>,
        sentiment: String,
        category: Option<String>,
        response_time_ms: Option<i32>,
        rating: Option<i32>,
        created_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result?;
        let sentiment: Sentiment = row
            .sentiment
            .parse()
            .with_context(|| format!("row {}", line + 1))?;
        if let Some(rating) = row.rating {
            anyhow::ensure!(
                (1..=5).contains(&rating),
                "row {}: rating {rating} outside 1-5",
                line + 1
            );
        }

        let student_id =
            upsert_student(pool, &row.student_key, &row.full_name, &row.email, &row.department)
                .await?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let added = insert_message(
            pool,
            NewMessage {
                student_id,
                query: &row.query,
                response: row.response.as_deref(),
                sentiment,
                category: row.category.as_deref(),
                response_time_ms: row.response_time_ms,
                rating: row.rating,
                created_at: row.created_at,
                source_key,
            },
        )
        .await?;

        if added {
            inserted += 1;
        }
    }

    tracing::info!(inserted, path = %csv_path.display(), "imported messages");
    Ok(inserted)
}
