use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use uuid::Uuid;

mod alerts;
mod config;
mod db;
mod detect;
mod error;
mod lifecycle;
#[cfg(test)]
mod memory;
mod models;
mod store;

use alerts::{NotifiedSet, SignalCooldown};
use config::DetectorConfig;
use db::PgStore;
use lifecycle::{NotificationService, Transition, DEFAULT_HISTORY_LIMIT};
use models::{
    ListQuery, NewNotification, Notification, NotificationState, NotificationType, SnoozeDuration,
    DEFAULT_LIST_LIMIT,
};
use store::SystemClock;

#[derive(Parser)]
#[command(name = "messaging-alerts")]
#[command(about = "Notification and anomaly engine for chatbot analytics", long_about = None)]
struct Cli {
    /// Postgres connection pool size
    #[arg(long, env = "ALERTS_MAX_CONNECTIONS", default_value_t = 5, global = true)]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo students, messages and notifications
    Seed,
    /// Import chatbot messages from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List active notifications, most recent first
    List {
        #[arg(long)]
        include_read: bool,
        #[arg(long)]
        include_dismissed: bool,
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long)]
        json: bool,
    },
    /// Count unread active notifications
    UnreadCount,
    /// Create a notification
    Create {
        /// critical, warning or info
        #[arg(long = "type")]
        kind: NotificationType,
        #[arg(long)]
        title: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        student_id: Option<i64>,
        #[arg(long)]
        message_id: Option<i64>,
    },
    /// Mark one notification read
    Read { id: Uuid },
    /// Mark every active notification read
    ReadAll,
    /// Dismiss a notification permanently
    Dismiss { id: Uuid },
    /// Hide a notification for 15min, 1hour, 4hours or 1day
    Snooze { id: Uuid, duration: SnoozeDuration },
    /// Show all notifications including dismissed ones
    History {
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: i64,
        #[arg(long)]
        json: bool,
    },
    /// Run the anomaly detectors once
    Detect {
        #[command(flatten)]
        detectors: DetectorConfig,
        #[arg(long)]
        json: bool,
    },
    /// Return snoozed notifications whose timer has passed
    Reactivate,
    /// Poll for notifications and anomalies until interrupted
    Watch {
        #[command(flatten)]
        detectors: DetectorConfig,
        #[arg(long, default_value_t = 15)]
        poll_secs: u64,
        #[arg(long, default_value_t = 60)]
        detect_secs: u64,
        /// Store a notification for each anomaly raised
        #[arg(long)]
        emit: bool,
        #[arg(long, default_value_t = 60)]
        cooldown_mins: i64,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_notification(notification: &Notification, now: DateTime<Utc>) {
    let state = match notification.state(now) {
        NotificationState::Active => String::new(),
        NotificationState::Read => " [read]".to_string(),
        NotificationState::Dismissed => " [dismissed]".to_string(),
        NotificationState::Snoozed => match notification.snooze_until {
            Some(until) => format!(" [snoozed until {}]", until.format("%Y-%m-%d %H:%M")),
            None => " [snoozed]".to_string(),
        },
    };
    println!(
        "- {} {} ({}){}: {}",
        notification.id, notification.title, notification.kind, state, notification.message
    );
}

fn print_transition(id: Uuid, action: &str, outcome: Transition) {
    match outcome {
        Transition::Applied => println!("Notification {id} {action}."),
        Transition::Unchanged => println!("Notification {id} was already {action}."),
    }
}

fn print_report(report: &detect::AnomalyReport) {
    let s = &report.sentiment;
    println!(
        "Sentiment: {} (negative {:.1}% of {} messages, baseline {:.1}%)",
        if s.has_anomaly { "ANOMALY" } else { "normal" },
        s.negative_rate * 100.0,
        s.sample_size,
        s.baseline_negative_rate * 100.0
    );
    let r = &report.response_time;
    println!(
        "Response time: {} (avg {:.0}ms, threshold {:.0}ms, baseline {})",
        if r.has_anomaly { "ANOMALY" } else { "normal" },
        r.avg_response_time_ms,
        r.threshold,
        r.baseline_ms
            .map(|ms| format!("{ms:.0}ms"))
            .unwrap_or_else(|| "n/a".to_string())
    );
    let sat = &report.satisfaction;
    println!(
        "Satisfaction: {} (recent {:.1}%, previous {:.1}%, change {:+.1})",
        if sat.has_decline { "DECLINE" } else { "normal" },
        sat.recent_score,
        sat.baseline_score,
        sat.delta
    );
    if report.high_volume_categories.is_empty() {
        println!("High volume categories: none");
    } else {
        println!("High volume categories:");
        for category in &report.high_volume_categories {
            println!(
                "- {}: {} queries, {:.0}% above normal, {:.0}% negative",
                category.category,
                category.count,
                category.percent_above_normal,
                category.negative_rate * 100.0
            );
        }
    }
    if !report.failed_detectors.is_empty() {
        println!("Unavailable detectors: {}", report.failed_detectors.join(", "));
    }
}

async fn watch(
    service: &NotificationService,
    source: &PgStore,
    detectors: &DetectorConfig,
    poll_secs: u64,
    detect_secs: u64,
    emit: bool,
    cooldown: chrono::Duration,
) -> anyhow::Result<()> {
    let mut notified = NotifiedSet::new();
    let mut cooldown = SignalCooldown::new(cooldown);
    let mut poll = tokio::time::interval(StdDuration::from_secs(poll_secs.max(1)));
    let mut detect_tick = tokio::time::interval(StdDuration::from_secs(detect_secs.max(1)));
    let everything_unread = ListQuery {
        limit: models::MAX_LIST_LIMIT,
        ..ListQuery::default()
    };

    info!(poll_secs, detect_secs, emit, "watching notifications");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(shown = notified.len(), "watch stopped");
                return Ok(());
            }
            _ = poll.tick() => {
                if let Err(err) = service.reactivate_snoozed().await {
                    warn!(error = %err, "reactivation sweep failed");
                }
                match service.list(everything_unread.clone()).await {
                    Ok(unread) => {
                        for notification in notified.take_new_critical(&unread) {
                            print!("CRITICAL ");
                            print_notification(notification, service.now());
                        }
                    }
                    Err(err) => warn!(
                        error = %err,
                        retryable = err.is_retryable(),
                        "notification poll failed"
                    ),
                }
            }
            _ = detect_tick.tick() => {
                let report = detect::detect_anomalies(source, detectors, service.now()).await;
                if !report.has_any_anomaly && report.high_volume_categories.is_empty() {
                    continue;
                }
                print_report(&report);
                if !emit {
                    continue;
                }
                for (kind, alert) in alerts::alerts_from_report(&report) {
                    if !cooldown.try_emit(kind, service.now()) {
                        continue;
                    }
                    if let Err(err) = service.create(alert).await {
                        warn!(error = %err, ?kind, "failed to store anomaly notification");
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let store = Arc::new(PgStore::new(pool.clone()));
    let service = NotificationService::new(store.clone(), Arc::new(SystemClock));

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} messages from {}.", csv.display());
        }
        Commands::List {
            include_read,
            include_dismissed,
            limit,
            offset,
            json,
        } => {
            let notifications = service
                .list(ListQuery {
                    include_read,
                    include_dismissed,
                    limit,
                    offset,
                })
                .await?;
            if json {
                print_json(&notifications)?;
            } else if notifications.is_empty() {
                println!("No notifications.");
            } else {
                let now = service.now();
                for notification in &notifications {
                    print_notification(notification, now);
                }
            }
        }
        Commands::UnreadCount => {
            println!("{}", service.unread_count().await?);
        }
        Commands::Create {
            kind,
            title,
            message,
            student_id,
            message_id,
        } => {
            let created = service
                .create(NewNotification {
                    kind,
                    title,
                    message,
                    student_id,
                    message_id,
                })
                .await?;
            println!("Created notification {}.", created.id);
        }
        Commands::Read { id } => {
            let outcome = service.mark_as_read(id).await?;
            print_transition(id, "read", outcome);
        }
        Commands::ReadAll => {
            let changed = service.mark_all_as_read().await?;
            println!("Marked {changed} notifications read.");
        }
        Commands::Dismiss { id } => {
            let outcome = service.dismiss(id).await?;
            print_transition(id, "dismissed", outcome);
        }
        Commands::Snooze { id, duration } => {
            match service.snooze(id, duration).await? {
                Transition::Applied => {
                    println!("Notification {id} snoozed for {}.", duration.label())
                }
                Transition::Unchanged => {
                    println!("Notification {id} is dismissed; snooze ignored.")
                }
            }
        }
        Commands::History { limit, json } => {
            let notifications = service.history(limit).await?;
            if json {
                print_json(&notifications)?;
            } else {
                let now = service.now();
                for notification in &notifications {
                    print_notification(notification, now);
                }
            }
        }
        Commands::Detect { detectors, json } => {
            detectors.validate()?;
            let report = detect::detect_anomalies(store.as_ref(), &detectors, service.now()).await;
            if json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }
        Commands::Reactivate => {
            let reactivated = service.reactivate_snoozed().await?;
            println!("Reactivated {reactivated} notifications.");
        }
        Commands::Watch {
            detectors,
            poll_secs,
            detect_secs,
            emit,
            cooldown_mins,
        } => {
            detectors.validate()?;
            watch(
                &service,
                store.as_ref(),
                &detectors,
                poll_secs,
                detect_secs,
                emit,
                chrono::Duration::minutes(cooldown_mins.max(0)),
            )
            .await?;
        }
    }

    Ok(())
}
