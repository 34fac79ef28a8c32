//! Turns anomaly reports into notifications and tracks what an operator
//! surface has already shown.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::detect::AnomalyReport;
use crate::models::{NewNotification, Notification, NotificationType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Sentiment,
    ResponseTime,
    Satisfaction,
    HighVolume,
}

fn percent(rate: f64) -> f64 {
    (rate * 1000.0).round() / 10.0
}

/// One notification per raised signal, in a stable order.
pub fn alerts_from_report(report: &AnomalyReport) -> Vec<(SignalKind, NewNotification)> {
    let mut alerts = Vec::new();

    if report.sentiment.has_anomaly {
        alerts.push((
            SignalKind::Sentiment,
            NewNotification {
                kind: NotificationType::Critical,
                title: "Sentiment Anomaly Detected".to_string(),
                message: format!(
                    "Negative sentiment reached {}% across {} recent messages (baseline {}%).",
                    percent(report.sentiment.negative_rate),
                    report.sentiment.sample_size,
                    percent(report.sentiment.baseline_negative_rate),
                ),
                student_id: None,
                message_id: None,
            },
        ));
    }

    if report.response_time.has_anomaly {
        let baseline = report
            .response_time
            .baseline_ms
            .map(|ms| format!("{ms:.0}ms"))
            .unwrap_or_else(|| "no history".to_string());
        alerts.push((
            SignalKind::ResponseTime,
            NewNotification {
                kind: NotificationType::Warning,
                title: "Response Time Degradation".to_string(),
                message: format!(
                    "Average response time is {:.0}ms against a {:.0}ms threshold (baseline {}).",
                    report.response_time.avg_response_time_ms,
                    report.response_time.threshold,
                    baseline,
                ),
                student_id: None,
                message_id: None,
            },
        ));
    }

    if report.satisfaction.has_decline {
        alerts.push((
            SignalKind::Satisfaction,
            NewNotification {
                kind: NotificationType::Warning,
                title: "Low Satisfaction Score Alert".to_string(),
                message: format!(
                    "Satisfaction fell to {:.1}% from {:.1}% ({:+.1} points).",
                    report.satisfaction.recent_score,
                    report.satisfaction.baseline_score,
                    report.satisfaction.delta,
                ),
                student_id: None,
                message_id: None,
            },
        ));
    }

    if !report.high_volume_categories.is_empty() {
        let categories = report
            .high_volume_categories
            .iter()
            .map(|c| {
                format!(
                    "{} ({} queries, {:.0}% above normal)",
                    c.category, c.count, c.percent_above_normal
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        alerts.push((
            SignalKind::HighVolume,
            NewNotification {
                kind: NotificationType::Info,
                title: "High Volume Detected".to_string(),
                message: format!("Unusual query volume: {categories}."),
                student_id: None,
                message_id: None,
            },
        ));
    }

    alerts
}

/// Notification ids already surfaced to an operator. Owned by the display
/// loop and passed explicitly.
#[derive(Debug, Default)]
pub struct NotifiedSet {
    seen: HashSet<Uuid>,
}

impl NotifiedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unread critical notifications not shown before; marks them shown.
    /// `notifications` is the full active unread batch: ids missing from it
    /// are forgotten, so a snoozed alert surfaces again when it returns.
    pub fn take_new_critical<'a>(
        &mut self,
        notifications: &'a [Notification],
    ) -> Vec<&'a Notification> {
        let current: HashSet<Uuid> = notifications.iter().map(|n| n.id).collect();
        self.seen.retain(|id| current.contains(id));
        notifications
            .iter()
            .filter(|n| n.kind == NotificationType::Critical && !n.is_read)
            .filter(|n| self.seen.insert(n.id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Last emission time per signal kind, so a persisting anomaly produces one
/// notification per cooldown instead of one per poll.
#[derive(Debug)]
pub struct SignalCooldown {
    cooldown: Duration,
    last_emitted: HashMap<SignalKind, DateTime<Utc>>,
}

impl SignalCooldown {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_emitted: HashMap::new(),
        }
    }

    /// Records an emission at `now` when the kind is outside its cooldown.
    pub fn try_emit(&mut self, kind: SignalKind, now: DateTime<Utc>) -> bool {
        match self.last_emitted.get(&kind) {
            Some(last) if now - *last < self.cooldown => false,
            _ => {
                self.last_emitted.insert(kind, now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{HighVolumeCategory, ResponseTimeSignal, SentimentSignal};

    fn notification(kind: NotificationType, is_read: bool) -> Notification {
        let mut n = Notification::from_new(
            NewNotification {
                kind,
                title: "Student Frustration Detected".into(),
                message: "Immediate attention recommended.".into(),
                student_id: Some(4),
                message_id: None,
            },
            Utc::now(),
        );
        n.is_read = is_read;
        n
    }

    #[test]
    fn report_maps_to_alerts_by_severity() {
        let report = AnomalyReport {
            sentiment: SentimentSignal {
                has_anomaly: true,
                negative_rate: 0.4,
                baseline_negative_rate: 0.12,
                sample_size: 10,
            },
            response_time: ResponseTimeSignal {
                has_anomaly: true,
                avg_response_time_ms: 2500.0,
                baseline_ms: None,
                threshold: 2000.0,
            },
            high_volume_categories: vec![HighVolumeCategory {
                category: "financial_aid".into(),
                count: 40,
                percent_above_normal: 300.0,
                negative_rate: 0.3,
            }],
            has_any_anomaly: true,
            ..AnomalyReport::default()
        };

        let alerts = alerts_from_report(&report);
        let kinds: Vec<SignalKind> = alerts.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            kinds,
            vec![SignalKind::Sentiment, SignalKind::ResponseTime, SignalKind::HighVolume]
        );
        assert_eq!(alerts[0].1.kind, NotificationType::Critical);
        assert!(alerts[0].1.message.contains("40%"));
        assert!(alerts[1].1.message.contains("no history"));
        assert_eq!(alerts[2].1.kind, NotificationType::Info);
        assert!(alerts.iter().all(|(_, n)| n.validate().is_ok()));
    }

    #[test]
    fn quiet_report_raises_nothing() {
        assert!(alerts_from_report(&AnomalyReport::default()).is_empty());
    }

    #[test]
    fn critical_notifications_surface_once() {
        let batch = vec![
            notification(NotificationType::Critical, false),
            notification(NotificationType::Critical, true),
            notification(NotificationType::Warning, false),
        ];
        let mut notified = NotifiedSet::new();

        let first = notified.take_new_critical(&batch);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, batch[0].id);
        assert!(notified.take_new_critical(&batch).is_empty());
        assert_eq!(notified.len(), 1);
    }

    #[test]
    fn shown_set_forgets_notifications_that_leave_the_batch() {
        let alert = notification(NotificationType::Critical, false);
        let other = notification(NotificationType::Critical, false);
        let mut notified = NotifiedSet::new();

        assert_eq!(notified.take_new_critical(&[alert.clone(), other.clone()]).len(), 2);
        assert!(notified.take_new_critical(&[other.clone()]).is_empty());
        assert_eq!(notified.len(), 1);
        assert!(notified.take_new_critical(&[]).is_empty());
        assert_eq!(notified.len(), 0);

        let back = [alert];
        let again = notified.take_new_critical(&back);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].id, back[0].id);
    }

    #[test]
    fn cooldown_suppresses_repeat_signals() {
        let start = Utc::now();
        let mut cooldown = SignalCooldown::new(Duration::minutes(60));

        assert!(cooldown.try_emit(SignalKind::Sentiment, start));
        assert!(!cooldown.try_emit(SignalKind::Sentiment, start + Duration::minutes(30)));
        assert!(cooldown.try_emit(SignalKind::ResponseTime, start + Duration::minutes(30)));
        assert!(cooldown.try_emit(SignalKind::Sentiment, start + Duration::minutes(60)));
    }
}
