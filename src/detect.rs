//! Anomaly detectors over recent message activity.
//!
//! Each detector pulls a recent window and a baseline window from the
//! message source and applies a threshold. The evaluation step is a pure
//! function so thresholds can be tested without a store. A detector whose
//! queries fail reports "no anomaly" and is listed in `failed_detectors`.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::error::{AlertError, AlertResult};
use crate::models::{ratio, CategoryVolume, SentimentCounts, WindowAverage};
use crate::store::MessageSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentSignal {
    pub has_anomaly: bool,
    pub negative_rate: f64,
    pub baseline_negative_rate: f64,
    pub sample_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseTimeSignal {
    pub has_anomaly: bool,
    pub avg_response_time_ms: f64,
    pub baseline_ms: Option<f64>,
    pub threshold: f64,
}

/// Scores are average ratings rescaled to 0-100.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SatisfactionSignal {
    pub has_decline: bool,
    pub recent_score: f64,
    pub baseline_score: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HighVolumeCategory {
    pub category: String,
    pub count: i64,
    pub percent_above_normal: f64,
    pub negative_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyReport {
    pub sentiment: SentimentSignal,
    pub response_time: ResponseTimeSignal,
    pub satisfaction: SatisfactionSignal,
    pub high_volume_categories: Vec<HighVolumeCategory>,
    pub has_any_anomaly: bool,
    pub failed_detectors: Vec<&'static str>,
}

/// Half-open `[from, to)` time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl Window {
    pub fn ending_at(to: DateTime<Utc>, length: Duration) -> AlertResult<Self> {
        let from = to.checked_sub_signed(length).ok_or_else(|| {
            AlertError::Validation(format!("window of {length} reaches before the calendar"))
        })?;
        Ok(Self { from, to })
    }

    /// The window of `length` that ends where this one starts.
    pub fn preceding(&self, length: Duration) -> AlertResult<Self> {
        Self::ending_at(self.from, length)
    }
}

fn hours(name: &str, value: i64) -> AlertResult<Duration> {
    Duration::try_hours(value)
        .ok_or_else(|| AlertError::Validation(format!("{name} of {value} hours is out of range")))
}

fn days(name: &str, value: i64) -> AlertResult<Duration> {
    Duration::try_days(value)
        .ok_or_else(|| AlertError::Validation(format!("{name} of {value} days is out of range")))
}

pub fn evaluate_sentiment(
    current: SentimentCounts,
    baseline: SentimentCounts,
    config: &DetectorConfig,
) -> SentimentSignal {
    let sample_size = current.total();
    let negative_rate = current.negative_rate();
    SentimentSignal {
        has_anomaly: sample_size >= config.min_sample_size
            && negative_rate > config.negative_rate_threshold,
        negative_rate,
        baseline_negative_rate: baseline.negative_rate(),
        sample_size,
    }
}

pub fn evaluate_response_time(
    current: WindowAverage,
    baseline: WindowAverage,
    config: &DetectorConfig,
) -> ResponseTimeSignal {
    let baseline_ms = baseline.average.filter(|ms| *ms > 0.0);
    let has_anomaly = match current.average {
        Some(avg) => {
            avg > config.response_time_threshold_ms
                || baseline_ms.is_some_and(|base| avg > base * (1.0 + config.response_time_margin))
        }
        None => false,
    };
    ResponseTimeSignal {
        has_anomaly,
        avg_response_time_ms: current.average.unwrap_or(0.0),
        baseline_ms,
        threshold: config.response_time_threshold_ms,
    }
}

fn rating_score(rating: f64) -> f64 {
    rating / 5.0 * 100.0
}

pub fn evaluate_satisfaction(
    recent: WindowAverage,
    baseline: WindowAverage,
    config: &DetectorConfig,
) -> SatisfactionSignal {
    let (Some(recent_avg), Some(baseline_avg)) = (recent.average, baseline.average) else {
        return SatisfactionSignal {
            recent_score: recent.average.map(rating_score).unwrap_or(0.0),
            baseline_score: baseline.average.map(rating_score).unwrap_or(0.0),
            ..SatisfactionSignal::default()
        };
    };
    let recent_score = rating_score(recent_avg);
    let baseline_score = rating_score(baseline_avg);
    let delta = recent_score - baseline_score;
    SatisfactionSignal {
        has_decline: recent.samples >= config.min_sample_size
            && -delta > config.satisfaction_drop_points,
        recent_score,
        baseline_score,
        delta,
    }
}

/// Categories whose recent count exceeds `high_volume_ratio` times their own
/// baseline rate scaled to the recent window. Categories with no baseline
/// history have no normal to compare against and are skipped.
pub fn evaluate_volumes(
    current: &[CategoryVolume],
    baseline: &[CategoryVolume],
    baseline_span: Duration,
    recent_span: Duration,
    config: &DetectorConfig,
) -> Vec<HighVolumeCategory> {
    let scale = recent_span.num_seconds() as f64 / baseline_span.num_seconds().max(1) as f64;
    let normals: HashMap<&str, f64> = baseline
        .iter()
        .map(|b| (b.category.as_str(), b.count as f64 * scale))
        .collect();

    let mut flagged: Vec<HighVolumeCategory> = current
        .iter()
        .filter_map(|volume| {
            let normal = *normals.get(volume.category.as_str())?;
            if normal <= 0.0 {
                return None;
            }
            let relative = volume.count as f64 / normal;
            (relative > config.high_volume_ratio).then(|| HighVolumeCategory {
                category: volume.category.clone(),
                count: volume.count,
                percent_above_normal: (relative - 1.0) * 100.0,
                negative_rate: ratio(volume.negative, volume.count),
            })
        })
        .collect();

    flagged.sort_by(|a, b| b.count.cmp(&a.count).then(a.category.cmp(&b.category)));
    flagged.truncate(config.max_categories);
    flagged
}

pub async fn detect_sentiment(
    source: &dyn MessageSource,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> AlertResult<SentimentSignal> {
    let recent = Window::ending_at(now, hours("recent-hours", config.recent_hours)?)?;
    let baseline = recent.preceding(days(
        "sentiment-baseline-days",
        config.sentiment_baseline_days,
    )?)?;
    let (current, history) = tokio::try_join!(
        source.sentiment_counts(recent.from, recent.to),
        source.sentiment_counts(baseline.from, baseline.to),
    )?;
    Ok(evaluate_sentiment(current, history, config))
}

pub async fn detect_response_time(
    source: &dyn MessageSource,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> AlertResult<ResponseTimeSignal> {
    let recent = Window::ending_at(now, hours("recent-hours", config.recent_hours)?)?;
    let baseline = recent.preceding(days(
        "response-baseline-days",
        config.response_baseline_days,
    )?)?;
    let (current, history) = tokio::try_join!(
        source.response_time(recent.from, recent.to),
        source.response_time(baseline.from, baseline.to),
    )?;
    Ok(evaluate_response_time(current, history, config))
}

pub async fn detect_satisfaction(
    source: &dyn MessageSource,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> AlertResult<SatisfactionSignal> {
    let span = days("satisfaction-window-days", config.satisfaction_window_days)?;
    let recent = Window::ending_at(now, span)?;
    let baseline = recent.preceding(span)?;
    let (current, previous) = tokio::try_join!(
        source.rating(recent.from, recent.to),
        source.rating(baseline.from, baseline.to),
    )?;
    Ok(evaluate_satisfaction(current, previous, config))
}

pub async fn detect_high_volume(
    source: &dyn MessageSource,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> AlertResult<Vec<HighVolumeCategory>> {
    let recent_span = hours("recent-hours", config.recent_hours)?;
    let baseline_span = days("volume-baseline-days", config.volume_baseline_days)?;
    let recent = Window::ending_at(now, recent_span)?;
    let baseline = recent.preceding(baseline_span)?;
    let (current, history) = tokio::try_join!(
        source.category_volumes(recent.from, recent.to),
        source.category_volumes(baseline.from, baseline.to),
    )?;
    Ok(evaluate_volumes(
        &current,
        &history,
        baseline_span,
        recent_span,
        config,
    ))
}

fn fail_closed<T: Default>(
    name: &'static str,
    result: AlertResult<T>,
    failed: &mut Vec<&'static str>,
) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            warn!(detector = name, error = %err, "detector failed; reporting no anomaly");
            failed.push(name);
            T::default()
        }
    }
}

/// Runs all four detectors concurrently. Never fails: a detector that
/// errors contributes its empty default.
pub async fn detect_anomalies(
    source: &dyn MessageSource,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> AnomalyReport {
    let (sentiment, response_time, satisfaction, volumes) = tokio::join!(
        detect_sentiment(source, config, now),
        detect_response_time(source, config, now),
        detect_satisfaction(source, config, now),
        detect_high_volume(source, config, now),
    );

    let mut failed = Vec::new();
    let sentiment = fail_closed("sentiment", sentiment, &mut failed);
    let response_time = fail_closed("response_time", response_time, &mut failed);
    let satisfaction = fail_closed("satisfaction", satisfaction, &mut failed);
    let high_volume_categories = fail_closed("high_volume", volumes, &mut failed);

    let has_any_anomaly =
        sentiment.has_anomaly || response_time.has_anomaly || satisfaction.has_decline;
    debug!(
        has_any_anomaly,
        high_volume = high_volume_categories.len(),
        failed = failed.len(),
        "anomaly detection finished"
    );

    AnomalyReport {
        sentiment,
        response_time,
        satisfaction,
        high_volume_categories,
        has_any_anomaly,
        failed_detectors: failed,
    }
}
