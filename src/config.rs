use clap::Args;

use crate::error::AlertError;

/// Thresholds and windows for the anomaly detectors.
#[derive(Debug, Clone, PartialEq, Args)]
pub struct DetectorConfig {
    /// Fewest messages in the recent window before sentiment is judged
    #[arg(long, env = "ALERTS_MIN_SAMPLE_SIZE", default_value_t = 10)]
    pub min_sample_size: i64,

    /// Negative-sentiment share (0-1) above which sentiment is anomalous
    #[arg(long, env = "ALERTS_NEGATIVE_RATE_THRESHOLD", default_value_t = 0.20)]
    pub negative_rate_threshold: f64,

    /// Absolute average response time ceiling in milliseconds
    #[arg(long, env = "ALERTS_RESPONSE_TIME_THRESHOLD_MS", default_value_t = 2000.0)]
    pub response_time_threshold_ms: f64,

    /// Allowed rise over the response-time baseline (0.5 = +50%)
    #[arg(long, env = "ALERTS_RESPONSE_TIME_MARGIN", default_value_t = 0.50)]
    pub response_time_margin: f64,

    /// Satisfaction drop, in points on a 0-100 scale, that counts as a decline
    #[arg(long, env = "ALERTS_SATISFACTION_DROP_POINTS", default_value_t = 10.0)]
    pub satisfaction_drop_points: f64,

    /// Multiple of a category's daily average that counts as high volume
    #[arg(long, env = "ALERTS_HIGH_VOLUME_RATIO", default_value_t = 1.5)]
    pub high_volume_ratio: f64,

    #[arg(long, env = "ALERTS_RECENT_HOURS", default_value_t = 24)]
    pub recent_hours: i64,

    #[arg(long, env = "ALERTS_SENTIMENT_BASELINE_DAYS", default_value_t = 30)]
    pub sentiment_baseline_days: i64,

    #[arg(long, env = "ALERTS_RESPONSE_BASELINE_DAYS", default_value_t = 7)]
    pub response_baseline_days: i64,

    /// Length of both the recent and the comparison satisfaction windows
    #[arg(long, env = "ALERTS_SATISFACTION_WINDOW_DAYS", default_value_t = 7)]
    pub satisfaction_window_days: i64,

    #[arg(long, env = "ALERTS_VOLUME_BASELINE_DAYS", default_value_t = 30)]
    pub volume_baseline_days: i64,

    #[arg(long, env = "ALERTS_MAX_CATEGORIES", default_value_t = 5)]
    pub max_categories: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 10,
            negative_rate_threshold: 0.20,
            response_time_threshold_ms: 2000.0,
            response_time_margin: 0.50,
            satisfaction_drop_points: 10.0,
            high_volume_ratio: 1.5,
            recent_hours: 24,
            sentiment_baseline_days: 30,
            response_baseline_days: 7,
            satisfaction_window_days: 7,
            volume_baseline_days: 30,
            max_categories: 5,
        }
    }
}

const MAX_RECENT_HOURS: i64 = 24 * 365;
const MAX_WINDOW_DAYS: i64 = 3650;

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), AlertError> {
        let windows = [
            ("recent-hours", self.recent_hours, MAX_RECENT_HOURS),
            ("sentiment-baseline-days", self.sentiment_baseline_days, MAX_WINDOW_DAYS),
            ("response-baseline-days", self.response_baseline_days, MAX_WINDOW_DAYS),
            ("satisfaction-window-days", self.satisfaction_window_days, MAX_WINDOW_DAYS),
            ("volume-baseline-days", self.volume_baseline_days, MAX_WINDOW_DAYS),
        ];
        for (name, value, max) in windows {
            if !(1..=max).contains(&value) {
                return Err(AlertError::Validation(format!(
                    "{name} must be between 1 and {max}, got {value}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.negative_rate_threshold) {
            return Err(AlertError::Validation(
                "negative-rate-threshold must be between 0 and 1".into(),
            ));
        }
        if self.min_sample_size < 0
            || self.response_time_threshold_ms <= 0.0
            || self.response_time_margin < 0.0
            || self.satisfaction_drop_points < 0.0
            || self.high_volume_ratio <= 0.0
        {
            return Err(AlertError::Validation(
                "detector thresholds must be positive".into(),
            ));
        }
        Ok(())
    }
}
