use crate::calc::{CalcError, GradedItem};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

const BAD_PARAMS: &str = "bad_params";
const MAX_GRACE_MINUTES: i64 = 60 * 24 * 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LateInterval {
    Hour,
    Day,
    Week,
}

impl LateInterval {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hours" => Some(Self::Hour),
            "day" | "days" => Some(Self::Day),
            "week" | "weeks" => Some(Self::Week),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
        }
    }

    fn duration(self) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::Day => Duration::days(1),
            Self::Week => Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatePolicy {
    pub penalty_percent: f64,
    pub interval: LateInterval,
    #[serde(default)]
    pub grace_minutes: i64,
}

impl Default for LatePolicy {
    fn default() -> Self {
        Self {
            penalty_percent: 10.0,
            interval: LateInterval::Day,
            grace_minutes: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Lateness {
    pub is_late: bool,
    pub late_intervals_elapsed: i64,
    pub minutes_late: i64,
}

impl LatePolicy {
    /// Builds the graded item for a submission scored `points_earned` out of
    /// `max_points` with the given lateness.
    pub fn graded_item(
        &self,
        lateness: &Lateness,
        category_id: impl Into<String>,
        points_earned: f64,
        max_points: f64,
    ) -> GradedItem {
        let item = GradedItem::on_time(category_id, points_earned, max_points);
        if lateness.is_late {
            item.late(self.penalty_percent, lateness.late_intervals_elapsed)
        } else {
            item
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` / `YYYY-MM-DDTHH:MM:SS` (UTC), or
/// a bare `YYYY-MM-DD`, which means the last second of that day in UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CalcError> {
    let t = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(t, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(23, 59, 59) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(CalcError::new(
        BAD_PARAMS,
        format!("unrecognized timestamp: {}", raw),
    ))
}

/// Any started interval past the due instant (plus grace) counts as a full
/// interval. Submitting exactly at the deadline is on time.
pub fn resolve_lateness(
    due_at: DateTime<Utc>,
    submitted_at: DateTime<Utc>,
    policy: &LatePolicy,
) -> Lateness {
    let grace = Duration::minutes(policy.grace_minutes.clamp(0, MAX_GRACE_MINUTES));
    let overdue = submitted_at - (due_at + grace);
    if overdue <= Duration::zero() {
        return Lateness {
            is_late: false,
            late_intervals_elapsed: 0,
            minutes_late: 0,
        };
    }

    let interval_ms = policy.interval.duration().num_milliseconds();
    let overdue_ms = overdue.num_milliseconds().max(1);
    Lateness {
        is_late: true,
        late_intervals_elapsed: (overdue_ms + interval_ms - 1) / interval_ms,
        minutes_late: overdue.num_minutes(),
    }
}
