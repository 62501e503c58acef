use crate::calc::GradedItem;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Excused,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceCodes {
    pub present: String,
    pub late: String,
    pub absent: String,
    pub excused: String,
}

impl Default for AttendanceCodes {
    fn default() -> Self {
        Self {
            present: "P".to_string(),
            late: "L".to_string(),
            absent: "A".to_string(),
            excused: "E".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttendancePolicy {
    /// Credit for a late arrival, as a percentage of one session.
    pub late_credit_percent: f64,
    pub codes: AttendanceCodes,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            late_credit_percent: 50.0,
            codes: AttendanceCodes::default(),
        }
    }
}

impl AttendanceStatus {
    /// Matches either the status word or the configured code, ignoring case.
    pub fn parse(raw: &str, codes: &AttendanceCodes) -> Option<Self> {
        let t = raw.trim();
        let pairs = [
            ("present", codes.present.as_str(), Self::Present),
            ("late", codes.late.as_str(), Self::Late),
            ("absent", codes.absent.as_str(), Self::Absent),
            ("excused", codes.excused.as_str(), Self::Excused),
        ];
        pairs
            .iter()
            .find(|(word, code, _)| t.eq_ignore_ascii_case(word) || t.eq_ignore_ascii_case(code))
            .map(|(_, _, status)| *status)
    }
}

/// One session's contribution, out of a single point. Excused sessions are
/// not gradable events and produce no item.
pub fn session_item(
    status: AttendanceStatus,
    category_id: &str,
    policy: &AttendancePolicy,
) -> Option<GradedItem> {
    let points = match status {
        AttendanceStatus::Present => 1.0,
        AttendanceStatus::Late => policy.late_credit_percent / 100.0,
        AttendanceStatus::Absent => 0.0,
        AttendanceStatus::Excused => return None,
    };
    Some(GradedItem::on_time(category_id, points, 1.0))
}

pub fn attendance_items(
    statuses: &[AttendanceStatus],
    category_id: &str,
    policy: &AttendancePolicy,
) -> Vec<GradedItem> {
    statuses
        .iter()
        .filter_map(|s| session_item(*s, category_id, policy))
        .collect()
}
