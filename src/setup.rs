use crate::attendance::{AttendanceCodes, AttendancePolicy};
use crate::db;
use crate::late::{LateInterval, LatePolicy};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupSection {
    Grading,
    Attendance,
}

impl SetupSection {
    pub const ALL: [SetupSection; 2] = [Self::Grading, Self::Attendance];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Attendance => "attendance",
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Attendance => "setup.attendance",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "displayDecimals": 1,
            "defaultLateInterval": "day",
            "defaultLatePenaltyPercent": 10.0,
            "graceMinutes": 0
        }),
        SetupSection::Attendance => json!({
            "lateCreditPercent": 50.0,
            "presentCode": "P",
            "lateCode": "L",
            "absentCode": "A",
            "excusedCode": "E"
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

pub fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "displayDecimals" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 4)?));
                }
                "defaultLateInterval" => {
                    let raw = parse_string_max(v, k, 8)?;
                    let Some(interval) = LateInterval::parse(&raw) else {
                        return Err("defaultLateInterval must be one of: hour, day, week".into());
                    };
                    obj.insert(k.clone(), Value::String(interval.as_str().to_string()));
                }
                "defaultLatePenaltyPercent" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "graceMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 1440)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Attendance => match k.as_str() {
                "lateCreditPercent" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "presentCode" | "lateCode" | "absentCode" | "excusedCode" => {
                    let s = parse_string_max(v, k, 8)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s.to_ascii_uppercase()));
                }
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    if section == SetupSection::Attendance {
        check_attendance_codes(obj)?;
    }
    Ok(())
}

const ATTENDANCE_CODE_KEYS: [&str; 4] = ["presentCode", "lateCode", "absentCode", "excusedCode"];
const ATTENDANCE_WORDS: [&str; 4] = ["present", "late", "absent", "excused"];

/// Each code must name exactly one status, or later marks resolve to the
/// wrong one.
fn check_attendance_codes(obj: &Map<String, Value>) -> Result<(), String> {
    let codes: Vec<(&str, &str)> = ATTENDANCE_CODE_KEYS
        .iter()
        .filter_map(|key| obj.get(*key).and_then(|v| v.as_str()).map(|c| (*key, c)))
        .collect();
    for (i, (key, code)) in codes.iter().enumerate() {
        if let Some(word) = ATTENDANCE_WORDS
            .iter()
            .find(|w| code.eq_ignore_ascii_case(w))
        {
            return Err(format!("{} must not be a status word ({})", key, word));
        }
        if let Some((other, _)) = codes[i + 1..]
            .iter()
            .find(|(_, c)| c.eq_ignore_ascii_case(code))
        {
            return Err(format!("{} and {} must differ", key, other));
        }
    }
    Ok(())
}

/// Defaults merged with whatever the workspace has saved. Without a
/// workspace the defaults are returned as-is.
pub fn load_section(conn: Option<&Connection>, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    let Some(conn) = conn else {
        return Ok(current);
    };
    let Some(text) = db::settings_get_text(conn, section.key())? else {
        return Ok(current);
    };
    // Best-effort apply: a malformed saved value must not block grading.
    let saved: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(section = section.name(), error = %e, "saved setup values are not JSON");
            return Ok(current);
        }
    };
    let Some(saved_obj) = saved.as_object() else {
        tracing::warn!(section = section.name(), "saved setup values are not an object");
        return Ok(current);
    };
    if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
        tracing::warn!(section = section.name(), error = %e, "ignoring saved setup values");
        current = default_section(section);
    }
    Ok(current)
}

pub fn save_section(conn: &Connection, section: SetupSection, value: &Value) -> anyhow::Result<()> {
    db::settings_set_json(conn, section.key(), value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradingSettings {
    pub display_decimals: u32,
    pub late_policy: LatePolicy,
}

pub fn grading_settings(conn: Option<&Connection>) -> anyhow::Result<GradingSettings> {
    let v = load_section(conn, SetupSection::Grading)?;
    let defaults = LatePolicy::default();
    Ok(GradingSettings {
        display_decimals: v
            .get("displayDecimals")
            .and_then(|x| x.as_u64())
            .map(|n| n as u32)
            .unwrap_or(1),
        late_policy: LatePolicy {
            penalty_percent: v
                .get("defaultLatePenaltyPercent")
                .and_then(|x| x.as_f64())
                .unwrap_or(defaults.penalty_percent),
            interval: v
                .get("defaultLateInterval")
                .and_then(|x| x.as_str())
                .and_then(LateInterval::parse)
                .unwrap_or(defaults.interval),
            grace_minutes: v
                .get("graceMinutes")
                .and_then(|x| x.as_i64())
                .unwrap_or(defaults.grace_minutes),
        },
    })
}

pub fn attendance_policy(conn: Option<&Connection>) -> anyhow::Result<AttendancePolicy> {
    let v = load_section(conn, SetupSection::Attendance)?;
    let defaults = AttendancePolicy::default();
    let code = |key: &str, fallback: &str| {
        v.get(key)
            .and_then(|x| x.as_str())
            .unwrap_or(fallback)
            .to_string()
    };
    Ok(AttendancePolicy {
        late_credit_percent: v
            .get("lateCreditPercent")
            .and_then(|x| x.as_f64())
            .unwrap_or(defaults.late_credit_percent),
        codes: AttendanceCodes {
            present: code("presentCode", &defaults.codes.present),
            late: code("lateCode", &defaults.codes.late),
            absent: code("absentCode", &defaults.codes.absent),
            excused: code("excusedCode", &defaults.codes.excused),
        },
    })
}
