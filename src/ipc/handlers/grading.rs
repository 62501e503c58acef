use crate::calc::{self, GradeCategory, GradedItem, StudentItems};
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_optional, get_required, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::late::{self, LateInterval, LatePolicy};
use crate::setup::{self, GradingSettings};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

fn load_grading(conn: Option<&Connection>) -> Result<GradingSettings, HandlerErr> {
    setup::grading_settings(conn).map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn display(settings: &GradingSettings, pct: f64) -> f64 {
    calc::round_half_up(pct, settings.display_decimals)
}

fn grade_submission(
    conn: Option<&Connection>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let item: GradedItem = get_required(params, "item")?;
    let settings = load_grading(conn)?;
    let finalized = calc::grade_submission(&item)?;
    Ok(json!({
        "finalPoints": finalized.final_points,
        "percentage": finalized.percentage,
        "displayPercentage": display(&settings, finalized.percentage),
        "letterGrade": calc::letter_grade(finalized.percentage),
    }))
}

fn grade_letter(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(percentage) = params.get("percentage").and_then(|v| v.as_f64()) else {
        return Err(HandlerErr::bad_params("percentage must be a number"));
    };
    Ok(json!({ "letterGrade": calc::letter_grade(percentage) }))
}

fn grade_course(
    conn: Option<&Connection>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let items: Vec<GradedItem> = get_required(params, "items")?;
    let categories: Vec<GradeCategory> = get_required(params, "categories")?;
    let settings = load_grading(conn)?;

    let breakdown = calc::aggregate_course_breakdown(&items, &categories);
    if breakdown.skipped_items > 0 {
        tracing::debug!(skipped = breakdown.skipped_items, "ungradable items treated as ungraded");
    }
    let display_percentage = display(&settings, breakdown.grade.weighted_percentage);
    let mut out = serde_json::to_value(&breakdown)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    out["displayPercentage"] = json!(display_percentage);
    Ok(out)
}

fn grade_class_summary(
    conn: Option<&Connection>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let students: Vec<StudentItems> = get_required(params, "students")?;
    let categories: Vec<GradeCategory> = get_required(params, "categories")?;
    let settings = load_grading(conn)?;

    let summary = calc::compute_class_summary(&students, &categories);
    let mut out = serde_json::to_value(&summary)
        .map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    if let Some(rows) = out.get_mut("perStudent").and_then(|v| v.as_array_mut()) {
        for (row, s) in rows.iter_mut().zip(&summary.per_student) {
            row["displayPercentage"] = json!(s.final_percentage.map(|p| display(&settings, p)));
        }
    }
    out["displayClassMean"] = json!(summary.class_mean.map(|p| display(&settings, p)));
    out["displayClassMedian"] = json!(summary.class_median.map(|p| display(&settings, p)));
    Ok(out)
}

fn categories_validate(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let categories: Vec<GradeCategory> = get_required(params, "categories")?;
    let report = calc::validate_categories(&categories);
    let valid = report.is_valid();
    let mut out =
        serde_json::to_value(&report).map_err(|e| HandlerErr::bad_params(e.to_string()))?;
    out["valid"] = json!(valid);
    Ok(out)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolicyOverride {
    penalty_percent: Option<f64>,
    interval: Option<String>,
    grace_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoreParams {
    category_id: serde_json::Value,
    points_earned: f64,
    max_points: f64,
}

fn resolve_policy(
    defaults: LatePolicy,
    overrides: Option<PolicyOverride>,
) -> Result<LatePolicy, HandlerErr> {
    let Some(o) = overrides else {
        return Ok(defaults);
    };
    let interval = match o.interval.as_deref() {
        None => defaults.interval,
        Some(raw) => LateInterval::parse(raw).ok_or_else(|| {
            HandlerErr::bad_params("policy.interval must be one of: hour, day, week")
        })?,
    };
    Ok(LatePolicy {
        penalty_percent: o.penalty_percent.unwrap_or(defaults.penalty_percent),
        interval,
        grace_minutes: o.grace_minutes.unwrap_or(defaults.grace_minutes),
    })
}

fn late_resolve(
    conn: Option<&Connection>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let due_at = late::parse_timestamp(&get_required_str(params, "dueAt")?)?;
    let submitted_at = late::parse_timestamp(&get_required_str(params, "submittedAt")?)?;
    let settings = load_grading(conn)?;
    let policy = resolve_policy(settings.late_policy, get_optional(params, "policy")?)?;

    let lateness = late::resolve_lateness(due_at, submitted_at, &policy);
    let mut out = json!({
        "isLate": lateness.is_late,
        "lateIntervalsElapsed": lateness.late_intervals_elapsed,
        "minutesLate": lateness.minutes_late,
        "policy": policy,
    });

    if let Some(score) = get_optional::<ScoreParams>(params, "score")? {
        let category_id = calc::category_id_from_value(&score.category_id).ok_or_else(|| {
            HandlerErr::bad_params("score.categoryId must be a string or integer")
        })?;
        let item = policy.graded_item(&lateness, category_id, score.points_earned, score.max_points);
        let finalized = calc::grade_submission(&item)?;
        out["item"] = json!(item);
        out["finalPoints"] = json!(finalized.final_points);
        out["percentage"] = json!(finalized.percentage);
        out["displayPercentage"] = json!(display(&settings, finalized.percentage));
    }
    Ok(out)
}

fn respond(req: &Request, result: Result<serde_json::Value, HandlerErr>) -> serde_json::Value {
    match result {
        Ok(value) => ok(&req.id, value),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let conn = state.db.as_ref();
    match req.method.as_str() {
        "grade.submission" => Some(respond(req, grade_submission(conn, &req.params))),
        "grade.letter" => Some(respond(req, grade_letter(&req.params))),
        "grade.course" => Some(respond(req, grade_course(conn, &req.params))),
        "grade.classSummary" => Some(respond(req, grade_class_summary(conn, &req.params))),
        "categories.validate" => Some(respond(req, categories_validate(&req.params))),
        "late.resolve" => Some(respond(req, late_resolve(conn, &req.params))),
        _ => None,
    }
}
