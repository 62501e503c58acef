use crate::attendance::{self, AttendanceStatus};
use crate::calc;
use crate::ipc::error::ok;
use crate::ipc::helpers::{get_required, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::setup;
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct AttendanceRecord {
    status: String,
}

fn category_id_param(params: &serde_json::Value) -> Result<String, HandlerErr> {
    params
        .get("categoryId")
        .and_then(calc::category_id_from_value)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| HandlerErr::bad_params("categoryId must be a non-empty string or integer"))
}

fn attendance_to_items(
    conn: Option<&Connection>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let category_id = category_id_param(params)?;
    let records: Vec<AttendanceRecord> = get_required(params, "records")?;
    let policy =
        setup::attendance_policy(conn).map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let mut statuses: Vec<AttendanceStatus> = Vec::with_capacity(records.len());
    for (idx, r) in records.iter().enumerate() {
        let Some(status) = AttendanceStatus::parse(&r.status, &policy.codes) else {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("unknown attendance status: {}", r.status),
                details: Some(json!({ "index": idx })),
            });
        };
        statuses.push(status);
    }

    let items = attendance::attendance_items(&statuses, &category_id, &policy);
    let excused = statuses
        .iter()
        .filter(|s| **s == AttendanceStatus::Excused)
        .count();
    Ok(json!({
        "items": items,
        "sessionCount": statuses.len(),
        "excusedCount": excused,
    }))
}

fn handle_attendance_to_items(state: &mut AppState, req: &Request) -> serde_json::Value {
    match attendance_to_items(state.db.as_ref(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.toItems" => Some(handle_attendance_to_items(state, req)),
        _ => None,
    }
}
