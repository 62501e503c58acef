//! Grade computation for the course dashboards: late-penalized submission
//! scores, letter bands, and weighted course grades, plus the JSON-lines
//! sidecar that exposes them to the UI process.

pub mod attendance;
pub mod calc;
pub mod db;
pub mod ipc;
pub mod late;
pub mod setup;
