use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "gradecalc.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;

    Ok(conn)
}

/// Raw stored text for `key`. Parsing is left to the caller so a corrupt
/// value can be told apart from a failed query.
pub fn settings_get_text(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(raw)
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO settings(key, value_json, updated_at)
         VALUES(?, ?, ?)
         ON CONFLICT(key) DO UPDATE SET
           value_json = excluded.value_json,
           updated_at = excluded.updated_at",
        (key, &text, &now),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn settings_roundtrip_and_overwrite() {
        let workspace = temp_dir("gradecalc-db-settings");
        let conn = open_db(&workspace).expect("open db");
        assert_eq!(settings_get_text(&conn, "setup.grading").expect("get"), None);

        settings_set_json(&conn, "setup.grading", &json!({ "displayDecimals": 2 })).expect("set");
        settings_set_json(&conn, "setup.grading", &json!({ "displayDecimals": 0 })).expect("set");
        assert_eq!(
            settings_get_text(&conn, "setup.grading").expect("get").as_deref(),
            Some("{\"displayDecimals\":0}")
        );

        let updated_at: Option<String> = conn
            .query_row(
                "SELECT updated_at FROM settings WHERE key = 'setup.grading'",
                [],
                |r| r.get(0),
            )
            .expect("updated_at");
        assert!(updated_at.is_some());
    }

    #[test]
    fn corrupt_text_is_returned_verbatim() {
        let workspace = temp_dir("gradecalc-db-corrupt");
        let conn = open_db(&workspace).expect("open db");
        conn.execute(
            "INSERT INTO settings(key, value_json) VALUES('setup.grading', '{not json')",
            [],
        )
        .expect("seed");
        assert_eq!(
            settings_get_text(&conn, "setup.grading").expect("get").as_deref(),
            Some("{not json")
        );
    }
}
