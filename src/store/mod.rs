//! Project metadata database: scenarios, the current-scenario selector,
//! execution attempts, artifacts, and comparison history.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    controller::classify::ErrorKind,
    history::{ArtifactKind, ComparisonRecord, ExecutionAttempt, GeneratedArtifact},
    sandbox::ExitStatus,
    scenario::Scenario,
};

const SCHEMA_SQL: &str = include_str!("schema.sql");
const METADATA_FILE: &str = "workbench.db";
const CURRENT_SCENARIO_KEY: &str = "current_scenario_id";

const SCENARIO_COLUMNS: &str =
    "id, name, created_at, modified_at, snapshot_path, parent_scenario_id, is_root, description";

#[derive(Debug)]
pub struct ProjectDb {
    conn: Mutex<Connection>,
    root: PathBuf,
}

impl ProjectDb {
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("creating project directory {}", root.display()))?;
        let db_path = root.join(METADATA_FILE);
        let conn = Connection::open(&db_path)
            .with_context(|| format!("opening metadata database {}", db_path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("initializing metadata schema")?;
        Ok(Self { conn: Mutex::new(conn), root: root.to_path_buf() })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("metadata database lock poisoned"))
    }

    // ---- scenarios ----

    pub fn insert_scenario(&self, scenario: &Scenario) -> Result<()> {
        let relative = self.relative_snapshot_path(&scenario.snapshot_path);
        self.conn()?.execute(
            "INSERT INTO scenarios (id, name, created_at, modified_at, snapshot_path, parent_scenario_id, is_root, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                scenario.id,
                scenario.name,
                format_time(&scenario.created_at),
                format_time(&scenario.modified_at),
                relative,
                scenario.parent_scenario_id,
                scenario.is_root,
                scenario.description,
            ],
        )?;
        Ok(())
    }

    pub fn get_scenario(&self, id: &str) -> Result<Option<Scenario>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE id = ?1");
        let found = conn
            .query_row(&sql, params![id], |row| self.parse_scenario_row(row))
            .optional()?;
        Ok(found)
    }

    pub fn find_scenario_by_name(&self, name: &str) -> Result<Option<Scenario>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE name = ?1");
        let found = conn
            .query_row(&sql, params![name], |row| self.parse_scenario_row(row))
            .optional()?;
        Ok(found)
    }

    /// All scenarios, earliest created first.
    pub fn list_scenarios(&self) -> Result<Vec<Scenario>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SCENARIO_COLUMNS} FROM scenarios ORDER BY created_at ASC, rowid ASC");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| self.parse_scenario_row(row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn root_scenario(&self) -> Result<Option<Scenario>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {SCENARIO_COLUMNS} FROM scenarios WHERE is_root = 1");
        let found = conn
            .query_row(&sql, [], |row| self.parse_scenario_row(row))
            .optional()?;
        Ok(found)
    }

    pub fn touch_scenario(&self, id: &str, at: &DateTime<Utc>) -> Result<()> {
        self.conn()?.execute(
            "UPDATE scenarios SET modified_at = ?2 WHERE id = ?1",
            params![id, format_time(at)],
        )?;
        Ok(())
    }

    pub fn set_scenario_description(&self, id: &str, description: Option<&str>) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE scenarios SET description = ?2 WHERE id = ?1",
            params![id, description],
        )?;
        Ok(changed > 0)
    }

    /// Removes a scenario with its attempts and artifacts, re-parents its
    /// children onto its own parent, and re-points the current selector to the
    /// earliest-created survivor when it pointed at the removed scenario.
    /// Returns false when no such scenario exists.
    pub fn delete_scenario(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let parent: Option<Option<String>> = tx
            .query_row(
                "SELECT parent_scenario_id FROM scenarios WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(parent) = parent else {
            return Ok(false);
        };

        tx.execute("DELETE FROM execution_attempts WHERE scenario_id = ?1", params![id])?;
        tx.execute("DELETE FROM artifacts WHERE scenario_id = ?1", params![id])?;
        tx.execute(
            "UPDATE scenarios SET parent_scenario_id = ?2 WHERE parent_scenario_id = ?1",
            params![id, parent],
        )?;
        tx.execute("DELETE FROM scenarios WHERE id = ?1", params![id])?;

        let current: Option<String> = tx
            .query_row(
                "SELECT value FROM project_state WHERE key = ?1",
                params![CURRENT_SCENARIO_KEY],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        if current.as_deref() == Some(id) {
            let fallback: Option<String> = tx
                .query_row(
                    "SELECT id FROM scenarios ORDER BY created_at ASC, rowid ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;
            write_state(&tx, CURRENT_SCENARIO_KEY, fallback.as_deref())?;
        }

        tx.commit()?;
        Ok(true)
    }

    pub fn current_scenario_id(&self) -> Result<Option<String>> {
        let conn = self.conn()?;
        let value: Option<Option<String>> = conn
            .query_row(
                "SELECT value FROM project_state WHERE key = ?1",
                params![CURRENT_SCENARIO_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set_current_scenario_id(&self, id: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        write_state(&conn, CURRENT_SCENARIO_KEY, id)?;
        Ok(())
    }

    fn relative_snapshot_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    fn parse_scenario_row(&self, row: &rusqlite::Row<'_>) -> rusqlite::Result<Scenario> {
        let stored_path: String = row.get(4)?;
        Ok(Scenario {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: parse_time(&row.get::<_, String>(2)?)?,
            modified_at: parse_time(&row.get::<_, String>(3)?)?,
            snapshot_path: self.root.join(stored_path),
            parent_scenario_id: row.get(5)?,
            is_root: row.get(6)?,
            description: row.get(7)?,
        })
    }

    // ---- execution attempts ----

    pub fn append_attempt(&self, attempt: &ExecutionAttempt) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO execution_attempts
                (run_id, scenario_id, script_identity, source_digest, attempt_number, stdout, stderr, exit_status, error_kind, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                attempt.run_id,
                attempt.scenario_id,
                attempt.script_identity,
                attempt.source_digest,
                attempt.attempt_number,
                attempt.stdout,
                attempt.stderr,
                attempt.exit_status.to_string(),
                attempt.error_kind.as_ref().map(|k| k.to_string()),
                format_time(&attempt.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Attempts recorded for a scenario, newest first.
    pub fn list_attempts(&self, scenario_id: &str, limit: usize) -> Result<Vec<ExecutionAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, scenario_id, script_identity, source_digest, attempt_number, stdout, stderr, exit_status, error_kind, timestamp
             FROM execution_attempts
             WHERE scenario_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![scenario_id, limit], parse_attempt_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Attempts of one run in execution order.
    pub fn attempts_for_run(&self, run_id: &str) -> Result<Vec<ExecutionAttempt>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT run_id, scenario_id, script_identity, source_digest, attempt_number, stdout, stderr, exit_status, error_kind, timestamp
             FROM execution_attempts
             WHERE run_id = ?1
             ORDER BY attempt_number ASC",
        )?;
        let rows = stmt.query_map(params![run_id], parse_attempt_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- artifacts ----

    /// Records an artifact; an existing (scenario, filename) identity is
    /// overwritten in place.
    pub fn upsert_artifact(&self, artifact: &GeneratedArtifact) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO artifacts (scenario_id, filename, kind, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (scenario_id, filename) DO UPDATE SET kind = excluded.kind, created_at = excluded.created_at",
            params![
                artifact.scenario_id,
                artifact.filename,
                artifact.kind.as_str(),
                format_time(&artifact.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_artifacts(&self, scenario_id: &str) -> Result<Vec<GeneratedArtifact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scenario_id, filename, kind, created_at FROM artifacts
             WHERE scenario_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![scenario_id], |row| {
            let kind: String = row.get(2)?;
            Ok(GeneratedArtifact {
                scenario_id: row.get(0)?,
                filename: row.get(1)?,
                kind: ArtifactKind::parse(&kind).ok_or_else(|| conversion_error(2, &kind))?,
                created_at: parse_time(&row.get::<_, String>(3)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ---- comparisons ----

    pub fn insert_comparison(&self, record: &ComparisonRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO comparisons
                (comparison_name, scenario_ids, scenario_names, comparison_kind, output_path, description, created_by_scenario_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.comparison_name,
                serde_json::to_string(&record.scenario_ids)?,
                serde_json::to_string(&record.scenario_names)?,
                record.comparison_kind,
                record.output_path.as_ref().map(|p| p.to_string_lossy().into_owned()),
                record.description,
                record.created_by_scenario_id,
                format_time(&record.created_at),
            ],
        )?;
        Ok(())
    }

    /// Comparison history, newest first.
    pub fn list_comparisons(&self, limit: usize) -> Result<Vec<ComparisonRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT comparison_name, scenario_ids, scenario_names, comparison_kind, output_path, description, created_by_scenario_id, created_at
             FROM comparisons ORDER BY id DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            let ids: String = row.get(1)?;
            let names: String = row.get(2)?;
            Ok(ComparisonRecord {
                comparison_name: row.get(0)?,
                scenario_ids: serde_json::from_str(&ids).map_err(|_| conversion_error(1, &ids))?,
                scenario_names: serde_json::from_str(&names).map_err(|_| conversion_error(2, &names))?,
                comparison_kind: row.get(3)?,
                output_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
                description: row.get(5)?,
                created_by_scenario_id: row.get(6)?,
                created_at: parse_time(&row.get::<_, String>(7)?)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn write_state(conn: &Connection, key: &str, value: Option<&str>) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO project_state (key, value) VALUES (?1, ?2)
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )
}

fn parse_attempt_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionAttempt> {
    let exit_raw: String = row.get(7)?;
    let attempt_number: i64 = row.get(4)?;
    Ok(ExecutionAttempt {
        run_id: row.get(0)?,
        scenario_id: row.get(1)?,
        script_identity: row.get(2)?,
        source_digest: row.get(3)?,
        attempt_number: u32::try_from(attempt_number)
            .map_err(|_| conversion_error(4, &attempt_number.to_string()))?,
        stdout: row.get(5)?,
        stderr: row.get(6)?,
        exit_status: ExitStatus::parse(&exit_raw).ok_or_else(|| conversion_error(7, &exit_raw))?,
        error_kind: row.get::<_, Option<String>>(8)?.map(|k| ErrorKind::parse(&k)),
        timestamp: parse_time(&row.get::<_, String>(9)?)?,
    })
}

pub(crate) fn format_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn conversion_error(column: usize, raw: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("unrecognized value '{raw}'").into(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario(db: &ProjectDb, id: &str, name: &str, root: bool, parent: Option<&str>) -> Scenario {
        let now = Utc::now();
        Scenario {
            id: id.into(),
            name: name.into(),
            created_at: now,
            modified_at: now,
            snapshot_path: db.root().join("scenarios").join(id).join("data.db"),
            parent_scenario_id: parent.map(str::to_string),
            is_root: root,
            description: None,
        }
    }

    #[test]
    fn scenario_rows_round_trip_with_absolute_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ProjectDb::open(dir.path()).expect("open");
        let base = scenario(&db, "a1", "Base", true, None);
        db.insert_scenario(&base).expect("insert");

        let loaded = db.get_scenario("a1").expect("get").expect("exists");
        assert_eq!(loaded, base);
        assert!(loaded.snapshot_path.starts_with(dir.path()));
        assert_eq!(db.find_scenario_by_name("Base").expect("find").map(|s| s.id), Some("a1".into()));
    }

    #[test]
    fn second_root_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ProjectDb::open(dir.path()).expect("open");
        db.insert_scenario(&scenario(&db, "a1", "Base", true, None)).expect("insert");
        assert!(db.insert_scenario(&scenario(&db, "b2", "Other", true, None)).is_err());
    }

    #[test]
    fn deleting_current_falls_back_to_earliest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ProjectDb::open(dir.path()).expect("open");
        db.insert_scenario(&scenario(&db, "a1", "Base", true, None)).expect("insert");
        db.insert_scenario(&scenario(&db, "b2", "High", false, Some("a1"))).expect("insert");
        db.insert_scenario(&scenario(&db, "c3", "Higher", false, Some("b2"))).expect("insert");
        db.set_current_scenario_id(Some("b2")).expect("set");

        assert!(db.delete_scenario("b2").expect("delete"));
        assert_eq!(db.current_scenario_id().expect("current").as_deref(), Some("a1"));
        let child = db.get_scenario("c3").expect("get").expect("exists");
        assert_eq!(child.parent_scenario_id.as_deref(), Some("a1"));
        assert!(!db.delete_scenario("b2").expect("second delete"));
    }

    #[test]
    fn corrupt_comparison_lists_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = ProjectDb::open(dir.path()).expect("open");
        let record = ComparisonRecord {
            comparison_name: "demand".into(),
            scenario_ids: vec!["a1".into(), "b2".into()],
            scenario_names: vec!["Base".into(), "High".into()],
            comparison_kind: "table".into(),
            output_path: None,
            description: None,
            created_by_scenario_id: None,
            created_at: Utc::now(),
        };
        db.insert_comparison(&record).expect("insert");
        assert_eq!(db.list_comparisons(5).expect("list"), vec![record]);

        db.conn()
            .expect("conn")
            .execute("UPDATE comparisons SET scenario_names = 'Base,High'", [])
            .expect("corrupt");
        assert!(db.list_comparisons(5).is_err());
    }
}
