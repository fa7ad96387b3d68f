//! Snapshot files: verified copies, empty initialization, schema inspection.

use std::{
    fs,
    io::{self, Write},
    path::Path,
};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

pub const SNAPSHOT_FILE: &str = "data.db";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub row_count: i64,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// Copies `src` over `dst` through a staged file in `dst`'s directory. The
/// destination is replaced only after the staged copy's size matches the
/// source. Returns the verified size.
pub fn copy_verified(src: &Path, dst: &Path) -> Result<u64> {
    let expected = fs::metadata(src)
        .with_context(|| format!("reading source snapshot {}", src.display()))?
        .len();
    let dir = dst
        .parent()
        .with_context(|| format!("snapshot path {} has no parent directory", dst.display()))?;
    fs::create_dir_all(dir)?;

    let mut staged = NamedTempFile::new_in(dir)?;
    let mut reader = fs::File::open(src)?;
    io::copy(&mut reader, staged.as_file_mut())?;
    staged.as_file_mut().flush()?;
    staged.as_file().sync_all()?;

    let staged_len = staged.as_file().metadata()?.len();
    if staged_len != expected {
        bail!(
            "snapshot copy of {} is incomplete: {} of {} bytes",
            src.display(),
            staged_len,
            expected
        );
    }
    staged
        .persist(dst)
        .map_err(|err| err.error)
        .with_context(|| format!("installing snapshot {}", dst.display()))?;

    let installed = fs::metadata(dst)?.len();
    if installed != expected {
        bail!(
            "installed snapshot {} has {} bytes, expected {}",
            dst.display(),
            installed,
            expected
        );
    }
    debug!(src = %src.display(), dst = %dst.display(), bytes = expected, "snapshot copied");
    Ok(expected)
}

/// Replaces whatever is at `path` with an empty, schema-less database.
pub fn init_empty(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err).with_context(|| format!("removing {}", path.display())),
    }
    let conn = Connection::open(path)
        .with_context(|| format!("creating empty snapshot {}", path.display()))?;
    conn.execute_batch("PRAGMA user_version = 0;")?;
    Ok(())
}

pub fn open_read_only(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        bail!("snapshot file {} does not exist", path.display());
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("opening snapshot {}", path.display()))?;
    Ok(conn)
}

pub fn open_read_write(path: &Path) -> Result<Connection> {
    if !path.is_file() {
        bail!("snapshot file {} does not exist", path.display());
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("opening snapshot {}", path.display()))?;
    Ok(conn)
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Columns of `table` in declaration order, or `None` when it does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<ColumnInfo>>> {
    if !table_names(conn)?.iter().any(|t| t == table) {
        return Ok(None);
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(Some(columns))
}

pub fn inspect(conn: &Connection) -> Result<Vec<TableSchema>> {
    let mut tables = Vec::new();
    for name in table_names(conn)? {
        let columns = table_columns(conn, &name)?.unwrap_or_default();
        let row_count = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(&name)),
            [],
            |row| row.get(0),
        )?;
        tables.push(TableSchema { name, columns, row_count });
    }
    Ok(tables)
}

/// Text form of a schema for the script generator's prompt.
pub fn summarize(tables: &[TableSchema]) -> String {
    if tables.is_empty() {
        return "(empty dataset: no tables)".to_string();
    }
    tables
        .iter()
        .map(|t| {
            let cols = t
                .columns
                .iter()
                .map(|c| {
                    if c.decl_type.is_empty() {
                        c.name.clone()
                    } else {
                        format!("{} {}", c.name, c.decl_type)
                    }
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}({}) -- {} rows", t.name, cols, t.row_count)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
