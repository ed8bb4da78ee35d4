//! Versioned schema for the knowledge base plus the health probes the `db` commands report.

use anyhow::{bail, Context, Result};
use kb_admin_core::Table;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

const LEDGER_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS research_funds (
  fund_id INTEGER PRIMARY KEY AUTOINCREMENT,
  fund_abbr TEXT NOT NULL UNIQUE CHECK (fund_abbr <> ''),
  fund_name_th TEXT NOT NULL,
  fund_name_en TEXT,
  fiscal_year INTEGER,
  source_agency TEXT,
  start_period TEXT,
  end_period TEXT,
  status TEXT
);

CREATE TABLE IF NOT EXISTS glossary_terms (
  word_id INTEGER PRIMARY KEY AUTOINCREMENT,
  word TEXT NOT NULL,
  meaning TEXT NOT NULL,
  word_type TEXT
);

CREATE TABLE IF NOT EXISTS documents (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  title TEXT NOT NULL,
  version TEXT,
  last_updated TEXT
);

CREATE TABLE IF NOT EXISTS categories (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  main_group TEXT,
  description TEXT
);

CREATE TABLE IF NOT EXISTS manual_chunks (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  doc_id INTEGER,
  category_id INTEGER,
  topic TEXT NOT NULL,
  section TEXT,
  step_number INTEGER,
  content TEXT NOT NULL,
  data_type TEXT,
  fund_abbr TEXT CHECK (fund_abbr IS NULL OR fund_abbr <> ''),
  FOREIGN KEY (doc_id) REFERENCES documents(id),
  FOREIGN KEY (category_id) REFERENCES categories(id),
  FOREIGN KEY (fund_abbr) REFERENCES research_funds(fund_abbr)
);

CREATE TABLE IF NOT EXISTS support_stories (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  category_id INTEGER,
  scenario TEXT NOT NULL,
  solution TEXT NOT NULL,
  FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS system_metadata (
  key TEXT PRIMARY KEY,
  pending_update INTEGER NOT NULL DEFAULT 0 CHECK (pending_update IN (0, 1)),
  updated_at TEXT
);

INSERT OR IGNORE INTO system_metadata(key, pending_update, updated_at)
VALUES ('bot_sync_status', 0, NULL);

CREATE TABLE IF NOT EXISTS chat_logs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id TEXT NOT NULL,
  user_message TEXT,
  bot_response TEXT,
  created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_manual_chunks_doc_id ON manual_chunks(doc_id);
CREATE INDEX IF NOT EXISTS idx_manual_chunks_category_id ON manual_chunks(category_id);
CREATE INDEX IF NOT EXISTS idx_manual_chunks_fund_abbr ON manual_chunks(fund_abbr);
CREATE INDEX IF NOT EXISTS idx_support_stories_category_id ON support_stories(category_id);
CREATE INDEX IF NOT EXISTS idx_chat_logs_session ON chat_logs(session_id, created_at);
";

struct Migration {
    version: i64,
    sql: &'static str,
}

/// Forward-only, applied in order. Each step must be idempotent against legacy databases.
const MIGRATIONS: &[Migration] = &[Migration { version: 1, sql: MIGRATION_001_SQL }];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    /// Tables exist but no migration was ever recorded.
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: Option<i64>,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

fn target_version() -> i64 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

pub(crate) fn status(conn: &Connection) -> Result<SchemaStatus> {
    conn.execute_batch(LEDGER_SQL).context("failed to create schema_migrations")?;
    let recorded = recorded_version(conn)?;
    let inferred_from_legacy = recorded == 0 && has_untracked_tables(conn)?;
    Ok(SchemaStatus {
        current_version: recorded,
        target_version: target_version(),
        pending_versions: MIGRATIONS
            .iter()
            .map(|migration| migration.version)
            .filter(|version| *version > recorded)
            .collect(),
        inferred_from_legacy,
    })
}

/// Apply every migration newer than the recorded version, one transaction each.
pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(LEDGER_SQL).context("failed to create schema_migrations")?;
    let recorded = recorded_version(conn)?;
    for migration in MIGRATIONS.iter().filter(|migration| migration.version > recorded) {
        let version = migration.version;
        let tx = conn
            .transaction()
            .with_context(|| format!("failed to start migration v{version}"))?;
        tx.execute_batch(migration.sql)
            .with_context(|| format!("failed to apply migration v{version}"))?;
        let applied_at = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .context("failed to format migration timestamp")?;
        tx.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            params![version, applied_at],
        )
        .with_context(|| format!("failed to record migration v{version}"))?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
    }

    let recorded = recorded_version(conn)?;
    if recorded != target_version() {
        bail!("unsupported schema version {recorded}; expected {}", target_version());
    }
    Ok(())
}

pub(crate) fn integrity(conn: &Connection) -> Result<IntegrityReport> {
    let quick_check_message: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .context("PRAGMA quick_check failed")?;

    let mut stmt = conn.prepare("PRAGMA foreign_key_check").context("PRAGMA foreign_key_check")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })
        .context("PRAGMA foreign_key_check")?;
    let foreign_key_violations = rows
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to read foreign key violations")?;

    Ok(IntegrityReport {
        quick_check_ok: quick_check_message == "ok",
        quick_check_message,
        foreign_key_violations,
        schema_status: status(conn)?,
    })
}

fn recorded_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get(0)
    })
    .context("failed to read recorded schema version")
}

/// Any entity table present without a recorded migration marks a pre-ledger database.
fn has_untracked_tables(conn: &Connection) -> Result<bool> {
    let slots = (1..=Table::ALL.len()).map(|slot| format!("?{slot}")).collect::<Vec<_>>();
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name IN ({}))",
        slots.join(", ")
    );
    let names = Table::ALL.iter().map(|table| table.storage_name());
    conn.query_row(&sql, params_from_iter(names), |row| row.get(0))
        .context("failed to inspect sqlite_master for legacy tables")
}
