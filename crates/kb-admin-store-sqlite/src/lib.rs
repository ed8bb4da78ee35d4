use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use kb_admin_core::{
    merge_options, plan_distinct, plan_list, plan_lookup, total_pages, AdminError, Blocker,
    CategoryOption, ChatSession, DashboardStats, DocumentOption, DropdownOptions, EntityInput,
    FundOption, IntegrityViolation, ListPage, ListRequest, MutationOutcome, Record, Reference,
    SqlValue, SyncStatus, Table, TableCount, DATA_TYPE_DEFAULTS, FUND_STATUS_DEFAULTS,
    SEARCH_FOLD_FUNCTION,
};
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, warn};

mod schema;
mod sync;

pub use schema::{ForeignKeyViolation, IntegrityReport, SchemaStatus};
pub use sync::{MetadataSyncFlag, NoopSyncMarker, SyncMarker, SYNC_STATUS_KEY};

/// Sessions shown on the dashboard.
pub const RECENT_SESSION_LIMIT: usize = 50;

const RECENT_SESSIONS_SQL: &str = r"
SELECT l.session_id, recent.last_updated, l.id, l.user_message, l.bot_response, l.created_at
FROM chat_logs AS l
JOIN (
  SELECT session_id, MAX(created_at) AS last_updated
  FROM chat_logs
  GROUP BY session_id
  ORDER BY last_updated DESC, session_id ASC
  LIMIT ?1
) AS recent ON recent.session_id = l.session_id
ORDER BY recent.last_updated DESC, l.session_id ASC, l.created_at DESC, l.id DESC
";

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    sync: Arc<dyn SyncMarker>,
}

impl SqliteStore {
    /// Open a SQLite-backed knowledge base and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns [`AdminError::Connection`] when the database cannot be opened or pragmas cannot
    /// be applied.
    pub fn open(path: &Path) -> Result<Self, AdminError> {
        let conn = Connection::open(path).map_err(|err| {
            AdminError::Connection(format!(
                "failed to open sqlite database at {}: {err}",
                path.display()
            ))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|err| {
            AdminError::Connection(format!("failed to configure sqlite pragmas: {err}"))
        })?;

        conn.create_scalar_function(
            SEARCH_FOLD_FUNCTION,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            fold_search_text,
        )
        .map_err(|err| {
            AdminError::Connection(format!("failed to register {SEARCH_FOLD_FUNCTION}: {err}"))
        })?;

        Ok(Self { conn, sync: Arc::new(MetadataSyncFlag) })
    }

    /// Replace the collaborator that records pending chatbot syncs.
    #[must_use]
    pub fn with_sync_marker(mut self, sync: Arc<dyn SyncMarker>) -> Self {
        self.sync = sync;
        self
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        schema::status(&self.conn)
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// Databases created before migrations were tracked keep their rows; missing tables and
    /// indexes are added and version 1 is recorded.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        schema::migrate(&mut self.conn)
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        schema::integrity(&self.conn)
    }

    /// One page of a list view plus the matching row count.
    ///
    /// Both statements run in one read transaction so the count and the page agree.
    ///
    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] for unknown columns or a zero page size, and a
    /// storage or connection error when SQLite fails.
    pub fn list_page(&self, table: Table, request: &ListRequest) -> Result<ListPage, AdminError> {
        let plan = plan_list(table, request)?;
        debug!(
            table = %table,
            sql = %plan.page_sql,
            params = plan.params.len(),
            "planned list page"
        );

        let tx = self.conn.unchecked_transaction().map_err(storage_error)?;
        let count_params = params_from_iter(plan.params.iter().map(to_sql_value));
        let total_count = tx
            .query_row(&plan.count_sql, count_params, |row| row.get::<_, i64>(0))
            .map_err(storage_error)?;
        let rows = query_records(&tx, &plan.page_sql, &plan.page_params()).map_err(storage_error)?;
        tx.commit().map_err(storage_error)?;

        let total_count = u64::try_from(total_count).unwrap_or_default();
        Ok(ListPage {
            table,
            rows,
            page: plan.page,
            page_size: plan.page_size,
            total_pages: total_pages(total_count, plan.page_size),
            total_count,
        })
    }

    /// One denormalized row, joined display fields included.
    ///
    /// # Errors
    /// Returns [`AdminError::NotFound`] when no row has that key.
    pub fn get_record(&self, table: Table, id: i64) -> Result<Record, AdminError> {
        let plan = plan_lookup(table, id);
        query_records(&self.conn, &plan.sql, &plan.params)
            .map_err(storage_error)?
            .into_iter()
            .next()
            .ok_or(AdminError::NotFound { table, id })
    }

    /// Distinct non-null, non-empty values of a native column, ascending.
    ///
    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] when the column is not native to the table.
    pub fn distinct_values(
        &self,
        table: Table,
        column: &str,
    ) -> Result<Vec<serde_json::Value>, AdminError> {
        let sql = plan_distinct(table, column)?;
        query_all(&self.conn, &sql, [], |row| row.get_ref(0).map(json_value)).map_err(storage_error)
    }

    /// Stored fund statuses merged with `Y` and `N`.
    ///
    /// # Errors
    /// Returns a storage error when the distinct query fails.
    pub fn fund_status_options(&self) -> Result<Vec<String>, AdminError> {
        let stored = self.distinct_text(Table::Funds, "status")?;
        Ok(merge_options(&stored, FUND_STATUS_DEFAULTS))
    }

    /// Stored chunk data types merged with the built-in kinds.
    ///
    /// # Errors
    /// Returns a storage error when the distinct query fails.
    pub fn data_type_options(&self) -> Result<Vec<String>, AdminError> {
        let stored = self.distinct_text(Table::ManualChunks, "data_type")?;
        Ok(merge_options(&stored, DATA_TYPE_DEFAULTS))
    }

    fn distinct_text(&self, table: Table, column: &str) -> Result<Vec<String>, AdminError> {
        Ok(self
            .distinct_values(table, column)?
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            })
            .collect())
    }

    /// Category, document, and fund pickers for the chunk and story forms.
    ///
    /// # Errors
    /// Returns a storage error when any of the three queries fails.
    pub fn dropdown_options(&self) -> Result<DropdownOptions, AdminError> {
        let categories = query_all(
            &self.conn,
            "SELECT id, name FROM categories ORDER BY name ASC, id ASC",
            [],
            |row| Ok(CategoryOption { id: row.get(0)?, name: row.get(1)? }),
        )
        .map_err(storage_error)?;

        let documents = query_all(
            &self.conn,
            "SELECT id, title FROM documents ORDER BY title ASC, id ASC",
            [],
            |row| Ok(DocumentOption { id: row.get(0)?, title: row.get(1)? }),
        )
        .map_err(storage_error)?;

        let funds = query_all(
            &self.conn,
            "SELECT fund_id, fund_abbr, fund_name_th FROM research_funds ORDER BY fund_abbr ASC",
            [],
            |row| {
                Ok(FundOption {
                    fund_id: row.get(0)?,
                    fund_abbr: row.get(1)?,
                    fund_name_th: row.get(2)?,
                })
            },
        )
        .map_err(storage_error)?;

        Ok(DropdownOptions { categories, documents, funds })
    }

    /// Insert one entity and return its new primary key.
    ///
    /// # Errors
    /// Returns [`AdminError::Validation`] for bad input, [`AdminError::DanglingReference`] when
    /// a foreign key points nowhere, and [`AdminError::Conflict`] for a duplicate unique key.
    pub fn create(&mut self, input: &EntityInput) -> Result<i64, AdminError> {
        input.validate()?;
        let table = input.table();
        let (columns, values): (Vec<_>, Vec<_>) = input.assignments().into_iter().unzip();
        let slots = (1..=values.len()).map(|slot| format!("?{slot}")).collect::<Vec<_>>();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.storage_name(),
            columns.join(", "),
            slots.join(", "),
        );

        let (_, id) = self.apply_mutation(table, &sql, &values, None, Some(input))?;
        Ok(id)
    }

    /// Overwrite every editable column of one row.
    ///
    /// # Errors
    /// Same as [`SqliteStore::create`], plus [`AdminError::ReferentialIntegrity`] when a fund's
    /// `fund_abbr` changes while chunks still reference the old code.
    pub fn update(&mut self, id: i64, input: &EntityInput) -> Result<MutationOutcome, AdminError> {
        input.validate()?;
        let table = input.table();
        let descriptor = table.descriptor();
        let (columns, mut values): (Vec<_>, Vec<_>) = input.assignments().into_iter().unzip();
        let assignments = columns
            .iter()
            .enumerate()
            .map(|(index, column)| format!("{column} = ?{}", index + 1))
            .collect::<Vec<_>>();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?{}",
            descriptor.storage_name,
            assignments.join(", "),
            descriptor.primary_key,
            values.len() + 1,
        );
        values.push(SqlValue::Integer(id));

        let (affected, _) = self.apply_mutation(table, &sql, &values, Some(id), Some(input))?;
        Ok(outcome(affected))
    }

    /// Delete one row, refusing when other rows still reference it.
    ///
    /// # Errors
    /// Returns [`AdminError::ReferentialIntegrity`] carrying the blocking child ids when a
    /// foreign key prevents the delete.
    pub fn delete(&mut self, table: Table, id: i64) -> Result<MutationOutcome, AdminError> {
        let descriptor = table.descriptor();
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            descriptor.storage_name, descriptor.primary_key
        );
        let (affected, _) =
            self.apply_mutation(table, &sql, &[SqlValue::Integer(id)], Some(id), None)?;
        Ok(outcome(affected))
    }

    fn apply_mutation(
        &mut self,
        table: Table,
        sql: &str,
        values: &[SqlValue],
        id: Option<i64>,
        input: Option<&EntityInput>,
    ) -> Result<(usize, i64), AdminError> {
        debug!(table = %table, sql, "applying mutation");
        let tx = self.conn.transaction().map_err(storage_error)?;
        let affected = match tx.execute(sql, params_from_iter(values.iter().map(to_sql_value))) {
            Ok(affected) => affected,
            Err(err) => return Err(mutation_error(&tx, err, table, id, input)),
        };
        let last_id = tx.last_insert_rowid();

        if affected > 0 {
            self.sync.mark_pending_sync(&tx).map_err(storage_error)?;
        }
        tx.commit().map_err(storage_error)?;
        Ok((affected, last_id))
    }

    /// Current value of the pending-sync flag.
    ///
    /// # Errors
    /// Returns a storage error when `system_metadata` cannot be read.
    pub fn sync_status(&self) -> Result<SyncStatus, AdminError> {
        let row = self
            .conn
            .query_row(
                "SELECT pending_update, updated_at FROM system_metadata WHERE key = ?1",
                params![SYNC_STATUS_KEY],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)),
            )
            .optional()
            .map_err(storage_error)?;

        Ok(row.map_or(SyncStatus { pending_update: false, updated_at: None }, |(flag, updated_at)| {
            SyncStatus { pending_update: flag != 0, updated_at }
        }))
    }

    /// Row counts for the six entity tables, in [`Table::ALL`] order.
    ///
    /// # Errors
    /// Returns a storage error when a count query fails.
    pub fn table_counts(&self) -> Result<Vec<TableCount>, AdminError> {
        Table::ALL
            .iter()
            .map(|table| {
                let sql = format!("SELECT COUNT(*) FROM {}", table.storage_name());
                let rows = self
                    .conn
                    .query_row(&sql, [], |row| row.get::<_, i64>(0))
                    .map_err(storage_error)?;
                Ok(TableCount { table: *table, rows: u64::try_from(rows).unwrap_or_default() })
            })
            .collect()
    }

    /// Chat logs grouped by session, most recently active session first.
    ///
    /// # Errors
    /// Returns a storage error when `chat_logs` cannot be read.
    pub fn recent_chat_sessions(&self, limit: usize) -> Result<Vec<ChatSession>, AdminError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(RECENT_SESSIONS_SQL).map_err(storage_error)?;
        let mut rows = stmt.query(params![limit]).map_err(storage_error)?;

        let mut sessions: Vec<ChatSession> = Vec::new();
        while let Some(row) = rows.next().map_err(storage_error)? {
            let session_id: String = row.get(0).map_err(storage_error)?;
            let mut message = Record::new();
            let fields = ["id", "user_message", "bot_response", "created_at"];
            for (index, name) in fields.iter().enumerate() {
                let value = row.get_ref(index + 2).map_err(storage_error)?;
                message.insert((*name).to_string(), json_value(value));
            }

            match sessions.last_mut() {
                Some(session) if session.session_id == session_id => session.messages.push(message),
                _ => sessions.push(ChatSession {
                    session_id,
                    last_updated: row.get(1).map_err(storage_error)?,
                    messages: vec![message],
                }),
            }
        }
        Ok(sessions)
    }

    /// Counts, the sync flag, and the latest chat sessions.
    ///
    /// # Errors
    /// Returns a storage error when any dashboard query fails.
    pub fn dashboard_stats(&self) -> Result<DashboardStats, AdminError> {
        Ok(DashboardStats {
            counts: self.table_counts()?,
            sync: self.sync_status()?,
            recent_sessions: self.recent_chat_sessions(RECENT_SESSION_LIMIT)?,
        })
    }

    /// Append one chat exchange. The chatbot owns this table; the back office only reads it.
    ///
    /// # Errors
    /// Returns a storage error when the insert fails.
    pub fn append_chat_log(
        &self,
        session_id: &str,
        user_message: &str,
        bot_response: &str,
        created_at: &str,
    ) -> Result<i64, AdminError> {
        self.conn
            .execute(
                "INSERT INTO chat_logs(session_id, user_message, bot_response, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, user_message, bot_response, created_at],
            )
            .map_err(storage_error)?;
        Ok(self.conn.last_insert_rowid())
    }
}

fn outcome(affected: usize) -> MutationOutcome {
    if affected == 0 {
        MutationOutcome::NotFound
    } else {
        MutationOutcome::Applied
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConstraintKind {
    ForeignKey,
    Unique,
    Rejected,
    Other,
}

fn constraint_kind(err: &rusqlite::Error) -> Option<ConstraintKind> {
    let rusqlite::Error::SqliteFailure(failure, _) = err else {
        return None;
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return None;
    }
    Some(match failure.extended_code {
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ConstraintKind::ForeignKey,
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ConstraintKind::Unique,
        ffi::SQLITE_CONSTRAINT_NOTNULL | ffi::SQLITE_CONSTRAINT_CHECK => ConstraintKind::Rejected,
        _ => ConstraintKind::Other,
    })
}

fn storage_error(err: rusqlite::Error) -> AdminError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if matches!(
            failure.code,
            ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
                | ErrorCode::PermissionDenied
                | ErrorCode::DatabaseBusy
        ) {
            return AdminError::Connection(err.to_string());
        }
    }
    AdminError::Storage(err.to_string())
}

/// Translate a failed mutation into the typed error callers act on.
///
/// Foreign-key failures are resolved with read-only lookups on the still-open transaction:
/// first a missing parent for the input's own keys, then children blocking the target row.
fn mutation_error(
    conn: &Connection,
    err: rusqlite::Error,
    table: Table,
    id: Option<i64>,
    input: Option<&EntityInput>,
) -> AdminError {
    match constraint_kind(&err) {
        Some(ConstraintKind::ForeignKey) => {
            if let Some(input) = input {
                match dangling_reference(conn, input) {
                    Ok(Some(dangling)) => {
                        warn!(table = %table, error = %dangling, "rejected dangling reference");
                        return dangling;
                    }
                    Ok(None) => {}
                    Err(lookup) => return storage_error(lookup),
                }
            }
            if let Some(id) = id {
                match blockers_for(conn, table, id) {
                    Ok(blockers) if !blockers.is_empty() => {
                        let violation = IntegrityViolation { table, id, blockers };
                        warn!(
                            table = %table,
                            id,
                            blockers = %violation,
                            "mutation blocked by references"
                        );
                        return AdminError::ReferentialIntegrity(violation);
                    }
                    Ok(_) => {}
                    Err(lookup) => return storage_error(lookup),
                }
            }
            AdminError::Storage(format!("foreign key constraint failed on {table}: {err}"))
        }
        Some(ConstraintKind::Unique) => {
            AdminError::Conflict(format!("duplicate key in {table}: {err}"))
        }
        Some(ConstraintKind::Rejected) => {
            AdminError::Validation(format!("{table} row rejected: {err}"))
        }
        Some(ConstraintKind::Other) | None => storage_error(err),
    }
}

fn dangling_reference(
    conn: &Connection,
    input: &EntityInput,
) -> rusqlite::Result<Option<AdminError>> {
    for (reference, value) in input.foreign_keys() {
        if !parent_exists(conn, reference, &value)? {
            return Ok(Some(AdminError::DanglingReference {
                table: input.table(),
                column: reference.column.to_string(),
                parent: reference.parent,
                value: value.to_string(),
            }));
        }
    }
    Ok(None)
}

fn parent_exists(
    conn: &Connection,
    reference: &Reference,
    value: &SqlValue,
) -> rusqlite::Result<bool> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
        reference.parent.storage_name(),
        reference.parent_column,
    );
    conn.query_row(&sql, [to_sql_value(value)], |row| row.get::<_, bool>(0))
}

/// Child ids referencing `table`'s row `id`, per dependent in relationship-map order.
/// Dependents with no referencing rows are omitted.
fn blockers_for(conn: &Connection, table: Table, id: i64) -> rusqlite::Result<Vec<Blocker>> {
    let parent = table.descriptor();
    let mut blockers = Vec::new();
    for reference in table.dependents() {
        let child = reference.child.descriptor();
        let sql = format!(
            "SELECT {child_pk} FROM {child_table} WHERE {column} IN \
             (SELECT {parent_column} FROM {parent_table} WHERE {parent_pk} = ?1) \
             ORDER BY {child_pk} ASC",
            child_pk = child.primary_key,
            child_table = child.storage_name,
            column = reference.column,
            parent_column = reference.parent_column,
            parent_table = parent.storage_name,
            parent_pk = parent.primary_key,
        );
        let ids = query_all(conn, &sql, params![id], |row| row.get::<_, i64>(0))?;
        if !ids.is_empty() {
            let column = reference.column.to_string();
            blockers.push(Blocker { table: reference.child, column, ids });
        }
    }
    Ok(blockers)
}

/// Unicode lowercase of any scalar, NULL-preserving. Backs the search predicate.
fn fold_search_text(ctx: &Context<'_>) -> rusqlite::Result<Option<String>> {
    Ok(match ctx.get_raw(0) {
        ValueRef::Null => None,
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).to_lowercase())
        }
    })
}

fn query_all<T, P, F>(conn: &Connection, sql: &str, params: P, map: F) -> rusqlite::Result<Vec<T>>
where
    P: rusqlite::Params,
    F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, map)?;
    rows.collect()
}

fn query_records(
    conn: &Connection,
    sql: &str,
    values: &[SqlValue],
) -> rusqlite::Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_names().into_iter().map(str::to_string).collect::<Vec<_>>();
    let mut rows = stmt.query(params_from_iter(values.iter().map(to_sql_value)))?;

    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (index, name) in columns.iter().enumerate() {
            record.insert(name.clone(), json_value(row.get_ref(index)?));
        }
        records.push(record);
    }
    Ok(records)
}

fn to_sql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => Value::Integer(*value),
        SqlValue::Real(value) => Value::Real(*value),
        SqlValue::Text(value) => Value::Text(value.clone()),
    }
}

/// Column value as JSON. Blobs are hex encoded.
fn json_value(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(value) => serde_json::Value::from(value),
        ValueRef::Real(value) => serde_json::Number::from_f64(value)
            .map_or(serde_json::Value::Null, serde_json::Value::Number),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(hex::encode(bytes)),
    }
}
