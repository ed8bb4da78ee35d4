use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use kb_admin_core::{
    AdminError, DashboardStats, DropdownOptions, EntityInput, ListPage, ListRequest,
    MutationOutcome, Record, SyncStatus, Table,
};
use kb_admin_store_sqlite::{
    IntegrityReport, MetadataSyncFlag, SchemaStatus, SqliteStore, SyncMarker,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateResult {
    pub table: Table,
    pub id: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MutationResult {
    pub table: Table,
    pub id: i64,
    pub outcome: MutationOutcome,
}

/// Connection-per-call facade over the knowledge-base store.
///
/// Every call opens the database, brings the schema up to date, does its work, and drops the
/// connection before returning.
#[derive(Debug, Clone)]
pub struct KbAdminApi {
    db_path: PathBuf,
    sync: Arc<dyn SyncMarker>,
}

impl KbAdminApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, sync: Arc::new(MetadataSyncFlag) }
    }

    #[must_use]
    pub fn with_sync_marker(mut self, sync: Arc<dyn SyncMarker>) -> Self {
        self.sync = sync;
        self
    }

    fn open_store(&self) -> Result<SqliteStore, AdminError> {
        let mut store = SqliteStore::open(&self.db_path)?.with_sync_marker(Arc::clone(&self.sync));
        store.migrate().map_err(|err| AdminError::Storage(format!("{err:#}")))?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        info!(from = before.current_version, to = after.current_version, "schema migrated");
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when the database cannot be opened or a probe fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = SqliteStore::open(&self.db_path)?;
        store.integrity_check()
    }

    /// One page of a list view. Page numbers below 1 are treated as 1.
    ///
    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] for unknown columns, and connection or storage
    /// errors from SQLite.
    pub fn list_page(
        &self,
        table: Table,
        mut request: ListRequest,
    ) -> Result<ListPage, AdminError> {
        request.page = request.page.max(1);
        self.open_store()?.list_page(table, &request)
    }

    /// The list view as the back office renders it: the table's default search columns and
    /// its dropdown filter column.
    ///
    /// # Errors
    /// Same as [`KbAdminApi::list_page`].
    pub fn list_view(
        &self,
        table: Table,
        page: u32,
        page_size: u32,
        search_term: Option<&str>,
        filter_value: Option<&str>,
    ) -> Result<ListPage, AdminError> {
        let descriptor = table.descriptor();
        let mut request = ListRequest::default().page(page).page_size(page_size);
        if let Some(term) = search_term {
            request = request.search(term, descriptor.search_columns.iter().copied());
        }
        if let Some(value) = filter_value {
            request = request.filter(descriptor.filter_column, value);
        }
        self.list_page(table, request)
    }

    /// # Errors
    /// Returns [`AdminError::NotFound`] when the row does not exist.
    pub fn get_record(&self, table: Table, id: i64) -> Result<Record, AdminError> {
        self.open_store()?.get_record(table, id)
    }

    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] when the column is not native to the table.
    pub fn distinct_values(
        &self,
        table: Table,
        column: &str,
    ) -> Result<Vec<serde_json::Value>, AdminError> {
        self.open_store()?.distinct_values(table, column)
    }

    /// # Errors
    /// Returns connection or storage errors from SQLite.
    pub fn dropdown_options(&self) -> Result<DropdownOptions, AdminError> {
        self.open_store()?.dropdown_options()
    }

    /// # Errors
    /// Returns connection or storage errors from SQLite.
    pub fn fund_status_options(&self) -> Result<Vec<String>, AdminError> {
        self.open_store()?.fund_status_options()
    }

    /// # Errors
    /// Returns connection or storage errors from SQLite.
    pub fn data_type_options(&self) -> Result<Vec<String>, AdminError> {
        self.open_store()?.data_type_options()
    }

    /// Insert one entity and flag the chatbot for a sync.
    ///
    /// # Errors
    /// Returns validation, dangling-reference, or conflict errors for rejected input.
    pub fn create(&self, input: &EntityInput) -> Result<CreateResult, AdminError> {
        let table = input.table();
        let id = self.open_store()?.create(input)?;
        info!(table = %table, id, "created record");
        Ok(CreateResult { table, id })
    }

    /// Decode a JSON object of column values and insert it.
    ///
    /// # Errors
    /// Same as [`KbAdminApi::create`], plus [`AdminError::Validation`] for undecodable input.
    pub fn create_json(
        &self,
        table: Table,
        data: serde_json::Value,
    ) -> Result<CreateResult, AdminError> {
        self.create(&EntityInput::from_json(table, data)?)
    }

    /// # Errors
    /// Returns validation, dangling-reference, conflict, or referential-integrity errors.
    pub fn update(&self, id: i64, input: &EntityInput) -> Result<MutationResult, AdminError> {
        let table = input.table();
        let outcome = self
            .open_store()?
            .update(id, input)
            .inspect_err(|err| log_rejection(table, id, err))?;
        info!(table = %table, id, outcome = outcome.as_str(), "updated record");
        Ok(MutationResult { table, id, outcome })
    }

    /// # Errors
    /// Same as [`KbAdminApi::update`], plus [`AdminError::Validation`] for undecodable input.
    pub fn update_json(
        &self,
        table: Table,
        id: i64,
        data: serde_json::Value,
    ) -> Result<MutationResult, AdminError> {
        self.update(id, &EntityInput::from_json(table, data)?)
    }

    /// Delete one row, or report the child rows that block it.
    ///
    /// # Errors
    /// Returns [`AdminError::ReferentialIntegrity`] when other rows still reference the target.
    pub fn delete(&self, table: Table, id: i64) -> Result<MutationResult, AdminError> {
        let outcome =
            self.open_store()?.delete(table, id).inspect_err(|err| log_rejection(table, id, err))?;
        info!(table = %table, id, outcome = outcome.as_str(), "deleted record");
        Ok(MutationResult { table, id, outcome })
    }

    /// # Errors
    /// Returns connection or storage errors from SQLite.
    pub fn sync_status(&self) -> Result<SyncStatus, AdminError> {
        self.open_store()?.sync_status()
    }

    /// # Errors
    /// Returns connection or storage errors from SQLite.
    pub fn dashboard_stats(&self) -> Result<DashboardStats, AdminError> {
        self.open_store()?.dashboard_stats()
    }
}

fn log_rejection(table: Table, id: i64, err: &AdminError) {
    if let AdminError::ReferentialIntegrity(violation) = err {
        warn!(table = %table, id, blockers = %violation, "mutation refused");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kb_admin_core::{CategoryInput, ManualChunkInput};
    use serde_json::json;

    fn temp_api() -> Result<(tempfile::TempDir, KbAdminApi)> {
        let dir = tempfile::tempdir()?;
        let api = KbAdminApi::new(dir.path().join("kb_admin.sqlite3"));
        Ok((dir, api))
    }

    #[test]
    fn migrate_dry_run_then_apply() -> Result<()> {
        let (_dir, api) = temp_api()?;
        let planned = api.migrate(true)?;
        assert!(planned.dry_run);
        assert_eq!(planned.would_apply_versions, vec![1]);
        assert_eq!(planned.after_version, None);

        let applied = api.migrate(false)?;
        assert_eq!(applied.after_version, Some(1));
        assert_eq!(applied.up_to_date, Some(true));
        assert!(api.integrity_check()?.quick_check_ok);
        Ok(())
    }

    #[test]
    fn list_view_uses_table_defaults_and_clamps_page() -> Result<()> {
        let (_dir, api) = temp_api()?;
        let billing = json!({"name": "Billing", "main_group": "Finance"});
        let billing = api.create_json(Table::Categories, billing)?;
        api.create_json(Table::Categories, json!({"name": "Login", "main_group": "Account"}))?;
        api.create_json(
            Table::ManualChunks,
            json!({
                "category_id": billing.id,
                "topic": "Refund steps",
                "content": "...",
                "data_type": "guide"
            }),
        )?;

        let page = api.list_view(Table::ManualChunks, 0, 10, Some("billing"), Some("all"))?;
        assert_eq!(page.page, 1);
        assert_eq!(page.total_count, 1);
        assert_eq!(page.rows[0].get("category_name"), Some(&json!("Billing")));

        let filtered = api.list_view(Table::Categories, 1, 10, None, Some("Account"))?;
        assert_eq!(filtered.total_count, 1);
        Ok(())
    }
    #[test]
    fn delete_is_blocked_until_children_are_removed() -> Result<()> {
        let (_dir, api) = temp_api()?;
        let category = api.create(&EntityInput::Categories(CategoryInput {
            name: "Cards".to_string(),
            ..CategoryInput::default()
        }))?;
        let chunk = api.create(&EntityInput::ManualChunks(ManualChunkInput {
            category_id: Some(category.id),
            topic: "Lost card".to_string(),
            content: "Call the hotline".to_string(),
            ..ManualChunkInput::default()
        }))?;

        match api.delete(Table::Categories, category.id) {
            Err(AdminError::ReferentialIntegrity(violation)) => {
                assert_eq!(violation.blocking_ids(), &[chunk.id]);
            }
            other => panic!("expected blocked delete, got {other:?}"),
        }

        assert_eq!(api.delete(Table::ManualChunks, chunk.id)?.outcome, MutationOutcome::Applied);
        assert_eq!(api.delete(Table::Categories, category.id)?.outcome, MutationOutcome::Applied);
        assert_eq!(api.delete(Table::Categories, category.id)?.outcome, MutationOutcome::NotFound);
        assert!(api.sync_status()?.pending_update);
        Ok(())
    }

    #[test]
    fn update_json_rejects_unknown_fields() -> Result<()> {
        let (_dir, api) = temp_api()?;
        let term = json!({"word": "SLA", "meaning": "Service level"});
        let created = api.create_json(Table::GlossaryTerms, term)?;
        let err = api.update_json(
            Table::GlossaryTerms,
            created.id,
            json!({"word": "SLA", "meanings": "x"}),
        );
        assert!(matches!(err, Err(AdminError::Validation(_))));

        let updated = api.update_json(
            Table::GlossaryTerms,
            created.id,
            json!({"word": "SLA", "meaning": "Service level agreement", "word_type": "acronym"}),
        )?;
        assert_eq!(updated.outcome, MutationOutcome::Applied);
        let row = api.get_record(Table::GlossaryTerms, created.id)?;
        assert_eq!(row.get("word_type"), Some(&json!("acronym")));
        Ok(())
    }

    #[test]
    fn unreachable_database_is_a_connection_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let api = KbAdminApi::new(dir.path().join("missing").join("kb.sqlite3"));
        assert!(matches!(api.dashboard_stats(), Err(AdminError::Connection(_))));
        Ok(())
    }

    #[test]
    fn option_lists_include_defaults_on_empty_database() -> Result<()> {
        let (_dir, api) = temp_api()?;
        assert_eq!(api.fund_status_options()?, vec!["N", "Y"]);
        assert_eq!(api.data_type_options()?.len(), 7);
        assert_eq!(api.dropdown_options()?, DropdownOptions::default());
        assert!(api.distinct_values(Table::Documents, "version")?.is_empty());
        assert_eq!(api.dashboard_stats()?.counts.len(), 6);
        Ok(())
    }
}
