use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod entity;
mod plan;
mod table;

pub use entity::{
    CategoryInput, DocumentInput, EntityInput, FundInput, GlossaryTermInput, ManualChunkInput,
    SupportStoryInput,
};
pub use plan::{
    like_pattern, plan_distinct, plan_list, plan_lookup, total_pages, Filter, ListPage, ListPlan,
    ListRequest, LookupPlan, Sort, SortDirection, FILTER_ALL, SEARCH_FOLD_FUNCTION,
};
pub use table::{JoinSpec, Projection, Reference, Table, TableDescriptor, REFERENCES};

pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Status codes always offered for funds, merged with whatever is stored.
pub const FUND_STATUS_DEFAULTS: &[&str] = &["Y", "N"];

/// Chunk data types always offered, merged with whatever is stored.
pub const DATA_TYPE_DEFAULTS: &[&str] =
    &["manual", "guide", "warning", "info", "troubleshoot", "contact", "rule"];

/// A field-name-keyed row, joined display fields included.
pub type Record = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum AdminError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("{0}")]
    ReferentialIntegrity(IntegrityViolation),
    #[error("{table}.{column} references missing {parent} value {value}")]
    DanglingReference { table: Table, column: String, parent: Table, value: String },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{table} record {id} not found")]
    NotFound { table: Table, id: i64 },
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl AdminError {
    /// Stable machine-readable name for the variant.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::ReferentialIntegrity(_) => "referential_integrity",
            Self::DanglingReference { .. } => "dangling_reference",
            Self::Conflict(_) => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::MalformedQuery(_) => "malformed_query",
            Self::Validation(_) => "validation",
            Self::Storage(_) => "storage",
        }
    }
}

/// Child rows of one dependent table that still point at a parent.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Blocker {
    pub table: Table,
    pub column: String,
    /// Ascending primary keys of the blocking rows.
    pub ids: Vec<i64>,
}

/// A delete or key change refused because other rows reference the record.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct IntegrityViolation {
    pub table: Table,
    pub id: i64,
    pub blockers: Vec<Blocker>,
}

impl IntegrityViolation {
    /// First dependent table found holding references.
    #[must_use]
    pub fn referencing_table(&self) -> Option<Table> {
        self.blockers.first().map(|blocker| blocker.table)
    }

    #[must_use]
    pub fn blocking_ids(&self) -> &[i64] {
        self.blockers.first().map_or(&[], |blocker| blocker.ids.as_slice())
    }
}

impl Display for IntegrityViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} record {} is still referenced", self.table, self.id)?;
        for blocker in &self.blockers {
            let ids = blocker.ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ");
            write!(f, "; {}.{} ids [{ids}]", blocker.table, blocker.column)?;
        }
        Ok(())
    }
}

/// A dynamically typed column value bound as a statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Trimmed text, with blank collapsing to `Null`.
    #[must_use]
    pub fn optional_text(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(text) if !text.is_empty() => Self::Text(text.to_string()),
            _ => Self::Null,
        }
    }

    #[must_use]
    pub fn optional_integer(value: Option<i64>) -> Self {
        value.map_or(Self::Null, Self::Integer)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl Display for SqlValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Applied,
    NotFound,
}

impl MutationOutcome {
    #[must_use]
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CategoryOption {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DocumentOption {
    pub id: i64,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FundOption {
    pub fund_id: i64,
    pub fund_abbr: String,
    pub fund_name_th: Option<String>,
}

/// Choices for the foreign-key pickers on chunk and story forms.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct DropdownOptions {
    pub categories: Vec<CategoryOption>,
    pub documents: Vec<DocumentOption>,
    pub funds: Vec<FundOption>,
}

/// Merge stored values with a fixed default set; sorted and de-duplicated.
#[must_use]
pub fn merge_options(stored: &[String], defaults: &[&str]) -> Vec<String> {
    let mut options = stored
        .iter()
        .map(String::as_str)
        .chain(defaults.iter().copied())
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    options.sort();
    options.dedup();
    options
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TableCount {
    pub table: Table,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SyncStatus {
    pub pending_update: bool,
    pub updated_at: Option<String>,
}

/// Chat messages of one session, newest first.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatSession {
    pub session_id: String,
    pub last_updated: Option<String>,
    pub messages: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardStats {
    pub counts: Vec<TableCount>,
    pub sync: SyncStatus,
    pub recent_sessions: Vec<ChatSession>,
}
