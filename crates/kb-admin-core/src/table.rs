use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::AdminError;

/// One of the six knowledge-base entities exposed to the admin back office.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Funds,
    GlossaryTerms,
    Documents,
    Categories,
    ManualChunks,
    SupportStories,
}

impl Table {
    pub const ALL: [Self; 6] = [
        Self::Funds,
        Self::GlossaryTerms,
        Self::Documents,
        Self::Categories,
        Self::ManualChunks,
        Self::SupportStories,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Funds => "funds",
            Self::GlossaryTerms => "glossary_terms",
            Self::Documents => "documents",
            Self::Categories => "categories",
            Self::ManualChunks => "manual_chunks",
            Self::SupportStories => "support_stories",
        }
    }

    /// Accepts both logical names and storage names (`research_funds`).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "funds" | "research_funds" => Some(Self::Funds),
            "glossary_terms" => Some(Self::GlossaryTerms),
            "documents" => Some(Self::Documents),
            "categories" => Some(Self::Categories),
            "manual_chunks" => Some(Self::ManualChunks),
            "support_stories" => Some(Self::SupportStories),
            _ => None,
        }
    }

    /// Parse a table name supplied by a caller.
    ///
    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] for names outside the six logical tables.
    pub fn resolve(value: &str) -> Result<Self, AdminError> {
        Self::parse(value)
            .ok_or_else(|| AdminError::MalformedQuery(format!("unknown table: {value}")))
    }

    #[must_use]
    pub fn descriptor(self) -> &'static TableDescriptor {
        match self {
            Self::Funds => &FUNDS,
            Self::GlossaryTerms => &GLOSSARY_TERMS,
            Self::Documents => &DOCUMENTS,
            Self::Categories => &CATEGORIES,
            Self::ManualChunks => &MANUAL_CHUNKS,
            Self::SupportStories => &SUPPORT_STORIES,
        }
    }

    #[must_use]
    pub fn storage_name(self) -> &'static str {
        self.descriptor().storage_name
    }

    /// References whose parent is this table, in the order blockers are reported.
    pub fn dependents(self) -> impl Iterator<Item = &'static Reference> {
        REFERENCES.iter().filter(move |reference| reference.parent == self)
    }

    /// Foreign keys held by rows of this table.
    pub fn references(self) -> impl Iterator<Item = &'static Reference> {
        REFERENCES.iter().filter(move |reference| reference.child == self)
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A foreign key from `child.column` to `parent.parent_column`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub child: Table,
    pub column: &'static str,
    pub parent: Table,
    pub parent_column: &'static str,
}

const CHUNK_FUND: Reference = Reference {
    child: Table::ManualChunks,
    column: "fund_abbr",
    parent: Table::Funds,
    parent_column: "fund_abbr",
};

const CHUNK_DOCUMENT: Reference = Reference {
    child: Table::ManualChunks,
    column: "doc_id",
    parent: Table::Documents,
    parent_column: "id",
};

const CHUNK_CATEGORY: Reference = Reference {
    child: Table::ManualChunks,
    column: "category_id",
    parent: Table::Categories,
    parent_column: "id",
};

const STORY_CATEGORY: Reference = Reference {
    child: Table::SupportStories,
    column: "category_id",
    parent: Table::Categories,
    parent_column: "id",
};

/// Every foreign key in the knowledge base. Glossary terms are never referenced.
pub const REFERENCES: &[Reference] = &[CHUNK_FUND, CHUNK_DOCUMENT, CHUNK_CATEGORY, STORY_CATEGORY];

/// A parent column surfaced on child rows under a display name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Projection {
    pub source: &'static str,
    pub output: &'static str,
}

/// A left outer join along one [`Reference`], plus the parent columns it projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSpec {
    pub reference: Reference,
    pub projections: &'static [Projection],
}

/// Declarative description of one logical table: its storage name, alias, native columns,
/// and the joins needed to denormalize its foreign keys into display fields.
#[derive(Debug, PartialEq, Eq)]
pub struct TableDescriptor {
    pub table: Table,
    pub storage_name: &'static str,
    pub alias: &'static str,
    pub primary_key: &'static str,
    pub columns: &'static [&'static str],
    pub joins: &'static [JoinSpec],
    /// Columns the list view searches when the caller names none.
    pub search_columns: &'static [&'static str],
    /// Column the list view's dropdown filter applies to.
    pub filter_column: &'static str,
}

static FUNDS: TableDescriptor = TableDescriptor {
    table: Table::Funds,
    storage_name: "research_funds",
    alias: "f",
    primary_key: "fund_id",
    columns: &[
        "fund_id",
        "fund_abbr",
        "fund_name_th",
        "fund_name_en",
        "fiscal_year",
        "source_agency",
        "start_period",
        "end_period",
        "status",
    ],
    joins: &[],
    search_columns: &["fund_abbr", "fund_name_th", "source_agency"],
    filter_column: "status",
};

static GLOSSARY_TERMS: TableDescriptor = TableDescriptor {
    table: Table::GlossaryTerms,
    storage_name: "glossary_terms",
    alias: "g",
    primary_key: "word_id",
    columns: &["word_id", "word", "meaning", "word_type"],
    joins: &[],
    search_columns: &["word", "meaning"],
    filter_column: "word_type",
};

static DOCUMENTS: TableDescriptor = TableDescriptor {
    table: Table::Documents,
    storage_name: "documents",
    alias: "d",
    primary_key: "id",
    columns: &["id", "title", "version", "last_updated"],
    joins: &[],
    search_columns: &["title", "version"],
    filter_column: "version",
};

static CATEGORIES: TableDescriptor = TableDescriptor {
    table: Table::Categories,
    storage_name: "categories",
    alias: "c",
    primary_key: "id",
    columns: &["id", "name", "main_group", "description"],
    joins: &[],
    search_columns: &["name", "description", "main_group"],
    filter_column: "main_group",
};

static MANUAL_CHUNKS: TableDescriptor = TableDescriptor {
    table: Table::ManualChunks,
    storage_name: "manual_chunks",
    alias: "m",
    primary_key: "id",
    columns: &[
        "id",
        "doc_id",
        "category_id",
        "topic",
        "section",
        "step_number",
        "content",
        "data_type",
        "fund_abbr",
    ],
    joins: &[
        JoinSpec {
            reference: CHUNK_CATEGORY,
            projections: &[
                Projection { source: "name", output: "category_name" },
                Projection { source: "main_group", output: "main_group" },
            ],
        },
        JoinSpec {
            reference: CHUNK_DOCUMENT,
            projections: &[
                Projection { source: "title", output: "doc_title" },
                Projection { source: "version", output: "doc_version" },
            ],
        },
        JoinSpec {
            reference: CHUNK_FUND,
            projections: &[Projection { source: "fund_name_th", output: "fund_full_name" }],
        },
    ],
    search_columns: &["topic", "content", "category_name", "doc_title"],
    filter_column: "data_type",
};

static SUPPORT_STORIES: TableDescriptor = TableDescriptor {
    table: Table::SupportStories,
    storage_name: "support_stories",
    alias: "s",
    primary_key: "id",
    columns: &["id", "category_id", "scenario", "solution"],
    joins: &[JoinSpec {
        reference: STORY_CATEGORY,
        projections: &[Projection { source: "name", output: "category_name" }],
    }],
    search_columns: &["scenario", "solution", "category_name"],
    filter_column: "category_name",
};

impl TableDescriptor {
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(&name)
    }

    /// Qualified primary key, e.g. `m.id`.
    #[must_use]
    pub fn qualified_primary_key(&self) -> String {
        format!("{}.{}", self.alias, self.primary_key)
    }

    /// Rewrite a logical column name into a qualified SQL column.
    ///
    /// Native columns resolve against this table's alias; display fields resolve against the
    /// joined parent that projects them.
    ///
    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] when the name is neither native nor projected.
    pub fn resolve_column(&self, name: &str) -> Result<String, AdminError> {
        if self.has_column(name) {
            return Ok(format!("{}.{name}", self.alias));
        }

        for join in self.joins {
            let parent_alias = join.reference.parent.descriptor().alias;
            if let Some(projection) =
                join.projections.iter().find(|projection| projection.output == name)
            {
                return Ok(format!("{parent_alias}.{}", projection.source));
            }
        }

        Err(AdminError::MalformedQuery(format!("unknown column {name} for table {}", self.table)))
    }

    /// Resolve a native column only, unqualified. Used where joins do not apply.
    ///
    /// # Errors
    /// Returns [`AdminError::MalformedQuery`] when the column is not native to this table.
    pub fn native_column(&self, name: &str) -> Result<&'static str, AdminError> {
        self.columns.iter().copied().find(|column| *column == name).ok_or_else(|| {
            AdminError::MalformedQuery(format!("unknown column {name} for table {}", self.table))
        })
    }

    #[must_use]
    pub fn from_clause(&self) -> String {
        let mut sql = format!("{} AS {}", self.storage_name, self.alias);
        for join in self.joins {
            let parent = join.reference.parent.descriptor();
            sql.push_str(&format!(
                " LEFT JOIN {} AS {} ON {}.{} = {}.{}",
                parent.storage_name,
                parent.alias,
                self.alias,
                join.reference.column,
                parent.alias,
                join.reference.parent_column,
            ));
        }
        sql
    }

    #[must_use]
    pub fn select_list(&self) -> String {
        let mut items = vec![format!("{}.*", self.alias)];
        for join in self.joins {
            let parent_alias = join.reference.parent.descriptor().alias;
            items.extend(join.projections.iter().map(|projection| {
                format!("{parent_alias}.{} AS {}", projection.source, projection.output)
            }));
        }
        items.join(", ")
    }

    /// Display fields this table gains through joins, in select order.
    pub fn projected_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.joins
            .iter()
            .flat_map(|join| join.projections.iter().map(|projection| projection.output))
    }
}
