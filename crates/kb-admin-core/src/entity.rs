use serde::{Deserialize, Serialize};
use time::Date;

use crate::{AdminError, Reference, SqlValue, Table};

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FundInput {
    pub fund_abbr: String,
    pub fund_name_th: String,
    #[serde(default)]
    pub fund_name_en: Option<String>,
    #[serde(default)]
    pub fiscal_year: Option<i64>,
    #[serde(default)]
    pub source_agency: Option<String>,
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub end_period: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlossaryTermInput {
    pub word: String,
    pub meaning: String,
    #[serde(default)]
    pub word_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DocumentInput {
    pub title: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CategoryInput {
    pub name: String,
    #[serde(default)]
    pub main_group: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ManualChunkInput {
    #[serde(default)]
    pub doc_id: Option<i64>,
    #[serde(default)]
    pub category_id: Option<i64>,
    pub topic: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub step_number: Option<i64>,
    pub content: String,
    #[serde(default)]
    pub data_type: Option<String>,
    /// Blank codes are stored as NULL.
    #[serde(default)]
    pub fund_abbr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SupportStoryInput {
    #[serde(default)]
    pub category_id: Option<i64>,
    pub scenario: String,
    pub solution: String,
}

/// Field values for a create or full-row update of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "table", content = "data", rename_all = "snake_case")]
pub enum EntityInput {
    Funds(FundInput),
    GlossaryTerms(GlossaryTermInput),
    Documents(DocumentInput),
    Categories(CategoryInput),
    ManualChunks(ManualChunkInput),
    SupportStories(SupportStoryInput),
}

impl EntityInput {
    #[must_use]
    pub fn table(&self) -> Table {
        match self {
            Self::Funds(_) => Table::Funds,
            Self::GlossaryTerms(_) => Table::GlossaryTerms,
            Self::Documents(_) => Table::Documents,
            Self::Categories(_) => Table::Categories,
            Self::ManualChunks(_) => Table::ManualChunks,
            Self::SupportStories(_) => Table::SupportStories,
        }
    }

    /// Decode a JSON object of column values for `table`.
    ///
    /// # Errors
    /// Returns [`AdminError::Validation`] when the object has unknown fields, misses a required
    /// field, or carries a value of the wrong type.
    pub fn from_json(table: Table, value: serde_json::Value) -> Result<Self, AdminError> {
        fn decode<T: serde::de::DeserializeOwned>(
            table: Table,
            value: serde_json::Value,
        ) -> Result<T, AdminError> {
            serde_json::from_value(value)
                .map_err(|err| AdminError::Validation(format!("invalid {table} input: {err}")))
        }

        Ok(match table {
            Table::Funds => Self::Funds(decode(table, value)?),
            Table::GlossaryTerms => Self::GlossaryTerms(decode(table, value)?),
            Table::Documents => Self::Documents(decode(table, value)?),
            Table::Categories => Self::Categories(decode(table, value)?),
            Table::ManualChunks => Self::ManualChunks(decode(table, value)?),
            Table::SupportStories => Self::SupportStories(decode(table, value)?),
        })
    }

    /// Check required fields and date formats.
    ///
    /// # Errors
    /// Returns [`AdminError::Validation`] naming the first offending field.
    pub fn validate(&self) -> Result<(), AdminError> {
        let table = self.table();
        match self {
            Self::Funds(input) => {
                require(table, "fund_abbr", &input.fund_abbr)?;
                require(table, "fund_name_th", &input.fund_name_th)?;
                check_date(table, "start_period", input.start_period.as_deref())?;
                check_date(table, "end_period", input.end_period.as_deref())?;
                let start = non_blank(input.start_period.as_deref());
                let end = non_blank(input.end_period.as_deref());
                if let (Some(start), Some(end)) = (start, end) {
                    if end < start {
                        return Err(AdminError::Validation(
                            "funds.end_period must not precede start_period".to_string(),
                        ));
                    }
                }
            }
            Self::GlossaryTerms(input) => {
                require(table, "word", &input.word)?;
                require(table, "meaning", &input.meaning)?;
            }
            Self::Documents(input) => {
                require(table, "title", &input.title)?;
                check_date(table, "last_updated", input.last_updated.as_deref())?;
            }
            Self::Categories(input) => require(table, "name", &input.name)?,
            Self::ManualChunks(input) => {
                require(table, "topic", &input.topic)?;
                require(table, "content", &input.content)?;
            }
            Self::SupportStories(input) => {
                require(table, "scenario", &input.scenario)?;
                require(table, "solution", &input.solution)?;
            }
        }
        Ok(())
    }

    /// Column/value pairs in storage column order, blanks normalized to NULL.
    #[must_use]
    pub fn assignments(&self) -> Vec<(&'static str, SqlValue)> {
        match self {
            Self::Funds(input) => vec![
                ("fund_abbr", SqlValue::Text(input.fund_abbr.trim().to_string())),
                ("fund_name_th", SqlValue::Text(input.fund_name_th.clone())),
                ("fund_name_en", SqlValue::optional_text(input.fund_name_en.as_deref())),
                ("fiscal_year", SqlValue::optional_integer(input.fiscal_year)),
                ("source_agency", SqlValue::optional_text(input.source_agency.as_deref())),
                ("start_period", SqlValue::optional_text(input.start_period.as_deref())),
                ("end_period", SqlValue::optional_text(input.end_period.as_deref())),
                ("status", SqlValue::optional_text(input.status.as_deref())),
            ],
            Self::GlossaryTerms(input) => vec![
                ("word", SqlValue::Text(input.word.clone())),
                ("meaning", SqlValue::Text(input.meaning.clone())),
                ("word_type", SqlValue::optional_text(input.word_type.as_deref())),
            ],
            Self::Documents(input) => vec![
                ("title", SqlValue::Text(input.title.clone())),
                ("version", SqlValue::optional_text(input.version.as_deref())),
                ("last_updated", SqlValue::optional_text(input.last_updated.as_deref())),
            ],
            Self::Categories(input) => vec![
                ("name", SqlValue::Text(input.name.clone())),
                ("main_group", SqlValue::optional_text(input.main_group.as_deref())),
                ("description", SqlValue::optional_text(input.description.as_deref())),
            ],
            Self::ManualChunks(input) => vec![
                ("doc_id", SqlValue::optional_integer(input.doc_id)),
                ("category_id", SqlValue::optional_integer(input.category_id)),
                ("topic", SqlValue::Text(input.topic.clone())),
                ("section", SqlValue::optional_text(input.section.as_deref())),
                ("step_number", SqlValue::optional_integer(input.step_number)),
                ("content", SqlValue::Text(input.content.clone())),
                ("data_type", SqlValue::optional_text(input.data_type.as_deref())),
                ("fund_abbr", SqlValue::optional_text(input.fund_abbr.as_deref())),
            ],
            Self::SupportStories(input) => vec![
                ("category_id", SqlValue::optional_integer(input.category_id)),
                ("scenario", SqlValue::Text(input.scenario.clone())),
                ("solution", SqlValue::Text(input.solution.clone())),
            ],
        }
    }

    /// Non-null foreign-key values this input would store, in relationship-map order.
    #[must_use]
    pub fn foreign_keys(&self) -> Vec<(&'static Reference, SqlValue)> {
        let assignments = self.assignments();
        self.table()
            .references()
            .filter_map(|reference| {
                assignments
                    .iter()
                    .find(|(column, value)| *column == reference.column && !value.is_null())
                    .map(|(_, value)| (reference, value.clone()))
            })
            .collect()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn require(table: Table, field: &str, value: &str) -> Result<(), AdminError> {
    if value.trim().is_empty() {
        return Err(AdminError::Validation(format!("{table}.{field} must not be blank")));
    }
    Ok(())
}

fn check_date(table: Table, field: &str, value: Option<&str>) -> Result<(), AdminError> {
    let Some(value) = non_blank(value) else {
        return Ok(());
    };
    let format = time::format_description::parse("[year]-[month]-[day]")
        .map_err(|err| AdminError::Validation(format!("date format: {err}")))?;
    Date::parse(value, &format).map(|_| ()).map_err(|_| {
        AdminError::Validation(format!("{table}.{field} must be a YYYY-MM-DD date, got {value}"))
    })
}
