//! Paginated list planning shared by every list view.
//!
//! A [`ListRequest`] is turned into a [`ListPlan`]: one `COUNT(*)` statement and one page
//! statement over the same FROM/JOIN/WHERE text, plus the bound parameters. All identifiers
//! come from the table descriptors; caller text only ever reaches SQL as a parameter.

use serde::{Deserialize, Serialize};

use crate::{AdminError, Record, SqlValue, Table, TableDescriptor, DEFAULT_PAGE_SIZE};

/// Filter value that disables the dropdown filter.
pub const FILTER_ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    #[must_use]
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self { column: column.into(), value: value.into() }
    }

    /// `false` for the `all` sentinel and for blank values.
    #[must_use]
    pub fn is_active(&self) -> bool {
        let value = self.value.trim();
        !value.is_empty() && value != FILTER_ALL
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRequest {
    pub page: u32,
    pub page_size: u32,
    #[serde(default)]
    pub search_term: Option<String>,
    #[serde(default)]
    pub search_columns: Vec<String>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub sort: Option<Sort>,
}

impl Default for ListRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            search_term: None,
            search_columns: Vec::new(),
            filter: None,
            sort: None,
        }
    }
}

impl ListRequest {
    #[must_use]
    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn search<I, S>(mut self, term: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_term = Some(term.into());
        self.search_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn filter(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter = Some(Filter::new(column, value));
        self
    }

    #[must_use]
    pub fn sort(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(Sort { column: column.into(), direction });
        self
    }

    /// The trimmed search term, or `None` when absent or whitespace-only.
    #[must_use]
    pub fn effective_search_term(&self) -> Option<&str> {
        self.search_term.as_deref().map(str::trim).filter(|term| !term.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPlan {
    pub table: Table,
    pub page: u32,
    pub page_size: u32,
    pub count_sql: String,
    pub page_sql: String,
    /// Predicate parameters shared by both statements.
    pub params: Vec<SqlValue>,
    pub limit: i64,
    pub offset: i64,
}

impl ListPlan {
    /// Predicate parameters followed by `LIMIT` and `OFFSET`.
    #[must_use]
    pub fn page_params(&self) -> Vec<SqlValue> {
        let mut params = self.params.clone();
        params.push(SqlValue::Integer(self.limit));
        params.push(SqlValue::Integer(self.offset));
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListPage {
    pub table: Table,
    pub rows: Vec<Record>,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub total_count: u64,
}

/// `max(1, ceil(total_count / page_size))`.
#[must_use]
pub fn total_pages(total_count: u64, page_size: u32) -> u64 {
    let page_size = u64::from(page_size.max(1));
    total_count.div_ceil(page_size).max(1)
}

/// Scalar SQL function the store registers on every connection. It lowercases text with full
/// Unicode case mapping so search folds `É` to `é` as well as ASCII letters.
pub const SEARCH_FOLD_FUNCTION: &str = "kb_fold";

/// Lowercase the term and escape LIKE wildcards so it matches as a literal substring of a
/// folded column.
#[must_use]
pub fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for ch in term.to_lowercase().chars() {
        if matches!(ch, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

/// Plan the count and page statements for one list view.
///
/// # Errors
/// Returns [`AdminError::MalformedQuery`] when the page size is zero, the page offset does not
/// fit a SQLite integer, or a search, filter, or sort column is unknown to the table.
pub fn plan_list(table: Table, request: &ListRequest) -> Result<ListPlan, AdminError> {
    if request.page_size == 0 {
        return Err(AdminError::MalformedQuery("page_size must be >= 1".to_string()));
    }

    let descriptor = table.descriptor();
    let mut predicates = Vec::new();
    let mut params = Vec::new();

    let search_columns = request
        .search_columns
        .iter()
        .map(|column| descriptor.resolve_column(column))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(term) = request.effective_search_term() {
        if !search_columns.is_empty() {
            params.push(SqlValue::Text(like_pattern(term)));
            let slot = params.len();
            let matches = search_columns
                .iter()
                .map(|column| {
                    format!("{SEARCH_FOLD_FUNCTION}({column}) LIKE ?{slot} ESCAPE '\\'")
                })
                .collect::<Vec<_>>();
            predicates.push(format!("({})", matches.join(" OR ")));
        }
    }

    if let Some(filter) = request.filter.as_ref() {
        let column = descriptor.resolve_column(&filter.column)?;
        if filter.is_active() {
            params.push(SqlValue::Text(filter.value.clone()));
            predicates.push(format!("{column} = ?{}", params.len()));
        }
    }

    let where_clause = if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    };
    let from = descriptor.from_clause();
    let order_by = order_by_clause(descriptor, request.sort.as_ref())?;
    let limit_slot = params.len() + 1;

    let page = request.page.max(1);
    let offset = i64::from(page - 1)
        .checked_mul(i64::from(request.page_size))
        .ok_or_else(|| {
            AdminError::MalformedQuery(format!(
                "page {page} with page_size {} is beyond the addressable offset",
                request.page_size
            ))
        })?;
    Ok(ListPlan {
        table,
        page,
        page_size: request.page_size,
        count_sql: format!("SELECT COUNT(*) FROM {from}{where_clause}"),
        page_sql: format!(
            "SELECT {} FROM {from}{where_clause} ORDER BY {order_by} \
             LIMIT ?{limit_slot} OFFSET ?{}",
            descriptor.select_list(),
            limit_slot + 1,
        ),
        params,
        limit: i64::from(request.page_size),
        offset,
    })
}

fn order_by_clause(
    descriptor: &TableDescriptor,
    sort: Option<&Sort>,
) -> Result<String, AdminError> {
    let primary_key = descriptor.qualified_primary_key();
    let Some(sort) = sort else {
        return Ok(format!("{primary_key} ASC"));
    };

    let column = descriptor.resolve_column(&sort.column)?;
    let direction = sort.direction.as_sql();
    if column == primary_key {
        Ok(format!("{primary_key} {direction}"))
    } else {
        Ok(format!("{column} {direction}, {primary_key} ASC"))
    }
}

/// Single-row fetch with the same joins as the list view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LookupPlan {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

#[must_use]
pub fn plan_lookup(table: Table, id: i64) -> LookupPlan {
    let descriptor = table.descriptor();
    LookupPlan {
        sql: format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            descriptor.select_list(),
            descriptor.from_clause(),
            descriptor.qualified_primary_key(),
        ),
        params: vec![SqlValue::Integer(id)],
    }
}

/// Ascending, de-duplicated, non-null, non-empty values of one native column.
///
/// # Errors
/// Returns [`AdminError::MalformedQuery`] when the column is not native to the table.
pub fn plan_distinct(table: Table, column: &str) -> Result<String, AdminError> {
    let descriptor = table.descriptor();
    let column = descriptor.native_column(column)?;
    Ok(format!(
        "SELECT DISTINCT {column} FROM {table} \
         WHERE {column} IS NOT NULL AND CAST({column} AS TEXT) <> '' \
         ORDER BY {column} ASC",
        table = descriptor.storage_name,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unfiltered_plan_has_no_predicate() -> Result<(), AdminError> {
        let plan = plan_list(Table::Categories, &ListRequest::default())?;
        assert_eq!(plan.count_sql, "SELECT COUNT(*) FROM categories AS c");
        assert_eq!(
            plan.page_sql,
            "SELECT c.* FROM categories AS c ORDER BY c.id ASC LIMIT ?1 OFFSET ?2"
        );
        assert!(plan.params.is_empty());
        assert_eq!(plan.page_params(), vec![SqlValue::Integer(10), SqlValue::Integer(0)]);
        Ok(())
    }

    #[test]
    fn search_and_filter_share_the_descriptor_rewrite() -> Result<(), AdminError> {
        let request = ListRequest::default()
            .page(3)
            .search("Reset", ["topic", "category_name", "doc_title"])
            .filter("main_group", "Finance");
        let plan = plan_list(Table::ManualChunks, &request)?;

        let predicate = " WHERE (kb_fold(m.topic) LIKE ?1 ESCAPE '\\' \
                         OR kb_fold(c.name) LIKE ?1 ESCAPE '\\' \
                         OR kb_fold(d.title) LIKE ?1 ESCAPE '\\') \
                         AND c.main_group = ?2";
        assert!(plan.count_sql.ends_with(predicate), "{}", plan.count_sql);
        assert!(plan.page_sql.contains(predicate), "{}", plan.page_sql);
        assert!(plan.page_sql.ends_with("ORDER BY m.id ASC LIMIT ?3 OFFSET ?4"));
        assert_eq!(
            plan.params,
            vec![SqlValue::Text("%reset%".to_string()), SqlValue::Text("Finance".to_string())]
        );
        assert_eq!(plan.offset, 20);
        Ok(())
    }

    #[test]
    fn count_and_page_share_from_and_where_text() -> Result<(), AdminError> {
        let request = ListRequest::default()
            .search("story", ["scenario", "category_name"])
            .filter("category_name", "Billing");
        let plan = plan_list(Table::SupportStories, &request)?;
        let shared = plan.count_sql.trim_start_matches("SELECT COUNT(*) FROM ");
        assert!(plan.page_sql.contains(&format!(" FROM {shared} ORDER BY")));
        Ok(())
    }

    #[test]
    fn all_sentinel_and_blank_filter_are_ignored() -> Result<(), AdminError> {
        for value in ["all", "", "   "] {
            let plan =
                plan_list(Table::Funds, &ListRequest::default().filter("status", value))?;
            assert!(!plan.count_sql.contains("WHERE"), "value {value:?}");
        }
        Ok(())
    }

    #[test]
    fn unknown_columns_fail_loudly_even_without_a_term() {
        let bad_search = ListRequest::default().search("", ["no_such_column"]);
        assert!(matches!(
            plan_list(Table::Documents, &bad_search),
            Err(AdminError::MalformedQuery(_))
        ));

        let bad_filter = ListRequest::default().filter("category_name", "all");
        assert!(matches!(
            plan_list(Table::Documents, &bad_filter),
            Err(AdminError::MalformedQuery(_))
        ));

        let bad_sort = ListRequest::default().sort("id; DROP TABLE documents", SortDirection::Asc);
        assert!(matches!(
            plan_list(Table::Documents, &bad_sort),
            Err(AdminError::MalformedQuery(_))
        ));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let request = ListRequest::default().page_size(0);
        assert!(matches!(plan_list(Table::Funds, &request), Err(AdminError::MalformedQuery(_))));
    }

    #[test]
    fn sort_appends_primary_key_tie_breaker() -> Result<(), AdminError> {
        let plan = plan_list(
            Table::ManualChunks,
            &ListRequest::default().sort("category_name", SortDirection::Desc),
        )?;
        assert!(plan.page_sql.contains("ORDER BY c.name DESC, m.id ASC"));

        let plan = plan_list(
            Table::GlossaryTerms,
            &ListRequest::default().sort("word_id", SortDirection::Desc),
        )?;
        assert!(plan.page_sql.contains("ORDER BY g.word_id DESC LIMIT"));
        Ok(())
    }

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
        assert_eq!(like_pattern("École ÜBER"), "%école über%");
    }

    #[test]
    fn offset_beyond_sqlite_integer_is_rejected() {
        let request = ListRequest::default().page(u32::MAX).page_size(u32::MAX);
        assert!(matches!(
            plan_list(Table::Categories, &request),
            Err(AdminError::MalformedQuery(_))
        ));
    }

    #[test]
    fn lookup_and_distinct_plans() -> Result<(), AdminError> {
        let lookup = plan_lookup(Table::SupportStories, 7);
        assert_eq!(
            lookup.sql,
            "SELECT s.*, c.name AS category_name FROM support_stories AS s \
             LEFT JOIN categories AS c ON s.category_id = c.id WHERE s.id = ?1"
        );
        assert_eq!(lookup.params, vec![SqlValue::Integer(7)]);

        assert_eq!(
            plan_distinct(Table::Funds, "status")?,
            "SELECT DISTINCT status FROM research_funds \
             WHERE status IS NOT NULL AND CAST(status AS TEXT) <> '' ORDER BY status ASC"
        );
        assert!(plan_distinct(Table::ManualChunks, "category_name").is_err());
        Ok(())
    }

    #[test]
    fn total_pages_example() {
        assert_eq!(total_pages(23, 10), 3);
        assert_eq!(total_pages(0, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }

    proptest! {
        #[test]
        fn total_pages_matches_ceiling_floored_at_one(
            count in 0_u64..1_000_000,
            size in 1_u32..500,
        ) {
            let size_u64 = u64::from(size);
            let expected = std::cmp::max(1, count / size_u64 + u64::from(count % size_u64 != 0));
            prop_assert_eq!(total_pages(count, size), expected);
        }

        #[test]
        fn whitespace_terms_plan_like_no_term(spaces in "[ \t\n]{0,8}") {
            let blank = plan_list(
                Table::Categories,
                &ListRequest::default().search(spaces, ["name"]),
            );
            let none = plan_list(Table::Categories, &ListRequest::default());
            prop_assert_eq!(blank.ok(), none.ok());
        }

        #[test]
        fn offset_tracks_page(page in 0_u32..=u32::MAX, size in 1_u32..=u32::MAX) {
            let plan = plan_list(
                Table::Documents,
                &ListRequest::default().page(page).page_size(size),
            );
            let expected = i128::from(page.max(1) - 1) * i128::from(size);
            match plan {
                Ok(plan) => {
                    prop_assert_eq!(i128::from(plan.offset), expected);
                    prop_assert_eq!(plan.limit, i64::from(size));
                }
                Err(err) => {
                    prop_assert!(expected > i128::from(i64::MAX));
                    prop_assert!(matches!(err, AdminError::MalformedQuery(_)));
                }
            }
        }
    }
}
