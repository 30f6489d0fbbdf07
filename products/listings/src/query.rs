use sea_orm::Value;

use crate::{
    ListingError, ListingFilters, ListingResult,
    keywords::{AMAZON_FBA, EXCLUDE, INCLUDE},
    model::LISTING_COLUMNS,
};

const DEFAULT_SORT_COLUMN: &str = "scraped_at";
const MAX_IDENTIFIER_LEN: usize = 64;

/// Lowercased text that the keyword heuristic searches.
const HAYSTACK: &str = "LOWER(COALESCE(title, '') || ' ' || COALESCE(industry, '') || ' ' || \
     COALESCE(description, ''))";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlDialect {
    BigQuery,
    Postgres,
    Sqlite,
}

impl SqlDialect {
    fn placeholder(self, index: usize) -> String {
        match self {
            SqlDialect::BigQuery => format!("@p{index}"),
            SqlDialect::Postgres => format!("${}", index + 1),
            SqlDialect::Sqlite => "?".to_string(),
        }
    }

    // BigQuery LIKE already treats backslash as the escape character and
    // rejects an ESCAPE clause.
    fn like_escape(self) -> &'static str {
        match self {
            SqlDialect::BigQuery => "",
            SqlDialect::Postgres | SqlDialect::Sqlite => " ESCAPE '\\'",
        }
    }

    fn quote_table(self, table: &str) -> String {
        match self {
            SqlDialect::BigQuery => format!("`{table}`"),
            SqlDialect::Postgres | SqlDialect::Sqlite => table.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryParam {
    Float(f64),
    Text(String),
}

impl From<QueryParam> for Value {
    fn from(param: QueryParam) -> Self {
        match param {
            QueryParam::Float(value) => value.into(),
            QueryParam::Text(value) => value.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

/// A page statement and the count statement that shares its WHERE clause.
#[derive(Clone, Debug, PartialEq)]
pub struct ListingQuery {
    pub page: SqlStatement,
    pub count: SqlStatement,
    pub limit: u64,
    pub offset: u64,
}

#[derive(Clone, Debug)]
pub struct ListingQueryBuilder {
    dialect: SqlDialect,
    table: String,
    online_only: bool,
}

impl ListingQueryBuilder {
    pub fn new(dialect: SqlDialect, table: impl Into<String>) -> ListingResult<Self> {
        let table = table.into();
        let allowed = |c: char| {
            c.is_ascii_alphanumeric()
                || c == '_'
                || c == '.'
                || (c == '-' && dialect == SqlDialect::BigQuery)
        };
        if table.is_empty() || !table.chars().all(allowed) {
            return Err(ListingError::invalid(format!(
                "invalid listings table name {table:?}"
            )));
        }
        Ok(Self {
            dialect,
            table,
            online_only: true,
        })
    }

    /// Toggles the online-business keyword heuristic (on by default).
    pub fn online_only(mut self, enabled: bool) -> Self {
        self.online_only = enabled;
        self
    }

    pub fn search(&self, filters: &ListingFilters) -> ListingResult<ListingQuery> {
        let sort_column = resolve_sort_column(filters.sort_by.as_deref())?;
        let mut clause = WhereClause::new(self.dialect);

        if self.online_only {
            clause.raw(format!("({})", keyword_any(INCLUDE)));
            clause.raw(format!("NOT ({})", keyword_any(EXCLUDE)));
        }
        match filters.is_amazon_fba {
            Some(true) => clause.raw(format!("({})", keyword_any(AMAZON_FBA))),
            Some(false) => clause.raw(format!("NOT ({})", keyword_any(AMAZON_FBA))),
            None => {}
        }
        if let Some(min) = filters.min_price {
            clause.compare("asking_price >=", QueryParam::Float(min));
        }
        if let Some(max) = filters.max_price {
            clause.compare("asking_price <=", QueryParam::Float(max));
        }
        if let Some(min) = filters.min_revenue {
            clause.compare("annual_revenue >=", QueryParam::Float(min));
        }
        if let Some(max) = filters.max_revenue {
            clause.compare("annual_revenue <=", QueryParam::Float(max));
        }
        if let Some(industry) = non_empty(&filters.industry) {
            clause.contains(&["industry"], industry);
        }
        if let Some(location) = non_empty(&filters.location) {
            clause.contains(&["location"], location);
        }
        if let Some(source) = non_empty(&filters.source) {
            clause.compare(
                "LOWER(source_site) =",
                QueryParam::Text(source.to_lowercase()),
            );
        }
        if let Some(term) = non_empty(&filters.search_term) {
            clause.contains(&["title", "description", "industry"], term);
        }

        let table = self.dialect.quote_table(&self.table);
        let where_sql = clause.render();
        let mut order = format!(
            "{sort_column} {} NULLS LAST",
            filters.sort_direction.as_sql()
        );
        if sort_column != "id" {
            order.push_str(", id ASC");
        }

        let page = SqlStatement {
            sql: format!(
                "SELECT {LISTING_COLUMNS} FROM {table}{where_sql} ORDER BY {order} LIMIT {} OFFSET {}",
                filters.limit, filters.offset
            ),
            params: clause.params.clone(),
        };
        let count = SqlStatement {
            sql: format!("SELECT COUNT(*) AS total FROM {table}{where_sql}"),
            params: clause.params,
        };
        Ok(ListingQuery {
            page,
            count,
            limit: filters.limit,
            offset: filters.offset,
        })
    }

    /// Single-listing lookup. The keyword heuristic does not apply here.
    pub fn by_id(&self, id: &str) -> SqlStatement {
        SqlStatement {
            sql: format!(
                "SELECT {LISTING_COLUMNS} FROM {} WHERE id = {} LIMIT 1",
                self.dialect.quote_table(&self.table),
                self.dialect.placeholder(0)
            ),
            params: vec![QueryParam::Text(id.to_string())],
        }
    }
}

/// Maps a public `sortBy` value to a column. Unmapped values are used
/// verbatim when they are plain identifiers and rejected otherwise.
pub fn resolve_sort_column(sort_by: Option<&str>) -> ListingResult<String> {
    let Some(raw) = sort_by.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_SORT_COLUMN.to_string());
    };
    let mapped = match raw {
        "price" => Some("asking_price"),
        "revenue" => Some("annual_revenue"),
        "cashFlow" | "cash_flow" => Some("cash_flow"),
        "multiple" => Some("valuation_multiple"),
        "scrapedAt" | "date" | "newest" => Some("scraped_at"),
        "title" => Some("title"),
        "industry" => Some("industry"),
        "location" => Some("location"),
        "source" => Some("source_site"),
        _ => None,
    };
    if let Some(column) = mapped {
        return Ok(column.to_string());
    }
    let mut chars = raw.chars();
    let starts_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if starts_ok
        && raw.len() <= MAX_IDENTIFIER_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(raw.to_string())
    } else {
        Err(ListingError::invalid(format!("unsupported sortBy value {raw:?}")))
    }
}

struct WhereClause {
    dialect: SqlDialect,
    conditions: Vec<String>,
    params: Vec<QueryParam>,
}

impl WhereClause {
    fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            conditions: Vec::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, param: QueryParam) -> String {
        let placeholder = self.dialect.placeholder(self.params.len());
        self.params.push(param);
        placeholder
    }

    fn raw(&mut self, condition: String) {
        self.conditions.push(condition);
    }

    fn compare(&mut self, lhs: &str, param: QueryParam) {
        let placeholder = self.bind(param);
        self.conditions.push(format!("{lhs} {placeholder}"));
    }

    /// Case-insensitive substring match on any of `columns`.
    fn contains(&mut self, columns: &[&str], needle: &str) {
        let pattern = format!("%{}%", escape_like(&needle.to_lowercase()));
        let escape = self.dialect.like_escape();
        let parts: Vec<String> = columns
            .iter()
            .map(|column| {
                let placeholder = self.bind(QueryParam::Text(pattern.clone()));
                format!("LOWER(COALESCE({column}, '')) LIKE {placeholder}{escape}")
            })
            .collect();
        if parts.len() == 1 {
            self.conditions.extend(parts);
        } else {
            self.conditions.push(format!("({})", parts.join(" OR ")));
        }
    }

    fn render(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.conditions.join(" AND "))
        }
    }
}

fn keyword_any(keywords: &[&str]) -> String {
    keywords
        .iter()
        .map(|kw| format!("{HAYSTACK} LIKE '%{kw}%'"))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SortDirection;

    fn builder(dialect: SqlDialect) -> ListingQueryBuilder {
        ListingQueryBuilder::new(dialect, "business_listings").unwrap()
    }

    #[test]
    fn empty_filters_only_carry_the_heuristic() {
        let query = builder(SqlDialect::Postgres)
            .search(&ListingFilters::default())
            .unwrap();
        assert!(query.page.params.is_empty());
        assert!(query.page.sql.contains("LIKE '%ecommerce%'"));
        assert!(query.page.sql.contains("NOT (LOWER("));
        assert!(
            query
                .page
                .sql
                .ends_with("ORDER BY scraped_at DESC NULLS LAST, id ASC LIMIT 20 OFFSET 0")
        );

        let unfiltered = builder(SqlDialect::Postgres)
            .online_only(false)
            .search(&ListingFilters::default())
            .unwrap();
        assert!(!unfiltered.page.sql.contains("WHERE"));
        assert_eq!(
            unfiltered.count.sql,
            "SELECT COUNT(*) AS total FROM business_listings"
        );
    }

    #[test]
    fn placeholders_follow_the_dialect() {
        let filters = ListingFilters {
            min_price: Some(100_000.0),
            max_revenue: Some(2_000_000.0),
            ..ListingFilters::default()
        };
        let pg = builder(SqlDialect::Postgres).online_only(false).search(&filters).unwrap();
        assert!(pg.page.sql.contains("asking_price >= $1 AND annual_revenue <= $2"));

        let bq = ListingQueryBuilder::new(SqlDialect::BigQuery, "acme-prod.listings.online_view")
            .unwrap()
            .online_only(false)
            .search(&filters)
            .unwrap();
        assert!(bq.page.sql.contains("FROM `acme-prod.listings.online_view`"));
        assert!(bq.page.sql.contains("asking_price >= @p0 AND annual_revenue <= @p1"));

        let lite = builder(SqlDialect::Sqlite).online_only(false).search(&filters).unwrap();
        assert!(lite.page.sql.contains("asking_price >= ? AND annual_revenue <= ?"));
        assert_eq!(
            lite.page.params,
            vec![QueryParam::Float(100_000.0), QueryParam::Float(2_000_000.0)]
        );
    }

    #[test]
    fn count_mirrors_the_page_where_clause() {
        let filters = ListingFilters {
            industry: Some("SaaS".into()),
            source: Some("Flippa".into()),
            search_term: Some("newsletter".into()),
            is_amazon_fba: Some(false),
            limit: 50,
            offset: 100,
            ..ListingFilters::default()
        };
        let query = builder(SqlDialect::Postgres).search(&filters).unwrap();
        let page_where = query
            .page
            .sql
            .split(" WHERE ")
            .nth(1)
            .and_then(|rest| rest.split(" ORDER BY ").next())
            .unwrap();
        let count_where = query.count.sql.split(" WHERE ").nth(1).unwrap();
        assert_eq!(page_where, count_where);
        assert_eq!(query.page.params, query.count.params);
        assert!(!query.count.sql.contains("LIMIT"));
        assert_eq!((query.limit, query.offset), (50, 100));
        assert_eq!(query.page.params[0], QueryParam::Text("%saas%".into()));
        assert_eq!(query.page.params[1], QueryParam::Text("flippa".into()));
        assert_eq!(query.page.params.len(), 5);
    }

    #[test]
    fn like_wildcards_in_user_input_are_escaped() {
        let filters = ListingFilters {
            search_term: Some("100%_off\\".into()),
            ..ListingFilters::default()
        };
        let query = builder(SqlDialect::Sqlite).online_only(false).search(&filters).unwrap();
        assert_eq!(
            query.page.params[0],
            QueryParam::Text("%100\\%\\_off\\\\%".into())
        );
        assert!(query.page.sql.contains("LIKE ? ESCAPE '\\'"));

        let bq = ListingQueryBuilder::new(SqlDialect::BigQuery, "p.d.t")
            .unwrap()
            .search(&filters)
            .unwrap();
        assert!(!bq.page.sql.contains("ESCAPE"));
    }

    #[test]
    fn sort_mapping_and_pass_through() {
        assert_eq!(resolve_sort_column(None).unwrap(), "scraped_at");
        assert_eq!(resolve_sort_column(Some("price")).unwrap(), "asking_price");
        assert_eq!(resolve_sort_column(Some("cashFlow")).unwrap(), "cash_flow");
        assert_eq!(resolve_sort_column(Some("multiple")).unwrap(), "valuation_multiple");
        assert_eq!(resolve_sort_column(Some("newest")).unwrap(), "scraped_at");
        assert_eq!(resolve_sort_column(Some("source")).unwrap(), "source_site");
        assert_eq!(resolve_sort_column(Some("annual_revenue")).unwrap(), "annual_revenue");
        for hostile in ["price; DROP TABLE deals", "id desc", "1", "title--", "a.b"] {
            let err = resolve_sort_column(Some(hostile)).unwrap_err();
            assert!(err.is_invalid_input());
        }
    }

    #[test]
    fn ascending_sort_and_id_tiebreak() {
        let filters = ListingFilters {
            sort_by: Some("revenue".into()),
            sort_direction: SortDirection::Asc,
            ..ListingFilters::default()
        };
        let query = builder(SqlDialect::Sqlite).search(&filters).unwrap();
        assert!(
            query
                .page
                .sql
                .contains("ORDER BY annual_revenue ASC NULLS LAST, id ASC")
        );

        let by_id = ListingFilters {
            sort_by: Some("id".into()),
            ..ListingFilters::default()
        };
        let query = builder(SqlDialect::Sqlite).search(&by_id).unwrap();
        assert!(query.page.sql.contains("ORDER BY id DESC NULLS LAST LIMIT"));
    }

    #[test]
    fn lookup_by_id_skips_the_heuristic() {
        let stmt = builder(SqlDialect::Postgres).by_id("bbs-42");
        assert_eq!(
            stmt.sql,
            format!("SELECT {LISTING_COLUMNS} FROM business_listings WHERE id = $1 LIMIT 1")
        );
        assert_eq!(stmt.params, vec![QueryParam::Text("bbs-42".into())]);
    }

    #[test]
    fn table_names_are_validated() {
        assert!(ListingQueryBuilder::new(SqlDialect::Postgres, "").is_err());
        assert!(ListingQueryBuilder::new(SqlDialect::Postgres, "listings; drop").is_err());
        assert!(ListingQueryBuilder::new(SqlDialect::Postgres, "my-table").is_err());
        assert!(ListingQueryBuilder::new(SqlDialect::BigQuery, "my-proj.ds.view").is_ok());
    }

    #[test]
    fn keywords_are_safe_sql_literals() {
        for kw in INCLUDE.iter().chain(EXCLUDE).chain(AMAZON_FBA) {
            assert!(!kw.contains(['\'', '%', '_', '\\']), "{kw}");
        }
    }
}
