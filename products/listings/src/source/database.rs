use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, FromQueryResult, Statement, Value,
};
use tracing::{Instrument, info_span};

use crate::{
    Listing, ListingError, ListingFilters, ListingPage, ListingQueryBuilder, ListingResult,
    ListingRow, ListingSource, SqlDialect, SqlStatement,
};

pub const DEFAULT_TABLE: &str = "business_listings";

/// Reads listings from the application database.
#[derive(Clone, Debug)]
pub struct DatabaseListingSource {
    db: DatabaseConnection,
    builder: ListingQueryBuilder,
}

impl DatabaseListingSource {
    pub fn new(db: DatabaseConnection, online_only: bool) -> ListingResult<Self> {
        Self::with_table(db, DEFAULT_TABLE, online_only)
    }

    pub fn with_table(
        db: DatabaseConnection,
        table: &str,
        online_only: bool,
    ) -> ListingResult<Self> {
        let dialect = match db.get_database_backend() {
            DatabaseBackend::Postgres => SqlDialect::Postgres,
            DatabaseBackend::Sqlite => SqlDialect::Sqlite,
            DatabaseBackend::MySql => {
                return Err(ListingError::Config(
                    "MySQL is not a supported listings database".into(),
                ));
            }
        };
        let builder = ListingQueryBuilder::new(dialect, table)?.online_only(online_only);
        Ok(Self { db, builder })
    }

    fn statement(&self, stmt: SqlStatement) -> Statement {
        let values: Vec<Value> = stmt.params.into_iter().map(Value::from).collect();
        Statement::from_sql_and_values(self.db.get_database_backend(), stmt.sql, values)
    }
}

#[async_trait]
impl ListingSource for DatabaseListingSource {
    fn backend(&self) -> &'static str {
        "database"
    }

    async fn search(&self, filters: &ListingFilters) -> ListingResult<ListingPage> {
        let query = self.builder.search(filters)?;
        let span = info_span!(
            "listings.search",
            backend = "database",
            params = query.page.params.len(),
            limit = query.limit,
            offset = query.offset
        );
        let (limit, offset) = (query.limit, query.offset);
        let page_stmt = self.statement(query.page);
        let count_stmt = self.statement(query.count);
        async move {
            let (rows, count) = tokio::try_join!(
                ListingRow::find_by_statement(page_stmt).all(&self.db),
                self.db.query_one(count_stmt),
            )?;
            let total = match count {
                Some(row) => row.try_get::<i64>("", "total")?,
                None => 0,
            };
            tracing::debug!(rows = rows.len(), total, "listing page loaded");
            Ok::<_, ListingError>(ListingPage {
                listings: rows.into_iter().map(Listing::from).collect(),
                total: total.max(0) as u64,
                offset,
                limit,
            })
        }
        .instrument(span)
        .await
    }

    async fn get(&self, id: &str) -> ListingResult<Option<Listing>> {
        let stmt = self.statement(self.builder.by_id(id));
        let row = ListingRow::find_by_statement(stmt)
            .one(&self.db)
            .instrument(info_span!("listings.get", backend = "database", id))
            .await?;
        Ok(row.map(Listing::from))
    }
}
