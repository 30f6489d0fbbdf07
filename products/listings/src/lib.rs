//! Business-for-sale listings.
//!
//! Listings are scraped elsewhere and land either in a BigQuery view or in the
//! `business_listings` table. This crate turns HTTP-style filters into one
//! parameterized page query plus a mirrored count query, runs them against
//! whichever source is configured, and shapes rows into [`Listing`]s.

mod error;
mod filters;
pub mod keywords;
mod model;
mod query;
pub mod source;

pub use error::{ListingError, ListingResult};
pub use filters::{
    DEFAULT_LIMIT, ListingFilters, ListingQueryParams, MAX_LIMIT, SortDirection,
};
pub use model::{Listing, ListingPage, ListingRow};
pub use query::{
    ListingQuery, ListingQueryBuilder, QueryParam, SqlDialect, SqlStatement, resolve_sort_column,
};
pub use source::{
    ListingSource,
    bigquery::{BigQueryConfig, BigQueryCredentials, BigQueryListingSource, ServiceAccountKey},
    database::DatabaseListingSource,
};
