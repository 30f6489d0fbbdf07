pub mod bigquery;
pub mod database;

use async_trait::async_trait;

use crate::{Listing, ListingFilters, ListingPage, ListingResult};

/// Where listings are read from. Both implementations run the statements
/// produced by [`crate::ListingQueryBuilder`].
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn search(&self, filters: &ListingFilters) -> ListingResult<ListingPage>;

    async fn get(&self, id: &str) -> ListingResult<Option<Listing>>;
}
