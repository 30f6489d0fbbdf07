#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use platform_storage::MemoryStorage;
use products_listings::{Listing, ListingFilters, ListingPage, ListingResult, ListingSource};
use sea_orm::{Database, DatabaseConnection};
use serde_json::Value;

pub async fn setup_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:")
        .await
        .expect("connect sqlite");
    Migrator::up(&db, None).await.expect("migrate");
    db
}

pub fn object(value: Value) -> serde_json::Map<String, Value> {
    value.as_object().cloned().expect("json object")
}

/// Listing source backed by a map.
#[derive(Default)]
pub struct StubListings {
    listings: Mutex<HashMap<String, Listing>>,
}

impl StubListings {
    pub fn with(listings: Vec<Listing>) -> Self {
        let map = listings
            .into_iter()
            .map(|listing| (listing.id.clone(), listing))
            .collect();
        Self {
            listings: Mutex::new(map),
        }
    }
}

#[async_trait]
impl ListingSource for StubListings {
    fn backend(&self) -> &'static str {
        "stub"
    }

    async fn search(&self, filters: &ListingFilters) -> ListingResult<ListingPage> {
        let listings: Vec<Listing> = self.listings.lock().unwrap().values().cloned().collect();
        Ok(ListingPage {
            total: listings.len() as u64,
            listings,
            offset: filters.offset,
            limit: filters.limit,
        })
    }

    async fn get(&self, id: &str) -> ListingResult<Option<Listing>> {
        Ok(self.listings.lock().unwrap().get(id).cloned())
    }
}

pub fn listing(id: &str, title: &str) -> Listing {
    Listing {
        id: id.to_string(),
        title: title.to_string(),
        price: Some(850_000.0),
        revenue: Some(1_400_000.0),
        cash_flow: Some(260_000.0),
        multiple: Some(3.27),
        industry: Some("E-commerce".into()),
        location: Some("Austin, TX".into()),
        description: Some("Amazon FBA kitchen brand, 40 ASINs".into()),
        source: Some("bizbuysell".into()),
        url: Some(format!("https://www.bizbuysell.com/listing/{id}")),
        scraped_at: None,
    }
}

pub fn memory_store() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::default())
}
