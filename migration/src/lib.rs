pub use sea_orm_migration::prelude::*;

mod m20261001_000001_business_listings;
mod m20261001_000002_deals;
mod m20261001_000003_deal_workspace;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_business_listings::Migration),
            Box::new(m20261001_000002_deals::Migration),
            Box::new(m20261001_000003_deal_workspace::Migration),
        ]
    }
}
