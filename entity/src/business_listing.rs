use sea_orm::entity::prelude::*;

/// Scraped business-for-sale record. Rows are written by the external
/// scraper; the application only reads them.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "business_listings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    #[sea_orm(indexed)]
    pub source_site: String,
    pub title: String,
    pub asking_price: Option<f64>,
    pub annual_revenue: Option<f64>,
    pub cash_flow: Option<f64>,
    pub valuation_multiple: Option<f64>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub listing_url: Option<String>,
    pub scraped_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
