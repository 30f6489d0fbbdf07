use chrono::{DateTime, FixedOffset};
use sea_orm::FromQueryResult;
use serde::{Deserialize, Serialize};

/// Column set selected from `business_listings` or the BigQuery view.
pub(crate) const LISTING_COLUMNS: &str = "id, source_site, title, asking_price, annual_revenue, \
     cash_flow, valuation_multiple, industry, location, description, listing_url, scraped_at";

#[derive(Clone, Debug, PartialEq, FromQueryResult)]
pub struct ListingRow {
    pub id: String,
    pub source_site: Option<String>,
    pub title: Option<String>,
    pub asking_price: Option<f64>,
    pub annual_revenue: Option<f64>,
    pub cash_flow: Option<f64>,
    pub valuation_multiple: Option<f64>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub listing_url: Option<String>,
    pub scraped_at: Option<DateTime<FixedOffset>>,
}

/// Public listing shape served by `/api/listings`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: String,
    pub title: String,
    pub price: Option<f64>,
    pub revenue: Option<f64>,
    pub cash_flow: Option<f64>,
    pub multiple: Option<f64>,
    pub industry: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub source: Option<String>,
    pub url: Option<String>,
    pub scraped_at: Option<DateTime<FixedOffset>>,
}

impl From<ListingRow> for Listing {
    fn from(row: ListingRow) -> Self {
        let multiple = row.valuation_multiple.or_else(|| derived_multiple(&row));
        Listing {
            id: row.id,
            title: row.title.unwrap_or_default(),
            price: row.asking_price,
            revenue: row.annual_revenue,
            cash_flow: row.cash_flow,
            multiple,
            industry: row.industry,
            location: row.location,
            description: row.description,
            source: row.source_site,
            url: row.listing_url,
            scraped_at: row.scraped_at,
        }
    }
}

// price / cash flow, two decimals
fn derived_multiple(row: &ListingRow) -> Option<f64> {
    match (row.asking_price, row.cash_flow) {
        (Some(price), Some(cash_flow)) if cash_flow > 0.0 => {
            Some((price / cash_flow * 100.0).round() / 100.0)
        }
        _ => None,
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    pub listings: Vec<Listing>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}
