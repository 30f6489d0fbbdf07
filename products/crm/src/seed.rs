//! Demo data for local development (`deal-desk seed`).

use chrono::Utc;
use entity::{business_listing, deal};
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    prelude::DateTimeWithTimeZone, sea_query::OnConflict,
};
use serde_json::json;
use uuid::Uuid;

use crate::{
    deals,
    error::CrmResult,
    favorites,
    fields::JsonObject,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub listings: usize,
    pub deals: usize,
}

type DemoListing = (
    &'static str,
    &'static str,
    &'static str,
    f64,
    f64,
    f64,
    &'static str,
    &'static str,
);

const DEMO_LISTINGS: [DemoListing; 5] = [
    (
        "demo-bbs-1001",
        "bizbuysell",
        "Amazon FBA pet supplements brand",
        1_250_000.0,
        900_000.0,
        310_000.0,
        "E-commerce",
        "Austin, TX",
    ),
    (
        "demo-fl-2002",
        "flippa",
        "B2B SaaS invoicing tool",
        640_000.0,
        280_000.0,
        160_000.0,
        "SaaS",
        "Remote",
    ),
    (
        "demo-qls-3003",
        "quietlight",
        "Home fitness content site",
        210_000.0,
        95_000.0,
        70_000.0,
        "Content",
        "Remote",
    ),
    (
        "demo-ef-4004",
        "empireflippers",
        "Shopify outdoor gear store",
        480_000.0,
        1_100_000.0,
        150_000.0,
        "E-commerce",
        "Denver, CO",
    ),
    (
        "demo-bbs-5005",
        "bizbuysell",
        "Online newsletter for dentists",
        330_000.0,
        140_000.0,
        105_000.0,
        "Media",
        "Remote",
    ),
];

/// Inserts demo listings (skipping existing ids) and, when `user_id` has no
/// deals yet, a small pipeline spread across stages.
pub async fn seed_demo(db: &DatabaseConnection, user_id: Uuid) -> CrmResult<SeedSummary> {
    let seeded_at: DateTimeWithTimeZone = Utc::now().into();
    let rows = DEMO_LISTINGS.iter().map(
        |(id, site, title, price, revenue, cash_flow, industry, location)| {
            business_listing::ActiveModel {
                id: Set((*id).to_string()),
                source_site: Set((*site).to_string()),
                title: Set((*title).to_string()),
                asking_price: Set(Some(*price)),
                annual_revenue: Set(Some(*revenue)),
                cash_flow: Set(Some(*cash_flow)),
                valuation_multiple: Set(Some((price / cash_flow * 100.0).round() / 100.0)),
                industry: Set(Some((*industry).to_string())),
                location: Set(Some((*location).to_string())),
                description: Set(Some(format!("{title}. Seller is motivated, online business."))),
                listing_url: Set(Some(format!("https://{site}.example/listing/{id}"))),
                scraped_at: Set(Some(seeded_at)),
            }
        },
    );
    business_listing::Entity::insert_many(rows)
        .on_conflict(
            OnConflict::column(business_listing::Column::Id)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;

    let existing = deal::Entity::find()
        .filter(deal::Column::UserId.eq(user_id))
        .count(db)
        .await?;
    if existing > 0 {
        tracing::info!(%user_id, existing, "user already has deals, skipping deal seed");
        return Ok(SeedSummary {
            listings: DEMO_LISTINGS.len(),
            deals: 0,
        });
    }

    let demo_deals = [
        (
            json!({
                "business_name": "Amazon FBA pet supplements brand",
                "listing_id": "demo-bbs-1001",
                "asking_price": "$1,250,000",
                "annual_revenue": 900000,
                "cash_flow": "310k",
                "multiple": "4.03x",
                "industry": "E-commerce",
                "broker_company": "BizBuySell",
                "asin_count": 42,
                "marketplaces": ["US", "CA"],
                "priority": "high"
            }),
            Some(deal::Stage::DueDiligence),
        ),
        (
            json!({
                "name": "B2B SaaS invoicing tool",
                "price": 640000,
                "revenue": 280000,
                "sde": 160000,
                "industry": "SaaS",
                "ttm_revenue": 280000,
                "closeDate": "2026-12-15"
            }),
            Some(deal::Stage::NdaSigned),
        ),
        (
            json!({
                "title": "Shopify outdoor gear store",
                "price": "480k",
                "revenue": "1.1M",
                "industry": "E-commerce",
                "notes": "Seasonal; check Q4 inventory levels."
            }),
            None,
        ),
    ];

    let mut created = 0;
    for (input, stage) in demo_deals {
        let input: JsonObject = input.as_object().cloned().unwrap_or_default();
        let payload = deals::create_deal(db, user_id, &input).await?;
        if let Some(stage) = stage {
            deals::move_deal_stage(db, user_id, payload.deal.id, stage, Some("Seeded".into())).await?;
        }
        created += 1;
    }
    favorites::add_favorite(db, user_id, "demo-qls-3003").await?;
    tracing::info!(%user_id, deals = created, "demo data seeded");
    Ok(SeedSummary {
        listings: DEMO_LISTINGS.len(),
        deals: created,
    })
}
