use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use entity::business_listing;
use migration::{Migrator, MigratorTrait};
use products_listings::{
    DatabaseListingSource, ListingError, ListingFilters, ListingPage, ListingQueryParams,
    ListingSource, SortDirection,
};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database, DatabaseConnection};

struct Fixture {
    id: &'static str,
    title: &'static str,
    industry: Option<&'static str>,
    source: &'static str,
    price: Option<f64>,
    revenue: Option<f64>,
    cash_flow: Option<f64>,
    days_ago: i64,
}

const FIXTURES: &[Fixture] = &[
    Fixture {
        id: "bbs-1",
        title: "Amazon FBA kitchen brand",
        industry: Some("E-commerce"),
        source: "bizbuysell",
        price: Some(850_000.0),
        revenue: Some(1_400_000.0),
        cash_flow: Some(260_000.0),
        days_ago: 1,
    },
    Fixture {
        id: "fl-2",
        title: "B2B SaaS for dentists' scheduling",
        industry: Some("Software"),
        source: "flippa",
        price: Some(1_200_000.0),
        revenue: Some(480_000.0),
        cash_flow: Some(300_000.0),
        days_ago: 2,
    },
    Fixture {
        id: "fl-3",
        title: "Content website in personal finance",
        industry: Some("Digital media"),
        source: "flippa",
        price: Some(95_000.0),
        revenue: Some(40_000.0),
        cash_flow: Some(31_000.0),
        days_ago: 3,
    },
    Fixture {
        id: "bbs-4",
        title: "Restaurant with online ordering website",
        industry: Some("Food service"),
        source: "bizbuysell",
        price: Some(400_000.0),
        revenue: Some(900_000.0),
        cash_flow: Some(120_000.0),
        days_ago: 4,
    },
    Fixture {
        id: "bbs-5",
        title: "HVAC contractor",
        industry: Some("Home services"),
        source: "bizbuysell",
        price: Some(2_000_000.0),
        revenue: Some(3_000_000.0),
        cash_flow: Some(500_000.0),
        days_ago: 5,
    },
    Fixture {
        id: "ef-6",
        title: "Shopify dropship store, price on request",
        industry: None,
        source: "empireflippers",
        price: None,
        revenue: Some(210_000.0),
        cash_flow: None,
        days_ago: 6,
    },
];

fn scraped(days_ago: i64) -> DateTime<FixedOffset> {
    let base = Utc.with_ymd_and_hms(2026, 9, 30, 12, 0, 0).unwrap();
    (base - Duration::days(days_ago)).fixed_offset()
}

async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    for f in FIXTURES {
        business_listing::ActiveModel {
            id: Set(f.id.to_string()),
            source_site: Set(f.source.to_string()),
            title: Set(f.title.to_string()),
            asking_price: Set(f.price),
            annual_revenue: Set(f.revenue),
            cash_flow: Set(f.cash_flow),
            valuation_multiple: Set(None),
            industry: Set(f.industry.map(str::to_string)),
            location: Set(Some("Austin, TX".to_string())),
            description: Set(None),
            listing_url: Set(Some(format!("https://listings.example/{}", f.id))),
            scraped_at: Set(Some(scraped(f.days_ago))),
        }
        .insert(&db)
        .await
        .unwrap();
    }
    db
}

fn ids(page: &ListingPage) -> Vec<&str> {
    page.listings.iter().map(|l| l.id.as_str()).collect()
}

#[tokio::test]
async fn exclusions_win_and_default_sort_is_newest_first() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let page = source.search(&ListingFilters::default()).await.unwrap();
    assert_eq!(ids(&page), vec!["bbs-1", "fl-2", "fl-3", "ef-6"]);
    assert_eq!(page.total, 4);
    assert_eq!((page.offset, page.limit), (0, 20));
}

#[tokio::test]
async fn heuristic_can_be_disabled() {
    let source = DatabaseListingSource::new(setup().await, false).unwrap();
    let page = source.search(&ListingFilters::default()).await.unwrap();
    assert_eq!(page.total, FIXTURES.len() as u64);
}

#[tokio::test]
async fn results_respect_price_and_revenue_bounds() {
    let source = DatabaseListingSource::new(setup().await, false).unwrap();
    let filters = ListingFilters {
        min_price: Some(100_000.0),
        max_price: Some(1_500_000.0),
        min_revenue: Some(400_000.0),
        ..ListingFilters::default()
    };
    let page = source.search(&filters).await.unwrap();
    assert!(!page.listings.is_empty());
    for listing in &page.listings {
        let price = listing.price.unwrap();
        let revenue = listing.revenue.unwrap();
        assert!((100_000.0..=1_500_000.0).contains(&price), "{listing:?}");
        assert!(revenue >= 400_000.0, "{listing:?}");
    }
    assert_eq!(page.total, page.listings.len() as u64);
}

#[tokio::test]
async fn total_ignores_pagination() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let first = source
        .search(&ListingFilters {
            limit: 2,
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    let second = source
        .search(&ListingFilters {
            limit: 2,
            offset: 2,
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(second.total, 4);
    assert_eq!(ids(&first), vec!["bbs-1", "fl-2"]);
    assert_eq!(ids(&second), vec!["fl-3", "ef-6"]);
}

#[tokio::test]
async fn sort_direction_is_respected_with_nulls_last() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let asc = source
        .search(&ListingFilters {
            sort_by: Some("price".into()),
            sort_direction: SortDirection::Asc,
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&asc), vec!["fl-3", "bbs-1", "fl-2", "ef-6"]);

    let desc = source
        .search(&ListingFilters {
            sort_by: Some("price".into()),
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&desc), vec!["fl-2", "bbs-1", "fl-3", "ef-6"]);
}

#[tokio::test]
async fn identifier_sort_passes_through_to_the_column() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let page = source
        .search(&ListingFilters {
            sort_by: Some("annual_revenue".into()),
            sort_direction: SortDirection::Asc,
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["fl-3", "ef-6", "fl-2", "bbs-1"]);

    let missing_column = source
        .search(&ListingFilters {
            sort_by: Some("no_such_column".into()),
            ..ListingFilters::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(missing_column, ListingError::Database(_)));

    let hostile = source
        .search(&ListingFilters {
            sort_by: Some("title; DROP TABLE deals".into()),
            ..ListingFilters::default()
        })
        .await
        .unwrap_err();
    assert!(hostile.is_invalid_input());
}

#[tokio::test]
async fn text_filters_are_case_insensitive() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let params = ListingQueryParams {
        source: Some("FLIPPA".into()),
        search_term: Some("finance".into()),
        ..ListingQueryParams::default()
    };
    let page = source
        .search(&ListingFilters::try_from(params).unwrap())
        .await
        .unwrap();
    assert_eq!(ids(&page), vec!["fl-3"]);

    let by_industry = source
        .search(&ListingFilters {
            industry: Some("soft".into()),
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&by_industry), vec!["fl-2"]);
}

#[tokio::test]
async fn amazon_fba_flag_filters_both_ways() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let fba = source
        .search(&ListingFilters {
            is_amazon_fba: Some(true),
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&fba), vec!["bbs-1"]);

    let not_fba = source
        .search(&ListingFilters {
            is_amazon_fba: Some(false),
            ..ListingFilters::default()
        })
        .await
        .unwrap();
    assert_eq!(ids(&not_fba), vec!["fl-2", "fl-3", "ef-6"]);
}

#[tokio::test]
async fn get_by_id_skips_the_heuristic() {
    let source = DatabaseListingSource::new(setup().await, true).unwrap();
    let listing = source.get("bbs-4").await.unwrap().expect("listing");
    assert_eq!(listing.title, "Restaurant with online ordering website");
    assert_eq!(listing.multiple, Some(3.33));
    assert_eq!(listing.source.as_deref(), Some("bizbuysell"));
    assert_eq!(listing.scraped_at, Some(scraped(4)));
    assert!(source.get("missing").await.unwrap().is_none());
}
