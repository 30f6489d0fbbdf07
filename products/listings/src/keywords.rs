//! Keyword heuristic that narrows scraped listings to online businesses.
//!
//! The scraped sources have no shared industry taxonomy, so the listing view
//! is filtered by substring matches over title, industry and description.
//! False positives and negatives are expected. Exclusions always win.

/// At least one of these must appear for a listing to count as online.
pub const INCLUDE: &[&str] = &[
    "ecommerce",
    "e-commerce",
    "fba",
    "amazon",
    "saas",
    "software",
    "online",
    "internet",
    "digital",
    "subscription",
    "website",
    "shopify",
    "dropship",
    "app",
    "content",
    "marketplace",
];

/// Any of these removes the listing, even when an inclusion keyword matched.
pub const EXCLUDE: &[&str] = &[
    "restaurant",
    "hvac",
    "daycare",
    "plumbing",
    "salon",
    "laundromat",
    "car wash",
    "gas station",
    "landscaping",
    "dental",
    "franchise",
    "bar & grill",
    "cafe",
    "construction",
    "trucking",
];

/// Keywords that mark an Amazon FBA business.
pub const AMAZON_FBA: &[&str] = &["amazon", "fba"];
