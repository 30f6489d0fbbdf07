use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use products_listings::{
    BigQueryConfig, BigQueryCredentials, BigQueryListingSource, ListingError, ListingFilters,
    ListingSource,
};
use serde_json::{Value, json};
use tokio::net::TcpListener;

const TOKEN: &str = "static-test-token";

#[derive(Clone, Default)]
struct FakeBigQuery {
    /// Polls answered before the page job reports completion.
    polls_until_done: u32,
    polls: Arc<AtomicU32>,
    bodies: Arc<Mutex<Vec<Value>>>,
}

fn listing_schema() -> Value {
    json!({
        "fields": [
            {"name": "id", "type": "STRING"},
            {"name": "source_site", "type": "STRING"},
            {"name": "title", "type": "STRING"},
            {"name": "asking_price", "type": "FLOAT"},
            {"name": "annual_revenue", "type": "FLOAT"},
            {"name": "cash_flow", "type": "FLOAT"},
            {"name": "valuation_multiple", "type": "FLOAT"},
            {"name": "industry", "type": "STRING"},
            {"name": "location", "type": "STRING"},
            {"name": "description", "type": "STRING"},
            {"name": "listing_url", "type": "STRING"},
            {"name": "scraped_at", "type": "TIMESTAMP"}
        ]
    })
}

fn page_result() -> Value {
    json!({
        "jobComplete": true,
        "schema": listing_schema(),
        "rows": [
            {"f": [
                {"v": "fl-9"}, {"v": "flippa"}, {"v": "Newsletter business"},
                {"v": "120000"}, {"v": "60000"}, {"v": "40000"}, {"v": null},
                {"v": "Digital media"}, {"v": null}, {"v": null},
                {"v": "https://flippa.example/9"}, {"v": "1.7040672E9"}
            ]}
        ]
    })
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

fn unauthorized() -> (StatusCode, Json<Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"code": 401, "message": "Request had invalid authentication credentials."}})),
    )
}

async fn run_query(
    State(fake): State<FakeBigQuery>,
    Path(_project): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    let sql = body["query"].as_str().unwrap_or_default().to_string();
    fake.bodies.lock().unwrap().push(body);
    if sql.starts_with("SELECT COUNT(*)") {
        return (
            StatusCode::OK,
            Json(json!({
                "jobComplete": true,
                "schema": {"fields": [{"name": "total", "type": "INTEGER"}]},
                "rows": [{"f": [{"v": "7"}]}]
            })),
        );
    }
    if sql.contains("WHERE id = @p0") {
        return (
            StatusCode::OK,
            Json(json!({"jobComplete": true, "schema": listing_schema()})),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "jobComplete": false,
            "jobReference": {"projectId": "acme", "jobId": "job-42", "location": "US"}
        })),
    )
}

async fn poll_results(
    State(fake): State<FakeBigQuery>,
    Path((_project, job_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return unauthorized();
    }
    assert_eq!(job_id, "job-42");
    let seen = fake.polls.fetch_add(1, Ordering::SeqCst) + 1;
    if seen < fake.polls_until_done {
        return (
            StatusCode::OK,
            Json(json!({"jobComplete": false, "jobReference": {"jobId": "job-42"}})),
        );
    }
    (StatusCode::OK, Json(page_result()))
}

async fn spawn(fake: FakeBigQuery) -> String {
    let app = Router::new()
        .route("/projects/{project}/queries", post(run_query))
        .route("/projects/{project}/queries/{job_id}", get(poll_results))
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn source(base: String, token: &str, max_polls: u32) -> BigQueryListingSource {
    let mut config = BigQueryConfig::new(
        "acme",
        "acme.listings.business_listings",
        BigQueryCredentials::AccessToken(token.to_string()),
    );
    config.api_base = base;
    config.location = Some("US".into());
    config.max_polls = max_polls;
    config.request_timeout = Duration::from_secs(5);
    BigQueryListingSource::new(config).unwrap()
}

#[tokio::test]
async fn search_polls_until_the_job_completes() {
    let fake = FakeBigQuery {
        polls_until_done: 2,
        ..FakeBigQuery::default()
    };
    let base = spawn(fake.clone()).await;
    let filters = ListingFilters {
        min_price: Some(50_000.0),
        industry: Some("Digital".into()),
        ..ListingFilters::default()
    };
    let page = source(base, TOKEN, 5).search(&filters).await.unwrap();

    assert_eq!(page.total, 7);
    assert_eq!(page.listings.len(), 1);
    let listing = &page.listings[0];
    assert_eq!(listing.id, "fl-9");
    assert_eq!(listing.price, Some(120_000.0));
    assert_eq!(listing.multiple, Some(3.0));
    assert_eq!(
        listing.scraped_at.map(|ts| ts.to_rfc3339()),
        Some("2024-01-01T00:00:00+00:00".to_string())
    );
    assert_eq!(fake.polls.load(Ordering::SeqCst), 2);

    let bodies = fake.bodies.lock().unwrap();
    assert_eq!(bodies.len(), 2);
    for body in bodies.iter() {
        assert_eq!(body["parameterMode"], "NAMED");
        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["location"], "US");
        assert_eq!(body["queryParameters"][0]["name"], "p0");
        assert_eq!(body["queryParameters"][0]["parameterType"]["type"], "FLOAT64");
        assert_eq!(body["queryParameters"][1]["parameterValue"]["value"], "%digital%");
        assert!(
            body["query"]
                .as_str()
                .unwrap()
                .contains("FROM `acme.listings.business_listings`")
        );
    }
}

#[tokio::test]
async fn polling_gives_up_after_the_configured_attempts() {
    let fake = FakeBigQuery {
        polls_until_done: u32::MAX,
        ..FakeBigQuery::default()
    };
    let base = spawn(fake.clone()).await;
    let err = source(base, TOKEN, 3)
        .search(&ListingFilters::default())
        .await
        .unwrap_err();
    match err {
        ListingError::JobIncomplete { job_id, attempts } => {
            assert_eq!(job_id, "job-42");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(fake.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn api_errors_carry_status_and_message() {
    let base = spawn(FakeBigQuery::default()).await;
    let err = source(base, "wrong-token", 3)
        .get("fl-9")
        .await
        .unwrap_err();
    match err {
        ListingError::BigQuery { status, message } => {
            assert_eq!(status, 401);
            assert!(message.contains("invalid authentication"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn missing_listing_is_none() {
    let fake = FakeBigQuery::default();
    let base = spawn(fake.clone()).await;
    let found = source(base, TOKEN, 3).get("nope").await.unwrap();
    assert!(found.is_none());
    let bodies = fake.bodies.lock().unwrap();
    assert_eq!(bodies[0]["queryParameters"][0]["parameterValue"]["value"], "nope");
}
