use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use anyhow::Context;
use async_graphql::http::GraphiQLSource;
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{self, HeaderMap, HeaderName, HeaderValue, Method},
    response::{Html, IntoResponse},
    routing::get,
};
use platform_api::{ApiError, ApiResult};
use platform_db::DbPool;
use products_crm::CrmSchema;
use products_listings::{
    Listing, ListingError, ListingFilters, ListingPage, ListingQueryParams, ListingSource,
};
use sea_orm::{ConnectionTrait, Statement};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, info};

use crate::auth::{JwtVerifier, bearer_token};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub schema: CrmSchema,
    pub listings: Arc<dyn ListingSource>,
    pub verifier: Arc<JwtVerifier>,
    pub cors_allowed_origins: Arc<Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    addr: SocketAddr,
}

impl ServeConfig {
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            addr: SocketAddr::from((host, port)),
        }
    }
}

pub async fn serve(config: ServeConfig, state: AppState) -> anyhow::Result<()> {
    let backend = state.listings.backend();
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.addr))?;

    info!(%config.addr, listings = backend, "deal desk listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect::<Vec<_>>();
    let allow_origin = if allowed.is_empty() {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed)
    };
    CorsLayer::new()
        .allow_headers([http::header::CONTENT_TYPE, http::header::AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_origin(allow_origin)
}

pub fn build_router(state: AppState) -> Router {
    let header_name = HeaderName::from_static("x-request-id");
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/listings",
            get(list_listings_handler).fallback(method_not_allowed),
        )
        .route(
            "/api/listings/{id}",
            get(get_listing_handler).fallback(method_not_allowed),
        )
        .route("/graphql", get(graphql_handler).post(graphql_handler))
        .route("/graphiql", get(graphiql_handler))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(header_name.clone(), MakeRequestUuid))
                .layer(PropagateRequestIdLayer::new(header_name))
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.cors_allowed_origins)),
        )
        .with_state(state)
}

async fn list_listings_handler(
    State(state): State<AppState>,
    params: Result<Query<ListingQueryParams>, QueryRejection>,
) -> ApiResult<Json<ListingPage>> {
    let Query(params) = params.map_err(|err| ApiError::invalid(err.body_text()))?;
    let filters = ListingFilters::try_from(params).map_err(listing_error("Failed to fetch listings"))?;
    let page = state
        .listings
        .search(&filters)
        .await
        .map_err(listing_error("Failed to fetch listings"))?;
    Ok(Json(page))
}

async fn get_listing_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Listing>> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::invalid("listing id is required"));
    }
    state
        .listings
        .get(id)
        .await
        .map_err(listing_error("Failed to fetch listing"))?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Listing not found"))
}

fn listing_error(summary: &'static str) -> impl Fn(ListingError) -> ApiError {
    move |err| match err {
        ListingError::InvalidInput(msg) => ApiError::invalid(msg),
        other => ApiError::internal_with(summary, other.into()),
    }
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn graphql_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: GraphQLRequest,
) -> GraphQLResponse {
    let mut request = request.into_inner();
    if let Some(token) = bearer_token(&headers) {
        match state.verifier.current_user(token) {
            Ok(user) => request = request.data(user),
            Err(err) => debug!(error = %err, "rejected bearer token"),
        }
    }
    state.schema.execute(request).await.into()
}

async fn graphiql_handler() -> impl IntoResponse {
    Html(GraphiQLSource::build().endpoint("/graphql").finish())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let backend = state.pool.get_database_backend();
    let db_ok = state
        .pool
        .execute(Statement::from_string(backend, "SELECT 1".to_string()))
        .await
        .is_ok();
    Json(HealthResponse {
        ok: db_ok,
        db_ok,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    ok: bool,
    db_ok: bool,
    version: &'static str,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    ctrl_c.await;

    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    };
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use migration::{Migrator, MigratorTrait};
    use platform_storage::MemoryStorage;
    use products_crm::{CrmSettings, build_schema, seed_demo};
    use products_listings::DatabaseListingSource;
    use sea_orm::Database;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::issue_token;

    const SECRET: &str = "test-secret";

    async fn app(seed_user: Uuid) -> Router {
        let pool = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&pool, None).await.unwrap();
        seed_demo(&pool, seed_user).await.unwrap();
        let listings: Arc<dyn ListingSource> =
            Arc::new(DatabaseListingSource::new(pool.clone(), false).unwrap());
        let schema = build_schema(
            Arc::new(pool.clone()),
            Arc::new(MemoryStorage::default()),
            listings.clone(),
            CrmSettings::default(),
        )
        .0;
        build_router(AppState {
            pool,
            schema,
            listings,
            verifier: Arc::new(JwtVerifier::new(SECRET)),
            cors_allowed_origins: Arc::new(vec!["http://localhost:5173".into()]),
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, headers, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn graphql(query: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/graphql")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Body::from(json!({ "query": query }).to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_database_and_request_id() {
        let app = app(Uuid::new_v4()).await;
        let (status, headers, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["dbOk"], json!(true));
        assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
        assert!(headers.contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn listings_respect_bounds_and_sort() {
        let app = app(Uuid::new_v4()).await;
        let (status, _, body) = send(
            &app,
            get("/api/listings?minPrice=300000&sortBy=price&sortDirection=asc&limit=10"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["total"], json!(4));
        assert_eq!(body["limit"], json!(10));
        let prices: Vec<f64> = body["listings"]
            .as_array()
            .unwrap()
            .iter()
            .map(|l| l["price"].as_f64().unwrap())
            .collect();
        assert_eq!(prices, vec![330_000.0, 480_000.0, 640_000.0, 1_250_000.0]);

        let (_, _, body) = send(&app, get("/api/listings?limit=2&offset=1")).await;
        assert_eq!(body["total"], json!(5));
        assert_eq!(body["offset"], json!(1));
        assert_eq!(body["listings"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn malformed_listing_params_are_bad_requests() {
        let app = app(Uuid::new_v4()).await;
        let (status, _, body) = send(&app, get("/api/listings?minPrice=cheap")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], json!("Invalid request"));
        assert!(body["details"].as_str().unwrap().contains("minPrice"));

        let (status, _, body) = send(&app, get("/api/listings?sortBy=price;drop")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].as_str().unwrap().contains("sortBy"));
    }

    #[tokio::test]
    async fn listings_reject_other_methods() {
        let app = app(Uuid::new_v4()).await;
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/listings")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({ "error": "method not allowed" }));
    }

    #[tokio::test]
    async fn single_listing_and_not_found() {
        let app = app(Uuid::new_v4()).await;
        let (status, _, body) = send(&app, get("/api/listings/demo-fl-2002")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], json!("B2B SaaS invoicing tool"));
        assert_eq!(body["source"], json!("flippa"));

        let (status, _, body) = send(&app, get("/api/listings/nope")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({ "error": "Listing not found" }));
    }

    #[tokio::test]
    async fn graphql_requires_a_valid_bearer_token() {
        let user = Uuid::new_v4();
        let app = app(user).await;
        let query = "{ crm { deals { businessName } } }";

        let (status, _, body) = send(&app, graphql(query, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["errors"][0]["extensions"]["code"], json!("UNAUTHENTICATED"));

        let forged = issue_token("wrong-secret", user, 600);
        let (_, _, body) = send(&app, graphql(query, Some(&forged))).await;
        assert_eq!(body["errors"][0]["extensions"]["code"], json!("UNAUTHENTICATED"));

        let token = issue_token(SECRET, user, 600);
        let (_, _, body) = send(&app, graphql(query, Some(&token))).await;
        assert!(body.get("errors").is_none(), "{body}");
        assert_eq!(body["data"]["crm"]["deals"].as_array().unwrap().len(), 3);

        let stranger = issue_token(SECRET, Uuid::new_v4(), 600);
        let (_, _, body) = send(&app, graphql(query, Some(&stranger))).await;
        assert_eq!(body["data"]["crm"]["deals"], json!([]));
    }

    #[tokio::test]
    async fn graphiql_serves_html() {
        let app = app(Uuid::new_v4()).await;
        let response = app.oneshot(get("/graphiql")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
    }
}
