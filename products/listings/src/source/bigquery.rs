//! BigQuery REST source.
//!
//! Statements go through `jobs.query` with named parameters. When the job is
//! still running after the synchronous wait, `getQueryResults` is polled a
//! bounded number of times. Rows come back in the `f`/`v` cell format and
//! are decoded by schema field name.

use std::{
    path::Path,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tokio::sync::Mutex;
use tracing::{Instrument, info_span};

use crate::{
    Listing, ListingError, ListingFilters, ListingPage, ListingQueryBuilder, ListingResult,
    ListingRow, ListingSource, QueryParam, SqlDialect, SqlStatement,
};

pub const DEFAULT_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: u64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> ListingResult<Self> {
        serde_json::from_str(raw)
            .map_err(|err| ListingError::Config(format!("invalid service account key: {err}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> ListingResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            ListingError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }
}

#[derive(Clone)]
pub enum BigQueryCredentials {
    /// Pre-issued OAuth access token, used as is.
    AccessToken(String),
    ServiceAccount(ServiceAccountKey),
}

impl std::fmt::Debug for BigQueryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AccessToken(_) => f.write_str("AccessToken(..)"),
            Self::ServiceAccount(key) => f
                .debug_tuple("ServiceAccount")
                .field(&key.client_email)
                .finish(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BigQueryConfig {
    pub project_id: String,
    /// `project.dataset.table` or `dataset.table` of the listings view.
    pub table: String,
    pub location: Option<String>,
    pub credentials: BigQueryCredentials,
    pub online_only: bool,
    pub api_base: String,
    pub request_timeout: Duration,
    /// Server-side wait per `jobs.query` / `getQueryResults` call.
    pub job_timeout: Duration,
    pub max_polls: u32,
}

impl BigQueryConfig {
    pub fn new(
        project_id: impl Into<String>,
        table: impl Into<String>,
        credentials: BigQueryCredentials,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            table: table.into(),
            location: None,
            credentials,
            online_only: true,
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(10),
            max_polls: 10,
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens, exchanging a signed JWT for a service-account
/// key and caching the result until shortly before it expires.
struct TokenProvider {
    credentials: BigQueryCredentials,
    cache: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    fn new(credentials: BigQueryCredentials) -> Self {
        Self {
            credentials,
            cache: Mutex::new(None),
        }
    }

    async fn token(&self, http: &reqwest::Client) -> ListingResult<String> {
        let key = match &self.credentials {
            BigQueryCredentials::AccessToken(token) => return Ok(token.clone()),
            BigQueryCredentials::ServiceAccount(key) => key,
        };
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let assertion = sign_assertion(key, unix_now())?;
        let response = http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let response = check_status(response).await?;
        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(TOKEN_LIFETIME_SECS));
        tracing::debug!(expires_in = lifetime.as_secs(), "bigquery access token refreshed");
        *cache = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(token.access_token)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn sign_assertion(key: &ServiceAccountKey, now: u64) -> ListingResult<String> {
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: READONLY_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + TOKEN_LIFETIME_SECS,
    };
    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|err| ListingError::Config(format!("invalid service account private key: {err}")))?;
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|err| ListingError::Config(format!("failed to sign token assertion: {err}")))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
}

#[derive(Debug, Default, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: JsonValue,
}

#[derive(Debug, Deserialize)]
struct Row {
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<Row>,
}

pub struct BigQueryListingSource {
    http: reqwest::Client,
    config: BigQueryConfig,
    builder: ListingQueryBuilder,
    tokens: TokenProvider,
}

impl std::fmt::Debug for BigQueryListingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQueryListingSource")
            .field("project_id", &self.config.project_id)
            .field("table", &self.config.table)
            .finish_non_exhaustive()
    }
}

impl BigQueryListingSource {
    pub fn new(config: BigQueryConfig) -> ListingResult<Self> {
        if config.project_id.trim().is_empty() {
            return Err(ListingError::Config("BigQuery project id is empty".into()));
        }
        let builder = ListingQueryBuilder::new(SqlDialect::BigQuery, config.table.clone())?
            .online_only(config.online_only);
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let tokens = TokenProvider::new(config.credentials.clone());
        Ok(Self {
            http,
            config,
            builder,
            tokens,
        })
    }

    async fn run(&self, stmt: SqlStatement) -> ListingResult<(Vec<FieldSchema>, Vec<Row>)> {
        let token = self.tokens.token(&self.http).await?;
        let base = self.config.api_base.trim_end_matches('/');
        let project = &self.config.project_id;
        let timeout_ms = self.config.job_timeout.as_millis() as u64;

        let mut body = json!({
            "query": stmt.sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": encode_params(&stmt.params),
            "timeoutMs": timeout_ms,
        });
        if let Some(location) = &self.config.location {
            body["location"] = JsonValue::String(location.clone());
        }

        let response = self
            .http
            .post(format!("{base}/projects/{project}/queries"))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let mut result: QueryResponse = check_status(response).await?.json().await?;

        let mut polls = 0;
        while !result.job_complete {
            let Some(job) = result.job_reference.as_ref() else {
                return Err(ListingError::Decode(
                    "incomplete job without a job reference".into(),
                ));
            };
            if polls >= self.config.max_polls {
                return Err(ListingError::JobIncomplete {
                    job_id: job.job_id.clone(),
                    attempts: polls,
                });
            }
            polls += 1;
            tracing::debug!(job_id = %job.job_id, polls, "waiting on bigquery job");
            let mut request = self
                .http
                .get(format!("{base}/projects/{project}/queries/{}", job.job_id))
                .bearer_auth(&token)
                .query(&[("timeoutMs", timeout_ms.to_string())]);
            if let Some(location) = job.location.as_ref().or(self.config.location.as_ref()) {
                request = request.query(&[("location", location)]);
            }
            let response = request.send().await?;
            result = check_status(response).await?.json().await?;
        }

        let fields = result.schema.unwrap_or_default().fields;
        Ok((fields, result.rows))
    }
}

#[async_trait]
impl ListingSource for BigQueryListingSource {
    fn backend(&self) -> &'static str {
        "bigquery"
    }

    async fn search(&self, filters: &ListingFilters) -> ListingResult<ListingPage> {
        let query = self.builder.search(filters)?;
        let span = info_span!(
            "listings.search",
            backend = "bigquery",
            params = query.page.params.len(),
            limit = query.limit,
            offset = query.offset
        );
        let (limit, offset) = (query.limit, query.offset);
        async move {
            let ((fields, rows), (_, count_rows)) =
                tokio::try_join!(self.run(query.page), self.run(query.count))?;
            let total = count_rows
                .first()
                .and_then(|row| row.f.first())
                .map(|cell| cell_f64(&cell.v).map(|v| v as u64))
                .transpose()?
                .unwrap_or(0);
            let listings = rows
                .iter()
                .map(|row| decode_row(&fields, row).map(Listing::from))
                .collect::<ListingResult<Vec<_>>>()?;
            Ok::<_, ListingError>(ListingPage {
                listings,
                total,
                offset,
                limit,
            })
        }
        .instrument(span)
        .await
    }

    async fn get(&self, id: &str) -> ListingResult<Option<Listing>> {
        let (fields, rows) = self
            .run(self.builder.by_id(id))
            .instrument(info_span!("listings.get", backend = "bigquery", id))
            .await?;
        rows.first()
            .map(|row| decode_row(&fields, row).map(Listing::from))
            .transpose()
    }
}

fn encode_params(params: &[QueryParam]) -> Vec<JsonValue> {
    params
        .iter()
        .enumerate()
        .map(|(index, param)| {
            let (kind, value) = match param {
                QueryParam::Float(v) => ("FLOAT64", v.to_string()),
                QueryParam::Text(v) => ("STRING", v.clone()),
            };
            json!({
                "name": format!("p{index}"),
                "parameterType": { "type": kind },
                "parameterValue": { "value": value },
            })
        })
        .collect()
}

async fn check_status(response: reqwest::Response) -> ListingResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<JsonValue>(&text)
        .ok()
        .and_then(|body| {
            body.pointer("/error/message")
                .or_else(|| body.get("error_description"))
                .and_then(JsonValue::as_str)
                .map(str::to_string)
        })
        .unwrap_or(text);
    Err(ListingError::BigQuery {
        status: status.as_u16(),
        message,
    })
}

fn decode_row(fields: &[FieldSchema], row: &Row) -> ListingResult<ListingRow> {
    let mut out = ListingRow {
        id: String::new(),
        source_site: None,
        title: None,
        asking_price: None,
        annual_revenue: None,
        cash_flow: None,
        valuation_multiple: None,
        industry: None,
        location: None,
        description: None,
        listing_url: None,
        scraped_at: None,
    };
    let mut has_id = false;
    for (field, cell) in fields.iter().zip(&row.f) {
        if cell.v.is_null() {
            continue;
        }
        match field.name.as_str() {
            "id" => {
                out.id = cell_string(&cell.v)?;
                has_id = true;
            }
            "source_site" => out.source_site = Some(cell_string(&cell.v)?),
            "title" => out.title = Some(cell_string(&cell.v)?),
            "asking_price" => out.asking_price = Some(cell_f64(&cell.v)?),
            "annual_revenue" => out.annual_revenue = Some(cell_f64(&cell.v)?),
            "cash_flow" => out.cash_flow = Some(cell_f64(&cell.v)?),
            "valuation_multiple" => out.valuation_multiple = Some(cell_f64(&cell.v)?),
            "industry" => out.industry = Some(cell_string(&cell.v)?),
            "location" => out.location = Some(cell_string(&cell.v)?),
            "description" => out.description = Some(cell_string(&cell.v)?),
            "listing_url" => out.listing_url = Some(cell_string(&cell.v)?),
            "scraped_at" => out.scraped_at = Some(cell_timestamp(&field.field_type, &cell.v)?),
            _ => {}
        }
    }
    if !has_id {
        return Err(ListingError::Decode("row has no id".into()));
    }
    Ok(out)
}

fn cell_string(value: &JsonValue) -> ListingResult<String> {
    match value {
        JsonValue::String(s) => Ok(s.clone()),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Bool(b) => Ok(b.to_string()),
        other => Err(ListingError::Decode(format!("expected scalar, got {other}"))),
    }
}

fn cell_f64(value: &JsonValue) -> ListingResult<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ListingError::Decode(format!("expected number, got {value}")))
}

/// TIMESTAMP cells are epoch seconds as a float string; DATETIME and DATE
/// are civil times and are read as UTC.
fn cell_timestamp(field_type: &str, value: &JsonValue) -> ListingResult<DateTime<FixedOffset>> {
    let bad = || ListingError::Decode(format!("invalid {field_type} value {value}"));
    let utc: DateTime<Utc> = match field_type {
        "TIMESTAMP" => {
            let seconds = cell_f64(value)?;
            let micros = (seconds * 1_000_000.0).round() as i64;
            DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(bad)?
        }
        "DATETIME" => {
            let raw = cell_string(value)?;
            NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map_err(|_| bad())?
                .and_utc()
        }
        "DATE" => {
            let raw = cell_string(value)?;
            NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map_err(|_| bad())?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(bad)?
                .and_utc()
        }
        _ => {
            let raw = cell_string(value)?;
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|_| bad())?
                .with_timezone(&Utc)
        }
    };
    Ok(utc.fixed_offset())
}
