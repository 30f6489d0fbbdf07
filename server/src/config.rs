use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use platform_db::DatabaseSettings;
use platform_storage::{DEFAULT_BUCKET, StorageConfig};
use products_crm::CrmSettings;
use products_listings::{BigQueryConfig, BigQueryCredentials, ServiceAccountKey};

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_LOCAL_STORAGE_DIR: &str = "./storage";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub enum ListingsBackend {
    Database,
    BigQuery(Box<BigQueryConfig>),
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseSettings,
    pub jwt_secret: Option<String>,
    pub cors_allowed_origins: Vec<String>,
    pub listings: ListingsBackend,
    pub listings_online_only: bool,
    pub storage: StorageConfig,
    pub crm: CrmSettings,
    pub http_timeout: Duration,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database = match var("DATABASE_URL") {
            Some(url) => DatabaseSettings::with_url(url),
            None => DatabaseSettings::from_env(),
        };

        let jwt_secret = var("JWT_SECRET").or_else(|| var("SUPABASE_JWT_SECRET"));

        let cors_allowed_origins = var("CORS_ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.into())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let http_timeout = match var("HTTP_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(
                raw.parse()
                    .with_context(|| format!("HTTP_TIMEOUT_SECS must be a number, got {raw:?}"))?,
            ),
            None => Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        };

        let listings_online_only = match var("LISTINGS_ONLINE_ONLY") {
            Some(raw) => parse_bool("LISTINGS_ONLINE_ONLY", &raw)?,
            None => true,
        };

        let listings = match var("LISTINGS_BACKEND")
            .unwrap_or_else(|| "database".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "database" | "db" | "postgres" => ListingsBackend::Database,
            "bigquery" => ListingsBackend::BigQuery(Box::new(bigquery_config(
                &var,
                listings_online_only,
                http_timeout,
            )?)),
            other => bail!("LISTINGS_BACKEND must be database or bigquery, got {other:?}"),
        };

        let bucket = var("STORAGE_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into());
        let storage_backend = var("STORAGE_BACKEND").unwrap_or_else(|| {
            if var("SUPABASE_URL").is_some() {
                "supabase".into()
            } else {
                "local".into()
            }
        });
        let storage = match storage_backend.to_ascii_lowercase().as_str() {
            "supabase" => StorageConfig::Supabase {
                base_url: env_required(&var, "SUPABASE_URL")?,
                service_key: env_required(&var, "SUPABASE_SERVICE_ROLE_KEY")?,
                bucket,
                timeout: http_timeout,
            },
            "local" => StorageConfig::Local {
                root: PathBuf::from(
                    var("STORAGE_LOCAL_DIR").unwrap_or_else(|| DEFAULT_LOCAL_STORAGE_DIR.into()),
                ),
                bucket,
            },
            "memory" => StorageConfig::Memory,
            other => bail!("STORAGE_BACKEND must be supabase, local or memory, got {other:?}"),
        };

        let mut crm = CrmSettings::default();
        if let Some(raw) = var("DOCUMENT_MAX_BYTES") {
            crm.document_max_bytes = raw
                .parse()
                .with_context(|| format!("DOCUMENT_MAX_BYTES must be a number, got {raw:?}"))?;
        }

        Ok(Self {
            database,
            jwt_secret,
            cors_allowed_origins,
            listings,
            listings_online_only,
            storage,
            crm,
            http_timeout,
        })
    }
}

fn bigquery_config(
    var: &impl Fn(&str) -> Option<String>,
    online_only: bool,
    timeout: Duration,
) -> Result<BigQueryConfig> {
    let project_id = env_required(var, "BIGQUERY_PROJECT_ID")?;
    let table = env_required(var, "BIGQUERY_LISTINGS_TABLE")?;
    let credentials = if let Some(token) = var("BIGQUERY_ACCESS_TOKEN") {
        BigQueryCredentials::AccessToken(token)
    } else if let Some(path) = var("GOOGLE_APPLICATION_CREDENTIALS") {
        let key = ServiceAccountKey::from_file(&path)
            .with_context(|| format!("failed to load service account key {path}"))?;
        BigQueryCredentials::ServiceAccount(key)
    } else {
        bail!("BIGQUERY_ACCESS_TOKEN or GOOGLE_APPLICATION_CREDENTIALS is required for the bigquery backend");
    };
    let mut config = BigQueryConfig::new(project_id, table, credentials);
    config.location = var("BIGQUERY_LOCATION");
    config.online_only = online_only;
    config.request_timeout = timeout;
    Ok(config)
}

fn env_required(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    var(key).ok_or_else(|| anyhow!("missing env {key}"))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{key} must be true or false, got {raw:?}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn local_defaults() {
        let cfg = config(&[("DATABASE_URL", "sqlite::memory:")]).unwrap();
        assert_eq!(cfg.database.database_url().unwrap(), "sqlite::memory:");
        assert!(cfg.jwt_secret.is_none());
        assert_eq!(cfg.cors_allowed_origins, vec![DEFAULT_CORS_ORIGIN]);
        assert!(matches!(cfg.listings, ListingsBackend::Database));
        assert!(cfg.listings_online_only);
        assert_eq!(cfg.http_timeout, Duration::from_secs(30));
        match cfg.storage {
            StorageConfig::Local { root, bucket } => {
                assert_eq!(root, PathBuf::from("./storage"));
                assert_eq!(bucket, "deal-documents");
            }
            other => panic!("unexpected storage {other:?}"),
        }
    }

    #[test]
    fn supabase_secret_is_a_fallback_for_jwt_secret() {
        let cfg = config(&[("SUPABASE_JWT_SECRET", "from-supabase")]).unwrap();
        assert_eq!(cfg.jwt_secret.as_deref(), Some("from-supabase"));
        let cfg = config(&[
            ("JWT_SECRET", "explicit"),
            ("SUPABASE_JWT_SECRET", "from-supabase"),
        ])
        .unwrap();
        assert_eq!(cfg.jwt_secret.as_deref(), Some("explicit"));
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let cfg = config(&[(
            "CORS_ALLOWED_ORIGINS",
            "https://app.example.com, ,http://localhost:3000 ",
        )])
        .unwrap();
        assert_eq!(
            cfg.cors_allowed_origins,
            vec!["https://app.example.com", "http://localhost:3000"]
        );
    }

    #[test]
    fn supabase_storage_is_picked_when_url_is_set() {
        let cfg = config(&[
            ("SUPABASE_URL", "https://abc.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service-key"),
            ("HTTP_TIMEOUT_SECS", "5"),
        ])
        .unwrap();
        match cfg.storage {
            StorageConfig::Supabase {
                base_url, timeout, ..
            } => {
                assert_eq!(base_url, "https://abc.supabase.co");
                assert_eq!(timeout, Duration::from_secs(5));
            }
            other => panic!("unexpected storage {other:?}"),
        }

        let err = config(&[("STORAGE_BACKEND", "supabase")]).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[test]
    fn bigquery_backend_requires_project_and_credentials() {
        let cfg = config(&[
            ("LISTINGS_BACKEND", "BigQuery"),
            ("BIGQUERY_PROJECT_ID", "acq-data"),
            ("BIGQUERY_LISTINGS_TABLE", "scrapes.listings_v"),
            ("BIGQUERY_LOCATION", "US"),
            ("BIGQUERY_ACCESS_TOKEN", "ya29.token"),
            ("LISTINGS_ONLINE_ONLY", "false"),
        ])
        .unwrap();
        let ListingsBackend::BigQuery(bq) = cfg.listings else {
            panic!("expected bigquery backend");
        };
        assert_eq!(bq.project_id, "acq-data");
        assert_eq!(bq.table, "scrapes.listings_v");
        assert_eq!(bq.location.as_deref(), Some("US"));
        assert!(!bq.online_only);
        assert!(matches!(bq.credentials, BigQueryCredentials::AccessToken(_)));

        let err = config(&[
            ("LISTINGS_BACKEND", "bigquery"),
            ("BIGQUERY_PROJECT_ID", "acq-data"),
            ("BIGQUERY_LISTINGS_TABLE", "scrapes.listings_v"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("GOOGLE_APPLICATION_CREDENTIALS"));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(config(&[("LISTINGS_BACKEND", "firestore")]).is_err());
        assert!(config(&[("LISTINGS_ONLINE_ONLY", "sometimes")]).is_err());
        assert!(config(&[("DOCUMENT_MAX_BYTES", "big")]).is_err());
        assert!(config(&[("HTTP_TIMEOUT_SECS", "-1")]).is_err());
        assert!(config(&[("STORAGE_BACKEND", "s3")]).is_err());
    }

    #[test]
    fn document_limit_overrides_default() {
        let cfg = config(&[("DOCUMENT_MAX_BYTES", "1048576")]).unwrap();
        assert_eq!(cfg.crm.document_max_bytes, 1_048_576);
    }
}
