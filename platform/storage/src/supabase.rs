use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{ObjectStore, StorageError, StorageResult, validate_path};

/// Supabase Storage REST client authenticated with the service-role key.
#[derive(Clone)]
pub struct SupabaseStorage {
    client: Client,
    base_url: String,
    service_key: String,
    bucket: String,
}

#[derive(Deserialize)]
struct SignedUrlResponse {
    #[serde(rename = "signedURL")]
    signed_url: String,
}

impl SupabaseStorage {
    pub fn new(
        base_url: &str,
        service_key: &str,
        bucket: &str,
        timeout: Duration,
    ) -> StorageResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.to_string(),
            bucket: bucket.to_string(),
        })
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, path
        )
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
    }
}

async fn check(response: Response) -> StorageResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(StorageError::Backend {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ObjectStore for SupabaseStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> StorageResult<()> {
        validate_path(path)?;
        debug!(bucket = %self.bucket, path, size = bytes.len(), "uploading object");
        let request = self
            .authed(self.client.post(self.object_url(path)))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes);
        check(request.send().await?).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        validate_path(path)?;
        let url = format!("{}/storage/v1/object/{}", self.base_url, self.bucket);
        let response = self
            .authed(self.client.delete(url))
            .json(&json!({ "prefixes": [path] }))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check(response).await?;
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> StorageResult<String> {
        validate_path(path)?;
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.base_url, self.bucket, path
        );
        let response = self
            .authed(self.client.post(url))
            .json(&json!({ "expiresIn": ttl.as_secs().max(1) }))
            .send()
            .await?;
        let body: SignedUrlResponse = check(response).await?.json().await?;
        Ok(format!("{}/storage/v1{}", self.base_url, body.signed_url))
    }
}
