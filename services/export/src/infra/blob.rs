//! HTTP client for the platform blob service.
//!
//! The blob service speaks plain key/value HTTP: `PUT|GET|DELETE
//! /objects/{key}` for object access and `POST /presign` for time-limited
//! download URLs. Requests authenticate with the `x-blob-token` shared
//! secret.

use std::time::Duration;

use anyhow::{Context as _, anyhow};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::domain::repository::BlobStore;
use crate::error::ExportServiceError;

const TOKEN_HEADER: &str = "x-blob-token";

#[derive(Clone)]
pub struct HttpBlobStore {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBlobStore {
    pub fn new(base_url: &str, token: &str) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("build blob http client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/objects/{key}", self.base_url)
    }
}

#[derive(Deserialize)]
struct PresignResponse {
    url: String,
}

impl BlobStore for HttpBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), ExportServiceError> {
        let resp = self
            .client
            .put(self.object_url(key))
            .header(TOKEN_HEADER, &self.token)
            .body(bytes)
            .send()
            .await
            .context("put blob")?;
        resp.error_for_status()
            .with_context(|| format!("put blob {key}"))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, ExportServiceError> {
        let resp = self
            .client
            .get(self.object_url(key))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .context("get blob")?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("get blob {key}"))?;
        let bytes = resp.bytes().await.context("read blob body")?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), ExportServiceError> {
        let resp = self
            .client
            .delete(self.object_url(key))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .context("delete blob")?;
        // Deleting a missing object is a success for the caller.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status()
            .with_context(|| format!("delete blob {key}"))?;
        Ok(())
    }

    async fn presign_get(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ExportServiceError> {
        let resp = self
            .client
            .post(format!("{}/presign", self.base_url))
            .header(TOKEN_HEADER, &self.token)
            .json(&serde_json::json!({ "key": key, "ttlSecs": ttl.as_secs() }))
            .send()
            .await
            .context("presign blob")?;
        let resp = resp
            .error_for_status()
            .with_context(|| format!("presign blob {key}"))?;
        let body: PresignResponse = resp.json().await.context("decode presign response")?;
        if body.url.is_empty() {
            return Err(anyhow!("presign returned empty url").into());
        }
        Ok(body.url)
    }
}
