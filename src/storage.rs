//! Raw-file blob storage.
//!
//! Uploaded files are stored under a generated key (`<uuid>/<file name>`)
//! and addressed by that key for download, extraction, and deletion.
//!
//! - **[`FsBlobStore`]** — a local directory; the default.
//! - **[`S3BlobStore`]** — any S3-compatible bucket, signed with AWS
//!   Signature V4 using `hmac` + `sha2`.
//!
//! # Environment Variables (S3)
//!
//! - `AWS_ACCESS_KEY_ID` — required
//! - `AWS_SECRET_ACCESS_KEY` — required
//! - `AWS_SESSION_TOKEN` — optional

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{S3StorageConfig, StorageConfig};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Location of a freshly stored blob.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlob {
    /// Storage key; pass back to [`BlobStore::get`] and [`BlobStore::delete`].
    pub key: String,
    /// Public download URL.
    pub url: String,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<StoredBlob, StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Deletes a blob. Deleting a missing key yields [`StorageError::NotFound`].
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Builds the configured blob store.
pub fn create_blob_store(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend.as_str() {
        "fs" => Ok(Arc::new(FsBlobStore::new(
            config.root.clone(),
            config.public_base_url.clone(),
        ))),
        "s3" => {
            let s3 = config
                .s3
                .clone()
                .context("[storage.s3] section is required for the s3 backend")?;
            Ok(Arc::new(S3BlobStore::from_env(
                s3,
                config.public_base_url.clone(),
            )?))
        }
        other => anyhow::bail!("Unknown storage backend: {}", other),
    }
}

/// Generates a unique key that keeps the original file name readable.
pub fn new_blob_key(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let sanitized = if sanitized.trim_matches('.').is_empty() {
        "file".to_string()
    } else {
        sanitized
    };
    format!("{}/{}", Uuid::new_v4(), sanitized)
}

fn public_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key)
}

// ============ Filesystem ============

pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsBlobStore {
    pub fn new(root: PathBuf, public_base_url: Option<String>) -> Self {
        Self {
            root,
            public_base_url,
        }
    }

    /// Resolves a key under the root, rejecting anything that could escape it.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(key);
        let safe = !key.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<StoredBlob, StorageError> {
        let key = new_blob_key(file_name);
        let path = self.path_for(&key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let url = match self.public_base_url {
            Some(ref base) => public_url(base, &key),
            None => format!("file://{}", path.display()),
        };
        Ok(StoredBlob { key, url })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        // The per-upload directory is empty now; leaving it behind is harmless.
        if let Some(parent) = path.parent() {
            if parent != self.root {
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }
}

// ============ S3 ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3BlobStore {
    config: S3StorageConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
    public_base_url: Option<String>,
}

impl S3BlobStore {
    pub fn from_env(config: S3StorageConfig, public_base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            config,
            creds: AwsCredentials::from_env()?,
            client: reqwest::Client::new(),
            public_base_url,
        })
    }

    fn object_key(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key)
        }
    }

    /// Scheme, host, and canonical URI for an object.
    ///
    /// Custom endpoints (MinIO, LocalStack) use path-style addressing.
    fn locate(&self, object_key: &str) -> (String, String, String) {
        let encoded_key = object_key
            .split('/')
            .map(uri_encode)
            .collect::<Vec<_>>()
            .join("/");
        match self.config.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                let uri = format!("/{}/{}", self.config.bucket, encoded_key);
                (scheme.to_string(), host, uri)
            }
            None => (
                "https".to_string(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                format!("/{}", encoded_key),
            ),
        }
    }

    async fn send(
        &self,
        method: reqwest::Method,
        key: &str,
        payload: &[u8],
    ) -> Result<reqwest::Response, StorageError> {
        let object_key = self.object_key(key);
        let (scheme, host, canonical_uri) = self.locate(&object_key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let authorization = sign_request(
            &self.creds,
            &self.config.region,
            method.as_str(),
            &canonical_uri,
            &headers,
            &payload_hash,
            &date_stamp,
            &amz_date,
        );

        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !payload.is_empty() {
            req = req.body(payload.to_vec());
        }

        req.send()
            .await
            .map_err(|e| StorageError::Backend(format!("s3://{}/{}: {}", self.config.bucket, object_key, e)))
    }
}

async fn check_status(resp: reqwest::Response, op: &str, key: &str) -> Result<reqwest::Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(StorageError::NotFound(key.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::Backend(format!(
        "S3 {} failed (HTTP {}) for key '{}': {}",
        op,
        status,
        key,
        body.chars().take(500).collect::<String>()
    )))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, file_name: &str, bytes: &[u8]) -> Result<StoredBlob, StorageError> {
        let key = new_blob_key(file_name);
        let resp = self.send(reqwest::Method::PUT, &key, bytes).await?;
        check_status(resp, "PutObject", &key).await?;

        let url = match self.public_base_url {
            Some(ref base) => public_url(base, &key),
            None => {
                let (scheme, host, uri) = self.locate(&self.object_key(&key));
                format!("{}://{}{}", scheme, host, uri)
            }
        };
        Ok(StoredBlob { key, url })
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self.send(reqwest::Method::GET, key, b"").await?;
        let resp = check_status(resp, "GetObject", key).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        // S3 answers 204 for missing keys too, so probe first to report NotFound.
        let head = self.send(reqwest::Method::HEAD, key, b"").await?;
        check_status(head, "HeadObject", key).await?;
        let resp = self.send(reqwest::Method::DELETE, key, b"").await?;
        check_status(resp, "DeleteObject", key).await?;
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

/// Builds the `Authorization` header for a request with no query string.
///
/// `headers` must be lower-cased and sorted by name.
#[allow(clippy::too_many_arguments)]
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    canonical_uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    date_stamp: &str,
    amz_date: &str,
) -> String {
    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    )
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
