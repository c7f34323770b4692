// warden-core/src/providers/local_store.rs
//! Directory-backed bulk store.
//!
//! Objects are written below a root directory; the requested encryption is
//! recorded in a `.meta.json` sidecar. Presigned URLs carry an expiry and an
//! HMAC-SHA256 signature over bucket, key and expiry, which [`LocalObjectStore::verify`]
//! checks.
//!
//! License: MIT OR Apache-2.0

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use log::debug;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::errors::ProviderError;
use crate::providers::{BulkStore, ObjectEncryption, ObjectLocator, ProviderResult};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct ObjectMeta {
    bucket: String,
    key: String,
    encryption: ObjectEncryption,
    content_type: String,
    content_encoding: String,
}

pub struct LocalObjectStore {
    root: PathBuf,
    bucket: String,
    secret: Vec<u8>,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, bucket: &str, secret: &[u8]) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.to_string(),
            secret: secret.to_vec(),
        }
    }

    pub fn path_of(&self, key: &str) -> ProviderResult<PathBuf> {
        let rel = Path::new(key);
        let safe = !key.is_empty() && rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(ProviderError::new("InvalidObjectKey", format!("refusing key '{}'", key)));
        }
        Ok(self.root.join(rel))
    }

    fn mac(&self, key: &str, expires: i64) -> ProviderResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ProviderError::new("InvalidSigningKey", e.to_string()))?;
        mac.update(format!("{}\n{}\n{}", self.bucket, key, expires).as_bytes());
        Ok(mac)
    }

    /// Checks a URL minted by [`BulkStore::presign`] at time `now` (unix seconds).
    pub fn verify(&self, url: &str, now: i64) -> bool {
        let Some((base, query)) = url.split_once('?') else {
            return false;
        };
        let prefix = format!("file://{}/", self.root.display());
        let Some(key) = base.strip_prefix(&prefix) else {
            return false;
        };
        let mut expires = None;
        let mut signature = None;
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse::<i64>().ok(),
                Some(("signature", v)) => signature = hex::decode(v).ok(),
                _ => {}
            }
        }
        let (Some(expires), Some(signature)) = (expires, signature) else {
            return false;
        };
        if now > expires {
            debug!("presigned url for {} expired at {}", key, expires);
            return false;
        }
        match self.mac(key, expires) {
            Ok(mac) => mac.verify_slice(&signature).is_ok(),
            Err(_) => false,
        }
    }
}

fn io_error(e: std::io::Error) -> ProviderError {
    ProviderError::new("LocalStoreIo", e.to_string())
}

#[async_trait]
impl BulkStore for LocalObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, encryption: &ObjectEncryption) -> ProviderResult<ObjectLocator> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, body).await.map_err(io_error)?;

        let meta = ObjectMeta {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            encryption: encryption.clone(),
            content_type: "application/json".to_string(),
            content_encoding: "gzip".to_string(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| ProviderError::new("LocalStoreIo", e.to_string()))?;
        let mut meta_path = path.into_os_string();
        meta_path.push(".meta.json");
        tokio::fs::write(PathBuf::from(meta_path), meta_json).await.map_err(io_error)?;

        Ok(ObjectLocator {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })
    }

    async fn presign(&self, locator: &ObjectLocator, ttl: Duration) -> ProviderResult<String> {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = hex::encode(self.mac(&locator.key, expires)?.finalize().into_bytes());
        Ok(format!(
            "file://{}/{}?expires={}&signature={}",
            self.root.display(),
            locator.key,
            expires,
            signature
        ))
    }
}
