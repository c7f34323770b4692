// warden-core/src/notify/dump.rs
//! Persists the full raw event to bulk storage so the report can link to it.
//!
//! Best-effort: any failure only means the report goes out without a link.
//!
//! License: MIT OR Apache-2.0

use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::event::IncidentEvent;
use crate::providers::{BulkStore, ObjectEncryption, ObjectLocator};

/// Where a dumped event can be fetched from, and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpLink {
    pub locator: ObjectLocator,
    pub url: String,
    pub ttl_secs: u64,
}

pub struct EventDumper {
    store: Arc<dyn BulkStore>,
    prefix: String,
    encryption: ObjectEncryption,
    ttl: Duration,
}

impl EventDumper {
    pub fn new(store: Arc<dyn BulkStore>, prefix: &str, encryption: ObjectEncryption, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.trim_matches('/').to_string(),
            encryption,
            ttl,
        }
    }

    /// `<prefix>/<region>/<kind>/<timestamp>-<random>.json.gz`
    pub fn object_key(&self, event: &IncidentEvent) -> String {
        let when = event.timestamp_utc().replace(':', "-");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}/{}/{}-{}.json.gz",
            key_segment(&event.region),
            key_segment(&event.kind),
            when,
            suffix
        );
        if self.prefix.is_empty() {
            name
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    pub async fn dump(&self, event: &IncidentEvent) -> Option<DumpLink> {
        let body = match compress_event(&event.raw) {
            Ok(b) => b,
            Err(e) => {
                warn!("event dump skipped, could not encode event: {}", e);
                return None;
            }
        };
        let key = self.object_key(event);
        let locator = match self.store.put(&key, body, &self.encryption).await {
            Ok(l) => l,
            Err(e) => {
                warn!("event dump failed: {}", e);
                return None;
            }
        };
        match self.store.presign(&locator, self.ttl).await {
            Ok(url) => {
                debug!("event dumped to {}/{}", locator.bucket, locator.key);
                Some(DumpLink {
                    locator,
                    url,
                    ttl_secs: self.ttl.as_secs(),
                })
            }
            Err(e) => {
                warn!("presigning event dump failed: {}", e);
                None
            }
        }
    }
}

/// Compact JSON, gzip-compressed.
pub fn compress_event(raw: &serde_json::Value) -> std::io::Result<Vec<u8>> {
    let json = serde_json::to_vec(raw)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    encoder.finish()
}

fn key_segment(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            ':' => '-',
            _ => '_',
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryCloud;
    use flate2::read::GzDecoder;
    use serde_json::json;
    use std::io::Read;

    fn event() -> IncidentEvent {
        IncidentEvent::from_value(
            json!({"detail": {"eventName": "StopLogging", "eventTime": "2024-05-01T12:00:00Z", "awsRegion": "us-east-1"}}),
            "",
        )
    }

    #[test]
    fn key_is_namespaced_by_region_kind_and_time() {
        let cloud = Arc::new(MemoryCloud::new());
        let dumper = EventDumper::new(cloud, "/warden/events/", ObjectEncryption::Aes256, Duration::from_secs(60));
        let key = dumper.object_key(&event());
        assert!(key.starts_with("warden/events/us-east-1/StopLogging/2024-05-01T12-00-00Z-"), "{}", key);
        assert!(key.ends_with(".json.gz"));
        assert_ne!(key, dumper.object_key(&event()));
    }

    #[test]
    fn finding_types_are_made_key_safe() {
        assert_eq!(key_segment("CryptoCurrency:EC2/BitcoinTool.B!DNS"), "CryptoCurrency-EC2_BitcoinTool.B_DNS");
        assert_eq!(key_segment(""), "unknown");
    }

    #[tokio::test]
    async fn dump_stores_gzip_and_returns_link() {
        let cloud = Arc::new(MemoryCloud::new());
        let dumper = EventDumper::new(cloud.clone(), "dumps", ObjectEncryption::Kms("key-1".into()), Duration::from_secs(3600));
        let ev = event();
        let link = dumper.dump(&ev).await.expect("link");
        assert_eq!(link.ttl_secs, 3600);
        assert!(link.url.contains(&link.locator.key));

        let (bytes, encryption) = cloud.object(&link.locator.key).await.expect("stored");
        assert_eq!(encryption, ObjectEncryption::Kms("key-1".into()));
        let mut json = String::new();
        GzDecoder::new(bytes.as_slice()).read_to_string(&mut json).unwrap();
        let back: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev.raw);
    }

    #[tokio::test]
    async fn store_failure_yields_no_link() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.fail("PutObject", "AccessDenied").await;
        let dumper = EventDumper::new(cloud, "dumps", ObjectEncryption::Aes256, Duration::from_secs(60));
        assert_eq!(dumper.dump(&event()).await, None);
    }
}
