//! S3-compatible object store client.
//!
//! Uploads are at-least-once (overwrite on key collision, matching the
//! object key layout's `{task_id}/{index}.png` convention — rerunning a
//! page just overwrites its previous artifact under the same key).

mod error;

pub use error::StorageError;

use async_trait::async_trait;
use aws_sdk_s3::{config::Credentials, primitives::ByteStream, Client};

/// Configuration for an S3-compatible bucket (R2, MinIO, AWS S3, ...).
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket: String,
    /// Custom domain serving the bucket publicly, if configured. When
    /// absent, URLs fall back to `{endpoint_url}/{bucket}/{key}`.
    pub public_domain: Option<String>,
}

/// Pluggable artifact store: upload bytes under a key, resolve a key to a
/// retrievable URL. Kept as a trait so the orchestration engine's tests can
/// substitute an in-memory double instead of talking to real S3.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    fn url_for(&self, key: &str) -> String;
}

/// S3-compatible client built on `aws-sdk-s3`, pointed at a custom
/// `endpoint_url` the way an R2 bucket is configured.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    endpoint_url: String,
    public_domain: Option<String>,
}

impl S3ObjectStore {
    pub async fn new(config: ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id,
            config.secret_access_key,
            None,
            None,
            "object-store-static",
        );
        let shared_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new("auto"))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint_url.clone())
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared_config)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            endpoint_url: config.endpoint_url,
            public_domain: config.public_domain,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::Upload(e.to_string()))?;

        tracing::info!(key, "uploaded object");
        Ok(self.url_for(key))
    }

    fn url_for(&self, key: &str) -> String {
        if let Some(domain) = &self.public_domain {
            format!("{}/{}", domain.trim_end_matches('/'), key)
        } else {
            format!(
                "{}/{}/{}",
                self.endpoint_url.trim_end_matches('/'),
                self.bucket,
                key
            )
        }
    }
}

/// Object key layout, bit-exact with the wire contract: an original PNG
/// under `{task_id}/{index}.png`, its JPEG thumbnail under
/// `{task_id}/thumb_{index}.jpg`.
pub fn original_key(task_id: &str, index: u32) -> String {
    format!("{task_id}/{index}.png")
}

pub fn thumbnail_key(task_id: &str, index: u32) -> String {
    format!("{task_id}/thumb_{index}.jpg")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_matches_wire_contract() {
        assert_eq!(original_key("task_abc12345", 3), "task_abc12345/3.png");
        assert_eq!(
            thumbnail_key("task_abc12345", 3),
            "task_abc12345/thumb_3.jpg"
        );
    }
}
