use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::{presigning::PresigningConfig, primitives::ByteStream};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Presigned upload URLs expire after ten minutes.
const PRESIGN_TTL: Duration = Duration::from_secs(600);

/// StorageError
///
/// Blob store failures. They surface to clients as a generic 500.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("presign failed: {0}")]
    Presign(String),
    #[error("upload of {key} failed: {reason}")]
    Upload { key: String, reason: String },
    #[error("delete of {key} failed: {reason}")]
    Delete { key: String, reason: String },
}

/// StorageService
///
/// Contract for the object storage holding listing images. The real S3 client runs in every
/// deployed environment; `MockStorageService` stands in for it in tests.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Creates the configured bucket if missing. Only called in `Env::Local`.
    async fn ensure_bucket_exists(&self);

    /// A short-lived signed PUT URL bound to `content_type`.
    async fn get_presigned_upload_url(&self, key: &str, content_type: &str) -> Result<String, StorageError>;

    async fn put_object(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<(), StorageError>;

    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// Public URL under which a stored object is served.
    fn object_url(&self, key: &str) -> String;
}

/// S3StorageClient
///
/// `StorageService` over the AWS SDK. Path-style addressing keeps it compatible with MinIO and
/// other S3-compatible gateways.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    endpoint: String,
    bucket_name: String,
}

impl S3StorageClient {
    /// new
    ///
    /// Constructs the S3 client using credentials and configuration from AppConfig.
    pub async fn new(endpoint: &str, region: &str, access_key: &str, secret_key: &str, bucket: &str) -> Self {
        let credentials = s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        // CreateBucket fails harmlessly when the bucket is already there.
        if let Err(e) = self.client.create_bucket().bucket(&self.bucket_name).send().await {
            tracing::debug!(bucket = %self.bucket_name, error = %e, "create_bucket skipped");
        }
    }

    async fn get_presigned_upload_url(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        let presigning = PresigningConfig::expires_in(PRESIGN_TTL).map_err(|e| StorageError::Presign(e.to_string()))?;
        let presigned_req = self
            .client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            // The uploader must send exactly this Content-Type.
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign(e.to_string()))?;

        Ok(presigned_req.uri().to_string())
    }

    async fn put_object(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Delete {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket_name, key)
    }
}

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so a user-supplied key can never climb out of its prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Default)]
struct MockObjects {
    stored: Vec<String>,
    deleted: Vec<String>,
}

/// MockStorageService
///
/// In-memory `StorageService` for tests. Records every stored and deleted key so tests can assert
/// on blob cleanup.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    objects: Arc<Mutex<MockObjects>>,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn stored_keys(&self) -> Vec<String> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).stored.clone()
    }

    pub fn deleted_keys(&self) -> Vec<String> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner).deleted.clone()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn get_presigned_upload_url(&self, key: &str, _content_type: &str) -> Result<String, StorageError> {
        if self.should_fail {
            return Err(StorageError::Presign("mock storage failure".to_string()));
        }
        Ok(format!("http://localhost:9000/mock-bucket/{}?signature=fake", sanitize_key(key)))
    }

    async fn put_object(&self, key: &str, _content_type: &str, _body: Vec<u8>) -> Result<(), StorageError> {
        if self.should_fail {
            return Err(StorageError::Upload {
                key: key.to_string(),
                reason: "mock storage failure".to_string(),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stored
            .push(key.to_string());
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        if self.should_fail {
            return Err(StorageError::Delete {
                key: key.to_string(),
                reason: "mock storage failure".to_string(),
            });
        }
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deleted
            .push(key.to_string());
        Ok(())
    }

    fn object_url(&self, key: &str) -> String {
        format!("http://localhost:9000/mock-bucket/{key}")
    }
}

/// StorageState
///
/// The concrete type used to share the storage service across the application state.
pub type StorageState = Arc<dyn StorageService>;
