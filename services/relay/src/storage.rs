use crate::config::StorageConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials, RequestChecksumCalculation};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument};

/// Reference to a persisted artifact
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArtifact {
    /// Object key inside the bucket
    pub object_name: String,
    /// Public link to the object
    pub public_url: String,
}

/// Artifact persistence seam used by the HTTP handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write the object as publicly readable and return its public URL
    async fn store(&self, data: Vec<u8>, content_type: &str) -> Result<StoredArtifact>;
}

/// Time-based object names that never repeat within the process
pub struct ObjectNamer {
    prefix: String,
    last_millis: AtomicU64,
}

impl ObjectNamer {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_matches('/').to_string(),
            last_millis: AtomicU64::new(0),
        }
    }

    /// Format: {prefix}/{unix_millis}_result.{ext}
    pub fn next_name(&self, content_type: &str) -> String {
        self.name_at(Utc::now().timestamp_millis().max(0) as u64, content_type)
    }

    fn name_at(&self, now_millis: u64, content_type: &str) -> String {
        let stamp = self.reserve(now_millis);
        let file_name = format!("{}_result.{}", stamp, extension_for(content_type));

        if self.prefix.is_empty() {
            file_name
        } else {
            format!("{}/{}", self.prefix, file_name)
        }
    }

    /// Claim a stamp strictly greater than every stamp handed out before
    fn reserve(&self, now_millis: u64) -> u64 {
        let mut last = self.last_millis.load(Ordering::Relaxed);
        loop {
            let next = now_millis.max(last + 1);
            match self.last_millis.compare_exchange_weak(
                last,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}

/// Public link for an object: {base}/{bucket}/{object}
pub fn public_url(base_url: &str, bucket: &str, object_name: &str) -> String {
    format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        bucket,
        object_name
    )
}

/// File extension for an image content type
fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    match essence.as_str() {
        "image/jpeg" | "image/jpg" => "jpeg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/heic" => "heic",
        "image/heif" => "heif",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Google Cloud Storage writer over the S3-compatible XML API
pub struct GcsArtifactStore {
    client: S3Client,
    bucket: String,
    public_base_url: String,
    public_read: bool,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
    namer: ObjectNamer,
}

impl GcsArtifactStore {
    /// Create a new artifact store
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url)
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_timeout(config.timeout())
                    .build(),
            );

        // HMAC keys from config win over the ambient credential chain
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key.clone(),
                secret.clone(),
                None,
                None,
                "codipop-config",
            ));
        }

        let sdk_config = loader.load().await;

        // The XML API does not accept aws-chunked checksum trailers
        let s3_config = S3ConfigBuilder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();
        let client = S3Client::from_conf(s3_config);

        info!(
            bucket = %config.bucket,
            endpoint = %config.endpoint_url,
            timeout_secs = config.timeout_secs,
            public_read = config.public_read,
            "Artifact store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            public_base_url: config.public_base_url.clone(),
            public_read: config.public_read,
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
            namer: ObjectNamer::new(&config.object_prefix),
        })
    }

    fn acl(&self) -> Option<ObjectCannedAcl> {
        self.public_read.then_some(ObjectCannedAcl::PublicRead)
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .set_acl(self.acl())
            .send()
            .await
            .context("Failed to upload artifact")?;

        Ok(())
    }

    /// Multipart upload for large objects
    async fn multipart_upload(&self, key: &str, content_type: &str, data: Vec<u8>) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_acl(self.acl())
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        let mut completed_parts = Vec::new();

        for (index, chunk) in data.chunks(self.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {part_number}"))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for GcsArtifactStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn store(&self, data: Vec<u8>, content_type: &str) -> Result<StoredArtifact> {
        let object_name = self.namer.next_name(content_type);
        let size_bytes = data.len();

        debug!(object_name = %object_name, "Uploading artifact");

        let started = std::time::Instant::now();
        if size_bytes > self.multipart_threshold_bytes {
            self.multipart_upload(&object_name, content_type, data).await?;
        } else {
            self.simple_upload(&object_name, content_type, data).await?;
        }

        metrics::histogram!("relay.storage.upload_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        metrics::counter!("relay.storage.bytes_uploaded").increment(size_bytes as u64);

        let public_url = public_url(&self.public_base_url, &self.bucket, &object_name);

        info!(
            object_name = %object_name,
            size_bytes = size_bytes,
            "Artifact uploaded successfully"
        );

        Ok(StoredArtifact {
            object_name,
            public_url,
        })
    }
}
