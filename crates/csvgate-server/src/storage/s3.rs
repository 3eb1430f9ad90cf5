use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::BytesMut;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use super::config::{StorageConfig, DEFAULT_PRESIGN_EXPIRY_SECS};
use super::{Destination, PresignedUpload, Presigner, Store};
use crate::pipeline::ByteSource;

const CONTENT_TYPE: &str = "text/csv";

/// [`Store`] backed by an S3 bucket
///
/// Bodies that fit in one part go up with a single `PutObject`; larger ones
/// use a multipart upload that is aborted if anything goes wrong. At most one
/// part is held in memory.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    destination: Destination,
    part_size: usize,
    presign_expiry: Duration,
}

impl S3Store {
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let destination = config.destination()?;
        debug!(
            bucket = %destination.bucket,
            prefix = %destination.prefix,
            endpoint = ?config.endpoint,
            "Initializing S3 store"
        );

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "csvgate-storage",
            ));
        }
        let sdk_config = loader.load().await;

        let mut s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        let client = Client::from_conf(s3_config_builder.build());

        info!("S3 store initialized for {}", destination.url);

        Ok(Self::from_client(client, destination, config.part_size)
            .with_presign_expiry(Duration::from_secs(config.presign_expiry_secs)))
    }

    pub fn from_client(client: Client, destination: Destination, part_size: usize) -> Self {
        Self {
            client,
            destination,
            part_size: part_size.max(1),
            presign_expiry: Duration::from_secs(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }

    pub fn with_presign_expiry(mut self, expiry: Duration) -> Self {
        self.presign_expiry = expiry;
        self
    }

    async fn put(&self, key: &str, buf: BytesMut) -> Result<()> {
        debug!("Uploading {} bytes to s3://{}/{}", buf.len(), self.destination.bucket, key);
        self.client
            .put_object()
            .bucket(&self.destination.bucket)
            .key(key)
            .content_type(CONTENT_TYPE)
            .body(ByteStream::from(buf.freeze()))
            .send()
            .await
            .context("Failed to upload to S3")?;
        Ok(())
    }

    async fn put_multipart(&self, key: &str, body: ByteSource, buf: BytesMut) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.destination.bucket)
            .key(key)
            .content_type(CONTENT_TYPE)
            .send()
            .await
            .context("Failed to start multipart upload")?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| anyhow!("S3 returned no multipart upload id"))?
            .to_string();

        let parts = match self.upload_parts(key, &upload_id, body, buf).await {
            Ok(parts) => parts,
            Err(e) => {
                self.abort(key, &upload_id).await;
                return Err(e);
            },
        };

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.destination.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .context("Failed to complete multipart upload");
        if completed.is_err() {
            self.abort(key, &upload_id).await;
        }
        completed.map(|_| ())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        mut body: ByteSource,
        mut buf: BytesMut,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut ended = false;
        loop {
            if !buf.is_empty() {
                let part_number = parts.len() as i32 + 1;
                let part = buf.split().freeze();
                debug!(part = part_number, bytes = part.len(), "Uploading part");

                let uploaded = self
                    .client
                    .upload_part()
                    .bucket(&self.destination.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(part))
                    .send()
                    .await
                    .with_context(|| format!("Failed to upload part {part_number}"))?;

                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(uploaded.e_tag().map(str::to_string))
                        .part_number(part_number)
                        .build(),
                );
            }
            if ended {
                return Ok(parts);
            }
            ended = fill(&mut body, &mut buf, self.part_size).await?;
        }
    }

    async fn abort(&self, key: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.destination.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await;
        match aborted {
            Ok(_) => debug!(key, "Aborted multipart upload"),
            Err(e) => warn!(key, error = %e, "Failed to abort multipart upload"),
        }
    }
}

#[async_trait]
impl Store for S3Store {
    #[instrument(skip(self, body))]
    async fn save(&self, key: &str, mut body: ByteSource) -> Result<String> {
        let object_key = self.destination.object_key(key);
        let mut buf = BytesMut::with_capacity(self.part_size);

        if fill(&mut body, &mut buf, self.part_size).await? {
            self.put(&object_key, buf).await?;
        } else {
            self.put_multipart(&object_key, body, buf).await?;
        }

        let location = self.destination.location(key);
        info!("Successfully uploaded to {}", location);
        Ok(location)
    }
}

#[async_trait]
impl Presigner for S3Store {
    #[instrument(skip(self))]
    async fn presign_upload(&self, name: &str) -> Result<PresignedUpload> {
        let key = self.destination.object_key(name);
        let presigning_config = PresigningConfig::expires_in(self.presign_expiry)
            .context("Failed to create presigning config")?;

        let presigned_request = self
            .client
            .put_object()
            .bucket(&self.destination.bucket)
            .key(&key)
            .content_type(CONTENT_TYPE)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        debug!("Generated presigned upload URL for s3://{}/{}", self.destination.bucket, key);

        Ok(PresignedUpload {
            url: presigned_request.uri().to_string(),
            key,
            location: self.destination.location(name),
            expires_in: self.presign_expiry.as_secs(),
        })
    }
}

/// Read from `body` until `buf` holds at least `part_size` bytes.
///
/// Returns `true` once `body` has ended cleanly.
async fn fill(body: &mut ByteSource, buf: &mut BytesMut, part_size: usize) -> Result<bool> {
    while buf.len() < part_size {
        match body.next().await {
            Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
            Some(Err(e)) => return Err(anyhow!(e).context("Upload body ended with an error")),
            None => return Ok(true),
        }
    }
    Ok(false)
}
