use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

/// Default destination for uploaded files
pub const DEFAULT_S3_URL: &str = "s3://csvgate-uploads";

/// Default AWS region
pub const DEFAULT_S3_REGION: &str = "eu-west-1";

/// Default multipart upload part size (8 MiB)
pub const DEFAULT_S3_PART_SIZE: usize = 8 * 1024 * 1024;

/// Smallest part size S3 accepts for all but the last part (5 MiB)
pub const MIN_S3_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default lifetime of a direct upload URL in seconds
pub const DEFAULT_PRESIGN_EXPIRY_SECS: u64 = 300;

/// Longest lifetime S3 allows for a presigned URL (seven days)
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `s3://<bucket>[/<prefix>]`
    pub url: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub part_size: usize,
    pub presign_expiry_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_S3_URL.to_string(),
            region: DEFAULT_S3_REGION.to_string(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            path_style: false,
            part_size: DEFAULT_S3_PART_SIZE,
            presign_expiry_secs: DEFAULT_PRESIGN_EXPIRY_SECS,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            url: env::var("S3_URL").unwrap_or_else(|_| DEFAULT_S3_URL.to_string()),
            region: env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_S3_REGION.to_string()),
            endpoint: env::var("S3_ENDPOINT").ok(),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            part_size: env::var("S3_PART_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_S3_PART_SIZE),
            presign_expiry_secs: env::var("S3_PRESIGN_EXPIRY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PRESIGN_EXPIRY_SECS),
        }
    }

    pub fn for_minio(endpoint: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            region: "us-east-1".to_string(),
            endpoint: Some(endpoint.into()),
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            part_size: MIN_S3_PART_SIZE,
            presign_expiry_secs: DEFAULT_PRESIGN_EXPIRY_SECS,
        }
    }

    /// Split the configured URL into its bucket and key prefix
    pub fn destination(&self) -> anyhow::Result<Destination> {
        let url = Url::parse(&self.url)?;
        if url.scheme() != "s3" {
            anyhow::bail!("S3 URL must use the s3 scheme: {}", self.url);
        }
        let bucket = match url.host_str() {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => anyhow::bail!("S3 URL has no bucket: {}", self.url),
        };

        Ok(Destination {
            bucket,
            prefix: url.path().trim_matches('/').to_string(),
            url: self.url.trim_end_matches('/').to_string(),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.destination()?;

        if self.part_size < MIN_S3_PART_SIZE {
            anyhow::bail!(
                "S3 part size ({}) must be at least {} bytes",
                self.part_size,
                MIN_S3_PART_SIZE
            );
        }

        if self.presign_expiry_secs == 0 || self.presign_expiry_secs > MAX_PRESIGN_EXPIRY_SECS {
            anyhow::bail!(
                "Presigned URL expiry ({}s) must be between 1s and {}s",
                self.presign_expiry_secs,
                MAX_PRESIGN_EXPIRY_SECS
            );
        }

        if self.access_key.is_some() != self.secret_key.is_some() {
            anyhow::bail!("S3 access key and secret key must be set together");
        }

        Ok(())
    }
}

/// Where uploaded files land
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    /// Key prefix without surrounding slashes; may be empty
    pub prefix: String,
    /// Configured URL without a trailing slash
    pub url: String,
}

impl Destination {
    pub fn object_key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.prefix, name)
        }
    }

    /// Public location reported for a stored file
    pub fn location(&self, name: &str) -> String {
        format!("{}/{}", self.url, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_url(url: &str) -> StorageConfig {
        StorageConfig {
            url: url.to_string(),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn test_destination_without_prefix() {
        let dest = with_url("s3://csvgate-uploads").destination().unwrap();
        assert_eq!(dest.bucket, "csvgate-uploads");
        assert_eq!(dest.object_key("AF001EW.csv"), "AF001EW.csv");
        assert_eq!(dest.location("AF001EW.csv"), "s3://csvgate-uploads/AF001EW.csv");
    }

    #[test]
    fn test_destination_with_prefix() {
        let dest = with_url("s3://bucket/incoming/daily/").destination().unwrap();
        assert_eq!(dest.bucket, "bucket");
        assert_eq!(dest.object_key("a.csv"), "incoming/daily/a.csv");
        assert_eq!(dest.location("a.csv"), "s3://bucket/incoming/daily/a.csv");
    }

    #[test]
    fn test_rejects_non_s3_url() {
        assert!(with_url("https://bucket/path").validate().is_err());
        assert!(with_url("not a url").validate().is_err());
    }

    #[test]
    fn test_rejects_small_part_size() {
        let config = StorageConfig {
            part_size: 1024,
            ..StorageConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_presign_expiry_out_of_range() {
        for presign_expiry_secs in [0, MAX_PRESIGN_EXPIRY_SECS + 1] {
            let config = StorageConfig {
                presign_expiry_secs,
                ..StorageConfig::default()
            };
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn test_for_minio() {
        let config = StorageConfig::for_minio("http://localhost:9000", "s3://test-bucket");
        assert_eq!(config.endpoint, Some("http://localhost:9000".to_string()));
        assert!(config.path_style);
        assert!(config.validate().is_ok());
    }
}
