//! Pre-signed upload URLs.
//!
//! Mint-only: the client PUTs the resume straight to the object store.
//! Keys are `uploads/{subject}/{random}/{sanitised filename}` and the
//! signed URL is valid for one hour by default.

use std::time::Duration;

use aws_sdk_s3::presigning::PresigningConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use applygate_core::config::ObjectStoreConfig;
use applygate_core::{ApiError, Origin};

#[derive(Debug, Serialize)]
pub struct PresignedUpload {
    pub url: String,
    pub key: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

pub struct UploadUrlMinter {
    client: aws_sdk_s3::Client,
    bucket: String,
    ttl: Duration,
}

impl UploadUrlMinter {
    pub async fn new(cfg: &ObjectStoreConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()))
            .endpoint_url(&cfg.endpoint);
        if let (Some(access), Some(secret)) = (&cfg.access_key, &cfg.secret_key) {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "applygate-config",
            ));
        }
        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            // MinIO-style endpoints route by path, not virtual host.
            .force_path_style(true)
            .build();

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: cfg.bucket.clone(),
            ttl: cfg.presign_ttl,
        }
    }

    pub async fn mint(
        &self,
        subject_id: Uuid,
        file_name: &str,
        content_type: &str,
    ) -> Result<PresignedUpload, ApiError> {
        let file_name = sanitise_filename(file_name)?;
        let key = format!("uploads/{subject_id}/{}/{file_name}", Uuid::new_v4().simple());

        let presigning = PresigningConfig::expires_in(self.ttl)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .presigned(presigning)
            .await
            .map_err(|e| ApiError::dependency(Origin::ObjectStore, e))?;

        Ok(PresignedUpload {
            url: presigned.uri().to_string(),
            key,
            expires_at: Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default(),
        })
    }
}

/// Keep alphanumerics, dot, dash and underscore; everything else becomes
/// an underscore. Leading dots are stripped so a key segment can never
/// be `..`.
fn sanitise_filename(name: &str) -> Result<String, ApiError> {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        return Err(ApiError::validation("file name is empty after sanitisation"));
    }
    let mut cleaned = cleaned;
    cleaned.truncate(128);
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ObjectStoreConfig {
        ObjectStoreConfig {
            endpoint: "http://localhost:9000".into(),
            bucket: "applygate-test".into(),
            region: "us-east-1".into(),
            access_key: Some("test-access".into()),
            secret_key: Some("test-secret".into()),
            presign_ttl: Duration::from_secs(3_600),
        }
    }

    #[test]
    fn sanitise_strips_hostile_names() {
        assert_eq!(sanitise_filename("résumé final.pdf").unwrap(), "r_sum__final.pdf");
        assert_eq!(sanitise_filename("../../etc/passwd").unwrap(), "_.._etc_passwd");
        assert!(sanitise_filename("...").is_err());
    }

    #[tokio::test]
    async fn minted_urls_have_distinct_keys() {
        let minter = UploadUrlMinter::new(&config()).await;
        let subject = Uuid::new_v4();
        let a = minter.mint(subject, "resume.pdf", "application/pdf").await.unwrap();
        let b = minter.mint(subject, "resume.pdf", "application/pdf").await.unwrap();
        assert_ne!(a.key, b.key);
        assert!(a.key.starts_with(&format!("uploads/{subject}/")));
        assert!(a.key.ends_with("/resume.pdf"));
        assert!(a.url.contains("X-Amz-Signature"), "presigned URL must be signed: {}", a.url);
    }
}
