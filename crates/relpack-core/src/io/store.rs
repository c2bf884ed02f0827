//! Object storage.
//!
//! The publish stage talks to storage through [`StoreConnector`] (one
//! connection per destination) and [`ObjectStore`] (one `put` per artifact).
//! [`S3Connector`] is the `aws-sdk-s3` implementation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::S3Destination;
use crate::error::Result;

/// One object upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutObject {
    /// Target bucket.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Local file streamed as the object body.
    pub path: PathBuf,
    /// Size of `path` in bytes.
    pub content_length: u64,
    /// Canned ACL (e.g. `private`, `public-read`).
    pub acl: String,
}

/// A connected object store.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Upload one object, failing with
    /// [`PipelineError::Storage`](crate::error::PipelineError::Storage).
    async fn put_object(&self, request: PutObject) -> Result<()>;
}

/// Opens an [`ObjectStore`] for a destination's connection settings.
#[async_trait]
pub trait StoreConnector: Send + Sync + std::fmt::Debug {
    /// Connect using `destination`'s region, endpoint and profile.
    async fn connect(&self, destination: &S3Destination) -> Result<Arc<dyn ObjectStore>>;
}

#[cfg(feature = "upload")]
pub use s3_impl::{S3Connector, S3Store};

#[cfg(feature = "upload")]
mod s3_impl {
    use super::{ObjectStore, PutObject, S3Destination, StoreConnector};
    use crate::error::{PipelineError, Result};
    use async_trait::async_trait;
    use aws_sdk_s3 as s3;
    use std::sync::Arc;

    /// Connects to AWS S3 or an S3-compatible endpoint.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct S3Connector;

    #[async_trait]
    impl StoreConnector for S3Connector {
        async fn connect(&self, destination: &S3Destination) -> Result<Arc<dyn ObjectStore>> {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
                .region(s3::config::Region::new(destination.region.clone()));
            if let Some(profile) = destination.profile.as_deref().filter(|p| !p.is_empty()) {
                loader = loader.profile_name(profile);
            }
            let shared = loader.load().await;

            let mut builder = s3::config::Builder::from(&shared);
            if let Some(endpoint) = destination.endpoint.as_deref().filter(|e| !e.is_empty()) {
                builder = builder.endpoint_url(endpoint).force_path_style(true); // Required for MinIO/R2
            }

            Ok(Arc::new(S3Store {
                client: s3::Client::from_conf(builder.build()),
            }))
        }
    }

    /// [`ObjectStore`] backed by an `aws-sdk-s3` client.
    #[derive(Debug, Clone)]
    pub struct S3Store {
        client: s3::Client,
    }

    #[async_trait]
    impl ObjectStore for S3Store {
        async fn put_object(&self, request: PutObject) -> Result<()> {
            let PutObject {
                bucket,
                key,
                path,
                content_length,
                acl,
            } = request;

            // Streamed from disk; large archives are never held in memory.
            let body = s3::primitives::ByteStream::from_path(&path)
                .await
                .map_err(|e| PipelineError::fs("open", &path, std::io::Error::other(e)))?;

            let mut req = self
                .client
                .put_object()
                .bucket(bucket)
                .key(&key)
                .body(body)
                .acl(s3::types::ObjectCannedAcl::from(acl.as_str()));
            if let Ok(len) = i64::try_from(content_length) {
                req = req.content_length(len);
            }

            req.send()
                .await
                .map_err(|e| PipelineError::Storage {
                    key,
                    message: s3::error::DisplayErrorContext(e).to_string(),
                })?;
            Ok(())
        }
    }
}
