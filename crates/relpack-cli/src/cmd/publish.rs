//! Publish command

use std::sync::Arc;

use anyhow::{Context, Result};
use relpack_core::ReleaseContext;
use relpack_core::io::store::S3Connector;
use relpack_core::stages::s3;

/// Upload artifacts to every configured S3 destination.
pub async fn publish(ctx: &ReleaseContext) -> Result<()> {
    let outcome = s3::run(ctx, Arc::new(S3Connector))
        .await
        .context("s3 publishing failed")?;
    super::report("publish", &outcome);
    Ok(())
}
