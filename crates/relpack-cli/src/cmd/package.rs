//! Package command

use std::sync::Arc;

use anyhow::{Context, Result};
use relpack_core::ReleaseContext;
use relpack_core::io::tool::SystemToolRunner;
use relpack_core::stages::apk;

/// Build, sign and register Alpine packages.
pub async fn package(ctx: &ReleaseContext) -> Result<()> {
    let outcome = apk::run(ctx, Arc::new(SystemToolRunner))
        .await
        .context("alpine packaging failed")?;
    super::report("package", &outcome);
    Ok(())
}
