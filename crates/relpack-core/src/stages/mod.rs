//! Pipeline stages built on the registry and the task group.

pub mod apk;
pub mod apkbuild;
pub mod s3;
