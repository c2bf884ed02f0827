//! Publishing to S3-compatible object storage.

use std::sync::Arc;

use relpack_schema::{Artifact, ArtifactKind, Filter};
use tracing::{debug, info};

use crate::config::S3Destination;
use crate::context::{ReleaseContext, StageOutcome};
use crate::error::{PipelineError, Result};
use crate::group::TaskGroup;
use crate::io::store::{ObjectStore, PutObject, StoreConnector};
use crate::template::{ReleaseTemplate, TemplateResolver};

/// Build the kind filter of a destination.
///
/// Fails with [`PipelineError::Config`] when the bucket or the kind list is
/// empty and with [`PipelineError::UnknownArtifactType`] for a kind outside
/// the publish vocabulary.
pub fn kind_filter(destination: &S3Destination) -> Result<Filter> {
    if destination.bucket.trim().is_empty() {
        return Err(PipelineError::Config("s3: bucket is required".to_string()));
    }
    if destination.artifacts.is_empty() {
        return Err(PipelineError::Config(format!(
            "s3 bucket {}: no artifact types configured",
            destination.bucket
        )));
    }

    let kinds = destination
        .artifacts
        .iter()
        .map(|name| ArtifactKind::from_publish_name(name).map(Filter::by_type))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Filter::Or(kinds))
}

/// `<folder>/<repo_subpath>/<name>`, skipping empty segments.
pub fn object_key(folder: &str, repo_subpath: &str, name: &str) -> String {
    [folder, repo_subpath, name]
        .iter()
        .map(|part| part.trim_matches('/'))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// A destination with every template resolved.
#[derive(Debug, Clone)]
struct Target {
    bucket: String,
    folder: String,
    acl: String,
}

impl Target {
    fn resolve(resolver: &dyn TemplateResolver, destination: &S3Destination) -> Result<Self> {
        Ok(Self {
            bucket: resolver.apply(&destination.bucket)?,
            folder: resolver.apply(&destination.folder)?,
            acl: resolver.apply(&destination.acl)?,
        })
    }
}

/// Uploads registry artifacts to every configured destination.
#[derive(Debug, Clone)]
pub struct S3Publisher {
    connector: Arc<dyn StoreConnector>,
}

impl S3Publisher {
    /// Create a publisher opening stores through `connector`.
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self { connector }
    }

    /// Publish to every configured destination.
    ///
    /// Every destination is validated before anything is uploaded; a
    /// configuration error therefore has no side effects. Failures of
    /// individual destinations and uploads are combined into one
    /// [`PipelineError::Aggregate`].
    pub async fn publish(&self, ctx: &ReleaseContext) -> Result<StageOutcome> {
        if ctx.config.s3.is_empty() {
            return Ok(StageOutcome::Skipped("s3 section is not configured".to_string()));
        }
        if ctx.skip_publish {
            return Ok(StageOutcome::Skipped("publishing is disabled".to_string()));
        }

        for destination in &ctx.config.s3 {
            kind_filter(destination)?;
        }

        let resolver: Arc<dyn TemplateResolver> = Arc::new(ReleaseTemplate::new(ctx));
        let mut group = TaskGroup::new(ctx.parallelism).with_cancellation(ctx.cancel.clone());
        for destination in ctx.config.s3.clone() {
            let publisher = self.clone();
            let ctx = ctx.clone();
            let resolver = Arc::clone(&resolver);
            group
                .spawn(async move {
                    publisher
                        .publish_destination(&ctx, resolver.as_ref(), &destination)
                        .await
                })
                .await;
        }
        group.wait().await?;

        Ok(StageOutcome::Completed)
    }

    /// Upload every matching artifact to one destination.
    ///
    /// Templates are resolved first, so a resolution failure aborts the
    /// destination before its store is opened.
    pub async fn publish_destination(
        &self,
        ctx: &ReleaseContext,
        resolver: &dyn TemplateResolver,
        destination: &S3Destination,
    ) -> Result<()> {
        let filter = kind_filter(destination)?;
        let target = Target::resolve(resolver, destination)?;

        let artifacts = ctx.artifacts.filter(&filter).list();
        if artifacts.is_empty() {
            info!(bucket = %target.bucket, "no artifacts to upload");
            return Ok(());
        }
        debug!(bucket = %target.bucket, count = artifacts.len(), "uploading artifacts");

        let store = self.connector.connect(destination).await?;
        let mut group = TaskGroup::new(ctx.parallelism).with_cancellation(ctx.cancel.clone());
        for artifact in artifacts {
            let store = Arc::clone(&store);
            let target = target.clone();
            group.spawn(upload(store, target, artifact)).await;
        }
        group.wait().await
    }
}

async fn upload(store: Arc<dyn ObjectStore>, target: Target, artifact: Artifact) -> Result<()> {
    let metadata = tokio::fs::metadata(&artifact.path)
        .await
        .map_err(|e| PipelineError::fs("open", &artifact.path, e))?;
    if !metadata.is_file() {
        return Err(PipelineError::fs(
            "open",
            &artifact.path,
            std::io::Error::other("not a regular file"),
        ));
    }
    let key = object_key(&target.folder, &artifact.repo_subpath, &artifact.name);

    info!(bucket = %target.bucket, key = %key, artifact = %artifact.name, size = metadata.len(), "uploading");
    store
        .put_object(PutObject {
            bucket: target.bucket,
            key,
            path: artifact.path,
            content_length: metadata.len(),
            acl: target.acl,
        })
        .await
}

/// Run the publish stage.
pub async fn run(ctx: &ReleaseContext, connector: Arc<dyn StoreConnector>) -> Result<StageOutcome> {
    S3Publisher::new(connector).publish(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use async_trait::async_trait;
    use relpack_schema::LINUX;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct RecordingStore {
        puts: Mutex<Vec<PutObject>>,
        bodies: Mutex<HashMap<String, Vec<u8>>>,
        connects: Mutex<Vec<String>>,
        fail_key: Option<&'static str>,
    }

    impl RecordingStore {
        fn keys(&self) -> Vec<String> {
            let mut keys: Vec<_> = self.puts.lock().unwrap().iter().map(|p| p.key.clone()).collect();
            keys.sort();
            keys
        }
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_object(&self, request: PutObject) -> Result<()> {
            if self.fail_key == Some(request.key.as_str()) {
                return Err(PipelineError::Storage {
                    key: request.key,
                    message: "AccessDenied".to_string(),
                });
            }
            let body = tokio::fs::read(&request.path).await.unwrap();
            assert_eq!(body.len() as u64, request.content_length);
            self.bodies.lock().unwrap().insert(request.key.clone(), body);
            self.puts.lock().unwrap().push(request);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Connector(Arc<RecordingStore>);

    #[async_trait]
    impl StoreConnector for Connector {
        async fn connect(&self, destination: &S3Destination) -> Result<Arc<dyn ObjectStore>> {
            self.0.connects.lock().unwrap().push(destination.bucket.clone());
            Ok(Arc::clone(&self.0) as Arc<dyn ObjectStore>)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        ctx: ReleaseContext,
        store: Arc<RecordingStore>,
    }

    fn fixture(destinations: Vec<S3Destination>, store: RecordingStore) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = ProjectConfig {
            project_name: "app".to_string(),
            dist: dir.path().to_path_buf(),
            alpine: Vec::new(),
            s3: destinations,
        };
        let env = HashMap::from([("STAGE".to_string(), "prod".to_string())]);
        let ctx = ReleaseContext::new(config, "1.2.3").with_env(env);

        for arch in ["amd64", "arm64"] {
            let name = format!("app_linux_{arch}");
            let path = dir.path().join(&name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            ctx.artifacts.add(
                Artifact::new(ArtifactKind::UploadableBinary, name, path).with_platform(LINUX, arch, ""),
            );
        }
        let index = dir.path().join("APKINDEX.tar.gz");
        std::fs::write(&index, b"index").unwrap();
        ctx.artifacts.add(
            Artifact::new(ArtifactKind::ApkIndex, "APKINDEX.tar.gz", index)
                .with_platform(LINUX, "amd64", "")
                .with_repo_subpath("alpine/edge/main/x86_64"),
        );

        Fixture {
            _dir: dir,
            ctx,
            store: Arc::new(store),
        }
    }

    fn destination(kinds: &[&str]) -> S3Destination {
        let mut dest = S3Destination::new("{{ .Env.STAGE }}-releases");
        dest.folder = "releases/{{.Version}}".to_string();
        dest.artifacts = kinds.iter().map(ToString::to_string).collect();
        dest
    }

    async fn publish(f: &Fixture) -> Result<StageOutcome> {
        run(&f.ctx, Arc::new(Connector(Arc::clone(&f.store)))).await
    }

    #[test]
    fn test_object_key() {
        assert_eq!(object_key("releases/1.2.3", "", "app"), "releases/1.2.3/app");
        assert_eq!(
            object_key("/releases/", "alpine/edge/main/x86_64", "APKINDEX.tar.gz"),
            "releases/alpine/edge/main/x86_64/APKINDEX.tar.gz"
        );
        assert_eq!(object_key("", "", "app"), "app");
    }

    #[test]
    fn test_kind_filter_validation() {
        assert!(kind_filter(&destination(&["binary", "apkindex"])).is_ok());
        assert!(matches!(
            kind_filter(&destination(&[])),
            Err(PipelineError::Config(_))
        ));

        let mut no_bucket = destination(&["binary"]);
        no_bucket.bucket = String::new();
        assert!(matches!(kind_filter(&no_bucket), Err(PipelineError::Config(_))));

        match kind_filter(&destination(&["binary", "deb"])) {
            Err(PipelineError::UnknownArtifactType(name)) => assert_eq!(name, "deb"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skips_when_not_configured_or_disabled() {
        let f = fixture(Vec::new(), RecordingStore::default());
        assert!(publish(&f).await.unwrap().is_skipped());

        let mut f = fixture(vec![destination(&["binary"])], RecordingStore::default());
        f.ctx.skip_publish = true;
        assert!(publish(&f).await.unwrap().is_skipped());
        assert!(f.store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_uploads_matching_artifacts() {
        let f = fixture(vec![destination(&["binary"])], RecordingStore::default());

        let outcome = publish(&f).await.unwrap();
        assert_eq!(outcome, StageOutcome::Completed);
        assert_eq!(
            f.store.keys(),
            vec!["releases/1.2.3/app_linux_amd64", "releases/1.2.3/app_linux_arm64"]
        );

        let puts = f.store.puts.lock().unwrap();
        let amd64 = puts.iter().find(|p| p.key.ends_with("amd64")).unwrap();
        assert_eq!(amd64.bucket, "prod-releases");
        assert_eq!(amd64.acl, "private");
        assert_eq!(amd64.content_length, 15);
        assert_eq!(
            f.store.bodies.lock().unwrap()[&amd64.key],
            b"app_linux_amd64".to_vec()
        );
    }

    #[tokio::test]
    async fn test_repo_subpath_is_part_of_the_key() {
        let f = fixture(vec![destination(&["apkindex"])], RecordingStore::default());
        publish(&f).await.unwrap();
        assert_eq!(
            f.store.keys(),
            vec!["releases/1.2.3/alpine/edge/main/x86_64/APKINDEX.tar.gz"]
        );
    }

    #[tokio::test]
    async fn test_zero_matches_uploads_nothing() {
        let f = fixture(vec![destination(&["checksum"])], RecordingStore::default());
        assert_eq!(publish(&f).await.unwrap(), StageOutcome::Completed);
        assert!(f.store.keys().is_empty());
        assert!(f.store.connects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_kind_fails_before_any_upload() {
        let f = fixture(
            vec![destination(&["binary"]), destination(&["deb"])],
            RecordingStore::default(),
        );
        let err = publish(&f).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownArtifactType(ref n) if n == "deb"));
        assert!(err.is_fatal_config());
        assert!(f.store.keys().is_empty());
    }

    #[tokio::test]
    async fn test_template_failure_aborts_destination() {
        let mut dest = destination(&["binary"]);
        dest.folder = "{{ .Env.MISSING }}".to_string();
        let f = fixture(vec![dest], RecordingStore::default());

        let failures = publish(&f).await.unwrap_err().into_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], PipelineError::Template { .. }));
        assert!(f.store.keys().is_empty());
        assert!(f.store.connects.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unit_failures_are_independent() {
        let f = fixture(
            vec![destination(&["binary", "apkindex"])],
            RecordingStore {
                fail_key: Some("releases/1.2.3/app_linux_arm64"),
                ..RecordingStore::default()
            },
        );
        f.ctx.artifacts.add(
            Artifact::new(ArtifactKind::UploadableBinary, "ghost", "/does/not/exist")
                .with_platform(LINUX, "386", ""),
        );

        let failures = publish(&f).await.unwrap_err().into_failures();
        assert_eq!(failures.len(), 2);
        assert!(failures.iter().any(|e| matches!(e, PipelineError::Storage { .. })));
        assert!(failures.iter().any(|e| matches!(e, PipelineError::Filesystem { .. })));
        assert_eq!(
            f.store.keys(),
            vec![
                "releases/1.2.3/alpine/edge/main/x86_64/APKINDEX.tar.gz",
                "releases/1.2.3/app_linux_amd64",
            ]
        );
    }

    #[tokio::test]
    async fn test_fans_out_over_destinations() {
        let mut archive = destination(&["apkindex"]);
        archive.bucket = "mirror".to_string();
        archive.folder = String::new();
        archive.acl = "public-read".to_string();
        let f = fixture(
            vec![destination(&["binary"]), archive],
            RecordingStore::default(),
        );

        publish(&f).await.unwrap();

        let mut connects = f.store.connects.lock().unwrap().clone();
        connects.sort();
        assert_eq!(connects, vec!["mirror", "{{ .Env.STAGE }}-releases"]);

        let puts = f.store.puts.lock().unwrap();
        assert_eq!(puts.len(), 3);
        let index = puts.iter().find(|p| p.bucket == "mirror").unwrap();
        assert_eq!(index.key, "alpine/edge/main/x86_64/APKINDEX.tar.gz");
        assert_eq!(index.acl, "public-read");
    }

    #[tokio::test]
    async fn test_directory_is_not_uploaded() {
        let f = fixture(vec![destination(&["binary"])], RecordingStore::default());
        f.ctx.artifacts.add(
            Artifact::new(ArtifactKind::UploadableBinary, "dir", f.ctx.config.dist.clone())
                .with_platform(LINUX, "386", ""),
        );

        let failures = publish(&f).await.unwrap_err().into_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], PipelineError::Filesystem { .. }));
        assert_eq!(f.store.keys().len(), 2);
    }
}
