//! Package then publish, end to end, against fake tools and a fake store.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relpack_core::io::store::{ObjectStore, PutObject, StoreConnector};
use relpack_core::io::tool::{ToolInvocation, ToolOutput, ToolRunner};
use relpack_core::stages::{apk, s3};
use relpack_core::{
    AlpineSpec, PipelineError, ProjectConfig, ReleaseContext, Result, S3Destination, StageOutcome,
};
use relpack_schema::{Artifact, ArtifactKind, Filter, LINUX};

/// Behaves like `abuild -r` and `abuild-sign` closely enough for the
/// packaging workflow: writes the package and index where abuild would.
#[derive(Debug, Default)]
struct FakeAbuild {
    programs: Mutex<Vec<String>>,
}

fn descriptor_value(apkbuild: &str, key: &str) -> String {
    apkbuild
        .lines()
        .find_map(|l| l.strip_prefix(&format!("{key}=")))
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ToolRunner for FakeAbuild {
    async fn run(&self, invocation: &ToolInvocation) -> std::io::Result<ToolOutput> {
        self.programs.lock().unwrap().push(invocation.program.clone());
        let dir = &invocation.dir;

        match invocation.program.as_str() {
            "abuild" => {
                let apkbuild = std::fs::read_to_string(dir.join("APKBUILD"))?;
                let repo = dir.parent().and_then(Path::file_name).unwrap();
                let arch = invocation.env_value("CBUILD").unwrap();
                let out = dir.join(repo).join(arch);
                std::fs::create_dir_all(&out)?;
                let name = format!(
                    "{}-{}-r{}.apk",
                    descriptor_value(&apkbuild, "pkgname"),
                    descriptor_value(&apkbuild, "pkgver"),
                    descriptor_value(&apkbuild, "pkgrel"),
                );
                std::fs::write(out.join(name), apkbuild)?;
                std::fs::write(out.join("APKINDEX.tar.gz"), b"index")?;
            }
            "abuild-sign" => {
                let index = invocation.args.last().unwrap();
                let mut data = std::fs::read(index)?;
                data.extend_from_slice(b"+signed");
                std::fs::write(index, data)?;
            }
            other => panic!("unexpected tool {other}"),
        }

        Ok(ToolOutput {
            exit_code: Some(0),
            output: String::new(),
        })
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, String)>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, request: PutObject) -> Result<()> {
        let body = tokio::fs::read(&request.path).await.unwrap();
        assert_eq!(body.len() as u64, request.content_length);
        self.objects
            .lock()
            .unwrap()
            .insert((request.bucket, request.key), (body, request.acl));
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryConnector(Arc<MemoryStore>);

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, _: &S3Destination) -> Result<Arc<dyn ObjectStore>> {
        Ok(Arc::clone(&self.0) as Arc<dyn ObjectStore>)
    }
}

fn context(dir: &Path) -> ReleaseContext {
    let mut spec = AlpineSpec::new("app");
    spec.rel = 2;
    spec.description = "Example application".to_string();

    let mut dest = S3Destination::new("releases");
    dest.folder = "{{ .ProjectName }}/{{ .Tag }}".to_string();
    dest.acl = "public-read".to_string();
    dest.artifacts = vec!["apk".to_string(), "apkindex".to_string(), "binary".to_string()];

    let config = ProjectConfig {
        project_name: "app".to_string(),
        dist: dir.join("dist"),
        alpine: vec![spec],
        s3: vec![dest],
    };
    let env = HashMap::from([
        ("PACKAGER_PUBKEY".to_string(), "/keys/app.rsa.pub".to_string()),
        ("PACKAGER_PRIVKEY".to_string(), "/keys/app.rsa".to_string()),
    ]);
    let ctx = ReleaseContext::new(config, "0.4.0").with_env(env);

    for arch in ["amd64", "386"] {
        let path = dir.join(format!("app_{arch}"));
        std::fs::write(&path, arch).unwrap();
        ctx.artifacts.add(
            Artifact::new(ArtifactKind::UploadableBinary, format!("app_linux_{arch}"), path)
                .with_platform(LINUX, arch, ""),
        );
    }
    ctx
}

#[tokio::test]
async fn test_package_then_publish() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    let tools = Arc::new(FakeAbuild::default());
    let store = Arc::new(MemoryStore::default());

    let packaged = apk::run(&ctx, tools.clone()).await.unwrap();
    assert_eq!(packaged, StageOutcome::Completed);

    let programs = tools.programs.lock().unwrap().clone();
    assert_eq!(programs.iter().filter(|p| *p == "abuild").count(), 2);
    assert_eq!(programs.iter().filter(|p| *p == "abuild-sign").count(), 2);

    let indexes = ctx
        .artifacts
        .filter(&Filter::by_type(ArtifactKind::ApkIndex))
        .list();
    assert_eq!(indexes.len(), 2);
    for index in &indexes {
        assert_eq!(std::fs::read(&index.path).unwrap(), b"index+signed");
    }

    let published = s3::run(&ctx, Arc::new(MemoryConnector(Arc::clone(&store))))
        .await
        .unwrap();
    assert_eq!(published, StageOutcome::Completed);

    let objects = store.objects.lock().unwrap();
    let mut keys: Vec<_> = objects.keys().map(|(_, key)| key.as_str()).collect();
    keys.sort_unstable();
    assert_eq!(
        keys,
        vec![
            "app/v0.4.0/alpine/edge/main/x86/APKINDEX.tar.gz",
            "app/v0.4.0/alpine/edge/main/x86/app-0.4.0-r2.apk",
            "app/v0.4.0/alpine/edge/main/x86_64/APKINDEX.tar.gz",
            "app/v0.4.0/alpine/edge/main/x86_64/app-0.4.0-r2.apk",
            "app/v0.4.0/app_linux_386",
            "app/v0.4.0/app_linux_amd64",
        ]
    );

    let (body, acl) = &objects[&(
        "releases".to_string(),
        "app/v0.4.0/alpine/edge/main/x86_64/app-0.4.0-r2.apk".to_string(),
    )];
    assert_eq!(acl, "public-read");
    let apkbuild = String::from_utf8_lossy(body);
    assert!(apkbuild.contains("pkgdesc=\"Example application\""));
    assert!(apkbuild.contains("$startdir/x86_64/app_amd64"));
}

#[tokio::test]
async fn test_cancelled_context_stops_packaging() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(dir.path());
    ctx.cancel.cancel();
    let tools = Arc::new(FakeAbuild::default());

    let err = apk::run(&ctx, tools.clone()).await.unwrap_err();
    let failures = err.into_failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|e| matches!(e, PipelineError::Cancelled)));
    assert!(tools.programs.lock().unwrap().is_empty());
    assert!(
        ctx.artifacts
            .filter(&Filter::by_type(ArtifactKind::ApkPackage))
            .is_empty()
    );
}
