//! In-memory collaborators for development and testing
//!
//! Used by the test suites and by mock mode of the API service, which runs the
//! whole pipeline without a cloud account.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deploy_common::{Error, Result};

use crate::clients::{
    AccessPolicy, ArtifactRegistry, CommandOutput, CommandRunner, CommandSpec, ComputePlatform,
    ContainerEngine, ImageRef, RegistryAuth, Repository, RepositorySpec, ServiceHandle,
    ServiceInfo, ServiceSpec,
};

fn lock_err() -> Error {
    Error::storage("lock poisoned")
}

/// Repository path of a pushed image reference,
/// `{region}-docker.pkg.dev/{project}/{repository}/{image}:{tag}`
fn push_target(image_tag: &str) -> Option<(String, String)> {
    let (reference, tag) = image_tag.rsplit_once(':')?;
    let mut parts = reference.split('/');
    let host = parts.next()?;
    let project = parts.next()?;
    let repository = parts.next()?;
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    let region = host.strip_suffix("-docker.pkg.dev")?;

    Some((
        format!(
            "projects/{}/locations/{}/repositories/{}",
            project, region, repository
        ),
        tag.to_string(),
    ))
}

/// When pushed images show up in `list_images`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// On the n-th poll (1-based) and every poll after it
    OnPoll(usize),
    Never,
}

/// Registry holding repositories in memory
#[derive(Debug)]
pub struct MockRegistry {
    repositories: Mutex<HashMap<String, Repository>>,
    /// Tags pushed into each repository path
    images: Mutex<HashMap<String, Vec<String>>>,
    visibility: Mutex<Visibility>,
    transient_polls: AtomicUsize,
    deny_access: AtomicBool,
    lose_create_race: AtomicBool,
    get_calls: AtomicUsize,
    create_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self {
            repositories: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
            visibility: Mutex::new(Visibility::OnPoll(1)),
            transient_polls: AtomicUsize::new(0),
            deny_access: AtomicBool::new(false),
            lose_create_race: AtomicBool::new(false),
            get_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a repository at `path`
    pub fn with_repository(self, path: &str) -> Self {
        if let Ok(mut repos) = self.repositories.lock() {
            repos.insert(
                path.to_string(),
                Repository {
                    name: path.to_string(),
                    format: "DOCKER".to_string(),
                    description: "existing".to_string(),
                },
            );
        }
        self
    }

    pub fn with_visibility(self, visibility: Visibility) -> Self {
        if let Ok(mut v) = self.visibility.lock() {
            *v = visibility;
        }
        self
    }

    /// The first `n` polls fail with `TransientUnavailable`
    pub fn with_transient_polls(self, n: usize) -> Self {
        self.transient_polls.store(n, Ordering::SeqCst);
        self
    }

    /// Every repository lookup fails with `PermissionDenied`
    pub fn deny_access(self) -> Self {
        self.deny_access.store(true, Ordering::SeqCst);
        self
    }

    /// Another caller creates the repository just before ours, so
    /// `create_repository` stores it and still reports `AlreadyExists`
    pub fn losing_create_race(self) -> Self {
        self.lose_create_race.store(true, Ordering::SeqCst);
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn has_repository(&self, path: &str) -> bool {
        self.repositories
            .lock()
            .map(|r| r.contains_key(path))
            .unwrap_or(false)
    }

    /// Store a pushed image. The target repository must already exist.
    pub fn record_push(&self, image_tag: &str) -> Result<()> {
        let (path, tag) = push_target(image_tag)
            .ok_or_else(|| Error::Push(format!("malformed image reference: {}", image_tag)))?;

        if !self.has_repository(&path) {
            return Err(Error::Push(format!("repository {} does not exist", path)));
        }

        self.images
            .lock()
            .map_err(|_| lock_err())?
            .entry(path)
            .or_default()
            .push(tag);
        Ok(())
    }
}

#[async_trait]
impl ArtifactRegistry for MockRegistry {
    async fn get_repository(&self, path: &str) -> Result<Repository> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);

        if self.deny_access.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied(format!("no access to {}", path)));
        }

        let repos = self.repositories.lock().map_err(|_| lock_err())?;
        repos
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn create_repository(
        &self,
        parent: &str,
        repository_id: &str,
        spec: &RepositorySpec,
    ) -> Result<Repository> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let name = format!("{}/repositories/{}", parent, repository_id);
        let mut repos = self.repositories.lock().map_err(|_| lock_err())?;
        if repos.contains_key(&name) {
            return Err(Error::AlreadyExists(name));
        }

        if self.lose_create_race.load(Ordering::SeqCst) {
            repos.insert(
                name.clone(),
                Repository {
                    name: name.clone(),
                    format: spec.format.clone(),
                    description: "created concurrently".to_string(),
                },
            );
            return Err(Error::AlreadyExists(name));
        }

        let repository = Repository {
            name: name.clone(),
            format: spec.format.clone(),
            description: spec.description.clone(),
        };
        repos.insert(name, repository.clone());
        Ok(repository)
    }

    async fn list_images(&self, repository_path: &str, tag_filter: &str) -> Result<Vec<ImageRef>> {
        let poll = self.list_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if poll <= self.transient_polls.load(Ordering::SeqCst) {
            return Err(Error::transient("registry unavailable"));
        }

        let visibility = *self.visibility.lock().map_err(|_| lock_err())?;
        let visible = match visibility {
            Visibility::OnPoll(n) => poll >= n,
            Visibility::Never => false,
        };

        if !visible || !self.has_repository(repository_path) {
            return Ok(Vec::new());
        }

        let images = self.images.lock().map_err(|_| lock_err())?;
        Ok(images
            .get(repository_path)
            .into_iter()
            .flatten()
            .enumerate()
            .filter(|(_, tag)| tag.as_str() == tag_filter)
            .map(|(i, tag)| ImageRef {
                uri: format!("{}@sha256:{:064x}", repository_path, i + 1),
                tags: vec![tag.clone()],
            })
            .collect())
    }
}

/// Container engine that records what it was asked to do
///
/// Pushes only reach a registry when the engine was created with
/// `publishing_to`.
#[derive(Debug, Default)]
pub struct MockEngine {
    builds: Mutex<Vec<(PathBuf, String)>>,
    pushes: Mutex<Vec<String>>,
    registry: Option<Arc<MockRegistry>>,
    fail_build: AtomicBool,
    fail_push: AtomicBool,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose pushes land in `registry`
    pub fn publishing_to(registry: Arc<MockRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    pub fn failing_build(self) -> Self {
        self.fail_build.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_push(self) -> Self {
        self.fail_push.store(true, Ordering::SeqCst);
        self
    }

    pub fn builds(&self) -> Vec<(PathBuf, String)> {
        self.builds.lock().map(|b| b.clone()).unwrap_or_default()
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn build(&self, path: &Path, tag: &str) -> Result<()> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(Error::Build("mock build failure".to_string()));
        }

        self.builds
            .lock()
            .map_err(|_| lock_err())?
            .push((path.to_path_buf(), tag.to_string()));
        Ok(())
    }

    async fn push(&self, tag: &str) -> Result<()> {
        if self.fail_push.load(Ordering::SeqCst) {
            return Err(Error::Push("mock push failure".to_string()));
        }

        if let Some(registry) = &self.registry {
            registry.record_push(tag)?;
        }

        self.pushes
            .lock()
            .map_err(|_| lock_err())?
            .push(tag.to_string());
        Ok(())
    }
}

/// Registry auth that only remembers the hosts it configured
#[derive(Debug, Default)]
pub struct MockAuth {
    hosts: Mutex<Vec<String>>,
}

impl MockAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().map(|h| h.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RegistryAuth for MockAuth {
    async fn configure_auth(&self, registry_host: &str) -> Result<()> {
        self.hosts
            .lock()
            .map_err(|_| lock_err())?
            .push(registry_host.to_string());
        Ok(())
    }
}

/// A service held by `MockCompute`
#[derive(Debug, Clone)]
pub struct MockService {
    pub spec: ServiceSpec,
    pub policy: Option<AccessPolicy>,
}

/// Compute platform keeping services in memory
#[derive(Debug, Default)]
pub struct MockCompute {
    services: Mutex<HashMap<String, MockService>>,
    fail_create: AtomicBool,
    fail_policy: AtomicBool,
    create_calls: AtomicUsize,
    policy_calls: AtomicUsize,
}

impl MockCompute {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create(self) -> Self {
        self.fail_create.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_policy(self) -> Self {
        self.fail_policy.store(true, Ordering::SeqCst);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn policy_calls(&self) -> usize {
        self.policy_calls.load(Ordering::SeqCst)
    }

    pub fn service(&self, service_id: &str) -> Option<MockService> {
        self.services
            .lock()
            .ok()
            .and_then(|s| {
                s.iter()
                    .find(|(name, _)| name.rsplit('/').next() == Some(service_id))
                    .map(|(_, svc)| svc.clone())
            })
    }

    pub fn service_count(&self) -> usize {
        self.services.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ComputePlatform for MockCompute {
    async fn create_service(&self, parent: &str, spec: &ServiceSpec) -> Result<ServiceHandle> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::InvalidRemoteConfig(
                "mock service creation failure".to_string(),
            ));
        }

        let handle = ServiceHandle::new(parent, &spec.service_id);
        let mut services = self.services.lock().map_err(|_| lock_err())?;
        if services.contains_key(&handle.name) {
            return Err(Error::AlreadyExists(handle.name));
        }

        services.insert(
            handle.name.clone(),
            MockService {
                spec: spec.clone(),
                policy: None,
            },
        );
        Ok(handle)
    }

    async fn set_access_policy(
        &self,
        service: &ServiceHandle,
        policy: &AccessPolicy,
    ) -> Result<()> {
        self.policy_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_policy.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied(
                "mock setIamPolicy failure".to_string(),
            ));
        }

        let mut services = self.services.lock().map_err(|_| lock_err())?;
        let svc = services
            .get_mut(&service.name)
            .ok_or_else(|| Error::NotFound(service.name.clone()))?;
        svc.policy = Some(policy.clone());
        Ok(())
    }

    async fn get_service(&self, service: &ServiceHandle) -> Result<ServiceInfo> {
        let services = self.services.lock().map_err(|_| lock_err())?;
        if !services.contains_key(&service.name) {
            return Err(Error::NotFound(service.name.clone()));
        }

        let id = service.service_id();
        Ok(ServiceInfo {
            uri: format!("https://{}-mock.a.run.app", id),
            latest_revision: format!("{}-00001", id),
        })
    }

    async fn list_services(&self, parent: &str) -> Result<Vec<ServiceHandle>> {
        let services = self.services.lock().map_err(|_| lock_err())?;
        let prefix = format!("{}/services/", parent);

        Ok(services
            .keys()
            .filter(|name| name.starts_with(&prefix))
            .map(|name| ServiceHandle { name: name.clone() })
            .collect())
    }
}

/// Command runner returning a fixed output and recording every call
#[derive(Debug)]
pub struct MockCommandRunner {
    output: CommandOutput,
    calls: Mutex<Vec<CommandSpec>>,
}

impl Default for MockCommandRunner {
    fn default() -> Self {
        Self {
            output: CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockCommandRunner {
    /// Every command exits with `code` and prints `stderr`
    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            output: CommandOutput {
                code: Some(code),
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().map_err(|_| lock_err())?.push(spec.clone());
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPO: &str = "projects/p/locations/us-central1/repositories/secure-app-a";
    const IMAGE: &str = "us-central1-docker.pkg.dev/p/secure-app-a/secure-app:20240101-000000-abcdefgh";

    #[test]
    fn test_push_target() {
        assert_eq!(
            push_target(IMAGE),
            Some((REPO.to_string(), "20240101-000000-abcdefgh".to_string()))
        );
        assert_eq!(push_target("docker.io/library/nginx:latest"), None);
        assert_eq!(push_target("no-tag"), None);
    }

    #[tokio::test]
    async fn test_lists_only_pushed_tags() {
        let registry = Arc::new(MockRegistry::new().with_repository(REPO));
        let engine = MockEngine::publishing_to(registry.clone());

        assert!(registry
            .list_images(REPO, "20240101-000000-abcdefgh")
            .await
            .unwrap()
            .is_empty());

        engine.push(IMAGE).await.unwrap();

        let images = registry
            .list_images(REPO, "20240101-000000-abcdefgh")
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].tags, vec!["20240101-000000-abcdefgh"]);
        assert!(registry.list_images(REPO, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_push_requires_repository() {
        let registry = Arc::new(MockRegistry::new());
        let engine = MockEngine::publishing_to(registry.clone());

        let err = engine.push(IMAGE).await.unwrap_err();

        assert!(matches!(err, Error::Push(_)));
        assert!(engine.pushes().is_empty());
    }
}
