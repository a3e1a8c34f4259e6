/// Environment Provisioner - base images and isolated containers
///
/// **Responsibilities:**
/// 1. Make sure a language's base image is present, fetching it at most once
///    per process even when several requests arrive together
/// 2. Create and start one locked-down container per request, with the
///    request's workspace bind-mounted read-write
/// 3. Tear the container down again, including when the owning future is
///    dropped half-way
use crate::backend::{ContainerBackend, ContainerSpec};
use crate::error::SandboxError;
use sandbox_common::config::{SandboxLimits, CONTAINER_WORKDIR};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A live, isolated execution context
#[derive(Debug, Clone)]
pub struct Environment {
    pub id: String,
    pub name: String,
    pub image: String,
    pub workspace: PathBuf,
    pub limits: SandboxLimits,
}

pub struct EnvironmentProvisioner<B: ContainerBackend> {
    backend: Arc<B>,
    /// One cell per image; initialized once the image is known to be local
    images: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    fetches: AtomicUsize,
}

impl<B: ContainerBackend> EnvironmentProvisioner<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            images: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Number of image pulls started by this provisioner
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Idempotent; concurrent callers for the same image wait on one fetch.
    /// A failed fetch is not cached, the next caller tries again.
    pub async fn ensure_image_available(&self, image: &str) -> Result<(), SandboxError> {
        let cell = {
            let mut images = self.images.lock().await;
            images.entry(image.to_string()).or_default().clone()
        };

        cell.get_or_try_init(|| self.fetch_image(image)).await?;
        Ok(())
    }

    async fn fetch_image(&self, image: &str) -> Result<(), SandboxError> {
        match self.backend.image_exists(image).await {
            Ok(true) => {
                debug!(image = %image, "Image cache hit");
                return Ok(());
            }
            Ok(false) => warn!(image = %image, "Image cache miss, pulling now"),
            Err(e) => warn!(image = %image, error = %e, "Image inspect failed, pulling anyway"),
        }

        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.backend
            .pull_image(image)
            .await
            .map_err(|e| SandboxError::ImageUnavailable {
                image: image.to_string(),
                message: format!("{:#}", e),
            })?;

        info!(image = %image, "Image available");
        Ok(())
    }

    /// Create and start a container for one request
    ///
    /// The container is owned by the returned guard from the moment it
    /// exists, so a caller cancelled mid-start still gets it removed.
    pub async fn create_environment(
        &self,
        image: &str,
        workspace: &Path,
        limits: &SandboxLimits,
    ) -> Result<(Environment, EnvironmentGuard<B>), SandboxError> {
        // Docker only accepts absolute bind sources
        let workspace = tokio::fs::canonicalize(workspace).await.map_err(|e| {
            SandboxError::ProvisionFailure(format!(
                "Workspace {} is not usable: {}",
                workspace.display(),
                e
            ))
        })?;

        let spec = ContainerSpec {
            name: format!("sandbox-{}", Uuid::new_v4()),
            image: image.to_string(),
            workspace: workspace.clone(),
            limits: limits.clone(),
            env: vec![format!("TMPDIR={}", CONTAINER_WORKDIR)],
        };

        let id = self
            .backend
            .create_container(&spec)
            .await
            .map_err(|e| SandboxError::ProvisionFailure(format!("{:#}", e)))?;

        let guard = EnvironmentGuard {
            backend: Arc::clone(&self.backend),
            container_id: Some(id.clone()),
        };

        if let Err(e) = self.backend.start_container(&id).await {
            guard.release().await;
            return Err(SandboxError::ProvisionFailure(format!("{:#}", e)));
        }

        info!(
            container_id = %id,
            image = %image,
            memory_bytes = limits.memory_bytes,
            nano_cpus = limits.nano_cpus,
            "Environment ready"
        );

        let environment = Environment {
            id,
            name: spec.name,
            image: spec.image,
            workspace,
            limits: limits.clone(),
        };
        Ok((environment, guard))
    }
}

async fn remove_quietly<B: ContainerBackend>(backend: &B, container_id: &str) {
    match backend.remove_container(container_id).await {
        Ok(()) => debug!(container_id = %container_id, "Environment removed"),
        Err(e) => warn!(container_id = %container_id, error = %e, "Failed to remove environment"),
    }
}

/// Removes the container when dropped unless already released.
/// Covers panics and cancelled request futures.
pub struct EnvironmentGuard<B: ContainerBackend> {
    backend: Arc<B>,
    container_id: Option<String>,
}

impl<B: ContainerBackend> std::fmt::Debug for EnvironmentGuard<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentGuard")
            .field("container_id", &self.container_id)
            .finish_non_exhaustive()
    }
}

impl<B: ContainerBackend> EnvironmentGuard<B> {
    /// Remove the container now
    pub async fn release(mut self) {
        if let Some(id) = self.container_id.take() {
            remove_quietly(self.backend.as_ref(), &id).await;
        }
    }
}

impl<B: ContainerBackend> Drop for EnvironmentGuard<B> {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };

        // Cannot be async in Drop
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                handle.spawn(async move {
                    remove_quietly(backend.as_ref(), &container_id).await;
                });
            }
            Err(_) => warn!(container_id = %container_id, "No runtime to remove environment"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeBackend;
    use std::time::Duration;

    const IMAGE: &str = "gcc:latest";

    #[tokio::test]
    async fn test_cached_image_is_not_pulled() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE));
        let provisioner = EnvironmentProvisioner::new(backend.clone());

        provisioner.ensure_image_available(IMAGE).await.unwrap();

        assert_eq!(provisioner.fetches(), 0);
        assert!(backend.pull_attempts().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_once() {
        let backend = Arc::new(FakeBackend::new());
        let provisioner = EnvironmentProvisioner::new(backend.clone());

        for _ in 0..3 {
            provisioner.ensure_image_available(IMAGE).await.unwrap();
        }

        assert_eq!(provisioner.fetches(), 1);
        assert_eq!(backend.pull_attempts(), vec![IMAGE.to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_first_requests_share_one_pull() {
        let backend = Arc::new(FakeBackend::new());
        let provisioner = Arc::new(EnvironmentProvisioner::new(backend.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provisioner = Arc::clone(&provisioner);
            handles.push(tokio::spawn(async move {
                provisioner.ensure_image_available(IMAGE).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(backend.pull_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_pull_is_retried_later() {
        let backend = Arc::new(FakeBackend::new().failing_pull());
        let provisioner = EnvironmentProvisioner::new(backend.clone());

        let err = provisioner.ensure_image_available(IMAGE).await.unwrap_err();
        assert!(matches!(err, SandboxError::ImageUnavailable { ref image, .. } if image == IMAGE));

        backend.set_fail_pull(false);
        provisioner.ensure_image_available(IMAGE).await.unwrap();
        assert_eq!(backend.pull_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_create_environment_mounts_workspace() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE));
        let provisioner = EnvironmentProvisioner::new(backend.clone());
        let workspace = tempfile::tempdir().unwrap();

        let (env, _guard) = provisioner
            .create_environment(IMAGE, workspace.path(), &SandboxLimits::default())
            .await
            .unwrap();

        let created = backend.created_containers();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].workspace, env.workspace);
        assert!(created[0].workspace.is_absolute());
        assert_eq!(created[0].limits, SandboxLimits::default());
        assert!(created[0].env.contains(&"TMPDIR=/app".to_string()));
        assert!(env.name.starts_with("sandbox-"));
    }

    #[tokio::test]
    async fn test_create_failure_is_provision_failure() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE).failing_create());
        let provisioner = EnvironmentProvisioner::new(backend);
        let workspace = tempfile::tempdir().unwrap();

        let err = provisioner
            .create_environment(IMAGE, workspace.path(), &SandboxLimits::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::ProvisionFailure(_)));
    }

    #[tokio::test]
    async fn test_start_failure_removes_container() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE).failing_start());
        let provisioner = EnvironmentProvisioner::new(backend.clone());
        let workspace = tempfile::tempdir().unwrap();

        let err = provisioner
            .create_environment(IMAGE, workspace.path(), &SandboxLimits::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::ProvisionFailure(_)));
        assert_eq!(backend.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_start_removes_container() {
        let backend = Arc::new(
            FakeBackend::new()
                .with_local_image(IMAGE)
                .with_start_delay(Duration::from_secs(5)),
        );
        let provisioner = EnvironmentProvisioner::new(backend.clone());
        let workspace = tempfile::tempdir().unwrap();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            provisioner.create_environment(IMAGE, workspace.path(), &SandboxLimits::default()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(backend.created_containers().len(), 1);

        // Removal runs on a spawned task
        for _ in 0..50 {
            if backend.live_containers() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_missing_workspace_is_provision_failure() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE));
        let provisioner = EnvironmentProvisioner::new(backend.clone());

        let err = provisioner
            .create_environment(IMAGE, Path::new("/does/not/exist"), &SandboxLimits::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::ProvisionFailure(_)));
        assert!(backend.created_containers().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_guard_removes_container() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE));
        let provisioner = EnvironmentProvisioner::new(backend.clone());
        let workspace = tempfile::tempdir().unwrap();

        let (env, guard) = provisioner
            .create_environment(IMAGE, workspace.path(), &SandboxLimits::default())
            .await
            .unwrap();
        drop(guard);

        // Removal runs on a spawned task
        for _ in 0..50 {
            if backend.live_containers() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(backend.removed_containers(), vec![env.id]);
    }

    #[tokio::test]
    async fn test_released_guard_removes_exactly_once() {
        let backend = Arc::new(FakeBackend::new().with_local_image(IMAGE));
        let provisioner = EnvironmentProvisioner::new(backend.clone());
        let workspace = tempfile::tempdir().unwrap();

        let (env, guard) = provisioner
            .create_environment(IMAGE, workspace.path(), &SandboxLimits::default())
            .await
            .unwrap();
        guard.release().await;
        tokio::task::yield_now().await;

        assert_eq!(backend.removed_containers(), vec![env.id]);
    }
}
