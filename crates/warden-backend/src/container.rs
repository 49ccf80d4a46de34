//! Per-container resource provisioning.

use std::path::PathBuf;
use std::sync::Arc;

use warden_common::config::WardenConfig;
use warden_common::error::Result;
use warden_common::types::{DiskLimits, JobId};

use crate::command_runner::{CommandRunner, JobCommand};
use crate::job_tracker::JobTracker;
use crate::quota_manager::QuotaManager;
use crate::uid_pool::UidPool;

/// What one container holds while it exists.
#[derive(Debug, Clone)]
pub struct ContainerResources {
    /// The container's handle.
    pub handle: String,
    /// The container's directory in the depot.
    pub path: PathBuf,
    /// The uid the container's processes run as on the host.
    pub uid: u32,
    /// The container's jobs.
    pub jobs: JobTracker,
    wsh: PathBuf,
    socket: PathBuf,
}

impl ContainerResources {
    /// Builds the command that runs `argv` as `user` inside the container.
    #[must_use]
    pub fn wsh_command(&self, user: &str, argv: &[String]) -> JobCommand {
        JobCommand::through_wsh(&self.wsh, &self.socket, user, argv)
    }

    /// Runs `argv` as `user` inside the container, as a tracked job.
    ///
    /// # Errors
    ///
    /// Returns an error if `wsh` cannot be started.
    pub async fn spawn(
        &self,
        user: &str,
        argv: &[String],
        discard_output: bool,
        auto_link: bool,
    ) -> Result<JobId> {
        self.jobs
            .spawn(&self.wsh_command(user, argv), discard_output, auto_link)
            .await
    }
}

/// The host-wide half of the Linux backend: uid pool, disk quotas, and the
/// runner every container's jobs go through.
pub struct LinuxBackend {
    config: WardenConfig,
    runner: Arc<dyn CommandRunner>,
    uid_pool: UidPool,
    quota_manager: QuotaManager,
}

impl std::fmt::Debug for LinuxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinuxBackend")
            .field("config", &self.config)
            .field("uid_pool", &self.uid_pool)
            .field("quota_manager", &self.quota_manager)
            .finish_non_exhaustive()
    }
}

impl LinuxBackend {
    /// Sets up the backend described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the quota mount
    /// point cannot be determined.
    pub async fn new(config: WardenConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        config.validate()?;
        let uid_pool = UidPool::new(config.uid_pool_start, config.uid_pool_size);
        let quota_manager =
            QuotaManager::new(&config.depot_path, &config.root_path, Arc::clone(&runner)).await?;
        if !config.disk_quota_enabled {
            quota_manager.disable();
        }
        tracing::info!(
            depot = %config.depot_path.display(),
            uid_pool_start = config.uid_pool_start,
            uid_pool_size = config.uid_pool_size,
            "linux backend ready"
        );
        Ok(Self {
            config,
            runner,
            uid_pool,
            quota_manager,
        })
    }

    /// Returns the backend's configuration.
    #[must_use]
    pub const fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Returns the host's uid pool.
    #[must_use]
    pub const fn uid_pool(&self) -> &UidPool {
        &self.uid_pool
    }

    /// Returns the host's quota manager.
    #[must_use]
    pub const fn quota_manager(&self) -> &QuotaManager {
        &self.quota_manager
    }

    /// Allocates a uid for a new container and applies its disk limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the uid pool is exhausted or the limits cannot be
    /// applied; in the latter case the uid is released again.
    pub async fn provision(&self, handle: &str, limits: DiskLimits) -> Result<ContainerResources> {
        let uid = self.uid_pool.acquire()?;
        if let Err(e) = self.quota_manager.set_limits(uid, limits).await {
            self.uid_pool.release(uid);
            return Err(e);
        }
        tracing::info!(handle, uid, "container provisioned");
        Ok(self.resources(handle, uid))
    }

    /// Reclaims the resources of a container that existed before a restart.
    ///
    /// `jobs` lists the container's running jobs and whether each discards
    /// its output.
    ///
    /// # Errors
    ///
    /// Returns an error if `uid` is already in use by another container.
    pub async fn restore(
        &self,
        handle: &str,
        uid: u32,
        jobs: &[(JobId, bool)],
    ) -> Result<ContainerResources> {
        self.uid_pool.remove(uid)?;
        let resources = self.resources(handle, uid);
        for &(id, discard_output) in jobs {
            resources.jobs.restore(id, discard_output).await;
        }
        tracing::info!(handle, uid, jobs = jobs.len(), "container restored");
        Ok(resources)
    }

    /// Returns a container's uid to the pool.
    pub fn destroy(&self, resources: ContainerResources) {
        self.uid_pool.release(resources.uid);
        tracing::info!(handle = %resources.handle, uid = resources.uid, "container destroyed");
    }

    fn resources(&self, handle: &str, uid: u32) -> ContainerResources {
        let path = self.config.container_path(handle);
        ContainerResources {
            handle: handle.to_string(),
            wsh: path.join(&self.config.wsh_path),
            socket: path.join(&self.config.wshd_socket),
            path,
            uid,
            jobs: JobTracker::new(Arc::clone(&self.runner)),
        }
    }
}
