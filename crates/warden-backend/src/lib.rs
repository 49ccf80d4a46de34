//! # warden-backend
//!
//! The parts of the Linux backend that live in the orchestrating process,
//! outside any container: the job tracker and its output streams, the
//! per-host uid pool and disk quota manager, and the glue that provisions
//! them for each container.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod command_runner;
pub mod container;
pub mod job_tracker;
pub mod quota_manager;
pub mod uid_pool;

pub use command_runner::{CommandOutput, CommandRunner, JobCommand, LocalRunner};
pub use container::{ContainerResources, LinuxBackend};
pub use job_tracker::{JobInfo, JobTracker};
pub use quota_manager::QuotaManager;
pub use uid_pool::UidPool;
