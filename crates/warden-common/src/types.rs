//! Domain primitive types used across the Warden workspace.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Identifier of a job tracked by a container's job tracker.
///
/// Ids are assigned sequentially per tracker and are never reused while the
/// job is still tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(u32);

impl JobId {
    /// Creates a job id from its numeric value.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the id that follows this one, or `None` past `u32::MAX`.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self.0.checked_add(1) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of one of a job's output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamName {
    /// The process's standard output.
    Stdout,
    /// The process's standard error.
    Stderr,
}

impl StreamName {
    /// Returns the conventional lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a job's live output feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStream {
    /// A chunk of bytes written by the process to one of its streams.
    Output {
        /// Stream the chunk was written to.
        name: StreamName,
        /// The bytes, verbatim.
        data: Bytes,
    },
    /// The job finished; always the final item of a feed.
    Exit {
        /// Exit status of the job.
        status: i32,
    },
}

/// Disk quota limits for one container user.
///
/// A zero value means "no limit". When a byte limit is non-zero it takes
/// precedence over the matching block limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLimits {
    /// Soft limit in quota blocks.
    pub block_soft: u64,
    /// Hard limit in quota blocks.
    pub block_hard: u64,
    /// Soft limit on the number of inodes.
    pub inode_soft: u64,
    /// Hard limit on the number of inodes.
    pub inode_hard: u64,
    /// Soft limit in bytes.
    pub byte_soft: u64,
    /// Hard limit in bytes.
    pub byte_hard: u64,
}

/// Disk usage of one container user, as reported by the kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskUsage {
    /// Space in use, as reported by the quota table.
    pub bytes_used: u64,
    /// Number of inodes in use.
    pub inodes_used: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_next_increments() {
        assert_eq!(JobId::new(7).next(), Some(JobId::new(8)));
    }

    #[test]
    fn last_job_id_has_no_successor() {
        assert_eq!(JobId::new(u32::MAX).next(), None);
    }

    #[test]
    fn job_ids_order_numerically() {
        assert!(JobId::new(2) < JobId::new(10));
    }

    #[test]
    fn stream_names_display_lowercase() {
        assert_eq!(StreamName::Stdout.to_string(), "stdout");
        assert_eq!(StreamName::Stderr.to_string(), "stderr");
    }

    #[test]
    fn disk_limits_default_to_unlimited() {
        let limits = DiskLimits::default();
        assert_eq!(limits.block_soft, 0);
        assert_eq!(limits.byte_hard, 0);
    }
}
