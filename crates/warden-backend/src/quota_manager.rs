//! Disk quotas for container users, enforced through the kernel quota tools.
//!
//! Limits are never cached: every read runs `repquota` afresh.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use warden_common::constants::{DF_TOOL, QUOTA_BLOCK_SIZE, SETQUOTA_TOOL};
use warden_common::error::{Result, WardenError};
use warden_common::types::{DiskLimits, DiskUsage};

use crate::command_runner::{CommandOutput, CommandRunner, JobCommand};

const REPQUOTA_FIELDS: usize = 8;

/// Converts a byte count to quota blocks, rounding up.
#[must_use]
pub const fn blocks_for_bytes(bytes: u64) -> u64 {
    bytes.div_ceil(QUOTA_BLOCK_SIZE)
}

/// Applies and reads disk quotas on the filesystem holding the containers.
pub struct QuotaManager {
    runner: Arc<dyn CommandRunner>,
    repquota: PathBuf,
    mount_point: PathBuf,
    enabled: AtomicBool,
}

impl std::fmt::Debug for QuotaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaManager")
            .field("mount_point", &self.mount_point)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl QuotaManager {
    /// Creates an enabled manager for the filesystem holding `depot_path`.
    ///
    /// The mount point is found once, with `df -P`. `root_path` holds the
    /// `bin/repquota` helper.
    ///
    /// # Errors
    ///
    /// Returns an error if `df` cannot be run or fails.
    pub async fn new(
        depot_path: &Path,
        root_path: &Path,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self> {
        let df = JobCommand::new(DF_TOOL)
            .arg("-P")
            .arg(depot_path.to_string_lossy());
        let output = run_tool(runner.as_ref(), &df).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mount_point = stdout
            .split_whitespace()
            .last()
            .map(PathBuf::from)
            .ok_or_else(|| tool_error(DF_TOOL, "no output"))?;
        tracing::info!(mount_point = %mount_point.display(), "quota mount point");

        Ok(Self {
            runner,
            repquota: root_path.join("bin").join("repquota"),
            mount_point,
            enabled: AtomicBool::new(true),
        })
    }

    /// Returns the mount point quotas are applied on.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Turns every operation into a no-op, for hosts without quota support.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
        tracing::info!("disk quotas disabled");
    }

    /// Returns whether quotas are being enforced.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Sets the limits for `uid`.
    ///
    /// Non-zero byte limits replace the matching block limits, converted
    /// with [`blocks_for_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error if `setquota` cannot be run or fails.
    pub async fn set_limits(&self, uid: u32, limits: DiskLimits) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut limits = limits;
        if limits.byte_soft != 0 {
            limits.block_soft = blocks_for_bytes(limits.byte_soft);
        }
        if limits.byte_hard != 0 {
            limits.block_hard = blocks_for_bytes(limits.byte_hard);
        }

        let setquota = JobCommand::new(SETQUOTA_TOOL)
            .arg("-u")
            .arg(uid.to_string())
            .arg(limits.block_soft.to_string())
            .arg(limits.block_hard.to_string())
            .arg(limits.inode_soft.to_string())
            .arg(limits.inode_hard.to_string())
            .arg(self.mount_point.to_string_lossy());
        let _ = run_tool(self.runner.as_ref(), &setquota).await?;
        tracing::debug!(uid, ?limits, "disk limits set");
        Ok(())
    }

    /// Reads the current limits for `uid`, in blocks and inodes.
    ///
    /// # Errors
    ///
    /// Returns an error if `repquota` fails or its output cannot be parsed.
    pub async fn get_limits(&self, uid: u32) -> Result<DiskLimits> {
        if !self.is_enabled() {
            return Ok(DiskLimits::default());
        }
        let fields = self.report(uid).await?;
        Ok(DiskLimits {
            block_soft: fields[2],
            block_hard: fields[3],
            inode_soft: fields[6],
            inode_hard: fields[7],
            ..DiskLimits::default()
        })
    }

    /// Reads the current usage for `uid`.
    ///
    /// # Errors
    ///
    /// Returns an error if `repquota` fails or its output cannot be parsed.
    pub async fn get_usage(&self, uid: u32) -> Result<DiskUsage> {
        if !self.is_enabled() {
            return Ok(DiskUsage::default());
        }
        let fields = self.report(uid).await?;
        Ok(DiskUsage {
            bytes_used: fields[1],
            inodes_used: fields[5],
        })
    }

    /// Runs `repquota <mount> <uid>` and parses its columns:
    /// id, blocks used, block soft, block hard, grace, inodes used,
    /// inode soft, inode hard.
    async fn report(&self, uid: u32) -> Result<[u64; REPQUOTA_FIELDS]> {
        let repquota = JobCommand::new(&self.repquota)
            .arg(self.mount_point.to_string_lossy())
            .arg(uid.to_string());
        let output = run_tool(self.runner.as_ref(), &repquota).await?;
        parse_report(&output.stdout)
    }
}

fn parse_report(stdout: &[u8]) -> Result<[u64; REPQUOTA_FIELDS]> {
    let text = String::from_utf8_lossy(stdout);
    let mut fields = [0u64; REPQUOTA_FIELDS];
    let mut words = text.split_whitespace();
    for (i, field) in fields.iter_mut().enumerate() {
        let word = words
            .next()
            .ok_or_else(|| tool_error("repquota", format!("expected {REPQUOTA_FIELDS} fields, got {i}")))?;
        *field = word
            .parse()
            .map_err(|_| tool_error("repquota", format!("field {i} is not a number: {word:?}")))?;
    }
    Ok(fields)
}

async fn run_tool(runner: &dyn CommandRunner, command: &JobCommand) -> Result<CommandOutput> {
    let output = runner
        .run(command)
        .await
        .map_err(|e| tool_error(&command.command_line(), e.to_string()))?;
    if output.status != 0 {
        return Err(tool_error(
            &command.command_line(),
            format!(
                "exited with status {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(output)
}

fn tool_error(tool: &str, message: impl Into<String>) -> WardenError {
    WardenError::QuotaTool {
        tool: tool.to_string(),
        message: message.into(),
    }
}
