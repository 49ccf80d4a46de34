//! System-wide constants and default paths.

/// Exit status reported when a remote command could not be started at all.
///
/// Callers cannot tell this apart from a command that legitimately exited
/// with the same value.
pub const START_FAILURE_STATUS: i32 = 255;

/// Exit statuses of children killed by a signal are `SIGNAL_STATUS_BASE + signo`.
pub const SIGNAL_STATUS_BASE: i32 = 128;

/// Number of descriptors the daemon passes back for every run request.
pub const PASSED_HANDLE_COUNT: usize = 4;

/// Largest protocol frame either side accepts.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// User commands run as when a request names none.
pub const DEFAULT_USER: &str = "root";

/// `PATH` given to commands run as uid 0.
pub const ROOT_PATH_ENV: &str = "/sbin:/bin:/usr/sbin:/usr/bin";

/// `PATH` given to commands run as any other user.
pub const USER_PATH_ENV: &str = "/bin:/usr/bin";

/// Default socket path used by `wsh`, relative to a container directory.
pub const DEFAULT_WSH_SOCKET: &str = "run/wshd.sock";

/// Kernel quota accounting unit, in bytes.
pub const QUOTA_BLOCK_SIZE: u64 = 1024;

/// Tool used to set quota limits.
pub const SETQUOTA_TOOL: &str = "setquota";

/// Tool used to find the mount point backing the container depot.
pub const DF_TOOL: &str = "df";

/// Default directory holding per-container state.
pub const DEFAULT_DEPOT_PATH: &str = "/var/lib/warden/containers";

/// Default directory holding the backend's helper binaries.
pub const DEFAULT_ROOT_PATH: &str = "/var/lib/warden/root";

/// First uid handed out to containers by default.
pub const DEFAULT_UID_POOL_START: u32 = 10_000;

/// Number of uids available to containers by default.
pub const DEFAULT_UID_POOL_SIZE: u32 = 256;
