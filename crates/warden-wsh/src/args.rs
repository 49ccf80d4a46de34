//! Command-line arguments.
//!
//! Besides its own flags, `wsh` accepts the options of `rsh(1)` so it can be
//! dropped in wherever a remote shell is expected (e.g. as `RSYNC_RSH`).

use std::path::PathBuf;

use clap::Parser;
use warden_common::constants::{DEFAULT_USER, DEFAULT_WSH_SOCKET};
use warden_core::protocol::RunRequest;

/// wsh: run a command inside a container through its wshd.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "wsh", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct WshArgs {
    /// Path of the daemon's unix socket.
    #[arg(long, default_value = DEFAULT_WSH_SOCKET)]
    pub socket: PathBuf,

    /// User to run the command as.
    #[arg(long, default_value = DEFAULT_USER)]
    pub user: String,

    /// Interpret arguments the way rsh does.
    #[arg(long)]
    pub rsh: bool,

    /// rsh: login name; overrides --user.
    #[arg(short = 'l', value_name = "LOGIN")]
    pub rsh_login: Option<String>,

    /// rsh: timeout (ignored).
    #[arg(short = 't', value_name = "SECONDS")]
    pub rsh_timeout: Option<String>,

    /// rsh: force IPv4 (ignored).
    #[arg(short = '4')]
    pub rsh_ipv4: bool,

    /// rsh: force IPv6 (ignored).
    #[arg(short = '6')]
    pub rsh_ipv6: bool,

    /// rsh: socket debugging (ignored).
    #[arg(short = 'd')]
    pub rsh_debug: bool,

    /// rsh: no stdin (ignored).
    #[arg(short = 'n')]
    pub rsh_no_stdin: bool,

    /// Command to run, followed by its arguments. In rsh mode the first
    /// value is the host and is dropped.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub argv: Vec<String>,
}

impl WshArgs {
    /// Builds the request to send to the daemon.
    #[must_use]
    pub fn into_request(self) -> RunRequest {
        if !self.rsh {
            return RunRequest {
                user: self.user,
                argv: self.argv,
            };
        }
        RunRequest {
            user: self.rsh_login.unwrap_or(self.user),
            argv: self.argv.into_iter().skip(1).collect(),
        }
    }
}
