//! # wshd
//!
//! In-container execution daemon. Started by the container bootstrapper
//! once namespaces are in place, it serves run requests from `wsh` until
//! the container is torn down.

use std::fs::File;
use std::os::fd::{BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use nix::fcntl::{FcntlArg, fcntl};
use warden_daemon::Daemon;

/// wshd: run commands inside this container on behalf of wsh.
#[derive(Parser, Debug)]
#[command(name = "wshd", version, about, long_about = None)]
struct Cli {
    /// Path of the unix socket to listen on.
    #[arg(long, required_unless_present = "socket_fd", conflicts_with = "socket_fd")]
    socket: Option<PathBuf>,

    /// Serve an already-listening socket inherited on this descriptor.
    #[arg(long)]
    socket_fd: Option<RawFd>,

    /// Append logs to this file instead of stderr.
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref())?;

    let daemon = match (cli.socket, cli.socket_fd) {
        (Some(path), _) => Daemon::bind(&path)?,
        (None, Some(fd)) => Daemon::from_fd(adopt_descriptor(fd)?),
        (None, None) => anyhow::bail!("either --socket or --socket-fd is required"),
    };

    tracing::info!(socket = ?daemon.socket_path(), "wshd serving");
    daemon.run();
    Ok(())
}

/// Takes ownership of an inherited descriptor after checking it is open.
#[allow(unsafe_code)]
fn adopt_descriptor(fd: RawFd) -> anyhow::Result<OwnedFd> {
    anyhow::ensure!(fd >= 0, "--socket-fd {fd} is not a descriptor number");
    // SAFETY: the borrow only lives for the F_GETFD query below.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let _ = fcntl(borrowed, FcntlArg::F_GETFD)
        .with_context(|| format!("--socket-fd {fd} is not an open descriptor"))?;
    // SAFETY: the descriptor is open, the bootstrapper handed it to us, and
    // nothing else in this process refers to it.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn init_tracing(log: Option<&Path>) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env();
    match log {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
