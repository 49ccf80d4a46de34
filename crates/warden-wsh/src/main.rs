//! # wsh
//!
//! Runs a command inside a container through its `wshd` and exits with the
//! command's status.

use std::io;

use anyhow::Context;
use clap::Parser;
use warden_wsh::client::block_local_stdio;
use warden_wsh::{RemoteProcess, WshArgs};

fn main() -> anyhow::Result<()> {
    // stdout belongs to the remote process; only log when asked to
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(io::stderr)
            .init();
    }

    let args = WshArgs::parse();
    let socket = args.socket.clone();
    let request = args.into_request();

    let process = RemoteProcess::start(&socket, &request)
        .with_context(|| format!("running through {}", socket.display()))?;
    block_local_stdio().context("setting local stdio blocking")?;
    let code = process
        .relay(io::stdin(), &mut io::stdout(), &mut io::stderr())
        .context("relaying remote process")?;

    tracing::debug!(code, "remote process exited");
    std::process::exit(code)
}
