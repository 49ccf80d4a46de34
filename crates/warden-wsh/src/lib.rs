//! The execution client (`wsh`).
//!
//! Connects to `wshd`, asks it to run a command, and then acts as the stdio
//! relay for the process the daemon started, finally exiting with that
//! process's status.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod args;
pub mod client;

pub use args::WshArgs;
pub use client::RemoteProcess;
