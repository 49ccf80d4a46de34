//! The execution daemon (`wshd`).
//!
//! Runs inside a container's namespaces, accepts run requests on a unix
//! socket, and for each one starts a process as the requested user. The
//! process's stdin, stdout, stderr and a dedicated exit-status pipe are
//! handed back to the caller as passed descriptors.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod daemon;
pub mod launch;

pub use daemon::Daemon;
