//! # warden-core
//!
//! Low-level Linux primitives shared by the execution daemon (`wshd`) and
//! its client (`wsh`):
//! - **Protocol**: the framed run request / response / exit status records.
//! - **Handles**: passing open descriptors across a unix socket.
//! - **Pipes**: close-on-exec pipes and blocking-mode control.
//! - **Processes**: mapping a child's wait status to an exit code.
//! - **Users**: resolving a login name to credentials and a home directory.
//!
//! System calls go through `nix`; the only unsafe code adopts descriptors
//! received over a socket.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod handles;
pub mod pipe;
pub mod process;
pub mod protocol;
pub mod user;
