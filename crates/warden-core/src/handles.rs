//! Descriptor passing over unix sockets via `SCM_RIGHTS`.
//!
//! The daemon hands live pipe ends to an unprivileged peer by attaching them
//! to a regular data message. Everything platform-specific about that hand-off
//! is confined to [`send_handles`] and [`receive_handles`].

use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags, RecvMsg};
use warden_common::error::{Result, WardenError};

/// Kernel limit on descriptors in one `SCM_RIGHTS` message (`SCM_MAX_FD`).
const MAX_RECEIVED_HANDLES: usize = 253;

/// A data message received together with any descriptors attached to it.
#[derive(Debug)]
pub struct ReceivedHandles {
    /// Number of payload bytes written into the caller's buffer.
    pub len: usize,
    /// Descriptors attached to the message, in the order they were sent.
    pub handles: Vec<OwnedFd>,
}

/// Sends `payload` over `socket` with `handles` attached as passed descriptors.
///
/// The receiver obtains its own duplicates; the caller keeps ownership of
/// (and should close) its copies.
///
/// # Errors
///
/// Returns an error if `sendmsg(2)` fails or does not take the whole payload.
pub fn send_handles(socket: BorrowedFd<'_>, payload: &[u8], handles: &[BorrowedFd<'_>]) -> Result<()> {
    let raw: Vec<RawFd> = handles.iter().map(AsRawFd::as_raw_fd).collect();
    let iov = [IoSlice::new(payload)];
    let rights = [ControlMessage::ScmRights(&raw)];
    let cmsgs: &[ControlMessage<'_>] = if raw.is_empty() { &[] } else { &rights };

    let sent = loop {
        match socket::sendmsg::<()>(
            socket.as_raw_fd(),
            &iov,
            cmsgs,
            MsgFlags::MSG_NOSIGNAL,
            None,
        ) {
            Ok(sent) => break sent,
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(WardenError::protocol(format!(
                    "sendmsg failed: {}",
                    io::Error::from(e)
                )));
            }
        }
    };
    if sent != payload.len() {
        return Err(WardenError::protocol(format!(
            "sendmsg took {sent} of {} payload bytes",
            payload.len()
        )));
    }
    tracing::trace!(handles = raw.len(), bytes = sent, "sent handles");
    Ok(())
}

/// Receives one message from `socket` into `buf`, collecting passed descriptors.
///
/// Received descriptors are close-on-exec.
///
/// # Errors
///
/// Returns a protocol error if `recvmsg(2)` fails, the peer closed the socket
/// without sending anything, or the control data was truncated.
pub fn receive_handles(socket: BorrowedFd<'_>, buf: &mut [u8]) -> Result<ReceivedHandles> {
    let mut control = nix::cmsg_space!([RawFd; MAX_RECEIVED_HANDLES]);
    let mut iov = [IoSliceMut::new(buf)];

    let (len, handles) = loop {
        match socket::recvmsg::<()>(
            socket.as_raw_fd(),
            &mut iov,
            Some(control.as_mut_slice()),
            MsgFlags::MSG_CMSG_CLOEXEC,
        ) {
            Ok(msg) => break (msg.bytes, collect_rights(&msg)?),
            Err(Errno::EINTR) => {}
            Err(e) => {
                return Err(WardenError::protocol(format!(
                    "recvmsg failed: {}",
                    io::Error::from(e)
                )));
            }
        }
    };

    if len == 0 && handles.is_empty() {
        return Err(WardenError::protocol("peer closed without replying"));
    }
    tracing::trace!(handles = handles.len(), bytes = len, "received handles");
    Ok(ReceivedHandles { len, handles })
}

fn collect_rights(msg: &RecvMsg<'_, '_, ()>) -> Result<Vec<OwnedFd>> {
    let cmsgs = msg
        .cmsgs()
        .map_err(|_| WardenError::protocol("control data truncated"))?;
    let mut handles = Vec::new();
    for cmsg in cmsgs {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            // SAFETY: the kernel installed these descriptors for this
            // message and nothing else owns them yet.
            handles.extend(fds.into_iter().map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }));
        }
    }
    Ok(handles)
}
