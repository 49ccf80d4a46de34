//! Exit status conventions.

use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use warden_common::constants::{SIGNAL_STATUS_BASE, START_FAILURE_STATUS};

/// Maps a wait status to the exit code reported to callers.
///
/// Normal exits report their code; children killed by a signal report
/// `128 + signo`, as shells do.
#[must_use]
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    status
        .signal()
        .map_or(START_FAILURE_STATUS, |signal| SIGNAL_STATUS_BASE + signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_exit_reports_code() {
        // wait status encoding: exit code in bits 8..16
        assert_eq!(exit_code(ExitStatus::from_raw(42 << 8)), 42);
        assert_eq!(exit_code(ExitStatus::from_raw(0)), 0);
    }

    #[test]
    fn signalled_exit_reports_128_plus_signal() {
        assert_eq!(exit_code(ExitStatus::from_raw(9)), 137);
    }
}
