//! Drives a live daemon over its socket the way `wsh` does.

#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use warden_common::constants::START_FAILURE_STATUS;
use warden_core::handles;
use warden_core::protocol::{self, ExitStatusMessage, RunRequest, RunResponse};
use warden_core::user::ResolvedUser;
use warden_daemon::Daemon;

struct Session {
    stdin: File,
    stdout: File,
    stderr: File,
    status: File,
}

fn read_all(file: &mut File) -> String {
    let mut out = String::new();
    let _ = file.read_to_string(&mut out).expect("read stream");
    out
}

fn exit_status(status: &mut File) -> i32 {
    let message: ExitStatusMessage = protocol::read_frame(status).expect("read exit status");
    message.exit_status
}

fn start_daemon() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("wshd.sock");
    let daemon = Daemon::bind(&socket).expect("bind");
    let _ = daemon.start().expect("start");
    (dir, socket)
}

fn current_account() -> Option<ResolvedUser> {
    let me = nix::unistd::User::from_uid(nix::unistd::Uid::current()).expect("getpwuid")?;
    ResolvedUser::lookup(&me.name).expect("lookup")
}

fn current_user() -> Option<String> {
    current_account().map(|u| u.name)
}

fn run(socket: &Path, request: &RunRequest) -> Session {
    let mut conn = UnixStream::connect(socket).expect("connect");
    conn.set_read_timeout(Some(Duration::from_secs(10)))
        .expect("timeout");
    protocol::write_frame(&mut conn, request).expect("send request");

    let mut buf = [0u8; 64];
    let received = handles::receive_handles(conn.as_fd(), &mut buf).expect("receive");
    let _: RunResponse = protocol::decode_frame(&buf[..received.len]).expect("response");
    assert_eq!(received.handles.len(), 4);

    let mut fds = received.handles.into_iter().map(File::from);
    Session {
        stdin: fds.next().unwrap(),
        stdout: fds.next().unwrap(),
        stderr: fds.next().unwrap(),
        status: fds.next().unwrap(),
    }
}

#[test]
fn passes_stdin_stdout_stderr_and_status() {
    let Some(user) = current_user() else { return };
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user,
            argv: vec!["/bin/sh".into()],
        },
    );

    session
        .stdin
        .write_all(b"echo hi out\necho hi err 1>&2\nexit 42\n")
        .expect("write script");
    drop(session.stdin);

    assert_eq!(read_all(&mut session.stdout), "hi out\n");
    assert_eq!(read_all(&mut session.stderr), "hi err\n");
    assert_eq!(exit_status(&mut session.status), 42);
}

#[test]
fn echo_reports_output_and_zero_status() {
    let Some(user) = current_user() else { return };
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user,
            argv: vec!["/bin/echo".into(), "hi".into()],
        },
    );

    assert_eq!(read_all(&mut session.stdout), "hi\n");
    assert_eq!(exit_status(&mut session.status), 0);
}

#[test]
fn environment_is_limited_to_path_user_home() {
    let Some(me) = current_account() else { return };
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user: me.name.clone(),
            argv: vec!["env".into()],
        },
    );

    let output = read_all(&mut session.stdout);
    let mut lines: Vec<_> = output.lines().collect();
    lines.sort_unstable();
    let mut expected = vec![
        format!("HOME={}", me.home.display()),
        format!("PATH={}", me.path_env()),
        format!("USER={}", me.name),
    ];
    expected.sort_unstable();
    assert_eq!(lines, expected);
    assert_eq!(exit_status(&mut session.status), 0);
}

#[test]
fn runs_in_the_users_home_directory() {
    let Some(me) = current_account() else { return };
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user: me.name.clone(),
            argv: vec!["pwd".into()],
        },
    );

    let cwd = read_all(&mut session.stdout);
    let home = std::fs::canonicalize(&me.home).unwrap_or(me.home);
    assert_eq!(PathBuf::from(cwd.trim_end()), home);
}

#[test]
fn runs_in_a_new_session() {
    let Some(user) = current_user() else { return };
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user,
            argv: vec!["/bin/sh".into(), "-c".into(), "ps -o sid= -p $$; echo $$".into()],
        },
    );

    let output = read_all(&mut session.stdout);
    let fields: Vec<_> = output.split_whitespace().collect();
    if fields.len() == 2 {
        assert_eq!(fields[0], fields[1], "process should lead its own session");
    }
}

#[test]
fn unknown_user_reports_sentinel_status() {
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user: "doesnotexist".into(),
            argv: vec!["/bin/echo".into(), "hi".into()],
        },
    );

    assert_eq!(exit_status(&mut session.status), START_FAILURE_STATUS);
    assert_eq!(read_all(&mut session.stdout), "");
}

#[test]
fn missing_executable_reports_sentinel_status() {
    let Some(user) = current_user() else { return };
    let (_dir, socket) = start_daemon();
    let mut session = run(
        &socket,
        &RunRequest {
            user,
            argv: vec!["/no/such/program".into()],
        },
    );

    assert_eq!(exit_status(&mut session.status), START_FAILURE_STATUS);
}

#[test]
fn empty_argv_reports_sentinel_status() {
    let (_dir, socket) = start_daemon();
    let mut session = run(&socket, &RunRequest::default());
    assert_eq!(exit_status(&mut session.status), START_FAILURE_STATUS);
}

#[test]
fn malformed_request_only_drops_that_connection() {
    let Some(user) = current_user() else { return };
    let (_dir, socket) = start_daemon();

    let mut bad = UnixStream::connect(&socket).expect("connect");
    bad.write_all(&[0, 0, 0, 3, b'x', b'y', b'z'])
        .expect("write garbage");
    let mut rest = Vec::new();
    let _ = bad.read_to_end(&mut rest).expect("daemon closes connection");
    assert!(rest.is_empty());

    let mut session = run(
        &socket,
        &RunRequest {
            user,
            argv: vec!["/bin/echo".into(), "still alive".into()],
        },
    );
    assert_eq!(read_all(&mut session.stdout), "still alive\n");
    assert_eq!(exit_status(&mut session.status), 0);
}

#[test]
fn concurrent_requests_are_independent() {
    let Some(user) = current_user() else { return };
    let (_dir, socket) = start_daemon();

    let mut sessions: Vec<_> = (0..4)
        .map(|i| {
            let session = run(
                &socket,
                &RunRequest {
                    user: user.clone(),
                    argv: vec!["/bin/sh".into(), "-c".into(), format!("cat; exit {i}")],
                },
            );
            (i, session)
        })
        .collect();

    for (i, session) in &mut sessions {
        writeln!(session.stdin, "job {i}").expect("write");
    }
    for (i, mut session) in sessions {
        drop(session.stdin);
        assert_eq!(read_all(&mut session.stdout), format!("job {i}\n"));
        assert_eq!(exit_status(&mut session.status), i);
    }
}

#[test]
fn closed_socket_fd_is_rejected_at_startup() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_wshd"))
        .args(["--socket-fd", "987"])
        .output()
        .expect("run wshd");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--socket-fd 987 is not an open descriptor"), "{stderr}");
}

#[test]
fn negative_socket_fd_is_rejected_at_startup() {
    let output = std::process::Command::new(env!("CARGO_BIN_EXE_wshd"))
        .arg("--socket-fd=-1")
        .output()
        .expect("run wshd");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("not a descriptor number"));
}
