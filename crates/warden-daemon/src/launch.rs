//! Starting a requested program as a local user.

use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use thiserror::Error;
use warden_common::error::WardenError;
use warden_core::protocol::RunRequest;
use warden_core::user::ResolvedUser;

/// Why a requested program could not be started.
///
/// The daemon never reports these over the socket; every variant turns into
/// the start-failure exit status on the status pipe.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The requested login name does not exist.
    #[error("cannot find user: {name}")]
    UnknownUser {
        /// The name that was looked up.
        name: String,
    },

    /// The request carried no program to run.
    #[error("empty argv")]
    EmptyArgv,

    /// The user database could not be consulted.
    #[error(transparent)]
    Lookup(#[from] WardenError),

    /// The process could not be spawned.
    #[error("failed starting {program}: {source}")]
    Spawn {
        /// Executable that was attempted.
        program: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

/// Standard streams handed to the started process.
#[derive(Debug)]
pub struct ChildStdio {
    /// Read end of the stdin pipe.
    pub stdin: OwnedFd,
    /// Write end of the stdout pipe.
    pub stdout: OwnedFd,
    /// Write end of the stderr pipe.
    pub stderr: OwnedFd,
}

/// Starts `request.argv` as `request.user`.
///
/// The process gets its own session, an environment of exactly `PATH`,
/// `USER` and `HOME`, and the user's home as working directory. The stdio
/// descriptors are consumed: once this returns, the only remaining copies
/// of the pipe ends belong to the child (or are closed, on failure).
///
/// # Errors
///
/// Returns a [`LaunchError`] if the user is unknown, argv is empty, or the
/// spawn fails.
pub fn start(request: &RunRequest, stdio: ChildStdio) -> Result<Child, LaunchError> {
    let (program, args) = request.argv.split_first().ok_or(LaunchError::EmptyArgv)?;
    let user = ResolvedUser::lookup(&request.user)?.ok_or_else(|| LaunchError::UnknownUser {
        name: request.user.clone(),
    })?;
    let executable = resolve_executable(program, user.path_env());

    let mut command = Command::new(&executable);
    let _ = command
        .arg0(program)
        .args(args)
        .env_clear()
        .envs(user.environment())
        .current_dir(&user.home)
        .uid(user.uid)
        .gid(user.gid)
        .stdin(Stdio::from(stdio.stdin))
        .stdout(Stdio::from(stdio.stdout))
        .stderr(Stdio::from(stdio.stderr));

    // SAFETY: setsid(2) is async-signal-safe and touches no parent memory.
    let _ = unsafe {
        command.pre_exec(|| {
            let _ = nix::unistd::setsid().map_err(io::Error::from)?;
            Ok(())
        })
    };

    let child = command.spawn().map_err(|source| LaunchError::Spawn {
        program: executable.clone(),
        source,
    })?;
    tracing::info!(
        pid = child.id(),
        user = %user.name,
        uid = user.uid,
        program = %executable.display(),
        "started command"
    );
    Ok(child)
}

/// Resolves `program` against `path` the way a shell would.
///
/// Names containing a slash are used as given. When the lookup fails the
/// bare name is returned so that the spawn itself reports the failure.
#[must_use]
pub fn resolve_executable(program: &str, path: &str) -> PathBuf {
    if program.contains('/') {
        return PathBuf::from(program);
    }
    which::which_in(program, Some(path), Path::new("/")).unwrap_or_else(|_| PathBuf::from(program))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::pipe::Pipe;

    fn stdio() -> (ChildStdio, Pipe, Pipe, Pipe) {
        let stdin = Pipe::new().expect("pipe");
        let stdout = Pipe::new().expect("pipe");
        let stderr = Pipe::new().expect("pipe");
        let child = ChildStdio {
            stdin: stdin.read.try_clone().expect("dup"),
            stdout: stdout.write.try_clone().expect("dup"),
            stderr: stderr.write.try_clone().expect("dup"),
        };
        (child, stdin, stdout, stderr)
    }

    #[test]
    fn slash_paths_are_used_verbatim() {
        assert_eq!(
            resolve_executable("./run.sh", "/bin"),
            PathBuf::from("./run.sh")
        );
    }

    #[test]
    fn bare_names_resolve_on_path() {
        let resolved = resolve_executable("sh", "/bin:/usr/bin");
        assert!(resolved.is_absolute(), "got {}", resolved.display());
        assert!(resolved.ends_with("sh"));
    }

    #[test]
    fn unresolvable_names_fall_back_to_bare_name() {
        assert_eq!(
            resolve_executable("no-such-binary-here", "/bin"),
            PathBuf::from("no-such-binary-here")
        );
    }

    #[test]
    fn unknown_user_is_reported() {
        let (child_stdio, ..) = stdio();
        let request = RunRequest {
            user: "doesnotexist".into(),
            argv: vec!["/bin/true".into()],
        };
        let err = start(&request, child_stdio).unwrap_err();
        assert!(matches!(err, LaunchError::UnknownUser { ref name } if name == "doesnotexist"));
    }

    #[test]
    fn empty_argv_is_reported() {
        let (child_stdio, ..) = stdio();
        let request = RunRequest {
            user: String::new(),
            argv: vec![],
        };
        assert!(matches!(
            start(&request, child_stdio),
            Err(LaunchError::EmptyArgv)
        ));
    }

    #[test]
    fn missing_executable_is_a_spawn_error() {
        let Some(me) = nix::unistd::User::from_uid(nix::unistd::Uid::current()).expect("getpwuid")
        else {
            return;
        };
        let (child_stdio, ..) = stdio();
        let request = RunRequest {
            user: me.name,
            argv: vec!["/definitely/not/here".into()],
        };
        assert!(matches!(
            start(&request, child_stdio),
            Err(LaunchError::Spawn { .. })
        ));
    }
}
