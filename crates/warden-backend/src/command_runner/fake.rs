//! A scripted [`CommandRunner`] for tests.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use futures::FutureExt;
use warden_common::types::JobId;

use super::{CommandOutput, CommandRunner, JobCommand, OutputReader, Process};

#[derive(Debug, Clone)]
enum Script {
    Exit(CommandOutput),
    FailSpawn(String),
    FailWait(String),
}

/// Records every command it is asked to run and answers with scripted
/// output instead of starting anything.
///
/// Unscripted programs exit `0` with no output.
#[derive(Debug, Default)]
pub struct FakeCommandRunner {
    scripts: Mutex<HashMap<String, Script>>,
    reattachable: Mutex<HashMap<JobId, CommandOutput>>,
    executed: Mutex<Vec<JobCommand>>,
}

impl FakeCommandRunner {
    /// Creates a runner with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every run of `program` produce `output`.
    pub fn when_running(&self, program: &str, output: CommandOutput) {
        self.script(program, Script::Exit(output));
    }

    /// Makes every spawn of `program` fail.
    pub fn fail_spawn(&self, program: &str, message: &str) {
        self.script(program, Script::FailSpawn(message.into()));
    }

    /// Makes `program` start but fail while being waited on.
    pub fn fail_wait(&self, program: &str, message: &str) {
        self.script(program, Script::FailWait(message.into()));
    }

    /// Makes [`CommandRunner::reattach`] succeed for `id` with `output`.
    pub fn when_reattaching(&self, id: JobId, output: CommandOutput) {
        let _ = lock(&self.reattachable).insert(id, output);
    }

    /// Returns every command spawned so far, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<JobCommand> {
        lock(&self.executed).clone()
    }

    fn script(&self, program: &str, script: Script) {
        let _ = lock(&self.scripts).insert(program.into(), script);
    }
}

impl CommandRunner for FakeCommandRunner {
    fn spawn(&self, command: &JobCommand) -> io::Result<Process> {
        lock(&self.executed).push(command.clone());
        let program = command.program.to_string_lossy();
        let script = lock(&self.scripts).get(&*program).cloned();
        match script {
            None => Ok(finished(CommandOutput::default())),
            Some(Script::Exit(output)) => Ok(finished(output)),
            Some(Script::FailSpawn(message)) => Err(io::Error::other(message)),
            Some(Script::FailWait(message)) => Ok(Process {
                stdout: None,
                stderr: None,
                exit: futures::future::ready(Err(io::Error::other(message))).boxed(),
            }),
        }
    }

    fn reattach(&self, id: JobId) -> io::Result<Process> {
        lock(&self.reattachable)
            .get(&id)
            .cloned()
            .map(finished)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no job {id} to reattach")))
    }
}

fn finished(output: CommandOutput) -> Process {
    Process {
        stdout: Some(reader(output.stdout)),
        stderr: Some(reader(output.stderr)),
        exit: futures::future::ready(Ok(output.status)).boxed(),
    }
}

fn reader(bytes: Bytes) -> OutputReader {
    Box::new(io::Cursor::new(bytes))
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
