//! A single tracked job.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::BytesMut;
use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use warden_common::constants::START_FAILURE_STATUS;
use warden_common::types::{JobId, JobStream, StreamName};

use super::JobInfo;
use super::named_stream::{Fanout, NamedStream};
use crate::command_runner::{CommandOutput, OutputReader, Process};

const READ_CHUNK: usize = 4096;

/// One supervised process, its output, and its completion.
///
/// Output is only read once linking starts; until then it waits in the
/// process's pipes.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    discard_output: bool,
    spawned_at: DateTime<Utc>,
    stdout: NamedStream,
    stderr: NamedStream,
    fanout: Fanout,
    pending: Mutex<Option<io::Result<Process>>>,
    completion: watch::Sender<Option<i32>>,
}

impl Job {
    /// Wraps a started process (or the reason there is none).
    #[must_use]
    pub fn new(id: JobId, discard_output: bool, process: io::Result<Process>) -> Self {
        let (completion, _) = watch::channel(None);
        Self {
            id,
            discard_output,
            spawned_at: Utc::now(),
            stdout: NamedStream::new(StreamName::Stdout, discard_output),
            stderr: NamedStream::new(StreamName::Stderr, discard_output),
            fanout: Fanout::default(),
            pending: Mutex::new(Some(process)),
            completion,
        }
    }

    /// Returns a snapshot of the job's description.
    #[must_use]
    pub const fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id,
            discard_output: self.discard_output,
            spawned_at: self.spawned_at,
        }
    }

    /// Returns the exit status, if the job has completed.
    #[must_use]
    pub fn exit_status(&self) -> Option<i32> {
        *self.completion.borrow()
    }

    /// Starts reading output and waiting for exit. Only the first call has
    /// any effect.
    pub fn start_linking(self: &Arc<Self>) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(process) = pending {
            let job = Arc::clone(self);
            let _ = tokio::spawn(async move { job.supervise(process).await });
        }
    }

    /// Waits for completion and returns the status with all retained output.
    pub async fn wait(&self) -> CommandOutput {
        let mut completion = self.completion.subscribe();
        let status = completion
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|status| *status)
            .unwrap_or(START_FAILURE_STATUS);
        CommandOutput {
            status,
            stdout: self.stdout.bytes(),
            stderr: self.stderr.bytes(),
        }
    }

    /// Subscribes to the job's live output.
    ///
    /// A job that has already completed yields only its exit chunk.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<JobStream> {
        if let Some(rx) = self.fanout.subscribe() {
            return rx;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let status = self.exit_status().unwrap_or(START_FAILURE_STATUS);
        let _ = tx.send(JobStream::Exit { status });
        rx
    }

    async fn supervise(self: Arc<Self>, process: io::Result<Process>) {
        let status = match process {
            Ok(process) => self.drain(process).await,
            Err(e) => {
                tracing::warn!(job = %self.id, error = %e, "job has no process to link to");
                START_FAILURE_STATUS
            }
        };
        self.complete(status);
    }

    async fn drain(self: &Arc<Self>, process: Process) -> i32 {
        let Process {
            stdout,
            stderr,
            exit,
        } = process;

        let pumps: Vec<_> = [(StreamName::Stdout, stdout), (StreamName::Stderr, stderr)]
            .into_iter()
            .filter_map(|(name, reader)| {
                reader.map(|reader| tokio::spawn(pump(Arc::clone(self), name, reader)))
            })
            .collect();

        let status = exit.await.unwrap_or_else(|e| {
            tracing::warn!(job = %self.id, error = %e, "failed waiting for job");
            START_FAILURE_STATUS
        });

        // the exit chunk must follow all output
        for pump in pumps {
            if let Err(e) = pump.await {
                tracing::warn!(job = %self.id, error = %e, "output pump failed");
            }
        }
        status
    }

    fn complete(&self, status: i32) {
        let _ = self.completion.send_replace(Some(status));
        self.fanout.close(&JobStream::Exit { status });
        tracing::info!(job = %self.id, status, "job completed");
    }

    const fn stream(&self, name: StreamName) -> &NamedStream {
        match name {
            StreamName::Stdout => &self.stdout,
            StreamName::Stderr => &self.stderr,
        }
    }
}

async fn pump(job: Arc<Job>, name: StreamName, mut reader: OutputReader) {
    let stream = job.stream(name);
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        match reader.read_buf(&mut buf).await {
            Ok(0) => break,
            Ok(_) => stream.write(buf.split().freeze(), &job.fanout),
            Err(e) => {
                tracing::debug!(job = %job.id, stream = %name, error = %e, "output closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::fake::FakeCommandRunner;
    use crate::command_runner::{CommandRunner, JobCommand};
    use bytes::Bytes;

    fn scripted(status: i32, stdout: &'static [u8], stderr: &'static [u8]) -> Arc<Job> {
        let runner = FakeCommandRunner::new();
        runner.when_running(
            "job",
            CommandOutput {
                status,
                stdout: Bytes::from_static(stdout),
                stderr: Bytes::from_static(stderr),
            },
        );
        let process = runner.spawn(&JobCommand::new("job"));
        Arc::new(Job::new(JobId::new(1), false, process))
    }

    #[tokio::test]
    async fn nothing_happens_until_linking_starts() {
        let job = scripted(0, b"out", b"");
        tokio::task::yield_now().await;
        assert_eq!(job.exit_status(), None);
    }

    #[tokio::test]
    async fn wait_returns_status_and_output() {
        let job = scripted(42, b"hi out\n", b"hi err\n");
        job.start_linking();
        let output = job.wait().await;
        assert_eq!(output.status, 42);
        assert_eq!(output.stdout, "hi out\n");
        assert_eq!(output.stderr, "hi err\n");
    }

    #[tokio::test]
    async fn linking_twice_runs_once() {
        let job = scripted(0, b"once", b"");
        job.start_linking();
        job.start_linking();
        assert_eq!(job.wait().await.stdout, "once");
    }

    #[tokio::test]
    async fn subscriber_sees_output_then_exit() {
        let job = scripted(3, b"data", b"");
        let mut rx = job.subscribe();
        job.start_linking();

        assert_eq!(
            rx.recv().await,
            Some(JobStream::Output {
                name: StreamName::Stdout,
                data: Bytes::from_static(b"data"),
            })
        );
        assert_eq!(rx.recv().await, Some(JobStream::Exit { status: 3 }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn subscribing_after_completion_yields_only_exit() {
        let job = scripted(7, b"missed", b"");
        job.start_linking();
        let _ = job.wait().await;

        let mut rx = job.subscribe();
        assert_eq!(rx.recv().await, Some(JobStream::Exit { status: 7 }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn missing_process_completes_with_sentinel() {
        let job = Arc::new(Job::new(
            JobId::new(9),
            true,
            Err(io::Error::other("gone")),
        ));
        job.start_linking();
        let output = job.wait().await;
        assert_eq!(output.status, START_FAILURE_STATUS);
        assert!(output.stdout.is_empty());
    }

    #[tokio::test]
    async fn wait_failure_completes_with_sentinel() {
        let runner = FakeCommandRunner::new();
        runner.fail_wait("job", "lost track");
        let job = Arc::new(Job::new(
            JobId::new(1),
            false,
            runner.spawn(&JobCommand::new("job")),
        ));
        job.start_linking();
        assert_eq!(job.wait().await.status, START_FAILURE_STATUS);
    }
}
