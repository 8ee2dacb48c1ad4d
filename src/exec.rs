//! External process execution.
//!
//! [`Execution`] owns a spawned child and its three pipes: upstream values
//! are written to stdin from a feeder thread, stdout is bridged into a
//! sequence, and stderr is always drained on its own thread so the child
//! never blocks on a full diagnostic pipe.
//!
//! The sequence returned by [`Sequence::exec`] carries the exit status: once
//! stdout is exhausted it waits for the child and yields
//! [`PipelineError::ExitStatus`] if the exit code is non-zero.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::bridge::{self, Emit, ReadConfig, ReadMode, WriteMode};
use crate::error::{PipelineError, Result};
use crate::sequence::Sequence;

/// How an external program is started and connected.
#[derive(Debug, Clone, Default)]
pub struct ExecConfig {
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    /// How upstream values are written to the program's stdin.
    pub input: WriteMode,
    /// How the program's stdout is read.
    pub output: ReadConfig,
}

impl ExecConfig {
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn input(mut self, mode: WriteMode) -> Self {
        self.input = mode;
        self
    }

    pub fn output(mut self, config: ReadConfig) -> Self {
        self.output = config;
        self
    }
}

type SharedChild = Arc<Mutex<Child>>;

fn kill(child: &SharedChild) {
    let mut child = child.lock().unwrap_or_else(PoisonError::into_inner);
    if let Ok(None) = child.try_wait() {
        if let Err(err) = child.kill() {
            tracing::warn!(error = %err, "failed to kill child process");
        }
        let _ = child.wait();
    }
}

/// A spawned external program.
pub struct Execution {
    command: String,
    child: SharedChild,
    stdout: Option<ChildStdout>,
    stdin_feeder: Option<JoinHandle<Result<()>>>,
    stderr_drain: Option<JoinHandle<String>>,
    finished: bool,
}

impl Execution {
    /// Start `command`, feeding `input` to its stdin if given.
    pub fn spawn<T>(command: &str, config: &ExecConfig, input: Option<Sequence<T>>) -> Result<Self>
    where
        T: Emit + Send + 'static,
    {
        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &config.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| PipelineError::Spawn {
            command: command.to_string(),
            source,
        })?;
        tracing::debug!(command, args = ?config.args, pid = child.id(), "spawned process");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stderr_drain = match stderr {
            Some(mut stderr) => Some(
                thread::Builder::new()
                    .name("seqpipe-exec-stderr".into())
                    .spawn(move || {
                        let mut bytes = Vec::new();
                        let _ = stderr.read_to_end(&mut bytes);
                        String::from_utf8_lossy(&bytes).into_owned()
                    })?,
            ),
            None => None,
        };

        let mode = config.input;
        let stdin_feeder = match (stdin, input) {
            (Some(stdin), Some(input)) => Some(
                thread::Builder::new()
                    .name("seqpipe-exec-stdin".into())
                    .spawn(move || match input.write_to(stdin, mode) {
                        Err(PipelineError::Io(err)) if err.kind() == io::ErrorKind::BrokenPipe => {
                            Ok(())
                        }
                        other => other,
                    })?,
            ),
            // Dropping stdin here gives the child an immediate EOF.
            _ => None,
        };

        Ok(Self {
            command: command.to_string(),
            child: Arc::new(Mutex::new(child)),
            stdout,
            stdin_feeder,
            stderr_drain,
            finished: false,
        })
    }

    /// Take the raw stdout pipe.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Bridge stdout into a sequence of text.
    ///
    /// Returns an empty sequence if stdout was already taken.
    pub fn output(&mut self, config: &ReadConfig) -> Sequence<String> {
        match self.stdout.take() {
            Some(stdout) => bridge::read_stream(stdout, config),
            None => Sequence::empty(),
        }
    }

    /// Bridge stdout into a sequence of raw byte chunks.
    ///
    /// Returns an empty sequence if stdout was already taken.
    pub fn output_binary(&mut self, config: &ReadConfig) -> Sequence<Vec<u8>> {
        match self.stdout.take() {
            Some(stdout) => bridge::read_binary(stdout, config),
            None => Sequence::empty(),
        }
    }

    /// Kill the child if it is still running.
    pub fn kill(&self) {
        kill(&self.child);
    }

    /// Wait for the child to exit.
    ///
    /// Fails with the upstream error if feeding stdin failed, or with
    /// [`PipelineError::ExitStatus`] carrying the full stderr output if the
    /// exit code is non-zero. Calling it again after it returned is a no-op.
    pub fn wait(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        drop(self.stdout.take());

        let fed = match self.stdin_feeder.take() {
            Some(feeder) => feeder
                .join()
                .unwrap_or_else(|_| Err(PipelineError::custom("stdin feeder panicked"))),
            None => Ok(()),
        };
        let status = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wait()?;
        let stderr = self
            .stderr_drain
            .take()
            .and_then(|drain| drain.join().ok())
            .unwrap_or_default();
        tracing::debug!(command = %self.command, code = ?status.code(), "process exited");

        fed?;
        if !status.success() {
            return Err(PipelineError::ExitStatus {
                code: status.code(),
                stderr,
            });
        }
        Ok(())
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(command = %self.command, "killing abandoned process");
            kill(&self.child);
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("command", &self.command)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Opens the stdout side of a running program.
type OpenOutput<O> = fn(&mut Execution, &ReadConfig) -> Sequence<O>;

enum Run<T, O> {
    Pending {
        input: Sequence<T>,
        command: String,
        config: ExecConfig,
        open: OpenOutput<O>,
    },
    Running {
        execution: Execution,
        output: Sequence<O>,
    },
    Done,
}

impl<T: Emit + Send + 'static, O: Send + 'static> Run<T, O> {
    fn pull(&mut self, running: &Mutex<Option<SharedChild>>) -> Option<Result<O>> {
        if matches!(self, Run::Pending { .. })
            && let Run::Pending {
                input,
                command,
                config,
                open,
            } = std::mem::replace(self, Run::Done)
        {
            match Execution::spawn(&command, &config, Some(input)) {
                Ok(mut execution) => {
                    *running.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(execution.child.clone());
                    let output = open(&mut execution, &config.output);
                    *self = Run::Running { execution, output };
                }
                Err(err) => return Some(Err(err)),
            }
        }
        let Run::Running { execution, output } = self else {
            return None;
        };
        if let Some(item) = output.next() {
            return Some(item);
        }
        let status = execution.wait();
        *self = Run::Done;
        status.err().map(Err)
    }
}

impl<T: Emit + Send + 'static> Sequence<T> {
    /// Pipe this sequence into `command` and read its stdout.
    ///
    /// The program is started on first pull. A non-zero exit code ends the
    /// output with [`PipelineError::ExitStatus`]. Terminating or dropping
    /// the returned sequence kills the child.
    ///
    /// The output is text, so a [`ReadMode::Binary`] output config fails
    /// with [`PipelineError::InvalidArgument`] before anything is spawned;
    /// use [`exec_binary`](Self::exec_binary) for raw bytes.
    pub fn exec(self, command: impl Into<String>, config: ExecConfig) -> Sequence<String> {
        if config.output.mode == ReadMode::Binary {
            self.terminate();
            return Sequence::failed(bridge::binary_on_text("exec"));
        }
        self.run_program("exec", command.into(), config, Execution::output)
    }

    /// Like [`exec`](Self::exec) but reads stdout as raw byte chunks.
    pub fn exec_binary(self, command: impl Into<String>, config: ExecConfig) -> Sequence<Vec<u8>> {
        self.run_program("exec_binary", command.into(), config, Execution::output_binary)
    }

    fn run_program<O: Send + 'static>(
        self,
        label: &'static str,
        command: String,
        config: ExecConfig,
        open: OpenOutput<O>,
    ) -> Sequence<O> {
        let running: Arc<Mutex<Option<SharedChild>>> = Arc::default();
        let slot = running.clone();
        let seq = self.derive(label, move |input| {
            let mut run = Run::Pending {
                input,
                command,
                config,
                open,
            };
            std::iter::from_fn(move || run.pull(&slot))
        });
        seq.handle().on_release(move || {
            if let Some(child) = running.lock().unwrap_or_else(PoisonError::into_inner).take() {
                kill(&child);
            }
        });
        seq
    }
}

impl Sequence<String> {
    /// Run `command` without input and read its stdout.
    pub fn from_process(command: impl Into<String>, config: ExecConfig) -> Self {
        Sequence::<String>::empty().exec(command, config)
    }

    /// Run `command` without input and read its stdout as raw bytes.
    pub fn from_process_binary(command: impl Into<String>, config: ExecConfig) -> Sequence<Vec<u8>> {
        Sequence::<String>::empty().exec_binary(command, config)
    }
}
